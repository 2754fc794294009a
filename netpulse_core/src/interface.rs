use crate::error::{CoreError, CoreErrorKind};
use pnet::datalink;
use std::net::IpAddr;

/// Description of a capture-capable network interface.
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    pub name: String,
    pub description: String,
    pub is_up: bool,
    pub is_loopback: bool,
    pub ips: Vec<IpAddr>,
}

impl From<&datalink::NetworkInterface> for InterfaceInfo {
    fn from(value: &datalink::NetworkInterface) -> Self {
        Self {
            name: value.name.clone(),
            description: value.description.clone(),
            is_up: value.is_up(),
            is_loopback: value.is_loopback(),
            ips: value.ips.iter().map(|net| net.ip()).collect(),
        }
    }
}

/// Stateless one-shot query of the host's interfaces. Carries no session
/// state and no coupling to any capture lifecycle.
pub fn list_interfaces() -> Vec<InterfaceInfo> {
    datalink::interfaces().iter().map(InterfaceInfo::from).collect()
}

pub fn find_interface(name: &str) -> Result<InterfaceInfo, CoreError> {
    let interfaces = datalink::interfaces();
    let interface = interfaces.iter().find(|i| i.name == name).ok_or(CoreError::new(
        CoreErrorKind::NetworkInterfaceError,
        &format!("Interface {name} not found"),
    ))?;
    Ok(InterfaceInfo::from(interface))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_interface_is_an_error() {
        let result = find_interface("netpulse-does-not-exist0");
        assert!(result.is_err());
    }
}
