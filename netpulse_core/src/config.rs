use serde::{Deserialize, Serialize};

/// Maximum bytes captured per frame unless configured otherwise.
pub const DEFAULT_SNAPLEN: i32 = 65535;

/// Read timeout handed to the device, in milliseconds.
pub const DEFAULT_READ_TIMEOUT_MS: i32 = 1000;

/// Configuration consumed by a capture session when opening its device.
///
/// The filter expression is passed to the device verbatim; this crate does
/// not parse or validate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub filter: Option<String>,
    pub promiscuous: bool,
    pub read_timeout_ms: i32,
    pub snaplen: i32,
    pub immediate_mode: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            filter: None,
            promiscuous: true,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            snaplen: DEFAULT_SNAPLEN,
            immediate_mode: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CaptureConfig::default();
        assert!(config.promiscuous);
        assert!(config.immediate_mode);
        assert!(config.filter.is_none());
        assert_eq!(config.read_timeout_ms, DEFAULT_READ_TIMEOUT_MS);
        assert_eq!(config.snaplen, DEFAULT_SNAPLEN);
    }
}
