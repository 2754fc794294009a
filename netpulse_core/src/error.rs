use std::error::Error;
use std::fmt::{Display, Formatter};
use std::net::AddrParseError;
use std::num::ParseIntError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CoreErrorKind {
    #[error("Capture error")]
    CaptureError,
    #[error("Network interface error")]
    NetworkInterfaceError,
    #[error("Address parse error")]
    ParseAddrError,
}

#[derive(Debug, Clone)]
pub struct CoreError {
    pub error_kind: CoreErrorKind,
    pub message: String,
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Core Error: {}: {}", self.error_kind, self.message)
    }
}

impl Error for CoreError {}

impl CoreError {
    pub fn new(error_kind: CoreErrorKind, message: &str) -> Self {
        Self {
            error_kind,
            message: message.to_owned(),
        }
    }
}

impl From<pcap::Error> for CoreError {
    fn from(value: pcap::Error) -> Self {
        CoreError::new(CoreErrorKind::CaptureError, &value.to_string())
    }
}

impl From<AddrParseError> for CoreError {
    fn from(value: AddrParseError) -> Self {
        CoreError::new(CoreErrorKind::ParseAddrError, &value.to_string())
    }
}

impl From<ParseIntError> for CoreError {
    fn from(value: ParseIntError) -> Self {
        CoreError::new(CoreErrorKind::ParseAddrError, &value.to_string())
    }
}
