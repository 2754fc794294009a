use netpulse_core::error::CoreError;
use std::fmt::{Debug, Display, Formatter};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CaptureErrorKind {
    CoreError(CoreError),
    InvalidState,
    DeviceError,
    PacketConstructionError,
    Cancelled,
}

impl Display for CaptureErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureErrorKind::CoreError(err) => Display::fmt(&err, f),
            CaptureErrorKind::InvalidState => write!(f, "Invalid session state"),
            CaptureErrorKind::DeviceError => write!(f, "Capture device error"),
            CaptureErrorKind::PacketConstructionError => write!(f, "Packet could not be constructed"),
            CaptureErrorKind::Cancelled => write!(f, "Packet stream cancelled"),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub struct CaptureError {
    pub error_kind: CaptureErrorKind,
    pub message: String,
}

impl Display for CaptureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "CaptureError: {}: {}", self.error_kind, self.message)
    }
}

impl CaptureError {
    pub fn new(error_kind: CaptureErrorKind, message: &str) -> Self {
        Self {
            error_kind,
            message: message.to_owned(),
        }
    }

    pub fn invalid_state(message: &str) -> Self {
        Self::new(CaptureErrorKind::InvalidState, message)
    }

    pub fn cancelled() -> Self {
        Self::new(
            CaptureErrorKind::Cancelled,
            "packet stream cancelled by the consumer",
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.error_kind, CaptureErrorKind::Cancelled)
    }
}

impl From<CoreError> for CaptureError {
    fn from(value: CoreError) -> Self {
        Self::new(CaptureErrorKind::CoreError(value), "")
    }
}

impl From<pcap::Error> for CaptureError {
    fn from(value: pcap::Error) -> Self {
        Self::from(CoreError::from(value))
    }
}
