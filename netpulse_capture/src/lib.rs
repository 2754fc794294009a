pub mod device;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod session;
