use crate::BusAddress;
use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no servo answered at address {0}")]
    NotFound(BusAddress),
    #[error("operation not supported by this driver: {0}")]
    Unsupported(&'static str),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("timeout")]
    Timeout,
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),
    /// The servo refused a request (for example a config write while locked).
    #[error("servo {address} refused the request (status 0x{status:02X})")]
    Status { address: BusAddress, status: u8 },
}
