use crate::JointSlot;
use servo_transport::BusAddress;
use thiserror::Error;

pub type Result<T, E = RegistryError> = core::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("address {0} is on no family roster")]
    UnknownAddress(BusAddress),
    #[error("no joint in slot {0}")]
    UnknownSlot(JointSlot),
    #[error("address {0} is not assigned to any joint")]
    AddressNotFound(BusAddress),
    #[error("address {0} is already assigned")]
    AddressConflict(BusAddress),
    #[error("address {0} is listed more than once")]
    DuplicateAddress(BusAddress),
    #[error("address {0} is reserved")]
    ReservedAddress(BusAddress),
    #[error("descriptor lists no servos")]
    Empty,
}
