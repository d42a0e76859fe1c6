use servo_registry::{JointSlot, RegistryError};
use servo_transport::{BusAddress, TransportError};
use thiserror::Error;

pub type Result<T, E = ArmError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ArmError {
    #[error("device {0} not found")]
    DeviceNotFound(BusAddress),
    #[error("bus timeout on device {0}")]
    BusTimeout(BusAddress),
    #[error("address {0} is not assigned to any joint")]
    AddressNotFound(BusAddress),
    #[error("address {0} is already assigned")]
    AddressConflict(BusAddress),
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("joint {slot} could not be read: {source}")]
    PartialSnapshotFailure {
        slot: JointSlot,
        source: Box<ArmError>,
    },
    #[error("no joint in slot {0}")]
    UnknownSlot(JointSlot),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("motion on device {0} cancelled")]
    Cancelled(BusAddress),
    #[error("transport error on device {address}: {source}")]
    Transport {
        address: BusAddress,
        source: TransportError,
    },
    #[error(transparent)]
    Registry(RegistryError),
}

impl ArmError {
    /// Classify a driver error raised while talking to `address`.
    pub fn from_transport(address: BusAddress, err: TransportError) -> Self {
        match err {
            TransportError::Timeout => ArmError::BusTimeout(address),
            TransportError::NotFound(a) => ArmError::DeviceNotFound(a),
            TransportError::Unsupported(what) => ArmError::Unsupported(what),
            source => ArmError::Transport { address, source },
        }
    }

    /// Stable identifier reported to the host.
    pub fn kind(&self) -> &'static str {
        match self {
            ArmError::DeviceNotFound(_) => "device_not_found",
            ArmError::BusTimeout(_) => "bus_timeout",
            ArmError::AddressNotFound(_) => "address_not_found",
            ArmError::AddressConflict(_) => "address_conflict",
            ArmError::Unsupported(_) => "unsupported",
            ArmError::PartialSnapshotFailure { .. } => "partial_snapshot_failure",
            ArmError::UnknownSlot(_) => "unknown_slot",
            ArmError::InvalidArgument(_) => "invalid_argument",
            ArmError::Cancelled(_) => "cancelled",
            ArmError::Transport { .. } => "transport",
            ArmError::Registry(_) => "registry",
        }
    }
}

impl From<RegistryError> for ArmError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::AddressNotFound(a) => ArmError::AddressNotFound(a),
            RegistryError::AddressConflict(a) => ArmError::AddressConflict(a),
            RegistryError::UnknownSlot(s) => ArmError::UnknownSlot(s),
            other => ArmError::Registry(other),
        }
    }
}
