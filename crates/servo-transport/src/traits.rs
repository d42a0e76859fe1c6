use crate::{BusAddress, ConfigRegister, FieldKind, Result, TransportError};

/// Capability interface of one servo protocol family.
///
/// Every method is a single blocking request/response exchange on the bus (or a single
/// broadcast for batch writes). Implementations enforce their own per-exchange timeout and
/// never retry.
pub trait ServoDriver: Send {
    /// Short label used in logs and journals (e.g. "sts", "scs").
    fn name(&self) -> &str;

    /// Probe one address; returns the address reported back by the servo.
    fn ping(&mut self, address: BusAddress) -> Result<BusAddress>;

    /// Command one servo to move to `position`.
    fn write_position(
        &mut self,
        address: BusAddress,
        position: i16,
        velocity: u16,
        acceleration: u8,
    ) -> Result<()>;

    /// Command several servos in one synchronized transaction.
    ///
    /// All slices have the same length. Families without a synchronized write keep the
    /// default, which refuses.
    fn write_position_batch(
        &mut self,
        _addresses: &[BusAddress],
        _positions: &[i16],
        _velocities: &[u16],
        _accelerations: &[u8],
    ) -> Result<()> {
        Err(TransportError::Unsupported("synchronized batch write"))
    }

    /// Read one telemetry field as a signed integer.
    fn read_field(&mut self, address: BusAddress, field: FieldKind) -> Result<i32>;

    fn set_torque(&mut self, address: BusAddress, enabled: bool) -> Result<()>;

    fn unlock_config(&mut self, address: BusAddress) -> Result<()>;

    fn write_config_byte(
        &mut self,
        address: BusAddress,
        register: ConfigRegister,
        value: u8,
    ) -> Result<()>;

    fn lock_config(&mut self, address: BusAddress) -> Result<()>;
}
