use crate::{BusAddress, BusInfo, ConfigRegister, FieldKind, Result, ServoDriver, TransportError};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Status byte a simulated servo returns when a config write is refused.
const STATUS_REFUSED: u8 = 0x08;

/// How a simulated servo reacts to a position command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Arrival {
    /// The present position jumps to the goal as soon as it is written.
    Immediate,
    /// The servo accepts the goal but never moves.
    Stalled,
}

/// State of one simulated servo.
#[derive(Clone, Debug)]
pub struct MockServo {
    pub position: i32,
    pub goal: i32,
    pub velocity: u16,
    pub acceleration: u8,
    pub torque: bool,
    pub load: i32,
    pub voltage: i32,
    pub temperature: i32,
    pub current: i32,
    pub mode: i32,
    pub locked: bool,
    pub arrival: Arrival,
}

impl Default for MockServo {
    fn default() -> Self {
        Self {
            position: 2048,
            goal: 2048,
            velocity: 0,
            acceleration: 0,
            torque: false,
            load: 0,
            voltage: 120,
            temperature: 30,
            current: 0,
            mode: 0,
            locked: true,
            arrival: Arrival::Immediate,
        }
    }
}

/// One bus exchange as seen by the simulated bus.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BusCall {
    pub driver: String,
    pub op: MockOp,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MockOp {
    Ping(BusAddress),
    WritePosition {
        address: BusAddress,
        position: i16,
        velocity: u16,
        acceleration: u8,
    },
    WriteBatch {
        addresses: Vec<BusAddress>,
        positions: Vec<i16>,
    },
    ReadField(BusAddress, FieldKind),
    SetTorque(BusAddress, bool),
    UnlockConfig(BusAddress),
    WriteConfig {
        address: BusAddress,
        register: ConfigRegister,
        value: u8,
    },
    LockConfig(BusAddress),
}

#[derive(Default)]
struct MockState {
    servos: BTreeMap<BusAddress, MockServo>,
    journal: Vec<BusCall>,
    failing_fields: HashSet<(BusAddress, FieldKind)>,
    disconnected: HashSet<BusAddress>,
    refuse_config: HashSet<BusAddress>,
}

impl MockState {
    fn servo_mut(&mut self, address: BusAddress) -> Result<&mut MockServo> {
        if self.disconnected.contains(&address) {
            return Err(TransportError::Timeout);
        }
        self.servos
            .get_mut(&address)
            .ok_or(TransportError::NotFound(address))
    }
}

/// A simulated half-duplex bus shared by any number of [`MockDriver`]s.
///
/// Cloning the handle shares the same servos and journal, so one test can hand a driver per
/// protocol family to the code under test and still observe the global order of exchanges.
#[derive(Clone, Default)]
pub struct MockBus {
    state: Arc<Mutex<MockState>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus populated with default servos at the given addresses.
    pub fn with_servos(addresses: impl IntoIterator<Item = u8>) -> Self {
        let bus = Self::new();
        for raw in addresses {
            bus.add_servo(BusAddress(raw), MockServo::default());
        }
        bus
    }

    pub fn list() -> Result<Vec<BusInfo>> {
        Ok(vec![BusInfo {
            name: "mock0".to_string(),
            driver: "mock".to_string(),
        }])
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_servo(&self, address: BusAddress, servo: MockServo) {
        self.state().servos.insert(address, servo);
    }

    pub fn servo(&self, address: BusAddress) -> Option<MockServo> {
        self.state().servos.get(&address).cloned()
    }

    pub fn addresses(&self) -> Vec<BusAddress> {
        self.state().servos.keys().copied().collect()
    }

    pub fn set_arrival(&self, address: BusAddress, arrival: Arrival) {
        if let Some(servo) = self.state().servos.get_mut(&address) {
            servo.arrival = arrival;
        }
    }

    /// Every read of `field` at `address` times out from now on.
    pub fn fail_field(&self, address: BusAddress, field: FieldKind) {
        self.state().failing_fields.insert((address, field));
    }

    /// The servo stays on the bus but no longer answers anything.
    pub fn disconnect(&self, address: BusAddress) {
        self.state().disconnected.insert(address);
    }

    /// Config writes to `address` are answered with an error status.
    pub fn refuse_config_writes(&self, address: BusAddress) {
        self.state().refuse_config.insert(address);
    }

    pub fn journal(&self) -> Vec<BusCall> {
        self.state().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.state().journal.clear();
    }
}

/// One protocol family's view of a [`MockBus`].
pub struct MockDriver {
    label: String,
    bus: MockBus,
    batch_capable: bool,
}

impl MockDriver {
    pub fn new(bus: &MockBus, label: &str, batch_capable: bool) -> Self {
        Self {
            label: label.to_string(),
            bus: bus.clone(),
            batch_capable,
        }
    }

    fn record(&self, state: &mut MockState, op: MockOp) {
        state.journal.push(BusCall {
            driver: self.label.clone(),
            op,
        });
    }
}

impl ServoDriver for MockDriver {
    fn name(&self) -> &str {
        &self.label
    }

    fn ping(&mut self, address: BusAddress) -> Result<BusAddress> {
        let mut state = self.bus.state();
        self.record(&mut state, MockOp::Ping(address));
        state.servo_mut(address).map(|_| address)
    }

    fn write_position(
        &mut self,
        address: BusAddress,
        position: i16,
        velocity: u16,
        acceleration: u8,
    ) -> Result<()> {
        let mut state = self.bus.state();
        self.record(
            &mut state,
            MockOp::WritePosition {
                address,
                position,
                velocity,
                acceleration,
            },
        );
        let servo = state.servo_mut(address)?;
        apply_goal(servo, position, velocity, acceleration);
        Ok(())
    }

    fn write_position_batch(
        &mut self,
        addresses: &[BusAddress],
        positions: &[i16],
        velocities: &[u16],
        accelerations: &[u8],
    ) -> Result<()> {
        if !self.batch_capable {
            return Err(TransportError::Unsupported("synchronized batch write"));
        }
        let n = addresses.len();
        if positions.len() != n || velocities.len() != n || accelerations.len() != n {
            return Err(TransportError::InvalidFrame("batch length mismatch"));
        }
        let mut state = self.bus.state();
        self.record(
            &mut state,
            MockOp::WriteBatch {
                addresses: addresses.to_vec(),
                positions: positions.to_vec(),
            },
        );
        // Broadcast: absent or mute servos are skipped silently, nothing answers.
        for i in 0..n {
            if state.disconnected.contains(&addresses[i]) {
                continue;
            }
            if let Some(servo) = state.servos.get_mut(&addresses[i]) {
                apply_goal(servo, positions[i], velocities[i], accelerations[i]);
            }
        }
        Ok(())
    }

    fn read_field(&mut self, address: BusAddress, field: FieldKind) -> Result<i32> {
        let mut state = self.bus.state();
        self.record(&mut state, MockOp::ReadField(address, field));
        if state.failing_fields.contains(&(address, field)) {
            return Err(TransportError::Timeout);
        }
        let servo = state.servo_mut(address)?;
        let value = match field {
            FieldKind::Position => servo.position,
            FieldKind::Speed => {
                if servo.position == servo.goal {
                    0
                } else {
                    i32::from(servo.velocity)
                }
            }
            FieldKind::Load => servo.load,
            FieldKind::Voltage => servo.voltage,
            FieldKind::Temperature => servo.temperature,
            FieldKind::MovingFlag => i32::from(servo.position != servo.goal),
            FieldKind::Current => servo.current,
            FieldKind::Mode => servo.mode,
        };
        Ok(value)
    }

    fn set_torque(&mut self, address: BusAddress, enabled: bool) -> Result<()> {
        let mut state = self.bus.state();
        self.record(&mut state, MockOp::SetTorque(address, enabled));
        state.servo_mut(address)?.torque = enabled;
        Ok(())
    }

    fn unlock_config(&mut self, address: BusAddress) -> Result<()> {
        let mut state = self.bus.state();
        self.record(&mut state, MockOp::UnlockConfig(address));
        state.servo_mut(address)?.locked = false;
        Ok(())
    }

    fn write_config_byte(
        &mut self,
        address: BusAddress,
        register: ConfigRegister,
        value: u8,
    ) -> Result<()> {
        let mut state = self.bus.state();
        self.record(
            &mut state,
            MockOp::WriteConfig {
                address,
                register,
                value,
            },
        );
        let refused = state.refuse_config.contains(&address);
        let servo = state.servo_mut(address)?;
        if servo.locked || refused {
            return Err(TransportError::Status {
                address,
                status: STATUS_REFUSED,
            });
        }
        if register == ConfigRegister::Id {
            let target = BusAddress(value);
            if target != address {
                if state.servos.contains_key(&target) {
                    return Err(TransportError::Status {
                        address,
                        status: STATUS_REFUSED,
                    });
                }
                if let Some(servo) = state.servos.remove(&address) {
                    state.servos.insert(target, servo);
                }
            }
        }
        Ok(())
    }

    fn lock_config(&mut self, address: BusAddress) -> Result<()> {
        let mut state = self.bus.state();
        self.record(&mut state, MockOp::LockConfig(address));
        state.servo_mut(address)?.locked = true;
        Ok(())
    }
}

fn apply_goal(servo: &mut MockServo, position: i16, velocity: u16, acceleration: u8) {
    servo.goal = i32::from(position);
    servo.velocity = velocity;
    servo.acceleration = acceleration;
    if servo.arrival == Arrival::Immediate {
        servo.position = servo.goal;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_present_and_absent() {
        let bus = MockBus::with_servos([1, 2]);
        let mut drv = MockDriver::new(&bus, "sts", true);
        assert_eq!(drv.ping(BusAddress(1)).unwrap(), BusAddress(1));
        assert!(matches!(
            drv.ping(BusAddress(9)),
            Err(TransportError::NotFound(a)) if a == BusAddress(9)
        ));
        assert_eq!(bus.journal().len(), 2);
    }

    #[test]
    fn test_stalled_servo_keeps_position() {
        let bus = MockBus::with_servos([3]);
        bus.set_arrival(BusAddress(3), Arrival::Stalled);
        let mut drv = MockDriver::new(&bus, "sts", true);
        drv.write_position(BusAddress(3), 100, 500, 10).unwrap();
        assert_eq!(drv.read_field(BusAddress(3), FieldKind::Position).unwrap(), 2048);
        assert_eq!(drv.read_field(BusAddress(3), FieldKind::MovingFlag).unwrap(), 1);
    }

    #[test]
    fn test_batch_refused_without_capability() {
        let bus = MockBus::with_servos([6]);
        let mut drv = MockDriver::new(&bus, "scs", false);
        let err = drv
            .write_position_batch(&[BusAddress(6)], &[10], &[10], &[0])
            .unwrap_err();
        assert!(matches!(err, TransportError::Unsupported(_)));
        assert!(bus.journal().is_empty());
    }

    #[test]
    fn test_id_write_requires_unlock() {
        let bus = MockBus::with_servos([6]);
        let mut drv = MockDriver::new(&bus, "scs", false);
        assert!(drv
            .write_config_byte(BusAddress(6), ConfigRegister::Id, 20)
            .is_err());
        drv.unlock_config(BusAddress(6)).unwrap();
        drv.write_config_byte(BusAddress(6), ConfigRegister::Id, 20)
            .unwrap();
        drv.lock_config(BusAddress(20)).unwrap();
        assert!(bus.servo(BusAddress(6)).is_none());
        assert!(bus.servo(BusAddress(20)).is_some_and(|s| s.locked));
    }

    #[test]
    fn test_disconnected_servo_times_out() {
        let bus = MockBus::with_servos([4]);
        bus.disconnect(BusAddress(4));
        let mut drv = MockDriver::new(&bus, "sts", true);
        assert!(matches!(
            drv.read_field(BusAddress(4), FieldKind::Voltage),
            Err(TransportError::Timeout)
        ));
    }
}
