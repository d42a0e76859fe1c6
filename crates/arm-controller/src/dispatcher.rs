use crate::{ArmError, Result};
use servo_registry::{
    BusMetrics, JointSlot, ProtocolFamily, Reassignment, ServoRegistry, SlotEntry,
};
use servo_transport::{BusAddress, FieldKind, ServoDriver, TransportError};
use std::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, warn};

struct FamilyDrivers {
    sts: Box<dyn ServoDriver>,
    scs: Box<dyn ServoDriver>,
}

impl FamilyDrivers {
    fn get(&mut self, family: ProtocolFamily) -> &mut dyn ServoDriver {
        match family {
            ProtocolFamily::Sts => self.sts.as_mut(),
            ProtocolFamily::Scs => self.scs.as_mut(),
        }
    }
}

/// Routes every bus operation to the driver of the address's protocol family.
///
/// Both drivers sit behind one mutex: holding it is holding the bus, so at most one
/// transaction is in flight no matter how many threads call in. The registry has its own
/// read-write lock and is never held while waiting for the bus.
pub struct BusDispatcher {
    drivers: Mutex<FamilyDrivers>,
    registry: RwLock<ServoRegistry>,
    metrics: Option<BusMetrics>,
}

/// Exclusive hold on the bus for a multi-step sequence.
pub struct BusSession<'a> {
    drivers: MutexGuard<'a, FamilyDrivers>,
    metrics: Option<&'a BusMetrics>,
}

impl BusSession<'_> {
    /// Run one transaction on `family`'s driver.
    pub fn run<T>(
        &mut self,
        family: ProtocolFamily,
        address: BusAddress,
        op: &'static str,
        f: impl FnOnce(&mut dyn ServoDriver) -> Result<T, TransportError>,
    ) -> Result<T> {
        let driver = self.drivers.get(family);
        debug!(%address, %family, driver = driver.name(), op, "bus op");
        if let Some(m) = self.metrics {
            m.transactions.inc();
        }
        f(driver).map_err(|e| {
            if let Some(m) = self.metrics {
                m.errors.inc();
            }
            debug!(%address, %family, op, error = %e, "bus op failed");
            ArmError::from_transport(address, e)
        })
    }
}

impl BusDispatcher {
    pub fn new(
        registry: ServoRegistry,
        sts: Box<dyn ServoDriver>,
        scs: Box<dyn ServoDriver>,
    ) -> Self {
        Self {
            drivers: Mutex::new(FamilyDrivers { sts, scs }),
            registry: RwLock::new(registry),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: BusMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn metrics(&self) -> Option<&BusMetrics> {
        self.metrics.as_ref()
    }

    fn read_registry<T>(&self, f: impl FnOnce(&ServoRegistry) -> T) -> T {
        let guard = self
            .registry
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&guard)
    }

    /// Copy of the registry as it is right now.
    pub fn registry(&self) -> ServoRegistry {
        self.read_registry(|r| r.clone())
    }

    pub fn classify(&self, address: BusAddress) -> ProtocolFamily {
        self.read_registry(|r| r.classify(address))
    }

    pub fn try_classify(&self, address: BusAddress) -> Result<ProtocolFamily> {
        self.read_registry(|r| r.try_classify(address))
            .map_err(ArmError::from)
    }

    pub fn entry(&self, slot: JointSlot) -> Result<SlotEntry> {
        self.read_registry(|r| r.entry(slot)).map_err(ArmError::from)
    }

    pub fn slots(&self) -> Vec<SlotEntry> {
        self.read_registry(|r| r.slots().to_vec())
    }

    pub fn plan_reassign(&self, old: BusAddress, new: BusAddress) -> Result<Reassignment> {
        self.read_registry(|r| r.plan_reassign(old, new))
            .map_err(ArmError::from)
    }

    /// Replace a roster entry. Readers observe either the old or the new table.
    pub(crate) fn apply_reassignment(&self, plan: &Reassignment) -> Result<()> {
        let mut guard = self
            .registry
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.apply(plan).map_err(ArmError::from)
    }

    /// Take the bus for a sequence of transactions.
    pub fn session(&self) -> BusSession<'_> {
        let drivers = self.drivers.lock().unwrap_or_else(|poisoned| {
            warn!("bus lock poisoned by an aborted transaction; continuing");
            poisoned.into_inner()
        });
        BusSession {
            drivers,
            metrics: self.metrics.as_ref(),
        }
    }

    /// Run one transaction on the driver that `address` classifies to.
    pub fn dispatch<T>(
        &self,
        address: BusAddress,
        op: &'static str,
        f: impl FnOnce(&mut dyn ServoDriver) -> Result<T, TransportError>,
    ) -> Result<T> {
        let family = self.classify(address);
        self.session().run(family, address, op, f)
    }

    pub fn ping(&self, address: BusAddress) -> Result<BusAddress> {
        self.dispatch(address, "ping", |d| d.ping(address))
    }

    pub fn write_position(
        &self,
        address: BusAddress,
        position: i16,
        velocity: u16,
        acceleration: u8,
    ) -> Result<()> {
        self.dispatch(address, "write_position", |d| {
            d.write_position(address, position, velocity, acceleration)
        })
    }

    /// One synchronized write to several servos of `family`.
    pub fn write_position_batch(
        &self,
        family: ProtocolFamily,
        addresses: &[BusAddress],
        positions: &[i16],
        velocities: &[u16],
        accelerations: &[u8],
    ) -> Result<()> {
        let Some(first) = addresses.first().copied() else {
            return Ok(());
        };
        self.session()
            .run(family, first, "write_position_batch", |d| {
                d.write_position_batch(addresses, positions, velocities, accelerations)
            })
    }

    pub fn read_field(&self, address: BusAddress, field: FieldKind) -> Result<i32> {
        self.dispatch(address, "read_field", |d| d.read_field(address, field))
    }

    pub fn set_torque(&self, address: BusAddress, enabled: bool) -> Result<()> {
        self.dispatch(address, "set_torque", |d| d.set_torque(address, enabled))
    }
}
