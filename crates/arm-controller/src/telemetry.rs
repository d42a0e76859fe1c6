use crate::dispatcher::BusDispatcher;
use crate::types::{JointReading, JointTelemetry, RobotSnapshot};
use crate::{ArmError, Result};
use servo_registry::{JointSlot, SlotEntry, SnapshotPolicy};
use servo_transport::FieldKind;
use time::OffsetDateTime;
use tracing::{debug, warn};

/// Reads joint state field by field and assembles whole-robot snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct TelemetryAggregator {
    policy: SnapshotPolicy,
}

impl TelemetryAggregator {
    pub fn new(policy: SnapshotPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> SnapshotPolicy {
        self.policy
    }

    pub fn read_joint(&self, bus: &BusDispatcher, slot: JointSlot) -> Result<JointTelemetry> {
        let entry = bus.entry(slot)?;
        read_entry(bus, entry)
    }

    /// Read every joint in slot order.
    ///
    /// Under [`SnapshotPolicy::FailFast`] the first failing joint aborts the call with
    /// [`ArmError::PartialSnapshotFailure`]; under [`SnapshotPolicy::Partial`] every slot is
    /// reported and failures are marked in place.
    pub fn read_robot(&self, bus: &BusDispatcher) -> Result<RobotSnapshot> {
        let started_at = OffsetDateTime::now_utc();
        let slots = bus.slots();
        let mut joints = Vec::with_capacity(slots.len());
        for entry in slots {
            match read_entry(bus, entry) {
                Ok(t) => joints.push(JointReading::Ok(t)),
                Err(e) => match self.policy {
                    SnapshotPolicy::FailFast => {
                        warn!(slot = %entry.slot, address = %entry.address, error = %e, "snapshot aborted");
                        return Err(ArmError::PartialSnapshotFailure {
                            slot: entry.slot,
                            source: Box::new(e),
                        });
                    }
                    SnapshotPolicy::Partial => {
                        warn!(slot = %entry.slot, address = %entry.address, error = %e, "joint missing from snapshot");
                        joints.push(JointReading::Failed {
                            slot: entry.slot,
                            address: entry.address,
                            kind: e.kind().to_string(),
                            error: e.to_string(),
                        });
                    }
                },
            }
        }
        Ok(RobotSnapshot {
            joints,
            started_at,
            finished_at: OffsetDateTime::now_utc(),
        })
    }
}

fn read_entry(bus: &BusDispatcher, entry: SlotEntry) -> Result<JointTelemetry> {
    let address = entry.address;
    let mut values = [0i32; 8];
    // Hold the bus so the eight reads of one joint are not interleaved with other traffic.
    let mut session = bus.session();
    for (value, field) in values.iter_mut().zip(FieldKind::ALL) {
        *value = session.run(entry.family, address, "read_field", |d| {
            d.read_field(address, field)
        })?;
    }
    drop(session);
    let [position, speed, load, voltage, temperature, moving, current, mode] = values;
    debug!(slot = %entry.slot, %address, position, "joint read");
    Ok(JointTelemetry {
        slot: entry.slot,
        address,
        family: entry.family,
        position,
        speed,
        load,
        voltage,
        temperature,
        moving: moving != 0,
        current,
        mode,
        read_at: OffsetDateTime::now_utc(),
    })
}
