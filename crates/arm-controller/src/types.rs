use serde::{Deserialize, Serialize};
use servo_registry::{JointSlot, ProtocolFamily};
use servo_transport::BusAddress;
use time::OffsetDateTime;

/// State of one joint, assembled from eight separate register reads.
///
/// The fields are not sampled at the same instant; `read_at` is taken after the last read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointTelemetry {
    pub slot: JointSlot,
    pub address: BusAddress,
    pub family: ProtocolFamily,
    pub position: i32,
    pub speed: i32,
    pub load: i32,
    pub voltage: i32,
    pub temperature: i32,
    pub moving: bool,
    pub current: i32,
    pub mode: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub read_at: OffsetDateTime,
}

/// One slot of a [`RobotSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum JointReading {
    Ok(JointTelemetry),
    Failed {
        slot: JointSlot,
        address: BusAddress,
        kind: String,
        error: String,
    },
}

impl JointReading {
    pub fn slot(&self) -> JointSlot {
        match self {
            JointReading::Ok(t) => t.slot,
            JointReading::Failed { slot, .. } => *slot,
        }
    }

    pub fn telemetry(&self) -> Option<&JointTelemetry> {
        match self {
            JointReading::Ok(t) => Some(t),
            JointReading::Failed { .. } => None,
        }
    }
}

/// Every configured joint in slot order.
///
/// Built from one joint read after another, so joints are skewed in time relative to each
/// other by the bus round trips in between; there is no bus-wide atomic read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotSnapshot {
    pub joints: Vec<JointReading>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
}

impl RobotSnapshot {
    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.joints.iter().all(|j| j.telemetry().is_some())
    }

    pub fn failures(&self) -> usize {
        self.joints.iter().filter(|j| j.telemetry().is_none()).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "address", rename_all = "snake_case")]
pub enum PingOutcome {
    Found(BusAddress),
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probe {
    pub requested: BusAddress,
    pub outcome: PingOutcome,
}

/// Ping results, index-aligned with the addresses that were probed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivitySnapshot {
    pub probes: Vec<Probe>,
}

impl ConnectivitySnapshot {
    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub fn online(&self) -> usize {
        self.probes
            .iter()
            .filter(|p| matches!(p.outcome, PingOutcome::Found(_)))
            .count()
    }
}

/// Last torque command per slot; `None` until a slot has been commanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorqueState {
    pub enabled: Vec<Option<bool>>,
}

impl TorqueState {
    pub fn unknown(slots: usize) -> Self {
        Self {
            enabled: vec![None; slots],
        }
    }

    pub fn get(&self, slot: JointSlot) -> Option<bool> {
        self.enabled.get(slot.index()).copied().flatten()
    }
}

/// Outcome of a confirmed single-joint move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotionReport {
    pub slot: JointSlot,
    pub address: BusAddress,
    pub target: i16,
    pub final_position: i32,
    pub polls: u32,
    pub elapsed_ms: u64,
}

/// Outcome of an unconfirmed multi-joint move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Joints commanded through the synchronized write.
    pub batched: usize,
    /// Joints commanded one at a time.
    pub sequential: usize,
    pub settle_ms: u64,
}
