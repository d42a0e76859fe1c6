use crate::types::{
    BatchReport, ConnectivitySnapshot, JointTelemetry, MotionReport, RobotSnapshot, TorqueState,
};
use crate::ArmError;
use serde::{Deserialize, Serialize};
use servo_registry::JointSlot;
use servo_transport::BusAddress;

/// One request from the host, as a JSON object tagged by `"cmd"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum HostCommand {
    /// Probe the given addresses, or every configured slot when none are given.
    Discover {
        #[serde(default)]
        addresses: Option<Vec<BusAddress>>,
    },
    SetJoint {
        slot: JointSlot,
        position: i16,
        #[serde(default)]
        velocity: u16,
        #[serde(default)]
        acceleration: u8,
    },
    SetJoints {
        slots: Vec<JointSlot>,
        positions: Vec<i16>,
        velocities: Vec<u16>,
        accelerations: Vec<u8>,
    },
    GetJointState {
        slot: JointSlot,
    },
    GetRobotState,
    SetTorque {
        slots: Vec<JointSlot>,
        enabled: Vec<bool>,
    },
    Reassign {
        old: BusAddress,
        new: BusAddress,
    },
    Cancel,
}

/// Reply to one [`HostCommand`], tagged by `"status"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HostResponse {
    Connectivity(ConnectivitySnapshot),
    Moved(MotionReport),
    Settled(BatchReport),
    Joint(JointTelemetry),
    Robot(RobotSnapshot),
    Torque(TorqueState),
    Reassigned {
        slot: JointSlot,
        old: BusAddress,
        new: BusAddress,
    },
    CancelRequested,
    Error {
        kind: String,
        message: String,
    },
}

impl HostResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, HostResponse::Error { .. })
    }

    /// Error response for a line that could not be decoded as a command.
    pub fn malformed(err: &serde_json::Error) -> Self {
        HostResponse::Error {
            kind: "malformed_command".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<ArmError> for HostResponse {
    fn from(err: ArmError) -> Self {
        HostResponse::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}
