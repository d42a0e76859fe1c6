use core::fmt;
use serde::{Deserialize, Serialize};

/// Servo protocol family.
///
/// `Sts` (ST-class) is the family with a synchronized multi-servo write. `Scs` (SC-class)
/// is the fallback for any address that is not on the `Sts` roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolFamily {
    Sts,
    Scs,
}

impl ProtocolFamily {
    /// Family assumed for an address found on neither roster.
    pub const DEFAULT: ProtocolFamily = ProtocolFamily::Scs;

    pub fn supports_batch(self) -> bool {
        matches!(self, ProtocolFamily::Sts)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolFamily::Sts => "sts",
            ProtocolFamily::Scs => "scs",
        }
    }
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical joint index, stable for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JointSlot(pub usize);

impl JointSlot {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for JointSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Static description of one arm: bus settings, family rosters and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmDescriptor {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub families: FamilyRosters,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_name() -> String {
    "sixdof-arm".to_string()
}

impl Default for ArmDescriptor {
    fn default() -> Self {
        Self {
            name: default_name(),
            bus: BusConfig::default(),
            families: FamilyRosters::default(),
            motion: MotionConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub port: String,
    pub baud: u32,
    /// Per-exchange response timeout enforced by the serial driver.
    pub timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud: 1_000_000,
            timeout_ms: 20,
        }
    }
}

/// Startup addresses per family. Slots are numbered `sts` first, then `scs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FamilyRosters {
    pub sts: Vec<u8>,
    pub scs: Vec<u8>,
}

impl Default for FamilyRosters {
    fn default() -> Self {
        Self {
            sts: vec![1, 2, 3, 4, 5],
            scs: vec![6, 7],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Arrival tolerance in raw position units.
    pub tolerance: u16,
    pub poll_interval_ms: u64,
    /// Fixed wait after a multi-joint command.
    pub settle_ms: u64,
    /// Upper bound on a single-joint arrival wait; `None` waits forever.
    pub max_wait_ms: Option<u64>,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            tolerance: 5,
            poll_interval_ms: 1,
            settle_ms: 2000,
            max_wait_ms: Some(10_000),
        }
    }
}

/// What a whole-robot read does when one joint cannot be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPolicy {
    /// The whole snapshot fails.
    #[default]
    FailFast,
    /// Every slot is reported; failed ones carry an error marker.
    Partial,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub snapshot_policy: SnapshotPolicy,
}
