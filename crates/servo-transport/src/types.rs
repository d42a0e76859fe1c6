use core::fmt;
use serde::{Deserialize, Serialize};

/// Address reserved by both servo families for broadcast packets (no status reply).
pub const BROADCAST_ADDRESS: BusAddress = BusAddress(0xFE);

/// Protocol-level address of one servo on the shared bus.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusAddress(pub u8);

impl BusAddress {
    pub fn new(raw: u8) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u8 {
        self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == BROADCAST_ADDRESS
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for BusAddress {
    fn from(raw: u8) -> Self {
        Self(raw)
    }
}

/// One telemetry field readable from a servo.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Position,
    Speed,
    Load,
    Voltage,
    Temperature,
    MovingFlag,
    Current,
    Mode,
}

impl FieldKind {
    /// Read order used when a full joint record is assembled.
    pub const ALL: [FieldKind; 8] = [
        FieldKind::Position,
        FieldKind::Speed,
        FieldKind::Load,
        FieldKind::Voltage,
        FieldKind::Temperature,
        FieldKind::MovingFlag,
        FieldKind::Current,
        FieldKind::Mode,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Position => "position",
            FieldKind::Speed => "speed",
            FieldKind::Load => "load",
            FieldKind::Voltage => "voltage",
            FieldKind::Temperature => "temperature",
            FieldKind::MovingFlag => "moving",
            FieldKind::Current => "current",
            FieldKind::Mode => "mode",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration-memory (EEPROM) register targeted by a config write.
///
/// `Id` is mapped by each driver onto its own register table; `Raw` is passed through.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConfigRegister {
    Id,
    Raw(u8),
}

#[derive(Clone, Debug)]
pub struct BusInfo {
    pub name: String,
    pub driver: String,
}
