//! arm-controller: the servo-bus core of a six-axis arm
//!
//! Everything that talks to servos goes through a [`BusDispatcher`], which picks the protocol
//! driver for an address from the registry and serializes bus access. On top of it sit
//! discovery, motion (confirmed single-joint moves and synchronized multi-joint moves),
//! telemetry, torque control and runtime re-addressing. [`ArmController`] bundles these behind
//! the JSON host command surface.

mod error;
pub use error::{ArmError, Result};

mod types;
pub use types::{
    BatchReport, ConnectivitySnapshot, JointReading, JointTelemetry, MotionReport, PingOutcome,
    Probe, RobotSnapshot, TorqueState,
};

mod dispatcher;
pub use dispatcher::{BusDispatcher, BusSession};

mod status;
pub use status::{ConsoleSink, LogSink, MemorySink, StatusSink};

mod discovery;
pub use discovery::{discover, discover_configured};

mod motion;
pub use motion::{ArrivalWait, CancelToken, MotionController, MotionPhase};

mod telemetry;
pub use telemetry::TelemetryAggregator;

mod torque;
pub use torque::TorqueTracker;

mod readdress;
pub use readdress::reassign;

mod commands;
pub use commands::{HostCommand, HostResponse};

mod controller;
pub use controller::ArmController;
