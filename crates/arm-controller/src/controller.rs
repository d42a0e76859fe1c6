use crate::commands::{HostCommand, HostResponse};
use crate::discovery::{discover, discover_configured};
use crate::dispatcher::BusDispatcher;
use crate::motion::{CancelToken, MotionController};
use crate::readdress::reassign;
use crate::status::StatusSink;
use crate::telemetry::TelemetryAggregator;
use crate::torque::TorqueTracker;
use crate::types::{
    BatchReport, ConnectivitySnapshot, JointTelemetry, MotionReport, RobotSnapshot, TorqueState,
};
use crate::Result;
use servo_registry::{ArmDescriptor, BusMetrics, JointSlot, Reassignment, ServoRegistry};
use servo_transport::{BusAddress, ServoDriver};
use tracing::{debug, info};

/// The arm as the host sees it: one bus, two protocol families, N joint slots.
pub struct ArmController {
    name: String,
    bus: BusDispatcher,
    motion: MotionController,
    telemetry: TelemetryAggregator,
    torque: TorqueTracker,
    status: Box<dyn StatusSink>,
}

impl ArmController {
    /// Build from a descriptor and one driver per family. Nothing is sent on the bus yet.
    pub fn new(
        desc: &ArmDescriptor,
        sts: Box<dyn ServoDriver>,
        scs: Box<dyn ServoDriver>,
        status: Box<dyn StatusSink>,
    ) -> Result<Self> {
        let registry = ServoRegistry::from_descriptor(desc)?;
        let slots = registry.len();
        Ok(Self {
            name: desc.name.clone(),
            bus: BusDispatcher::new(registry, sts, scs),
            motion: MotionController::new(desc.motion.clone()),
            telemetry: TelemetryAggregator::new(desc.telemetry.snapshot_policy),
            torque: TorqueTracker::new(slots),
            status,
        })
    }

    pub fn with_metrics(mut self, metrics: BusMetrics) -> Self {
        self.bus = self.bus.with_metrics(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dispatcher(&self) -> &BusDispatcher {
        &self.bus
    }

    /// Handle that aborts the current single-joint wait from any thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.motion.cancel_token()
    }

    pub fn torque_state(&self) -> &TorqueState {
        self.torque.state()
    }

    /// Banner, one probe per configured slot, the online count, then "ready".
    pub fn startup(&mut self) -> ConnectivitySnapshot {
        self.status
            .line(&format!("{}: servo bus controller starting", self.name));
        let snapshot = discover_configured(&self.bus, self.status.as_mut());
        self.status.line(&format!(
            "{}/{} servos online",
            snapshot.online(),
            snapshot.len()
        ));
        self.status.line("ready");
        info!(online = snapshot.online(), total = snapshot.len(), "startup complete");
        snapshot
    }

    pub fn discover(&mut self, addresses: Option<&[BusAddress]>) -> ConnectivitySnapshot {
        match addresses {
            Some(list) => discover(&self.bus, list, self.status.as_mut()),
            None => discover_configured(&self.bus, self.status.as_mut()),
        }
    }

    pub fn set_joint(
        &self,
        slot: JointSlot,
        position: i16,
        velocity: u16,
        acceleration: u8,
    ) -> Result<MotionReport> {
        self.motion
            .set_joint(&self.bus, slot, position, velocity, acceleration)
    }

    pub fn set_multiple_joints(
        &self,
        slots: &[JointSlot],
        positions: &[i16],
        velocities: &[u16],
        accelerations: &[u8],
    ) -> Result<BatchReport> {
        self.motion
            .set_multiple_joints(&self.bus, slots, positions, velocities, accelerations)
    }

    pub fn joint_state(&self, slot: JointSlot) -> Result<JointTelemetry> {
        self.telemetry.read_joint(&self.bus, slot)
    }

    pub fn robot_state(&self) -> Result<RobotSnapshot> {
        self.telemetry.read_robot(&self.bus)
    }

    pub fn set_torque(&mut self, slots: &[JointSlot], enabled: &[bool]) -> Result<TorqueState> {
        self.torque.apply(&self.bus, slots, enabled)
    }

    pub fn reassign(&mut self, old: BusAddress, new: BusAddress) -> Result<Reassignment> {
        let plan = reassign(&self.bus, old, new)?;
        if !plan.is_noop() {
            self.status
                .line(&format!("Servo ID {old} changed to {new}"));
        }
        Ok(plan)
    }

    /// Run one host command. Failures come back as [`HostResponse::Error`].
    pub fn execute(&mut self, cmd: HostCommand) -> HostResponse {
        debug!(?cmd, "host command");
        let outcome = match cmd {
            HostCommand::Discover { addresses } => {
                Ok(HostResponse::Connectivity(self.discover(addresses.as_deref())))
            }
            HostCommand::SetJoint {
                slot,
                position,
                velocity,
                acceleration,
            } => self
                .set_joint(slot, position, velocity, acceleration)
                .map(HostResponse::Moved),
            HostCommand::SetJoints {
                slots,
                positions,
                velocities,
                accelerations,
            } => self
                .set_multiple_joints(&slots, &positions, &velocities, &accelerations)
                .map(HostResponse::Settled),
            HostCommand::GetJointState { slot } => self.joint_state(slot).map(HostResponse::Joint),
            HostCommand::GetRobotState => self.robot_state().map(HostResponse::Robot),
            HostCommand::SetTorque { slots, enabled } => {
                self.set_torque(&slots, &enabled).map(HostResponse::Torque)
            }
            HostCommand::Reassign { old, new } => {
                self.reassign(old, new)
                    .map(|plan| HostResponse::Reassigned {
                        slot: plan.slot,
                        old: plan.old,
                        new: plan.new,
                    })
            }
            HostCommand::Cancel => {
                self.motion.cancel_token().cancel();
                Ok(HostResponse::CancelRequested)
            }
        };
        outcome.unwrap_or_else(HostResponse::from)
    }
}
