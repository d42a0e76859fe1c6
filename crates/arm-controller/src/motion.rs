//! Position commands and the arrival wait.

use crate::dispatcher::BusDispatcher;
use crate::types::{BatchReport, MotionReport};
use crate::{ArmError, Result};
use servo_registry::{JointSlot, MotionConfig, ProtocolFamily, SlotEntry};
use servo_transport::{BusAddress, FieldKind};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Where a single-joint wait currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionPhase {
    Idle,
    Commanded,
    Polling,
    Reached,
    TimedOut,
    Cancelled,
}

impl MotionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MotionPhase::Reached | MotionPhase::TimedOut | MotionPhase::Cancelled
        )
    }
}

/// Shared flag that aborts an in-progress arrival wait.
///
/// Clones observe the same flag, so a handle can be given to another thread (for example the
/// host command reader) while the controller is blocked in [`MotionController::set_joint`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct ClearOnExit<'a>(&'a CancelToken);

impl Drop for ClearOnExit<'_> {
    fn drop(&mut self) {
        self.0.reset();
    }
}

/// Tracks one wait for a servo to reach its goal.
///
/// Fed one present-position sample per poll. Arrival wins over cancellation and timeout when
/// they coincide, since the servo is already where it was told to go.
#[derive(Debug)]
pub struct ArrivalWait {
    target: i32,
    tolerance: u16,
    max_wait: Option<Duration>,
    started: Option<Instant>,
    phase: MotionPhase,
    polls: u32,
    last_position: Option<i32>,
}

impl ArrivalWait {
    pub fn new(target: i32, tolerance: u16, max_wait: Option<Duration>) -> Self {
        Self {
            target,
            tolerance,
            max_wait,
            started: None,
            phase: MotionPhase::Idle,
            polls: 0,
            last_position: None,
        }
    }

    /// The goal was written; the timeout budget starts now.
    pub fn commanded(&mut self) {
        self.started = Some(Instant::now());
        self.phase = MotionPhase::Commanded;
    }

    pub fn observe(&mut self, present: i32, cancelled: bool) -> MotionPhase {
        if self.phase.is_terminal() {
            return self.phase;
        }
        self.polls += 1;
        self.last_position = Some(present);
        let error = (i64::from(present) - i64::from(self.target)).unsigned_abs();
        self.phase = if error <= u64::from(self.tolerance) {
            MotionPhase::Reached
        } else if cancelled {
            MotionPhase::Cancelled
        } else if self.expired() {
            MotionPhase::TimedOut
        } else {
            MotionPhase::Polling
        };
        self.phase
    }

    fn expired(&self) -> bool {
        match (self.max_wait, self.started) {
            (Some(limit), Some(started)) => started.elapsed() >= limit,
            _ => false,
        }
    }

    pub fn phase(&self) -> MotionPhase {
        self.phase
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn last_position(&self) -> Option<i32> {
        self.last_position
    }

    pub fn elapsed(&self) -> Duration {
        self.started.map(|s| s.elapsed()).unwrap_or_default()
    }
}

/// Single-joint and multi-joint position commands.
pub struct MotionController {
    config: MotionConfig,
    cancel: CancelToken,
}

impl MotionController {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Command one joint and block until it is within tolerance of `target`.
    ///
    /// The first position poll follows the command immediately. With `max_wait_ms` unset the
    /// wait has no upper bound, and a servo that never arrives blocks the caller until the
    /// cancellation token is tripped.
    pub fn set_joint(
        &self,
        bus: &BusDispatcher,
        slot: JointSlot,
        target: i16,
        velocity: u16,
        acceleration: u8,
    ) -> Result<MotionReport> {
        // Cleared on every exit, so a cancel never outlives the motion it stopped.
        let _clear = ClearOnExit(&self.cancel);
        let entry = bus.entry(slot)?;
        let address = entry.address;
        let mut wait = ArrivalWait::new(
            i32::from(target),
            self.config.tolerance,
            self.config.max_wait_ms.map(Duration::from_millis),
        );
        bus.write_position(address, target, velocity, acceleration)?;
        wait.commanded();
        debug!(%slot, %address, family = %entry.family, target, "goal written");

        let poll = Duration::from_millis(self.config.poll_interval_ms);
        loop {
            let present = bus.read_field(address, FieldKind::Position)?;
            match wait.observe(present, self.cancel.is_cancelled()) {
                MotionPhase::Reached => {
                    let elapsed = wait.elapsed();
                    info!(%slot, %address, target, present, polls = wait.polls(), "joint reached target");
                    return Ok(MotionReport {
                        slot,
                        address,
                        target,
                        final_position: present,
                        polls: wait.polls(),
                        elapsed_ms: elapsed.as_millis() as u64,
                    });
                }
                MotionPhase::TimedOut => {
                    warn!(%slot, %address, target, present, polls = wait.polls(), "joint did not reach target in time");
                    return Err(ArmError::BusTimeout(address));
                }
                MotionPhase::Cancelled => {
                    info!(%slot, %address, present, "motion cancelled");
                    return Err(ArmError::Cancelled(address));
                }
                _ => thread::sleep(poll),
            }
        }
    }

    /// Command several joints at once without confirming arrival.
    ///
    /// Joints of the batch-capable family go out in one synchronized write, the rest one write
    /// each, both in the order given. The call then sleeps for the configured settle time.
    pub fn set_multiple_joints(
        &self,
        bus: &BusDispatcher,
        slots: &[JointSlot],
        positions: &[i16],
        velocities: &[u16],
        accelerations: &[u8],
    ) -> Result<BatchReport> {
        let n = slots.len();
        if positions.len() != n || velocities.len() != n || accelerations.len() != n {
            return Err(ArmError::InvalidArgument(format!(
                "length mismatch: {n} slots, {} positions, {} velocities, {} accelerations",
                positions.len(),
                velocities.len(),
                accelerations.len()
            )));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = slots.iter().find(|s| !seen.insert(**s)) {
            return Err(ArmError::InvalidArgument(format!("slot {dup} listed twice")));
        }
        if n == 0 {
            return Ok(BatchReport {
                batched: 0,
                sequential: 0,
                settle_ms: 0,
            });
        }
        // Resolve everything before the first byte goes out.
        let entries = slots
            .iter()
            .map(|s| bus.entry(*s))
            .collect::<Result<Vec<SlotEntry>>>()?;

        let mut batch = BatchGroup::default();
        let mut singles = Vec::new();
        for (i, entry) in entries.iter().enumerate() {
            if entry.family.supports_batch() {
                batch.push(entry.address, positions[i], velocities[i], accelerations[i]);
            } else {
                singles.push(i);
            }
        }

        if !batch.addresses.is_empty() {
            bus.write_position_batch(
                ProtocolFamily::Sts,
                &batch.addresses,
                &batch.positions,
                &batch.velocities,
                &batch.accelerations,
            )?;
        }
        for &i in &singles {
            bus.write_position(
                entries[i].address,
                positions[i],
                velocities[i],
                accelerations[i],
            )?;
        }
        info!(
            batched = batch.addresses.len(),
            sequential = singles.len(),
            settle_ms = self.config.settle_ms,
            "multi-joint command sent"
        );
        thread::sleep(Duration::from_millis(self.config.settle_ms));
        Ok(BatchReport {
            batched: batch.addresses.len(),
            sequential: singles.len(),
            settle_ms: self.config.settle_ms,
        })
    }
}

#[derive(Default)]
struct BatchGroup {
    addresses: Vec<BusAddress>,
    positions: Vec<i16>,
    velocities: Vec<u16>,
    accelerations: Vec<u8>,
}

impl BatchGroup {
    fn push(&mut self, address: BusAddress, position: i16, velocity: u16, acceleration: u8) {
        self.addresses.push(address);
        self.positions.push(position);
        self.velocities.push(velocity);
        self.accelerations.push(acceleration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use servo_registry::{ArmDescriptor, ServoRegistry};
    use servo_transport::{Arrival, MockBus, MockDriver, MockOp};

    fn dispatcher(bus: &MockBus) -> BusDispatcher {
        let registry = ServoRegistry::from_descriptor(&ArmDescriptor::default()).unwrap();
        BusDispatcher::new(
            registry,
            Box::new(MockDriver::new(bus, "sts", true)),
            Box::new(MockDriver::new(bus, "scs", false)),
        )
    }

    fn fast_config(max_wait_ms: Option<u64>) -> MotionConfig {
        MotionConfig {
            tolerance: 5,
            poll_interval_ms: 1,
            settle_ms: 0,
            max_wait_ms,
        }
    }

    #[test]
    fn test_wait_phases() {
        let mut wait = ArrivalWait::new(1000, 5, None);
        assert_eq!(wait.phase(), MotionPhase::Idle);
        wait.commanded();
        assert_eq!(wait.phase(), MotionPhase::Commanded);
        assert_eq!(wait.observe(900, false), MotionPhase::Polling);
        assert_eq!(wait.observe(996, false), MotionPhase::Reached);
        // Terminal phases stick.
        assert_eq!(wait.observe(0, true), MotionPhase::Reached);
        assert_eq!(wait.polls(), 2);
    }

    #[test]
    fn test_wait_timeout_and_cancel() {
        let mut wait = ArrivalWait::new(1000, 5, Some(Duration::ZERO));
        wait.commanded();
        assert_eq!(wait.observe(0, false), MotionPhase::TimedOut);

        let mut wait = ArrivalWait::new(1000, 5, None);
        wait.commanded();
        assert_eq!(wait.observe(0, true), MotionPhase::Cancelled);

        let mut wait = ArrivalWait::new(1000, 5, Some(Duration::ZERO));
        wait.commanded();
        assert_eq!(wait.observe(1004, true), MotionPhase::Reached);
    }

    #[test]
    fn test_immediate_arrival_polls_once() {
        let bus = MockBus::with_servos(1..=7);
        let d = dispatcher(&bus);
        let motion = MotionController::new(fast_config(Some(1000)));
        let report = motion.set_joint(&d, JointSlot(2), 1500, 300, 20).unwrap();
        assert_eq!(report.polls, 1);
        assert_eq!(report.address, BusAddress(3));
        assert_eq!(report.final_position, 1500);
        let journal = bus.journal();
        assert_eq!(journal.len(), 2);
        assert_eq!(
            journal[0].op,
            MockOp::WritePosition {
                address: BusAddress(3),
                position: 1500,
                velocity: 300,
                acceleration: 20
            }
        );
        assert_eq!(journal[1].op, MockOp::ReadField(BusAddress(3), FieldKind::Position));
    }

    #[test]
    fn test_stalled_servo_times_out() {
        let bus = MockBus::with_servos(1..=7);
        bus.set_arrival(BusAddress(6), Arrival::Stalled);
        let d = dispatcher(&bus);
        let motion = MotionController::new(fast_config(Some(30)));
        let started = Instant::now();
        let err = motion.set_joint(&d, JointSlot(5), 100, 0, 0).unwrap_err();
        assert!(matches!(err, ArmError::BusTimeout(a) if a == BusAddress(6)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_cancel_from_other_thread() {
        let bus = MockBus::with_servos(1..=7);
        bus.set_arrival(BusAddress(1), Arrival::Stalled);
        let d = dispatcher(&bus);
        let motion = MotionController::new(fast_config(None));
        let token = motion.cancel_token();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            token.cancel();
        });
        let err = motion.set_joint(&d, JointSlot(0), 100, 0, 0).unwrap_err();
        canceller.join().unwrap();
        assert!(matches!(err, ArmError::Cancelled(a) if a == BusAddress(1)));
    }

    #[test]
    fn test_cancel_sent_before_wait_is_honored() {
        let bus = MockBus::with_servos(1..=7);
        bus.set_arrival(BusAddress(1), Arrival::Stalled);
        let d = dispatcher(&bus);
        let motion = MotionController::new(fast_config(None));
        let token = motion.cancel_token();
        token.cancel();
        let err = motion.set_joint(&d, JointSlot(0), 100, 0, 0).unwrap_err();
        assert!(matches!(err, ArmError::Cancelled(a) if a == BusAddress(1)));
        assert!(!token.is_cancelled());

        // The consumed cancel does not leak into the next motion.
        assert!(motion.set_joint(&d, JointSlot(1), 10, 0, 0).is_ok());
    }

    #[test]
    fn test_token_cleared_after_failed_motion() {
        let bus = MockBus::with_servos(2..=7);
        let d = dispatcher(&bus);
        let motion = MotionController::new(fast_config(Some(1000)));
        let token = motion.cancel_token();
        token.cancel();
        assert!(motion.set_joint(&d, JointSlot(0), 10, 0, 0).is_err());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_batch_then_singles_in_order() {
        let bus = MockBus::with_servos(1..=7);
        let d = dispatcher(&bus);
        let motion = MotionController::new(fast_config(Some(1000)));
        let slots = [6, 3, 5, 0].map(JointSlot);
        let report = motion
            .set_multiple_joints(&d, &slots, &[70, 40, 60, 10], &[1, 2, 3, 4], &[0, 0, 0, 0])
            .unwrap();
        assert_eq!(report.batched, 2);
        assert_eq!(report.sequential, 2);
        let journal = bus.journal();
        assert_eq!(journal.len(), 3);
        assert_eq!(journal[0].driver, "sts");
        assert_eq!(
            journal[0].op,
            MockOp::WriteBatch {
                addresses: vec![BusAddress(4), BusAddress(1)],
                positions: vec![40, 10],
            }
        );
        assert!(matches!(
            journal[1].op,
            MockOp::WritePosition { address, position: 70, .. } if address == BusAddress(7)
        ));
        assert!(matches!(
            journal[2].op,
            MockOp::WritePosition { address, position: 60, .. } if address == BusAddress(6)
        ));
    }

    #[test]
    fn test_scs_only_skips_batch() {
        let bus = MockBus::with_servos(1..=7);
        let d = dispatcher(&bus);
        let motion = MotionController::new(fast_config(Some(1000)));
        motion
            .set_multiple_joints(&d, &[JointSlot(5)], &[5], &[0], &[0])
            .unwrap();
        let journal = bus.journal();
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].driver, "scs");
    }

    #[test]
    fn test_rejects_bad_arguments() {
        let bus = MockBus::with_servos(1..=7);
        let d = dispatcher(&bus);
        let motion = MotionController::new(fast_config(Some(1000)));
        let err = motion
            .set_multiple_joints(&d, &[JointSlot(0), JointSlot(1)], &[1], &[0, 0], &[0, 0])
            .unwrap_err();
        assert!(matches!(err, ArmError::InvalidArgument(_)));
        let err = motion
            .set_multiple_joints(&d, &[JointSlot(0), JointSlot(0)], &[1, 2], &[0, 0], &[0, 0])
            .unwrap_err();
        assert!(matches!(err, ArmError::InvalidArgument(_)));
        let err = motion
            .set_multiple_joints(&d, &[JointSlot(0), JointSlot(9)], &[1, 2], &[0, 0], &[0, 0])
            .unwrap_err();
        assert!(matches!(err, ArmError::UnknownSlot(_)));
        assert!(bus.journal().is_empty());
    }
}
