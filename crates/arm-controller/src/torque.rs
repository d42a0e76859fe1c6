use crate::dispatcher::BusDispatcher;
use crate::types::TorqueState;
use crate::{ArmError, Result};
use servo_registry::JointSlot;
use tracing::info;

/// Holds the last torque state the controller committed.
#[derive(Debug, Clone)]
pub struct TorqueTracker {
    state: TorqueState,
}

impl TorqueTracker {
    pub fn new(slots: usize) -> Self {
        Self {
            state: TorqueState::unknown(slots),
        }
    }

    pub fn state(&self) -> &TorqueState {
        &self.state
    }

    /// Enable or disable torque on each listed slot, in order.
    ///
    /// The new state is built aside and only replaces the cached one once every write has
    /// succeeded. A failure part way leaves the servos already written in their new state
    /// while the cache still shows the previous one.
    pub fn apply(
        &mut self,
        bus: &BusDispatcher,
        slots: &[JointSlot],
        enabled: &[bool],
    ) -> Result<TorqueState> {
        if slots.len() != enabled.len() {
            return Err(ArmError::InvalidArgument(format!(
                "length mismatch: {} slots, {} flags",
                slots.len(),
                enabled.len()
            )));
        }
        let entries = slots
            .iter()
            .map(|s| bus.entry(*s))
            .collect::<Result<Vec<_>>>()?;
        let mut next = self.state.clone();
        let width = bus.slots().len();
        if next.enabled.len() < width {
            next.enabled.resize(width, None);
        }
        for (entry, &on) in entries.iter().zip(enabled) {
            bus.set_torque(entry.address, on)?;
            if let Some(flag) = next.enabled.get_mut(entry.slot.index()) {
                *flag = Some(on);
            }
        }
        info!(count = slots.len(), "torque updated");
        self.state = next.clone();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use servo_registry::{ArmDescriptor, ServoRegistry};
    use servo_transport::{BusAddress, MockBus, MockDriver};

    fn dispatcher(bus: &MockBus) -> BusDispatcher {
        let registry = ServoRegistry::from_descriptor(&ArmDescriptor::default()).unwrap();
        BusDispatcher::new(
            registry,
            Box::new(MockDriver::new(bus, "sts", true)),
            Box::new(MockDriver::new(bus, "scs", false)),
        )
    }

    #[test]
    fn test_torque_commits_on_success() {
        let bus = MockBus::with_servos(1..=7);
        let d = dispatcher(&bus);
        let mut tracker = TorqueTracker::new(7);
        let state = tracker
            .apply(&d, &[JointSlot(0), JointSlot(6)], &[true, true])
            .unwrap();
        assert_eq!(state.get(JointSlot(0)), Some(true));
        assert_eq!(state.get(JointSlot(6)), Some(true));
        assert_eq!(state.get(JointSlot(3)), None);
        assert!(bus.servo(BusAddress(7)).unwrap().torque);
    }

    #[test]
    fn test_torque_failure_keeps_previous_state() {
        let bus = MockBus::with_servos(1..=7);
        let d = dispatcher(&bus);
        let mut tracker = TorqueTracker::new(7);
        tracker.apply(&d, &[JointSlot(1)], &[true]).unwrap();
        bus.disconnect(BusAddress(3));
        let err = tracker
            .apply(&d, &[JointSlot(1), JointSlot(2)], &[false, false])
            .unwrap_err();
        assert!(matches!(err, ArmError::BusTimeout(_)));
        assert_eq!(tracker.state().get(JointSlot(1)), Some(true));
        assert_eq!(tracker.state().get(JointSlot(2)), None);
    }

    #[test]
    fn test_torque_length_mismatch() {
        let bus = MockBus::with_servos(1..=7);
        let d = dispatcher(&bus);
        let mut tracker = TorqueTracker::new(7);
        assert!(matches!(
            tracker.apply(&d, &[JointSlot(1)], &[]),
            Err(ArmError::InvalidArgument(_))
        ));
        assert!(bus.journal().is_empty());
    }
}
