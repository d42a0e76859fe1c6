use crate::dispatcher::BusDispatcher;
use crate::Result;
use servo_registry::Reassignment;
use servo_transport::{BusAddress, ConfigRegister};
use tracing::{error, info, warn};

/// Move the servo at `old` to bus address `new` and update the registry.
///
/// The whole exchange runs under one hold of the bus: unlock configuration memory at `old`,
/// write the ID register, lock again at `new`, then ping `new`. The roster entry is replaced
/// only after that ping answers. On any failure the registry is left as it was; if the ID
/// write itself fails, the servo is relocked at `old` on a best-effort basis.
pub fn reassign(bus: &BusDispatcher, old: BusAddress, new: BusAddress) -> Result<Reassignment> {
    let mut session = bus.session();
    let plan = bus.plan_reassign(old, new)?;
    if plan.is_noop() {
        info!(address = %old, "reassign to same address; nothing to do");
        return Ok(plan);
    }
    let family = plan.family;

    session.run(family, old, "unlock_config", |d| d.unlock_config(old))?;
    if let Err(e) = session.run(family, old, "write_config", |d| {
        d.write_config_byte(old, ConfigRegister::Id, new.raw())
    }) {
        warn!(%old, %new, error = %e, "id write failed; relocking");
        if let Err(relock) = session.run(family, old, "lock_config", |d| d.lock_config(old)) {
            error!(address = %old, error = %relock, "relock after failed id write failed");
        }
        return Err(e);
    }
    session.run(family, new, "lock_config", |d| d.lock_config(new))?;
    if let Err(e) = session.run(family, new, "ping", |d| d.ping(new)) {
        error!(%old, %new, error = %e, "servo silent at new address; registry unchanged");
        return Err(e);
    }

    // Still holding the bus: no transaction can be routed with the stale roster in between.
    bus.apply_reassignment(&plan)?;
    drop(session);
    if let Some(m) = bus.metrics() {
        m.reassignments.inc();
    }
    info!(slot = %plan.slot, family = %family, %old, %new, "servo readdressed");
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ArmError;
    use servo_registry::{ArmDescriptor, JointSlot, ProtocolFamily, ServoRegistry};
    use servo_transport::{MockBus, MockDriver, MockOp};

    fn dispatcher(bus: &MockBus) -> BusDispatcher {
        let registry = ServoRegistry::from_descriptor(&ArmDescriptor::default()).unwrap();
        BusDispatcher::new(
            registry,
            Box::new(MockDriver::new(bus, "sts", true)),
            Box::new(MockDriver::new(bus, "scs", false)),
        )
    }

    #[test]
    fn test_reassign_sequence() {
        let bus = MockBus::with_servos(1..=7);
        let d = dispatcher(&bus);
        let plan = reassign(&d, BusAddress(6), BusAddress(20)).unwrap();
        assert_eq!(plan.slot, JointSlot(5));
        let ops: Vec<MockOp> = bus.journal().into_iter().map(|c| c.op).collect();
        assert_eq!(
            ops,
            vec![
                MockOp::UnlockConfig(BusAddress(6)),
                MockOp::WriteConfig {
                    address: BusAddress(6),
                    register: ConfigRegister::Id,
                    value: 20
                },
                MockOp::LockConfig(BusAddress(20)),
                MockOp::Ping(BusAddress(20)),
            ]
        );
        assert_eq!(d.classify(BusAddress(20)), ProtocolFamily::Scs);
        assert!(d.try_classify(BusAddress(6)).is_err());
        assert!(d.registry().is_consistent());
    }

    #[test]
    fn test_same_address_touches_nothing() {
        let bus = MockBus::with_servos(1..=7);
        let d = dispatcher(&bus);
        let plan = reassign(&d, BusAddress(2), BusAddress(2)).unwrap();
        assert!(plan.is_noop());
        assert!(bus.journal().is_empty());
        assert_eq!(d.registry().len(), 7);
    }

    #[test]
    fn test_conflict_and_unknown_fail_before_bus() {
        let bus = MockBus::with_servos(1..=7);
        let d = dispatcher(&bus);
        assert!(matches!(
            reassign(&d, BusAddress(6), BusAddress(3)),
            Err(ArmError::AddressConflict(a)) if a == BusAddress(3)
        ));
        assert!(matches!(
            reassign(&d, BusAddress(50), BusAddress(51)),
            Err(ArmError::AddressNotFound(a)) if a == BusAddress(50)
        ));
        assert!(bus.journal().is_empty());
    }

    #[test]
    fn test_refused_write_relocks_and_keeps_registry() {
        let bus = MockBus::with_servos(1..=7);
        bus.refuse_config_writes(BusAddress(4));
        let d = dispatcher(&bus);
        let before = d.registry().addresses();
        let err = reassign(&d, BusAddress(4), BusAddress(40)).unwrap_err();
        assert_eq!(err.kind(), "transport");
        let last = bus.journal().pop().unwrap();
        assert_eq!(last.op, MockOp::LockConfig(BusAddress(4)));
        assert!(bus.servo(BusAddress(4)).unwrap().locked);
        assert_eq!(d.registry().addresses(), before);
    }

    #[test]
    fn test_silent_after_write_keeps_registry() {
        let bus = MockBus::with_servos(1..=7);
        bus.disconnect(BusAddress(30));
        let d = dispatcher(&bus);
        let err = reassign(&d, BusAddress(3), BusAddress(30)).unwrap_err();
        assert!(matches!(err, ArmError::BusTimeout(_)));
        assert_eq!(d.registry().address_of(JointSlot(2)).unwrap(), BusAddress(3));
    }
}
