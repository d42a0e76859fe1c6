use crate::dispatcher::BusDispatcher;
use crate::status::StatusSink;
use crate::types::{ConnectivitySnapshot, PingOutcome, Probe};
use crate::ArmError;
use servo_transport::BusAddress;
use tracing::{info, warn};

/// Ping each address once, in order.
///
/// A silent or erroring device is recorded as [`PingOutcome::NotFound`] and probing moves on;
/// there is no retry. One status line is emitted per address.
pub fn discover(
    bus: &BusDispatcher,
    addresses: &[BusAddress],
    status: &mut dyn StatusSink,
) -> ConnectivitySnapshot {
    let mut probes = Vec::with_capacity(addresses.len());
    for &requested in addresses {
        let outcome = match bus.ping(requested) {
            Ok(found) => {
                info!(address = %requested, "servo answered");
                status.line(&format!("Servo ID is {found}"));
                PingOutcome::Found(found)
            }
            Err(e) => {
                match &e {
                    ArmError::DeviceNotFound(_) => {
                        warn!(address = %requested, "servo not found")
                    }
                    other => warn!(address = %requested, error = %other, "ping failed"),
                }
                status.line(&format!("Servo ID {requested} not found! Check connection"));
                PingOutcome::NotFound
            }
        };
        probes.push(Probe { requested, outcome });
    }
    ConnectivitySnapshot { probes }
}

/// Probe every configured slot's current address, in slot order.
///
/// Only this sweep updates the online-servo gauge; ad hoc address lists do not describe the arm.
pub fn discover_configured(
    bus: &BusDispatcher,
    status: &mut dyn StatusSink,
) -> ConnectivitySnapshot {
    let addresses = bus.registry().addresses();
    let snapshot = discover(bus, &addresses, status);
    if let Some(m) = bus.metrics() {
        m.servos_online.set(snapshot.online() as i64);
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::MemorySink;
    use servo_registry::{ArmDescriptor, ServoRegistry};
    use servo_transport::{MockBus, MockDriver};

    fn dispatcher(bus: &MockBus) -> BusDispatcher {
        let registry = ServoRegistry::from_descriptor(&ArmDescriptor::default()).unwrap();
        BusDispatcher::new(
            registry,
            Box::new(MockDriver::new(bus, "sts", true)),
            Box::new(MockDriver::new(bus, "scs", false)),
        )
    }

    #[test]
    fn test_output_aligned_with_input() {
        let bus = MockBus::with_servos([1, 2, 6]);
        let d = dispatcher(&bus);
        let mut sink = MemorySink::new();
        let wanted: Vec<BusAddress> = [6, 9, 1, 2, 40].into_iter().map(BusAddress).collect();
        let snap = discover(&d, &wanted, &mut sink);
        assert_eq!(snap.len(), wanted.len());
        for (probe, addr) in snap.probes.iter().zip(&wanted) {
            assert_eq!(probe.requested, *addr);
        }
        assert_eq!(snap.probes[0].outcome, PingOutcome::Found(BusAddress(6)));
        assert_eq!(snap.probes[1].outcome, PingOutcome::NotFound);
        assert_eq!(snap.probes[4].outcome, PingOutcome::NotFound);
        assert_eq!(snap.online(), 3);
        assert_eq!(
            sink.lines(),
            vec![
                "Servo ID is 6",
                "Servo ID 9 not found! Check connection",
                "Servo ID is 1",
                "Servo ID is 2",
                "Servo ID 40 not found! Check connection",
            ]
        );
    }

    #[test]
    fn test_empty_input() {
        let bus = MockBus::new();
        let d = dispatcher(&bus);
        let snap = discover(&d, &[], &mut MemorySink::new());
        assert!(snap.is_empty());
        assert!(bus.journal().is_empty());
    }

    #[test]
    fn test_configured_probes_slot_order() {
        let bus = MockBus::with_servos(1..=7);
        bus.disconnect(BusAddress(4));
        let d = dispatcher(&bus);
        let snap = discover_configured(&d, &mut MemorySink::new());
        let requested: Vec<u8> = snap.probes.iter().map(|p| p.requested.raw()).collect();
        assert_eq!(requested, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(snap.online(), 6);
        assert_eq!(snap.probes[3].outcome, PingOutcome::NotFound);
    }

    #[test]
    fn test_online_gauge_tracks_configured_sweep_only() {
        let hub = servo_registry::MetricsHub::new().unwrap();
        let bus = MockBus::with_servos([1, 2, 3, 40, 41]);
        let d = dispatcher(&bus).with_metrics(hub.bus.clone());
        let mut sink = MemorySink::new();

        let snap = discover_configured(&d, &mut sink);
        assert_eq!(snap.online(), 3);
        assert_eq!(hub.bus.servos_online.get(), 3);

        let extra: Vec<BusAddress> = [40, 41].into_iter().map(BusAddress).collect();
        assert_eq!(discover(&d, &extra, &mut sink).online(), 2);
        assert_eq!(hub.bus.servos_online.get(), 3);
    }
}
