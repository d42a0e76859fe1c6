use arm_controller::{
    ArmController, ArmError, HostCommand, HostResponse, MemorySink, PingOutcome,
};
use servo_registry::{
    parse_descriptor, JointSlot, MetricsHub, ProtocolFamily, SnapshotPolicy,
};
use servo_transport::{Arrival, BusAddress, FieldKind, MockBus, MockDriver, MockOp};

const DESCRIPTOR: &str = r#"
name: bench-arm
families:
  sts: [1, 2, 3, 4, 5]
  scs: [6, 7]
motion:
  tolerance: 5
  poll_interval_ms: 1
  settle_ms: 0
  max_wait_ms: 40
telemetry:
  snapshot_policy: partial
"#;

fn arm(bus: &MockBus, sink: &MemorySink) -> anyhow::Result<ArmController> {
    let desc = parse_descriptor(DESCRIPTOR)?;
    assert_eq!(desc.telemetry.snapshot_policy, SnapshotPolicy::Partial);
    Ok(ArmController::new(
        &desc,
        Box::new(MockDriver::new(bus, "sts", true)),
        Box::new(MockDriver::new(bus, "scs", false)),
        Box::new(sink.clone()),
    )?)
}

#[test]
fn test_reassign_scenario() -> anyhow::Result<()> {
    let bus = MockBus::with_servos(1..=7);
    let sink = MemorySink::new();
    let mut arm = arm(&bus, &sink)?;

    let plan = arm.reassign(BusAddress(6), BusAddress(20))?;
    assert_eq!(plan.family, ProtocolFamily::Scs);

    let d = arm.dispatcher();
    assert_eq!(d.classify(BusAddress(20)), ProtocolFamily::Scs);
    assert_eq!(d.classify(BusAddress(6)), ProtocolFamily::DEFAULT);
    assert!(d.try_classify(BusAddress(6)).is_err());
    assert_eq!(d.entry(JointSlot(5))?.address, BusAddress(20));

    // The renamed servo now answers at its new address through the same slot.
    let t = arm.joint_state(JointSlot(5))?;
    assert_eq!(t.address, BusAddress(20));
    assert_eq!(t.family, ProtocolFamily::Scs);

    // Conflicting move leaves everything as it was.
    let before = arm.dispatcher().registry().addresses();
    let err = arm.reassign(BusAddress(20), BusAddress(7)).unwrap_err();
    assert!(matches!(err, ArmError::AddressConflict(a) if a == BusAddress(7)));
    assert_eq!(arm.dispatcher().registry().addresses(), before);
    Ok(())
}

#[test]
fn test_discovery_then_motion() -> anyhow::Result<()> {
    let bus = MockBus::with_servos([1, 2, 3, 4, 5, 6]);
    let sink = MemorySink::new();
    let hub = MetricsHub::new().map_err(anyhow::Error::msg)?;
    let mut arm = arm(&bus, &sink)?.with_metrics(hub.bus.clone());

    let snap = arm.startup();
    assert_eq!(snap.len(), 7);
    assert_eq!(snap.probes[6].outcome, PingOutcome::NotFound);
    assert_eq!(hub.bus.servos_online.get(), 6);
    assert!(sink.lines().contains(&"6/7 servos online".to_string()));

    bus.clear_journal();
    let report = arm.set_multiple_joints(
        &[JointSlot(0), JointSlot(5), JointSlot(4)],
        &[100, 600, 500],
        &[10, 60, 50],
        &[1, 0, 5],
    )?;
    assert_eq!((report.batched, report.sequential), (2, 1));
    let journal = bus.journal();
    let batches = journal
        .iter()
        .filter(|c| matches!(c.op, MockOp::WriteBatch { .. }))
        .count();
    assert_eq!(batches, 1);
    assert_eq!(
        journal[0].op,
        MockOp::WriteBatch {
            addresses: vec![BusAddress(1), BusAddress(5)],
            positions: vec![100, 500],
        }
    );
    assert_eq!(journal[1].driver, "scs");

    bus.set_arrival(BusAddress(2), Arrival::Stalled);
    let err = arm.set_joint(JointSlot(1), 3000, 0, 0).unwrap_err();
    assert!(matches!(err, ArmError::BusTimeout(a) if a == BusAddress(2)));
    assert!(hub.encode_text().contains("arm_bus_transactions"));
    Ok(())
}

#[test]
fn test_partial_snapshot_over_host_channel() -> anyhow::Result<()> {
    let bus = MockBus::with_servos(1..=7);
    bus.fail_field(BusAddress(3), FieldKind::Temperature);
    let sink = MemorySink::new();
    let mut arm = arm(&bus, &sink)?;

    let cmd: HostCommand = serde_json::from_str(r#"{"cmd":"get_robot_state"}"#)?;
    let resp = arm.execute(cmd);
    let HostResponse::Robot(snap) = &resp else {
        anyhow::bail!("expected robot snapshot, got {resp:?}");
    };
    assert_eq!(snap.len(), 7);
    assert_eq!(snap.failures(), 1);
    assert!(snap.joints[2].telemetry().is_none());

    let line = serde_json::to_string(&resp)?;
    let back: HostResponse = serde_json::from_str(&line)?;
    assert_eq!(back, resp);
    Ok(())
}
