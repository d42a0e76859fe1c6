use crate::types::ArmDescriptor;
use crate::ServoRegistry;
use anyhow::Context;
use serde_yaml::Value;
use std::fs;
use std::path::Path;

pub fn load_descriptor_file(path: impl AsRef<Path>) -> anyhow::Result<ArmDescriptor> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading descriptor: {}", path.display()))?;
    parse_descriptor(&raw).with_context(|| format!("loading descriptor: {}", path.display()))
}

/// Parse a YAML descriptor and check that its rosters form a valid registry.
pub fn parse_descriptor(raw: &str) -> anyhow::Result<ArmDescriptor> {
    let val: Value = serde_yaml::from_str(raw).context("parsing yaml")?;
    // An empty document means "all defaults".
    let desc: ArmDescriptor = if val.is_null() {
        ArmDescriptor::default()
    } else {
        serde_yaml::from_value(val).context("decoding descriptor")?
    };
    ServoRegistry::from_descriptor(&desc).context("validating rosters")?;
    Ok(desc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SnapshotPolicy;

    #[test]
    fn test_empty_document_is_default() {
        let desc = parse_descriptor("").unwrap();
        assert_eq!(desc.families.sts, vec![1, 2, 3, 4, 5]);
        assert_eq!(desc.families.scs, vec![6, 7]);
        assert_eq!(desc.motion.tolerance, 5);
        assert_eq!(desc.motion.max_wait_ms, Some(10_000));
    }

    #[test]
    fn test_partial_document() {
        let yaml = r#"
name: bench
families:
  sts: [10, 11]
  scs: [12]
motion:
  settle_ms: 500
  max_wait_ms: null
telemetry:
  snapshot_policy: partial
"#;
        let desc = parse_descriptor(yaml).unwrap();
        assert_eq!(desc.name, "bench");
        assert_eq!(desc.families.sts, vec![10, 11]);
        assert_eq!(desc.motion.settle_ms, 500);
        assert_eq!(desc.motion.tolerance, 5);
        assert_eq!(desc.motion.max_wait_ms, None);
        assert_eq!(desc.bus.baud, 1_000_000);
        assert_eq!(desc.telemetry.snapshot_policy, SnapshotPolicy::Partial);
    }

    #[test]
    fn test_overlapping_rosters_rejected() {
        let yaml = "families: { sts: [1, 2], scs: [2] }";
        assert!(parse_descriptor(yaml).is_err());
    }
}
