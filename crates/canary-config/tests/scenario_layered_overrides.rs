use std::io::Write;
use std::time::Duration;

use canary_config::{load_layered_yaml, load_layered_yaml_from_strings, CanaryConfig};

/// Scenario: layered documents
///
/// Validates:
/// 1) An empty document yields the built-in defaults.
/// 2) Later documents override leaf values of earlier ones.
/// 3) Keys a later document does not mention keep the base value.
/// 4) Files on disk load the same way as in-memory documents.

#[test]
fn empty_document_yields_defaults() {
    let cfg = load_layered_yaml_from_strings(&[""]).expect("empty doc must load");
    assert_eq!(cfg, CanaryConfig::default());
    assert_eq!(cfg.comparator.max_wait, Duration::from_secs(300));
    assert_eq!(cfg.comparator.metric_test_range, "24h");
    assert!(!cfg.comparator.confirm_async);
}

#[test]
fn later_documents_override_leaves() {
    let base = r#"
comparator:
  max_wait: 5m
  prune_interval: 1m
  buckets: 10
reader:
  address: "http://loki:3100"
"#;
    let overlay = r#"
comparator:
  prune_interval: 10s
  confirm_async: true
"#;

    let cfg = load_layered_yaml_from_strings(&[base, overlay]).expect("layers must load");
    assert_eq!(cfg.comparator.max_wait, Duration::from_secs(300));
    assert_eq!(cfg.comparator.prune_interval, Duration::from_secs(10));
    assert!(cfg.comparator.confirm_async);
    assert_eq!(cfg.comparator.buckets, 10);
    assert_eq!(cfg.reader.address, "http://loki:3100");
}

#[test]
fn compound_durations_are_accepted() {
    let yaml = r#"
comparator:
  spot_check_max: 1h30m
  write_interval: 250ms
"#;
    let cfg = load_layered_yaml_from_strings(&[yaml]).unwrap();
    assert_eq!(cfg.comparator.spot_check_max, Duration::from_secs(5_400));
    assert_eq!(cfg.comparator.write_interval, Duration::from_millis(250));
}

#[test]
fn files_load_in_order() {
    let mut base = tempfile::NamedTempFile::new().unwrap();
    writeln!(base, "comparator:\n  max_wait: 2m\n  buckets: 6").unwrap();
    let mut overlay = tempfile::NamedTempFile::new().unwrap();
    writeln!(overlay, "comparator:\n  buckets: 12").unwrap();

    let base_path = base.path().to_str().unwrap().to_string();
    let overlay_path = overlay.path().to_str().unwrap().to_string();
    let cfg = load_layered_yaml(&[&base_path, &overlay_path]).unwrap();
    assert_eq!(cfg.comparator.max_wait, Duration::from_secs(120));
    assert_eq!(cfg.comparator.buckets, 12);
}

#[test]
fn missing_file_is_an_error() {
    let err = load_layered_yaml(&["/definitely/not/here/canary.yaml"]).unwrap_err();
    assert!(format!("{err:#}").contains("failed to read yaml path"));
}
