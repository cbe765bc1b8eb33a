//! canary-config
//!
//! Layered YAML configuration for the log canary verifier.
//!
//! Documents are merged in order (earlier docs are the base, later docs
//! override leaf values), then deserialized into [`CanaryConfig`] and
//! validated. Every field has a default, so an empty document is a valid
//! configuration.

pub mod duration;

use std::fs;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use duration::{format_duration, parse_duration, DurationError};

/// Settings for the reconciliation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComparatorConfig {
    /// How long an entry may stay pending before it is presumed missing.
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,
    /// Cadence of the prune tick (also dispatches the spot checker).
    #[serde(with = "humantime_serde")]
    pub prune_interval: Duration,
    /// Minimum spacing between two sampled spot-check entries.
    #[serde(with = "humantime_serde")]
    pub spot_check_interval: Duration,
    /// Sampled entries older than this are dropped without verification.
    #[serde(with = "humantime_serde")]
    pub spot_check_max: Duration,
    #[serde(with = "humantime_serde")]
    pub metric_test_interval: Duration,
    /// Window handed verbatim to the backend's count query.
    ///
    /// Kept as a string: an unparseable value disables the rate test at
    /// runtime instead of failing the load.
    pub metric_test_range: String,
    /// Expected interval between two written entries.
    #[serde(with = "humantime_serde")]
    pub write_interval: Duration,
    /// Number of exponential latency histogram buckets.
    pub buckets: usize,
    /// Confirm missing entries on a detached task instead of inside the loop.
    pub confirm_async: bool,
}

impl Default for ComparatorConfig {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(5 * 60),
            prune_interval: Duration::from_secs(60),
            spot_check_interval: Duration::from_secs(15 * 60),
            spot_check_max: Duration::from_secs(4 * 3_600),
            metric_test_interval: Duration::from_secs(3_600),
            metric_test_range: "24h".to_string(),
            write_interval: Duration::from_secs(1),
            buckets: 10,
            confirm_async: false,
        }
    }
}

/// Settings for the backend query client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReaderConfig {
    /// Base URL of the backend, e.g. `http://localhost:3100`.
    pub address: String,
    /// Stream selector identifying the canary's own entries.
    pub labels: String,
    /// Maximum entries requested per range query.
    pub query_limit: u32,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            address: "http://localhost:3100".to_string(),
            labels: r#"{stream="stdout",name="loki-canary"}"#.to_string(),
            query_limit: 1_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CanaryConfig {
    pub comparator: ComparatorConfig,
    pub reader: ReaderConfig,
}

impl CanaryConfig {
    /// Reject values the engine cannot run with.
    ///
    /// Zero-length tick intervals would spin the loop; a zero write interval
    /// makes the expected rate undefined.
    pub fn validate(&self) -> Result<()> {
        let c = &self.comparator;
        let nonzero = [
            ("comparator.max_wait", c.max_wait),
            ("comparator.prune_interval", c.prune_interval),
            ("comparator.metric_test_interval", c.metric_test_interval),
            ("comparator.write_interval", c.write_interval),
        ];
        for (key, value) in nonzero {
            if value.is_zero() {
                bail!("CONFIG_INVALID: {key} must be greater than zero");
            }
        }
        if c.buckets == 0 {
            bail!("CONFIG_INVALID: comparator.buckets must be at least 1");
        }
        if c.spot_check_max < c.spot_check_interval {
            bail!(
                "CONFIG_INVALID: comparator.spot_check_max ({}) is shorter than \
                 comparator.spot_check_interval ({}); no sampled entry would survive",
                format_duration(c.spot_check_max),
                format_duration(c.spot_check_interval)
            );
        }
        if self.reader.address.trim().is_empty() {
            bail!("CONFIG_INVALID: reader.address must not be empty");
        }
        if self.reader.query_limit == 0 {
            bail!("CONFIG_INVALID: reader.query_limit must be at least 1");
        }
        Ok(())
    }
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<CanaryConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }

    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<CanaryConfig> {
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        // An empty document parses as null; it contributes nothing.
        if v_yaml.is_null() {
            continue;
        }
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        merged = deep_merge(merged, v_json);
    }

    let cfg: CanaryConfig =
        serde_json::from_value(merged).context("config does not match canary schema")?;
    cfg.validate()?;
    Ok(cfg)
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}
