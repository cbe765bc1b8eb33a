//! Prometheus metrics for the comparator.
//!
//! | Metric | Type |
//! |--------|------|
//! | `loki_canary_entries_total` | Counter |
//! | `loki_canary_out_of_order_entries_total` | Counter |
//! | `loki_canary_websocket_missing_entries_total` | Counter |
//! | `loki_canary_missing_entries_total` | Counter |
//! | `loki_canary_spot_check_missing_entries_total` | Counter |
//! | `loki_canary_unexpected_entries_total` | Counter |
//! | `loki_canary_duplicate_entries_total` | Counter |
//! | `loki_canary_response_latency` | Histogram (exponential, start 0.5s, factor 2) |
//! | `loki_canary_metric_test_deviation` | Gauge |
//!
//! The process-wide instance comes from [`ComparatorMetrics::global`], which
//! registers with the default registry exactly once no matter how many
//! comparators are built. Tests build private instances with
//! [`ComparatorMetrics::new`] against their own [`Registry`].

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use prometheus::{Gauge, Histogram, HistogramOpts, IntCounter, Opts, Registry};

const NAMESPACE: &str = "loki_canary";
const LATENCY_BUCKET_START: f64 = 0.5;
const LATENCY_BUCKET_FACTOR: f64 = 2.0;

static GLOBAL: Mutex<Option<Arc<ComparatorMetrics>>> = parking_lot::const_mutex(None);

/// Errors that can occur while building the metric set.
#[derive(Debug)]
pub enum MetricsError {
    /// Registration failed (duplicate name, bad bucket layout, ...).
    Registration(prometheus::Error),
}

impl fmt::Display for MetricsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricsError::Registration(e) => write!(f, "failed to register metric: {e}"),
        }
    }
}

impl std::error::Error for MetricsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MetricsError::Registration(e) => Some(e),
        }
    }
}

impl From<prometheus::Error> for MetricsError {
    fn from(e: prometheus::Error) -> Self {
        MetricsError::Registration(e)
    }
}

/// Point-in-time copy of every metric value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub total_entries: u64,
    pub out_of_order: u64,
    pub websocket_missing: u64,
    pub missing: u64,
    pub spot_check_missing: u64,
    pub unexpected: u64,
    pub duplicate: u64,
    pub latency_samples: u64,
    pub metric_test_deviation: f64,
}

/// All comparator metrics. Cheap to share; every handle is internally
/// reference counted and atomic.
#[derive(Clone)]
pub struct ComparatorMetrics {
    pub(crate) total_entries: IntCounter,
    pub(crate) out_of_order: IntCounter,
    pub(crate) websocket_missing: IntCounter,
    pub(crate) missing: IntCounter,
    pub(crate) spot_check_missing: IntCounter,
    pub(crate) unexpected: IntCounter,
    pub(crate) duplicate: IntCounter,
    pub(crate) response_latency: Histogram,
    pub(crate) metric_test_deviation: Gauge,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, MetricsError> {
    let c = IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

impl ComparatorMetrics {
    /// Build the metric set and register it with `registry`.
    ///
    /// `buckets` is the number of exponential latency buckets.
    pub fn new(registry: &Registry, buckets: usize) -> Result<Self, MetricsError> {
        let total_entries = counter(
            registry,
            "entries_total",
            "counts log entries written to the file",
        )?;
        let out_of_order = counter(
            registry,
            "out_of_order_entries_total",
            "counts log entries received with a timestamp more recent than the others in the queue",
        )?;
        let websocket_missing = counter(
            registry,
            "websocket_missing_entries_total",
            "counts log entries not received within the maxWait duration via the websocket connection",
        )?;
        let missing = counter(
            registry,
            "missing_entries_total",
            "counts log entries not received within the maxWait duration via both websocket and direct query",
        )?;
        let spot_check_missing = counter(
            registry,
            "spot_check_missing_entries_total",
            "counts log entries not received when directly queried as part of spot checking",
        )?;
        let unexpected = counter(
            registry,
            "unexpected_entries_total",
            "counts a log entry received which was not expected (e.g. received after reported missing)",
        )?;
        let duplicate = counter(
            registry,
            "duplicate_entries_total",
            "counts a log entry received more than one time",
        )?;

        let response_latency = Histogram::with_opts(
            HistogramOpts::new(
                "response_latency",
                "is how long it takes for log lines to be returned from Loki in seconds.",
            )
            .namespace(NAMESPACE)
            .buckets(prometheus::exponential_buckets(
                LATENCY_BUCKET_START,
                LATENCY_BUCKET_FACTOR,
                buckets,
            )?),
        )?;
        registry.register(Box::new(response_latency.clone()))?;

        let metric_test_deviation = Gauge::with_opts(
            Opts::new(
                "metric_test_deviation",
                "How many counts was the actual query result from the expected based on the canary log write rate",
            )
            .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(metric_test_deviation.clone()))?;

        Ok(Self {
            total_entries,
            out_of_order,
            websocket_missing,
            missing,
            spot_check_missing,
            unexpected,
            duplicate,
            response_latency,
            metric_test_deviation,
        })
    }

    /// Process-wide instance registered with the default registry.
    ///
    /// The first successful call creates and registers the metrics; later
    /// calls return the same handle and ignore `buckets`.
    pub fn global(buckets: usize) -> Result<Arc<Self>, MetricsError> {
        let mut slot = GLOBAL.lock();
        if let Some(existing) = slot.as_ref() {
            return Ok(Arc::clone(existing));
        }
        let created = Arc::new(Self::new(prometheus::default_registry(), buckets)?);
        *slot = Some(Arc::clone(&created));
        Ok(created)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_entries: self.total_entries.get(),
            out_of_order: self.out_of_order.get(),
            websocket_missing: self.websocket_missing.get(),
            missing: self.missing.get(),
            spot_check_missing: self.spot_check_missing.get(),
            unexpected: self.unexpected.get(),
            duplicate: self.duplicate.get(),
            latency_samples: self.response_latency.get_sample_count(),
            metric_test_deviation: self.metric_test_deviation.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_every_family() {
        let registry = Registry::new();
        let m = ComparatorMetrics::new(&registry, 4).unwrap();
        m.total_entries.inc();
        m.response_latency.observe(0.7);
        m.metric_test_deviation.set(-3.0);

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect();
        for expected in [
            "loki_canary_entries_total",
            "loki_canary_out_of_order_entries_total",
            "loki_canary_websocket_missing_entries_total",
            "loki_canary_missing_entries_total",
            "loki_canary_spot_check_missing_entries_total",
            "loki_canary_unexpected_entries_total",
            "loki_canary_duplicate_entries_total",
            "loki_canary_response_latency",
            "loki_canary_metric_test_deviation",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }

        let snap = m.snapshot();
        assert_eq!(snap.total_entries, 1);
        assert_eq!(snap.latency_samples, 1);
        assert_eq!(snap.metric_test_deviation, -3.0);
    }

    #[test]
    fn double_registration_on_one_registry_fails() {
        let registry = Registry::new();
        ComparatorMetrics::new(&registry, 4).unwrap();
        assert!(matches!(
            ComparatorMetrics::new(&registry, 4),
            Err(MetricsError::Registration(_))
        ));
    }

    #[test]
    fn global_is_created_once() {
        let a = ComparatorMetrics::global(10).unwrap();
        let b = ComparatorMetrics::global(3).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn zero_buckets_is_rejected() {
        assert!(ComparatorMetrics::new(&Registry::new(), 0).is_err());
    }
}
