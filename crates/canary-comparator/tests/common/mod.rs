//! Shared wiring for the comparator loop scenarios.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use canary_comparator::{Comparator, ComparatorMetrics};
use canary_config::ComparatorConfig;
use canary_testkit::{CaptureSink, StubReader};
use chrono::{DateTime, Utc};
use prometheus::Registry;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(2);

pub struct Harness {
    pub comparator: Comparator,
    pub sent: mpsc::Sender<DateTime<Utc>>,
    pub received: mpsc::Sender<DateTime<Utc>>,
    pub reader: Arc<StubReader>,
    pub metrics: Arc<ComparatorMetrics>,
    pub sink: CaptureSink,
}

/// Config whose timers never fire during a test unless overridden.
pub fn quiet_config() -> ComparatorConfig {
    ComparatorConfig {
        max_wait: Duration::from_secs(60),
        prune_interval: Duration::from_secs(3_600),
        spot_check_interval: Duration::from_secs(1),
        spot_check_max: Duration::from_secs(600),
        metric_test_interval: Duration::from_secs(3_600),
        metric_test_range: "1m".to_string(),
        write_interval: Duration::from_secs(1),
        buckets: 10,
        confirm_async: false,
    }
}

pub fn start(cfg: ComparatorConfig) -> Harness {
    start_with_reader(cfg, Arc::new(StubReader::new()))
}

pub fn start_with_reader(cfg: ComparatorConfig, reader: Arc<StubReader>) -> Harness {
    let (sent, sent_rx) = mpsc::channel(1_024);
    let (received, received_rx) = mpsc::channel(1_024);
    let sink = CaptureSink::new();
    let metrics = Arc::new(ComparatorMetrics::new(&Registry::new(), cfg.buckets).unwrap());

    let comparator = Comparator::start(
        &cfg,
        Box::new(sink.clone()),
        Arc::clone(&metrics),
        sent_rx,
        received_rx,
        reader.clone(),
    );

    Harness {
        comparator,
        sent,
        received,
        reader,
        metrics,
        sink,
    }
}

pub fn nanos(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap()
}
