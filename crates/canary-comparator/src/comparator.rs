//! Reconciliation loop and the entry-tracking state it serializes.
//!
//! # Locks
//!
//! - `entries`: pending + acknowledged buffers.
//! - `spot`: spot-check buffer + its running flag.
//! - `rate_test_running`: the rate tester's running flag.
//!
//! When two are needed (entry submission) the order is `entries` then
//! `spot`. No lock is held across a backend query.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use canary_config::{parse_duration, ComparatorConfig};
use canary_reader::QueryReader;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::buffer::EntryBuffer;
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::metrics::ComparatorMetrics;

pub(crate) struct EntryState {
    pub pending: EntryBuffer,
    pub acked: EntryBuffer,
}

pub(crate) struct SpotState {
    pub sampled: EntryBuffer,
    pub running: bool,
}

/// Everything the loop and the detached jobs share.
pub(crate) struct State {
    pub max_wait: Duration,
    pub spot_check_interval: Duration,
    pub spot_check_max: Duration,
    pub write_interval: Duration,
    pub confirm_async: bool,
    pub metric_test_range: String,
    /// `None` when the range string did not parse; the rate test is then a no-op.
    pub metric_test_window: Option<Duration>,

    pub entries: Mutex<EntryState>,
    pub spot: Mutex<SpotState>,
    pub rate_test_running: Mutex<bool>,

    pub sink: DiagnosticSink,
    pub metrics: Arc<ComparatorMetrics>,
    pub reader: Arc<dyn QueryReader>,
}

pub(crate) fn saturating_sub(ts: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| ts.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub(crate) fn saturating_add(ts: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| ts.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `later - earlier`, or zero when `later` is not after `earlier`.
pub(crate) fn elapsed(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Duration {
    (later - earlier).to_std().unwrap_or_default()
}

impl State {
    pub fn new(
        cfg: &ComparatorConfig,
        out: Box<dyn Write + Send>,
        metrics: Arc<ComparatorMetrics>,
        reader: Arc<dyn QueryReader>,
    ) -> Self {
        let sink = DiagnosticSink::new(out);

        // Parsed once so every rate test does not repeat the work.
        let metric_test_window = match parse_duration(&cfg.metric_test_range) {
            Ok(d) if !cfg.write_interval.is_zero() => Some(d),
            Ok(_) => {
                error!("write interval is zero, metric rate test disabled");
                None
            }
            Err(e) => {
                error!(range = %cfg.metric_test_range, error = %e, "metric rate test disabled");
                sink.emit(&Diagnostic::UnparseableMetricRange {
                    range: &cfg.metric_test_range,
                    reason: e.to_string(),
                });
                None
            }
        };

        Self {
            max_wait: cfg.max_wait,
            spot_check_interval: cfg.spot_check_interval,
            spot_check_max: cfg.spot_check_max,
            write_interval: cfg.write_interval,
            confirm_async: cfg.confirm_async,
            metric_test_range: cfg.metric_test_range.clone(),
            metric_test_window,
            entries: Mutex::new(EntryState {
                pending: EntryBuffer::new(),
                acked: EntryBuffer::new(),
            }),
            spot: Mutex::new(SpotState {
                sampled: EntryBuffer::new(),
                running: false,
            }),
            rate_test_running: Mutex::new(false),
            sink,
            metrics,
            reader,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.entries.lock().pending.len()
    }

    /// Record a written entry.
    pub fn entry_sent(&self, ts: DateTime<Utc>) {
        let mut entries = self.entries.lock();
        entries.pending.push(ts);

        {
            let mut spot = self.spot.lock();
            let due = match spot.sampled.last() {
                None => true,
                Some(last) => (ts - last)
                    .to_std()
                    .map(|gap| gap >= self.spot_check_interval)
                    .unwrap_or(false),
            };
            if due {
                spot.sampled.push(ts);
            }
        }
        drop(entries);

        self.metrics.total_entries.inc();
    }

    /// Match an observed entry against the pending set and classify it.
    pub fn entry_received(&self, ts: DateTime<Utc>, now: DateTime<Utc>) {
        let mut entries = self.entries.lock();

        let matched = entries.pending.take_matching(ts);
        if matched.is_empty() {
            if entries.acked.contains(ts) {
                self.metrics.duplicate.inc();
                warn!(entry = %ts, "duplicate entry");
                self.sink.emit(&Diagnostic::Duplicate(ts));
            } else {
                self.metrics.unexpected.inc();
                warn!(entry = %ts, "unexpected entry");
                self.sink.emit(&Diagnostic::Unexpected(ts));
            }
            return;
        }

        for m in matched {
            if m.is_out_of_order() {
                self.metrics.out_of_order.inc();
                warn!(entry = %ts, still_pending = m.earlier.len(), "out of order entry");
                self.sink.emit(&Diagnostic::OutOfOrder {
                    entry: ts,
                    earlier: &m.earlier,
                });
            }
            self.metrics
                .response_latency
                .observe(elapsed(ts, now).as_secs_f64());
            entries.acked.push(ts);
        }
    }

    /// Evict stale pending entries and age out the acknowledged set.
    ///
    /// Returns the stale entries in send order; they still need confirming
    /// against the backend.
    pub fn prune_entries(&self, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let cutoff = saturating_sub(now, self.max_wait);
        let mut entries = self.entries.lock();

        let stale = entries.pending.evict_older_than(cutoff);
        for ts in &stale {
            self.metrics.websocket_missing.inc();
            self.sink.emit(&Diagnostic::WebsocketMissing {
                entry: *ts,
                max_wait: self.max_wait,
            });
        }
        if !stale.is_empty() {
            warn!(count = stale.len(), "entries not received via primary channel");
        }

        let aged = entries.acked.evict_older_than(cutoff);
        debug!(
            pending = entries.pending.len(),
            acked = entries.acked.len(),
            acked_aged_out = aged.len(),
            "prune complete"
        );
        stale
    }

    async fn on_prune_tick(self: &Arc<Self>, now: DateTime<Utc>) {
        let missing = self.prune_entries(now);
        if !missing.is_empty() {
            if self.confirm_async {
                let state = Arc::clone(self);
                tokio::spawn(async move { state.confirm_missing(missing).await });
            } else {
                self.confirm_missing(missing).await;
            }
        }
        self.dispatch_spot_check(now);
    }
}

/// Handle to a running comparator.
///
/// Construction starts the loop on the current tokio runtime. Dropping the
/// handle without calling [`Comparator::stop`] also ends the loop, but
/// without waiting for it.
pub struct Comparator {
    state: Arc<State>,
    shutdown: Option<oneshot::Sender<()>>,
    done: Option<JoinHandle<()>>,
}

impl Comparator {
    /// Start the reconciliation loop.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// A zero `prune_interval` or `metric_test_interval` disables that timer
    /// (logged at error level); entry tracking keeps running. `canary-config`
    /// rejects both at load time.
    pub fn start(
        cfg: &ComparatorConfig,
        out: Box<dyn Write + Send>,
        metrics: Arc<ComparatorMetrics>,
        sent: mpsc::Receiver<DateTime<Utc>>,
        received: mpsc::Receiver<DateTime<Utc>>,
        reader: Arc<dyn QueryReader>,
    ) -> Self {
        let state = Arc::new(State::new(cfg, out, metrics, reader));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let done = tokio::spawn(run(
            Arc::clone(&state),
            sent,
            received,
            cfg.prune_interval,
            cfg.metric_test_interval,
            shutdown_rx,
        ));

        Self {
            state,
            shutdown: Some(shutdown_tx),
            done: Some(done),
        }
    }

    /// Signal shutdown and wait until the loop has exited.
    ///
    /// Once this returns no further sent or received events are processed.
    /// Detached verification jobs already in flight are not waited on and may
    /// still write diagnostics or update metrics. Calling it again is a no-op.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(done) = self.done.take() {
            if let Err(e) = done.await {
                error!(error = %e, "comparator loop ended abnormally");
            }
        }
    }

    /// Number of entries still waiting to be observed.
    pub fn size(&self) -> usize {
        self.state.pending_len()
    }
}

/// First tick one period after start; late ticks are skipped, not bunched.
///
/// `interval_at` panics on a zero period, so such a timer gets a placeholder
/// period and comes back disabled.
fn loop_timer(period: Duration, name: &'static str) -> (Interval, bool) {
    let enabled = !period.is_zero();
    if !enabled {
        error!(timer = name, "zero period, timer disabled");
    }
    let period = if enabled {
        period
    } else {
        Duration::from_secs(3_600)
    };
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    (timer, enabled)
}

async fn run(
    state: Arc<State>,
    mut sent: mpsc::Receiver<DateTime<Utc>>,
    mut received: mpsc::Receiver<DateTime<Utc>>,
    prune_every: Duration,
    rate_test_every: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let (mut prune, prune_on) = loop_timer(prune_every, "prune");
    let (mut rate_test, rate_test_on) = loop_timer(rate_test_every, "rate_test");

    let mut sent_open = true;
    let mut received_open = true;
    info!(
        prune_every_ms = prune_every.as_millis() as u64,
        rate_test_every_ms = rate_test_every.as_millis() as u64,
        "comparator loop started"
    );

    loop {
        tokio::select! {
            // Also fires if the handle was dropped without `stop`.
            _ = &mut shutdown => break,
            ts = received.recv(), if received_open => match ts {
                Some(ts) => state.entry_received(ts, Utc::now()),
                None => {
                    warn!("received channel closed");
                    received_open = false;
                }
            },
            ts = sent.recv(), if sent_open => match ts {
                Some(ts) => state.entry_sent(ts),
                None => {
                    warn!("sent channel closed");
                    sent_open = false;
                }
            },
            _ = prune.tick(), if prune_on => state.on_prune_tick(Utc::now()).await,
            _ = rate_test.tick(), if rate_test_on => {
                state.dispatch_rate_test();
            }
        }
    }

    info!(pending = state.pending_len(), "comparator loop stopped");
}
