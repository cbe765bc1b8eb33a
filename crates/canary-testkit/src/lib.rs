//! canary-testkit
//!
//! Test doubles for the comparator scenarios:
//! - [`StubReader`]: programmable [`QueryReader`] that records every call
//! - [`CaptureSink`]: shared in-memory diagnostic output
//! - [`eventually`]: poll a condition until it holds or a deadline passes
//!
//! Not for production use.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use canary_reader::{QueryReader, ReaderError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

// ---------------------------------------------------------------------------
// StubReader
// ---------------------------------------------------------------------------

/// In-process backend.
///
/// `query` answers from the stored timestamps that fall inside the requested
/// range. `query_count_over_time` answers with the configured count. Either
/// kind can be held open ([`StubReader::hold_queries`],
/// [`StubReader::hold_count_queries`]) to keep a spot check or rate test in
/// flight.
pub struct StubReader {
    stored: Mutex<Vec<DateTime<Utc>>>,
    count: Mutex<f64>,
    fail: AtomicBool,
    query_ranges: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    count_ranges: Mutex<Vec<String>>,
    query_flight: InFlight,
    count_flight: InFlight,
    query_gate: Gate,
    count_gate: Gate,
}

impl Default for StubReader {
    fn default() -> Self {
        Self::new()
    }
}

impl StubReader {
    pub fn new() -> Self {
        Self {
            stored: Mutex::new(Vec::new()),
            count: Mutex::new(0.0),
            fail: AtomicBool::new(false),
            query_ranges: Mutex::new(Vec::new()),
            count_ranges: Mutex::new(Vec::new()),
            query_flight: InFlight::default(),
            count_flight: InFlight::default(),
            query_gate: Gate::default(),
            count_gate: Gate::default(),
        }
    }

    /// Make the backend "have" these entries.
    pub fn store(&self, entries: impl IntoIterator<Item = DateTime<Utc>>) {
        self.stored.lock().extend(entries);
    }

    pub fn set_count(&self, count: f64) {
        *self.count.lock() = count;
    }

    /// While set, every query returns a transport error.
    pub fn fail_queries(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Range queries started after this call block until
    /// [`StubReader::release_queries`].
    pub fn hold_queries(&self) {
        self.query_gate.hold();
    }

    pub fn release_queries(&self) {
        self.query_gate.release();
    }

    /// Count queries started after this call block until
    /// [`StubReader::release_count_queries`].
    pub fn hold_count_queries(&self) {
        self.count_gate.hold();
    }

    pub fn release_count_queries(&self) {
        self.count_gate.release();
    }

    pub fn query_calls(&self) -> usize {
        self.query_ranges.lock().len()
    }

    pub fn query_ranges(&self) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        self.query_ranges.lock().clone()
    }

    pub fn count_calls(&self) -> usize {
        self.count_ranges.lock().len()
    }

    pub fn count_ranges(&self) -> Vec<String> {
        self.count_ranges.lock().clone()
    }

    /// Highest number of range queries that were ever in flight together.
    pub fn query_max_in_flight(&self) -> usize {
        self.query_flight.max()
    }

    /// Highest number of count queries that were ever in flight together.
    pub fn count_max_in_flight(&self) -> usize {
        self.count_flight.max()
    }

    fn failure(&self) -> Option<ReaderError> {
        self.fail
            .load(Ordering::SeqCst)
            .then(|| ReaderError::Transport("stub backend unavailable".to_string()))
    }
}

#[async_trait::async_trait]
impl QueryReader for StubReader {
    async fn query(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, ReaderError> {
        self.query_ranges.lock().push((start, end));
        self.query_flight.enter();
        self.query_gate.pass().await;
        self.query_flight.leave();
        if let Some(e) = self.failure() {
            return Err(e);
        }
        Ok(self
            .stored
            .lock()
            .iter()
            .copied()
            .filter(|ts| *ts >= start && *ts <= end)
            .collect())
    }

    async fn query_count_over_time(&self, range: &str) -> Result<f64, ReaderError> {
        self.count_ranges.lock().push(range.to_string());
        self.count_flight.enter();
        self.count_gate.pass().await;
        self.count_flight.leave();
        if let Some(e) = self.failure() {
            return Err(e);
        }
        Ok(*self.count.lock())
    }
}

/// Blocks callers while held. Releasing closes the semaphore, which wakes
/// every waiter at once.
#[derive(Default)]
struct Gate(Mutex<Option<Arc<Semaphore>>>);

impl Gate {
    fn hold(&self) {
        *self.0.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    fn release(&self) {
        if let Some(sem) = self.0.lock().take() {
            sem.close();
        }
    }

    async fn pass(&self) {
        let sem = self.0.lock().clone();
        if let Some(sem) = sem {
            // Closed on release; the error is the release signal.
            let _ = sem.acquire().await;
        }
    }
}

#[derive(Default)]
struct InFlight {
    now: AtomicUsize,
    max: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let now = self.now.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.now.fetch_sub(1, Ordering::SeqCst);
    }

    fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// CaptureSink
// ---------------------------------------------------------------------------

/// Cloneable `Write` target; every clone appends to the same buffer.
#[derive(Clone, Default)]
pub struct CaptureSink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock()).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for CaptureSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Polling helper
// ---------------------------------------------------------------------------

/// Poll `cond` every few milliseconds until it holds or `timeout` elapses.
/// Returns the final value of `cond`.
pub async fn eventually(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
