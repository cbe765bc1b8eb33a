//! Spot checker: independent backend verification of sampled entries.
//!
//! Sampled entries are re-queried on every run until they age past
//! `spot_check_max`, whether or not the readback channel delivered them.
//! Only one run is ever in flight; a tick that finds one running is skipped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::comparator::{elapsed, saturating_add, saturating_sub, State};
use crate::confirm::QUERY_PADDING;
use crate::diagnostics::Diagnostic;

/// Clears the spot-check running flag when the run ends, however it ends.
pub(crate) struct SpotCheckRun(Arc<State>);

impl Drop for SpotCheckRun {
    fn drop(&mut self) {
        self.0.spot.lock().running = false;
    }
}

impl State {
    /// Start a detached spot-check run unless one is already in flight.
    ///
    /// Returns `true` if a run was started.
    pub(crate) fn dispatch_spot_check(self: &Arc<Self>, now: DateTime<Utc>) -> bool {
        {
            let mut spot = self.spot.lock();
            if spot.running {
                debug!("spot check still running, tick skipped");
                return false;
            }
            spot.running = true;
        }

        let run = SpotCheckRun(Arc::clone(self));
        tokio::spawn(async move {
            run.0.spot_check_entries(now).await;
            drop(run);
        });
        true
    }

    pub(crate) async fn spot_check_entries(&self, now: DateTime<Utc>) {
        let snapshot = {
            let mut spot = self.spot.lock();
            let expired = spot
                .sampled
                .evict_older_than(saturating_sub(now, self.spot_check_max));
            if !expired.is_empty() {
                debug!(expired = expired.len(), "spot check entries aged out");
            }
            if spot.sampled.is_empty() {
                return;
            }
            spot.sampled.snapshot()
        };

        let mut missing = 0usize;
        for ts in snapshot {
            let start = saturating_sub(ts, QUERY_PADDING);
            let end = saturating_add(ts, QUERY_PADDING);
            let stored = match self.reader.query(start, end).await {
                Ok(stored) => stored,
                Err(e) => {
                    error!(error = %e, entry = %ts, "spot check query failed, run aborted");
                    self.sink.emit(&Diagnostic::QueryFailed(&e));
                    return;
                }
            };

            if !stored.contains(&ts) {
                missing += 1;
                self.metrics.spot_check_missing.inc();
                self.sink.emit(&Diagnostic::SpotCheckMissing {
                    entry: ts,
                    age: elapsed(ts, now),
                });
            }
        }
        if missing > 0 {
            warn!(missing, "spot check found entries missing from backend");
        }
    }
}
