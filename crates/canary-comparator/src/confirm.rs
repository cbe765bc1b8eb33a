//! Second opinion on entries the primary channel never delivered.
//!
//! A stale batch is checked with one ranged backend query. Entries the
//! backend has were only late on the readback channel; the rest are counted
//! as missing. A failed query drops the batch: nothing is re-queued and
//! nothing is counted for it.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use crate::comparator::{saturating_add, saturating_sub, State};
use crate::diagnostics::Diagnostic;

/// Padding on both ends of every verification query, absorbing clock skew
/// between the writer and the backend.
pub(crate) const QUERY_PADDING: Duration = Duration::from_secs(10);

impl State {
    pub(crate) async fn confirm_missing(&self, missing: Vec<DateTime<Utc>>) {
        let (Some(earliest), Some(latest)) =
            (missing.iter().min().copied(), missing.iter().max().copied())
        else {
            return;
        };
        let start = saturating_sub(earliest, QUERY_PADDING);
        let end = saturating_add(latest, QUERY_PADDING);

        let stored = match self.reader.query(start, end).await {
            Ok(stored) => stored,
            Err(e) => {
                error!(error = %e, batch = missing.len(), "confirmation query failed, batch dropped");
                self.sink.emit(&Diagnostic::QueryFailed(&e));
                return;
            }
        };

        for ts in &missing {
            self.sink.emit(&Diagnostic::DebugMissing(*ts));
        }
        for ts in &stored {
            self.sink.emit(&Diagnostic::DebugQueryResult(*ts));
        }
        debug!(
            missing = ?missing,
            returned = stored.len(),
            %start,
            %end,
            "confirmation query"
        );

        let stored: HashSet<DateTime<Utc>> = stored.into_iter().collect();
        let mut confirmed = 0usize;
        for ts in missing {
            if stored.contains(&ts) {
                continue;
            }
            confirmed += 1;
            self.metrics.missing.inc();
            self.sink.emit(&Diagnostic::ConfirmedMissing {
                entry: ts,
                max_wait: self.max_wait,
            });
        }
        if confirmed > 0 {
            warn!(confirmed, "entries confirmed missing from backend");
        }
    }
}
