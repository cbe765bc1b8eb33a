//! Diagnostic lines written to the comparator's output sink.
//!
//! One line per notable event. Timestamps are printed as unix nanoseconds so
//! they can be pasted straight into a backend query.

use std::fmt;
use std::io::Write;
use std::time::Duration;

use canary_config::format_duration;
use canary_reader::ReaderError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::warn;

struct Nanos(DateTime<Utc>);

impl fmt::Display for Nanos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.timestamp_nanos_opt() {
            Some(ns) => write!(f, "{ns}"),
            None => write!(f, "{}", self.0.to_rfc3339()),
        }
    }
}

pub(crate) enum Diagnostic<'a> {
    OutOfOrder {
        entry: DateTime<Utc>,
        earlier: &'a [DateTime<Utc>],
    },
    WebsocketMissing {
        entry: DateTime<Utc>,
        max_wait: Duration,
    },
    ConfirmedMissing {
        entry: DateTime<Utc>,
        max_wait: Duration,
    },
    SpotCheckMissing {
        entry: DateTime<Utc>,
        age: Duration,
    },
    Duplicate(DateTime<Utc>),
    Unexpected(DateTime<Utc>),
    DebugMissing(DateTime<Utc>),
    DebugQueryResult(DateTime<Utc>),
    QueryFailed(&'a ReaderError),
    MetricQueryFailed(&'a ReaderError),
    UnparseableMetricRange { range: &'a str, reason: String },
    InvalidMetricRange,
}

impl fmt::Display for Diagnostic<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::OutOfOrder { entry, earlier } => {
                write!(f, "out of order entry {} was received before entries: [", Nanos(*entry))?;
                for (i, e) in earlier.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", Nanos(*e))?;
                }
                f.write_str("]")
            }
            Diagnostic::WebsocketMissing { entry, max_wait } => write!(
                f,
                "websocket failed to receive entry {} within {:.6} seconds",
                Nanos(*entry),
                max_wait.as_secs_f64()
            ),
            Diagnostic::ConfirmedMissing { entry, max_wait } => write!(
                f,
                "failed to receive entry {} within {:.6} seconds",
                Nanos(*entry),
                max_wait.as_secs_f64()
            ),
            Diagnostic::SpotCheckMissing { entry, age } => write!(
                f,
                "failed to find entry {} in Loki when spot check querying {} after it was written",
                Nanos(*entry),
                format_duration(*age)
            ),
            Diagnostic::Duplicate(ts) => {
                write!(f, "received a duplicate entry for ts {}", Nanos(*ts))
            }
            Diagnostic::Unexpected(ts) => {
                write!(f, "received an unexpected entry with ts {}", Nanos(*ts))
            }
            Diagnostic::DebugMissing(ts) => write!(f, "websocket missing entry: {}", Nanos(*ts)),
            Diagnostic::DebugQueryResult(ts) => {
                write!(f, "confirmation query result: {}", Nanos(*ts))
            }
            Diagnostic::QueryFailed(e) => write!(f, "error querying loki: {e}"),
            Diagnostic::MetricQueryFailed(e) => write!(f, "error running metric query test: {e}"),
            Diagnostic::UnparseableMetricRange { range, reason } => write!(
                f,
                "failed to parse duration string {range:?} for metric-test-range, \
                 metric queries will not be possible: {reason}"
            ),
            Diagnostic::InvalidMetricRange => {
                f.write_str("invalid metric-test-range parameter, metric test query failed")
            }
        }
    }
}

/// Serialized writer for diagnostic lines.
///
/// Shared by the loop and every detached job; the lock only covers a single
/// line so output from concurrent jobs never interleaves mid-line.
pub(crate) struct DiagnosticSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl DiagnosticSink {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn emit(&self, d: &Diagnostic<'_>) {
        let mut out = self.out.lock();
        let res = writeln!(out, "{d}").and_then(|_| out.flush());
        if let Err(e) = res {
            warn!(error = %e, "failed to write diagnostic line");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(ns: i64) -> DateTime<Utc> {
        Utc.timestamp_nanos(ns)
    }

    #[test]
    fn out_of_order_lists_earlier_entries() {
        let earlier = [ts(100), ts(200)];
        let line = Diagnostic::OutOfOrder {
            entry: ts(300),
            earlier: &earlier,
        }
        .to_string();
        assert_eq!(
            line,
            "out of order entry 300 was received before entries: [100 200]"
        );
    }

    #[test]
    fn missing_templates() {
        let ws = Diagnostic::WebsocketMissing {
            entry: ts(42),
            max_wait: Duration::from_secs(5),
        };
        assert_eq!(
            ws.to_string(),
            "websocket failed to receive entry 42 within 5.000000 seconds"
        );
        let spot = Diagnostic::SpotCheckMissing {
            entry: ts(42),
            age: Duration::from_secs(3_660),
        };
        assert_eq!(
            spot.to_string(),
            "failed to find entry 42 in Loki when spot check querying 1h1m0s after it was written"
        );
        let sub_second = Diagnostic::SpotCheckMissing {
            entry: ts(42),
            age: Duration::new(123, 456_789_012),
        };
        assert_eq!(
            sub_second.to_string(),
            "failed to find entry 42 in Loki when spot check querying 2m3.456789012s after it was written"
        );
    }

    #[test]
    fn classification_templates() {
        assert_eq!(
            Diagnostic::Duplicate(ts(7)).to_string(),
            "received a duplicate entry for ts 7"
        );
        assert_eq!(
            Diagnostic::Unexpected(ts(8)).to_string(),
            "received an unexpected entry with ts 8"
        );
    }
}
