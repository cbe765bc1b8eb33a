//! canary-comparator
//!
//! Reconciliation engine for the log canary:
//! - tracks written entries until the readback channel delivers them
//! - classifies deliveries as in order, out of order, duplicate or unexpected
//! - ages out undelivered entries and confirms them against the backend
//!   before counting them missing
//! - spot checks a sampled subset of entries directly against the backend
//! - compares the backend's entry count with the configured write rate
//!
//! All tracking is in memory and starts empty.

mod buffer;
mod comparator;
mod confirm;
mod diagnostics;
pub mod metrics;
mod spot_check;

pub use comparator::Comparator;
pub use metrics::{ComparatorMetrics, MetricsError, MetricsSnapshot};
