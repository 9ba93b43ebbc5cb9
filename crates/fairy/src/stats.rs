//! Derived queue statistics for introspection

use serde::{Serialize, Serializer};

/// Counter fields of the `STATISTICS` hash.
pub(crate) const FIELD_TOTAL: &str = "total";
pub(crate) const FIELD_FINISHED: &str = "finished";
pub(crate) const FIELD_PENDING_TIME: &str = "total_pending_time";
pub(crate) const FIELD_PROCESSING_TIME: &str = "total_processing_time";

/// Raw counters read from the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RawCounters {
    pub total: i64,
    pub finished: i64,
    pub total_pending_time: i64,
    pub total_processing_time: i64,
}

/// Work held behind head-of-line failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockedStatistics {
    /// Number of blocked groups.
    pub groups: i64,
    /// Pending survivors across blocked groups, excluding each archived head.
    pub tasks: i64,
}

/// Aggregated view of one queue.
///
/// Averages are `None` until a first task finishes; they serialize as the
/// dashboard sentinel `"-"`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatistics {
    pub total: i64,
    pub finished: i64,
    #[serde(serialize_with = "serialize_average")]
    pub average_pending_time: Option<f64>,
    #[serde(serialize_with = "serialize_average")]
    pub average_processing_time: Option<f64>,
    pub failed_tasks: i64,
    pub blocked: BlockedStatistics,
    pub pending_tasks: i64,
}

fn serialize_average<S: Serializer>(avg: &Option<f64>, s: S) -> Result<S::Ok, S::Error> {
    match avg {
        Some(value) => s.serialize_f64(*value),
        None => s.serialize_str("-"),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl QueueStatistics {
    /// Derive the aggregate view from raw reads.
    ///
    /// `blocked_lengths` holds the length of `QUEUED:g` for every blocked
    /// group; the archived head of each is excluded from `blocked.tasks`.
    pub(crate) fn derive(
        counters: RawCounters,
        failed_tasks: i64,
        blocked_lengths: &[i64],
    ) -> Self {
        let average = |sum: i64| {
            (counters.finished > 0).then(|| round2(sum as f64 / counters.finished as f64))
        };

        let groups = blocked_lengths.len() as i64;
        let blocked_tasks = blocked_lengths.iter().sum::<i64>() - groups;
        let blocked = BlockedStatistics {
            groups,
            tasks: blocked_tasks,
        };

        Self {
            total: counters.total,
            finished: counters.finished,
            average_pending_time: average(counters.total_pending_time),
            average_processing_time: average(counters.total_processing_time),
            failed_tasks,
            blocked,
            pending_tasks: counters.total - counters.finished - blocked_tasks - failed_tasks,
        }
    }
}
