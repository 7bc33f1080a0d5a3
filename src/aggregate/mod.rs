use std::collections::HashMap;

use tracing::debug;

use crate::extract;
use crate::source::LogRecord;

/// Per-user accumulated bytes for a single run.
pub type TrafficTotals = HashMap<String, u64>;

/// Fold a fetched batch into per-user totals and the new cursor position.
///
/// The cursor advances past every fetched row, including rows the extractor
/// rejects; a row with an unparseable payload must not be re-fetched on the
/// next run. `after_id` is the starting cursor, returned unchanged when the
/// batch is empty.
pub fn fold(records: &[LogRecord], after_id: u64) -> (TrafficTotals, u64) {
    let mut totals = TrafficTotals::new();
    let mut max_id = after_id;
    let mut rejected = 0usize;

    for record in records {
        max_id = max_id.max(record.id);

        match extract::extract(record) {
            Some(extracted) => {
                *totals.entry(extracted.user_id).or_insert(0) += extracted.bytes;
            }
            None => rejected += 1,
        }
    }

    if rejected > 0 {
        debug!(rejected, total = records.len(), "rows without attributable traffic");
    }

    (totals, max_id)
}
