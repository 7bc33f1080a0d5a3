use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::aggregate;
use crate::report::ReportSink;
use crate::source::{self, RecordSource};
use crate::state::{today, Checkpoint, StateStore};

/// Outcome of one completed (non-aborted) run, for the operator log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Rows fetched from the partition table.
    pub fetched: usize,
    /// Distinct users with attributable traffic.
    pub users: usize,
    /// Total bytes reported.
    pub bytes: u64,
    /// Cursor persisted at the end of the run.
    pub last_id: u64,
}

/// Drives one sync run: load state, detect day rollover, fetch, aggregate,
/// report, checkpoint.
///
/// Strictly sequential and single-pass; the external scheduler provides the
/// cadence and must not overlap invocations. An error return means the run
/// aborted before checkpointing, so the next invocation re-fetches and
/// re-aggregates the same window. Re-reporting the same aggregate is the
/// intended retry mechanism.
pub struct SyncRunner<S, R> {
    store: StateStore,
    source: S,
    reporter: R,
    table_prefix: String,
}

impl<S: RecordSource, R: ReportSink> SyncRunner<S, R> {
    pub fn new(store: StateStore, source: S, reporter: R, table_prefix: String) -> Self {
        Self {
            store,
            source,
            reporter,
            table_prefix,
        }
    }

    /// Run one pass for the current calendar day.
    pub async fn run(&self) -> Result<RunSummary> {
        self.run_for_date(&today()).await
    }

    /// Run one pass treating `date` ("YYYYMMDD") as the current day.
    pub async fn run_for_date(&self, date: &str) -> Result<RunSummary> {
        let checkpoint = self.store.load();

        let after_id = if checkpoint.date == date {
            checkpoint.last_id
        } else {
            info!(
                stored_date = %checkpoint.date,
                date,
                "day rollover, resetting cursor",
            );
            0
        };

        let table = source::table_name(&self.table_prefix, date);

        let records = if self
            .source
            .partition_exists(&table)
            .await
            .context("probing partition table")?
        {
            self.source
                .fetch_batch(&table, after_id)
                .await
                .context("fetching log batch")?
        } else {
            // Log rotation has not created today's table yet, or the job
            // ran before the first request of the day.
            info!(table, "partition table not found, no traffic");
            Vec::new()
        };

        let fetched = records.len();
        let (totals, max_id) = aggregate::fold(&records, after_id);
        let users = totals.len();
        let bytes: u64 = totals.values().sum();

        self.reporter.report(&totals).await?;

        let new_checkpoint = Checkpoint {
            last_id: max_id,
            date: date.to_string(),
        };

        if let Err(e) = self.store.save(&new_checkpoint) {
            // The run still counts as complete; the next run re-aggregates
            // and the collector re-absorbs the same totals.
            warn!(error = %e, "failed to persist checkpoint");
        }

        Ok(RunSummary {
            fetched,
            users,
            bytes,
            last_id: max_id,
        })
    }
}
