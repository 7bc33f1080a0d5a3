//! Incremental traffic sync for GoEdge access logs.
//!
//! Each invocation performs one bounded pass over today's date-partitioned
//! access-log table, aggregates bytes transferred per user, reports the
//! aggregate to the collector, and advances a persisted cursor. Failed runs
//! leave the cursor untouched so the next scheduled invocation re-aggregates
//! the same window.

pub mod aggregate;
pub mod config;
pub mod extract;
pub mod report;
pub mod source;
pub mod state;
pub mod sync;
