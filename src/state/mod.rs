use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Resumption checkpoint: how far yesterday's scan got, and on which day.
///
/// `last_id` is only meaningful for `date`; the cursor resets to 0 whenever
/// the calendar day changes. The on-disk format is the same JSON object the
/// original deployment used, so an upgrade picks up the existing state file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Highest log row id known to have been consumed.
    pub last_id: u64,

    /// Calendar day the cursor belongs to, as "YYYYMMDD".
    pub date: String,
}

impl Checkpoint {
    /// A fresh checkpoint for the given day.
    pub fn new_for(date: &str) -> Self {
        Self {
            last_id: 0,
            date: date.to_string(),
        }
    }
}

/// Returns the current local calendar day as "YYYYMMDD".
pub fn today() -> String {
    chrono::Local::now().format("%Y%m%d").to_string()
}

/// Loads and persists the checkpoint file.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Read the persisted checkpoint.
    ///
    /// A missing, unreadable, or malformed file yields the default
    /// `{0, today}` rather than failing the run; the worst case is
    /// re-aggregating today's rows.
    pub fn load(&self) -> Checkpoint {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Checkpoint::new_for(&today());
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "checkpoint file unreadable, starting from scratch",
                );
                return Checkpoint::new_for(&today());
            }
        };

        match serde_json::from_str(&data) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "checkpoint file corrupt, starting from scratch",
                );
                Checkpoint::new_for(&today())
            }
        }
    }

    /// Overwrite the persisted checkpoint.
    ///
    /// Callers must only invoke this once the run outcome is safe to commit.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let data = serde_json::to_string(checkpoint).context("serializing checkpoint")?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating state directory {}", parent.display()))?;
        }

        std::fs::write(&self.path, data)
            .with_context(|| format!("writing checkpoint file {}", self.path.display()))
    }
}
