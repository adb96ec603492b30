//! Crash-consistent persistence of in-flight monitor state.
//!
//! Every checkpoint period the open windows and rate-limit state are
//! serialized to `window_state.json` through a temp file, fsync, and
//! atomic rename. A crash mid-write can never leave a half-written file;
//! an unparseable file on load is treated as "no checkpoint".
//!
//! On startup the state is either resumed (checkpoint younger than the
//! grace window) or every stored open window is synthesized into an
//! interrupted close row dated at the checkpoint's `last_updated`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use arb_common::OpportunityWindow;

/// Checkpoint file name inside the log directory.
pub const WINDOW_STATE_FILE: &str = "window_state.json";

/// Errors while writing a checkpoint. Never fatal; the monitor keeps
/// running and retries on the next period.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Rate-limit fields that survive a restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    /// Current polling interval in seconds.
    pub current_interval: f64,
    /// 429 count within the trailing window.
    pub recent_429_count: u32,
    /// Wall-clock time of the last 429, if any.
    #[serde(default)]
    pub last_429_time: Option<DateTime<Utc>>,
}

/// On-disk checkpoint payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    pub last_updated: DateTime<Utc>,
    pub rate_limit: RateLimitSnapshot,
    pub active_windows: Vec<OpportunityWindow>,
}

/// What startup found on disk.
#[derive(Debug)]
pub enum RestoreOutcome {
    /// No file, or a file that would not parse.
    NoCheckpoint,
    /// Fresh checkpoint: resume these windows and the rate-limit state.
    Resumed {
        windows: Vec<OpportunityWindow>,
        rate_limit: RateLimitSnapshot,
    },
    /// Stale checkpoint: close these windows as interrupted at
    /// `last_updated`.
    Expired {
        windows: Vec<OpportunityWindow>,
        last_updated: DateTime<Utc>,
    },
}

/// Periodically persists monitor state.
pub struct Checkpointer {
    path: PathBuf,
    interval: Duration,
    last_written: Option<Instant>,
}

impl Checkpointer {
    pub fn new(log_dir: &Path, interval: Duration) -> Self {
        Self {
            path: log_dir.join(WINDOW_STATE_FILE),
            interval,
            last_written: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The write period. Doubles as the restore grace window.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Reads the checkpoint file and decides resume vs force-close.
    ///
    /// `grace` is the maximum checkpoint age that still allows resuming.
    pub fn load(&self, now: DateTime<Utc>, grace: Duration) -> RestoreOutcome {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return RestoreOutcome::NoCheckpoint;
            }
            Err(err) => {
                warn!(error = %err, path = %self.path.display(), "Failed to read checkpoint");
                return RestoreOutcome::NoCheckpoint;
            }
        };

        let state: CheckpointState = match serde_json::from_str(&content) {
            Ok(state) => state,
            Err(err) => {
                warn!(error = %err, "Checkpoint did not parse, starting fresh");
                return RestoreOutcome::NoCheckpoint;
            }
        };

        let age = now.signed_duration_since(state.last_updated);
        let fresh = age.num_milliseconds().unsigned_abs() <= grace.as_millis() as u64;
        if fresh {
            info!(
                windows = state.active_windows.len(),
                age_seconds = age.num_seconds(),
                "Resuming from checkpoint"
            );
            RestoreOutcome::Resumed {
                windows: state.active_windows,
                rate_limit: state.rate_limit,
            }
        } else {
            info!(
                windows = state.active_windows.len(),
                age_seconds = age.num_seconds(),
                "Checkpoint expired, force-closing stored windows"
            );
            RestoreOutcome::Expired {
                windows: state.active_windows,
                last_updated: state.last_updated,
            }
        }
    }

    /// Removes the checkpoint file, ignoring a missing one.
    pub fn clear(&self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %err, "Failed to remove stale checkpoint");
            }
        }
    }

    /// Writes a checkpoint if the period elapsed. Returns whether one was
    /// written.
    pub fn maybe_checkpoint(
        &mut self,
        now: Instant,
        state: &CheckpointState,
    ) -> Result<bool, CheckpointError> {
        let due = match self.last_written {
            None => true,
            Some(last) => now.duration_since(last) >= self.interval,
        };
        if !due {
            return Ok(false);
        }
        self.write_now(state)?;
        self.last_written = Some(now);
        Ok(true)
    }

    /// Writes the checkpoint unconditionally: temp file, fsync, rename.
    pub fn write_now(&mut self, state: &CheckpointState) -> Result<(), CheckpointError> {
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");

        {
            use std::io::Write;
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
