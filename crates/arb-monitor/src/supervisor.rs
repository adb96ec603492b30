//! Wiring and lifecycle.
//!
//! The supervisor owns startup (checkpoint restore, component
//! construction), shutdown (signals and the optional duration limit), and
//! the final flush. Components get explicit handles rather than globals
//! so tests can assemble the same pipeline with scripted fetchers.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info};

use arb_venues::{KalshiFetcher, PolymarketFetcher};

use crate::alert::build_alert_sink;
use crate::checkpoint::{Checkpointer, RestoreOutcome};
use crate::config::AppConfig;
use crate::cost::CostModel;
use crate::recorder::{ErrorKind, ErrorRecord, Recorder, RecorderError};
use crate::scheduler::{RateLimitState, Scheduler};
use crate::spread::SpreadEngine;
use crate::window::WindowTracker;

/// Why the monitor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT or SIGTERM.
    Signal,
    /// The configured monitoring duration elapsed.
    DurationElapsed,
}

/// Unrecoverable runtime failures (exit code 2).
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Recorder(#[from] RecorderError),
}

/// Owns configuration and drives the pipeline from start to final flush.
pub struct Supervisor {
    config: AppConfig,
    log_dir: PathBuf,
}

impl Supervisor {
    pub fn new(config: AppConfig, log_dir: PathBuf) -> Self {
        Self { config, log_dir }
    }

    pub async fn run(self) -> Result<ShutdownReason, SupervisorError> {
        let recorder = Arc::new(Recorder::new(self.log_dir.clone())?);
        let checkpointer =
            Checkpointer::new(&self.log_dir, self.config.checkpoint_interval());

        let base_interval = self.config.polling_interval();
        let (tracker, rate_limit) = restore_state(
            &checkpointer,
            &recorder,
            base_interval,
            Utc::now(),
            Instant::now(),
        )?;

        let kalshi = Arc::new(KalshiFetcher::new(self.config.kalshi_api_key.clone()));
        let poly = Arc::new(PolymarketFetcher::new());
        let spread_engine =
            SpreadEngine::new(CostModel::from_config(&self.config.cost_assumptions));
        let alerts = build_alert_sink(self.config.alerting.as_ref());

        let mut scheduler = Scheduler::new(
            self.config.market_pairs.clone(),
            kalshi,
            poly,
            spread_engine,
            tracker,
            recorder.clone(),
            checkpointer,
            alerts,
            rate_limit,
        );

        info!(
            pairs = self.config.market_pairs.len(),
            interval_seconds = base_interval.as_secs(),
            log_dir = %self.log_dir.display(),
            "Monitor started"
        );

        // Shutdown plumbing: signals and the duration limit both flip the
        // same watch channel; the last reason written wins.
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reason = Arc::new(Mutex::new(ShutdownReason::DurationElapsed));

        {
            let tx = shutdown_tx.clone();
            let reason = Arc::clone(&reason);
            tokio::spawn(async move {
                if let Err(err) = wait_for_shutdown_signal().await {
                    error!(error = %err, "Signal handler failed");
                    return;
                }
                info!("Shutdown signal received");
                *reason.lock().unwrap() = ShutdownReason::Signal;
                let _ = tx.send(true);
            });
        }

        if let Some(limit) = self.config.duration_limit() {
            let tx = shutdown_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                info!(hours = limit.as_secs_f64() / 3600.0, "Monitoring duration reached");
                let _ = tx.send(true);
            });
        }

        let run_result = scheduler.run(shutdown_rx).await;

        // Flush open windows and take a last checkpoint even when the run
        // itself failed.
        let finalize_result = scheduler.finalize();
        run_result?;
        finalize_result?;

        let reason = *reason.lock().unwrap();
        info!(?reason, "Monitor stopped cleanly");
        Ok(reason)
    }
}

/// Applies the checkpoint (if any) to fresh tracker and rate-limit state.
///
/// A checkpoint younger than its own write period resumes; an older one
/// has every stored open window synthesized into an interrupted close row
/// dated at the checkpoint time.
fn restore_state(
    checkpointer: &Checkpointer,
    recorder: &Recorder,
    base_interval: std::time::Duration,
    now_wall: DateTime<Utc>,
    now: Instant,
) -> Result<(WindowTracker, RateLimitState), RecorderError> {
    let mut tracker = WindowTracker::new();

    match checkpointer.load(now_wall, checkpointer.interval()) {
        RestoreOutcome::NoCheckpoint => {
            Ok((tracker, RateLimitState::new(base_interval)))
        }
        RestoreOutcome::Resumed { windows, rate_limit } => {
            tracker.restore(windows);
            let state = RateLimitState::restore(&rate_limit, base_interval, now, now_wall);
            Ok((tracker, state))
        }
        RestoreOutcome::Expired { windows, last_updated } => {
            for window in windows {
                if !window.is_open() {
                    continue;
                }
                let closed = window.close(last_updated, true);
                recorder.write_error(
                    &ErrorRecord::new(
                        now_wall,
                        ErrorKind::WindowForcedClose,
                        format!("window {} expired in stale checkpoint", closed.window_id),
                    )
                    .with_pair(&closed.pair_id),
                )?;
                recorder.write_window(&closed)?;
            }
            checkpointer.clear();
            Ok((tracker, RateLimitState::new(base_interval)))
        }
    }
}

/// Wait for SIGINT or SIGTERM (Ctrl+C on Windows).
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use arb_common::{Direction, OpportunityWindow};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    use crate::checkpoint::{CheckpointState, RateLimitSnapshot};
    use crate::recorder::OPPORTUNITY_WINDOWS_FILE;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn checkpoint_with_window(last_updated: DateTime<Utc>) -> CheckpointState {
        let mut window = OpportunityWindow::open(
            "T1",
            "Fed rate cut",
            Direction::KalshiToPoly,
            dec!(0.02),
            last_updated - chrono::Duration::seconds(45),
        );
        window.record(dec!(0.03), last_updated);
        CheckpointState {
            last_updated,
            rate_limit: RateLimitSnapshot {
                current_interval: 3.0,
                recent_429_count: 1,
                last_429_time: Some(last_updated - chrono::Duration::seconds(90)),
            },
            active_windows: vec![window],
        }
    }

    #[tokio::test]
    async fn test_restart_within_grace_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path().to_path_buf()).unwrap();
        let mut checkpointer = Checkpointer::new(dir.path(), Duration::from_secs(300));
        checkpointer.write_now(&checkpoint_with_window(ts(0))).unwrap();

        // Restart 60 seconds after the checkpoint.
        let (tracker, rate_limit) = restore_state(
            &checkpointer,
            &recorder,
            Duration::from_secs(2),
            ts(60),
            Instant::now(),
        )
        .unwrap();

        assert_eq!(tracker.open_window_count(), 1);
        assert_eq!(rate_limit.current_interval(), Duration::from_secs(3));
        // No forced-close rows were synthesized.
        assert!(!dir.path().join(OPPORTUNITY_WINDOWS_FILE).exists());
    }

    #[tokio::test]
    async fn test_restart_outside_grace_force_closes() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path().to_path_buf()).unwrap();
        let mut checkpointer = Checkpointer::new(dir.path(), Duration::from_secs(300));
        checkpointer.write_now(&checkpoint_with_window(ts(0))).unwrap();

        // Restart 601 seconds later.
        let (tracker, rate_limit) = restore_state(
            &checkpointer,
            &recorder,
            Duration::from_secs(2),
            ts(601),
            Instant::now(),
        )
        .unwrap();

        assert_eq!(tracker.open_window_count(), 0);
        assert_eq!(rate_limit.current_interval(), Duration::from_secs(2));
        // Stale checkpoint removed; window row dated at the checkpoint.
        assert!(!dir.path().join("window_state.json").exists());

        let windows = std::fs::read_to_string(dir.path().join(OPPORTUNITY_WINDOWS_FILE)).unwrap();
        let row = windows.lines().nth(1).unwrap();
        assert!(row.contains("true"));
        assert!(row.contains(&crate::recorder::format_ts(ts(0))));

        let errors = std::fs::read_to_string(dir.path().join("errors.log")).unwrap();
        let line: serde_json::Value = serde_json::from_str(errors.lines().next().unwrap()).unwrap();
        assert_eq!(line["kind"], "window_forced_close");
    }

    #[tokio::test]
    async fn test_no_checkpoint_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path().to_path_buf()).unwrap();
        let checkpointer = Checkpointer::new(dir.path(), Duration::from_secs(300));

        let (tracker, rate_limit) = restore_state(
            &checkpointer,
            &recorder,
            Duration::from_secs(2),
            ts(0),
            Instant::now(),
        )
        .unwrap();

        assert_eq!(tracker.open_window_count(), 0);
        assert_eq!(rate_limit.current_interval(), Duration::from_secs(2));
    }
}
