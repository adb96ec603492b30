//! Durable log sinks: snapshot CSV, window CSV, and the JSONL error log.
//!
//! All three files are append-only with exactly one writer each. Writers
//! are lazily created, CSV headers are written only when the file starts
//! empty, and every row is flushed before the call returns. A failed
//! write is retried once; a second failure is surfaced to the caller,
//! which treats it as unrecoverable.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use arb_common::{OpportunityWindow, PairObservation};

/// File names inside the log directory.
pub const PRICE_SNAPSHOTS_FILE: &str = "price_snapshots.csv";
pub const OPPORTUNITY_WINDOWS_FILE: &str = "opportunity_windows.csv";
pub const ERRORS_FILE: &str = "errors.log";

/// Errors from the durable sinks. Persistent ones are fatal (exit 2).
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("I/O error on {file}: {source}")]
    Io {
        file: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on {file}: {source}")]
    Csv {
        file: &'static str,
        #[source]
        source: csv::Error,
    },
}

/// Formats a wall-clock timestamp the way every log row carries it:
/// ISO-8601 UTC with millisecond precision.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Structured line for `errors.log`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub ts: String,
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pair_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_interval: Option<f64>,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    ValidationFailed,
    TransportError,
    CrossedBook,
    BackoffApplied,
    CooldownRelaxed,
    WindowForcedClose,
}

impl ErrorRecord {
    pub fn new(now: DateTime<Utc>, kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            ts: format_ts(now),
            kind,
            pair_id: None,
            http_status: None,
            backoff_seconds: None,
            new_interval: None,
            detail: detail.into(),
        }
    }

    pub fn with_pair(mut self, pair_id: &str) -> Self {
        self.pair_id = Some(pair_id.to_string());
        self
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_backoff(mut self, backoff_seconds: u64, new_interval_seconds: f64) -> Self {
        self.backoff_seconds = Some(backoff_seconds);
        self.new_interval = Some(new_interval_seconds);
        self
    }

    pub fn with_new_interval(mut self, new_interval_seconds: f64) -> Self {
        self.new_interval = Some(new_interval_seconds);
        self
    }
}

/// One `price_snapshots.csv` row. Degraded observations leave the
/// numeric cells empty.
#[derive(Debug, Serialize)]
struct SnapshotRow<'a> {
    timestamp: String,
    market_pair: &'a str,
    kalshi_bid: Option<Decimal>,
    kalshi_ask: Option<Decimal>,
    poly_bid: Option<Decimal>,
    poly_ask: Option<Decimal>,
    total_cost: Option<Decimal>,
    #[serde(rename = "net_spread_buy_K_sell_P")]
    net_spread_buy_k_sell_p: Option<Decimal>,
    #[serde(rename = "net_spread_buy_P_sell_K")]
    net_spread_buy_p_sell_k: Option<Decimal>,
}

/// One `opportunity_windows.csv` row.
#[derive(Debug, Serialize)]
struct WindowRow<'a> {
    window_id: String,
    market_pair: &'a str,
    start_time: String,
    end_time: String,
    duration_seconds: i64,
    peak_spread: Decimal,
    avg_spread: Decimal,
    direction: &'static str,
    observation_count: u32,
    interrupted: bool,
}

/// Owner of the three log sinks.
pub struct Recorder {
    log_dir: PathBuf,
    snapshots: Mutex<Option<csv::Writer<File>>>,
    windows: Mutex<Option<csv::Writer<File>>>,
    errors: Mutex<Option<File>>,
    snapshot_count: AtomicU64,
    window_count: AtomicU64,
}

impl Recorder {
    /// Creates a recorder writing into `log_dir` (created if absent).
    pub fn new(log_dir: PathBuf) -> Result<Self, RecorderError> {
        std::fs::create_dir_all(&log_dir).map_err(|source| RecorderError::Io {
            file: "log directory",
            source,
        })?;

        Ok(Self {
            log_dir,
            snapshots: Mutex::new(None),
            windows: Mutex::new(None),
            errors: Mutex::new(None),
            snapshot_count: AtomicU64::new(0),
            window_count: AtomicU64::new(0),
        })
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn snapshot_count(&self) -> u64 {
        self.snapshot_count.load(Ordering::Relaxed)
    }

    pub fn window_count(&self) -> u64 {
        self.window_count.load(Ordering::Relaxed)
    }

    fn get_or_create_csv(
        writer_mutex: &Mutex<Option<csv::Writer<File>>>,
        path: &Path,
        file: &'static str,
    ) -> Result<(), RecorderError> {
        let mut guard = writer_mutex.lock().unwrap();
        if guard.is_none() {
            let handle = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| RecorderError::Io { file, source })?;

            let needs_headers = handle
                .metadata()
                .map_err(|source| RecorderError::Io { file, source })?
                .len()
                == 0;
            let writer = csv::WriterBuilder::new()
                .has_headers(needs_headers)
                .from_writer(handle);
            *guard = Some(writer);
        }
        Ok(())
    }

    fn write_csv_row<T: Serialize>(
        writer_mutex: &Mutex<Option<csv::Writer<File>>>,
        path: &Path,
        file: &'static str,
        row: &T,
    ) -> Result<(), RecorderError> {
        // One retry: the writer is rebuilt so a poisoned buffer cannot
        // repeat the failure.
        for attempt in 0..2 {
            Self::get_or_create_csv(writer_mutex, path, file)?;
            let mut guard = writer_mutex.lock().unwrap();
            let writer = guard.as_mut().unwrap();

            let result = writer
                .serialize(row)
                .map_err(|source| RecorderError::Csv { file, source })
                .and_then(|()| {
                    writer.flush().map_err(|source| RecorderError::Io { file, source })
                });

            match result {
                Ok(()) => return Ok(()),
                Err(err) if attempt == 0 => {
                    tracing::warn!(file = file, error = %err, "Log write failed, retrying once");
                    *guard = None;
                }
                Err(err) => return Err(err),
            }
        }
        unreachable!("retry loop returns on both arms")
    }

    /// Appends one snapshot row for an observation.
    pub fn write_snapshot(&self, observation: &PairObservation) -> Result<(), RecorderError> {
        let row = SnapshotRow {
            timestamp: format_ts(observation.sampled_at),
            market_pair: &observation.market_pair,
            kalshi_bid: observation.kalshi.as_ref().map(|q| q.bid),
            kalshi_ask: observation.kalshi.as_ref().map(|q| q.ask),
            poly_bid: observation.poly.as_ref().map(|q| q.bid),
            poly_ask: observation.poly.as_ref().map(|q| q.ask),
            total_cost: observation.cost_total,
            net_spread_buy_k_sell_p: observation.spread_buy_k_sell_p,
            net_spread_buy_p_sell_k: observation.spread_buy_p_sell_k,
        };

        let path = self.log_dir.join(PRICE_SNAPSHOTS_FILE);
        Self::write_csv_row(&self.snapshots, &path, PRICE_SNAPSHOTS_FILE, &row)?;
        self.snapshot_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Appends one closed-window row.
    pub fn write_window(&self, window: &OpportunityWindow) -> Result<(), RecorderError> {
        let end_time = window.end_time.unwrap_or(window.last_seen_time);
        let row = WindowRow {
            window_id: window.window_id.to_string(),
            market_pair: &window.market_pair,
            start_time: format_ts(window.start_time),
            end_time: format_ts(end_time),
            duration_seconds: window.duration_seconds(),
            peak_spread: window.peak_spread.round_dp(6),
            avg_spread: window.avg_spread().round_dp(6),
            direction: window.direction.label(),
            observation_count: window.observation_count,
            interrupted: window.interrupted,
        };

        let path = self.log_dir.join(OPPORTUNITY_WINDOWS_FILE);
        Self::write_csv_row(&self.windows, &path, OPPORTUNITY_WINDOWS_FILE, &row)?;
        self.window_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Appends one structured line to `errors.log`.
    pub fn write_error(&self, record: &ErrorRecord) -> Result<(), RecorderError> {
        let line = serde_json::to_string(record).expect("error record serializes");

        for attempt in 0..2 {
            let mut guard = self.errors.lock().unwrap();
            if guard.is_none() {
                let handle = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(self.log_dir.join(ERRORS_FILE))
                    .map_err(|source| RecorderError::Io {
                        file: ERRORS_FILE,
                        source,
                    })?;
                *guard = Some(handle);
            }
            let file = guard.as_mut().unwrap();

            let result = writeln!(file, "{line}")
                .and_then(|()| file.flush())
                .map_err(|source| RecorderError::Io {
                    file: ERRORS_FILE,
                    source,
                });

            match result {
                Ok(()) => return Ok(()),
                Err(err) if attempt == 0 => {
                    tracing::warn!(error = %err, "errors.log write failed, retrying once");
                    *guard = None;
                }
                Err(err) => return Err(err),
            }
        }
        unreachable!("retry loop returns on both arms")
    }
}
