//! Adaptive polling scheduler.
//!
//! Drives one tick per interval: every pair's two venue fetches run
//! concurrently, then results are processed serially per pair through
//! validation, spread calculation, window tracking, and recording.
//!
//! The schedule is absolute: missed slots are skipped, not accumulated.
//! Any 429 observed in a tick drives the backoff ladder; a 30-minute
//! clean streak arms a cooldown that relaxes the interval 10% every
//! 10 minutes back toward the configured base.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use arb_common::{MarketPair, ObservationStatus, OpportunityWindow, PairObservation, Quote, Venue};
use arb_venues::{MarketFetcher, TransportError};

use crate::alert::{AlertEvent, AlertSink};
use crate::checkpoint::{CheckpointState, Checkpointer, RateLimitSnapshot};
use crate::recorder::{ErrorKind, ErrorRecord, Recorder, RecorderError};
use crate::spread::SpreadEngine;
use crate::validator::validate;
use crate::window::WindowTracker;

/// Hard cap on any single fetch deadline.
const MAX_FETCH_DEADLINE: Duration = Duration::from_secs(10);

/// Trailing window over which 429s count as "recent".
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(30 * 60);

/// Spacing between cooldown relaxation steps.
const COOLDOWN_STEP: Duration = Duration::from_secs(10 * 60);

/// Consecutive non-429 failures before a pair is flagged.
const FAILURE_THRESHOLD: u32 = 3;

/// Outcome of applying one 429 to the backoff ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffDecision {
    /// Immediate sleep before any further fetching.
    pub sleep: Duration,
    /// Polling interval after the multiplier.
    pub new_interval: Duration,
    /// Which occurrence within the trailing window this was.
    pub occurrence: u32,
    /// Third-or-later occurrence: raise an alert.
    pub alert: bool,
}

/// Rate-limit backoff and cooldown state, owned by the scheduler.
#[derive(Debug)]
pub struct RateLimitState {
    base_interval: Duration,
    current_interval: Duration,
    last_429: Option<Instant>,
    recent_429_count: u32,
    /// Set once the clean streak arms cooldown; tracks the last step.
    cooldown_anchor: Option<Instant>,
}

impl RateLimitState {
    pub fn new(base_interval: Duration) -> Self {
        Self {
            base_interval,
            current_interval: base_interval,
            last_429: None,
            recent_429_count: 0,
            cooldown_anchor: None,
        }
    }

    pub fn base_interval(&self) -> Duration {
        self.base_interval
    }

    /// Never below the base interval.
    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    /// Applies one rate-limited tick to the ladder.
    pub fn on_rate_limited(&mut self, now: Instant) -> BackoffDecision {
        // A 429 after a clean 30 minutes restarts the ladder.
        if let Some(last) = self.last_429 {
            if now.duration_since(last) >= RATE_LIMIT_WINDOW {
                self.recent_429_count = 0;
            }
        }
        self.recent_429_count += 1;
        self.last_429 = Some(now);
        self.cooldown_anchor = None;

        let (sleep_secs, multiplier, alert) = match self.recent_429_count {
            1 => (30, 1.5, false),
            2 => (60, 2.0, false),
            _ => (120, 2.0, true),
        };
        self.current_interval =
            Duration::from_secs_f64(self.current_interval.as_secs_f64() * multiplier);

        BackoffDecision {
            sleep: Duration::from_secs(sleep_secs),
            new_interval: self.current_interval,
            occurrence: self.recent_429_count,
            alert,
        }
    }

    /// One cooldown step when due: 10% relaxation toward the base.
    ///
    /// Requires a 30-minute clean streak to arm, then fires every
    /// 10 minutes until the interval is back at base.
    pub fn maybe_relax(&mut self, now: Instant) -> Option<Duration> {
        if self.current_interval <= self.base_interval {
            return None;
        }
        if let Some(last) = self.last_429 {
            if now.duration_since(last) < RATE_LIMIT_WINDOW {
                return None;
            }
        }

        match self.cooldown_anchor {
            None => {
                self.cooldown_anchor = Some(now);
                None
            }
            Some(anchor) if now.duration_since(anchor) >= COOLDOWN_STEP => {
                let relaxed =
                    Duration::from_secs_f64(self.current_interval.as_secs_f64() * 0.9);
                self.current_interval = relaxed.max(self.base_interval);
                self.cooldown_anchor = Some(now);
                Some(self.current_interval)
            }
            Some(_) => None,
        }
    }

    /// Wall-clock snapshot for the checkpoint file.
    pub fn snapshot(&self, now: Instant, now_wall: DateTime<Utc>) -> RateLimitSnapshot {
        let last_429_time = self.last_429.map(|instant| {
            let elapsed = now.duration_since(instant);
            now_wall - chrono::Duration::from_std(elapsed).unwrap_or_default()
        });
        RateLimitSnapshot {
            current_interval: self.current_interval.as_secs_f64(),
            recent_429_count: self.recent_429_count,
            last_429_time,
        }
    }

    /// Rebuilds state from a checkpoint taken `now_wall` time.
    pub fn restore(snapshot: &RateLimitSnapshot, base_interval: Duration, now: Instant, now_wall: DateTime<Utc>) -> Self {
        let current = Duration::from_secs_f64(snapshot.current_interval.max(0.0))
            .max(base_interval);
        let last_429 = snapshot.last_429_time.and_then(|wall| {
            let elapsed = now_wall.signed_duration_since(wall).to_std().ok()?;
            now.checked_sub(elapsed)
        });
        Self {
            base_interval,
            current_interval: current,
            last_429,
            recent_429_count: snapshot.recent_429_count,
            cooldown_anchor: None,
        }
    }
}

/// Consecutive failure counter per pair. 429s never count here.
#[derive(Debug, Default)]
struct FailureTracker {
    counts: HashMap<String, u32>,
}

impl FailureTracker {
    /// Records a failed tick; returns `true` when the threshold is hit
    /// (and resets the counter, like the streak it reports on).
    fn record_failure(&mut self, pair_id: &str) -> bool {
        let count = self.counts.entry(pair_id.to_string()).or_insert(0);
        *count += 1;
        if *count >= FAILURE_THRESHOLD {
            self.counts.remove(pair_id);
            true
        } else {
            false
        }
    }

    fn record_success(&mut self, pair_id: &str) {
        self.counts.remove(pair_id);
    }
}

/// The per-tick sampling driver.
pub struct Scheduler {
    pairs: Vec<MarketPair>,
    kalshi: Arc<dyn MarketFetcher>,
    poly: Arc<dyn MarketFetcher>,
    spread_engine: SpreadEngine,
    tracker: WindowTracker,
    recorder: Arc<Recorder>,
    checkpointer: Checkpointer,
    alerts: Box<dyn AlertSink>,
    rate_limit: RateLimitState,
    failures: FailureTracker,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pairs: Vec<MarketPair>,
        kalshi: Arc<dyn MarketFetcher>,
        poly: Arc<dyn MarketFetcher>,
        spread_engine: SpreadEngine,
        tracker: WindowTracker,
        recorder: Arc<Recorder>,
        checkpointer: Checkpointer,
        alerts: Box<dyn AlertSink>,
        rate_limit: RateLimitState,
    ) -> Self {
        Self {
            pairs,
            kalshi,
            poly,
            spread_engine,
            tracker,
            recorder,
            checkpointer,
            alerts,
            rate_limit,
            failures: FailureTracker::default(),
        }
    }

    pub fn current_interval(&self) -> Duration {
        self.rate_limit.current_interval()
    }

    pub fn open_window_count(&self) -> usize {
        self.tracker.open_window_count()
    }

    /// Runs ticks until shutdown is requested.
    ///
    /// Returns only on shutdown or an unrecoverable recorder failure.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), RecorderError> {
        let mut next_tick = Instant::now();
        loop {
            if *shutdown.borrow() {
                break;
            }

            self.tick().await?;

            // Absolute schedule: a long tick skips slots instead of
            // letting lateness accumulate.
            let interval = self.rate_limit.current_interval();
            let now = Instant::now();
            next_tick += interval;
            while next_tick <= now {
                next_tick += interval;
            }

            tokio::select! {
                _ = tokio::time::sleep_until(next_tick) => {}
                _ = shutdown.changed() => break,
            }
        }
        Ok(())
    }

    /// One full sampling cycle across all pairs.
    pub async fn tick(&mut self) -> Result<(), RecorderError> {
        let deadline = self.rate_limit.current_interval().min(MAX_FETCH_DEADLINE);
        let pairs = self.pairs.clone();

        // Parallel I/O: both legs of every pair at once.
        let fetches = pairs.iter().map(|pair| {
            let kalshi = Arc::clone(&self.kalshi);
            let poly = Arc::clone(&self.poly);
            let kalshi_instrument = pair.kalshi_instrument();
            let poly_instrument = pair.polymarket_instrument();
            async move {
                tokio::join!(
                    kalshi.fetch(&kalshi_instrument, deadline),
                    poly.fetch(&poly_instrument, deadline),
                )
            }
        });
        let results = futures::future::join_all(fetches).await;

        // Serialized mutation: pairs processed in config order. Window
        // rows are deferred so every snapshot row of this tick lands
        // before any close row it produced.
        let mut saw_429 = false;
        let mut closed_windows = Vec::new();
        for (pair, (kalshi_result, poly_result)) in pairs.iter().zip(results) {
            let (rate_limited, closed) = self
                .process_pair(pair, kalshi_result, poly_result)
                .await?;
            saw_429 |= rate_limited;
            closed_windows.extend(closed);
        }
        for closed in closed_windows {
            if closed.interrupted {
                self.recorder.write_error(
                    &ErrorRecord::new(
                        Utc::now(),
                        ErrorKind::WindowForcedClose,
                        format!("window {} closed after repeated errors", closed.window_id),
                    )
                    .with_pair(&closed.pair_id),
                )?;
            }
            self.recorder.write_window(&closed)?;
        }

        let now = Instant::now();
        let now_wall = Utc::now();
        if saw_429 {
            let decision = self.rate_limit.on_rate_limited(now);
            self.recorder.write_error(
                &ErrorRecord::new(
                    now_wall,
                    ErrorKind::BackoffApplied,
                    format!("429 occurrence {} in trailing window", decision.occurrence),
                )
                .with_backoff(decision.sleep.as_secs(), decision.new_interval.as_secs_f64()),
            )?;
            warn!(
                occurrence = decision.occurrence,
                sleep_seconds = decision.sleep.as_secs(),
                new_interval_seconds = decision.new_interval.as_secs_f64(),
                "Rate limited, backing off"
            );
            if decision.alert {
                self.alerts
                    .notify(&AlertEvent::RepeatedRateLimit {
                        occurrence: decision.occurrence,
                        new_interval_seconds: decision.new_interval.as_secs_f64(),
                    })
                    .await;
            }
            tokio::time::sleep(decision.sleep).await;
        } else if let Some(relaxed) = self.rate_limit.maybe_relax(now) {
            self.recorder.write_error(
                &ErrorRecord::new(now_wall, ErrorKind::CooldownRelaxed, "clean streak held")
                    .with_new_interval(relaxed.as_secs_f64()),
            )?;
            info!(
                new_interval_seconds = relaxed.as_secs_f64(),
                "Cooldown relaxed polling interval"
            );
        }

        let state = self.checkpoint_state(Instant::now(), Utc::now());
        if let Err(err) = self.checkpointer.maybe_checkpoint(Instant::now(), &state) {
            warn!(error = %err, "Checkpoint write failed, continuing");
        }
        Ok(())
    }

    /// Validates, prices, tracks, and records one pair's tick.
    ///
    /// Returns whether a 429 was seen on either leg, plus any windows
    /// this observation closed (their log rows are written by the
    /// caller, after every snapshot row of the tick).
    async fn process_pair(
        &mut self,
        pair: &MarketPair,
        kalshi_result: Result<Quote, TransportError>,
        poly_result: Result<Quote, TransportError>,
    ) -> Result<(bool, Vec<OpportunityWindow>), RecorderError> {
        let now = Utc::now();
        let mut saw_429 = false;
        let mut hard_failure = false;
        let mut stale = false;

        let mut quotes: [Option<Quote>; 2] = [None, None];
        for (slot, (venue, result)) in [
            (Venue::Kalshi, kalshi_result),
            (Venue::Polymarket, poly_result),
        ]
        .into_iter()
        .enumerate()
        {
            match result {
                Ok(quote) => match validate(&quote) {
                    Ok(()) => quotes[slot] = Some(quote),
                    Err(err) => {
                        stale |= err.is_stale();
                        hard_failure = true;
                        self.recorder.write_error(
                            &ErrorRecord::new(
                                now,
                                ErrorKind::ValidationFailed,
                                format!("{venue}: {err}"),
                            )
                            .with_pair(&pair.pair_id),
                        )?;
                    }
                },
                Err(err) if err.is_rate_limited() => {
                    saw_429 = true;
                    self.recorder.write_error(
                        &ErrorRecord::new(now, ErrorKind::RateLimited, format!("{venue}: {err}"))
                            .with_pair(&pair.pair_id)
                            .with_http_status(429),
                    )?;
                }
                Err(err) => {
                    hard_failure = true;
                    let mut record =
                        ErrorRecord::new(now, ErrorKind::TransportError, format!("{venue}: {err}"))
                            .with_pair(&pair.pair_id);
                    if let Some(status) = err.http_status() {
                        record = record.with_http_status(status);
                    }
                    self.recorder.write_error(&record)?;
                }
            }
        }

        let observation = match quotes {
            [Some(kalshi), Some(poly)] => {
                let spread = self.spread_engine.evaluate(&kalshi, &poly);
                if spread.is_crossed() {
                    self.recorder.write_error(
                        &ErrorRecord::new(
                            now,
                            ErrorKind::CrossedBook,
                            format!(
                                "both directions positive: K→P {} / P→K {}",
                                spread.buy_kalshi_sell_poly, spread.buy_poly_sell_kalshi
                            ),
                        )
                        .with_pair(&pair.pair_id),
                    )?;
                }
                PairObservation {
                    pair_id: pair.pair_id.clone(),
                    market_pair: pair.market_name.clone(),
                    sampled_at: now,
                    kalshi: Some(kalshi),
                    poly: Some(poly),
                    cost_total: Some(spread.cost_total),
                    spread_buy_k_sell_p: Some(spread.buy_kalshi_sell_poly),
                    spread_buy_p_sell_k: Some(spread.buy_poly_sell_kalshi),
                    status: ObservationStatus::Ok,
                    rate_limited: false,
                }
            }
            _ => {
                let status = if stale {
                    ObservationStatus::Stale
                } else {
                    ObservationStatus::Error
                };
                let mut degraded = PairObservation::degraded(pair, now, status);
                // 429 is backpressure: only when no other failure is in
                // play does it exempt the tick from error counting.
                degraded.rate_limited = saw_429 && !hard_failure;
                degraded
            }
        };

        if observation.status.is_ok() {
            self.failures.record_success(&pair.pair_id);
        } else if hard_failure && self.failures.record_failure(&pair.pair_id) {
            self.recorder.write_error(
                &ErrorRecord::new(
                    now,
                    ErrorKind::TransportError,
                    format!("{FAILURE_THRESHOLD} consecutive failed observations"),
                )
                .with_pair(&pair.pair_id),
            )?;
        }

        // Snapshot row first; any window rows from this tick follow it.
        self.recorder.write_snapshot(&observation)?;

        let events = self.tracker.observe(&observation);
        for opened in &events.opened {
            self.alerts
                .notify(&AlertEvent::OpportunityOpened {
                    pair_id: opened.pair_id.clone(),
                    market_pair: opened.market_pair.clone(),
                    direction: opened.direction,
                    net_spread: opened.peak_spread,
                })
                .await;
        }
        debug!(
            pair_id = %pair.pair_id,
            status = observation.status.as_str(),
            "Processed pair"
        );
        Ok((saw_429, events.closed))
    }

    fn checkpoint_state(&self, now: Instant, now_wall: DateTime<Utc>) -> CheckpointState {
        CheckpointState {
            last_updated: now_wall,
            rate_limit: self.rate_limit.snapshot(now, now_wall),
            active_windows: self.tracker.open_windows(),
        }
    }

    /// Shutdown path: force-close open windows, flush, final checkpoint.
    pub fn finalize(&mut self) -> Result<(), RecorderError> {
        let now_wall = Utc::now();
        for window in self.tracker.force_close_all(now_wall) {
            self.recorder.write_error(
                &ErrorRecord::new(
                    now_wall,
                    ErrorKind::WindowForcedClose,
                    format!("window {} interrupted by shutdown", window.window_id),
                )
                .with_pair(&window.pair_id),
            )?;
            self.recorder.write_window(&window)?;
        }

        let state = self.checkpoint_state(Instant::now(), now_wall);
        if let Err(err) = self.checkpointer.write_now(&state) {
            warn!(error = %err, "Final checkpoint write failed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const fn secs(value: u64) -> Duration {
        Duration::from_secs(value)
    }

    #[tokio::test]
    async fn test_backoff_ladder() {
        let mut state = RateLimitState::new(secs(2));
        let t0 = Instant::now();

        let first = state.on_rate_limited(t0);
        assert_eq!(first.sleep, secs(30));
        assert_eq!(first.new_interval, secs(3));
        assert_eq!(first.occurrence, 1);
        assert!(!first.alert);

        let second = state.on_rate_limited(t0 + secs(120));
        assert_eq!(second.sleep, secs(60));
        assert_eq!(second.new_interval, secs(6));
        assert!(!second.alert);

        let third = state.on_rate_limited(t0 + secs(240));
        assert_eq!(third.sleep, secs(120));
        assert_eq!(third.new_interval, secs(12));
        assert_eq!(third.occurrence, 3);
        assert!(third.alert);
    }

    #[tokio::test]
    async fn test_ladder_resets_after_clean_window() {
        let mut state = RateLimitState::new(secs(2));
        let t0 = Instant::now();

        state.on_rate_limited(t0);
        state.on_rate_limited(t0 + secs(60));

        // Next 429 lands 31 clean minutes later: treated as a first.
        let next = state.on_rate_limited(t0 + secs(60) + secs(31 * 60));
        assert_eq!(next.occurrence, 1);
        assert_eq!(next.sleep, secs(30));
    }

    #[tokio::test]
    async fn test_cooldown_arms_then_decays() {
        let mut state = RateLimitState::new(secs(2));
        let t0 = Instant::now();
        state.on_rate_limited(t0);
        state.on_rate_limited(t0 + secs(10));
        assert_eq!(state.current_interval(), secs(6));

        // Still inside the trailing window: nothing relaxes.
        assert_eq!(state.maybe_relax(t0 + secs(20 * 60)), None);

        // Clean streak reached: first call arms the anchor.
        let armed_at = t0 + secs(10) + secs(30 * 60);
        assert_eq!(state.maybe_relax(armed_at), None);
        // Next step is due 10 minutes after arming.
        assert_eq!(state.maybe_relax(armed_at + secs(9 * 60)), None);
        let relaxed = state.maybe_relax(armed_at + secs(10 * 60)).unwrap();
        assert_eq!(relaxed, Duration::from_secs_f64(5.4));
    }

    #[tokio::test]
    async fn test_cooldown_floors_at_base() {
        let mut state = RateLimitState::new(secs(2));
        let t0 = Instant::now();
        state.on_rate_limited(t0);
        assert_eq!(state.current_interval(), secs(3));

        let mut at = t0 + secs(31 * 60);
        assert_eq!(state.maybe_relax(at), None);
        for _ in 0..30 {
            at += secs(10 * 60);
            state.maybe_relax(at);
        }
        assert_eq!(state.current_interval(), secs(2));
        // Fully relaxed: nothing further happens.
        assert_eq!(state.maybe_relax(at + secs(10 * 60)), None);
    }

    #[tokio::test]
    async fn test_interval_never_below_base() {
        let state = RateLimitState::new(secs(2));
        assert_eq!(state.current_interval(), state.base_interval());
    }

    #[tokio::test]
    async fn test_snapshot_restore_round_trip() {
        let mut state = RateLimitState::new(secs(2));
        let t0 = Instant::now();
        state.on_rate_limited(t0);
        state.on_rate_limited(t0 + secs(60));

        let wall = Utc::now();
        let snapshot = state.snapshot(t0 + secs(90), wall);
        assert_eq!(snapshot.recent_429_count, 2);
        assert_eq!(snapshot.current_interval, 6.0);
        // Last 429 was 30 seconds before the snapshot.
        let last = snapshot.last_429_time.unwrap();
        assert_eq!((wall - last).num_seconds(), 30);

        let restored =
            RateLimitState::restore(&snapshot, secs(2), t0 + secs(90), wall);
        assert_eq!(restored.current_interval(), secs(6));
        assert_eq!(restored.recent_429_count, 2);
        assert!(restored.last_429.is_some());
    }

    #[test]
    fn test_failure_tracker_threshold() {
        let mut failures = FailureTracker::default();
        assert!(!failures.record_failure("T1"));
        assert!(!failures.record_failure("T1"));
        assert!(failures.record_failure("T1"));
        // Counter reset after reporting.
        assert!(!failures.record_failure("T1"));
    }

    #[test]
    fn test_failure_tracker_success_resets() {
        let mut failures = FailureTracker::default();
        failures.record_failure("T1");
        failures.record_failure("T1");
        failures.record_success("T1");
        assert!(!failures.record_failure("T1"));
        assert!(!failures.record_failure("T1"));
    }
}
