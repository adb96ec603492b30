//! Per-pair opportunity-window state machine.
//!
//! For every `(pair_id, direction)` the tracker is either Idle or holds
//! one open `OpportunityWindow`. A positive net spread opens or extends a
//! window; a non-positive spread (zero included) closes it. A degraded
//! observation leaves open windows untouched, but three degraded ticks in
//! a row force-close them as interrupted.
//!
//! The tracker owns the active-window map exclusively. It is synchronous
//! and deterministic: given the same observation sequence it produces the
//! same closed windows, modulo freshly generated window ids.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};

use arb_common::{Direction, OpportunityWindow, PairObservation};

/// Degraded ticks tolerated before an open window is force-closed.
pub const ERROR_STREAK_LIMIT: u32 = 3;

/// Window transitions produced by one observation.
#[derive(Debug, Default)]
pub struct WindowEvents {
    /// Windows that opened on this observation (copies of live state).
    pub opened: Vec<OpportunityWindow>,
    /// Windows that closed on this observation, frozen.
    pub closed: Vec<OpportunityWindow>,
}

impl WindowEvents {
    pub fn is_empty(&self) -> bool {
        self.opened.is_empty() && self.closed.is_empty()
    }
}

/// Tracks open opportunity windows across all pairs and directions.
#[derive(Debug, Default)]
pub struct WindowTracker {
    active: HashMap<(String, Direction), OpportunityWindow>,
    error_streaks: HashMap<String, u32>,
}

impl WindowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drives the state machine with one observation.
    ///
    /// OK observations update both directions; degraded ones only advance
    /// the error streak. A tick degraded purely by rate limiting is
    /// backpressure, not a data failure, and is neutral: it neither
    /// advances nor resets the streak.
    pub fn observe(&mut self, observation: &PairObservation) -> WindowEvents {
        if observation.status.is_ok() {
            self.error_streaks.remove(&observation.pair_id);
            let mut events = WindowEvents::default();
            for direction in Direction::ALL {
                // Missing spread on an OK observation cannot happen, but a
                // missing field must never open a window.
                let spread = observation.spread(direction).unwrap_or(Decimal::ZERO);
                self.apply_spread(observation, direction, spread, &mut events);
            }
            events
        } else if observation.rate_limited {
            debug!(pair_id = %observation.pair_id, "Rate-limited tick, streak unchanged");
            WindowEvents::default()
        } else {
            self.record_degraded(&observation.pair_id, observation.sampled_at)
        }
    }

    fn apply_spread(
        &mut self,
        observation: &PairObservation,
        direction: Direction,
        spread: Decimal,
        events: &mut WindowEvents,
    ) {
        let key = (observation.pair_id.clone(), direction);
        if spread > Decimal::ZERO {
            match self.active.get_mut(&key) {
                Some(window) => window.record(spread, observation.sampled_at),
                None => {
                    let window = OpportunityWindow::open(
                        &observation.pair_id,
                        &observation.market_pair,
                        direction,
                        spread,
                        observation.sampled_at,
                    );
                    info!(
                        pair_id = %observation.pair_id,
                        direction = %direction,
                        spread = %spread,
                        window_id = %window.window_id,
                        "Opportunity window opened"
                    );
                    events.opened.push(window.clone());
                    self.active.insert(key, window);
                }
            }
        } else if let Some(window) = self.active.remove(&key) {
            // Zero counts as non-positive: the window ends here.
            let closed = window.close(observation.sampled_at, false);
            info!(
                pair_id = %observation.pair_id,
                direction = %direction,
                window_id = %closed.window_id,
                duration_seconds = closed.duration_seconds(),
                "Opportunity window closed"
            );
            events.closed.push(closed);
        }
    }

    /// A degraded tick: no stats update, no close, until the streak limit.
    fn record_degraded(&mut self, pair_id: &str, now: DateTime<Utc>) -> WindowEvents {
        let streak = self.error_streaks.entry(pair_id.to_string()).or_insert(0);
        *streak += 1;
        debug!(pair_id = %pair_id, streak = *streak, "Degraded observation");

        if *streak < ERROR_STREAK_LIMIT {
            return WindowEvents::default();
        }
        self.error_streaks.remove(pair_id);

        let mut events = WindowEvents::default();
        for direction in Direction::ALL {
            let key = (pair_id.to_string(), direction);
            if let Some(window) = self.active.remove(&key) {
                info!(
                    pair_id = %pair_id,
                    direction = %direction,
                    window_id = %window.window_id,
                    "Window force-closed after repeated errors"
                );
                events.closed.push(window.close(now, true));
            }
        }
        events
    }

    /// Force-closes every open window (shutdown path).
    pub fn force_close_all(&mut self, end_time: DateTime<Utc>) -> Vec<OpportunityWindow> {
        let mut closed: Vec<OpportunityWindow> = self
            .active
            .drain()
            .map(|(_, window)| window.close(end_time, true))
            .collect();
        // Drain order is unspecified; keep output deterministic.
        closed.sort_by(|a, b| {
            a.pair_id
                .cmp(&b.pair_id)
                .then_with(|| a.direction.label().cmp(b.direction.label()))
        });
        self.error_streaks.clear();
        closed
    }

    /// Reinstates windows restored from a checkpoint.
    pub fn restore(&mut self, windows: Vec<OpportunityWindow>) {
        for window in windows {
            if !window.is_open() {
                continue;
            }
            self.active
                .insert((window.pair_id.clone(), window.direction), window);
        }
    }

    /// Snapshot of open windows for checkpointing.
    pub fn open_windows(&self) -> Vec<OpportunityWindow> {
        let mut windows: Vec<OpportunityWindow> = self.active.values().cloned().collect();
        windows.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        windows
    }

    pub fn open_window_count(&self) -> usize {
        self.active.len()
    }

    #[cfg(test)]
    fn is_open(&self, pair_id: &str, direction: Direction) -> bool {
        self.active.contains_key(&(pair_id.to_string(), direction))
    }
}
