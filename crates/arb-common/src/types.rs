//! Shared types for the arbitrage window monitor.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A venue hosting one leg of a monitored contract pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Kalshi,
    Polymarket,
}

impl Venue {
    /// Returns the display name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Kalshi => "kalshi",
            Venue::Polymarket => "polymarket",
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trade direction for a round trip across the two venues.
///
/// `KalshiToPoly` buys on Kalshi at the ask and sells on Polymarket at the
/// bid; `PolyToKalshi` is the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "K_to_P")]
    KalshiToPoly,
    #[serde(rename = "P_to_K")]
    PolyToKalshi,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::KalshiToPoly, Direction::PolyToKalshi];

    /// Arrow label used in the window log (`K→P` / `P→K`).
    pub fn label(&self) -> &'static str {
        match self {
            Direction::KalshiToPoly => "K→P",
            Direction::PolyToKalshi => "P→K",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Direction::KalshiToPoly => Direction::PolyToKalshi,
            Direction::PolyToKalshi => Direction::KalshiToPoly,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Locator for one market inside a venue's event payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrument {
    /// Venue event identifier (Kalshi event ticker / Polymarket event id).
    pub event_id: String,
    /// Market identifier inside the event (Kalshi market ticker /
    /// Polymarket market id).
    pub market_id: String,
    /// Optional human title used as a fallback match when the id is absent
    /// from the payload.
    pub title_hint: Option<String>,
}

/// A Kalshi/Polymarket market mapping defined in the config file.
///
/// Immutable after load; `pair_id` is globally unique. Unknown keys in a
/// pair entry are a config error, not something to silently ignore.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarketPair {
    /// Unique, stable pair identifier.
    pub pair_id: String,
    /// Display name used in log rows.
    pub market_name: String,
    /// Polymarket event id.
    pub polymarket_token: String,
    /// Polymarket market id within the event.
    pub polymarket_market_id: String,
    /// Kalshi event ticker.
    pub kalshi_ticker: String,
    /// Kalshi market ticker within the event.
    pub kalshi_market_id: String,
    /// Settlement date, informational only.
    #[serde(default)]
    pub settlement_date: Option<String>,
    /// Whether a human confirmed the two contracts settle identically.
    pub manually_verified: bool,
    #[serde(default)]
    pub notes: Option<String>,
    /// Optional title override for Polymarket fallback matching.
    #[serde(default)]
    pub polymarket_title: Option<String>,
    /// Optional title override for Kalshi fallback matching.
    #[serde(default)]
    pub kalshi_title: Option<String>,
}

impl MarketPair {
    /// Instrument locator for the Kalshi leg.
    pub fn kalshi_instrument(&self) -> Instrument {
        Instrument {
            event_id: self.kalshi_ticker.clone(),
            market_id: self.kalshi_market_id.clone(),
            title_hint: self
                .kalshi_title
                .clone()
                .or_else(|| Some(self.market_name.clone())),
        }
    }

    /// Instrument locator for the Polymarket leg.
    pub fn polymarket_instrument(&self) -> Instrument {
        Instrument {
            event_id: self.polymarket_token.clone(),
            market_id: self.polymarket_market_id.clone(),
            title_hint: self
                .polymarket_title
                .clone()
                .or_else(|| Some(self.market_name.clone())),
        }
    }
}

/// A top-of-book quote for one venue leg, valid for a single tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub venue: Venue,
    /// Market identifier the quote belongs to.
    pub instrument: String,
    /// Best bid in dollars (0.01 to 0.99 for a valid quote).
    pub bid: Decimal,
    /// Best ask in dollars.
    pub ask: Decimal,
    /// Timestamp reported by the venue (or arrival time when absent).
    pub remote_timestamp: DateTime<Utc>,
    /// Timestamp at which the quote was received locally.
    pub local_timestamp: DateTime<Utc>,
}

impl Quote {
    /// Book spread (`ask - bid`), an implicit liquidity cost.
    pub fn book_spread(&self) -> Decimal {
        self.ask - self.bid
    }

    /// Absolute skew between the venue clock and ours, in seconds.
    pub fn clock_skew_seconds(&self) -> i64 {
        (self.local_timestamp - self.remote_timestamp)
            .num_seconds()
            .abs()
    }
}

/// Lifecycle status of a single pair observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObservationStatus {
    Ok,
    Stale,
    Error,
}

impl ObservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationStatus::Ok => "OK",
            ObservationStatus::Stale => "STALE",
            ObservationStatus::Error => "ERROR",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ObservationStatus::Ok)
    }
}

/// One evaluated tick for one pair, as it flows through the pipeline.
///
/// Non-OK observations carry no numeric fields and never drive the window
/// state machine.
#[derive(Debug, Clone)]
pub struct PairObservation {
    pub pair_id: String,
    /// Display label, copied into log rows.
    pub market_pair: String,
    /// Wall-clock sampling time.
    pub sampled_at: DateTime<Utc>,
    pub kalshi: Option<Quote>,
    pub poly: Option<Quote>,
    pub cost_total: Option<Decimal>,
    /// Net spread for buy-Kalshi / sell-Polymarket.
    pub spread_buy_k_sell_p: Option<Decimal>,
    /// Net spread for buy-Polymarket / sell-Kalshi.
    pub spread_buy_p_sell_k: Option<Decimal>,
    pub status: ObservationStatus,
    /// The only reason this tick degraded was venue rate limiting.
    ///
    /// Rate limiting is backpressure, not a data failure: such ticks
    /// must not count toward any consecutive-error threshold.
    pub rate_limited: bool,
}

impl PairObservation {
    /// Builds a degraded observation with empty numeric fields.
    pub fn degraded(
        pair: &MarketPair,
        sampled_at: DateTime<Utc>,
        status: ObservationStatus,
    ) -> Self {
        Self {
            pair_id: pair.pair_id.clone(),
            market_pair: pair.market_name.clone(),
            sampled_at,
            kalshi: None,
            poly: None,
            cost_total: None,
            spread_buy_k_sell_p: None,
            spread_buy_p_sell_k: None,
            status,
            rate_limited: false,
        }
    }

    /// Net spread in the given direction, if the observation is usable.
    pub fn spread(&self, direction: Direction) -> Option<Decimal> {
        match direction {
            Direction::KalshiToPoly => self.spread_buy_k_sell_p,
            Direction::PolyToKalshi => self.spread_buy_p_sell_k,
        }
    }
}

/// An opportunity window: a maximal run of ticks during which the net
/// spread in one direction stayed strictly positive.
///
/// Open windows have `end_time == None`. Mutated only by the window
/// tracker; serialized as-is into the checkpoint file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityWindow {
    pub window_id: Uuid,
    pub pair_id: String,
    /// Display label, copied into the window log row.
    pub market_pair: String,
    pub direction: Direction,
    pub start_time: DateTime<Utc>,
    pub last_seen_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    pub peak_spread: Decimal,
    pub sum_spread: Decimal,
    pub observation_count: u32,
    #[serde(default)]
    pub interrupted: bool,
}

impl OpportunityWindow {
    /// Opens a fresh window on a zero-to-positive transition.
    pub fn open(
        pair_id: &str,
        market_pair: &str,
        direction: Direction,
        spread: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            window_id: Uuid::new_v4(),
            pair_id: pair_id.to_string(),
            market_pair: market_pair.to_string(),
            direction,
            start_time: now,
            last_seen_time: now,
            end_time: None,
            peak_spread: spread,
            sum_spread: spread,
            observation_count: 1,
            interrupted: false,
        }
    }

    /// Folds another positive observation into the running stats.
    pub fn record(&mut self, spread: Decimal, now: DateTime<Utc>) {
        self.last_seen_time = now;
        self.observation_count += 1;
        self.sum_spread += spread;
        if spread > self.peak_spread {
            self.peak_spread = spread;
        }
    }

    /// Freezes the window. After this it must not be mutated again.
    pub fn close(mut self, end_time: DateTime<Utc>, interrupted: bool) -> Self {
        self.end_time = Some(end_time);
        self.interrupted = interrupted;
        self
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Mean spread over the window's observations.
    pub fn avg_spread(&self) -> Decimal {
        self.sum_spread / Decimal::from(self.observation_count.max(1))
    }

    /// Whole seconds between start and end (zero for single-tick spikes).
    pub fn duration_seconds(&self) -> i64 {
        let end = self.end_time.unwrap_or(self.last_seen_time);
        (end - self.start_time).num_seconds().max(0)
    }
}
