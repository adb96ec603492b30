//! Shared fixtures for the integration suites: a scripted fetcher that
//! plays back canned quotes/errors per instrument, and a pipeline
//! builder wired the same way the supervisor wires production.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use arb_common::{Instrument, MarketPair, Quote, Venue};
use arb_monitor::alert::LogAlerter;
use arb_monitor::checkpoint::Checkpointer;
use arb_monitor::cost::CostModel;
use arb_monitor::{RateLimitState, Recorder, Scheduler, SpreadEngine, WindowTracker};
use arb_venues::{MarketFetcher, TransportError};

type Script = VecDeque<Result<(Decimal, Decimal), TransportError>>;

/// Plays back a canned per-instrument script, one entry per fetch.
pub struct ScriptedFetcher {
    venue: Venue,
    scripts: Mutex<HashMap<String, Script>>,
}

impl ScriptedFetcher {
    pub fn new(venue: Venue) -> Self {
        Self {
            venue,
            scripts: Mutex::new(HashMap::new()),
        }
    }

    pub fn push_quote(&self, market_id: &str, bid: Decimal, ask: Decimal) {
        self.scripts
            .lock()
            .unwrap()
            .entry(market_id.to_string())
            .or_default()
            .push_back(Ok((bid, ask)));
    }

    pub fn push_error(&self, market_id: &str, error: TransportError) {
        self.scripts
            .lock()
            .unwrap()
            .entry(market_id.to_string())
            .or_default()
            .push_back(Err(error));
    }
}

#[async_trait]
impl MarketFetcher for ScriptedFetcher {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn fetch(
        &self,
        instrument: &Instrument,
        _deadline: Duration,
    ) -> Result<Quote, TransportError> {
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&instrument.market_id)
            .and_then(VecDeque::pop_front);

        match next {
            Some(Ok((bid, ask))) => {
                let now = Utc::now();
                Ok(Quote {
                    venue: self.venue,
                    instrument: instrument.market_id.clone(),
                    bid,
                    ask,
                    remote_timestamp: now,
                    local_timestamp: now,
                })
            }
            Some(Err(error)) => Err(error),
            None => Err(TransportError::Network("script exhausted".to_string())),
        }
    }
}

/// A market pair whose leg ids are `<pair_id>-K` and `<pair_id>-P`.
pub fn pair(pair_id: &str, market_name: &str) -> MarketPair {
    MarketPair {
        pair_id: pair_id.to_string(),
        market_name: market_name.to_string(),
        polymarket_token: format!("{pair_id}-event"),
        polymarket_market_id: format!("{pair_id}-P"),
        kalshi_ticker: format!("{pair_id}-EVENT"),
        kalshi_market_id: format!("{pair_id}-K"),
        settlement_date: None,
        manually_verified: true,
        notes: None,
        polymarket_title: None,
        kalshi_title: None,
    }
}

/// Assembles a scheduler over scripted fetchers with zero gas and unit
/// contract size, logging into `log_dir`.
pub fn build_scheduler(
    log_dir: &Path,
    pairs: Vec<MarketPair>,
    kalshi: Arc<ScriptedFetcher>,
    poly: Arc<ScriptedFetcher>,
    base_interval: Duration,
) -> Scheduler {
    let recorder = Arc::new(Recorder::new(log_dir.to_path_buf()).unwrap());
    let checkpointer = Checkpointer::new(log_dir, Duration::from_secs(300));
    let spread_engine = SpreadEngine::new(CostModel::new(Decimal::ZERO, Decimal::ONE));

    Scheduler::new(
        pairs,
        kalshi,
        poly,
        spread_engine,
        WindowTracker::new(),
        recorder,
        checkpointer,
        Box::new(LogAlerter),
        RateLimitState::new(base_interval),
    )
}
