//! Round-trip law: replaying `price_snapshots.csv` through a fresh
//! window tracker reproduces `opportunity_windows.csv` except for the
//! generated window ids.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use arb_common::{ObservationStatus, PairObservation, Venue};
use arb_monitor::{Recorder, WindowTracker};
use arb_venues::TransportError;
use common::{build_scheduler, pair, ScriptedFetcher};

/// A parsed snapshot row, mirroring the CSV schema.
#[derive(Debug, Deserialize)]
struct SnapshotRow {
    timestamp: String,
    market_pair: String,
    #[allow(dead_code)]
    kalshi_bid: Option<Decimal>,
    #[allow(dead_code)]
    kalshi_ask: Option<Decimal>,
    #[allow(dead_code)]
    poly_bid: Option<Decimal>,
    #[allow(dead_code)]
    poly_ask: Option<Decimal>,
    #[allow(dead_code)]
    total_cost: Option<Decimal>,
    #[serde(rename = "net_spread_buy_K_sell_P")]
    net_spread_buy_k_sell_p: Option<Decimal>,
    #[serde(rename = "net_spread_buy_P_sell_K")]
    net_spread_buy_p_sell_k: Option<Decimal>,
}

impl SnapshotRow {
    fn to_observation(&self) -> PairObservation {
        let status = if self.net_spread_buy_k_sell_p.is_some() {
            ObservationStatus::Ok
        } else {
            ObservationStatus::Error
        };
        PairObservation {
            // Snapshot rows carry the display label; it is unique per
            // pair, so it serves as the replay key.
            pair_id: self.market_pair.clone(),
            market_pair: self.market_pair.clone(),
            sampled_at: DateTime::parse_from_rfc3339(&self.timestamp)
                .unwrap()
                .with_timezone(&Utc),
            kalshi: None,
            poly: None,
            cost_total: self.total_cost,
            spread_buy_k_sell_p: self.net_spread_buy_k_sell_p,
            spread_buy_p_sell_k: self.net_spread_buy_p_sell_k,
            status,
            rate_limited: false,
        }
    }
}

/// Everything after the `window_id` column.
fn rows_without_ids(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .skip(1)
        .map(|line| line.split_once(',').unwrap().1.to_string())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_replay_reproduces_window_log() {
    let live_dir = tempfile::tempdir().unwrap();
    let kalshi = Arc::new(ScriptedFetcher::new(Venue::Kalshi));
    let poly = Arc::new(ScriptedFetcher::new(Venue::Polymarket));

    // Kalshi pinned at 0.50/0.52 and a 0.02-wide Polymarket book keep
    // cost_total at 0.05, so spread_K_to_P = poly_bid - 0.57.
    //
    // Pair A: a three-tick window, then a window that survives one error
    // tick and ends on an exactly-zero spread.
    // Pair B: a single-tick spike.
    let a_poly_bids = [
        Some(dec!(0.56)), // -0.01 idle
        Some(dec!(0.59)), // +0.02 opens W1
        Some(dec!(0.61)), // +0.04
        Some(dec!(0.56)), // -0.01 closes W1
        Some(dec!(0.60)), // +0.03 opens W2
        None,             // error tick, W2 survives
        Some(dec!(0.62)), // +0.05
        Some(dec!(0.57)), //  0.00 closes W2 (zero is non-positive)
        Some(dec!(0.56)),
        Some(dec!(0.56)),
    ];
    let b_poly_bids = [
        Some(dec!(0.56)),
        Some(dec!(0.56)),
        Some(dec!(0.63)), // +0.06 spike
        Some(dec!(0.56)), // closes spike
        Some(dec!(0.56)),
        Some(dec!(0.56)),
        Some(dec!(0.56)),
        Some(dec!(0.56)),
        Some(dec!(0.56)),
        Some(dec!(0.56)),
    ];

    for (a_bid, b_bid) in a_poly_bids.iter().zip(b_poly_bids.iter()) {
        match a_bid {
            Some(bid) => {
                kalshi.push_quote("A-K", dec!(0.50), dec!(0.52));
                poly.push_quote("A-P", *bid, *bid + dec!(0.02));
            }
            None => {
                kalshi.push_error("A-K", TransportError::Timeout(Duration::from_secs(10)));
                poly.push_quote("A-P", dec!(0.60), dec!(0.62));
            }
        }
        let b = b_bid.unwrap();
        kalshi.push_quote("B-K", dec!(0.50), dec!(0.52));
        poly.push_quote("B-P", b, b + dec!(0.02));
    }

    let mut scheduler = build_scheduler(
        live_dir.path(),
        vec![pair("A", "Fed rate cut"), pair("B", "CPI above 3 percent")],
        kalshi,
        poly,
        Duration::from_secs(2),
    );
    for _ in 0..10 {
        scheduler.tick().await.unwrap();
    }
    assert_eq!(scheduler.open_window_count(), 0, "all windows closed naturally");

    // Replay the snapshot log through a fresh tracker into a second log
    // directory.
    let replay_dir = tempfile::tempdir().unwrap();
    let replay_recorder = Recorder::new(replay_dir.path().to_path_buf()).unwrap();
    let mut replay_tracker = WindowTracker::new();

    let mut reader =
        csv::Reader::from_path(live_dir.path().join("price_snapshots.csv")).unwrap();
    for row in reader.deserialize::<SnapshotRow>() {
        let observation = row.unwrap().to_observation();
        for closed in replay_tracker.observe(&observation).closed {
            replay_recorder.write_window(&closed).unwrap();
        }
    }

    let live_rows = rows_without_ids(&live_dir.path().join("opportunity_windows.csv"));
    let replay_rows = rows_without_ids(&replay_dir.path().join("opportunity_windows.csv"));

    assert_eq!(live_rows.len(), 3, "W1, the spike, then W2");
    assert_eq!(live_rows, replay_rows);
}
