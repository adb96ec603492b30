//! Kalshi market-data client.
//!
//! Fetches the event payload (`GET /events/{event_ticker}`), selects the
//! configured market ticker, and normalizes `yes_bid_dollars` /
//! `yes_ask_dollars` into a `Quote`. The events endpoint carries no
//! per-market timestamp, so the remote timestamp is the arrival time.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use arb_common::{Instrument, Quote, Venue};

use crate::wire::{normalize_title, PriceField};
use crate::{MarketFetcher, TransportError};

/// Production Kalshi trade API base URL.
const DEFAULT_KALSHI_URL: &str = "https://api.elections.kalshi.com/trade-api/v2";

#[derive(Debug, Deserialize)]
struct KalshiEventResponse {
    #[serde(default)]
    markets: Vec<KalshiMarket>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct KalshiMarket {
    pub(crate) ticker: String,
    #[serde(default)]
    pub(crate) title: Option<String>,
    #[serde(default)]
    pub(crate) subtitle: Option<String>,
    #[serde(default)]
    pub(crate) yes_sub_title: Option<String>,
    #[serde(default)]
    pub(crate) no_sub_title: Option<String>,
    #[serde(default)]
    pub(crate) yes_bid_dollars: Option<PriceField>,
    #[serde(default)]
    pub(crate) yes_ask_dollars: Option<PriceField>,
}

impl KalshiMarket {
    /// Best available human title for fallback matching.
    fn display_title(&self) -> Option<&str> {
        [
            &self.title,
            &self.subtitle,
            &self.yes_sub_title,
            &self.no_sub_title,
        ]
        .into_iter()
        .flatten()
        .map(|s| s.as_str())
        .find(|s| !s.trim().is_empty())
    }
}

/// HTTP fetcher for the Kalshi leg of each pair.
pub struct KalshiFetcher {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl KalshiFetcher {
    /// Create a fetcher against the production API.
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_url(DEFAULT_KALSHI_URL, api_key)
    }

    /// Create a fetcher with a custom base URL (tests, proxies).
    pub fn with_url(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

/// Picks the configured market out of the event payload: exact ticker
/// match first, then normalized-title fallback.
pub(crate) fn select_market<'a>(
    markets: &'a [KalshiMarket],
    instrument: &Instrument,
) -> Option<&'a KalshiMarket> {
    if let Some(found) = markets
        .iter()
        .find(|m| m.ticker.eq_ignore_ascii_case(&instrument.market_id))
    {
        return Some(found);
    }

    let wanted = normalize_title(instrument.title_hint.as_deref()?);
    if wanted.is_empty() {
        return None;
    }
    markets
        .iter()
        .find(|m| m.display_title().map(normalize_title) == Some(wanted.clone()))
}

#[async_trait]
impl MarketFetcher for KalshiFetcher {
    fn venue(&self) -> Venue {
        Venue::Kalshi
    }

    async fn fetch(
        &self,
        instrument: &Instrument,
        deadline: Duration,
    ) -> Result<Quote, TransportError> {
        let url = format!("{}/events/{}", self.base_url, instrument.event_id);
        debug!(url = %url, market = %instrument.market_id, "Fetching Kalshi event");

        let mut request = self
            .http
            .get(&url)
            .timeout(deadline)
            .header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, deadline))?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TransportError::RateLimited);
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TransportError::AuthN(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let event: KalshiEventResponse = response
            .json()
            .await
            .map_err(|e| TransportError::from_reqwest(e, deadline))?;

        let market = select_market(&event.markets, instrument).ok_or_else(|| {
            TransportError::Decode(format!(
                "market {} not present in event {}",
                instrument.market_id, instrument.event_id
            ))
        })?;

        let bid = market
            .yes_bid_dollars
            .as_ref()
            .and_then(PriceField::as_decimal)
            .ok_or_else(|| TransportError::Decode("missing yes_bid_dollars".to_string()))?;
        let ask = market
            .yes_ask_dollars
            .as_ref()
            .and_then(PriceField::as_decimal)
            .ok_or_else(|| TransportError::Decode("missing yes_ask_dollars".to_string()))?;

        let now = Utc::now();
        Ok(Quote {
            venue: Venue::Kalshi,
            instrument: market.ticker.clone(),
            bid,
            ask,
            remote_timestamp: now,
            local_timestamp: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn instrument(market_id: &str, title: Option<&str>) -> Instrument {
        Instrument {
            event_id: "KXRATECUT".to_string(),
            market_id: market_id.to_string(),
            title_hint: title.map(str::to_string),
        }
    }

    #[test]
    fn test_parse_event_payload() {
        let json = r#"{
            "event": {"event_ticker": "KXRATECUT"},
            "markets": [
                {"ticker": "KXRATECUT-25DEC", "title": "Rate cut by December?",
                 "yes_bid_dollars": "0.41", "yes_ask_dollars": 0.44}
            ]
        }"#;
        let parsed: KalshiEventResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.markets.len(), 1);
        let market = &parsed.markets[0];
        assert_eq!(market.yes_bid_dollars.as_ref().unwrap().as_decimal(), Some(dec!(0.41)));
        assert_eq!(market.yes_ask_dollars.as_ref().unwrap().as_decimal(), Some(dec!(0.44)));
    }

    #[test]
    fn test_select_market_by_ticker() {
        let markets = vec![
            KalshiMarket {
                ticker: "KXRATECUT-25DEC".to_string(),
                title: None,
                subtitle: None,
                yes_sub_title: None,
                no_sub_title: None,
                yes_bid_dollars: None,
                yes_ask_dollars: None,
            },
            KalshiMarket {
                ticker: "KXRATECUT-26JAN".to_string(),
                title: None,
                subtitle: None,
                yes_sub_title: None,
                no_sub_title: None,
                yes_bid_dollars: None,
                yes_ask_dollars: None,
            },
        ];

        let found = select_market(&markets, &instrument("kxratecut-26jan", None)).unwrap();
        assert_eq!(found.ticker, "KXRATECUT-26JAN");
    }

    #[test]
    fn test_select_market_title_fallback() {
        let markets = vec![KalshiMarket {
            ticker: "KXRATECUT-25DEC".to_string(),
            title: Some("Rate cut – by December?".to_string()),
            subtitle: None,
            yes_sub_title: None,
            no_sub_title: None,
            yes_bid_dollars: None,
            yes_ask_dollars: None,
        }];

        let found = select_market(
            &markets,
            &instrument("WRONG-TICKER", Some("rate cut - by december?")),
        );
        assert!(found.is_some());

        let missing = select_market(&markets, &instrument("WRONG-TICKER", Some("unrelated")));
        assert!(missing.is_none());
    }

    #[test]
    fn test_select_market_no_sub_title_fallback() {
        // Some markets only carry the outcome subtitles.
        let markets = vec![KalshiMarket {
            ticker: "KXRATECUT-25DEC".to_string(),
            title: None,
            subtitle: None,
            yes_sub_title: None,
            no_sub_title: Some("No cut by December".to_string()),
            yes_bid_dollars: None,
            yes_ask_dollars: None,
        }];

        let found = select_market(
            &markets,
            &instrument("WRONG-TICKER", Some("no cut by december")),
        );
        assert!(found.is_some());
    }
}
