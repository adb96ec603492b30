//! Polymarket (Gamma API) market-data client.
//!
//! Fetches the event payload (`GET /events/{event_id}`), selects the
//! configured market id, and normalizes `bestBid` / `bestAsk` into a
//! `Quote`. When the top-of-book fields are absent the stringified
//! `outcomePrices` array is used as a fallback. `updatedAt` supplies the
//! remote timestamp so stale payloads fail validation downstream.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use arb_common::{Instrument, Quote, Venue};

use crate::wire::{normalize_title, parse_outcome_prices, IdField, PriceField};
use crate::{MarketFetcher, TransportError};

/// Production Gamma API base URL.
const DEFAULT_GAMMA_URL: &str = "https://gamma-api.polymarket.com";

#[derive(Debug, Deserialize)]
struct GammaEventResponse {
    #[serde(default)]
    markets: Vec<GammaMarket>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GammaMarket {
    pub(crate) id: IdField,
    #[serde(default)]
    pub(crate) question: Option<String>,
    #[serde(default)]
    pub(crate) group_item_title: Option<String>,
    #[serde(default)]
    pub(crate) slug: Option<String>,
    #[serde(default)]
    pub(crate) best_bid: Option<PriceField>,
    #[serde(default)]
    pub(crate) best_ask: Option<PriceField>,
    #[serde(default)]
    pub(crate) outcome_prices: Option<String>,
    #[serde(default)]
    pub(crate) updated_at: Option<String>,
}

impl GammaMarket {
    fn display_title(&self) -> Option<&str> {
        [&self.group_item_title, &self.question, &self.slug]
            .into_iter()
            .flatten()
            .map(|s| s.as_str())
            .find(|s| !s.trim().is_empty())
    }

    /// Top of book, preferring explicit best bid/ask over the
    /// `outcomePrices` fallback.
    fn top_of_book(&self) -> Option<(Decimal, Decimal)> {
        let bid = self.best_bid.as_ref().and_then(PriceField::as_decimal);
        let ask = self.best_ask.as_ref().and_then(PriceField::as_decimal);
        if let (Some(bid), Some(ask)) = (bid, ask) {
            return Some((bid, ask));
        }
        parse_outcome_prices(self.outcome_prices.as_deref()?)
    }
}

/// HTTP fetcher for the Polymarket leg of each pair.
pub struct PolymarketFetcher {
    http: Client,
    base_url: String,
}

impl PolymarketFetcher {
    /// Create a fetcher against the production Gamma API.
    pub fn new() -> Self {
        Self::with_url(DEFAULT_GAMMA_URL)
    }

    /// Create a fetcher with a custom base URL (tests, proxies).
    pub fn with_url(base_url: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for PolymarketFetcher {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn select_market<'a>(
    markets: &'a [GammaMarket],
    instrument: &Instrument,
) -> Option<&'a GammaMarket> {
    if let Some(found) = markets
        .iter()
        .find(|m| m.id.as_string().eq_ignore_ascii_case(&instrument.market_id))
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
impl MarketFetcher for PolymarketFetcher {
    fn venue(&self) -> Venue {
        Venue::Polymarket
    }

    async fn fetch(
        &self,
        instrument: &Instrument,
        deadline: Duration,
    ) -> Result<Quote, TransportError> {
        let url = format!("{}/events/{}", self.base_url, instrument.event_id);
        debug!(url = %url, market = %instrument.market_id, "Fetching Polymarket event");

        let response = self
            .http
            .get(&url)
            .timeout(deadline)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(e, deadline))?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TransportError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let event: GammaEventResponse = response
            .json()
            .await
            .map_err(|e| TransportError::from_reqwest(e, deadline))?;

        let market = select_market(&event.markets, instrument).ok_or_else(|| {
            TransportError::Decode(format!(
                "market {} not present in event {}",
                instrument.market_id, instrument.event_id
            ))
        })?;

        let (bid, ask) = market
            .top_of_book()
            .ok_or_else(|| TransportError::Decode("no usable bid/ask in payload".to_string()))?;

        let local = Utc::now();
        let remote = market
            .updated_at
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or(local);

        Ok(Quote {
            venue: Venue::Polymarket,
            instrument: market.id.as_string(),
            bid,
            ask,
            remote_timestamp: remote,
            local_timestamp: local,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn instrument(market_id: &str, title: Option<&str>) -> Instrument {
        Instrument {
            event_id: "58873".to_string(),
            market_id: market_id.to_string(),
            title_hint: title.map(str::to_string),
        }
    }

    #[test]
    fn test_parse_event_payload() {
        let json = r#"{
            "id": "58873",
            "markets": [
                {"id": 512233, "question": "Fed rate cut?",
                 "bestBid": 0.41, "bestAsk": "0.44",
                 "updatedAt": "2026-08-02T10:00:00Z"}
            ]
        }"#;
        let parsed: GammaEventResponse = serde_json::from_str(json).unwrap();
        let market = &parsed.markets[0];
        assert_eq!(market.id.as_string(), "512233");
        assert_eq!(market.top_of_book(), Some((dec!(0.41), dec!(0.44))));
    }

    #[test]
    fn test_outcome_prices_fallback() {
        let json = r#"{"id": "99", "outcomePrices": "[\"0.37\", \"0.63\"]"}"#;
        let market: GammaMarket = serde_json::from_str(json).unwrap();
        assert_eq!(market.top_of_book(), Some((dec!(0.37), dec!(0.63))));
    }

    #[test]
    fn test_no_usable_prices() {
        let json = r#"{"id": "99", "question": "anything"}"#;
        let market: GammaMarket = serde_json::from_str(json).unwrap();
        assert_eq!(market.top_of_book(), None);
    }

    #[test]
    fn test_select_market_by_id_then_title() {
        let markets: Vec<GammaMarket> = serde_json::from_str(
            r#"[
                {"id": "1", "question": "First market"},
                {"id": "2", "groupItemTitle": "Second – market"}
            ]"#,
        )
        .unwrap();

        let by_id = select_market(&markets, &instrument("2", None)).unwrap();
        assert_eq!(by_id.id.as_string(), "2");

        let by_title = select_market(&markets, &instrument("404", Some("second - market"))).unwrap();
        assert_eq!(by_title.id.as_string(), "2");

        assert!(select_market(&markets, &instrument("404", None)).is_none());
    }
}
