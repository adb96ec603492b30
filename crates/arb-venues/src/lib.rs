//! Market-data clients for the two monitored venues.
//!
//! This crate provides the `MarketFetcher` trait that abstracts where a
//! quote comes from. The same pipeline code works with:
//! - Live HTTP clients (`KalshiFetcher`, `PolymarketFetcher`)
//! - Scripted in-memory fetchers for tests and replay
//!
//! Fetches for distinct (venue, instrument) pairs are independent and may
//! run concurrently. Every error is classified: the scheduler's backoff
//! logic depends on HTTP 429 mapping to `TransportError::RateLimited`.

pub mod kalshi;
pub mod polymarket;
mod wire;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use arb_common::{Instrument, Quote, Venue};

pub use kalshi::KalshiFetcher;
pub use polymarket::PolymarketFetcher;

/// Errors that can occur while fetching a quote.
///
/// `RateLimited` is load-bearing: it drives the polling backoff state
/// machine and is excluded from per-pair failure counting.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Venue returned HTTP 429.
    #[error("rate limited by venue")]
    RateLimited,

    /// The request did not complete before the deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection-level failure (DNS, TCP, TLS).
    #[error("network error: {0}")]
    Network(String),

    /// Non-success HTTP status other than 429/401/403.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Response body could not be decoded into a usable quote.
    #[error("decode error: {0}")]
    Decode(String),

    /// Venue rejected our credentials.
    #[error("authentication failed: {0}")]
    AuthN(String),
}

impl TransportError {
    /// Stable tag used in structured error-log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::RateLimited => "rate_limited",
            TransportError::Timeout(_) => "timeout",
            TransportError::Network(_) => "network",
            TransportError::Http { .. } => "http",
            TransportError::Decode(_) => "decode",
            TransportError::AuthN(_) => "authn",
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TransportError::RateLimited)
    }

    /// HTTP status carried by the error, when there is one.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            TransportError::RateLimited => Some(429),
            TransportError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classifies a reqwest failure that happened before a status line
    /// was available.
    pub(crate) fn from_reqwest(err: reqwest::Error, deadline: Duration) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(deadline)
        } else if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Capability consumed by the scheduler: fetch one top-of-book quote.
#[async_trait]
pub trait MarketFetcher: Send + Sync {
    /// The venue this fetcher talks to.
    fn venue(&self) -> Venue;

    /// Fetch the current quote for `instrument`, giving up after
    /// `deadline`.
    ///
    /// Implementations never return a `Quote` for a failed transport;
    /// every failure maps onto a `TransportError` kind.
    async fn fetch(&self, instrument: &Instrument, deadline: Duration)
        -> Result<Quote, TransportError>;
}
