//! Data-quality validation for venue quotes.
//!
//! Pure: a quote either satisfies every precondition or is rejected with
//! the first reason found. Transport failures never get this far; they are
//! classified at the fetch layer.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

use arb_common::Quote;

/// Lowest plausible price for a live binary contract.
pub const MIN_PRICE: Decimal = dec!(0.01);
/// Highest plausible price for a live binary contract.
pub const MAX_PRICE: Decimal = dec!(0.99);
/// Maximum tolerated skew between the venue clock and ours.
pub const MAX_CLOCK_SKEW_SECONDS: i64 = 10;

/// Reasons a quote fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} {value} outside [0.01, 0.99]")]
    PriceOutOfRange { field: &'static str, value: Decimal },

    #[error("inverted book: bid {bid} > ask {ask}")]
    InvertedBook { bid: Decimal, ask: Decimal },

    #[error("stale quote: clock skew {skew_seconds}s exceeds 10s")]
    StaleQuote { skew_seconds: i64 },
}

impl ValidationError {
    /// Stale quotes surface as STALE observations; everything else is a
    /// hard data error.
    pub fn is_stale(&self) -> bool {
        matches!(self, ValidationError::StaleQuote { .. })
    }
}

/// Checks every quote precondition, cheapest first.
pub fn validate(quote: &Quote) -> Result<(), ValidationError> {
    if quote.bid < MIN_PRICE || quote.bid > MAX_PRICE {
        return Err(ValidationError::PriceOutOfRange {
            field: "bid",
            value: quote.bid,
        });
    }
    if quote.ask < MIN_PRICE || quote.ask > MAX_PRICE {
        return Err(ValidationError::PriceOutOfRange {
            field: "ask",
            value: quote.ask,
        });
    }
    if quote.bid > quote.ask {
        return Err(ValidationError::InvertedBook {
            bid: quote.bid,
            ask: quote.ask,
        });
    }

    let skew = quote.clock_skew_seconds();
    if skew >= MAX_CLOCK_SKEW_SECONDS {
        return Err(ValidationError::StaleQuote { skew_seconds: skew });
    }

    Ok(())
}
