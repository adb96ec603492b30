//! Cent-precision money helpers.
//!
//! Exchange fees round *up* to the next whole cent, never banker's rounding.
//! Spreads and costs are carried as `Decimal` at cent precision throughout;
//! f64 only ever appears at display boundaries.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Rounds a dollar amount up to the next whole cent.
///
/// `ceil_cents(0.0175) == 0.02`, `ceil_cents(0.0300) == 0.03`.
pub fn ceil_cents(amount: Decimal) -> Decimal {
    (amount * dec!(100)).ceil() / dec!(100)
}
