//! Fee and friction model for a cross-venue round trip.
//!
//! Kalshi charges per-fill fees that scale with `p·(1−p)` and round up to
//! the next whole cent. A round trip there is assumed to cross the book
//! once (taker) and rest once (maker). Polymarket friction is the current
//! book spread plus gas on entry and exit.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use arb_common::{ceil_cents, Quote};

use crate::config::CostConfig;

/// Kalshi taker fee rate.
const TAKER_RATE: Decimal = dec!(0.07);
/// Kalshi maker fee rate.
const MAKER_RATE: Decimal = dec!(0.0175);

/// Computes the total cost charged against a candidate round trip.
#[derive(Debug, Clone)]
pub struct CostModel {
    gas_fee_per_trade_usd: Decimal,
    contract_size: Decimal,
}

impl CostModel {
    pub fn new(gas_fee_per_trade_usd: Decimal, contract_size: Decimal) -> Self {
        Self {
            gas_fee_per_trade_usd,
            contract_size,
        }
    }

    pub fn from_config(config: &CostConfig) -> Self {
        Self::new(config.gas_fee_per_trade_usd, config.contract_size)
    }

    /// Taker fee for one fill at price `p`, ceiling-rounded to a cent.
    pub fn taker_fee(&self, p: Decimal) -> Decimal {
        ceil_cents(TAKER_RATE * self.contract_size * p * (Decimal::ONE - p))
    }

    /// Maker fee for one fill at price `p`, ceiling-rounded to a cent.
    pub fn maker_fee(&self, p: Decimal) -> Decimal {
        ceil_cents(MAKER_RATE * self.contract_size * p * (Decimal::ONE - p))
    }

    /// Kalshi round trip: one taker fill plus one maker fill at `p`.
    pub fn kalshi_round_trip(&self, p: Decimal) -> Decimal {
        self.taker_fee(p) + self.maker_fee(p)
    }

    /// Total round-trip cost for one observation.
    ///
    /// The Kalshi fee leg is evaluated at the Kalshi bid; Polymarket
    /// friction is its current book spread plus doubled gas.
    pub fn total_cost(&self, kalshi: &Quote, poly: &Quote) -> Decimal {
        self.kalshi_round_trip(kalshi.bid)
            + poly.book_spread()
            + dec!(2) * self.gas_fee_per_trade_usd
    }
}
