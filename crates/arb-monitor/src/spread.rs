//! Bi-directional net-spread calculation.
//!
//! Both directions are evaluated on every tick. Both being positive at
//! once means the venues' books cross after costs, which is a pricing
//! pathology worth flagging; each direction still proceeds independently.

use rust_decimal::Decimal;

use arb_common::{Direction, Quote};

use crate::cost::CostModel;

/// Net spread for both round-trip directions of one observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetSpread {
    /// Total cost deducted from both directions.
    pub cost_total: Decimal,
    /// Buy Kalshi at the ask, sell Polymarket at the bid.
    pub buy_kalshi_sell_poly: Decimal,
    /// Buy Polymarket at the ask, sell Kalshi at the bid.
    pub buy_poly_sell_kalshi: Decimal,
}

impl NetSpread {
    /// Net spread in the given direction.
    pub fn in_direction(&self, direction: Direction) -> Decimal {
        match direction {
            Direction::KalshiToPoly => self.buy_kalshi_sell_poly,
            Direction::PolyToKalshi => self.buy_poly_sell_kalshi,
        }
    }

    /// Both directions positive at once: a crossed book after costs.
    pub fn is_crossed(&self) -> bool {
        self.buy_kalshi_sell_poly > Decimal::ZERO && self.buy_poly_sell_kalshi > Decimal::ZERO
    }
}

/// Combines two validated quotes into a `NetSpread`.
#[derive(Debug, Clone)]
pub struct SpreadEngine {
    cost_model: CostModel,
}

impl SpreadEngine {
    pub fn new(cost_model: CostModel) -> Self {
        Self { cost_model }
    }

    pub fn evaluate(&self, kalshi: &Quote, poly: &Quote) -> NetSpread {
        let cost_total = self.cost_model.total_cost(kalshi, poly);
        NetSpread {
            cost_total,
            buy_kalshi_sell_poly: poly.bid - kalshi.ask - cost_total,
            buy_poly_sell_kalshi: kalshi.bid - poly.ask - cost_total,
        }
    }
}
