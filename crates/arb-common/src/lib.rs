//! Shared types and utilities for the arbitrage window monitor.
//!
//! This crate contains:
//! - Common types (Venue, Direction, MarketPair, Quote, OpportunityWindow)
//! - Money helpers (cent-precision rounding for fee arithmetic)
//!
//! CRITICAL: All prices and spreads use `rust_decimal::Decimal`.
//! NEVER use f64 for financial math.

pub mod money;
pub mod types;

pub use money::ceil_cents;
pub use types::*;
