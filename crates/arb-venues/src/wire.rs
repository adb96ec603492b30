//! Wire-format helpers shared by the venue clients.
//!
//! Venue payloads are loose about types: prices arrive as JSON numbers or
//! quoted strings, and Polymarket sometimes only carries a stringified
//! `outcomePrices` array. Everything is normalized to `Decimal` here.

use rust_decimal::Decimal;
use serde::Deserialize;

/// A price field that may be a JSON number or a (possibly quoted) string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum PriceField {
    Num(f64),
    Str(String),
}

impl PriceField {
    pub(crate) fn as_decimal(&self) -> Option<Decimal> {
        match self {
            PriceField::Num(v) => Decimal::try_from(*v).ok(),
            PriceField::Str(s) => s.trim().trim_matches('"').parse().ok(),
        }
    }
}

/// An id field that may be a JSON number or string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum IdField {
    Num(i64),
    Str(String),
}

impl IdField {
    pub(crate) fn as_string(&self) -> String {
        match self {
            IdField::Num(v) => v.to_string(),
            IdField::Str(s) => s.trim().to_string(),
        }
    }
}

/// Lowercases, collapses whitespace, and normalizes the dash/degree
/// variants venues disagree on. Used for title fallback matching.
pub(crate) fn normalize_title(title: &str) -> String {
    let mut normalized = title.trim().to_lowercase();
    for (needle, replacement) in [("–", "-"), ("—", "-"), ("°f", "°"), (" °", "°")] {
        normalized = normalized.replace(needle, replacement);
    }
    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses a stringified two-element price array like `'["0.4","0.63"]'`.
///
/// Returns `(min, max)` as `(bid, ask)`; `None` unless at least two values
/// parse.
pub(crate) fn parse_outcome_prices(raw: &str) -> Option<(Decimal, Decimal)> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('[') {
        return None;
    }
    let values: Vec<Decimal> = trimmed
        .trim_matches(['[', ']'])
        .split(',')
        .filter_map(|part| part.trim().trim_matches('"').parse().ok())
        .collect();
    if values.len() < 2 {
        return None;
    }
    let min = values.iter().min().copied()?;
    let max = values.iter().max().copied()?;
    Some((min, max))
}
