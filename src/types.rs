//! Core market data types shared across the engine.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One OHLCV candle as reported by the exchange, ascending by timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub turnover: f64,
}

/// Position side. Uses the exchange's Buy/Sell vocabulary for linear
/// perpetuals: Buy holds a long, Sell holds a short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side that reduces a position held on `self`.
    pub fn closing(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exchange microstructure metrics, normalized to plain numeric series at
/// the client boundary. Every field is optional/empty on fetch failure and
/// degrades to a neutral contribution downstream.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    /// Open interest history, ascending by time.
    pub open_interest: Vec<f64>,
    /// Latest funding rate.
    pub funding: Option<f64>,
    /// Latest basis (premium-index close).
    pub basis: Option<f64>,
    /// Long/short account ratio history, ascending by time.
    pub long_short_ratio: Vec<f64>,
}

/// Open position as reported by the exchange at read time. Authoritative
/// and re-fetched every cycle, never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionView {
    pub side: Side,
    pub size: f64,
    pub avg_price: f64,
}

/// What the decision loop remembers about last cycle's position.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSnapshot {
    pub side: Side,
    pub size: f64,
    pub entry_price: f64,
}

impl PositionSnapshot {
    pub fn of(view: &PositionView) -> Self {
        Self {
            side: view.side,
            size: view.size,
            entry_price: view.avg_price,
        }
    }
}

/// Typed previous-vs-current position diff, computed once per cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionDelta {
    Unchanged,
    /// A position appeared that last cycle did not have.
    Opened(PositionSnapshot),
    /// Last cycle's position is gone; carries the inferred realized PnL
    /// against the current mark price.
    Closed { last: PositionSnapshot, pnl: f64 },
}

/// Diff the previous snapshot against the freshly fetched position.
/// `price` is the current mark used to infer PnL on a full exit.
pub fn diff_positions(
    prev: Option<&PositionSnapshot>,
    current: Option<&PositionView>,
    price: f64,
) -> PositionDelta {
    match (prev, current) {
        (Some(last), None) => {
            let pnl = match last.side {
                Side::Buy => last.size * (price - last.entry_price),
                Side::Sell => last.size * (last.entry_price - price),
            };
            PositionDelta::Closed {
                last: last.clone(),
                pnl,
            }
        }
        (None, Some(view)) => PositionDelta::Opened(PositionSnapshot::of(view)),
        _ => PositionDelta::Unchanged,
    }
}

/// Round to `dp` decimal places with banker's rounding.
pub fn round_dp(value: f64, dp: u32) -> f64 {
    match Decimal::from_f64(value) {
        Some(d) => d.round_dp(dp).to_f64().unwrap_or(value),
        None => value,
    }
}

/// Floor `value` to an exact multiple of `step`; identity when `step <= 0`.
/// Quantized in decimal arithmetic so binary float noise cannot push a
/// quantity one step below an exact boundary.
pub fn round_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    match (Decimal::from_f64(value), Decimal::from_f64(step)) {
        (Some(v), Some(s)) if !s.is_zero() => {
            ((v / s).floor() * s).to_f64().unwrap_or(value)
        }
        _ => (value / step).floor() * step,
    }
}
