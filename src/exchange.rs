//! Typed contracts between the decision engine and its external
//! collaborators: market data, account/execution, and the operator channel.
//!
//! Every market-data call is best effort: failures come back as empty or
//! absent values, never as errors the core has to handle. Execution calls
//! report success explicitly; anything else means the caller must assume
//! no side effect happened.

use serde::{Deserialize, Serialize};

use crate::types::{Candle, PositionView, Side};

/// Exchange lot-size constraints for a symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InstrumentFilters {
    pub qty_step: f64,
    pub min_qty: f64,
    pub min_order_value: f64,
}

impl Default for InstrumentFilters {
    fn default() -> Self {
        Self {
            qty_step: 0.001,
            min_qty: 0.001,
            min_order_value: 5.0,
        }
    }
}

/// A market order request. Stops ride along on entries; reduce-only is
/// used for partial closes.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub qty: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub reduce_only: bool,
}

/// Outcome of an order submission. `success` is true only for a zero
/// return code; `raw` carries the exchange response for logging.
#[derive(Debug, Clone)]
pub struct OrderOutcome {
    pub success: bool,
    pub raw: serde_json::Value,
}

impl OrderOutcome {
    pub fn failed(raw: serde_json::Value) -> Self {
        Self {
            success: false,
            raw,
        }
    }
}

/// Market data provider.
#[allow(async_fn_in_trait)]
pub trait MarketData {
    /// Candles ascending by timestamp; empty on any failure.
    async fn fetch_candles(&self, symbol: &str, interval: &str, limit: u32) -> Vec<Candle>;
    /// Open interest history ascending by time; empty on failure.
    async fn fetch_open_interest(&self, symbol: &str) -> Vec<f64>;
    async fn fetch_funding_rate(&self, symbol: &str) -> Option<f64>;
    /// Latest basis (premium-index close); absent on failure.
    async fn fetch_basis(&self, symbol: &str) -> Option<f64>;
    /// Long/short account ratio history ascending by time.
    async fn fetch_long_short_ratio(&self, symbol: &str) -> Vec<f64>;
}

/// Account state and order execution provider.
#[allow(async_fn_in_trait)]
pub trait AccountExecution {
    /// The open position for `symbol`, if any. Authoritative; `None` both
    /// for "no position" and for a failed query.
    async fn open_position(&self, symbol: &str) -> Option<PositionView>;
    /// Available balance for `coin`; 0.0 on failure.
    async fn available_balance(&self, coin: &str) -> f64;
    /// Total account equity.
    async fn equity(&self) -> Option<f64>;
    async fn instrument_filters(&self, symbol: &str) -> Option<InstrumentFilters>;
    async fn place_market_order(&self, order: &OrderRequest) -> OrderOutcome;
    /// Move the position's stop loss. Returns whether the exchange
    /// accepted the new level.
    async fn set_stop_loss(&self, symbol: &str, price: f64) -> bool;
}

/// One-way operator surface: a kill switch the loop polls every cycle and
/// a fire-and-forget notification sink.
#[allow(async_fn_in_trait)]
pub trait OperatorChannel {
    fn is_trading_enabled(&self) -> bool;
    async fn notify(&self, text: &str);
}
