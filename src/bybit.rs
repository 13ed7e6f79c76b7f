//! Thin Bybit v5 REST client implementing the market-data and
//! account/execution contracts.
//!
//! Responses are normalized into strongly-typed values right here at the
//! boundary: numeric fields arrive as strings, histories arrive newest
//! first and are re-sorted ascending, and unrecognized entries are dropped
//! with a debug log. Every fetch is best effort and never propagates an
//! error into the decision engine.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::exchange::{AccountExecution, InstrumentFilters, MarketData, OrderOutcome, OrderRequest};
use crate::types::{Candle, PositionView, Side};

type HmacSha256 = Hmac<Sha256>;

const MAINNET_URL: &str = "https://api.bybit.com";
const TESTNET_URL: &str = "https://api-testnet.bybit.com";
const RECV_WINDOW: &str = "5000";

/// Bybit v5 session for linear perpetuals.
pub struct BybitClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    #[serde(default)]
    result: Value,
}

impl BybitClient {
    pub fn new(testnet: bool, api_key: String, api_secret: String) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let base_url = if testnet { TESTNET_URL } else { MAINNET_URL };
        Ok(Self {
            http,
            base_url: base_url.to_string(),
            api_key,
            api_secret,
        })
    }

    fn sign(&self, timestamp: &str, payload: &str) -> anyhow::Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| anyhow::anyhow!("failed to init signer: {e}"))?;
        mac.update(timestamp.as_bytes());
        mac.update(self.api_key.as_bytes());
        mac.update(RECV_WINDOW.as_bytes());
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn get_public(&self, path: &str, query: &[(&str, &str)]) -> anyhow::Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.http.get(&url).query(query).send().await?;
        let envelope: ApiEnvelope = resp.json().await?;
        if envelope.ret_code != 0 {
            anyhow::bail!("retCode={} retMsg={}", envelope.ret_code, envelope.ret_msg);
        }
        Ok(envelope.result)
    }

    async fn get_signed(&self, path: &str, query: &[(&str, &str)]) -> anyhow::Result<Value> {
        let query_string = query
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = self.sign(&timestamp, &query_string)?;
        let url = format!("{}{}?{}", self.base_url, path, query_string);
        let resp = self
            .http
            .get(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", &timestamp)
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", signature)
            .send()
            .await?;
        let envelope: ApiEnvelope = resp.json().await?;
        if envelope.ret_code != 0 {
            anyhow::bail!("retCode={} retMsg={}", envelope.ret_code, envelope.ret_msg);
        }
        Ok(envelope.result)
    }

    /// POST a signed request and return the full envelope as raw JSON plus
    /// the success flag (zero return code).
    async fn post_signed(&self, path: &str, body: &Value) -> anyhow::Result<(bool, Value)> {
        let payload = serde_json::to_string(body)?;
        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = self.sign(&timestamp, &payload)?;
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", &timestamp)
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW)
            .header("X-BAPI-SIGN", signature)
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await?;
        let raw: Value = resp.json().await?;
        let success = raw.get("retCode").and_then(Value::as_i64) == Some(0);
        Ok((success, raw))
    }

    /// Set symmetric leverage. Called once at startup; failures (including
    /// "leverage not modified") are tolerated.
    pub async fn set_leverage(&self, symbol: &str, leverage: u32) {
        let body = serde_json::json!({
            "category": "linear",
            "symbol": symbol,
            "buyLeverage": leverage.to_string(),
            "sellLeverage": leverage.to_string(),
        });
        match self.post_signed("/v5/position/set-leverage", &body).await {
            Ok((true, _)) => info!("Leverage set to {leverage}x for {symbol}"),
            Ok((false, raw)) => info!("set_leverage: {raw}"),
            Err(e) => info!("set_leverage: {e}"),
        }
    }
}

impl MarketData for BybitClient {
    async fn fetch_candles(&self, symbol: &str, interval: &str, limit: u32) -> Vec<Candle> {
        let limit = limit.to_string();
        let query = [
            ("category", "linear"),
            ("symbol", symbol),
            ("interval", interval),
            ("limit", limit.as_str()),
        ];
        match self.get_public("/v5/market/kline", &query).await {
            Ok(result) => parse_candles(&result),
            Err(e) => {
                warn!("fetch_candles error: {e}");
                Vec::new()
            }
        }
    }

    async fn fetch_open_interest(&self, symbol: &str) -> Vec<f64> {
        let query = [
            ("category", "linear"),
            ("symbol", symbol),
            ("intervalTime", "5min"),
        ];
        match self.get_public("/v5/market/open-interest", &query).await {
            Ok(result) => parse_open_interest(&result),
            Err(e) => {
                warn!("fetch_open_interest error: {e}");
                Vec::new()
            }
        }
    }

    async fn fetch_funding_rate(&self, symbol: &str) -> Option<f64> {
        let query = [("category", "linear"), ("symbol", symbol), ("limit", "1")];
        match self.get_public("/v5/market/funding/history", &query).await {
            Ok(result) => result
                .get("list")
                .and_then(Value::as_array)
                .and_then(|list| list.first())
                .and_then(|entry| value_as_f64(entry.get("fundingRate")?)),
            Err(e) => {
                warn!("fetch_funding_rate error: {e}");
                None
            }
        }
    }

    async fn fetch_basis(&self, symbol: &str) -> Option<f64> {
        let query = [
            ("category", "linear"),
            ("symbol", symbol),
            ("interval", "5"),
            ("limit", "1"),
        ];
        match self
            .get_public("/v5/market/premium-index-price-kline", &query)
            .await
        {
            Ok(result) => result
                .get("list")
                .and_then(Value::as_array)
                .and_then(|list| list.first())
                .and_then(|row| value_as_f64(row.get(4)?)),
            Err(e) => {
                warn!("fetch_basis error: {e}");
                None
            }
        }
    }

    async fn fetch_long_short_ratio(&self, symbol: &str) -> Vec<f64> {
        let query = [
            ("category", "linear"),
            ("symbol", symbol),
            ("period", "5min"),
        ];
        match self.get_public("/v5/market/account-ratio", &query).await {
            Ok(result) => parse_long_short_ratio(&result),
            Err(e) => {
                warn!("fetch_long_short_ratio error: {e}");
                Vec::new()
            }
        }
    }
}

impl AccountExecution for BybitClient {
    async fn open_position(&self, symbol: &str) -> Option<PositionView> {
        let query = [("category", "linear"), ("symbol", symbol)];
        let result = match self.get_signed("/v5/position/list", &query).await {
            Ok(result) => result,
            Err(e) => {
                warn!("open_position error: {e}");
                return None;
            }
        };
        let list = result.get("list").and_then(Value::as_array)?;
        for entry in list {
            let size = entry.get("size").and_then(value_as_f64).unwrap_or(0.0);
            if size.abs() <= 0.0 {
                continue;
            }
            let side = match entry.get("side").and_then(Value::as_str) {
                Some("Buy") => Side::Buy,
                Some("Sell") => Side::Sell,
                other => {
                    debug!("Skipping position with unrecognized side {other:?}");
                    continue;
                }
            };
            let avg_price = entry.get("avgPrice").and_then(value_as_f64).unwrap_or(0.0);
            return Some(PositionView {
                side,
                size,
                avg_price,
            });
        }
        None
    }

    async fn available_balance(&self, coin: &str) -> f64 {
        let query = [("accountType", "UNIFIED")];
        let result = match self.get_signed("/v5/account/wallet-balance", &query).await {
            Ok(result) => result,
            Err(e) => {
                warn!("available_balance error: {e}");
                return 0.0;
            }
        };
        result
            .get("list")
            .and_then(Value::as_array)
            .and_then(|list| list.first())
            .and_then(|account| account.get("coin")?.as_array())
            .and_then(|coins| {
                coins
                    .iter()
                    .find(|c| c.get("coin").and_then(Value::as_str) == Some(coin))
            })
            .and_then(|c| value_as_f64(c.get("availableToTrade")?.get("walletBalance")?))
            .unwrap_or(0.0)
    }

    async fn equity(&self) -> Option<f64> {
        let query = [("accountType", "UNIFIED")];
        let result = match self.get_signed("/v5/account/wallet-balance", &query).await {
            Ok(result) => result,
            Err(e) => {
                warn!("equity error: {e}");
                return None;
            }
        };
        result
            .get("list")
            .and_then(Value::as_array)
            .and_then(|list| list.first())
            .and_then(|account| value_as_f64(account.get("totalEquity")?))
    }

    async fn instrument_filters(&self, symbol: &str) -> Option<InstrumentFilters> {
        let query = [("category", "linear"), ("symbol", symbol)];
        let result = match self.get_public("/v5/market/instruments-info", &query).await {
            Ok(result) => result,
            Err(e) => {
                warn!("instrument_filters error: {e}");
                return None;
            }
        };
        let lot = result
            .get("list")
            .and_then(Value::as_array)
            .and_then(|list| list.first())
            .and_then(|info| info.get("lotSizeFilter"))?;
        let defaults = InstrumentFilters::default();
        Some(InstrumentFilters {
            qty_step: lot
                .get("qtyStep")
                .and_then(value_as_f64)
                .unwrap_or(defaults.qty_step),
            min_qty: lot
                .get("minOrderQty")
                .and_then(value_as_f64)
                .unwrap_or(defaults.min_qty),
            min_order_value: lot
                .get("minOrderAmt")
                .and_then(value_as_f64)
                .unwrap_or(defaults.min_order_value),
        })
    }

    async fn place_market_order(&self, order: &OrderRequest) -> OrderOutcome {
        let mut body = serde_json::json!({
            "category": "linear",
            "symbol": order.symbol,
            "side": order.side.as_str(),
            "orderType": "Market",
            "qty": fmt_qty(order.qty),
            "timeInForce": "GoodTillCancel",
            "reduceOnly": order.reduce_only,
        });
        if let Some(sl) = order.stop_loss {
            body["stopLoss"] = Value::String(fmt_price(sl));
        }
        if let Some(tp) = order.take_profit {
            body["takeProfit"] = Value::String(fmt_price(tp));
        }
        match self.post_signed("/v5/order/create", &body).await {
            Ok((success, raw)) => {
                if success {
                    info!("place_market_order ok: {} {} {}", order.side, order.qty, order.symbol);
                } else {
                    warn!("place_market_order rejected: {raw}");
                }
                OrderOutcome { success, raw }
            }
            Err(e) => {
                warn!("place_market_order error: {e}");
                OrderOutcome::failed(serde_json::json!({ "error": e.to_string() }))
            }
        }
    }

    async fn set_stop_loss(&self, symbol: &str, price: f64) -> bool {
        let body = serde_json::json!({
            "category": "linear",
            "symbol": symbol,
            "stopLoss": fmt_price(price),
        });
        match self.post_signed("/v5/position/trading-stop", &body).await {
            Ok((true, _)) => true,
            Ok((false, raw)) => {
                warn!("set_stop_loss rejected: {raw}");
                false
            }
            Err(e) => {
                warn!("set_stop_loss error: {e}");
                false
            }
        }
    }
}

/// Quantity string with at most 6 decimals and no trailing zeros.
fn fmt_qty(qty: f64) -> String {
    fmt_decimal(qty, 6)
}

/// Price string with at most 2 decimals.
fn fmt_price(price: f64) -> String {
    fmt_decimal(price, 2)
}

fn fmt_decimal(value: f64, dp: u32) -> String {
    match Decimal::from_f64(value) {
        Some(d) => d.round_dp(dp).normalize().to_string(),
        None => value.to_string(),
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Kline rows are `[startMs, open, high, low, close, volume, turnover]`
/// string arrays, newest first; re-sorted ascending here.
fn parse_candles(result: &Value) -> Vec<Candle> {
    let Some(list) = result.get("list").and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut candles: Vec<Candle> = list
        .iter()
        .filter_map(|row| {
            let row = row.as_array()?;
            let ts_ms: i64 = row.first().and_then(value_as_f64)? as i64;
            let timestamp = Utc.timestamp_millis_opt(ts_ms).single()?;
            Some(Candle {
                timestamp,
                open: value_as_f64(row.get(1)?)?,
                high: value_as_f64(row.get(2)?)?,
                low: value_as_f64(row.get(3)?)?,
                close: value_as_f64(row.get(4)?)?,
                volume: value_as_f64(row.get(5)?)?,
                turnover: row.get(6).and_then(value_as_f64).unwrap_or(0.0),
            })
        })
        .collect();
    candles.sort_by_key(|c| c.timestamp);
    candles
}

/// Open-interest entries are `{openInterest, timestamp}` objects, newest
/// first. Unrecognized entries are dropped explicitly.
fn parse_open_interest(result: &Value) -> Vec<f64> {
    let Some(list) = result.get("list").and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut entries: Vec<(i64, f64)> = list
        .iter()
        .filter_map(|entry| {
            let oi = entry.get("openInterest").and_then(value_as_f64);
            let ts = entry.get("timestamp").and_then(value_as_f64);
            match (oi, ts) {
                (Some(oi), Some(ts)) => Some((ts as i64, oi)),
                _ => {
                    debug!("Dropping malformed open-interest entry: {entry}");
                    None
                }
            }
        })
        .collect();
    entries.sort_by_key(|(ts, _)| *ts);
    entries.into_iter().map(|(_, oi)| oi).collect()
}

/// Account-ratio entries carry `buyRatio`/`sellRatio`; normalized to a
/// single long/short ratio per point, ascending by time.
fn parse_long_short_ratio(result: &Value) -> Vec<f64> {
    let Some(list) = result.get("list").and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut entries: Vec<(i64, f64)> = list
        .iter()
        .filter_map(|entry| {
            let buy = entry.get("buyRatio").and_then(value_as_f64)?;
            let sell = entry.get("sellRatio").and_then(value_as_f64)?;
            let ts = entry.get("timestamp").and_then(value_as_f64)? as i64;
            if sell <= 0.0 {
                return None;
            }
            Some((ts, buy / sell))
        })
        .collect();
    entries.sort_by_key(|(ts, _)| *ts);
    entries.into_iter().map(|(_, ratio)| ratio).collect()
}
