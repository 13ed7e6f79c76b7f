//! Position sizing, initial stop/target levels and the stop/target
//! lifecycle over an open position: breakeven promotion, trailing-stop
//! ratcheting and one-shot partial take-profits.

use tracing::{debug, info, warn};

use crate::config::{RiskConfig, TrailingMode};
use crate::exchange::{AccountExecution, InstrumentFilters, OrderRequest};
use crate::indicators::FeatureRow;
use crate::state::StateStore;
use crate::types::{round_dp, round_step, Side};

/// Size an entry so that a 1%-of-price adverse move costs `equity *
/// risk_pct`, bumped up to the exchange minimum notional and floored to
/// the lot step. The caller still clamps against available balance.
pub fn compute_position_size(
    equity: f64,
    price: f64,
    risk_pct: f64,
    filters: &InstrumentFilters,
) -> f64 {
    if price <= 0.0 || equity <= 0.0 {
        return 0.0;
    }
    let risk_capital = equity * risk_pct;
    let mut raw_qty = (risk_capital / (price * 0.01)).max(filters.min_qty);
    if raw_qty * price < filters.min_order_value {
        raw_qty = filters.min_order_value / price;
    }
    let qty = round_step(raw_qty, filters.qty_step).max(filters.min_qty);
    round_dp(qty, 6)
}

/// Initial stop-loss and the two take-profit levels for an entry at
/// `price`. ATR multiples when an ATR is available, fixed percentage
/// offsets otherwise. All levels rounded to 2 decimals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopTargets {
    pub stop_loss: f64,
    pub tp1: f64,
    pub tp2: f64,
}

pub fn compute_initial_stops(
    price: f64,
    side: Side,
    atr: Option<f64>,
    cfg: &RiskConfig,
) -> StopTargets {
    let (sl, tp1, tp2) = match atr {
        Some(atr) if atr > 0.0 => match side {
            Side::Buy => (
                price - cfg.atr_k_sl * atr,
                price + cfg.atr_k_tp1 * atr,
                price + cfg.atr_k_tp2 * atr,
            ),
            Side::Sell => (
                price + cfg.atr_k_sl * atr,
                price - cfg.atr_k_tp1 * atr,
                price - cfg.atr_k_tp2 * atr,
            ),
        },
        _ => match side {
            Side::Buy => (
                price * (1.0 - cfg.fallback_sl_pct),
                price * (1.0 + cfg.fallback_tp_pct),
                price * (1.0 + 2.0 * cfg.fallback_tp_pct),
            ),
            Side::Sell => (
                price * (1.0 + cfg.fallback_sl_pct),
                price * (1.0 - cfg.fallback_tp_pct),
                price * (1.0 - 2.0 * cfg.fallback_tp_pct),
            ),
        },
    };
    StopTargets {
        stop_loss: round_dp(sl, 2),
        tp1: round_dp(tp1, 2),
        tp2: round_dp(tp2, 2),
    }
}

/// Trailing-stop candidate for the current row: an ATR offset from price,
/// or the SuperTrend band on the loss side (default mode).
pub fn trailing_stop_candidate(
    side: Side,
    price: f64,
    row: &FeatureRow,
    mode: TrailingMode,
    trail_k_atr: f64,
) -> Option<f64> {
    match mode {
        TrailingMode::Atr => {
            let atr = row.atr.filter(|a| *a > 0.0)?;
            Some(match side {
                Side::Buy => price - trail_k_atr * atr,
                Side::Sell => price + trail_k_atr * atr,
            })
        }
        TrailingMode::Supertrend => match side {
            Side::Buy => row.supertrend_lower,
            Side::Sell => row.supertrend_upper,
        },
    }
}

/// Scale-in gate: the new trailing candidate must have tightened relative
/// to the previously persisted stop (same direction test as the ratchet).
pub fn should_add_position(
    side: Side,
    price: f64,
    row: &FeatureRow,
    prev_stop: Option<f64>,
    mode: TrailingMode,
    trail_k_atr: f64,
) -> bool {
    let Some(prev) = prev_stop else {
        return false;
    };
    let Some(new_stop) = trailing_stop_candidate(side, price, row, mode, trail_k_atr) else {
        return false;
    };
    match side {
        Side::Buy => new_stop >= prev,
        Side::Sell => new_stop <= prev,
    }
}

/// A partial take-profit fill, reported through the lifecycle hook.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialFill {
    /// Which leg fired.
    pub leg: PartialLeg,
    /// Side of the reduce-only close order.
    pub side: Side,
    pub qty: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialLeg {
    Tp1,
    Tp2,
}

/// Re-evaluate the stop/target lifecycle for an open position.
///
/// The whole step is a no-op while the ATR is missing or non-positive.
/// The exchange-side stop only ever moves when the desired level is
/// strictly more protective than the persisted one; partial take-profits
/// latch through the persistent flags so each leg fires at most once per
/// position lifetime. Order failures are logged and leave the persisted
/// state untouched, so the next cycle retries naturally.
#[allow(clippy::too_many_arguments)]
pub async fn update_stops_and_partials<E: AccountExecution>(
    exchange: &E,
    store: &StateStore,
    cfg: &RiskConfig,
    symbol: &str,
    side: Side,
    entry_price: f64,
    position_qty: f64,
    price: f64,
    row: &FeatureRow,
    lot_step: f64,
    on_partial: &mut dyn FnMut(PartialFill),
) -> anyhow::Result<()> {
    let Some(atr) = row.atr.filter(|a| *a > 0.0) else {
        return Ok(());
    };

    // Seed the record for positions that predate this process.
    let mut state = store.symbol(symbol);
    if state.entry_price.is_none() {
        store.update(symbol, |st| st.entry_price = Some(entry_price))?;
        state = store.symbol(symbol);
    }
    let entry = state.entry_price.unwrap_or(entry_price);
    let last_stop = state.last_stop;

    let (be_trigger, tp1_price, tp2_price) = match side {
        Side::Buy => (
            entry + cfg.atr_k_be * atr,
            entry + cfg.atr_k_tp1 * atr,
            entry + cfg.atr_k_tp2 * atr,
        ),
        Side::Sell => (
            entry - cfg.atr_k_be * atr,
            entry - cfg.atr_k_tp1 * atr,
            entry - cfg.atr_k_tp2 * atr,
        ),
    };

    let mut desired = last_stop;

    let be_reached = match side {
        Side::Buy => price >= be_trigger,
        Side::Sell => price <= be_trigger,
    };
    if be_reached {
        let breakeven = round_dp(entry, 2);
        desired = Some(match (desired, side) {
            (Some(d), Side::Buy) => d.max(breakeven),
            (Some(d), Side::Sell) => d.min(breakeven),
            (None, _) => breakeven,
        });
    }

    if let Some(trail) = trailing_stop_candidate(side, price, row, cfg.trailing, cfg.trailing_k_atr)
    {
        desired = Some(match (desired, side) {
            (Some(d), Side::Buy) => d.max(trail),
            (Some(d), Side::Sell) => d.min(trail),
            (None, _) => trail,
        });
    }

    if let Some(desired) = desired {
        let new_stop = round_dp(desired, 2);
        let tightens = match (last_stop, side) {
            (None, _) => true,
            (Some(prev), Side::Buy) => new_stop > prev,
            (Some(prev), Side::Sell) => new_stop < prev,
        };
        if tightens {
            if exchange.set_stop_loss(symbol, new_stop).await {
                info!("Stop moved to {new_stop} for {symbol}");
                store.update(symbol, |st| st.last_stop = Some(new_stop))?;
            } else {
                warn!("Stop update to {new_stop} rejected for {symbol}");
            }
        }
    }

    let crossed = |target: f64| match side {
        Side::Buy => price >= target,
        Side::Sell => price <= target,
    };

    if !state.took_partial_tp1 && crossed(tp1_price) {
        let done = close_partial(
            exchange,
            symbol,
            side,
            position_qty * cfg.partial_tp1_pct,
            lot_step,
            PartialLeg::Tp1,
            on_partial,
        )
        .await;
        if done {
            store.update(symbol, |st| st.took_partial_tp1 = true)?;
        }
    }

    // Re-read: tp1 may have just latched.
    let state = store.symbol(symbol);
    if !state.took_partial_tp2 && crossed(tp2_price) {
        let done = close_partial(
            exchange,
            symbol,
            side,
            position_qty * cfg.partial_tp2_pct,
            lot_step,
            PartialLeg::Tp2,
            on_partial,
        )
        .await;
        if done {
            store.update(symbol, |st| st.took_partial_tp2 = true)?;
        }
    }

    Ok(())
}

/// Close `qty` of the position with a reduce-only market order. Returns
/// whether the leg should latch: true on a confirmed fill, and also when
/// the lot-step floor leaves nothing to close.
async fn close_partial<E: AccountExecution>(
    exchange: &E,
    symbol: &str,
    side: Side,
    qty: f64,
    lot_step: f64,
    leg: PartialLeg,
    on_partial: &mut dyn FnMut(PartialFill),
) -> bool {
    let qty = round_step(qty, lot_step).max(0.0);
    if qty <= 0.0 {
        debug!("Partial {leg:?} qty floored to zero for {symbol}, nothing to close");
        return true;
    }
    let close_side = side.closing();
    let outcome = exchange
        .place_market_order(&OrderRequest {
            symbol: symbol.to_string(),
            side: close_side,
            qty,
            stop_loss: None,
            take_profit: None,
            reduce_only: true,
        })
        .await;
    if outcome.success {
        info!("Partial {leg:?} filled: {close_side} {qty} {symbol}");
        on_partial(PartialFill {
            leg,
            side: close_side,
            qty,
        });
        true
    } else {
        warn!("Partial {leg:?} order failed for {symbol}: {}", outcome.raw);
        false
    }
}
