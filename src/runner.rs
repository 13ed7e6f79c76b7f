//! Decision loop: fetch, score, classify, and drive the position
//! lifecycle on a fixed polling cadence.
//!
//! One cycle runs at a time; the loop only sleeps between cycles. Any
//! error inside a cycle is caught at the loop boundary, logged, surfaced
//! to the operator, and the loop keeps going — nothing here is fatal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::BotConfig;
use crate::exchange::{
    AccountExecution, InstrumentFilters, MarketData, OperatorChannel, OrderRequest,
};
use crate::indicators::compute_features;
use crate::journal::{EventKind, TradeJournal, TradeRecord};
use crate::regime::{detect_regime, Regime};
use crate::risk::{
    compute_initial_stops, compute_position_size, should_add_position, update_stops_and_partials,
    PartialFill,
};
use crate::scoring::score_signal;
use crate::state::StateStore;
use crate::types::{diff_positions, round_step, Metrics, PositionDelta, PositionSnapshot, Side};

/// Recheck interval while the operator has trading switched off.
const DISABLED_DELAY: Duration = Duration::from_secs(5);
/// Backoff when the exchange returns no candles.
const NO_DATA_DELAY: Duration = Duration::from_secs(10);
/// Pause after a completed (or failed) cycle.
const CYCLE_DELAY: Duration = Duration::from_secs(15);
/// Equity assumed when the wallet query fails.
const EQUITY_FALLBACK: f64 = 1000.0;

/// The trading state machine: Flat or PositionOpen, re-evaluated every
/// cycle against the exchange's authoritative position.
pub struct BotRunner<E, O> {
    exchange: E,
    operator: O,
    store: StateStore,
    journal: Arc<TradeJournal>,
    config: BotConfig,
    /// Process-lifetime cooldowns; deliberately not persisted.
    last_entry: Option<Instant>,
    last_add: Option<Instant>,
    prev_position: Option<PositionSnapshot>,
}

impl<E, O> BotRunner<E, O>
where
    E: MarketData + AccountExecution,
    O: OperatorChannel,
{
    pub fn new(
        exchange: E,
        operator: O,
        store: StateStore,
        journal: Arc<TradeJournal>,
        config: BotConfig,
    ) -> Self {
        Self {
            exchange,
            operator,
            store,
            journal,
            config,
            last_entry: None,
            last_add: None,
            prev_position: None,
        }
    }

    /// Run the loop until the process dies.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!("Decision loop started for {}", self.config.symbol);
        self.operator
            .notify("🚀 Trading loop started (disabled — send /on to begin)")
            .await;

        loop {
            if !self.operator.is_trading_enabled() {
                sleep(DISABLED_DELAY).await;
                continue;
            }
            let delay = match self.run_cycle().await {
                Ok(delay) => delay,
                Err(e) => {
                    error!("Cycle error: {e:#}");
                    self.operator.notify(&format!("❌ Cycle error: {e}")).await;
                    CYCLE_DELAY
                }
            };
            sleep(delay).await;
        }
    }

    /// One full cycle of the state machine. Returns how long to sleep
    /// before the next one.
    pub async fn run_cycle(&mut self) -> anyhow::Result<Duration> {
        let symbol = self.config.symbol.clone();

        let candles = self
            .exchange
            .fetch_candles(&symbol, &self.config.interval, self.config.candle_limit)
            .await;
        if candles.is_empty() {
            warn!("No candles from exchange");
            return Ok(NO_DATA_DELAY);
        }
        let rows = compute_features(&candles, &self.config.indicators);
        let Some(last_row) = rows.last() else {
            return Ok(NO_DATA_DELAY);
        };
        let price = last_row.close;

        let metrics = Metrics {
            open_interest: self.exchange.fetch_open_interest(&symbol).await,
            funding: self.exchange.fetch_funding_rate(&symbol).await,
            basis: self.exchange.fetch_basis(&symbol).await,
            long_short_ratio: self.exchange.fetch_long_short_ratio(&symbol).await,
        };

        let score = score_signal(&rows, &metrics, &self.config.scoring);
        let regime = detect_regime(&rows, &metrics, &self.config.regime);
        let equity = self.exchange.equity().await.unwrap_or(EQUITY_FALLBACK);

        info!(
            "Score={:+.2} | TA={:+.3} | Data={:+.3} | Volume={:+.3} | Volatility={:+.3} | Regime={}",
            score.total,
            score.breakdown.ta,
            score.breakdown.derivatives,
            score.breakdown.volume,
            score.breakdown.volatility,
            regime
        );

        let filters = self
            .exchange
            .instrument_filters(&symbol)
            .await
            .unwrap_or_default();
        let available = self.exchange.available_balance("USDT").await;
        let current = self.exchange.open_position(&symbol).await;

        match diff_positions(self.prev_position.as_ref(), current.as_ref(), price) {
            PositionDelta::Closed { last, .. } => {
                // Prefer the persisted entry for the PnL inference; the
                // in-memory snapshot is the fallback.
                let entry = self
                    .store
                    .symbol(&symbol)
                    .entry_price
                    .unwrap_or(last.entry_price);
                let pnl = match last.side {
                    Side::Buy => last.size * (price - entry),
                    Side::Sell => last.size * (entry - price),
                };
                info!("Position fully closed, inferred PnL {pnl:.2}");
                self.journal.append(&self.record(
                    EventKind::Exit,
                    last.side,
                    last.size,
                    price,
                    None,
                    None,
                    score.total,
                    regime,
                    Some(pnl),
                ));
                self.operator
                    .notify(&format!("🔚 Full exit {symbol}. Approx PnL: {pnl:.2} USDT"))
                    .await;
                self.store.clear(&symbol)?;
            }
            PositionDelta::Opened(snapshot) => {
                debug!(
                    "Position open: {} size={} entry={}",
                    snapshot.side, snapshot.size, snapshot.entry_price
                );
            }
            PositionDelta::Unchanged => {}
        }

        // ---- PositionOpen: manage stops/partials, maybe scale in ----
        if let Some(pos) = &current {
            // a missing average fill price falls back to the current mark
            let entry = if pos.avg_price > 0.0 {
                pos.avg_price
            } else {
                price
            };
            let mut partial_events: Vec<PartialFill> = Vec::new();
            {
                let journal = &self.journal;
                let mut on_partial = |fill: PartialFill| {
                    journal.append(&TradeRecord {
                        id: Uuid::new_v4(),
                        ts: Utc::now(),
                        symbol: symbol.clone(),
                        side: fill.side,
                        qty: fill.qty,
                        price,
                        event: EventKind::PartialTakeProfit,
                        stop_loss: None,
                        take_profit: None,
                        score: score.total,
                        regime,
                        pnl: None,
                    });
                    partial_events.push(fill);
                };
                update_stops_and_partials(
                    &self.exchange,
                    &self.store,
                    &self.config.risk,
                    &symbol,
                    pos.side,
                    entry,
                    pos.size,
                    price,
                    last_row,
                    filters.qty_step,
                    &mut on_partial,
                )
                .await?;
            }
            for fill in &partial_events {
                self.operator
                    .notify(&format!(
                        "🎯 Partial take-profit: {} {} qty={}",
                        fill.side, symbol, fill.qty
                    ))
                    .await;
            }

            let cooled = self
                .last_add
                .map_or(true, |t| t.elapsed() >= self.cooldown());
            if score.total > self.config.signal_threshold
                && available >= filters.min_order_value
                && cooled
            {
                let prev_stop = self.store.symbol(&symbol).last_stop;
                if should_add_position(
                    pos.side,
                    price,
                    last_row,
                    prev_stop,
                    self.config.risk.trailing,
                    self.config.risk.trailing_k_atr,
                ) {
                    let qty = self.executable_qty(equity, price, available, &filters);
                    if qty > 0.0 {
                        let outcome = self
                            .exchange
                            .place_market_order(&OrderRequest {
                                symbol: symbol.clone(),
                                side: pos.side,
                                qty,
                                stop_loss: None,
                                take_profit: None,
                                reduce_only: false,
                            })
                            .await;
                        if outcome.success {
                            self.last_add = Some(Instant::now());
                            info!("Scaled in: {} {} qty={}", pos.side, symbol, qty);
                            self.operator
                                .notify(&format!("➕ Scale-in: {} {} qty={qty}", pos.side, symbol))
                                .await;
                            self.journal.append(&self.record(
                                EventKind::Add,
                                pos.side,
                                qty,
                                price,
                                None,
                                None,
                                score.total,
                                regime,
                                None,
                            ));
                        }
                    } else {
                        info!("Scale-in skipped: below the minimum order");
                    }
                }
            }

            self.prev_position = Some(PositionSnapshot::of(pos));
            return Ok(CYCLE_DELAY);
        }

        // ---- Flat: maybe enter ----
        if score.total > self.config.signal_threshold {
            if self.config.cooldown_secs > 0 {
                if let Some(t) = self.last_entry {
                    let elapsed = t.elapsed();
                    if elapsed < self.cooldown() {
                        info!(
                            "Entry cooldown: {}s left, skipping",
                            (self.cooldown() - elapsed).as_secs()
                        );
                        self.prev_position = None;
                        return Ok(CYCLE_DELAY);
                    }
                }
            }

            if available < filters.min_order_value {
                warn!(
                    "Insufficient funds: {available:.2} USDT available, need ≥ {:.2}",
                    filters.min_order_value
                );
                self.prev_position = None;
                return Ok(CYCLE_DELAY);
            }

            let qty = self.executable_qty(equity, price, available, &filters);
            if qty <= 0.0 {
                warn!("Insufficient funds for the minimum order");
                self.prev_position = None;
                return Ok(CYCLE_DELAY);
            }

            // Direction follows the sign of the technical sub-score.
            let side = if score.breakdown.ta >= 0.0 {
                Side::Buy
            } else {
                Side::Sell
            };
            let stops = compute_initial_stops(price, side, last_row.atr, &self.config.risk);

            info!(
                "Entering: side={side} qty={qty} price≈{price:.2} SL={} TP={}",
                stops.stop_loss, stops.tp2
            );
            let outcome = self
                .exchange
                .place_market_order(&OrderRequest {
                    symbol: symbol.clone(),
                    side,
                    qty,
                    stop_loss: Some(stops.stop_loss),
                    take_profit: Some(stops.tp2),
                    reduce_only: false,
                })
                .await;

            if outcome.success {
                self.last_entry = Some(Instant::now());

                // Confirmed fill: persist the exchange's average price.
                let confirmed = self.exchange.open_position(&symbol).await;
                let avg = confirmed
                    .as_ref()
                    .map(|p| p.avg_price)
                    .filter(|p| *p > 0.0)
                    .unwrap_or(price);
                self.store.update(&symbol, |st| {
                    st.entry_price = Some(avg);
                    st.last_stop = Some(stops.stop_loss);
                    st.took_partial_tp1 = false;
                    st.took_partial_tp2 = false;
                })?;

                self.operator
                    .notify(&format!(
                        "✅ Order: {side} {symbol}\nQty: {qty}\nPrice≈ {avg:.2}\nSL: {} | TP: {}\nScore: {:+.2} (TA {:+.2}, Data {:+.2}, Vol {:+.2}, Vola {:+.2})\nRegime: {regime}",
                        stops.stop_loss,
                        stops.tp2,
                        score.total,
                        score.breakdown.ta,
                        score.breakdown.derivatives,
                        score.breakdown.volume,
                        score.breakdown.volatility,
                    ))
                    .await;
                self.journal.append(&self.record(
                    EventKind::Entry,
                    side,
                    qty,
                    avg,
                    Some(stops.stop_loss),
                    Some(stops.tp2),
                    score.total,
                    regime,
                    None,
                ));

                self.prev_position = Some(PositionSnapshot {
                    side,
                    size: qty,
                    entry_price: avg,
                });
            } else {
                self.prev_position = None;
            }
        } else {
            debug!(
                "Score {:+.2} below entry threshold {:.2}",
                score.total, self.config.signal_threshold
            );
            self.prev_position = None;
        }

        Ok(CYCLE_DELAY)
    }

    fn cooldown(&self) -> Duration {
        Duration::from_secs(self.config.cooldown_secs)
    }

    /// Sized quantity clamped to what the available balance can actually
    /// buy, re-floored to the lot step. Zero when the result falls below
    /// the exchange minimums.
    fn executable_qty(
        &self,
        equity: f64,
        price: f64,
        available: f64,
        filters: &InstrumentFilters,
    ) -> f64 {
        if price <= 0.0 {
            return 0.0;
        }
        let raw = compute_position_size(equity, price, self.config.risk_pct, filters);
        let max_affordable = (available / price).max(0.0);
        let qty = round_step(raw.min(max_affordable).max(0.0), filters.qty_step);
        if qty <= 0.0 || qty * price < filters.min_order_value {
            return 0.0;
        }
        qty
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        event: EventKind,
        side: Side,
        qty: f64,
        price: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
        score: f64,
        regime: Regime,
        pnl: Option<f64>,
    ) -> TradeRecord {
        TradeRecord {
            id: Uuid::new_v4(),
            ts: Utc::now(),
            symbol: self.config.symbol.clone(),
            side,
            qty,
            price,
            event,
            stop_loss,
            take_profit,
            score,
            regime,
            pnl,
        }
    }
}
