//! End-to-end harness for the decision loop and the stop/target lifecycle,
//! driven against a mocked exchange with no external dependencies.

use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};

use signal_runner::config::{BotConfig, RiskConfig, TrailingMode};
use signal_runner::exchange::{
    AccountExecution, InstrumentFilters, MarketData, OperatorChannel, OrderOutcome, OrderRequest,
};
use signal_runner::indicators::{FeatureRow, TrendDirection};
use signal_runner::journal::{EventKind, TradeJournal, TradeRecord};
use signal_runner::risk::{update_stops_and_partials, PartialFill};
use signal_runner::state::StateStore;
use signal_runner::types::{Candle, PositionView, Side};
use signal_runner::BotRunner;

// ---------------------------------------------------------------------------
// Mock exchange
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockInner {
    candles: Vec<Candle>,
    open_interest: Vec<f64>,
    funding: Option<f64>,
    basis: Option<f64>,
    long_short_ratio: Vec<f64>,
    position: Option<PositionView>,
    equity: f64,
    available: f64,
    mark_price: f64,
    /// When set, successful non-reduce orders open/extend the position at
    /// the mark price, and reduce-only orders shrink it.
    fill_orders: bool,
    fail_orders: bool,
    fail_stops: bool,
    orders: Vec<OrderRequest>,
    stops: Vec<f64>,
}

/// Cloneable handle so a test can keep inspecting state the runner owns.
#[derive(Clone)]
struct MockExchange(Arc<Mutex<MockInner>>);

impl MockExchange {
    fn new(inner: MockInner) -> Self {
        Self(Arc::new(Mutex::new(inner)))
    }

    fn with<R>(&self, f: impl FnOnce(&mut MockInner) -> R) -> R {
        f(&mut self.0.lock().unwrap())
    }
}

impl MarketData for MockExchange {
    async fn fetch_candles(&self, _symbol: &str, _interval: &str, _limit: u32) -> Vec<Candle> {
        self.0.lock().unwrap().candles.clone()
    }
    async fn fetch_open_interest(&self, _symbol: &str) -> Vec<f64> {
        self.0.lock().unwrap().open_interest.clone()
    }
    async fn fetch_funding_rate(&self, _symbol: &str) -> Option<f64> {
        self.0.lock().unwrap().funding
    }
    async fn fetch_basis(&self, _symbol: &str) -> Option<f64> {
        self.0.lock().unwrap().basis
    }
    async fn fetch_long_short_ratio(&self, _symbol: &str) -> Vec<f64> {
        self.0.lock().unwrap().long_short_ratio.clone()
    }
}

impl AccountExecution for MockExchange {
    async fn open_position(&self, _symbol: &str) -> Option<PositionView> {
        self.0.lock().unwrap().position.clone()
    }
    async fn available_balance(&self, _coin: &str) -> f64 {
        self.0.lock().unwrap().available
    }
    async fn equity(&self) -> Option<f64> {
        Some(self.0.lock().unwrap().equity)
    }
    async fn instrument_filters(&self, _symbol: &str) -> Option<InstrumentFilters> {
        Some(InstrumentFilters::default())
    }
    async fn place_market_order(&self, order: &OrderRequest) -> OrderOutcome {
        let mut inner = self.0.lock().unwrap();
        inner.orders.push(order.clone());
        if inner.fail_orders {
            return OrderOutcome::failed(serde_json::json!({ "retCode": 110007 }));
        }
        if inner.fill_orders {
            let mark = inner.mark_price;
            if order.reduce_only {
                if let Some(pos) = &mut inner.position {
                    pos.size = (pos.size - order.qty).max(0.0);
                    if pos.size <= 0.0 {
                        inner.position = None;
                    }
                }
            } else {
                match &mut inner.position {
                    Some(pos) => pos.size += order.qty,
                    None => {
                        inner.position = Some(PositionView {
                            side: order.side,
                            size: order.qty,
                            avg_price: mark,
                        })
                    }
                }
            }
        }
        OrderOutcome {
            success: true,
            raw: serde_json::json!({ "retCode": 0 }),
        }
    }
    async fn set_stop_loss(&self, _symbol: &str, price: f64) -> bool {
        let mut inner = self.0.lock().unwrap();
        if inner.fail_stops {
            return false;
        }
        inner.stops.push(price);
        true
    }
}

struct TestOperator {
    notes: Arc<Mutex<Vec<String>>>,
}

impl OperatorChannel for TestOperator {
    fn is_trading_enabled(&self) -> bool {
        true
    }
    async fn notify(&self, text: &str) {
        self.notes.lock().unwrap().push(text.to_string());
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn candle(i: i64, price: f64, volume: f64) -> Candle {
    Candle {
        timestamp: Utc.timestamp_opt(i * 60, 0).unwrap(),
        open: price,
        high: price + 1.0,
        low: price - 1.0,
        close: price,
        volume,
        turnover: price * volume,
    }
}

fn rising_candles(n: usize, start: f64) -> Vec<Candle> {
    (0..n)
        .map(|i| candle(i as i64, start + i as f64, 100.0))
        .collect()
}

fn flat_candles(n: usize, price: f64) -> Vec<Candle> {
    (0..n).map(|i| candle(i as i64, price, 100.0)).collect()
}

fn row(price: f64, atr: Option<f64>, st_lower: Option<f64>, st_upper: Option<f64>) -> FeatureRow {
    FeatureRow {
        timestamp: Utc.timestamp_opt(0, 0).unwrap(),
        open: price,
        high: price + 1.0,
        low: price - 1.0,
        close: price,
        volume: 100.0,
        turnover: price * 100.0,
        ema_9: None,
        ema_21: None,
        ema_50: None,
        ema_200: None,
        rsi: None,
        adx: None,
        atr,
        vwap: None,
        obv: 0.0,
        vol_ma: 100.0,
        supertrend: st_lower,
        supertrend_upper: st_upper,
        supertrend_lower: st_lower,
        supertrend_dir: TrendDirection::Up,
    }
}

fn test_config(dir: &std::path::Path) -> BotConfig {
    let mut config = BotConfig::default();
    config.signal_threshold = 0.1;
    config.cooldown_secs = 0;
    config.state_file = dir.join("runtime_state.json").to_string_lossy().into_owned();
    config.journal_file = dir.join("trades.jsonl").to_string_lossy().into_owned();
    config
}

fn read_journal(path: &str) -> Vec<TradeRecord> {
    let raw = std::fs::read_to_string(path).unwrap_or_default();
    raw.lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn runner_with(
    exchange: MockExchange,
    config: BotConfig,
) -> (BotRunner<MockExchange, TestOperator>, Arc<Mutex<Vec<String>>>) {
    let notes = Arc::new(Mutex::new(Vec::new()));
    let operator = TestOperator {
        notes: notes.clone(),
    };
    let store = StateStore::load(&config.state_file).unwrap();
    let journal = Arc::new(TradeJournal::new(&config.journal_file));
    (
        BotRunner::new(exchange, operator, store, journal, config),
        notes,
    )
}

// ---------------------------------------------------------------------------
// Decision loop scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_flat_to_entry_persists_state_and_journal() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let candles = rising_candles(200, 100.0);
    let mark = candles.last().unwrap().close;

    let exchange = MockExchange::new(MockInner {
        candles,
        funding: Some(0.01),
        basis: Some(0.5),
        long_short_ratio: vec![1.5],
        equity: 1000.0,
        available: 10_000.0,
        mark_price: mark,
        fill_orders: true,
        ..MockInner::default()
    });

    let (mut runner, notes) = runner_with(exchange.clone(), config.clone());
    runner.run_cycle().await.unwrap();

    // the entry order carried an embedded stop and target
    let order = exchange.with(|inner| inner.orders[0].clone());
    assert_eq!(order.side, Side::Buy);
    assert!(!order.reduce_only);
    assert!(order.qty > 0.0);
    let sl = order.stop_loss.unwrap();
    let tp = order.take_profit.unwrap();
    assert!(sl < mark && mark < tp);

    // persisted state was seeded from the confirmed fill
    let store = StateStore::load(&config.state_file).unwrap();
    let state = store.symbol(&config.symbol);
    assert_eq!(state.entry_price, Some(mark));
    assert_eq!(state.last_stop, Some(sl));
    assert!(!state.took_partial_tp1 && !state.took_partial_tp2);

    let records = read_journal(&config.journal_file);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event, EventKind::Entry);
    assert_eq!(records[0].side, Side::Buy);
    assert!(notes.lock().unwrap().iter().any(|n| n.contains("Order")));
}

#[tokio::test]
async fn test_entry_blocked_by_cooldown() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.cooldown_secs = 3600;

    let candles = rising_candles(200, 100.0);
    let mark = candles.last().unwrap().close;
    let exchange = MockExchange::new(MockInner {
        candles,
        basis: Some(0.5),
        equity: 1000.0,
        available: 10_000.0,
        mark_price: mark,
        ..MockInner::default()
    });

    let (mut runner, _notes) = runner_with(exchange.clone(), config);
    runner.run_cycle().await.unwrap();
    runner.run_cycle().await.unwrap();

    // second entry suppressed: the cooldown has not elapsed
    assert_eq!(exchange.with(|inner| inner.orders.len()), 1);
}

#[tokio::test]
async fn test_entry_blocked_by_insufficient_funds() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let candles = rising_candles(200, 100.0);
    let mark = candles.last().unwrap().close;
    let exchange = MockExchange::new(MockInner {
        candles,
        basis: Some(0.5),
        equity: 1000.0,
        available: 1.0, // below the minimum order value
        mark_price: mark,
        ..MockInner::default()
    });

    let (mut runner, _notes) = runner_with(exchange.clone(), config);
    runner.run_cycle().await.unwrap();
    assert_eq!(exchange.with(|inner| inner.orders.len()), 0);
}

#[tokio::test]
async fn test_full_exit_is_detected_and_state_cleared() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.signal_threshold = 10.0; // never enter
    config.risk.partial_tp1_pct = 0.0;
    config.risk.partial_tp2_pct = 0.0;

    let exchange = MockExchange::new(MockInner {
        candles: flat_candles(200, 105.0),
        equity: 1000.0,
        available: 10_000.0,
        mark_price: 105.0,
        position: Some(PositionView {
            side: Side::Buy,
            size: 1.0,
            avg_price: 100.0,
        }),
        ..MockInner::default()
    });

    let (mut runner, notes) = runner_with(exchange.clone(), config.clone());
    runner.run_cycle().await.unwrap();

    // the position vanishes between cycles
    exchange.with(|inner| inner.position = None);
    runner.run_cycle().await.unwrap();

    let records = read_journal(&config.journal_file);
    let exit = records
        .iter()
        .find(|r| r.event == EventKind::Exit)
        .expect("no exit record");
    assert_eq!(exit.side, Side::Buy);
    assert!((exit.pnl.unwrap() - 5.0).abs() < 1e-9);

    let store = StateStore::load(&config.state_file).unwrap();
    let state = store.symbol(&config.symbol);
    assert_eq!(state.entry_price, None);
    assert_eq!(state.last_stop, None);
    assert!(notes.lock().unwrap().iter().any(|n| n.contains("Full exit")));
}

#[tokio::test]
async fn test_scale_in_fires_only_when_trailing_stop_tightened() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.risk.partial_tp1_pct = 0.0;
    config.risk.partial_tp2_pct = 0.0;

    let candles = rising_candles(200, 100.0);
    let mark = candles.last().unwrap().close;
    let exchange = MockExchange::new(MockInner {
        candles,
        basis: Some(0.5),
        equity: 1000.0,
        available: 10_000.0,
        mark_price: mark,
        position: Some(PositionView {
            side: Side::Buy,
            size: 1.0,
            // entry far enough below the mark that breakeven promotion
            // stays under the trailing band
            avg_price: mark - 20.0,
        }),
        ..MockInner::default()
    });

    let (mut runner, _notes) = runner_with(exchange.clone(), config.clone());
    runner.run_cycle().await.unwrap();

    // the lifecycle ratchets the stop to the band, the gate compares the
    // fresh candidate against it (>= passes) and the add goes through
    let adds: Vec<OrderRequest> = exchange.with(|inner| {
        inner
            .orders
            .iter()
            .filter(|o| !o.reduce_only)
            .cloned()
            .collect()
    });
    assert_eq!(adds.len(), 1);
    assert_eq!(adds[0].side, Side::Buy);
    assert!(adds[0].stop_loss.is_none());

    let records = read_journal(&config.journal_file);
    assert!(records.iter().any(|r| r.event == EventKind::Add));
}

// ---------------------------------------------------------------------------
// Stop/target lifecycle scenarios
// ---------------------------------------------------------------------------

async fn lifecycle_step(
    exchange: &MockExchange,
    store: &StateStore,
    cfg: &RiskConfig,
    side: Side,
    entry: f64,
    qty: f64,
    price: f64,
    feature_row: &FeatureRow,
) -> Vec<PartialFill> {
    let mut fills = Vec::new();
    let mut on_partial = |fill: PartialFill| fills.push(fill);
    update_stops_and_partials(
        exchange,
        store,
        cfg,
        "BTCUSDT",
        side,
        entry,
        qty,
        price,
        feature_row,
        0.001,
        &mut on_partial,
    )
    .await
    .unwrap();
    fills
}

#[tokio::test]
async fn test_breakeven_promotion_overrides_looser_trailing() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::load(dir.path().join("state.json")).unwrap();
    store
        .update("BTCUSDT", |st| {
            st.entry_price = Some(100.0);
            st.last_stop = Some(98.0);
        })
        .unwrap();
    let exchange = MockExchange::new(MockInner::default());
    let cfg = RiskConfig::default(); // atr_k_be = 0.5

    // price 100.9 has not reached the breakeven trigger at 101
    let r = row(100.9, Some(2.0), Some(97.0), None);
    lifecycle_step(&exchange, &store, &cfg, Side::Buy, 100.0, 1.0, 100.9, &r).await;
    assert!(exchange.with(|inner| inner.stops.is_empty()));

    // price 101 triggers breakeven; the trailing candidate at 97 is looser
    // and must not win
    let r = row(101.0, Some(2.0), Some(97.0), None);
    lifecycle_step(&exchange, &store, &cfg, Side::Buy, 100.0, 1.0, 101.0, &r).await;
    assert_eq!(exchange.with(|inner| inner.stops.clone()), vec![100.0]);
    assert_eq!(store.symbol("BTCUSDT").last_stop, Some(100.0));
}

#[tokio::test]
async fn test_stop_ratchet_never_loosens() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::load(dir.path().join("state.json")).unwrap();
    let exchange = MockExchange::new(MockInner::default());
    let mut cfg = RiskConfig::default();
    cfg.partial_tp1_pct = 0.0;
    cfg.partial_tp2_pct = 0.0;

    // favorable path: band climbs, then dips; persisted stop only climbs
    let path = [
        (101.0, 99.0),
        (102.0, 100.5),
        (103.0, 101.5),
        (103.5, 95.0), // band dip must not loosen the stop
        (104.0, 102.0),
    ];
    for (price, band) in path {
        let r = row(price, Some(2.0), Some(band), None);
        lifecycle_step(&exchange, &store, &cfg, Side::Buy, 100.0, 1.0, price, &r).await;
    }

    let stops = exchange.with(|inner| inner.stops.clone());
    assert!(!stops.is_empty());
    for pair in stops.windows(2) {
        assert!(pair[1] > pair[0], "stop loosened: {:?}", stops);
    }
    assert_eq!(store.symbol("BTCUSDT").last_stop, Some(102.0));
}

#[tokio::test]
async fn test_short_side_stop_ratchets_downward() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::load(dir.path().join("state.json")).unwrap();
    let exchange = MockExchange::new(MockInner::default());
    let mut cfg = RiskConfig::default();
    cfg.partial_tp1_pct = 0.0;
    cfg.partial_tp2_pct = 0.0;

    let path = [
        (99.0, 101.0),
        (98.0, 100.0),
        (97.5, 103.0), // upper band pop must not loosen
        (97.0, 99.0),
    ];
    for (price, band) in path {
        let r = row(price, Some(2.0), None, Some(band));
        lifecycle_step(&exchange, &store, &cfg, Side::Sell, 100.0, 1.0, price, &r).await;
    }

    let stops = exchange.with(|inner| inner.stops.clone());
    for pair in stops.windows(2) {
        assert!(pair[1] < pair[0], "short stop loosened: {:?}", stops);
    }
    assert_eq!(store.symbol("BTCUSDT").last_stop, Some(99.0));
}

#[tokio::test]
async fn test_lifecycle_noop_without_atr() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::load(dir.path().join("state.json")).unwrap();
    let exchange = MockExchange::new(MockInner::default());
    let cfg = RiskConfig::default();

    let r = row(150.0, None, Some(140.0), None);
    let fills = lifecycle_step(&exchange, &store, &cfg, Side::Buy, 100.0, 1.0, 150.0, &r).await;

    assert!(fills.is_empty());
    assert!(exchange.with(|inner| inner.stops.is_empty() && inner.orders.is_empty()));
    assert_eq!(store.symbol("BTCUSDT"), Default::default());
}

#[tokio::test]
async fn test_partial_take_profits_fire_once_across_replays() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    let exchange = MockExchange::new(MockInner {
        fill_orders: false,
        ..MockInner::default()
    });
    let cfg = RiskConfig::default(); // tp1 at entry+1*atr, tp2 at entry+2*atr

    // tp1 territory: entry 100, atr 2 -> tp1 at 102
    {
        let store = StateStore::load(&state_path).unwrap();
        let r = row(102.5, Some(2.0), Some(99.0), None);
        let fills =
            lifecycle_step(&exchange, &store, &cfg, Side::Buy, 100.0, 1.0, 102.5, &r).await;
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].side, Side::Sell);
        assert!((fills[0].qty - 0.3).abs() < 1e-9);
        assert!(store.symbol("BTCUSDT").took_partial_tp1);
    }

    // replay the same price path in a fresh process: the latch holds
    {
        let store = StateStore::load(&state_path).unwrap();
        let r = row(102.5, Some(2.0), Some(99.0), None);
        let fills =
            lifecycle_step(&exchange, &store, &cfg, Side::Buy, 100.0, 1.0, 102.5, &r).await;
        assert!(fills.is_empty());
    }

    // tp2 territory fires the second latch exactly once
    {
        let store = StateStore::load(&state_path).unwrap();
        let r = row(104.5, Some(2.0), Some(101.0), None);
        let fills =
            lifecycle_step(&exchange, &store, &cfg, Side::Buy, 100.0, 1.0, 104.5, &r).await;
        assert_eq!(fills.len(), 1);
        let fills =
            lifecycle_step(&exchange, &store, &cfg, Side::Buy, 100.0, 1.0, 104.5, &r).await;
        assert!(fills.is_empty());
    }

    let reduce_orders = exchange.with(|inner| {
        inner
            .orders
            .iter()
            .filter(|o| o.reduce_only)
            .count()
    });
    assert_eq!(reduce_orders, 2);
}

#[tokio::test]
async fn test_failed_partial_close_does_not_latch() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::load(dir.path().join("state.json")).unwrap();
    let exchange = MockExchange::new(MockInner {
        fail_orders: true,
        ..MockInner::default()
    });
    let cfg = RiskConfig::default();

    let r = row(102.5, Some(2.0), Some(99.0), None);
    let fills = lifecycle_step(&exchange, &store, &cfg, Side::Buy, 100.0, 1.0, 102.5, &r).await;
    assert!(fills.is_empty());
    assert!(!store.symbol("BTCUSDT").took_partial_tp1);

    // next cycle the order goes through and the leg latches
    exchange.with(|inner| inner.fail_orders = false);
    let fills = lifecycle_step(&exchange, &store, &cfg, Side::Buy, 100.0, 1.0, 102.5, &r).await;
    assert_eq!(fills.len(), 1);
    assert!(store.symbol("BTCUSDT").took_partial_tp1);
}

#[tokio::test]
async fn test_failed_stop_update_keeps_persisted_value() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::load(dir.path().join("state.json")).unwrap();
    store
        .update("BTCUSDT", |st| {
            st.entry_price = Some(100.0);
            st.last_stop = Some(98.0);
            st.took_partial_tp1 = true;
            st.took_partial_tp2 = true;
        })
        .unwrap();
    let exchange = MockExchange::new(MockInner {
        fail_stops: true,
        ..MockInner::default()
    });
    let cfg = RiskConfig::default();

    let r = row(103.0, Some(2.0), Some(101.0), None);
    lifecycle_step(&exchange, &store, &cfg, Side::Buy, 100.0, 1.0, 103.0, &r).await;

    // rejected update leaves the persisted stop alone; retried next cycle
    assert_eq!(store.symbol("BTCUSDT").last_stop, Some(98.0));
    exchange.with(|inner| inner.fail_stops = false);
    lifecycle_step(&exchange, &store, &cfg, Side::Buy, 100.0, 1.0, 103.0, &r).await;
    assert_eq!(store.symbol("BTCUSDT").last_stop, Some(101.0));
}

#[tokio::test]
async fn test_atr_trailing_mode_gates_and_trails() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::load(dir.path().join("state.json")).unwrap();
    store
        .update("BTCUSDT", |st| {
            st.entry_price = Some(100.0);
            st.last_stop = Some(99.0);
            st.took_partial_tp1 = true;
            st.took_partial_tp2 = true;
        })
        .unwrap();
    let exchange = MockExchange::new(MockInner::default());
    let mut cfg = RiskConfig::default();
    cfg.trailing = TrailingMode::Atr;

    // trailing candidate = 103 - 1*2 = 101, tighter than 99
    let r = row(103.0, Some(2.0), None, None);
    lifecycle_step(&exchange, &store, &cfg, Side::Buy, 100.0, 1.0, 103.0, &r).await;
    assert_eq!(store.symbol("BTCUSDT").last_stop, Some(101.0));

    // price falls back: candidate 99 is looser, the ratchet holds at 101
    let r = row(101.0, Some(2.0), None, None);
    lifecycle_step(&exchange, &store, &cfg, Side::Buy, 100.0, 1.0, 101.0, &r).await;
    assert_eq!(store.symbol("BTCUSDT").last_stop, Some(101.0));
}
