//! Signal Runner Library
//!
//! Scoring-and-risk decision engine for single-symbol futures trading:
//! feature pipeline, weighted multi-factor scorer, regime classifier and
//! the position-lifecycle state machine, plus the thin I/O it drives.

pub mod bybit;
pub mod config;
pub mod exchange;
pub mod indicators;
pub mod journal;
pub mod regime;
pub mod risk;
pub mod runner;
pub mod scoring;
pub mod state;
pub mod telegram;
pub mod types;

// Re-export main types for convenience
pub use bybit::BybitClient;
pub use config::{BotConfig, IndicatorConfig, RiskConfig, ScoringConfig, TrailingMode};
pub use exchange::{
    AccountExecution, InstrumentFilters, MarketData, OperatorChannel, OrderOutcome, OrderRequest,
};
pub use indicators::{compute_features, FeatureRow, TrendDirection};
pub use journal::{EventKind, TradeJournal, TradeRecord};
pub use regime::{detect_regime, Regime};
pub use runner::BotRunner;
pub use scoring::{score_signal, Score, ScoreBreakdown};
pub use state::{StateStore, SymbolState};
pub use telegram::{StatusInfo, TelegramChannel};
pub use types::{Candle, Metrics, PositionSnapshot, PositionView, Side};
