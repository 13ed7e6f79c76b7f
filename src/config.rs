//! Bot configuration, loaded from a YAML file with per-field defaults.

use std::path::Path;

use serde::Deserialize;
use tracing::info;

/// Top-level bot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Candle interval in the exchange's notation (minutes).
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Candles fetched per cycle; 200 gives the indicators room to warm up.
    #[serde(default = "default_candle_limit")]
    pub candle_limit: u32,
    #[serde(default)]
    pub testnet: bool,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    /// Fraction of equity risked per entry.
    #[serde(default = "default_risk_pct")]
    pub risk_pct: f64,
    /// Signal score required to enter or scale in.
    #[serde(default = "default_signal_threshold")]
    pub signal_threshold: f64,
    /// Minimum seconds between entries and between scale-ins.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Durable per-symbol state file.
    #[serde(default = "default_state_file")]
    pub state_file: String,
    /// Trade journal file (JSON lines).
    #[serde(default = "default_journal_file")]
    pub journal_file: String,
    #[serde(default)]
    pub indicators: IndicatorConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub regime: RegimeThresholds,
}

impl BotConfig {
    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            let config: BotConfig = serde_yaml::from_str(&raw)?;
            info!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            info!("No config file at {}, using defaults", path.display());
            Ok(BotConfig::default())
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            interval: default_interval(),
            candle_limit: default_candle_limit(),
            testnet: false,
            leverage: default_leverage(),
            risk_pct: default_risk_pct(),
            signal_threshold: default_signal_threshold(),
            cooldown_secs: default_cooldown_secs(),
            state_file: default_state_file(),
            journal_file: default_journal_file(),
            indicators: IndicatorConfig::default(),
            risk: RiskConfig::default(),
            scoring: ScoringConfig::default(),
            regime: RegimeThresholds::default(),
        }
    }
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}
fn default_interval() -> String {
    "1".to_string()
}
fn default_candle_limit() -> u32 {
    200
}
fn default_leverage() -> u32 {
    10
}
fn default_risk_pct() -> f64 {
    0.01
}
fn default_signal_threshold() -> f64 {
    1.8
}
fn default_cooldown_secs() -> u64 {
    30
}
fn default_state_file() -> String {
    "runtime_state.json".to_string()
}
fn default_journal_file() -> String {
    "logs/trades.jsonl".to_string()
}

/// Feature pipeline parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct IndicatorConfig {
    #[serde(default = "default_supertrend_period")]
    pub supertrend_period: usize,
    #[serde(default = "default_supertrend_multiplier")]
    pub supertrend_multiplier: f64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            supertrend_period: default_supertrend_period(),
            supertrend_multiplier: default_supertrend_multiplier(),
        }
    }
}

fn default_supertrend_period() -> usize {
    10
}
fn default_supertrend_multiplier() -> f64 {
    3.0
}

/// How the trailing stop candidate is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrailingMode {
    /// Follow the SuperTrend band on the loss side (default).
    #[default]
    Supertrend,
    /// Trail at a fixed ATR multiple from price.
    Atr,
}

/// Sizing, stop and take-profit parameters. All multiples are in ATR units.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_atr_k_sl")]
    pub atr_k_sl: f64,
    #[serde(default = "default_atr_k_tp1")]
    pub atr_k_tp1: f64,
    #[serde(default = "default_atr_k_tp2")]
    pub atr_k_tp2: f64,
    /// In-favor move required before the stop is promoted to breakeven.
    #[serde(default = "default_atr_k_be")]
    pub atr_k_be: f64,
    #[serde(default)]
    pub trailing: TrailingMode,
    #[serde(default = "default_trailing_k_atr")]
    pub trailing_k_atr: f64,
    /// Percentage offsets used when no ATR is available yet.
    #[serde(default = "default_fallback_sl_pct")]
    pub fallback_sl_pct: f64,
    #[serde(default = "default_fallback_tp_pct")]
    pub fallback_tp_pct: f64,
    /// Fractions of the original position closed at TP1/TP2.
    #[serde(default = "default_partial_tp1_pct")]
    pub partial_tp1_pct: f64,
    #[serde(default = "default_partial_tp2_pct")]
    pub partial_tp2_pct: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            atr_k_sl: default_atr_k_sl(),
            atr_k_tp1: default_atr_k_tp1(),
            atr_k_tp2: default_atr_k_tp2(),
            atr_k_be: default_atr_k_be(),
            trailing: TrailingMode::default(),
            trailing_k_atr: default_trailing_k_atr(),
            fallback_sl_pct: default_fallback_sl_pct(),
            fallback_tp_pct: default_fallback_tp_pct(),
            partial_tp1_pct: default_partial_tp1_pct(),
            partial_tp2_pct: default_partial_tp2_pct(),
        }
    }
}

fn default_atr_k_sl() -> f64 {
    1.0
}
fn default_atr_k_tp1() -> f64 {
    1.0
}
fn default_atr_k_tp2() -> f64 {
    2.0
}
fn default_atr_k_be() -> f64 {
    0.5
}
fn default_trailing_k_atr() -> f64 {
    1.0
}
fn default_fallback_sl_pct() -> f64 {
    0.008
}
fn default_fallback_tp_pct() -> f64 {
    0.012
}
fn default_partial_tp1_pct() -> f64 {
    0.30
}
fn default_partial_tp2_pct() -> f64 {
    0.30
}

/// Weights applied to the four sub-scores. The defaults sum to 1.0, which
/// keeps the total score interpretable, but this is not enforced.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoreWeights {
    #[serde(default = "default_weight_ta")]
    pub ta: f64,
    #[serde(default = "default_weight_derivatives")]
    pub derivatives: f64,
    #[serde(default = "default_weight_volume")]
    pub volume: f64,
    #[serde(default = "default_weight_volatility")]
    pub volatility: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            ta: default_weight_ta(),
            derivatives: default_weight_derivatives(),
            volume: default_weight_volume(),
            volatility: default_weight_volatility(),
        }
    }
}

fn default_weight_ta() -> f64 {
    0.45
}
fn default_weight_derivatives() -> f64 {
    0.25
}
fn default_weight_volume() -> f64 {
    0.15
}
fn default_weight_volatility() -> f64 {
    0.15
}

/// Technical-analysis sub-score parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct TaScoreParams {
    /// Bonus/penalty when the short/medium/long EMAs are strictly stacked.
    #[serde(default = "default_ema_stack_bonus")]
    pub ema_stack_bonus: f64,
    #[serde(default = "default_adx_trend")]
    pub adx_trend: f64,
    #[serde(default = "default_adx_score")]
    pub adx_score: f64,
    #[serde(default = "default_rsi_hot")]
    pub rsi_hot: f64,
    #[serde(default = "default_rsi_cold")]
    pub rsi_cold: f64,
    /// Penalty applied in either RSI extreme zone.
    #[serde(default = "default_rsi_score")]
    pub rsi_score: f64,
    #[serde(default = "default_vwap_alignment")]
    pub vwap_alignment: f64,
}

impl Default for TaScoreParams {
    fn default() -> Self {
        Self {
            ema_stack_bonus: default_ema_stack_bonus(),
            adx_trend: default_adx_trend(),
            adx_score: default_adx_score(),
            rsi_hot: default_rsi_hot(),
            rsi_cold: default_rsi_cold(),
            rsi_score: default_rsi_score(),
            vwap_alignment: default_vwap_alignment(),
        }
    }
}

fn default_ema_stack_bonus() -> f64 {
    0.4
}
fn default_adx_trend() -> f64 {
    25.0
}
fn default_adx_score() -> f64 {
    0.2
}
fn default_rsi_hot() -> f64 {
    70.0
}
fn default_rsi_cold() -> f64 {
    30.0
}
fn default_rsi_score() -> f64 {
    -0.1
}
fn default_vwap_alignment() -> f64 {
    0.1
}

/// Derivatives (funding/basis/long-short ratio) sub-score parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct DerivativesScoreParams {
    #[serde(default = "default_funding_pos")]
    pub funding_pos: f64,
    #[serde(default = "default_funding_neg")]
    pub funding_neg: f64,
    #[serde(default = "default_basis_pos")]
    pub basis_pos: f64,
    #[serde(default = "default_basis_neg")]
    pub basis_neg: f64,
    #[serde(default = "default_lsr_pos")]
    pub lsr_pos: f64,
    #[serde(default = "default_lsr_neg")]
    pub lsr_neg: f64,
}

impl Default for DerivativesScoreParams {
    fn default() -> Self {
        Self {
            funding_pos: default_funding_pos(),
            funding_neg: default_funding_neg(),
            basis_pos: default_basis_pos(),
            basis_neg: default_basis_neg(),
            lsr_pos: default_lsr_pos(),
            lsr_neg: default_lsr_neg(),
        }
    }
}

fn default_funding_pos() -> f64 {
    0.05
}
fn default_funding_neg() -> f64 {
    -0.05
}
fn default_basis_pos() -> f64 {
    0.1
}
fn default_basis_neg() -> f64 {
    -0.1
}
fn default_lsr_pos() -> f64 {
    0.1
}
fn default_lsr_neg() -> f64 {
    -0.1
}

/// Volume-surge sub-score parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct VolumeScoreParams {
    /// volume / vol_ma above this counts as a surge.
    #[serde(default = "default_surge_hi")]
    pub surge_hi: f64,
    /// Below this counts as a lull.
    #[serde(default = "default_surge_lo")]
    pub surge_lo: f64,
    #[serde(default = "default_volume_score_hi")]
    pub score_hi: f64,
    #[serde(default = "default_volume_score_lo")]
    pub score_lo: f64,
}

impl Default for VolumeScoreParams {
    fn default() -> Self {
        Self {
            surge_hi: default_surge_hi(),
            surge_lo: default_surge_lo(),
            score_hi: default_volume_score_hi(),
            score_lo: default_volume_score_lo(),
        }
    }
}

fn default_surge_hi() -> f64 {
    1.5
}
fn default_surge_lo() -> f64 {
    0.7
}
fn default_volume_score_hi() -> f64 {
    0.6
}
fn default_volume_score_lo() -> f64 {
    -0.4
}

/// Volatility/momentum sub-score parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct VolatilityScoreParams {
    #[serde(default = "default_atr_ma_window")]
    pub atr_ma_window: usize,
    /// atr / atr_ma above this marks a hot market.
    #[serde(default = "default_hot_ratio")]
    pub hot_ratio: f64,
    #[serde(default = "default_cold_ratio")]
    pub cold_ratio: f64,
    #[serde(default = "default_score_hot")]
    pub score_hot: f64,
    #[serde(default = "default_score_cold")]
    pub score_cold: f64,
    /// Thresholds on (close - ema21) / atr.
    #[serde(default = "default_z_momentum_hi")]
    pub z_momentum_hi: f64,
    #[serde(default = "default_z_momentum_lo")]
    pub z_momentum_lo: f64,
    #[serde(default = "default_score_z_hi")]
    pub score_z_hi: f64,
    #[serde(default = "default_score_z_lo")]
    pub score_z_lo: f64,
}

impl Default for VolatilityScoreParams {
    fn default() -> Self {
        Self {
            atr_ma_window: default_atr_ma_window(),
            hot_ratio: default_hot_ratio(),
            cold_ratio: default_cold_ratio(),
            score_hot: default_score_hot(),
            score_cold: default_score_cold(),
            z_momentum_hi: default_z_momentum_hi(),
            z_momentum_lo: default_z_momentum_lo(),
            score_z_hi: default_score_z_hi(),
            score_z_lo: default_score_z_lo(),
        }
    }
}

fn default_atr_ma_window() -> usize {
    20
}
fn default_hot_ratio() -> f64 {
    1.2
}
fn default_cold_ratio() -> f64 {
    0.8
}
fn default_score_hot() -> f64 {
    0.3
}
fn default_score_cold() -> f64 {
    -0.3
}
fn default_z_momentum_hi() -> f64 {
    0.6
}
fn default_z_momentum_lo() -> f64 {
    -0.6
}
fn default_score_z_hi() -> f64 {
    0.2
}
fn default_score_z_lo() -> f64 {
    -0.2
}

/// All scoring parameters grouped.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: ScoreWeights,
    #[serde(default)]
    pub ta: TaScoreParams,
    #[serde(default)]
    pub derivatives: DerivativesScoreParams,
    #[serde(default)]
    pub volume: VolumeScoreParams,
    #[serde(default)]
    pub volatility: VolatilityScoreParams,
}

/// Regime classifier thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct RegimeThresholds {
    /// ADX above this supports a trend label.
    #[serde(default = "default_regime_adx_trend")]
    pub adx_trend: f64,
    /// ADX below this supports a mean-reversion label.
    #[serde(default = "default_regime_adx_range")]
    pub adx_range: f64,
    /// |basis| below this counts as flat for mean-reversion.
    #[serde(default = "default_basis_epsilon")]
    pub basis_epsilon: f64,
    /// Open-interest points inspected for the rising test.
    #[serde(default = "default_oi_window")]
    pub oi_window: usize,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            adx_trend: default_regime_adx_trend(),
            adx_range: default_regime_adx_range(),
            basis_epsilon: default_basis_epsilon(),
            oi_window: default_oi_window(),
        }
    }
}

fn default_regime_adx_trend() -> f64 {
    25.0
}
fn default_regime_adx_range() -> f64 {
    18.0
}
fn default_basis_epsilon() -> f64 {
    1e-6
}
fn default_oi_window() -> usize {
    10
}
