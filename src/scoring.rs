//! Composite scorer: weighted multi-factor signal over the latest feature
//! row plus exchange microstructure metrics.
//!
//! Each sub-score is clamped to [-1, 1] before weighting. Missing inputs
//! (warm-up rows, absent metrics) contribute zero to their term.

use serde::Serialize;

use crate::config::ScoringConfig;
use crate::indicators::FeatureRow;
use crate::types::{round_dp, Metrics};

/// Per-factor breakdown, each component clamped to [-1, 1].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScoreBreakdown {
    pub ta: f64,
    pub derivatives: f64,
    pub volume: f64,
    pub volatility: f64,
}

/// Weighted signal score plus its component breakdown.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Score {
    pub total: f64,
    pub breakdown: ScoreBreakdown,
}

/// Score the latest row of `rows` against `metrics`. The full series is
/// needed only for the ATR normalization window in the volatility factor.
pub fn score_signal(rows: &[FeatureRow], metrics: &Metrics, cfg: &ScoringConfig) -> Score {
    let ta = ta_subscore(rows, cfg);
    let derivatives = derivatives_subscore(metrics, cfg);
    let volume = volume_subscore(rows, cfg);
    let volatility = volatility_subscore(rows, cfg);

    let w = &cfg.weights;
    let total =
        ta * w.ta + derivatives * w.derivatives + volume * w.volume + volatility * w.volatility;

    Score {
        total: round_dp(total, 2),
        breakdown: ScoreBreakdown {
            ta: round_dp(ta, 3),
            derivatives: round_dp(derivatives, 3),
            volume: round_dp(volume, 3),
            volatility: round_dp(volatility, 3),
        },
    }
}

fn clamp_unit(value: f64) -> f64 {
    value.clamp(-1.0, 1.0)
}

/// EMA stack, trend strength, oscillator extremes and VWAP alignment.
fn ta_subscore(rows: &[FeatureRow], cfg: &ScoringConfig) -> f64 {
    let Some(last) = rows.last() else {
        return 0.0;
    };
    let p = &cfg.ta;
    let mut s = 0.0;

    if let (Some(e9), Some(e21), Some(e50)) = (last.ema_9, last.ema_21, last.ema_50) {
        if e9 > e21 && e21 > e50 {
            s += p.ema_stack_bonus;
        } else if e9 < e21 && e21 < e50 {
            s -= p.ema_stack_bonus;
        }
    }

    if let Some(adx) = last.adx {
        if adx >= p.adx_trend {
            s += p.adx_score;
        }
    }

    if let Some(rsi) = last.rsi {
        if rsi >= p.rsi_hot || rsi <= p.rsi_cold {
            s += p.rsi_score;
        }
    }

    if let Some(vwap) = last.vwap {
        if last.close >= vwap {
            s += p.vwap_alignment;
        } else {
            s -= p.vwap_alignment;
        }
    }

    clamp_unit(s)
}

/// Funding sign, basis sign and long/short crowding, independently summed.
fn derivatives_subscore(metrics: &Metrics, cfg: &ScoringConfig) -> f64 {
    let p = &cfg.derivatives;
    let mut s = 0.0;

    if let Some(funding) = metrics.funding {
        if funding > 0.0 {
            s += p.funding_pos;
        } else if funding < 0.0 {
            s += p.funding_neg;
        }
    }

    if let Some(basis) = metrics.basis {
        if basis > 0.0 {
            s += p.basis_pos;
        } else if basis < 0.0 {
            s += p.basis_neg;
        }
    }

    if let Some(&lsr) = metrics.long_short_ratio.last() {
        if lsr > 1.0 {
            s += p.lsr_pos;
        } else if lsr < 1.0 {
            s += p.lsr_neg;
        }
    }

    clamp_unit(s)
}

/// Volume surge vs. its moving average, with linear interpolation toward
/// zero between the surge and lull thresholds.
fn volume_subscore(rows: &[FeatureRow], cfg: &ScoringConfig) -> f64 {
    let Some(last) = rows.last() else {
        return 0.0;
    };
    let p = &cfg.volume;
    if last.vol_ma <= 0.0 {
        return 0.0;
    }
    let surge = last.volume / last.vol_ma.max(1e-9);
    if surge >= p.surge_hi {
        return p.score_hi;
    }
    if surge <= p.surge_lo {
        return p.score_lo;
    }
    let mid = 1.0;
    if surge >= mid {
        let frac = (surge - mid) / (p.surge_hi - mid).max(1e-9);
        frac * p.score_hi
    } else {
        let frac = (mid - surge) / (mid - p.surge_lo).max(1e-9);
        -frac * p.score_lo.abs()
    }
}

/// ATR regime (hot/cold vs. its own moving average) plus an ATR-normalized
/// momentum term against the mid-term EMA.
fn volatility_subscore(rows: &[FeatureRow], cfg: &ScoringConfig) -> f64 {
    let Some(last) = rows.last() else {
        return 0.0;
    };
    let p = &cfg.volatility;
    let Some(atr) = last.atr else {
        return 0.0;
    };
    if atr <= 0.0 {
        return 0.0;
    }

    // Rolling mean over the defined ATR values in the window.
    let window_start = rows.len().saturating_sub(p.atr_ma_window);
    let recent: Vec<f64> = rows[window_start..].iter().filter_map(|r| r.atr).collect();
    let atr_ma = if recent.is_empty() {
        atr
    } else {
        recent.iter().sum::<f64>() / recent.len() as f64
    };
    let ratio = atr / atr_ma.max(1e-9);

    let mut s = 0.0;
    if ratio >= p.hot_ratio {
        s += p.score_hot;
    } else if ratio <= p.cold_ratio {
        s += p.score_cold;
    }

    let ema_21 = last.ema_21.unwrap_or(last.close);
    let z = (last.close - ema_21) / atr.max(1e-9);
    if z >= p.z_momentum_hi {
        s += p.score_z_hi;
    } else if z <= p.z_momentum_lo {
        s += p.score_z_lo;
    }

    clamp_unit(s)
}
