//! Market regime classification over the latest feature row and metrics.

use serde::{Deserialize, Serialize};

use crate::config::RegimeThresholds;
use crate::indicators::FeatureRow;
use crate::types::Metrics;

/// Prevailing market regime. Derived each cycle, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Regime {
    Trend,
    MeanReversion,
    Neutral,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Regime::Trend => write!(f, "trend"),
            Regime::MeanReversion => write!(f, "mean-reversion"),
            Regime::Neutral => write!(f, "neutral"),
        }
    }
}

/// Classify the regime. Pure function of its inputs:
/// - trend: strong ADX, strictly bullish EMA stack, and either a positive
///   basis or rising open interest;
/// - mean-reversion: weak ADX and a basis that is absent or flat;
/// - neutral otherwise.
pub fn detect_regime(rows: &[FeatureRow], metrics: &Metrics, cfg: &RegimeThresholds) -> Regime {
    let Some(last) = rows.last() else {
        return Regime::Neutral;
    };

    let trend_stack = matches!(
        (last.ema_9, last.ema_21, last.ema_50),
        (Some(e9), Some(e21), Some(e50)) if e9 > e21 && e21 > e50
    );
    let strong_adx = last.adx.map_or(false, |adx| adx > cfg.adx_trend);
    let basis_pos = metrics.basis.map_or(false, |b| b > 0.0);

    if strong_adx && trend_stack && (basis_pos || oi_rising(&metrics.open_interest, cfg.oi_window))
    {
        return Regime::Trend;
    }

    let weak_adx = last.adx.map_or(false, |adx| adx < cfg.adx_range);
    let basis_flat = metrics.basis.map_or(true, |b| b.abs() < cfg.basis_epsilon);
    if weak_adx && basis_flat {
        return Regime::MeanReversion;
    }

    Regime::Neutral
}

/// Open interest counts as rising when the latest of the last `window`
/// points exceeds the mean of the points before it. Fewer than two points
/// is never rising.
fn oi_rising(open_interest: &[f64], window: usize) -> bool {
    let start = open_interest.len().saturating_sub(window);
    let recent = &open_interest[start..];
    if recent.len() < 2 {
        return false;
    }
    let (head, last) = recent.split_at(recent.len() - 1);
    let mean = head.iter().sum::<f64>() / head.len() as f64;
    last[0] > mean
}
