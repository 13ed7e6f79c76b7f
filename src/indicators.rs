//! Feature pipeline: turns raw candles into an indicator-augmented series.
//!
//! All indicators are computed in a single forward pass per series with a
//! one-step lookback, so the output is reproducible index-for-index for a
//! given candle input. Rows where a lookback window is not yet satisfied
//! carry `None` rather than a coerced zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::IndicatorConfig;
use crate::types::Candle;

/// EMA windows for the short/medium/long/anchor averages.
const EMA_WINDOWS: [usize; 4] = [9, 21, 50, 200];
/// Window shared by RSI, ADX and the ATR feature.
const OSC_WINDOW: usize = 14;
/// Volume moving-average window (mean of whatever is available early on).
const VOLUME_MA_WINDOW: usize = 20;

/// SuperTrend direction flag. Only flips when the close crosses the
/// currently active band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    Up,
    Down,
}

/// One candle plus every derived feature the scorer and the lifecycle
/// manager consume.
#[derive(Debug, Clone)]
pub struct FeatureRow {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub turnover: f64,
    pub ema_9: Option<f64>,
    pub ema_21: Option<f64>,
    pub ema_50: Option<f64>,
    pub ema_200: Option<f64>,
    pub rsi: Option<f64>,
    pub adx: Option<f64>,
    pub atr: Option<f64>,
    /// Cumulative typical-price VWAP; zero-volume rows report `None` and
    /// contribute nothing to the running sums.
    pub vwap: Option<f64>,
    pub obv: f64,
    pub vol_ma: f64,
    pub supertrend: Option<f64>,
    pub supertrend_upper: Option<f64>,
    pub supertrend_lower: Option<f64>,
    pub supertrend_dir: TrendDirection,
}

/// Compute the full feature series for `candles` (ascending by timestamp).
pub fn compute_features(candles: &[Candle], cfg: &IndicatorConfig) -> Vec<FeatureRow> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let ema_9 = ema(&closes, EMA_WINDOWS[0]);
    let ema_21 = ema(&closes, EMA_WINDOWS[1]);
    let ema_50 = ema(&closes, EMA_WINDOWS[2]);
    let ema_200 = ema(&closes, EMA_WINDOWS[3]);
    let rsi = rsi(&closes, OSC_WINDOW);
    let adx = adx(candles, OSC_WINDOW);
    let atr = wilder_atr(candles, OSC_WINDOW);
    let st = supertrend(candles, cfg.supertrend_period, cfg.supertrend_multiplier);

    let mut rows = Vec::with_capacity(candles.len());
    let mut pv_sum = 0.0;
    let mut v_sum = 0.0;
    let mut obv = 0.0;
    let mut vol_window_sum = 0.0;

    for (i, c) in candles.iter().enumerate() {
        // VWAP over typical price, skipping zero-volume rows entirely.
        let vwap = if c.volume > 0.0 {
            let tp = (c.high + c.low + c.close) / 3.0;
            pv_sum += tp * c.volume;
            v_sum += c.volume;
            Some(pv_sum / v_sum)
        } else {
            None
        };

        if i > 0 {
            let prev_close = candles[i - 1].close;
            if c.close > prev_close {
                obv += c.volume;
            } else if c.close < prev_close {
                obv -= c.volume;
            }
        }

        vol_window_sum += c.volume;
        if i >= VOLUME_MA_WINDOW {
            vol_window_sum -= candles[i - VOLUME_MA_WINDOW].volume;
        }
        let vol_ma = vol_window_sum / (i + 1).min(VOLUME_MA_WINDOW) as f64;

        rows.push(FeatureRow {
            timestamp: c.timestamp,
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.volume,
            turnover: c.turnover,
            ema_9: ema_9[i],
            ema_21: ema_21[i],
            ema_50: ema_50[i],
            ema_200: ema_200[i],
            rsi: rsi[i],
            adx: adx[i],
            atr: atr[i],
            vwap,
            obv,
            vol_ma,
            supertrend: st.line[i],
            supertrend_upper: st.upper[i],
            supertrend_lower: st.lower[i],
            supertrend_dir: st.dir[i],
        });
    }
    rows
}

/// Recursive EMA seeded from the first value, reported once `window`
/// samples have been seen.
fn ema(values: &[f64], window: usize) -> Vec<Option<f64>> {
    let alpha = 2.0 / (window as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut current = None;
    for (i, &v) in values.iter().enumerate() {
        current = Some(match current {
            None => v,
            Some(prev) => alpha * v + (1.0 - alpha) * prev,
        });
        out.push(if i + 1 >= window { current } else { None });
    }
    out
}

/// RSI with Wilder smoothing. Defined from index `window` onward.
fn rsi(closes: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if closes.len() < window + 1 {
        return out;
    }
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..closes.len() {
        let change = closes[i] - closes[i - 1];
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        if i <= window {
            avg_gain += gain;
            avg_loss += loss;
            if i == window {
                avg_gain /= window as f64;
                avg_loss /= window as f64;
                out[i] = Some(rsi_value(avg_gain, avg_loss));
            }
        } else {
            avg_gain = (avg_gain * (window as f64 - 1.0) + gain) / window as f64;
            avg_loss = (avg_loss * (window as f64 - 1.0) + loss) / window as f64;
            out[i] = Some(rsi_value(avg_gain, avg_loss));
        }
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

fn true_range(current: &Candle, prev_close: f64) -> f64 {
    (current.high - current.low)
        .max((current.high - prev_close).abs())
        .max((current.low - prev_close).abs())
}

/// ATR with Wilder smoothing over the true range. The first true range
/// needs a previous close, so the series is defined from index `window`.
fn wilder_atr(candles: &[Candle], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; candles.len()];
    let mut atr = 0.0;
    for i in 1..candles.len() {
        let tr = true_range(&candles[i], candles[i - 1].close);
        if i <= window {
            atr += tr;
            if i == window {
                atr /= window as f64;
                out[i] = Some(atr);
            }
        } else {
            atr = (atr * (window as f64 - 1.0) + tr) / window as f64;
            out[i] = Some(atr);
        }
    }
    out
}

/// ADX with Wilder smoothing of +DM/-DM and DX. Defined once two full
/// windows of data exist (index `2*window - 1`).
fn adx(candles: &[Candle], window: usize) -> Vec<Option<f64>> {
    let n = window as f64;
    let mut out = vec![None; candles.len()];
    let mut tr_sum = 0.0;
    let mut pdm_sum = 0.0;
    let mut ndm_sum = 0.0;
    let mut dx_seed_sum = 0.0;
    let mut dx_count = 0usize;
    let mut adx = 0.0;

    for i in 1..candles.len() {
        let tr = true_range(&candles[i], candles[i - 1].close);
        let up_move = candles[i].high - candles[i - 1].high;
        let down_move = candles[i - 1].low - candles[i].low;
        let pdm = if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        };
        let ndm = if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        };

        if i <= window {
            tr_sum += tr;
            pdm_sum += pdm;
            ndm_sum += ndm;
            if i < window {
                continue;
            }
        } else {
            tr_sum = tr_sum - tr_sum / n + tr;
            pdm_sum = pdm_sum - pdm_sum / n + pdm;
            ndm_sum = ndm_sum - ndm_sum / n + ndm;
        }

        let dx = if tr_sum > 0.0 {
            let di_plus = 100.0 * pdm_sum / tr_sum;
            let di_minus = 100.0 * ndm_sum / tr_sum;
            let di_total = di_plus + di_minus;
            if di_total > 0.0 {
                100.0 * (di_plus - di_minus).abs() / di_total
            } else {
                0.0
            }
        } else {
            0.0
        };

        if dx_count < window {
            dx_seed_sum += dx;
            dx_count += 1;
            if dx_count == window {
                adx = dx_seed_sum / n;
                out[i] = Some(adx);
            }
        } else {
            adx = (adx * (n - 1.0) + dx) / n;
            out[i] = Some(adx);
        }
    }
    out
}

struct SupertrendSeries {
    line: Vec<Option<f64>>,
    upper: Vec<Option<f64>>,
    lower: Vec<Option<f64>>,
    dir: Vec<TrendDirection>,
}

/// Classic SuperTrend over `(high + low) / 2 ± multiplier * ATR(period)`.
///
/// The final bands ratchet monotonically against the previous close and the
/// previous final band; the active line starts on the lower band pointing
/// up and only switches bands when the close crosses the band it currently
/// rides. Any state that matches none of the four transitions falls back to
/// the lower band pointing up — this tie-break is part of the contract.
fn supertrend(candles: &[Candle], period: usize, multiplier: f64) -> SupertrendSeries {
    let atr = wilder_atr(candles, period);
    let len = candles.len();
    let mut series = SupertrendSeries {
        line: vec![None; len],
        upper: vec![None; len],
        lower: vec![None; len],
        dir: vec![TrendDirection::Up; len],
    };

    let mut prev: Option<(f64, f64, f64)> = None; // (final_ub, final_lb, line)
    for i in 0..len {
        let Some(a) = atr[i] else {
            continue;
        };
        let hl2 = (candles[i].high + candles[i].low) / 2.0;
        let basic_ub = hl2 + multiplier * a;
        let basic_lb = hl2 - multiplier * a;
        let close = candles[i].close;

        let (final_ub, final_lb, line, dir) = match prev {
            None => (basic_ub, basic_lb, basic_lb, TrendDirection::Up),
            Some((p_ub, p_lb, p_line)) => {
                let prev_close = candles[i - 1].close;
                let final_ub = if prev_close > p_ub {
                    basic_ub
                } else {
                    basic_ub.min(p_ub)
                };
                let final_lb = if prev_close < p_lb {
                    basic_lb
                } else {
                    basic_lb.max(p_lb)
                };
                let (line, dir) = if p_line == p_ub && close <= final_ub {
                    (final_ub, TrendDirection::Down)
                } else if p_line == p_ub && close > final_ub {
                    (final_lb, TrendDirection::Up)
                } else if p_line == p_lb && close >= final_lb {
                    (final_lb, TrendDirection::Up)
                } else if p_line == p_lb && close < final_lb {
                    (final_ub, TrendDirection::Down)
                } else {
                    (final_lb, TrendDirection::Up)
                };
                (final_ub, final_lb, line, dir)
            }
        };

        series.line[i] = Some(line);
        series.upper[i] = Some(final_ub);
        series.lower[i] = Some(final_lb);
        series.dir[i] = dir;
        prev = Some((final_ub, final_lb, line));
    }
    series
}
