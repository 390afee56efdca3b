//! The indicator kernel: pure functions computing trend, momentum,
//! volatility, and volume indicators over a bounded historical window.
//!
//! Every function takes plain `&[f64]`/`&[Candle]` slices in chronological
//! order (oldest first, last element is "now") and returns `None` when the
//! window is too short — callers never panic on short history.

use serde::{Deserialize, Serialize};

use crate::domain::types::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolatilityLevel {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stochastic {
    pub k: f64,
    pub d: f64,
}

/// The full indicator set computed for one candle against its history
///. Every numeric field is `None` when the
/// supporting window is shorter than the indicator needs.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub sma20: Option<f64>,
    pub sma50: Option<f64>,
    pub ema12: Option<f64>,
    pub ema26: Option<f64>,
    pub macd: Option<Macd>,
    pub rsi14: Option<f64>,
    pub stochastic: Option<Stochastic>,
    pub williams_r14: Option<f64>,
    pub bollinger: Option<BollingerBands>,
    pub atr14: Option<f64>,
    pub vwap: Option<f64>,
    pub obv: Option<f64>,
    pub volume_ma20: Option<f64>,

    pub trend_direction: Option<Direction>,
    pub trend_strength: Option<f64>,
    pub momentum_direction: Option<Direction>,
    pub momentum_strength: Option<f64>,
    pub volatility_level: Option<VolatilityLevel>,
    pub volatility_percent: Option<f64>,
}

fn to_f64(d: rust_decimal::Decimal) -> f64 {
    rust_decimal::prelude::ToPrimitive::to_f64(&d).unwrap_or(0.0)
}

/// Simple moving average of the last `n` values. `None` if `values.len() < n`.
pub fn sma(values: &[f64], n: usize) -> Option<f64> {
    if n == 0 || values.len() < n {
        return None;
    }
    let window = &values[values.len() - n..];
    Some(window.iter().sum::<f64>() / n as f64)
}

/// Full EMA series seeded with SMA(n) over the first n points. Returns one value per input starting at index `n - 1`;
/// `None` if there aren't enough points to seed.
pub fn ema_series(values: &[f64], n: usize) -> Option<Vec<f64>> {
    if n == 0 || values.len() < n {
        return None;
    }
    let alpha = 2.0 / (n as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len() - n + 1);
    let seed = values[..n].iter().sum::<f64>() / n as f64;
    out.push(seed);
    for &v in &values[n..] {
        let prev = *out.last().expect("seed pushed above");
        out.push(alpha * v + (1.0 - alpha) * prev);
    }
    Some(out)
}

/// The last value of the EMA(n) series.
pub fn ema(values: &[f64], n: usize) -> Option<f64> {
    ema_series(values, n).map(|s| *s.last().expect("non-empty by construction"))
}

/// MACD(12,26,9): line = EMA12 - EMA26; signal = EMA9 of the line, seeded
/// with SMA9 of the line; histogram = line - signal.
pub fn macd(closes: &[f64]) -> Option<Macd> {
    let ema12 = ema_series(closes, 12)?;
    let ema26 = ema_series(closes, 26)?;
    // Align both series to the tail shared by both (ema26 is shorter-lived).
    let offset = ema12.len() - ema26.len();
    let line_series: Vec<f64> = ema12[offset..]
        .iter()
        .zip(ema26.iter())
        .map(|(a, b)| a - b)
        .collect();
    if line_series.len() < 9 {
        return None;
    }
    let signal_series = ema_series(&line_series, 9)?;
    let line = *line_series.last().expect("checked len >= 9");
    let signal = *signal_series.last().expect("ema_series non-empty");
    Some(Macd {
        line,
        signal,
        histogram: line - signal,
    })
}

/// RSI(14), Wilder's smoothing. `None` if fewer than 15 closes
/// (14 deltas) are available.
pub fn rsi14(closes: &[f64]) -> Option<f64> {
    rsi(closes, 14)
}

pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < period + 1 {
        return None;
    }
    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let mut avg_gain = deltas[..period].iter().map(|d| d.max(0.0)).sum::<f64>() / period as f64;
    let mut avg_loss = deltas[..period].iter().map(|d| (-d).max(0.0)).sum::<f64>() / period as f64;

    for &d in &deltas[period..] {
        let gain = d.max(0.0);
        let loss = (-d).max(0.0);
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Stochastic(14,3): %K from the 14-period high/low range, %D = SMA3 of %K.
pub fn stochastic(highs: &[f64], lows: &[f64], closes: &[f64], period: usize, d_period: usize) -> Option<Stochastic> {
    if closes.len() < period + d_period - 1 {
        return None;
    }
    let mut k_series = Vec::with_capacity(d_period);
    for i in (closes.len() - d_period)..closes.len() {
        let window_start = i + 1 - period;
        let hh = highs[window_start..=i].iter().cloned().fold(f64::MIN, f64::max);
        let ll = lows[window_start..=i].iter().cloned().fold(f64::MAX, f64::min);
        let k = if hh > ll {
            100.0 * (closes[i] - ll) / (hh - ll)
        } else {
            50.0
        };
        k_series.push(k);
    }
    let k = *k_series.last().expect("d_period >= 1");
    let d = k_series.iter().sum::<f64>() / k_series.len() as f64;
    Some(Stochastic { k, d })
}

/// Williams %R(14).
pub fn williams_r(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < period {
        return None;
    }
    let start = closes.len() - period;
    let hh = highs[start..].iter().cloned().fold(f64::MIN, f64::max);
    let ll = lows[start..].iter().cloned().fold(f64::MAX, f64::min);
    let close = *closes.last().expect("non-empty");
    if hh <= ll {
        return Some(0.0);
    }
    Some(-100.0 * (hh - close) / (hh - ll))
}

/// Bollinger(20,2): middle = SMA20, bands = middle +/- 2*population-stddev.
pub fn bollinger(closes: &[f64], n: usize, k: f64) -> Option<BollingerBands> {
    let middle = sma(closes, n)?;
    let window = &closes[closes.len() - n..];
    let variance = window.iter().map(|v| (v - middle).powi(2)).sum::<f64>() / n as f64;
    let stddev = variance.sqrt();
    Some(BollingerBands {
        upper: middle + k * stddev,
        middle,
        lower: middle - k * stddev,
    })
}

/// True Range at index `i`: `i == 0` has no prior
/// close, so TR collapses to `high - low`.
fn true_range(highs: &[f64], lows: &[f64], closes: &[f64], i: usize) -> f64 {
    let hl = highs[i] - lows[i];
    if i == 0 {
        return hl;
    }
    let hc = (highs[i] - closes[i - 1]).abs();
    let lc = (lows[i] - closes[i - 1]).abs();
    hl.max(hc).max(lc)
}

/// ATR(14), Wilder smoothing of True Range.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < period + 1 {
        return None;
    }
    let trs: Vec<f64> = (0..closes.len())
        .map(|i| true_range(highs, lows, closes, i))
        .collect();
    // Wilder seeds with the simple mean of the first `period` true ranges
    // (indices 1..=period, since index 0 has no prior close to form a TR
    // comparable to the rest of the window).
    let mut avg = trs[1..=period].iter().sum::<f64>() / period as f64;
    for &tr in &trs[period + 1..] {
        avg = (avg * (period as f64 - 1.0) + tr) / period as f64;
    }
    Some(avg)
}

/// VWAP over the full supplied window: cumulative typical-price*volume over
/// cumulative volume.
pub fn vwap(highs: &[f64], lows: &[f64], closes: &[f64], volumes: &[f64]) -> Option<f64> {
    if closes.is_empty() || volumes.iter().sum::<f64>() <= 0.0 {
        return None;
    }
    let mut pv = 0.0;
    let mut v = 0.0;
    for i in 0..closes.len() {
        let typical = (highs[i] + lows[i] + closes[i]) / 3.0;
        pv += typical * volumes[i];
        v += volumes[i];
    }
    Some(pv / v)
}

/// On-balance volume: running sum, +volume on higher close, -volume on
/// lower close, unchanged on equal close.
pub fn obv(closes: &[f64], volumes: &[f64]) -> Option<f64> {
    if closes.len() < 2 {
        return None;
    }
    let mut acc = 0.0;
    for i in 1..closes.len() {
        if closes[i] > closes[i - 1] {
            acc += volumes[i];
        } else if closes[i] < closes[i - 1] {
            acc -= volumes[i];
        }
    }
    Some(acc)
}

/// Extracts parallel `(highs, lows, closes, volumes)` f64 vectors from a
/// chronological candle history, appending `current` at the tail.
pub fn series_with_current(history: &[Candle], current: &Candle) -> (Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>) {
    let n = history.len() + 1;
    let mut highs = Vec::with_capacity(n);
    let mut lows = Vec::with_capacity(n);
    let mut closes = Vec::with_capacity(n);
    let mut volumes = Vec::with_capacity(n);
    for c in history.iter().chain(std::iter::once(current)) {
        highs.push(to_f64(c.high));
        lows.push(to_f64(c.low));
        closes.push(to_f64(c.close));
        volumes.push(c.volume as f64);
    }
    (highs, lows, closes, volumes)
}

/// Computes the full [`IndicatorSet`] for `current` given `history`
/// (chronologically ordered, ending immediately before `current`). Never
/// panics: every indicator degrades to `None` independently when its
/// window is short.
pub fn compute_indicators(history: &[Candle], current: &Candle) -> IndicatorSet {
    let (highs, lows, closes, volumes) = series_with_current(history, current);
    let price = to_f64(current.close);

    let mut set = IndicatorSet {
        sma20: sma(&closes, 20),
        sma50: sma(&closes, 50),
        ema12: ema(&closes, 12),
        ema26: ema(&closes, 26),
        macd: macd(&closes),
        rsi14: rsi14(&closes),
        stochastic: stochastic(&highs, &lows, &closes, 14, 3),
        williams_r14: williams_r(&highs, &lows, &closes, 14),
        bollinger: bollinger(&closes, 20, 2.0),
        atr14: atr(&highs, &lows, &closes, 14),
        vwap: vwap(&highs, &lows, &closes, &volumes),
        obv: obv(&closes, &volumes),
        volume_ma20: sma(&volumes, 20),
        trend_direction: None,
        trend_strength: None,
        momentum_direction: None,
        momentum_strength: None,
        volatility_level: None,
        volatility_percent: None,
    };

    derive_trend(&mut set, price);
    derive_momentum(&mut set);
    derive_volatility(&mut set, price);
    set
}

fn derive_trend(set: &mut IndicatorSet, price: f64) {
    let (Some(sma20), Some(sma50)) = (set.sma20, set.sma50) else {
        return;
    };
    let macd_sign = set.macd.map(|m| m.line.signum()).unwrap_or(0.0);
    let sma_sign = (sma20 - sma50).signum();

    set.trend_direction = Some(if sma_sign > 0.0 && macd_sign >= 0.0 {
        Direction::Bullish
    } else if sma_sign < 0.0 && macd_sign <= 0.0 {
        Direction::Bearish
    } else {
        Direction::Neutral
    });

    let sma_gap_pct = if price > 0.0 {
        ((sma20 - sma50) / price).abs() * 100.0
    } else {
        0.0
    };
    let macd_magnitude = set.macd.map(|m| (m.line.abs() / price.max(1e-9)) * 100.0).unwrap_or(0.0);
    set.trend_strength = Some((sma_gap_pct * 50.0 + macd_magnitude * 50.0).clamp(0.0, 100.0));
}

fn derive_momentum(set: &mut IndicatorSet) {
    let Some(rsi) = set.rsi14 else {
        return;
    };
    set.momentum_direction = Some(if rsi > 55.0 {
        Direction::Bullish
    } else if rsi < 45.0 {
        Direction::Bearish
    } else {
        Direction::Neutral
    });
    set.momentum_strength = Some((rsi - 50.0).abs() * 2.0);
}

fn derive_volatility(set: &mut IndicatorSet, price: f64) {
    let Some(atr) = set.atr14 else {
        return;
    };
    if price <= 0.0 {
        return;
    }
    let pct = atr / price * 100.0;
    set.volatility_percent = Some(pct);
    set.volatility_level = Some(if pct < 1.0 {
        VolatilityLevel::Low
    } else if pct <= 3.0 {
        VolatilityLevel::Normal
    } else {
        VolatilityLevel::High
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use crate::domain::timeframe::Timeframe;
    use crate::domain::types::Symbol;

    fn flat_candle(close: Decimal) -> Candle {
        Candle {
            symbol: Symbol::new("TEST"),
            timeframe: Timeframe::OneMin,
            bucket_start: Utc::now(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 100,
        }
    }

    #[test]
    fn sma_needs_full_window() {
        let v = vec![1.0, 2.0, 3.0];
        assert_eq!(sma(&v, 4), None);
        assert_eq!(sma(&v, 3), Some(2.0));
    }

    #[test]
    fn flat_history_yields_flat_sma_and_bollinger() {
        // 20 closes of 100.00, then a 21st of 100.00.
        let history: Vec<Candle> = (0..20).map(|_| flat_candle(dec!(100.00))).collect();
        let current = flat_candle(dec!(100.00));
        let ind = compute_indicators(&history, &current);

        assert_eq!(ind.sma20, Some(100.0));
        let bb = ind.bollinger.expect("20 candles is enough for bollinger(20)");
        assert!((bb.middle - 100.0).abs() < 1e-9);
        assert!((bb.upper - 100.0).abs() < 1e-9);
        assert!((bb.lower - 100.0).abs() < 1e-9);

        // All deltas are zero: avg_loss == 0 => RSI defined as 100.
        assert_eq!(ind.rsi14, Some(100.0));
    }

    #[test]
    fn rsi_and_atr_unset_below_minimum_history() {
        let history: Vec<Candle> = (0..5).map(|i| flat_candle(Decimal::from(100 + i))).collect();
        let current = flat_candle(dec!(106));
        let ind = compute_indicators(&history, &current);
        assert_eq!(ind.rsi14, None);
        assert_eq!(ind.atr14, None);
        assert_eq!(ind.stochastic, None);
        assert_eq!(ind.williams_r14, None);
    }

    #[test]
    fn bollinger_bounds_ordering_holds() {
        let closes = [100.0, 101.0, 99.0, 102.0, 98.0, 103.0, 97.0, 104.0, 96.0, 105.0, 95.0, 106.0, 94.0, 107.0, 93.0, 108.0, 92.0, 109.0, 91.0, 110.0];
        let bb = bollinger(&closes, 20, 2.0).unwrap();
        assert!(bb.lower <= bb.middle);
        assert!(bb.middle <= bb.upper);
    }

    #[test]
    fn obv_tracks_close_direction() {
        let closes = [100.0, 101.0, 100.5, 100.5, 102.0];
        let volumes = [10.0, 5.0, 3.0, 7.0, 9.0];
        // +5 (up) -3 (down) +0 (flat) +9 (up) = 11
        assert_eq!(obv(&closes, &volumes), Some(11.0));
    }

    #[test]
    fn atr_is_never_negative() {
        let highs = [10.0, 11.0, 9.0, 12.0, 8.0, 13.0, 7.0, 14.0, 6.0, 15.0, 5.0, 16.0, 4.0, 17.0, 3.0];
        let lows = [9.0, 9.5, 8.0, 10.0, 7.0, 11.0, 6.0, 12.0, 5.0, 13.0, 4.0, 14.0, 3.0, 15.0, 2.0];
        let closes = [9.5, 10.0, 8.5, 11.0, 7.5, 12.0, 6.5, 13.0, 5.5, 14.0, 4.5, 15.0, 3.5, 16.0, 2.5];
        let value = atr(&highs, &lows, &closes, 14).unwrap();
        assert!(value >= 0.0);
    }
}
