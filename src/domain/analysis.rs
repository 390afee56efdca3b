//! Candlestick/chart-pattern, regime, and support/resistance analysis.

use serde::{Deserialize, Serialize};

use crate::domain::indicators::Direction;
use crate::domain::types::Candle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandlestickPattern {
    pub name: &'static str,
    pub kind: Direction,
    pub strength: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChartPatternKind {
    Breakout,
    Reversal,
    Continuation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPattern {
    pub name: &'static str,
    pub kind: ChartPatternKind,
    pub direction: Direction,
    pub strength: f64,
    pub target: Option<f64>,
    pub stop: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegimePhase {
    Accumulation,
    Markup,
    Distribution,
    Markdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketRegime {
    pub phase: RegimePhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SrSide {
    Support,
    Resistance,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SupportResistanceLevel {
    pub price: f64,
    pub side: SrSide,
    pub touches: usize,
    pub strength: f64,
    pub confidence: f64,
    pub last_touch_age: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurrentPosition {
    NearSupport,
    NearResistance,
    Middle,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisSet {
    pub candlestick_patterns: Vec<CandlestickPattern>,
    pub chart_patterns: Vec<ChartPattern>,
    pub regime: Option<MarketRegime>,
    pub levels: Vec<SupportResistanceLevel>,
    pub current_position: Option<CurrentPosition>,
}

struct Ohlc {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

fn ohlc(c: &Candle) -> Ohlc {
    use rust_decimal::prelude::ToPrimitive;
    Ohlc {
        open: c.open.to_f64().unwrap_or(0.0),
        high: c.high.to_f64().unwrap_or(0.0),
        low: c.low.to_f64().unwrap_or(0.0),
        close: c.close.to_f64().unwrap_or(0.0),
    }
}

impl Ohlc {
    fn range(&self) -> f64 {
        self.high - self.low
    }
    fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }
    fn body_low(&self) -> f64 {
        self.open.min(self.close)
    }
    fn body_high(&self) -> f64 {
        self.open.max(self.close)
    }
    fn upper_shadow(&self) -> f64 {
        self.high - self.body_high()
    }
    fn lower_shadow(&self) -> f64 {
        self.body_low() - self.low
    }
    fn is_bullish(&self) -> bool {
        self.close > self.open
    }
}

/// Detects single/two/three-candle candlestick patterns on the tail of
/// `history` + `current`.
pub fn detect_candlestick_patterns(history: &[Candle], current: &Candle) -> Vec<CandlestickPattern> {
    let mut tail: Vec<Ohlc> = history.iter().rev().take(2).map(ohlc).collect();
    tail.reverse();
    tail.push(ohlc(current));
    let mut out = Vec::new();

    let last = tail.last().expect("current always present");
    if last.range() > 0.0 {
        // Single-candle patterns.
        if last.body() / last.range() < 0.1 {
            out.push(CandlestickPattern {
                name: "doji",
                kind: Direction::Neutral,
                strength: ((0.1 - last.body() / last.range()) / 0.1 * 100.0).clamp(0.0, 100.0),
            });
        }
        if last.body() > 0.0
            && last.lower_shadow() > 2.0 * last.body()
            && last.upper_shadow() < 0.5 * last.body()
        {
            out.push(CandlestickPattern {
                name: "hammer",
                kind: Direction::Bullish,
                strength: (last.lower_shadow() / last.range() * 100.0).clamp(0.0, 100.0),
            });
        }
        if last.body() > 0.0
            && last.upper_shadow() > 2.0 * last.body()
            && last.lower_shadow() < 0.5 * last.body()
        {
            out.push(CandlestickPattern {
                name: "shooting_star",
                kind: Direction::Bearish,
                strength: (last.upper_shadow() / last.range() * 100.0).clamp(0.0, 100.0),
            });
        }
    }

    // Two-candle engulfing.
    if tail.len() >= 2 {
        let prev = &tail[tail.len() - 2];
        let curr = &tail[tail.len() - 1];
        let opposite_colors = prev.is_bullish() != curr.is_bullish();
        let engulfs = curr.body_low() < prev.body_low() && curr.body_high() > prev.body_high();
        if opposite_colors && engulfs && prev.body() > 0.0 {
            let ratio = (curr.body() / prev.body()).min(3.0);
            let strength = (50.0 + (ratio - 1.0) * 25.0).clamp(50.0, 100.0);
            out.push(CandlestickPattern {
                name: if curr.is_bullish() {
                    "bullish_engulfing"
                } else {
                    "bearish_engulfing"
                },
                kind: if curr.is_bullish() {
                    Direction::Bullish
                } else {
                    Direction::Bearish
                },
                strength,
            });
        }
    }

    // Three-candle morning/evening star.
    if tail.len() == 3 {
        let first = &tail[0];
        let middle = &tail[1];
        let third = &tail[2];
        if first.body() > 0.0 && middle.body() < 0.3 * first.body() {
            let first_mid = (first.body_low() + first.body_high()) / 2.0;
            if !first.is_bullish() && third.is_bullish() && third.close > first_mid {
                out.push(CandlestickPattern {
                    name: "morning_star",
                    kind: Direction::Bullish,
                    strength: ((third.close - first_mid) / first.body() * 100.0).clamp(0.0, 100.0),
                });
            }
            if first.is_bullish() && !third.is_bullish() && third.close < first_mid {
                out.push(CandlestickPattern {
                    name: "evening_star",
                    kind: Direction::Bearish,
                    strength: ((first_mid - third.close) / first.body() * 100.0).clamp(0.0, 100.0),
                });
            }
        }
    }

    out
}

/// Indices of local swing highs/lows with a +/-k lookaround.
fn swing_points(values: &[f64], k: usize, want_high: bool) -> Vec<usize> {
    let mut out = Vec::new();
    if values.len() < 2 * k + 1 {
        return out;
    }
    for i in k..values.len() - k {
        let window = &values[i - k..=i + k];
        let pivot = values[i];
        let is_extreme = if want_high {
            window.iter().all(|&v| v <= pivot)
        } else {
            window.iter().all(|&v| v >= pivot)
        };
        if is_extreme {
            out.push(i);
        }
    }
    out
}

fn least_squares_slope(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len() as f64;
    if n < 2.0 {
        return 0.0;
    }
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let num: f64 = xs.iter().zip(ys).map(|(x, y)| (x - mean_x) * (y - mean_y)).sum();
    let den: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Detects breakout, triangle, head-and-shoulders, and double top/bottom
/// chart patterns.
pub fn detect_chart_patterns(history: &[Candle], current: &Candle) -> Vec<ChartPattern> {
    use rust_decimal::prelude::ToPrimitive;
    let mut closes: Vec<f64> = history.iter().map(|c| c.close.to_f64().unwrap_or(0.0)).collect();
    let mut highs: Vec<f64> = history.iter().map(|c| c.high.to_f64().unwrap_or(0.0)).collect();
    let mut lows: Vec<f64> = history.iter().map(|c| c.low.to_f64().unwrap_or(0.0)).collect();
    let mut volumes: Vec<f64> = history.iter().map(|c| c.volume as f64).collect();
    closes.push(current.close.to_f64().unwrap_or(0.0));
    highs.push(current.high.to_f64().unwrap_or(0.0));
    lows.push(current.low.to_f64().unwrap_or(0.0));
    volumes.push(current.volume as f64);

    let mut out = Vec::new();
    let k = 3;

    // Breakout: last 10 bars excluding current form the consolidation range.
    if closes.len() >= 11 {
        let window = &closes[closes.len() - 11..closes.len() - 1];
        let range_high = window.iter().cloned().fold(f64::MIN, f64::max);
        let range_low = window.iter().cloned().fold(f64::MAX, f64::min);
        let last_close = *closes.last().unwrap();
        let vol_window = &volumes[volumes.len() - 11..volumes.len() - 1];
        let vol_avg = vol_window.iter().sum::<f64>() / vol_window.len() as f64;
        let last_vol = *volumes.last().unwrap();
        if last_vol > 1.5 * vol_avg {
            if last_close > range_high {
                out.push(ChartPattern {
                    name: "breakout_up",
                    kind: ChartPatternKind::Breakout,
                    direction: Direction::Bullish,
                    strength: 75.0,
                    target: Some(last_close + (range_high - range_low)),
                    stop: Some(range_high),
                });
            } else if last_close < range_low {
                out.push(ChartPattern {
                    name: "breakout_down",
                    kind: ChartPatternKind::Breakout,
                    direction: Direction::Bearish,
                    strength: 75.0,
                    target: Some(last_close - (range_high - range_low)),
                    stop: Some(range_low),
                });
            }
        }
    }

    // Triangle: slope of swing highs vs swing lows over the trailing window.
    let highs_idx = swing_points(&highs, k, true);
    let lows_idx = swing_points(&lows, k, false);
    if highs_idx.len() >= 2 && lows_idx.len() >= 2 {
        let hx: Vec<f64> = highs_idx.iter().map(|&i| i as f64).collect();
        let hy: Vec<f64> = highs_idx.iter().map(|&i| highs[i]).collect();
        let lx: Vec<f64> = lows_idx.iter().map(|&i| i as f64).collect();
        let ly: Vec<f64> = lows_idx.iter().map(|&i| lows[i]).collect();
        let high_slope = least_squares_slope(&hx, &hy);
        let low_slope = least_squares_slope(&lx, &ly);
        let flat = 1e-6;
        let (name, direction) = if high_slope < -flat && low_slope > flat {
            ("symmetrical_triangle", Direction::Neutral)
        } else if high_slope.abs() < flat && low_slope > flat {
            ("ascending_triangle", Direction::Bullish)
        } else if high_slope < -flat && low_slope.abs() < flat {
            ("descending_triangle", Direction::Bearish)
        } else {
            ("", Direction::Neutral)
        };
        if !name.is_empty() {
            out.push(ChartPattern {
                name,
                kind: ChartPatternKind::Continuation,
                direction,
                strength: 60.0,
                target: None,
                stop: None,
            });
        }
    }

    // Head-and-shoulders: three most recent swing highs, middle strictly
    // highest, shoulders within +/-5%.
    if highs_idx.len() >= 3 {
        let last3 = &highs_idx[highs_idx.len() - 3..];
        let (l, m, r) = (highs[last3[0]], highs[last3[1]], highs[last3[2]]);
        let shoulder_diff = (l - r).abs() / l.max(r).max(1e-9);
        if m > l && m > r && shoulder_diff <= 0.05 {
            out.push(ChartPattern {
                name: "head_and_shoulders",
                kind: ChartPatternKind::Reversal,
                direction: Direction::Bearish,
                strength: 70.0,
                target: Some(r - (m - (l + r) / 2.0)),
                stop: Some(m),
            });
        }
    }

    // Double top / double bottom: two most recent swing highs/lows within
    // +/-3% of each other.
    if highs_idx.len() >= 2 {
        let last2 = &highs_idx[highs_idx.len() - 2..];
        let (a, b) = (highs[last2[0]], highs[last2[1]]);
        if (a - b).abs() / a.max(b).max(1e-9) <= 0.03 {
            out.push(ChartPattern {
                name: "double_top",
                kind: ChartPatternKind::Reversal,
                direction: Direction::Bearish,
                strength: 65.0,
                target: None,
                stop: Some(a.max(b)),
            });
        }
    }
    if lows_idx.len() >= 2 {
        let last2 = &lows_idx[lows_idx.len() - 2..];
        let (a, b) = (lows[last2[0]], lows[last2[1]]);
        if (a - b).abs() / a.max(b).max(1e-9) <= 0.03 {
            out.push(ChartPattern {
                name: "double_bottom",
                kind: ChartPatternKind::Reversal,
                direction: Direction::Bullish,
                strength: 65.0,
                target: None,
                stop: Some(a.min(b)),
            });
        }
    }

    out
}

/// Wyckoff-style phase from trend direction, volume trend, and position vs
/// recent range.
pub fn detect_regime(history: &[Candle], current: &Candle) -> Option<MarketRegime> {
    use rust_decimal::prelude::ToPrimitive;
    if history.len() < 20 {
        return None;
    }
    let mut closes: Vec<f64> = history.iter().map(|c| c.close.to_f64().unwrap_or(0.0)).collect();
    let mut volumes: Vec<f64> = history.iter().map(|c| c.volume as f64).collect();
    closes.push(current.close.to_f64().unwrap_or(0.0));
    volumes.push(current.volume as f64);

    let n = closes.len();
    let window = &closes[n - 20..];
    let range_high = window.iter().cloned().fold(f64::MIN, f64::max);
    let range_low = window.iter().cloned().fold(f64::MAX, f64::min);
    let last = *closes.last().unwrap();
    let pos = if range_high > range_low {
        (last - range_low) / (range_high - range_low)
    } else {
        0.5
    };

    let half = n / 2;
    let early_vol = volumes[..half].iter().sum::<f64>() / half as f64;
    let recent_vol = volumes[half..].iter().sum::<f64>() / (n - half) as f64;
    let volume_rising = recent_vol > early_vol;

    let trend_up = last > closes[n.saturating_sub(20)];

    let phase = match (trend_up, volume_rising, pos) {
        (false, true, p) if p < 0.35 => RegimePhase::Accumulation,
        (true, _, p) if p > 0.35 => RegimePhase::Markup,
        (true, true, p) if p > 0.65 => RegimePhase::Distribution,
        (false, _, p) if p < 0.65 => RegimePhase::Markdown,
        (true, _, _) => RegimePhase::Markup,
        (false, _, _) => RegimePhase::Markdown,
    };

    Some(MarketRegime { phase })
}

/// Clusters pivot highs/lows into support/resistance levels.
/// Retains the top-5 by strength per side; discards clusters with fewer
/// than 2 touches.
pub fn detect_support_resistance(
    history: &[Candle],
    current: &Candle,
) -> (Vec<SupportResistanceLevel>, Option<CurrentPosition>) {
    use rust_decimal::prelude::ToPrimitive;
    let mut highs: Vec<f64> = history.iter().map(|c| c.high.to_f64().unwrap_or(0.0)).collect();
    let mut lows: Vec<f64> = history.iter().map(|c| c.low.to_f64().unwrap_or(0.0)).collect();
    let mut volumes: Vec<f64> = history.iter().map(|c| c.volume as f64).collect();
    highs.push(current.high.to_f64().unwrap_or(0.0));
    lows.push(current.low.to_f64().unwrap_or(0.0));
    volumes.push(current.volume as f64);

    let k = 3;
    let tolerance = 0.005;
    let n = highs.len();

    let mut resistance = cluster_levels(&highs, &volumes, k, tolerance, n, SrSide::Resistance);
    let mut support = cluster_levels(&lows, &volumes, k, tolerance, n, SrSide::Support);

    resistance.sort_by(|a, b| b.strength.partial_cmp(&a.strength).unwrap());
    support.sort_by(|a, b| b.strength.partial_cmp(&a.strength).unwrap());
    resistance.truncate(5);
    support.truncate(5);

    let fallback_mid = match (highs.last(), lows.last()) {
        (Some(h), Some(l)) => (h + l) / 2.0,
        _ => 0.0,
    };
    let current_price = current.close.to_f64().unwrap_or(fallback_mid);

    let mut position = None;
    if let Some(nearest_r) = resistance.first() {
        if (nearest_r.price - current_price).abs() / current_price.max(1e-9) < 0.02 {
            position = Some(CurrentPosition::NearResistance);
        }
    }
    if position.is_none() {
        if let Some(nearest_s) = support.first() {
            if (current_price - nearest_s.price).abs() / current_price.max(1e-9) < 0.02 {
                position = Some(CurrentPosition::NearSupport);
            }
        }
    }
    if position.is_none() && (!resistance.is_empty() || !support.is_empty()) {
        position = Some(CurrentPosition::Middle);
    }

    let mut levels = resistance;
    levels.extend(support);
    (levels, position)
}

fn cluster_levels(
    values: &[f64],
    volumes: &[f64],
    k: usize,
    tolerance: f64,
    n: usize,
    side: SrSide,
) -> Vec<SupportResistanceLevel> {
    let want_high = matches!(side, SrSide::Resistance);
    let pivots = swing_points(values, k, want_high);
    if pivots.is_empty() {
        return Vec::new();
    }

    let mut clusters: Vec<Vec<usize>> = Vec::new();
    'pivot: for &p in &pivots {
        for cluster in clusters.iter_mut() {
            let rep = values[cluster[0]];
            if (values[p] - rep).abs() / rep.max(1e-9) <= tolerance {
                cluster.push(p);
                continue 'pivot;
            }
        }
        clusters.push(vec![p]);
    }

    clusters
        .into_iter()
        .filter(|c| c.len() >= 2)
        .map(|c| {
            let touches = c.len();
            let center = c.iter().map(|&i| values[i]).sum::<f64>() / touches as f64;
            let most_recent = *c.iter().max().unwrap();
            let age = n - 1 - most_recent;
            let recency_bonus = if age <= 20 { 10.0 } else { 0.0 };
            let avg_volume = c.iter().map(|&i| volumes[i]).sum::<f64>() / touches as f64;
            let volume_bonus = (avg_volume / 1000.0).min(10.0);
            let strength = (20.0 * touches as f64 + recency_bonus + volume_bonus).min(100.0);
            SupportResistanceLevel {
                price: center,
                side,
                touches,
                strength,
                confidence: strength.min(100.0),
                last_touch_age: age,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::domain::timeframe::Timeframe;
    use crate::domain::types::Symbol;

    fn candle(o: f64, h: f64, l: f64, c: f64, v: i64) -> Candle {
        Candle {
            symbol: Symbol::new("TEST"),
            timeframe: Timeframe::OneMin,
            bucket_start: Utc::now(),
            open: rust_decimal::Decimal::from_f64_retain(o).unwrap(),
            high: rust_decimal::Decimal::from_f64_retain(h).unwrap(),
            low: rust_decimal::Decimal::from_f64_retain(l).unwrap(),
            close: rust_decimal::Decimal::from_f64_retain(c).unwrap(),
            volume: v,
        }
    }

    #[test]
    fn bullish_engulfing_detected_with_strength_at_least_50() {
        let prev = candle(100.0, 101.0, 99.0, 99.5, 1000);
        let curr = candle(99.0, 102.0, 98.9, 101.5, 1000);
        let patterns = detect_candlestick_patterns(&[prev], &curr);
        let hit = patterns.iter().find(|p| p.name == "bullish_engulfing");
        assert!(hit.is_some(), "expected bullish_engulfing, got {patterns:?}");
        assert!(hit.unwrap().strength >= 50.0);
    }

    #[test]
    fn doji_detected_when_body_is_tiny_fraction_of_range() {
        let curr = candle(100.0, 102.0, 98.0, 100.05, 500);
        let patterns = detect_candlestick_patterns(&[], &curr);
        assert!(patterns.iter().any(|p| p.name == "doji"));
    }

    #[test]
    fn support_resistance_discards_single_touch_clusters() {
        let mut history = Vec::new();
        for i in 0..30 {
            let base = 100.0 + (i % 5) as f64 * 0.01;
            history.push(candle(base, base + 1.0, base - 1.0, base, 100));
        }
        let current = candle(100.0, 101.0, 99.0, 100.0, 100);
        let (levels, _) = detect_support_resistance(&history, &current);
        assert!(levels.iter().all(|l| l.touches >= 2));
    }
}
