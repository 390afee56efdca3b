//! Weighted-vote signal integration: folds trend, momentum, volume
//! confirmation, candlestick, and chart-pattern votes into one
//! [`TradingSignal`].

use serde::{Deserialize, Serialize};

use crate::domain::analysis::AnalysisSet;
use crate::domain::indicators::{Direction, IndicatorSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub overall: Direction,
    pub confidence: f64,
    pub risk_level: RiskLevel,
}

const TREND_WEIGHT: f64 = 0.35;
const MOMENTUM_WEIGHT: f64 = 0.25;
const VOLUME_WEIGHT: f64 = 0.15;
const CANDLESTICK_WEIGHT: f64 = 0.15;
const CHART_PATTERN_WEIGHT: f64 = 0.10;

fn direction_score(dir: Direction) -> f64 {
    match dir {
        Direction::Bullish => 1.0,
        Direction::Bearish => -1.0,
        Direction::Neutral => 0.0,
    }
}

/// Volume-confirmation vote: bullish/bearish only when current volume
/// exceeds its 20-bar average, else neutral.
fn volume_confirmation_vote(indicators: &IndicatorSet, current_volume: f64) -> f64 {
    let Some(avg) = indicators.volume_ma20 else {
        return 0.0;
    };
    if avg <= 0.0 {
        return 0.0;
    }
    let above_average = current_volume > avg;
    if !above_average {
        return 0.0;
    }
    match indicators.trend_direction {
        Some(Direction::Bullish) => 1.0,
        Some(Direction::Bearish) => -1.0,
        _ => 0.0,
    }
}

fn candlestick_vote(analysis: &AnalysisSet) -> f64 {
    if analysis.candlestick_patterns.is_empty() {
        return 0.0;
    }
    let sum: f64 = analysis
        .candlestick_patterns
        .iter()
        .map(|p| direction_score(p.kind) * (p.strength / 100.0))
        .sum();
    (sum / analysis.candlestick_patterns.len() as f64).clamp(-1.0, 1.0)
}

fn chart_pattern_vote(analysis: &AnalysisSet) -> f64 {
    if analysis.chart_patterns.is_empty() {
        return 0.0;
    }
    let sum: f64 = analysis
        .chart_patterns
        .iter()
        .map(|p| direction_score(p.direction) * (p.strength / 100.0))
        .sum();
    (sum / analysis.chart_patterns.len() as f64).clamp(-1.0, 1.0)
}

/// Integrates the per-dimension votes into one [`TradingSignal`]. Ties
/// resolve to neutral. Confidence is the weighted score magnitude scaled
/// to 0-100; risk level widens with volatility and narrows with confidence.
pub fn integrate_signal(indicators: &IndicatorSet, analysis: &AnalysisSet, current_volume: f64) -> TradingSignal {
    let trend_vote = indicators.trend_direction.map(direction_score).unwrap_or(0.0);
    let momentum_vote = indicators.momentum_direction.map(direction_score).unwrap_or(0.0);
    let volume_vote = volume_confirmation_vote(indicators, current_volume);
    let candlestick_vote = candlestick_vote(analysis);
    let chart_vote = chart_pattern_vote(analysis);

    let score = trend_vote * TREND_WEIGHT
        + momentum_vote * MOMENTUM_WEIGHT
        + volume_vote * VOLUME_WEIGHT
        + candlestick_vote * CANDLESTICK_WEIGHT
        + chart_vote * CHART_PATTERN_WEIGHT;

    let overall = if score > 0.05 {
        Direction::Bullish
    } else if score < -0.05 {
        Direction::Bearish
    } else {
        Direction::Neutral
    };

    let confidence = (score.abs() * 100.0).clamp(0.0, 100.0);

    let risk_level = match indicators.volatility_level {
        Some(crate::domain::indicators::VolatilityLevel::High) => RiskLevel::High,
        Some(crate::domain::indicators::VolatilityLevel::Low) if confidence >= 60.0 => RiskLevel::Low,
        _ => RiskLevel::Medium,
    };

    TradingSignal {
        overall,
        confidence,
        risk_level,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicators::VolatilityLevel;

    fn base_indicators() -> IndicatorSet {
        IndicatorSet::default()
    }

    #[test]
    fn all_neutral_votes_yield_neutral_signal() {
        let indicators = base_indicators();
        let analysis = AnalysisSet::default();
        let signal = integrate_signal(&indicators, &analysis, 0.0);
        assert_eq!(signal.overall, Direction::Neutral);
        assert_eq!(signal.confidence, 0.0);
    }

    #[test]
    fn strong_bullish_alignment_yields_bullish_high_confidence() {
        let mut indicators = base_indicators();
        indicators.trend_direction = Some(Direction::Bullish);
        indicators.momentum_direction = Some(Direction::Bullish);
        indicators.volume_ma20 = Some(100.0);
        indicators.volatility_level = Some(VolatilityLevel::Normal);
        let analysis = AnalysisSet::default();
        let signal = integrate_signal(&indicators, &analysis, 150.0);
        assert_eq!(signal.overall, Direction::Bullish);
        assert!(signal.confidence > 0.0);
    }

    #[test]
    fn high_volatility_forces_high_risk_regardless_of_confidence() {
        let mut indicators = base_indicators();
        indicators.trend_direction = Some(Direction::Bullish);
        indicators.momentum_direction = Some(Direction::Bullish);
        indicators.volatility_level = Some(VolatilityLevel::High);
        let analysis = AnalysisSet::default();
        let signal = integrate_signal(&indicators, &analysis, 0.0);
        assert_eq!(signal.risk_level, RiskLevel::High);
    }
}
