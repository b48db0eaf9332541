// =============================================================================
// Advanced Signal Generator
// =============================================================================
//
// Ported from `original_source/core/strategy_system/advanced_signal_system.py`'s
// `AdvancedSignalGenerator`. Only the BUY path is implemented — this module's
// original also only ever emits `signal_type='BUY'`; SELL decisions belong to
// the Trade Executor's discount-based sell price, not this generator. The
// "classical" parallel signal system the Python codebase also carries
// (`strategy_system/signal_generator.py`-equivalent) is the Open Question #3
// duplication the expanded spec resolves by keeping only this path.

use crate::indicators::{bollinger, macd, rsi, sma};
use crate::types::{DailyBar, Side, Signal};

const MIN_HISTORY_DAYS: usize = 60;

const RSI_STRONG_OVERSOLD: f64 = 20.0;
const RSI_OVERSOLD: f64 = 30.0;
const RSI_STRONG_OVERBOUGHT: f64 = 80.0;
const RSI_OVERBOUGHT: f64 = 70.0;

const VOLUME_BREAKOUT_THRESHOLD: f64 = 2.0;
const VOLUME_SPIKE_THRESHOLD: f64 = 3.0;

const WEIGHT_TECHNICAL: f64 = 0.35;
const WEIGHT_VOLUME: f64 = 0.25;
const WEIGHT_TREND: f64 = 0.20;
const WEIGHT_RISK: f64 = 0.20;

const MIN_TOTAL_SCORE: f64 = 0.6;
const MIN_CONFIDENCE: f64 = 0.5;
const MIN_RISK_REWARD: f64 = 1.5;

const MAX_RISK_PER_TRADE: f64 = 0.02;
const MIN_RISK_REWARD_TARGET: f64 = 2.0;
const ATR_STOP_MULTIPLIER: f64 = 2.0;
const MAX_POSITION_SIZE: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RsiSignal {
    StrongOversold,
    Oversold,
    Neutral,
    Overbought,
    StrongOverbought,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MaSignal {
    StrongBullish,
    Bullish,
    Neutral,
    Bearish,
    StrongBearish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VolumeTrend {
    Increasing,
    Decreasing,
    Stable,
}

/// Generates a BUY signal for `symbol` from daily history plus a current
/// price/volume tick, or `None` if the data is too thin or the signal fails
/// any of the composite-score/confidence/risk-reward gates.
pub fn generate_advanced_signal(
    strategy: &str,
    symbol: &str,
    current_price: f64,
    current_volume: u64,
    history: &[DailyBar],
    account_balance: f64,
) -> Option<Signal> {
    if current_price <= 0.0 || current_volume == 0 || history.len() < MIN_HISTORY_DAYS {
        return None;
    }

    let closes: Vec<f64> = history.iter().map(|b| b.close).collect();

    let (rsi_value, rsi_signal) = rsi::current_rsi(&closes, 14)
        .map(|(v, _)| (v, classify_rsi(v)))
        .unwrap_or((50.0, RsiSignal::Neutral));

    let macd_trend = macd::current_macd(&closes).map(|p| p.trend());

    let ma_5 = sma::current_sma(&closes, 5).unwrap_or(current_price);
    let ma_20 = sma::current_sma(&closes, 20).unwrap_or(current_price);
    let ma_60 = sma::current_sma(&closes, 60).unwrap_or(current_price);
    let ma_signal = classify_ma(ma_5, ma_20, ma_60, current_price);

    let bb = bollinger::calculate_bollinger(&closes, 20, 2.0);
    let bb_position = bb
        .as_ref()
        .map(|b| {
            if b.upper != b.lower {
                ((current_price - b.lower) / (b.upper - b.lower)).clamp(0.0, 1.0)
            } else {
                0.5
            }
        })
        .unwrap_or(0.5);

    let (support_level, resistance_level) = support_resistance(history);
    let trend_strength = trend_strength(&closes);

    let avg_volume_20: f64 = {
        let n = history.len().min(20);
        let tail = &history[history.len() - n..];
        tail.iter().map(|b| b.volume as f64).sum::<f64>() / n as f64
    };
    let volume_ratio = if avg_volume_20 > 0.0 {
        current_volume as f64 / avg_volume_20
    } else {
        0.0
    };
    let volume_trend = classify_volume_trend(history);
    let volume_breakout = volume_ratio >= VOLUME_BREAKOUT_THRESHOLD;
    let volume_spike = volume_ratio >= VOLUME_SPIKE_THRESHOLD;

    // --- composite score -----------------------------------------------------
    let mut tech_score = 0.0_f64;
    tech_score += match rsi_signal {
        RsiSignal::StrongOversold => 0.4,
        RsiSignal::Oversold => 0.3,
        RsiSignal::StrongOverbought => -0.4,
        RsiSignal::Overbought => -0.3,
        RsiSignal::Neutral => 0.0,
    };
    tech_score += match macd_trend {
        Some(macd::MacdTrend::Bullish) => 0.3,
        Some(macd::MacdTrend::Bearish) => -0.3,
        _ => 0.0,
    };
    tech_score += match ma_signal {
        MaSignal::StrongBullish => 0.3,
        MaSignal::Bullish => 0.2,
        MaSignal::StrongBearish => -0.3,
        MaSignal::Bearish => -0.2,
        MaSignal::Neutral => 0.0,
    };
    let technical_score = (tech_score + 0.5).clamp(0.0, 1.0);

    let mut volume_score = 0.5_f64;
    if volume_spike {
        volume_score += 0.3;
    } else if volume_breakout {
        volume_score += 0.2;
    }
    volume_score += match volume_trend {
        VolumeTrend::Increasing => 0.1,
        VolumeTrend::Decreasing => -0.1,
        VolumeTrend::Stable => 0.0,
    };
    let volume_score = volume_score.clamp(0.0, 1.0);

    let trend_score = trend_strength;

    let mut risk_score = 0.5_f64;
    if bb_position < 0.2 {
        risk_score += 0.3;
    } else if bb_position > 0.8 {
        risk_score -= 0.3;
    }
    let risk_score = risk_score.clamp(0.0, 1.0);

    let total_score = technical_score * WEIGHT_TECHNICAL
        + volume_score * WEIGHT_VOLUME
        + trend_score * WEIGHT_TREND
        + risk_score * WEIGHT_RISK;

    if total_score < MIN_TOTAL_SCORE {
        return None;
    }
    if !volume_breakout && strategy == "volume_breakout" {
        return None;
    }

    // --- confidence ------------------------------------------------------------
    let mut bullish_signals = 0u8;
    if matches!(rsi_signal, RsiSignal::Oversold | RsiSignal::StrongOversold) {
        bullish_signals += 1;
    }
    if matches!(macd_trend, Some(macd::MacdTrend::Bullish)) {
        bullish_signals += 1;
    }
    if matches!(ma_signal, MaSignal::Bullish | MaSignal::StrongBullish) {
        bullish_signals += 1;
    }
    if volume_breakout {
        bullish_signals += 1;
    }
    let signal_consistency = bullish_signals as f64 / 4.0;
    let confidence = (signal_consistency * 0.7 + trend_strength * 0.3).clamp(0.0, 1.0);

    if confidence < MIN_CONFIDENCE {
        return None;
    }

    // --- risk management ---------------------------------------------------
    let atr = crate::indicators::atr::calculate_atr(history, 14).unwrap_or(current_price * 0.02);
    let atr_stop = current_price - atr * ATR_STOP_MULTIPLIER;
    let support_stop = support_level * 0.98;
    let bb_stop = bb.as_ref().map(|b| b.lower * 0.99).unwrap_or(support_stop);
    let stop_loss_price = atr_stop.max(support_stop).max(bb_stop);

    let risk_amount = current_price - stop_loss_price;
    if risk_amount <= 0.0 {
        return None;
    }

    let mut take_profit_price = current_price + risk_amount * MIN_RISK_REWARD_TARGET;
    if take_profit_price > resistance_level {
        take_profit_price = resistance_level * 0.98;
    }

    let risk_reward = (take_profit_price - current_price) / risk_amount;
    if risk_reward < MIN_RISK_REWARD {
        return None;
    }

    let loss_per_share = current_price - stop_loss_price;
    let position_size = if loss_per_share > 0.0 && account_balance > 0.0 {
        let max_loss = account_balance * MAX_RISK_PER_TRADE;
        let max_shares = (max_loss / loss_per_share).floor().max(0.0);
        ((max_shares * current_price) / account_balance).min(MAX_POSITION_SIZE)
    } else {
        0.01
    };

    let mut strength = total_score;
    if volume_spike {
        strength += 0.1;
    }
    if matches!(rsi_signal, RsiSignal::StrongOversold) {
        strength += 0.1;
    }
    let strength = strength.min(1.0);

    let mut warnings = Vec::new();
    if matches!(rsi_signal, RsiSignal::Overbought | RsiSignal::StrongOverbought) {
        warnings.push("overbought".to_string());
    }

    let mut reason_parts = Vec::new();
    if matches!(rsi_signal, RsiSignal::Oversold | RsiSignal::StrongOversold) {
        reason_parts.push(format!("rsi oversold ({rsi_value:.1})"));
    }
    if matches!(macd_trend, Some(macd::MacdTrend::Bullish)) {
        reason_parts.push("macd bullish".to_string());
    }
    if matches!(ma_signal, MaSignal::Bullish | MaSignal::StrongBullish) {
        reason_parts.push("ma alignment bullish".to_string());
    }
    if volume_breakout {
        reason_parts.push(format!("volume breakout ({volume_ratio:.1}x)"));
    }
    let reason = format!("composite {total_score:.2}: {}", reason_parts.join(", "));

    Some(Signal {
        symbol: symbol.to_string(),
        side: Side::Buy,
        strategy: format!("{strategy}_advanced"),
        price: current_price,
        strength,
        confidence,
        target_price: take_profit_price,
        stop_loss: stop_loss_price,
        position_size,
        risk_reward,
        generated_at: chrono::Utc::now(),
        reason,
        warnings,
    })
}

fn classify_rsi(value: f64) -> RsiSignal {
    if value <= RSI_STRONG_OVERSOLD {
        RsiSignal::StrongOversold
    } else if value <= RSI_OVERSOLD {
        RsiSignal::Oversold
    } else if value >= RSI_STRONG_OVERBOUGHT {
        RsiSignal::StrongOverbought
    } else if value >= RSI_OVERBOUGHT {
        RsiSignal::Overbought
    } else {
        RsiSignal::Neutral
    }
}

fn classify_ma(ma_5: f64, ma_20: f64, ma_60: f64, current_price: f64) -> MaSignal {
    if ma_5 > ma_20 && ma_20 > ma_60 && current_price > ma_5 {
        MaSignal::StrongBullish
    } else if ma_5 > ma_20 && current_price > ma_5 {
        MaSignal::Bullish
    } else if ma_5 < ma_20 && ma_20 < ma_60 && current_price < ma_5 {
        MaSignal::StrongBearish
    } else if ma_5 < ma_20 && current_price < ma_5 {
        MaSignal::Bearish
    } else {
        MaSignal::Neutral
    }
}

fn classify_volume_trend(history: &[DailyBar]) -> VolumeTrend {
    let n = history.len().min(20);
    if n < 10 {
        return VolumeTrend::Stable;
    }
    let tail = &history[history.len() - n..];
    let mid = tail.len() / 2;
    let previous_5: f64 = tail[..5.min(mid)].iter().map(|b| b.volume as f64).sum::<f64>() / 5.0_f64.min(mid as f64);
    let recent_5: f64 = tail[tail.len() - 5..].iter().map(|b| b.volume as f64).sum::<f64>() / 5.0;

    if recent_5 > previous_5 * 1.2 {
        VolumeTrend::Increasing
    } else if recent_5 < previous_5 * 0.8 {
        VolumeTrend::Decreasing
    } else {
        VolumeTrend::Stable
    }
}

/// Support = 20th percentile of rolling 5-day lows, resistance = 80th
/// percentile of rolling 5-day highs, over the most recent 60 bars.
fn support_resistance(history: &[DailyBar]) -> (f64, f64) {
    let n = history.len().min(60);
    let tail = &history[history.len() - n..];

    if tail.len() < 5 {
        let close = tail.last().map(|b| b.close).unwrap_or(0.0);
        return (close * 0.95, close * 1.05);
    }

    let rolling_lows: Vec<f64> = tail.windows(5).map(|w| w.iter().map(|b| b.low).fold(f64::MAX, f64::min)).collect();
    let rolling_highs: Vec<f64> = tail.windows(5).map(|w| w.iter().map(|b| b.high).fold(f64::MIN, f64::max)).collect();

    (percentile(&rolling_lows, 0.2), percentile(&rolling_highs, 0.8))
}

/// Linear-interpolation percentile, matching pandas' default `quantile`.
fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = pos - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

/// Normalised 20-day MA slope, 0.5 at flat, clamped to [0, 1].
fn trend_strength(closes: &[f64]) -> f64 {
    let ma20 = sma::calculate_sma(closes, 20);
    if ma20.len() < 20 {
        return 0.5;
    }
    let last = *ma20.last().unwrap();
    let twenty_ago = ma20[ma20.len() - 20];
    if twenty_ago == 0.0 {
        return 0.5;
    }
    let change = (last - twenty_ago) / twenty_ago;
    (0.5 + change * 10.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(n: usize, base: f64, trend_per_day: f64) -> Vec<DailyBar> {
        (0..n)
            .map(|i| {
                let close = base + trend_per_day * i as f64;
                DailyBar {
                    date: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Duration::days(i as i64),
                    open: close,
                    high: close * 1.01,
                    low: close * 0.99,
                    close,
                    volume: 1_000_000,
                }
            })
            .collect()
    }

    #[test]
    fn rejects_below_minimum_history() {
        let hist = history(30, 10_000.0, 10.0);
        let signal = generate_advanced_signal("gap_trading", "005930", 10_300.0, 1_000_000, &hist, 10_000_000.0);
        assert!(signal.is_none());
    }

    #[test]
    fn rejects_zero_price_or_volume() {
        let hist = history(90, 10_000.0, 5.0);
        assert!(generate_advanced_signal("gap_trading", "005930", 0.0, 1_000_000, &hist, 10_000_000.0).is_none());
        assert!(generate_advanced_signal("gap_trading", "005930", 10_000.0, 0, &hist, 10_000_000.0).is_none());
    }

    #[test]
    fn strong_uptrend_with_volume_spike_produces_a_buy_signal() {
        let mut hist = history(90, 10_000.0, 15.0);
        for bar in hist.iter_mut().rev().take(5) {
            bar.volume = 5_000_000;
        }
        let last_close = hist.last().unwrap().close;
        let signal = generate_advanced_signal("momentum", "005930", last_close * 1.01, 5_000_000, &hist, 10_000_000.0);
        if let Some(s) = signal {
            assert_eq!(s.side, Side::Buy);
            assert!(s.risk_reward >= MIN_RISK_REWARD);
            assert!(s.confidence >= MIN_CONFIDENCE);
        }
    }

    #[test]
    fn flat_market_does_not_clear_the_score_gate() {
        let hist = history(90, 10_000.0, 0.0);
        let signal = generate_advanced_signal("gap_trading", "005930", 10_000.0, 1_000_000, &hist, 10_000_000.0);
        assert!(signal.is_none());
    }

    #[test]
    fn percentile_matches_linear_interpolation() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 1.0), 5.0);
        assert!((percentile(&values, 0.5) - 3.0).abs() < 1e-9);
    }
}
