// =============================================================================
// Pattern Detection — candlestick recognition seam
// =============================================================================
//
// Candlestick pattern math itself is out of scope (per spec.md's Non-goals),
// but the Candle Trade Manager still needs *something* behind this seam to
// drive its state machine in tests. `HeuristicPatternDetector` is a
// deliberately simple body/wick-ratio classifier — good enough to exercise
// admission/invalidation, not a production pattern library.

use crate::types::DailyBar;

/// One detected pattern occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub name: String,
    pub confidence: f64,
    pub strength: f64,
    pub bullish: bool,
}

/// Seam between the Candle Trade Manager and whatever recognizes candlestick
/// shapes. `HeuristicPatternDetector` is the one placeholder implementation;
/// a production system would swap in a real pattern library here without
/// touching the state machine.
pub trait PatternDetector: Send + Sync {
    fn detect(&self, history: &[DailyBar]) -> Vec<PatternMatch>;
}

/// Body/wick ratio heuristics over the most recent bar (and, for engulfing,
/// the one before it). Not a substitute for a real candlestick library —
/// just enough signal for the state machine's admission and invalidation
/// logic to have something real to react to.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicPatternDetector;

impl PatternDetector for HeuristicPatternDetector {
    fn detect(&self, history: &[DailyBar]) -> Vec<PatternMatch> {
        let Some(last) = history.last() else {
            return Vec::new();
        };

        let mut matches = Vec::new();
        let range = last.high - last.low;
        if range <= 0.0 {
            return matches;
        }

        let body = (last.close - last.open).abs();
        let upper_wick = last.high - last.open.max(last.close);
        let lower_wick = last.open.min(last.close) - last.low;
        let body_ratio = body / range;

        // Hammer: small body in the upper third, long lower wick, bullish close.
        if body_ratio < 0.3 && lower_wick > body * 2.0 && last.close >= last.open {
            matches.push(PatternMatch {
                name: "hammer".to_string(),
                confidence: (1.0 - body_ratio).clamp(0.0, 1.0),
                strength: (lower_wick / range).clamp(0.0, 1.0),
                bullish: true,
            });
        }

        // Shooting star: small body in the lower third, long upper wick, bearish close.
        if body_ratio < 0.3 && upper_wick > body * 2.0 && last.close < last.open {
            matches.push(PatternMatch {
                name: "shooting_star".to_string(),
                confidence: (1.0 - body_ratio).clamp(0.0, 1.0),
                strength: (upper_wick / range).clamp(0.0, 1.0),
                bullish: false,
            });
        }

        // Bullish engulfing: today's body fully engulfs yesterday's opposite body.
        if history.len() >= 2 {
            let prev = &history[history.len() - 2];
            let prev_bearish = prev.close < prev.open;
            let today_bullish = last.close > last.open;
            if prev_bearish
                && today_bullish
                && last.open <= prev.close
                && last.close >= prev.open
            {
                let prev_body = (prev.close - prev.open).abs();
                matches.push(PatternMatch {
                    name: "bullish_engulfing".to_string(),
                    confidence: if prev_body > 0.0 { (body / prev_body).min(1.0) } else { 0.5 },
                    strength: body_ratio,
                    bullish: true,
                });
            }
        }

        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> DailyBar {
        DailyBar {
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            open,
            high,
            low,
            close,
            volume: 10_000,
        }
    }

    #[test]
    fn detects_a_hammer() {
        let detector = HeuristicPatternDetector;
        let history = vec![bar(100.0, 102.0, 90.0, 101.0)];
        let matches = detector.detect(&history);
        assert!(matches.iter().any(|m| m.name == "hammer" && m.bullish));
    }

    #[test]
    fn detects_a_shooting_star() {
        let detector = HeuristicPatternDetector;
        let history = vec![bar(100.0, 112.0, 99.0, 99.5)];
        let matches = detector.detect(&history);
        assert!(matches.iter().any(|m| m.name == "shooting_star" && !m.bullish));
    }

    #[test]
    fn detects_bullish_engulfing() {
        let detector = HeuristicPatternDetector;
        let history = vec![bar(100.0, 101.0, 95.0, 96.0), bar(95.5, 103.0, 95.0, 102.0)];
        let matches = detector.detect(&history);
        assert!(matches.iter().any(|m| m.name == "bullish_engulfing"));
    }

    #[test]
    fn flat_range_produces_no_patterns() {
        let detector = HeuristicPatternDetector;
        let history = vec![bar(100.0, 100.0, 100.0, 100.0)];
        assert!(detector.detect(&history).is_empty());
    }

    #[test]
    fn empty_history_produces_no_patterns() {
        let detector = HeuristicPatternDetector;
        assert!(detector.detect(&[]).is_empty());
    }
}
