// =============================================================================
// Moving Average Convergence/Divergence (MACD)
// =============================================================================
//
// MACD line = EMA(fast) - EMA(slow); signal line = EMA(signal) of the MACD
// line; histogram = MACD line - signal line. Standard periods (12, 26, 9) are
// lifted from `advanced_signal_system.py`'s `_calculate_macd`, including its
// bullish/bearish/neutral trend classification (MACD above signal with a
// positive histogram is bullish, the mirror is bearish, otherwise neutral).

use super::ema::calculate_ema;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdPoint {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacdTrend {
    Bullish,
    Bearish,
    Neutral,
}

impl MacdPoint {
    pub fn trend(&self) -> MacdTrend {
        if self.macd > self.signal && self.histogram > 0.0 {
            MacdTrend::Bullish
        } else if self.macd < self.signal && self.histogram < 0.0 {
            MacdTrend::Bearish
        } else {
            MacdTrend::Neutral
        }
    }
}

/// Compute the full MACD series. Returns one `MacdPoint` per close once both
/// the slow EMA and the signal EMA have enough history; empty if `closes` is
/// too short for that (`slow + signal - 1` points, the 26+9-day minimum the
/// original classifies as "insufficient history" for MACD specifically).
pub fn calculate_macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Vec<MacdPoint> {
    if fast == 0 || slow == 0 || signal == 0 || fast >= slow {
        return Vec::new();
    }

    let ema_fast = calculate_ema(closes, fast);
    let ema_slow = calculate_ema(closes, slow);
    if ema_fast.is_empty() || ema_slow.is_empty() {
        return Vec::new();
    }

    // ema_fast starts at global index fast-1, ema_slow at slow-1; align by
    // dropping the lead-in the fast series has over the slow one.
    let offset = slow - fast;
    if ema_fast.len() <= offset {
        return Vec::new();
    }
    let macd_line: Vec<f64> = ema_fast[offset..]
        .iter()
        .zip(ema_slow.iter())
        .map(|(f, s)| f - s)
        .collect();

    let signal_line = calculate_ema(&macd_line, signal);
    if signal_line.is_empty() {
        return Vec::new();
    }

    let macd_offset = signal - 1;
    macd_line[macd_offset..]
        .iter()
        .zip(signal_line.iter())
        .map(|(&macd, &sig)| MacdPoint {
            macd,
            signal: sig,
            histogram: macd - sig,
        })
        .collect()
}

/// Standard (12, 26, 9) MACD, most recent point only.
pub fn current_macd(closes: &[f64]) -> Option<MacdPoint> {
    calculate_macd(closes, 12, 26, 9).last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ascending(n: usize) -> Vec<f64> {
        (1..=n).map(|i| i as f64).collect()
    }

    #[test]
    fn insufficient_history_is_empty() {
        assert!(calculate_macd(&ascending(20), 12, 26, 9).is_empty());
    }

    #[test]
    fn steadily_rising_series_is_bullish() {
        let closes = ascending(100);
        let point = current_macd(&closes).expect("enough history for MACD");
        assert_eq!(point.trend(), MacdTrend::Bullish);
    }

    #[test]
    fn steadily_falling_series_is_bearish() {
        let closes: Vec<f64> = (1..=100).rev().map(|x| x as f64).collect();
        let point = current_macd(&closes).expect("enough history for MACD");
        assert_eq!(point.trend(), MacdTrend::Bearish);
    }

    #[test]
    fn flat_series_is_neutral() {
        let closes = vec![100.0; 100];
        let point = current_macd(&closes).expect("enough history for MACD");
        assert_eq!(point.trend(), MacdTrend::Neutral);
    }
}
