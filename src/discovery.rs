// =============================================================================
// Candidate Discovery — turns one `screen_market` call into per-strategy
// ranked candidate lists
// =============================================================================
//
// Grounded in `original_source/core/strategy_system/stock_discovery.py`'s
// `StockDiscovery._convert_to_candidates`: each strategy reads a different
// field off the screened row as its score (gap uses change rate, volume
// breakout uses the volume figure, momentum uses change rate, technical
// screening uses the broker's own technical score), rows with a non-positive
// score are dropped, and the remainder is sorted score-descending. The
// thread-pool/candidate-cache machinery around that function is scheduler
// plumbing out of scope here — this module is the pure extraction step.

use tracing::debug;

use crate::broker::ScreenedSymbol;
use crate::types::Candidate;

pub fn discover_strategy_stocks(strategy: &str, screened: &[ScreenedSymbol]) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = screened
        .iter()
        .filter_map(|row| {
            let (score, reason) = score_and_reason(strategy, row);
            if score <= 0.0 {
                return None;
            }
            Some(Candidate {
                symbol: row.symbol.clone(),
                strategy: strategy.to_string(),
                score,
                reason,
                discovered_at: chrono::Utc::now(),
                payload: serde_json::json!({
                    "change_rate": row.change_rate,
                    "volume": row.volume,
                    "technical_score": row.technical_score,
                }),
            })
        })
        .collect();

    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    debug!(strategy, count = candidates.len(), "strategy candidates extracted");
    candidates
}

fn score_and_reason(strategy: &str, row: &ScreenedSymbol) -> (f64, String) {
    match strategy {
        "gap_trading" => (row.change_rate, format!("gap {:.1}%", row.change_rate)),
        "volume_breakout" => {
            let score = (row.volume as f64 / 100_000.0).max(0.0);
            (score, format!("volume {} shares", row.volume))
        }
        "momentum" => (row.change_rate, format!("momentum {:.1}%", row.change_rate)),
        _ => (row.technical_score, row.reason.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(symbol: &str, change_rate: f64, volume: u64, technical_score: f64) -> ScreenedSymbol {
        ScreenedSymbol {
            symbol: symbol.to_string(),
            change_rate,
            volume,
            technical_score,
            reason: "test".to_string(),
        }
    }

    #[test]
    fn gap_trading_scores_by_change_rate_and_ranks_descending() {
        let screened = vec![row("000111", 2.0, 0, 0.0), row("000222", 5.0, 0, 0.0)];
        let candidates = discover_strategy_stocks("gap_trading", &screened);
        assert_eq!(candidates[0].symbol, "000222");
        assert_eq!(candidates[1].symbol, "000111");
    }

    #[test]
    fn non_positive_score_rows_are_dropped() {
        let screened = vec![row("000111", -1.0, 0, 0.0), row("000222", 3.0, 0, 0.0)];
        let candidates = discover_strategy_stocks("gap_trading", &screened);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].symbol, "000222");
    }

    #[test]
    fn volume_breakout_scores_by_volume_ratio_proxy() {
        let screened = vec![row("000111", 0.0, 500_000, 0.0)];
        let candidates = discover_strategy_stocks("volume_breakout", &screened);
        assert_eq!(candidates[0].score, 5.0);
    }

    #[test]
    fn technical_screening_falls_back_to_technical_score() {
        let screened = vec![row("000111", 0.0, 0, 77.0)];
        let candidates = discover_strategy_stocks("technical_screening", &screened);
        assert_eq!(candidates[0].score, 77.0);
    }
}
