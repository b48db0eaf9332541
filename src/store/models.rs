// Row types for the two summary tables that have no counterpart in
// `types.rs` (trades/selected_stocks reuse `TradeRecord`/`SelectedStock`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: chrono::NaiveDate,
    pub total: i64,
    pub buys: i64,
    pub sells: i64,
    pub pnl: f64,
    pub pnl_rate: f64,
    pub wins: i64,
    pub losses: i64,
    pub largest_win: f64,
    pub largest_loss: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeSlotSummary {
    pub date: chrono::NaiveDate,
    pub slot: String,
    pub total_candidates: i64,
    pub total_trades: i64,
    pub per_strategy: std::collections::HashMap<String, i64>,
    pub pnl: f64,
    pub avg_score: f64,
}
