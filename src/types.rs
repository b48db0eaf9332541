// =============================================================================
// Core Data Model
// =============================================================================
//
// Named record types for every boundary in the engine — replaces ad-hoc
// dict payloads with one typed shape per concept.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Six-character brokerage symbol; the unit of subscription and position.
pub type Symbol = String;

/// Where a cache entry's data originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Source {
    Stream,
    Rest,
    Cache,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: Symbol,
    pub price: f64,
    pub change_rate: f64,
    pub volume: u64,
    pub timestamp: DateTime<Utc>,
    pub source: Source,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Orderbook {
    pub symbol: Symbol,
    pub asks: Vec<BookLevel>,
    pub bids: Vec<BookLevel>,
    pub total_ask_size: u64,
    pub total_bid_size: u64,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: chrono::NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// Subscription priority; lower numeric value means more attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    Critical = 1,
    High = 2,
    Medium = 3,
    Low = 4,
    Background = 5,
}

impl Priority {
    pub fn wants_realtime(self) -> bool {
        matches!(self, Priority::Critical | Priority::High)
    }

    /// Degrade by `levels` steps, saturating at Background.
    pub fn degrade(self, levels: u8) -> Priority {
        let n = (self as u8).saturating_add(levels).min(Priority::Background as u8);
        match n {
            1 => Priority::Critical,
            2 => Priority::High,
            3 => Priority::Medium,
            4 => Priority::Low,
            _ => Priority::Background,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    Pending,
    Accepted,
    Filled,
    Partial,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Rejected | OrderState::Expired
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub client_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub qty: f64,
    pub limit_price: f64,
    pub strategy: String,
    pub submitted_at: DateTime<Utc>,
    pub broker_order_id: Option<String>,
    pub org_no: Option<String>,
    pub state: OrderState,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Fill {
    pub qty: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSource {
    Bot,
    Existing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub quantity: f64,
    pub avg_cost: f64,
    pub opened_at: DateTime<Utc>,
    pub strategy: String,
    pub source: PositionSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub side: Side,
    pub symbol: Symbol,
    pub qty: f64,
    pub price: f64,
    pub total: f64,
    pub strategy: String,
    pub ts: DateTime<Utc>,
    pub order_id: String,
    pub status: String,
    pub buy_trade_id: Option<String>,
    pub pnl: Option<f64>,
    pub pnl_rate: Option<f64>,
    pub hold_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSlot {
    pub name: String,
    pub start: chrono::NaiveTime,
    pub end: chrono::NaiveTime,
    pub primary_strategies: HashMap<String, f64>,
    pub secondary_strategies: HashMap<String, f64>,
    pub min_gap_rate: f64,
    pub min_technical_score: f64,
    pub min_volume_ratio: f64,
    pub max_candidates_per_strategy: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: Symbol,
    pub side: Side,
    pub strategy: String,
    pub price: f64,
    pub strength: f64,
    pub confidence: f64,
    pub target_price: f64,
    pub stop_loss: f64,
    pub position_size: f64,
    pub risk_reward: f64,
    pub generated_at: DateTime<Utc>,
    pub reason: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub symbol: Symbol,
    pub strategy: String,
    pub score: f64,
    pub reason: String,
    pub discovered_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedStock {
    pub id: String,
    pub date: chrono::NaiveDate,
    pub slot: String,
    pub rank_in_strategy: usize,
    pub symbol: Symbol,
    pub strategy: String,
    pub score: f64,
    pub reason: String,
    pub activated: bool,
    pub activated_ok: bool,
    pub traded: bool,
    pub trade_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldingLine {
    pub symbol: Symbol,
    pub qty: f64,
    pub avg_cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub total_value: f64,
    pub cash_available: f64,
    pub stock_value: f64,
    pub unrealized_pnl: f64,
    pub holdings: Vec<HoldingLine>,
}

/// Candlestick watch record — pattern-driven strategy peer to Discovery/
/// Scheduler. Pattern detection math itself is out of scope (§4.8); this
/// struct holds whatever a `PatternDetector` produces plus the state
/// machine's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CandleState {
    Scanning,
    Watching,
    BuyReady,
    PendingOrder,
    Entered,
    SellReady,
    Exited,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleCandidate {
    pub symbol: Symbol,
    pub state: CandleState,
    pub patterns: Vec<String>,
    pub pattern_confidence: f64,
    pub pattern_strength: f64,
    pub signal_strength: f64,
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CandleCandidate {
    /// Quality score combining confidence, strength, signal strength, a
    /// status weight, and freshness — the admission metric of §4.8.
    pub fn quality_score(&self, now: DateTime<Utc>) -> f64 {
        let status_weight = match self.state {
            CandleState::Entered | CandleState::PendingOrder => 100.0,
            CandleState::BuyReady | CandleState::SellReady => 60.0,
            CandleState::Watching => 30.0,
            CandleState::Scanning => 10.0,
            CandleState::Exited | CandleState::Stopped => 0.0,
        };
        let age_minutes = (now - self.discovered_at).num_minutes().max(0) as f64;
        let freshness = (1.0 - (age_minutes / 240.0)).clamp(0.0, 1.0);
        self.pattern_confidence * 40.0
            + self.pattern_strength * 20.0
            + self.signal_strength * 20.0
            + status_weight * 0.2
            + freshness * 20.0
    }

    pub fn is_protected(&self) -> bool {
        matches!(self.state, CandleState::Entered | CandleState::PendingOrder)
    }
}

/// Whether the engine is actively trading, paused, or killed by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Live,
    Paused,
    Killed,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paused
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Paused => write!(f, "Paused"),
            Self::Killed => write!(f, "Killed"),
        }
    }
}

/// Day trading forces an exit before close; swing carries positions over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingStyle {
    Day,
    Swing,
}

impl Default for TradingStyle {
    fn default() -> Self {
        Self::Day
    }
}

/// Whether we are running against real funds or a demo account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountMode {
    Demo,
    Live,
}

impl Default for AccountMode {
    fn default() -> Self {
        Self::Demo
    }
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Demo => write!(f, "Demo"),
            Self::Live => write!(f, "Live"),
        }
    }
}
