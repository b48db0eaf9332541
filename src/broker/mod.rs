// =============================================================================
// Broker Client — typed wrapper over the brokerage REST API
// =============================================================================
//
// The real broker (KIS — Korea Investment Securities, per
// `core/broker.py` and `core/api/rest_api_manager.py` in the Python
// original) is out of scope: its wire format is a black box per §6. So
// `BrokerClient` is a trait, mirroring the teacher's pattern of keeping I/O
// behind a small async surface that callers can swap for a test double.
// `HttpBrokerClient` is the one production implementation (signing/timeout/
// instrumentation idiom lifted from `binance::client::BinanceClient`);
// `MockBrokerClient` is the in-memory test double used throughout the test
// suite instead of ever exercising the real endpoint paths.

mod http_client;
mod mock;
pub mod rate_limit;

pub use http_client::HttpBrokerClient;
pub use mock::MockBrokerClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{BalanceSnapshot, DailyBar, Orderbook, Quote, Side, Symbol};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DailyPeriod {
    D,
    W,
    M,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Market {
    All,
    Kospi,
    Kosdaq,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenedSymbol {
    pub symbol: Symbol,
    pub change_rate: f64,
    pub volume: u64,
    pub technical_score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScreenResult {
    pub gap: Vec<ScreenedSymbol>,
    pub volume: Vec<ScreenedSymbol>,
    pub momentum: Vec<ScreenedSymbol>,
    pub technical: Vec<ScreenedSymbol>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayOrder {
    pub broker_order_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub qty: f64,
    pub filled_qty: f64,
    pub remaining_qty: f64,
    pub limit_price: f64,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
    pub cancelled: bool,
}

/// Result of a successful order submission: broker id plus the routing
/// organization number required later for `cancel_order` (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub broker_order_id: String,
    pub org_no: String,
}

#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn get_quote(&self, symbol: &str) -> anyhow::Result<Quote>;
    async fn get_orderbook(&self, symbol: &str) -> anyhow::Result<Orderbook>;
    async fn get_daily_series(
        &self,
        symbol: &str,
        period: DailyPeriod,
        n: u32,
    ) -> anyhow::Result<Vec<DailyBar>>;
    async fn place_order(
        &self,
        symbol: &str,
        side: Side,
        qty: f64,
        limit_price: f64,
    ) -> anyhow::Result<PlacedOrder>;
    async fn cancel_order(
        &self,
        broker_order_id: &str,
        org_no: &str,
        side: Side,
        qty_all: bool,
    ) -> anyhow::Result<()>;
    async fn list_day_orders(&self) -> anyhow::Result<Vec<DayOrder>>;
    async fn get_balance(&self) -> anyhow::Result<BalanceSnapshot>;
    async fn screen_market(&self, market: Market) -> anyhow::Result<ScreenResult>;
}
