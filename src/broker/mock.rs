// =============================================================================
// MockBrokerClient — in-memory test double behind the BrokerClient trait
// =============================================================================
//
// Lets the rest of the engine (executor, scheduler, subscription manager)
// be exercised in tests without ever hitting a real endpoint, following the
// teacher's preference for testing behind a small async trait rather than
// mocking HTTP at the transport layer.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{BrokerClient, DailyPeriod, DayOrder, Market, PlacedOrder, ScreenResult};
use crate::types::{BalanceSnapshot, DailyBar, HoldingLine, Orderbook, Quote, Side, Source, Symbol};

pub struct MockBrokerClient {
    pub quotes: RwLock<std::collections::HashMap<Symbol, Quote>>,
    pub balance: RwLock<BalanceSnapshot>,
    pub screen_result: RwLock<ScreenResult>,
    pub orders_placed: RwLock<Vec<(Symbol, Side, f64, f64)>>,
    pub next_order_id: AtomicU64,
    pub reject_orders: std::sync::atomic::AtomicBool,
}

impl MockBrokerClient {
    pub fn new() -> Self {
        Self {
            quotes: RwLock::new(std::collections::HashMap::new()),
            balance: RwLock::new(BalanceSnapshot {
                total_value: 10_000_000.0,
                cash_available: 10_000_000.0,
                stock_value: 0.0,
                unrealized_pnl: 0.0,
                holdings: Vec::new(),
            }),
            screen_result: RwLock::new(ScreenResult::default()),
            orders_placed: RwLock::new(Vec::new()),
            next_order_id: AtomicU64::new(1),
            reject_orders: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_quote(&self, symbol: &str, price: f64) {
        self.quotes.write().insert(
            symbol.to_string(),
            Quote {
                symbol: symbol.to_string(),
                price,
                change_rate: 0.0,
                volume: 1_000,
                timestamp: chrono::Utc::now(),
                source: Source::Rest,
            },
        );
    }

    pub fn set_balance_cash(&self, cash: f64) {
        let mut balance = self.balance.write();
        balance.cash_available = cash;
        balance.total_value = cash + balance.stock_value;
    }

    /// Registers a broker-side holding so sell-path tests can exercise the
    /// `min(position_qty, broker_holding_qty)` clamp.
    pub fn set_holding(&self, symbol: &str, qty: f64, avg_cost: f64) {
        let mut balance = self.balance.write();
        balance.holdings.retain(|h| h.symbol != symbol);
        balance.holdings.push(HoldingLine {
            symbol: symbol.to_string(),
            qty,
            avg_cost,
        });
    }
}

impl Default for MockBrokerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerClient for MockBrokerClient {
    async fn get_quote(&self, symbol: &str) -> anyhow::Result<Quote> {
        self.quotes
            .read()
            .get(symbol)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("NOT_FOUND: no mock quote for {symbol}"))
    }

    async fn get_orderbook(&self, symbol: &str) -> anyhow::Result<Orderbook> {
        Ok(Orderbook {
            symbol: symbol.to_string(),
            asks: Vec::new(),
            bids: Vec::new(),
            total_ask_size: 0,
            total_bid_size: 0,
            captured_at: chrono::Utc::now(),
        })
    }

    async fn get_daily_series(&self, _symbol: &str, _period: DailyPeriod, _n: u32) -> anyhow::Result<Vec<DailyBar>> {
        Ok(Vec::new())
    }

    async fn place_order(&self, symbol: &str, side: Side, qty: f64, limit_price: f64) -> anyhow::Result<PlacedOrder> {
        if self.reject_orders.load(Ordering::Relaxed) {
            anyhow::bail!("BROKER_REJECTED: mock configured to reject");
        }
        self.orders_placed.write().push((symbol.to_string(), side, qty, limit_price));
        let id = self.next_order_id.fetch_add(1, Ordering::Relaxed);
        Ok(PlacedOrder {
            broker_order_id: format!("MOCK-{id}"),
            org_no: format!("ORG-{id}"),
        })
    }

    async fn cancel_order(&self, _broker_order_id: &str, _org_no: &str, _side: Side, _qty_all: bool) -> anyhow::Result<()> {
        Ok(())
    }

    async fn list_day_orders(&self) -> anyhow::Result<Vec<DayOrder>> {
        Ok(Vec::new())
    }

    async fn get_balance(&self) -> anyhow::Result<BalanceSnapshot> {
        Ok(self.balance.read().clone())
    }

    async fn screen_market(&self, _market: Market) -> anyhow::Result<ScreenResult> {
        Ok(self.screen_result.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_quote_returns_configured_price() {
        let mock = MockBrokerClient::new();
        mock.set_quote("005930", 72000.0);
        let q = mock.get_quote("005930").await.unwrap();
        assert_eq!(q.price, 72000.0);
    }

    #[tokio::test]
    async fn place_order_records_and_returns_id() {
        let mock = MockBrokerClient::new();
        let placed = mock.place_order("005930", Side::Buy, 10.0, 72000.0).await.unwrap();
        assert!(placed.broker_order_id.starts_with("MOCK-"));
        assert_eq!(mock.orders_placed.read().len(), 1);
    }

    #[tokio::test]
    async fn place_order_can_be_configured_to_reject() {
        let mock = MockBrokerClient::new();
        mock.reject_orders.store(true, Ordering::Relaxed);
        let result = mock.place_order("005930", Side::Buy, 10.0, 72000.0).await;
        assert!(result.is_err());
    }
}
