// =============================================================================
// Trade Executor — validates, prices, sizes, and submits buy/sell orders
// =============================================================================
//
// Shape adapted from the teacher's `execution.rs` (`ExecutionEngine` routing
// a proposal through a risk pre-check then the broker client, recording a
// position on success, no partial state on failure). Per-strategy price/size
// tables live in the injected `config::TradeExecutorConfig` (lifted from
// `original_source/core/trade_executor.py`'s `TradeConfig` defaults) rather
// than as literals here.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::broker::BrokerClient;
use crate::collector::{CollectorResult, DataCollector};
use crate::config::TradeExecutorConfig;
use crate::error::{EngineError, EngineResult};
use crate::position::PositionManager;
use crate::risk::RiskEngine;
use crate::store::TradeStore;
use crate::types::{PositionSource, Side};

/// Korean equity tick table: price rounds down to the tick size of its band.
pub fn snap_to_tick(price: f64) -> f64 {
    let price = price.floor();
    let tick = if price < 1000.0 {
        1.0
    } else if price < 5000.0 {
        5.0
    } else if price < 10_000.0 {
        10.0
    } else if price < 50_000.0 {
        50.0
    } else if price < 100_000.0 {
        100.0
    } else if price < 500_000.0 {
        500.0
    } else {
        1000.0
    };
    (price / tick).floor() * tick
}

fn volatility_adjustment(current_price: f64) -> f64 {
    if current_price < 5000.0 {
        0.002
    } else if current_price > 100_000.0 {
        -0.001
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// Result type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct FilledOrder {
    pub trade_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub total: f64,
    pub broker_order_id: String,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct TradeExecutor {
    broker: Arc<dyn BrokerClient>,
    collector: Arc<DataCollector>,
    positions: Arc<PositionManager>,
    risk: Arc<RiskEngine>,
    store: Arc<TradeStore>,
    config: TradeExecutorConfig,
    pending_orders: Mutex<HashSet<String>>,
}

impl TradeExecutor {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        collector: Arc<DataCollector>,
        positions: Arc<PositionManager>,
        risk: Arc<RiskEngine>,
        store: Arc<TradeStore>,
        config: TradeExecutorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            broker,
            collector,
            positions,
            risk,
            store,
            config,
            pending_orders: Mutex::new(HashSet::new()),
        })
    }

    #[instrument(skip(self))]
    pub async fn execute_buy(&self, symbol: &str, strategy: &str, strength: f64) -> EngineResult<FilledOrder> {
        if symbol.is_empty() {
            return Err(EngineError::Validation("symbol is empty".into()));
        }
        if self.positions.has_open(symbol) {
            return Err(EngineError::Validation(format!("{symbol} already has an open position")));
        }
        {
            let mut pending = self.pending_orders.lock();
            if !pending.insert(symbol.to_string()) {
                return Err(EngineError::Validation(format!("{symbol} already has an order in flight")));
            }
        }

        let result = self.execute_buy_inner(symbol, strategy, strength).await;
        self.pending_orders.lock().remove(symbol);
        result
    }

    async fn execute_buy_inner(&self, symbol: &str, strategy: &str, strength: f64) -> EngineResult<FilledOrder> {
        let current_price = match self.collector.get_current_price(symbol).await {
            CollectorResult::Unavailable => {
                return Err(EngineError::StaleData(format!("no usable price for {symbol}")))
            }
            r => r.into_value().expect("non-Unavailable CollectorResult always carries a value").price,
        };

        let premium = self.config.buy_premium(strategy) + volatility_adjustment(current_price);
        let premium = premium.clamp(0.001, 0.01);
        let limit_price = snap_to_tick(current_price * (1.0 + premium));

        let balance = self
            .broker
            .get_balance()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        if balance.cash_available < self.config.min_investment_amount {
            warn!(
                symbol,
                cash_available = balance.cash_available,
                min_investment = self.config.min_investment_amount,
                "available cash below minimum investment"
            );
            return Err(EngineError::InsufficientFunds);
        }

        let strategy_mult = self.config.multiplier(strategy);
        let strength = strength.clamp(0.3, 1.2);
        let position_ratio = self.config.base_position_ratio * strategy_mult * strength;

        let budget = (balance.cash_available * position_ratio)
            .min(balance.cash_available * self.config.max_position_ratio)
            .min(self.config.max_investment_amount);

        let mut qty = (budget / limit_price).floor();
        if qty * limit_price < self.config.min_investment_amount {
            qty = (self.config.min_investment_amount / limit_price).floor().max(1.0);
        }
        if qty * limit_price > balance.cash_available {
            qty = (balance.cash_available / limit_price).floor();
        }

        if qty <= 0.0 {
            warn!(symbol, budget, limit_price, "budget insufficient for one share");
            return Err(EngineError::InsufficientFunds);
        }

        let placed = self
            .broker
            .place_order(symbol, Side::Buy, qty, limit_price)
            .await
            .map_err(|e| EngineError::BrokerRejected(e.to_string()))?;

        let trade_id = self
            .store
            .record_buy(symbol, qty, limit_price, strategy, &placed.broker_order_id)
            .map_err(|e| EngineError::Other(e))?;

        self.positions.open_position(symbol, qty, limit_price, strategy, PositionSource::Bot);
        self.risk.record_trade_result(0.0);

        info!(symbol, strategy, qty, limit_price, trade_id, "buy order filled");
        Ok(FilledOrder {
            trade_id,
            symbol: symbol.to_string(),
            side: Side::Buy,
            quantity: qty,
            price: limit_price,
            total: qty * limit_price,
            broker_order_id: placed.broker_order_id,
        })
    }

    #[instrument(skip(self))]
    pub async fn execute_sell(&self, symbol: &str, strategy: &str) -> EngineResult<FilledOrder> {
        let discount = self.config.sell_discount(strategy);
        self.execute_sell_with_discount(symbol, strategy, discount).await
    }

    #[instrument(skip(self))]
    pub async fn execute_auto_sell(&self, symbol: &str, strategy: &str) -> EngineResult<FilledOrder> {
        self.execute_sell_with_discount(symbol, strategy, self.config.auto_sell_discount).await
    }

    async fn execute_sell_with_discount(&self, symbol: &str, strategy: &str, discount: f64) -> EngineResult<FilledOrder> {
        let position = self
            .positions
            .get_open(symbol)
            .ok_or_else(|| EngineError::Validation(format!("no open position for {symbol}")))?;
        if position.quantity <= 0.0 {
            return Err(EngineError::Validation(format!("{symbol} has zero quantity to sell")));
        }

        let current_price = match self.collector.get_current_price(symbol).await {
            CollectorResult::Unavailable => {
                return Err(EngineError::StaleData(format!("no usable price for {symbol}")))
            }
            r => r.into_value().expect("non-Unavailable CollectorResult always carries a value").price,
        };

        let balance = self
            .broker
            .get_balance()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        let broker_qty = balance
            .holdings
            .iter()
            .find(|h| h.symbol == symbol)
            .map(|h| h.qty)
            .unwrap_or(0.0);
        let qty = position.quantity.min(broker_qty);
        if qty <= 0.0 {
            return Err(EngineError::Validation(format!(
                "local position {} disagrees with broker holding {broker_qty} for {symbol}",
                position.quantity
            )));
        }

        let sell_price = snap_to_tick(current_price * (1.0 - discount));

        let placed = self
            .broker
            .place_order(symbol, Side::Sell, qty, sell_price)
            .await
            .map_err(|e| EngineError::BrokerRejected(e.to_string()))?;

        let trade_id = self
            .store
            .record_sell(symbol, qty, sell_price, strategy, &placed.broker_order_id)
            .map_err(EngineError::Other)?;

        self.positions.reduce_position(symbol, qty);

        let pnl = (sell_price - position.avg_cost) * qty;
        self.risk.record_trade_result(pnl);

        info!(symbol, strategy, qty, sell_price, trade_id, pnl, "sell order filled");
        Ok(FilledOrder {
            trade_id,
            symbol: symbol.to_string(),
            side: Side::Sell,
            quantity: qty,
            price: sell_price,
            total: qty * sell_price,
            broker_order_id: placed.broker_order_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBrokerClient;
    use crate::cache::Cache;
    use crate::stream::StreamClient;
    use tokio::sync::mpsc;

    fn executor() -> (Arc<TradeExecutor>, Arc<MockBrokerClient>) {
        let broker = Arc::new(MockBrokerClient::new());
        let broker_dyn: Arc<dyn BrokerClient> = broker.clone();
        let cache = Arc::new(Cache::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let stream = StreamClient::new("wss://example.invalid", tx);
        let collector = DataCollector::new(cache, broker_dyn.clone(), stream);
        let positions = Arc::new(PositionManager::new());
        let risk = Arc::new(RiskEngine::new(10_000_000.0, 0.03, 5, 0.05, 50));
        let store = Arc::new(TradeStore::open_memory().unwrap());
        let executor = TradeExecutor::new(broker_dyn, collector, positions, risk, store, TradeExecutorConfig::default());
        (executor, broker)
    }

    #[test]
    fn tick_snapping_matches_price_bands() {
        assert_eq!(snap_to_tick(999.0), 999.0);
        assert_eq!(snap_to_tick(1000.0), 1000.0);
        assert_eq!(snap_to_tick(4999.0), 4995.0);
        assert_eq!(snap_to_tick(5000.0), 5000.0);
        assert_eq!(snap_to_tick(9999.0), 9990.0);
        assert_eq!(snap_to_tick(10_000.0), 10_000.0);
    }

    #[tokio::test]
    async fn buy_computes_budget_and_rounds_down_quantity() {
        let (executor, broker) = executor();
        // price*premium lands exactly on a tick boundary so the expected
        // numbers are unambiguous; budget is capped by max_investment_amount.
        broker.set_quote("005930", 10_000.0);

        let filled = executor.execute_buy("005930", "default", 1.0).await.unwrap();
        assert_eq!(filled.price, 10_000.0);
        assert_eq!(filled.quantity, 50.0);
    }

    #[tokio::test]
    async fn buy_rejects_duplicate_while_pending_position_open() {
        let (executor, broker) = executor();
        broker.set_quote("005930", 70000.0);
        executor.execute_buy("005930", "gap_trading", 1.0).await.unwrap();

        let err = executor.execute_buy("005930", "gap_trading", 1.0).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn sell_clamps_to_broker_holding_quantity() {
        let (executor, broker) = executor();
        broker.set_quote("005930", 70000.0);
        let filled_buy = executor.execute_buy("005930", "gap_trading", 1.0).await.unwrap();
        // Broker only actually holds half of what the local position thinks.
        broker.set_holding("005930", filled_buy.quantity / 2.0, filled_buy.price);

        let filled = executor.execute_sell("005930", "gap_trading").await.unwrap();
        assert_eq!(filled.quantity, filled_buy.quantity / 2.0);
        assert_eq!(filled.price, snap_to_tick(70000.0 * 0.995));
    }

    #[tokio::test]
    async fn buy_fails_when_broker_has_no_cash() {
        let (executor, broker) = executor();
        broker.set_quote("005930", 70000.0);
        broker.set_balance_cash(0.0);

        let err = executor.execute_buy("005930", "gap_trading", 1.0).await.unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds));
    }
}
