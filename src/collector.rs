// =============================================================================
// Data Collector — unified read path: stream → cache → REST fallback
// =============================================================================
//
// Never throws: every public method returns a `CollectorResult<T>` that
// names where the value came from (or that none was available), the same
// "typed outcome over bare Option/Result" shape the teacher uses for its
// strategy `DecisionEnvelope`. Callback signature is standardized to a
// single `Fn(MarketEvent) + Send + Sync`, matching the teacher's plain
// `Arc<dyn Fn(...)>` idiom for strategy callbacks.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::broker::BrokerClient;
use crate::cache::{Cache, Freshness};
use crate::stream::{MarketEvent, StreamClient, StreamKind};
use crate::types::{DailyBar, Orderbook, Quote, Source, Symbol};

#[derive(Debug, Clone)]
pub enum CollectorResult<T> {
    Stream(T),
    Rest(T),
    Cache(T),
    Unavailable,
}

impl<T> CollectorResult<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            CollectorResult::Stream(v) | CollectorResult::Rest(v) | CollectorResult::Cache(v) => Some(v),
            CollectorResult::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, CollectorResult::Unavailable)
    }
}

type EventCallback = Arc<dyn Fn(MarketEvent) + Send + Sync>;

pub struct DataCollector {
    cache: Arc<Cache>,
    broker: Arc<dyn BrokerClient>,
    stream: Arc<StreamClient>,
    callbacks: RwLock<HashMap<Symbol, Vec<EventCallback>>>,
}

impl DataCollector {
    pub fn new(cache: Arc<Cache>, broker: Arc<dyn BrokerClient>, stream: Arc<StreamClient>) -> Arc<Self> {
        Arc::new(Self {
            cache,
            broker,
            stream,
            callbacks: RwLock::new(HashMap::new()),
        })
    }

    /// Register a callback for a symbol's stream events and make sure the
    /// stream is asked to carry both trade and orderbook frames for it.
    /// Subscription-cap enforcement is the Subscription Manager's job; this
    /// call simply forwards to the stream client and surfaces its result.
    pub async fn subscribe_realtime(
        &self,
        symbol: &str,
        callback: EventCallback,
    ) -> crate::error::EngineResult<()> {
        self.callbacks
            .write()
            .entry(symbol.to_string())
            .or_default()
            .push(callback);
        self.stream.subscribe(symbol, StreamKind::Trade).await?;
        self.stream.subscribe(symbol, StreamKind::Orderbook).await?;
        Ok(())
    }

    /// Drops callbacks and tells the stream client to drop both frame kinds
    /// for `symbol`. Used when a time slot ends and its candidates are torn
    /// down.
    pub async fn unsubscribe_realtime(&self, symbol: &str) {
        self.callbacks.write().remove(symbol);
        self.stream.unsubscribe(symbol, StreamKind::Trade).await;
        self.stream.unsubscribe(symbol, StreamKind::Orderbook).await;
    }

    /// Drains `events_rx` forever, updating the cache and fanning out to
    /// registered callbacks outside any lock hold, mirroring the teacher's
    /// "snapshot then release" callback-firing pattern.
    pub async fn run_event_loop(self: Arc<Self>, mut events_rx: mpsc::UnboundedReceiver<MarketEvent>) {
        while let Some(event) = events_rx.recv().await {
            if event.event_type == "trade" {
                if let Some(price) = event.payload.get("price").and_then(|p| p.as_f64()) {
                    let quote = Quote {
                        symbol: event.symbol.clone(),
                        price,
                        change_rate: event.payload.get("change_rate").and_then(|v| v.as_f64()).unwrap_or(0.0),
                        volume: event.payload.get("volume").and_then(|v| v.as_u64()).unwrap_or(0),
                        timestamp: chrono::Utc::now(),
                        source: Source::Stream,
                    };
                    self.cache.put_quote(quote);
                }
            }

            let callbacks = self.callbacks.read().get(&event.symbol).cloned();
            if let Some(callbacks) = callbacks {
                for cb in callbacks {
                    cb(event.clone());
                }
            }
        }
        warn!("stream event channel closed, collector event loop exiting");
    }

    /// stream <5s fresh → stream <30s stale-but-used → REST write-through
    /// (anti-overwrite enforced inside `Cache::put_quote`) → cache fallback.
    pub async fn get_current_price(&self, symbol: &str) -> CollectorResult<Quote> {
        match self.cache.quote_freshness(symbol) {
            Some(Freshness::Fresh) | Some(Freshness::Usable)
                if self.cache.quote_source(symbol) == Some(Source::Stream) =>
            {
                if let Some(quote) = self.cache.get_quote(symbol) {
                    return CollectorResult::Stream(quote);
                }
            }
            _ => {}
        }

        match self.broker.get_quote(symbol).await {
            Ok(mut quote) => {
                quote.source = Source::Rest;
                self.cache.put_quote(quote.clone());
                CollectorResult::Rest(quote)
            }
            Err(e) => {
                debug!(symbol, error = %e, "REST quote fetch failed, falling back to cache");
                match self.cache.get_quote(symbol) {
                    Some(quote) => CollectorResult::Cache(quote),
                    None => CollectorResult::Unavailable,
                }
            }
        }
    }

    pub async fn get_orderbook(&self, symbol: &str) -> CollectorResult<Orderbook> {
        if let Some(book) = self.cache.get_orderbook(symbol) {
            return CollectorResult::Cache(book);
        }
        match self.broker.get_orderbook(symbol).await {
            Ok(book) => {
                self.cache.put_orderbook(book.clone());
                CollectorResult::Rest(book)
            }
            Err(e) => {
                debug!(symbol, error = %e, "orderbook fetch failed");
                CollectorResult::Unavailable
            }
        }
    }

    pub async fn get_daily_series(&self, symbol: &str, n: u32) -> CollectorResult<Vec<DailyBar>> {
        if let Some(rows) = self.cache.get_daily(symbol) {
            if rows.len() as u32 >= n {
                return CollectorResult::Cache(rows);
            }
        }
        match self.broker.get_daily_series(symbol, crate::broker::DailyPeriod::D, n).await {
            Ok(rows) => {
                self.cache.put_daily(symbol, rows.clone());
                CollectorResult::Rest(rows)
            }
            Err(e) => {
                debug!(symbol, error = %e, "daily series fetch failed");
                CollectorResult::Unavailable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBrokerClient;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn collector() -> Arc<DataCollector> {
        let cache = Arc::new(Cache::new());
        let broker: Arc<dyn BrokerClient> = Arc::new(MockBrokerClient::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let stream = StreamClient::new("wss://example.invalid", tx);
        DataCollector::new(cache, broker, stream)
    }

    #[tokio::test]
    async fn falls_back_to_rest_when_cache_empty() {
        let collector = collector();
        // the mock broker has no quote configured, so this should return Unavailable,
        // proving the REST path was attempted rather than panicking.
        let result = collector.get_current_price("005930").await;
        assert!(matches!(result, CollectorResult::Unavailable));
    }

    #[tokio::test]
    async fn prefers_fresh_stream_entry_over_rest() {
        let collector = collector();
        collector.cache.put_quote(Quote {
            symbol: "005930".to_string(),
            price: 71000.0,
            change_rate: 0.0,
            volume: 500,
            timestamp: chrono::Utc::now(),
            source: Source::Stream,
        });
        let result = collector.get_current_price("005930").await;
        match result {
            CollectorResult::Stream(q) => assert_eq!(q.price, 71000.0),
            other => panic!("expected Stream result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn event_loop_updates_cache_and_invokes_callback() {
        let collector = collector();
        let (tx, rx) = mpsc::unbounded_channel();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        collector
            .subscribe_realtime(
                "005930",
                Arc::new(move |_event| {
                    hits2.fetch_add(1, Ordering::Relaxed);
                }),
            )
            .await
            .unwrap();

        let handle = tokio::spawn(collector.clone().run_event_loop(rx));
        tx.send(MarketEvent {
            event_type: "trade".to_string(),
            symbol: "005930".to_string(),
            payload: serde_json::json!({ "price": 72500.0 }),
        })
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert_eq!(collector.cache.get_quote("005930").unwrap().price, 72500.0);
    }
}
