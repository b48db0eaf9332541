// =============================================================================
// Subscription Manager — REALTIME/POLLING allocation under a stream cap
// =============================================================================
//
// Grounded directly in `original_source/core/data/hybrid_data_manager.py`'s
// `SimpleHybridDataManager` (constants `WEBSOCKET_LIMIT=41`,
// `STREAMS_PER_STOCK=2`, `MAX_REALTIME_STOCKS=20`, `polling_interval=15`,
// `subscription_lock` as an `RLock`, a `stats` dict tracking
// `priority_swaps`). The Rust port keeps the same "one lock guards
// everything, recursive promote/evict helpers call back into each other"
// shape the Python uses, but needs genuine reentrancy rather than Python's
// GIL-backed RLock — `parking_lot::ReentrantMutex<RefCell<Inner>>` is the
// idiomatic substitute, following the teacher's habit of one lock per
// subsystem (`app_state.rs`) generalized here because `upgrade_priority`
// recursively calls the same promote/evict helpers `add_stock_request` uses.

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::ReentrantMutex;
use tracing::{debug, info, warn};

use crate::collector::DataCollector;
use crate::stream::MarketEvent;
use crate::types::{Priority, Symbol};

const MAX_REALTIME: usize = 20;
const DEFAULT_POLLING_INTERVAL_SECS: u64 = 15;
const MIN_POLLING_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct SubscriptionEntry {
    pub symbol: Symbol,
    pub strategy: String,
    pub priority: Priority,
    pub score: f64,
    pub realtime: bool,
    pub added_at: DateTime<Utc>,
    pub last_update: Option<DateTime<Utc>>,
    pub update_count: u64,
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct SubscriptionStats {
    pub total_subscriptions: usize,
    pub active_realtime: usize,
    pub active_polling: usize,
    pub priority_swaps: u64,
}

struct Inner {
    subscriptions: std::collections::HashMap<Symbol, SubscriptionEntry>,
    realtime_set: Vec<Symbol>,
    polling_set: HashSet<Symbol>,
    waitlist: Vec<Symbol>,
    priority_swaps: u64,
}

impl Inner {
    fn new() -> Self {
        Self {
            subscriptions: std::collections::HashMap::new(),
            realtime_set: Vec::new(),
            polling_set: HashSet::new(),
            waitlist: Vec::new(),
            priority_swaps: 0,
        }
    }

    fn sort_waitlist(&mut self) {
        let subs = &self.subscriptions;
        self.waitlist.sort_by(|a, b| {
            let sa = subs.get(a);
            let sb = subs.get(b);
            let pa = sa.map(|s| s.priority).unwrap_or(Priority::Background);
            let pb = sb.map(|s| s.priority).unwrap_or(Priority::Background);
            let sca = sa.map(|s| s.score).unwrap_or(0.0);
            let scb = sb.map(|s| s.score).unwrap_or(0.0);
            pa.cmp(&pb).then(scb.partial_cmp(&sca).unwrap_or(std::cmp::Ordering::Equal))
        });
    }
}

pub struct SubscriptionManager {
    inner: ReentrantMutex<RefCell<Inner>>,
    collector: Arc<DataCollector>,
    polling_interval_secs: AtomicU64,
}

impl SubscriptionManager {
    pub fn new(collector: Arc<DataCollector>, polling_interval_secs: u64) -> Arc<Self> {
        Arc::new(Self {
            inner: ReentrantMutex::new(RefCell::new(Inner::new())),
            collector,
            polling_interval_secs: AtomicU64::new(polling_interval_secs.max(MIN_POLLING_INTERVAL_SECS)),
        })
    }

    pub fn set_polling_interval(&self, secs: u64) {
        let floored = secs.max(MIN_POLLING_INTERVAL_SECS);
        self.polling_interval_secs.store(floored, Ordering::Relaxed);
        info!(interval_secs = floored, "polling interval updated");
    }

    pub fn stats(&self) -> SubscriptionStats {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        SubscriptionStats {
            total_subscriptions: inner.subscriptions.len(),
            active_realtime: inner.realtime_set.len(),
            active_polling: inner.polling_set.len(),
            priority_swaps: inner.priority_swaps,
        }
    }

    /// Dedupe; try realtime for CRITICAL/HIGH with capacity, else waitlist +
    /// poll, else poll directly. Callback registration with the Data
    /// Collector happens outside the lock hold.
    pub async fn add_stock_request(&self, symbol: &str, priority: Priority, strategy: &str) -> bool {
        let already_present = {
            let guard = self.inner.lock();
            guard.borrow().subscriptions.contains_key(symbol)
        };
        if already_present {
            debug!(symbol, "already subscribed, ignoring duplicate request");
            return false;
        }

        let entry = SubscriptionEntry {
            symbol: symbol.to_string(),
            strategy: strategy.to_string(),
            priority,
            score: 0.0,
            realtime: false,
            added_at: Utc::now(),
            last_update: None,
            update_count: 0,
        };

        let wants_realtime = priority.wants_realtime();
        let has_room = {
            let guard = self.inner.lock();
            let mut inner = guard.borrow_mut();
            inner.subscriptions.insert(symbol.to_string(), entry);
            inner.realtime_set.len() < MAX_REALTIME
        };

        if wants_realtime && has_room {
            self.promote_to_realtime(symbol).await
        } else if wants_realtime {
            let guard = self.inner.lock();
            let mut inner = guard.borrow_mut();
            inner.waitlist.push(symbol.to_string());
            inner.sort_waitlist();
            inner.polling_set.insert(symbol.to_string());
            drop(inner);
            drop(guard);
            true
        } else {
            let guard = self.inner.lock();
            guard.borrow_mut().polling_set.insert(symbol.to_string());
            true
        }
    }

    async fn promote_to_realtime(&self, symbol: &str) -> bool {
        match self
            .collector
            .subscribe_realtime(symbol, Arc::new(|_event: MarketEvent| {}))
            .await
        {
            Ok(()) => {
                let guard = self.inner.lock();
                let mut inner = guard.borrow_mut();
                if !inner.realtime_set.contains(&symbol.to_string()) {
                    inner.realtime_set.push(symbol.to_string());
                }
                inner.polling_set.remove(symbol);
                inner.waitlist.retain(|s| s != symbol);
                if let Some(sub) = inner.subscriptions.get_mut(symbol) {
                    sub.realtime = true;
                }
                true
            }
            Err(e) => {
                warn!(symbol, error = %e, "realtime subscribe failed, falling back to polling");
                let guard = self.inner.lock();
                guard.borrow_mut().polling_set.insert(symbol.to_string());
                false
            }
        }
    }

    /// May evict a lower-ranked realtime holder (swap, `priority_swaps` stat).
    pub async fn upgrade_priority(&self, symbol: &str, new_priority: Priority) {
        let (already_realtime, has_room, victim) = {
            let guard = self.inner.lock();
            let mut inner = guard.borrow_mut();
            let Some(sub) = inner.subscriptions.get_mut(symbol) else {
                return;
            };
            sub.priority = new_priority;
            let already_realtime = sub.realtime;
            let has_room = inner.realtime_set.len() < MAX_REALTIME;
            let victim = if !already_realtime && !has_room {
                inner
                    .realtime_set
                    .iter()
                    .find(|s| {
                        inner
                            .subscriptions
                            .get(*s)
                            .map(|v| v.priority > new_priority)
                            .unwrap_or(false)
                    })
                    .cloned()
            } else {
                None
            };
            (already_realtime, has_room, victim)
        };

        if already_realtime {
            return;
        }

        if has_room {
            self.promote_to_realtime(symbol).await;
            return;
        }

        if let Some(victim) = victim {
            self.downgrade_to_polling(&victim).await;
            if self.promote_to_realtime(symbol).await {
                let guard = self.inner.lock();
                guard.borrow_mut().priority_swaps += 1;
                info!(from = %victim, to = symbol, "priority swap");
            }
        }
    }

    /// Frees a slot and promotes the waitlist head.
    pub async fn downgrade_to_polling(&self, symbol: &str) {
        {
            let guard = self.inner.lock();
            let mut inner = guard.borrow_mut();
            inner.realtime_set.retain(|s| s != symbol);
            inner.polling_set.insert(symbol.to_string());
            if let Some(sub) = inner.subscriptions.get_mut(symbol) {
                sub.realtime = false;
            }
        }
        self.promote_waitlist_head().await;
    }

    async fn promote_waitlist_head(&self) {
        let head = {
            let guard = self.inner.lock();
            let mut inner = guard.borrow_mut();
            if inner.realtime_set.len() >= MAX_REALTIME {
                return;
            }
            if inner.waitlist.is_empty() {
                return;
            }
            Some(inner.waitlist.remove(0))
        };
        if let Some(symbol) = head {
            if self.promote_to_realtime(&symbol).await {
                let guard = self.inner.lock();
                guard.borrow_mut().priority_swaps += 1;
            }
        }
    }

    /// Tears a symbol out of every internal set and unsubscribes its stream,
    /// mirroring `SimpleHybridDataManager.remove_stock`. The scheduler calls
    /// this on every previously active symbol when a time slot ends.
    pub async fn remove_stock(&self, symbol: &str) {
        let was_realtime = {
            let guard = self.inner.lock();
            let mut inner = guard.borrow_mut();
            let was_realtime = inner.realtime_set.contains(&symbol.to_string());
            inner.subscriptions.remove(symbol);
            inner.realtime_set.retain(|s| s != symbol);
            inner.polling_set.remove(symbol);
            inner.waitlist.retain(|s| s != symbol);
            was_realtime
        };
        if was_realtime {
            self.collector.unsubscribe_realtime(symbol).await;
        }
        self.promote_waitlist_head().await;
    }

    /// Stream reported `CAPACITY_EXCEEDED` or another error for `symbol`:
    /// demote to polling, subscription still succeeds.
    pub async fn handle_stream_error(&self, symbol: &str) {
        warn!(symbol, "stream error, demoting to polling");
        self.downgrade_to_polling(symbol).await;
    }

    /// On stream reconnect: re-subscribe every symbol in `realtime_set`.
    pub async fn resubscribe_all_realtime(&self) {
        let symbols = {
            let guard = self.inner.lock();
            guard.borrow().realtime_set.clone()
        };
        for symbol in symbols {
            let _ = self
                .collector
                .subscribe_realtime(&symbol, Arc::new(|_event: MarketEvent| {}))
                .await;
        }
    }

    /// Single worker: every `polling_interval_secs` (floor 10s), fetches the
    /// current polling set with a short per-symbol throttle between calls.
    pub async fn run_polling_loop(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            let interval = Duration::from_secs(self.polling_interval_secs.load(Ordering::Relaxed));
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }

            let symbols: Vec<Symbol> = {
                let guard = self.inner.lock();
                guard.borrow().polling_set.iter().cloned().collect()
            };
            for symbol in symbols {
                let result = self.collector.get_current_price(&symbol).await;
                if result.is_available() {
                    let guard = self.inner.lock();
                    if let Some(sub) = guard.borrow_mut().subscriptions.get_mut(&symbol) {
                        sub.last_update = Some(Utc::now());
                        sub.update_count += 1;
                    }
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerClient, MockBrokerClient};
    use crate::cache::Cache;
    use crate::stream::StreamClient;

    fn manager() -> Arc<SubscriptionManager> {
        let cache = Arc::new(Cache::new());
        let broker: Arc<dyn BrokerClient> = Arc::new(MockBrokerClient::new());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let stream = StreamClient::new("wss://example.invalid", tx);
        let collector = DataCollector::new(cache, broker, stream);
        SubscriptionManager::new(collector, 15)
    }

    #[tokio::test]
    async fn critical_priority_gets_realtime_with_room() {
        let mgr = manager();
        mgr.add_stock_request("005930", Priority::Critical, "gap_trading").await;
        assert_eq!(mgr.stats().active_realtime, 1);
    }

    #[tokio::test]
    async fn duplicate_request_is_ignored() {
        let mgr = manager();
        assert!(mgr.add_stock_request("005930", Priority::Critical, "gap_trading").await);
        assert!(!mgr.add_stock_request("005930", Priority::Critical, "gap_trading").await);
        assert_eq!(mgr.stats().total_subscriptions, 1);
    }

    #[tokio::test]
    async fn low_priority_goes_straight_to_polling() {
        let mgr = manager();
        mgr.add_stock_request("005930", Priority::Low, "value").await;
        assert_eq!(mgr.stats().active_polling, 1);
        assert_eq!(mgr.stats().active_realtime, 0);
    }

    #[tokio::test]
    async fn filling_realtime_pushes_overflow_to_waitlist() {
        let mgr = manager();
        for i in 0..MAX_REALTIME {
            mgr.add_stock_request(&format!("S{i:05}"), Priority::Critical, "s").await;
        }
        mgr.add_stock_request("OVERFLOW", Priority::High, "s").await;
        assert_eq!(mgr.stats().active_realtime, MAX_REALTIME);
        assert_eq!(mgr.stats().active_polling, 1);
    }

    #[tokio::test]
    async fn downgrade_frees_a_slot_and_promotes_waitlist() {
        let mgr = manager();
        for i in 0..MAX_REALTIME {
            mgr.add_stock_request(&format!("S{i:05}"), Priority::Critical, "s").await;
        }
        mgr.add_stock_request("WAITER", Priority::High, "s").await;
        mgr.downgrade_to_polling("S00000").await;
        assert_eq!(mgr.stats().active_realtime, MAX_REALTIME);
        let guard = mgr.inner.lock();
        assert!(guard.borrow().realtime_set.contains(&"WAITER".to_string()));
    }

    #[tokio::test]
    async fn set_polling_interval_enforces_floor() {
        let mgr = manager();
        mgr.set_polling_interval(1);
        assert_eq!(mgr.polling_interval_secs.load(Ordering::Relaxed), MIN_POLLING_INTERVAL_SECS);
    }
}
