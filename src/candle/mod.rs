// =============================================================================
// Candle Trade Manager — pattern-driven watch list with a bounded universe
// =============================================================================
//
// Grounded in `original_source/core/strategy/candle_stock_manager.py`'s
// `CandleStockManager`: a flat `Dict[str, CandleTradeCandidate]` capped at
// `max_watch_stocks` (100), admission via `_calculate_candidate_quality_score`
// with a strict "new score beats the lowest evictable incumbent by more than
// 30" margin, and `ENTERED`/`PENDING_ORDER` candidates exempt from eviction.
// The periodic scan loop follows `exit::monitor::run_exit_monitor`'s idiom:
// one `HashMap` behind a lock, scanned on a fixed tick by a dedicated async
// task, rather than the Python's callback-driven updates.

pub mod pattern;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::collector::{CollectorResult, DataCollector};
use crate::execution::TradeExecutor;
use crate::types::{CandleCandidate, CandleState, Symbol};
use pattern::{HeuristicPatternDetector, PatternDetector};

pub const MAX_WATCH: usize = 100;
const ADMISSION_MARGIN: f64 = 30.0;
const SCAN_INTERVAL_SECS: u64 = 15;
const HISTORY_DAYS: u32 = 10;

/// Which candle source regime is active right now, mirroring
/// `get_current_strategy_mode`'s premarket/realtime window split (with
/// off-hours falling back to premarket, same as the Python original).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    Premarket,
    Realtime,
}

fn wall_clock_regime(now: NaiveTime) -> Regime {
    let premarket_start = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
    let premarket_end = NaiveTime::from_hms_opt(9, 59, 0).unwrap();
    let realtime_start = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
    let realtime_end = NaiveTime::from_hms_opt(15, 30, 0).unwrap();

    if now >= premarket_start && now <= premarket_end {
        Regime::Premarket
    } else if now >= realtime_start && now <= realtime_end {
        Regime::Realtime
    } else {
        Regime::Premarket
    }
}

pub struct CandleTradeManager {
    collector: Arc<DataCollector>,
    executor: Arc<TradeExecutor>,
    detector: Box<dyn PatternDetector>,
    candidates: RwLock<HashMap<Symbol, CandleCandidate>>,
    regime_override: RwLock<Option<Regime>>,
}

impl CandleTradeManager {
    pub fn new(collector: Arc<DataCollector>, executor: Arc<TradeExecutor>) -> Arc<Self> {
        Arc::new(Self {
            collector,
            executor,
            detector: Box::new(HeuristicPatternDetector),
            candidates: RwLock::new(HashMap::new()),
            regime_override: RwLock::new(None),
        })
    }

    pub fn current_regime(&self) -> Regime {
        self.regime_override.read().unwrap_or_else(|| wall_clock_regime(Utc::now().time()))
    }

    pub fn set_regime_override(&self, regime: Option<Regime>) {
        *self.regime_override.write() = regime;
    }

    pub fn watch_list(&self) -> Vec<CandleCandidate> {
        self.candidates.read().values().cloned().collect()
    }

    pub fn get(&self, symbol: &str) -> Option<CandleCandidate> {
        self.candidates.read().get(symbol).cloned()
    }

    /// Admission gate: accepts unconditionally under capacity; at capacity,
    /// evicts the lowest-scoring non-protected incumbent only if the new
    /// candidate beats it by more than `ADMISSION_MARGIN`, mirroring
    /// `add_candidate`'s smart-replacement logic exactly (including the
    /// `ENTERED`/`PENDING_ORDER` eviction exemption).
    pub fn admit(&self, candidate: CandleCandidate) -> bool {
        let now = Utc::now();
        let mut candidates = self.candidates.write();

        if let Some(existing) = candidates.get(&candidate.symbol) {
            if existing.is_protected() {
                warn!(symbol = %candidate.symbol, "refusing to overwrite a protected candle candidate");
                return false;
            }
            candidates.insert(candidate.symbol.clone(), candidate);
            return true;
        }

        if candidates.len() < MAX_WATCH {
            info!(symbol = %candidate.symbol, "candle candidate admitted");
            candidates.insert(candidate.symbol.clone(), candidate);
            return true;
        }

        let new_score = candidate.quality_score(now);
        let weakest = candidates
            .values()
            .filter(|c| !c.is_protected())
            .min_by(|a, b| a.quality_score(now).partial_cmp(&b.quality_score(now)).unwrap());

        match weakest {
            Some(weakest) if new_score > weakest.quality_score(now) + ADMISSION_MARGIN => {
                let evicted = weakest.symbol.clone();
                candidates.remove(&evicted);
                info!(evicted = %evicted, admitted = %candidate.symbol, "candle watch list smart replacement");
                candidates.insert(candidate.symbol.clone(), candidate);
                true
            }
            _ => {
                debug!(symbol = %candidate.symbol, "candle watch list full, candidate did not clear the admission margin");
                false
            }
        }
    }

    /// One tick: re-fetch history for every watched symbol, run pattern
    /// detection, and advance or invalidate its state. Spawned as a
    /// background task the same way `run_exit_monitor` is.
    pub async fn run_scan_loop(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(SCAN_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }

            let symbols: Vec<Symbol> = self.candidates.read().keys().cloned().collect();
            for symbol in symbols {
                self.scan_one(&symbol).await;
            }
        }
    }

    async fn scan_one(&self, symbol: &str) {
        let history = match self.collector.get_daily_series(symbol, HISTORY_DAYS).await {
            CollectorResult::Unavailable => return,
            r => r.into_value().expect("non-Unavailable CollectorResult always carries a value"),
        };
        let matches = self.detector.detect(&history);
        let now = Utc::now();

        let mut candidates = self.candidates.write();
        let Some(candidate) = candidates.get_mut(symbol) else { return };

        if matches.is_empty() {
            self.invalidate(candidate);
            candidate.updated_at = now;
            return;
        }

        let best = matches.iter().max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap()).unwrap();
        candidate.patterns = matches.iter().map(|m| m.name.clone()).collect();
        candidate.pattern_confidence = best.confidence;
        candidate.pattern_strength = best.strength;
        candidate.updated_at = now;

        if best.bullish {
            self.advance(candidate);
        } else {
            self.invalidate(candidate);
        }
    }

    /// Advances a watching/scanning candidate toward entry once its pattern
    /// is confirmed; idempotent once already at or past `BuyReady`.
    fn advance(&self, candidate: &mut CandleCandidate) {
        candidate.state = match candidate.state {
            CandleState::Scanning => CandleState::Watching,
            CandleState::Watching if candidate.pattern_confidence >= 0.6 => CandleState::BuyReady,
            other => other,
        };
    }

    /// Pattern invalidated: routes back to `Watching` from any pre-entry
    /// state, per §4.8's "invalidation routing back to WATCHING".
    /// `Entered`/`PendingOrder`/`SellReady` are untouched here — their exit
    /// is this manager's `try_enter`/`try_exit` job, not pattern scanning.
    fn invalidate(&self, candidate: &mut CandleCandidate) {
        if matches!(candidate.state, CandleState::Scanning | CandleState::Watching | CandleState::BuyReady) {
            candidate.state = CandleState::Watching;
        }
    }

    /// Attempts to enter a `BuyReady` candidate. On a successful fill moves
    /// it to `Entered`; on failure it stays `BuyReady` for the next tick to
    /// retry.
    pub async fn try_enter(&self, symbol: &str) -> bool {
        {
            let mut candidates = self.candidates.write();
            let Some(candidate) = candidates.get_mut(symbol) else { return false };
            if candidate.state != CandleState::BuyReady {
                return false;
            }
            candidate.state = CandleState::PendingOrder;
        }

        match self.executor.execute_buy(symbol, "candle_pattern", 1.0).await {
            Ok(filled) => {
                let mut candidates = self.candidates.write();
                if let Some(candidate) = candidates.get_mut(symbol) {
                    candidate.state = CandleState::Entered;
                    candidate.entry_price = Some(filled.price);
                    candidate.updated_at = Utc::now();
                }
                true
            }
            Err(e) => {
                warn!(symbol, error = %e, "candle entry failed, reverting to buy_ready");
                let mut candidates = self.candidates.write();
                if let Some(candidate) = candidates.get_mut(symbol) {
                    candidate.state = CandleState::BuyReady;
                }
                false
            }
        }
    }

    /// Exits an `Entered` candidate, marking it `Exited` on a successful
    /// sell fill (left `Entered` on failure so the next tick retries).
    pub async fn try_exit(&self, symbol: &str) -> bool {
        {
            let candidates = self.candidates.read();
            match candidates.get(symbol) {
                Some(c) if c.state == CandleState::Entered => {}
                _ => return false,
            }
        }
        self.candidates.write().get_mut(symbol).map(|c| c.state = CandleState::SellReady);

        match self.executor.execute_sell(symbol, "candle_pattern").await {
            Ok(_) => {
                if let Some(candidate) = self.candidates.write().get_mut(symbol) {
                    candidate.state = CandleState::Exited;
                    candidate.updated_at = Utc::now();
                }
                true
            }
            Err(e) => {
                warn!(symbol, error = %e, "candle exit failed, reverting to entered");
                if let Some(candidate) = self.candidates.write().get_mut(symbol) {
                    candidate.state = CandleState::Entered;
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerClient, MockBrokerClient};
    use crate::config::TradeExecutorConfig;
    use crate::execution::TradeExecutor;
    use crate::position::PositionManager;
    use crate::risk::RiskEngine;
    use crate::store::TradeStore;
    use crate::cache::Cache;
    use crate::stream::StreamClient;
    use chrono::Utc;
    use tokio::sync::mpsc;

    fn manager() -> (Arc<CandleTradeManager>, Arc<MockBrokerClient>) {
        let mock = Arc::new(MockBrokerClient::new());
        let broker: Arc<dyn BrokerClient> = mock.clone();
        let cache = Arc::new(Cache::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let stream = StreamClient::new("wss://example.invalid", tx);
        let collector = DataCollector::new(cache, broker.clone(), stream);
        let positions = Arc::new(PositionManager::new());
        let risk = Arc::new(RiskEngine::new(10_000_000.0, 0.03, 5, 0.05, 50));
        let store = Arc::new(TradeStore::open_memory().unwrap());
        let executor = TradeExecutor::new(broker, collector.clone(), positions, risk, store, TradeExecutorConfig::default());
        (CandleTradeManager::new(collector, executor), mock)
    }

    fn candidate(symbol: &str, confidence: f64, strength: f64, signal: f64, state: CandleState) -> CandleCandidate {
        CandleCandidate {
            symbol: symbol.to_string(),
            state,
            patterns: Vec::new(),
            pattern_confidence: confidence,
            pattern_strength: strength,
            signal_strength: signal,
            entry_price: None,
            stop_loss: None,
            take_profit: None,
            discovered_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn wall_clock_regime_picks_premarket_before_ten() {
        assert_eq!(wall_clock_regime(NaiveTime::from_hms_opt(8, 30, 0).unwrap()), Regime::Premarket);
    }

    #[test]
    fn wall_clock_regime_picks_realtime_midday() {
        assert_eq!(wall_clock_regime(NaiveTime::from_hms_opt(11, 0, 0).unwrap()), Regime::Realtime);
    }

    #[test]
    fn wall_clock_regime_falls_back_to_premarket_after_hours() {
        assert_eq!(wall_clock_regime(NaiveTime::from_hms_opt(20, 0, 0).unwrap()), Regime::Premarket);
    }

    #[test]
    fn admits_freely_under_capacity() {
        let (mgr, _broker) = manager();
        assert!(mgr.admit(candidate("005930", 0.5, 0.5, 0.5, CandleState::Scanning)));
        assert_eq!(mgr.watch_list().len(), 1);
    }

    #[test]
    fn weak_candidate_rejected_when_margin_not_cleared_at_capacity() {
        let (mgr, _broker) = manager();
        for i in 0..MAX_WATCH {
            let sym = format!("{i:06}");
            assert!(mgr.admit(candidate(&sym, 0.9, 0.9, 0.9, CandleState::Scanning)));
        }
        let newcomer = candidate("999999", 0.9, 0.9, 0.9, CandleState::Scanning);
        assert!(!mgr.admit(newcomer));
        assert_eq!(mgr.watch_list().len(), MAX_WATCH);
    }

    #[test]
    fn standout_candidate_evicts_the_weakest_incumbent() {
        let (mgr, _broker) = manager();
        for i in 0..MAX_WATCH {
            let sym = format!("{i:06}");
            assert!(mgr.admit(candidate(&sym, 0.1, 0.1, 0.1, CandleState::Scanning)));
        }
        let standout = candidate("999999", 1.0, 1.0, 1.0, CandleState::Entered);
        assert!(mgr.admit(standout));
        assert_eq!(mgr.watch_list().len(), MAX_WATCH);
        assert!(mgr.get("999999").is_some());
    }

    #[test]
    fn protected_states_are_never_the_eviction_target() {
        let entered = candidate("005930", 0.9, 0.9, 0.9, CandleState::Entered);
        assert!(entered.is_protected());
    }

    #[tokio::test]
    async fn try_enter_moves_buy_ready_to_entered_on_fill() {
        let (mgr, broker) = manager();
        broker.set_quote("005930", 10_000.0);
        mgr.admit(candidate("005930", 0.9, 0.9, 0.9, CandleState::BuyReady));
        assert!(mgr.try_enter("005930").await);
        assert_eq!(mgr.get("005930").unwrap().state, CandleState::Entered);
    }

    #[test]
    fn invalidate_routes_watching_back_to_watching_not_entered() {
        let (mgr, _broker) = manager();
        mgr.admit(candidate("005930", 0.9, 0.9, 0.9, CandleState::Entered));
        let mut candidates = mgr.candidates.write();
        let c = candidates.get_mut("005930").unwrap();
        mgr.invalidate(c);
        assert_eq!(c.state, CandleState::Entered);
    }
}
