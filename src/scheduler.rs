// =============================================================================
// Scheduler — time-slot strategy rotation, candidate activation, signal pipeline
// =============================================================================
//
// Grounded in `original_source/core/strategy_system/strategy_scheduler.py`'s
// `StrategyScheduler`: the `TIME_SLOTS` table (window boundaries and
// primary/secondary strategy weights, reproduced verbatim from spec.md §4.9),
// `_main_scheduling_loop`'s slot-change detection (cleanup previous slot then
// discover/activate the new one), `_extract_strategy_candidates`'s per-slot
// filter + weight + rank step, and the debounce rules of §4.9's signal
// pipeline. `check_external_orders`'s org_no-gated cancellation (Open
// Question #4) is reproduced as a reconciliation pass that only warns — the
// broker's day-order listing doesn't carry an `org_no`, so cancellation is
// never attempted from it, matching the resolution recorded in DESIGN.md.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::broker::{BrokerClient, Market, ScreenedSymbol};
use crate::collector::{CollectorResult, DataCollector};
use crate::discovery;
use crate::execution::TradeExecutor;
use crate::risk::RiskEngine;
use crate::signals::advanced::generate_advanced_signal;
use crate::store::TradeStore;
use crate::subscription::SubscriptionManager;
use crate::types::{Priority, SelectedStock, Symbol, TimeSlot};

const SLOT_CHECK_INTERVAL_SECS: u64 = 30;
const SIGNAL_SCAN_INTERVAL_SECS: u64 = 5;
const SIGNAL_HISTORY_DAYS: u32 = 90;

const DEBOUNCE_ANY_SIGNAL: Duration = Duration::from_secs(10);
const DEBOUNCE_SAME_STRATEGY: Duration = Duration::from_secs(30);
const DEBOUNCE_BUY_SIGNAL: Duration = Duration::from_secs(60);
const POST_BUY_COOLDOWN: Duration = Duration::from_secs(300);

/// The five trading-day windows and their strategy weight tables, reproduced
/// verbatim from spec.md §4.5's table (itself lifted from `TIME_SLOTS` in the
/// Python original).
pub fn time_slots() -> Vec<TimeSlot> {
    fn weights(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }
    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    vec![
        TimeSlot {
            name: "pre_market_early".to_string(),
            start: t(0, 0),
            end: t(8, 30),
            primary_strategies: weights(&[("gap_trading", 1.0), ("technical_screening", 0.8)]),
            secondary_strategies: weights(&[("volume_breakout", 0.6), ("momentum", 0.4)]),
            min_gap_rate: 1.0,
            min_technical_score: 50.0,
            min_volume_ratio: 1.2,
            max_candidates_per_strategy: 10,
        },
        TimeSlot {
            name: "pre_market".to_string(),
            start: t(8, 30),
            end: t(9, 0),
            primary_strategies: weights(&[("gap_trading", 2.0), ("technical_screening", 1.8)]),
            secondary_strategies: weights(&[("volume_breakout", 0.8), ("momentum", 0.6)]),
            min_gap_rate: 2.0,
            min_technical_score: 55.0,
            min_volume_ratio: 1.5,
            max_candidates_per_strategy: 10,
        },
        TimeSlot {
            name: "early_market".to_string(),
            start: t(9, 0),
            end: t(10, 30),
            primary_strategies: weights(&[("volume_breakout", 2.0), ("momentum", 1.8)]),
            secondary_strategies: weights(&[("gap_trading", 1.2), ("technical_screening", 1.0)]),
            min_gap_rate: 1.5,
            min_technical_score: 50.0,
            min_volume_ratio: 2.0,
            max_candidates_per_strategy: 10,
        },
        TimeSlot {
            name: "mid_market".to_string(),
            start: t(10, 30),
            end: t(14, 0),
            primary_strategies: weights(&[("technical_screening", 2.0), ("momentum", 1.5)]),
            secondary_strategies: weights(&[("volume_breakout", 1.2), ("gap_trading", 0.8)]),
            min_gap_rate: 1.0,
            min_technical_score: 55.0,
            min_volume_ratio: 1.5,
            max_candidates_per_strategy: 10,
        },
        TimeSlot {
            name: "late_market".to_string(),
            start: t(14, 0),
            end: t(15, 30),
            primary_strategies: weights(&[("momentum", 1.8), ("volume_breakout", 1.5)]),
            secondary_strategies: weights(&[("technical_screening", 1.2), ("gap_trading", 0.5)]),
            min_gap_rate: 1.0,
            min_technical_score: 50.0,
            min_volume_ratio: 1.5,
            max_candidates_per_strategy: 10,
        },
    ]
}

/// Which slot `now` falls in. Off-hours (after 15:30, or a gap in the table)
/// falls back to `pre_market_early`, mirroring the Python original's
/// off-hours fallback in `_get_first_time_slot`.
fn determine_slot<'a>(now: NaiveTime, slots: &'a [TimeSlot]) -> &'a TimeSlot {
    slots
        .iter()
        .find(|s| now >= s.start && now < s.end)
        .unwrap_or_else(|| slots.iter().find(|s| s.name == "pre_market_early").expect("pre_market_early always present"))
}

#[derive(Debug, Default, Clone)]
struct DebounceState {
    last_signal: Option<DateTime<Utc>>,
    last_signal_by_strategy: HashMap<String, DateTime<Utc>>,
    last_buy_signal: Option<DateTime<Utc>>,
    last_buy_fill: Option<DateTime<Utc>>,
}

impl DebounceState {
    fn should_emit(&self, strategy: &str, now: DateTime<Utc>) -> bool {
        if let Some(t) = self.last_signal {
            if now - t < chrono::Duration::from_std(DEBOUNCE_ANY_SIGNAL).unwrap() {
                return false;
            }
        }
        if let Some(t) = self.last_signal_by_strategy.get(strategy) {
            if now - *t < chrono::Duration::from_std(DEBOUNCE_SAME_STRATEGY).unwrap() {
                return false;
            }
        }
        if let Some(t) = self.last_buy_signal {
            if now - t < chrono::Duration::from_std(DEBOUNCE_BUY_SIGNAL).unwrap() {
                return false;
            }
        }
        if let Some(t) = self.last_buy_fill {
            if now - t < chrono::Duration::from_std(POST_BUY_COOLDOWN).unwrap() {
                return false;
            }
        }
        true
    }

    fn record_signal(&mut self, strategy: &str, now: DateTime<Utc>) {
        self.last_signal = Some(now);
        self.last_signal_by_strategy.insert(strategy.to_string(), now);
        self.last_buy_signal = Some(now);
    }

    fn record_buy_fill(&mut self, now: DateTime<Utc>) {
        self.last_buy_fill = Some(now);
    }
}

pub struct Scheduler {
    broker: Arc<dyn BrokerClient>,
    collector: Arc<DataCollector>,
    subscriptions: Arc<SubscriptionManager>,
    executor: Arc<TradeExecutor>,
    risk: Arc<RiskEngine>,
    store: Arc<TradeStore>,
    slots: Vec<TimeSlot>,
    current_slot: RwLock<Option<String>>,
    active: RwLock<Vec<(Symbol, String)>>,
    debounce: Mutex<HashMap<Symbol, DebounceState>>,
}

impl Scheduler {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        collector: Arc<DataCollector>,
        subscriptions: Arc<SubscriptionManager>,
        executor: Arc<TradeExecutor>,
        risk: Arc<RiskEngine>,
        store: Arc<TradeStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            broker,
            collector,
            subscriptions,
            executor,
            risk,
            store,
            slots: time_slots(),
            current_slot: RwLock::new(None),
            active: RwLock::new(Vec::new()),
            debounce: Mutex::new(HashMap::new()),
        })
    }

    /// The slot-change-detection loop: on every tick, check whether the wall
    /// clock has moved into a new slot; if so tear down the previous slot's
    /// subscriptions and run discovery for the new one.
    pub async fn run_slot_loop(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            let slot = determine_slot(Utc::now().time(), &self.slots).clone();
            let changed = self.current_slot.read().as_deref() != Some(slot.name.as_str());
            if changed {
                info!(slot = %slot.name, "entering time slot");
                self.teardown_previous_slot().await;
                if let Err(e) = self.run_discovery(&slot).await {
                    warn!(slot = %slot.name, error = %e, "discovery failed for slot");
                }
                *self.current_slot.write() = Some(slot.name.clone());
            }

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(SLOT_CHECK_INTERVAL_SECS)) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        self.shutdown().await;
                        return;
                    }
                }
            }
        }
    }

    /// Clears the cached slot name so the next `run_slot_loop` tick treats
    /// the current slot as freshly entered and re-runs discovery, without
    /// waiting for an actual slot boundary. Used by the control API's
    /// `refresh` endpoint.
    pub fn force_rediscovery(&self) {
        *self.current_slot.write() = None;
    }

    async fn teardown_previous_slot(&self) {
        let previous: Vec<(Symbol, String)> = self.active.write().drain(..).collect();
        for (symbol, _) in previous {
            self.subscriptions.remove_stock(&symbol).await;
        }
    }

    /// One `screen_market` call, fanned out per primary/secondary strategy in
    /// `slot`: filter by the slot's thresholds, weight, rank, persist as
    /// `SelectedStock` rows, and activate a subscription for each survivor.
    async fn run_discovery(&self, slot: &TimeSlot) -> anyhow::Result<()> {
        let screened = self.broker.screen_market(Market::All).await?;
        let date = Utc::now().date_naive();
        let mut new_active = Vec::new();

        let all_strategies = slot
            .primary_strategies
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .chain(slot.secondary_strategies.iter().map(|(k, v)| (k.clone(), *v)));

        for (strategy, weight) in all_strategies {
            let bucket: &[ScreenedSymbol] = match strategy.as_str() {
                "gap_trading" => &screened.gap,
                "volume_breakout" => &screened.volume,
                "momentum" => &screened.momentum,
                _ => &screened.technical,
            };

            let mut candidates = discovery::discover_strategy_stocks(&strategy, bucket);
            candidates.retain(|c| passes_time_based_filter(slot, &strategy, c));
            for c in &mut candidates {
                c.score *= weight;
            }
            candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            candidates.truncate(slot.max_candidates_per_strategy);

            let base_priority = if strategy == "gap_trading" { Priority::Critical } else { Priority::High };

            for (idx, candidate) in candidates.iter().enumerate() {
                let rank_in_strategy = idx + 1;
                let priority = if rank_in_strategy <= 5 {
                    base_priority
                } else if rank_in_strategy <= 10 {
                    base_priority.degrade(1)
                } else {
                    base_priority.degrade(2)
                };

                let activated_ok = self.subscriptions.add_stock_request(&candidate.symbol, priority, &strategy).await;

                let row = SelectedStock {
                    id: uuid::Uuid::new_v4().to_string(),
                    date,
                    slot: slot.name.clone(),
                    rank_in_strategy,
                    symbol: candidate.symbol.clone(),
                    strategy: strategy.clone(),
                    score: candidate.score,
                    reason: candidate.reason.clone(),
                    activated: true,
                    activated_ok,
                    traded: false,
                    trade_id: None,
                };
                if let Err(e) = self.store.insert_selected_stock(&row) {
                    warn!(symbol = %candidate.symbol, error = %e, "failed to persist selected stock");
                }
                new_active.push((candidate.symbol.clone(), strategy.clone()));
            }
        }

        debug!(slot = %slot.name, activated = new_active.len(), "slot discovery complete");
        *self.active.write() = new_active;
        Ok(())
    }

    /// Periodic per-candidate signal scan: fetch a current price and daily
    /// history, run the advanced signal generator, debounce, gate on the
    /// risk engine's circuit breakers, and forward surviving BUY signals to
    /// the Trade Executor.
    pub async fn run_signal_loop(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(SIGNAL_SCAN_INTERVAL_SECS)) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }

            let active: Vec<(Symbol, String)> = self.active.read().clone();
            for (symbol, strategy) in active {
                self.scan_one(&symbol, &strategy).await;
            }
        }
    }

    async fn scan_one(&self, symbol: &str, strategy: &str) {
        let (can_trade, reason) = self.risk.can_trade();
        if !can_trade {
            debug!(symbol, reason, "risk engine blocked signal scan");
            return;
        }

        let price = match self.collector.get_current_price(symbol).await {
            CollectorResult::Unavailable => return,
            r => r.into_value().expect("non-Unavailable CollectorResult always carries a value"),
        };
        let history = match self.collector.get_daily_series(symbol, SIGNAL_HISTORY_DAYS).await {
            CollectorResult::Unavailable => return,
            r => r.into_value().expect("non-Unavailable CollectorResult always carries a value"),
        };

        let Some(signal) = generate_advanced_signal(strategy, symbol, price.price, price.volume, &history, self.risk.capital())
        else {
            return;
        };

        let now = Utc::now();
        let emit = {
            let mut debounce = self.debounce.lock();
            let state = debounce.entry(symbol.to_string()).or_default();
            if !state.should_emit(strategy, now) {
                false
            } else {
                state.record_signal(strategy, now);
                true
            }
        };
        if !emit {
            debug!(symbol, strategy, "signal debounced");
            return;
        }

        info!(symbol, strategy, strength = signal.strength, confidence = signal.confidence, "forwarding buy signal");
        match self.executor.execute_buy(symbol, strategy, signal.strength).await {
            Ok(filled) => {
                self.debounce.lock().entry(symbol.to_string()).or_default().record_buy_fill(now);
                info!(symbol, trade_id = filled.trade_id, qty = filled.quantity, price = filled.price, "signal filled");
            }
            Err(e) => {
                warn!(symbol, strategy, error = %e, "signal forwarded but execution failed");
            }
        }
    }

    /// Conservative reconciliation pass: lists the broker's open day orders
    /// and warns on anything still outstanding. `DayOrder` carries no
    /// `org_no`, so — unlike `cancel_order`'s contract — nothing here ever
    /// attempts a cancellation; that decision is recorded as an Open Question
    /// resolution rather than worked around with a guessed identifier.
    pub async fn reconcile_external_orders(&self) -> anyhow::Result<()> {
        let orders = self.broker.list_day_orders().await?;
        for order in orders.iter().filter(|o| !o.cancelled && o.remaining_qty > 0.0) {
            warn!(
                symbol = %order.symbol,
                broker_order_id = %order.broker_order_id,
                remaining_qty = order.remaining_qty,
                "order still open but org_no unavailable from day-order listing, skipping cancellation"
            );
        }
        Ok(())
    }

    async fn shutdown(&self) {
        info!("scheduler shutting down, tearing down active subscriptions");
        self.teardown_previous_slot().await;
        self.store.close_cleanly();
    }
}

/// Strategy-specific threshold check against the slot's filter table, per
/// `_passes_time_based_filter`: gap trading reads the change-rate payload
/// field, volume breakout reads the volume-ratio proxy score, everything
/// else (including momentum) reads the technical-score payload field.
fn passes_time_based_filter(slot: &TimeSlot, strategy: &str, candidate: &crate::types::Candidate) -> bool {
    match strategy {
        "gap_trading" => candidate
            .payload
            .get("change_rate")
            .and_then(|v| v.as_f64())
            .map(|v| v >= slot.min_gap_rate)
            .unwrap_or(false),
        "volume_breakout" => candidate.score >= slot.min_volume_ratio,
        _ => candidate
            .payload
            .get("technical_score")
            .and_then(|v| v.as_f64())
            .map(|v| v >= slot.min_technical_score)
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_five_slots_are_contiguous_and_named() {
        let slots = time_slots();
        assert_eq!(slots.len(), 5);
        let names: Vec<&str> = slots.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["pre_market_early", "pre_market", "early_market", "mid_market", "late_market"]
        );
    }

    #[test]
    fn determine_slot_finds_early_market_at_0945() {
        let slots = time_slots();
        let slot = determine_slot(NaiveTime::from_hms_opt(9, 45, 0).unwrap(), &slots);
        assert_eq!(slot.name, "early_market");
    }

    #[test]
    fn determine_slot_falls_back_to_pre_market_early_after_hours() {
        let slots = time_slots();
        let slot = determine_slot(NaiveTime::from_hms_opt(20, 0, 0).unwrap(), &slots);
        assert_eq!(slot.name, "pre_market_early");
    }

    #[test]
    fn gap_trading_filter_reads_change_rate_payload() {
        let slots = time_slots();
        let slot = &slots[1]; // pre_market, min_gap_rate = 2.0
        let candidate = crate::types::Candidate {
            symbol: "005930".to_string(),
            strategy: "gap_trading".to_string(),
            score: 5.0,
            reason: "gap".to_string(),
            discovered_at: chrono::Utc::now(),
            payload: serde_json::json!({ "change_rate": 1.0, "volume": 0, "technical_score": 0.0 }),
        };
        assert!(!passes_time_based_filter(slot, "gap_trading", &candidate));
    }

    #[test]
    fn debounce_rejects_second_buy_within_sixty_seconds() {
        let mut state = DebounceState::default();
        let t0 = Utc::now();
        assert!(state.should_emit("momentum", t0));
        state.record_signal("momentum", t0);

        let t1 = t0 + chrono::Duration::seconds(45);
        assert!(!state.should_emit("momentum", t1));
    }

    #[test]
    fn debounce_still_blocked_by_post_buy_cooldown_after_sixty_seconds() {
        let mut state = DebounceState::default();
        let t0 = Utc::now();
        state.record_signal("momentum", t0);
        state.record_buy_fill(t0);

        let t1 = t0 + chrono::Duration::seconds(61);
        assert!(!state.should_emit("gap_trading", t1));
    }

    #[test]
    fn debounce_clears_after_all_windows_elapse() {
        let mut state = DebounceState::default();
        let t0 = Utc::now();
        state.record_signal("momentum", t0);

        let t1 = t0 + chrono::Duration::seconds(301);
        assert!(state.should_emit("gap_trading", t1));
    }
}
