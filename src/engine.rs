// =============================================================================
// Engine — composition root, wiring every subsystem together
// =============================================================================
//
// Adapted from `app_state::AppState`: one struct owning `Arc` handles to
// every subsystem plus version counters and ring-buffered audit logs, built
// once in `main.rs` and shared via `Arc<Engine>`. The split this spec adds
// over the teacher's single struct is `EngineConfig` (immutable, loaded once)
// versus `EngineState` (mutable operator toggles — pause/resume/kill),
// mirroring how the teacher keeps `RuntimeConfig` separate from state that
// genuinely never changes after boot, just with the mutability direction
// reversed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::broker::{BrokerClient, HttpBrokerClient, MockBrokerClient};
use crate::cache::Cache;
use crate::collector::DataCollector;
use crate::config::EngineConfig;
use crate::execution::TradeExecutor;
use crate::position::PositionManager;
use crate::risk::RiskEngine;
use crate::scheduler::Scheduler;
use crate::store::TradeStore;
use crate::stream::StreamClient;
use crate::subscription::SubscriptionManager;
use crate::types::AccountMode;

const MAX_RECENT_ERRORS: usize = 100;
const MAX_RECENT_DECISIONS: usize = 200;
const STARTING_CAPITAL: f64 = 10_000_000.0;

/// A recorded error event for the dashboard error log, same shape as the
/// teacher's `app_state::ErrorRecord`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub code: Option<String>,
    pub at: chrono::DateTime<chrono::Utc>,
}

/// A recorded trade/signal decision for the audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    pub symbol: String,
    pub strategy: String,
    pub outcome: String,
    pub at: chrono::DateTime<chrono::Utc>,
}

/// Mutable operator-controlled flags. Kept separate from `EngineConfig`
/// because these flip at runtime via the control API, while config is
/// loaded once at boot and otherwise immutable.
pub struct EngineState {
    pub paused: RwLock<bool>,
    pub killed: RwLock<bool>,
}

impl EngineState {
    fn new() -> Self {
        Self {
            paused: RwLock::new(true),
            killed: RwLock::new(false),
        }
    }
}

/// Snapshot of the engine for the `/api/v1/state` endpoint.
#[derive(Debug, Serialize)]
pub struct EngineSnapshot {
    pub state_version: u64,
    pub paused: bool,
    pub killed: bool,
    pub account_mode: AccountMode,
    pub risk: crate::risk::RiskState,
    pub recent_errors: Vec<ErrorRecord>,
    pub recent_decisions: Vec<DecisionRecord>,
    pub subscription_stats: crate::subscription::SubscriptionStats,
}

pub struct Engine {
    pub config: EngineConfig,
    pub state: EngineState,

    pub store: Arc<TradeStore>,
    pub broker: Arc<dyn BrokerClient>,
    pub cache: Arc<Cache>,
    pub stream: Arc<StreamClient>,
    pub collector: Arc<DataCollector>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub positions: Arc<PositionManager>,
    pub risk: Arc<RiskEngine>,
    pub executor: Arc<TradeExecutor>,
    pub scheduler: Arc<Scheduler>,

    state_version: AtomicU64,
    recent_errors: RwLock<VecDeque<ErrorRecord>>,
    recent_decisions: RwLock<VecDeque<DecisionRecord>>,
}

impl Engine {
    /// Wires every subsystem from a loaded `EngineConfig`. The broker
    /// implementation is chosen by account mode: `Demo` gets the in-memory
    /// mock, `Live`/`Paper` get the real HTTP client, matching the teacher's
    /// `AccountMode`-gated client selection in `main.rs`.
    pub fn new(config: EngineConfig) -> anyhow::Result<Arc<Self>> {
        let store = Arc::new(if config.store_path == ":memory:" {
            TradeStore::open_memory()?
        } else {
            TradeStore::open(&config.store_path)?
        });

        let broker: Arc<dyn BrokerClient> = match config.account_mode {
            AccountMode::Demo => Arc::new(MockBrokerClient::new()),
            _ => Arc::new(HttpBrokerClient::new(
                config.app_key.clone(),
                config.app_secret.clone(),
                config.account_no.clone(),
            )),
        };

        let cache = Arc::new(Cache::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let stream = StreamClient::new("wss://openapi.koreainvestment.com:9443", events_tx);
        let collector = DataCollector::new(cache.clone(), broker.clone(), stream.clone());
        tokio::spawn(collector.clone().run_event_loop(events_rx));

        let subscriptions = SubscriptionManager::new(collector.clone(), config.polling_interval_secs);
        let positions = Arc::new(PositionManager::new());
        let risk = Arc::new(RiskEngine::new(
            STARTING_CAPITAL,
            0.03,
            5,
            0.05,
            50,
        ));
        let executor = TradeExecutor::new(
            broker.clone(),
            collector.clone(),
            positions.clone(),
            risk.clone(),
            store.clone(),
            config.trade_executor.clone(),
        );
        let scheduler = Scheduler::new(
            broker.clone(),
            collector.clone(),
            subscriptions.clone(),
            executor.clone(),
            risk.clone(),
            store.clone(),
        );

        Ok(Arc::new(Self {
            config,
            state: EngineState::new(),
            store,
            broker,
            cache,
            stream,
            collector,
            subscriptions,
            positions,
            risk,
            executor,
            scheduler,
            state_version: AtomicU64::new(1),
            recent_errors: RwLock::new(VecDeque::with_capacity(MAX_RECENT_ERRORS)),
            recent_decisions: RwLock::new(VecDeque::with_capacity(MAX_RECENT_DECISIONS)),
        }))
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::Relaxed)
    }

    pub fn bump_version(&self) {
        self.state_version.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, message: impl Into<String>, code: Option<String>) {
        let mut errors = self.recent_errors.write();
        if errors.len() >= MAX_RECENT_ERRORS {
            errors.pop_front();
        }
        errors.push_back(ErrorRecord {
            message: message.into(),
            code,
            at: chrono::Utc::now(),
        });
        self.bump_version();
    }

    pub fn record_decision(&self, symbol: impl Into<String>, strategy: impl Into<String>, outcome: impl Into<String>) {
        let mut decisions = self.recent_decisions.write();
        if decisions.len() >= MAX_RECENT_DECISIONS {
            decisions.pop_front();
        }
        decisions.push_back(DecisionRecord {
            symbol: symbol.into(),
            strategy: strategy.into(),
            outcome: outcome.into(),
            at: chrono::Utc::now(),
        });
        self.bump_version();
    }

    pub fn is_paused(&self) -> bool {
        *self.state.paused.read()
    }

    pub fn is_killed(&self) -> bool {
        *self.state.killed.read()
    }

    pub fn pause(&self) {
        *self.state.paused.write() = true;
        self.bump_version();
    }

    pub fn resume(&self) {
        if !self.is_killed() {
            *self.state.paused.write() = false;
            self.bump_version();
        }
    }

    pub fn kill(&self) {
        *self.state.killed.write() = true;
        *self.state.paused.write() = true;
        self.risk.kill();
        self.bump_version();
    }

    pub fn build_snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            state_version: self.current_state_version(),
            paused: self.is_paused(),
            killed: self.is_killed(),
            account_mode: self.config.account_mode,
            risk: self.risk.get_state(),
            recent_errors: self.recent_errors.read().iter().cloned().collect(),
            recent_decisions: self.recent_decisions.read().iter().cloned().collect(),
            subscription_stats: self.subscriptions.stats(),
        }
    }

    /// Flushes the store and clears the pid sentinel. Called from the
    /// Ctrl+C handler in `main.rs`.
    pub async fn shutdown(&self) {
        self.scheduler.reconcile_external_orders().await.ok();
        self.store.close_cleanly();
    }
}
