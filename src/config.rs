// =============================================================================
// Engine Configuration — immutable-after-boot settings with atomic save
// =============================================================================
//
// `EngineConfig` holds everything SPEC_FULL §6 calls process-wide and
// loaded-once: brokerage credentials, account number, demo flag, log level,
// trading mode/style, day-mode forced-exit time, plus the per-strategy
// executor tables. Persistence keeps the teacher's atomic tmp+rename
// pattern. Mutable operator toggles (pause/resume/kill) do NOT live here —
// they live in `EngineState`, mirroring how the teacher splits `RuntimeConfig`
// (mutable) from constants it never changes at runtime; here the split runs
// the other way because this spec treats config as immutable post-boot.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{AccountMode, TradingStyle};

fn default_account_no() -> String {
    "00000000-01".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_forced_exit_time() -> chrono::NaiveTime {
    chrono::NaiveTime::from_hms_opt(15, 20, 0).unwrap()
}

fn default_store_path() -> String {
    "aurora_equities.db".to_string()
}

fn default_operator_token() -> String {
    "change-me".to_string()
}

fn default_stream_cap() -> usize {
    41
}

fn default_max_realtime() -> usize {
    20
}

fn default_polling_interval_secs() -> u64 {
    15
}

fn default_rest_sleep_ms_min() -> u64 {
    50
}

fn default_rest_sleep_ms_max() -> u64 {
    100
}

/// Per-strategy sizing/pricing tables, lifted from the Python original's
/// `TradeConfig` defaults (`core/trade_executor.py`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeExecutorConfig {
    #[serde(default = "default_base_position_ratio")]
    pub base_position_ratio: f64,
    #[serde(default = "default_max_position_ratio")]
    pub max_position_ratio: f64,
    #[serde(default = "default_max_investment_amount")]
    pub max_investment_amount: f64,
    #[serde(default = "default_min_investment_amount")]
    pub min_investment_amount: f64,
    #[serde(default = "default_strategy_multipliers")]
    pub strategy_multipliers: std::collections::HashMap<String, f64>,
    #[serde(default = "default_buy_premiums")]
    pub buy_premiums: std::collections::HashMap<String, f64>,
    #[serde(default = "default_sell_discounts")]
    pub sell_discounts: std::collections::HashMap<String, f64>,
    #[serde(default = "default_auto_sell_discount")]
    pub auto_sell_discount: f64,
}

fn default_base_position_ratio() -> f64 {
    0.08
}
fn default_max_position_ratio() -> f64 {
    0.12
}
fn default_max_investment_amount() -> f64 {
    500_000.0
}
fn default_min_investment_amount() -> f64 {
    50_000.0
}
fn default_auto_sell_discount() -> f64 {
    0.008
}

fn default_strategy_multipliers() -> std::collections::HashMap<String, f64> {
    [
        ("gap_trading", 0.7),
        ("volume_breakout", 0.9),
        ("momentum", 1.2),
        ("existing_holding", 0.5),
        ("default", 1.0),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn default_buy_premiums() -> std::collections::HashMap<String, f64> {
    [
        ("gap_trading", 0.003),
        ("volume_breakout", 0.005),
        ("momentum", 0.007),
        ("existing_holding", 0.002),
        ("default", 0.003),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn default_sell_discounts() -> std::collections::HashMap<String, f64> {
    [
        ("gap_trading", 0.005),
        ("volume_breakout", 0.006),
        ("momentum", 0.004),
        ("default", 0.005),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

impl Default for TradeExecutorConfig {
    fn default() -> Self {
        Self {
            base_position_ratio: default_base_position_ratio(),
            max_position_ratio: default_max_position_ratio(),
            max_investment_amount: default_max_investment_amount(),
            min_investment_amount: default_min_investment_amount(),
            strategy_multipliers: default_strategy_multipliers(),
            buy_premiums: default_buy_premiums(),
            sell_discounts: default_sell_discounts(),
            auto_sell_discount: default_auto_sell_discount(),
        }
    }
}

impl TradeExecutorConfig {
    pub fn multiplier(&self, strategy: &str) -> f64 {
        self.strategy_multipliers
            .get(strategy)
            .copied()
            .unwrap_or_else(|| self.strategy_multipliers["default"])
    }

    pub fn buy_premium(&self, strategy: &str) -> f64 {
        self.buy_premiums
            .get(strategy)
            .copied()
            .unwrap_or_else(|| self.buy_premiums["default"])
    }

    pub fn sell_discount(&self, strategy: &str) -> f64 {
        self.sell_discounts
            .get(strategy)
            .copied()
            .unwrap_or_else(|| self.sell_discounts["default"])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_account_no")]
    pub account_no: String,

    #[serde(default)]
    pub account_mode: AccountMode,

    #[serde(default)]
    pub trading_style: TradingStyle,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_forced_exit_time")]
    pub day_mode_forced_exit_time: chrono::NaiveTime,

    #[serde(default = "default_store_path")]
    pub store_path: String,

    #[serde(default = "default_operator_token")]
    pub operator_token: String,

    #[serde(default = "default_stream_cap")]
    pub stream_cap: usize,

    #[serde(default = "default_max_realtime")]
    pub max_realtime: usize,

    #[serde(default = "default_polling_interval_secs")]
    pub polling_interval_secs: u64,

    #[serde(default = "default_rest_sleep_ms_min")]
    pub rest_sleep_ms_min: u64,

    #[serde(default = "default_rest_sleep_ms_max")]
    pub rest_sleep_ms_max: u64,

    #[serde(default)]
    pub trade_executor: TradeExecutorConfig,

    /// App key / secret are read from environment variables at startup
    /// (`AURORA_APP_KEY` / `AURORA_APP_SECRET`), never persisted to disk.
    #[serde(skip)]
    pub app_key: String,
    #[serde(skip)]
    pub app_secret: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            account_no: default_account_no(),
            account_mode: AccountMode::default(),
            trading_style: TradingStyle::default(),
            log_level: default_log_level(),
            day_mode_forced_exit_time: default_forced_exit_time(),
            store_path: default_store_path(),
            operator_token: default_operator_token(),
            stream_cap: default_stream_cap(),
            max_realtime: default_max_realtime(),
            polling_interval_secs: default_polling_interval_secs(),
            rest_sleep_ms_min: default_rest_sleep_ms_min(),
            rest_sleep_ms_max: default_rest_sleep_ms_max(),
            trade_executor: TradeExecutorConfig::default(),
            app_key: String::new(),
            app_secret: String::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`, then overlay secrets
    /// from the environment. Returns an error if the file does not exist so
    /// callers can decide whether to fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        config.app_key = std::env::var("AURORA_APP_KEY").unwrap_or_default();
        config.app_secret = std::env::var("AURORA_APP_SECRET").unwrap_or_default();

        info!(
            path = %path.display(),
            account_mode = %config.account_mode,
            store_path = %config.store_path,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration (minus secrets, which are
    /// `#[serde(skip)]`) using an atomic write: write to `.tmp`, then rename.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise engine config")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_trade_executor_python_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.trade_executor.multiplier("momentum"), 1.2);
        assert_eq!(cfg.trade_executor.buy_premium("gap_trading"), 0.003);
        assert_eq!(cfg.trade_executor.sell_discount("volume_breakout"), 0.006);
        assert_eq!(cfg.trade_executor.multiplier("unknown_strategy"), 1.0);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.stream_cap, 41);
        assert_eq!(cfg.max_realtime, 20);
        assert_eq!(cfg.polling_interval_secs, 15);
    }

    #[test]
    fn roundtrip_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let cfg = EngineConfig::default();
        cfg.save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let reloaded: EngineConfig = serde_json::from_str(&content).unwrap();
        assert_eq!(reloaded.stream_cap, cfg.stream_cap);
        assert_eq!(reloaded.store_path, cfg.store_path);
    }
}
