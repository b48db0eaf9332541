// =============================================================================
// Engine Error Taxonomy
// =============================================================================
//
// Most of the engine returns `anyhow::Result` for leaf I/O, the same way the
// teacher's binance client does — callers don't need to branch on it. The
// Trade Executor and Scheduler *do* need to dispatch on error kind (§7's
// disposition table), so this enum exists at that boundary only.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("rate limited by broker")]
    RateLimited,

    #[error("market closed")]
    MarketClosed,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("broker rejected order: {0}")]
    BrokerRejected(String),

    #[error("stale data for {0}")]
    StaleData(String),

    #[error("store busy, retries exhausted")]
    StoreBusy,

    #[error("shutdown in progress")]
    Shutdown,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Whether this kind should be retried locally rather than surfaced.
    pub fn is_locally_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::Transport(_) | EngineError::RateLimited | EngineError::StoreBusy
        )
    }

    /// Whether callers should degrade (e.g. to polling) instead of failing.
    pub fn is_degrade_not_fail(&self) -> bool {
        matches!(self, EngineError::CapacityExceeded(_) | EngineError::StaleData(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
