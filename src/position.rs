// =============================================================================
// Position Manager — open/closed equity positions
// =============================================================================
//
// Adapted from `position_engine.rs`'s `PositionManager` (open/closed split,
// `RwLock<Vec<_>>`). The TP ladder / trailing-stop machinery in that file has
// no counterpart here — exits are the Candle Trade Manager's and the
// executor's sell path's job, not this struct's. `Position` itself reuses
// `types::Position` instead of a private row type.

use parking_lot::RwLock;
use tracing::info;

use crate::types::{Position, PositionSource};

pub struct PositionManager {
    open: RwLock<Vec<Position>>,
    closed: RwLock<Vec<Position>>,
}

impl PositionManager {
    pub fn new() -> Self {
        Self {
            open: RwLock::new(Vec::new()),
            closed: RwLock::new(Vec::new()),
        }
    }

    /// True if `symbol` already has an open position (the executor's buy-side
    /// "not already long" validation).
    pub fn has_open(&self, symbol: &str) -> bool {
        self.open.read().iter().any(|p| p.symbol == symbol)
    }

    pub fn get_open(&self, symbol: &str) -> Option<Position> {
        self.open.read().iter().find(|p| p.symbol == symbol).cloned()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.open.read().clone()
    }

    pub fn closed_positions(&self, count: usize) -> Vec<Position> {
        let closed = self.closed.read();
        closed.iter().rev().take(count).cloned().collect()
    }

    /// Opens a new position. `quantity` must be > 0 — the executor never
    /// calls this with a non-positive fill quantity.
    pub fn open_position(
        &self,
        symbol: &str,
        quantity: f64,
        avg_cost: f64,
        strategy: &str,
        source: PositionSource,
    ) {
        let pos = Position {
            symbol: symbol.to_string(),
            quantity,
            avg_cost,
            opened_at: chrono::Utc::now(),
            strategy: strategy.to_string(),
            source,
        };
        info!(symbol, quantity, avg_cost, strategy, "position opened");
        self.open.write().push(pos);
    }

    /// Reduces a position by `qty`. Fully closing (quantity reaches zero)
    /// archives it to the closed list; a partial reduction keeps it open
    /// with `quantity` decremented. Returns `false` if no open position for
    /// `symbol` exists.
    pub fn reduce_position(&self, symbol: &str, qty: f64) -> bool {
        let mut open = self.open.write();
        let Some(idx) = open.iter().position(|p| p.symbol == symbol) else {
            return false;
        };

        open[idx].quantity = (open[idx].quantity - qty).max(0.0);
        if open[idx].quantity <= 0.0 {
            let pos = open.remove(idx);
            info!(symbol, "position fully closed");
            self.closed.write().push(pos);
        } else {
            info!(symbol, remaining = open[idx].quantity, "position partially closed");
        }
        true
    }
}

impl Default for PositionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PositionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionManager")
            .field("open_positions", &self.open.read().len())
            .field("closed_positions", &self.closed.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_then_full_reduce_archives_position() {
        let mgr = PositionManager::new();
        mgr.open_position("005930", 10.0, 70000.0, "gap_trading", PositionSource::Bot);
        assert!(mgr.has_open("005930"));

        assert!(mgr.reduce_position("005930", 10.0));
        assert!(!mgr.has_open("005930"));
        assert_eq!(mgr.closed_positions(10).len(), 1);
    }

    #[test]
    fn partial_reduce_keeps_position_open() {
        let mgr = PositionManager::new();
        mgr.open_position("005930", 10.0, 70000.0, "gap_trading", PositionSource::Bot);
        assert!(mgr.reduce_position("005930", 4.0));
        assert_eq!(mgr.get_open("005930").unwrap().quantity, 6.0);
    }

    #[test]
    fn reduce_on_unknown_symbol_returns_false() {
        let mgr = PositionManager::new();
        assert!(!mgr.reduce_position("005930", 1.0));
    }
}
