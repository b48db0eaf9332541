// =============================================================================
// Cache — per-symbol last-known quote / orderbook / daily series
// =============================================================================
//
// One `RwLock`-guarded `HashMap` per namespace, the same shape as the
// teacher's `OrderBookManager`/`CandleBuffer` (one lock per data kind rather
// than one giant lock over everything), satisfying §5's "Cache is
// independently synchronized per namespace" requirement.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::types::{DailyBar, Orderbook, Quote, Source, Symbol};

const STREAM_FRESH: Duration = Duration::from_secs(5);
const STREAM_USABLE: Duration = Duration::from_secs(30);
const REST_FRESH: Duration = Duration::from_secs(30);
const ANTI_OVERWRITE_WINDOW: Duration = Duration::from_secs(5 * 60);

struct Entry<T> {
    value: T,
    source: Source,
    stored_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Usable,
    Stale,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub quotes: usize,
    pub orderbooks: usize,
    pub daily_keys: usize,
}

pub struct Cache {
    quotes: RwLock<HashMap<Symbol, Entry<Quote>>>,
    orderbooks: RwLock<HashMap<Symbol, Entry<Orderbook>>>,
    daily: RwLock<HashMap<Symbol, Entry<Vec<DailyBar>>>>,
}

impl Cache {
    pub fn new() -> Self {
        Self {
            quotes: RwLock::new(HashMap::new()),
            orderbooks: RwLock::new(HashMap::new()),
            daily: RwLock::new(HashMap::new()),
        }
    }

    /// Write a quote, honoring the anti-overwrite rule: a REST-origin write
    /// must not replace a stream-origin entry younger than 5 minutes.
    pub fn put_quote(&self, quote: Quote) {
        let mut map = self.quotes.write();
        if quote.source == Source::Rest {
            if let Some(existing) = map.get(&quote.symbol) {
                if existing.source == Source::Stream && existing.stored_at.elapsed() < ANTI_OVERWRITE_WINDOW {
                    return;
                }
            }
        }
        let symbol = quote.symbol.clone();
        let source = quote.source;
        map.insert(
            symbol,
            Entry {
                value: quote,
                source,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn get_quote(&self, symbol: &str) -> Option<Quote> {
        self.quotes.read().get(symbol).map(|e| e.value.clone())
    }

    /// Freshness classification per §4.1, distinguishing stream vs REST
    /// origin windows.
    pub fn quote_freshness(&self, symbol: &str) -> Option<Freshness> {
        let map = self.quotes.read();
        let entry = map.get(symbol)?;
        let age = entry.stored_at.elapsed();
        let fresh_window = match entry.source {
            Source::Stream => STREAM_FRESH,
            Source::Rest | Source::Cache => REST_FRESH,
        };
        if age < fresh_window {
            Some(Freshness::Fresh)
        } else if entry.source == Source::Stream && age < STREAM_USABLE {
            Some(Freshness::Usable)
        } else {
            Some(Freshness::Stale)
        }
    }

    pub fn quote_source(&self, symbol: &str) -> Option<Source> {
        self.quotes.read().get(symbol).map(|e| e.source)
    }

    pub fn put_orderbook(&self, book: Orderbook) {
        let mut map = self.orderbooks.write();
        let symbol = book.symbol.clone();
        map.insert(
            symbol,
            Entry {
                value: book,
                source: Source::Stream,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn get_orderbook(&self, symbol: &str) -> Option<Orderbook> {
        self.orderbooks.read().get(symbol).map(|e| e.value.clone())
    }

    pub fn put_daily(&self, symbol: &str, rows: Vec<DailyBar>) {
        self.daily.write().insert(
            symbol.to_string(),
            Entry {
                value: rows,
                source: Source::Rest,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn get_daily(&self, symbol: &str) -> Option<Vec<DailyBar>> {
        self.daily.read().get(symbol).map(|e| e.value.clone())
    }

    pub fn clear(&self) {
        self.quotes.write().clear();
        self.orderbooks.write().clear();
        self.daily.write().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            quotes: self.quotes.read().len(),
            orderbooks: self.orderbooks.read().len(),
            daily_keys: self.daily.read().len(),
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn quote(symbol: &str, source: Source) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            price: 100.0,
            change_rate: 0.0,
            volume: 1000,
            timestamp: Utc::now(),
            source,
        }
    }

    #[test]
    fn stream_quote_is_fresh_immediately() {
        let cache = Cache::new();
        cache.put_quote(quote("000660", Source::Stream));
        assert_eq!(cache.quote_freshness("000660"), Some(Freshness::Fresh));
    }

    #[test]
    fn rest_write_does_not_clobber_recent_stream_entry() {
        let cache = Cache::new();
        cache.put_quote(quote("005930", Source::Stream));
        let mut rest_quote = quote("005930", Source::Rest);
        rest_quote.price = 999.0;
        cache.put_quote(rest_quote);

        let stored = cache.get_quote("005930").unwrap();
        assert_eq!(stored.source, Source::Stream);
        assert_eq!(stored.price, 100.0);
    }

    #[test]
    fn missing_symbol_returns_none() {
        let cache = Cache::new();
        assert!(cache.get_quote("000000").is_none());
        assert!(cache.quote_freshness("000000").is_none());
    }

    #[test]
    fn clear_empties_all_namespaces() {
        let cache = Cache::new();
        cache.put_quote(quote("000001", Source::Stream));
        cache.clear();
        assert_eq!(cache.stats().quotes, 0);
    }
}
