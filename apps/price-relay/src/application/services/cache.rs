//! Last Quote Cache
//!
//! Holds the most recent quote in memory and writes it through to a
//! [`QuoteStore`] on every update. The in-memory value is authoritative:
//! a failed write is logged and counted, never rolled back.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::application::ports::QuoteStore;
use crate::domain::quote::{Quote, SessionStats};
use crate::infrastructure::metrics;

/// In-memory last quote with write-through persistence.
pub struct LastQuoteCache {
    current: RwLock<Option<Quote>>,
    stats: RwLock<Option<SessionStats>>,
    store: Arc<dyn QuoteStore>,
}

impl LastQuoteCache {
    /// Create an empty cache backed by `store`.
    #[must_use]
    pub fn new(store: Arc<dyn QuoteStore>) -> Self {
        Self {
            current: RwLock::new(None),
            stats: RwLock::new(None),
            store,
        }
    }

    /// Current quote, if any.
    #[must_use]
    pub fn get(&self) -> Option<Quote> {
        self.current.read().clone()
    }

    /// Session extrema, known only once a quote has been set during this run.
    #[must_use]
    pub fn session_stats(&self) -> Option<SessionStats> {
        *self.stats.read()
    }

    /// Replace the current quote and persist it.
    pub fn set(&self, quote: Quote) {
        *self.stats.write() = Some(quote.session_stats());

        if let Err(e) = self.store.save(&quote) {
            metrics::record_persistence_failure("save");
            tracing::warn!(error = %e, "Failed to persist last quote");
        }

        *self.current.write() = Some(quote);
    }

    /// Load the persisted quote into memory.
    ///
    /// A missing, unreadable or corrupt record leaves the cache empty.
    /// Session extrema stay unknown either way.
    pub fn restore(&self) -> Option<Quote> {
        match self.store.load() {
            Ok(Some(quote)) => {
                tracing::info!(
                    bid = %quote.bid,
                    ask = %quote.ask,
                    updated = %quote.updated,
                    "Restored last quote"
                );
                *self.current.write() = Some(quote.clone());
                Some(quote)
            }
            Ok(None) => {
                tracing::info!("No stored quote to restore");
                None
            }
            Err(e) => {
                metrics::record_persistence_failure("load");
                tracing::warn!(error = %e, "Ignoring unreadable stored quote");
                None
            }
        }
    }
}

impl std::fmt::Debug for LastQuoteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LastQuoteCache")
            .field("current", &*self.current.read())
            .field("stats", &*self.stats.read())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::application::ports::PersistenceError;

    #[derive(Default)]
    struct MemoryStore {
        saved: Mutex<Option<Quote>>,
        fail_saves: bool,
        corrupt: bool,
    }

    impl QuoteStore for MemoryStore {
        fn load(&self) -> Result<Option<Quote>, PersistenceError> {
            if self.corrupt {
                return serde_json::from_str::<Quote>("{").map(Some).map_err(Into::into);
            }
            Ok(self.saved.lock().clone())
        }

        fn save(&self, quote: &Quote) -> Result<(), PersistenceError> {
            if self.fail_saves {
                return Err(std::io::Error::other("disk full").into());
            }
            *self.saved.lock() = Some(quote.clone());
            Ok(())
        }
    }

    fn quote(bid: rust_decimal::Decimal) -> Quote {
        Quote {
            symbol: None,
            bid,
            ask: bid + dec!(1.00),
            high: bid + dec!(1.00),
            low: bid,
            unit: "USD/oz".to_string(),
            updated: Utc::now(),
            time: None,
            time_msc: None,
            volume: None,
        }
    }

    #[test]
    fn set_updates_memory_and_store() {
        let store = Arc::new(MemoryStore::default());
        let cache = LastQuoteCache::new(store.clone());

        cache.set(quote(dec!(2350.00)));

        assert_eq!(cache.get().unwrap().bid, dec!(2350.00));
        assert_eq!(store.saved.lock().as_ref().unwrap().bid, dec!(2350.00));
        assert_eq!(cache.session_stats().unwrap().high, dec!(2351.00));
    }

    #[test]
    fn failed_save_keeps_memory_value() {
        let store = Arc::new(MemoryStore {
            fail_saves: true,
            ..MemoryStore::default()
        });
        let cache = LastQuoteCache::new(store);

        cache.set(quote(dec!(10.00)));
        assert_eq!(cache.get().unwrap().bid, dec!(10.00));
    }

    #[test]
    fn restore_does_not_make_stats_known() {
        let store = Arc::new(MemoryStore::default());
        *store.saved.lock() = Some(quote(dec!(2000.00)));
        let cache = LastQuoteCache::new(store);

        let restored = cache.restore();
        assert_eq!(restored.unwrap().bid, dec!(2000.00));
        assert_eq!(cache.get().unwrap().bid, dec!(2000.00));
        assert!(cache.session_stats().is_none());
    }

    #[test]
    fn corrupt_store_restores_empty() {
        let store = Arc::new(MemoryStore {
            corrupt: true,
            ..MemoryStore::default()
        });
        let cache = LastQuoteCache::new(store);

        assert!(cache.restore().is_none());
        assert!(cache.get().is_none());
    }
}
