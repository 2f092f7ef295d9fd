//! Persistence Adapters
//!
//! File implementation of the [`QuoteStore`] port: one JSON record holding
//! the last quote, replaced by writing a sibling temp file and renaming it
//! over the target.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tokio::runtime::{Handle, RuntimeFlavor};

use crate::application::ports::{PersistenceError, QuoteStore};
use crate::domain::quote::Quote;

/// Default location of the last-quote record.
pub const DEFAULT_STORE_PATH: &str = "./lastrate.json";

/// Last quote stored as a JSON file.
#[derive(Debug, Clone)]
pub struct FileQuoteStore {
    path: PathBuf,
}

impl FileQuoteStore {
    /// Create a store at `path`. Nothing is touched until the first save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Record location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl Default for FileQuoteStore {
    fn default() -> Self {
        Self::new(DEFAULT_STORE_PATH)
    }
}

impl QuoteStore for FileQuoteStore {
    fn load(&self) -> Result<Option<Quote>, PersistenceError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn save(&self, quote: &Quote) -> Result<(), PersistenceError> {
        let json = serde_json::to_vec(quote)?;
        blocking_io(|| self.write_record(&json))?;
        tracing::trace!(path = %self.path.display(), "Last quote persisted");
        Ok(())
    }
}

impl FileQuoteStore {
    fn write_record(&self, json: &[u8]) -> io::Result<()> {
        let temp = self.temp_path();

        let mut file = fs::File::create(&temp)?;
        file.write_all(json)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, &self.path)
    }
}

/// Run synchronous file I/O without stalling the other tasks on a runtime
/// worker. Outside a multi-threaded runtime the closure runs inline.
fn blocking_io<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;

    fn quote() -> Quote {
        Quote {
            symbol: Some("XAUUSD".to_string()),
            bid: dec!(2350.12),
            ask: dec!(2351.12),
            high: dec!(2355.00),
            low: dec!(2349.90),
            unit: "USD/oz".to_string(),
            updated: Utc::now(),
            time: Some(json!(1_700_000_000)),
            time_msc: Some(json!(1_700_000_000_123_i64)),
            volume: Some(json!(12)),
        }
    }

    #[test]
    fn missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileQuoteStore::new(dir.path().join("lastrate.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_then_load_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lastrate.json");
        let original = quote();

        FileQuoteStore::new(&path).save(&original).unwrap();
        let restored = FileQuoteStore::new(&path).load().unwrap().unwrap();

        assert_eq!(restored, original);
        assert!(!dir.path().join("lastrate.json.tmp").exists());
    }

    #[test]
    fn saved_record_uses_fixed_point_strings() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileQuoteStore::new(dir.path().join("lastrate.json"));
        store.save(&quote()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["bid"], "2350.12");
        assert_eq!(raw["high"], "2355.00");
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lastrate.json");
        fs::write(&path, "{not json").unwrap();

        let result = FileQuoteStore::new(&path).load();
        assert!(matches!(result, Err(PersistenceError::Malformed(_))));
    }

    #[test]
    fn legacy_numeric_record_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lastrate.json");
        fs::write(
            &path,
            r#"{"type":"rate","symbol":"XAUUSD","bid":2350.1,"ask":2351.1,"high":2351.1,"low":2350.1,"unit":"USD/oz","updated":"2024-05-01T10:00:00.000Z"}"#,
        )
        .unwrap();

        let quote = FileQuoteStore::new(&path).load().unwrap().unwrap();
        assert_eq!(quote.bid.to_string(), "2350.1");
        assert_eq!(quote.symbol.as_deref(), Some("XAUUSD"));
    }

    #[test]
    fn unwritable_location_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileQuoteStore::new(dir.path().join("missing").join("lastrate.json"));
        assert!(matches!(store.save(&quote()), Err(PersistenceError::Io(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn save_inside_multi_thread_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileQuoteStore::new(dir.path().join("lastrate.json"));

        store.save(&quote()).unwrap();

        assert_eq!(store.load().unwrap().unwrap().bid, dec!(2350.12));
    }

    #[tokio::test]
    async fn save_inside_current_thread_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileQuoteStore::new(dir.path().join("lastrate.json"));

        store.save(&quote()).unwrap();

        assert!(store.load().unwrap().is_some());
        assert!(!store.temp_path().exists());
    }
}
