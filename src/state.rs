//! Durable per-symbol state: entry price, last stop level and the partial
//! take-profit latches, plus a small cross-cutting `limits` map.
//!
//! The whole document is rewritten on every mutation via write-to-temp then
//! rename, so a crash mid-write can never leave a torn file behind. The
//! file is read once at startup; a lock guards the in-memory copy and the
//! flush.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Per-symbol persistent record. Created lazily on first write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolState {
    pub entry_price: Option<f64>,
    pub last_stop: Option<f64>,
    pub took_partial_tp1: bool,
    pub took_partial_tp2: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDoc {
    #[serde(default)]
    symbols: HashMap<String, SymbolState>,
    #[serde(default)]
    limits: HashMap<String, serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Durable key-value store for [`SymbolState`] records.
pub struct StateStore {
    path: PathBuf,
    doc: Mutex<StateDoc>,
}

impl StateStore {
    /// Load the store from `path`. A missing file starts empty; an
    /// unreadable one is logged and replaced on the next write.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let doc = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!("State file {} is unreadable ({}), starting empty", path.display(), e);
                    StateDoc::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateDoc::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    /// Snapshot of the record for `symbol` (default when absent).
    pub fn symbol(&self, symbol: &str) -> SymbolState {
        let doc = self.doc.lock().expect("state lock poisoned");
        doc.symbols.get(symbol).cloned().unwrap_or_default()
    }

    /// Mutate the record for `symbol` and flush the whole document.
    pub fn update<F>(&self, symbol: &str, f: F) -> Result<(), StateError>
    where
        F: FnOnce(&mut SymbolState),
    {
        let mut doc = self.doc.lock().expect("state lock poisoned");
        f(doc.symbols.entry(symbol.to_string()).or_default());
        self.flush(&doc)
    }

    /// Reset the record for `symbol` after a full exit.
    pub fn clear(&self, symbol: &str) -> Result<(), StateError> {
        self.update(symbol, |st| *st = SymbolState::default())
    }

    /// Set a cross-cutting limit value and flush.
    pub fn set_limit(&self, key: &str, value: serde_json::Value) -> Result<(), StateError> {
        let mut doc = self.doc.lock().expect("state lock poisoned");
        doc.limits.insert(key.to_string(), value);
        self.flush(&doc)
    }

    pub fn limit(&self, key: &str) -> Option<serde_json::Value> {
        let doc = self.doc.lock().expect("state lock poisoned");
        doc.limits.get(key).cloned()
    }

    fn flush(&self, doc: &StateDoc) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(doc)?)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("Flushed state to {}", self.path.display());
        Ok(())
    }
}
