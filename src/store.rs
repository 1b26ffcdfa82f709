//! Per-symbol runtime state persistence.
//!
//! One JSON document per symbol under the state directory. Writes are synced
//! to a temporary file and then renamed over the old record, so a crash
//! mid-write never leaves a torn file behind.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::core::ledger::SymbolRuntimeState;
use crate::error::{TradingError, TradingResult};

pub trait StateRepository: Send + Sync {
    fn load_all(&self) -> TradingResult<BTreeMap<String, SymbolRuntimeState>>;

    /// `None` when the symbol has never been persisted
    fn load(&self, symbol: &str) -> TradingResult<Option<SymbolRuntimeState>>;

    fn save(&self, state: &SymbolRuntimeState) -> TradingResult<()>;

    /// Deleting a missing record is not an error
    fn delete(&self, symbol: &str) -> TradingResult<()>;
}

/// Directory of `<SYMBOL>.json` files
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    dir: PathBuf,
}

impl JsonStateStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> TradingResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .map_err(|e| TradingError::StateStore(format!("cannot create {}: {}", dir.display(), e)))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, symbol: &str) -> PathBuf {
        // Tickers may carry characters that are awkward in file names
        let file: String = symbol
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file))
    }
}

impl StateRepository for JsonStateStore {
    fn load_all(&self) -> TradingResult<BTreeMap<String, SymbolRuntimeState>> {
        let mut states = BTreeMap::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(TradingError::from)
                .and_then(|raw| serde_json::from_str::<SymbolRuntimeState>(&raw).map_err(TradingError::from));
            match parsed {
                Ok(state) => {
                    states.insert(state.symbol.clone(), state);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "⚠️  Skipping unreadable state record"),
            }
        }
        Ok(states)
    }

    fn load(&self, symbol: &str) -> TradingResult<Option<SymbolRuntimeState>> {
        let path = self.path_for(symbol);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        let state = serde_json::from_str(&raw).map_err(|e| {
            TradingError::StateStore(format!("corrupt state {}: {}", path.display(), e))
        })?;
        Ok(Some(state))
    }

    fn save(&self, state: &SymbolRuntimeState) -> TradingResult<()> {
        let path = self.path_for(&state.symbol);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(state)?;
        let mut file = File::create(&tmp)?;
        file.write_all(body.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;
        debug!(symbol = %state.symbol, path = %path.display(), "state saved");
        Ok(())
    }

    fn delete(&self, symbol: &str) -> TradingResult<()> {
        let path = self.path_for(symbol);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    states: Mutex<BTreeMap<String, SymbolRuntimeState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, SymbolRuntimeState>> {
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StateRepository for MemoryStateStore {
    fn load_all(&self) -> TradingResult<BTreeMap<String, SymbolRuntimeState>> {
        Ok(self.lock().clone())
    }

    fn load(&self, symbol: &str) -> TradingResult<Option<SymbolRuntimeState>> {
        Ok(self.lock().get(symbol).cloned())
    }

    fn save(&self, state: &SymbolRuntimeState) -> TradingResult<()> {
        self.lock().insert(state.symbol.clone(), state.clone());
        Ok(())
    }

    fn delete(&self, symbol: &str) -> TradingResult<()> {
        self.lock().remove(symbol);
        Ok(())
    }
}

impl<T: StateRepository + ?Sized> StateRepository for std::sync::Arc<T> {
    fn load_all(&self) -> TradingResult<BTreeMap<String, SymbolRuntimeState>> {
        (**self).load_all()
    }

    fn load(&self, symbol: &str) -> TradingResult<Option<SymbolRuntimeState>> {
        (**self).load(symbol)
    }

    fn save(&self, state: &SymbolRuntimeState) -> TradingResult<()> {
        (**self).save(state)
    }

    fn delete(&self, symbol: &str) -> TradingResult<()> {
        (**self).delete(symbol)
    }
}
