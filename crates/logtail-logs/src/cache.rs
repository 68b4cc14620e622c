use std::sync::Arc;

use tracing::{debug, warn};

use crate::buffer::BufferState;
use crate::store::SessionStore;

/// Key holding the serialized buffer state
pub const RECORDS_KEY: &str = "logtail.records";

/// Key holding the "history already loaded" flag
pub const HISTORY_LOADED_KEY: &str = "logtail.history_loaded";

/// Best-effort mirror of the buffers in a session store
///
/// Nothing here returns an error: failed reads yield empty state, failed
/// writes are logged and dropped. The in-memory buffers stay authoritative.
#[derive(Clone)]
pub struct SessionCache {
    store: Arc<dyn SessionStore>,
}

impl SessionCache {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Load the persisted buffer state; missing or malformed data yields empty state
    pub fn restore(&self) -> BufferState {
        let content = match self.store.get(RECORDS_KEY) {
            Ok(Some(content)) => content,
            Ok(None) => return BufferState::default(),
            Err(e) => {
                warn!(error = %e, "failed to read cached logs");
                return BufferState::default();
            }
        };

        match serde_json::from_str::<BufferState>(&content) {
            Ok(state) => {
                debug!(records = state.all.len(), "restored cached logs");
                state
            }
            Err(e) => {
                warn!(error = %e, "discarding malformed cached logs");
                BufferState::default()
            }
        }
    }

    /// Write the full buffer state
    pub fn save(&self, state: &BufferState) {
        let content = match serde_json::to_string(state) {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "failed to serialize logs for caching");
                return;
            }
        };
        if let Err(e) = self.store.set(RECORDS_KEY, &content) {
            warn!(error = %e, "failed to cache logs");
        }
    }

    /// Record that the one-time history backfill has been requested
    pub fn mark_history_loaded(&self) {
        if let Err(e) = self.store.set(HISTORY_LOADED_KEY, "true") {
            warn!(error = %e, "failed to persist history flag");
        }
    }

    pub fn has_history_loaded(&self) -> bool {
        match self.store.get(HISTORY_LOADED_KEY) {
            Ok(value) => value.is_some_and(|v| v.trim() == "true"),
            Err(e) => {
                warn!(error = %e, "failed to read history flag");
                false
            }
        }
    }

    /// Delete both the cached records and the history flag
    pub fn wipe(&self) {
        for key in [RECORDS_KEY, HISTORY_LOADED_KEY] {
            if let Err(e) = self.store.remove(key) {
                warn!(error = %e, key, "failed to wipe cache entry");
            }
        }
    }
}
