use serde::Deserialize;
use std::time::Duration;

use logtail_types::StreamFilters;

use crate::buffer::DEFAULT_CAPACITY;
use crate::session::SessionConfig;

/// Settings for one [`LogTail`](crate::LogTail)
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TailConfig {
    /// Bearer credential; connection is attempted without one if absent
    pub token: Option<String>,

    /// Per-source capacity; `all` holds three times as many
    pub capacity: usize,

    /// Records per source requested on the one-time history backfill
    pub history_tail: u32,

    /// Request history on the first connection of a session
    pub load_history: bool,

    pub retry_delay_ms: u64,

    /// Consecutive failed reconnects before giving up (`None` = never)
    pub max_reconnect_attempts: Option<u32>,

    pub save_debounce_ms: u64,

    /// Longest a continuous burst may postpone a cache write
    pub save_max_delay_ms: u64,

    /// Server-side filters applied at connect time
    pub filters: StreamFilters,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            token: None,
            capacity: DEFAULT_CAPACITY,
            history_tail: 100,
            load_history: true,
            retry_delay_ms: 5_000,
            max_reconnect_attempts: None,
            save_debounce_ms: 500,
            save_max_delay_ms: 5_000,
            filters: StreamFilters::default(),
        }
    }
}

impl TailConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    pub fn save_max_delay(&self) -> Duration {
        Duration::from_millis(self.save_max_delay_ms)
    }

    pub(crate) fn session_config(&self) -> SessionConfig {
        SessionConfig {
            token: self.token.clone(),
            history_tail: self.history_tail,
            retry_delay: self.retry_delay(),
            max_reconnect_attempts: self.max_reconnect_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logtail_types::LogLevel;

    #[test]
    fn test_defaults() {
        let config = TailConfig::default();
        assert_eq!(config.capacity, 500);
        assert_eq!(config.retry_delay(), Duration::from_secs(5));
        assert_eq!(config.save_debounce(), Duration::from_millis(500));
        assert!(config.max_reconnect_attempts.is_none());
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: TailConfig = serde_json::from_str(
            r#"{"capacity":50,"filters":{"levels":["ERROR"],"keyword":"db"}}"#,
        )
        .unwrap();
        assert_eq!(config.capacity, 50);
        assert_eq!(config.history_tail, 100);
        assert_eq!(config.filters.levels, vec![LogLevel::Error]);
        assert_eq!(config.filters.keyword(), Some("db"));
    }
}
