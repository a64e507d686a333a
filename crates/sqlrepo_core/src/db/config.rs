//! Connection configuration.
//!
//! # Invariants
//! - `busy_timeout_ms` bounds every lock wait; no statement blocks forever.
//! - `acquire_timeout_ms` bounds every wait for a pooled connection.
//! - `foreign_keys` defaults to on so dangling references are rejected on write.

use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_MIN_IDLE_CONNECTIONS: u32 = 1;
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5_000;

/// Tunables applied to every connection opened by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// How long a statement waits on a held store lock before `LockTimeout`.
    pub busy_timeout_ms: u64,
    /// Upper bound on connections the provider's pool opens.
    pub max_connections: u32,
    /// Idle connections the pool keeps warm.
    pub min_idle_connections: u32,
    /// How long `acquire` waits for a free pooled connection.
    pub acquire_timeout_ms: u64,
    /// Enables `PRAGMA foreign_keys`.
    pub foreign_keys: bool,
}

impl DbConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_idle_connections: DEFAULT_MIN_IDLE_CONNECTIONS,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            foreign_keys: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DbConfig;
    use std::time::Duration;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: DbConfig =
            serde_json::from_str(r#"{"busy_timeout_ms": 250}"#).expect("config should parse");
        assert_eq!(config.busy_timeout(), Duration::from_millis(250));
        assert_eq!(config.max_connections, DbConfig::default().max_connections);
        assert_eq!(config.acquire_timeout(), Duration::from_millis(5_000));
        assert!(config.foreign_keys);
    }
}
