//! Sync configuration.

use serde::{Deserialize, Serialize};

/// Trigger a full sync once the server reports more queued events than this.
pub const DEFAULT_FULL_SYNC_THRESHOLD: usize = 50;

/// Default sync server address.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3001";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the sync server, read by `HttpTransport::from_config`.
    pub base_url: String,
    /// Upload a full snapshot when the server's event log grows past this.
    pub full_sync_threshold: usize,
    /// Open the server-push channel during initialization.
    pub subscribe_on_init: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            full_sync_threshold: DEFAULT_FULL_SYNC_THRESHOLD,
            subscribe_on_init: true,
        }
    }
}

impl SyncConfig {
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.full_sync_threshold = threshold;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SyncConfig = serde_json::from_str(r#"{ "full_sync_threshold": 10 }"#).unwrap();
        assert_eq!(config.full_sync_threshold, 10);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(config.subscribe_on_init);
    }
}
