//! Client configuration, loaded from TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::session::SessionSettings;
use crate::transport::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Realtime room gateway, e.g. `ws://localhost:7880/room`.
    pub server_url: String,
    pub token: Option<String>,
    pub continuity_url: String,
    pub continuity_token: Option<String>,
    pub merge_threshold_ms: i64,
    pub analysis_timeout_ms: u64,
    pub max_connect_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub data_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:7880/room".to_string(),
            token: None,
            continuity_url: "http://127.0.0.1:4100".to_string(),
            continuity_token: None,
            merge_threshold_ms: 1000,
            analysis_timeout_ms: 15_000,
            max_connect_retries: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 5000,
            data_dir: None,
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            merge_threshold_ms: self.merge_threshold_ms,
            analysis_timeout: Duration::from_millis(self.analysis_timeout_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_connect_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    /// Config value, else `~/.assessment`.
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".assessment")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = ClientConfig::from_toml("").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.session_settings(), SessionSettings::default());
    }

    #[test]
    fn overrides_are_applied() {
        let config = ClientConfig::from_toml(
            r#"
            server_url = "ws://agent.internal/room"
            token = "abc"
            merge_threshold_ms = 500
            analysis_timeout_ms = 30000
            data_dir = "/tmp/assessment"
            "#,
        )
        .unwrap();
        assert_eq!(config.server_url, "ws://agent.internal/room");
        assert_eq!(config.token.as_deref(), Some("abc"));
        assert_eq!(config.session_settings().merge_threshold_ms, 500);
        assert_eq!(
            config.session_settings().analysis_timeout,
            Duration::from_secs(30)
        );
        assert_eq!(config.resolved_data_dir(), PathBuf::from("/tmp/assessment"));
        assert_eq!(config.max_connect_retries, 3);
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClientConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(err.to_string().contains("missing.toml"));
    }
}
