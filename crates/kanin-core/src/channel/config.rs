use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level engine configuration, deserializable from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub channel: ChannelConfig,
    pub dispatcher: DispatcherConfig,
}

/// Who re-offers a requeued message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedeliveryMode {
    /// The channel's own queue model redispatches to a live consumer.
    /// Only loopback-fed channels redeliver locally; once a broker frame
    /// arrives the channel leaves redelivery to the broker.
    #[default]
    Local,
    /// Only the nack/reject intent is emitted; the broker redelivers through
    /// the inbound frame path.
    Remote,
}

/// Per-channel settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub redelivery: RedeliveryMode,
    /// Capacity of the observable event queue. Events beyond it are dropped
    /// with a warning.
    pub event_capacity: usize,
}

/// Consumer worker settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub thread_name_prefix: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            redelivery: RedeliveryMode::Local,
            event_capacity: 1024,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "kanin-consumer".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = EngineConfig::default();
        assert_eq!(config.channel.redelivery, RedeliveryMode::Local);
        assert_eq!(config.channel.event_capacity, 1024);
        assert_eq!(config.dispatcher.thread_name_prefix, "kanin-consumer");
    }

    #[test]
    fn toml_parsing_with_overrides() {
        let toml_str = r#"
            [channel]
            redelivery = "remote"
            event_capacity = 8

            [dispatcher]
            thread_name_prefix = "worker"
        "#;
        let config = EngineConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.channel.redelivery, RedeliveryMode::Remote);
        assert_eq!(config.channel.event_capacity, 8);
        assert_eq!(config.dispatcher.thread_name_prefix, "worker");
    }

    #[test]
    fn toml_parsing_empty_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.channel.redelivery, RedeliveryMode::Local);
        assert_eq!(config.dispatcher.thread_name_prefix, "kanin-consumer");
    }

    #[test]
    fn toml_parsing_partial_config() {
        let toml_str = r#"
            [channel]
            event_capacity = 5
        "#;
        let config = EngineConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.channel.event_capacity, 5);
        // Remaining defaults preserved
        assert_eq!(config.channel.redelivery, RedeliveryMode::Local);
        assert_eq!(config.dispatcher.thread_name_prefix, "kanin-consumer");
    }

    #[test]
    fn unknown_redelivery_mode_is_an_error() {
        let err = EngineConfig::from_toml_str("[channel]\nredelivery = \"broker\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "got {err:?}");
    }

    #[test]
    fn load_missing_file_reports_path() {
        let err = EngineConfig::load("/nonexistent/kanin.toml").unwrap_err();
        match err {
            ConfigError::Io { path, .. } => assert_eq!(path, "/nonexistent/kanin.toml"),
            other => panic!("expected Io error, got {other:?}"),
        }
    }
}
