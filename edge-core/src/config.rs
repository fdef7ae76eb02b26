use std::path::Path;

use edge_rpc::EngineConfig;
use serde::{Deserialize, Serialize};

use crate::{EdgeCoreError, Result};

/// Settings shared by every connection an [`crate::EdgeServer`] services.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Settings of each connection's correlation engine
    pub engine: EngineConfig,

    /// Close a connection as soon as the peer sends something that isn't valid JSON-RPC
    pub close_on_protocol_error: bool,

    /// Longest line, in bytes, accepted by line-delimited transports
    pub max_message_length: usize,

    /// How many commands from connection handles may queue up before senders wait
    pub command_channel_bounds: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            close_on_protocol_error: true,
            max_message_length: 1024 * 1024,
            command_channel_bounds: 16,
        }
    }
}

impl ServerConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|source| EdgeCoreError::Config { source })
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| EdgeCoreError::ConfigIo {
            source,
            path: path.display().to_string(),
        })?;
        tracing::debug!(path = %path.display(), "Loading server configuration");
        Self::from_yaml_str(&yaml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(ServerConfig::from_yaml_str("{}").unwrap(), ServerConfig::default());
    }

    #[test]
    fn test_partial_yaml() {
        let config = ServerConfig::from_yaml_str(
            r#"
            close_on_protocol_error: false
            engine:
              callback_warn_threshold: 1s 250ms
            "#,
        )
        .unwrap();
        assert!(!config.close_on_protocol_error);
        assert_eq!(
            config.engine.callback_warn_threshold,
            humantime::parse_duration("1250ms").unwrap()
        );
        assert_eq!(config.max_message_length, 1024 * 1024);
        assert_eq!(config.command_channel_bounds, 16);
    }

    #[test]
    fn test_bad_yaml() {
        assert_matches!(
            ServerConfig::from_yaml_str("max_message_length: lots"),
            Err(EdgeCoreError::Config { .. })
        );
        assert_matches!(
            ServerConfig::from_yaml_file("/nonexistent/edge-core.yaml"),
            Err(EdgeCoreError::ConfigIo { .. })
        );
    }
}
