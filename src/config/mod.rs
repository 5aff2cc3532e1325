//! Configuration module

use std::time::Duration;

use serde::Deserialize;

use crate::sensibo::RetryPolicy;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sensibo: SensiboConfig,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Sensibo account and HTTP behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct SensiboConfig {
    #[serde(default = "default_api_root")]
    pub api_root: String,
    /// Account API key, used by every node that does not carry its own
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_patch_read_timeout")]
    pub patch_read_timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for SensiboConfig {
    fn default() -> Self {
        Self {
            api_root: default_api_root(),
            api_key: String::new(),
            request_timeout_secs: default_request_timeout(),
            patch_read_timeout_secs: default_patch_read_timeout(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl SensiboConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn patch_read_timeout(&self) -> Duration {
        Duration::from_secs(self.patch_read_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.retry_backoff_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKindConfig {
    In,
    Send,
}

/// What an in-node fetches on each trigger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    #[default]
    Measurement,
    Config,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    pub kind: NodeKindConfig,
    pub device_id: String,
    /// Overrides `sensibo.api_key` for this node
    #[serde(default)]
    pub api_key: Option<String>,
    /// 0 disables polling
    #[serde(default)]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub mode: FetchMode,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1881
}

fn default_api_root() -> String {
    "https://home.sensibo.com/api/v2".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_patch_read_timeout() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    5
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("SENSIBO_BRIDGE").separator("__"))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        url::Url::parse(&self.sensibo.api_root)
            .map_err(|e| anyhow::anyhow!("invalid sensibo.api_root '{}': {}", self.sensibo.api_root, e))?;

        if self.sensibo.max_attempts == 0 {
            anyhow::bail!("sensibo.max_attempts must be at least 1");
        }

        let mut seen = std::collections::HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.name.as_str()) {
                anyhow::bail!("duplicate node name '{}'", node.name);
            }
            if node.device_id.is_empty() {
                anyhow::bail!("node '{}' has no device_id", node.name);
            }
            if node.api_key.as_deref().unwrap_or(&self.sensibo.api_key).is_empty() {
                anyhow::bail!("node '{}' has no API key", node.name);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: serde_json::Value) -> Config {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(serde_json::json!({}));
        assert_eq!(config.server.port, 1881);
        assert_eq!(config.sensibo.api_root, "https://home.sensibo.com/api/v2");
        assert_eq!(config.sensibo.patch_read_timeout(), Duration::from_secs(5));
        assert!(config.nodes.is_empty());
    }

    #[test]
    fn test_node_config() {
        let config = parse(serde_json::json!({
            "sensibo": { "api_key": "k" },
            "nodes": [
                { "name": "living", "kind": "in", "device_id": "abc", "poll_interval_secs": 60, "mode": "config" },
                { "name": "living-send", "kind": "send", "device_id": "abc" }
            ]
        }));

        assert_eq!(config.nodes[0].mode, FetchMode::Config);
        assert_eq!(config.nodes[0].poll_interval_secs, 60);
        assert_eq!(config.nodes[1].kind, NodeKindConfig::Send);
        assert_eq!(config.nodes[1].mode, FetchMode::Measurement);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicates_and_missing_key() {
        let duplicate = parse(serde_json::json!({
            "sensibo": { "api_key": "k" },
            "nodes": [
                { "name": "a", "kind": "in", "device_id": "x" },
                { "name": "a", "kind": "send", "device_id": "y" }
            ]
        }));
        assert!(duplicate.validate().is_err());

        let keyless = parse(serde_json::json!({
            "nodes": [{ "name": "a", "kind": "in", "device_id": "x" }]
        }));
        assert!(keyless.validate().is_err());

        let own_key = parse(serde_json::json!({
            "nodes": [{ "name": "a", "kind": "in", "device_id": "x", "api_key": "own" }]
        }));
        assert!(own_key.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_api_root() {
        let config = parse(serde_json::json!({ "sensibo": { "api_root": "not a url" } }));
        assert!(config.validate().is_err());
    }
}
