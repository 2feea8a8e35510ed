//! Configuration management for the ring store
//!
//! This module provides structured configuration using TOML/YAML files with
//! serde. The configuration is read once at startup and is immutable
//! afterwards.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for a ring node
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RingConfig {
    /// Node identity and addresses
    pub node: NodeConfig,
    /// Replication and quorum parameters
    pub quorum: QuorumConfig,
    /// RPC worker settings
    pub rpc: RpcConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Node identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Ring position of this node (positive)
    pub id: u64,
    /// Address of the inter-node RPC endpoint
    pub address: String,
    /// Address of the client-facing endpoint
    pub client_address: String,
    /// Directory holding the node's record files
    pub data_dir: String,
    /// Existing ring member to contact on join; `None` starts a new ring
    pub contact: Option<String>,
}

/// Replication factor, quorum sizes and the shared timeout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuorumConfig {
    /// Replication factor (N)
    pub replication_factor: usize,
    /// Write quorum (W)
    pub write_quorum: usize,
    /// Read quorum (R)
    pub read_quorum: usize,
    /// Timeout for membership RPCs and quorum fan-outs
    pub timeout: TimeoutConfig,
}

/// A timeout expressed as value and unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub value: u64,
    pub unit: TimeUnit,
}

/// Unit of a [`TimeoutConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
}

/// RPC worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Maximum concurrent fan-out and replica-push tasks per node
    pub worker_pool_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Log format
    pub format: LogFormat,
    /// Directory for daily-rolled log files; console output when `None`
    pub file_path: Option<String>,
    /// Include source file and line in each event
    pub with_location: bool,
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Log format
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LogFormat {
    /// Simple text format
    Simple,
    /// JSON format
    Json,
    /// Pretty multi-line format
    Pretty,
}

impl RingConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: RingConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: RingConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.node.id == 0 {
            errors.push("Node ID must be positive".to_string());
        }
        if self.node.address.is_empty() {
            errors.push("Node address cannot be empty".to_string());
        }

        let q = &self.quorum;
        if q.replication_factor == 0 {
            errors.push("Replication factor cannot be 0".to_string());
        }
        if q.write_quorum == 0 {
            errors.push("Write quorum cannot be 0".to_string());
        }
        if q.read_quorum == 0 {
            errors.push("Read quorum cannot be 0".to_string());
        }
        if q.write_quorum > q.replication_factor {
            errors.push("Write quorum cannot exceed replication factor".to_string());
        }
        if q.read_quorum > q.replication_factor {
            errors.push("Read quorum cannot exceed replication factor".to_string());
        }
        if q.write_quorum + q.read_quorum <= q.replication_factor {
            errors.push("Quorums must satisfy W + R > N".to_string());
        }
        if q.timeout.value == 0 {
            errors.push("Timeout cannot be 0".to_string());
        }

        if self.rpc.worker_pool_size == 0 {
            errors.push("Worker pool size cannot be 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Get duration for membership RPCs and quorum fan-outs
    pub fn timeout_duration(&self) -> Duration {
        self.quorum.timeout.as_duration()
    }
}

impl TimeoutConfig {
    pub fn new(value: u64, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    pub fn as_duration(&self) -> Duration {
        match self.unit {
            TimeUnit::Milliseconds => Duration::from_millis(self.value),
            TimeUnit::Seconds => Duration::from_secs(self.value),
            TimeUnit::Minutes => Duration::from_secs(self.value.saturating_mul(60)),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: 1,
            address: "127.0.0.1:7100".to_string(),
            client_address: "127.0.0.1:6100".to_string(),
            data_dir: "./data".to_string(),
            contact: None,
        }
    }
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            replication_factor: 3,
            write_quorum: 2,
            read_quorum: 2,
            timeout: TimeoutConfig::default(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            value: 2,
            unit: TimeUnit::Seconds,
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 16,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Simple,
            file_path: None,
            with_location: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RingConfig::default();
        assert_eq!(config.quorum.replication_factor, 3);
        assert_eq!(config.quorum.write_quorum, 2);
        assert_eq!(config.quorum.read_quorum, 2);
        assert!(config.node.contact.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_quorum_overlap_is_required() {
        let mut config = RingConfig::default();
        config.quorum.write_quorum = 1;
        config.quorum.read_quorum = 2;

        let errors = config.validate().unwrap_err();
        assert!(errors.contains(&"Quorums must satisfy W + R > N".to_string()));
    }

    #[test]
    fn test_config_validation() {
        let mut config = RingConfig::default();
        config.node.id = 0;
        config.quorum.read_quorum = 4;
        config.rpc.worker_pool_size = 0;

        let errors = config.validate().unwrap_err();
        assert!(errors.contains(&"Node ID must be positive".to_string()));
        assert!(errors.contains(&"Read quorum cannot exceed replication factor".to_string()));
        assert!(errors.contains(&"Worker pool size cannot be 0".to_string()));
    }

    #[test]
    fn test_config_serialization() {
        let config = RingConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: RingConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.node.address, deserialized.node.address);
        assert_eq!(config.quorum.timeout, deserialized.quorum.timeout);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
            [node]
            id = 20
            address = "127.0.0.1:7120"

            [quorum]
            replication_factor = 3
            write_quorum = 2
            read_quorum = 2
            timeout = { value = 500, unit = "Milliseconds" }
        "#;
        let config: RingConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.node.id, 20);
        assert_eq!(config.rpc.worker_pool_size, 16);
        assert_eq!(config.timeout_duration(), Duration::from_millis(500));
    }

    #[test]
    fn test_yaml_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ring.yaml");
        std::fs::write(
            &path,
            "node:\n  id: 10\n  address: \"127.0.0.1:7110\"\nquorum:\n  replication_factor: 1\n  write_quorum: 1\n  read_quorum: 1\n  timeout:\n    value: 1\n    unit: Minutes\n",
        )
        .unwrap();

        let config = RingConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.node.id, 10);
        assert_eq!(config.timeout_duration(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duration_conversions() {
        assert_eq!(
            TimeoutConfig::new(250, TimeUnit::Milliseconds).as_duration(),
            Duration::from_millis(250)
        );
        assert_eq!(
            TimeoutConfig::new(3, TimeUnit::Seconds).as_duration(),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn test_huge_minutes_saturate() {
        assert_eq!(
            TimeoutConfig::new(u64::MAX, TimeUnit::Minutes).as_duration(),
            Duration::from_secs(u64::MAX)
        );
    }
}
