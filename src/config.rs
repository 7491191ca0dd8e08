//! Config Manager: holds the in-memory configuration document, validates
//! updates, and fans out change notifications to subscribers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{OrchestratorError, OrchestratorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_auto_restart() -> bool {
    true
}

/// Process-wide configuration (spec.md §3, "NodeConfig / OrchestratorConfig").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub services_dir: PathBuf,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default = "default_auto_restart")]
    pub auto_restart: bool,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

/// Per-service configuration (spec.md §3, "ServiceConfig").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub binary_path: PathBuf,
    #[serde(default)]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub memory_limit: u64,
}

fn default_true() -> bool {
    true
}

/// Top-level document deserialized straight from the YAML config file
/// (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub orchestrator: NodeConfig,
    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,
}

impl OrchestratorConfig {
    pub fn from_yaml_str(yaml: &str) -> OrchestratorResult<Self> {
        let config: OrchestratorConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> OrchestratorResult<()> {
        // shutdown_timeout: spec.md §4.1 "Positive durations for timeouts/intervals" —
        // 0 is explicitly allowed by spec.md §8 ("With shutdown_timeout = 0, SIGKILL
        // follows SIGTERM immediately"), so the real constraint is just "not absurd".
        if self.orchestrator.shutdown_timeout > 3600 {
            return Err(OrchestratorError::InvalidConfig {
                field: "orchestrator.shutdown_timeout".to_string(),
                value: self.orchestrator.shutdown_timeout.to_string(),
                reason: "must be at most 3600 seconds".to_string(),
            });
        }
        if self.orchestrator.services_dir.as_os_str().is_empty() {
            return Err(OrchestratorError::InvalidConfig {
                field: "orchestrator.services_dir".to_string(),
                value: String::new(),
                reason: "required".to_string(),
            });
        }
        for (name, svc) in &self.services {
            if svc.memory_limit > 1_048_576 {
                return Err(OrchestratorError::InvalidConfig {
                    field: format!("services.{name}.memory_limit"),
                    value: svc.memory_limit.to_string(),
                    reason: "exceeds maximum of 1048576 MiB".to_string(),
                });
            }
        }
        Ok(())
    }
}

type Subscriber = Box<dyn Fn(&OrchestratorConfig) + Send + Sync>;

/// Holds the single in-memory configuration document and its subscribers.
pub struct ConfigManager {
    inner: Arc<RwLock<OrchestratorConfig>>,
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
}

impl ConfigManager {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
            subscribers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Structurally independent copy of the current config.
    pub async fn get(&self) -> OrchestratorConfig {
        self.inner.read().await.clone()
    }

    /// Validate, replace, and notify every subscriber synchronously before
    /// returning. Subscribers must not block (spec.md §4.1).
    pub async fn set(&self, config: OrchestratorConfig) -> OrchestratorResult<()> {
        config.validate()?;

        {
            let mut guard = self.inner.write().await;
            *guard = config;
        }

        let snapshot = self.get().await;
        let subs = self.subscribers.read().await;
        for sub in subs.iter() {
            sub(&snapshot);
        }

        Ok(())
    }

    /// Register a callback invoked on every successful `set`.
    pub async fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&OrchestratorConfig) + Send + Sync + 'static,
    {
        self.subscribers.write().await.push(Box::new(callback));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_yaml() -> &'static str {
        r#"
orchestrator:
  services_dir: /tmp/services
  log_level: debug
  auto_restart: true
  shutdown_timeout: 10
services:
  alpha:
    enabled: true
    data_dir: /tmp/services/alpha/data
"#
    }

    #[test]
    fn parses_and_fills_defaults() {
        let config = OrchestratorConfig::from_yaml_str(sample_yaml()).unwrap();
        assert_eq!(config.orchestrator.shutdown_timeout, 10);
        assert!(config.services["alpha"].enabled);
        assert_eq!(config.services["alpha"].args.len(), 0);
    }

    #[test]
    fn rejects_absurd_shutdown_timeout() {
        let mut config = OrchestratorConfig::from_yaml_str(sample_yaml()).unwrap();
        config.orchestrator.shutdown_timeout = 999_999;
        let err = config.validate().unwrap_err();
        assert_matches!(err, OrchestratorError::InvalidConfig { .. });
    }

    #[tokio::test]
    async fn set_notifies_subscribers_after_validation() {
        let config = OrchestratorConfig::from_yaml_str(sample_yaml()).unwrap();
        let manager = ConfigManager::new(config.clone());

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        manager
            .subscribe(move |_cfg| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        manager.set(config.clone()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let mut bad = config;
        bad.orchestrator.shutdown_timeout = 999_999;
        assert!(manager.set(bad).await.is_err());
        // Rejected set must not notify subscribers.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
