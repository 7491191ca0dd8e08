use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use orchestrator::config::{ConfigManager, LogLevel, NodeConfig, OrchestratorConfig, ServiceConfig};
use orchestrator::executor::TokioProcessExecutor;
use orchestrator::process::ServiceState;
use orchestrator::Orchestrator;

pub fn base_config(services_dir: &Path, shutdown_timeout: u64) -> OrchestratorConfig {
    OrchestratorConfig {
        orchestrator: NodeConfig {
            services_dir: services_dir.to_path_buf(),
            log_level: LogLevel::Debug,
            auto_restart: true,
            shutdown_timeout,
        },
        services: HashMap::new(),
    }
}

pub fn with_service(mut config: OrchestratorConfig, name: &str, enabled: bool) -> OrchestratorConfig {
    config.services.insert(
        name.to_string(),
        ServiceConfig {
            enabled,
            ..ServiceConfig::default()
        },
    );
    config
}

pub async fn build_orchestrator(config: OrchestratorConfig) -> Arc<Orchestrator> {
    let config_manager = Arc::new(ConfigManager::new(config));
    let executor = Arc::new(TokioProcessExecutor::new());
    Orchestrator::new(config_manager, executor).await.unwrap()
}

/// Polls `predicate` until it holds or `timeout` elapses, returning whether
/// it held in time. Used instead of fixed sleeps so tests are closer to the
/// "within N ms/seconds" wording of spec.md §8's scenarios.
pub async fn wait_until<F, Fut>(timeout: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if predicate().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn state_is(orchestrator: &Arc<Orchestrator>, name: &str, state: ServiceState) -> bool {
    orchestrator.status(name).await == state
}
