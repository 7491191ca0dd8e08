//! Orchestrator Façade: construction, discovery, signal handling, and
//! configuration-change reconciliation (spec.md §4.9).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{OnceCell, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigManager, OrchestratorConfig, ServiceConfig};
use crate::discovery::ServiceDiscoverer;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::executor::ProcessExecutor;
use crate::manager::ServiceManager;
use crate::process::{ServiceInfo, ServiceState};
use crate::svc_note;

/// Outcome of a (possibly shared, since `shutdown` is idempotent) shutdown
/// fan-out: one entry per service that was live when shutdown began.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub results: Vec<(String, Result<(), String>)>,
}

pub struct Orchestrator {
    config: Arc<ConfigManager>,
    manager: Arc<ServiceManager>,
    shutting_down: Arc<AtomicBool>,
    shutdown_once: OnceCell<ShutdownReport>,
    known_services: RwLock<HashSet<String>>,
    /// Cancels any in-flight `DiscoverServices` walk once shutdown begins
    /// (spec.md §4.2 "honors context cancellation between entries").
    discovery_cancel: CancellationToken,
}

impl Orchestrator {
    /// `New(config_manager, options…)` (spec.md §4.9): validates
    /// `services_dir` exists, wires the Service Manager, and subscribes to
    /// config changes for reconciliation.
    pub async fn new(config: Arc<ConfigManager>, executor: Arc<dyn ProcessExecutor>) -> OrchestratorResult<Arc<Self>> {
        let snapshot = config.get().await;
        if !snapshot.orchestrator.services_dir.is_dir() {
            return Err(OrchestratorError::InvalidConfig {
                field: "orchestrator.services_dir".to_string(),
                value: snapshot.orchestrator.services_dir.display().to_string(),
                reason: "does not exist".to_string(),
            });
        }

        let shutting_down = Arc::new(AtomicBool::new(false));
        let manager = ServiceManager::new(Arc::clone(&config), executor, Arc::clone(&shutting_down));
        let known_services = RwLock::new(snapshot.services.keys().cloned().collect());

        let orchestrator = Arc::new(Self {
            config: Arc::clone(&config),
            manager,
            shutting_down,
            shutdown_once: OnceCell::new(),
            known_services,
            discovery_cancel: CancellationToken::new(),
        });

        let weak = Arc::downgrade(&orchestrator);
        config
            .subscribe(move |new_cfg: &OrchestratorConfig| {
                // Subscribers must not block (spec.md §4.1); hand the diff
                // off to a task instead of awaiting here.
                if let Some(orch) = weak.upgrade() {
                    let new_cfg = new_cfg.clone();
                    tokio::spawn(async move { orch.reconcile(new_cfg).await });
                }
            })
            .await;

        Ok(orchestrator)
    }

    /// `DiscoverServices()` (spec.md §4.9): delegates to the Service
    /// Discoverer and synthesizes default, enabled configs for any binary
    /// not already present. Returns the newly discovered names.
    pub async fn discover_services(&self) -> OrchestratorResult<Vec<String>> {
        let mut cfg = self.config.get().await;
        let discoverer = ServiceDiscoverer::new(cfg.orchestrator.services_dir.clone());
        let found = discoverer.discover(&self.discovery_cancel).await?;

        let mut added = Vec::new();
        for (name, binary_path) in found {
            if !cfg.services.contains_key(&name) {
                cfg.services.insert(
                    name.clone(),
                    ServiceConfig {
                        enabled: true,
                        binary_path,
                        ..ServiceConfig::default()
                    },
                );
                added.push(name);
            }
        }

        if !added.is_empty() {
            self.config.set(cfg).await?;
        }
        Ok(added)
    }

    pub async fn start(&self, name: &str) -> OrchestratorResult<()> {
        self.manager.start(name).await
    }

    pub async fn stop(&self, name: &str) -> OrchestratorResult<()> {
        self.manager.stop(name).await
    }

    pub async fn restart(&self, name: &str) -> OrchestratorResult<()> {
        self.manager.restart(name).await
    }

    pub async fn status(&self, name: &str) -> ServiceState {
        self.manager.status(name).await
    }

    pub async fn is_running(&self, name: &str) -> bool {
        self.manager.is_running(name).await
    }

    pub async fn get_service_info(&self, name: &str) -> Option<ServiceInfo> {
        self.manager.get_service_info(name).await
    }

    pub async fn get_all_services(&self) -> Vec<ServiceInfo> {
        self.manager.get_all_services().await
    }

    /// `Shutdown(context)` (spec.md §4.9): sets the shutdown flag, stops
    /// every live service in parallel under `timeout`, and is idempotent —
    /// later callers observe the first call's outcome.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        self.shutdown_once
            .get_or_init(|| async {
                self.shutting_down.store(true, Ordering::SeqCst);
                self.discovery_cancel.cancel();
                svc_note!("orchestrator", "shutdown initiated, stopping {} live services", self.manager.live_services().await.len());

                let results = match tokio::time::timeout(timeout, self.manager.stop_all()).await {
                    Ok(results) => results
                        .into_iter()
                        .map(|(name, result)| (name, result.map_err(|e| e.to_string())))
                        .collect(),
                    Err(_) => {
                        svc_note!("orchestrator", "shutdown deadline ({:?}) elapsed before all stops completed", timeout);
                        Vec::new()
                    }
                };
                ShutdownReport { results }
            })
            .await
            .clone()
    }

    /// Blocks until SIGINT or SIGTERM, then runs `shutdown` with
    /// `shutdown_timeout` as the deadline (spec.md §4.9 "signal handler").
    pub async fn run_until_signal(self: &Arc<Self>) -> ShutdownReport {
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => svc_note!("orchestrator", "received SIGTERM"),
            _ = sigint.recv() => svc_note!("orchestrator", "received SIGINT"),
        }

        let timeout = Duration::from_secs(self.config.get().await.orchestrator.shutdown_timeout);
        self.shutdown(timeout).await
    }

    /// Configuration-change reconciliation (spec.md §4.9). `ConfigManager::set`
    /// has already atomically replaced the document by the time subscribers
    /// run, so the remaining work is diffing against the previously-known
    /// service set and stopping anything that disappeared.
    async fn reconcile(&self, new_cfg: OrchestratorConfig) {
        let new_names: HashSet<String> = new_cfg.services.keys().cloned().collect();
        let removed: Vec<String> = {
            let known = self.known_services.read().await;
            known.difference(&new_names).cloned().collect()
        };

        for name in removed {
            svc_note!(name, "removed from configuration; scheduling stop");
            let manager = Arc::clone(&self.manager);
            let name = name.clone();
            tokio::spawn(async move {
                if manager.status(&name).await != ServiceState::Stopped {
                    if let Err(e) = manager.stop(&name).await {
                        svc_note!(name, "reconciliation stop failed: {}", e);
                    }
                }
                manager.forget(&name).await;
            });
        }

        *self.known_services.write().await = new_names;
    }
}
