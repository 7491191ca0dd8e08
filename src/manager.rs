//! Service Manager: owns the process registry and its lock, implements
//! the public lifecycle API, and runs the Spawn procedure (spec.md §4.4,
//! §4.5).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use futures::future::join_all;
use nix::sys::signal::Signal;
use tokio::sync::{Notify, RwLock};

use crate::config::ConfigManager;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::executor::{self, OutputSink, ProcessExecutor};
use crate::isolation::build_environment;
use crate::process::{is_allowed_transition, ServiceInfo, ServiceProcess, ServiceState, StopSignal};
use crate::supervisor;
use crate::{svc_note, svc_warn};

/// Narrow capability the Supervisor needs back from the Service Manager
/// (spec.md §9, "supervisor needs spawner" cycle). The Supervisor only
/// ever sees this trait, never the concrete manager.
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    async fn respawn(&self, name: &str) -> OrchestratorResult<()>;
    async fn mark_running(&self, name: &str);
    async fn mark_failed(&self, name: &str, error: String);
    /// Attempts to move the record into `Restarting`. Returns `false` (and
    /// leaves the record `Failed`) when the restart cap has been reached.
    async fn mark_restarting(&self, name: &str, max_attempts: u32) -> bool;
    async fn is_shutting_down(&self) -> bool;
    async fn auto_restart_enabled(&self) -> bool;
    /// Number of restarts already recorded, used to size the backoff delay.
    async fn restarts_for(&self, name: &str) -> u32;
}

/// Extra per-process bookkeeping not part of the public `ServiceProcess`
/// record: a one-shot completion signal the Supervisor's waiter task
/// fires when the child actually exits, so `stop()` can wait on it
/// without owning the `Cmd` itself.
struct Bookkeeping {
    exited: Arc<Notify>,
}

pub struct ServiceManager {
    registry: RwLock<HashMap<String, ServiceProcess>>,
    bookkeeping: RwLock<HashMap<String, Bookkeeping>>,
    config: Arc<ConfigManager>,
    executor: Arc<dyn ProcessExecutor>,
    shutting_down: Arc<AtomicBool>,
}

/// Maximum automatic restart attempts before giving up (spec.md §4.8,
/// §8 "restarts = 10 -> next unexpected exit must not trigger a restart").
pub const MAX_RESTART_ATTEMPTS: u32 = 10;

impl ServiceManager {
    pub fn new(
        config: Arc<ConfigManager>,
        executor: Arc<dyn ProcessExecutor>,
        shutting_down: Arc<AtomicBool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: RwLock::new(HashMap::new()),
            bookkeeping: RwLock::new(HashMap::new()),
            config,
            executor,
            shutting_down,
        })
    }

    /// `Start(name)` (spec.md §4.4).
    pub async fn start(self: &Arc<Self>, name: &str) -> OrchestratorResult<()> {
        let config = self.config.get().await;
        let service_cfg = config
            .services
            .get(name)
            .ok_or_else(|| OrchestratorError::ServiceNotFound { name: name.to_string() })?;

        if !service_cfg.enabled {
            svc_note!(name, "service disabled; Start is a no-op");
            return Ok(());
        }

        {
            let registry = self.registry.read().await;
            if let Some(record) = registry.get(name) {
                if record.state == ServiceState::Running {
                    return Ok(());
                }
            }
        }

        self.spawn(name).await
    }

    /// `Stop(name)` (spec.md §4.4). Signal-delivery failures are surfaced to
    /// the caller as `StopFailedError` (spec.md §7), after the record is
    /// still finalized to `Stopped` — a failed signal doesn't leave the
    /// registry in a stuck intermediate state.
    pub async fn stop(self: &Arc<Self>, name: &str) -> OrchestratorResult<()> {
        let (pid, exited, shutdown_timeout, mut stop_error) = {
            let mut registry = self.registry.write().await;
            let record = registry
                .get_mut(name)
                .ok_or_else(|| OrchestratorError::ServiceNotFound { name: name.to_string() })?;

            if record.state == ServiceState::Stopped {
                return Ok(());
            }

            record.stop_signal.close();

            // Only Starting/Running have an actual OS process behind them;
            // Restarting is mid-backoff with nothing left to signal.
            let pid = matches!(record.state, ServiceState::Starting | ServiceState::Running)
                .then_some(record.pid)
                .filter(|pid| *pid != 0);

            let mut stop_error = None;
            if let Some(pid) = pid {
                if let Err(e) = executor::send_signal(pid, Signal::SIGTERM) {
                    svc_warn!(name, "failed to deliver SIGTERM: {}", e);
                    stop_error = Some(OrchestratorError::StopFailed {
                        name: name.to_string(),
                        stage: format!("SIGTERM: {e}"),
                    });
                }
            }

            let exited = self.bookkeeping.read().await.get(name).map(|b| b.exited.clone());
            let timeout = self.config.get().await.orchestrator.shutdown_timeout;
            (pid, exited, timeout, stop_error)
        };

        if let Some(pid) = pid {
            let waited = match exited {
                Some(exited) => {
                    tokio::time::timeout(std::time::Duration::from_secs(shutdown_timeout), exited.notified())
                        .await
                        .is_ok()
                }
                None => false,
            };

            if !waited {
                if let Err(e) = executor::send_signal(pid, Signal::SIGKILL) {
                    svc_warn!(name, "failed to deliver SIGKILL: {}", e);
                    stop_error.get_or_insert(OrchestratorError::StopFailed {
                        name: name.to_string(),
                        stage: format!("SIGKILL: {e}"),
                    });
                }
                svc_warn!(name, "SIGTERM escalation timed out after {}s; sent SIGKILL", shutdown_timeout);
            }
        }

        let mut registry = self.registry.write().await;
        if let Some(record) = registry.get_mut(name) {
            self.apply_transition(record, ServiceState::Stopped);
            record.pid = 0;
        }

        match stop_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// `Restart(name)` (spec.md §4.4): stop (errors logged, not fatal),
    /// then start.
    pub async fn restart(self: &Arc<Self>, name: &str) -> OrchestratorResult<()> {
        if let Err(e) = self.stop(name).await {
            svc_warn!(name, "restart: stop failed: {}", e);
        }
        self.start(name).await
    }

    pub async fn status(&self, name: &str) -> ServiceState {
        self.registry
            .read()
            .await
            .get(name)
            .map(|r| r.state)
            .unwrap_or(ServiceState::Stopped)
    }

    pub async fn is_running(&self, name: &str) -> bool {
        self.status(name).await == ServiceState::Running
    }

    pub async fn get_service_info(&self, name: &str) -> Option<ServiceInfo> {
        let config = self.config.get().await;
        let configured = config.services.contains_key(name);
        let enabled = config.services.get(name).map(|s| s.enabled).unwrap_or(false);

        let registry = self.registry.read().await;
        match registry.get(name) {
            Some(record) => Some(ServiceInfo {
                name: name.to_string(),
                configured,
                enabled,
                state: record.state,
                pid: record.pid,
                uptime: record.started_at.and_then(|t| t.elapsed().ok()),
                restarts: record.restarts,
                last_error: record.last_error.clone(),
            }),
            None if configured => Some(ServiceInfo {
                name: name.to_string(),
                configured,
                enabled,
                state: ServiceState::Stopped,
                pid: 0,
                uptime: None,
                restarts: 0,
                last_error: None,
            }),
            None => None,
        }
    }

    pub async fn get_all_services(&self) -> Vec<ServiceInfo> {
        let config = self.config.get().await;
        let mut names: Vec<String> = config.services.keys().cloned().collect();
        for name in self.registry.read().await.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        let mut infos = Vec::with_capacity(names.len());
        for name in names {
            if let Some(info) = self.get_service_info(&name).await {
                infos.push(info);
            }
        }
        infos
    }

    /// All currently-live (non-`Stopped`) service names.
    pub async fn live_services(&self) -> Vec<String> {
        self.registry
            .read()
            .await
            .iter()
            .filter(|(_, record)| record.state != ServiceState::Stopped)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Stop every currently-live service concurrently (used by shutdown
    /// fan-out, spec.md §4.4 "Parallel stop").
    pub async fn stop_all(self: &Arc<Self>) -> Vec<(String, OrchestratorResult<()>)> {
        let names = self.live_services().await;
        let futures = names.into_iter().map(|name| {
            let this = Arc::clone(self);
            async move {
                let result = this.stop(&name).await;
                (name, result)
            }
        });
        join_all(futures).await
    }

    /// Remove a service's entry entirely (used by config reconciliation
    /// once it has been stopped, spec.md §4.9 step 3).
    pub async fn forget(&self, name: &str) {
        self.registry.write().await.remove(name);
        self.bookkeeping.write().await.remove(name);
    }

    fn apply_transition(&self, record: &mut ServiceProcess, to: ServiceState) {
        if is_allowed_transition(record.state, to) {
            record.state = to;
        } else {
            svc_warn!(record.name, "rejected illegal transition {} -> {}", record.state, to);
        }
    }

    /// The Spawn procedure, spec.md §4.5, steps 1-10.
    async fn spawn(self: &Arc<Self>, name: &str) -> OrchestratorResult<()> {
        // Step 1.
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(OrchestratorError::ShuttingDown);
        }

        // Step 2.
        let config = self.config.get().await;
        let service_cfg = config
            .services
            .get(name)
            .ok_or_else(|| OrchestratorError::ServiceNotFound { name: name.to_string() })?
            .clone();

        // Step 3.
        let binary_path = if service_cfg.binary_path.as_os_str().is_empty() {
            config.orchestrator.services_dir.join(name).join(name)
        } else {
            service_cfg.binary_path.clone()
        };
        if !binary_path.is_file() {
            self.mark_failed(name, format!("binary not found: {}", binary_path.display()))
                .await;
            return Err(OrchestratorError::BinaryNotFound { path: binary_path });
        }

        let mut registry = self.registry.write().await;

        // Step 4.
        let next_restarts = match registry.get(name) {
            Some(existing) if existing.state == ServiceState::Running => return Ok(()),
            Some(existing) if existing.state == ServiceState::Restarting => existing.restarts + 1,
            Some(existing) => existing.restarts,
            None => 0,
        };
        if let Some(existing) = registry.get(name) {
            existing.stop_signal.close();
        }

        // Step 5.
        let mut args = vec![
            "--service".to_string(),
            name.to_string(),
            "--log-level".to_string(),
            config.orchestrator.log_level.to_string(),
        ];
        args.extend(service_cfg.args.iter().cloned());

        // Step 6.
        let mut cmd = self.executor.command(binary_path.clone(), args);
        cmd.set_output(OutputSink {
            service: name.to_string(),
            capture: true,
        });
        cmd.set_process_group(true);
        if !service_cfg.data_dir.as_os_str().is_empty() {
            cmd.set_dir(service_cfg.data_dir.clone());
        }
        cmd.set_env(build_environment(&service_cfg, &service_cfg.data_dir));

        // Step 7.
        let stop_signal = StopSignal::new();
        let mut record = ServiceProcess::new(name.to_string());
        record.state = ServiceState::Starting;
        record.restarts = next_restarts;
        record.stop_signal = stop_signal.clone();
        registry.insert(name.to_string(), record);

        let exited = Arc::new(Notify::new());
        self.bookkeeping.write().await.insert(
            name.to_string(),
            Bookkeeping {
                exited: exited.clone(),
            },
        );

        // Step 8.
        if let Err(e) = cmd.start().await {
            if let Some(record) = registry.get_mut(name) {
                self.apply_transition(record, ServiceState::Failed);
                record.last_error = Some(e.to_string());
            }
            return Err(OrchestratorError::SpawnFailed {
                name: name.to_string(),
                cause: e.to_string(),
            });
        }

        // Step 9.
        let pid = cmd.pid().unwrap_or(0);
        if let Some(record) = registry.get_mut(name) {
            record.pid = pid;
            record.started_at = Some(SystemTime::now());
        }

        drop(registry);
        svc_note!(name, "spawned (pid {})", pid);

        // Step 10. Ownership of `cmd` passes to the supervisor task; the
        // registry never holds it, so `stop()` only ever needs the pid.
        let spawner: Arc<dyn ProcessSpawner> = Arc::new(SpawnerHandle(Arc::clone(self)));
        tokio::spawn(supervisor::supervise(name.to_string(), cmd, spawner, stop_signal, exited));

        Ok(())
    }
}

#[async_trait]
impl ProcessSpawner for Arc<ServiceManager> {
    async fn respawn(&self, name: &str) -> OrchestratorResult<()> {
        ServiceManager::spawn(self, name).await
    }

    async fn mark_running(&self, name: &str) {
        let mut registry = self.registry.write().await;
        if let Some(record) = registry.get_mut(name) {
            self.apply_transition(record, ServiceState::Running);
        }
    }

    async fn mark_failed(&self, name: &str, error: String) {
        let mut registry = self.registry.write().await;
        match registry.get_mut(name) {
            Some(record) => {
                self.apply_transition(record, ServiceState::Failed);
                record.last_error = Some(error);
            }
            None => {
                // Pre-spawn failure (e.g. binary missing): there's no live
                // record yet, so create one directly in `Failed` rather than
                // transitioning one — `Status`/`GetServiceInfo` must report
                // `Failed`, not `Stopped`, for this case (spec.md §8).
                let mut record = ServiceProcess::new(name.to_string());
                record.state = ServiceState::Failed;
                record.last_error = Some(error);
                registry.insert(name.to_string(), record);
            }
        }
    }

    async fn mark_restarting(&self, name: &str, max_attempts: u32) -> bool {
        let mut registry = self.registry.write().await;
        let Some(record) = registry.get_mut(name) else {
            return false;
        };
        if record.restarts >= max_attempts {
            return false;
        }
        self.apply_transition(record, ServiceState::Restarting);
        true
    }

    async fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    async fn auto_restart_enabled(&self) -> bool {
        self.config.get().await.orchestrator.auto_restart
    }

    async fn restarts_for(&self, name: &str) -> u32 {
        self.registry.read().await.get(name).map(|r| r.restarts).unwrap_or(0)
    }
}

/// Newtype so `ProcessSpawner` can be implemented for the shared handle
/// without orphan-rule trouble and without every call site needing to
/// know the trait is implemented directly on `Arc<ServiceManager>`.
struct SpawnerHandle(Arc<ServiceManager>);

#[async_trait]
impl ProcessSpawner for SpawnerHandle {
    async fn respawn(&self, name: &str) -> OrchestratorResult<()> {
        self.0.respawn(name).await
    }
    async fn mark_running(&self, name: &str) {
        self.0.mark_running(name).await
    }
    async fn mark_failed(&self, name: &str, error: String) {
        self.0.mark_failed(name, error).await
    }
    async fn mark_restarting(&self, name: &str, max_attempts: u32) -> bool {
        self.0.mark_restarting(name, max_attempts).await
    }
    async fn is_shutting_down(&self) -> bool {
        self.0.is_shutting_down().await
    }
    async fn auto_restart_enabled(&self) -> bool {
        self.0.auto_restart_enabled().await
    }
    async fn restarts_for(&self, name: &str) -> u32 {
        self.0.restarts_for(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LogLevel, NodeConfig, OrchestratorConfig, ServiceConfig};
    use crate::executor::{ExitOutcome, MockCmd, MockProcessExecutor};
    use assert_matches::assert_matches;
    use std::collections::HashMap as Map;
    use std::time::Duration;

    fn config_with_service(name: &str, enabled: bool) -> OrchestratorConfig {
        let mut services = Map::new();
        services.insert(
            name.to_string(),
            ServiceConfig {
                enabled,
                binary_path: PathBuf::from("/bin/true"),
                data_dir: PathBuf::new(),
                args: vec![],
                environment: Map::new(),
                memory_limit: 0,
            },
        );
        OrchestratorConfig {
            orchestrator: NodeConfig {
                services_dir: PathBuf::from("/tmp"),
                log_level: LogLevel::Info,
                auto_restart: true,
                shutdown_timeout: 1,
            },
            services,
        }
    }

    fn manager_with(config: OrchestratorConfig, executor: MockProcessExecutor) -> Arc<ServiceManager> {
        ServiceManager::new(
            Arc::new(ConfigManager::new(config)),
            Arc::new(executor),
            Arc::new(AtomicBool::new(false)),
        )
    }

    fn long_lived_cmd(pid: u32) -> MockCmd {
        let mut cmd = MockCmd::new();
        cmd.expect_set_env().return_const(());
        cmd.expect_set_dir().return_const(());
        cmd.expect_set_process_group().return_const(());
        cmd.expect_set_output().return_const(());
        cmd.expect_start().returning(|| Box::pin(async { Ok(()) }));
        cmd.expect_pid().return_const(Some(pid));
        cmd.expect_signal().returning(|_| Ok(()));
        cmd.expect_wait().returning(|| {
            Box::pin(async {
                futures::future::pending::<()>().await;
                Ok(ExitOutcome { code: None, success: true })
            })
        });
        cmd
    }

    #[tokio::test]
    async fn start_unknown_service_is_an_error() {
        let manager = manager_with(config_with_service("alpha", true), MockProcessExecutor::new());
        let err = manager.start("ghost").await.unwrap_err();
        assert_matches!(err, OrchestratorError::ServiceNotFound { .. });
    }

    #[tokio::test]
    async fn start_disabled_service_is_a_noop() {
        let manager = manager_with(config_with_service("alpha", false), MockProcessExecutor::new());
        manager.start("alpha").await.unwrap();
        assert_eq!(manager.status("alpha").await, ServiceState::Stopped);
    }

    #[tokio::test]
    async fn start_missing_binary_transitions_to_failed() {
        let mut config = config_with_service("alpha", true);
        config.services.get_mut("alpha").unwrap().binary_path = PathBuf::from("/no/such/binary");
        let manager = manager_with(config, MockProcessExecutor::new());

        let err = manager.start("alpha").await.unwrap_err();
        assert_matches!(err, OrchestratorError::BinaryNotFound { .. });
        assert_eq!(manager.status("alpha").await, ServiceState::Failed);
    }

    #[tokio::test]
    async fn successful_spawn_reaches_running() {
        let mut executor = MockProcessExecutor::new();
        executor.expect_command().returning(|_, _| Box::new(long_lived_cmd(4242)));

        let manager = manager_with(config_with_service("alpha", true), executor);
        manager.start("alpha").await.unwrap();

        // Give the spawned supervisor a moment to transition Starting -> Running.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.status("alpha").await, ServiceState::Running);

        let info = manager.get_service_info("alpha").await.unwrap();
        assert_eq!(info.pid, 4242);
    }

    #[tokio::test]
    async fn start_on_running_service_is_a_noop() {
        let mut executor = MockProcessExecutor::new();
        executor.expect_command().returning(|_, _| Box::new(long_lived_cmd(1)));

        let manager = manager_with(config_with_service("alpha", true), executor);
        manager.start("alpha").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Second Start on a Running service must be a no-op success.
        manager.start("alpha").await.unwrap();
        assert_eq!(manager.status("alpha").await, ServiceState::Running);
    }

    #[tokio::test]
    async fn stop_unknown_service_is_an_error() {
        let manager = manager_with(config_with_service("alpha", true), MockProcessExecutor::new());
        let err = manager.stop("ghost").await.unwrap_err();
        assert_matches!(err, OrchestratorError::ServiceNotFound { .. });
    }

    #[tokio::test]
    async fn stop_on_stopped_service_is_a_noop() {
        // Simulate a previously-stopped record by starting then stopping it.
        let mut executor = MockProcessExecutor::new();
        executor.expect_command().returning(|_, _| Box::new(long_lived_cmd(7)));
        let manager = manager_with(config_with_service("alpha", true), executor);
        manager.start("alpha").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.stop("alpha").await.unwrap();
        assert_eq!(manager.status("alpha").await, ServiceState::Stopped);
        // Stopping again is a no-op success.
        manager.stop("alpha").await.unwrap();
    }
}
