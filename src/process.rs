//! The live record of a supervised process and the state machine that
//! governs its transitions (spec.md §3, §4.4).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::Notify;

/// spec.md §4.4 state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Failed,
    Restarting,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Failed => "failed",
            ServiceState::Restarting => "restarting",
        };
        f.write_str(s)
    }
}

/// Allowed transitions from spec.md §4.4's table. Transitions not listed
/// here must be rejected (logged at warn, not applied).
pub fn is_allowed_transition(from: ServiceState, to: ServiceState) -> bool {
    use ServiceState::*;
    matches!(
        (from, to),
        (Stopped, Starting)
            | (Starting, Running)
            | (Starting, Failed)
            | (Running, Stopped)
            | (Running, Failed)
            | (Failed, Restarting)
            | (Restarting, Starting)
            | (Failed, Stopped)
            | (_, Stopped) // "any -> Stopped" on orchestrator shutdown
    )
}

/// One-shot cancellation token shared between a stopper and its
/// supervisor (spec.md §3 "stop_signal", §4.4). Closing it twice is a
/// no-op, matching the idempotence law in spec.md §8.
#[derive(Clone)]
pub struct StopSignal {
    notify: Arc<Notify>,
    fired: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Close the signal. Safe to call more than once; only the first call
    /// has any effect.
    pub fn close(&self) {
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Resolves immediately if already closed; otherwise waits for `close`.
    pub async fn notified(&self) {
        if self.is_closed() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// The live record of a supervised process (spec.md §3 "ServiceProcess").
pub struct ServiceProcess {
    pub name: String,
    pub pid: u32,
    pub state: ServiceState,
    pub started_at: Option<SystemTime>,
    pub restarts: u32,
    pub last_error: Option<String>,
    pub stop_signal: StopSignal,
}

impl ServiceProcess {
    pub fn new(name: String) -> Self {
        Self {
            name,
            pid: 0,
            state: ServiceState::Stopped,
            started_at: None,
            restarts: 0,
            last_error: None,
            stop_signal: StopSignal::new(),
        }
    }
}

/// Deep-copied, lock-free snapshot returned by `GetServiceInfo`/
/// `GetAllServices` (spec.md §4.4, §5 "shared-resource policy").
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub name: String,
    pub configured: bool,
    pub enabled: bool,
    pub state: ServiceState,
    pub pid: u32,
    pub uptime: Option<std::time::Duration>,
    pub restarts: u32,
    pub last_error: Option<String>,
}
