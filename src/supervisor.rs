//! Supervisor: the per-process lifecycle loop that owns a single `Cmd`
//! handle end to end (spec.md §4.8).

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{oneshot, Notify};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::executor::{Cmd, ExitOutcome};
use crate::manager::{ProcessSpawner, MAX_RESTART_ATTEMPTS};
use crate::process::StopSignal;
use crate::{svc_note, svc_warn};

/// Base and cap for the exponential backoff between restart attempts
/// (spec.md §4.8: "min(1s * 2^restarts, 30s), plus up to 10% jitter").
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Runs for the entire lifetime of one spawned process: transitions it to
/// `Running`, races its exit against `stop_signal`, and on an unexpected
/// exit either schedules a backed-off restart or gives up once the
/// restart cap is reached. Spec.md §4.8, steps 1-8.
pub async fn supervise(
    name: String,
    mut cmd: Box<dyn Cmd>,
    spawner: Arc<dyn ProcessSpawner>,
    stop_signal: StopSignal,
    exited: Arc<Notify>,
) {
    spawner.mark_running(&name).await;
    svc_note!(name, "running");

    // The waiter task is the sole owner of `cmd` from here on, so it keeps
    // running to its natural completion even if the select below picks
    // the `stop_signal` branch first; `stop()` depends on `exited` firing
    // regardless of which branch wins the race.
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let outcome = cmd.wait().await;
        exited.notify_waiters();
        let _ = tx.send(outcome);
    });

    tokio::select! {
        biased;
        _ = stop_signal.notified() => {
            svc_note!(name, "stop requested; handing shutdown to the stopper");
        }
        outcome = rx => {
            match outcome {
                Ok(result) => handle_exit(&name, result, &spawner, &stop_signal).await,
                Err(_) => svc_warn!(name, "waiter task dropped before reporting an outcome"),
            }
        }
    }
}

async fn handle_exit(
    name: &str,
    result: OrchestratorResult<ExitOutcome>,
    spawner: &Arc<dyn ProcessSpawner>,
    stop_signal: &StopSignal,
) {
    // Step 4: a shutdown already in flight owns this exit — no Failed
    // transition, no restart, just note it and return.
    if spawner.is_shutting_down().await {
        svc_note!(name, "exited during orchestrator shutdown");
        return;
    }

    // Step 5.
    let error = match result {
        Ok(outcome) => {
            svc_warn!(name, "exited unexpectedly (code {:?})", outcome.code);
            format!("exited with code {:?}", outcome.code)
        }
        Err(e) => {
            svc_warn!(name, "wait failed: {}", e);
            e.to_string()
        }
    };
    spawner.mark_failed(name, error).await;

    // Step 6, plus a guard against racing a just-requested Stop.
    if stop_signal.is_closed() || !spawner.auto_restart_enabled().await {
        return;
    }

    // Step 7.
    if !spawner.mark_restarting(name, MAX_RESTART_ATTEMPTS).await {
        let exhausted = OrchestratorError::BackoffExhausted {
            name: name.to_string(),
            restarts: spawner.restarts_for(name).await,
        };
        svc_warn!(name, "{}", exhausted);
        return;
    }

    // Step 8.
    let attempt = spawner.restarts_for(name).await;
    let delay = backoff_delay(attempt);
    svc_note!(name, "restarting in {:?} (attempt {})", delay, attempt + 1);

    tokio::select! {
        biased;
        _ = stop_signal.notified() => {
            svc_note!(name, "stop requested during backoff; not restarting");
        }
        _ = tokio::time::sleep(delay) => {
            if let Err(e) = spawner.respawn(name).await {
                svc_warn!(name, "restart attempt failed: {}", e);
            }
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let base = exp.min(BACKOFF_CAP);

    let jitter_frac = rand::thread_rng().gen_range(-0.1..=0.1);
    let jittered_nanos = (base.as_nanos() as f64) * (1.0 + jitter_frac);
    Duration::from_nanos(jittered_nanos.max(0.0) as u64)
}
