//! Process Executor: abstraction over OS process creation and signaling,
//! so the Supervisor and Service Manager are testable without fork/exec
//! (spec.md §4.3).

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tokio::process::{Child, Command as TokioCommand};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::output::spawn_output_pumps;

/// Outcome of a completed child process, independent of platform exit-status
/// representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: Option<i32>,
    pub success: bool,
}

/// Which streams to capture and where the per-line log records should be
/// tagged (spec.md §4.6). `capture = false` means "inherit the parent's
/// stream" instead of line-buffering it.
#[derive(Debug, Clone)]
pub struct OutputSink {
    pub service: String,
    pub capture: bool,
}

/// Creates `Cmd` handles. The default implementation wraps
/// `tokio::process::Command`; tests drive a `MockProcessExecutor` instead.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessExecutor: Send + Sync {
    fn command(&self, path: PathBuf, args: Vec<String>) -> Box<dyn Cmd>;
}

/// A single not-yet-started (or running) child process.
#[async_trait]
pub trait Cmd: Send {
    fn set_env(&mut self, vars: Vec<(String, String)>);
    fn set_dir(&mut self, dir: PathBuf);
    fn set_process_group(&mut self, enable: bool);
    fn set_output(&mut self, sink: OutputSink);

    async fn start(&mut self) -> OrchestratorResult<()>;
    async fn wait(&mut self) -> OrchestratorResult<ExitOutcome>;

    /// Deliver `sig` to the process group headed by this child, per
    /// spec.md §4.3 ("Signal delivery must target the process group").
    fn signal(&self, sig: Signal) -> OrchestratorResult<()>;

    fn pid(&self) -> Option<u32>;
}

/// Deliver `sig` to the process group headed by `pid` (spec.md §4.3,
/// "Signal delivery must target the process group"). Exposed standalone
/// so callers that only know a pid (e.g. `ServiceManager::stop`, after the
/// `Cmd` handle has been handed off to the supervisor) don't need to hold
/// the `Cmd` itself.
pub fn send_signal(pid: u32, sig: Signal) -> OrchestratorResult<()> {
    nix::sys::signal::kill(Pid::from_raw(-(pid as i32)), sig).map_err(|e| OrchestratorError::StopFailed {
        name: pid.to_string(),
        stage: format!("signal {sig:?}: {e}"),
    })
}

/// Default OS-backed executor.
#[derive(Default)]
pub struct TokioProcessExecutor;

impl TokioProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessExecutor for TokioProcessExecutor {
    fn command(&self, path: PathBuf, args: Vec<String>) -> Box<dyn Cmd> {
        Box::new(TokioCmd::new(path, args))
    }
}

pub struct TokioCmd {
    path: PathBuf,
    args: Vec<String>,
    env: Vec<(String, String)>,
    dir: Option<PathBuf>,
    process_group: bool,
    output: Option<OutputSink>,
    child: Option<Child>,
    pid: Option<u32>,
}

impl TokioCmd {
    fn new(path: PathBuf, args: Vec<String>) -> Self {
        Self {
            path,
            args,
            env: Vec::new(),
            dir: None,
            process_group: false,
            output: None,
            child: None,
            pid: None,
        }
    }
}

#[async_trait]
impl Cmd for TokioCmd {
    fn set_env(&mut self, vars: Vec<(String, String)>) {
        self.env = vars;
    }

    fn set_dir(&mut self, dir: PathBuf) {
        self.dir = Some(dir);
    }

    fn set_process_group(&mut self, enable: bool) {
        self.process_group = enable;
    }

    fn set_output(&mut self, sink: OutputSink) {
        self.output = Some(sink);
    }

    async fn start(&mut self) -> OrchestratorResult<()> {
        let mut cmd = TokioCommand::new(&self.path);
        cmd.args(&self.args);
        cmd.env_clear();
        cmd.envs(self.env.iter().cloned());
        if let Some(dir) = &self.dir {
            if !dir.as_os_str().is_empty() {
                cmd.current_dir(dir);
            }
        }

        let capture = self.output.as_ref().map(|s| s.capture).unwrap_or(false);
        if capture {
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
        } else {
            cmd.stdout(Stdio::inherit());
            cmd.stderr(Stdio::inherit());
        }
        cmd.stdin(Stdio::null());

        // Put the child in its own process group so a single signal to
        // `-pid` reaches every descendant it forks (spec.md §4.7).
        if self.process_group {
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|e| OrchestratorError::SpawnFailed {
            name: self.path.display().to_string(),
            cause: e.to_string(),
        })?;

        self.pid = child.id();

        if capture {
            if let Some(sink) = &self.output {
                spawn_output_pumps(sink.service.clone(), &mut child);
            }
        }

        self.child = Some(child);
        Ok(())
    }

    async fn wait(&mut self) -> OrchestratorResult<ExitOutcome> {
        let child = self
            .child
            .as_mut()
            .expect("wait() called before start() succeeded");
        let status = child.wait().await?;
        Ok(ExitOutcome {
            code: status.code(),
            success: status.success(),
        })
    }

    fn signal(&self, sig: Signal) -> OrchestratorResult<()> {
        let pid = self.pid.ok_or_else(|| OrchestratorError::StopFailed {
            name: self.path.display().to_string(),
            stage: "signal (no pid)".to_string(),
        })?;
        send_signal(pid, sig)
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

#[cfg(test)]
mockall::mock! {
    pub Cmd {}

    #[async_trait]
    impl Cmd for Cmd {
        fn set_env(&mut self, vars: Vec<(String, String)>);
        fn set_dir(&mut self, dir: PathBuf);
        fn set_process_group(&mut self, enable: bool);
        fn set_output(&mut self, sink: OutputSink);
        async fn start(&mut self) -> OrchestratorResult<()>;
        async fn wait(&mut self) -> OrchestratorResult<ExitOutcome>;
        fn signal(&self, sig: Signal) -> OrchestratorResult<()>;
        fn pid(&self) -> Option<u32>;
    }
}
