//! Process orchestrator: supervises a directory of service binaries as
//! long-running child processes, restarting them on unexpected exit and
//! reconciling against a live-reloadable YAML configuration.

pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod isolation;
pub mod logging;
pub mod manager;
pub mod orchestrator;
pub mod output;
pub mod process;
pub mod supervisor;

pub use config::{ConfigManager, OrchestratorConfig};
pub use error::{OrchestratorError, OrchestratorResult};
pub use orchestrator::{Orchestrator, ShutdownReport};
pub use process::{ServiceInfo, ServiceState};
