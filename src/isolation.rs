//! Isolation & Environment: the clean-environment construction and
//! process-group setup applied to every spawned command (spec.md §4.7).

use std::path::Path;

use crate::config::ServiceConfig;

/// The implementation-defined environment variable name used to surface
/// the memory limit to the child process (spec.md §9, open question,
/// decided in DESIGN.md).
pub const MEMORY_LIMIT_ENV_VAR: &str = "PROCESS_MEMLIMIT_MIB";

/// Build the clean environment for a service's command: `PATH` inherited,
/// `HOME` pinned to `data_dir`, `TEMP`/`TMP` pointing at the system temp
/// dir, `service.environment` merged on top, and the memory-limit variable
/// appended when configured. No other host environment variable leaks
/// through.
pub fn build_environment(service: &ServiceConfig, data_dir: &Path) -> Vec<(String, String)> {
    let mut env = Vec::new();

    if let Ok(path) = std::env::var("PATH") {
        env.push(("PATH".to_string(), path));
    }

    let home = data_dir.to_string_lossy().into_owned();
    env.push(("HOME".to_string(), home));

    let tmp = std::env::temp_dir().to_string_lossy().into_owned();
    env.push(("TEMP".to_string(), tmp.clone()));
    env.push(("TMP".to_string(), tmp));

    // service.environment merged on top; later entries win ties on lookup
    // since callers search from the end, so push last.
    for (key, value) in &service.environment {
        env.retain(|(k, _)| k != key);
        env.push((key.clone(), value.clone()));
    }

    if service.memory_limit > 0 {
        env.push((MEMORY_LIMIT_ENV_VAR.to_string(), format!("{}MiB", service.memory_limit)));
    }

    env
}
