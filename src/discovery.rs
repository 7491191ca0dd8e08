//! Service Discoverer: walks the services directory once per request and
//! reports which top-level entries look like runnable service binaries.

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::OrchestratorResult;

pub struct ServiceDiscoverer {
    services_dir: PathBuf,
}

impl ServiceDiscoverer {
    pub fn new(services_dir: impl Into<PathBuf>) -> Self {
        Self {
            services_dir: services_dir.into(),
        }
    }

    /// Mapping from service name to absolute binary path. A directory
    /// entry qualifies iff `<services_dir>/<name>/<name>` exists, is not a
    /// directory, and has any executable bit set (spec.md §4.2). Honors
    /// `cancel` between entries, returning whatever was found so far.
    pub async fn discover(&self, cancel: &CancellationToken) -> OrchestratorResult<HashMap<String, PathBuf>> {
        let dir = self.services_dir.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || Self::discover_blocking(&dir, &cancel))
            .await
            .expect("discovery blocking task panicked")
    }

    fn discover_blocking(services_dir: &Path, cancel: &CancellationToken) -> OrchestratorResult<HashMap<String, PathBuf>> {
        let mut found = HashMap::new();

        let entries = fs::read_dir(services_dir)?;
        for entry in entries {
            if cancel.is_cancelled() {
                debug!("service discovery cancelled; returning {} entries found so far", found.len());
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("skipping unreadable services_dir entry: {e}");
                    continue;
                }
            };

            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(e) => {
                    debug!("skipping entry {:?}, failed to stat: {e}", entry.path());
                    continue;
                }
            };
            if !file_type.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            let candidate = entry.path().join(&name);

            match fs::metadata(&candidate) {
                Ok(meta) if meta.is_file() && is_executable(&meta) => {
                    found.insert(name, candidate);
                }
                Ok(_) => {
                    debug!("candidate {:?} exists but is not an executable file", candidate);
                }
                Err(e) => {
                    debug!("candidate {:?} not usable: {e}", candidate);
                }
            }
        }

        Ok(found)
    }
}

fn is_executable(meta: &fs::Metadata) -> bool {
    meta.permissions().mode() & 0o111 != 0
}
