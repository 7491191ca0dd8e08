//! Output Capture: line-buffered forwarding of a child's stdout/stderr into
//! structured log records (spec.md §4.6).

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;

use crate::svc_error;
use crate::svc_info;

/// Spawn the two per-command log pump tasks named in spec.md §5
/// ("per-command log pumps"). Each extracts newline-terminated lines from
/// its stream and emits one structured record per line; incomplete
/// trailing bytes stay buffered inside `BufReader::lines` until the next
/// read, matching the semantics spec.md §4.6 describes for the writer.
pub fn spawn_output_pumps(service: String, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        let name = service.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => svc_info!(name, "stdout", "{}", line),
                    Ok(None) => break,
                    Err(e) => {
                        svc_error!(name, "stdout", "output pump failed: {}", e);
                        break;
                    }
                }
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        let name = service.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => svc_error!(name, "stderr", "{}", line),
                    Ok(None) => break,
                    Err(e) => {
                        svc_error!(name, "stderr", "output pump failed: {}", e);
                        break;
                    }
                }
            }
        });
    }
}
