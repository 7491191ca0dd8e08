//! Tiny real shell-script "services" used by the end-to-end scenarios in
//! spec.md §8. Each lives at `<dir>/<name>/<name>` so it satisfies the
//! Service Discoverer's and Spawn procedure's default-path layout.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let svc_dir = dir.join(name);
    fs::create_dir_all(&svc_dir).unwrap();
    let bin = svc_dir.join(name);
    fs::write(&bin, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = fs::metadata(&bin).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&bin, perms).unwrap();
    bin
}

/// Traps SIGTERM and exits cleanly; otherwise sleeps far longer than any
/// test's patience, so an un-terminated run would hang the test.
pub fn trap_and_exit(dir: &Path, name: &str) -> PathBuf {
    write_script(
        dir,
        name,
        "trap 'exit 0' TERM\nsleep 30 &\nwait $!\n",
    )
}

/// Exits with code 1 shortly after starting.
pub fn crash_after(dir: &Path, name: &str, millis: u64) -> PathBuf {
    write_script(dir, name, &format!("sleep {}\nexit 1\n", millis as f64 / 1000.0))
}

/// Exits with code 1 immediately, every time it is spawned.
pub fn crash_immediately(dir: &Path, name: &str) -> PathBuf {
    write_script(dir, name, "exit 1\n")
}

/// Ignores SIGTERM outright; only SIGKILL can end it.
pub fn ignores_sigterm(dir: &Path, name: &str) -> PathBuf {
    write_script(dir, name, "trap '' TERM\nsleep 30\n")
}
