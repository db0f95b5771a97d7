//! PID file handling

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// Default PID file location
pub fn pid_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("cfgstored.pid")
}

pub fn write_pid_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, std::process::id().to_string())?;
    Ok(())
}

pub fn remove_pid_file(path: &Path) {
    let _ = fs::remove_file(path);
}

/// Whether the PID recorded in `path` names a live process (Linux only).
pub fn is_daemon_running_at(path: &Path) -> bool {
    fs::read_to_string(path)
        .ok()
        .and_then(|contents| contents.trim().parse::<u32>().ok())
        .is_some_and(|pid| Path::new(&format!("/proc/{}", pid)).exists())
}
