//! Where `cfgstored` and its clients meet on the local machine.

use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the socket location, read by both the
/// daemon's default config and the client.
pub const SOCKET_ENV: &str = "CFGSTORE_SOCKET";

/// Default socket of `cfgstored`.
///
/// Priority:
/// 1. `CFGSTORE_SOCKET` environment variable (if set)
/// 2. `$XDG_RUNTIME_DIR/cfgstore.sock` (if XDG_RUNTIME_DIR is set)
/// 3. `/tmp/cfgstore.sock` (fallback)
pub fn socket_path() -> PathBuf {
    if let Ok(path) = std::env::var(SOCKET_ENV) {
        return PathBuf::from(path);
    }
    dirs::runtime_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("cfgstore.sock")
}

/// Drop the socket file `cfgstored` bound once the server stops. A missing
/// file is not an error.
pub fn remove_socket(path: &Path) {
    let _ = fs::remove_file(path);
}
