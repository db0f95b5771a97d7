//! cfgstore daemon
//!
//! Library for running the configuration store server: config file and
//! flags, RPC dispatch, listeners and process lifecycle.

pub mod cli;
pub mod config;
pub mod handlers;
pub mod lifecycle;
pub mod rpc;
pub mod rpc_helpers;
pub mod server;

pub use cli::{Cli, LogLevel};
pub use config::{ConfigError, DaemonConfig, TcpConfig, UnixConfig};
pub use lifecycle::{is_daemon_running_at, pid_path, remove_pid_file, write_pid_file};
pub use rpc::{RpcContext, RpcDispatcher};
pub use server::Server;

use anyhow::Result;
use cfgstore_core::{
    AccountLookup, ConfigRegistry, NoAccounts, PasswdAccounts, PersistenceTrigger, SnapshotStore,
};
use std::sync::Arc;
use tracing::info;

/// Build the registry described by `config`, restoring the last snapshot
/// and wiring persistence to the data file.
pub async fn open_registry(config: &DaemonConfig) -> Result<Arc<ConfigRegistry>> {
    let trigger = PersistenceTrigger::new(config.save_delay());
    let registry = Arc::new(ConfigRegistry::new(trigger, config.default_lang.clone()));
    let store = SnapshotStore::new(&config.data_file);
    if let Some(snapshot) = store.load().await? {
        registry.restore(snapshot)?;
    }
    info!(data_file = %config.data_file.display(), "Persistence enabled");
    registry.enable_persistence(store);
    Ok(registry)
}

pub fn account_lookup(config: &DaemonConfig) -> Arc<dyn AccountLookup> {
    match &config.passwd {
        Some(path) => Arc::new(PasswdAccounts::new(path)),
        None => Arc::new(NoAccounts),
    }
}
