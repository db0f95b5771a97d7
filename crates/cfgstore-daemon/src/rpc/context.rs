//! Shared state handed to every handler

use cfgstore_core::{AccountLookup, ConfigRegistry};
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct RpcContext {
    pub registry: Arc<ConfigRegistry>,
    pub accounts: Arc<dyn AccountLookup>,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl RpcContext {
    pub fn new(
        registry: Arc<ConfigRegistry>,
        accounts: Arc<dyn AccountLookup>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            registry,
            accounts,
            shutdown_tx,
        }
    }
}
