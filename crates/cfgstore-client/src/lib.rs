//! Client library for the cfgstore daemon
//!
//! Speaks the line-delimited JSON-RPC protocol over the Unix socket or TCP.

mod client;

pub use cfgstore_protocol::{ConfigPayload, ConfigView, RevisionView};
pub use client::{DaemonClient, KeyPath, RemoteError};
