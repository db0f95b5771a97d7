//! Core of the cfgstore configuration store.
//!
//! - [`value`]: the closed set of value kinds and their rendering
//! - [`setting`]: one typed setting with history and localized help
//! - [`map`]: named maps of settings and subsections
//! - [`registry`]: the (user, program) index and its persistence hooks
//! - [`trigger`]: debounced, coalescing flush scheduling
//! - [`snapshot`]: the on-disk snapshot format
//! - [`loader`]: declaration files that seed a program's map
//! - [`accounts`]: user ids and account-name presentation
//! - [`shell`]: `KEY=value` shell variable files edited in place

pub mod accounts;
pub mod error;
pub mod loader;
pub mod map;
pub mod registry;
pub mod setting;
pub mod shell;
pub mod snapshot;
pub mod trigger;
pub mod value;

pub use accounts::{describe_error, describe_user, AccountLookup, NoAccounts, PasswdAccounts, UserId};
pub use error::{LoadError, PersistError, RegistryError, ShellError, ValueError};
pub use map::{ConfigMap, Entry};
pub use registry::ConfigRegistry;
pub use setting::{Revision, Setting, SettingSnapshot, Stamp};
pub use shell::{CommentGroup, ShellConfig};
pub use snapshot::{RegistrySnapshot, SnapshotStore};
pub use trigger::{PersistenceTrigger, TriggerState, DEFAULT_SAVE_DELAY};
pub use value::{Complex, Kind, List, Value};
