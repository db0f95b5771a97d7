//! Error types for the configuration store.

use crate::accounts::UserId;
use crate::value::Kind;
use thiserror::Error;

/// A value did not fit the kind it was meant for.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    #[error("kind mismatch: setting holds {expected}, got {actual}")]
    KindMismatch { expected: Kind, actual: Kind },

    #[error("invalid {kind} value: {reason}")]
    Invalid { kind: Kind, reason: String },
}

/// Failures of registry lookups and registrations.
///
/// The error carries raw ids only. Use [`crate::accounts::describe_error`]
/// to render it with account names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("{user} already has program: {program}")]
    AlreadyRegistered { user: UserId, program: String },

    #[error("{user} has no program: {program}")]
    UnknownConfig { user: UserId, program: String },

    #[error("program {program} has no key: {key}")]
    UnknownKey { program: String, key: String },
}

/// Failures of the declaration loader.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read {origin}: {source}")]
    Io {
        origin: String,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration in {origin} is not valid: {line}:{column}: {message}")]
    Parse {
        origin: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("variable {name:?} has no documentation in {origin}")]
    MissingDoc { origin: String, name: String },

    #[error("expression not valid for variable {name:?} in {origin}")]
    UnsupportedExpr { origin: String, name: String },

    #[error("variable {name:?} in {origin}: {source}")]
    Value {
        origin: String,
        name: String,
        #[source]
        source: ValueError,
    },
}

/// Failures while writing or reading a registry snapshot.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a snapshot file: bad header")]
    BadHeader,

    #[error("unsupported snapshot format version {0}")]
    UnsupportedVersion(u8),

    #[error("snapshot kind mask has unknown bits: {0:#x}")]
    UnknownKinds(u32),

    #[error("failed to encode snapshot: {0}")]
    Encode(String),

    #[error("failed to decode snapshot: {0}")]
    Decode(String),

    #[error("snapshot is inconsistent: {0}")]
    Corrupt(String),
}

/// Failures of shell variable files.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line} is not a key=value assignment")]
    Syntax { line: usize },

    #[error("key not found: {0}")]
    UnknownKey(String),

    #[error("value of {key} is not a valid {expected}: {value:?}")]
    Invalid {
        key: String,
        expected: &'static str,
        value: String,
    },
}
