//! Mapping of library errors onto JSON-RPC error responses

use cfgstore_core::{describe_error, AccountLookup, LoadError, RegistryError, ValueError};
use cfgstore_protocol::{
    RequestId, Response, ALREADY_REGISTERED, INTERNAL_ERROR, INVALID_PARAMS, LOAD_FAILED,
    UNKNOWN_CONFIG, UNKNOWN_KEY,
};
use serde_json::json;
use tracing::{debug, error};

/// The message names the account when `accounts` resolves it; `data`
/// carries the raw ids.
pub fn registry_error(
    id: Option<RequestId>,
    err: &RegistryError,
    accounts: &dyn AccountLookup,
) -> Response {
    debug!(error = %err, "Registry rejected request");
    let message = describe_error(err, accounts);
    let (code, data) = match err {
        RegistryError::AlreadyRegistered { user, program } => (
            ALREADY_REGISTERED,
            json!({"user": user, "program": program}),
        ),
        RegistryError::UnknownConfig { user, program } => {
            (UNKNOWN_CONFIG, json!({"user": user, "program": program}))
        }
        RegistryError::UnknownKey { program, key } => {
            (UNKNOWN_KEY, json!({"program": program, "key": key}))
        }
    };
    Response::error_with_data(id, code, message, Some(data))
}

pub fn value_error(id: Option<RequestId>, err: &ValueError) -> Response {
    debug!(error = %err, "Rejected value");
    Response::error(id, INVALID_PARAMS, err.to_string())
}

pub fn load_error(id: Option<RequestId>, err: &LoadError) -> Response {
    debug!(error = %err, "Declaration file rejected");
    Response::error(id, LOAD_FAILED, err.to_string())
}

/// Log internal error details and return a generic error message.
pub fn internal_error(id: Option<RequestId>, err: impl std::fmt::Display) -> Response {
    error!("Internal error: {}", err);
    Response::error(id, INTERNAL_ERROR, "Internal server error")
}
