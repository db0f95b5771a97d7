//! JSON-RPC 2.0 envelopes exchanged with `cfgstored`, one object per line.
//!
//! Methods are `ping`, `shutdown` and the `config.*` family. Registry
//! failures travel as application error codes whose `data` names the user,
//! program or key the call was about.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Clients may number their calls or tag them with strings; the daemon
/// echoes whichever it got.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

/// A call such as `config.get` with `{"user", "program", "key"}` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(RequestId::Number(id)),
            method: method.into(),
            params,
        }
    }
}

/// Exactly one of `result` and `error` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    pub fn success(id: Option<RequestId>, result: impl Into<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result.into()),
            error: None,
        }
    }

    pub fn error(id: Option<RequestId>, code: i32, message: impl Into<String>) -> Self {
        Self::error_with_data(id, code, message, None)
    }

    pub fn error_with_data(
        id: Option<RequestId>,
        code: i32,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data,
            }),
        }
    }

    /// Serialize as one newline-terminated line of the wire stream.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }
}

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// `config.add` or `config.load` for a (user, program) pair that already
/// has a map. `data` is `{"user", "program"}`.
pub const ALREADY_REGISTERED: i32 = -32001;
/// No map is registered for the (user, program) pair. `data` is
/// `{"user", "program"}`.
pub const UNKNOWN_CONFIG: i32 = -32002;
/// The program's map has no setting at the dotted key. `data` is
/// `{"program", "key"}`.
pub const UNKNOWN_KEY: i32 = -32003;
/// A declaration file could not be read, parsed or converted. The message
/// carries the file and position.
pub const LOAD_FAILED: i32 = -32004;
