//! RPC parameter extraction macros
//!
//! They return early with an `INVALID_PARAMS` response when a parameter is
//! missing or has the wrong type, so handlers read top to bottom.

/// Extract a required string parameter as `&str`.
///
/// ```ignore
/// let program = require_str_param!(req, "program");
/// ```
#[macro_export]
macro_rules! require_str_param {
    ($req:expr, $name:literal) => {
        match $req.params.get($name).and_then(|v| v.as_str()) {
            Some(v) => v,
            None => {
                return ::cfgstore_protocol::Response::error(
                    $req.id.clone(),
                    ::cfgstore_protocol::INVALID_PARAMS,
                    concat!("Missing or invalid '", $name, "' parameter"),
                )
            }
        }
    };
}

/// Extract an optional string parameter as `Option<&str>`.
#[macro_export]
macro_rules! optional_str_param {
    ($req:expr, $name:literal) => {
        $req.params.get($name).and_then(|v| v.as_str())
    };
}

/// Extract a required i64 parameter.
#[macro_export]
macro_rules! require_i64_param {
    ($req:expr, $name:literal) => {
        match $req.params.get($name).and_then(|v| v.as_i64()) {
            Some(v) => v,
            None => {
                return ::cfgstore_protocol::Response::error(
                    $req.id.clone(),
                    ::cfgstore_protocol::INVALID_PARAMS,
                    concat!(
                        "Missing or invalid '",
                        $name,
                        "' parameter (expected integer)"
                    ),
                )
            }
        }
    };
}

/// Extract a required user id parameter as a `UserId`. `-1` is all users.
///
/// ```ignore
/// let user = require_user_param!(req, "user");
/// ```
#[macro_export]
macro_rules! require_user_param {
    ($req:expr, $name:literal) => {
        ::cfgstore_core::UserId($crate::require_i64_param!($req, $name))
    };
}

/// Extract a required parameter of any JSON shape as `&serde_json::Value`.
#[macro_export]
macro_rules! require_value_param {
    ($req:expr, $name:literal) => {
        match $req.params.get($name) {
            Some(v) => v,
            None => {
                return ::cfgstore_protocol::Response::error(
                    $req.id.clone(),
                    ::cfgstore_protocol::INVALID_PARAMS,
                    concat!("Missing '", $name, "' parameter"),
                )
            }
        }
    };
}

// Re-export macros for use in sibling modules via `use crate::rpc_helpers::*`
pub use crate::optional_str_param;
pub use crate::require_i64_param;
pub use crate::require_str_param;
pub use crate::require_user_param;
pub use crate::require_value_param;

#[cfg(test)]
mod tests {
    use cfgstore_protocol::{Request, RequestId, Response, INVALID_PARAMS};
    use serde_json::json;

    fn make_request(params: serde_json::Value) -> Request {
        Request {
            jsonrpc: "2.0".to_string(),
            id: Some(RequestId::Number(1)),
            method: "test".to_string(),
            params,
        }
    }

    fn extract_program(req: Request) -> Response {
        let value = require_str_param!(req, "program");
        Response::success(req.id.clone(), value)
    }

    fn extract_lang(req: Request) -> Response {
        let value = optional_str_param!(req, "lang");
        Response::success(req.id.clone(), value.unwrap_or("en"))
    }

    fn extract_user(req: Request) -> Response {
        let user = require_user_param!(req, "user");
        Response::success(req.id.clone(), user.0)
    }

    fn extract_value(req: Request) -> Response {
        let value = require_value_param!(req, "value");
        Response::success(req.id.clone(), value.clone())
    }

    fn error_code(resp: &Response) -> Option<i32> {
        resp.error.as_ref().map(|e| e.code)
    }

    #[test]
    fn require_str_param_success() {
        let resp = extract_program(make_request(json!({"program": "/bin/ls"})));
        assert_eq!(resp.result.unwrap(), "/bin/ls");
    }

    #[test]
    fn require_str_param_wrong_type() {
        let resp = extract_program(make_request(json!({"program": 7})));
        assert!(resp.result.is_none());
        let err = resp.error.unwrap();
        assert_eq!(err.code, INVALID_PARAMS);
        assert!(err.message.contains("program"));
    }

    #[test]
    fn optional_str_param_missing() {
        let resp = extract_lang(make_request(json!({})));
        assert_eq!(resp.result.unwrap(), "en");
    }

    #[test]
    fn require_user_param_all_users() {
        let resp = extract_user(make_request(json!({"user": -1})));
        assert_eq!(resp.result.unwrap(), -1);
    }

    #[test]
    fn require_user_param_missing() {
        let resp = extract_user(make_request(json!({"user": "root"})));
        assert_eq!(error_code(&resp), Some(INVALID_PARAMS));
    }

    #[test]
    fn require_value_param_any_shape() {
        let resp = extract_value(make_request(json!({"value": [1, 2]})));
        assert_eq!(resp.result.unwrap(), json!([1, 2]));

        let resp = extract_value(make_request(json!({"value": null})));
        assert_eq!(resp.result.unwrap(), json!(null));

        let resp = extract_value(make_request(json!({})));
        assert_eq!(error_code(&resp), Some(INVALID_PARAMS));
    }
}
