//! One handler per RPC method.

use crate::rpc::error::{internal_error, load_error, registry_error, value_error};
use crate::rpc::RpcContext;
use crate::rpc_helpers::{
    optional_str_param, require_i64_param, require_str_param, require_user_param,
    require_value_param,
};
use cfgstore_core::{loader, ConfigMap, Kind, RegistryError, Setting, UserId, Value};
use cfgstore_protocol::{ConfigPayload, ConfigView, Request, Response, RevisionView, INVALID_PARAMS};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

pub async fn handle_ping(req: Request, ctx: &RpcContext) -> Response {
    Response::success(req.id, ctx.registry.ping())
}

pub async fn handle_add(req: Request, ctx: &RpcContext) -> Response {
    let user = require_user_param!(req, "user");
    let program = require_str_param!(req, "program");
    let raw = require_value_param!(req, "config");

    let payload: ConfigPayload = match serde_json::from_value(raw.clone()) {
        Ok(payload) => payload,
        Err(e) => {
            return Response::error(
                req.id,
                INVALID_PARAMS,
                format!("Invalid 'config' parameter: {}", e),
            )
        }
    };
    let map = match payload.into_map(program, true, user) {
        Ok(map) => map,
        Err(e) => return Response::error(req.id, INVALID_PARAMS, e.to_string()),
    };

    match ctx.registry.add(user, program, map) {
        Ok(_) => Response::success(req.id, serde_json::Value::Null),
        Err(e) => registry_error(req.id, &e, ctx.accounts.as_ref()),
    }
}

pub async fn handle_get(req: Request, ctx: &RpcContext) -> Response {
    let user = require_user_param!(req, "user");
    let program = require_str_param!(req, "program");

    match ctx.registry.get(user, program) {
        Ok(map) => match serde_json::to_value(ConfigView::of(&map)) {
            Ok(view) => Response::success(req.id, view),
            Err(e) => internal_error(req.id, e),
        },
        Err(e) => registry_error(req.id, &e, ctx.accounts.as_ref()),
    }
}

pub async fn handle_save(req: Request, ctx: &RpcContext) -> Response {
    ctx.registry.save();
    Response::success(req.id, serde_json::Value::Null)
}

pub async fn handle_set(req: Request, ctx: &RpcContext) -> Response {
    let author = UserId(require_i64_param!(req, "author"));
    let raw = require_value_param!(req, "value");
    let kind = match req.params.get("kind") {
        None => None,
        Some(kind) => match serde_json::from_value::<Kind>(kind.clone()) {
            Ok(kind) => Some(kind),
            Err(_) => {
                return Response::error(
                    req.id,
                    INVALID_PARAMS,
                    format!("Unknown kind: {}", kind),
                )
            }
        },
    };
    let setting = match lookup_setting(&req, ctx) {
        Ok(setting) => setting,
        Err(resp) => return resp,
    };

    let value = match Value::from_json(kind.unwrap_or(setting.kind()), raw) {
        Ok(value) => value,
        Err(e) => return value_error(req.id, &e),
    };
    match setting.set(value, author) {
        Ok(()) => Response::success(req.id, serde_json::Value::Null),
        Err(e) => value_error(req.id, &e),
    }
}

pub async fn handle_set_version(req: Request, ctx: &RpcContext) -> Response {
    let version = require_str_param!(req, "version");
    let map = match lookup_map(&req, ctx) {
        Ok(map) => map,
        Err(resp) => return resp,
    };
    map.set_version(version);
    Response::success(req.id, serde_json::Value::Null)
}

pub async fn handle_history(req: Request, ctx: &RpcContext) -> Response {
    let setting = match lookup_setting(&req, ctx) {
        Ok(setting) => setting,
        Err(resp) => return resp,
    };
    let history: Vec<RevisionView> = setting.history().iter().map(RevisionView::from).collect();
    match serde_json::to_value(history) {
        Ok(history) => Response::success(req.id, history),
        Err(e) => internal_error(req.id, e),
    }
}

pub async fn handle_help(req: Request, ctx: &RpcContext) -> Response {
    let lang = optional_str_param!(req, "lang").unwrap_or_default();
    let setting = match lookup_setting(&req, ctx) {
        Ok(setting) => setting,
        Err(resp) => return resp,
    };
    Response::success(
        req.id.clone(),
        setting.help(lang, ctx.registry.default_lang()),
    )
}

pub async fn handle_set_help(req: Request, ctx: &RpcContext) -> Response {
    let lang = require_str_param!(req, "lang");
    let text = require_str_param!(req, "text");
    let setting = match lookup_setting(&req, ctx) {
        Ok(setting) => setting,
        Err(resp) => return resp,
    };
    setting.set_help(lang, text);
    Response::success(req.id.clone(), serde_json::Value::Null)
}

/// Register a program's configuration from a declaration file on the
/// daemon's filesystem.
pub async fn handle_load(req: Request, ctx: &RpcContext) -> Response {
    let user = require_user_param!(req, "user");
    let program = require_str_param!(req, "program").to_string();
    let file = require_str_param!(req, "file").to_string();

    let lang = ctx.registry.default_lang().to_string();
    let name = program.clone();
    let loaded =
        tokio::task::spawn_blocking(move || loader::load_map(&file, &name, user, &lang)).await;
    let map = match loaded {
        Ok(Ok(map)) => map,
        Ok(Err(e)) => return load_error(req.id, &e),
        Err(e) => return internal_error(req.id, e),
    };

    let mut keys = map.keys();
    keys.sort();
    match ctx.registry.add(user, program.as_str(), map) {
        Ok(_) => {
            info!(%user, program = %program, keys = keys.len(), "Declarations loaded");
            Response::success(req.id, json!({ "keys": keys }))
        }
        Err(e) => registry_error(req.id, &e, ctx.accounts.as_ref()),
    }
}

pub async fn handle_list(req: Request, ctx: &RpcContext) -> Response {
    let user = require_user_param!(req, "user");
    Response::success(req.id, ctx.registry.programs(user))
}

pub async fn handle_shutdown(req: Request, ctx: &RpcContext) -> Response {
    info!("Shutdown requested over RPC");
    let _ = ctx.shutdown_tx.send(());
    Response::success(req.id, "ok")
}

fn lookup_map(req: &Request, ctx: &RpcContext) -> Result<Arc<ConfigMap>, Response> {
    let user = UserId(require_lookup_i64(req, "user")?);
    let program = require_lookup_str(req, "program")?;
    ctx.registry
        .get(user, program)
        .map_err(|e| registry_error(req.id.clone(), &e, ctx.accounts.as_ref()))
}

/// Resolve `key` inside the optional `section` path of the addressed map.
fn lookup_setting(req: &Request, ctx: &RpcContext) -> Result<Arc<Setting>, Response> {
    let map = lookup_map(req, ctx)?;
    let program = require_lookup_str(req, "program")?;
    let key = require_lookup_str(req, "key")?;
    let path = section_path(req)?;

    let unknown = |key: &str| {
        let err = RegistryError::UnknownKey {
            program: program.to_string(),
            key: key.to_string(),
        };
        registry_error(req.id.clone(), &err, ctx.accounts.as_ref())
    };

    let mut current = map;
    for section in &path {
        current = current.subsection(section).ok_or_else(|| unknown(section))?;
    }
    debug!(key, depth = path.len(), "Resolved setting");
    current.setting(key).ok_or_else(|| unknown(key))
}

fn section_path(req: &Request) -> Result<Vec<String>, Response> {
    match req.params.get("section") {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(path) => serde_json::from_value(path.clone()).map_err(|_| {
            Response::error(
                req.id.clone(),
                INVALID_PARAMS,
                "Invalid 'section' parameter (expected array of strings)",
            )
        }),
    }
}

fn require_lookup_str<'a>(req: &'a Request, name: &str) -> Result<&'a str, Response> {
    req.params.get(name).and_then(|v| v.as_str()).ok_or_else(|| {
        Response::error(
            req.id.clone(),
            INVALID_PARAMS,
            format!("Missing or invalid '{}' parameter", name),
        )
    })
}

fn require_lookup_i64(req: &Request, name: &str) -> Result<i64, Response> {
    req.params.get(name).and_then(|v| v.as_i64()).ok_or_else(|| {
        Response::error(
            req.id.clone(),
            INVALID_PARAMS,
            format!("Missing or invalid '{}' parameter (expected integer)", name),
        )
    })
}
