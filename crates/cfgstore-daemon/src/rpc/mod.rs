//! Request routing

mod context;
pub mod error;

pub use context::RpcContext;

use crate::handlers;
use cfgstore_protocol::{Request, Response, INVALID_REQUEST, METHOD_NOT_FOUND};
use tracing::{debug, warn};

pub struct RpcDispatcher {
    ctx: RpcContext,
}

impl RpcDispatcher {
    pub fn new(ctx: RpcContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &RpcContext {
        &self.ctx
    }

    pub async fn dispatch(&self, req: Request) -> Response {
        debug!(method = %req.method, id = ?req.id, "Dispatching request");
        if req.jsonrpc != "2.0" {
            warn!(version = %req.jsonrpc, "Rejected request with wrong protocol version");
            return Response::error(req.id, INVALID_REQUEST, "Expected jsonrpc \"2.0\"");
        }

        let ctx = &self.ctx;
        match req.method.as_str() {
            "ping" => handlers::handle_ping(req, ctx).await,
            "config.add" => handlers::handle_add(req, ctx).await,
            "config.get" => handlers::handle_get(req, ctx).await,
            "config.save" => handlers::handle_save(req, ctx).await,
            "config.set" => handlers::handle_set(req, ctx).await,
            "config.set_version" => handlers::handle_set_version(req, ctx).await,
            "config.history" => handlers::handle_history(req, ctx).await,
            "config.help" => handlers::handle_help(req, ctx).await,
            "config.set_help" => handlers::handle_set_help(req, ctx).await,
            "config.load" => handlers::handle_load(req, ctx).await,
            "config.list" => handlers::handle_list(req, ctx).await,
            "shutdown" => handlers::handle_shutdown(req, ctx).await,
            _ => {
                warn!("Unknown RPC method: {:?}", req.method);
                Response::error(
                    req.id,
                    METHOD_NOT_FOUND,
                    format!("Unknown method: {}", req.method),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfgstore_core::{
        ConfigRegistry, NoAccounts, PersistenceTrigger, UserId, DEFAULT_SAVE_DELAY,
    };
    use cfgstore_protocol::{
        ConfigPayload, RequestId, ALREADY_REGISTERED, INVALID_PARAMS, LOAD_FAILED,
        UNKNOWN_CONFIG, UNKNOWN_KEY,
    };
    use serde_json::{json, Value as Json};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::broadcast;

    fn dispatcher() -> (RpcDispatcher, broadcast::Receiver<()>) {
        let registry = Arc::new(ConfigRegistry::new(
            PersistenceTrigger::new(DEFAULT_SAVE_DELAY),
            "en",
        ));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let ctx = RpcContext::new(registry, Arc::new(NoAccounts), shutdown_tx);
        (RpcDispatcher::new(ctx), shutdown_rx)
    }

    async fn call(d: &RpcDispatcher, method: &str, params: Json) -> Response {
        d.dispatch(Request::new(1, method, params)).await
    }

    fn code(resp: &Response) -> Option<i32> {
        resp.error.as_ref().map(|e| e.code)
    }

    fn server_payload() -> Json {
        let payload = ConfigPayload::new("1.0")
            .with_value("port", 707u32)
            .with_help("port", "en", "Listening port")
            .with_section("db", ConfigPayload::new("").with_value("host", "localhost"));
        serde_json::to_value(payload).unwrap()
    }

    async fn add_server(d: &RpcDispatcher) {
        let resp = call(
            d,
            "config.add",
            json!({"user": 1000, "program": "/usr/bin/server", "config": server_payload()}),
        )
        .await;
        assert!(resp.error.is_none(), "{:?}", resp.error);
    }

    #[tokio::test]
    async fn test_ping() {
        let (d, _rx) = dispatcher();
        let resp = call(&d, "ping", Json::Null).await;
        assert_eq!(resp.result.unwrap(), "pong");
        assert_eq!(resp.id, Some(RequestId::Number(1)));
    }

    #[tokio::test]
    async fn test_unknown_method_and_version() {
        let (d, _rx) = dispatcher();
        assert_eq!(code(&call(&d, "config.remove", json!({})).await), Some(METHOD_NOT_FOUND));

        let mut req = Request::new(2, "ping", Json::Null);
        req.jsonrpc = "1.0".into();
        assert_eq!(code(&d.dispatch(req).await), Some(INVALID_REQUEST));
    }

    #[tokio::test]
    async fn test_add_then_get() {
        let (d, _rx) = dispatcher();
        add_server(&d).await;

        let resp = call(&d, "config.get", json!({"user": 1000, "program": "/usr/bin/server"})).await;
        let view = resp.result.unwrap();
        assert_eq!(view["name"], "/usr/bin/server");
        assert_eq!(view["is_main"], true);
        assert_eq!(view["version"], "1.0");
        assert_eq!(view["values"], json!({"port": 707, "db": {"host": "localhost"}}));
    }

    #[tokio::test]
    async fn test_duplicate_add_rejected() {
        let (d, _rx) = dispatcher();
        add_server(&d).await;
        let resp = call(
            &d,
            "config.add",
            json!({"user": 1000, "program": "/usr/bin/server", "config": {"version": "2"}}),
        )
        .await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, ALREADY_REGISTERED);
        assert_eq!(err.message, "userid 1000 already has program: /usr/bin/server");
        assert_eq!(err.data.unwrap()["user"], 1000);

        let resp = call(&d, "config.get", json!({"user": 1000, "program": "/usr/bin/server"})).await;
        assert_eq!(resp.result.unwrap()["version"], "1.0");
    }

    #[tokio::test]
    async fn test_get_unknown() {
        let (d, _rx) = dispatcher();
        let resp = call(&d, "config.get", json!({"user": -1, "program": "/bin/none"})).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, UNKNOWN_CONFIG);
        assert_eq!(err.message, "all users has no program: /bin/none");
    }

    #[tokio::test]
    async fn test_add_rejects_bad_payload() {
        let (d, _rx) = dispatcher();
        let resp = call(
            &d,
            "config.add",
            json!({"user": 1, "program": "/p", "config": {"entries": {"n": {"kind": "int32", "value": "x"}}}}),
        )
        .await;
        assert_eq!(code(&resp), Some(INVALID_PARAMS));

        let resp = call(&d, "config.add", json!({"user": 1, "program": "/p"})).await;
        assert_eq!(code(&resp), Some(INVALID_PARAMS));
        assert!(d.context().registry.programs(UserId(1)).is_empty());
    }

    #[tokio::test]
    async fn test_set_and_history() {
        let (d, _rx) = dispatcher();
        add_server(&d).await;

        let params = json!({
            "user": 1000, "program": "/usr/bin/server", "key": "port",
            "kind": "uint32", "value": 8080, "author": 0
        });
        assert!(call(&d, "config.set", params).await.error.is_none());

        let resp = call(
            &d,
            "config.history",
            json!({"user": 1000, "program": "/usr/bin/server", "key": "port"}),
        )
        .await;
        let history = resp.result.unwrap();
        assert_eq!(history.as_array().unwrap().len(), 1);
        assert_eq!(history[0]["value"], 707);
        assert_eq!(history[0]["author"], 1000);

        let resp = call(&d, "config.get", json!({"user": 1000, "program": "/usr/bin/server"})).await;
        assert_eq!(resp.result.unwrap()["values"]["port"], 8080);
    }

    #[tokio::test]
    async fn test_set_in_section() {
        let (d, _rx) = dispatcher();
        add_server(&d).await;
        let params = json!({
            "user": 1000, "program": "/usr/bin/server", "section": ["db"], "key": "host",
            "value": "db.internal", "author": 1000
        });
        assert!(call(&d, "config.set", params).await.error.is_none());

        let resp = call(&d, "config.get", json!({"user": 1000, "program": "/usr/bin/server"})).await;
        assert_eq!(resp.result.unwrap()["values"]["db"]["host"], "db.internal");
    }

    #[tokio::test]
    async fn test_set_rejects_kind_mismatch_and_unknown_key() {
        let (d, _rx) = dispatcher();
        add_server(&d).await;

        let mismatch = json!({
            "user": 1000, "program": "/usr/bin/server", "key": "port",
            "kind": "string", "value": "eighty", "author": 0
        });
        assert_eq!(code(&call(&d, "config.set", mismatch).await), Some(INVALID_PARAMS));

        let missing = json!({
            "user": 1000, "program": "/usr/bin/server", "key": "nope",
            "kind": "string", "value": "x", "author": 0
        });
        let resp = call(&d, "config.set", missing).await;
        assert_eq!(code(&resp), Some(UNKNOWN_KEY));

        let bad_section = json!({
            "user": 1000, "program": "/usr/bin/server", "section": ["cache"], "key": "host",
            "value": "x", "author": 0
        });
        let err = call(&d, "config.set", bad_section).await.error.unwrap();
        assert_eq!(err.code, UNKNOWN_KEY);
        assert_eq!(err.data.unwrap()["key"], "cache");

        let resp = call(
            &d,
            "config.history",
            json!({"user": 1000, "program": "/usr/bin/server", "key": "port"}),
        )
        .await;
        assert_eq!(resp.result.unwrap(), json!([]));
    }

    #[tokio::test]
    async fn test_help_falls_back_to_default_lang() {
        let (d, _rx) = dispatcher();
        add_server(&d).await;
        let target = json!({"user": 1000, "program": "/usr/bin/server", "key": "port"});

        let resp = call(&d, "config.help", target.clone()).await;
        assert_eq!(resp.result.unwrap(), "Listening port");

        let mut set = target.clone();
        set["lang"] = json!("es");
        set["text"] = json!("Puerto");
        assert!(call(&d, "config.set_help", set).await.error.is_none());

        let mut es = target.clone();
        es["lang"] = json!("es");
        assert_eq!(call(&d, "config.help", es).await.result.unwrap(), "Puerto");

        let mut fr = target;
        fr["lang"] = json!("fr");
        assert_eq!(call(&d, "config.help", fr).await.result.unwrap(), "Listening port");
    }

    #[tokio::test]
    async fn test_set_version_and_list() {
        let (d, _rx) = dispatcher();
        add_server(&d).await;
        let resp = call(
            &d,
            "config.set_version",
            json!({"user": 1000, "program": "/usr/bin/server", "version": "1.1"}),
        )
        .await;
        assert!(resp.error.is_none());

        let resp = call(&d, "config.get", json!({"user": 1000, "program": "/usr/bin/server"})).await;
        assert_eq!(resp.result.unwrap()["version"], "1.1");

        let resp = call(&d, "config.list", json!({"user": 1000})).await;
        assert_eq!(resp.result.unwrap(), json!(["/usr/bin/server"]));
        let resp = call(&d, "config.list", json!({"user": 7})).await;
        assert_eq!(resp.result.unwrap(), json!([]));
    }

    #[tokio::test]
    async fn test_load_declarations() {
        let (d, _rx) = dispatcher();
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("server.cfg");
        std::fs::write(
            &file,
            "// Port to listen on\nport uint32 = 707\n\n// Greeting\ngreeting = \"hi\"\n",
        )
        .unwrap();
        let params = json!({"user": 0, "program": "/usr/bin/greeter", "file": file});

        let resp = call(&d, "config.load", params.clone()).await;
        assert_eq!(resp.result.unwrap(), json!({"keys": ["greeting", "port"]}));

        let resp = call(
            &d,
            "config.help",
            json!({"user": 0, "program": "/usr/bin/greeter", "key": "port"}),
        )
        .await;
        assert_eq!(resp.result.unwrap(), "Port to listen on");

        assert_eq!(code(&call(&d, "config.load", params).await), Some(ALREADY_REGISTERED));
    }

    #[tokio::test]
    async fn test_load_failure() {
        let (d, _rx) = dispatcher();
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("bad.cfg");
        std::fs::write(&file, "port = 707\n").unwrap();

        let resp = call(&d, "config.load", json!({"user": 0, "program": "/p", "file": file})).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, LOAD_FAILED);
        assert!(err.message.contains("port"));

        let missing = tmp.path().join("missing.cfg");
        let resp = call(&d, "config.load", json!({"user": 0, "program": "/p", "file": missing})).await;
        assert_eq!(code(&resp), Some(LOAD_FAILED));
    }

    #[tokio::test]
    async fn test_shutdown_signals() {
        let (d, mut rx) = dispatcher();
        let resp = call(&d, "shutdown", Json::Null).await;
        assert_eq!(resp.result.unwrap(), "ok");
        assert!(rx.try_recv().is_ok());
    }
}
