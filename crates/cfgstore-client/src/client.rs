//! Daemon client implementation

use anyhow::Result;
use cfgstore_core::{UserId, Value};
use cfgstore_protocol::{ConfigPayload, ConfigView, Request, Response, RevisionView};
use serde::de::DeserializeOwned;
use serde_json::{json, Value as Json};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, ToSocketAddrs, UnixStream};
use tokio::sync::Mutex;
use tracing::{debug, warn};

type Reader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Error response returned by the daemon.
///
/// Carried inside the `anyhow::Error` of a failed call; recover it with
/// `err.downcast_ref::<RemoteError>()`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("RPC error {code}: {message}")]
pub struct RemoteError {
    pub code: i32,
    pub message: String,
    pub data: Option<Json>,
}

/// A key inside a program map, optionally nested in sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPath {
    pub section: Vec<String>,
    pub key: String,
}

impl KeyPath {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            section: Vec::new(),
            key: key.into(),
        }
    }

    /// `key` inside the section reached by walking `section`.
    pub fn nested<I, S>(section: I, key: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            section: section.into_iter().map(Into::into).collect(),
            key: key.into(),
        }
    }

    fn params(&self, user: UserId, program: &str) -> Json {
        json!({
            "user": user,
            "program": program,
            "section": self.section,
            "key": self.key,
        })
    }
}

impl From<&str> for KeyPath {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

pub struct DaemonClient {
    reader: Mutex<Reader>,
    writer: Mutex<Writer>,
    next_id: AtomicU64,
}

impl DaemonClient {
    /// Connect to the daemon at the default socket path
    pub async fn connect() -> Result<Self> {
        let path = cfgstore_protocol::socket_path();
        Self::connect_to(&path).await
    }

    /// Connect to daemon at a specific socket path
    pub async fn connect_to(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).await?;
        let (read, write) = stream.into_split();
        Ok(Self::from_halves(Box::new(read), Box::new(write)))
    }

    /// Connect to daemon over TCP
    pub async fn connect_tcp(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read, write) = stream.into_split();
        Ok(Self::from_halves(Box::new(read), Box::new(write)))
    }

    fn from_halves(read: Box<dyn AsyncRead + Send + Unpin>, write: Writer) -> Self {
        Self {
            reader: Mutex::new(BufReader::new(read)),
            writer: Mutex::new(write),
            next_id: AtomicU64::new(1),
        }
    }

    /// Send a JSON-RPC request and get the result
    ///
    /// An error response becomes a [`RemoteError`].
    pub async fn call(&self, method: &str, params: Json) -> Result<Json> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut line = serde_json::to_string(&Request::new(id, method, params))?;
        line.push('\n');

        // Hold the reader across the write so concurrent calls cannot
        // receive each other's responses.
        let mut reader = self.reader.lock().await;
        {
            let mut writer = self.writer.lock().await;
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
        }

        let mut reply = String::new();
        if reader.read_line(&mut reply).await? == 0 {
            anyhow::bail!("Connection closed by daemon");
        }
        drop(reader);

        let response: Response = serde_json::from_str(&reply)?;
        if let Some(error) = response.error {
            debug!(method, code = error.code, "Daemon returned error");
            return Err(RemoteError {
                code: error.code,
                message: error.message,
                data: error.data,
            }
            .into());
        }
        Ok(response.result.unwrap_or(Json::Null))
    }

    async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Json) -> Result<T> {
        let result = self.call(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Ping the daemon
    pub async fn ping(&self) -> Result<String> {
        self.call_as("ping", json!({})).await
    }

    /// Register a program's configuration
    pub async fn add(&self, user: UserId, program: &str, config: &ConfigPayload) -> Result<()> {
        self.call(
            "config.add",
            json!({"user": user, "program": program, "config": config}),
        )
        .await?;
        Ok(())
    }

    pub async fn get(&self, user: UserId, program: &str) -> Result<ConfigView> {
        self.call_as("config.get", json!({"user": user, "program": program}))
            .await
    }

    /// Ask for a snapshot write. Returns before the write happens.
    pub async fn save(&self) -> Result<()> {
        self.call("config.save", json!({})).await?;
        Ok(())
    }

    /// Replace a value. Its kind must match the setting's.
    pub async fn set(
        &self,
        user: UserId,
        program: &str,
        key: impl Into<KeyPath>,
        value: impl Into<Value>,
        author: UserId,
    ) -> Result<()> {
        let value = value.into();
        let mut params = key.into().params(user, program);
        params["kind"] = json!(value.kind());
        params["value"] = value.to_json();
        params["author"] = json!(author);
        self.call("config.set", params).await?;
        Ok(())
    }

    pub async fn set_version(&self, user: UserId, program: &str, version: &str) -> Result<()> {
        self.call(
            "config.set_version",
            json!({"user": user, "program": program, "version": version}),
        )
        .await?;
        Ok(())
    }

    /// Previous values of a setting, oldest first.
    pub async fn history(
        &self,
        user: UserId,
        program: &str,
        key: impl Into<KeyPath>,
    ) -> Result<Vec<RevisionView>> {
        self.call_as("config.history", key.into().params(user, program))
            .await
    }

    /// Help text in `lang`, or in the daemon's default language.
    pub async fn help(
        &self,
        user: UserId,
        program: &str,
        key: impl Into<KeyPath>,
        lang: Option<&str>,
    ) -> Result<String> {
        let mut params = key.into().params(user, program);
        if let Some(lang) = lang {
            params["lang"] = json!(lang);
        }
        self.call_as("config.help", params).await
    }

    pub async fn set_help(
        &self,
        user: UserId,
        program: &str,
        key: impl Into<KeyPath>,
        lang: &str,
        text: &str,
    ) -> Result<()> {
        let mut params = key.into().params(user, program);
        params["lang"] = json!(lang);
        params["text"] = json!(text);
        self.call("config.set_help", params).await?;
        Ok(())
    }

    /// Register a program from a declaration file readable by the daemon.
    /// Returns the loaded keys, sorted.
    pub async fn load(&self, user: UserId, program: &str, file: &Path) -> Result<Vec<String>> {
        let result = self
            .call(
                "config.load",
                json!({"user": user, "program": program, "file": file}),
            )
            .await?;
        match result.get("keys").cloned() {
            Some(keys) => Ok(serde_json::from_value(keys)?),
            None => {
                warn!("config.load result without keys: {}", result);
                Ok(Vec::new())
            }
        }
    }

    /// Programs registered for `user`, sorted.
    pub async fn list(&self, user: UserId) -> Result<Vec<String>> {
        self.call_as("config.list", json!({"user": user})).await
    }

    /// Request daemon shutdown
    pub async fn shutdown(&self) -> Result<()> {
        self.call("shutdown", json!({})).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_path_params() {
        let params = KeyPath::nested(["db", "pool"], "size").params(UserId(3), "/bin/x");
        assert_eq!(
            params,
            json!({"user": 3, "program": "/bin/x", "section": ["db", "pool"], "key": "size"})
        );

        let params = KeyPath::from("port").params(UserId::ALL_USERS, "/bin/x");
        assert_eq!(params["section"], json!([]));
        assert_eq!(params["user"], -1);
    }

    #[test]
    fn test_remote_error_display() {
        let err: anyhow::Error = RemoteError {
            code: -32002,
            message: "userid 5 has no program: /bin/x".into(),
            data: None,
        }
        .into();
        assert_eq!(err.to_string(), "RPC error -32002: userid 5 has no program: /bin/x");
        assert_eq!(err.downcast_ref::<RemoteError>().map(|e| e.code), Some(-32002));
    }
}
