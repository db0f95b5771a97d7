//! JSON-RPC server over a Unix socket and a loopback TCP socket

use crate::config::DaemonConfig;
use crate::rpc::{RpcContext, RpcDispatcher};
use anyhow::{bail, Context, Result};
use cfgstore_core::{AccountLookup, ConfigRegistry};
use cfgstore_protocol::{Request, Response, PARSE_ERROR};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Daemon server listening on every enabled transport
pub struct Server {
    unix: Option<(UnixListener, PathBuf)>,
    tcp: Option<TcpListener>,
    shutdown_tx: broadcast::Sender<()>,
    dispatcher: Arc<RpcDispatcher>,
}

impl Server {
    /// Bind the transports enabled in `config`. Fails when none is.
    pub async fn bind(
        config: &DaemonConfig,
        registry: Arc<ConfigRegistry>,
        accounts: Arc<dyn AccountLookup>,
    ) -> Result<Self> {
        if !config.has_transport() {
            bail!("neither the unix socket nor tcp is enabled");
        }

        let unix = if config.unix.enabled {
            let path = config.unix.path.clone();
            // Remove stale socket
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let listener = UnixListener::bind(&path)
                .with_context(|| format!("binding {}", path.display()))?;
            info!(path = %path.display(), "Listening on unix socket");
            Some((listener, path))
        } else {
            None
        };

        let tcp = if config.tcp.enabled {
            let address = config.tcp.address();
            let listener = TcpListener::bind(&address)
                .await
                .with_context(|| format!("binding {}", address))?;
            info!(address = %listener.local_addr()?, "Listening on tcp");
            Some(listener)
        } else {
            None
        };

        let (shutdown_tx, _) = broadcast::channel(1);
        let ctx = RpcContext::new(registry, accounts, shutdown_tx.clone());

        Ok(Self {
            unix,
            tcp,
            shutdown_tx,
            dispatcher: Arc::new(RpcDispatcher::new(ctx)),
        })
    }

    /// Get a shutdown sender for external shutdown triggers
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn socket_path(&self) -> Option<&Path> {
        self.unix.as_ref().map(|(_, path)| path.as_path())
    }

    /// Bound TCP address, useful when the configured port is 0.
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Serve until a shutdown signal, then flush the registry and remove
    /// the socket file. Requests already being dispatched finish before the
    /// flush, so every acknowledged write reaches the snapshot.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let cancel = CancellationToken::new();
        let clients = TaskTracker::new();
        let unix = self.unix.as_ref().map(|(listener, _)| listener);

        loop {
            tokio::select! {
                accepted = accept_unix(unix) => match accepted {
                    Ok(stream) => self.spawn_client(stream, "unix", &cancel, &clients),
                    Err(e) => error!("Accept error: {}", e),
                },
                accepted = accept_tcp(self.tcp.as_ref()) => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "TCP client connected");
                        self.spawn_client(stream, "tcp", &cancel, &clients);
                    }
                    Err(e) => error!("Accept error: {}", e),
                },
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        cancel.cancel();
        clients.close();
        clients.wait().await;
        debug!("Client tasks drained");

        let registry = self.dispatcher.context().registry.clone();
        registry.trigger().flush_now().await;
        if let Some((_, path)) = &self.unix {
            cfgstore_protocol::remove_socket(path);
        }
        info!(flushes = registry.trigger().flush_count(), "Server stopped");
        Ok(())
    }

    fn spawn_client<S>(
        &self,
        stream: S,
        transport: &'static str,
        cancel: &CancellationToken,
        clients: &TaskTracker,
    ) where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let dispatcher = self.dispatcher.clone();
        let cancel = cancel.child_token();
        clients.spawn(async move {
            if let Err(e) = handle_client(stream, dispatcher, cancel).await {
                error!(transport, "Client error: {}", e);
            }
        });
    }
}

async fn accept_unix(listener: Option<&UnixListener>) -> std::io::Result<UnixStream> {
    match listener {
        Some(listener) => listener.accept().await.map(|(stream, _)| stream),
        None => std::future::pending().await,
    }
}

async fn accept_tcp(listener: Option<&TcpListener>) -> std::io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

/// Answer one request per line until the peer hangs up or the server stops.
async fn handle_client<S>(
    stream: S,
    dispatcher: Arc<RpcDispatcher>,
    cancel: CancellationToken,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            read = reader.read_line(&mut line) => read?,
        };
        if n == 0 {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(req) => dispatcher.dispatch(req).await,
            Err(e) => {
                warn!("Parse error: {}", e);
                Response::error(None, PARSE_ERROR, e.to_string())
            }
        };

        writer.write_all(response.to_json_line()?.as_bytes()).await?;
        writer.flush().await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfgstore_core::{NoAccounts, PersistenceTrigger};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn unix_only(tmp: &TempDir) -> DaemonConfig {
        let mut config = DaemonConfig::default();
        config.unix.path = tmp.path().join("test.sock");
        config.tcp.enabled = false;
        config
    }

    fn registry() -> Arc<ConfigRegistry> {
        Arc::new(ConfigRegistry::new(
            PersistenceTrigger::new(Duration::from_secs(30)),
            "en",
        ))
    }

    async fn exchange(stream: &mut UnixStream, line: &[u8]) -> String {
        stream.write_all(line).await.unwrap();
        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf[..n]).into_owned()
    }

    #[tokio::test]
    async fn test_server_ping() {
        let tmp = TempDir::new().unwrap();
        let server = Server::bind(&unix_only(&tmp), registry(), Arc::new(NoAccounts))
            .await
            .unwrap();
        let sock_path = server.socket_path().unwrap().to_path_buf();
        let shutdown_handle = server.shutdown_handle();
        let server_task = tokio::spawn(async move { server.run().await });

        let mut client = UnixStream::connect(&sock_path).await.unwrap();
        let response =
            exchange(&mut client, b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n").await;
        assert!(response.contains("\"result\":\"pong\""));
        assert!(response.contains("\"id\":1"));

        let _ = shutdown_handle.send(());
        let _ = server_task.await;
        assert!(!sock_path.exists());
    }

    #[tokio::test]
    async fn test_parse_error() {
        let tmp = TempDir::new().unwrap();
        let server = Server::bind(&unix_only(&tmp), registry(), Arc::new(NoAccounts))
            .await
            .unwrap();
        let sock_path = server.socket_path().unwrap().to_path_buf();
        let shutdown_handle = server.shutdown_handle();
        let server_task = tokio::spawn(async move { server.run().await });

        let mut client = UnixStream::connect(&sock_path).await.unwrap();
        let response = exchange(&mut client, b"{invalid json}\n").await;
        assert!(response.contains("-32700"));

        // The connection survives a bad line.
        let response =
            exchange(&mut client, b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n").await;
        assert!(response.contains("pong"));

        let _ = shutdown_handle.send(());
        let _ = server_task.await;
    }

    #[tokio::test]
    async fn test_shutdown_method() {
        let tmp = TempDir::new().unwrap();
        let server = Server::bind(&unix_only(&tmp), registry(), Arc::new(NoAccounts))
            .await
            .unwrap();
        let sock_path = server.socket_path().unwrap().to_path_buf();
        let server_task = tokio::spawn(async move { server.run().await });

        let mut client = UnixStream::connect(&sock_path).await.unwrap();
        let response = exchange(
            &mut client,
            b"{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"shutdown\"}\n",
        )
        .await;
        assert!(response.contains("\"result\":\"ok\""));

        let result = tokio::time::timeout(Duration::from_secs(1), server_task).await;
        assert!(result.is_ok(), "Server should shutdown within timeout");
    }

    #[tokio::test]
    async fn test_tcp_transport() {
        let mut config = DaemonConfig::default();
        config.unix.enabled = false;
        config.tcp.port = 0;
        let server = Server::bind(&config, registry(), Arc::new(NoAccounts))
            .await
            .unwrap();
        assert!(server.socket_path().is_none());
        let addr = server.tcp_addr().unwrap();
        let shutdown_handle = server.shutdown_handle();
        let server_task = tokio::spawn(async move { server.run().await });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":\"a\",\"method\":\"ping\"}\n")
            .await
            .unwrap();
        let mut buf = vec![0u8; 1024];
        let n = client.read(&mut buf).await.unwrap();
        let response = String::from_utf8_lossy(&buf[..n]);
        assert!(response.contains("\"id\":\"a\""));
        assert!(response.contains("pong"));

        let _ = shutdown_handle.send(());
        let _ = server_task.await;
    }

    #[tokio::test]
    async fn test_bind_requires_transport() {
        let mut config = DaemonConfig::default();
        config.unix.enabled = false;
        config.tcp.enabled = false;
        let result = Server::bind(&config, registry(), Arc::new(NoAccounts)).await;
        assert!(result.is_err());
    }
}
