//! Unix Socket Transport
//!
//! Sends JSON over HTTP/1.1 on a local Unix socket and decodes the JSON
//! reply. Each round trip opens its own connection and is bounded by the
//! configured timeout.

use crate::error::{Error, Result};
use async_trait::async_trait;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Body, Method};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixStream;
use tracing::debug;

// =============================================================================
// Transport Trait
// =============================================================================

/// A request/response channel to a JSON speaking daemon
#[async_trait]
pub trait Transport: Send + Sync {
    /// `POST` a JSON payload and decode the JSON reply
    async fn post(&self, path: &str, payload: Value) -> Result<Value>;

    /// `GET` a path and decode the JSON reply
    async fn get(&self, path: &str) -> Result<Value>;
}

pub type TransportRef = Arc<dyn Transport>;

// =============================================================================
// Socket Transport
// =============================================================================

/// Transport bound to a fixed socket path
#[derive(Debug, Clone)]
pub struct SocketTransport {
    socket_path: PathBuf,
    timeout: Duration,
}

impl SocketTransport {
    /// Create a transport for the given socket
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    /// Socket this transport talks to
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn send(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> Result<Value> {
        match tokio::time::timeout(self.timeout, self.exchange(method, path, body)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                path: path.to_string(),
                timeout: self.timeout,
            }),
        }
    }

    async fn exchange(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> Result<Value> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| Error::Transport {
                path: path.to_string(),
                reason: format!("unable to connect to {}: {}", self.socket_path.display(), e),
            })?;

        let (mut sender, connection) = hyper::client::conn::handshake(stream).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("Plugin connection closed with error: {}", e);
            }
        });

        let body = body.map(Body::from).unwrap_or_else(Body::empty);
        let request = hyper::Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, "localhost")
            .header(CONTENT_TYPE, "application/json")
            .body(body)?;

        let response = sender.send_request(request).await?;
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await?;

        if bytes.is_empty() && status.is_success() {
            return Ok(Value::Object(Default::default()));
        }

        serde_json::from_slice(&bytes).map_err(|e| Error::Transport {
            path: path.to_string(),
            reason: format!("undecodable response (status {}): {}", status, e),
        })
    }
}

#[async_trait]
impl Transport for SocketTransport {
    async fn post(&self, path: &str, payload: Value) -> Result<Value> {
        let body = serde_json::to_vec(&payload)?;
        debug!("POST {} on {}", path, self.socket_path.display());
        self.send(Method::POST, path, Some(body)).await
    }

    async fn get(&self, path: &str) -> Result<Value> {
        debug!("GET {} on {}", path, self.socket_path.display());
        self.send(Method::GET, path, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use hyper::service::service_fn;
    use hyper::{Response, StatusCode};
    use std::convert::Infallible;
    use tokio::net::UnixListener;

    /// Serve every connection with a reply echoing the method, path and body
    fn spawn_echo_server(listener: UnixListener, status: StatusCode) {
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let service = service_fn(move |req: hyper::Request<Body>| async move {
                        let method = req.method().to_string();
                        let path = req.uri().path().to_string();
                        let bytes = hyper::body::to_bytes(req.into_body())
                            .await
                            .unwrap_or_default();
                        let body: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
                        let reply = serde_json::json!({
                            "Method": method,
                            "Path": path,
                            "Body": body,
                        });
                        let response = Response::builder()
                            .status(status)
                            .body(Body::from(reply.to_string()))
                            .unwrap();
                        Ok::<_, Infallible>(response)
                    });
                    let _ = hyper::server::conn::Http::new()
                        .serve_connection(stream, service)
                        .await;
                });
            }
        });
    }

    #[tokio::test]
    async fn test_post_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("plugin.sock");
        spawn_echo_server(UnixListener::bind(&socket).unwrap(), StatusCode::OK);

        let transport = SocketTransport::new(&socket, Duration::from_secs(5));
        let reply = transport
            .post("/VolumeDriver.Get", serde_json::json!({"Name": "vol-1"}))
            .await
            .unwrap();

        assert_eq!(reply["Method"], "POST");
        assert_eq!(reply["Path"], "/VolumeDriver.Get");
        assert_eq!(reply["Body"]["Name"], "vol-1");
    }

    #[tokio::test]
    async fn test_error_status_with_json_body_is_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("plugin.sock");
        spawn_echo_server(
            UnixListener::bind(&socket).unwrap(),
            StatusCode::INTERNAL_SERVER_ERROR,
        );

        let transport = SocketTransport::new(&socket, Duration::from_secs(5));
        let reply = transport.get("/plugins").await.unwrap();
        assert_eq!(reply["Method"], "GET");
    }

    #[tokio::test]
    async fn test_unreachable_socket() {
        let dir = tempfile::tempdir().unwrap();
        let transport =
            SocketTransport::new(dir.path().join("missing.sock"), Duration::from_secs(5));

        let err = transport
            .post("/VolumeDriver.List", serde_json::json!({}))
            .await
            .unwrap_err();
        assert_matches!(err, Error::Transport { ref path, .. } if path == "/VolumeDriver.List");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_hung_plugin_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("hung.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let transport = SocketTransport::new(&socket, Duration::from_millis(100));
        let err = transport
            .post("/VolumeDriver.Capabilities", serde_json::json!({}))
            .await
            .unwrap_err();
        assert_matches!(err, Error::Timeout { timeout, .. } if timeout == Duration::from_millis(100));
        assert!(err.to_string().ends_with("timed out after 100ms"));
    }
}
