//! Dial-side connection establishment.
//!
//! The transport core only ever creates connections two ways: server-side
//! accept, and this dialer. There is no pooling and no reconnect here;
//! retry policy belongs to the layer that owns application semantics.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use crate::connection::Connection;
use crate::context::ExecutionContext;
use crate::error::{Result, TransportError};
use crate::framing::MAX_FRAME_SIZE;
use crate::member::Member;
use crate::metrics::TransportMetrics;

/// Dialer configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Whether to set TCP_NODELAY on dialed sockets.
    pub nodelay: bool,
    /// Whether to set SO_KEEPALIVE on dialed sockets.
    pub keepalive: bool,
    /// Maximum encoded frame size, length prefix included.
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            nodelay: true,
            keepalive: true,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

/// Dial-side factory for framed connections.
#[derive(Clone)]
pub struct TransportClient {
    config: ClientConfig,
    metrics: Arc<TransportMetrics>,
}

impl TransportClient {
    /// Creates a dialer.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            metrics: Arc::new(TransportMetrics::new()),
        }
    }

    /// Shared metrics collector for connections dialed by this client.
    pub fn metrics(&self) -> Arc<TransportMetrics> {
        self.metrics.clone()
    }

    /// Dials `member` and wraps the stream in a framed [`Connection`]
    /// confined to the calling execution context.
    pub fn connect(&self, member: &Member) -> impl Future<Output = Result<Connection>> + Send + 'static {
        let context = ExecutionContext::require_current("TransportClient::connect");
        let config = self.config.clone();
        let metrics = self.metrics.clone();
        let host = member.host().to_string();
        let port = member.port();
        let addr = member.address();
        async move {
            let context = context?;
            let timeout = Duration::from_millis(config.connect_timeout_ms);
            let stream = tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port)))
                .await
                .map_err(|_| TransportError::ConnectTimeout {
                    addr: addr.clone(),
                    timeout_ms: config.connect_timeout_ms,
                })??;
            if config.nodelay {
                stream.set_nodelay(true)?;
            }
            if config.keepalive {
                if let Err(e) = socket2::SockRef::from(&stream).set_keepalive(true) {
                    debug!(error = %e, "failed to set SO_KEEPALIVE");
                }
            }
            debug!(peer = %addr, "connected");
            Connection::spawn(stream, context, None, metrics, config.max_frame_size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_requires_execution_context() {
        let client = TransportClient::new(ClientConfig::default());
        let err = client
            .connect(&Member::new(1, "127.0.0.1", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ContextViolation { .. }));
    }

    #[tokio::test]
    async fn connect_to_dead_port_fails_with_io_error() {
        let context = ExecutionContext::new("client-test");
        // Bind and immediately drop to get a port nothing listens on.
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = TransportClient::new(ClientConfig::default());
        let connect = context
            .submit(move || client.connect(&Member::new(1, "127.0.0.1", port)))
            .await
            .unwrap();
        assert!(matches!(
            connect.await.unwrap_err(),
            TransportError::Io(_)
        ));
    }
}
