//! Address-bound transport server lifecycle.
//!
//! The server moves `Idle → Binding → Listening` on [`listen`] and
//! `Listening → Closing → Closed` on [`close`]; both operations are
//! idempotent with memoized results, so at most one bind attempt and one
//! shutdown are ever issued no matter how many callers race.
//!
//! [`listen`]: TransportServer::listen
//! [`close`]: TransportServer::close

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::context::ExecutionContext;
use crate::error::{Result, TransportError};
use crate::framing::MAX_FRAME_SIZE;
use crate::member::Member;
use crate::metrics::TransportMetrics;
use crate::registry::ConnectionRegistry;

/// Callback invoked once per accepted connection, inside the server's
/// execution context. This is the seam through which request/response or
/// event-subscription logic attaches to new connections.
pub trait ConnectionListener: Send + 'static {
    /// Called for every accepted connection, after it is registered.
    fn on_connection(&mut self, connection: Connection);
}

impl<F> ConnectionListener for F
where
    F: FnMut(Connection) + Send + 'static,
{
    fn on_connection(&mut self, connection: Connection) {
        self(connection)
    }
}

/// Transport server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum encoded frame size, length prefix included.
    pub max_frame_size: usize,
    /// Accept backlog for the listening socket.
    pub accept_backlog: u32,
    /// Whether to set SO_REUSEADDR on the listening socket.
    pub reuseaddr: bool,
    /// Whether to set TCP_NODELAY on accepted sockets.
    pub nodelay: bool,
    /// Whether to set SO_KEEPALIVE on accepted sockets.
    pub keepalive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            accept_backlog: 128,
            reuseaddr: true,
            nodelay: true,
            keepalive: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Binding,
    Listening,
    Closing,
    Closed,
}

enum ListenOutcome {
    Bound(Member),
    Failed { addr: String, reason: String },
}

struct ServerState {
    phase: Phase,
    listener: Option<Box<dyn ConnectionListener>>,
    listen_waiters: Vec<oneshot::Sender<Result<Member>>>,
    listen_outcome: Option<ListenOutcome>,
    accept_task: Option<JoinHandle<()>>,
    close_waiters: Vec<oneshot::Sender<Result<()>>>,
    close_result: Option<std::result::Result<(), String>>,
}

struct ServerInner {
    config: ServerConfig,
    registry: ConnectionRegistry,
    metrics: Arc<TransportMetrics>,
    state: Mutex<ServerState>,
}

/// Accepting side of the transport. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct TransportServer {
    inner: Arc<ServerInner>,
}

impl TransportServer {
    /// Creates an idle server.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                config,
                registry: ConnectionRegistry::new(),
                metrics: Arc::new(TransportMetrics::new()),
                state: Mutex::new(ServerState {
                    phase: Phase::Idle,
                    listener: None,
                    listen_waiters: Vec::new(),
                    listen_outcome: None,
                    accept_task: None,
                    close_waiters: Vec::new(),
                    close_result: None,
                }),
            }),
        }
    }

    /// The registry of currently established connections.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    /// Shared metrics collector for this server and its connections.
    pub fn metrics(&self) -> Arc<TransportMetrics> {
        self.inner.metrics.clone()
    }

    /// Whether the server is currently accepting connections.
    pub fn is_listening(&self) -> bool {
        self.inner.state.lock().unwrap().phase == Phase::Listening
    }

    /// The member this server is bound as, once listening.
    pub fn local_member(&self) -> Option<Member> {
        match &self.inner.state.lock().unwrap().listen_outcome {
            Some(ListenOutcome::Bound(member)) => Some(member.clone()),
            _ => None,
        }
    }

    /// Binds `member`'s address and starts accepting connections, handing
    /// each to `listener` inside the calling execution context.
    ///
    /// Idempotent: at most one bind attempt is ever issued; every caller
    /// receives the same outcome. On success the resolved member carries the
    /// actual port when an ephemeral bind was requested.
    pub fn listen<L>(
        &self,
        member: Member,
        listener: L,
    ) -> impl Future<Output = Result<Member>> + Send + 'static
    where
        L: ConnectionListener,
    {
        let (done, result) = oneshot::channel();
        match ExecutionContext::require_current("TransportServer::listen") {
            Err(e) => {
                let _ = done.send(Err(e));
            }
            Ok(context) => self.begin_listen(member, Box::new(listener), done, context),
        }
        async move {
            match result.await {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::ServerClosed),
            }
        }
    }

    fn begin_listen(
        &self,
        member: Member,
        listener: Box<dyn ConnectionListener>,
        done: oneshot::Sender<Result<Member>>,
        context: ExecutionContext,
    ) {
        let mut state = self.inner.state.lock().unwrap();
        if let Some(outcome) = &state.listen_outcome {
            let _ = done.send(replay_listen(outcome));
            return;
        }
        match state.phase {
            Phase::Idle => {
                state.phase = Phase::Binding;
                state.listener = Some(listener);
                state.listen_waiters.push(done);
                let server = self.clone();
                let config = self.inner.config.clone();
                info!(member = %member, "binding");
                tokio::spawn(async move {
                    let bound = bind_socket(&member, &config).await;
                    let callback_context = context.clone();
                    context.execute(move || server.finish_bind(member, bound, callback_context));
                });
            }
            Phase::Binding | Phase::Listening => {
                state.listen_waiters.push(done);
            }
            Phase::Closing | Phase::Closed => {
                let _ = done.send(Err(TransportError::ServerClosed));
            }
        }
    }

    /// Completes a bind attempt. Runs inside the captured context.
    fn finish_bind(
        &self,
        member: Member,
        bound: std::result::Result<(TcpListener, u16), String>,
        context: ExecutionContext,
    ) {
        let mut state = self.inner.state.lock().unwrap();
        if state.phase != Phase::Binding {
            // close() won the race; the listener socket (if any) is dropped.
            debug!("bind completed after shutdown began");
            for done in state.listen_waiters.drain(..) {
                let _ = done.send(Err(TransportError::ServerClosed));
            }
            return;
        }
        match bound {
            Ok((listener, port)) => {
                let bound_member = member.with_port(port);
                state.phase = Phase::Listening;
                state.listen_outcome = Some(ListenOutcome::Bound(bound_member.clone()));
                let server = self.clone();
                state.accept_task = Some(tokio::spawn(run_acceptor(listener, server, context)));
                for done in state.listen_waiters.drain(..) {
                    let _ = done.send(Ok(bound_member.clone()));
                }
                info!(member = %bound_member, "listening");
            }
            Err(reason) => {
                state.phase = Phase::Idle;
                let addr = member.address();
                state.listen_outcome = Some(ListenOutcome::Failed {
                    addr: addr.clone(),
                    reason: reason.clone(),
                });
                state.listener = None;
                for done in state.listen_waiters.drain(..) {
                    let _ = done.send(Err(TransportError::Bind {
                        addr: addr.clone(),
                        reason: reason.clone(),
                    }));
                }
                warn!(addr = %addr, reason = %reason, "bind failed");
            }
        }
    }

    /// Registers an accepted stream and hands it to the listener. Runs
    /// inside the context, so it is ordered against close.
    fn register_accepted(&self, stream: TcpStream, context: ExecutionContext) {
        let accepting = self.inner.state.lock().unwrap().phase == Phase::Listening;
        if !accepting {
            // Dropping the stream closes a connection that slipped in after
            // shutdown began.
            debug!("dropping connection accepted during shutdown");
            return;
        }
        let connection = match Connection::spawn(
            stream,
            context,
            Some(self.inner.registry.clone()),
            self.inner.metrics.clone(),
            self.inner.config.max_frame_size,
        ) {
            Ok(connection) => connection,
            Err(e) => {
                warn!(error = %e, "failed to set up accepted connection");
                return;
            }
        };
        self.inner.registry.insert(connection.clone());
        let callback = self.inner.state.lock().unwrap().listener.take();
        if let Some(mut callback) = callback {
            callback.on_connection(connection);
            let mut state = self.inner.state.lock().unwrap();
            if state.listener.is_none() {
                state.listener = Some(callback);
            }
        }
    }

    /// Stops accepting and closes every registered connection.
    ///
    /// Idempotent and memoized. The returned future resolves only when every
    /// individual close has resolved; individual failures are aggregated and
    /// surfaced, never short-circuiting the fan-out.
    pub fn close(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        let (done, result) = oneshot::channel();
        match ExecutionContext::require_current("TransportServer::close") {
            Err(e) => {
                let _ = done.send(Err(e));
            }
            Ok(context) => self.begin_close(done, context),
        }
        async move {
            match result.await {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::ServerClosed),
            }
        }
    }

    fn begin_close(&self, done: oneshot::Sender<Result<()>>, context: ExecutionContext) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if let Some(result) = &state.close_result {
                let _ = done.send(replay_close(result));
                return;
            }
            state.close_waiters.push(done);
            if state.phase == Phase::Closing {
                return;
            }
            state.phase = Phase::Closing;
            if let Some(task) = state.accept_task.take() {
                task.abort();
            }
            state.listener = None;
            for waiter in state.listen_waiters.drain(..) {
                let _ = waiter.send(Err(TransportError::ServerClosed));
            }
        }

        let connections = self.inner.registry.connections();
        let closes: Vec<_> = connections
            .iter()
            .map(|connection| connection.close())
            .collect();
        let server = self.clone();
        tokio::spawn(async move {
            let mut failures = Vec::new();
            for (connection, close) in connections.into_iter().zip(closes) {
                if let Err(e) = close.await {
                    failures.push(format!("{}: {}", connection.id(), e));
                }
            }
            context.execute(move || server.finish_close(failures));
        });
    }

    /// Final close step. Runs inside the context, after every connection
    /// close has resolved.
    fn finish_close(&self, failures: Vec<String>) {
        let mut state = self.inner.state.lock().unwrap();
        state.phase = Phase::Closed;
        let result = if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.join("; "))
        };
        for done in state.close_waiters.drain(..) {
            let _ = done.send(replay_close(&result));
        }
        state.close_result = Some(result);
        info!("transport server closed");
    }
}

fn replay_listen(outcome: &ListenOutcome) -> Result<Member> {
    match outcome {
        ListenOutcome::Bound(member) => Ok(member.clone()),
        ListenOutcome::Failed { addr, reason } => Err(TransportError::Bind {
            addr: addr.clone(),
            reason: reason.clone(),
        }),
    }
}

fn replay_close(result: &std::result::Result<(), String>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(reason) => Err(TransportError::CloseFailed {
            reason: reason.clone(),
        }),
    }
}

/// Resolves and binds the member's address, trying each resolved candidate.
async fn bind_socket(
    member: &Member,
    config: &ServerConfig,
) -> std::result::Result<(TcpListener, u16), String> {
    let addrs = tokio::net::lookup_host((member.host(), member.port()))
        .await
        .map_err(|e| e.to_string())?;
    let mut last_error = None;
    for addr in addrs {
        let socket = match if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        } {
            Ok(socket) => socket,
            Err(e) => {
                last_error = Some(e.to_string());
                continue;
            }
        };
        if config.reuseaddr {
            if let Err(e) = socket.set_reuseaddr(true) {
                last_error = Some(e.to_string());
                continue;
            }
        }
        if let Err(e) = socket.bind(addr) {
            last_error = Some(e.to_string());
            continue;
        }
        match socket.listen(config.accept_backlog) {
            Ok(listener) => match listener.local_addr() {
                Ok(local) => return Ok((listener, local.port())),
                Err(e) => last_error = Some(e.to_string()),
            },
            Err(e) => last_error = Some(e.to_string()),
        }
    }
    Err(last_error.unwrap_or_else(|| "address resolved to nothing".to_string()))
}

/// Accept loop. Context-free; registration re-enters the context.
async fn run_acceptor(listener: TcpListener, server: TransportServer, context: ExecutionContext) {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                debug!(peer = %peer_addr, "accepted connection");
                if server.inner.config.nodelay {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(error = %e, "failed to set TCP_NODELAY");
                    }
                }
                if server.inner.config.keepalive {
                    if let Err(e) = socket2::SockRef::from(&stream).set_keepalive(true) {
                        debug!(error = %e, "failed to set SO_KEEPALIVE");
                    }
                }
                let server = server.clone();
                let callback_context = context.clone();
                context.execute(move || server.register_accepted(stream, callback_context));
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                server.inner.metrics.inc_accept_errors();
            }
        }
    }
}
