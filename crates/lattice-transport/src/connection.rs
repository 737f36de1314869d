//! Framed duplex connections.
//!
//! A [`Connection`] owns one TCP channel, split into a reader task that
//! decodes inbound frames and a writer task that drains an outbound queue.
//! Both tasks are context-free; every observable effect (handler dispatch,
//! completion of pending sends, close finalization) re-enters the captured
//! [`ExecutionContext`] first.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::context::ExecutionContext;
use crate::error::{Result, TransportError};
use crate::framing::{self, FrameDecoder};
use crate::metrics::TransportMetrics;
use crate::registry::ConnectionRegistry;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

type ReceiveHandler = Box<dyn FnMut(Bytes) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Open,
    Closing,
    Closed,
}

struct ConnectionState {
    status: Status,
    handler: Option<ReceiveHandler>,
    close_waiters: Vec<oneshot::Sender<Result<()>>>,
    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
}

struct WriteRequest {
    frame: Bytes,
    done: oneshot::Sender<Result<()>>,
}

struct ConnectionInner {
    id: ConnectionId,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    max_frame_size: usize,
    context: ExecutionContext,
    registry: Option<ConnectionRegistry>,
    metrics: Arc<TransportMetrics>,
    writes: mpsc::UnboundedSender<WriteRequest>,
    state: Mutex<ConnectionState>,
}

/// One established duplex channel. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Wraps an established stream, spawning its reader and writer tasks.
    /// Server-side connections carry the registry they remove themselves
    /// from on close; dialed connections pass `None`.
    pub(crate) fn spawn(
        stream: TcpStream,
        context: ExecutionContext,
        registry: Option<ConnectionRegistry>,
        metrics: Arc<TransportMetrics>,
        max_frame_size: usize,
    ) -> Result<Connection> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        let (read_half, write_half) = stream.into_split();
        let (writes, write_queue) = mpsc::unbounded_channel();
        let inner = Arc::new(ConnectionInner {
            id: ConnectionId::next(),
            peer_addr,
            local_addr,
            max_frame_size,
            context,
            registry,
            metrics,
            writes,
            state: Mutex::new(ConnectionState {
                status: Status::Open,
                handler: None,
                close_waiters: Vec::new(),
                reader_task: None,
                writer_task: None,
            }),
        });
        {
            // Handles are stored under the lock so an immediate EOF on the
            // reader cannot begin teardown before they are visible.
            let mut state = inner.state.lock().unwrap();
            state.reader_task = Some(tokio::spawn(run_reader(read_half, inner.clone())));
            state.writer_task = Some(tokio::spawn(run_writer(write_queue, write_half, inner.clone())));
        }
        inner.metrics.inc_connections_opened();
        debug!(connection = %inner.id, peer = %peer_addr, "connection established");
        Ok(Connection { inner })
    }

    /// Identity of this connection.
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Address of the remote peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// Local address of the underlying socket.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// The execution context this connection is confined to.
    pub fn context(&self) -> &ExecutionContext {
        &self.inner.context
    }

    /// Whether the connection has neither started nor finished closing.
    pub fn is_open(&self) -> bool {
        self.inner.state.lock().unwrap().status == Status::Open
    }

    /// Enqueues one framed payload for writing.
    ///
    /// The returned future resolves once the write is confirmed by the
    /// transport, or fails with the underlying error; there is no retry at
    /// this layer. Frames are written atomically in submission order.
    pub fn send(&self, payload: Bytes) -> impl Future<Output = Result<()>> + Send + 'static {
        let (done, result) = oneshot::channel();
        match ExecutionContext::require_current("Connection::send") {
            Err(e) => {
                let _ = done.send(Err(e));
            }
            Ok(_) => self.enqueue_write(payload, done),
        }
        async move {
            match result.await {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::ConnectionClosed),
            }
        }
    }

    fn enqueue_write(&self, payload: Bytes, done: oneshot::Sender<Result<()>>) {
        if self.inner.state.lock().unwrap().status != Status::Open {
            let _ = done.send(Err(TransportError::ConnectionClosed));
            return;
        }
        let frame = match framing::encode_with_limit(&payload, self.inner.max_frame_size) {
            Ok(frame) => frame,
            Err(e) => {
                let _ = done.send(Err(e));
                return;
            }
        };
        if let Err(rejected) = self.inner.writes.send(WriteRequest { frame, done }) {
            let _ = rejected.0.done.send(Err(TransportError::ConnectionClosed));
        }
    }

    /// Installs the dispatch target for inbound payloads.
    ///
    /// Exactly one handler is active at a time; a later registration
    /// replaces the previous one. The handler runs inside this connection's
    /// execution context.
    pub fn on_receive<H>(&self, handler: H) -> Result<()>
    where
        H: FnMut(Bytes) + Send + 'static,
    {
        ExecutionContext::require_current("Connection::on_receive")?;
        let mut state = self.inner.state.lock().unwrap();
        if state.status != Status::Open {
            return Err(TransportError::ConnectionClosed);
        }
        state.handler = Some(Box::new(handler));
        Ok(())
    }

    /// Closes the connection.
    ///
    /// Idempotent: the first call performs the real shutdown; concurrent and
    /// later calls share the same pending or completed result. Pending sends
    /// resolve with [`TransportError::ConnectionClosed`].
    pub fn close(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        let (done, result) = oneshot::channel();
        match ExecutionContext::require_current("Connection::close") {
            Err(e) => {
                let _ = done.send(Err(e));
            }
            Ok(_) => begin_close(&self.inner, Some(done)),
        }
        async move {
            match result.await {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::ConnectionClosed),
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer_addr)
            .finish()
    }
}

/// Starts teardown unless it is already underway. Runs inside the context.
fn begin_close(inner: &Arc<ConnectionInner>, waiter: Option<oneshot::Sender<Result<()>>>) {
    let (reader, writer) = {
        let mut state = inner.state.lock().unwrap();
        if state.status == Status::Closed {
            if let Some(done) = waiter {
                let _ = done.send(Ok(()));
            }
            return;
        }
        if let Some(done) = waiter {
            state.close_waiters.push(done);
        }
        if state.status == Status::Closing {
            return;
        }
        state.status = Status::Closing;
        (state.reader_task.take(), state.writer_task.take())
    };
    if let Some(task) = &reader {
        task.abort();
    }
    if let Some(task) = &writer {
        task.abort();
    }
    // Aborting the writer drops its queue, resolving still-enqueued sends
    // as ConnectionClosed; dropping the write half shuts the socket down.
    let inner = inner.clone();
    tokio::spawn(async move {
        if let Some(task) = reader {
            let _ = task.await;
        }
        if let Some(task) = writer {
            let _ = task.await;
        }
        let connection = inner.clone();
        inner.context.execute(move || finish_close(&connection));
    });
}

/// Final close step: registry removal, waiter completion. Runs inside the
/// context, after both I/O tasks have terminated.
fn finish_close(inner: &Arc<ConnectionInner>) {
    if let Some(registry) = &inner.registry {
        registry.remove(inner.id);
    }
    inner.metrics.inc_connections_closed();
    let mut state = inner.state.lock().unwrap();
    state.status = Status::Closed;
    state.handler = None;
    for done in state.close_waiters.drain(..) {
        let _ = done.send(Ok(()));
    }
    debug!(connection = %inner.id, "connection closed");
}

/// Hands one decoded payload to the installed handler. Runs inside the
/// context.
fn dispatch(inner: &Arc<ConnectionInner>, payload: Bytes) {
    inner.metrics.inc_frames_received();
    inner.metrics.add_bytes_received(payload.len() as u64);
    let handler = inner.state.lock().unwrap().handler.take();
    match handler {
        Some(mut handler) => {
            handler(payload);
            let mut state = inner.state.lock().unwrap();
            // The handler may have installed a replacement for itself.
            if state.handler.is_none() && state.status == Status::Open {
                state.handler = Some(handler);
            }
        }
        None => debug!(connection = %inner.id, "no receive handler installed, dropping payload"),
    }
}

async fn run_reader(mut read_half: OwnedReadHalf, inner: Arc<ConnectionInner>) {
    let mut decoder = FrameDecoder::with_max_frame_size(inner.max_frame_size);
    let mut chunk = vec![0u8; inner.max_frame_size];
    loop {
        let bytes_read = match read_half.read(&mut chunk).await {
            Ok(0) => {
                debug!(connection = %inner.id, "peer closed the connection");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                debug!(connection = %inner.id, error = %e, "read failed");
                break;
            }
        };
        decoder.extend(&chunk[..bytes_read]);
        loop {
            match decoder.next_frame() {
                Ok(Some(payload)) => {
                    let connection = inner.clone();
                    inner
                        .context
                        .execute(move || dispatch(&connection, payload));
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(connection = %inner.id, error = %e, "protocol violation, closing connection");
                    inner.metrics.inc_protocol_violations();
                    let connection = inner.clone();
                    inner
                        .context
                        .execute(move || begin_close(&connection, None));
                    return;
                }
            }
        }
    }
    let connection = inner.clone();
    inner
        .context
        .execute(move || begin_close(&connection, None));
}

async fn run_writer(
    mut queue: mpsc::UnboundedReceiver<WriteRequest>,
    mut write_half: OwnedWriteHalf,
    inner: Arc<ConnectionInner>,
) {
    while let Some(request) = queue.recv().await {
        match write_frame(&mut write_half, &request.frame).await {
            Ok(()) => {
                let metrics = inner.metrics.clone();
                let frame_len = request.frame.len() as u64;
                let done = request.done;
                inner.context.execute(move || {
                    metrics.inc_frames_sent();
                    metrics.add_bytes_sent(frame_len);
                    let _ = done.send(Ok(()));
                });
            }
            Err(e) => {
                warn!(connection = %inner.id, error = %e, "write failed, closing connection");
                inner.metrics.inc_send_errors();
                let done = request.done;
                let connection = inner.clone();
                inner.context.execute(move || {
                    let _ = done.send(Err(TransportError::Io(e)));
                    begin_close(&connection, None);
                });
                break;
            }
        }
    }
}

async fn write_frame(write_half: &mut OwnedWriteHalf, frame: &[u8]) -> std::io::Result<()> {
    write_half.write_all(frame).await?;
    write_half.flush().await
}
