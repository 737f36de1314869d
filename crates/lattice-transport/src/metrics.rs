//! Transport layer metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Snapshot of transport metrics at a point in time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Number of connections opened (accepted or dialed).
    pub connections_opened: u64,
    /// Number of connections closed.
    pub connections_closed: u64,
    /// Number of currently open connections.
    pub active_connections: u64,
    /// Number of frames written to the wire.
    pub frames_sent: u64,
    /// Number of frames decoded from the wire.
    pub frames_received: u64,
    /// Total payload bytes sent, framing included.
    pub bytes_sent: u64,
    /// Total payload bytes received.
    pub bytes_received: u64,
    /// Number of failed writes.
    pub send_errors: u64,
    /// Number of failed accepts.
    pub accept_errors: u64,
    /// Number of inbound protocol violations (oversized frames).
    pub protocol_violations: u64,
}

/// Thread-safe transport metrics collector.
#[derive(Debug, Default)]
pub struct TransportMetrics {
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    send_errors: AtomicU64,
    accept_errors: AtomicU64,
    protocol_violations: AtomicU64,
}

impl TransportMetrics {
    /// Creates a collector with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an opened connection.
    pub fn inc_connections_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a closed connection.
    pub fn inc_connections_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a frame written to the wire.
    pub fn inc_frames_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a frame decoded from the wire.
    pub fn inc_frames_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds to the sent byte counter.
    pub fn add_bytes_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Adds to the received byte counter.
    pub fn add_bytes_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records a failed write.
    pub fn inc_send_errors(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed accept.
    pub fn inc_accept_errors(&self) {
        self.accept_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an inbound protocol violation.
    pub fn inc_protocol_violations(&self) {
        self.protocol_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a consistent-enough snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let opened = self.connections_opened.load(Ordering::Relaxed);
        let closed = self.connections_closed.load(Ordering::Relaxed);
        MetricsSnapshot {
            connections_opened: opened,
            connections_closed: closed,
            active_connections: opened.saturating_sub(closed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            accept_errors: self.accept_errors.load(Ordering::Relaxed),
            protocol_violations: self.protocol_violations.load(Ordering::Relaxed),
        }
    }
}
