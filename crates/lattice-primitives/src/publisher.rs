//! Server-side change-event fan-out.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use lattice_transport::{Connection, ConnectionId, ExecutionContext, TransportError};

use crate::error::Result;
use crate::event::ChangeEvent;

/// Outcome of publishing one event to the current subscriber set.
#[derive(Debug)]
pub struct PublishOutcome {
    /// Subscribers whose send completed.
    pub delivered: usize,
    /// Subscribers whose send failed, with the surfaced transport error.
    /// Failed subscribers are *not* unsubscribed or torn down; reconnection
    /// and catch-up are the session layer's concern.
    pub failures: Vec<(ConnectionId, TransportError)>,
}

/// Fans committed change events out to subscribed connections.
///
/// Delivery is at-most-once per commit per subscriber: there is no
/// transport-level retry or buffering of missed events.
#[derive(Clone, Default)]
pub struct ChangeEventPublisher {
    subscribers: Arc<DashMap<ConnectionId, Connection>>,
}

impl ChangeEventPublisher {
    /// Creates a publisher with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a connection to future change events.
    pub fn subscribe(&self, connection: Connection) {
        debug!(connection = %connection.id(), "subscribed to change events");
        self.subscribers.insert(connection.id(), connection);
    }

    /// Removes a subscriber; events committed afterwards are not delivered
    /// to it.
    pub fn unsubscribe(&self, id: ConnectionId) -> Option<Connection> {
        self.subscribers.remove(&id).map(|(_, connection)| connection)
    }

    /// Number of current subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether no connection is subscribed.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Sends `event` to every current subscriber.
    ///
    /// Must be called inside an execution context. The returned future
    /// resolves once every send has resolved; per-subscriber failures are
    /// collected in the outcome rather than short-circuiting the fan-out.
    pub fn publish(
        &self,
        event: &ChangeEvent,
    ) -> Result<impl Future<Output = PublishOutcome> + Send + 'static> {
        ExecutionContext::require_current("ChangeEventPublisher::publish")?;
        let payload = event.encode()?;
        let sends: Vec<_> = self
            .subscribers
            .iter()
            .map(|entry| (*entry.key(), entry.value().send(payload.clone())))
            .collect();
        Ok(async move {
            let mut outcome = PublishOutcome {
                delivered: 0,
                failures: Vec::new(),
            };
            for (id, send) in sends {
                match send.await {
                    Ok(()) => outcome.delivered += 1,
                    Err(e) => outcome.failures.push((id, e)),
                }
            }
            outcome
        })
    }
}
