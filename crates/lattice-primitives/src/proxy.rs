//! Client-side change-event delivery.

use tracing::warn;

use lattice_transport::Connection;

use crate::error::Result;
use crate::event::ChangeEvent;
use crate::versioned::VersionedValue;

/// Client-facing shape of asynchronous change notifications: invoked once
/// per delivered commit with the new and previous versioned values.
pub trait ValueListener: Send + 'static {
    /// Called for each delivered state transition, new value first.
    fn on_change(&mut self, new_value: &VersionedValue, old_value: &VersionedValue);
}

impl<F> ValueListener for F
where
    F: FnMut(&VersionedValue, &VersionedValue) + Send + 'static,
{
    fn on_change(&mut self, new_value: &VersionedValue, old_value: &VersionedValue) {
        self(new_value, old_value)
    }
}

/// Client-side proxy for a replicated value's change notifications.
///
/// Decodes events arriving on its connection and delivers them to a
/// [`ValueListener`]. Events that do not advance the last observed version
/// are dropped, so the versions a listener observes are strictly increasing
/// even against a misbehaving peer.
pub struct ValueProxy {
    connection: Connection,
}

impl ValueProxy {
    /// Wraps a dialed connection.
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Installs `listener` as the dispatch target for change events.
    ///
    /// Must be called inside an execution context; the listener runs inside
    /// the connection's context. A later subscription replaces the previous
    /// one.
    pub fn subscribe<L>(&self, listener: L) -> Result<()>
    where
        L: ValueListener,
    {
        let mut listener = listener;
        let mut last_version = 0u64;
        self.connection.on_receive(move |payload| {
            let event = match ChangeEvent::decode(&payload) {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "dropping undecodable change event");
                    return;
                }
            };
            if event.new_value().version <= last_version {
                warn!(
                    version = event.new_value().version,
                    last_version, "dropping stale change event"
                );
                return;
            }
            last_version = event.new_value().version;
            listener.on_change(event.new_value(), event.old_value());
        })?;
        Ok(())
    }
}
