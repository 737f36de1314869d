//! Cluster member identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a cluster endpoint: numeric id plus a host/port address.
///
/// A port of `0` requests an ephemeral bind; the actual bound port is
/// reported back through the member returned by
/// [`TransportServer::listen`](crate::server::TransportServer::listen).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    id: u64,
    host: String,
    port: u16,
}

impl Member {
    /// Creates a member identity.
    pub fn new(id: u64, host: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            host: host.into(),
            port,
        }
    }

    /// Numeric member id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Host name or address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port, `0` meaning "assign ephemerally".
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` form, as accepted by socket address resolution.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Copy of this member with the port rewritten, used to report the
    /// actual port of an ephemeral bind.
    pub fn with_port(&self, port: u16) -> Member {
        Member {
            id: self.id,
            host: self.host.clone(),
            port,
        }
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.host, self.port)
    }
}
