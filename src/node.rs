//! The `Node` data type: an immutable `{ip, port}` pair.

use std::fmt;

/// A single Redis Cluster node address.
///
/// Immutable once constructed, per §3. `addr()` renders the canonical
/// `"ip:port"` form used as the key into session pools and the topology's
/// `ServerList`/`MasterList` sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Node {
    ip: String,
    port: u16,
}

impl Node {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Node {
            ip: ip.into(),
            port,
        }
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Canonical `"ip:port"` form, used as the session-pool and bucket key.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Parse a `"host:port"` string, e.g. as seen in a seed list or a
    /// `MOVED`/`ASK` redirect target.
    pub fn parse(s: &str) -> Option<Node> {
        let (host, port) = s.rsplit_once(':')?;
        let port: u16 = port.parse().ok()?;
        if host.is_empty() {
            return None;
        }
        Some(Node::new(host.to_string(), port))
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}
