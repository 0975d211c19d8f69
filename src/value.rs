//! Minimal RESP value representation and the redirection reply parser.
//!
//! The concrete wire codec lives in the node-session collaborator (out of
//! scope, see `session.rs`); this module only needs enough of a `Value` to
//! let the routing core inspect replies for MOVED/ASK/CLUSTERDOWN strings and
//! to carry results back to callers.

use crate::node::Node;

/// A reply from a node session.
///
/// Deliberately small: the core only ever branches on `Error` to detect
/// redirections, and otherwise treats everything else as an opaque payload
/// to hand back to the caller untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Int(i64),
    Data(Vec<u8>),
    Bulk(Vec<Value>),
    Status(String),
    Okay,
    /// An error string as returned by Redis, e.g. `"MOVED 1000 10.0.0.2:6379"`.
    Error(String),
}

impl Value {
    /// The raw error text, if this value is an `Error`.
    pub fn as_error_text(&self) -> Option<&str> {
        match self {
            Value::Error(text) => Some(text),
            _ => None,
        }
    }
}

/// The outcome of classifying a reply for redirection purposes.
#[derive(Debug, Clone, PartialEq)]
pub enum Redirect {
    /// `MOVED <slot> <ip>:<port>` — slot ownership permanently changed.
    Moved(Node),
    /// `ASK <slot> <ip>:<port>` — a single in-flight migration hop.
    Ask(Node),
    /// `CLUSTERDOWN ...` — the cluster itself is unavailable.
    ClusterDown,
    /// Any other error text; not a routing signal.
    Other(String),
}

/// Classify an error string per §6's wire formats.
///
/// Only the prefix of the string is inspected, matching: `MOVED`,
/// `ASK ` (note the trailing space, distinguishing it from e.g. `ASKING`),
/// and `CLUSTERDOWN`.
pub fn classify_error(text: &str) -> Redirect {
    if text.starts_with("MOVED") {
        if let Some(node) = parse_redirect_node(text) {
            return Redirect::Moved(node);
        }
    } else if text.starts_with("ASK ") {
        if let Some(node) = parse_redirect_node(text) {
            return Redirect::Ask(node);
        }
    } else if text.starts_with("CLUSTERDOWN") {
        return Redirect::ClusterDown;
    }
    Redirect::Other(text.to_string())
}

/// Parse the `<ip>:<port>` suffix shared by `MOVED` and `ASK` replies.
///
/// Equivalent to the regex `^(?:MOVED|ASK) [^ ]+ ([^:]+):([^ ]+)` from §6:
/// split on whitespace, take the third field, and split that at the last `:`
/// so IPv6 literals (however unlikely in a `host:port` cluster reply) don't
/// break the port split.
fn parse_redirect_node(text: &str) -> Option<Node> {
    let mut parts = text.split_whitespace();
    let _keyword = parts.next()?;
    let _slot = parts.next()?;
    let addr = parts.next()?;
    let (host, port) = addr.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    Some(Node::new(host.to_string(), port))
}
