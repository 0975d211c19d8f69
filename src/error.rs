//! Error types for the cluster routing core.
//!
//! A plain
//! `ErrorKind` enum plus a `RedisError` wrapper, constructible from
//! `(ErrorKind, &'static str)` / `(ErrorKind, &'static str, String)` tuples the
//! way `cluster.rs` builds its `ResponseError`s.

use std::fmt;
use std::io;

/// Category of a routing-layer failure.
///
/// These are the kinds the CORE can raise; a `BackendError` wraps anything
/// Redis itself returned that isn't a routing signal (MOVED/ASK/CLUSTERDOWN).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing `name` or empty `serv_list` on `ClusterConfig`.
    ConfigInvalid,
    /// No slot map available, or the target slot is unassigned.
    TopologyUnknown,
    /// Transport-level failure after exhausting connection attempts.
    ConnectFailed,
    /// `AUTH` was rejected; never retried.
    AuthFailed,
    /// The cluster reported `CLUSTERDOWN`.
    ClusterDown,
    /// The redirection loop ran `max_redirection` times without resolving.
    MaxRedirectionsExceeded,
    /// Server replied `ASK` while already in an `Asking` state.
    NestedAskRedirection,
    /// Command is in the admin-fanout deny set (`CONFIG`, `SHUTDOWN`, ...).
    UnsupportedCommand,
    /// `EVAL`/`EVALSHA` called with a missing, non-numeric, or >1 `nkeys`.
    EvalKeysInvalid,
    /// A `SlotEntry` was empty when a node needed to be selected from it.
    NodeSelectionFailed,
    /// Any other error string returned by Redis, passed through unchanged.
    BackendError,
    /// Underlying I/O failure (e.g. from a `NamedLock` or session wiring).
    IoError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ConfigInvalid => "config invalid",
            ErrorKind::TopologyUnknown => "topology unknown",
            ErrorKind::ConnectFailed => "connect failed",
            ErrorKind::AuthFailed => "auth failed",
            ErrorKind::ClusterDown => "cluster down",
            ErrorKind::MaxRedirectionsExceeded => "max redirections exceeded",
            ErrorKind::NestedAskRedirection => "nested ask redirection",
            ErrorKind::UnsupportedCommand => "unsupported command",
            ErrorKind::EvalKeysInvalid => "eval keys invalid",
            ErrorKind::NodeSelectionFailed => "node selection failed",
            ErrorKind::BackendError => "backend error",
            ErrorKind::IoError => "io error",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
enum Repr {
    Simple(ErrorKind, &'static str),
    Detailed(ErrorKind, &'static str, String),
    Io(io::Error),
}

/// A routing-layer error.
#[derive(Debug)]
pub struct RedisError(Repr);

impl RedisError {
    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        match &self.0 {
            Repr::Simple(kind, _) => *kind,
            Repr::Detailed(kind, _, _) => *kind,
            Repr::Io(_) => ErrorKind::IoError,
        }
    }

    /// Whether this error is a routing signal rather than a hard failure.
    ///
    /// `MaxRedirectionsExceeded`, `ClusterDown`, `AuthFailed`, `ConfigInvalid`,
    /// `EvalKeysInvalid`, `UnsupportedCommand`, and `NestedAskRedirection` are
    /// never retried by the executor; everything else may trigger a refresh.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::ClusterDown
                | ErrorKind::AuthFailed
                | ErrorKind::ConfigInvalid
                | ErrorKind::EvalKeysInvalid
                | ErrorKind::UnsupportedCommand
                | ErrorKind::NestedAskRedirection
                | ErrorKind::MaxRedirectionsExceeded
        )
    }
}

impl fmt::Display for RedisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Repr::Simple(kind, msg) => write!(f, "{kind}: {msg}"),
            Repr::Detailed(kind, msg, detail) => write!(f, "{kind}: {msg} ({detail})"),
            Repr::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for RedisError {}

impl From<(ErrorKind, &'static str)> for RedisError {
    fn from((kind, msg): (ErrorKind, &'static str)) -> Self {
        RedisError(Repr::Simple(kind, msg))
    }
}

impl From<(ErrorKind, &'static str, String)> for RedisError {
    fn from((kind, msg, detail): (ErrorKind, &'static str, String)) -> Self {
        RedisError(Repr::Detailed(kind, msg, detail))
    }
}

impl From<io::Error> for RedisError {
    fn from(err: io::Error) -> Self {
        RedisError(Repr::Io(err))
    }
}

/// Convenience alias used throughout the crate.
pub type RedisResult<T> = Result<T, RedisError>;
