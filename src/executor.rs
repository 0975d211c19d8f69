//! CommandExecutor: runs a single command through the slot-routing and
//! redirection state machine (§4.5).
//!
//! Mirrors a `cluster.rs::execute_on_all`/retry loop, which
//! also walks MOVED/ASK/CLUSTERDOWN in a bounded loop against a `RefCell`
//! slot map; generalized here to the shared `TopologyCache` and to the
//! explicit `Normal`/`Asking`/`Done`/`Failed` states.

use log::{debug, trace, warn};

use crate::config::ClusterConfig;
use crate::error::{ErrorKind, RedisError, RedisResult};
use crate::hash::slot_of;
use crate::loader;
use crate::node::Node;
use crate::selector::{self, ReadPolicy};
use crate::session::{ensure_authenticated, Connector, NodeSession, SessionPool};
use crate::topology::{Topology, TopologyCache};
use crate::value::{classify_error, Redirect, Value};

/// Internal redirection state (§4.5).
enum State {
    /// No outstanding redirect; route by the topology's own ownership.
    Normal,
    /// An `ASK` redirect is in flight to `Node`; the next attempt must send
    /// `ASKING` immediately before the command, and exactly once.
    Asking(Node),
    /// A session couldn't be opened for the chosen node. Retried from
    /// `Normal` on the next iteration (§4.5 step 4); the outer loop returns
    /// `err` directly if this was the last iteration, rather than masking it
    /// behind `MaxRedirectionsExceeded`.
    ConnectFailed(RedisError),
    Done(Value),
    Failed(RedisError),
}

/// Runs one command to completion, following MOVED/ASK redirects up to
/// `config.max_redirection()` times and refreshing the topology on demand.
pub struct CommandExecutor<'a, S, C> {
    config: &'a ClusterConfig,
    pool: &'a SessionPool<S, C>,
}

impl<'a, S: NodeSession, C: Connector<S>> CommandExecutor<'a, S, C> {
    pub fn new(config: &'a ClusterConfig, pool: &'a SessionPool<S, C>) -> Self {
        CommandExecutor { config, pool }
    }

    /// Execute `cmd` against `key`, with `args` as the already-prepared
    /// argument vector.
    ///
    /// EVAL/EVALSHA (§4.5, §6): the caller passes the full Redis argument
    /// list (`script, numkeys, key [key ...], arg [arg ...]`) as `args` and
    /// `key` as the first key used only for slot routing; this function
    /// never re-derives or re-prepends it.
    pub fn execute(&self, key: &[u8], cmd: &str, args: &[Vec<u8>], policy: ReadPolicy) -> RedisResult<Value> {
        let slot = slot_of(key);
        let mut state = State::Normal;

        let max_redirection = self.config.max_redirection().max(1);
        for attempt in 0..max_redirection {
            state = match state {
                State::Done(value) => return Ok(value),
                State::Failed(err) => return Err(err),
                State::ConnectFailed(err) => {
                    if attempt + 1 >= max_redirection {
                        return Err(err);
                    }
                    State::Normal
                }
                State::Normal => self.attempt_normal(slot, cmd, args, policy),
                State::Asking(node) => self.attempt_asking(&node, cmd, args),
            };
            trace!("executor attempt {attempt} on slot {slot} for {cmd}");
        }

        match state {
            State::Done(value) => Ok(value),
            State::Failed(err) => Err(err),
            State::ConnectFailed(err) => Err(err),
            State::Normal | State::Asking(_) => Err(RedisError::from((
                ErrorKind::MaxRedirectionsExceeded,
                "redirection loop exhausted max_redirection without resolving",
            ))),
        }
    }

    /// Snapshot the topology and resolve `slot`'s owner (§4.5 step 2). No
    /// refresh is attempted here: an absent or unassigned slot fails
    /// immediately with `TopologyUnknown`, as written, rather than chasing an
    /// unbounded number of extra round trips within a single attempt.
    fn attempt_normal(&self, slot: u16, cmd: &str, args: &[Vec<u8>], policy: ReadPolicy) -> State {
        let entry = match TopologyCache::get(self.config.name()).and_then(|t| t.entry_for(slot)) {
            Some(entry) => entry,
            None => {
                return State::Failed(RedisError::from((
                    ErrorKind::TopologyUnknown,
                    "slot has no owning node",
                )))
            }
        };

        let (node, is_replica) = match selector::pick(&entry, policy, None) {
            Ok(picked) => picked,
            Err(err) => return State::Failed(err),
        };

        self.dispatch(&node, is_replica, cmd, args)
    }

    /// Run a single `ASKING` + command hop against `target`, for a pipeline
    /// item recovering from a per-item ASK reply (§4.6 step 5). Unlike the
    /// main `execute` loop this never re-enters the redirection state
    /// machine: a second redirect here is surfaced as a backend error rather
    /// than chased further.
    pub fn execute_ask(&self, target: &Node, cmd: &str, args: &[Vec<u8>]) -> RedisResult<Value> {
        match self.attempt_asking(target, cmd, args) {
            State::Done(value) => Ok(value),
            State::Failed(err) => Err(err),
            State::ConnectFailed(err) => Err(err),
            State::Normal | State::Asking(_) => Err(RedisError::from((
                ErrorKind::BackendError,
                "unexpected redirection chasing a single ASK hop",
            ))),
        }
    }

    fn attempt_asking(&self, node: &Node, cmd: &str, args: &[Vec<u8>]) -> State {
        let mut session = match self.pool.take(node) {
            Ok(session) => session,
            Err(err) => {
                let _ = self.refresh();
                return State::ConnectFailed(err);
            }
        };
        if let Err(err) = ensure_authenticated(&mut session, self.config.auth()) {
            self.pool.release(node, session);
            return State::Failed(err);
        }
        if let Err(err) = session.asking() {
            self.pool.release(node, session);
            let _ = self.refresh();
            return State::Failed(err);
        }
        let result = session.call(cmd, args);
        self.pool.release(node, session);
        self.classify(result, true)
    }

    fn dispatch(&self, node: &Node, is_replica: bool, cmd: &str, args: &[Vec<u8>]) -> State {
        let mut session = match self.pool.take(node) {
            Ok(session) => session,
            Err(err) => {
                let _ = self.refresh();
                return State::ConnectFailed(err);
            }
        };
        if let Err(err) = ensure_authenticated(&mut session, self.config.auth()) {
            self.pool.release(node, session);
            return State::Failed(err);
        }
        // READONLY is sent once per session, on first use against a replica
        // (§4.5); a session with `reused_times > 0` has already had it set.
        if is_replica && session.get_reused_times() == 0 {
            if let Err(err) = session.readonly() {
                self.pool.release(node, session);
                let _ = self.refresh();
                return State::Failed(err);
            }
        }
        let result = session.call(cmd, args);
        self.pool.release(node, session);
        self.classify(result, false)
    }

    /// Interpret a command's reply, given whether this hop was already
    /// chasing an `ASK` redirect (§4.5 step 8). A second `ASK` in a row is a
    /// protocol violation, not a redirect to follow further.
    fn classify(&self, result: RedisResult<Value>, currently_asking: bool) -> State {
        match result {
            Ok(value) => match value.as_error_text() {
                None => State::Done(value),
                Some(text) => match classify_error(text) {
                    Redirect::Moved(node) => {
                        debug!("MOVED to {node}, refreshing topology");
                        match self.refresh() {
                            Ok(_) => State::Normal,
                            Err(err) => State::Failed(err),
                        }
                    }
                    Redirect::Ask(node) => {
                        if currently_asking {
                            warn!("nested ASK redirect to {node} while already asking");
                            State::Failed(RedisError::from((
                                ErrorKind::NestedAskRedirection,
                                "server returned ASK while already chasing an ASK redirect",
                            )))
                        } else {
                            State::Asking(node)
                        }
                    }
                    Redirect::ClusterDown => {
                        warn!("cluster reported CLUSTERDOWN");
                        State::Failed(RedisError::from((ErrorKind::ClusterDown, "cluster is down")))
                    }
                    Redirect::Other(text) => {
                        let _ = self.refresh();
                        State::Failed(RedisError::from((ErrorKind::BackendError, "backend error", text)))
                    }
                },
            },
            Err(err) => State::Failed(err),
        }
    }

    /// Force a topology reload and publish it, returning the new snapshot.
    /// Used both by the redirection loop and by `PipelineExecutor`'s
    /// at-most-once-per-commit refresh (§4.6 step 5).
    pub fn refresh(&self) -> RedisResult<std::sync::Arc<Topology>> {
        let topology = loader::load(self.config, self.pool)?;
        TopologyCache::replace(self.config.name(), topology);
        Ok(TopologyCache::get(self.config.name()).expect("just replaced"))
    }
}
