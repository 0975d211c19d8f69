//! AdminFanout: run a command against every master independently (§4.7).
//!
//! Mirrors a `cluster_pipeline`/`route_pipeline` machinery
//! that walks every known master for cluster-wide commands, simplified here
//! to the small enumerated allow-set this crate actually needs.

use crate::config::ClusterConfig;
use crate::error::{ErrorKind, RedisError, RedisResult};
use crate::session::{ensure_authenticated, Connector, NodeSession, SessionPool};
use crate::topology::TopologyCache;
use crate::value::Value;

const ALLOWED: &[&str] = &["FLUSHALL", "FLUSHDB"];
const DENIED: &[&str] = &["CONFIG", "SHUTDOWN"];

/// Runs `cmd` against every node in the current `MasterList`, independently.
pub struct AdminFanout<'a, S, C> {
    config: &'a ClusterConfig,
    pool: &'a SessionPool<S, C>,
}

impl<'a, S: NodeSession, C: Connector<S>> AdminFanout<'a, S, C> {
    pub fn new(config: &'a ClusterConfig, pool: &'a SessionPool<S, C>) -> Self {
        AdminFanout { config, pool }
    }

    /// Run `cmd` on every master, returning success only if every call
    /// succeeds; on partial failure, the concatenated error messages.
    pub fn run_on_all_masters(&self, cmd: &str, args: &[Vec<u8>]) -> RedisResult<()> {
        let upper = cmd.to_ascii_uppercase();
        if DENIED.contains(&upper.as_str()) {
            return Err(RedisError::from((
                ErrorKind::UnsupportedCommand,
                "command is not permitted for fan-out",
            )));
        }
        if !ALLOWED.contains(&upper.as_str()) {
            return Err(RedisError::from((
                ErrorKind::UnsupportedCommand,
                "command is not in the fan-out allow-set",
            )));
        }

        let topology = TopologyCache::get(self.config.name())
            .ok_or_else(|| RedisError::from((ErrorKind::TopologyUnknown, "no topology loaded")))?;

        let mut errors = Vec::new();
        for master in topology.masters.iter() {
            match self.run_one(master, &upper, args) {
                Ok(value) => {
                    if let Some(text) = value.as_error_text() {
                        errors.push(format!("{master}: {text}"));
                    }
                }
                Err(err) => errors.push(format!("{master}: {err}")),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RedisError::from((
                ErrorKind::BackendError,
                "one or more masters failed during fan-out",
                errors.join("; "),
            )))
        }
    }

    fn run_one(&self, node: &crate::node::Node, cmd: &str, args: &[Vec<u8>]) -> RedisResult<Value> {
        let mut session = self.pool.take(node)?;
        if let Err(err) = ensure_authenticated(&mut session, self.config.auth()) {
            self.pool.release(node, session);
            return Err(err);
        }
        let result = session.call(cmd, args);
        self.pool.release(node, session);
        result
    }
}
