//! The node-session interface (§6, consumed) and the per-node keep-alive
//! pool that implements "connection reuse discipline" (§1 scope) on top of
//! it.
//!
//! The concrete RESP wire protocol — connect, auth, read/write, keepalive,
//! pipeline at node level — is out of scope for this crate (§1); callers
//! supply it by implementing `NodeSession`. This mirrors a
//! `Connect` trait (`cluster.rs`), which lets `ClusterConnection<C>` stay
//! generic over any `C: ConnectionLike + Connect` so the real RESP
//! implementation is pluggable and tests can substitute a mock `C`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::RedisResult;
use crate::node::Node;
use crate::value::Value;

/// An abstract handle to one RESP connection to a single node.
///
/// Implementors own the actual socket, framing, and keepalive; this crate
/// only ever calls the methods below, in the order described in §4.5/§4.6.
pub trait NodeSession: Sized {
    /// `0` for a freshly connected session; nonzero once it has been
    /// returned to and reused from a keep-alive pool (§4.8).
    fn get_reused_times(&self) -> u32;

    /// Record that this session has just been handed out from the pool
    /// again, for `get_reused_times()` bookkeeping.
    fn mark_reused(&mut self);

    fn auth(&mut self, password: &str) -> RedisResult<()>;

    fn set_keepalive(&mut self, idle: Duration, pool_size: usize) -> RedisResult<()>;

    fn readonly(&mut self) -> RedisResult<()>;

    fn asking(&mut self) -> RedisResult<()>;

    /// Dynamic command dispatch (§6, §9): issue `cmd` with `args` and return
    /// its reply. `EVAL`/`EVALSHA` are passed their raw argument list;
    /// everything else gets `key` prepended by the caller before `args`.
    fn call(&mut self, cmd: &str, args: &[Vec<u8>]) -> RedisResult<Value>;

    /// `CLUSTER SLOTS`, already parsed into nested bulk replies.
    fn cluster_slots(&mut self) -> RedisResult<Value>;

    /// `CLUSTER NODES`, as the raw newline-delimited text.
    fn cluster_nodes(&mut self) -> RedisResult<String>;

    /// Switch to buffering mode for a node-level pipeline.
    fn init_pipeline(&mut self);

    /// Flush the buffered pipeline and return one reply per buffered
    /// command, in submission order.
    fn commit_pipeline(&mut self) -> RedisResult<Vec<RedisResult<Value>>>;
}

/// Opens fresh `NodeSession`s on demand.
///
/// Kept as a separate trait (rather than a static `NodeSession::connect`
/// associated function, as a `Connect` trait might do it) so a
/// connector can be an ordinary value — e.g. a closure capturing shared mock
/// state in tests, or a handle to a real connection-info/TLS config in
/// production — instead of requiring the session type itself to know how to
/// construct itself out of thin air.
pub trait Connector<S> {
    fn connect(&self, node: &Node, timeout: Duration) -> RedisResult<S>;
}

impl<S, F> Connector<S> for F
where
    F: Fn(&Node, Duration) -> RedisResult<S>,
{
    fn connect(&self, node: &Node, timeout: Duration) -> RedisResult<S> {
        self(node, timeout)
    }
}

/// Auth discipline (§4.8): a session dequeued with reuse count `0` and a
/// configured password must `AUTH` exactly once before any user command; a
/// reused session must not re-authenticate. Shared by the loader, executor,
/// and pipeline so all three apply the rule identically.
pub fn ensure_authenticated<S: NodeSession>(session: &mut S, password: Option<&str>) -> RedisResult<()> {
    if let Some(password) = password {
        if session.get_reused_times() == 0 {
            session.auth(password)?;
        }
    }
    Ok(())
}

struct PooledSession<S> {
    session: S,
    idle_since: Instant,
}

/// A per-node keep-alive pool (§3's `keepalive_timeout`/`keepalive_cons`).
///
/// `take` pops the most recently released, still-live session for a node
/// (LIFO, so a hot connection is reused before a colder one); `release`
/// returns a session, evicting anything that has sat idle past
/// `idle_timeout` and trimming the pool to `pool_size`.
pub struct SessionPool<S, C> {
    idle_timeout: Duration,
    pool_size: usize,
    connect_timeout: Duration,
    connector: C,
    pools: Mutex<HashMap<String, Vec<PooledSession<S>>>>,
}

impl<S: NodeSession, C: Connector<S>> SessionPool<S, C> {
    pub fn new(connector: C, idle_timeout: Duration, pool_size: usize, connect_timeout: Duration) -> Self {
        SessionPool {
            idle_timeout,
            pool_size,
            connect_timeout,
            connector,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Obtain a session for `node`: reuse a pooled one if a live one is
    /// available, otherwise connect fresh (reuse count `0`).
    pub fn take(&self, node: &Node) -> RedisResult<S> {
        let addr = node.addr();
        let mut pools = self.pools.lock().expect("session pool poisoned");
        if let Some(bucket) = pools.get_mut(&addr) {
            while let Some(pooled) = bucket.pop() {
                if pooled.idle_since.elapsed() < self.idle_timeout {
                    let mut session = pooled.session;
                    session.mark_reused();
                    return Ok(session);
                }
                // Expired: drop it and keep looking.
            }
        }
        drop(pools);
        self.connector.connect(node, self.connect_timeout)
    }

    /// Return `session` to the pool for `node` on any exit path, success or
    /// failure (§5's resource policy). Evicts past `pool_size` (drops the
    /// oldest) and leaves expiry checks to the next `take`.
    pub fn release(&self, node: &Node, session: S) {
        let addr = node.addr();
        let mut pools = self.pools.lock().expect("session pool poisoned");
        let bucket = pools.entry(addr).or_default();
        bucket.push(PooledSession {
            session,
            idle_since: Instant::now(),
        });
        while bucket.len() > self.pool_size {
            bucket.remove(0);
        }
    }

    /// Discard whatever was pooled for `node`, e.g. after a connect error
    /// suggests the node may no longer be reachable.
    pub fn evict(&self, node: &Node) {
        self.pools
            .lock()
            .expect("session pool poisoned")
            .remove(&node.addr());
    }
}


#[cfg(test)]
mod tests {
    use super::mock::{MockSession, Script};
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    fn pool() -> (SessionPool<MockSession, impl Connector<MockSession>>, Arc<StdMutex<Vec<Node>>>) {
        let attempts = Arc::new(StdMutex::new(Vec::new()));
        let connector = MockSession::with_script(Script::new(), attempts.clone());
        (
            SessionPool::new(connector, Duration::from_secs(60), 2, Duration::from_millis(100)),
            attempts,
        )
    }

    #[test]
    fn take_without_release_connects_fresh_every_time() {
        let (pool, attempts) = pool();
        let node = Node::new("10.0.0.1", 7000);
        let s1 = pool.take(&node).unwrap();
        let s2 = pool.take(&node).unwrap();
        assert_eq!(s1.get_reused_times(), 0);
        assert_eq!(s2.get_reused_times(), 0);
        assert_eq!(attempts.lock().unwrap().len(), 2);
    }

    #[test]
    fn release_then_take_reuses_and_marks_reused() {
        let (pool, attempts) = pool();
        let node = Node::new("10.0.0.1", 7000);
        let s1 = pool.take(&node).unwrap();
        pool.release(&node, s1);
        let s2 = pool.take(&node).unwrap();
        assert_eq!(s2.get_reused_times(), 1);
        // Only the first `take` should have actually connected.
        assert_eq!(attempts.lock().unwrap().len(), 1);
    }

    #[test]
    fn pool_trims_to_configured_size() {
        let (pool, _attempts) = pool();
        let node = Node::new("10.0.0.1", 7000);
        for _ in 0..5 {
            let s = pool.take(&node).unwrap();
            pool.release(&node, s);
        }
        let bucket_len = pool.pools.lock().unwrap().get(&node.addr()).unwrap().len();
        assert!(bucket_len <= 2);
    }

    #[test]
    fn evict_drops_pooled_sessions_for_node() {
        let (pool, _attempts) = pool();
        let node = Node::new("10.0.0.1", 7000);
        let s = pool.take(&node).unwrap();
        pool.release(&node, s);
        pool.evict(&node);
        assert!(pool.pools.lock().unwrap().get(&node.addr()).is_none());
    }
}
