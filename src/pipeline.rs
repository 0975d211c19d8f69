//! PipelineExecutor: buffer/commit/cancel lifecycle and the scatter/gather
//! commit algorithm (§4.6).
//!
//! Mirrors a `cluster.rs`-style pipeline support (`ClusterConnection`
//! buffers `cmd` calls and partitions them by node before committing), adapted
//! to the shared `TopologyCache` and to reassembly strictly by `origin_index`.

use std::collections::HashMap;

use rand::Rng;

use crate::config::ClusterConfig;
use crate::error::{ErrorKind, RedisError, RedisResult};
use crate::executor::CommandExecutor;
use crate::hash::slot_of;
use crate::node::Node;
use crate::selector::{self, ReadPolicy};
use crate::session::{ensure_authenticated, Connector, NodeSession, SessionPool};
use crate::topology::TopologyCache;
use crate::value::{classify_error, Redirect, Value};

/// One buffered command, tagged with its position in the caller's submission
/// order so reassembly can restore it regardless of bucket partitioning.
pub(crate) struct PipelineRequest {
    cmd: String,
    key: Vec<u8>,
    args: Vec<Vec<u8>>,
    origin_index: usize,
}

impl PipelineRequest {
    pub(crate) fn new(origin_index: usize, key: &[u8], cmd: &str, args: &[Vec<u8>]) -> Self {
        PipelineRequest {
            cmd: cmd.to_string(),
            key: key.to_vec(),
            args: args.to_vec(),
            origin_index,
        }
    }
}

/// A client-side pipeline: buffer, commit, or cancel (§4.6).
pub struct PipelineExecutor<'a, S, C> {
    config: &'a ClusterConfig,
    pool: &'a SessionPool<S, C>,
    buffer: Vec<PipelineRequest>,
}

impl<'a, S: NodeSession, C: Connector<S>> PipelineExecutor<'a, S, C> {
    pub fn new(config: &'a ClusterConfig, pool: &'a SessionPool<S, C>) -> Self {
        PipelineExecutor {
            config,
            pool,
            buffer: Vec::new(),
        }
    }

    /// Switch into buffering mode for a fresh pipeline. Any previously
    /// buffered, uncommitted requests are discarded.
    pub fn init_pipeline(&mut self) {
        self.buffer.clear();
    }

    /// Append a command to the buffer; returns without contacting Redis.
    pub fn queue(&mut self, key: &[u8], cmd: &str, args: &[Vec<u8>]) {
        let origin_index = self.buffer.len();
        self.buffer.push(PipelineRequest::new(origin_index, key, cmd, args));
    }

    /// Discard the buffer without contacting Redis.
    pub fn cancel_pipeline(&mut self) {
        self.buffer.clear();
    }

    /// Commit the buffered requests, returning one result per request in
    /// original submission order.
    pub fn commit_pipeline(&mut self) -> RedisResult<Vec<RedisResult<Value>>> {
        let requests = std::mem::take(&mut self.buffer);
        commit_requests(self.config, self.pool, requests)
    }
}

/// The scatter/gather commit algorithm (§4.6), free of any borrow on a
/// containing struct so it can be driven either by `PipelineExecutor`'s own
/// buffer or by a buffer a caller (e.g. `ClusterClient`) owns separately.
pub(crate) fn commit_requests<S: NodeSession, C: Connector<S>>(
    config: &ClusterConfig,
    pool: &SessionPool<S, C>,
    requests: Vec<PipelineRequest>,
) -> RedisResult<Vec<RedisResult<Value>>> {
    if requests.is_empty() {
        return Ok(Vec::new());
    }

    let topology = TopologyCache::get(config.name())
        .ok_or_else(|| RedisError::from((ErrorKind::TopologyUnknown, "no topology loaded")))?;

    let server_count = topology.servers.len().max(1);
    let magic = rand::thread_rng().gen_range(1..=server_count as u64);

    // Partition by target node, retaining origin_index per item.
    let mut buckets: HashMap<String, (Node, bool, Vec<&PipelineRequest>)> = HashMap::new();
    let policy = if config.enable_slave_read() {
        ReadPolicy::AllowReplicas
    } else {
        ReadPolicy::MasterOnly
    };

    for request in &requests {
        let slot = slot_of(&request.key);
        let entry = topology
            .entry_for(slot)
            .ok_or_else(|| RedisError::from((ErrorKind::TopologyUnknown, "slot has no owning node")))?;
        let (node, is_replica) = selector::pick(&entry, policy, Some(magic))?;
        let bucket = buckets
            .entry(node.addr())
            .or_insert_with(|| (node.clone(), is_replica, Vec::new()));
        bucket.2.push(request);
    }

    let mut results: Vec<Option<RedisResult<Value>>> = (0..requests.len()).map(|_| None).collect();
    let mut refreshed_once = false;

    for (_, (node, is_replica, items)) in buckets {
        let bucket_results = commit_bucket(config, pool, &node, is_replica, &items)?;

        for (request, raw) in items.into_iter().zip(bucket_results) {
            let resolved = resolve_item(config, pool, request, raw, &mut refreshed_once)?;
            results[request.origin_index] = Some(resolved);
        }
    }

    Ok(results
        .into_iter()
        .map(|r| r.unwrap_or_else(|| Err(RedisError::from((ErrorKind::BackendError, "request never scheduled")))))
        .collect())
}

/// Run one node's share of the commit. Any node-level transport failure
/// (connect, auth, `READONLY`) refreshes the topology best-effort before
/// failing the whole commit (§4.6 step 3); a stale bucket assignment
/// shouldn't keep sending every subsequent pipeline back to the same node.
fn commit_bucket<S: NodeSession, C: Connector<S>>(
    config: &ClusterConfig,
    pool: &SessionPool<S, C>,
    node: &Node,
    is_replica: bool,
    items: &[&PipelineRequest],
) -> RedisResult<Vec<RedisResult<Value>>> {
    let mut session = match pool.take(node) {
        Ok(session) => session,
        Err(err) => {
            let _ = CommandExecutor::new(config, pool).refresh();
            return Err(err);
        }
    };
    if let Err(err) = ensure_authenticated(&mut session, config.auth()) {
        pool.release(node, session);
        let _ = CommandExecutor::new(config, pool).refresh();
        return Err(err);
    }
    if is_replica && session.get_reused_times() == 0 {
        if let Err(err) = session.readonly() {
            pool.release(node, session);
            let _ = CommandExecutor::new(config, pool).refresh();
            return Err(err);
        }
    }

    session.init_pipeline();
    for request in items {
        // Buffering calls never fail on the wire; the buffer is flushed as
        // one unit below.
        let _ = session.call(&request.cmd, &request.args);
    }
    let outcome = session.commit_pipeline();
    pool.release(node, session);
    outcome
}

/// Resolve a single bucket item's raw reply, recovering from a per-item
/// MOVED/ASK signal (§4.6 step 5).
fn resolve_item<S: NodeSession, C: Connector<S>>(
    config: &ClusterConfig,
    pool: &SessionPool<S, C>,
    request: &PipelineRequest,
    raw: RedisResult<Value>,
    refreshed_once: &mut bool,
) -> RedisResult<Value> {
    let value = raw?;

    let Some(text) = value.as_error_text() else {
        return Ok(value);
    };

    match classify_error(text) {
        Redirect::ClusterDown => Err(RedisError::from((ErrorKind::ClusterDown, "cluster is down"))),
        Redirect::Ask(target) => {
            let executor = CommandExecutor::new(config, pool);
            executor.execute_ask(&target, &request.cmd, &request.args)
        }
        Redirect::Moved(_) => {
            let executor = CommandExecutor::new(config, pool);
            if !*refreshed_once {
                executor.refresh()?;
                *refreshed_once = true;
            }
            executor.execute(&request.key, &request.cmd, &request.args, ReadPolicy::MasterOnly)
        }
        Redirect::Other(_) => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::mock::{MockSession, Script};
    use crate::topology::{SlotEntry, SlotMap, Topology};
    use std::sync::{Arc, Mutex as StdMutex};
    use std::time::Duration;

    fn harness(name: &str) -> (
        ClusterConfig,
        SessionPool<MockSession, impl Connector<MockSession>>,
        Script,
    ) {
        TopologyCache::clear(name);
        let config = ClusterConfig::builder(name, vec![Node::new("10.0.0.1", 7000)]).build();
        let script = Script::new();
        let attempts = Arc::new(StdMutex::new(Vec::new()));
        let connector = MockSession::with_script(script.clone(), attempts);
        let pool = SessionPool::new(connector, Duration::from_secs(60), 4, Duration::from_millis(50));
        (config, pool, script)
    }

    fn seed_two_masters(name: &str, a: Node, b: Node) {
        let mut map = SlotMap::empty();
        map.set_range(crate::hash::slot_of(b"{a}1"), crate::hash::slot_of(b"{a}1"), Arc::new(SlotEntry::new(a.clone(), vec![])));
        map.set_range(crate::hash::slot_of(b"{b}1"), crate::hash::slot_of(b"{b}1"), Arc::new(SlotEntry::new(b.clone(), vec![])));
        let servers = map.servers();
        let mut masters = crate::topology::MasterList::new();
        masters.insert(a);
        masters.insert(b);
        TopologyCache::replace(name, Topology::new(map, servers, masters));
    }

    #[test]
    fn empty_commit_returns_empty_array() {
        let (config, pool, _script) = harness("pipe-empty");
        let mut pipeline = PipelineExecutor::new(&config, &pool);
        pipeline.init_pipeline();
        assert_eq!(pipeline.commit_pipeline().unwrap().len(), 0);
    }

    #[test]
    fn cancel_discards_buffered_requests() {
        let (config, pool, _script) = harness("pipe-cancel");
        let mut pipeline = PipelineExecutor::new(&config, &pool);
        pipeline.init_pipeline();
        pipeline.queue(b"{a}1", "SET", &[b"x".to_vec()]);
        pipeline.cancel_pipeline();
        assert_eq!(pipeline.commit_pipeline().unwrap().len(), 0);
    }

    #[test]
    fn scatters_across_buckets_and_preserves_origin_order() {
        let a = Node::new("10.0.0.1", 7000);
        let b = Node::new("10.0.0.2", 7000);
        let (config, pool, script) = harness("pipe-scatter");
        seed_two_masters(config.name(), a.clone(), b.clone());

        script.push(&a.addr(), Ok(Value::Status("ok-a1".to_string())));
        script.push(&a.addr(), Ok(Value::Status("ok-a2".to_string())));
        script.push(&b.addr(), Ok(Value::Status("ok-b1".to_string())));

        let mut pipeline = PipelineExecutor::new(&config, &pool);
        pipeline.init_pipeline();
        pipeline.queue(b"{a}1", "SET", &[b"x".to_vec()]);
        pipeline.queue(b"{b}1", "SET", &[b"y".to_vec()]);
        pipeline.queue(b"{a}2", "SET", &[b"z".to_vec()]);

        let results = pipeline.commit_pipeline().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap(), &Value::Status("ok-a1".to_string()));
        assert_eq!(results[1].as_ref().unwrap(), &Value::Status("ok-b1".to_string()));
        assert_eq!(results[2].as_ref().unwrap(), &Value::Status("ok-a2".to_string()));
    }

    #[test]
    fn moved_item_is_recovered_and_placed_at_its_origin_index() {
        // The refresh seed and the MOVED target (`c`) are both distinct from
        // `a` and `b`, so no scripted reply queue is shared between `a`'s own
        // bucket and the recovered request — the outcome is independent of
        // which bucket the HashMap partition visits first.
        let seed = Node::new("10.0.0.9", 7000);
        let a = Node::new("10.0.0.1", 7000);
        let b = Node::new("10.0.0.2", 7000);
        let c = Node::new("10.0.0.3", 7000);

        TopologyCache::clear("pipe-moved");
        let config = ClusterConfig::builder("pipe-moved", vec![seed.clone()]).build();
        let script = Script::new();
        let attempts = Arc::new(StdMutex::new(Vec::new()));
        let connector = MockSession::with_script(script.clone(), attempts);
        let pool = SessionPool::new(connector, Duration::from_secs(60), 4, Duration::from_millis(50));

        seed_two_masters(config.name(), a.clone(), b.clone());

        script.push(&a.addr(), Ok(Value::Status("ok-a1".to_string())));
        script.push(&b.addr(), Ok(Value::Error(format!("MOVED 1 {}", c.addr()))));
        // Refresh: CLUSTER SLOTS / CLUSTER NODES against the dedicated seed.
        // `a` keeps its own slot; `b`'s slot now belongs to `c`.
        let a_slot = crate::hash::slot_of(b"{a}1");
        let b_slot = crate::hash::slot_of(b"{b}1");
        script.push(
            &seed.addr(),
            Ok(Value::Bulk(vec![
                Value::Bulk(vec![
                    Value::Int(a_slot as i64),
                    Value::Int(a_slot as i64),
                    Value::Bulk(vec![Value::Data(a.ip().as_bytes().to_vec()), Value::Int(a.port() as i64)]),
                ]),
                Value::Bulk(vec![
                    Value::Int(b_slot as i64),
                    Value::Int(b_slot as i64),
                    Value::Bulk(vec![Value::Data(c.ip().as_bytes().to_vec()), Value::Int(c.port() as i64)]),
                ]),
            ])),
        );
        script.push(&seed.addr(), Ok(Value::Status("".to_string())));
        // Re-executed single command against the now-correct owner (c).
        script.push(&c.addr(), Ok(Value::Status("ok-b1-recovered".to_string())));

        let mut pipeline = PipelineExecutor::new(&config, &pool);
        pipeline.init_pipeline();
        pipeline.queue(b"{a}1", "SET", &[b"x".to_vec()]);
        pipeline.queue(b"{b}1", "SET", &[b"y".to_vec()]);

        let results = pipeline.commit_pipeline().unwrap();
        assert_eq!(results[0].as_ref().unwrap(), &Value::Status("ok-a1".to_string()));
        assert_eq!(results[1].as_ref().unwrap(), &Value::Status("ok-b1-recovered".to_string()));
    }

    #[test]
    fn connect_failure_refreshes_topology_before_failing_the_commit() {
        let name = "pipe-connect-refresh";
        let seed = Node::new("10.0.0.9", 7000);
        let unreachable = Node::new("10.0.0.1", 7000);
        let replacement = Node::new("10.0.0.2", 7000);

        TopologyCache::clear(name);
        let config = ClusterConfig::builder(name, vec![seed.clone()]).build();
        seed_two_masters(name, unreachable.clone(), unreachable.clone());

        let script = Script::new();
        let slot = crate::hash::slot_of(b"{a}1");
        script.push(
            &seed.addr(),
            Ok(Value::Bulk(vec![Value::Bulk(vec![
                Value::Int(0),
                Value::Int(16383),
                Value::Bulk(vec![Value::Data(replacement.ip().as_bytes().to_vec()), Value::Int(replacement.port() as i64)]),
            ])])),
        );
        script.push(&seed.addr(), Ok(Value::Status("".to_string())));

        let attempts = Arc::new(StdMutex::new(Vec::new()));
        let underlying = MockSession::with_script(script, attempts);
        let connector = move |node: &Node, timeout: Duration| {
            if node == &unreachable {
                return Err(RedisError::from((ErrorKind::ConnectFailed, "refused")));
            }
            underlying(node, timeout)
        };
        let pool = SessionPool::new(connector, Duration::from_secs(60), 4, Duration::from_millis(50));

        let mut pipeline = PipelineExecutor::new(&config, &pool);
        pipeline.init_pipeline();
        pipeline.queue(b"{a}1", "SET", &[b"x".to_vec()]);
        let err = pipeline.commit_pipeline().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectFailed);

        let refreshed = TopologyCache::get(name).unwrap();
        let entry = refreshed.entry_for(slot).unwrap();
        assert_eq!(entry.master(), &replacement);
    }

    #[test]
    fn commit_without_topology_fails_fast() {
        let (config, pool, _script) = harness("pipe-no-topology");
        let mut pipeline = PipelineExecutor::new(&config, &pool);
        pipeline.init_pipeline();
        pipeline.queue(b"{a}1", "SET", &[b"x".to_vec()]);
        let err = pipeline.commit_pipeline().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TopologyUnknown);
    }
}
