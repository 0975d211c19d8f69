//! ClusterClient: the public façade tying config, pool, topology cache, and
//! the three execution engines together (§4.9, §6).
//!
//! Mirrors the shape of a `ClusterClient`/`ClusterConnection`
//! pair: a handle that lazily establishes the slot map on first use and
//! hands out connections from a shared pool, except here the handle is
//! generic over the caller's `NodeSession`/`Connector` rather than baking in
//! a concrete RESP implementation.

use std::sync::Mutex;

use log::info;

use crate::admin::AdminFanout;
use crate::config::ClusterConfig;
use crate::error::{ErrorKind, RedisError, RedisResult};
use crate::executor::CommandExecutor;
use crate::loader;
use crate::lock::{InProcessNamedLock, NamedLock};
use crate::pipeline::{self, PipelineRequest};
use crate::selector::ReadPolicy;
use crate::session::{Connector, NodeSession, SessionPool};
use crate::topology::TopologyCache;
use crate::value::Value;

/// `nkeys == 0`'s sentinel key (§4.5/§6): `EVAL`/`EVALSHA` with no keys still
/// need *some* key to pick a routing slot, since every command must resolve
/// to exactly one node.
const EVAL_SENTINEL_KEY: &[u8] = b"__redis_cluster_route_eval_sentinel__";

/// The entry point: owns a `ClusterConfig`, a `SessionPool`, and a
/// `NamedLock` for single-flight initialization.
pub struct ClusterClient<S, C, L = InProcessNamedLock> {
    config: ClusterConfig,
    pool: SessionPool<S, C>,
    lock: L,
    pipeline_buffer: Mutex<Vec<PipelineRequest>>,
}

impl<S: NodeSession, C: Connector<S>> ClusterClient<S, C, InProcessNamedLock> {
    /// Validate `config` and build a client backed by `connector`.
    ///
    /// Rejects an empty name or seed list with `ConfigInvalid` (§7); does
    /// not itself contact the cluster — call `init_slots` or let the first
    /// command do it implicitly.
    pub fn new(config: ClusterConfig, connector: C) -> RedisResult<Self> {
        Self::with_lock(config, connector, InProcessNamedLock::default())
    }
}

impl<S: NodeSession, C: Connector<S>, L: NamedLock> ClusterClient<S, C, L> {
    pub fn with_lock(config: ClusterConfig, connector: C, lock: L) -> RedisResult<Self> {
        if config.name().is_empty() {
            return Err(RedisError::from((ErrorKind::ConfigInvalid, "cluster name must not be empty")));
        }
        if config.serv_list().is_empty() {
            return Err(RedisError::from((ErrorKind::ConfigInvalid, "serv_list must not be empty")));
        }

        let pool = SessionPool::new(
            connector,
            config.keepalive_timeout(),
            config.keepalive_cons(),
            config.connection_timeout(),
        );

        Ok(ClusterClient {
            config,
            pool,
            lock,
            pipeline_buffer: Mutex::new(Vec::new()),
        })
    }

    /// Single-flight initial topology load (§4.9).
    pub fn init_slots(&self) -> RedisResult<()> {
        if TopologyCache::get(self.config.name()).is_some() {
            return Ok(());
        }

        let handle = self.lock.lock(&format!("redis_cluster_slot_{}", self.config.name()))?;
        if TopologyCache::get(self.config.name()).is_some() {
            self.lock.unlock(handle);
            return Ok(());
        }

        let result = loader::load(&self.config, &self.pool);
        self.lock.unlock(handle);

        match result {
            Ok(topology) => {
                info!("loaded topology for cluster {}", self.config.name());
                TopologyCache::replace(self.config.name(), topology);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Force a topology refresh regardless of whether one is already
    /// cached. Best-effort: failures are returned, not retried (§1.2).
    pub fn fetch_slots(&self) -> RedisResult<()> {
        let topology = loader::load(&self.config, &self.pool)?;
        TopologyCache::replace(self.config.name(), topology);
        Ok(())
    }

    fn read_policy(&self) -> ReadPolicy {
        if self.config.enable_slave_read() {
            ReadPolicy::AllowReplicas
        } else {
            ReadPolicy::MasterOnly
        }
    }

    /// Dynamic command dispatch (§6): `key` is used only for slot routing.
    /// `EVAL`/`EVALSHA` take their full, already-built argument list in
    /// `args` and `key` purely as the routing hint; every other command gets
    /// `key` prepended to `args` automatically.
    pub fn call(&self, key: &[u8], cmd: &str, args: &[Vec<u8>]) -> RedisResult<Value> {
        self.init_slots()?;

        let upper = cmd.to_ascii_uppercase();
        let executor = CommandExecutor::new(&self.config, &self.pool);

        if upper == "EVAL" || upper == "EVALSHA" {
            return self.call_eval(&executor, &upper, args);
        }

        let mut full_args = Vec::with_capacity(1 + args.len());
        full_args.push(key.to_vec());
        full_args.extend_from_slice(args);
        executor.execute(key, &upper, &full_args, self.read_policy())
    }

    /// `EVAL script numkeys key [key ...] arg [arg ...]` (§4.5/§6): `numkeys`
    /// must parse as a non-negative integer no greater than 1, since this
    /// crate never spans more than one slot per command.
    fn call_eval(&self, executor: &CommandExecutor<'_, S, C>, cmd: &str, args: &[Vec<u8>]) -> RedisResult<Value> {
        let numkeys = args
            .get(1)
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| RedisError::from((ErrorKind::EvalKeysInvalid, "numkeys missing or not numeric")))?;

        if !(0..=1).contains(&numkeys) {
            return Err(RedisError::from((
                ErrorKind::EvalKeysInvalid,
                "numkeys must be 0 or 1 for cluster-safe routing",
            )));
        }

        let routing_key: &[u8] = if numkeys == 1 {
            args.get(2).map(|k| k.as_slice()).ok_or_else(|| {
                RedisError::from((ErrorKind::EvalKeysInvalid, "numkeys=1 but no key argument present"))
            })?
        } else {
            EVAL_SENTINEL_KEY
        };

        executor.execute(routing_key, cmd, args, self.read_policy())
    }

    /// Run an admin command against every master (§4.7).
    pub fn run_on_all_masters(&self, cmd: &str, args: &[Vec<u8>]) -> RedisResult<()> {
        self.init_slots()?;
        AdminFanout::new(&self.config, &self.pool).run_on_all_masters(cmd, args)
    }

    /// Switch into buffering mode (§4.6). Any previously buffered,
    /// uncommitted requests are discarded.
    pub fn init_pipeline(&self) {
        self.pipeline_buffer.lock().expect("pipeline buffer poisoned").clear();
    }

    /// Buffer a command for the next `commit_pipeline`; returns without
    /// contacting Redis.
    pub fn queue_pipeline(&self, key: &[u8], cmd: &str, args: &[Vec<u8>]) {
        let mut buffer = self.pipeline_buffer.lock().expect("pipeline buffer poisoned");
        let origin_index = buffer.len();
        buffer.push(PipelineRequest::new(origin_index, key, cmd, args));
    }

    /// Discard the buffer without contacting Redis.
    pub fn cancel_pipeline(&self) {
        self.pipeline_buffer.lock().expect("pipeline buffer poisoned").clear();
    }

    /// Flush the buffered pipeline (§4.6), returning one result per request
    /// in original submission order.
    pub fn commit_pipeline(&self) -> RedisResult<Vec<RedisResult<Value>>> {
        self.init_slots()?;
        let requests = std::mem::take(&mut *self.pipeline_buffer.lock().expect("pipeline buffer poisoned"));
        pipeline::commit_requests(&self.config, &self.pool, requests)
    }
}
