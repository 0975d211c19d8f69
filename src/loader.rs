//! SlotLoader: fetches `CLUSTER SLOTS` and `CLUSTER NODES` from any
//! reachable seed and assembles a `Topology` (§4.3).
//!
//! Mirrors a `create_new_slots`/`parse_slots`/`build_slot_map`
//! trio in `cluster.rs`, generalized to also consult `CLUSTER NODES` for the
//! `MasterList` and to try multiple seeds with bounded per-seed connection
//! attempts instead of sampling all existing connections.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::ClusterConfig;
use crate::error::{ErrorKind, RedisError, RedisResult};
use crate::node::Node;
use crate::session::{ensure_authenticated, Connector, NodeSession, SessionPool};
use crate::topology::{MasterList, SlotEntry, SlotMap, Topology};
use crate::value::Value;

/// Fetch a fresh `Topology` by trying each seed in order.
///
/// Returns the accumulated per-seed errors if no seed yields a usable slot
/// map. Connections opened here are released back to `pool` on every exit
/// path, success or failure (§4.3).
pub fn load<S: NodeSession, C: Connector<S>>(
    config: &ClusterConfig,
    pool: &SessionPool<S, C>,
) -> RedisResult<Topology> {
    let mut errors: Vec<String> = Vec::new();

    for seed in config.serv_list() {
        match load_from_seed(config, pool, seed) {
            Ok(topology) => return Ok(topology),
            Err(err) => errors.push(format!("{seed}: {err}")),
        }
    }

    Err(RedisError::from((
        ErrorKind::TopologyUnknown,
        "no seed yielded a usable slot map",
        errors.join("; "),
    )))
}

fn load_from_seed<S: NodeSession, C: Connector<S>>(
    config: &ClusterConfig,
    pool: &SessionPool<S, C>,
    seed: &Node,
) -> RedisResult<Topology> {
    let mut session = connect_with_retries(config, pool, seed)?;

    let slots_result = session.cluster_slots();
    let nodes_result = session.cluster_nodes();
    pool.release(seed, session);

    let slot_map = build_slot_map(slots_result?)?;

    let masters = match nodes_result {
        Ok(text) => parse_master_list(&text),
        // §4.3 tie-break: CLUSTER SLOTS succeeded but CLUSTER NODES failed —
        // still a usable topology, falling back to the unique first-position
        // masters (full replace, never appended; §1.2).
        Err(_) => slot_map.masters(),
    };

    let servers = slot_map.servers();
    Ok(Topology::new(slot_map, servers, masters))
}

fn connect_with_retries<S: NodeSession, C: Connector<S>>(
    config: &ClusterConfig,
    pool: &SessionPool<S, C>,
    seed: &Node,
) -> RedisResult<S> {
    let mut last_err = None;
    for _ in 0..config.max_connection_attempts().max(1) {
        match pool.take(seed) {
            Ok(mut session) => {
                if let Err(err) = ensure_authenticated(&mut session, config.auth()) {
                    last_err = Some(err);
                    continue;
                }
                return Ok(session);
            }
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        RedisError::from((ErrorKind::ConnectFailed, "exhausted connection attempts"))
    }))
}

/// Parse `CLUSTER SLOTS`'s nested-bulk reply into a `SlotMap`.
///
/// Each row is `(start, end, [ip, port], [ip, port]...)`; the first node is
/// the master, the rest are replicas in reported order (§3/§4.3).
fn build_slot_map(raw: Value) -> RedisResult<SlotMap> {
    let mut map = SlotMap::empty();
    let rows = match raw {
        Value::Bulk(rows) => rows,
        _ => {
            return Err(RedisError::from((
                ErrorKind::BackendError,
                "CLUSTER SLOTS did not return an array",
            )))
        }
    };

    for row in rows {
        let Value::Bulk(fields) = row else { continue };
        if fields.len() < 3 {
            continue;
        }
        let start = match &fields[0] {
            Value::Int(n) => *n as u16,
            _ => continue,
        };
        let end = match &fields[1] {
            Value::Int(n) => *n as u16,
            _ => continue,
        };

        let mut nodes = Vec::with_capacity(fields.len() - 2);
        for field in &fields[2..] {
            if let Value::Bulk(node_fields) = field {
                if let (Some(Value::Data(ip)), Some(Value::Int(port))) =
                    (node_fields.first(), node_fields.get(1))
                {
                    if !ip.is_empty() {
                        nodes.push(Node::new(String::from_utf8_lossy(ip).into_owned(), *port as u16));
                    }
                }
            }
        }
        if nodes.is_empty() {
            continue;
        }

        let master = nodes.remove(0);
        map.set_range(start, end, Arc::new(SlotEntry::new(master, nodes)));
    }

    Ok(map)
}

/// Parse `CLUSTER NODES`'s text reply, collecting every line flagged
/// `master` (§4.3/§6). Fully replaces any prior `MasterList`; never merges
/// with a previous call's result (§1.2).
fn parse_master_list(text: &str) -> MasterList {
    let mut masters = BTreeSet::new();
    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            continue;
        }
        let is_master = fields[2].split(',').any(|flag| flag == "master");
        if !is_master {
            continue;
        }
        let addr_field = fields[1];
        let addr = addr_field.split('@').next().unwrap_or(addr_field);
        if let Some(node) = Node::parse(addr) {
            masters.insert(node);
        }
    }
    masters
}
