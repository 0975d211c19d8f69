//! TopologyCache: the per-cluster-name shared slot map, server list, and
//! master list, plus the process-wide cache that holds one `Topology` per
//! cluster name for the life of the process.
//!
//! A plain sync `cluster.rs` would keep its slot map in a `RefCell` scoped
//! to one `ClusterConnection`; this spec instead wants a single shared,
//! concurrently-refreshed cache keyed by `ClusterConfig.name` so that
//! multiple `ClusterClient`s (or worker threads) pointed at the same cluster
//! name converge on one topology. We back that with `OnceLock<RwLock<...>>`,
//! the modern std replacement for the `lazy_static`/module-global table the
//! original source used (see DESIGN.md).

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, OnceLock, RwLock};

use crate::hash::SLOT_SIZE;
use crate::node::Node;

/// An ordered, non-empty list of nodes for one slot: master first, then
/// replicas in `CLUSTER SLOTS` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotEntry(Vec<Node>);

impl SlotEntry {
    /// Construct from a master plus replicas. Never empty by construction.
    pub fn new(master: Node, replicas: Vec<Node>) -> Self {
        let mut nodes = Vec::with_capacity(1 + replicas.len());
        nodes.push(master);
        nodes.extend(replicas);
        SlotEntry(nodes)
    }

    pub fn master(&self) -> &Node {
        // Invariant (§3): every published SlotEntry is non-empty and its
        // first element is a master.
        &self.0[0]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Build a `SlotEntry` with no nodes at all.
    ///
    /// `SlotEntry::new` always has at least a master, so this only exists to
    /// exercise `NodeSelector`'s defensive empty-entry guard (§4.4) in
    /// tests; never produced by the loader.
    #[cfg(test)]
    pub(crate) fn empty_for_test() -> Self {
        SlotEntry(Vec::new())
    }
}

/// The union of all nodes seen in any `SlotEntry` — the dynamic cluster
/// membership, distinct from the user-provided seed list.
pub type ServerList = BTreeSet<Node>;

/// The subset of nodes `CLUSTER NODES` reports as `master`.
pub type MasterList = BTreeSet<Node>;

/// Fixed logical array indexed by slot (`0..SLOT_SIZE`). Unassigned slots are
/// `None`; a request against one fails with `TopologyUnknown`.
#[derive(Debug, Clone)]
pub struct SlotMap {
    entries: Vec<Option<Arc<SlotEntry>>>,
}

impl SlotMap {
    pub(crate) fn empty() -> Self {
        SlotMap {
            entries: vec![None; SLOT_SIZE as usize],
        }
    }

    pub fn get(&self, slot: u16) -> Option<&Arc<SlotEntry>> {
        self.entries[slot as usize].as_ref()
    }

    pub(crate) fn set_range(&mut self, start: u16, end: u16, entry: Arc<SlotEntry>) {
        for slot in start..=end {
            self.entries[slot as usize] = Some(entry.clone());
        }
    }

    /// Every node appearing in any slot's entry.
    pub fn servers(&self) -> ServerList {
        self.entries
            .iter()
            .flatten()
            .flat_map(|entry| entry.nodes().iter().cloned())
            .collect()
    }

    /// The unique set of masters occupying slot position 0, used as the
    /// `MasterList` fallback when `CLUSTER NODES` can't be consulted (§4.3).
    pub fn masters(&self) -> MasterList {
        self.entries
            .iter()
            .flatten()
            .map(|entry| entry.master().clone())
            .collect()
    }
}

/// A consistent snapshot of cluster membership and ownership at a moment.
///
/// Immutable once published; a refresh produces a new `Topology` and
/// atomically replaces the previous one for the cluster name (§3).
#[derive(Debug, Clone)]
pub struct Topology {
    pub slots: Arc<SlotMap>,
    pub servers: Arc<ServerList>,
    pub masters: Arc<MasterList>,
}

impl Topology {
    pub fn new(slots: SlotMap, servers: ServerList, masters: MasterList) -> Self {
        Topology {
            slots: Arc::new(slots),
            servers: Arc::new(servers),
            masters: Arc::new(masters),
        }
    }

    /// The `SlotEntry` for `slot`, or `None` if the slot isn't assigned.
    pub fn entry_for(&self, slot: u16) -> Option<Arc<SlotEntry>> {
        self.slots.get(slot).cloned()
    }
}

type Registry = RwLock<HashMap<String, Arc<Topology>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// The process-wide, cluster-name-keyed topology cache.
///
/// Readers obtain an `Arc<Topology>` snapshot that stays valid for the
/// duration of one command attempt, even if a concurrent writer replaces the
/// cache entry in the meantime (§5): the `Arc` keeps the old `Topology` alive
/// until the reader drops it.
pub struct TopologyCache;

impl TopologyCache {
    /// O(1) lookup of the current topology for `name`, if one has been
    /// published.
    pub fn get(name: &str) -> Option<Arc<Topology>> {
        registry().read().expect("topology cache poisoned").get(name).cloned()
    }

    /// Atomically replace the entry for `name` with a freshly loaded
    /// topology.
    pub fn replace(name: &str, topology: Topology) {
        registry()
            .write()
            .expect("topology cache poisoned")
            .insert(name.to_string(), Arc::new(topology));
    }

    #[cfg(test)]
    pub(crate) fn clear(name: &str) {
        registry().write().expect("topology cache poisoned").remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: u16) -> Node {
        Node::new("10.0.0.1", n)
    }

    #[test]
    fn slot_map_set_range_covers_inclusive_end() {
        let mut map = SlotMap::empty();
        let entry = Arc::new(SlotEntry::new(node(7000), vec![]));
        map.set_range(0, 2, entry.clone());
        assert!(map.get(0).is_some());
        assert!(map.get(2).is_some());
        assert!(map.get(3).is_none());
    }

    #[test]
    fn published_topology_masters_are_slot_entry_firsts() {
        let mut map = SlotMap::empty();
        let master = node(7000);
        let replica = node(7001);
        let entry = Arc::new(SlotEntry::new(master.clone(), vec![replica.clone()]));
        map.set_range(0, 16383, entry);

        let servers = map.servers();
        let masters = map.masters();
        assert!(servers.contains(&master));
        assert!(servers.contains(&replica));
        assert!(masters.contains(&master));
        assert!(!masters.contains(&replica));

        for slot in [0u16, 5000, 16383] {
            let e = map.get(slot).unwrap();
            assert!(masters.contains(e.master()));
        }
    }

    #[test]
    fn cache_get_replace_round_trip() {
        let name = "topology-cache-test-cluster";
        TopologyCache::clear(name);
        assert!(TopologyCache::get(name).is_none());

        let mut map = SlotMap::empty();
        map.set_range(0, 16383, Arc::new(SlotEntry::new(node(7000), vec![])));
        let topo = Topology::new(map, ServerList::new(), MasterList::new());
        TopologyCache::replace(name, topo);

        let got = TopologyCache::get(name).expect("topology should be present");
        assert!(got.entry_for(100).is_some());
        TopologyCache::clear(name);
    }
}
