//! NodeSelector: given a slot's `SlotEntry` and the read policy, choose
//! which node to route to (§4.4).

use rand::Rng;

use crate::error::{ErrorKind, RedisError, RedisResult};
use crate::node::Node;
use crate::topology::SlotEntry;

/// Read routing policy, set from `ClusterConfig::enable_slave_read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPolicy {
    /// Always route to the master (position 0).
    MasterOnly,
    /// May route to any entry, picked per `pick`'s rules.
    AllowReplicas,
}

/// `pick(entry, policy, seed)` from §4.4.
///
/// With `MasterOnly`, always position 0. With `AllowReplicas` and a `seed`
/// (the pipeline's deterministic `magic`, §4.6), `index = seed % len`;
/// without a seed, uniformly random over `[0, len)`. Returns the chosen node
/// and whether it is a replica (`index != 0`).
pub fn pick(entry: &SlotEntry, policy: ReadPolicy, seed: Option<u64>) -> RedisResult<(Node, bool)> {
    if entry.is_empty() {
        return Err(RedisError::from((
            ErrorKind::NodeSelectionFailed,
            "slot entry has no nodes",
        )));
    }

    let index = match policy {
        ReadPolicy::MasterOnly => 0,
        ReadPolicy::AllowReplicas => match seed {
            Some(seed) => (seed as usize) % entry.len(),
            None => rand::thread_rng().gen_range(0..entry.len()),
        },
    };

    Ok((entry.nodes()[index].clone(), index != 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: usize) -> SlotEntry {
        let master = Node::new("10.0.0.1", 7000);
        let replicas = (1..n).map(|i| Node::new("10.0.0.1", 7000 + i as u16)).collect();
        SlotEntry::new(master, replicas)
    }

    #[test]
    fn master_only_always_returns_position_zero() {
        let e = entry(3);
        for _ in 0..10 {
            let (node, is_replica) = pick(&e, ReadPolicy::MasterOnly, None).unwrap();
            assert_eq!(node, e.nodes()[0]);
            assert!(!is_replica);
        }
    }

    #[test]
    fn deterministic_seed_is_stable_within_a_pipeline() {
        let e = entry(4);
        let (a, _) = pick(&e, ReadPolicy::AllowReplicas, Some(7)).unwrap();
        let (b, _) = pick(&e, ReadPolicy::AllowReplicas, Some(7)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, e.nodes()[7 % 4]);
    }

    #[test]
    fn seeded_index_nonzero_reports_replica() {
        let e = entry(4);
        let (_, is_replica) = pick(&e, ReadPolicy::AllowReplicas, Some(1)).unwrap();
        assert!(is_replica);
    }

    #[test]
    fn random_pick_stays_in_bounds() {
        let e = entry(3);
        for _ in 0..200 {
            let (node, _) = pick(&e, ReadPolicy::AllowReplicas, None).unwrap();
            assert!(e.nodes().contains(&node));
        }
    }

    #[test]
    fn empty_entry_fails_selection() {
        let empty = SlotEntry::empty_for_test();
        let err = pick(&empty, ReadPolicy::MasterOnly, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NodeSelectionFailed);
    }
}
