//! KeyHasher: the key-to-slot function, including hash-tag extraction.
//!
//! Grounded in the sibling pack repo `aaron-congo-redis-rs`'s
//! `cluster_routing.rs`, which hashes with
//! `crc16::State::<crc16::XMODEM>::calculate(key) % SLOT_SIZE`. The hash-tag
//! rule here is stricter than that file's own `get_hashtag` (which tolerates
//! an unmatched `{`/`}` order) per the §9 open question: Redis requires `{`
//! strictly before `}`. The empty-tag edge case (`{}key` hashes the empty
//! string) is kept exactly as specified, since §4.1/§8 call it out as
//! intentional rather than a parsing bug.

/// Total number of logical slots in a Redis Cluster keyspace.
pub const SLOT_SIZE: u16 = 16384;

/// Compute the slot index for `key`, honoring the `{tag}` convention.
///
/// Two keys sharing the same hash tag always yield the same slot; a key with
/// no `{...}` (or with `{` and no later `}`) is hashed in full.
pub fn slot_of(key: &[u8]) -> u16 {
    let hashed = match hash_tag(key) {
        Some(tag) => tag,
        None => key,
    };
    crc16::State::<crc16::XMODEM>::calculate(hashed) % SLOT_SIZE
}

/// Extract the hash-tag substring of `key`, if one is present.
///
/// Requires a `{` at some position `i` and a *later* `}` at position `j > i`
/// (Redis's own rule). Returns `Some(&[])` for the empty-tag edge case
/// (`{}` immediately adjacent), which the caller hashes as the empty string;
/// returns `None` when there is no well-formed tag at all, in which case the
/// caller hashes the whole key.
fn hash_tag(key: &[u8]) -> Option<&[u8]> {
    let open = key.iter().position(|&b| b == b'{')?;
    let close_rel = key[open + 1..].iter().position(|&b| b == b'}')?;
    Some(&key[open + 1..open + 1 + close_rel])
}
