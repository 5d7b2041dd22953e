// Test code is allowed to panic on failure
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

//! Property-based tests for the wire types.
//!
//! Uses proptest to verify the round-trip laws: formatting a parsed value
//! and re-parsing it must be the identity on canonical forms.

use proptest::prelude::*;

use redis_cluster_manager::client::types::{
    ClusterNode, ClusterNodeFlags, ClusterNodes, HashSlots, SLOT_COUNT,
};
use redis_cluster_manager::topology::RedisInstance;

/// Strategy for hostnames that survive `host[:port]` parsing.
fn hostname() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,20}"
}

/// Strategy for arbitrary slot sets.
fn slot_set() -> impl Strategy<Value = Vec<u16>> {
    prop::collection::vec(0..SLOT_COUNT, 0..64)
}

/// Strategy for flag combinations.
fn flags() -> impl Strategy<Value = ClusterNodeFlags> {
    (
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(
            |(myself, master, slave, probable_fail, fail, handshake, noaddr)| ClusterNodeFlags {
                myself,
                master,
                slave,
                probable_fail,
                fail,
                handshake,
                noaddr,
            },
        )
}

proptest! {
    /// Property: an instance with an explicit port round-trips exactly.
    #[test]
    fn test_instance_round_trip(host in hostname(), port in 1..u16::MAX) {
        let instance = RedisInstance::new(host, port);
        let reparsed: RedisInstance = instance.to_string().parse().unwrap();
        prop_assert_eq!(instance, reparsed);
    }

    /// Property: hash slots round-trip through the range representation.
    #[test]
    fn test_hash_slots_round_trip(slots in slot_set()) {
        let slots = HashSlots::from_unsorted(slots);
        let reparsed: HashSlots = slots.to_string().parse().unwrap();
        prop_assert_eq!(slots, reparsed);
    }

    /// Property: formatted slots are sorted, deduplicated and coalesced.
    #[test]
    fn test_hash_slots_canonical_form(slots in slot_set()) {
        let formatted = HashSlots::from_unsorted(slots).to_string();

        let mut last_end: Option<u16> = None;
        for token in formatted.split_whitespace() {
            let (start, end) = match token.split_once('-') {
                Some((a, b)) => (a.parse().unwrap(), b.parse().unwrap()),
                None => {
                    let slot: u16 = token.parse().unwrap();
                    (slot, slot)
                }
            };

            prop_assert!(start <= end);

            // Adjacent runs must not be mergeable.
            if let Some(last) = last_end {
                prop_assert!(start > last + 1);
            }

            last_end = Some(end);
        }
    }

    /// Property: flag sets round-trip through the canonical sorted form.
    #[test]
    fn test_flags_round_trip(flags in flags()) {
        let reparsed: ClusterNodeFlags = flags.to_string().parse().unwrap();
        prop_assert_eq!(flags, reparsed);
    }

    /// Property: a canonical node line re-parses to the same node.
    #[test]
    fn test_cluster_node_round_trip(
        flags in flags(),
        slots in slot_set(),
        epoch in 0..i64::MAX,
        port in 1..50000u16,
    ) {
        let line = format!(
            "b4b2de84dfaecb05ab4d32488ede2517fb95aced 127.0.0.1:{}@{} {} - 0 0 {} connected",
            port,
            u32::from(port) + 10000,
            flags,
            epoch,
        );
        let line = if slots.is_empty() {
            line
        } else {
            format!("{} {}", line, HashSlots::from_unsorted(slots))
        };

        let node: ClusterNode = line.parse().unwrap();
        let reparsed: ClusterNode = node.to_string().parse().unwrap();
        prop_assert_eq!(node, reparsed);
    }

    /// Property: a reply built from canonical lines round-trips wholesale.
    #[test]
    fn test_cluster_nodes_round_trip(count in 1usize..8) {
        let text: String = (0..count)
            .map(|i| {
                let flags = if i == 0 { "master,myself" } else { "master" };
                format!("node-{} 10.0.0.{}:6379@16379 {} - 0 0 {} connected", i, i, flags, i)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let nodes: ClusterNodes = text.parse().unwrap();
        prop_assert_eq!(nodes.to_string(), text);
        prop_assert_eq!(nodes.self_node().unwrap().id.as_str(), "node-0");
    }
}
