//! Wire types for `CLUSTER NODES` output.
//!
//! Every type in this module round-trips: parsing a line and formatting it
//! again yields the canonical form (flags sorted ascending, hash slots
//! sorted and coalesced into minimal ranges).

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Total number of hash slots in a Redis cluster.
pub const SLOT_COUNT: u16 = 16384;

/// Errors that can occur while parsing cluster wire data.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("\"{0}\" is not a valid cluster node address")]
    InvalidAddress(String),

    #[error("unrecognized flag \"{0}\"")]
    InvalidFlag(String),

    #[error("\"{0}\" is not a valid link state")]
    InvalidLinkState(String),

    #[error("parsing \"{input}\": {reason}")]
    InvalidSlots { input: String, reason: String },

    #[error("parsing \"{input}\": {reason}")]
    InvalidNode { input: String, reason: String },

    #[error("no node carries the myself flag")]
    NoSelf,

    #[error("multiple nodes carry the myself flag")]
    MultipleSelf,
}

/// Opaque identifier Redis assigns to each cluster node.
///
/// The empty id means "unset" and is rendered as `-`, matching the
/// `CLUSTER NODES` convention for the master-id column.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterNodeId(String);

impl ClusterNodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id carries a value.
    pub fn is_set(&self) -> bool {
        !self.0.is_empty()
    }
}

impl From<&str> for ClusterNodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ClusterNodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ClusterNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[allow(clippy::expect_used)]
static ADDRESS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^:]*):([0-9]+)@([0-9]+)$").expect("address pattern is valid")
});

/// A cluster node address: `ip:port@clusterPort`.
///
/// The ip part may be empty; Redis reports `:0@0` for nodes it has not yet
/// resolved an address for (`noaddr`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNodeAddress {
    pub ip: String,
    pub port: u16,
    pub cluster_port: u16,
}

impl FromStr for ClusterNodeAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = ADDRESS_REGEX
            .captures(s)
            .ok_or_else(|| ParseError::InvalidAddress(s.to_string()))?;

        let port = captures[2]
            .parse()
            .map_err(|_| ParseError::InvalidAddress(s.to_string()))?;
        let cluster_port = captures[3]
            .parse()
            .map_err(|_| ParseError::InvalidAddress(s.to_string()))?;

        Ok(Self {
            ip: captures[1].to_string(),
            port,
            cluster_port,
        })
    }
}

impl fmt::Display for ClusterNodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.ip, self.port, self.cluster_port)
    }
}

/// The set of flags a cluster node can carry.
///
/// `noflags` is the wire sentinel for the empty set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterNodeFlags {
    pub myself: bool,
    pub master: bool,
    pub slave: bool,
    /// `fail?` on the wire: the node is suspected to be failing.
    pub probable_fail: bool,
    pub fail: bool,
    pub handshake: bool,
    pub noaddr: bool,
}

impl ClusterNodeFlags {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl FromStr for ClusterNodeFlags {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut flags = Self::default();

        for part in s.split(',') {
            match part {
                "myself" => flags.myself = true,
                "master" => flags.master = true,
                "slave" => flags.slave = true,
                "fail?" => flags.probable_fail = true,
                "fail" => flags.fail = true,
                "handshake" => flags.handshake = true,
                "noaddr" => flags.noaddr = true,
                "noflags" => return Ok(Self::default()),
                _ => return Err(ParseError::InvalidFlag(part.to_string())),
            }
        }

        Ok(flags)
    }
}

impl fmt::Display for ClusterNodeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "noflags");
        }

        // Canonical form: flags sorted ascending.
        let ordered = [
            (self.fail, "fail"),
            (self.probable_fail, "fail?"),
            (self.handshake, "handshake"),
            (self.master, "master"),
            (self.myself, "myself"),
            (self.noaddr, "noaddr"),
            (self.slave, "slave"),
        ];

        let mut first = true;
        for (set, name) in ordered {
            if set {
                if !first {
                    write!(f, ",")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }

        Ok(())
    }
}

/// State of the cluster bus link to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

impl FromStr for LinkState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connected" => Ok(LinkState::Connected),
            "disconnected" => Ok(LinkState::Disconnected),
            _ => Err(ParseError::InvalidLinkState(s.to_string())),
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Connected => write!(f, "connected"),
            LinkState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// An ordered set of hash slots.
///
/// Slots are kept sorted ascending without duplicates. The display form is
/// the minimal space-separated range representation (`"1 3 5-6"`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashSlots(Vec<u16>);

impl HashSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every slot in the cluster: `[0, 16384)`.
    pub fn all() -> Self {
        Self((0..SLOT_COUNT).collect())
    }

    /// The inclusive range `[first, last]`.
    pub fn from_range(first: u16, last: u16) -> Self {
        Self::from_range_step(first, last, 1)
    }

    /// Every `step`-th slot of the inclusive range `[first, last]`.
    pub fn from_range_step(first: u16, last: u16, step: u16) -> Self {
        debug_assert!(first <= last, "first ({}) must be <= last ({})", first, last);
        debug_assert!(step > 0, "step must be positive");
        Self((first..=last).step_by(step as usize).collect())
    }

    /// Canonicalize an arbitrary slot list (sort ascending, drop duplicates).
    pub fn from_unsorted(mut slots: Vec<u16>) -> Self {
        slots.sort_unstable();
        slots.dedup();
        Self(slots)
    }

    pub fn insert(&mut self, slot: u16) {
        if let Err(index) = self.0.binary_search(&slot) {
            self.0.insert(index, slot);
        }
    }

    pub fn contains(&self, slot: u16) -> bool {
        self.0.binary_search(&slot).is_ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.0
    }

    /// Parse a single slot token: `N` or an inclusive range `N-M`.
    fn parse_token(token: &str) -> Result<(u16, u16), ParseError> {
        let invalid = |reason: &str| ParseError::InvalidSlots {
            input: token.to_string(),
            reason: reason.to_string(),
        };

        let mut bounds = token.split('-');
        let first: u16 = bounds
            .next()
            .unwrap_or_default()
            .parse()
            .map_err(|_| invalid("invalid slot number"))?;

        let last = match bounds.next() {
            Some(part) => part.parse().map_err(|_| invalid("invalid slot number"))?,
            None => first,
        };

        if bounds.next().is_some() {
            return Err(invalid("unknown hash slot format"));
        }

        if first > last {
            return Err(invalid("descending slot range"));
        }

        Ok((first, last))
    }
}

impl FromStr for HashSlots {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut slots = Vec::new();

        for token in s.split_whitespace() {
            let (first, last) = Self::parse_token(token)?;
            slots.extend(first..=last);
        }

        Ok(Self::from_unsorted(slots))
    }
}

impl fmt::Display for HashSlots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn emit(f: &mut fmt::Formatter<'_>, begin: u16, end: u16, first: bool) -> fmt::Result {
            if !first {
                write!(f, " ")?;
            }
            if begin == end {
                write!(f, "{}", begin)
            } else {
                write!(f, "{}-{}", begin, end)
            }
        }

        let mut run: Option<(u16, u16)> = None;
        let mut first = true;

        for slot in self.iter() {
            run = match run {
                None => Some((slot, slot)),
                Some((begin, end)) if slot == end + 1 => Some((begin, slot)),
                Some((begin, end)) => {
                    emit(f, begin, end, first)?;
                    first = false;
                    Some((slot, slot))
                }
            };
        }

        if let Some((begin, end)) = run {
            emit(f, begin, end, first)?;
        }

        Ok(())
    }
}

/// One row of `CLUSTER NODES` output.
///
/// A node self-declares its role through the flags; `master_id` is set only
/// for replicas, but real output can transiently violate that and the
/// parser tolerates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    pub id: ClusterNodeId,
    pub address: ClusterNodeAddress,
    pub flags: ClusterNodeFlags,
    pub master_id: ClusterNodeId,
    pub ping_sent: i64,
    pub pong_received: i64,
    pub epoch: i64,
    pub link_state: LinkState,
    pub slots: HashSlots,
}

impl ClusterNode {
    pub fn is_master(&self) -> bool {
        self.flags.master
    }

    pub fn is_myself(&self) -> bool {
        self.flags.myself
    }
}

impl FromStr for ClusterNode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ParseError::InvalidNode {
            input: s.to_string(),
            reason,
        };

        let parts: Vec<&str> = s.split(' ').collect();

        if parts.len() < 8 {
            return Err(invalid("not enough fields".to_string()));
        }

        let id = ClusterNodeId::from(parts[0]);
        let address: ClusterNodeAddress = parts[1]
            .parse()
            .map_err(|e: ParseError| invalid(e.to_string()))?;
        let flags: ClusterNodeFlags = parts[2]
            .parse()
            .map_err(|e: ParseError| invalid(e.to_string()))?;

        let master_id = if parts[3] == "-" {
            ClusterNodeId::default()
        } else {
            ClusterNodeId::from(parts[3])
        };

        let parse_int = |field: &str, name: &str| -> Result<i64, ParseError> {
            field
                .parse()
                .map_err(|_| invalid(format!("invalid {} value \"{}\"", name, field)))
        };

        let ping_sent = parse_int(parts[4], "ping-sent")?;
        let pong_received = parse_int(parts[5], "pong-received")?;
        let epoch = parse_int(parts[6], "epoch")?;
        let link_state: LinkState = parts[7]
            .parse()
            .map_err(|e: ParseError| invalid(e.to_string()))?;

        let mut slots = Vec::new();

        for token in &parts[8..] {
            // Import/export markers ([slot-<-id], [slot->-id]) appear while a
            // slot migration is in flight; they do not affect ownership.
            if token.starts_with('[') {
                continue;
            }

            let (first, last) =
                HashSlots::parse_token(token).map_err(|e| invalid(e.to_string()))?;
            slots.extend(first..=last);
        }

        Ok(Self {
            id,
            address,
            flags,
            master_id,
            ping_sent,
            pong_received,
            epoch,
            link_state,
            slots: HashSlots::from_unsorted(slots),
        })
    }
}

impl fmt::Display for ClusterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {} {}",
            self.id,
            self.address,
            self.flags,
            self.master_id,
            self.ping_sent,
            self.pong_received,
            self.epoch,
            self.link_state,
        )?;

        if !self.slots.is_empty() {
            write!(f, " {}", self.slots)?;
        }

        Ok(())
    }
}

/// A full `CLUSTER NODES` reply: one [`ClusterNode`] per line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterNodes(Vec<ClusterNode>);

impl ClusterNodes {
    pub fn new(nodes: Vec<ClusterNode>) -> Self {
        Self(nodes)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ClusterNode> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The node describing the replying instance itself.
    ///
    /// Exactly one node per reply must carry the `myself` flag.
    pub fn self_node(&self) -> Result<&ClusterNode, ParseError> {
        let mut found = None;

        for node in &self.0 {
            if node.is_myself() {
                if found.is_some() {
                    return Err(ParseError::MultipleSelf);
                }
                found = Some(node);
            }
        }

        found.ok_or(ParseError::NoSelf)
    }
}

impl FromStr for ClusterNodes {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let nodes = s
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ClusterNode::from_str)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self(nodes))
    }
}

impl fmt::Display for ClusterNodes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, node) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", node)?;
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        let address: ClusterNodeAddress = "127.0.0.2:6379@16379".parse().unwrap();
        assert_eq!(address.ip, "127.0.0.2");
        assert_eq!(address.port, 6379);
        assert_eq!(address.cluster_port, 16379);
        assert_eq!(address.to_string(), "127.0.0.2:6379@16379");
    }

    #[test]
    fn test_parse_address_noaddr() {
        let address: ClusterNodeAddress = ":0@0".parse().unwrap();
        assert_eq!(address.ip, "");
        assert_eq!(address.to_string(), ":0@0");
    }

    #[test]
    fn test_parse_address_invalid() {
        assert!("invalid".parse::<ClusterNodeAddress>().is_err());
        assert!("127.0.0.1:6379".parse::<ClusterNodeAddress>().is_err());
        assert!("127.0.0.1:abc@16379".parse::<ClusterNodeAddress>().is_err());
    }

    #[test]
    fn test_parse_flags() {
        let flags: ClusterNodeFlags = "myself,master".parse().unwrap();
        assert!(flags.myself);
        assert!(flags.master);
        assert!(!flags.slave);
        assert_eq!(flags.to_string(), "master,myself");

        let flags: ClusterNodeFlags = "slave,fail?".parse().unwrap();
        assert!(flags.slave);
        assert!(flags.probable_fail);
        assert_eq!(flags.to_string(), "fail?,slave");
    }

    #[test]
    fn test_parse_flags_noflags() {
        let flags: ClusterNodeFlags = "noflags".parse().unwrap();
        assert!(flags.is_empty());
        assert_eq!(flags.to_string(), "noflags");
    }

    #[test]
    fn test_parse_flags_unknown() {
        assert!("bogus".parse::<ClusterNodeFlags>().is_err());
        assert!("master,bogus".parse::<ClusterNodeFlags>().is_err());
    }

    #[test]
    fn test_node_id_display() {
        assert_eq!(ClusterNodeId::default().to_string(), "-");
        assert_eq!(ClusterNodeId::from("abc").to_string(), "abc");
    }

    #[test]
    fn test_hash_slots_parse_and_format() {
        let slots: HashSlots = "3 1 5-6".parse().unwrap();
        assert_eq!(slots.as_slice(), &[1, 3, 5, 6]);
        assert_eq!(slots.to_string(), "1 3 5-6");
    }

    #[test]
    fn test_hash_slots_range_expansion() {
        let slots: HashSlots = "0-10".parse().unwrap();
        assert_eq!(slots.len(), 11);
        assert_eq!(slots.to_string(), "0-10");
    }

    #[test]
    fn test_hash_slots_invalid() {
        assert!("a".parse::<HashSlots>().is_err());
        assert!("1-a".parse::<HashSlots>().is_err());
        assert!("5-6-7".parse::<HashSlots>().is_err());
    }

    #[test]
    fn test_hash_slots_from_range() {
        assert_eq!(HashSlots::from_range(4, 17).to_string(), "4-17");
        assert_eq!(
            HashSlots::from_range_step(4, 17, 3).to_string(),
            "4 7 10 13 16"
        );
        assert_eq!(HashSlots::new().to_string(), "");
    }

    #[test]
    fn test_hash_slots_all() {
        let all = HashSlots::all();
        assert_eq!(all.len(), SLOT_COUNT as usize);
        assert_eq!(all.to_string(), "0-16383");
    }

    #[test]
    fn test_hash_slots_insert_and_contains() {
        let mut slots = HashSlots::new();
        slots.insert(5);
        slots.insert(3);
        slots.insert(5);
        assert_eq!(slots.as_slice(), &[3, 5]);
        assert!(slots.contains(3));
        assert!(!slots.contains(4));
    }

    #[test]
    fn test_parse_cluster_node_master() {
        let line = "07c37dfe 127.0.0.1:6379@16379 myself,master - 0 1426238317239 2 connected 5461-10922";
        let node: ClusterNode = line.parse().unwrap();

        assert_eq!(node.id, ClusterNodeId::from("07c37dfe"));
        assert_eq!(node.address.ip, "127.0.0.1");
        assert!(node.is_master());
        assert!(node.is_myself());
        assert!(!node.master_id.is_set());
        assert_eq!(node.epoch, 2);
        assert_eq!(node.link_state, LinkState::Connected);
        assert_eq!(node.slots.len(), 5462);
    }

    #[test]
    fn test_parse_cluster_node_replica() {
        let line = "e7d1eecc 127.0.0.1:6380@16380 slave 67ed2db8 0 1426238316232 3 connected";
        let node: ClusterNode = line.parse().unwrap();

        assert!(!node.is_master());
        assert!(node.flags.slave);
        assert_eq!(node.master_id, ClusterNodeId::from("67ed2db8"));
        assert!(node.slots.is_empty());
    }

    #[test]
    fn test_parse_cluster_node_canonicalizes() {
        let line = "b4b2de84 127.0.0.2:6379@16379 myself,master - 2 3 4 disconnected 3 1 5-6";
        let node: ClusterNode = line.parse().unwrap();

        assert_eq!(
            node.to_string(),
            "b4b2de84 127.0.0.2:6379@16379 master,myself - 2 3 4 disconnected 1 3 5-6"
        );
    }

    #[test]
    fn test_parse_cluster_node_skips_migration_markers() {
        let line = "b4b2de84 127.0.0.2:6379@16379 myself,master - 0 0 4 connected 0-2 [3->-e7d1eecc]";
        let node: ClusterNode = line.parse().unwrap();
        assert_eq!(node.slots.to_string(), "0-2");
    }

    #[test]
    fn test_parse_cluster_node_errors() {
        let cases = [
            "invalid",
            "b4b2de84 invalid slave abc 2 3 4 disconnected",
            "b4b2de84 127.0.0.2:6379@16379 invalid abc 2 3 4 disconnected",
            "b4b2de84 127.0.0.2:6379@16379 noflags abc a 3 4 disconnected",
            "b4b2de84 127.0.0.2:6379@16379 noflags abc 2 b 4 disconnected",
            "b4b2de84 127.0.0.2:6379@16379 noflags abc 2 3 c disconnected",
            "b4b2de84 127.0.0.2:6379@16379 noflags abc 2 3 4 pending",
            "b4b2de84 127.0.0.2:6379@16379 noflags abc 2 3 4 disconnected 1 a",
            "b4b2de84 127.0.0.2:6379@16379 noflags abc 2 3 4 disconnected 5-6-7",
        ];

        for case in cases {
            assert!(case.parse::<ClusterNode>().is_err(), "should fail: {}", case);
        }
    }

    #[test]
    fn test_parse_cluster_nodes_round_trip() {
        let text = "a 127.0.0.2:6379@16379 handshake - 0 0 0 connected\n\
                    b 127.0.0.3:6379@16379 master,myself - 0 0 0 connected 0-5460";
        let nodes: ClusterNodes = text.parse().unwrap();

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes.to_string(), text);
    }

    #[test]
    fn test_parse_cluster_nodes_empty() {
        let nodes: ClusterNodes = "".parse().unwrap();
        assert!(nodes.is_empty());
        assert_eq!(nodes.to_string(), "");
    }

    #[test]
    fn test_self_node() {
        let nodes: ClusterNodes = "a 1:1@1 handshake - 0 0 0 connected\n\
                                   b 1:1@1 master,myself - 0 0 0 connected"
            .parse()
            .unwrap();

        let myself = nodes.self_node().unwrap();
        assert_eq!(myself.id, ClusterNodeId::from("b"));
    }

    #[test]
    fn test_self_node_none() {
        let nodes: ClusterNodes = "a 1:1@1 handshake - 0 0 0 connected".parse().unwrap();
        assert!(matches!(nodes.self_node(), Err(ParseError::NoSelf)));
    }

    #[test]
    fn test_self_node_multiple() {
        let nodes: ClusterNodes = "a 1:1@1 myself,handshake - 0 0 0 connected\n\
                                   b 1:1@1 master,myself - 0 0 0 connected"
            .parse()
            .unwrap();
        assert!(matches!(nodes.self_node(), Err(ParseError::MultipleSelf)));
    }
}
