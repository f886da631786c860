//! Per-transfer peer list: the policy component (spec §3 "Peer record",
//! §4.6 "Policy", §9 "Design notes").
//!
//! Grounded on `original_source/src/policy.cpp`'s `policy` class: `add_peer`
//! dedups by endpoint before allocating a new record, `new_connection`
//! enforces a `max_peerlist_size` cap and records the live connection on the
//! matching record, and `find_connect_candidate`/`is_connect_candidate`
//! require `connection == null` and no existing session-level connection to
//! the same endpoint. Per spec §9, the peer records live in an arena (a slab
//! with a free list) addressed by a 32-bit index rather than the C++
//! source's intrusive `peer*` pointers, so a record's identity survives
//! across connects/disconnects without an owning reference to the
//! connection itself.

use std::collections::HashMap;
use std::net::SocketAddr;

/// Opaque index into a [`Policy`]'s peer arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(u32);

/// One entry in a transfer's peer list (spec §3 "Peer record").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerRecord {
    /// Where this peer was last known to be reachable.
    pub endpoint: SocketAddr,
    /// `true` while a live connection to this peer exists.
    pub connected: bool,
    /// How this peer was discovered: server source list, tracker, or
    /// incoming handshake (spec §3 "created when discovered").
    pub source_flags: u8,
    /// Consecutive connect failures, for candidate deprioritization.
    pub fail_count: u32,
    /// Set after repeated abuse; never offered as a connect candidate.
    pub banned: bool,
}

impl PeerRecord {
    fn new(endpoint: SocketAddr, source_flags: u8) -> Self {
        Self {
            endpoint,
            connected: false,
            source_flags,
            fail_count: 0,
            banned: false,
        }
    }
}

/// A transfer's peer list: dedup by endpoint, arena-indexed storage, and
/// connect-candidate selection (spec §4.6 "Policy").
#[derive(Debug, Default)]
pub struct Policy {
    arena: Vec<Option<PeerRecord>>,
    free_list: Vec<u32>,
    by_endpoint: HashMap<SocketAddr, PeerId>,
}

impl Policy {
    /// An empty peer list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live peer records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_endpoint.len()
    }

    /// `true` if no peer has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_endpoint.is_empty()
    }

    /// Add a newly discovered peer, deduping by endpoint
    /// (`original_source/src/policy.cpp`'s `add_peer`). Returns the existing
    /// id if already known, or `None` without inserting if the list is
    /// already at `max_peerlist_size` (`policy::new_connection`'s cap).
    pub fn add_peer(&mut self, endpoint: SocketAddr, source_flags: u8, max_peerlist_size: usize) -> Option<PeerId> {
        if let Some(&id) = self.by_endpoint.get(&endpoint) {
            return Some(id);
        }
        if self.by_endpoint.len() >= max_peerlist_size {
            return None;
        }
        let id = self.insert(PeerRecord::new(endpoint, source_flags));
        self.by_endpoint.insert(endpoint, id);
        Some(id)
    }

    fn insert(&mut self, record: PeerRecord) -> PeerId {
        if let Some(slot) = self.free_list.pop() {
            self.arena[slot as usize] = Some(record);
            PeerId(slot)
        } else {
            self.arena.push(Some(record));
            PeerId((self.arena.len() - 1) as u32)
        }
    }

    /// Look up a record by id.
    #[must_use]
    pub fn peer(&self, id: PeerId) -> Option<&PeerRecord> {
        self.arena.get(id.0 as usize).and_then(|slot| slot.as_ref())
    }

    /// Mutably look up a record by id.
    pub fn peer_mut(&mut self, id: PeerId) -> Option<&mut PeerRecord> {
        self.arena.get_mut(id.0 as usize).and_then(|slot| slot.as_mut())
    }

    /// Look up a record by endpoint.
    #[must_use]
    pub fn find_by_endpoint(&self, endpoint: SocketAddr) -> Option<PeerId> {
        self.by_endpoint.get(&endpoint).copied()
    }

    /// Mark a record connected or not (`policy::new_connection` /
    /// `policy::connection_closed`).
    pub fn set_connected(&mut self, id: PeerId, connected: bool) {
        if let Some(record) = self.peer_mut(id) {
            record.connected = connected;
        }
    }

    /// Record a failed connect attempt against this peer.
    pub fn record_failure(&mut self, id: PeerId) {
        if let Some(record) = self.peer_mut(id) {
            record.fail_count += 1;
        }
    }

    /// Ban a peer: it is never again offered as a connect candidate.
    pub fn ban(&mut self, id: PeerId) {
        if let Some(record) = self.peer_mut(id) {
            record.banned = true;
        }
    }

    /// `true` if the given peer is banned.
    #[must_use]
    pub fn is_banned(&self, id: PeerId) -> bool {
        self.peer(id).is_some_and(|r| r.banned)
    }

    /// Remove a peer record entirely, returning its slot to the free list
    /// (spec §3 "destroyed when the transfer is destroyed"; also used when
    /// a peer is known to be permanently gone).
    pub fn remove(&mut self, id: PeerId) -> Option<PeerRecord> {
        let record = self.arena.get_mut(id.0 as usize)?.take()?;
        self.by_endpoint.remove(&record.endpoint);
        self.free_list.push(id.0);
        Some(record)
    }

    /// Select one connect candidate (spec §4.6 "selects one connect
    /// candidate at a time"). Eligibility requires `connection == null`, no
    /// active ban, and no existing session-level connection to the same
    /// endpoint (`has_session_connection`, mirroring
    /// `policy::is_connect_candidate`'s duplicate-connection check against
    /// the session).
    pub fn find_connect_candidate(&self, has_session_connection: impl Fn(SocketAddr) -> bool) -> Option<PeerId> {
        for (slot, record) in self.arena.iter().enumerate() {
            let Some(record) = record else { continue };
            if record.connected || record.banned {
                continue;
            }
            if has_session_connection(record.endpoint) {
                continue;
            }
            return Some(PeerId(slot as u32));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn add_peer_dedups_by_endpoint() {
        let mut policy = Policy::new();
        let a = policy.add_peer(addr(4662), 0, 100).unwrap();
        let b = policy.add_peer(addr(4662), 0, 100).unwrap();
        assert_eq!(a, b);
        assert_eq!(policy.len(), 1);
    }

    #[test]
    fn add_peer_respects_capacity() {
        let mut policy = Policy::new();
        policy.add_peer(addr(1), 0, 1).unwrap();
        assert!(policy.add_peer(addr(2), 0, 1).is_none());
        assert_eq!(policy.len(), 1);
    }

    #[test]
    fn remove_reuses_slot_via_free_list() {
        let mut policy = Policy::new();
        let a = policy.add_peer(addr(1), 0, 100).unwrap();
        policy.remove(a).unwrap();
        assert!(policy.is_empty());
        let b = policy.add_peer(addr(2), 0, 100).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn connected_peer_is_not_a_candidate() {
        let mut policy = Policy::new();
        let a = policy.add_peer(addr(1), 0, 100).unwrap();
        policy.set_connected(a, true);
        assert_eq!(policy.find_connect_candidate(|_| false), None);
    }

    #[test]
    fn banned_peer_is_not_a_candidate() {
        let mut policy = Policy::new();
        let a = policy.add_peer(addr(1), 0, 100).unwrap();
        policy.ban(a);
        assert_eq!(policy.find_connect_candidate(|_| false), None);
    }

    #[test]
    fn session_level_duplicate_connection_excludes_candidate() {
        let mut policy = Policy::new();
        let target = addr(1);
        policy.add_peer(target, 0, 100).unwrap();
        assert_eq!(policy.find_connect_candidate(|ep| ep == target), None);
    }

    #[test]
    fn eligible_peer_is_selected() {
        let mut policy = Policy::new();
        let a = policy.add_peer(addr(1), 0, 100).unwrap();
        assert_eq!(policy.find_connect_candidate(|_| false), Some(a));
    }

    #[test]
    fn record_failure_increments_fail_count() {
        let mut policy = Policy::new();
        let a = policy.add_peer(addr(1), 0, 100).unwrap();
        policy.record_failure(a);
        policy.record_failure(a);
        assert_eq!(policy.peer(a).unwrap().fail_count, 2);
    }
}
