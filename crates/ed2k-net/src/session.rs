//! Single-threaded session event loop (spec §4.8, component C8).
//!
//! Grounded on spec §5's concurrency model: one cooperative event loop
//! owns the listener, the half-open-connect throttle, the per-second and
//! per-minute timers, the disk-job completion sink, and the alert queue.
//! This module models that ownership and bookkeeping as plain synchronous
//! state; the embedder drives actual socket I/O (e.g. `ed2k-cli`'s tokio
//! runtime) and calls back into [`Session`] on accept/dial/tick events,
//! matching the "no component may block synchronously on the event loop"
//! rule. Connect-candidate selection defers to each transfer's
//! [`ed2k_transfer::policy::Policy`]; this module only supplies the
//! session-level "is there already a connection to this endpoint" check
//! that `original_source/src/policy.cpp`'s `is_connect_candidate` runs
//! against the owning session.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;

use ed2k_core::hash::Hash;
use ed2k_peer::connection::{Origin, PeerConnection};
use ed2k_transfer::policy::{PeerId, Policy};
use tracing::{debug, warn};

/// A bounded token bucket for one direction of one connection's rate limit
/// (spec §5 "Rate limiting").
#[derive(Debug, Clone, Copy)]
pub struct TokenBucket {
    capacity: u64,
    available: u64,
}

impl TokenBucket {
    /// A bucket starting full at `capacity` bytes per tick.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            available: capacity,
        }
    }

    /// Replenish to capacity; called once per second tick.
    pub fn replenish(&mut self) {
        self.available = self.capacity;
    }

    /// Reserve up to `want` bytes of quota, returning how much was granted.
    pub fn reserve(&mut self, want: u64) -> u64 {
        let granted = want.min(self.available);
        self.available -= granted;
        granted
    }

    /// Bytes left in the current tick.
    #[must_use]
    pub fn available(&self) -> u64 {
        self.available
    }
}

/// Global cap on concurrent connecting sockets (spec §5 "Half-open
/// throttle").
#[derive(Debug)]
pub struct HalfOpenThrottle {
    capacity: usize,
    in_flight: usize,
}

impl HalfOpenThrottle {
    /// A throttle with room for `capacity` concurrent outbound dials.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            in_flight: 0,
        }
    }

    /// Reserve a slot for an outbound dial, if one is free.
    #[must_use]
    pub fn try_reserve(&mut self) -> bool {
        if self.in_flight < self.capacity {
            self.in_flight += 1;
            true
        } else {
            false
        }
    }

    /// Release a previously reserved slot (dial completed or failed).
    pub fn release(&mut self) {
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    /// Current in-flight count.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }
}

/// Platform-default half-open cap (spec §5 "a platform-specific default
/// cap applies"). Windows historically enforced a documented low ceiling
/// on half-open outbound TCP connections; other platforms are far less
/// constrained in practice, but a conservative shared default keeps
/// behavior uniform.
#[cfg(target_os = "windows")]
pub const DEFAULT_HALF_OPEN_CAP: usize = 8;
/// Platform-default half-open cap; see [`DEFAULT_HALF_OPEN_CAP`] above.
#[cfg(not(target_os = "windows"))]
pub const DEFAULT_HALF_OPEN_CAP: usize = 64;

/// Category of an alert posted to the embedder (spec §7 "Alert
/// categories").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertCategory {
    /// General status change (phase transitions, periodic summaries).
    StatusNotification,
    /// Server-connection events.
    ServerNotification,
    /// Peer-connection events, including disconnects.
    PeerNotification,
    /// Errors worth surfacing to the embedder.
    ErrorNotification,
    /// Disk/storage events.
    StorageNotification,
}

/// One queued alert.
#[derive(Debug, Clone)]
pub struct Alert {
    /// Which category this alert belongs to.
    pub category: AlertCategory,
    /// Human-readable message.
    pub message: String,
}

/// Bounded alert queue with a high-water mark (spec §4.8 "An alert queue
/// with a high-water bound").
#[derive(Debug)]
pub struct AlertQueue {
    queue: VecDeque<Alert>,
    high_water: usize,
    dropped: u64,
}

impl AlertQueue {
    /// A queue that drops the oldest alert once `high_water` is exceeded,
    /// counting drops rather than blocking the event loop.
    #[must_use]
    pub fn new(high_water: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            high_water,
            dropped: 0,
        }
    }

    /// Enqueue an alert, evicting the oldest entry if full.
    pub fn push(&mut self, alert: Alert) {
        if self.queue.len() >= self.high_water {
            self.queue.pop_front();
            self.dropped += 1;
        }
        self.queue.push_back(alert);
    }

    /// Drain all queued alerts for dispatch to the embedder.
    pub fn drain(&mut self) -> Vec<Alert> {
        self.queue.drain(..).collect()
    }

    /// Number of alerts dropped for exceeding the high-water mark.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// A completed disk job, posted back from the storage worker pool (spec
/// §4.8 "A disk-job completion sink").
#[derive(Debug, Clone)]
pub enum DiskCompletion {
    /// A piece write finished; `ok` is `false` on I/O failure.
    PieceWritten { transfer_hash: Hash, piece: u64, ok: bool },
    /// A barrier job used to drain the queue during shutdown completed.
    Barrier,
}

/// Outcome of attaching an incoming `hello` to an existing roster (spec
/// §4.8 "Attach dispatch" / "Duplicate-endpoint handling").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// No existing connection for this endpoint; the new one is kept.
    Accepted,
    /// An outgoing connection to this endpoint was still connecting; the
    /// new inbound one replaces it.
    ReplacedConnecting,
    /// A connection to this endpoint already exists and is past
    /// connecting; the new inbound one is the loser.
    RejectedDuplicate,
    /// The new connection's local endpoint equals the remote's (self-dial).
    RejectedSelfConnection,
}

/// The single-threaded session: listener roster, half-open throttle, alert
/// queue, and per-tick timers.
pub struct Session {
    peers: HashMap<SocketAddr, PeerConnection>,
    half_open: HalfOpenThrottle,
    alerts: AlertQueue,
    seconds_elapsed: u64,
    minutes_elapsed: u64,
    local_addr: Option<SocketAddr>,
}

impl Session {
    /// A fresh session with the platform default half-open cap and a
    /// 1024-entry alert high-water mark.
    #[must_use]
    pub fn new(local_addr: SocketAddr) -> Self {
        Self {
            peers: HashMap::new(),
            half_open: HalfOpenThrottle::new(DEFAULT_HALF_OPEN_CAP),
            alerts: AlertQueue::new(1024),
            seconds_elapsed: 0,
            minutes_elapsed: 0,
            local_addr: Some(local_addr),
        }
    }

    /// Number of peer connections currently tracked.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Borrow the half-open throttle.
    pub fn half_open(&mut self) -> &mut HalfOpenThrottle {
        &mut self.half_open
    }

    /// Borrow the alert queue.
    pub fn alerts(&mut self) -> &mut AlertQueue {
        &mut self.alerts
    }

    /// Accept an inbound socket, creating a remote-role peer connection and
    /// resolving duplicate-endpoint policy (spec §4.8 "Attach dispatch").
    pub fn accept(&mut self, remote: SocketAddr) -> AttachOutcome {
        if Some(remote) == self.local_addr {
            warn!(%remote, "rejecting self-connection");
            return AttachOutcome::RejectedSelfConnection;
        }
        match self.peers.get(&remote) {
            None => {
                self.peers.insert(remote, PeerConnection::new_remote());
                debug!(%remote, "accepted new peer connection");
                AttachOutcome::Accepted
            }
            Some(existing) if existing.origin() == Origin::Local && existing.state() == ed2k_peer::connection::PeerState::Connecting => {
                self.peers.insert(remote, PeerConnection::new_remote());
                debug!(%remote, "inbound connection replaced a still-connecting outgoing one");
                AttachOutcome::ReplacedConnecting
            }
            Some(_) => {
                warn!(%remote, "duplicate peer endpoint, rejecting inbound connection");
                AttachOutcome::RejectedDuplicate
            }
        }
    }

    /// Start dialing a new outbound peer connection for `remote`, if the
    /// half-open throttle has room.
    #[must_use]
    pub fn try_dial(&mut self, remote: SocketAddr, file_hash: Hash) -> Option<()> {
        if !self.half_open.try_reserve() {
            return None;
        }
        self.peers.insert(remote, PeerConnection::new_local(file_hash));
        Some(())
    }

    /// Remove a peer connection, releasing its half-open slot if it was
    /// still connecting.
    pub fn remove_peer(&mut self, remote: SocketAddr) {
        if let Some(conn) = self.peers.remove(&remote) {
            if conn.origin() == Origin::Local && conn.state() == ed2k_peer::connection::PeerState::Connecting {
                self.half_open.release();
            }
        }
    }

    /// Look up a peer connection by endpoint.
    pub fn peer_mut(&mut self, remote: SocketAddr) -> Option<&mut PeerConnection> {
        self.peers.get_mut(&remote)
    }

    /// Run the per-second tick: replenish rate-limit buckets (owned by the
    /// caller per connection), roll the second counter, and report whether
    /// a per-minute tick is also due (spec §4.8 "per-second"/"per-minute
    /// timer").
    pub fn second_tick(&mut self) -> bool {
        self.seconds_elapsed += 1;
        if self.seconds_elapsed % 60 == 0 {
            self.minutes_elapsed += 1;
            true
        } else {
            false
        }
    }

    /// Seconds elapsed since the session started.
    #[must_use]
    pub fn seconds_elapsed(&self) -> u64 {
        self.seconds_elapsed
    }

    /// Select a connect candidate from a transfer's policy, excluding any
    /// endpoint this session already has a connection to (spec §4.6
    /// "Policy...selects one connect candidate at a time driven by the
    /// session's half-open throttle"; candidate eligibility is the policy's
    /// own, this just supplies the session-level duplicate check).
    #[must_use]
    pub fn connect_candidate(&self, policy: &Policy) -> Option<PeerId> {
        policy.find_connect_candidate(|endpoint| self.peers.contains_key(&endpoint))
    }

    /// Select and dial the next eligible peer from `policy`, if the
    /// half-open throttle has room. On success, marks the record connected
    /// in the policy so it won't be offered again until the connection
    /// closes.
    pub fn connect_next(&mut self, policy: &mut Policy, file_hash: Hash) -> Option<PeerId> {
        let id = self.connect_candidate(policy)?;
        let endpoint = policy.peer(id)?.endpoint;
        self.try_dial(endpoint, file_hash)?;
        policy.set_connected(id, true);
        Some(id)
    }

    /// Handle a completed disk job, posting an appropriate alert.
    pub fn on_disk_completion(&mut self, completion: DiskCompletion) {
        match completion {
            DiskCompletion::PieceWritten { transfer_hash, piece, ok } => {
                self.alerts.push(Alert {
                    category: AlertCategory::StorageNotification,
                    message: format!("piece {piece} of {transfer_hash} written, ok={ok}"),
                });
            }
            DiskCompletion::Barrier => {
                self.alerts.push(Alert {
                    category: AlertCategory::StatusNotification,
                    message: "disk queue barrier reached".to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn half_open_throttle_caps_in_flight_dials() {
        let mut throttle = HalfOpenThrottle::new(1);
        assert!(throttle.try_reserve());
        assert!(!throttle.try_reserve());
        throttle.release();
        assert!(throttle.try_reserve());
    }

    #[test]
    fn alert_queue_drops_oldest_past_high_water() {
        let mut queue = AlertQueue::new(2);
        for i in 0..3 {
            queue.push(Alert {
                category: AlertCategory::StatusNotification,
                message: format!("{i}"),
            });
        }
        assert_eq!(queue.dropped(), 1);
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].message, "1");
    }

    #[test]
    fn accept_rejects_self_connection() {
        let local = addr(4662);
        let mut session = Session::new(local);
        assert_eq!(session.accept(local), AttachOutcome::RejectedSelfConnection);
    }

    #[test]
    fn accept_rejects_duplicate_unless_still_connecting() {
        let mut session = Session::new(addr(1));
        let remote = addr(2);
        session.try_dial(remote, Hash::of(b"f")).unwrap();
        assert_eq!(session.accept(remote), AttachOutcome::ReplacedConnecting);
    }

    #[test]
    fn second_tick_reports_minute_boundary() {
        let mut session = Session::new(addr(1));
        for _ in 0..59 {
            assert!(!session.second_tick());
        }
        assert!(session.second_tick());
    }

    #[test]
    fn token_bucket_reserves_up_to_available() {
        let mut bucket = TokenBucket::new(100);
        assert_eq!(bucket.reserve(150), 100);
        assert_eq!(bucket.available(), 0);
        bucket.replenish();
        assert_eq!(bucket.available(), 100);
    }

    #[test]
    fn removing_connecting_peer_releases_half_open_slot() {
        let mut session = Session::new(addr(1));
        let remote = addr(2);
        session.try_dial(remote, Hash::of(b"f")).unwrap();
        assert_eq!(session.half_open().in_flight(), 1);
        session.remove_peer(remote);
        assert_eq!(session.half_open().in_flight(), 0);
    }

    #[test]
    fn connect_next_dials_and_marks_policy_connected() {
        let mut session = Session::new(addr(1));
        let mut policy = Policy::new();
        let id = policy.add_peer(addr(2), 0, 100).unwrap();
        let selected = session.connect_next(&mut policy, Hash::of(b"f")).unwrap();
        assert_eq!(selected, id);
        assert!(policy.peer(id).unwrap().connected);
        assert_eq!(session.peer_count(), 1);
    }

    #[test]
    fn connect_candidate_skips_endpoint_already_in_session() {
        let mut session = Session::new(addr(1));
        let remote = addr(2);
        session.try_dial(remote, Hash::of(b"f")).unwrap();
        let mut policy = Policy::new();
        policy.add_peer(remote, 0, 100).unwrap();
        assert_eq!(session.connect_candidate(&policy), None);
    }
}
