//! Upload-slot queue (spec §4.5 "Upload side").
//!
//! Grounded on `original_source/libed2k/src/peer_connection.cpp`'s
//! `write_start_upload`/`write_accept_upload`/`write_queue_ranking`: a
//! newly-contacted peer is queued, an `accept_upload` is sent once a slot
//! opens, and the peer's position is advertised periodically via
//! `queue_ranking` while it waits.

use std::collections::VecDeque;
use std::net::SocketAddr;

/// Bounded set of active upload slots plus a FIFO wait list (spec §4.5
/// "Access to upload is gated by a queue ranking").
#[derive(Debug)]
pub struct UploadSlotQueue {
    capacity: usize,
    active: Vec<SocketAddr>,
    waiting: VecDeque<SocketAddr>,
}

impl UploadSlotQueue {
    /// A queue with `capacity` concurrent upload slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            active: Vec::new(),
            waiting: VecDeque::new(),
        }
    }

    /// Number of slots currently in use.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// `true` if `endpoint` currently holds an active slot.
    #[must_use]
    pub fn is_active(&self, endpoint: SocketAddr) -> bool {
        self.active.contains(&endpoint)
    }

    /// A newly-contacted peer requests an upload slot. Grants immediately
    /// if one is free, otherwise appends it to the wait list. Returns
    /// `true` if the slot was granted right away.
    pub fn request(&mut self, endpoint: SocketAddr) -> bool {
        if self.is_active(endpoint) || self.waiting.contains(&endpoint) {
            return self.is_active(endpoint);
        }
        if self.active.len() < self.capacity {
            self.active.push(endpoint);
            true
        } else {
            self.waiting.push_back(endpoint);
            false
        }
    }

    /// Release a peer's slot (disconnect, or upload finished), promoting
    /// the next waiting peer if any. Returns the promoted peer, which the
    /// caller must send an `accept_upload` to.
    pub fn release(&mut self, endpoint: SocketAddr) -> Option<SocketAddr> {
        self.active.retain(|&e| e != endpoint);
        self.waiting.retain(|&e| e != endpoint);
        if self.active.len() < self.capacity {
            if let Some(next) = self.waiting.pop_front() {
                self.active.push(next);
                return Some(next);
            }
        }
        None
    }

    /// 1-based position in the wait list, for a `queue_ranking` message.
    /// `None` if the peer holds an active slot or isn't queued at all.
    #[must_use]
    pub fn rank_of(&self, endpoint: SocketAddr) -> Option<u16> {
        self.waiting
            .iter()
            .position(|&e| e == endpoint)
            .map(|pos| (pos + 1) as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn request_grants_immediately_within_capacity() {
        let mut q = UploadSlotQueue::new(2);
        assert!(q.request(addr(1)));
        assert!(q.request(addr(2)));
        assert_eq!(q.active_count(), 2);
    }

    #[test]
    fn request_queues_beyond_capacity() {
        let mut q = UploadSlotQueue::new(1);
        assert!(q.request(addr(1)));
        assert!(!q.request(addr(2)));
        assert_eq!(q.rank_of(addr(2)), Some(1));
    }

    #[test]
    fn release_promotes_next_waiting_peer() {
        let mut q = UploadSlotQueue::new(1);
        q.request(addr(1));
        q.request(addr(2));
        let promoted = q.release(addr(1));
        assert_eq!(promoted, Some(addr(2)));
        assert!(q.is_active(addr(2)));
    }

    #[test]
    fn rank_of_active_peer_is_none() {
        let mut q = UploadSlotQueue::new(1);
        q.request(addr(1));
        assert_eq!(q.rank_of(addr(1)), None);
    }

    #[test]
    fn rank_of_second_waiting_peer_is_two() {
        let mut q = UploadSlotQueue::new(1);
        q.request(addr(1));
        q.request(addr(2));
        q.request(addr(3));
        assert_eq!(q.rank_of(addr(3)), Some(2));
    }
}
