//! Connection/request counters shared across the accept loop and every
//! per-client task. Each field is its own atomic; there is no cross-field
//! consistency requirement beyond what callers naturally provide.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Counters {
    active_connections: AtomicU64,
    total_connections: AtomicU64,
    allowed_requests: AtomicU64,
    blocked_requests: AtomicU64,
    total_bytes_sent: AtomicU64,
    total_bytes_received: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    counters: Arc<Counters>,
}

#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub active_connections: u64,
    pub total_connections: u64,
    pub allowed_requests: u64,
    pub blocked_requests: u64,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
}

/// Increments the active/total connection counters on creation and
/// decrements the active counter when dropped, however the connection ends.
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: ConnectionTracker,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.record_connection_end();
    }
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_guard(&self) -> ConnectionGuard {
        self.record_connection_start();
        ConnectionGuard {
            tracker: self.clone(),
        }
    }

    pub fn record_connection_start(&self) {
        self.counters.active_connections.fetch_add(1, Ordering::Relaxed);
        self.counters.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_end(&self) {
        let _ = self
            .counters
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                v.checked_sub(1)
            });
    }

    pub fn record_allowed_request(&self, bytes_sent: u64, bytes_received: u64) {
        self.counters.allowed_requests.fetch_add(1, Ordering::Relaxed);
        self.counters
            .total_bytes_sent
            .fetch_add(bytes_sent, Ordering::Relaxed);
        self.counters
            .total_bytes_received
            .fetch_add(bytes_received, Ordering::Relaxed);
    }

    pub fn record_blocked_request(&self) {
        self.counters.blocked_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> Stats {
        Stats {
            active_connections: self.counters.active_connections.load(Ordering::Relaxed),
            total_connections: self.counters.total_connections.load(Ordering::Relaxed),
            allowed_requests: self.counters.allowed_requests.load(Ordering::Relaxed),
            blocked_requests: self.counters.blocked_requests.load(Ordering::Relaxed),
            total_bytes_sent: self.counters.total_bytes_sent.load(Ordering::Relaxed),
            total_bytes_received: self.counters.total_bytes_received.load(Ordering::Relaxed),
        }
    }

    pub fn formatted_stats(&self) -> String {
        let s = self.stats();
        format!(
            "Active: {} | Total: {} | Allowed: {} | Blocked: {} | Sent: {} bytes | Received: {} bytes",
            s.active_connections,
            s.total_connections,
            s.allowed_requests,
            s.blocked_requests,
            s.total_bytes_sent,
            s.total_bytes_received,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_and_end_track_active_and_total_separately() {
        let t = ConnectionTracker::new();
        t.record_connection_start();
        t.record_connection_start();
        t.record_connection_end();

        let s = t.stats();
        assert_eq!(s.active_connections, 1);
        assert_eq!(s.total_connections, 2);
    }

    #[test]
    fn end_without_start_does_not_underflow() {
        let t = ConnectionTracker::new();
        t.record_connection_end();
        assert_eq!(t.stats().active_connections, 0);
    }

    #[test]
    fn allowed_and_blocked_accumulate() {
        let t = ConnectionTracker::new();
        t.record_allowed_request(100, 50);
        t.record_allowed_request(20, 5);
        t.record_blocked_request();

        let s = t.stats();
        assert_eq!(s.allowed_requests, 2);
        assert_eq!(s.blocked_requests, 1);
        assert_eq!(s.total_bytes_sent, 120);
        assert_eq!(s.total_bytes_received, 55);
    }

    #[test]
    fn clone_shares_the_same_counters() {
        let t = ConnectionTracker::new();
        let clone = t.clone();
        t.record_connection_start();
        assert_eq!(clone.stats().total_connections, 1);
    }
}
