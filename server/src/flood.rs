//! Per-connection flood control for gameplay events.
//!
//! Tracks the last accepted timestamp per `(connection, event key)` pair and
//! drops events arriving faster than the configured delay. Distinct keys on
//! the same connection are throttled independently. The gate sits in front
//! of the relay and the state engine; dropped events are never surfaced to
//! the sender.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::broker::ConnectionId;

pub struct FloodGate {
    delay: Duration,
    last_accepted: HashMap<(ConnectionId, String), Instant>,
}

impl FloodGate {
    /// Creates a gate with the given minimum delay between accepted events.
    /// A zero delay disables throttling entirely.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_accepted: HashMap::new(),
        }
    }

    /// Returns true if the event should be processed, recording `now` as the
    /// new last-accepted timestamp for the pair. Returns false (and leaves
    /// the recorded timestamp untouched) when the event arrives inside the
    /// delay window.
    pub fn admit(&mut self, conn: ConnectionId, key: &str, now: Instant) -> bool {
        if self.delay.is_zero() {
            return true;
        }
        match self.last_accepted.get_mut(&(conn, key.to_string())) {
            Some(last) if now.duration_since(*last) < self.delay => false,
            Some(last) => {
                *last = now;
                true
            }
            None => {
                self.last_accepted.insert((conn, key.to_string()), now);
                true
            }
        }
    }

    /// Clears all tracked timestamps for a disconnected connection.
    pub fn forget(&mut self, conn: ConnectionId) {
        self.last_accepted.retain(|(c, _), _| *c != conn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(1000);

    #[test]
    fn first_event_always_admitted() {
        let mut gate = FloodGate::new(DELAY);
        assert!(gate.admit(ConnectionId(1), "shoot", Instant::now()));
    }

    #[test]
    fn event_inside_window_dropped() {
        let mut gate = FloodGate::new(DELAY);
        let t0 = Instant::now();
        assert!(gate.admit(ConnectionId(1), "shoot", t0));
        assert!(!gate.admit(ConnectionId(1), "shoot", t0 + Duration::from_millis(500)));
    }

    #[test]
    fn event_at_or_past_window_admitted() {
        let mut gate = FloodGate::new(DELAY);
        let t0 = Instant::now();
        assert!(gate.admit(ConnectionId(1), "shoot", t0));
        assert!(gate.admit(ConnectionId(1), "shoot", t0 + DELAY));
    }

    #[test]
    fn dropped_event_does_not_reset_window() {
        let mut gate = FloodGate::new(DELAY);
        let t0 = Instant::now();
        assert!(gate.admit(ConnectionId(1), "shoot", t0));
        assert!(!gate.admit(ConnectionId(1), "shoot", t0 + Duration::from_millis(900)));
        // Still measured from t0, not from the dropped attempt.
        assert!(gate.admit(ConnectionId(1), "shoot", t0 + Duration::from_millis(1000)));
    }

    #[test]
    fn distinct_keys_are_independent() {
        let mut gate = FloodGate::new(DELAY);
        let t0 = Instant::now();
        assert!(gate.admit(ConnectionId(1), "shoot", t0));
        assert!(gate.admit(ConnectionId(1), "jump", t0));
        assert!(!gate.admit(ConnectionId(1), "shoot", t0 + Duration::from_millis(1)));
    }

    #[test]
    fn distinct_connections_are_independent() {
        let mut gate = FloodGate::new(DELAY);
        let t0 = Instant::now();
        assert!(gate.admit(ConnectionId(1), "shoot", t0));
        assert!(gate.admit(ConnectionId(2), "shoot", t0));
    }

    #[test]
    fn forget_clears_connection_timestamps() {
        let mut gate = FloodGate::new(DELAY);
        let t0 = Instant::now();
        assert!(gate.admit(ConnectionId(1), "shoot", t0));
        gate.forget(ConnectionId(1));
        // A fresh connection with the same id starts from a clean slate.
        assert!(gate.admit(ConnectionId(1), "shoot", t0 + Duration::from_millis(1)));
    }

    #[test]
    fn zero_delay_disables_throttling() {
        let mut gate = FloodGate::new(Duration::ZERO);
        let t0 = Instant::now();
        assert!(gate.admit(ConnectionId(1), "shoot", t0));
        assert!(gate.admit(ConnectionId(1), "shoot", t0));
    }
}
