//! Sliding-window flood and brute-force detection
//!
//! A single `ConnectHistory` instance tracks connection or login attempts per
//! source address. Once an address accumulates `max_connections` attempts
//! within the sample window, it stays blocked for a fixed block period from
//! the triggering attempt, even after the window events themselves expire.
//!
//! The same structure backs both the HTTP brute-force guard and the
//! connection-volume DoS guard; only the construction parameters differ.
//! It is not internally synchronized - callers serialize access.

use std::collections::HashMap;
use std::time::Instant;

#[derive(Debug, Default)]
struct ConnectRecord {
    /// Timestamps (ms, relative to history start) of attempts in the window.
    times: Vec<u64>,
    /// Set when the threshold trips; the address is refused until this time.
    blocked_until: Option<u64>,
}

/// Per-address sliding-window attempt counter with timed lockout.
#[derive(Debug)]
pub struct ConnectHistory {
    max_connections: usize,
    sample_period_ms: u64,
    block_period_ms: u64,
    started: Instant,
    records: HashMap<String, ConnectRecord>,
}

impl ConnectHistory {
    /// `max_connections == 0` disables the check entirely, for running with
    /// flood protection turned off in the configuration.
    pub fn new(max_connections: usize, sample_period_ms: u64, block_period_ms: u64) -> Self {
        Self {
            max_connections,
            sample_period_ms,
            block_period_ms,
            started: Instant::now(),
            records: HashMap::new(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Records an attempt from `address` at the current time.
    pub fn add_connect(&mut self, address: &str) {
        let now = self.now_ms();
        self.add_connect_at(address, now);
    }

    /// Returns whether `address` is currently over the threshold or locked out.
    pub fn is_flooding(&mut self, address: &str) -> bool {
        let now = self.now_ms();
        self.is_flooding_at(address, now)
    }

    /// Records an attempt at an explicit time. Evicts window-expired events
    /// and arms the lockout when the threshold is reached.
    pub fn add_connect_at(&mut self, address: &str, now_ms: u64) {
        if self.max_connections == 0 {
            return;
        }

        let window_start = now_ms.saturating_sub(self.sample_period_ms);
        let record = self.records.entry(address.to_string()).or_default();
        record.times.retain(|&t| t >= window_start);
        record.times.push(now_ms);

        if record.times.len() >= self.max_connections {
            record.blocked_until = Some(now_ms + self.block_period_ms);
        }
    }

    /// Flooding check at an explicit time. Lockout takes precedence over the
    /// window count so an address cannot un-block itself by waiting out the
    /// sample window alone.
    pub fn is_flooding_at(&mut self, address: &str, now_ms: u64) -> bool {
        if self.max_connections == 0 {
            return false;
        }

        let window_start = now_ms.saturating_sub(self.sample_period_ms);
        let flooding = match self.records.get_mut(address) {
            None => false,
            Some(record) => {
                if let Some(until) = record.blocked_until {
                    if now_ms < until {
                        return true;
                    }
                    record.blocked_until = None;
                }
                record.times.retain(|&t| t >= window_start);
                record.times.len() >= self.max_connections
            }
        };

        // Opportunistic eviction of dead entries; no background sweep.
        if !flooding {
            if let Some(record) = self.records.get(address) {
                if record.times.is_empty() && record.blocked_until.is_none() {
                    self.records.remove(address);
                }
            }
        }
        flooding
    }

    /// Number of addresses currently tracked.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "10.0.0.1";

    #[test]
    fn test_below_threshold_is_not_flooding() {
        let mut history = ConnectHistory::new(4, 30_000, 300_000);

        history.add_connect_at(ADDR, 0);
        history.add_connect_at(ADDR, 100);
        history.add_connect_at(ADDR, 200);

        assert!(!history.is_flooding_at(ADDR, 300));
    }

    #[test]
    fn test_threshold_trips_block() {
        let mut history = ConnectHistory::new(4, 30_000, 300_000);

        for i in 0..4 {
            history.add_connect_at(ADDR, i * 1000);
        }

        assert!(history.is_flooding_at(ADDR, 4000));
    }

    #[test]
    fn test_block_outlives_sample_window() {
        let mut history = ConnectHistory::new(4, 30_000, 300_000);

        for i in 0..4 {
            history.add_connect_at(ADDR, i * 1000);
        }

        // 31 seconds later every window event has expired, but the 5 minute
        // lockout from the triggering attempt still holds.
        assert!(history.is_flooding_at(ADDR, 31_000 + 3000));

        // One millisecond before the lockout ends.
        assert!(history.is_flooding_at(ADDR, 3000 + 300_000 - 1));

        // Lockout expired, window empty: clean again.
        assert!(!history.is_flooding_at(ADDR, 3000 + 300_000));
    }

    #[test]
    fn test_window_eviction_without_block() {
        let mut history = ConnectHistory::new(4, 30_000, 300_000);

        history.add_connect_at(ADDR, 0);
        history.add_connect_at(ADDR, 1000);
        history.add_connect_at(ADDR, 2000);

        // Threshold never reached; once the window passes the address is clean.
        assert!(!history.is_flooding_at(ADDR, 40_000));
        assert!(history.is_empty());
    }

    #[test]
    fn test_addresses_are_independent() {
        let mut history = ConnectHistory::new(2, 10_000, 60_000);

        history.add_connect_at("10.0.0.1", 0);
        history.add_connect_at("10.0.0.1", 10);
        history.add_connect_at("10.0.0.2", 20);

        assert!(history.is_flooding_at("10.0.0.1", 30));
        assert!(!history.is_flooding_at("10.0.0.2", 30));
    }

    #[test]
    fn test_zero_max_disables_throttling() {
        let mut history = ConnectHistory::new(0, 10_000, 60_000);

        for i in 0..1000 {
            history.add_connect_at(ADDR, i);
        }

        assert!(!history.is_flooding_at(ADDR, 1000));
        assert!(history.is_empty());
    }

    #[test]
    fn test_wall_clock_entry_points() {
        let mut history = ConnectHistory::new(2, 10_000, 60_000);

        history.add_connect(ADDR);
        assert!(!history.is_flooding(ADDR));
        history.add_connect(ADDR);
        assert!(history.is_flooding(ADDR));
    }
}
