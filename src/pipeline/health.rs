//! Health counters for the relay

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

/// Relay health metrics
///
/// Shared between the relay loop and the status endpoint. All fields use
/// atomic operations for lock-free access.
pub struct RelayHealth {
    /// Packets read from the inbound track
    pub units_relayed: AtomicU64,

    /// Payload bytes read from the inbound track
    pub bytes_relayed: AtomicU64,

    /// Individual sink writes that failed
    pub sink_write_failures: AtomicU64,

    /// Unix microseconds of the last packet; 0 until the first one
    pub last_unit_time: AtomicU64,
}

impl RelayHealth {
    pub fn new() -> Self {
        Self {
            units_relayed: AtomicU64::new(0),
            bytes_relayed: AtomicU64::new(0),
            sink_write_failures: AtomicU64::new(0),
            last_unit_time: AtomicU64::new(0),
        }
    }

    /// Record a packet read from the track
    pub fn record_unit(&self, size: usize) {
        self.last_unit_time.store(now_micros(), Ordering::Relaxed);
        self.units_relayed.fetch_add(1, Ordering::Relaxed);
        self.bytes_relayed.fetch_add(size as u64, Ordering::Relaxed);
    }

    /// Record a failed write to one sink
    pub fn record_sink_failure(&self) {
        self.sink_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn units_relayed(&self) -> u64 {
        self.units_relayed.load(Ordering::Relaxed)
    }

    pub fn bytes_relayed(&self) -> u64 {
        self.bytes_relayed.load(Ordering::Relaxed)
    }

    pub fn sink_write_failures(&self) -> u64 {
        self.sink_write_failures.load(Ordering::Relaxed)
    }

    /// True when no packet arrived for `threshold` (or none ever did)
    pub fn is_stalled(&self, threshold: Duration) -> bool {
        let last = self.last_unit_time.load(Ordering::Relaxed);
        if last == 0 {
            return true;
        }
        now_micros().saturating_sub(last) > threshold.as_micros() as u64
    }

    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            units_relayed: self.units_relayed(),
            bytes_relayed: self.bytes_relayed(),
            sink_write_failures: self.sink_write_failures(),
            stalled: self.is_stalled(Duration::from_secs(2)),
        }
    }
}

impl Default for RelayHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of relay metrics
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub units_relayed: u64,
    pub bytes_relayed: u64,
    pub sink_write_failures: u64,
    pub stalled: bool,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Relay: {} packets, {} bytes, {} sink failures{}",
            self.units_relayed,
            self.bytes_relayed,
            self.sink_write_failures,
            if self.stalled { " (stalled)" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let health = RelayHealth::new();
        assert!(health.is_stalled(Duration::from_secs(60)));

        health.record_unit(1200);
        health.record_unit(300);
        health.record_sink_failure();

        assert_eq!(health.units_relayed(), 2);
        assert_eq!(health.bytes_relayed(), 1500);
        assert_eq!(health.sink_write_failures(), 1);
        assert!(!health.is_stalled(Duration::from_secs(60)));

        let summary = health.summary();
        assert_eq!(summary.units_relayed, 2);
        assert!(summary.to_string().contains("2 packets"));
    }
}
