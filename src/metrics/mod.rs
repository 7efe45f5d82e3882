//! Metrics collection and monitoring module
//!
//! Counters are mirrored into the `metrics` facade so an exporter can pick them up, and kept
//! locally so the server can log a periodic status line without one.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the hub counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubSnapshot {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub broadcasts: u64,
    pub deliveries: u64,
    pub delivery_failures: u64,
    pub transitions: u64,
    pub signals_relayed: u64,
}

impl HubSnapshot {
    /// Connections currently open
    pub fn live_connections(&self) -> u64 {
        self.connections_opened
            .saturating_sub(self.connections_closed)
    }
}

/// Hub-wide counters
#[derive(Debug, Default)]
pub struct HubMetrics {
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    broadcasts: AtomicU64,
    deliveries: AtomicU64,
    delivery_failures: AtomicU64,
    transitions: AtomicU64,
    signals_relayed: AtomicU64,
}

impl HubMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        metrics::increment_counter!("classlive_connections_opened_total");
        metrics::increment_gauge!("classlive_connections_live", 1.0);
    }

    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
        metrics::increment_counter!("classlive_connections_closed_total");
        metrics::decrement_gauge!("classlive_connections_live", 1.0);
    }

    /// Record one fan-out and how many members it reached
    pub fn record_broadcast(&self, delivered: usize) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.deliveries
            .fetch_add(delivered as u64, Ordering::Relaxed);
        metrics::increment_counter!("classlive_broadcasts_total");
        metrics::counter!("classlive_deliveries_total", delivered as u64);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
        metrics::increment_counter!("classlive_delivery_failures_total");
    }

    pub fn record_transition(&self, status: &'static str) {
        self.transitions.fetch_add(1, Ordering::Relaxed);
        metrics::increment_counter!("classlive_transitions_total", "status" => status);
    }

    pub fn record_signal(&self, action: &'static str) {
        self.signals_relayed.fetch_add(1, Ordering::Relaxed);
        metrics::increment_counter!("classlive_signals_relayed_total", "action" => action);
    }

    /// Copy the current counter values
    pub fn snapshot(&self) -> HubSnapshot {
        HubSnapshot {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
            signals_relayed: self.signals_relayed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let metrics = HubMetrics::new();
        metrics.record_connection_opened();
        metrics.record_connection_opened();
        metrics.record_connection_closed();
        metrics.record_broadcast(3);
        metrics.record_broadcast(0);
        metrics.record_delivery_failure();
        metrics.record_transition("started");
        metrics.record_signal("offer");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.live_connections(), 1);
        assert_eq!(snapshot.broadcasts, 2);
        assert_eq!(snapshot.deliveries, 3);
        assert_eq!(snapshot.delivery_failures, 1);
        assert_eq!(snapshot.transitions, 1);
        assert_eq!(snapshot.signals_relayed, 1);
    }

    #[test]
    fn test_default_snapshot_is_empty() {
        assert_eq!(HubMetrics::default().snapshot(), HubSnapshot::default());
    }
}
