//! Observability and Metrics
//!
//! This module provides metrics collection and observability features
//! for monitoring gateway throughput and health.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::info;

/// Global metrics collector for gateway operations
#[derive(Debug)]
pub struct Metrics {
    /// Total connections accepted
    pub connections_total: AtomicU64,
    /// Currently active connections
    pub connections_active: AtomicU64,
    /// Connections refused by admission control
    pub connections_rejected: AtomicU64,
    /// Connections refused because the listener was at capacity
    pub connections_over_capacity: AtomicU64,
    /// Total frames received and dispatched
    pub frames_received: AtomicU64,
    /// Total frames sent
    pub frames_sent: AtomicU64,
    /// Total bytes received
    pub bytes_received: AtomicU64,
    /// Total bytes sent
    pub bytes_sent: AtomicU64,
    /// Wire-protocol violations (fatal disconnects)
    pub protocol_violations: AtomicU64,
    /// Handler errors recovered without disconnect
    pub handler_errors: AtomicU64,
    /// Standard-priority frames shed at the handler gate
    pub frames_shed: AtomicU64,
    /// Frames for opcodes with no registered handler
    pub frames_unhandled: AtomicU64,
    /// Outbound buffers discarded by drop-oldest backpressure
    pub queue_drops: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            connections_over_capacity: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            protocol_violations: AtomicU64::new(0),
            handler_errors: AtomicU64::new(0),
            frames_shed: AtomicU64::new(0),
            frames_unhandled: AtomicU64::new(0),
            queue_drops: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Process-wide metrics instance
    pub fn global() -> &'static Metrics {
        static METRICS: OnceLock<Metrics> = OnceLock::new();
        METRICS.get_or_init(Metrics::new)
    }

    /// Record a new connection
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closed
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record an admission-control refusal
    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a capacity refusal
    pub fn connection_over_capacity(&self) {
        self.connections_over_capacity.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame received
    pub fn frame_received(&self, byte_count: u64) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a frame sent
    pub fn frame_sent(&self, byte_count: u64) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a fatal wire-protocol violation
    pub fn protocol_violation(&self) {
        self.protocol_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a recovered handler error
    pub fn handler_error(&self) {
        self.handler_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a shed frame
    pub fn frame_shed(&self) {
        self.frames_shed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame with no registered handler
    pub fn frame_unhandled(&self) {
        self.frames_unhandled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an outbound buffer discarded under backpressure
    pub fn queue_drop(&self) {
        self.queue_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Uptime since this collector was created
    pub fn uptime(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Take a point-in-time snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            connections_over_capacity: self.connections_over_capacity.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            protocol_violations: self.protocol_violations.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            frames_shed: self.frames_shed.load(Ordering::Relaxed),
            frames_unhandled: self.frames_unhandled.load(Ordering::Relaxed),
            queue_drops: self.queue_drops.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log a one-line summary of current counters
    pub fn log_summary(&self) {
        let s = self.snapshot();
        info!(
            connections_active = s.connections_active,
            connections_total = s.connections_total,
            frames_received = s.frames_received,
            frames_sent = s.frames_sent,
            protocol_violations = s.protocol_violations,
            frames_shed = s.frames_shed,
            queue_drops = s.queue_drops,
            uptime_seconds = s.uptime_seconds,
            "gateway metrics"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub connections_rejected: u64,
    pub connections_over_capacity: u64,
    pub frames_received: u64,
    pub frames_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub protocol_violations: u64,
    pub handler_errors: u64,
    pub frames_shed: u64,
    pub frames_unhandled: u64,
    pub queue_drops: u64,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = Metrics::new();
        m.connection_established();
        m.connection_established();
        m.connection_closed();
        m.frame_received(128);
        m.frame_sent(64);
        m.queue_drop();

        let s = m.snapshot();
        assert_eq!(s.connections_total, 2);
        assert_eq!(s.connections_active, 1);
        assert_eq!(s.frames_received, 1);
        assert_eq!(s.bytes_received, 128);
        assert_eq!(s.bytes_sent, 64);
        assert_eq!(s.queue_drops, 1);
    }

    #[test]
    fn global_is_stable() {
        let a = Metrics::global() as *const Metrics;
        let b = Metrics::global() as *const Metrics;
        assert_eq!(a, b);
    }
}
