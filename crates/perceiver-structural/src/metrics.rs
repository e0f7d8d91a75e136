//! Telemetry helpers for the structural perceiver.
//!
//! Lightweight counters + latency aggregates so callers can surface basic metrics without
//! depending on an external metrics backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

static SNAPSHOT_TOTAL: AtomicU64 = AtomicU64::new(0);
static SNAPSHOT_FAILED: AtomicU64 = AtomicU64::new(0);
static SNAPSHOT_LAT_NS: AtomicU64 = AtomicU64::new(0);
static SNAPSHOT_LAT_SAMPLES: AtomicU64 = AtomicU64::new(0);

static ROLE_RESOLVED: AtomicU64 = AtomicU64::new(0);
static ROLE_UNRESOLVED: AtomicU64 = AtomicU64::new(0);

static SCROLLABLE_FOUND: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricCounter {
    pub total: u64,
    pub failed: u64,
    pub avg_ms: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RoleMetric {
    pub resolved: u64,
    pub unresolved: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricSnapshot {
    pub snapshot: MetricCounter,
    pub role_resolution: RoleMetric,
    pub scrollable_found: u64,
}

pub fn record_snapshot(ok: bool, duration: Duration) {
    SNAPSHOT_TOTAL.fetch_add(1, Ordering::Relaxed);
    if !ok {
        SNAPSHOT_FAILED.fetch_add(1, Ordering::Relaxed);
    }
    record_latency(&SNAPSHOT_LAT_NS, &SNAPSHOT_LAT_SAMPLES, duration);
}

pub fn record_role_resolution(resolved: bool) {
    if resolved {
        ROLE_RESOLVED.fetch_add(1, Ordering::Relaxed);
    } else {
        ROLE_UNRESOLVED.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn record_scrollable(count: usize) {
    SCROLLABLE_FOUND.fetch_add(count as u64, Ordering::Relaxed);
}

pub fn snapshot() -> MetricSnapshot {
    MetricSnapshot {
        snapshot: make_counter(
            SNAPSHOT_TOTAL.load(Ordering::Relaxed),
            SNAPSHOT_FAILED.load(Ordering::Relaxed),
            SNAPSHOT_LAT_NS.load(Ordering::Relaxed),
            SNAPSHOT_LAT_SAMPLES.load(Ordering::Relaxed),
        ),
        role_resolution: make_role_metric(
            ROLE_RESOLVED.load(Ordering::Relaxed),
            ROLE_UNRESOLVED.load(Ordering::Relaxed),
        ),
        scrollable_found: SCROLLABLE_FOUND.load(Ordering::Relaxed),
    }
}

fn make_counter(total: u64, failed: u64, nanos: u64, samples: u64) -> MetricCounter {
    let avg_ms = if samples == 0 {
        0.0
    } else {
        (nanos as f64 / samples as f64) / 1_000_000.0
    };
    MetricCounter {
        total,
        failed,
        avg_ms,
    }
}

fn make_role_metric(resolved: u64, unresolved: u64) -> RoleMetric {
    let total = resolved + unresolved;
    let hit_rate = if total == 0 {
        0.0
    } else {
        resolved as f64 * 100.0 / total as f64
    };
    RoleMetric {
        resolved,
        unresolved,
        hit_rate,
    }
}

fn record_latency(total_ns: &AtomicU64, samples: &AtomicU64, duration: Duration) {
    let nanos = duration_to_nanos(duration);
    total_ns.fetch_add(nanos, Ordering::Relaxed);
    samples.fetch_add(1, Ordering::Relaxed);
}

fn duration_to_nanos(duration: Duration) -> u64 {
    let nanos = duration.as_nanos();
    if nanos > u64::MAX as u128 {
        u64::MAX
    } else {
        nanos as u64
    }
}
