//! Metric names and recorders.
//!
//! Recording is a no-op until the binary installs a recorder (see
//! `bazaar-server`), so library code can call these unconditionally.

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    // Cache metrics
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_REBUILDS_TOTAL: &str = "cache_rebuilds_total";

    // Lock metrics
    pub const LOCK_ACQUISITIONS_TOTAL: &str = "lock_acquisitions_total";

    // Seckill metrics
    pub const SECKILL_ADMISSIONS_TOTAL: &str = "seckill_admissions_total";
    pub const ORDER_QUEUE_ENTRIES_TOTAL: &str = "order_queue_entries_total";
}

// =============================================================================
// Cache Metrics
// =============================================================================

/// Record a cache hit. `kind` is `value` or `null` (anti-penetration marker).
pub fn record_cache_hit(kind: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "kind" => kind).increment(1);
}

pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record the outcome of a logical-expiration rebuild.
pub fn record_cache_rebuild(outcome: &'static str) {
    counter!(names::CACHE_REBUILDS_TOTAL, "outcome" => outcome).increment(1);
}

// =============================================================================
// Lock Metrics
// =============================================================================

pub fn record_lock_acquisition(acquired: bool) {
    let outcome = if acquired { "acquired" } else { "contended" };
    counter!(names::LOCK_ACQUISITIONS_TOTAL, "outcome" => outcome).increment(1);
}

// =============================================================================
// Seckill Metrics
// =============================================================================

pub fn record_admission(outcome: &'static str) {
    counter!(names::SECKILL_ADMISSIONS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_queue_entry(outcome: &'static str) {
    counter!(names::ORDER_QUEUE_ENTRIES_TOTAL, "outcome" => outcome).increment(1);
}
