//! Metrics for the lock engine
//!
//! Counter/histogram names plus thin record helpers, kept together so the
//! exported surface is visible in one place. `describe_metrics` should be
//! called once at startup, before any recorder scrapes.

use metrics::{counter, describe_counter, describe_histogram, histogram};

pub const LOCK_ROUNDS_TOTAL: &str = "trinco_lock_rounds_total";
pub const LOCK_ACQUIRED_TOTAL: &str = "trinco_lock_acquired_total";
pub const LOCK_ACQUIRE_DURATION_SECONDS: &str = "trinco_lock_acquire_duration_seconds";
pub const LOCK_TIMEOUTS_TOTAL: &str = "trinco_lock_timeouts_total";
pub const VOTES_SERVED_TOTAL: &str = "trinco_votes_served_total";
pub const YIELD_GRANTS_TOTAL: &str = "trinco_yield_grants_total";
pub const VIEW_CLEANUP_RELEASES_TOTAL: &str = "trinco_view_cleanup_releases_total";
pub const LOCK_RESULTS_TOTAL: &str = "trinco_lock_results_total";

/// Register descriptions and units for every exported metric
pub fn describe_metrics() {
    describe_counter!(
        LOCK_ROUNDS_TOTAL,
        "Total number of acquisition rounds, by service and outcome"
    );
    describe_counter!(
        LOCK_ACQUIRED_TOTAL,
        "Total number of cluster-wide lock acquisitions"
    );
    describe_histogram!(
        LOCK_ACQUIRE_DURATION_SECONDS,
        "Time from acquisition request to grant, in seconds"
    );
    describe_counter!(
        LOCK_TIMEOUTS_TOTAL,
        "Total number of acquisitions that exhausted their deadline"
    );
    describe_counter!(
        VOTES_SERVED_TOTAL,
        "Total number of remote lock votes answered, by flag"
    );
    describe_counter!(
        YIELD_GRANTS_TOTAL,
        "Total number of locks yielded to a requesting peer"
    );
    describe_counter!(
        VIEW_CLEANUP_RELEASES_TOTAL,
        "Total number of lock records released for departed members"
    );
    describe_counter!(
        LOCK_RESULTS_TOTAL,
        "Total number of manager-level lock results, by kind"
    );

    tracing::info!("Metrics initialized");
}

/// Record one acquisition round
pub fn record_round(service: &str, outcome: &'static str) {
    counter!(LOCK_ROUNDS_TOTAL, "service" => service.to_string(), "outcome" => outcome)
        .increment(1);
}

/// Record a completed cluster-wide acquisition
pub fn record_acquired(service: &str, duration_secs: f64) {
    counter!(LOCK_ACQUIRED_TOTAL, "service" => service.to_string()).increment(1);
    histogram!(LOCK_ACQUIRE_DURATION_SECONDS, "service" => service.to_string())
        .record(duration_secs);
}

/// Record an acquisition that ran out its deadline
pub fn record_timeout(service: &str) {
    counter!(LOCK_TIMEOUTS_TOTAL, "service" => service.to_string()).increment(1);
}

/// Record an answered vote
pub fn record_vote_served(service: &str, flag: &'static str) {
    counter!(VOTES_SERVED_TOTAL, "service" => service.to_string(), "flag" => flag).increment(1);
}

/// Record a yield grant to a requesting peer
pub fn record_yield_grant(service: &str) {
    counter!(YIELD_GRANTS_TOTAL, "service" => service.to_string()).increment(1);
}

/// Record lock records released while cleaning up after departed members
pub fn record_view_cleanup_releases(service: &str, released: u64) {
    counter!(VIEW_CLEANUP_RELEASES_TOTAL, "service" => service.to_string()).increment(released);
}

/// Record a manager-level lock result
pub fn record_lock_result(service: &str, kind: &'static str) {
    counter!(LOCK_RESULTS_TOTAL, "service" => service.to_string(), "kind" => kind).increment(1);
}
