//! Metric descriptions for the inventory engine.
//!
//! Counters are emitted through the `metrics` facade; whichever recorder
//! the host installs receives them.

use metrics::describe_counter;

pub const ASSETS_LISTED_TOTAL: &str = "pw_inventory_assets_listed_total";
pub const STREAM_ERRORS_TOTAL: &str = "pw_inventory_stream_errors_total";
pub const RETRIES_TOTAL: &str = "pw_inventory_retries_total";
pub const RATE_LIMITER_WAITS_TOTAL: &str = "pw_inventory_rate_limiter_waits_total";
pub const MEMO_HITS_TOTAL: &str = "pw_inventory_memo_hits_total";
pub const MEMO_MISSES_TOTAL: &str = "pw_inventory_memo_misses_total";
pub const LOOKUP_FAILURES_TOTAL: &str = "pw_inventory_lookup_failures_total";

/// Every counter the inventory engine emits.
pub const INVENTORY_COUNTERS: [&str; 7] = [
    ASSETS_LISTED_TOTAL,
    STREAM_ERRORS_TOTAL,
    RETRIES_TOTAL,
    RATE_LIMITER_WAITS_TOTAL,
    MEMO_HITS_TOTAL,
    MEMO_MISSES_TOTAL,
    LOOKUP_FAILURES_TOTAL,
];

/// Registers metric descriptions.
pub fn register_inventory_metrics() {
    describe_counter!(
        ASSETS_LISTED_TOTAL,
        "Total number of assets listed, by content type"
    );
    describe_counter!(
        STREAM_ERRORS_TOTAL,
        "Total number of failed asset listings, by content type and error kind"
    );
    describe_counter!(
        RETRIES_TOTAL,
        "Total number of retried API calls, by method"
    );
    describe_counter!(
        RATE_LIMITER_WAITS_TOTAL,
        "Total number of API calls that passed the rate limiter, by method"
    );
    describe_counter!(
        MEMO_HITS_TOTAL,
        "Total number of memo cache hits, by cache"
    );
    describe_counter!(
        MEMO_MISSES_TOTAL,
        "Total number of memo cache misses, by cache"
    );
    describe_counter!(
        LOOKUP_FAILURES_TOTAL,
        "Total number of failed display name lookups, by lookup"
    );
}
