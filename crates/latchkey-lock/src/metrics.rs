// Lock metrics
// Counters for acquire/release/extend outcomes and a gauge of locks held by this process

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Register metric descriptions. Call once at startup, after installing a recorder.
pub fn describe_lock_metrics() {
    describe_counter!(
        "lock_acquire_total",
        "Lock acquire calls by outcome (acquired, busy, timeout)"
    );
    describe_counter!(
        "lock_release_total",
        "Lock release calls by outcome (released, lost)"
    );
    describe_counter!(
        "lock_extend_total",
        "Lock extend calls by outcome (extended, lost)"
    );
    describe_gauge!("lock_held", "Locks currently held by this process");

    tracing::debug!("Lock metrics described");
}

pub(crate) fn record_acquire(outcome: &'static str) {
    counter!("lock_acquire_total", "outcome" => outcome).increment(1);
}

pub(crate) fn record_release(outcome: &'static str) {
    counter!("lock_release_total", "outcome" => outcome).increment(1);
}

pub(crate) fn record_extend(outcome: &'static str) {
    counter!("lock_extend_total", "outcome" => outcome).increment(1);
}

pub(crate) fn held_increment() {
    gauge!("lock_held").increment(1.0);
}

pub(crate) fn held_decrement() {
    gauge!("lock_held").decrement(1.0);
}
