//! Metrics definitions for the indexer.
//!
//! This module defines all metrics used throughout the indexer.
//! Metrics are collected using the `metrics` crate and can be exported
//! to Prometheus via `metrics-exporter-prometheus`.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Instant;

/// Initialize all metric descriptions.
/// Call this once at startup before any metrics are recorded.
pub fn init_metrics() {
    describe_counter!(
        "poll_cycles_total",
        "Total number of poll cycles by outcome (empty, processed, failed)"
    );
    describe_counter!(
        "transactions_processed_total",
        "Total number of transactions projected into the store"
    );
    describe_counter!(
        "transactions_skipped_total",
        "Total number of transactions skipped, by reason"
    );
    describe_counter!(
        "decode_errors_total",
        "Total number of escrow accounts that failed to decode"
    );
    describe_histogram!(
        "batch_processing_duration_seconds",
        "Time taken to process one batch of signatures in seconds"
    );
    describe_gauge!("cursor_slot", "Slot of the last committed cursor");
}

/// Record the outcome of one poll cycle.
pub fn record_poll_cycle(outcome: &'static str) {
    counter!("poll_cycles_total", "outcome" => outcome).increment(1);
}

/// Record a transaction projected into the store.
pub fn record_transaction_processed(kind: &'static str) {
    counter!("transactions_processed_total", "kind" => kind).increment(1);
}

/// Record a skipped transaction.
///
/// # Arguments
/// * `reason` - Why it was skipped ("unclassified", "no_account", "decode", ...)
pub fn record_transaction_skipped(reason: &'static str) {
    counter!("transactions_skipped_total", "reason" => reason).increment(1);
}

/// Record a decode error.
pub fn record_decode_error() {
    counter!("decode_errors_total").increment(1);
}

/// Record the committed cursor slot.
pub fn record_cursor_slot(slot: u64) {
    gauge!("cursor_slot").set(slot as f64);
}

/// Record batch processing duration.
pub fn record_batch_processing_duration(duration_secs: f64) {
    histogram!("batch_processing_duration_seconds").record(duration_secs);
}

/// A timer that automatically records duration when dropped.
pub struct ProcessingTimer {
    start: Instant,
}

impl ProcessingTimer {
    /// Start a new processing timer.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for ProcessingTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessingTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_batch_processing_duration(duration);
    }
}
