use metrics::{counter, histogram};
use std::time::{Duration, Instant};

use crate::error::BatchKind;

/// Metric names and recording helpers for ingestion runs.
///
/// The crate installs no recorder; without one every call is a no-op.
#[derive(Debug, Clone, Copy)]
pub struct MetricsCollector {
    // Parsing metrics
    pub rows_total: &'static str,
    pub step_duration: &'static str,

    // Persistence metrics
    pub messages_inserted_total: &'static str,
    pub conversations_created_total: &'static str,
    pub batch_duration: &'static str,

    // Transport metrics
    pub chunks_sent_total: &'static str,

    // Error metrics
    pub errors_total: &'static str,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            rows_total: "chat_ingest_rows_total",
            step_duration: "chat_ingest_step_duration_seconds",

            messages_inserted_total: "chat_ingest_messages_inserted_total",
            conversations_created_total: "chat_ingest_conversations_created_total",
            batch_duration: "chat_ingest_batch_duration_seconds",

            chunks_sent_total: "chat_ingest_chunks_sent_total",

            errors_total: "chat_ingest_errors_total",
        }
    }
}

impl MetricsCollector {
    /// Count normalized rows by outcome (`content`, `skipped`, `malformed`)
    pub fn record_rows(&self, format: &'static str, outcome: &'static str, count: usize) {
        counter!(self.rows_total, "format" => format, "outcome" => outcome).increment(count as u64);
    }

    /// Record one store batch
    pub fn record_batch(&self, kind: BatchKind, size: usize, duration: Duration, success: bool) {
        let (label, total) = match kind {
            BatchKind::Conversation => ("conversation", self.conversations_created_total),
            BatchKind::Message => ("message", self.messages_inserted_total),
        };
        let status = if success { "success" } else { "error" };
        histogram!(self.batch_duration, "kind" => label, "status" => status).record(duration.as_secs_f64());

        if success {
            counter!(total).increment(size as u64);
        }
    }

    /// Record the duration of a pipeline step
    pub fn record_step(&self, step: &'static str, duration: Duration) {
        histogram!(self.step_duration, "step" => step).record(duration.as_secs_f64());
    }

    /// Record a sent (or failed) transport chunk
    pub fn record_chunk(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        counter!(self.chunks_sent_total, "status" => status).increment(1);
    }

    /// Record a fatal error by taxonomy category and step
    pub fn record_error(&self, category: &'static str, step: &'static str) {
        counter!(self.errors_total, "type" => category, "step" => step).increment(1);
    }
}

/// Timing wrapper for a store batch
pub struct MetricsTimer {
    collector: MetricsCollector,
    kind: BatchKind,
    size: usize,
    start: Instant,
}

impl MetricsTimer {
    /// Start timing a batch of `size` records
    pub fn new(collector: MetricsCollector, kind: BatchKind, size: usize) -> Self {
        Self {
            collector,
            kind,
            size,
            start: Instant::now(),
        }
    }

    /// Record the batch outcome
    pub fn finish(self, success: bool) {
        self.collector.record_batch(self.kind, self.size, self.start.elapsed(), success);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_names() {
        let collector = MetricsCollector::default();
        assert_eq!(collector.messages_inserted_total, "chat_ingest_messages_inserted_total");
        assert!(collector.errors_total.starts_with("chat_ingest_"));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let collector = MetricsCollector::default();
        collector.record_rows("WRL", "content", 3);
        MetricsTimer::new(collector, BatchKind::Message, 10).finish(true);
        collector.record_error("ValidationError", "detecting");
    }
}
