//! # Prometheus Metrics
//!
//! Operational metrics for the relay, scraped at `/metrics` on the metrics
//! port. Everything lives in a dedicated [`prometheus::Registry`] with the
//! `relay` prefix.
//!
//! Background failures arrive through the report queue rather than the
//! request path, so the metrics also act as a [`ReportSink`].

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};

use tangle_relay::dispatch::SubmissionOutcome;
use tangle_relay::report::{ErrorReport, ReportError, ReportKind, ReportSink};

/// Holds all Prometheus metric handles for the relay.
#[derive(Clone)]
pub struct RelayMetrics {
    registry: Registry,
    /// Submit requests received, valid or not.
    pub batches_received_total: IntCounter,
    /// Transactions inside parsed submit requests.
    pub transactions_received_total: IntCounter,
    /// Batches answered with 400 (bad JSON or decode failure).
    pub batches_rejected_total: IntCounter,
    pub submissions_succeeded_total: IntCounter,
    pub submissions_failed_total: IntCounter,
    /// Batches whose deadline passed before the submission finished.
    pub submissions_timed_out_total: IntCounter,
    /// Submission failures delivered through the report queue, late ones included.
    pub background_failures_total: IntCounter,
    /// Time from receiving a parsed batch to acknowledging it, decode included.
    pub ack_latency_seconds: Histogram,
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric creation");
    registry
        .register(Box::new(counter.clone()))
        .expect("metric registration");
    counter
}

impl RelayMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("relay".into()), None)
            .expect("failed to create prometheus registry");

        let ack_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "ack_latency_seconds",
                "Time from parsed batch to acknowledgment in seconds, decode included",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 3.0, 5.0, 10.0]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(ack_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            batches_received_total: counter(
                &registry,
                "batches_received_total",
                "Submit requests received",
            ),
            transactions_received_total: counter(
                &registry,
                "transactions_received_total",
                "Transactions received in parsed submit requests",
            ),
            batches_rejected_total: counter(
                &registry,
                "batches_rejected_total",
                "Batches rejected for malformed JSON or undecodable trytes",
            ),
            submissions_succeeded_total: counter(
                &registry,
                "submissions_succeeded_total",
                "Submissions that completed before the deadline",
            ),
            submissions_failed_total: counter(
                &registry,
                "submissions_failed_total",
                "Submissions that failed before the deadline",
            ),
            submissions_timed_out_total: counter(
                &registry,
                "submissions_timed_out_total",
                "Submissions still running when the deadline passed",
            ),
            background_failures_total: counter(
                &registry,
                "background_failures_total",
                "Submission failures reported by background tasks",
            ),
            ack_latency_seconds,
            registry,
        }
    }

    pub fn record_outcome(&self, outcome: &SubmissionOutcome) {
        match outcome {
            SubmissionOutcome::Success => self.submissions_succeeded_total.inc(),
            SubmissionOutcome::Failure(_) => self.submissions_failed_total.inc(),
            SubmissionOutcome::TimedOut => self.submissions_timed_out_total.inc(),
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<RelayMetrics>;

/// Counts background submission failures as they come off the report queue.
pub struct MetricsSink {
    metrics: SharedMetrics,
}

impl MetricsSink {
    pub fn new(metrics: SharedMetrics) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl ReportSink for MetricsSink {
    fn name(&self) -> &'static str {
        "metrics"
    }

    async fn deliver(&self, report: &ErrorReport) -> Result<(), ReportError> {
        if report.kind == ReportKind::Submission {
            self.metrics.background_failures_total.inc();
        }
        Ok(())
    }
}

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
