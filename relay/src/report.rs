//! # Error Reporting
//!
//! Background submissions outlive the request that started them, so their
//! failures cannot ride back on the HTTP response. Instead every terminal
//! error is pushed onto an unbounded queue and a single worker fans each
//! report out to the configured sinks.
//!
//! ```text
//!   dispatcher task ──report()──▶ [ mpsc ] ──▶ ReportQueue::run ──▶ LogSink
//!                                                           ├──▶ WebhookSink
//!                                                           └──▶ (node metrics)
//! ```
//!
//! Reporting is best effort: a closed queue or a failing sink is logged and
//! the report is dropped. Nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::REPORT_DELIVERY_TIMEOUT;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    /// A batch was rejected before anything was submitted.
    Decode,
    /// A background submission ended in an error.
    Submission,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub batch_id: Uuid,
    pub kind: ReportKind,
    pub message: String,
    pub pow_variant: String,
    pub transaction_count: usize,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorReport {
    pub fn new(
        batch_id: Uuid,
        kind: ReportKind,
        message: impl Into<String>,
        pow_variant: &str,
        transaction_count: usize,
    ) -> Self {
        Self {
            batch_id,
            kind,
            message: message.into(),
            pow_variant: pow_variant.to_string(),
            transaction_count,
            occurred_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report delivery failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("sink rejected report with status {status}")]
    Rejected { status: u16 },
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Somewhere reports end up.
#[async_trait]
pub trait ReportSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, report: &ErrorReport) -> Result<(), ReportError>;
}

/// Writes every report to the log at error level.
pub struct LogSink;

#[async_trait]
impl ReportSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, report: &ErrorReport) -> Result<(), ReportError> {
        error!(
            batch_id = %report.batch_id,
            kind = ?report.kind,
            pow = %report.pow_variant,
            transactions = report.transaction_count,
            "{}",
            report.message
        );
        Ok(())
    }
}

/// POSTs each report as JSON to a fixed URL.
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Result<Self, ReportError> {
        let client = Client::builder().timeout(REPORT_DELIVERY_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ReportSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, report: &ErrorReport) -> Result<(), ReportError> {
        let response = self.client.post(&self.url).json(report).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReportError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Cheap, cloneable producer side of the report queue.
#[derive(Clone)]
pub struct ErrorReporter {
    tx: mpsc::UnboundedSender<ErrorReport>,
}

impl ErrorReporter {
    /// Enqueue a report. Never blocks and never fails the caller.
    pub fn report(&self, report: ErrorReport) {
        if let Err(mpsc::error::SendError(dropped)) = self.tx.send(report) {
            warn!(
                batch_id = %dropped.batch_id,
                message = %dropped.message,
                "report queue closed, dropping report"
            );
        }
    }
}

/// Consumer side of the report queue.
pub struct ReportQueue {
    rx: mpsc::UnboundedReceiver<ErrorReport>,
}

impl ReportQueue {
    /// Wait for the next report. `None` once every reporter is gone.
    pub async fn next(&mut self) -> Option<ErrorReport> {
        self.rx.recv().await
    }

    /// A report that is already queued, if any.
    pub fn try_next(&mut self) -> Option<ErrorReport> {
        self.rx.try_recv().ok()
    }

    /// Deliver reports until every [`ErrorReporter`] is dropped.
    pub async fn run(mut self, sinks: Vec<Arc<dyn ReportSink>>) {
        while let Some(report) = self.next().await {
            for sink in &sinks {
                if let Err(e) = sink.deliver(&report).await {
                    warn!(sink = sink.name(), batch_id = %report.batch_id, error = %e, "report sink failed");
                }
            }
        }
        debug!("report queue closed");
    }

    pub fn spawn(self, sinks: Vec<Arc<dyn ReportSink>>) -> JoinHandle<()> {
        tokio::spawn(self.run(sinks))
    }
}

/// Let a spawned queue deliver what is already queued, then stop it.
///
/// Returns `true` when the queue closed on its own within `grace`. Detached
/// submissions may still hold reporters at shutdown, so the worker is aborted
/// once `grace` runs out.
pub async fn drain(mut worker: JoinHandle<()>, grace: Duration) -> bool {
    match tokio::time::timeout(grace, &mut worker).await {
        Ok(_) => true,
        Err(_) => {
            warn!(grace_ms = grace.as_millis() as u64, "report queue still open at shutdown");
            worker.abort();
            false
        }
    }
}

pub fn channel() -> (ErrorReporter, ReportQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ErrorReporter { tx }, ReportQueue { rx })
}
