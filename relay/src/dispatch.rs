//! # Broadcast Dispatcher
//!
//! Turns a raw batch into a bounded-latency acknowledgment.
//!
//! ```text
//!   Idle ─▶ Decoding ─┬─▶ (decode error) ─────────────────────▶ Reported
//!                     └─▶ spawn task ─▶ AwaitingCompletion ─┬─▶ Responded
//!                                                           └─▶ Reported
//! ```
//!
//! Decoding is synchronous and all-or-nothing. A fully decoded batch is handed
//! to exactly one spawned task that seals and submits it; the caller races that
//! task's completion signal against the configured deadline and returns
//! whichever comes first. The task is never cancelled. Whenever it ends in an
//! error it reports that error itself, so a failure is reported exactly once
//! regardless of whether anyone is still waiting for it.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::ledger::{LedgerClient, LedgerError, Transaction, TransactionError};
use crate::pow::{self, PowVariant};
use crate::report::{ErrorReport, ErrorReporter, ReportKind};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Per-dispatcher settings, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub min_depth: u64,
    pub min_weight_magnitude: usize,
    pub deadline: Duration,
}

impl From<&RelayConfig> for DispatcherConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            min_depth: config.min_depth,
            min_weight_magnitude: config.min_weight_magnitude,
            deadline: config.deadline,
        }
    }
}

/// One element of a batch failed to decode. Nothing was submitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transaction {index}: {source}")]
pub struct DecodeError {
    pub index: usize,
    #[source]
    pub source: TransactionError,
}

/// Terminal failure of a background submission.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("submission task panicked: {0}")]
    Panicked(String),
}

/// What the caller learns before the deadline.
#[derive(Debug, Clone)]
pub enum SubmissionOutcome {
    Success,
    Failure(Arc<SubmissionError>),
    /// The deadline passed first. The task is still running.
    TimedOut,
}

impl SubmissionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure(_) => "failure",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Where a batch is in its life. Only used for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Idle,
    Decoding,
    AwaitingCompletion,
    Responded,
    Reported,
}

fn trace_phase(batch_id: Uuid, phase: BatchPhase) {
    debug!(batch_id = %batch_id, phase = ?phase, "batch phase");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct Dispatcher {
    client: Arc<dyn LedgerClient>,
    reporter: ErrorReporter,
    variant: PowVariant,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// A dispatcher sealing with the host's best PoW variant.
    pub fn new(client: Arc<dyn LedgerClient>, reporter: ErrorReporter, config: DispatcherConfig) -> Self {
        Self::with_variant(client, reporter, config, pow::best_variant())
    }

    pub fn with_variant(
        client: Arc<dyn LedgerClient>,
        reporter: ErrorReporter,
        config: DispatcherConfig,
        variant: PowVariant,
    ) -> Self {
        Self {
            client,
            reporter,
            variant,
            config,
        }
    }

    pub fn pow_variant(&self) -> PowVariant {
        self.variant
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Decode every element, in order, stopping at the first failure.
    pub fn decode(&self, batch: &[String]) -> Result<Vec<Transaction>, DecodeError> {
        batch
            .iter()
            .enumerate()
            .map(|(index, raw)| {
                self.client
                    .decode(raw)
                    .map_err(|source| DecodeError { index, source })
            })
            .collect()
    }

    /// Decode `batch`, start its background submission and wait at most the
    /// configured deadline for it.
    ///
    /// Returns `Err` only for decode failures, in which case nothing was
    /// submitted. Every other path yields an outcome; a `TimedOut` batch keeps
    /// going in the background.
    pub async fn submit(&self, batch: Vec<String>) -> Result<SubmissionOutcome, DecodeError> {
        let batch_id = Uuid::new_v4();
        let started = Instant::now();
        trace_phase(batch_id, BatchPhase::Idle);

        trace_phase(batch_id, BatchPhase::Decoding);
        let transactions = match self.decode(&batch) {
            Ok(transactions) => transactions,
            Err(e) => {
                warn!(batch_id = %batch_id, index = e.index, error = %e.source, "batch rejected");
                self.reporter.report(ErrorReport::new(
                    batch_id,
                    ReportKind::Decode,
                    e.to_string(),
                    self.variant.name(),
                    batch.len(),
                ));
                trace_phase(batch_id, BatchPhase::Reported);
                return Err(e);
            }
        };

        let done = self.spawn_submission(batch_id, transactions);

        trace_phase(batch_id, BatchPhase::AwaitingCompletion);
        let outcome = match tokio::time::timeout(self.config.deadline, done).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => SubmissionOutcome::Failure(Arc::new(SubmissionError::Panicked(
                "submission task ended without an outcome".to_string(),
            ))),
            Err(_) => SubmissionOutcome::TimedOut,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            SubmissionOutcome::Success => {
                info!(batch_id = %batch_id, pow = self.variant.name(), elapsed_ms, "batch submitted")
            }
            SubmissionOutcome::Failure(e) => {
                warn!(batch_id = %batch_id, pow = self.variant.name(), elapsed_ms, error = %e, "batch failed")
            }
            SubmissionOutcome::TimedOut => warn!(
                batch_id = %batch_id,
                pow = self.variant.name(),
                deadline_ms = self.config.deadline.as_millis() as u64,
                "deadline passed, submission continues in background"
            ),
        }
        trace_phase(batch_id, BatchPhase::Responded);

        Ok(outcome)
    }

    /// Spawn the one task that owns this batch from here on.
    fn spawn_submission(
        &self,
        batch_id: Uuid,
        transactions: Vec<Transaction>,
    ) -> oneshot::Receiver<SubmissionOutcome> {
        let (done_tx, done_rx) = oneshot::channel();
        let client = Arc::clone(&self.client);
        let reporter = self.reporter.clone();
        let variant = self.variant;
        let DispatcherConfig {
            min_depth,
            min_weight_magnitude,
            ..
        } = self.config;
        let count = transactions.len();

        tokio::spawn(async move {
            let submission = client.submit(transactions, min_depth, min_weight_magnitude, variant.seal_fn());
            let result = match AssertUnwindSafe(submission).catch_unwind().await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(SubmissionError::Ledger(e)),
                Err(payload) => Err(SubmissionError::Panicked(panic_message(payload.as_ref()))),
            };

            let outcome = match result {
                Ok(()) => SubmissionOutcome::Success,
                Err(e) => {
                    reporter.report(ErrorReport::new(
                        batch_id,
                        ReportKind::Submission,
                        e.to_string(),
                        variant.name(),
                        count,
                    ));
                    trace_phase(batch_id, BatchPhase::Reported);
                    SubmissionOutcome::Failure(Arc::new(e))
                }
            };

            // The receiver is gone once the deadline has passed.
            if done_tx.send(outcome).is_err() {
                debug!(batch_id = %batch_id, "late submission finished unobserved");
            }
        });

        done_rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pow::SealFn;
    use crate::report::{self, ReportQueue};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        Fail,
        Panic,
        Slow { delay: Duration, fail: bool },
    }

    struct StubLedger {
        behavior: Behavior,
        calls: AtomicUsize,
        seen: Mutex<Vec<(Vec<i64>, u64, usize)>>,
    }

    impl StubLedger {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LedgerClient for StubLedger {
        async fn submit(
            &self,
            transactions: Vec<Transaction>,
            min_depth: u64,
            min_weight_magnitude: usize,
            _seal: SealFn,
        ) -> Result<(), LedgerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let order = transactions.iter().map(|t| t.current_index).collect();
            self.seen.lock().push((order, min_depth, min_weight_magnitude));

            let failure = || LedgerError::Node {
                status: 500,
                message: "node melted".into(),
            };
            match self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::Fail => Err(failure()),
                Behavior::Panic => panic!("ledger exploded"),
                Behavior::Slow { delay, fail } => {
                    tokio::time::sleep(delay).await;
                    if fail {
                        Err(failure())
                    } else {
                        Ok(())
                    }
                }
            }
        }
    }

    fn raw(index: i64, last: i64) -> String {
        Transaction {
            current_index: index,
            last_index: last,
            ..Transaction::default()
        }
        .to_trytes()
        .to_string()
    }

    fn dispatcher(stub: &Arc<StubLedger>, deadline: Duration) -> (Dispatcher, ReportQueue) {
        let (reporter, queue) = report::channel();
        let client: Arc<dyn LedgerClient> = stub.clone();
        let config = DispatcherConfig {
            min_depth: 3,
            min_weight_magnitude: 9,
            deadline,
        };
        (Dispatcher::new(client, reporter, config), queue)
    }

    #[tokio::test]
    async fn decodes_in_order_and_submits_once() {
        let stub = StubLedger::new(Behavior::Succeed);
        let (dispatcher, mut queue) = dispatcher(&stub, Duration::from_secs(2));

        let outcome = dispatcher.submit(vec![raw(0, 2), raw(1, 2), raw(2, 2)]).await.unwrap();

        assert!(matches!(outcome, SubmissionOutcome::Success));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        assert_eq!(stub.seen.lock()[0], (vec![0, 1, 2], 3, 9));
        assert!(queue.try_next().is_none());
    }

    #[tokio::test]
    async fn decode_failure_rejects_whole_batch() {
        let stub = StubLedger::new(Behavior::Succeed);
        let (dispatcher, mut queue) = dispatcher(&stub, Duration::from_secs(2));

        let err = dispatcher
            .submit(vec![raw(0, 2), "NOT-TRYTES".into(), raw(2, 2)])
            .await
            .unwrap_err();

        assert_eq!(err.index, 1);
        assert!(matches!(err.source, TransactionError::InvalidLength { .. }));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 0);

        let report = queue.try_next().unwrap();
        assert_eq!(report.kind, ReportKind::Decode);
        assert_eq!(report.transaction_count, 3);
        assert!(queue.try_next().is_none());
    }

    #[tokio::test]
    async fn failure_before_deadline_is_returned_and_reported_once() {
        let stub = StubLedger::new(Behavior::Fail);
        let (dispatcher, mut queue) = dispatcher(&stub, Duration::from_secs(2));

        let outcome = dispatcher.submit(vec![raw(0, 0)]).await.unwrap();
        match outcome {
            SubmissionOutcome::Failure(e) => assert!(e.to_string().contains("node melted")),
            other => panic!("expected failure, got {other:?}"),
        }

        let report = queue.next().await.unwrap();
        assert_eq!(report.kind, ReportKind::Submission);
        assert_eq!(report.pow_variant, dispatcher.pow_variant().name());
        assert!(queue.try_next().is_none());
    }

    #[tokio::test]
    async fn slow_submission_returns_at_deadline_and_reports_later() {
        let stub = StubLedger::new(Behavior::Slow {
            delay: Duration::from_millis(500),
            fail: true,
        });
        let (dispatcher, mut queue) = dispatcher(&stub, Duration::from_millis(50));

        let started = Instant::now();
        let outcome = dispatcher.submit(vec![raw(0, 0)]).await.unwrap();
        assert!(matches!(outcome, SubmissionOutcome::TimedOut));
        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(queue.try_next().is_none());

        let late = tokio::time::timeout(Duration::from_secs(3), queue.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(late.kind, ReportKind::Submission);
        assert!(queue.try_next().is_none());
    }

    #[tokio::test]
    async fn slow_success_after_deadline_is_not_reported() {
        let stub = StubLedger::new(Behavior::Slow {
            delay: Duration::from_millis(150),
            fail: false,
        });
        let (dispatcher, mut queue) = dispatcher(&stub, Duration::from_millis(20));

        let outcome = dispatcher.submit(vec![raw(0, 0)]).await.unwrap();
        assert!(matches!(outcome, SubmissionOutcome::TimedOut));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
        assert!(queue.try_next().is_none());
    }

    #[tokio::test]
    async fn panicking_ledger_becomes_reported_failure() {
        let stub = StubLedger::new(Behavior::Panic);
        let (dispatcher, mut queue) = dispatcher(&stub, Duration::from_secs(2));

        let outcome = dispatcher.submit(vec![raw(0, 0)]).await.unwrap();
        match outcome {
            SubmissionOutcome::Failure(e) => {
                assert!(matches!(&*e, SubmissionError::Panicked(msg) if msg.contains("ledger exploded")))
            }
            other => panic!("expected failure, got {other:?}"),
        }

        let report = queue.next().await.unwrap();
        assert!(report.message.contains("ledger exploded"));
    }

    #[tokio::test]
    async fn empty_batch_still_goes_through_the_client() {
        let stub = StubLedger::new(Behavior::Succeed);
        let (dispatcher, _queue) = dispatcher(&stub, Duration::from_secs(2));

        let outcome = dispatcher.submit(Vec::new()).await.unwrap();
        assert_eq!(outcome.label(), "success");
        assert_eq!(stub.seen.lock()[0].0, Vec::<i64>::new());
    }

    #[test]
    fn config_is_taken_from_relay_config() {
        let relay = RelayConfig {
            provider: "http://node".into(),
            min_depth: 4,
            min_weight_magnitude: 14,
            deadline: Duration::from_millis(750),
            error_sink_url: None,
        };
        assert_eq!(
            DispatcherConfig::from(&relay),
            DispatcherConfig {
                min_depth: 4,
                min_weight_magnitude: 14,
                deadline: Duration::from_millis(750),
            }
        );
    }
}
