use std::fmt;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use archiver_api::{Batch, BlobSink, MessageSource};

use crate::config::{DrainSettings, PathLayout};
use crate::error::DrainError;

// ═══════════════════════════════════════════════════════════════
//  State
// ═══════════════════════════════════════════════════════════════

/// Where a drain run is, or how it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Running,
    /// `max_empty_receives` consecutive empty pulls.
    Finished,
    /// `max_runtime` elapsed. Already accepted batches stay archived.
    BudgetExceeded,
    /// Stop requested. Seen at the top of a cycle, so the batch in flight
    /// is always written and accepted first; the scheduler also checks
    /// between work items.
    Cancelled,
    /// A write, key or non-transient receive failure. The batch stays
    /// unsettled and comes back after its lease expires, or right away with
    /// `abandon_on_failure`.
    ErrorHalted,
}

impl fmt::Display for DrainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrainState::Running => f.write_str("running"),
            DrainState::Finished => f.write_str("finished"),
            DrainState::BudgetExceeded => f.write_str("budget_exceeded"),
            DrainState::Cancelled => f.write_str("cancelled"),
            DrainState::ErrorHalted => f.write_str("error_halted"),
        }
    }
}

/// Bookkeeping for one run over one topic/subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainSession {
    pub finished: bool,
    pub empty_batch_streak: u32,
    pub total_messages: u64,
    pub objects: u64,
    pub accept_failures: u64,
}

impl DrainSession {
    /// Count an empty (or failed) pull. Returns `true` once the streak
    /// reaches `threshold`.
    fn record_empty(&mut self, threshold: u32) -> bool {
        self.empty_batch_streak += 1;
        if self.empty_batch_streak >= threshold {
            self.finished = true;
        }
        self.finished
    }

    fn record_archived(&mut self, messages: usize) {
        self.empty_batch_streak = 0;
        self.total_messages += messages as u64;
        self.objects += 1;
    }
}

/// Result of a finished run.
#[derive(Debug)]
pub struct DrainOutcome {
    pub state: DrainState,
    /// Messages durably written (accepted or not).
    pub messages: u64,
    pub objects: u64,
    pub accept_failures: u64,
    /// Set when `state` is `ErrorHalted`.
    pub error: Option<DrainError>,
}

// ═══════════════════════════════════════════════════════════════
//  DrainLoop
// ═══════════════════════════════════════════════════════════════

/// Drains one subscription: pull → key → write → accept, until the source
/// is exhausted, the runtime budget is spent, or a stop is requested.
///
/// The loop owns its source and closes it exactly once when the run ends.
pub struct DrainLoop {
    topic: String,
    source: Box<dyn MessageSource>,
    sink: Arc<dyn BlobSink>,
    layout: PathLayout,
    settings: DrainSettings,
}

impl DrainLoop {
    pub fn new(
        topic: impl Into<String>,
        source: Box<dyn MessageSource>,
        sink: Arc<dyn BlobSink>,
        layout: PathLayout,
        settings: DrainSettings,
    ) -> Self {
        Self {
            topic: topic.into(),
            source,
            sink,
            layout,
            settings,
        }
    }

    pub async fn run(mut self, token: &CancellationToken) -> DrainOutcome {
        let started = Instant::now();
        let name = self.source.name().to_string();
        let mut session = DrainSession::default();

        tracing::info!(source = %name, "drain started");

        if self.settings.check_dead_letters {
            self.warn_on_dead_letters(&name).await;
        }

        let (state, error) = loop {
            if token.is_cancelled() {
                break (DrainState::Cancelled, None);
            }
            if let Some(budget) = self.settings.max_runtime {
                if started.elapsed() >= budget {
                    tracing::warn!(source = %name, budget_secs = budget.as_secs(), "runtime budget exceeded");
                    break (DrainState::BudgetExceeded, None);
                }
            }

            match self.cycle(&name, &mut session).await {
                Ok(()) => {}
                Err(DrainError::Pull { source_name, source }) if source.is_transient() => {
                    tracing::warn!(source = %source_name, error = %source, "receive failed, retrying next cycle");
                    session.record_empty(self.settings.max_empty_receives);
                }
                Err(e @ DrainError::Accept { .. }) => {
                    session.accept_failures += 1;
                    tracing::error!(
                        source = %name,
                        error = %e,
                        "accept failed after archiving, batch may be delivered again"
                    );
                }
                Err(e) => {
                    tracing::error!(source = %name, error = %e, "drain halted, unsettled messages return after lease expiry");
                    break (DrainState::ErrorHalted, Some(e));
                }
            }

            if session.finished {
                tracing::debug!(source = %name, "no more messages");
                break (DrainState::Finished, None);
            }
        };

        if let Err(e) = self.source.close().await {
            tracing::warn!(source = %name, error = %e, "close failed");
        }

        tracing::info!(
            source = %name,
            state = %state,
            messages = session.total_messages,
            objects = session.objects,
            "drain ended"
        );

        DrainOutcome {
            state,
            messages: session.total_messages,
            objects: session.objects,
            accept_failures: session.accept_failures,
            error,
        }
    }

    /// One pull → write → accept round.
    async fn cycle(&mut self, name: &str, session: &mut DrainSession) -> Result<(), DrainError> {
        let batch = self.source.pull().await.map_err(|source| DrainError::Pull {
            source_name: name.to_string(),
            source,
        })?;
        tracing::debug!(source = %name, messages = batch.len(), "received batch");

        let Some(last) = batch.last() else {
            session.record_empty(self.settings.max_empty_receives);
            return Ok(());
        };

        let key = match self.layout.key(&self.topic, last.sequence_offset, last.enqueued_ms) {
            Ok(key) => key,
            Err(e) => {
                self.release(name, &batch).await;
                return Err(e.into());
            }
        };

        if let Err(source) = self.sink.write(&key, &batch).await {
            self.release(name, &batch).await;
            return Err(DrainError::Write { key, source });
        }
        session.record_archived(batch.len());
        tracing::debug!(source = %name, key = %key, messages = batch.len(), "archived batch");

        self.source
            .accept(&batch)
            .await
            .map_err(|source| DrainError::Accept {
                key: key.clone(),
                count: batch.len(),
                source,
            })?;
        tracing::debug!(source = %name, total = session.total_messages, "batch accepted");
        Ok(())
    }

    async fn release(&mut self, name: &str, batch: &Batch) {
        if !self.settings.abandon_on_failure {
            return;
        }
        if let Err(e) = self.source.abandon(batch).await {
            tracing::warn!(source = %name, error = %e, "abandon failed, waiting for lease expiry");
        }
    }

    async fn warn_on_dead_letters(&mut self, name: &str) {
        match self.source.has_poison_messages().await {
            Ok(true) => tracing::warn!(source = %name, "dead-letter queue is not empty"),
            Ok(false) => {}
            Err(e) => tracing::warn!(source = %name, error = %e, "dead-letter check failed"),
        }
    }
}
