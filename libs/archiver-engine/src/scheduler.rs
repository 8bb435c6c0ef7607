use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use archiver_api::{BlobSink, ErrorKind, SourceConnector, TransportError};

use crate::config::{DrainSettings, PathLayout, WorkItem};
use crate::drain::{DrainLoop, DrainOutcome, DrainState};

pub const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_IDLE_BACKOFF: Duration = Duration::from_secs(30);

/// Counters across every run of one scheduler. Only ever increase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveTotals {
    pub messages: u64,
    pub objects: u64,
    pub runs: u64,
    /// Runs that could not open their source or ended in `ErrorHalted`.
    pub failed_runs: u64,
}

impl ArchiveTotals {
    fn record(&mut self, outcome: &DrainOutcome) {
        self.runs += 1;
        self.messages += outcome.messages;
        self.objects += outcome.objects;
        if outcome.state == DrainState::ErrorHalted {
            self.failed_runs += 1;
        }
    }
}

/// What one pass over the worklist did.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Messages archived during the pass.
    pub messages: u64,
    /// Items whose source could not be opened.
    pub open_failures: usize,
    /// Last open failure that retrying cannot fix (a configuration error).
    pub fatal: Option<TransportError>,
    /// Open failures of the `fatal` kind.
    pub fatal_open_failures: usize,
    /// A stop was requested before the pass completed.
    pub cancelled: bool,
}

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Names of the exported counters, `{prefix}file_count` and
/// `{prefix}message_count`. Recording is a no-op until a recorder is
/// installed.
#[derive(Debug, Clone)]
struct ArchiveCounters {
    files: String,
    messages: String,
}

impl ArchiveCounters {
    fn new(prefix: &str) -> Self {
        Self {
            files: format!("{prefix}file_count"),
            messages: format!("{prefix}message_count"),
        }
    }

    fn record(&self, outcome: &DrainOutcome) {
        metrics::counter!(self.files.clone()).increment(outcome.objects);
        metrics::counter!(self.messages.clone()).increment(outcome.messages);
    }
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler
// ═══════════════════════════════════════════════════════════════

/// Round-robin driver over a fixed worklist.
///
/// Each work item is drained to a terminal state before the next one
/// starts; after the last item the sweep starts over. A sweep that archives
/// nothing is followed by a pause that doubles up to a cap and resets on
/// the next productive sweep. Stop requests are honoured between drain
/// cycles and during the pause, never between a write and its accept.
pub struct Scheduler {
    items: Vec<WorkItem>,
    connector: Arc<dyn SourceConnector>,
    sink: Arc<dyn BlobSink>,
    layout: PathLayout,
    settings: DrainSettings,
    idle_backoff: Duration,
    max_idle_backoff: Duration,
    counters: ArchiveCounters,
    totals: ArchiveTotals,
}

impl Scheduler {
    pub fn new(
        items: Vec<WorkItem>,
        connector: Arc<dyn SourceConnector>,
        sink: Arc<dyn BlobSink>,
        layout: PathLayout,
        settings: DrainSettings,
    ) -> Self {
        Self {
            items,
            connector,
            sink,
            layout,
            settings,
            idle_backoff: DEFAULT_IDLE_BACKOFF,
            max_idle_backoff: DEFAULT_MAX_IDLE_BACKOFF,
            counters: ArchiveCounters::new(""),
            totals: ArchiveTotals::default(),
        }
    }

    /// Pause after an unproductive sweep: starts at `initial`, doubles, never
    /// exceeds `max`.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.idle_backoff = initial;
        self.max_idle_backoff = max.max(initial);
        self
    }

    /// Prefix for the `file_count` and `message_count` counters.
    pub fn with_metric_prefix(mut self, prefix: &str) -> Self {
        self.counters = ArchiveCounters::new(prefix);
        self
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn totals(&self) -> ArchiveTotals {
        self.totals
    }

    /// Sweep the worklist until `token` is cancelled.
    ///
    /// Fails only when a whole sweep could not open a single source because
    /// of configuration errors; nothing would ever change on retry.
    pub async fn run(&mut self, token: &CancellationToken) -> Result<ArchiveTotals, TransportError> {
        if self.items.is_empty() {
            tracing::warn!("empty worklist, nothing to drain");
            return Ok(self.totals);
        }

        let mut delay = self.idle_backoff;
        loop {
            let report = self.sweep(token).await;
            if report.cancelled {
                break;
            }
            if report.fatal_open_failures == self.items.len() {
                if let Some(e) = report.fatal {
                    tracing::error!(error = %e, "no work item can be opened, giving up");
                    return Err(e);
                }
            }
            if report.messages > 0 {
                delay = self.idle_backoff;
                continue;
            }

            tracing::debug!(delay_ms = delay.as_millis() as u64, "nothing archived, pausing before next sweep");
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(self.max_idle_backoff);
        }

        tracing::info!(
            messages = self.totals.messages,
            objects = self.totals.objects,
            runs = self.totals.runs,
            "scheduler stopped"
        );
        Ok(self.totals)
    }

    /// One pass over the worklist in order.
    pub async fn sweep(&mut self, token: &CancellationToken) -> SweepReport {
        let mut report = SweepReport::default();
        for i in 0..self.items.len() {
            if token.is_cancelled() {
                report.cancelled = true;
                return report;
            }
            let item = self.items[i].clone();
            match self.run_item(&item, token).await {
                Ok(outcome) => report.messages += outcome.messages,
                Err(e) => {
                    report.open_failures += 1;
                    if e.kind == ErrorKind::Config {
                        report.fatal_open_failures += 1;
                        report.fatal = Some(e);
                    }
                }
            }
        }
        report.cancelled = token.is_cancelled();
        report
    }

    /// Open a source for `item` and drain it to a terminal state.
    pub async fn run_item(
        &mut self,
        item: &WorkItem,
        token: &CancellationToken,
    ) -> Result<DrainOutcome, TransportError> {
        tracing::info!(topic = %item.topic, subscription = %item.subscription, "opening source");
        let source = match self.connector.open(&item.topic, &item.subscription).await {
            Ok(source) => source,
            Err(e) => {
                self.totals.failed_runs += 1;
                tracing::error!(
                    topic = %item.topic,
                    subscription = %item.subscription,
                    error = %e,
                    "failed to open source"
                );
                return Err(e);
            }
        };

        let outcome = DrainLoop::new(
            item.topic.clone(),
            source,
            self.sink.clone(),
            self.layout.clone(),
            self.settings.clone(),
        )
        .run(token)
        .await;

        self.totals.record(&outcome);
        self.counters.record(&outcome);
        tracing::info!(
            topic = %item.topic,
            subscription = %item.subscription,
            "a total of {} messages were loaded to blob storage",
            outcome.messages
        );
        Ok(outcome)
    }
}
