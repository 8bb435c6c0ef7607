#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use tokio::time::Instant;

use archiver_api::{Batch, BlobSink, BoxFuture, LeaseToken, Message, MessageSource, SourceConnector, TransportError};
use archiver_engine::{DrainSettings, PathLayout};
use archiver_sink_memory::MemorySink;

/// 2024-03-05T13:10:00Z
pub const TS_MS: i64 = 1_709_644_200_000;

pub fn layout() -> PathLayout {
    PathLayout::new("archive", "topics", "year=YYYY/month=MM/day=dd/hour=HH")
}

pub fn settings() -> DrainSettings {
    DrainSettings {
        wait_time: Duration::ZERO,
        ..DrainSettings::default()
    }
}

pub fn messages(offsets: std::ops::Range<u64>) -> Vec<Message> {
    offsets
        .map(|o| Message::new(format!(r#"{{"message_number":{o}}}"#), o, TS_MS, LeaseToken(o + 1)))
        .collect()
}

// ---------------------------------------------------------------------------
// Scripted source
// ---------------------------------------------------------------------------

/// Call counters shared between a [`ScriptedSource`] and the test.
#[derive(Default)]
pub struct Probe {
    pub pulls: AtomicUsize,
    pub accepts: AtomicUsize,
    pub abandons: AtomicUsize,
    pub closes: AtomicUsize,
    pub poison_checks: AtomicUsize,
}

impl Probe {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub enum Step {
    Deliver(Vec<Message>),
    /// Transient receive error.
    Fail,
    FailWith(TransportError),
}

/// Plays back a fixed sequence of pull results, then returns empty batches.
pub struct ScriptedSource {
    steps: VecDeque<Step>,
    pull_delay: Duration,
    failing_accepts: usize,
    poison: bool,
    probe: Arc<Probe>,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Step>) -> (Self, Arc<Probe>) {
        let probe = Arc::new(Probe::default());
        let source = Self {
            steps: steps.into(),
            pull_delay: Duration::ZERO,
            failing_accepts: 0,
            poison: false,
            probe: probe.clone(),
        };
        (source, probe)
    }

    pub fn with_pull_delay(mut self, delay: Duration) -> Self {
        self.pull_delay = delay;
        self
    }

    pub fn with_failing_accepts(mut self, n: usize) -> Self {
        self.failing_accepts = n;
        self
    }

    pub fn with_poison(mut self) -> Self {
        self.poison = true;
        self
    }
}

impl MessageSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted/test"
    }

    fn pull(&mut self) -> BoxFuture<'_, Batch> {
        Box::pin(async move {
            self.probe.pulls.fetch_add(1, Ordering::SeqCst);
            if !self.pull_delay.is_zero() {
                tokio::time::sleep(self.pull_delay).await;
            }
            match self.steps.pop_front() {
                Some(Step::Deliver(messages)) => Ok(Batch::new(messages)),
                Some(Step::Fail) => Err(TransportError::transient("connection reset")),
                Some(Step::FailWith(e)) => Err(e),
                None => Ok(Batch::empty()),
            }
        })
    }

    fn accept<'a>(&'a mut self, _batch: &'a Batch) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.probe.accepts.fetch_add(1, Ordering::SeqCst);
            if self.failing_accepts > 0 {
                self.failing_accepts -= 1;
                return Err(TransportError::transient("lock lost"));
            }
            Ok(())
        })
    }

    fn abandon<'a>(&'a mut self, _batch: &'a Batch) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.probe.abandons.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn has_poison_messages(&mut self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.probe.poison_checks.fetch_add(1, Ordering::SeqCst);
            Ok(self.poison)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.probe.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Recording connector
// ---------------------------------------------------------------------------

/// Wraps a connector, records every open, and optionally cancels a token
/// once a given number of opens has happened.
pub struct RecordingConnector<C> {
    inner: C,
    opened: Mutex<Vec<String>>,
    cancel_at: Option<(usize, CancellationToken)>,
}

impl<C: SourceConnector> RecordingConnector<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            opened: Mutex::new(Vec::new()),
            cancel_at: None,
        }
    }

    pub fn cancel_after(mut self, opens: usize, token: CancellationToken) -> Self {
        self.cancel_at = Some((opens, token));
        self
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl<C: SourceConnector> SourceConnector for RecordingConnector<C> {
    fn open<'a>(&'a self, topic: &'a str, subscription: &'a str) -> BoxFuture<'a, Box<dyn MessageSource>> {
        let count = {
            let mut opened = self.opened.lock().unwrap();
            opened.push(format!("{topic}/{subscription}"));
            opened.len()
        };
        if let Some((at, token)) = &self.cancel_at {
            if count >= *at {
                token.cancel();
            }
        }
        self.inner.open(topic, subscription)
    }
}

// ---------------------------------------------------------------------------
// Outage sink
// ---------------------------------------------------------------------------

/// A [`MemorySink`] that rejects every write until `until`, counted on the
/// tokio clock so paused-time tests can fast-forward through the outage.
pub struct OutageSink {
    inner: Arc<MemorySink>,
    until: Instant,
    rejected: AtomicUsize,
}

impl OutageSink {
    pub fn new(inner: Arc<MemorySink>, outage: Duration) -> Self {
        Self {
            inner,
            until: Instant::now() + outage,
            rejected: AtomicUsize::new(0),
        }
    }

    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }
}

impl BlobSink for OutageSink {
    fn write<'a>(&'a self, key: &'a str, batch: &'a Batch) -> BoxFuture<'a, ()> {
        if Instant::now() < self.until {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Box::pin(async { Err(TransportError::io("storage account unreachable")) });
        }
        self.inner.write(key, batch)
    }
}
