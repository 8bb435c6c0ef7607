use std::sync::Arc;
use std::time::Duration;

use archiver_api::{Batch, BoxFuture, MessageSource, SourceConnector, TransportError};

use crate::broker::InMemoryBroker;
use crate::renewer::LeaseRenewer;

/// Receiver knobs shared by every source a connector opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    pub max_messages: usize,
    pub wait_time: Duration,
    /// Longest time a held lease is kept alive by renewal. Zero disables
    /// renewal.
    pub max_lock_renewal: Duration,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            max_messages: 500,
            wait_time: Duration::from_secs(5),
            max_lock_renewal: Duration::from_secs(120),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemorySource
// ═══════════════════════════════════════════════════════════════

/// One subscription of an [`InMemoryBroker`] seen as a [`MessageSource`].
pub struct MemorySource {
    broker: Arc<InMemoryBroker>,
    topic: String,
    subscription: String,
    name: String,
    settings: SourceSettings,
    renewer: LeaseRenewer,
    closed: bool,
}

impl MemorySource {
    /// Must be called inside a tokio runtime; the lease renewer is spawned
    /// right away.
    pub fn new(
        broker: Arc<InMemoryBroker>,
        topic: impl Into<String>,
        subscription: impl Into<String>,
        settings: SourceSettings,
    ) -> Self {
        let topic = topic.into();
        let subscription = subscription.into();
        let renewer = LeaseRenewer::spawn(
            broker.clone(),
            topic.clone(),
            subscription.clone(),
            settings.max_lock_renewal,
        );
        Self {
            name: format!("{topic}/{subscription}"),
            broker,
            topic,
            subscription,
            settings,
            renewer,
            closed: false,
        }
    }

    /// Leases currently kept alive by the renewer.
    pub fn renewing(&self) -> usize {
        self.renewer.tracked()
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::logic(format!("source '{}' is closed", self.name)));
        }
        Ok(())
    }

    async fn do_pull(&mut self) -> Result<Batch, TransportError> {
        self.ensure_open()?;
        let messages = self
            .broker
            .receive(
                &self.topic,
                &self.subscription,
                self.settings.max_messages,
                self.settings.wait_time,
            )
            .await?;
        let batch = Batch::new(messages);
        self.renewer.register(&batch);
        Ok(batch)
    }

    fn do_accept(&mut self, batch: &Batch) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.renewer.release(batch);
        let mut settled = 0usize;
        for lease in batch.leases() {
            if self.broker.complete(&self.topic, &self.subscription, lease)? {
                settled += 1;
            }
        }
        if settled < batch.len() {
            tracing::debug!(
                source = %self.name,
                settled,
                requested = batch.len(),
                "some leases were no longer held"
            );
        }
        Ok(())
    }

    fn do_abandon(&mut self, batch: &Batch) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.renewer.release(batch);
        for lease in batch.leases() {
            self.broker.abandon(&self.topic, &self.subscription, lease)?;
        }
        Ok(())
    }

    async fn do_close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.renewer.shutdown().await;
        tracing::debug!(source = %self.name, "source closed");
        Ok(())
    }
}

impl MessageSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn pull(&mut self) -> BoxFuture<'_, Batch> {
        Box::pin(self.do_pull())
    }

    fn accept<'a>(&'a mut self, batch: &'a Batch) -> BoxFuture<'a, ()> {
        Box::pin(async move { self.do_accept(batch) })
    }

    fn abandon<'a>(&'a mut self, batch: &'a Batch) -> BoxFuture<'a, ()> {
        Box::pin(async move { self.do_abandon(batch) })
    }

    fn has_poison_messages(&mut self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            let count = self.broker.dead_letter_count(&self.topic, &self.subscription)?;
            Ok(count > 0)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(self.do_close())
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryConnector
// ═══════════════════════════════════════════════════════════════

/// Opens [`MemorySource`]s on a shared broker. Only subscriptions that
/// already exist can be opened.
pub struct MemoryConnector {
    broker: Arc<InMemoryBroker>,
    settings: SourceSettings,
}

impl MemoryConnector {
    pub fn new(broker: Arc<InMemoryBroker>, settings: SourceSettings) -> Self {
        Self { broker, settings }
    }
}

impl SourceConnector for MemoryConnector {
    fn open<'a>(&'a self, topic: &'a str, subscription: &'a str) -> BoxFuture<'a, Box<dyn MessageSource>> {
        Box::pin(async move {
            if !self.broker.has_subscription(topic, subscription) {
                return Err(TransportError::config(format!(
                    "subscription '{topic}/{subscription}' does not exist"
                )));
            }
            let source = MemorySource::new(self.broker.clone(), topic, subscription, self.settings.clone());
            Ok(Box::new(source) as Box<dyn MessageSource>)
        })
    }
}
