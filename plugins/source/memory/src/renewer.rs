use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use archiver_api::{Batch, LeaseToken};

use crate::broker::InMemoryBroker;

type Registry = Arc<Mutex<HashMap<LeaseToken, Instant>>>;

/// Background task that keeps held leases locked.
///
/// Every half lock duration each registered lease is renewed, until it is
/// released or its renewal window (`max_renewal` from registration) runs
/// out. After that the broker lock expires normally.
pub(crate) struct LeaseRenewer {
    leases: Registry,
    max_renewal: Duration,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl LeaseRenewer {
    pub(crate) fn spawn(broker: Arc<InMemoryBroker>, topic: String, subscription: String, max_renewal: Duration) -> Self {
        let leases: Registry = Arc::new(Mutex::new(HashMap::new()));
        let token = CancellationToken::new();

        let handle = if max_renewal.is_zero() {
            None
        } else {
            let interval = (broker.settings().lock_duration / 2).max(Duration::from_millis(1));
            let leases = leases.clone();
            let token = token.clone();
            Some(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {
                            renew_due(&broker, &topic, &subscription, &leases);
                        }
                    }
                }
                tracing::trace!(topic = %topic, subscription = %subscription, "lease renewer stopped");
            }))
        };

        Self {
            leases,
            max_renewal,
            token,
            handle,
        }
    }

    pub(crate) fn register(&self, batch: &Batch) {
        if self.handle.is_none() {
            return;
        }
        let until = Instant::now() + self.max_renewal;
        let mut leases = lock(&self.leases);
        for lease in batch.leases() {
            leases.insert(lease, until);
        }
    }

    pub(crate) fn release(&self, batch: &Batch) {
        let mut leases = lock(&self.leases);
        for lease in batch.leases() {
            leases.remove(&lease);
        }
    }

    pub(crate) fn tracked(&self) -> usize {
        lock(&self.leases).len()
    }

    pub(crate) async fn shutdown(&mut self) {
        self.token.cancel();
        lock(&self.leases).clear();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "lease renewer task failed");
            }
        }
    }
}

impl Drop for LeaseRenewer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn lock(leases: &Registry) -> MutexGuard<'_, HashMap<LeaseToken, Instant>> {
    match leases.lock() {
        Ok(g) => g,
        Err(poisoned) => {
            tracing::warn!("lease registry lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn renew_due(broker: &InMemoryBroker, topic: &str, subscription: &str, leases: &Registry) {
    let now = Instant::now();
    lock(leases).retain(|lease, until| {
        if now >= *until {
            tracing::debug!(lease = %lease, "renewal window elapsed");
            return false;
        }
        match broker.renew(topic, subscription, *lease) {
            Ok(held) => held,
            Err(e) => {
                tracing::warn!(lease = %lease, error = %e, "lease renewal failed");
                false
            }
        }
    });
}
