use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use archiver_api::{Batch, BlobSink, BoxFuture, TransportError, encode_lines};

// ═══════════════════════════════════════════════════════════════
//  MemorySink
// ═══════════════════════════════════════════════════════════════

/// In-memory blob sink. Objects are kept by full key; nothing is persisted.
///
/// Useful for local runs and for exercising failure handling: `fail_next`
/// makes the next N writes fail without creating objects.
#[derive(Default)]
pub struct MemorySink {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    failures: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` writes with an I/O error.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Keys in lexical order.
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().get(key).cloned()
    }

    /// Body lines of the object at `key`.
    pub fn lines(&self, key: &str) -> Option<Vec<String>> {
        let body = self.get(key)?;
        Some(String::from_utf8_lossy(&body).lines().map(str::to_string).collect())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        match self.objects.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("memory sink lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn do_write(&self, key: &str, batch: &Batch) -> Result<(), TransportError> {
        if batch.is_empty() {
            return Ok(());
        }
        if self.take_failure() {
            return Err(TransportError::io(format!("injected write failure for '{key}'")));
        }
        let mut objects = self.lock();
        if objects.contains_key(key) {
            return Err(TransportError::logic(format!("object '{key}' already exists")));
        }
        objects.insert(key.to_string(), encode_lines(batch));
        Ok(())
    }
}

impl BlobSink for MemorySink {
    fn write<'a>(&'a self, key: &'a str, batch: &'a Batch) -> BoxFuture<'a, ()> {
        Box::pin(async move { self.do_write(key, batch) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archiver_api::{LeaseToken, Message};

    fn batch(bodies: &[&str]) -> Batch {
        bodies
            .iter()
            .enumerate()
            .map(|(i, b)| Message::new(*b, i as u64, 0, LeaseToken(i as u64)))
            .collect::<Vec<_>>()
            .into()
    }

    #[tokio::test]
    async fn empty_batch_creates_nothing() {
        let sink = MemorySink::new();
        sink.write("c/k", &Batch::empty()).await.unwrap();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn injected_failure_leaves_no_object() {
        let sink = MemorySink::new();
        sink.fail_next(1);
        assert!(sink.write("c/a", &batch(&["x"])).await.is_err());
        assert!(sink.is_empty());

        sink.write("c/a", &batch(&["x", "y"])).await.unwrap();
        assert_eq!(sink.lines("c/a").unwrap(), vec!["x", "y"]);
    }

    #[tokio::test]
    async fn existing_key_is_not_overwritten() {
        let sink = MemorySink::new();
        sink.write("c/a", &batch(&["first"])).await.unwrap();
        let err = sink.write("c/a", &batch(&["second"])).await.unwrap_err();
        assert_eq!(err.kind, archiver_api::ErrorKind::Logic);
        assert_eq!(sink.lines("c/a").unwrap(), vec!["first"]);
    }
}
