use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutOptions, PutPayload};

use archiver_api::{Batch, BlobSink, BoxFuture, TransportError, encode_lines, split_key};

use crate::factory::ObjectStoreFactory;

/// Writes each batch as a single object created with `PutMode::Create`:
/// the upload is all-or-nothing and never replaces an existing object.
///
/// Object paths cannot contain empty segments. A key with one (`a//b`) is
/// rejected rather than stored under a different name.
pub struct ObjectStoreSink {
    factory: Arc<dyn ObjectStoreFactory>,
    stores: Mutex<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl ObjectStoreSink {
    pub fn new(factory: Arc<dyn ObjectStoreFactory>) -> Self {
        Self {
            factory,
            stores: Mutex::new(HashMap::new()),
        }
    }

    fn store_for(&self, container: &str) -> Result<Arc<dyn ObjectStore>, TransportError> {
        let mut stores = match self.stores.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("object store cache lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        if let Some(store) = stores.get(container) {
            return Ok(store.clone());
        }
        let store = self
            .factory
            .create_object_store(container)
            .map_err(|e| TransportError::config(format!("object store for container '{container}': {e}")))?;
        stores.insert(container.to_string(), store.clone());
        Ok(store)
    }

    async fn do_write(&self, key: &str, batch: &Batch) -> Result<(), TransportError> {
        if batch.is_empty() {
            return Ok(());
        }
        let (container, object_path) =
            split_key(key).ok_or_else(|| TransportError::logic(format!("key '{key}' has no container segment")))?;
        let location = Path::from(object_path);
        if location.parts().count() != object_path.split('/').count() {
            return Err(TransportError::logic(format!("key '{key}' has an empty path segment")));
        }
        let store = self.store_for(container)?;

        tracing::debug!(container = %container, path = %location, messages = batch.len(), "uploading object");
        store
            .put_opts(
                &location,
                PutPayload::from_bytes(Bytes::from(encode_lines(batch))),
                PutOptions {
                    mode: PutMode::Create,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| match e {
                object_store::Error::AlreadyExists { .. } => {
                    TransportError::logic(format!("object '{key}' already exists"))
                }
                other => TransportError::io(format!("upload '{key}': {other}")),
            })?;
        Ok(())
    }
}

impl BlobSink for ObjectStoreSink {
    fn write<'a>(&'a self, key: &'a str, batch: &'a Batch) -> BoxFuture<'a, ()> {
        Box::pin(self.do_write(key, batch))
    }
}
