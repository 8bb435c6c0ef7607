use std::path::{Path, PathBuf};
use std::sync::Arc;

use object_store::azure::MicrosoftAzureBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{Error as ObjectStoreError, ObjectStore};

/// Creates the store client for one container.
pub trait ObjectStoreFactory: Send + Sync {
    fn create_object_store(&self, container: &str) -> Result<Arc<dyn ObjectStore>, ObjectStoreError>;
}

// ---------------------------------------------------------------------------
// Local filesystem
// ---------------------------------------------------------------------------

/// Containers are subdirectories of `root_path`.
pub struct LocalFileSystemFactory {
    root_path: PathBuf,
}

impl LocalFileSystemFactory {
    pub fn new(root_path: impl AsRef<Path>) -> Result<Self, ObjectStoreError> {
        let canonical_path = std::fs::canonicalize(root_path.as_ref()).map_err(|e| ObjectStoreError::Generic {
            store: "LocalFileSystem",
            source: Box::new(e),
        })?;
        Ok(Self {
            root_path: canonical_path,
        })
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }
}

impl ObjectStoreFactory for LocalFileSystemFactory {
    fn create_object_store(&self, container: &str) -> Result<Arc<dyn ObjectStore>, ObjectStoreError> {
        let store_path = self.root_path.join(container);
        std::fs::create_dir_all(&store_path).map_err(|e| ObjectStoreError::Generic {
            store: "LocalFileSystem",
            source: Box::new(e),
        })?;
        Ok(Arc::new(LocalFileSystem::new_with_prefix(store_path)?))
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Hands out the same in-memory store for every container, so the object
/// path inside it excludes the container name.
#[derive(Default)]
pub struct InMemoryFactory {
    store: Arc<InMemory>,
}

impl InMemoryFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> Arc<InMemory> {
        self.store.clone()
    }
}

impl ObjectStoreFactory for InMemoryFactory {
    fn create_object_store(&self, _container: &str) -> Result<Arc<dyn ObjectStore>, ObjectStoreError> {
        Ok(self.store.clone())
    }
}

// ---------------------------------------------------------------------------
// Azure Blob Storage
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConnectionStringError {
    #[error("malformed segment '{0}'")]
    Malformed(String),

    #[error("missing {0}")]
    Missing(&'static str),
}

/// The parts of a storage account connection string the archiver needs:
/// `AccountName=...;AccountKey=...;BlobEndpoint=...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureConnectionString {
    pub account_name: String,
    pub account_key: String,
    /// Overrides the public endpoint (Azurite, sovereign clouds).
    pub blob_endpoint: Option<String>,
}

impl AzureConnectionString {
    pub fn parse(value: &str) -> Result<Self, ConnectionStringError> {
        let mut account_name = None;
        let mut account_key = None;
        let mut blob_endpoint = None;

        for segment in value.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            // Keys may contain '=' padding, so split on the first one only.
            let (key, val) = segment
                .split_once('=')
                .ok_or_else(|| ConnectionStringError::Malformed(segment.to_string()))?;
            match key {
                "AccountName" => account_name = Some(val.to_string()),
                "AccountKey" => account_key = Some(val.to_string()),
                "BlobEndpoint" => blob_endpoint = Some(val.trim_end_matches('/').to_string()),
                _ => {}
            }
        }

        Ok(Self {
            account_name: account_name.ok_or(ConnectionStringError::Missing("AccountName"))?,
            account_key: account_key.ok_or(ConnectionStringError::Missing("AccountKey"))?,
            blob_endpoint,
        })
    }
}

/// One Azure client per container. Without a connection string the
/// builder reads the usual `AZURE_STORAGE_*` environment variables.
pub struct AzureFactory {
    credentials: Option<AzureConnectionString>,
}

impl AzureFactory {
    pub fn new(credentials: Option<AzureConnectionString>) -> Self {
        Self { credentials }
    }
}

impl ObjectStoreFactory for AzureFactory {
    fn create_object_store(&self, container: &str) -> Result<Arc<dyn ObjectStore>, ObjectStoreError> {
        let builder = match &self.credentials {
            Some(creds) => {
                let mut builder = MicrosoftAzureBuilder::new()
                    .with_account(&creds.account_name)
                    .with_access_key(&creds.account_key);
                if let Some(endpoint) = &creds.blob_endpoint {
                    builder = builder
                        .with_endpoint(endpoint.clone())
                        .with_allow_http(endpoint.starts_with("http://"));
                }
                builder
            }
            None => MicrosoftAzureBuilder::from_env(),
        };
        Ok(Arc::new(builder.with_container_name(container).build()?))
    }
}
