//! [`BlobSink`](archiver_api::BlobSink) backed by the `object_store` crate.
//!
//! The first segment of an archive key names the container; an
//! [`ObjectStoreFactory`] turns a container name into a store client.

pub mod factory;
mod sink;

pub use factory::{
    AzureConnectionString, AzureFactory, InMemoryFactory, LocalFileSystemFactory, ObjectStoreFactory,
};
pub use sink::ObjectStoreSink;
