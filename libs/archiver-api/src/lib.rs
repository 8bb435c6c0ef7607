//! Capabilities the archiver core consumes: a subscription receiver
//! ([`MessageSource`]) and an object-store writer ([`BlobSink`]).
//!
//! Broker and blob-store clients live behind these traits; the core never
//! sees connections, credentials or lock-renewal mechanics.

pub mod error;
pub mod message;
pub mod sink;
pub mod source;

pub use error::{ErrorKind, TransportError};
pub use message::{Batch, LeaseToken, Message};
pub use sink::{BlobSink, encode_lines, split_key};
pub use source::{MessageSource, SourceConnector};

use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by capability trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;
