use crate::{Batch, BoxFuture};

/// Subscription receiver, one implementation per transport.
///
/// The implementation keeps the processing lease of every pulled, not yet
/// settled message alive. The caller only has to call [`accept`] promptly
/// after the batch is durably written.
///
/// [`accept`]: MessageSource::accept
pub trait MessageSource: Send {
    /// `topic/subscription`, for log context.
    fn name(&self) -> &str;

    /// Receive up to the configured batch size, waiting at most the
    /// configured wait duration. An empty batch means nothing is available
    /// right now; it is not an end-of-stream marker.
    fn pull(&mut self) -> BoxFuture<'_, Batch>;

    /// Settle every message of the batch. Idempotent per lease: settling an
    /// already settled or unknown lease is a no-op.
    fn accept<'a>(&'a mut self, batch: &'a Batch) -> BoxFuture<'a, ()>;

    /// Give the leases of the batch back so the broker can redeliver without
    /// waiting for lease expiry.
    fn abandon<'a>(&'a mut self, batch: &'a Batch) -> BoxFuture<'a, ()>;

    /// Whether the subscription's dead-letter queue holds messages.
    /// Only a warning signal; sources without the capability report `false`.
    fn has_poison_messages(&mut self) -> BoxFuture<'_, bool> {
        Box::pin(async { Ok(false) })
    }

    /// Release transport resources. Safe to call after partial failures.
    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Opens a [`MessageSource`] for a topic/subscription pair.
///
/// The scheduler opens a fresh source for every drain run and closes it
/// when the run ends.
pub trait SourceConnector: Send + Sync {
    fn open<'a>(&'a self, topic: &'a str, subscription: &'a str) -> BoxFuture<'a, Box<dyn MessageSource>>;
}
