use crate::{Batch, BoxFuture};

/// Object-store writer.
///
/// `write` stores the batch as one object at `key`: each message body as one
/// `\n`-terminated line, in pull order. The object becomes visible only once
/// every line is written; on error nothing is left behind. An empty batch
/// creates no object.
///
/// `key` is `{container}/{path...}`; the first segment selects the
/// container, the remainder is the object path inside it.
pub trait BlobSink: Send + Sync {
    fn write<'a>(&'a self, key: &'a str, batch: &'a Batch) -> BoxFuture<'a, ()>;
}

/// Render a batch as the archive body: one line per message, no header,
/// no footer.
pub fn encode_lines(batch: &Batch) -> Vec<u8> {
    let size = batch.iter().fold(0, |acc, m| acc + m.body().len() + 1);
    let mut buf = Vec::with_capacity(size);
    for message in batch {
        buf.extend_from_slice(message.text().as_bytes());
        buf.push(b'\n');
    }
    buf
}

/// Split `{container}/{rest}` into its two parts.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    let (container, path) = key.split_once('/')?;
    if container.is_empty() || path.is_empty() {
        return None;
    }
    Some((container, path))
}
