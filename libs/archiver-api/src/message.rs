use std::borrow::Cow;
use std::fmt;

/// Opaque handle the source needs to settle or abandon a delivered message.
///
/// Adapters choose the meaning (lock token, delivery tag, receipt id);
/// the core only hands it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseToken(pub u64);

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lease-{}", self.0)
    }
}

/// A message delivered by a subscription.
///
/// The body is normalised to bytes at the adapter boundary; whatever
/// representation the broker client hands out (raw bytes, sections,
/// strings) is flattened once when the adapter builds the `Message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    body: Vec<u8>,
    /// Broker-assigned, monotonically increasing per topic.
    pub sequence_offset: u64,
    /// Broker enqueue time in milliseconds (Unix epoch).
    pub enqueued_ms: i64,
    pub lease: LeaseToken,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>, sequence_offset: u64, enqueued_ms: i64, lease: LeaseToken) -> Self {
        Self {
            body: body.into(),
            sequence_offset,
            enqueued_ms,
            lease,
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as text. Invalid UTF-8 sequences are replaced, so a record is
    /// always representable as one archive line.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Messages pulled by one receive call, in pull order.
///
/// Empty batches are valid: they mean nothing is currently available.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    messages: Vec<Message>,
}

impl Batch {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    /// Last message in pull order; its offset and timestamp name the
    /// archive object.
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn leases(&self) -> impl Iterator<Item = LeaseToken> + '_ {
        self.messages.iter().map(|m| m.lease)
    }
}

impl From<Vec<Message>> for Batch {
    fn from(messages: Vec<Message>) -> Self {
        Self::new(messages)
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}
