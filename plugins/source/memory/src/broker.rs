use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use archiver_api::{LeaseToken, Message, TransportError};

pub const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_DELIVERY_COUNT: u32 = 10;

// ═══════════════════════════════════════════════════════════════
//  Settings
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// How long a delivered message stays invisible to other receivers.
    pub lock_duration: Duration,
    /// Deliveries before a message is moved to the dead-letter queue.
    pub max_delivery_count: u32,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            lock_duration: DEFAULT_LOCK_DURATION,
            max_delivery_count: DEFAULT_MAX_DELIVERY_COUNT,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  State
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct Stored {
    body: Vec<u8>,
    offset: u64,
    enqueued_ms: i64,
    delivery_count: u32,
}

#[derive(Debug)]
struct Leased {
    stored: Stored,
    locked_until: Instant,
}

#[derive(Debug, Default)]
struct Subscription {
    /// Keyed by offset so redelivered messages keep publish order.
    available: BTreeMap<u64, Stored>,
    in_flight: HashMap<LeaseToken, Leased>,
    dead_letters: Vec<Stored>,
}

impl Subscription {
    /// Return expired leases to the available queue.
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<LeaseToken> = self
            .in_flight
            .iter()
            .filter(|(_, l)| l.locked_until <= now)
            .map(|(t, _)| *t)
            .collect();
        for token in expired {
            if let Some(leased) = self.in_flight.remove(&token) {
                tracing::debug!(lease = %token, offset = leased.stored.offset, "lease expired");
                self.available.insert(leased.stored.offset, leased.stored);
            }
        }
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.in_flight.values().map(|l| l.locked_until).min()
    }
}

#[derive(Debug, Default)]
struct Topic {
    next_offset: u64,
    subscriptions: HashMap<String, Subscription>,
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, Topic>,
    next_lease: u64,
}

impl State {
    fn subscription(&mut self, topic: &str, subscription: &str) -> Result<&mut Subscription, TransportError> {
        self.topics
            .get_mut(topic)
            .and_then(|t| t.subscriptions.get_mut(subscription))
            .ok_or_else(|| TransportError::config(format!("unknown subscription '{topic}/{subscription}'")))
    }
}

// ═══════════════════════════════════════════════════════════════
//  InMemoryBroker
// ═══════════════════════════════════════════════════════════════

/// Topics with fan-out subscriptions and lease-based delivery.
///
/// Every subscription gets its own copy of each message published after it
/// was created. A delivered message is hidden behind a lease until it is
/// completed, abandoned, or the lease runs out; the latter two make it
/// available again. A message delivered `max_delivery_count` times is
/// dead-lettered on the next attempt instead of delivered.
pub struct InMemoryBroker {
    state: Mutex<State>,
    published: Notify,
    settings: BrokerSettings,
}

impl InMemoryBroker {
    pub fn new(settings: BrokerSettings) -> Self {
        Self {
            state: Mutex::new(State::default()),
            published: Notify::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("broker lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Create the subscription (and its topic) if missing.
    pub fn create_subscription(&self, topic: &str, subscription: &str) {
        let mut state = self.lock();
        let subs = &mut state.topics.entry(topic.to_string()).or_default().subscriptions;
        if !subs.contains_key(subscription) {
            tracing::debug!(topic = %topic, subscription = %subscription, "subscription created");
            subs.insert(subscription.to_string(), Subscription::default());
        }
    }

    pub fn has_subscription(&self, topic: &str, subscription: &str) -> bool {
        self.lock()
            .topics
            .get(topic)
            .is_some_and(|t| t.subscriptions.contains_key(subscription))
    }

    /// Publish one message and return its offset. Offsets are per topic and
    /// strictly increasing. A topic without subscriptions drops the message.
    pub fn publish(&self, topic: &str, body: impl Into<Vec<u8>>, enqueued_ms: i64) -> u64 {
        let body = body.into();
        let offset = {
            let mut state = self.lock();
            let topic_state = state.topics.entry(topic.to_string()).or_default();
            let offset = topic_state.next_offset;
            topic_state.next_offset += 1;
            for sub in topic_state.subscriptions.values_mut() {
                sub.available.insert(
                    offset,
                    Stored {
                        body: body.clone(),
                        offset,
                        enqueued_ms,
                        delivery_count: 0,
                    },
                );
            }
            offset
        };
        self.published.notify_waiters();
        offset
    }

    /// Publish with the current wall-clock time as the enqueue time.
    pub fn publish_now(&self, topic: &str, body: impl Into<Vec<u8>>) -> u64 {
        self.publish(topic, body, chrono::Utc::now().timestamp_millis())
    }

    /// Lease up to `max` messages in offset order, waiting at most `wait`
    /// for the first one to become available.
    pub async fn receive(
        &self,
        topic: &str,
        subscription: &str,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<Message>, TransportError> {
        let deadline = Instant::now() + wait;
        loop {
            // Registered before inspecting the queue so a concurrent publish
            // cannot slip between the check and the wait.
            let published = self.published.notified();

            let wake_at = {
                let mut state = self.lock();
                let now = Instant::now();
                let taken = self.take_available(&mut state, topic, subscription, max, now)?;
                if !taken.is_empty() || now >= deadline {
                    return Ok(taken);
                }
                let next_expiry = state.subscription(topic, subscription)?.next_expiry();
                next_expiry.map_or(deadline, |e| e.min(deadline))
            };

            let _ = tokio::time::timeout_at(wake_at, published).await;
        }
    }

    fn take_available(
        &self,
        state: &mut State,
        topic: &str,
        subscription: &str,
        max: usize,
        now: Instant,
    ) -> Result<Vec<Message>, TransportError> {
        let mut next_lease = state.next_lease;
        let sub = state.subscription(topic, subscription)?;
        sub.reclaim_expired(now);

        let mut taken = Vec::new();
        while taken.len() < max {
            let Some((_, mut stored)) = sub.available.pop_first() else {
                break;
            };
            if stored.delivery_count >= self.settings.max_delivery_count {
                tracing::warn!(
                    topic = %topic,
                    subscription = %subscription,
                    offset = stored.offset,
                    deliveries = stored.delivery_count,
                    "max delivery count reached, dead-lettering"
                );
                sub.dead_letters.push(stored);
                continue;
            }
            stored.delivery_count += 1;
            next_lease += 1;
            let lease = LeaseToken(next_lease);
            taken.push(Message::new(stored.body.clone(), stored.offset, stored.enqueued_ms, lease));
            sub.in_flight.insert(
                lease,
                Leased {
                    stored,
                    locked_until: now + self.settings.lock_duration,
                },
            );
        }
        state.next_lease = next_lease;
        Ok(taken)
    }

    /// Remove a leased message for good. Returns `false` when the lease is
    /// not held (already settled, expired, or never issued).
    pub fn complete(&self, topic: &str, subscription: &str, lease: LeaseToken) -> Result<bool, TransportError> {
        let mut state = self.lock();
        let sub = state.subscription(topic, subscription)?;
        Ok(sub.in_flight.remove(&lease).is_some())
    }

    /// Release a lease so the message is available again right away.
    pub fn abandon(&self, topic: &str, subscription: &str, lease: LeaseToken) -> Result<bool, TransportError> {
        let released = {
            let mut state = self.lock();
            let sub = state.subscription(topic, subscription)?;
            match sub.in_flight.remove(&lease) {
                Some(leased) => {
                    sub.available.insert(leased.stored.offset, leased.stored);
                    true
                }
                None => false,
            }
        };
        if released {
            self.published.notify_waiters();
        }
        Ok(released)
    }

    /// Push the lock of a held lease one lock duration into the future.
    /// Returns `false` when the lease is no longer held.
    pub fn renew(&self, topic: &str, subscription: &str, lease: LeaseToken) -> Result<bool, TransportError> {
        let mut state = self.lock();
        let sub = state.subscription(topic, subscription)?;
        match sub.in_flight.get_mut(&lease) {
            Some(leased) if leased.locked_until > Instant::now() => {
                leased.locked_until = Instant::now() + self.settings.lock_duration;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn available_count(&self, topic: &str, subscription: &str) -> Result<usize, TransportError> {
        Ok(self.lock().subscription(topic, subscription)?.available.len())
    }

    pub fn in_flight_count(&self, topic: &str, subscription: &str) -> Result<usize, TransportError> {
        Ok(self.lock().subscription(topic, subscription)?.in_flight.len())
    }

    pub fn dead_letter_count(&self, topic: &str, subscription: &str) -> Result<usize, TransportError> {
        Ok(self.lock().subscription(topic, subscription)?.dead_letters.len())
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(BrokerSettings::default())
    }
}
