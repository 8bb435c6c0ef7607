//! In-process stand-in for a subscription broker.
//!
//! [`InMemoryBroker`] keeps topics with fan-out subscriptions, processing
//! leases with expiry, redelivery and max-delivery dead-lettering.
//! [`MemorySource`] adapts one subscription to [`archiver_api::MessageSource`]
//! and keeps the leases it holds alive.

mod broker;
mod renewer;
mod seed;
mod source;

pub use broker::{BrokerSettings, DEFAULT_LOCK_DURATION, DEFAULT_MAX_DELIVERY_COUNT, InMemoryBroker};
pub use seed::{SeedRecord, load_seed, load_seed_file};
pub use source::{MemoryConnector, MemorySource, SourceSettings};
