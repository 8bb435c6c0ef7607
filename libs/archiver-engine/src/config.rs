use std::fmt;
use std::time::Duration;

use crate::error::PathError;
use crate::path::compute_key;

pub const DEFAULT_TOPICS_DIR: &str = "topics";
pub const DEFAULT_MAX_MESSAGES_IN_BATCH: usize = 500;
pub const DEFAULT_MAX_EMPTY_RECEIVES: u32 = 3;
pub const DEFAULT_WAIT_TIME_SECONDS: u64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid {key}: {detail}")]
    Invalid { key: &'static str, detail: String },
}

// ---------------------------------------------------------------------------
// Destination layout
// ---------------------------------------------------------------------------

/// Where archive objects land: container, top-level directory and the
/// date template appended after the topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathLayout {
    pub container: String,
    pub directory: String,
    pub template: String,
}

impl PathLayout {
    pub fn new(container: impl Into<String>, directory: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            directory: directory.into(),
            template: template.into(),
        }
    }

    pub fn key(&self, topic: &str, offset: u64, timestamp_ms: i64) -> Result<String, PathError> {
        compute_key(&self.container, &self.directory, topic, &self.template, offset, timestamp_ms)
    }
}

// ---------------------------------------------------------------------------
// Drain settings
// ---------------------------------------------------------------------------

/// Per-run knobs for a drain loop. Batch size and wait time are handed to
/// the source connector; the loop itself uses the threshold and budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainSettings {
    pub max_messages_in_batch: usize,
    /// Consecutive empty pulls after which the subscription counts as drained.
    pub max_empty_receives: u32,
    /// `None` = unbounded.
    pub max_runtime: Option<Duration>,
    pub wait_time: Duration,
    pub check_dead_letters: bool,
    /// Release a batch right away when its key or write fails. Off by
    /// default: every release costs a delivery attempt, so a long sink
    /// outage would push the backlog into the dead-letter queue. Without it
    /// the batch comes back once its lease expires.
    pub abandon_on_failure: bool,
}

impl Default for DrainSettings {
    fn default() -> Self {
        Self {
            max_messages_in_batch: DEFAULT_MAX_MESSAGES_IN_BATCH,
            max_empty_receives: DEFAULT_MAX_EMPTY_RECEIVES,
            max_runtime: None,
            wait_time: Duration::from_secs(DEFAULT_WAIT_TIME_SECONDS),
            check_dead_letters: false,
            abandon_on_failure: false,
        }
    }
}

impl DrainSettings {
    /// Reject values that would make the loop spin or never pull.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_messages_in_batch == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_MESSAGES_IN_BATCH",
                detail: "must be at least 1".into(),
            });
        }
        if self.max_empty_receives == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_EMPTY_RECEIVES",
                detail: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Worklist
// ---------------------------------------------------------------------------

/// A topic/subscription pair the scheduler drains.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub topic: String,
    pub subscription: String,
}

impl WorkItem {
    pub fn new(topic: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            subscription: subscription.into(),
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.subscription)
    }
}

/// Parse `topic1:sub1,topic2:sub2,...`. Entries are trimmed; blank entries
/// (e.g. a trailing comma) are skipped.
pub fn parse_work_items(spec: &str) -> Result<Vec<WorkItem>, ConfigError> {
    let mut items = Vec::new();
    for entry in spec.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let invalid = || ConfigError::Invalid {
            key: "TOPICS_AND_SUBSCRIPTIONS",
            detail: format!("'{entry}' is not topic:subscription"),
        };
        let (topic, subscription) = entry.split_once(':').ok_or_else(invalid)?;
        let (topic, subscription) = (topic.trim(), subscription.trim());
        if topic.is_empty() || subscription.is_empty() || subscription.contains(':') {
            return Err(invalid());
        }
        items.push(WorkItem::new(topic, subscription));
    }
    if items.is_empty() {
        return Err(ConfigError::Invalid {
            key: "TOPICS_AND_SUBSCRIPTIONS",
            detail: "no topic:subscription pairs".into(),
        });
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_worklist_in_order() {
        let items = parse_work_items("orders:archive, payments:archive ,audit:cold").unwrap();
        assert_eq!(
            items,
            vec![
                WorkItem::new("orders", "archive"),
                WorkItem::new("payments", "archive"),
                WorkItem::new("audit", "cold"),
            ]
        );
        assert_eq!(items[1].to_string(), "payments/archive");
    }

    #[test]
    fn trailing_comma_is_ignored() {
        let items = parse_work_items("orders:archive,").unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn malformed_entries_are_rejected() {
        for spec in ["orders", "orders:", ":archive", "a:b:c", "", " , "] {
            assert!(parse_work_items(spec).is_err(), "{spec:?} should fail");
        }
    }

    #[test]
    fn zero_threshold_is_invalid() {
        let settings = DrainSettings {
            max_empty_receives: 0,
            ..DrainSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { key: "MAX_EMPTY_RECEIVES", .. })
        ));
        assert!(DrainSettings::default().validate().is_ok());
    }
}
