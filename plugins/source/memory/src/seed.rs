use std::io::BufRead;
use std::path::Path;

use serde::Deserialize;

use archiver_api::TransportError;

use crate::broker::InMemoryBroker;

/// One line of a seed file.
///
/// ```json
/// {"topic": "orders", "body": {"message_number": 0}, "enqueued_ms": 1709644200000}
/// ```
///
/// A string `body` is published as-is; any other JSON value is published as
/// its compact serialisation. Without `enqueued_ms` the current time is used.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedRecord {
    pub topic: String,
    pub body: serde_json::Value,
    #[serde(default)]
    pub enqueued_ms: Option<i64>,
}

impl SeedRecord {
    fn body_bytes(&self) -> Vec<u8> {
        match &self.body {
            serde_json::Value::String(s) => s.clone().into_bytes(),
            other => other.to_string().into_bytes(),
        }
    }
}

/// Publish every record of a JSON-lines stream. Blank lines are skipped.
/// Returns the number of published messages.
pub fn load_seed(broker: &InMemoryBroker, reader: impl BufRead) -> Result<usize, TransportError> {
    let mut published = 0;
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: SeedRecord = serde_json::from_str(&line)
            .map_err(|e| TransportError::from(e).with_context(format!("seed line {}", idx + 1)))?;
        let body = record.body_bytes();
        match record.enqueued_ms {
            Some(ms) => broker.publish(&record.topic, body, ms),
            None => broker.publish_now(&record.topic, body),
        };
        published += 1;
    }
    Ok(published)
}

pub fn load_seed_file(broker: &InMemoryBroker, path: impl AsRef<Path>) -> Result<usize, TransportError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .map_err(|e| TransportError::from(e).with_context(format!("seed file {}", path.display())))?;
    let count = load_seed(broker, std::io::BufReader::new(file))?;
    tracing::info!(path = %path.display(), messages = count, "seed file loaded");
    Ok(count)
}
