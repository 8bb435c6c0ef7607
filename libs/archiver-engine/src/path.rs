//! Archive object keys.
//!
//! ```text
//! {container}/{directory}/{topic}/{template}/{topic}+{offset:019}.bin.gz
//! ```
//!
//! Empty segments of the substituted template are dropped, so an empty
//! template gives `{topic}/{topic}+...` rather than `{topic}//{topic}+...`.
//! Object stores cannot hold an empty path segment.
//!
//! The `.bin.gz` suffix is a naming convention kept for readers of existing
//! archives; bodies are plain line-delimited text.

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::error::PathError;

/// Calendar tokens recognised in a path template. All tokens have distinct
/// spellings, so a left-to-right scan never matches inside an
/// already-substituted value.
const TOKENS: [&str; 5] = ["YYYY", "MM", "dd", "HH", "mm"];

/// Build the object key for a batch whose last message has `offset` and
/// was enqueued at `timestamp_ms`.
pub fn compute_key(
    container: &str,
    directory: &str,
    topic: &str,
    template: &str,
    offset: u64,
    timestamp_ms: i64,
) -> Result<String, PathError> {
    let timestamp =
        DateTime::<Utc>::from_timestamp_millis(timestamp_ms).ok_or(PathError::Timestamp(timestamp_ms))?;
    let partition = substitute(template, &timestamp);

    let mut key = format!("{container}/{directory}/{topic}/");
    for segment in partition.split('/').filter(|s| !s.is_empty()) {
        key.push_str(segment);
        key.push('/');
    }
    key.push_str(&format!("{topic}+{offset:019}.bin.gz"));
    Ok(key)
}

/// Replace calendar tokens with zero-padded fields of `ts`. Anything else
/// passes through unchanged.
fn substitute(template: &str, ts: &DateTime<Utc>) -> String {
    let mut out = String::with_capacity(template.len() + 8);
    let mut rest = template;

    'scan: while !rest.is_empty() {
        for token in TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                match token {
                    "YYYY" => out.push_str(&format!("{:04}", ts.year())),
                    "MM" => out.push_str(&format!("{:02}", ts.month())),
                    "dd" => out.push_str(&format!("{:02}", ts.day())),
                    "HH" => out.push_str(&format!("{:02}", ts.hour())),
                    _ => out.push_str(&format!("{:02}", ts.minute())),
                }
                rest = tail;
                continue 'scan;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }

    out
}
