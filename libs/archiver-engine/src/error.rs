use archiver_api::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("timestamp {0} ms is outside the representable calendar range")]
    Timestamp(i64),
}

/// Failures inside one drain cycle. Variants stay distinct because the
/// remediation differs: a failed write leaves messages unsettled (redelivery),
/// a failed accept leaves an archived object behind (duplicate risk).
#[derive(Debug, thiserror::Error)]
pub enum DrainError {
    #[error("pull from {source_name}: {source}")]
    Pull { source_name: String, source: TransportError },

    #[error("write '{key}': {source}")]
    Write { key: String, source: TransportError },

    #[error("accept {count} messages archived at '{key}': {source}")]
    Accept { key: String, count: usize, source: TransportError },

    #[error("object key: {0}")]
    Path(#[from] PathError),
}
