use archiver_api::TransportError;
use archiver_engine::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum ArchiverError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("config file ({context}): {detail}")]
    ConfigFile { context: &'static str, detail: String },

    #[error("storage: {0}")]
    Storage(String),

    #[error("source: {0}")]
    Source(#[from] TransportError),

    #[error("drain of {item} halted: {detail}")]
    Halted { item: String, detail: String },

    #[error("metrics: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}

impl ArchiverError {
    /// Configuration problems exit with 2 before anything is opened; every
    /// other failure exits with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            ArchiverError::Config(_) | ArchiverError::ConfigFile { .. } => 2,
            _ => 1,
        }
    }
}
