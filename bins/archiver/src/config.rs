use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser};
use serde::Deserialize;

use archiver_engine::config::{
    DEFAULT_MAX_EMPTY_RECEIVES, DEFAULT_MAX_MESSAGES_IN_BATCH, DEFAULT_TOPICS_DIR, DEFAULT_WAIT_TIME_SECONDS,
};
use archiver_engine::{ConfigError, DrainSettings, PathLayout, WorkItem, parse_work_items};
use archiver_sink_object_store::AzureConnectionString;

use crate::error::ArchiverError;

const DEFAULT_LOCK_RENEWAL_SECONDS: u64 = 120;
const DEFAULT_LOG_FILTER: &str = "warn";
const DEFAULT_PROMETHEUS_PORT: u16 = 8000;

#[derive(Parser)]
#[command(name = "topic-archiver", about = "Archive topic subscriptions to blob storage")]
pub struct Cli {
    #[command(flatten)]
    pub args: ArchiverArgs,
}

// ═══════════════════════════════════════════════════════════════
//  CLI args / environment
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug, Default)]
pub struct ArchiverArgs {
    /// TOML file with the same settings (snake_case keys); ignored when absent
    #[arg(long, default_value = "archiver.toml", env = "ARCHIVER_CONFIG")]
    pub config: String,

    /// Destination container
    #[arg(long, env = "CONTAINER_NAME")]
    pub container_name: Option<String>,

    /// Top-level directory inside the container
    #[arg(long, env = "TOPICS_DIR")]
    pub topics_dir: Option<String>,

    /// Date template, tokens YYYY MM dd HH mm
    #[arg(long, env = "PATH_FORMAT")]
    pub path_format: Option<String>,

    /// Single-topic mode: topic to drain
    #[arg(long, env = "TOPIC_NAME")]
    pub topic_name: Option<String>,

    /// Single-topic mode: subscription to drain
    #[arg(long, env = "SUBSCRIPTION_NAME")]
    pub subscription_name: Option<String>,

    /// Multi-topic mode worklist, `topic:sub,topic:sub,...`
    #[arg(long, env = "TOPICS_AND_SUBSCRIPTIONS")]
    pub topics_and_subscriptions: Option<String>,

    #[arg(long, env = "MAX_MESSAGES_IN_BATCH")]
    pub max_messages_in_batch: Option<usize>,

    #[arg(long, env = "MAX_EMPTY_RECEIVES")]
    pub max_empty_receives: Option<u32>,

    /// Per-run budget, 0 = unbounded
    #[arg(long, env = "MAX_RUNTIME_SECONDS")]
    pub max_runtime_seconds: Option<u64>,

    #[arg(long, env = "WAIT_TIME_SECONDS")]
    pub wait_time_seconds: Option<u64>,

    /// Warn when the dead-letter queue is not empty (true/false)
    #[arg(long, env = "CHECK_FOR_DL_MESSAGES")]
    pub check_for_dl_messages: Option<String>,

    /// Release a batch at once when its write fails instead of waiting for
    /// lease expiry (true/false)
    #[arg(long, env = "ABANDON_ON_WRITE_FAILURE")]
    pub abandon_on_write_failure: Option<String>,

    /// DEBUG, INFO, WARNING, ERROR, CRITICAL or a filter directive
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// local, memory or azure
    #[arg(long, env = "STORAGE_BACKEND")]
    pub storage_backend: Option<String>,

    /// Root directory of the local backend
    #[arg(long, env = "STORAGE_ROOT")]
    pub storage_root: Option<String>,

    #[arg(long, env = "STORAGE_ACCOUNT_CONNECTION_STRING", hide_env_values = true)]
    pub storage_account_connection_string: Option<String>,

    /// Only `memory` is built in
    #[arg(long, env = "SOURCE_BACKEND")]
    pub source_backend: Option<String>,

    /// JSON-lines file published into the in-memory broker at startup
    #[arg(long, env = "SOURCE_SEED_FILE")]
    pub source_seed_file: Option<String>,

    /// Longest lease auto-renewal per held message
    #[arg(long, env = "LOCK_RENEWAL_SECONDS")]
    pub lock_renewal_seconds: Option<u64>,

    /// Deliveries before the in-memory broker dead-letters a message
    #[arg(long, env = "MAX_DELIVERY_COUNT")]
    pub max_delivery_count: Option<u32>,

    /// Multi-topic mode: Prometheus listener port, 0 = disabled
    #[arg(long, env = "PROMETHEUS_PORT")]
    pub prometheus_port: Option<u16>,

    /// Prepended to the `file_count` and `message_count` counter names
    #[arg(long, env = "PROMETHEUS_METRIC_NAME_PREFIX")]
    pub prometheus_metric_name_prefix: Option<String>,
}

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub container_name: Option<String>,
    pub topics_dir: Option<String>,
    pub path_format: Option<String>,
    pub topic_name: Option<String>,
    pub subscription_name: Option<String>,
    pub topics_and_subscriptions: Option<String>,
    pub max_messages_in_batch: Option<usize>,
    pub max_empty_receives: Option<u32>,
    pub max_runtime_seconds: Option<u64>,
    pub wait_time_seconds: Option<u64>,
    pub check_for_dl_messages: Option<bool>,
    pub abandon_on_write_failure: Option<bool>,
    pub log_level: Option<String>,
    pub storage_backend: Option<String>,
    pub storage_root: Option<String>,
    pub storage_account_connection_string: Option<String>,
    pub source_backend: Option<String>,
    pub source_seed_file: Option<String>,
    pub lock_renewal_seconds: Option<u64>,
    pub max_delivery_count: Option<u32>,
    pub prometheus_port: Option<u16>,
    pub prometheus_metric_name_prefix: Option<String>,
}

impl FileConfig {
    /// A missing file yields the empty config; an unreadable or malformed
    /// one is an error.
    pub fn load_optional(path: &str) -> Result<Self, ArchiverError> {
        if !Path::new(path).exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| ArchiverError::ConfigFile {
            context: "read",
            detail: format!("'{path}': {e}"),
        })?;
        toml::from_str(&content).map_err(|e| ArchiverError::ConfigFile {
            context: "parse",
            detail: format!("'{path}': {e}"),
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  ArchiverConfig: merged and validated
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Drain one pair once, then exit.
    Single(WorkItem),
    /// Round-robin over the worklist until stopped.
    Multi(Vec<WorkItem>),
}

impl Mode {
    pub fn items(&self) -> Vec<WorkItem> {
        match self {
            Mode::Single(item) => vec![item.clone()],
            Mode::Multi(items) => items.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Local { root: PathBuf },
    Memory,
    Azure(AzureConnectionString),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub seed_file: Option<PathBuf>,
    pub max_lock_renewal: Duration,
    pub max_delivery_count: u32,
}

/// Prometheus export, multi-topic mode only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    /// `None` when `PROMETHEUS_PORT` is 0.
    pub port: Option<u16>,
    pub prefix: String,
}

/// Effective configuration: config file < env/CLI.
#[derive(Debug, Clone)]
pub struct ArchiverConfig {
    pub mode: Mode,
    pub layout: PathLayout,
    pub drain: DrainSettings,
    pub storage: StorageBackend,
    pub source: SourceConfig,
    pub metrics: MetricsConfig,
    pub log_filter: String,
}

impl ArchiverConfig {
    pub fn load(args: &ArchiverArgs) -> Result<Self, ArchiverError> {
        let file = FileConfig::load_optional(&args.config)?;
        Ok(Self::merge(args, file)?)
    }

    pub fn merge(args: &ArchiverArgs, file: FileConfig) -> Result<Self, ConfigError> {
        let container = non_empty(args.container_name.clone().or(file.container_name))
            .ok_or(ConfigError::Missing("CONTAINER_NAME"))?;

        let worklist = non_empty(args.topics_and_subscriptions.clone().or(file.topics_and_subscriptions));
        let mode = match worklist {
            Some(list) => Mode::Multi(parse_work_items(&list)?),
            None => {
                let topic = non_empty(args.topic_name.clone().or(file.topic_name))
                    .ok_or(ConfigError::Missing("TOPIC_NAME"))?;
                let subscription = non_empty(args.subscription_name.clone().or(file.subscription_name))
                    .ok_or(ConfigError::Missing("SUBSCRIPTION_NAME"))?;
                Mode::Single(WorkItem::new(topic, subscription))
            }
        };

        let layout = PathLayout::new(
            container,
            args.topics_dir
                .clone()
                .or(file.topics_dir)
                .unwrap_or_else(|| DEFAULT_TOPICS_DIR.to_string()),
            args.path_format.clone().or(file.path_format).unwrap_or_default(),
        );

        let check_dead_letters = match &args.check_for_dl_messages {
            Some(raw) => parse_flag("CHECK_FOR_DL_MESSAGES", raw)?,
            None => file.check_for_dl_messages.unwrap_or(false),
        };
        let abandon_on_failure = match &args.abandon_on_write_failure {
            Some(raw) => parse_flag("ABANDON_ON_WRITE_FAILURE", raw)?,
            None => file.abandon_on_write_failure.unwrap_or(false),
        };
        let drain = DrainSettings {
            max_messages_in_batch: args
                .max_messages_in_batch
                .or(file.max_messages_in_batch)
                .unwrap_or(DEFAULT_MAX_MESSAGES_IN_BATCH),
            max_empty_receives: args
                .max_empty_receives
                .or(file.max_empty_receives)
                .unwrap_or(DEFAULT_MAX_EMPTY_RECEIVES),
            max_runtime: match args.max_runtime_seconds.or(file.max_runtime_seconds).unwrap_or(0) {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            wait_time: Duration::from_secs(
                args.wait_time_seconds
                    .or(file.wait_time_seconds)
                    .unwrap_or(DEFAULT_WAIT_TIME_SECONDS),
            ),
            check_dead_letters,
            abandon_on_failure,
        };
        drain.validate()?;

        let backend = args.storage_backend.clone().or(file.storage_backend);
        let storage = match backend.as_deref().map(str::trim) {
            None | Some("") | Some("local") => StorageBackend::Local {
                root: PathBuf::from(args.storage_root.clone().or(file.storage_root).unwrap_or_else(|| ".".into())),
            },
            Some("memory") => StorageBackend::Memory,
            Some("azure") => {
                let raw = non_empty(
                    args.storage_account_connection_string
                        .clone()
                        .or(file.storage_account_connection_string),
                )
                .ok_or(ConfigError::Missing("STORAGE_ACCOUNT_CONNECTION_STRING"))?;
                let parsed = AzureConnectionString::parse(&raw).map_err(|e| ConfigError::Invalid {
                    key: "STORAGE_ACCOUNT_CONNECTION_STRING",
                    detail: e.to_string(),
                })?;
                StorageBackend::Azure(parsed)
            }
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "STORAGE_BACKEND",
                    detail: format!("'{other}' is not one of local, memory, azure"),
                });
            }
        };

        let source_backend = args.source_backend.clone().or(file.source_backend);
        match source_backend.as_deref().map(str::trim) {
            None | Some("") | Some("memory") => {}
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "SOURCE_BACKEND",
                    detail: format!("'{other}' is not available, only memory"),
                });
            }
        }
        let source = SourceConfig {
            seed_file: non_empty(args.source_seed_file.clone().or(file.source_seed_file)).map(PathBuf::from),
            max_lock_renewal: Duration::from_secs(
                args.lock_renewal_seconds
                    .or(file.lock_renewal_seconds)
                    .unwrap_or(DEFAULT_LOCK_RENEWAL_SECONDS),
            ),
            max_delivery_count: args
                .max_delivery_count
                .or(file.max_delivery_count)
                .unwrap_or(archiver_source_memory::DEFAULT_MAX_DELIVERY_COUNT),
        };
        if source.max_delivery_count == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_DELIVERY_COUNT",
                detail: "must be at least 1".into(),
            });
        }

        let metrics = MetricsConfig {
            port: match args.prometheus_port.or(file.prometheus_port).unwrap_or(DEFAULT_PROMETHEUS_PORT) {
                0 => None,
                port => Some(port),
            },
            prefix: args
                .prometheus_metric_name_prefix
                .clone()
                .or(file.prometheus_metric_name_prefix)
                .unwrap_or_default(),
        };

        Ok(Self {
            mode,
            layout,
            drain,
            storage,
            source,
            metrics,
            log_filter: log_filter(args.log_level.as_deref().or(file.log_level.as_deref())),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_flag(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            detail: format!("'{raw}' is not a boolean"),
        }),
    }
}

/// Map a `LOG_LEVEL` value onto a tracing filter. Level names follow the
/// usual logging vocabulary; anything else is taken as a directive.
pub fn log_filter(level: Option<&str>) -> String {
    let Some(level) = level.map(str::trim).filter(|l| !l.is_empty()) else {
        return DEFAULT_LOG_FILTER.to_string();
    };
    match level.to_ascii_uppercase().as_str() {
        "TRACE" => "trace".into(),
        "DEBUG" => "debug".into(),
        "INFO" => "info".into(),
        "WARN" | "WARNING" => "warn".into(),
        "ERROR" | "CRITICAL" | "FATAL" => "error".into(),
        _ => level.to_string(),
    }
}
