pub mod config;
pub mod drain;
pub mod error;
pub mod path;
pub mod scheduler;

pub use config::{ConfigError, DrainSettings, PathLayout, WorkItem, parse_work_items};
pub use drain::{DrainLoop, DrainOutcome, DrainSession, DrainState};
pub use error::{DrainError, PathError};
pub use path::compute_key;
pub use scheduler::{ArchiveTotals, Scheduler, SweepReport};
