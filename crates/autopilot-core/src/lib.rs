pub mod config;
pub mod duration;
pub mod error;
pub mod types;

pub use config::{AutopilotConfig, EngineSettings};
pub use duration::parse_duration;
pub use error::{ConfigError, SnapshotError};
pub use types::*;
