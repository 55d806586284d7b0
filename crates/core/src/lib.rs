//! Weather ETL core library
//!
//! Shared pieces used by the pipeline binary:
//! - Configuration file discovery and loading (XDG-compliant)
//! - Filesystem helpers for directory setup and no-clobber file publishing

mod config;
pub mod fs;

pub use config::{find_config_file, load_config, ConfigSource};
pub use fs::{create_dir_all, publish_file, staging_path};

/// Application name used for XDG paths
pub const APP_NAME: &str = "weather-etl";

/// Config file name searched for in the standard locations
pub const CONFIG_FILENAME: &str = "weather-etl.toml";

/// Environment variable holding an explicit config file path
pub const CONFIG_ENV_VAR: &str = "WEATHER_ETL_CONFIG";

/// Default pipeline cadence (9 hours)
pub const DEFAULT_FETCH_INTERVAL: u64 = 9 * 60 * 60;
