use clap::Parser;
use slog::{o, Drain, Level, Logger};
use std::{env, fmt, path::PathBuf};
use weather_etl_core::{
    find_config_file, load_config, ConfigSource, CONFIG_ENV_VAR, CONFIG_FILENAME,
    DEFAULT_FETCH_INTERVAL,
};

use crate::{validate_database_url, validate_table_name, EtlError};

pub const DEFAULT_API_BASE_URL: &str = "https://api.openweathermap.org";

#[derive(Parser, Clone, Debug, serde::Deserialize, Default)]
#[command(
    author,
    version,
    about = "Weather ETL daemon - fetches current city weather, normalizes it and loads it into SQL"
)]
pub struct Cli {
    /// Path to config file (TOML format)
    /// Searched in order: this flag, $WEATHER_ETL_CONFIG, ./weather-etl.toml,
    /// $XDG_CONFIG_HOME/weather-etl/weather-etl.toml, /etc/weather-etl/weather-etl.toml
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, env = "WEATHER_ETL_LEVEL")]
    pub level: Option<String>,

    /// OpenWeather API key
    #[arg(long, env = "OPENWEATHER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Connection string of the store records are appended to, e.g. sqlite://data/weather.db
    #[arg(long, env = "WEATHER_ETL_DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Base URL of the OpenWeather API
    #[arg(long, env = "WEATHER_ETL_API_BASE_URL")]
    pub api_base_url: Option<String>,

    /// City to observe
    #[arg(long, env = "WEATHER_ETL_CITY")]
    pub city: Option<String>,

    /// ISO 3166 alpha-2 country code of the city
    #[arg(long, env = "WEATHER_ETL_COUNTRY_CODE")]
    pub country_code: Option<String>,

    /// Directory raw API responses are written to
    #[arg(long, env = "WEATHER_ETL_RAW_DIR")]
    pub raw_dir: Option<String>,

    /// Directory processed CSV files are written to
    #[arg(long, env = "WEATHER_ETL_PROCESSED_DIR")]
    pub processed_dir: Option<String>,

    /// Table processed records are appended to
    #[arg(long, env = "WEATHER_ETL_TABLE")]
    pub table: Option<String>,

    /// Seconds between pipeline runs in daemon mode (default 9 hours)
    #[arg(short, long, env = "WEATHER_ETL_SLEEP_INTERVAL")]
    pub sleep_interval: Option<u64>,

    /// HTTP User-Agent header for API requests
    #[arg(short, long, env = "WEATHER_ETL_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Run the pipeline a single time and exit
    #[arg(long)]
    #[serde(default)]
    pub once: bool,
}

impl Cli {
    pub fn city(&self) -> String {
        self.city.clone().unwrap_or_else(|| String::from("Recife"))
    }

    pub fn country_code(&self) -> String {
        self.country_code.clone().unwrap_or_else(|| String::from("BR"))
    }

    pub fn api_base_url(&self) -> String {
        self.api_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
    }

    pub fn raw_dir(&self) -> String {
        self.raw_dir
            .clone()
            .unwrap_or_else(|| "./data/raw".to_string())
    }

    pub fn processed_dir(&self) -> String {
        self.processed_dir
            .clone()
            .unwrap_or_else(|| "./data/processed".to_string())
    }

    pub fn table(&self) -> String {
        self.table
            .clone()
            .unwrap_or_else(|| "recife_weather_records".to_string())
    }

    pub fn sleep_interval(&self) -> u64 {
        self.sleep_interval.unwrap_or(DEFAULT_FETCH_INTERVAL)
    }

    pub fn user_agent(&self) -> String {
        self.user_agent
            .clone()
            .unwrap_or_else(|| format!("weather-daemon/{}", env!("CARGO_PKG_VERSION")))
    }

    /// Overlay `self` (CLI and env values) on top of values from a config file.
    pub fn merge(self, file_config: Cli) -> Cli {
        Cli {
            config: self.config,
            level: self.level.or(file_config.level),
            api_key: self.api_key.or(file_config.api_key),
            database_url: self.database_url.or(file_config.database_url),
            api_base_url: self.api_base_url.or(file_config.api_base_url),
            city: self.city.or(file_config.city),
            country_code: self.country_code.or(file_config.country_code),
            raw_dir: self.raw_dir.or(file_config.raw_dir),
            processed_dir: self.processed_dir.or(file_config.processed_dir),
            table: self.table.or(file_config.table),
            sleep_interval: self.sleep_interval.or(file_config.sleep_interval),
            user_agent: self.user_agent.or(file_config.user_agent),
            once: self.once || file_config.once,
        }
    }
}

/// Load configuration from CLI args, config file, and environment
pub fn get_config_info() -> anyhow::Result<Cli> {
    let cli_args = Cli::parse();

    let source = if let Some(ref path) = cli_args.config {
        ConfigSource::Explicit(path.into())
    } else {
        find_config_file(CONFIG_ENV_VAR, CONFIG_FILENAME)
    };

    let file_config: Cli = load_config(&source)?;

    // env vars are handled by clap, so they already sit in cli_args
    let mut cli = cli_args.merge(file_config);
    cli.config = source.path().map(|path| path.display().to_string());
    Ok(cli)
}

pub fn setup_logger(cli: &Cli) -> Logger {
    let level = cli
        .level
        .clone()
        .or_else(|| env::var("RUST_LOG").ok())
        .map(|level| parse_level(&level))
        .unwrap_or(Level::Info);

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = drain.filter_level(level).fuse();
    slog::Logger::root(drain, o!("version" => env!("CARGO_PKG_VERSION")))
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::Trace,
        "debug" => Level::Debug,
        "info" => Level::Info,
        "warn" => Level::Warning,
        "error" => Level::Error,
        _ => Level::Info,
    }
}

/// The city whose weather is observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub city: String,
    pub country_code: String,
}

impl Location {
    /// `City,CC` as the weather API expects it.
    pub fn query(&self) -> String {
        format!("{},{}", self.city, self.country_code)
    }

    /// File-name friendly form of the city, e.g. `sao_paulo` for "Sao Paulo".
    pub fn slug(&self) -> String {
        self.city
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect()
    }
}

/// Validated settings for one pipeline instance.
#[derive(Clone)]
pub struct PipelineConfig {
    pub location: Location,
    pub api_key: String,
    pub api_base_url: String,
    pub database_url: String,
    pub table: String,
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub user_agent: String,
    pub sleep_interval: u64,
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("location", &self.location)
            .field("api_key", &"<redacted>")
            .field("api_base_url", &self.api_base_url)
            .field("database_url", &"<redacted>")
            .field("table", &self.table)
            .field("raw_dir", &self.raw_dir)
            .field("processed_dir", &self.processed_dir)
            .field("user_agent", &self.user_agent)
            .field("sleep_interval", &self.sleep_interval)
            .finish()
    }
}

impl TryFrom<&Cli> for PipelineConfig {
    type Error = EtlError;

    fn try_from(cli: &Cli) -> Result<Self, Self::Error> {
        let api_key = required_secret(&cli.api_key, "OPENWEATHER_API_KEY")?;
        let database_url = required_secret(&cli.database_url, "WEATHER_ETL_DATABASE_URL")?;
        validate_database_url(&database_url)?;
        let table = cli.table();
        validate_table_name(&table)?;
        if cli.sleep_interval() == 0 {
            return Err(EtlError::Configuration(String::from(
                "sleep_interval must be greater than zero",
            )));
        }

        Ok(PipelineConfig {
            location: Location {
                city: cli.city(),
                country_code: cli.country_code(),
            },
            api_key,
            api_base_url: cli.api_base_url(),
            database_url,
            table,
            raw_dir: PathBuf::from(cli.raw_dir()),
            processed_dir: PathBuf::from(cli.processed_dir()),
            user_agent: cli.user_agent(),
            sleep_interval: cli.sleep_interval(),
        })
    }
}

fn required_secret(value: &Option<String>, name: &str) -> Result<String, EtlError> {
    match value.as_deref().map(str::trim) {
        Some(secret) if !secret.is_empty() => Ok(secret.to_string()),
        _ => Err(EtlError::Configuration(format!(
            "{} is not set (flag, environment, .env or config file)",
            name
        ))),
    }
}
