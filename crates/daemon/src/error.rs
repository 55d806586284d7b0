use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum EtlError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("failed to fetch weather data: {0}")]
    Fetch(String),
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("schema error: {0}")]
    Schema(String),
    #[error("failed to persist records: {0}")]
    Persistence(#[from] sqlx::Error),
    #[error("failed to format time: {0}")]
    TimeFormat(#[from] time::error::Format),
    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EtlError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EtlError::Io {
            path: path.into(),
            source,
        }
    }

    /// Short label reported at the user-facing boundary; details stay in the log.
    pub fn category(&self) -> &'static str {
        match self {
            EtlError::Configuration(_) => "configuration error",
            EtlError::Fetch(_) => "fetch error",
            EtlError::MalformedInput(_) => "malformed input",
            EtlError::Schema(_) => "schema error",
            EtlError::Persistence(_) => "persistence error",
            EtlError::TimeFormat(_) => "time format error",
            EtlError::Io { .. } => "io error",
        }
    }
}
