use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NotifierError {
    #[error("Failed to read file: {path}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("no enabled connectors found")]
    NoConnectorsEnabled,

    #[error("connector {0} not found")]
    ConnectorNotFound(String),

    #[error("connector {0} is disabled")]
    ConnectorDisabled(String),

    #[error("unknown connector type: {0}")]
    UnknownConnectorType(String),

    #[error("connector {connector} is missing the '{key}' setting")]
    MissingSetting { connector: String, key: String },

    #[error("connector {connector} has an invalid '{key}' setting: {reason}")]
    InvalidSetting {
        connector: String,
        key: String,
        reason: String,
    },

    #[error("connector path must be absolute: {0}")]
    PathNotAbsolute(PathBuf),

    #[error("connector script not found: {0}")]
    PathNotFound(PathBuf),

    #[error("connector file is not executable: {0}")]
    NotExecutable(PathBuf),

    #[error("connector {connector} timed out after {}s", .timeout.as_secs())]
    Timeout { connector: String, timeout: Duration },

    #[error("connector {connector} execution failed: {message}")]
    ProcessExecutionFailed { connector: String, message: String },

    #[error("connector {connector} HTTP request failed: {message}")]
    HttpRequestFailed {
        connector: String,
        status: Option<u16>,
        message: String,
    },

    #[error("connector {connector} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        connector: String,
        attempts: u32,
        #[source]
        source: Box<NotifierError>,
    },

    #[error("connector failures: {}", join_failures(.0))]
    ConnectorFailures(Vec<ConnectorFailure>),

    #[error("invalid IP address: {0}")]
    InvalidIp(String),

    #[error("unknown GeoIP service: {0}")]
    UnknownGeoService(String),

    #[error("GeoIP lookup failed: {0}")]
    GeoLookupFailed(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NotifierError {
    /// Configuration problems repeat identically on every attempt, so the
    /// retry loop gives up on them straight away.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            NotifierError::MissingSetting { .. }
                | NotifierError::InvalidSetting { .. }
                | NotifierError::UnknownConnectorType(_)
                | NotifierError::PathNotAbsolute(_)
        )
    }
}

/// One connector's final failure inside an aggregate error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorFailure {
    pub connector: String,
    pub message: String,
}

fn join_failures(failures: &[ConnectorFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("connector {} failed: {}", f.connector, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type NotifierResult<T> = Result<T, NotifierError>;
