use crate::core::error::NotifierError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RETRY_COUNT: u32 = 2;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;

/// Settings key holding the endpoint of an http connector.
pub const URL_SETTING: &str = "url";
/// Settings keys with this prefix become request headers.
pub const HEADER_PREFIX: &str = "header_";

/// File suffixes that are run through an interpreter.
pub const SCRIPT_EXTENSIONS: &[&str] = &["sh", "bash", "py", "js", "rb", "pl"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConnectorKind {
    Script,
    Executable,
    Http,
}

impl ConnectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorKind::Script => "script",
            ConnectorKind::Executable => "executable",
            ConnectorKind::Http => "http",
        }
    }

    /// Script and executable connectors run as child processes.
    pub fn is_process(&self) -> bool {
        !matches!(self, ConnectorKind::Http)
    }

    /// Guesses the kind of a file found on disk from its extension.
    pub fn for_file(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if SCRIPT_EXTENSIONS.contains(&ext) => ConnectorKind::Script,
            _ => ConnectorKind::Executable,
        }
    }
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectorKind {
    type Err = NotifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "script" => Ok(ConnectorKind::Script),
            "executable" => Ok(ConnectorKind::Executable),
            "http" => Ok(ConnectorKind::Http),
            other => Err(NotifierError::UnknownConnectorType(other.to_string())),
        }
    }
}

impl TryFrom<String> for ConnectorKind {
    type Error = NotifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ConnectorKind> for String {
    fn from(kind: ConnectorKind) -> Self {
        kind.as_str().to_string()
    }
}

/// One configured delivery target as it is persisted in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ConnectorKind,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub path: PathBuf,
    #[serde(default)]
    pub settings: HashMap<String, String>,
    /// Seconds; zero means "use the global timeout".
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub retry_count: u32,
    /// Seconds between attempts; zero is replaced by the default on load.
    #[serde(default)]
    pub retry_delay: u64,
    #[serde(default)]
    pub description: String,
}

impl ConnectorSpec {
    pub fn new(name: impl Into<String>, kind: ConnectorKind) -> Self {
        Self {
            name: name.into(),
            kind,
            enabled: false,
            path: PathBuf::new(),
            settings: HashMap::new(),
            timeout: DEFAULT_TIMEOUT_SECS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: DEFAULT_RETRY_DELAY_SECS,
            description: String::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay)
    }

    /// Total number of dispatch attempts in one retry sequence.
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    pub fn url(&self) -> Option<&str> {
        self.settings.get(URL_SETTING).map(String::as_str)
    }

    /// `header_<Name>` settings with the prefix stripped.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.settings.iter().filter_map(|(key, value)| {
            key.strip_prefix(HEADER_PREFIX)
                .map(|name| (name, value.as_str()))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Ready,
    Disabled,
    Invalid,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusKind::Ready => "ready",
            StatusKind::Disabled => "disabled",
            StatusKind::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectorStatus {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ConnectorKind,
    pub enabled: bool,
    pub path: PathBuf,
    pub description: String,
    pub status: StatusKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrips_through_json_names() {
        let spec: ConnectorSpec = serde_json::from_str(
            r#"{"name":"hook","type":"http","settings":{"url":"http://x"}}"#,
        )
        .unwrap();
        assert_eq!(spec.kind, ConnectorKind::Http);
        assert!(!spec.enabled);
        assert_eq!(spec.timeout, 0);

        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["type"], "http");
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = serde_json::from_str::<ConnectorSpec>(r#"{"name":"x","type":"carrier-pigeon"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("unknown connector type: carrier-pigeon"));

        assert!(matches!(
            "smtp".parse::<ConnectorKind>(),
            Err(NotifierError::UnknownConnectorType(t)) if t == "smtp"
        ));
    }

    #[test]
    fn test_kind_for_file() {
        assert_eq!(ConnectorKind::for_file(Path::new("/x/foo.sh")), ConnectorKind::Script);
        assert_eq!(ConnectorKind::for_file(Path::new("/x/foo.py")), ConnectorKind::Script);
        assert_eq!(ConnectorKind::for_file(Path::new("/x/foo.pl")), ConnectorKind::Script);
        assert_eq!(ConnectorKind::for_file(Path::new("/x/foo")), ConnectorKind::Executable);
        assert_eq!(ConnectorKind::for_file(Path::new("/x/foo.txt")), ConnectorKind::Executable);
    }

    #[test]
    fn test_headers_strip_prefix() {
        let spec = ConnectorSpec::new("hook", ConnectorKind::Http)
            .with_setting("url", "http://example.com")
            .with_setting("header_Authorization", "Bearer abc")
            .with_setting("other", "value");

        let headers: Vec<_> = spec.headers().collect();
        assert_eq!(headers, vec![("Authorization", "Bearer abc")]);
        assert_eq!(spec.url(), Some("http://example.com"));
        assert_eq!(spec.max_attempts(), 3);
    }
}
