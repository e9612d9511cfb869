use crate::core::connector::{
    ConnectorKind, ConnectorSpec, DEFAULT_RETRY_DELAY_SECS, DEFAULT_TIMEOUT_SECS, URL_SETTING,
};
use crate::core::error::{NotifierError, NotifierResult};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/fail2ban/fail2ban-notify.json";
pub const DEFAULT_CONNECTOR_PATH: &str = "/etc/fail2ban/connectors";

pub const GEOIP_SERVICE_IPAPI: &str = "ipapi";
pub const GEOIP_SERVICE_IPGEOLOCATION: &str = "ipgeolocation";
pub const DEFAULT_GEOIP_TTL_SECS: u64 = 3600;

#[cfg(unix)]
const DIR_MODE: u32 = 0o750;
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Keys missing from the file keep their [`Default`] values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connectors: Vec<ConnectorSpec>,
    pub connector_path: PathBuf,
    pub geoip: GeoIpConfig,
    pub debug: bool,
    pub log_level: String,
    /// Global connector timeout in seconds.
    pub timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoIpConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub service: String,
    pub cache: bool,
    /// Cache entry lifetime in seconds.
    pub ttl: u64,
}

impl Default for GeoIpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            service: GEOIP_SERVICE_IPAPI.to_string(),
            cache: true,
            ttl: DEFAULT_GEOIP_TTL_SECS,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connectors: Vec::new(),
            connector_path: PathBuf::from(DEFAULT_CONNECTOR_PATH),
            geoip: GeoIpConfig::default(),
            debug: false,
            log_level: "info".to_string(),
            timeout: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Reads and validates a config file. A missing file is replaced by the
    /// default configuration, which is written to `path`.
    pub fn load(path: &Path) -> NotifierResult<Self> {
        if !path.exists() {
            return Self::init_default(path);
        }

        let config_str = fs::read_to_string(path).map_err(|e| NotifierError::FileReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut config: Config = serde_json::from_str(&config_str).map_err(|e| {
            NotifierError::ConfigError(format!("failed to parse config file: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> NotifierResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_config_dir(parent)?;
        }

        let config_str = serde_json::to_string_pretty(self)?;
        fs::write(path, config_str).map_err(|e| NotifierError::FileWriteError {
            path: path.to_path_buf(),
            source: e,
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(FILE_MODE)).map_err(|e| {
                NotifierError::FileWriteError {
                    path: path.to_path_buf(),
                    source: e,
                }
            })?;
        }

        Ok(())
    }

    pub fn init_default(path: &Path) -> NotifierResult<Self> {
        let config = Self::default();
        config.save(path)?;
        Ok(config)
    }

    /// Checks every connector and fills in defaults for unset numeric
    /// fields. The first invalid connector aborts validation.
    pub fn validate(&mut self) -> NotifierResult<()> {
        if self.connector_path.as_os_str().is_empty() {
            return Err(NotifierError::ConfigError(
                "connector_path cannot be empty".to_string(),
            ));
        }

        if self.timeout == 0 {
            self.timeout = DEFAULT_TIMEOUT_SECS;
        }

        let mut seen = HashSet::new();
        for (i, connector) in self.connectors.iter_mut().enumerate() {
            validate_spec(i, connector)?;

            if !seen.insert(connector.name.clone()) {
                return Err(NotifierError::ConfigError(format!(
                    "connector[{}] ({}): duplicate connector name",
                    i, connector.name
                )));
            }

            if connector.timeout == 0 {
                connector.timeout = self.timeout;
            }
            if connector.retry_delay == 0 {
                connector.retry_delay = DEFAULT_RETRY_DELAY_SECS;
            }
        }

        if self.geoip.service != GEOIP_SERVICE_IPAPI
            && self.geoip.service != GEOIP_SERVICE_IPGEOLOCATION
        {
            warn!(
                "Unknown GeoIP service '{}', falling back to '{}'",
                self.geoip.service, GEOIP_SERVICE_IPAPI
            );
            self.geoip.service = GEOIP_SERVICE_IPAPI.to_string();
        }
        if self.geoip.ttl == 0 {
            self.geoip.ttl = DEFAULT_GEOIP_TTL_SECS;
        }

        Ok(())
    }

    pub fn enabled_connectors(&self) -> Vec<ConnectorSpec> {
        self.connectors
            .iter()
            .filter(|c| c.enabled)
            .cloned()
            .collect()
    }

    pub fn connector_by_name(&self, name: &str) -> Option<&ConnectorSpec> {
        self.connectors.iter().find(|c| c.name == name)
    }

    pub fn add_connector(&mut self, connector: ConnectorSpec) -> NotifierResult<()> {
        if self.connector_by_name(&connector.name).is_some() {
            return Err(NotifierError::ConfigError(format!(
                "connector {} already exists",
                connector.name
            )));
        }
        self.connectors.push(connector);
        Ok(())
    }

    pub fn remove_connector(&mut self, name: &str) -> bool {
        let before = self.connectors.len();
        self.connectors.retain(|c| c.name != name);
        self.connectors.len() != before
    }

    pub fn update_connector(&mut self, name: &str, updated: ConnectorSpec) -> bool {
        match self.connectors.iter_mut().find(|c| c.name == name) {
            Some(slot) => {
                *slot = updated;
                true
            }
            None => false,
        }
    }

    /// Default configuration pre-populated with disabled sample connectors.
    pub fn sample() -> Self {
        let dir = PathBuf::from(DEFAULT_CONNECTOR_PATH);
        let script = |name: &str, file: &str, description: &str| {
            ConnectorSpec::new(name, ConnectorKind::Script)
                .with_path(dir.join(file))
                .with_description(description)
        };

        let mut email = script("email", "email.py", "Send notifications via email using SMTP")
            .with_setting("EMAIL_SMTP_SERVER", "localhost")
            .with_setting("EMAIL_SMTP_PORT", "587")
            .with_setting("EMAIL_SMTP_USER", "")
            .with_setting("EMAIL_SMTP_PASSWORD", "")
            .with_setting("EMAIL_SMTP_TLS", "true")
            .with_setting("EMAIL_FROM", "fail2ban@localhost")
            .with_setting("EMAIL_TO", "admin@localhost")
            .with_setting("EMAIL_SUBJECT_PREFIX", "[Fail2Ban]");
        email.timeout = 60;
        email.retry_count = 3;
        email.retry_delay = 10;

        let connectors = vec![
            script("discord", "discord.sh", "Send notifications to Discord via webhook")
                .with_setting(
                    "DISCORD_WEBHOOK_URL",
                    "https://discord.com/api/webhooks/YOUR_WEBHOOK_ID/YOUR_WEBHOOK_TOKEN",
                )
                .with_setting("DISCORD_USERNAME", "Fail2Ban")
                .with_setting("DISCORD_AVATAR_URL", ""),
            script("teams", "teams.sh", "Send notifications to Microsoft Teams via webhook")
                .with_setting(
                    "TEAMS_WEBHOOK_URL",
                    "https://your-tenant.webhook.office.com/webhookb2/YOUR_WEBHOOK_URL",
                ),
            script("slack", "slack.sh", "Send notifications to Slack via webhook")
                .with_setting(
                    "SLACK_WEBHOOK_URL",
                    "https://hooks.slack.com/services/YOUR/SLACK/WEBHOOK",
                )
                .with_setting("SLACK_CHANNEL", "#security")
                .with_setting("SLACK_USERNAME", "fail2ban")
                .with_setting("SLACK_ICON_EMOJI", ":cop:"),
            script("telegram", "telegram.sh", "Send notifications to Telegram via bot API")
                .with_setting("TELEGRAM_BOT_TOKEN", "YOUR_BOT_TOKEN")
                .with_setting("TELEGRAM_CHAT_ID", "YOUR_CHAT_ID"),
            email,
            ConnectorSpec::new("webhook", ConnectorKind::Http)
                .with_description("Send notifications to a custom HTTP endpoint")
                .with_setting(URL_SETTING, "https://your-api.com/webhook")
                .with_setting("header_Authorization", "Bearer YOUR_TOKEN"),
        ];

        Self {
            connectors,
            ..Self::default()
        }
    }
}

fn validate_spec(i: usize, connector: &ConnectorSpec) -> NotifierResult<()> {
    if connector.name.is_empty() {
        return Err(NotifierError::ConfigError(format!(
            "connector[{}]: name cannot be empty",
            i
        )));
    }

    if connector.kind.is_process() {
        if connector.path.as_os_str().is_empty() {
            return Err(NotifierError::ConfigError(format!(
                "connector[{}] ({}): path cannot be empty for type '{}'",
                i, connector.name, connector.kind
            )));
        }
        if !connector.path.is_absolute() {
            return Err(NotifierError::PathNotAbsolute(connector.path.clone()));
        }
    } else if connector.url().is_none() {
        return Err(NotifierError::MissingSetting {
            connector: connector.name.clone(),
            key: URL_SETTING.to_string(),
        });
    }

    Ok(())
}

fn create_config_dir(dir: &Path) -> NotifierResult<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder.create(dir).map_err(|e| NotifierError::FileWriteError {
        path: dir.to_path_buf(),
        source: e,
    })
}
