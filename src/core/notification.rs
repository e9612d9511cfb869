use crate::core::error::{NotifierError, NotifierResult};
use crate::core::geoip::GeoInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Ban,
    Unban,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Ban => "ban",
            Action::Unban => "unban",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = NotifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ban" => Ok(Action::Ban),
            "unban" => Ok(Action::Unban),
            other => Err(NotifierError::ConfigError(format!(
                "invalid action: {} (must be 'ban' or 'unban')",
                other
            ))),
        }
    }
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// The ban/unban event handed to every connector.
///
/// Built once per invocation and never mutated afterwards; tasks share it
/// behind an `Arc` or take their own clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    pub ip: String,
    pub jail: String,
    pub action: Action,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub isp: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub failures: u32,
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

impl NotificationData {
    pub fn new(
        ip: impl Into<String>,
        jail: impl Into<String>,
        action: Action,
        failures: u32,
    ) -> Self {
        Self {
            ip: ip.into(),
            jail: jail.into(),
            action,
            time: Utc::now(),
            country: String::new(),
            region: String::new(),
            city: String::new(),
            isp: String::new(),
            hostname: String::new(),
            failures,
            timezone: String::new(),
            latitude: 0.0,
            longitude: 0.0,
        }
    }

    /// Canned event used when testing a connector interactively.
    pub fn sample() -> Self {
        Self {
            country: "Test Country".to_string(),
            region: "Test Region".to_string(),
            city: "Test City".to_string(),
            isp: "Test ISP".to_string(),
            hostname: "test.example.com".to_string(),
            ..Self::new("192.168.1.100", "test", Action::Ban, 5)
        }
    }

    /// Copies the location fields of a lookup result onto the event.
    pub fn with_geo(mut self, geo: &GeoInfo) -> Self {
        self.country = geo.country.clone();
        self.region = geo.region.clone();
        self.city = geo.city.clone();
        self.isp = geo.isp.clone();
        self.timezone = geo.timezone.clone();
        self.latitude = geo.latitude;
        self.longitude = geo.longitude;
        self
    }

    pub fn location_string(&self) -> String {
        if self.country.is_empty() {
            return String::new();
        }

        match (self.city.is_empty(), self.region.is_empty()) {
            (false, false) => format!("{}, {}, {}", self.city, self.region, self.country),
            (false, true) => format!("{}, {}", self.city, self.country),
            (true, false) => format!("{}, {}", self.region, self.country),
            (true, true) => self.country.clone(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.ip.is_empty() && !self.jail.is_empty()
    }

    pub fn is_ban(&self) -> bool {
        self.action == Action::Ban
    }

    pub fn is_unban(&self) -> bool {
        self.action == Action::Unban
    }

    pub fn to_json(&self) -> NotifierResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl fmt::Display for NotificationData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}ned in {}", self.ip, self.action, self.jail)
    }
}

/// Outcome of one connector's full retry sequence.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub connector_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub run_id: Uuid,
    pub total_connectors: usize,
    pub successful_count: usize,
    pub failed_count: usize,
    pub total_duration_ms: u64,
    pub results: Vec<ExecutionResult>,
    pub timestamp: DateTime<Utc>,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        self.failed_count == 0
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_connectors == 0 {
            return 0.0;
        }
        self.successful_count as f64 / self.total_connectors as f64 * 100.0
    }

    pub fn failed_connectors(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.connector_name.as_str())
            .collect()
    }
}

/// Anything that can fan a notification out to its delivery targets.
#[async_trait::async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, data: &NotificationData) -> NotifierResult<BatchResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let data = NotificationData::new("10.0.0.5", "sshd", Action::Ban, 3);
        let value: serde_json::Value = serde_json::from_str(&data.to_json().unwrap()).unwrap();

        assert_eq!(value["ip"], "10.0.0.5");
        assert_eq!(value["jail"], "sshd");
        assert_eq!(value["action"], "ban");
        assert_eq!(value["failures"], 3);
        assert!(value.get("hostname").is_none());
        assert!(value["time"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_zero_failures_omitted() {
        let data = NotificationData::new("10.0.0.5", "sshd", Action::Unban, 0);
        let value = serde_json::to_value(&data).unwrap();
        assert!(value.get("failures").is_none());
        assert_eq!(value["action"], "unban");
    }

    #[test]
    fn test_location_string() {
        let mut data = NotificationData::new("1.2.3.4", "sshd", Action::Ban, 1);
        assert_eq!(data.location_string(), "");

        data.country = "Germany".to_string();
        assert_eq!(data.location_string(), "Germany");

        data.region = "Bavaria".to_string();
        assert_eq!(data.location_string(), "Bavaria, Germany");

        data.city = "Munich".to_string();
        assert_eq!(data.location_string(), "Munich, Bavaria, Germany");

        data.region.clear();
        assert_eq!(data.location_string(), "Munich, Germany");
    }

    #[test]
    fn test_display_and_action_helpers() {
        let data = NotificationData::new("1.2.3.4", "sshd", Action::Unban, 0);
        assert_eq!(data.to_string(), "1.2.3.4 unbanned in sshd");
        assert!(data.is_unban());
        assert!(!data.is_ban());
        assert!(data.is_valid());
        assert!(!NotificationData::new("", "sshd", Action::Ban, 0).is_valid());
    }

    #[test]
    fn test_action_parse() {
        assert_eq!("ban".parse::<Action>().unwrap(), Action::Ban);
        assert_eq!("unban".parse::<Action>().unwrap(), Action::Unban);
        assert!("kick".parse::<Action>().is_err());
    }

    #[test]
    fn test_with_geo_copies_location() {
        let geo = GeoInfo {
            ip: "8.8.8.8".to_string(),
            country: "United States".to_string(),
            region: "California".to_string(),
            city: "Mountain View".to_string(),
            isp: "Google LLC".to_string(),
            timezone: "America/Los_Angeles".to_string(),
            latitude: 37.4,
            longitude: -122.1,
        };

        let data = NotificationData::new("8.8.8.8", "sshd", Action::Ban, 2).with_geo(&geo);
        assert_eq!(data.country, "United States");
        assert_eq!(data.timezone, "America/Los_Angeles");
        assert_eq!(data.latitude, 37.4);
        assert_eq!(data.hostname, "");
    }

    #[test]
    fn test_batch_result_helpers() {
        let now = Utc::now();
        let batch = BatchResult {
            run_id: Uuid::new_v4(),
            total_connectors: 2,
            successful_count: 1,
            failed_count: 1,
            total_duration_ms: 5,
            results: vec![
                ExecutionResult {
                    connector_name: "a".to_string(),
                    success: true,
                    error: None,
                    duration_ms: 1,
                    timestamp: now,
                    attempts: 1,
                },
                ExecutionResult {
                    connector_name: "b".to_string(),
                    success: false,
                    error: Some("nope".to_string()),
                    duration_ms: 4,
                    timestamp: now,
                    attempts: 3,
                },
            ],
            timestamp: now,
        };

        assert!(!batch.is_success());
        assert_eq!(batch.success_rate(), 50.0);
        assert_eq!(batch.failed_connectors(), vec!["b"]);
    }
}
