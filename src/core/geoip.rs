use crate::core::error::NotifierResult;
use serde::{Deserialize, Serialize};

pub const PRIVATE_NETWORK: &str = "Private Network";

/// Location data for one address. Empty strings and zero coordinates mean
/// "unknown".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoInfo {
    pub ip: String,
    pub country: String,
    pub region: String,
    pub city: String,
    pub isp: String,
    pub timezone: String,
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
}

impl GeoInfo {
    /// Info carrying nothing but the address, used whenever a lookup is
    /// skipped or fails.
    pub fn ip_only(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            ..Self::default()
        }
    }

    pub fn private(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            country: PRIVATE_NETWORK.to_string(),
            region: "Local".to_string(),
            city: "Internal".to_string(),
            isp: "Private".to_string(),
            ..Self::default()
        }
    }
}

/// A geolocation backend.
#[async_trait::async_trait]
pub trait GeoService: Send + Sync {
    async fn lookup(&self, ip: &str) -> NotifierResult<GeoInfo>;

    fn name(&self) -> &str;
}
