//! GeoIP backends.

use crate::core::{
    error::{NotifierError, NotifierResult},
    geoip::{GeoInfo, GeoService},
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Request timeout for every provider, independent of connector timeouts.
const LOOKUP_TIMEOUT_SECS: u64 = 10;

pub const IPAPI_BASE_URL: &str = "http://ip-api.com";
pub const IPGEOLOCATION_BASE_URL: &str = "https://api.ipgeolocation.io";

fn lookup_client() -> NotifierResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(LOOKUP_TIMEOUT_SECS))
        .build()
        .map_err(|e| NotifierError::HttpClient(e.to_string()))
}

fn request_failed(e: reqwest::Error) -> NotifierError {
    NotifierError::GeoLookupFailed(format!("HTTP request failed: {}", e))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    region_name: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    isp: String,
    #[serde(default)]
    timezone: String,
    #[serde(default)]
    lat: f64,
    #[serde(default)]
    lon: f64,
}

/// The free ip-api.com JSON endpoint.
pub struct IpApiService {
    client: Client,
    base_url: String,
}

impl IpApiService {
    pub fn new() -> NotifierResult<Self> {
        Self::with_base_url(IPAPI_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> NotifierResult<Self> {
        Ok(Self {
            client: lookup_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl GeoService for IpApiService {
    async fn lookup(&self, ip: &str) -> NotifierResult<GeoInfo> {
        let url = format!("{}/json/{}", self.base_url, ip);

        let response = self
            .client
            .get(&url)
            .query(&[(
                "fields",
                "status,message,country,regionName,city,isp,timezone,lat,lon",
            )])
            .send()
            .await
            .map_err(request_failed)?;

        if response.status() != StatusCode::OK {
            return Err(NotifierError::GeoLookupFailed(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let result: IpApiResponse = response.json().await.map_err(|e| {
            NotifierError::GeoLookupFailed(format!("failed to parse JSON: {}", e))
        })?;

        if result.status != "success" {
            return Err(NotifierError::GeoLookupFailed(format!(
                "API returned status: {} {}",
                result.status, result.message
            )));
        }

        Ok(GeoInfo {
            ip: ip.to_string(),
            country: result.country,
            region: result.region_name,
            city: result.city,
            isp: result.isp,
            timezone: result.timezone,
            latitude: result.lat,
            longitude: result.lon,
        })
    }

    fn name(&self) -> &str {
        "ip-api.com"
    }
}

/// Coordinates usually come back as strings from this API.
fn coordinate(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// `time_zone` is an object with a `name`, older responses send a bare string.
fn time_zone_name(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

#[derive(Debug, Deserialize)]
struct IpGeolocationResponse {
    #[serde(default)]
    country_name: String,
    #[serde(default)]
    state_prov: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    isp: String,
    #[serde(default)]
    time_zone: Value,
    #[serde(default)]
    latitude: Value,
    #[serde(default)]
    longitude: Value,
    #[serde(default)]
    message: String,
}

/// The keyed ipgeolocation.io API.
pub struct IpGeolocationService {
    client: Client,
    base_url: String,
    api_key: String,
}

impl IpGeolocationService {
    pub fn new(api_key: impl Into<String>) -> NotifierResult<Self> {
        Self::with_base_url(IPGEOLOCATION_BASE_URL, api_key)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> NotifierResult<Self> {
        Ok(Self {
            client: lookup_client()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl GeoService for IpGeolocationService {
    async fn lookup(&self, ip: &str) -> NotifierResult<GeoInfo> {
        let url = format!("{}/ipgeo", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("apiKey", self.api_key.as_str()), ("ip", ip)])
            .send()
            .await
            .map_err(request_failed)?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifierError::GeoLookupFailed(format!(
                "HTTP error: {} {}",
                status, body
            )));
        }

        let result: IpGeolocationResponse = response.json().await.map_err(|e| {
            NotifierError::GeoLookupFailed(format!("failed to parse JSON: {}", e))
        })?;

        if !result.message.is_empty() {
            return Err(NotifierError::GeoLookupFailed(format!(
                "API error: {}",
                result.message
            )));
        }

        Ok(GeoInfo {
            ip: ip.to_string(),
            country: result.country_name,
            region: result.state_prov,
            city: result.city,
            isp: result.isp,
            timezone: time_zone_name(&result.time_zone),
            latitude: coordinate(&result.latitude),
            longitude: coordinate(&result.longitude),
        })
    }

    fn name(&self) -> &str {
        "ipgeolocation.io"
    }
}
