use crate::core::{
    connector::{ConnectorSpec, HEADER_PREFIX, URL_SETTING},
    error::{NotifierError, NotifierResult},
};
use log::debug;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::Client;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const USER_AGENT_VALUE: &str = "fail2ban-notify/2.0";

/// Where and how an http connector posts the event.
#[derive(Debug, Clone)]
pub struct WebhookTarget {
    url: String,
    headers: HeaderMap,
}

impl WebhookTarget {
    pub fn for_connector(spec: &ConnectorSpec) -> NotifierResult<Self> {
        let url = spec
            .url()
            .ok_or_else(|| NotifierError::MissingSetting {
                connector: spec.name.clone(),
                key: URL_SETTING.to_string(),
            })?
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON));
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        for (name, value) in spec.headers() {
            let invalid = |reason: String| NotifierError::InvalidSetting {
                connector: spec.name.clone(),
                key: format!("{}{}", HEADER_PREFIX, name),
                reason,
            };
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
            let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
            headers.insert(header_name, header_value);
        }

        Ok(Self { url, headers })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// POSTs `payload` once. Any status of 400 or above counts as a failure
    /// and carries the response body.
    pub async fn send(
        &self,
        client: &Client,
        spec: &ConnectorSpec,
        payload: Vec<u8>,
    ) -> NotifierResult<()> {
        let response = client
            .post(&self.url)
            .headers(self.headers.clone())
            .timeout(spec.timeout())
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotifierError::Timeout {
                        connector: spec.name.clone(),
                        timeout: spec.timeout(),
                    }
                } else {
                    NotifierError::HttpRequestFailed {
                        connector: spec.name.clone(),
                        status: None,
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        debug!("HTTP connector {} response: {} {}", spec.name, status, body);

        if status.as_u16() >= 400 {
            return Err(NotifierError::HttpRequestFailed {
                connector: spec.name.clone(),
                status: Some(status.as_u16()),
                message: format!("status {}: {}", status, body),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connector::ConnectorKind;

    #[test]
    fn test_missing_url() {
        let spec = ConnectorSpec::new("hook", ConnectorKind::Http);
        assert!(matches!(
            WebhookTarget::for_connector(&spec),
            Err(NotifierError::MissingSetting { key, .. }) if key == "url"
        ));
    }

    #[test]
    fn test_default_and_custom_headers() {
        let spec = ConnectorSpec::new("hook", ConnectorKind::Http)
            .with_setting("url", "http://localhost/hook")
            .with_setting("header_Authorization", "Bearer secret")
            .with_setting("header_User-Agent", "custom/1.0");

        let target = WebhookTarget::for_connector(&spec).unwrap();
        assert_eq!(target.url(), "http://localhost/hook");
        assert_eq!(target.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(target.headers()["authorization"], "Bearer secret");
        assert_eq!(target.headers()[USER_AGENT], "custom/1.0");
    }

    #[test]
    fn test_invalid_header_name() {
        let spec = ConnectorSpec::new("hook", ConnectorKind::Http)
            .with_setting("url", "http://localhost/hook")
            .with_setting("header_Bad Header", "x");

        assert!(matches!(
            WebhookTarget::for_connector(&spec),
            Err(NotifierError::InvalidSetting { key, .. }) if key == "header_Bad Header"
        ));
    }
}
