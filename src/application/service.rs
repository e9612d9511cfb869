use crate::core::{
    error::{NotifierError, NotifierResult},
    notification::{Action, BatchResult, NotificationData, NotificationDispatcher},
};
use crate::infrastructure::geoip::GeoManager;
use log::{info, warn};
use std::sync::Arc;

/// Turns one fail2ban event into a notification and hands it to the
/// connectors.
pub struct NotifierService {
    geo: Arc<GeoManager>,
    dispatcher: Box<dyn NotificationDispatcher>,
}

impl NotifierService {
    pub fn new(geo: Arc<GeoManager>, dispatcher: Box<dyn NotificationDispatcher>) -> Self {
        Self { geo, dispatcher }
    }

    /// Builds the notification for an event, enriched with GeoIP data.
    /// A failed lookup leaves the location fields empty.
    pub async fn build_notification(
        &self,
        ip: &str,
        jail: &str,
        action: Action,
        failures: u32,
    ) -> NotifierResult<NotificationData> {
        let data = NotificationData::new(ip, jail, action, failures);
        if !data.is_valid() {
            return Err(NotifierError::ConfigError(
                "ip and jail must not be empty".to_string(),
            ));
        }

        match self.geo.lookup(ip).await {
            Ok(geo) => Ok(data.with_geo(&geo)),
            Err(NotifierError::InvalidIp(ip)) => Err(NotifierError::InvalidIp(ip)),
            Err(e) => {
                warn!("GeoIP lookup failed for {}: {}", ip, e);
                Ok(data)
            }
        }
    }

    /// Notifies every enabled connector. Having none enabled is logged and
    /// reported as `Ok(None)`.
    pub async fn notify(
        &self,
        ip: &str,
        jail: &str,
        action: Action,
        failures: u32,
    ) -> NotifierResult<Option<BatchResult>> {
        let data = self.build_notification(ip, jail, action, failures).await?;
        info!("Processing notification: {}", data);

        match self.dispatcher.dispatch(&data).await {
            Ok(batch) => Ok(Some(batch)),
            Err(NotifierError::NoConnectorsEnabled) => {
                warn!("No enabled connectors, notification for {} dropped", data.ip);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
