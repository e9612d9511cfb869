//! Fans fail2ban ban/unban events out to pluggable notification connectors,
//! optionally enriching them with GeoIP data first.

pub mod application;
pub mod core;
pub mod infrastructure;
pub mod interfaces;

pub use crate::application::config::{Config, GeoIpConfig};
pub use crate::application::service::NotifierService;
pub use crate::core::connector::{ConnectorKind, ConnectorSpec, ConnectorStatus, StatusKind};
pub use crate::core::error::{NotifierError, NotifierResult};
pub use crate::core::geoip::GeoInfo;
pub use crate::core::notification::{Action, BatchResult, ExecutionResult, NotificationData};
pub use crate::infrastructure::executor::ConnectorManager;
pub use crate::infrastructure::geoip::GeoManager;
