pub mod connector;
pub mod error;
pub mod geoip;
pub mod notification;
