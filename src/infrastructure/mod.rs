pub mod discovery;
pub mod executor;
pub mod geoip;
pub mod process;
pub mod webhook;
