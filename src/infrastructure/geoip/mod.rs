//! GeoIP lookups with private-range short-circuiting and a TTL cache.

pub mod cache;
pub mod providers;

use crate::application::config::{GeoIpConfig, GEOIP_SERVICE_IPAPI, GEOIP_SERVICE_IPGEOLOCATION};
use crate::core::{
    error::{NotifierError, NotifierResult},
    geoip::{GeoInfo, GeoService},
};
use cache::GeoCache;
use log::{debug, warn};
use providers::{IpApiService, IpGeolocationService};
use serde::Serialize;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// In-flight lookups allowed during a batch.
pub const BATCH_CONCURRENCY: usize = 5;

/// Address probed by [`GeoManager::validate_service`].
const PROBE_IP: &str = "8.8.8.8";

fn is_private_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        // fe80::/10 link-local
        || first & 0xffc0 == 0xfe80
        // fc00::/7 unique local
        || first & 0xfe00 == 0xfc00
}

/// Loopback, RFC1918 and link-local IPv4; loopback, link-local and unique
/// local IPv6. IPv4-mapped IPv6 addresses are judged by their IPv4 part.
pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_private_ip(&IpAddr::V4(v4)),
            None => is_private_v6(v6),
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub ttl_seconds: u64,
    pub service: String,
}

pub struct GeoManager {
    config: GeoIpConfig,
    cache: GeoCache,
    services: HashMap<String, Arc<dyn GeoService>>,
}

impl GeoManager {
    /// Registers ip-api.com, plus ipgeolocation.io when an API key is set.
    pub fn new(config: GeoIpConfig) -> NotifierResult<Self> {
        let mut manager = Self::without_services(config);
        manager.register_service(GEOIP_SERVICE_IPAPI, Arc::new(IpApiService::new()?));
        if let Some(key) = manager.config.api_key.clone().filter(|k| !k.is_empty()) {
            manager.register_service(
                GEOIP_SERVICE_IPGEOLOCATION,
                Arc::new(IpGeolocationService::new(key)?),
            );
        }
        Ok(manager)
    }

    pub fn without_services(config: GeoIpConfig) -> Self {
        Self {
            cache: GeoCache::new(Duration::from_secs(config.ttl)),
            config,
            services: HashMap::new(),
        }
    }

    pub fn register_service(&mut self, name: impl Into<String>, service: Arc<dyn GeoService>) {
        self.services.insert(name.into(), service);
    }

    /// Resolves `ip` to location data. Backend failures are logged and
    /// answered with IP-only info; only a malformed address or an
    /// unregistered service is reported as an error.
    pub async fn lookup(&self, ip: &str) -> NotifierResult<GeoInfo> {
        if !self.config.enabled {
            return Ok(GeoInfo::ip_only(ip));
        }

        let addr: IpAddr = ip
            .parse()
            .map_err(|_| NotifierError::InvalidIp(ip.to_string()))?;

        if is_private_ip(&addr) {
            return Ok(GeoInfo::private(ip));
        }

        if self.config.cache {
            if let Some(info) = self.cache.get(ip) {
                debug!("GeoIP cache hit for {}", ip);
                return Ok(info);
            }
        }

        let service = self
            .services
            .get(&self.config.service)
            .ok_or_else(|| NotifierError::UnknownGeoService(self.config.service.clone()))?;

        let info = match service.lookup(ip).await {
            Ok(info) => info,
            Err(e) => {
                warn!("GeoIP lookup failed for {} via {}: {}", ip, service.name(), e);
                return Ok(GeoInfo::ip_only(ip));
            }
        };

        debug!("GeoIP lookup via {}: {} -> {}", service.name(), ip, info.country);
        if self.config.cache {
            self.cache.insert(ip, info.clone());
        }

        Ok(info)
    }

    /// Looks up every distinct address with at most [`BATCH_CONCURRENCY`]
    /// requests in flight. Every input address appears in the result; failed
    /// lookups map to IP-only info.
    pub async fn batch_lookup(self: &Arc<Self>, ips: &[String]) -> HashMap<String, GeoInfo> {
        let semaphore = Arc::new(Semaphore::new(BATCH_CONCURRENCY));
        let mut tasks = JoinSet::new();

        let mut results = HashMap::with_capacity(ips.len());
        for ip in ips {
            if results.contains_key(ip) {
                continue;
            }
            results.insert(ip.clone(), GeoInfo::ip_only(ip.as_str()));

            let manager = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let ip = ip.clone();
            tasks.spawn(async move {
                let info = match semaphore.acquire_owned().await {
                    Ok(_permit) => manager.lookup(&ip).await,
                    Err(_) => Ok(GeoInfo::ip_only(ip.as_str())),
                };
                (ip, info)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((ip, Ok(info))) => {
                    results.insert(ip, info);
                }
                Ok((ip, Err(e))) => debug!("GeoIP lookup for {} failed: {}", ip, e),
                Err(e) => warn!("GeoIP lookup task failed: {}", e),
            }
        }

        results
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            enabled: self.config.cache,
            entries: self.cache.len(),
            ttl_seconds: self.cache.ttl().as_secs(),
            service: self.config.service.clone(),
        }
    }

    pub fn available_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.keys().cloned().collect();
        names.sort();
        names
    }

    /// Probes a registered service with a well-known public address.
    pub async fn validate_service(&self, name: &str) -> NotifierResult<()> {
        let service = self
            .services
            .get(name)
            .ok_or_else(|| NotifierError::UnknownGeoService(name.to_string()))?;

        service.lookup(PROBE_IP).await.map(|_| ()).map_err(|e| {
            NotifierError::GeoLookupFailed(format!("service validation failed: {}", e))
        })
    }
}
