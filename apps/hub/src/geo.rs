//! IP geolocation for validator signups.
//!
//! Primary provider is ip-api.com with ipwho.is as fallback. Lookups
//! are best-effort: a validator whose address cannot be located still
//! connects, it just lands in the fallback region.

use std::net::IpAddr;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

/// What the providers told us about an address. All fields optional;
/// an unreachable provider yields `GeoInfo::unknown()`.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoInfo {
    pub country: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl GeoInfo {
    pub fn unknown() -> Self {
        Self { country: None, city: None, latitude: None, longitude: None }
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::unknown()
    }
}

/// Response from ip-api.com geolocation service
#[derive(Debug, Deserialize)]
struct IpApiResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    city: String,
    lat: Option<f64>,
    lon: Option<f64>,
}

/// Response from ipwho.is (fallback provider)
#[derive(Debug, Deserialize)]
struct IpWhoResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    country: String,
    #[serde(default)]
    city: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

pub struct GeoLookup {
    client: reqwest::Client,
}

impl GeoLookup {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Locate an address. Never fails hard: provider errors degrade to
    /// `GeoInfo::unknown()` with a warning.
    pub async fn lookup(&self, ip: IpAddr) -> GeoInfo {
        match self.from_ip_api(ip).await {
            Ok(info) if !info.is_unknown() => return info,
            Ok(_) => {}
            Err(e) => tracing::warn!("ip-api lookup for {} failed: {}", ip, e),
        }

        match self.from_ipwho(ip).await {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("ipwho.is lookup for {} failed: {}", ip, e);
                GeoInfo::unknown()
            }
        }
    }

    async fn from_ip_api(&self, ip: IpAddr) -> Result<GeoInfo> {
        // Free tier, no API key, 45 requests/minute.
        let url = format!("http://ip-api.com/json/{ip}?fields=status,country,city,lat,lon");
        let response = self.client.get(&url).send().await?.json::<IpApiResponse>().await?;

        if response.status != "success" {
            return Ok(GeoInfo::unknown());
        }

        Ok(GeoInfo {
            country: non_empty(response.country),
            city: non_empty(response.city),
            latitude: response.lat,
            longitude: response.lon,
        })
    }

    async fn from_ipwho(&self, ip: IpAddr) -> Result<GeoInfo> {
        let url = format!("https://ipwho.is/{ip}");
        let response = self.client.get(&url).send().await?.json::<IpWhoResponse>().await?;

        if !response.success {
            return Ok(GeoInfo::unknown());
        }

        Ok(GeoInfo {
            country: non_empty(response.country),
            city: non_empty(response.city),
            latitude: response.latitude,
            longitude: response.longitude,
        })
    }
}

impl Default for GeoLookup {
    fn default() -> Self {
        Self::new()
    }
}
