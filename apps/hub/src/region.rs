use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Geographic bucket used both for validator grouping and per-site
/// probe diversity. The set is fixed; validators that cannot be
/// placed anywhere land in the fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    UsEast,
    UsWest,
    Europe,
    India,
    AsiaPacific,
    SouthAmerica,
    /// Loopback / RFC 1918 addresses during local development.
    Dev,
}

/// Region chosen when neither text nor coordinates resolve anything.
pub const FALLBACK_REGION: Region = Region::UsEast;

impl Region {
    pub const ALL: [Region; 7] = [
        Region::UsEast,
        Region::UsWest,
        Region::Europe,
        Region::India,
        Region::AsiaPacific,
        Region::SouthAmerica,
        Region::Dev,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::UsEast => "us_east",
            Region::UsWest => "us_west",
            Region::Europe => "europe",
            Region::India => "india",
            Region::AsiaPacific => "asia_pacific",
            Region::SouthAmerica => "south_america",
            Region::Dev => "dev",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "us_east" => Ok(Region::UsEast),
            "us_west" => Ok(Region::UsWest),
            "europe" => Ok(Region::Europe),
            "india" => Ok(Region::India),
            "asia_pacific" => Ok(Region::AsiaPacific),
            "south_america" => Ok(Region::SouthAmerica),
            "dev" => Ok(Region::Dev),
            other => anyhow::bail!("unknown region: {other}"),
        }
    }
}

/// Keyword table checked before any coordinate math. More specific
/// entries come first: "us west" must win before a generic
/// "united states" match sends the text to the east coast.
const KEYWORDS: &[(&str, Region)] = &[
    ("india", Region::India),
    ("mumbai", Region::India),
    ("delhi", Region::India),
    ("bangalore", Region::India),
    ("chennai", Region::India),
    ("hyderabad", Region::India),
    ("us west", Region::UsWest),
    ("us-west", Region::UsWest),
    ("california", Region::UsWest),
    ("oregon", Region::UsWest),
    ("san francisco", Region::UsWest),
    ("los angeles", Region::UsWest),
    ("seattle", Region::UsWest),
    ("us east", Region::UsEast),
    ("us-east", Region::UsEast),
    ("virginia", Region::UsEast),
    ("new york", Region::UsEast),
    ("ohio", Region::UsEast),
    ("miami", Region::UsEast),
    ("europe", Region::Europe),
    ("london", Region::Europe),
    ("frankfurt", Region::Europe),
    ("paris", Region::Europe),
    ("amsterdam", Region::Europe),
    ("germany", Region::Europe),
    ("france", Region::Europe),
    ("united kingdom", Region::Europe),
    ("netherlands", Region::Europe),
    ("ireland", Region::Europe),
    ("singapore", Region::AsiaPacific),
    ("tokyo", Region::AsiaPacific),
    ("japan", Region::AsiaPacific),
    ("sydney", Region::AsiaPacific),
    ("australia", Region::AsiaPacific),
    ("hong kong", Region::AsiaPacific),
    ("seoul", Region::AsiaPacific),
    ("korea", Region::AsiaPacific),
    ("brazil", Region::SouthAmerica),
    ("sao paulo", Region::SouthAmerica),
    ("são paulo", Region::SouthAmerica),
    ("argentina", Region::SouthAmerica),
    ("chile", Region::SouthAmerica),
    ("colombia", Region::SouthAmerica),
    ("south america", Region::SouthAmerica),
    ("united states", Region::UsEast),
    ("usa", Region::UsEast),
];

struct RegionBox {
    region: Region,
    min_lat: f64,
    max_lat: f64,
    min_lng: f64,
    max_lng: f64,
    center: (f64, f64),
}

/// Bounding rectangles with a representative datacenter city as the
/// center point. Iteration order is fixed, which makes containment
/// ties deterministic.
const REGION_BOXES: &[RegionBox] = &[
    RegionBox {
        region: Region::UsEast,
        min_lat: 24.0,
        max_lat: 50.0,
        min_lng: -90.0,
        max_lng: -60.0,
        center: (38.9, -77.5), // Ashburn
    },
    RegionBox {
        region: Region::UsWest,
        min_lat: 31.0,
        max_lat: 49.0,
        min_lng: -125.0,
        max_lng: -102.0,
        center: (37.4, -122.1), // Bay Area
    },
    RegionBox {
        region: Region::Europe,
        min_lat: 35.0,
        max_lat: 71.0,
        min_lng: -10.0,
        max_lng: 40.0,
        center: (50.1, 8.7), // Frankfurt
    },
    RegionBox {
        region: Region::India,
        min_lat: 6.0,
        max_lat: 36.0,
        min_lng: 68.0,
        max_lng: 97.0,
        center: (19.1, 72.9), // Mumbai
    },
    RegionBox {
        region: Region::AsiaPacific,
        min_lat: -47.0,
        max_lat: 46.0,
        min_lng: 97.5,
        max_lng: 180.0,
        center: (1.35, 103.8), // Singapore
    },
    RegionBox {
        region: Region::SouthAmerica,
        min_lat: -56.0,
        max_lat: 13.0,
        min_lng: -82.0,
        max_lng: -34.0,
        center: (-23.5, -46.6), // São Paulo
    },
];

impl RegionBox {
    fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lng >= self.min_lng && lng <= self.max_lng
    }
}

/// Map a free-text location and/or coordinates to a region.
///
/// Resolution order: keyword substring match, bounding-box
/// containment, nearest region center by great-circle distance, fixed
/// fallback. Pure and deterministic.
pub fn classify(text: &str, lat: Option<f64>, lng: Option<f64>) -> Region {
    let lowered = text.to_lowercase();
    if !lowered.is_empty() {
        for (keyword, region) in KEYWORDS {
            if lowered.contains(keyword) {
                return *region;
            }
        }
    }

    if let (Some(lat), Some(lng)) = (lat, lng) {
        for bbox in REGION_BOXES {
            if bbox.contains(lat, lng) {
                return bbox.region;
            }
        }

        // Not inside any box: nearest center wins. min_by on a fixed
        // array keeps equidistant points deterministic.
        if let Some(nearest) = REGION_BOXES.iter().min_by(|a, b| {
            let da = haversine_km((lat, lng), a.center);
            let db = haversine_km((lat, lng), b.center);
            da.total_cmp(&db)
        }) {
            return nearest.region;
        }
    }

    tracing::warn!(text, "could not resolve region, using fallback {FALLBACK_REGION}");
    FALLBACK_REGION
}

/// Great-circle distance in kilometers between two (lat, lng) points.
fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;

    let (lat1, lng1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lng2) = (b.0.to_radians(), b.1.to_radians());

    let dlat = lat2 - lat1;
    let dlng = lng2 - lng1;

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Loopback and RFC 1918 ranges short-circuit to [`Region::Dev`]
/// before any geo lookup is attempted.
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            v4.is_loopback()
                || octets[0] == 10
                || (octets[0] == 172 && (16..=31).contains(&octets[1]))
                || (octets[0] == 192 && octets[1] == 168)
        }
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}
