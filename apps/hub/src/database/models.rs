use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::region::Region;

/// Rolling status of a monitored site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    Online,
    Degraded,
    Offline,
    Unknown,
}

impl std::fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SiteStatus::Online => write!(f, "online"),
            SiteStatus::Degraded => write!(f, "degraded"),
            SiteStatus::Offline => write!(f, "offline"),
            SiteStatus::Unknown => write!(f, "unknown"),
        }
    }
}

impl SiteStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "online" => SiteStatus::Online,
            "degraded" => SiteStatus::Degraded,
            "offline" => SiteStatus::Offline,
            _ => SiteStatus::Unknown,
        }
    }
}

/// Rollup granularity for `uptime_history` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollupPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl RollupPeriod {
    pub const ALL: [RollupPeriod; 3] =
        [RollupPeriod::Daily, RollupPeriod::Weekly, RollupPeriod::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            RollupPeriod::Daily => "daily",
            RollupPeriod::Weekly => "weekly",
            RollupPeriod::Monthly => "monthly",
        }
    }
}

/// A monitored site. Rolling fields are mutated only by the result
/// aggregator after a verified probe reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Website {
    pub id: Uuid,
    pub url: String,
    pub owner_id: String,
    pub check_frequency_seconds: u64,
    pub preferred_region: Option<Region>,
    pub paused: bool,
    pub status: SiteStatus,
    pub uptime_percentage: f64,
    pub average_response_ms: f64,
    /// Set when the site transitions into ONLINE from a non-ONLINE
    /// state, cleared on a transition into OFFLINE.
    pub up_since: Option<SystemTime>,
    pub last_checked_at: Option<SystemTime>,
    pub created_at: SystemTime,
}

impl Website {
    pub fn new(url: String, owner_id: String, check_frequency_seconds: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            url,
            owner_id,
            check_frequency_seconds,
            preferred_region: None,
            paused: false,
            status: SiteStatus::Unknown,
            uptime_percentage: 0.0,
            average_response_ms: 0.0,
            up_since: None,
            last_checked_at: None,
            created_at: SystemTime::now(),
        }
    }
}

/// Durable identity of a probe agent, keyed by its base58 Ed25519
/// public key. Geo fields are refreshed on every signup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validator {
    pub id: Uuid,
    pub public_key: String,
    pub ip: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub region: Region,
    pub is_active: bool,
    /// Accrued reward in lamports. Only ever incremented here; the
    /// external settlement process resets it.
    pub pending_payouts: i64,
    pub processing_payout: bool,
    pub first_seen_at: SystemTime,
    pub last_seen_at: SystemTime,
}

/// Per-phase timing breakdown of a completed probe, milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TickTimings {
    pub name_lookup_ms: u64,
    pub connection_ms: u64,
    pub tls_handshake_ms: u64,
    pub ttfb_ms: u64,
    pub data_transfer_ms: u64,
    pub total_ms: u64,
}

/// One immutable probe-result fact. Inserted exactly once per
/// verified reply, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebsiteTick {
    pub id: Option<i64>,
    pub website_id: Uuid,
    pub validator_id: Uuid,
    pub region: Region,
    pub status: SiteStatus,
    /// None when the probe failed before timing anything.
    pub timings: Option<TickTimings>,
    pub error: Option<String>,
    pub created_at: SystemTime,
}

/// One aggregated row per (site, period kind, period start),
/// recomputed idempotently on every applied tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalUptime {
    pub website_id: Uuid,
    pub period: RollupPeriod,
    pub period_start: SystemTime,
    pub period_end: SystemTime,
    pub uptime_percentage: f64,
    pub average_response_ms: f64,
    pub incident_count: i64,
    pub downtime_seconds: i64,
}

/// Convert SystemTime to a Unix timestamp column value.
pub fn timestamp_to_i64(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Convert a Unix timestamp column value back to SystemTime.
pub fn i64_to_timestamp(timestamp: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(timestamp.max(0) as u64)
}
