//! Pure result-aggregation math.
//!
//! Everything here is deterministic and side-effect free: status
//! classification, the 24h rolling-window recompute, `up_since`
//! transition rules, and rollup period arithmetic. The repository
//! runs these inside a single transaction per verified probe reply.

use std::time::{Duration, SystemTime};

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use uuid::Uuid;

use crate::database::models::{SiteStatus, TickTimings};
use crate::region::Region;

/// Tunables for the aggregation step, sourced from config.
#[derive(Debug, Clone, Copy)]
pub struct AggregateSettings {
    /// A reply slower than this is DEGRADED rather than ONLINE.
    pub degraded_threshold_ms: u64,
    /// Rolling lookback window for `uptime_percentage`.
    pub window: Duration,
    /// Lamports credited to the reporting validator per applied tick.
    pub lamports_per_validation: i64,
}

impl Default for AggregateSettings {
    fn default() -> Self {
        Self {
            degraded_threshold_ms: 1000,
            window: Duration::from_secs(24 * 3600),
            lamports_per_validation: 100,
        }
    }
}

/// A verified probe reply, ready to be folded into durable state.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub website_id: Uuid,
    pub validator_id: Uuid,
    pub region: Region,
    /// None when the probe failed before timing anything.
    pub timings: Option<TickTimings>,
    pub error: Option<String>,
    pub observed_at: SystemTime,
}

impl ProbeOutcome {
    pub fn total_ms(&self) -> Option<u64> {
        self.timings.map(|t| t.total_ms)
    }
}

/// Classify a probe outcome: any error means OFFLINE, a slow total
/// means DEGRADED, everything else is ONLINE.
pub fn classify_status(outcome: &ProbeOutcome, degraded_threshold_ms: u64) -> SiteStatus {
    if outcome.error.is_some() {
        return SiteStatus::Offline;
    }
    match outcome.total_ms() {
        Some(total) if total > degraded_threshold_ms => SiteStatus::Degraded,
        _ => SiteStatus::Online,
    }
}

/// Recomputed rolling fields for a site.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub uptime_percentage: f64,
    pub average_response_ms: f64,
}

/// Fold the prior window ticks plus the new observation into fresh
/// rolling stats. `prior` carries (status, total_ms) per tick; the
/// new observation is always counted.
pub fn recompute_window(
    prior: &[(SiteStatus, Option<u64>)],
    new_status: SiteStatus,
    new_total_ms: Option<u64>,
) -> WindowStats {
    let total = prior.len() as u64 + 1;
    let online = prior.iter().filter(|(status, _)| *status == SiteStatus::Online).count() as u64
        + u64::from(new_status == SiteStatus::Online);

    let timed: Vec<u64> =
        prior.iter().filter_map(|(_, ms)| *ms).chain(new_total_ms).collect();
    let average_response_ms = if timed.is_empty() {
        0.0
    } else {
        timed.iter().sum::<u64>() as f64 / timed.len() as f64
    };

    WindowStats { uptime_percentage: online as f64 / total as f64 * 100.0, average_response_ms }
}

/// `up_since` transition rules: set on entering ONLINE from a
/// non-ONLINE state, cleared on entering OFFLINE, otherwise kept.
pub fn next_up_since(
    prev: Option<SystemTime>,
    status: SiteStatus,
    now: SystemTime,
) -> Option<SystemTime> {
    match (prev, status) {
        (None, SiteStatus::Online) => Some(now),
        (Some(_), SiteStatus::Offline) => None,
        (prev, _) => prev,
    }
}

/// Half-open `[start, end)` bounds of the rollup period containing
/// `now`, in UTC. Daily starts at midnight, weekly on Monday, monthly
/// on the first of the month.
pub fn period_bounds(
    period: crate::database::models::RollupPeriod,
    now: SystemTime,
) -> (SystemTime, SystemTime) {
    use crate::database::models::RollupPeriod;

    let day = DateTime::<Utc>::from(now).date_naive();
    let (start, end) = match period {
        RollupPeriod::Daily => (day, day + Days::new(1)),
        RollupPeriod::Weekly => {
            let monday = day - Days::new(day.weekday().num_days_from_monday() as u64);
            (monday, monday + Days::new(7))
        }
        RollupPeriod::Monthly => {
            let first = day.with_day(1).unwrap_or(day);
            let next = if first.month() == 12 {
                NaiveDate::from_ymd_opt(first.year() + 1, 1, 1).unwrap_or(first)
            } else {
                NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1).unwrap_or(first)
            };
            (first, next)
        }
    };

    (date_to_system_time(start), date_to_system_time(end))
}

fn date_to_system_time(date: NaiveDate) -> SystemTime {
    let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    SystemTime::from(DateTime::<Utc>::from_naive_utc_and_offset(midnight, Utc))
}

/// Aggregates for one rollup row, computed over the period's ticks in
/// chronological order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RollupStats {
    pub uptime_percentage: f64,
    pub average_response_ms: f64,
    /// Transitions into OFFLINE within the period; a period that
    /// opens offline counts that run as one incident.
    pub incident_count: i64,
    /// Offline tick count scaled by the site's check frequency -
    /// ticks are the only sampling signal available.
    pub downtime_seconds: i64,
}

pub fn compute_rollup(
    ticks: &[(SiteStatus, Option<u64>)],
    check_frequency_seconds: u64,
) -> Option<RollupStats> {
    if ticks.is_empty() {
        return None;
    }

    let online = ticks.iter().filter(|(status, _)| *status == SiteStatus::Online).count();
    let offline = ticks.iter().filter(|(status, _)| *status == SiteStatus::Offline).count();

    let timed: Vec<u64> = ticks.iter().filter_map(|(_, ms)| *ms).collect();
    let average_response_ms = if timed.is_empty() {
        0.0
    } else {
        timed.iter().sum::<u64>() as f64 / timed.len() as f64
    };

    let mut incident_count = 0i64;
    let mut prev_offline = false;
    for (status, _) in ticks {
        let is_offline = *status == SiteStatus::Offline;
        if is_offline && !prev_offline {
            incident_count += 1;
        }
        prev_offline = is_offline;
    }

    Some(RollupStats {
        uptime_percentage: online as f64 / ticks.len() as f64 * 100.0,
        average_response_ms,
        incident_count,
        downtime_seconds: offline as i64 * check_frequency_seconds as i64,
    })
}
