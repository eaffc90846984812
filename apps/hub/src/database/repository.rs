use std::time::SystemTime;

use anyhow::{Result, bail};
use async_trait::async_trait;
use libsql::{Connection, Row, params};
use uuid::Uuid;

use super::models::{
    HistoricalUptime, RollupPeriod, SiteStatus, TickTimings, Validator, Website, WebsiteTick,
    i64_to_timestamp, timestamp_to_i64,
};
use crate::aggregate::{
    AggregateSettings, ProbeOutcome, WindowStats, classify_status, compute_rollup, next_up_since,
    period_bounds, recompute_window,
};
use crate::pool::DbPool;
use crate::region::Region;

/// Summary of one applied aggregation, for logging.
#[derive(Debug, Clone, Copy)]
pub struct AppliedProbe {
    pub status: SiteStatus,
    pub window: WindowStats,
}

/// Database trait for abstracting persistence operations.
#[async_trait]
pub trait Database: Send + Sync {
    /// All non-paused monitored sites.
    async fn active_websites(&self) -> Result<Vec<Website>>;

    async fn website_by_id(&self, id: Uuid) -> Result<Option<Website>>;

    /// Insert or replace a site row. Site CRUD is owned by the
    /// dashboard; the hub uses this for seeding and tests.
    async fn save_website(&self, website: &Website) -> Result<()>;

    async fn validator_by_public_key(&self, public_key: &str) -> Result<Option<Validator>>;

    async fn validator_by_id(&self, id: Uuid) -> Result<Option<Validator>>;

    /// Resolve-or-create by public key: existing rows get their geo
    /// fields refreshed and are marked active, unknown keys create a
    /// fresh identity.
    async fn upsert_validator(&self, validator: &Validator) -> Result<()>;

    async fn mark_validator_inactive(&self, id: Uuid) -> Result<()>;

    /// Ticks for a site newer than `since`, most recent first.
    async fn ticks_for_website(&self, website_id: Uuid, since: SystemTime)
    -> Result<Vec<WebsiteTick>>;

    async fn uptime_history_for(
        &self,
        website_id: Uuid,
        period: RollupPeriod,
    ) -> Result<Vec<HistoricalUptime>>;

    /// Fold one verified probe reply into durable state: site rolling
    /// fields, the immutable tick, the validator payout, and the
    /// daily/weekly/monthly rollups - all in one transaction.
    async fn record_probe_outcome(
        &self,
        outcome: &ProbeOutcome,
        settings: &AggregateSettings,
    ) -> Result<AppliedProbe>;
}

/// LibSQL-backed implementation.
pub struct DatabaseImpl {
    pool: DbPool,
}

impl DatabaseImpl {
    pub fn new_from_pool(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<crate::pool::HubDbManager>> {
        Ok(self.pool.get().await?)
    }
}

const WEBSITE_COLUMNS: &str = "id, url, owner_id, check_frequency_seconds, preferred_region, \
     paused, status, uptime_percentage, average_response_ms, up_since, last_checked_at, created_at";

fn website_from_row(row: &Row) -> Result<Website> {
    let id: String = row.get(0)?;
    let preferred_region: Option<String> = row.get(4)?;
    let status: String = row.get(6)?;
    let up_since: Option<i64> = row.get(9)?;
    let last_checked_at: Option<i64> = row.get(10)?;

    Ok(Website {
        id: Uuid::parse_str(&id)?,
        url: row.get(1)?,
        owner_id: row.get(2)?,
        check_frequency_seconds: row.get::<i64>(3)? as u64,
        preferred_region: preferred_region.as_deref().map(str::parse).transpose()?,
        paused: row.get::<i64>(5)? != 0,
        status: SiteStatus::parse(&status),
        uptime_percentage: row.get(7)?,
        average_response_ms: row.get(8)?,
        up_since: up_since.map(i64_to_timestamp),
        last_checked_at: last_checked_at.map(i64_to_timestamp),
        created_at: i64_to_timestamp(row.get(11)?),
    })
}

const VALIDATOR_COLUMNS: &str = "id, public_key, ip, country, city, latitude, longitude, region, \
     is_active, pending_payouts, processing_payout, first_seen_at, last_seen_at";

fn validator_from_row(row: &Row) -> Result<Validator> {
    let id: String = row.get(0)?;
    let region: String = row.get(7)?;

    Ok(Validator {
        id: Uuid::parse_str(&id)?,
        public_key: row.get(1)?,
        ip: row.get(2)?,
        country: row.get(3)?,
        city: row.get(4)?,
        latitude: row.get(5)?,
        longitude: row.get(6)?,
        region: region.parse()?,
        is_active: row.get::<i64>(8)? != 0,
        pending_payouts: row.get(9)?,
        processing_payout: row.get::<i64>(10)? != 0,
        first_seen_at: i64_to_timestamp(row.get(11)?),
        last_seen_at: i64_to_timestamp(row.get(12)?),
    })
}

/// Read (status, total_ms) pairs for a site's ticks between `since`
/// and optionally `until`, on any connection-like handle.
async fn tick_window(
    conn: &Connection,
    website_id: Uuid,
    since: i64,
    until: Option<i64>,
    ascending: bool,
) -> Result<Vec<(SiteStatus, Option<u64>)>> {
    let order = if ascending { "ASC" } else { "DESC" };
    let mut rows = match until {
        Some(until) => {
            let sql = format!(
                "SELECT status, total_ms FROM website_ticks \
                 WHERE website_id = ? AND created_at >= ? AND created_at < ? \
                 ORDER BY created_at {order}"
            );
            conn.query(&sql, params![website_id.to_string(), since, until]).await?
        }
        None => {
            let sql = format!(
                "SELECT status, total_ms FROM website_ticks \
                 WHERE website_id = ? AND created_at >= ? ORDER BY created_at {order}"
            );
            conn.query(&sql, params![website_id.to_string(), since]).await?
        }
    };

    let mut ticks = Vec::new();
    while let Some(row) = rows.next().await? {
        let status: String = row.get(0)?;
        let total_ms: Option<i64> = row.get(1)?;
        ticks.push((SiteStatus::parse(&status), total_ms.map(|v| v as u64)));
    }
    Ok(ticks)
}

#[async_trait]
impl Database for DatabaseImpl {
    async fn active_websites(&self) -> Result<Vec<Website>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {WEBSITE_COLUMNS} FROM websites WHERE paused = 0");
        let mut rows = conn.query(&sql, ()).await?;

        let mut websites = Vec::new();
        while let Some(row) = rows.next().await? {
            websites.push(website_from_row(&row)?);
        }
        Ok(websites)
    }

    async fn website_by_id(&self, id: Uuid) -> Result<Option<Website>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {WEBSITE_COLUMNS} FROM websites WHERE id = ?");
        let mut rows = conn.query(&sql, params![id.to_string()]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(website_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn save_website(&self, website: &Website) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT OR REPLACE INTO websites (id, url, owner_id, check_frequency_seconds, \
             preferred_region, paused, status, uptime_percentage, average_response_ms, up_since, \
             last_checked_at, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                website.id.to_string(),
                website.url.clone(),
                website.owner_id.clone(),
                website.check_frequency_seconds as i64,
                website.preferred_region.map(|r| r.as_str()),
                website.paused as i64,
                website.status.to_string(),
                website.uptime_percentage,
                website.average_response_ms,
                website.up_since.map(timestamp_to_i64),
                website.last_checked_at.map(timestamp_to_i64),
                timestamp_to_i64(website.created_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn validator_by_public_key(&self, public_key: &str) -> Result<Option<Validator>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {VALIDATOR_COLUMNS} FROM validators WHERE public_key = ?");
        let mut rows = conn.query(&sql, params![public_key]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(validator_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn validator_by_id(&self, id: Uuid) -> Result<Option<Validator>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {VALIDATOR_COLUMNS} FROM validators WHERE id = ?");
        let mut rows = conn.query(&sql, params![id.to_string()]).await?;

        match rows.next().await? {
            Some(row) => Ok(Some(validator_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn upsert_validator(&self, validator: &Validator) -> Result<()> {
        let conn = self.get_conn().await?;
        // Conflict target is the stable identity: the public key.
        // pending_payouts and processing_payout are deliberately left
        // alone on conflict - reconnects must not touch balances.
        conn.execute(
            "INSERT INTO validators (id, public_key, ip, country, city, latitude, longitude, \
             region, is_active, pending_payouts, processing_payout, first_seen_at, last_seen_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(public_key) DO UPDATE SET \
                ip = excluded.ip, country = excluded.country, city = excluded.city, \
                latitude = excluded.latitude, longitude = excluded.longitude, \
                region = excluded.region, is_active = excluded.is_active, \
                last_seen_at = excluded.last_seen_at",
            params![
                validator.id.to_string(),
                validator.public_key.clone(),
                validator.ip.clone(),
                validator.country.clone(),
                validator.city.clone(),
                validator.latitude,
                validator.longitude,
                validator.region.as_str(),
                validator.is_active as i64,
                validator.pending_payouts,
                validator.processing_payout as i64,
                timestamp_to_i64(validator.first_seen_at),
                timestamp_to_i64(validator.last_seen_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn mark_validator_inactive(&self, id: Uuid) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "UPDATE validators SET is_active = 0, last_seen_at = ? WHERE id = ?",
            params![timestamp_to_i64(SystemTime::now()), id.to_string()],
        )
        .await?;
        Ok(())
    }

    async fn ticks_for_website(
        &self,
        website_id: Uuid,
        since: SystemTime,
    ) -> Result<Vec<WebsiteTick>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT id, website_id, validator_id, region, status, name_lookup_ms, \
                 connection_ms, tls_handshake_ms, ttfb_ms, data_transfer_ms, total_ms, error, \
                 created_at FROM website_ticks WHERE website_id = ? AND created_at >= ? \
                 ORDER BY created_at DESC",
                params![website_id.to_string(), timestamp_to_i64(since)],
            )
            .await?;

        let mut ticks = Vec::new();
        while let Some(row) = rows.next().await? {
            let website_id: String = row.get(1)?;
            let validator_id: String = row.get(2)?;
            let region: String = row.get(3)?;
            let status: String = row.get(4)?;
            let total_ms: Option<i64> = row.get(10)?;

            let timings = match total_ms {
                Some(total) => Some(TickTimings {
                    name_lookup_ms: row.get::<Option<i64>>(5)?.unwrap_or(0) as u64,
                    connection_ms: row.get::<Option<i64>>(6)?.unwrap_or(0) as u64,
                    tls_handshake_ms: row.get::<Option<i64>>(7)?.unwrap_or(0) as u64,
                    ttfb_ms: row.get::<Option<i64>>(8)?.unwrap_or(0) as u64,
                    data_transfer_ms: row.get::<Option<i64>>(9)?.unwrap_or(0) as u64,
                    total_ms: total as u64,
                }),
                None => None,
            };

            ticks.push(WebsiteTick {
                id: Some(row.get(0)?),
                website_id: Uuid::parse_str(&website_id)?,
                validator_id: Uuid::parse_str(&validator_id)?,
                region: region.parse::<Region>()?,
                status: SiteStatus::parse(&status),
                timings,
                error: row.get(11)?,
                created_at: i64_to_timestamp(row.get(12)?),
            });
        }
        Ok(ticks)
    }

    async fn uptime_history_for(
        &self,
        website_id: Uuid,
        period: RollupPeriod,
    ) -> Result<Vec<HistoricalUptime>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT website_id, period_start, period_end, uptime_percentage, \
                 average_response_ms, incident_count, downtime_seconds FROM uptime_history \
                 WHERE website_id = ? AND period = ? ORDER BY period_start DESC",
                params![website_id.to_string(), period.as_str()],
            )
            .await?;

        let mut history = Vec::new();
        while let Some(row) = rows.next().await? {
            let website_id: String = row.get(0)?;
            history.push(HistoricalUptime {
                website_id: Uuid::parse_str(&website_id)?,
                period,
                period_start: i64_to_timestamp(row.get(1)?),
                period_end: i64_to_timestamp(row.get(2)?),
                uptime_percentage: row.get(3)?,
                average_response_ms: row.get(4)?,
                incident_count: row.get(5)?,
                downtime_seconds: row.get(6)?,
            });
        }
        Ok(history)
    }

    async fn record_probe_outcome(
        &self,
        outcome: &ProbeOutcome,
        settings: &AggregateSettings,
    ) -> Result<AppliedProbe> {
        let conn = self.get_conn().await?;
        let tx = conn.transaction().await?;
        let now = outcome.observed_at;
        let now_ts = timestamp_to_i64(now);

        // 1. The site row, read inside the transaction so concurrent
        //    aggregations for the same site see a consistent snapshot.
        let sql = format!("SELECT {WEBSITE_COLUMNS} FROM websites WHERE id = ?");
        let mut rows = tx.query(&sql, params![outcome.website_id.to_string()]).await?;
        let site = match rows.next().await? {
            Some(row) => website_from_row(&row)?,
            None => bail!("probe outcome for unknown website {}", outcome.website_id),
        };

        // 2. Classify and recompute the rolling window including this
        //    observation.
        let status = classify_status(outcome, settings.degraded_threshold_ms);
        let since = timestamp_to_i64(now - settings.window);
        let prior = tick_window(&tx, outcome.website_id, since, None, false).await?;
        let window = recompute_window(&prior, status, outcome.total_ms());
        let up_since = next_up_since(site.up_since, status, now);

        // 3. Site rolling fields.
        tx.execute(
            "UPDATE websites SET status = ?, uptime_percentage = ?, average_response_ms = ?, \
             up_since = ?, last_checked_at = ? WHERE id = ?",
            params![
                status.to_string(),
                window.uptime_percentage,
                window.average_response_ms,
                up_since.map(timestamp_to_i64),
                now_ts,
                outcome.website_id.to_string()
            ],
        )
        .await?;

        // 4. The immutable tick.
        tx.execute(
            "INSERT INTO website_ticks (website_id, validator_id, region, status, \
             name_lookup_ms, connection_ms, tls_handshake_ms, ttfb_ms, data_transfer_ms, \
             total_ms, error, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                outcome.website_id.to_string(),
                outcome.validator_id.to_string(),
                outcome.region.as_str(),
                status.to_string(),
                outcome.timings.map(|t| t.name_lookup_ms as i64),
                outcome.timings.map(|t| t.connection_ms as i64),
                outcome.timings.map(|t| t.tls_handshake_ms as i64),
                outcome.timings.map(|t| t.ttfb_ms as i64),
                outcome.timings.map(|t| t.data_transfer_ms as i64),
                outcome.timings.map(|t| t.total_ms as i64),
                outcome.error.clone(),
                now_ts
            ],
        )
        .await?;

        // 5. Credit the reporting validator. Zero affected rows means
        //    the identity vanished underneath us - roll everything
        //    back rather than record an unattributable tick.
        let affected = tx
            .execute(
                "UPDATE validators SET pending_payouts = pending_payouts + ?, last_seen_at = ? \
                 WHERE id = ?",
                params![
                    settings.lamports_per_validation,
                    now_ts,
                    outcome.validator_id.to_string()
                ],
            )
            .await?;
        if affected == 0 {
            bail!("probe outcome for unknown validator {}", outcome.validator_id);
        }

        // 6. Historical rollups, recomputed over the period's ticks
        //    (the insert above is already visible here).
        for period in RollupPeriod::ALL {
            let (start, end) = period_bounds(period, now);
            let ticks = tick_window(
                &tx,
                outcome.website_id,
                timestamp_to_i64(start),
                Some(timestamp_to_i64(end)),
                true,
            )
            .await?;

            if let Some(stats) = compute_rollup(&ticks, site.check_frequency_seconds) {
                tx.execute(
                    "INSERT INTO uptime_history (website_id, period, period_start, period_end, \
                     uptime_percentage, average_response_ms, incident_count, downtime_seconds) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
                     ON CONFLICT(website_id, period, period_start) DO UPDATE SET \
                        period_end = excluded.period_end, \
                        uptime_percentage = excluded.uptime_percentage, \
                        average_response_ms = excluded.average_response_ms, \
                        incident_count = excluded.incident_count, \
                        downtime_seconds = excluded.downtime_seconds",
                    params![
                        outcome.website_id.to_string(),
                        period.as_str(),
                        timestamp_to_i64(start),
                        timestamp_to_i64(end),
                        stats.uptime_percentage,
                        stats.average_response_ms,
                        stats.incident_count,
                        stats.downtime_seconds
                    ],
                )
                .await?;
            }
        }

        tx.commit().await?;
        Ok(AppliedProbe { status, window })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::initialize_database;
    use crate::pool::{HubDbManager, build_pool};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn test_database() -> (Arc<DatabaseImpl>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.db");
        let pool = build_pool(path.to_str().unwrap()).await.unwrap();
        let conn: deadpool::managed::Object<HubDbManager> = pool.get().await.unwrap();
        initialize_database(&conn).await.unwrap();
        (Arc::new(DatabaseImpl::new_from_pool(pool)), dir)
    }

    fn test_validator(region: Region) -> Validator {
        let now = SystemTime::now();
        Validator {
            id: Uuid::new_v4(),
            public_key: crate::crypto::generate_keypair().public_key_b58(),
            ip: Some("198.51.100.7".into()),
            country: Some("US".into()),
            city: Some("Ashburn".into()),
            latitude: Some(39.0),
            longitude: Some(-77.5),
            region,
            is_active: true,
            pending_payouts: 0,
            processing_payout: false,
            first_seen_at: now,
            last_seen_at: now,
        }
    }

    fn online_outcome(site: &Website, validator: &Validator, total_ms: u64) -> ProbeOutcome {
        ProbeOutcome {
            website_id: site.id,
            validator_id: validator.id,
            region: validator.region,
            timings: Some(TickTimings {
                name_lookup_ms: 4,
                connection_ms: 11,
                tls_handshake_ms: 30,
                ttfb_ms: 80,
                data_transfer_ms: 25,
                total_ms,
            }),
            error: None,
            observed_at: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn websites_round_trip() {
        let (db, _dir) = test_database().await;
        let mut site = Website::new("https://example.com".into(), "owner-1".into(), 60);
        site.preferred_region = Some(Region::UsEast);
        db.save_website(&site).await.unwrap();

        let loaded = db.website_by_id(site.id).await.unwrap().unwrap();
        assert_eq!(loaded.url, site.url);
        assert_eq!(loaded.preferred_region, Some(Region::UsEast));
        assert_eq!(loaded.status, SiteStatus::Unknown);

        let active = db.active_websites().await.unwrap();
        assert_eq!(active.len(), 1);

        site.paused = true;
        db.save_website(&site).await.unwrap();
        assert!(db.active_websites().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn validator_upsert_is_keyed_by_public_key() {
        let (db, _dir) = test_database().await;
        let validator = test_validator(Region::UsEast);
        db.upsert_validator(&validator).await.unwrap();

        // Reconnect from a different place, same key, different row id:
        // the original identity must win and be refreshed in place.
        let mut reconnect = validator.clone();
        reconnect.id = Uuid::new_v4();
        reconnect.city = Some("Frankfurt".into());
        reconnect.region = Region::Europe;
        reconnect.pending_payouts = 999_999; // must not overwrite
        db.upsert_validator(&reconnect).await.unwrap();

        let loaded = db.validator_by_public_key(&validator.public_key).await.unwrap().unwrap();
        assert_eq!(loaded.id, validator.id);
        assert_eq!(loaded.city.as_deref(), Some("Frankfurt"));
        assert_eq!(loaded.region, Region::Europe);
        assert_eq!(loaded.pending_payouts, 0);
        assert!(loaded.is_active);

        db.mark_validator_inactive(validator.id).await.unwrap();
        let loaded = db.validator_by_id(validator.id).await.unwrap().unwrap();
        assert!(!loaded.is_active);
    }

    #[tokio::test]
    async fn record_probe_outcome_applies_every_effect() {
        let (db, _dir) = test_database().await;
        let site = Website::new("https://example.com".into(), "owner-1".into(), 60);
        db.save_website(&site).await.unwrap();
        let validator = test_validator(Region::UsEast);
        db.upsert_validator(&validator).await.unwrap();

        let settings = AggregateSettings::default();
        let applied = db
            .record_probe_outcome(&online_outcome(&site, &validator, 150), &settings)
            .await
            .unwrap();
        assert_eq!(applied.status, SiteStatus::Online);
        assert_eq!(applied.window.uptime_percentage, 100.0);

        let loaded = db.website_by_id(site.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SiteStatus::Online);
        assert!(loaded.up_since.is_some());
        assert!(loaded.last_checked_at.is_some());
        assert_eq!(loaded.uptime_percentage, 100.0);
        assert_eq!(loaded.average_response_ms, 150.0);

        let ticks = db
            .ticks_for_website(site.id, SystemTime::now() - Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].status, SiteStatus::Online);
        assert_eq!(ticks[0].timings.unwrap().total_ms, 150);

        let loaded = db.validator_by_id(validator.id).await.unwrap().unwrap();
        assert_eq!(loaded.pending_payouts, settings.lamports_per_validation);

        let daily = db.uptime_history_for(site.id, RollupPeriod::Daily).await.unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].uptime_percentage, 100.0);
    }

    #[tokio::test]
    async fn offline_then_online_drives_up_since_and_incidents() {
        let (db, _dir) = test_database().await;
        let site = Website::new("https://example.com".into(), "owner-1".into(), 60);
        db.save_website(&site).await.unwrap();
        let validator = test_validator(Region::Europe);
        db.upsert_validator(&validator).await.unwrap();
        let settings = AggregateSettings::default();

        let mut failed = online_outcome(&site, &validator, 0);
        failed.timings = None;
        failed.error = Some("connection refused".into());
        db.record_probe_outcome(&failed, &settings).await.unwrap();

        let loaded = db.website_by_id(site.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SiteStatus::Offline);
        assert!(loaded.up_since.is_none());

        db.record_probe_outcome(&online_outcome(&site, &validator, 90), &settings).await.unwrap();
        let loaded = db.website_by_id(site.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SiteStatus::Online);
        assert!(loaded.up_since.is_some());
        assert_eq!(loaded.uptime_percentage, 50.0);

        let daily = db.uptime_history_for(site.id, RollupPeriod::Daily).await.unwrap();
        assert_eq!(daily.len(), 1, "same period must be upserted, not duplicated");
        assert_eq!(daily[0].incident_count, 1);
        assert_eq!(daily[0].downtime_seconds, 60);
    }

    #[tokio::test]
    async fn unknown_validator_rolls_back_everything() {
        let (db, _dir) = test_database().await;
        let site = Website::new("https://example.com".into(), "owner-1".into(), 60);
        db.save_website(&site).await.unwrap();

        let ghost = test_validator(Region::India); // never persisted
        let result = db
            .record_probe_outcome(&online_outcome(&site, &ghost, 120), &AggregateSettings::default())
            .await;
        assert!(result.is_err());

        // The site update and tick insert ran earlier in the same
        // transaction; none of it may be visible.
        let loaded = db.website_by_id(site.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SiteStatus::Unknown);
        assert!(loaded.last_checked_at.is_none());
        let ticks = db
            .ticks_for_website(site.id, SystemTime::now() - Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(ticks.is_empty());
        assert!(db.uptime_history_for(site.id, RollupPeriod::Daily).await.unwrap().is_empty());
    }
}
