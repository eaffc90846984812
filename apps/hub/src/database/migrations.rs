use anyhow::Result;
use libsql::Connection;

/// Schema version - increment when making schema changes.
const SCHEMA_VERSION: i32 = 1;

/// Run database migrations. The hub is the single writer of this
/// schema; dashboard/API consumers only read.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;
    if current_version >= SCHEMA_VERSION {
        tracing::info!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Initial schema").await?;
    }

    tracing::info!("Database migrations completed (now at version {})", SCHEMA_VERSION);
    Ok(())
}

async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;
    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    let now = crate::database::models::timestamp_to_i64(std::time::SystemTime::now());
    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, now, description],
    )
    .await?;
    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: websites, validators, website_ticks, uptime_history.
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS websites (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            check_frequency_seconds INTEGER NOT NULL DEFAULT 60,
            preferred_region TEXT,
            paused INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'unknown',
            uptime_percentage REAL NOT NULL DEFAULT 0,
            average_response_ms REAL NOT NULL DEFAULT 0,
            up_since INTEGER,
            last_checked_at INTEGER,
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS validators (
            id TEXT PRIMARY KEY,
            public_key TEXT NOT NULL UNIQUE,
            ip TEXT,
            country TEXT,
            city TEXT,
            latitude REAL,
            longitude REAL,
            region TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0,
            pending_payouts INTEGER NOT NULL DEFAULT 0,
            processing_payout INTEGER NOT NULL DEFAULT 0,
            first_seen_at INTEGER NOT NULL,
            last_seen_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS website_ticks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            website_id TEXT NOT NULL,
            validator_id TEXT NOT NULL,
            region TEXT NOT NULL,
            status TEXT NOT NULL,
            name_lookup_ms INTEGER,
            connection_ms INTEGER,
            tls_handshake_ms INTEGER,
            ttfb_ms INTEGER,
            data_transfer_ms INTEGER,
            total_ms INTEGER,
            error TEXT,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (website_id) REFERENCES websites(id) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS uptime_history (
            website_id TEXT NOT NULL,
            period TEXT NOT NULL,
            period_start INTEGER NOT NULL,
            period_end INTEGER NOT NULL,
            uptime_percentage REAL NOT NULL,
            average_response_ms REAL NOT NULL,
            incident_count INTEGER NOT NULL DEFAULT 0,
            downtime_seconds INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (website_id, period, period_start),
            FOREIGN KEY (website_id) REFERENCES websites(id) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_websites_paused ON websites(paused)", ())
        .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_validators_public_key ON validators(public_key)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_validators_is_active ON validators(is_active)",
        (),
    )
    .await?;
    // The 24h-window recompute reads ticks per site in descending time
    // order on every aggregation; this index carries that query.
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ticks_website_created ON website_ticks(website_id, created_at DESC)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ticks_validator ON website_ticks(validator_id)",
        (),
    )
    .await?;

    Ok(())
}
