//! Hub module - coordinates the validator network
//!
//! The hub is the core coordinator that:
//! - Accepts and authenticates validator connections
//! - Dispatches probe work across regions every tick
//! - Verifies replies and folds them into durable uptime state

pub mod connection;
pub mod correlation;
pub mod dispatch;
pub mod messages;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::database::{Database, DatabaseImpl, initialize_database};
use crate::geo::GeoLookup;
use crate::pool::DbPool;
use crate::registry::ValidatorRegistry;
use connection::ConnectionContext;
use correlation::PendingProbes;
use dispatch::DispatchEngine;

/// Main coordinator for the hub service.
pub struct Hub {
    config: Arc<Config>,
    database: Arc<dyn Database>,
    registry: Arc<ValidatorRegistry>,
    pending: Arc<PendingProbes>,
    geo: Arc<GeoLookup>,
}

impl Hub {
    /// Create and run a hub. Convenience wrapper around `new` + `run`.
    pub async fn start(config: Config, pool: DbPool) -> Result<()> {
        let hub = Self::new(config, pool).await?;
        hub.run().await
    }

    async fn new(config: Config, pool: DbPool) -> Result<Self> {
        let config = Arc::new(config);

        info!("Initializing database schema...");
        let conn = pool.get().await?;
        initialize_database(&conn).await?;
        let database = Arc::new(DatabaseImpl::new_from_pool(pool));

        Ok(Self {
            config,
            database,
            registry: Arc::new(ValidatorRegistry::new()),
            pending: Arc::new(PendingProbes::new()),
            geo: Arc::new(GeoLookup::new()),
        })
    }

    async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.network.bind, self.config.network.port);
        let listener = TcpListener::bind(&addr).await?;
        self.run_with_listener(listener).await
    }

    async fn run_with_listener(self, listener: TcpListener) -> Result<()> {
        let ctx = Arc::new(ConnectionContext {
            registry: Arc::clone(&self.registry),
            pending: Arc::clone(&self.pending),
            database: Arc::clone(&self.database),
            geo: Arc::clone(&self.geo),
        });
        let mut accept_handle = tokio::spawn(connection::serve(listener, ctx));

        let heartbeat_timeout = Duration::from_secs(self.config.scheduler.heartbeat_timeout_seconds);
        let mut sweep_handle = tokio::spawn(heartbeat_sweep(
            Arc::clone(&self.registry),
            Arc::clone(&self.database),
            heartbeat_timeout,
        ));

        let engine = DispatchEngine::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.pending),
            Arc::clone(&self.database),
            self.config.aggregate_settings(),
            Duration::from_secs(self.config.scheduler.tick_seconds),
            Duration::from_secs(self.config.scheduler.probe_timeout_seconds),
        );

        info!("Hub running, dispatching every {}s", self.config.scheduler.tick_seconds);
        tokio::select! {
            result = &mut accept_handle => {
                error!("Accept loop exited");
                result??;
                Ok(())
            }
            result = &mut sweep_handle => {
                error!("Heartbeat sweep exited");
                result?;
                Ok(())
            }
            result = engine.run() => result,
        }
    }
}

/// Periodically drop sessions that stopped heartbeating and mark
/// their validators inactive.
async fn heartbeat_sweep(
    registry: Arc<ValidatorRegistry>,
    database: Arc<dyn Database>,
    timeout: Duration,
) {
    let sweep_every = (timeout / 4).max(Duration::from_secs(5));
    let mut interval = tokio::time::interval(sweep_every);
    interval.tick().await; // first tick fires immediately

    loop {
        interval.tick().await;
        for session in registry.evict_stale(timeout) {
            warn!(
                "Evicting validator {} after {:?} without a heartbeat",
                session.validator_id,
                session.heartbeat_age()
            );
            if let Err(e) = database.mark_validator_inactive(session.validator_id).await {
                error!("Failed to mark validator {} inactive: {}", session.validator_id, e);
            }
        }
    }
}
