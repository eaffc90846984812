//! Probe scheduling and result collection.
//!
//! Every tick walks the active sites and probes each due site from
//! one session per populated region, or just the preferred region
//! when it has a candidate. Sessions are reserved at selection time,
//! so later picks in the same round already see the added load.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use futures::future::join_all;
use uuid::Uuid;

use super::correlation::PendingProbes;
use super::messages::{OutgoingMessage, ValidateRequest};
use crate::aggregate::{AggregateSettings, ProbeOutcome};
use crate::crypto::{reply_message, verify_signature};
use crate::database::Database;
use crate::database::models::Website;
use crate::region::Region;
use crate::registry::selector::select_one_per_region;
use crate::registry::{SessionHandle, ValidatorRegistry};

pub struct DispatchEngine {
    registry: Arc<ValidatorRegistry>,
    pending: Arc<PendingProbes>,
    database: Arc<dyn Database>,
    aggregate: AggregateSettings,
    tick_interval: Duration,
    probe_timeout: Duration,
}

impl DispatchEngine {
    pub fn new(
        registry: Arc<ValidatorRegistry>,
        pending: Arc<PendingProbes>,
        database: Arc<dyn Database>,
        aggregate: AggregateSettings,
        tick_interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self { registry, pending, database, aggregate, tick_interval, probe_timeout }
    }

    /// Dispatch loop. Rounds never overlap: a slow round delays the
    /// next tick rather than stacking on top of it.
    pub async fn run(&self) -> Result<()> {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                tracing::error!("Dispatch round failed: {}", e);
            }
        }
    }

    /// One dispatch round.
    pub async fn tick(&self) -> Result<()> {
        if self.registry.count_active() == 0 {
            tracing::debug!("No validators connected, skipping round");
            return Ok(());
        }

        let websites = self.database.active_websites().await?;
        let now = SystemTime::now();

        let mut probes = Vec::new();
        for website in websites {
            if !is_due(&website, now) {
                continue;
            }
            let picks = select_one_per_region(&self.registry);
            let targets = choose_targets(picks, website.preferred_region);
            if targets.is_empty() {
                tracing::warn!("No session available for {}", website.url);
                continue;
            }
            for session in targets {
                session.reserve();
                probes.push(self.probe_one(website.clone(), session));
            }
        }

        if !probes.is_empty() {
            tracing::debug!("Dispatching {} probes", probes.len());
            join_all(probes).await;
        }
        Ok(())
    }

    /// Send one validate request and fold the verified reply into the
    /// database. Timeouts and bad signatures leave no trace beyond a
    /// log line.
    async fn probe_one(&self, website: Website, session: Arc<SessionHandle>) {
        let callback_id = Uuid::new_v4();
        let rx = self.pending.register(callback_id);

        let request = OutgoingMessage::Validate(ValidateRequest {
            url: website.url.clone(),
            callback_id,
            website_id: website.id,
        });
        if let Err(e) = session.send(request).await {
            self.pending.abandon(callback_id);
            session.release();
            tracing::warn!("Could not reach validator {}: {}", session.validator_id, e);
            return;
        }

        let reply = match tokio::time::timeout(self.probe_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) | Err(_) => {
                self.pending.abandon(callback_id);
                session.release();
                tracing::warn!(
                    "Probe of {} by validator {} timed out after {:?}",
                    website.url,
                    session.validator_id,
                    self.probe_timeout
                );
                return;
            }
        };
        session.release();

        if reply.validator_id != session.validator_id {
            tracing::warn!(
                "Reply for callback {} claims validator {} but came from {}",
                callback_id,
                reply.validator_id,
                session.validator_id
            );
            return;
        }
        let expected = reply_message(callback_id);
        if let Err(e) = verify_signature(&expected, &session.public_key, &reply.signed_message) {
            tracing::warn!(
                "Discarding unverifiable reply from validator {}: {}",
                session.validator_id,
                e
            );
            return;
        }

        let error = reply.error_text().map(str::to_owned);
        let outcome = ProbeOutcome {
            website_id: website.id,
            validator_id: session.validator_id,
            region: session.region,
            timings: if error.is_none() { reply.timings() } else { None },
            error,
            observed_at: SystemTime::now(),
        };

        match self.database.record_probe_outcome(&outcome, &self.aggregate).await {
            Ok(applied) => tracing::info!(
                "{} is {} ({:.1}% over 24h)",
                website.url,
                applied.status,
                applied.window.uptime_percentage
            ),
            Err(e) => tracing::error!("Failed to record tick for {}: {}", website.url, e),
        }
    }
}

/// Narrow the per-region picks for one site: a preferred region with
/// a live candidate gets exclusivity, otherwise every region's pick
/// probes the site.
fn choose_targets(
    mut picks: HashMap<Region, Arc<SessionHandle>>,
    preferred: Option<Region>,
) -> Vec<Arc<SessionHandle>> {
    if let Some(region) = preferred
        && let Some(session) = picks.remove(&region)
    {
        return vec![session];
    }
    picks.into_values().collect()
}

/// Whether a site's check interval has elapsed. Never-checked sites
/// are always due.
pub fn is_due(website: &Website, now: SystemTime) -> bool {
    match website.last_checked_at {
        None => true,
        Some(last) => {
            now.duration_since(last).unwrap_or_default().as_secs()
                >= website.check_frequency_seconds
        }
    }
}
