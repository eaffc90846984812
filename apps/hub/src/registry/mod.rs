//! In-memory roster of connected validator sessions, bucketed by
//! region.
//!
//! Each live socket owns one `SessionHandle`; the registry only holds
//! `Arc`s to them, so a handle stays usable by in-flight probes even
//! after its session has been evicted.

pub mod selector;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::hub::messages::OutgoingMessage;
use crate::region::Region;

/// One live validator connection.
pub struct SessionHandle {
    /// Identity of this particular socket; a validator reconnecting
    /// gets a fresh session id over its stable validator id.
    pub session_id: Uuid,
    pub validator_id: Uuid,
    pub public_key: String,
    pub region: Region,
    outbound: mpsc::Sender<OutgoingMessage>,
    active_checks: AtomicU32,
    /// Epoch zero until first selected, so fresh sessions win the
    /// least-recently-used tiebreak.
    last_used: Mutex<SystemTime>,
    last_heartbeat: Mutex<Instant>,
}

impl SessionHandle {
    pub fn new(
        validator_id: Uuid,
        public_key: String,
        region: Region,
        outbound: mpsc::Sender<OutgoingMessage>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            validator_id,
            public_key,
            region,
            outbound,
            active_checks: AtomicU32::new(0),
            last_used: Mutex::new(UNIX_EPOCH),
            last_heartbeat: Mutex::new(Instant::now()),
        }
    }

    /// Mark one probe as in flight and stamp the selection time, so a
    /// later selection in the same round sees the updated load.
    pub fn reserve(&self) {
        self.active_checks.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last_used) = self.last_used.lock() {
            *last_used = SystemTime::now();
        }
    }

    /// Release a reservation when the probe completes or is abandoned.
    pub fn release(&self) {
        let _ = self.active_checks.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            n.checked_sub(1)
        });
    }

    pub fn active_checks(&self) -> u32 {
        self.active_checks.load(Ordering::SeqCst)
    }

    pub fn last_used(&self) -> SystemTime {
        self.last_used.lock().map(|t| *t).unwrap_or(UNIX_EPOCH)
    }

    pub fn touch_heartbeat(&self) {
        if let Ok(mut beat) = self.last_heartbeat.lock() {
            *beat = Instant::now();
        }
    }

    pub fn heartbeat_age(&self) -> Duration {
        self.last_heartbeat.lock().map(|beat| beat.elapsed()).unwrap_or(Duration::ZERO)
    }

    /// Queue a message for the session's writer task.
    pub async fn send(&self, message: OutgoingMessage) -> Result<()> {
        self.outbound.send(message).await?;
        Ok(())
    }
}

/// Region-partitioned session roster.
pub struct ValidatorRegistry {
    buckets: RwLock<HashMap<Region, Vec<Arc<SessionHandle>>>>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self { buckets: RwLock::new(HashMap::new()) }
    }

    pub fn add(&self, session: Arc<SessionHandle>) {
        if let Ok(mut buckets) = self.buckets.write() {
            buckets.entry(session.region).or_default().push(session);
        }
    }

    /// Remove a session by its region and session id. Returns whether
    /// anything was removed, so a disconnect that raced a heartbeat
    /// eviction does not mark the validator inactive twice.
    pub fn remove(&self, region: Region, session_id: Uuid) -> bool {
        let Ok(mut buckets) = self.buckets.write() else {
            return false;
        };
        let Some(sessions) = buckets.get_mut(&region) else {
            return false;
        };

        let before = sessions.len();
        sessions.retain(|s| s.session_id != session_id);
        let removed = sessions.len() < before;
        if sessions.is_empty() {
            buckets.remove(&region);
        }
        removed
    }

    pub fn count_active(&self) -> usize {
        self.buckets.read().map(|b| b.values().map(Vec::len).sum()).unwrap_or(0)
    }

    pub fn count_in_region(&self, region: Region) -> usize {
        self.buckets.read().map(|b| b.get(&region).map_or(0, Vec::len)).unwrap_or(0)
    }

    pub fn sessions_in_region(&self, region: Region) -> Vec<Arc<SessionHandle>> {
        self.buckets.read().map(|b| b.get(&region).cloned().unwrap_or_default()).unwrap_or_default()
    }

    pub fn all_sessions(&self) -> Vec<Arc<SessionHandle>> {
        self.buckets.read().map(|b| b.values().flatten().cloned().collect()).unwrap_or_default()
    }

    /// Remove every session whose last heartbeat is older than
    /// `timeout` and return the evicted handles.
    pub fn evict_stale(&self, timeout: Duration) -> Vec<Arc<SessionHandle>> {
        let Ok(mut buckets) = self.buckets.write() else {
            return Vec::new();
        };

        let mut evicted = Vec::new();
        buckets.retain(|_, sessions| {
            sessions.retain(|session| {
                if session.heartbeat_age() > timeout {
                    evicted.push(Arc::clone(session));
                    false
                } else {
                    true
                }
            });
            !sessions.is_empty()
        });
        evicted
    }
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
