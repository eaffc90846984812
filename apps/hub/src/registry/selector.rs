//! Probe assignment: which sessions check a site this tick.
//!
//! Every region contributes at most one candidate. Within a region the
//! least in-flight load wins and least-recently-used breaks ties, so
//! equal-load sessions rotate instead of one absorbing every probe.

use std::collections::HashMap;
use std::sync::Arc;

use super::{SessionHandle, ValidatorRegistry};
use crate::region::Region;

/// Pick one session per populated region. Regions with no connected
/// sessions are absent from the result.
///
/// Callers reserve and release the picks themselves; reserving at
/// selection time is what lets later selections in the same tick see
/// the added load.
pub fn select_one_per_region(
    registry: &ValidatorRegistry,
) -> HashMap<Region, Arc<SessionHandle>> {
    let mut picks = HashMap::new();
    for region in Region::ALL {
        let best = registry
            .sessions_in_region(region)
            .into_iter()
            .min_by_key(|s| (s.active_checks(), s.last_used()));
        if let Some(session) = best {
            picks.insert(region, session);
        }
    }
    picks
}
