//! Revenue milestone detection
//!
//! Scans every published startup's latest MRR against fixed thresholds
//! and records each crossing exactly once. Re-running is safe: already
//! recorded milestones are ignored by the store.

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::storage::Store;

/// Thresholds checked low to high.
pub const MILESTONES: [(f64, &str); 4] = [
    (1_000.0, "mrr_1k"),
    (10_000.0, "mrr_10k"),
    (50_000.0, "mrr_50k"),
    (100_000.0, "mrr_100k"),
];

/// Record any newly crossed milestones. Returns how many were new.
pub fn check_milestones(store: &Store) -> Result<u32> {
    let mut newly_recorded = 0;

    for startup in store.published_startups()? {
        let snapshots = match store.snapshots_for(&startup.id) {
            Ok(s) => s,
            Err(e) => {
                warn!("Milestone scan skipped {}: {}", startup.id, e);
                continue;
            }
        };
        let Some(mrr) = snapshots.first().and_then(|s| s.mrr) else {
            continue;
        };

        let now = Utc::now();
        for (threshold, name) in MILESTONES {
            if mrr >= threshold && store.record_milestone(&startup.id, name, mrr, now)? {
                info!("{} reached {} (mrr {:.0})", startup.name, name, mrr);
                newly_recorded += 1;
            }
        }
    }

    Ok(newly_recorded)
}
