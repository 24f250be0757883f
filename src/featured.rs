//! Featured-slot selection and rotation
//!
//! Selection balances the two trust levels so platform-verified startups
//! cannot crowd out self-reported ones, spreads picks across categories
//! and revenue levels, and shuffles the final order so slot position
//! carries no ranking signal. Rotation runs daily: expiring slots either
//! auto-extend on engagement or free up for the next suggestion.

use std::collections::HashSet;

use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::FeaturedConfig;
use crate::models::TrustLevel;
use crate::scoring;
use crate::storage::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub startup_id: String,
    pub category: String,
    pub latest_revenue: f64,
    pub latest_snapshot_date: NaiveDate,
    pub verified: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RotationReport {
    pub expired: u32,
    pub extended: u32,
    pub newly_featured: u32,
    pub errors: u32,
}

/// Published startups with at least one snapshot, tagged with their best
/// trust level and most recent revenue.
pub fn candidates(store: &Store) -> Result<Vec<Candidate>> {
    let mut pool = Vec::new();

    for startup in store.published_startups()? {
        let snapshots = store.snapshots_for(&startup.id)?;
        let Some(latest) = snapshots.first() else {
            continue;
        };
        let verified = store
            .active_connections_for(&startup.id)?
            .iter()
            .any(|c| c.trust_level == TrustLevel::PlatformVerified);

        pool.push(Candidate {
            startup_id: startup.id,
            category: startup.category,
            latest_revenue: latest.mrr.unwrap_or(latest.revenue),
            latest_snapshot_date: latest.date,
            verified,
        });
    }

    Ok(pool)
}

/// Tertile boundaries over a pool's revenues. Candidates compare against
/// their own sub-pool, so a small self-reported shop is not judged on
/// verified-enterprise numbers.
fn tertile_bounds(pool: &[Candidate]) -> (f64, f64) {
    let mut revenues: Vec<f64> = pool.iter().map(|c| c.latest_revenue).collect();
    revenues.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = revenues.len();
    if n < 3 {
        return (f64::MIN, f64::MIN);
    }
    (revenues[n / 3], revenues[2 * n / 3])
}

fn revenue_level(revenue: f64, bounds: (f64, f64)) -> u8 {
    if revenue < bounds.0 {
        0
    } else if revenue < bounds.1 {
        1
    } else {
        2
    }
}

/// Pick up to `quota` from one sub-pool. First pass walks by snapshot
/// recency and accepts anything bringing a new category or revenue level;
/// a second pass fills what is left purely by recency.
fn pick_from_pool(
    pool: &mut Vec<Candidate>,
    quota: usize,
    seen_categories: &mut HashSet<String>,
    seen_levels: &mut HashSet<u8>,
    selected: &mut Vec<Candidate>,
) {
    let bounds = tertile_bounds(pool);
    pool.sort_by(|a, b| b.latest_snapshot_date.cmp(&a.latest_snapshot_date));

    let mut taken = 0;
    let mut i = 0;
    while i < pool.len() && taken < quota {
        let level = revenue_level(pool[i].latest_revenue, bounds);
        if !seen_categories.contains(&pool[i].category) || !seen_levels.contains(&level) {
            let candidate = pool.remove(i);
            seen_categories.insert(candidate.category.clone());
            seen_levels.insert(level);
            selected.push(candidate);
            taken += 1;
        } else {
            i += 1;
        }
    }

    while taken < quota && !pool.is_empty() {
        let candidate = pool.remove(0);
        seen_categories.insert(candidate.category.clone());
        seen_levels.insert(revenue_level(candidate.latest_revenue, bounds));
        selected.push(candidate);
        taken += 1;
    }
}

/// Fair selection of up to `limit` candidates. Verified startups get
/// ceil(limit/2) slots and self-reported floor(limit/2); a short sub-pool
/// hands its unused slots to the other side. The result order is shuffled.
pub fn select_fairly<R: Rng>(candidates: &[Candidate], limit: usize, rng: &mut R) -> Vec<Candidate> {
    if limit == 0 || candidates.is_empty() {
        return Vec::new();
    }

    let mut verified: Vec<Candidate> = candidates.iter().filter(|c| c.verified).cloned().collect();
    let mut self_reported: Vec<Candidate> =
        candidates.iter().filter(|c| !c.verified).cloned().collect();

    let mut verified_quota = limit.div_ceil(2).min(verified.len());
    let mut self_quota = (limit / 2).min(self_reported.len());

    // Redistribute whatever one side cannot fill
    let shortfall = limit - verified_quota - self_quota;
    if shortfall > 0 {
        let extra_verified = shortfall.min(verified.len() - verified_quota);
        verified_quota += extra_verified;
        self_quota += (shortfall - extra_verified).min(self_reported.len() - self_quota);
    }

    let mut selected = Vec::with_capacity(verified_quota + self_quota);
    let mut seen_categories = HashSet::new();
    let mut seen_levels = HashSet::new();

    pick_from_pool(
        &mut verified,
        verified_quota,
        &mut seen_categories,
        &mut seen_levels,
        &mut selected,
    );
    pick_from_pool(
        &mut self_reported,
        self_quota,
        &mut seen_categories,
        &mut seen_levels,
        &mut selected,
    );

    selected.shuffle(rng);
    selected
}

/// Daily rotation pass. Expiring slots with CTR >= min_ctr or clicks >=
/// min_clicks are extended for another window with counters reset;
/// everything else is unfeatured. Freed slots are refilled by fair
/// selection over the top suggestions, then all scores are refreshed.
pub fn rotate_featured<R: Rng>(
    store: &Store,
    config: &FeaturedConfig,
    rng: &mut R,
) -> Result<RotationReport> {
    let now = Utc::now();
    let mut report = RotationReport::default();

    for startup in store.expired_featured(now)? {
        let ctr = if startup.feature_impressions > 0 {
            startup.feature_clicks as f64 / startup.feature_impressions as f64
        } else {
            0.0
        };

        let result = if ctr >= config.min_ctr || startup.feature_clicks >= config.min_clicks {
            info!(
                "Extending featured slot for {} (ctr {:.3}, {} clicks)",
                startup.id, ctr, startup.feature_clicks
            );
            report.extended += 1;
            store.feature_startup(
                &startup.id,
                now,
                Some(now + Duration::days(config.rotation_days)),
            )
        } else {
            info!("Featured window over for {} (ctr {:.3})", startup.id, ctr);
            report.expired += 1;
            store.unfeature_startup(&startup.id)
        };

        if let Err(e) = result {
            warn!("Rotation update failed for {}: {}", startup.id, e);
            report.errors += 1;
        }
    }

    // Recount after extensions so they keep their slots
    let open = config
        .max_slots
        .saturating_sub(store.count_active_featured(now)?);

    if open > 0 {
        let suggestions = scoring::feature_suggestions(store, config.suggestion_factor * open)?;
        let suggested_ids: HashSet<&str> =
            suggestions.iter().map(|s| s.startup_id.as_str()).collect();
        let pool: Vec<Candidate> = candidates(store)?
            .into_iter()
            .filter(|c| suggested_ids.contains(c.startup_id.as_str()))
            .collect();

        for candidate in select_fairly(&pool, open, rng) {
            match store.feature_startup(
                &candidate.startup_id,
                now,
                Some(now + Duration::days(config.rotation_days)),
            ) {
                Ok(()) => {
                    info!("Featuring {}", candidate.startup_id);
                    report.newly_featured += 1;
                }
                Err(e) => {
                    warn!("Failed to feature {}: {}", candidate.startup_id, e);
                    report.errors += 1;
                }
            }
        }
    }

    let scores = scoring::update_all_feature_scores(store)?;
    report.errors += scores.errors;

    info!(
        "Rotation done: {} expired, {} extended, {} newly featured, {} errors",
        report.expired, report.extended, report.newly_featured, report.errors
    );
    Ok(report)
}
