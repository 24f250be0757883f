//! Feature score calculator
//!
//! Six bounded components summing to a 0-100 worthiness score:
//! trust 0-25, revenue 0-20, growth 0-20, engagement 0-15,
//! completeness 0-10, recency 0-10. Unpublished startups score zero and
//! skip all further computation.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::TrustLevel;
use crate::storage::Store;
use crate::tiers;

/// Minimum total for featured-slot eligibility.
pub const ELIGIBILITY_THRESHOLD: u32 = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureScoreBreakdown {
    pub trust: u32,
    pub revenue: u32,
    pub growth: u32,
    pub engagement: u32,
    pub completeness: u32,
    pub recency: u32,
    pub total: u32,
    pub eligible: bool,
    pub reason: Option<String>,
}

impl FeatureScoreBreakdown {
    fn ineligible(reason: impl Into<String>) -> Self {
        Self {
            trust: 0,
            revenue: 0,
            growth: 0,
            engagement: 0,
            completeness: 0,
            recency: 0,
            total: 0,
            eligible: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSuggestion {
    pub startup_id: String,
    pub name: String,
    pub score: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub updated: u32,
    pub errors: u32,
}

/// 0-25 from the most trusted active connection.
pub fn trust_points(best: Option<TrustLevel>) -> u32 {
    match best {
        Some(TrustLevel::PlatformVerified) => 25,
        Some(TrustLevel::SelfReported) => 15,
        None => 0,
    }
}

/// 0-20 from latest MRR.
pub fn revenue_points(mrr: f64) -> u32 {
    if mrr >= 50_000.0 {
        20
    } else if mrr >= 10_000.0 {
        15
    } else if mrr >= 1_000.0 {
        10
    } else if mrr > 0.0 {
        5
    } else {
        0
    }
}

/// 0-20 from month-over-month growth. Needs two snapshots with a non-null
/// prior MRR; absent that, growth contributes nothing.
pub fn growth_points(growth: Option<f64>) -> u32 {
    match growth {
        Some(g) if g >= 20.0 => 20,
        Some(g) if g >= 10.0 => 15,
        Some(g) if g >= 5.0 => 10,
        Some(g) if g > 0.0 => 5,
        _ => 0,
    }
}

/// 0-15 from months of revenue history.
pub fn engagement_points(months: u32) -> u32 {
    if months >= 12 {
        15
    } else if months >= 6 {
        10
    } else if months >= 3 {
        5
    } else {
        0
    }
}

/// 0-10 from profile completeness (itself 0-100).
pub fn completeness_points(completeness_score: f64) -> u32 {
    ((completeness_score / 10.0).round() as u32).min(10)
}

/// 0-10 from the age of the latest snapshot.
pub fn recency_points(days_since_latest: Option<i64>) -> u32 {
    match days_since_latest {
        Some(d) if d <= 35 => 10,
        Some(d) if d <= 65 => 5,
        _ => 0,
    }
}

/// Compute the full breakdown for one startup.
pub fn calculate_feature_score(store: &Store, startup_id: &str) -> Result<FeatureScoreBreakdown> {
    let startup = store
        .get_startup(startup_id)?
        .ok_or_else(|| anyhow::anyhow!("unknown startup {startup_id}"))?;

    // Fast path: unpublished startups never score
    if !startup.is_published {
        return Ok(FeatureScoreBreakdown::ineligible("startup is not published"));
    }

    let snapshots = store.snapshots_for(startup_id)?;
    let latest = snapshots.first();
    let previous_mrr = latest.and_then(|l| {
        snapshots
            .iter()
            .find(|s| s.date < l.date)
            .and_then(|s| s.mrr)
    });

    let growth = latest
        .and_then(|l| l.mrr)
        .zip(previous_mrr)
        .and_then(|(l, p)| crate::aggregator::growth_rate(l, p));

    let connections = store.active_connections_for(startup_id)?;
    let best_trust = connections
        .iter()
        .map(|c| c.trust_level)
        .min_by_key(|t| match t {
            TrustLevel::PlatformVerified => 0,
            TrustLevel::SelfReported => 1,
        });

    let validation = tiers::validate(store, startup_id)?;
    let months = store.distinct_snapshot_months(startup_id)?;
    let days_since_latest = latest.map(|l| (Utc::now().date_naive() - l.date).num_days());

    let trust = trust_points(best_trust);
    let revenue = revenue_points(latest.and_then(|l| l.mrr).unwrap_or(0.0));
    let growth = growth_points(growth);
    let engagement = engagement_points(months);
    let completeness = completeness_points(validation.completeness_score);
    let recency = recency_points(days_since_latest);

    let total = trust + revenue + growth + engagement + completeness + recency;
    let eligible = total >= ELIGIBILITY_THRESHOLD;

    Ok(FeatureScoreBreakdown {
        trust,
        revenue,
        growth,
        engagement,
        completeness,
        recency,
        total,
        eligible,
        reason: if eligible {
            None
        } else {
            Some(format!(
                "score {} is below the eligibility threshold of {}",
                total, ELIGIBILITY_THRESHOLD
            ))
        },
    })
}

/// Ranked, eligible, not-currently-featured candidates. A scoring failure
/// excludes that startup, never the whole scan.
pub fn feature_suggestions(store: &Store, limit: usize) -> Result<Vec<FeatureSuggestion>> {
    let now = Utc::now();
    let mut suggestions = Vec::new();

    for startup in store.published_startups()? {
        if startup.is_actively_featured(now) {
            continue;
        }
        match calculate_feature_score(store, &startup.id) {
            Ok(breakdown) if breakdown.eligible => suggestions.push(FeatureSuggestion {
                startup_id: startup.id,
                name: startup.name,
                score: breakdown.total,
            }),
            Ok(_) => {}
            Err(e) => {
                warn!("Skipping {} in suggestions: {}", startup.id, e);
            }
        }
    }

    suggestions.sort_by(|a, b| b.score.cmp(&a.score).then(a.startup_id.cmp(&b.startup_id)));
    suggestions.truncate(limit);
    Ok(suggestions)
}

/// Re-persist the feature score of every published startup. Individual
/// failures are counted, the batch always completes.
pub fn update_all_feature_scores(store: &Store) -> Result<BatchOutcome> {
    let mut outcome = BatchOutcome::default();

    for startup in store.published_startups()? {
        match calculate_feature_score(store, &startup.id)
            .and_then(|b| store.set_feature_score(&startup.id, b.total as f64))
        {
            Ok(()) => outcome.updated += 1,
            Err(e) => {
                warn!("Failed to update feature score for {}: {}", startup.id, e);
                outcome.errors += 1;
            }
        }
    }

    info!(
        "Feature scores updated: {} ok, {} errors",
        outcome.updated, outcome.errors
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Connection, ConnectionSource, RevenueSnapshot, Startup};
    use chrono::{Datelike, Duration, NaiveDate};

    fn month_ago(months: i64) -> NaiveDate {
        let date = (Utc::now() - Duration::days(30 * months)).date_naive();
        NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap()
    }

    fn seed_snapshot(store: &Store, startup_id: &str, date: NaiveDate, mrr: f64) {
        store
            .upsert_snapshot(&RevenueSnapshot {
                startup_id: startup_id.to_string(),
                date,
                source_id: "conn".to_string(),
                revenue: mrr,
                mrr: Some(mrr),
                arr: Some(mrr * 12.0),
                customer_count: Some(20),
                currency: "usd".to_string(),
                trust_level: TrustLevel::PlatformVerified,
                verified_by: "platform".to_string(),
            })
            .unwrap();
    }

    /// Published startup with a verified connection and a year of history.
    fn strong_startup(store: &Store) -> Startup {
        let mut startup = Startup::new("Acme", "saas");
        startup.is_published = true;
        startup.description = Some("A".repeat(150));
        startup.website = Some("https://acme.example.com".to_string());
        startup.logo_url = Some("https://acme.example.com/logo.png".to_string());
        store.upsert_startup(&startup).unwrap();

        store
            .insert_connection(&Connection::new(
                startup.id.clone(),
                ConnectionSource::Direct {
                    provider: "stripe".to_string(),
                    encrypted_credentials: "blob".to_string(),
                },
            ))
            .unwrap();

        // Oldest to newest, 30% growth in the final month
        for m in (2..=12).rev() {
            seed_snapshot(store, &startup.id, month_ago(m), 10_000.0);
        }
        seed_snapshot(store, &startup.id, month_ago(1), 13_000.0);
        startup
    }

    #[test]
    fn unpublished_scores_zero() {
        let store = Store::in_memory().unwrap();
        let startup = Startup::new("Hidden", "saas");
        store.upsert_startup(&startup).unwrap();

        let breakdown = calculate_feature_score(&store, &startup.id).unwrap();
        assert_eq!(breakdown.total, 0);
        assert!(!breakdown.eligible);
        assert!(breakdown.reason.is_some());
    }

    #[test]
    fn components_stay_in_bounds() {
        let store = Store::in_memory().unwrap();
        let startup = strong_startup(&store);

        let b = calculate_feature_score(&store, &startup.id).unwrap();
        assert!(b.trust <= 25);
        assert!(b.revenue <= 20);
        assert!(b.growth <= 20);
        assert!(b.engagement <= 15);
        assert!(b.completeness <= 10);
        assert!(b.recency <= 10);
        assert_eq!(
            b.total,
            b.trust + b.revenue + b.growth + b.engagement + b.completeness + b.recency
        );
        assert!(b.total <= 100);
        assert!(b.eligible);
    }

    #[test]
    fn growth_bucket_values() {
        for (growth, expected) in [
            (None, 0),
            (Some(-10.0), 0),
            (Some(0.0), 0),
            (Some(3.0), 5),
            (Some(7.5), 10),
            (Some(12.0), 15),
            (Some(35.0), 20),
        ] {
            assert_eq!(growth_points(growth), expected, "growth {growth:?}");
        }
    }

    #[test]
    fn growth_needs_prior_mrr() {
        let store = Store::in_memory().unwrap();
        let mut startup = Startup::new("Solo", "saas");
        startup.is_published = true;
        store.upsert_startup(&startup).unwrap();
        seed_snapshot(&store, &startup.id, month_ago(1), 5_000.0);

        let b = calculate_feature_score(&store, &startup.id).unwrap();
        assert_eq!(b.growth, 0);
    }

    #[test]
    fn revenue_and_trust_buckets() {
        assert_eq!(revenue_points(75_000.0), 20);
        assert_eq!(revenue_points(10_000.0), 15);
        assert_eq!(revenue_points(999.0), 5);
        assert_eq!(revenue_points(0.0), 0);

        assert_eq!(trust_points(Some(TrustLevel::PlatformVerified)), 25);
        assert_eq!(trust_points(Some(TrustLevel::SelfReported)), 15);
        assert_eq!(trust_points(None), 0);
    }

    #[test]
    fn suggestions_are_ranked_and_skip_featured() {
        let store = Store::in_memory().unwrap();

        let strong = strong_startup(&store);

        let mut featured = Startup::new("Featured", "fintech");
        featured.is_published = true;
        featured.description = Some("B".repeat(150));
        store.upsert_startup(&featured).unwrap();
        store
            .feature_startup(&featured.id, Utc::now(), Some(Utc::now() + Duration::days(5)))
            .unwrap();

        let mut weak = Startup::new("Weak", "devtools");
        weak.is_published = true;
        store.upsert_startup(&weak).unwrap();

        let suggestions = feature_suggestions(&store, 10).unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].startup_id, strong.id);
    }

    #[test]
    fn batch_update_persists_scores() {
        let store = Store::in_memory().unwrap();
        let startup = strong_startup(&store);

        let outcome = update_all_feature_scores(&store).unwrap();
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.errors, 0);

        let loaded = store.get_startup(&startup.id).unwrap().unwrap();
        assert!(loaded.feature_score >= ELIGIBILITY_THRESHOLD as f64);
    }
}
