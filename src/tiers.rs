//! Tier validation
//!
//! Bronze/Silver/Gold are cumulative: each tier's requirement list is a
//! superset of the previous. Only `required` items gate tier achievement;
//! optional items feed the 0-100 completeness score. Bronze is the publish
//! floor.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::storage::Store;

const MIN_DESCRIPTION_LEN: usize = 40;
const RICH_DESCRIPTION_LEN: usize = 140;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Bronze => "bronze",
            Tier::Silver => "silver",
            Tier::Gold => "gold",
        }
    }

    fn next(&self) -> Option<Tier> {
        match self {
            Tier::Bronze => Some(Tier::Silver),
            Tier::Silver => Some(Tier::Gold),
            Tier::Gold => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RequirementStatus {
    pub key: &'static str,
    pub label: &'static str,
    /// Tier at which this item starts counting.
    pub tier: Tier,
    pub required: bool,
    pub met: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierValidation {
    /// Highest tier with all required items met; None below Bronze.
    pub tier: Option<Tier>,
    /// Bronze floor: publishing needs Bronze's required items only.
    pub can_publish: bool,
    pub can_upgrade: bool,
    pub next_tier: Option<Tier>,
    /// Fraction of ALL Gold-tier items (required and optional) met, 0-100.
    pub completeness_score: f64,
    pub checklist: Vec<RequirementStatus>,
}

/// Profile and data facts a validation run is computed from.
#[derive(Debug, Clone, Default)]
struct StartupFacts {
    has_name: bool,
    has_category: bool,
    has_description: bool,
    has_rich_description: bool,
    has_website: bool,
    has_logo: bool,
    months_of_data: u32,
    has_active_connection: bool,
    has_verified_connection: bool,
}

fn checklist(facts: &StartupFacts) -> Vec<RequirementStatus> {
    let item = |key, label, tier, required, met| RequirementStatus {
        key,
        label,
        tier,
        required,
        met,
    };
    vec![
        item("name", "Startup name", Tier::Bronze, true, facts.has_name),
        item("category", "Category", Tier::Bronze, true, facts.has_category),
        item(
            "description",
            "Description (40+ characters)",
            Tier::Bronze,
            true,
            facts.has_description,
        ),
        item(
            "revenue_data",
            "At least one month of revenue data",
            Tier::Bronze,
            true,
            facts.months_of_data >= 1,
        ),
        item("website", "Website URL", Tier::Silver, true, facts.has_website),
        item(
            "active_connection",
            "Active data connection",
            Tier::Silver,
            true,
            facts.has_active_connection,
        ),
        item(
            "history_3mo",
            "Three months of revenue history",
            Tier::Silver,
            true,
            facts.months_of_data >= 3,
        ),
        item("logo", "Logo", Tier::Gold, true, facts.has_logo),
        item(
            "verified_connection",
            "Platform-verified connection",
            Tier::Gold,
            true,
            facts.has_verified_connection,
        ),
        item(
            "history_6mo",
            "Six months of revenue history",
            Tier::Gold,
            true,
            facts.months_of_data >= 6,
        ),
        item(
            "history_12mo",
            "Twelve months of revenue history",
            Tier::Gold,
            false,
            facts.months_of_data >= 12,
        ),
        item(
            "rich_description",
            "Detailed description (140+ characters)",
            Tier::Gold,
            false,
            facts.has_rich_description,
        ),
    ]
}

fn evaluate(facts: &StartupFacts) -> TierValidation {
    let checklist = checklist(facts);

    let tier_met = |tier: Tier| {
        checklist
            .iter()
            .filter(|r| r.required && r.tier <= tier)
            .all(|r| r.met)
    };

    let tier = [Tier::Gold, Tier::Silver, Tier::Bronze]
        .into_iter()
        .find(|t| tier_met(*t));
    let can_publish = tier_met(Tier::Bronze);
    let next_tier = match tier {
        Some(t) => t.next(),
        None => Some(Tier::Bronze),
    };

    let met = checklist.iter().filter(|r| r.met).count();
    let completeness_score = (met as f64 / checklist.len() as f64 * 100.0).round();

    TierValidation {
        tier,
        can_publish,
        can_upgrade: next_tier.is_some(),
        next_tier,
        completeness_score,
        checklist,
    }
}

/// Validate a startup against the tier checklists.
pub fn validate(store: &Store, startup_id: &str) -> Result<TierValidation> {
    let startup = store
        .get_startup(startup_id)?
        .ok_or_else(|| anyhow::anyhow!("unknown startup {startup_id}"))?;

    let connections = store.active_connections_for(startup_id)?;
    let months_of_data = store.distinct_snapshot_months(startup_id)?;
    let description_len = startup.description.as_deref().map(str::len).unwrap_or(0);

    let facts = StartupFacts {
        has_name: !startup.name.trim().is_empty(),
        has_category: !startup.category.trim().is_empty(),
        has_description: description_len >= MIN_DESCRIPTION_LEN,
        has_rich_description: description_len >= RICH_DESCRIPTION_LEN,
        has_website: startup.website.as_deref().map(|w| !w.is_empty()).unwrap_or(false),
        has_logo: startup.logo_url.as_deref().map(|l| !l.is_empty()).unwrap_or(false),
        months_of_data,
        has_active_connection: !connections.is_empty(),
        has_verified_connection: connections
            .iter()
            .any(|c| c.trust_level == crate::models::TrustLevel::PlatformVerified),
    };

    Ok(evaluate(&facts))
}
