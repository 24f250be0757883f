//! Core domain entities
//!
//! Connections bind a startup to exactly one revenue source and carry the
//! trust level derived from that source kind. Snapshots are the canonical
//! per-month revenue records produced by the aggregator.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provenance tag for revenue data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustLevel {
    PlatformVerified,
    SelfReported,
}

impl TrustLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustLevel::PlatformVerified => "PLATFORM_VERIFIED",
            TrustLevel::SelfReported => "SELF_REPORTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PLATFORM_VERIFIED" => Some(TrustLevel::PlatformVerified),
            "SELF_REPORTED" => Some(TrustLevel::SelfReported),
            _ => None,
        }
    }
}

/// The two supported source kinds, each with its own required fields.
/// A standalone connection without an endpoint is unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionSource {
    Direct {
        /// Provider identifier, e.g. "stripe".
        provider: String,
        /// Encrypted API key/secret blob (see `crypto::encrypt`).
        encrypted_credentials: String,
    },
    Standalone {
        /// Base URL of the self-hosted companion app.
        endpoint_url: String,
        /// Encrypted shared API key blob.
        encrypted_api_key: String,
        /// Base64 ed25519 public key, captured on first verified contact.
        public_key: Option<String>,
    },
}

impl ConnectionSource {
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionSource::Direct { .. } => "direct",
            ConnectionSource::Standalone { .. } => "standalone",
        }
    }

    /// Trust level is a pure function of the source kind.
    pub fn trust_level(&self) -> TrustLevel {
        match self {
            ConnectionSource::Direct { .. } => TrustLevel::PlatformVerified,
            ConnectionSource::Standalone { .. } => TrustLevel::SelfReported,
        }
    }

    pub fn verification_method(&self) -> &'static str {
        match self {
            ConnectionSource::Direct { .. } => "provider_api",
            ConnectionSource::Standalone { .. } => "signed_feed",
        }
    }
}

/// One data source bound to exactly one startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub startup_id: String,
    pub source: ConnectionSource,
    /// Fixed at creation from the source kind, never mutated independently.
    pub trust_level: TrustLevel,
    pub verification_method: String,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub last_sync_status: Option<String>,
    pub last_sync_error: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(startup_id: impl Into<String>, source: ConnectionSource) -> Self {
        let trust_level = source.trust_level();
        let verification_method = source.verification_method().to_string();
        Self {
            id: Uuid::new_v4().to_string(),
            startup_id: startup_id.into(),
            source,
            trust_level,
            verification_method,
            last_verified_at: None,
            is_active: true,
            last_sync_status: None,
            last_sync_error: None,
            last_synced_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Canonical normalized revenue point exchanged with adapters and the
/// standalone protocol. Field names follow the wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueDataPoint {
    pub date: String,
    pub revenue: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mrr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_count: Option<i64>,
    pub currency: String,
}

/// One record per (startup, date, source), upserted by the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevenueSnapshot {
    pub startup_id: String,
    /// Month granularity, normalized to the first of the month.
    pub date: NaiveDate,
    pub source_id: String,
    pub revenue: f64,
    pub mrr: Option<f64>,
    pub arr: Option<f64>,
    pub customer_count: Option<i64>,
    pub currency: String,
    /// Copied from the originating connection at ingest time.
    pub trust_level: TrustLevel,
    /// "platform" | "self"
    pub verified_by: String,
}

/// Materialized leaderboard row, one per published startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub startup_id: String,
    pub rank: u32,
    pub mrr: f64,
    pub arr: f64,
    pub total_revenue: f64,
    pub customer_count: Option<i64>,
    pub growth_rate: Option<f64>,
    pub currency: String,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of one sync attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLog {
    pub connection_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: String,
    pub records_processed: u32,
    pub error: Option<String>,
}

/// Startup profile plus featured/scoring state owned by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Startup {
    pub id: String,
    pub name: String,
    pub category: String,
    pub description: Option<String>,
    pub website: Option<String>,
    pub logo_url: Option<String>,
    pub is_published: bool,
    pub is_featured: bool,
    pub featured_at: Option<DateTime<Utc>>,
    /// None = featured indefinitely.
    pub featured_until: Option<DateTime<Utc>>,
    pub feature_impressions: i64,
    pub feature_clicks: i64,
    pub feature_score: f64,
    pub tier: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Startup {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            category: category.into(),
            description: None,
            website: None,
            logo_url: None,
            is_published: false,
            is_featured: false,
            featured_at: None,
            featured_until: None,
            feature_impressions: 0,
            feature_clicks: 0,
            feature_score: 0.0,
            tier: None,
            created_at: Utc::now(),
        }
    }

    /// Featured right now: flagged and not past its lease.
    pub fn is_actively_featured(&self, now: DateTime<Utc>) -> bool {
        self.is_featured && self.featured_until.map(|u| u > now).unwrap_or(true)
    }
}
