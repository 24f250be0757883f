//! Traction - revenue metrics backbone for startup profiles
//!
//! Pulls revenue data from billing providers and self-hosted endpoints,
//! labels every number with how much it can be trusted, and turns the
//! result into leaderboard ranks, profile tiers, feature scores, and a
//! fairly rotated set of featured slots.
//!
//! # How it works
//!
//! 1. A startup connects a billing provider (credentials encrypted at
//!    rest) or registers a self-hosted metrics endpoint
//! 2. The aggregator syncs stale connections on an interval and writes
//!    monthly revenue snapshots tagged with a trust level
//! 3. Leaderboard ranks follow MRR; tiers follow a cumulative checklist
//! 4. A 0-100 feature score gates entry to the featured slots, which
//!    rotate daily with trust-level and category fairness
//!
//! # Trust model
//!
//! - Provider-fetched numbers are PLATFORM_VERIFIED
//! - Self-hosted endpoint numbers are SELF_REPORTED; a valid ed25519
//!   signature against the pinned key marks the connection verified but
//!   never upgrades the trust label

pub mod aggregator;
pub mod config;
pub mod crypto;
pub mod featured;
pub mod milestones;
pub mod models;
pub mod provider;
pub mod scheduler;
pub mod scoring;
pub mod standalone;
pub mod storage;
pub mod tiers;

pub use aggregator::{growth_rate, Aggregator, SyncOutcome};
pub use config::Config;
pub use crypto::{decrypt, encrypt, verify_signature};
pub use featured::{rotate_featured, select_fairly, RotationReport};
pub use models::{Connection, ConnectionSource, RevenueSnapshot, Startup, TrustLevel};
pub use scheduler::Scheduler;
pub use scoring::{calculate_feature_score, FeatureScoreBreakdown};
pub use storage::Store;
pub use tiers::{Tier, TierValidation};
