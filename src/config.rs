//! Configuration management
//!
//! Loads configuration from config.toml with support for:
//! - Sync cadence and fan-out bounds
//! - Featured-slot limits and rotation thresholds
//! - Standalone feed freshness window
//!
//! The master encryption secret is never stored in the file; it is read from
//! the TRACTION_MASTER_KEY environment variable.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub featured: FeaturedConfig,
    #[serde(default)]
    pub standalone: StandaloneConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Sync cadence and concurrency bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Minutes between sync passes; also the staleness cutoff per connection
    pub interval_minutes: i64,
    /// Upper bound on concurrent connection syncs
    pub max_concurrent: usize,
    /// Months of history requested from a source per sync
    pub backfill_months: u32,
    /// Minutes between leaderboard refreshes
    pub leaderboard_interval_minutes: i64,
}

/// Featured-slot limits and rotation thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturedConfig {
    /// Concurrent featured startups platform-wide
    pub max_slots: usize,
    /// Length of one featuring period in days
    pub rotation_days: i64,
    /// CTR at or above which an expiring period is auto-extended
    pub min_ctr: f64,
    /// Raw click count that auto-extends regardless of CTR
    pub min_clicks: i64,
    /// Suggestions pulled per open slot during rotation
    pub suggestion_factor: usize,
}

/// Standalone feed settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandaloneConfig {
    /// Signed payloads older than this log a warning
    pub freshness_minutes: i64,
    pub request_timeout_secs: u64,
}

/// Database configuration (path may be overridden by TRACTION_DB env var)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Config {
    /// Load from config.toml or use defaults
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    /// Load from specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            toml::from_str(DEFAULT_CONFIG).context("Failed to parse default config")
        }
    }

    /// Master encryption secret from the environment. Empty values count as
    /// unset so a blank export cannot silently weaken encryption.
    pub fn master_key(&self) -> Option<String> {
        match std::env::var("TRACTION_MASTER_KEY") {
            Ok(key) if !key.is_empty() => Some(key),
            _ => None,
        }
    }

    /// Database path (env var takes precedence)
    pub fn database_path(&self) -> String {
        std::env::var("TRACTION_DB").unwrap_or_else(|_| self.database.path.clone())
    }
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|_| Self {
            sync: SyncConfig::default(),
            featured: FeaturedConfig::default(),
            standalone: StandaloneConfig::default(),
            database: DatabaseConfig::default(),
        })
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 60,
            max_concurrent: 4,
            backfill_months: 12,
            leaderboard_interval_minutes: 30,
        }
    }
}

impl Default for FeaturedConfig {
    fn default() -> Self {
        Self {
            max_slots: 5,
            rotation_days: 7,
            min_ctr: 0.05,
            min_clicks: 100,
            suggestion_factor: 2,
        }
    }
}

impl Default for StandaloneConfig {
    fn default() -> Self {
        Self {
            freshness_minutes: 10,
            request_timeout_secs: 30,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "traction.db".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_parses() {
        let config = Config::default();
        assert_eq!(config.featured.max_slots, 5);
        assert_eq!(config.featured.rotation_days, 7);
        assert_eq!(config.standalone.freshness_minutes, 10);
    }
}
