//! Data aggregator
//!
//! Orchestrates sync per connection, upserts canonical revenue snapshots,
//! records sync outcomes, and recomputes leaderboard ranks. Every sync
//! attempt terminates in the connection status fields and exactly one
//! immutable sync-log record, success or failure.

use anyhow::Result;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{Config, StandaloneConfig, SyncConfig};
use crate::crypto;
use crate::models::{
    Connection, ConnectionSource, LeaderboardEntry, RevenueDataPoint, RevenueSnapshot, SyncLog,
    TrustLevel,
};
use crate::provider::{build_provider, RevenueWindow, SourceError};
use crate::standalone::{RevenueRequest, StandaloneClient};
use crate::storage::Store;

/// Structured result of one sync operation; never a bare error at the
/// boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub success: bool,
    pub records_processed: u32,
    pub error: Option<String>,
}

impl SyncOutcome {
    fn ok(records: u32) -> Self {
        Self {
            success: true,
            records_processed: records,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            records_processed: 0,
            error: Some(error.into()),
        }
    }
}

pub struct Aggregator {
    store: Arc<Store>,
    sync: SyncConfig,
    standalone: StandaloneConfig,
    master_key: String,
}

/// Percentage change between two consecutive MRR values. `None` when the
/// prior month is missing or zero.
pub fn growth_rate(latest: f64, previous: f64) -> Option<f64> {
    if previous <= 0.0 {
        return None;
    }
    Some((latest - previous) / previous * 100.0)
}

fn month_bucket(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap()
}

impl Aggregator {
    pub fn new(store: Arc<Store>, config: &Config, master_key: String) -> Self {
        Self {
            store,
            sync: config.sync.clone(),
            standalone: config.standalone.clone(),
            master_key,
        }
    }

    /// Sync one connection end to end. The status update and sync-log append
    /// run on both the success and the failure path.
    pub async fn sync_connection(&self, connection_id: &str) -> SyncOutcome {
        let started_at = Utc::now();

        let connection = match self.store.get_connection(connection_id) {
            Ok(Some(c)) => c,
            Ok(None) => return SyncOutcome::failed(format!("unknown connection {connection_id}")),
            Err(e) => return SyncOutcome::failed(e.to_string()),
        };

        let result = self.fetch_and_ingest(&connection).await;
        self.finish_sync(&connection, started_at, result)
    }

    async fn fetch_and_ingest(&self, connection: &Connection) -> Result<u32, SourceError> {
        let window = RevenueWindow::trailing_months(self.sync.backfill_months);

        let points = match &connection.source {
            ConnectionSource::Direct {
                provider,
                encrypted_credentials,
            } => {
                let api_key = crypto::decrypt(encrypted_credentials, &self.master_key)?;
                let adapter = build_provider(provider, api_key)?;

                let check = adapter.validate_credentials().await;
                if !check.valid {
                    return Err(SourceError::Credentials(
                        check.error.unwrap_or_else(|| "credential check failed".to_string()),
                    ));
                }

                adapter.fetch_revenue(&window).await?
            }
            ConnectionSource::Standalone {
                endpoint_url,
                encrypted_api_key,
                public_key,
            } => {
                let api_key = crypto::decrypt(encrypted_api_key, &self.master_key)?;
                let client = StandaloneClient::new(
                    endpoint_url,
                    api_key,
                    public_key.clone(),
                    self.standalone.freshness_minutes,
                    self.standalone.request_timeout_secs,
                );

                let request = RevenueRequest {
                    start_date: window.start_date.to_string(),
                    end_date: window.end_date.to_string(),
                    interval: Some(window.interval),
                };

                // Standalone syncs always use the signed endpoint
                let verified = client.fetch_signed_revenue(&request).await?;

                if public_key.is_none() {
                    // First verified contact, pin the key.
                    match self
                        .store
                        .set_connection_public_key(&connection.id, &verified.public_key)
                    {
                        Ok(()) => info!(
                            "Pinned public key {} for {}",
                            crypto::key_fingerprint(&verified.public_key),
                            connection.id
                        ),
                        Err(e) => warn!("Failed to pin public key for {}: {}", connection.id, e),
                    }
                }
                if let Err(e) = self.store.mark_verified(&connection.id, Utc::now()) {
                    warn!("Failed to mark {} verified: {}", connection.id, e);
                }

                verified.points
            }
        };

        self.ingest_points(connection, &points)
            .map_err(|e| SourceError::Protocol(e.to_string()))
    }

    /// Upsert normalized points as snapshots. Trust level and verified-by
    /// come from the connection, never from the payload. Fails fast on the
    /// first bad point.
    fn ingest_points(
        &self,
        connection: &Connection,
        points: &[RevenueDataPoint],
    ) -> Result<u32> {
        let verified_by = match connection.trust_level {
            TrustLevel::PlatformVerified => "platform",
            TrustLevel::SelfReported => "self",
        };

        let mut processed = 0u32;
        for point in points {
            let date = NaiveDate::parse_from_str(&point.date, "%Y-%m-%d")
                .map_err(|e| anyhow::anyhow!("invalid point date {:?}: {}", point.date, e))?;

            self.store.upsert_snapshot(&RevenueSnapshot {
                startup_id: connection.startup_id.clone(),
                date: month_bucket(date),
                source_id: connection.id.clone(),
                revenue: point.revenue,
                mrr: point.mrr,
                arr: point.arr.or(point.mrr.map(|m| m * 12.0)),
                customer_count: point.customer_count,
                currency: point.currency.clone(),
                trust_level: connection.trust_level,
                verified_by: verified_by.to_string(),
            })?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Terminal step of every attempt: connection status fields plus one
    /// append-only log record.
    fn finish_sync(
        &self,
        connection: &Connection,
        started_at: DateTime<Utc>,
        result: Result<u32, SourceError>,
    ) -> SyncOutcome {
        let completed_at = Utc::now();
        let outcome = match result {
            Ok(records) => SyncOutcome::ok(records),
            Err(e) => SyncOutcome::failed(e.to_string()),
        };
        let status = if outcome.success { "success" } else { "error" };

        if let Err(e) = self.store.update_sync_status(
            &connection.id,
            status,
            outcome.error.as_deref(),
            completed_at,
        ) {
            error!("Failed to update sync status for {}: {}", connection.id, e);
        }
        if let Err(e) = self.store.append_sync_log(&SyncLog {
            connection_id: connection.id.clone(),
            started_at,
            completed_at,
            status: status.to_string(),
            records_processed: outcome.records_processed,
            error: outcome.error.clone(),
        }) {
            error!("Failed to append sync log for {}: {}", connection.id, e);
        }

        match &outcome.error {
            None => info!(
                "Synced connection {}: {} records",
                connection.id, outcome.records_processed
            ),
            Some(err) => warn!("Sync failed for connection {}: {}", connection.id, err),
        }

        outcome
    }

    /// Fan out over all active connections of one startup. One bad
    /// connection must not block its siblings.
    pub async fn sync_startup(&self, startup_id: &str) -> SyncOutcome {
        let connections = match self.store.active_connections_for(startup_id) {
            Ok(c) => c,
            Err(e) => return SyncOutcome::failed(e.to_string()),
        };

        let mut records = 0u32;
        let mut errors = Vec::new();
        for connection in &connections {
            let outcome = self.sync_connection(&connection.id).await;
            if outcome.success {
                records += outcome.records_processed;
            } else if let Some(e) = outcome.error {
                errors.push(format!("{}: {}", connection.id, e));
            }
        }

        SyncOutcome {
            success: errors.is_empty(),
            records_processed: records,
            error: if errors.is_empty() {
                None
            } else {
                Some(errors.join("; "))
            },
        }
    }

    /// Sync every active connection whose last sync predates the configured
    /// interval (all of them when forced), with bounded concurrency.
    /// Returns (synced, failed).
    pub async fn sync_stale_connections(&self, force: bool) -> (u32, u32) {
        let connections = if force {
            self.store.all_active_connections()
        } else {
            let cutoff = Utc::now() - chrono::Duration::minutes(self.sync.interval_minutes);
            self.store.stale_connections(cutoff)
        };
        let connections = match connections {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to load connections for sync: {}", e);
                return (0, 0);
            }
        };

        if connections.is_empty() {
            return (0, 0);
        }
        info!("Syncing {} connections", connections.len());

        let synced = AtomicU32::new(0);
        let failed = AtomicU32::new(0);

        futures::stream::iter(connections)
            .for_each_concurrent(self.sync.max_concurrent, |connection| {
                let synced = &synced;
                let failed = &failed;
                async move {
                    let outcome = self.sync_connection(&connection.id).await;
                    if outcome.success {
                        synced.fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
            .await;

        (synced.load(Ordering::Relaxed), failed.load(Ordering::Relaxed))
    }

    /// Two-pass leaderboard refresh: upsert per-startup metrics, then assign
    /// dense 1-based ranks from a fresh full read ordered by MRR descending
    /// (startup id ascending breaks ties deterministically; the ordering of
    /// ties is otherwise unspecified).
    pub fn update_leaderboard(&self) -> Result<()> {
        let startups = self.store.published_startups()?;
        let now = Utc::now();

        for startup in &startups {
            let snapshots = self.store.snapshots_for(&startup.id)?;
            let Some(latest) = snapshots.first() else {
                continue;
            };

            // Previous month with a known MRR, for the growth rate
            let previous_mrr = snapshots
                .iter()
                .find(|s| s.date < latest.date)
                .and_then(|s| s.mrr);

            let mrr = latest.mrr.unwrap_or(0.0);
            let total_revenue: f64 = snapshots.iter().map(|s| s.revenue).sum();

            self.store.upsert_leaderboard_entry(&LeaderboardEntry {
                startup_id: startup.id.clone(),
                rank: 0,
                mrr,
                arr: latest.arr.unwrap_or(mrr * 12.0),
                total_revenue,
                customer_count: latest.customer_count,
                growth_rate: latest
                    .mrr
                    .zip(previous_mrr)
                    .and_then(|(l, p)| growth_rate(l, p)),
                currency: latest.currency.clone(),
                updated_at: now,
            })?;
        }

        // Pass 2: fresh full read, dense ranks
        let entries = self.store.leaderboard_by_mrr()?;
        for (i, entry) in entries.iter().enumerate() {
            self.store.set_rank(&entry.startup_id, (i + 1) as u32)?;
        }

        info!("Leaderboard refreshed: {} entries ranked", entries.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Startup;

    fn fixture() -> (Arc<Store>, Aggregator) {
        let store = Arc::new(Store::in_memory().unwrap());
        let aggregator = Aggregator::new(store.clone(), &Config::default(), "master".to_string());
        (store, aggregator)
    }

    fn point(date: &str, revenue: f64, mrr: Option<f64>) -> RevenueDataPoint {
        RevenueDataPoint {
            date: date.to_string(),
            revenue,
            mrr,
            arr: None,
            customer_count: Some(5),
            currency: "usd".to_string(),
        }
    }

    fn standalone_connection(store: &Store, startup_id: &str) -> Connection {
        let connection = Connection::new(
            startup_id.to_string(),
            ConnectionSource::Standalone {
                endpoint_url: "https://app.example.com".to_string(),
                encrypted_api_key: "blob".to_string(),
                public_key: None,
            },
        );
        store.insert_connection(&connection).unwrap();
        connection
    }

    fn published_startup(store: &Store, name: &str) -> Startup {
        let mut startup = Startup::new(name, "saas");
        startup.is_published = true;
        store.upsert_startup(&startup).unwrap();
        startup
    }

    #[test]
    fn repeated_ingest_upserts_single_snapshot() {
        let (store, aggregator) = fixture();
        let startup = published_startup(&store, "Acme");
        let connection = standalone_connection(&store, &startup.id);

        let points = vec![point("2026-05-01", 100.0, Some(100.0))];
        aggregator.ingest_points(&connection, &points).unwrap();
        let updated = vec![point("2026-05-01", 120.0, Some(120.0))];
        aggregator.ingest_points(&connection, &updated).unwrap();

        let snapshots = store.snapshots_for(&startup.id).unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].revenue, 120.0);
        assert_eq!(snapshots[0].mrr, Some(120.0));
    }

    #[test]
    fn snapshot_trust_comes_from_connection() {
        let (store, aggregator) = fixture();
        let startup = published_startup(&store, "Acme");

        let standalone = standalone_connection(&store, &startup.id);
        aggregator
            .ingest_points(&standalone, &[point("2026-05-01", 100.0, None)])
            .unwrap();

        let direct = Connection::new(
            startup.id.clone(),
            ConnectionSource::Direct {
                provider: "stripe".to_string(),
                encrypted_credentials: "blob".to_string(),
            },
        );
        store.insert_connection(&direct).unwrap();
        aggregator
            .ingest_points(&direct, &[point("2026-06-01", 200.0, None)])
            .unwrap();

        let snapshots = store.snapshots_for(&startup.id).unwrap();
        let by_source = |id: &str| snapshots.iter().find(|s| s.source_id == id).unwrap();
        assert_eq!(
            by_source(&standalone.id).trust_level,
            TrustLevel::SelfReported
        );
        assert_eq!(by_source(&standalone.id).verified_by, "self");
        assert_eq!(
            by_source(&direct.id).trust_level,
            TrustLevel::PlatformVerified
        );
        assert_eq!(by_source(&direct.id).verified_by, "platform");
    }

    #[test]
    fn dates_normalize_to_month_buckets() {
        let (store, aggregator) = fixture();
        let startup = published_startup(&store, "Acme");
        let connection = standalone_connection(&store, &startup.id);

        aggregator
            .ingest_points(&connection, &[point("2026-05-17", 80.0, None)])
            .unwrap();

        let snapshots = store.snapshots_for(&startup.id).unwrap();
        assert_eq!(snapshots[0].date.to_string(), "2026-05-01");
    }

    #[test]
    fn every_attempt_leaves_a_log_record() {
        let (store, aggregator) = fixture();
        let startup = published_startup(&store, "Acme");
        let connection = standalone_connection(&store, &startup.id);
        let started = Utc::now();

        aggregator.finish_sync(&connection, started, Ok(3));
        aggregator.finish_sync(
            &connection,
            started,
            Err(SourceError::Unreachable("connection refused".to_string())),
        );

        let logs = store.sync_logs_for(&connection.id).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].status, "success");
        assert_eq!(logs[0].records_processed, 3);
        assert_eq!(logs[1].status, "error");
        assert!(logs[1].error.as_deref().unwrap().contains("refused"));

        let loaded = store.get_connection(&connection.id).unwrap().unwrap();
        assert_eq!(loaded.last_sync_status.as_deref(), Some("error"));
        assert!(loaded.last_synced_at.is_some());
    }

    #[test]
    fn leaderboard_ranks_by_mrr_descending() {
        let (store, aggregator) = fixture();

        for (name, mrr) in [("low", 500.0), ("high", 1500.0), ("mid", 1000.0)] {
            let startup = published_startup(&store, name);
            let connection = standalone_connection(&store, &startup.id);
            aggregator
                .ingest_points(&connection, &[point("2026-05-01", mrr, Some(mrr))])
                .unwrap();
        }

        aggregator.update_leaderboard().unwrap();

        let entries = store.leaderboard().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].mrr, 1500.0);
        assert_eq!(entries[0].rank, 1);
        assert_eq!(entries[1].mrr, 1000.0);
        assert_eq!(entries[1].rank, 2);
        assert_eq!(entries[2].mrr, 500.0);
        assert_eq!(entries[2].rank, 3);
    }

    #[test]
    fn leaderboard_growth_needs_two_months() {
        let (store, aggregator) = fixture();
        let startup = published_startup(&store, "Acme");
        let connection = standalone_connection(&store, &startup.id);

        aggregator
            .ingest_points(&connection, &[point("2026-05-01", 1000.0, Some(1000.0))])
            .unwrap();
        aggregator.update_leaderboard().unwrap();
        assert_eq!(store.leaderboard().unwrap()[0].growth_rate, None);

        aggregator
            .ingest_points(&connection, &[point("2026-06-01", 1200.0, Some(1200.0))])
            .unwrap();
        aggregator.update_leaderboard().unwrap();
        let entry = &store.leaderboard().unwrap()[0];
        assert!((entry.growth_rate.unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn growth_rate_formula() {
        assert!((growth_rate(1200.0, 1000.0).unwrap() - 20.0).abs() < 1e-9);
        assert!((growth_rate(500.0, 1000.0).unwrap() + 50.0).abs() < 1e-9);
        assert_eq!(growth_rate(100.0, 0.0), None);
    }
}
