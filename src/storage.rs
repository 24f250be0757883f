//! Persistent store for startups, connections, snapshots and the leaderboard
//!
//! SQLite-backed. The in-memory constructor backs the test suite; the server
//! opens a file path. Composite-key upserts keep repeated syncs idempotent.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection as DbConnection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;

use crate::models::{
    Connection, ConnectionSource, LeaderboardEntry, RevenueSnapshot, Startup, SyncLog, TrustLevel,
};

const SCHEMA: &str = include_str!("../migrations/001_schema.sql");

pub struct Store {
    conn: Mutex<DbConnection>,
}

// Malformed stored text fails the query, not the process
fn parse_ts(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_ts(idx: usize, value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_ts(idx, v)).transpose()
}

fn parse_date(idx: usize, value: String) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(&value, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = DbConnection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = DbConnection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_schema()?;
        Ok(store)
    }

    fn apply_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ========================================================================
    // STARTUPS
    // ========================================================================

    pub fn upsert_startup(&self, startup: &Startup) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO startups (id, name, category, description, website, logo_url,
                is_published, is_featured, featured_at, featured_until, feature_impressions,
                feature_clicks, feature_score, tier, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                startup.id,
                startup.name,
                startup.category,
                startup.description,
                startup.website,
                startup.logo_url,
                startup.is_published,
                startup.is_featured,
                startup.featured_at.map(|t| t.to_rfc3339()),
                startup.featured_until.map(|t| t.to_rfc3339()),
                startup.feature_impressions,
                startup.feature_clicks,
                startup.feature_score,
                startup.tier,
                startup.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn row_to_startup(row: &Row) -> rusqlite::Result<Startup> {
        Ok(Startup {
            id: row.get(0)?,
            name: row.get(1)?,
            category: row.get(2)?,
            description: row.get(3)?,
            website: row.get(4)?,
            logo_url: row.get(5)?,
            is_published: row.get(6)?,
            is_featured: row.get(7)?,
            featured_at: parse_opt_ts(8, row.get(8)?)?,
            featured_until: parse_opt_ts(9, row.get(9)?)?,
            feature_impressions: row.get(10)?,
            feature_clicks: row.get(11)?,
            feature_score: row.get(12)?,
            tier: row.get(13)?,
            created_at: parse_ts(14, row.get(14)?)?,
        })
    }

    const STARTUP_COLS: &'static str = "id, name, category, description, website, logo_url, \
        is_published, is_featured, featured_at, featured_until, feature_impressions, \
        feature_clicks, feature_score, tier, created_at";

    pub fn get_startup(&self, id: &str) -> Result<Option<Startup>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM startups WHERE id = ?1",
            Self::STARTUP_COLS
        ))?;
        let startup = stmt
            .query_row(params![id], Self::row_to_startup)
            .optional()?;
        Ok(startup)
    }

    pub fn published_startups(&self) -> Result<Vec<Startup>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM startups WHERE is_published = 1 ORDER BY id",
            Self::STARTUP_COLS
        ))?;
        let startups = stmt
            .query_map([], Self::row_to_startup)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(startups)
    }

    /// Startups currently occupying a featured slot.
    pub fn active_featured(&self, now: DateTime<Utc>) -> Result<Vec<Startup>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM startups
             WHERE is_featured = 1 AND (featured_until IS NULL OR featured_until > ?1)
             ORDER BY id",
            Self::STARTUP_COLS
        ))?;
        let startups = stmt
            .query_map(params![now.to_rfc3339()], Self::row_to_startup)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(startups)
    }

    /// Featured startups whose lease has expired.
    pub fn expired_featured(&self, now: DateTime<Utc>) -> Result<Vec<Startup>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM startups
             WHERE is_featured = 1 AND featured_until IS NOT NULL AND featured_until <= ?1
             ORDER BY id",
            Self::STARTUP_COLS
        ))?;
        let startups = stmt
            .query_map(params![now.to_rfc3339()], Self::row_to_startup)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(startups)
    }

    pub fn count_active_featured(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM startups
             WHERE is_featured = 1 AND (featured_until IS NULL OR featured_until > ?1)",
            params![now.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Begin (or restart) a featuring period: counters reset to zero.
    pub fn feature_startup(
        &self,
        id: &str,
        at: DateTime<Utc>,
        until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE startups SET is_featured = 1, featured_at = ?2, featured_until = ?3,
                feature_impressions = 0, feature_clicks = 0
             WHERE id = ?1",
            params![id, at.to_rfc3339(), until.map(|t| t.to_rfc3339())],
        )?;
        Ok(())
    }

    pub fn unfeature_startup(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE startups SET is_featured = 0, featured_at = NULL, featured_until = NULL
             WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// Impression/click counters are written by the display boundary.
    pub fn record_engagement(&self, id: &str, impressions: i64, clicks: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE startups SET feature_impressions = feature_impressions + ?2,
                feature_clicks = feature_clicks + ?3
             WHERE id = ?1",
            params![id, impressions, clicks],
        )?;
        Ok(())
    }

    pub fn set_feature_score(&self, id: &str, score: f64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE startups SET feature_score = ?2 WHERE id = ?1",
            params![id, score],
        )?;
        Ok(())
    }

    pub fn set_tier(&self, id: &str, tier: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE startups SET tier = ?2 WHERE id = ?1",
            params![id, tier],
        )?;
        Ok(())
    }

    // ========================================================================
    // CONNECTIONS
    // ========================================================================

    pub fn insert_connection(&self, connection: &Connection) -> Result<()> {
        let (provider, endpoint_url, encrypted, public_key) = match &connection.source {
            ConnectionSource::Direct {
                provider,
                encrypted_credentials,
            } => (
                Some(provider.clone()),
                None,
                Some(encrypted_credentials.clone()),
                None,
            ),
            ConnectionSource::Standalone {
                endpoint_url,
                encrypted_api_key,
                public_key,
            } => (
                None,
                Some(endpoint_url.clone()),
                Some(encrypted_api_key.clone()),
                public_key.clone(),
            ),
        };

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO connections (id, startup_id, kind, provider, endpoint_url,
                encrypted_credentials, public_key, trust_level, verification_method,
                last_verified_at, is_active, last_sync_status, last_sync_error,
                last_synced_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                connection.id,
                connection.startup_id,
                connection.source.kind(),
                provider,
                endpoint_url,
                encrypted,
                public_key,
                connection.trust_level.as_str(),
                connection.verification_method,
                connection.last_verified_at.map(|t| t.to_rfc3339()),
                connection.is_active,
                connection.last_sync_status,
                connection.last_sync_error,
                connection.last_synced_at.map(|t| t.to_rfc3339()),
                connection.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn row_to_connection(row: &Row) -> rusqlite::Result<Connection> {
        let kind: String = row.get(2)?;
        let source = if kind == "direct" {
            ConnectionSource::Direct {
                provider: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                encrypted_credentials: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            }
        } else {
            ConnectionSource::Standalone {
                endpoint_url: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                encrypted_api_key: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                public_key: row.get(6)?,
            }
        };
        let trust: String = row.get(7)?;
        Ok(Connection {
            id: row.get(0)?,
            startup_id: row.get(1)?,
            source,
            trust_level: TrustLevel::parse(&trust).unwrap_or(TrustLevel::SelfReported),
            verification_method: row.get(8)?,
            last_verified_at: parse_opt_ts(9, row.get(9)?)?,
            is_active: row.get(10)?,
            last_sync_status: row.get(11)?,
            last_sync_error: row.get(12)?,
            last_synced_at: parse_opt_ts(13, row.get(13)?)?,
            created_at: parse_ts(14, row.get(14)?)?,
        })
    }

    const CONNECTION_COLS: &'static str = "id, startup_id, kind, provider, endpoint_url, \
        encrypted_credentials, public_key, trust_level, verification_method, last_verified_at, \
        is_active, last_sync_status, last_sync_error, last_synced_at, created_at";

    pub fn get_connection(&self, id: &str) -> Result<Option<Connection>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM connections WHERE id = ?1",
            Self::CONNECTION_COLS
        ))?;
        let connection = stmt
            .query_row(params![id], Self::row_to_connection)
            .optional()?;
        Ok(connection)
    }

    pub fn active_connections_for(&self, startup_id: &str) -> Result<Vec<Connection>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM connections WHERE startup_id = ?1 AND is_active = 1 ORDER BY created_at",
            Self::CONNECTION_COLS
        ))?;
        let connections = stmt
            .query_map(params![startup_id], Self::row_to_connection)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(connections)
    }

    /// Active connections not synced since `cutoff` (or never synced).
    pub fn stale_connections(&self, cutoff: DateTime<Utc>) -> Result<Vec<Connection>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM connections
             WHERE is_active = 1 AND (last_synced_at IS NULL OR last_synced_at < ?1)
             ORDER BY created_at",
            Self::CONNECTION_COLS
        ))?;
        let connections = stmt
            .query_map(params![cutoff.to_rfc3339()], Self::row_to_connection)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(connections)
    }

    pub fn all_active_connections(&self) -> Result<Vec<Connection>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM connections WHERE is_active = 1 ORDER BY created_at",
            Self::CONNECTION_COLS
        ))?;
        let connections = stmt
            .query_map([], Self::row_to_connection)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(connections)
    }

    /// Sync attempts may only touch the status fields.
    pub fn update_sync_status(
        &self,
        id: &str,
        status: &str,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE connections SET last_sync_status = ?2, last_sync_error = ?3, last_synced_at = ?4
             WHERE id = ?1",
            params![id, status, error, at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn mark_verified(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE connections SET last_verified_at = ?2 WHERE id = ?1",
            params![id, at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Persist the public key learned on first verified contact.
    pub fn set_connection_public_key(&self, id: &str, public_key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE connections SET public_key = ?2 WHERE id = ?1 AND kind = 'standalone'",
            params![id, public_key],
        )?;
        Ok(())
    }

    pub fn delete_connection(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM connections WHERE id = ?1", params![id])?;
        Ok(())
    }

    // ========================================================================
    // REVENUE SNAPSHOTS
    // ========================================================================

    /// Upsert keyed on (startup, date, source): repeated syncs overwrite.
    pub fn upsert_snapshot(&self, snapshot: &RevenueSnapshot) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO revenue_snapshots (startup_id, snapshot_date, source_id, revenue, mrr,
                arr, customer_count, currency, trust_level, verified_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(startup_id, snapshot_date, source_id) DO UPDATE SET
                revenue = excluded.revenue,
                mrr = excluded.mrr,
                arr = excluded.arr,
                customer_count = excluded.customer_count,
                currency = excluded.currency,
                trust_level = excluded.trust_level,
                verified_by = excluded.verified_by",
            params![
                snapshot.startup_id,
                snapshot.date.to_string(),
                snapshot.source_id,
                snapshot.revenue,
                snapshot.mrr,
                snapshot.arr,
                snapshot.customer_count,
                snapshot.currency,
                snapshot.trust_level.as_str(),
                snapshot.verified_by,
            ],
        )?;
        Ok(())
    }

    fn row_to_snapshot(row: &Row) -> rusqlite::Result<RevenueSnapshot> {
        let date: String = row.get(1)?;
        let trust: String = row.get(8)?;
        Ok(RevenueSnapshot {
            startup_id: row.get(0)?,
            date: parse_date(1, date)?,
            source_id: row.get(2)?,
            revenue: row.get(3)?,
            mrr: row.get(4)?,
            arr: row.get(5)?,
            customer_count: row.get(6)?,
            currency: row.get(7)?,
            trust_level: TrustLevel::parse(&trust).unwrap_or(TrustLevel::SelfReported),
            verified_by: row.get(9)?,
        })
    }

    const SNAPSHOT_COLS: &'static str = "startup_id, snapshot_date, source_id, revenue, mrr, \
        arr, customer_count, currency, trust_level, verified_by";

    /// All snapshots for a startup, most recent month first.
    pub fn snapshots_for(&self, startup_id: &str) -> Result<Vec<RevenueSnapshot>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM revenue_snapshots WHERE startup_id = ?1 ORDER BY snapshot_date DESC",
            Self::SNAPSHOT_COLS
        ))?;
        let snapshots = stmt
            .query_map(params![startup_id], Self::row_to_snapshot)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(snapshots)
    }

    pub fn snapshot_count(&self, startup_id: &str) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM revenue_snapshots WHERE startup_id = ?1",
            params![startup_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Months with at least one snapshot, regardless of source count.
    pub fn distinct_snapshot_months(&self, startup_id: &str) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        let count: u32 = conn.query_row(
            "SELECT COUNT(DISTINCT snapshot_date) FROM revenue_snapshots WHERE startup_id = ?1",
            params![startup_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ========================================================================
    // LEADERBOARD
    // ========================================================================

    pub fn upsert_leaderboard_entry(&self, entry: &LeaderboardEntry) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO leaderboard_entries (startup_id, rank, mrr, arr, total_revenue,
                customer_count, growth_rate, currency, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(startup_id) DO UPDATE SET
                rank = excluded.rank,
                mrr = excluded.mrr,
                arr = excluded.arr,
                total_revenue = excluded.total_revenue,
                customer_count = excluded.customer_count,
                growth_rate = excluded.growth_rate,
                currency = excluded.currency,
                updated_at = excluded.updated_at",
            params![
                entry.startup_id,
                entry.rank,
                entry.mrr,
                entry.arr,
                entry.total_revenue,
                entry.customer_count,
                entry.growth_rate,
                entry.currency,
                entry.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn row_to_leaderboard(row: &Row) -> rusqlite::Result<LeaderboardEntry> {
        Ok(LeaderboardEntry {
            startup_id: row.get(0)?,
            rank: row.get(1)?,
            mrr: row.get(2)?,
            arr: row.get(3)?,
            total_revenue: row.get(4)?,
            customer_count: row.get(5)?,
            growth_rate: row.get(6)?,
            currency: row.get(7)?,
            updated_at: parse_ts(8, row.get(8)?)?,
        })
    }

    const LEADERBOARD_COLS: &'static str = "startup_id, rank, mrr, arr, total_revenue, \
        customer_count, growth_rate, currency, updated_at";

    /// Entries ordered for the ranking pass: MRR descending, id ascending as
    /// the deterministic tie-break.
    pub fn leaderboard_by_mrr(&self) -> Result<Vec<LeaderboardEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM leaderboard_entries ORDER BY mrr DESC, startup_id ASC",
            Self::LEADERBOARD_COLS
        ))?;
        let entries = stmt
            .query_map([], Self::row_to_leaderboard)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn leaderboard(&self) -> Result<Vec<LeaderboardEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM leaderboard_entries ORDER BY rank ASC",
            Self::LEADERBOARD_COLS
        ))?;
        let entries = stmt
            .query_map([], Self::row_to_leaderboard)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn set_rank(&self, startup_id: &str, rank: u32) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE leaderboard_entries SET rank = ?2 WHERE startup_id = ?1",
            params![startup_id, rank],
        )?;
        Ok(())
    }

    // ========================================================================
    // SYNC LOG
    // ========================================================================

    pub fn append_sync_log(&self, log: &SyncLog) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sync_logs (connection_id, started_at, completed_at, status,
                records_processed, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                log.connection_id,
                log.started_at.to_rfc3339(),
                log.completed_at.to_rfc3339(),
                log.status,
                log.records_processed,
                log.error,
            ],
        )?;
        Ok(())
    }

    pub fn sync_logs_for(&self, connection_id: &str) -> Result<Vec<SyncLog>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT connection_id, started_at, completed_at, status, records_processed, error
             FROM sync_logs WHERE connection_id = ?1 ORDER BY id ASC",
        )?;
        let logs = stmt
            .query_map(params![connection_id], |row| {
                Ok(SyncLog {
                    connection_id: row.get(0)?,
                    started_at: parse_ts(1, row.get(1)?)?,
                    completed_at: parse_ts(2, row.get(2)?)?,
                    status: row.get(3)?,
                    records_processed: row.get(4)?,
                    error: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }

    // ========================================================================
    // MILESTONES
    // ========================================================================

    /// Returns true when the milestone was newly recorded.
    pub fn record_milestone(
        &self,
        startup_id: &str,
        milestone: &str,
        mrr: f64,
        achieved_at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO milestones (startup_id, milestone, mrr, achieved_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![startup_id, milestone, mrr, achieved_at.to_rfc3339()],
        )?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn snapshot(startup_id: &str, date: &str, source_id: &str, revenue: f64) -> RevenueSnapshot {
        RevenueSnapshot {
            startup_id: startup_id.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            source_id: source_id.to_string(),
            revenue,
            mrr: Some(revenue),
            arr: Some(revenue * 12.0),
            customer_count: Some(10),
            currency: "usd".to_string(),
            trust_level: TrustLevel::PlatformVerified,
            verified_by: "platform".to_string(),
        }
    }

    #[test]
    fn snapshot_upsert_is_idempotent() {
        let store = Store::in_memory().unwrap();
        let startup = Startup::new("Acme", "saas");
        store.upsert_startup(&startup).unwrap();

        store
            .upsert_snapshot(&snapshot(&startup.id, "2026-05-01", "conn1", 100.0))
            .unwrap();
        store
            .upsert_snapshot(&snapshot(&startup.id, "2026-05-01", "conn1", 250.0))
            .unwrap();

        let snapshots = store.snapshots_for(&startup.id).unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].revenue, 250.0);

        // A different source for the same month is its own record
        store
            .upsert_snapshot(&snapshot(&startup.id, "2026-05-01", "conn2", 50.0))
            .unwrap();
        assert_eq!(store.snapshot_count(&startup.id).unwrap(), 2);
    }

    #[test]
    fn connection_source_roundtrip() {
        let store = Store::in_memory().unwrap();
        let startup = Startup::new("Acme", "saas");
        store.upsert_startup(&startup).unwrap();

        let connection = Connection::new(
            startup.id.clone(),
            ConnectionSource::Standalone {
                endpoint_url: "https://app.example.com".to_string(),
                encrypted_api_key: "blob".to_string(),
                public_key: None,
            },
        );
        store.insert_connection(&connection).unwrap();

        let loaded = store.get_connection(&connection.id).unwrap().unwrap();
        assert_eq!(loaded.trust_level, TrustLevel::SelfReported);
        assert_eq!(loaded.source, connection.source);

        store
            .set_connection_public_key(&connection.id, "a2V5")
            .unwrap();
        let loaded = store.get_connection(&connection.id).unwrap().unwrap();
        match loaded.source {
            ConnectionSource::Standalone { public_key, .. } => {
                assert_eq!(public_key.as_deref(), Some("a2V5"))
            }
            _ => panic!("expected standalone source"),
        }
    }

    #[test]
    fn featured_counting_respects_expiry() {
        let store = Store::in_memory().unwrap();
        let now = Utc::now();

        for (name, until) in [
            ("live", Some(now + Duration::days(3))),
            ("indefinite", None),
            ("expired", Some(now - Duration::hours(1))),
        ] {
            let mut s = Startup::new(name, "saas");
            s.is_published = true;
            store.upsert_startup(&s).unwrap();
            store
                .feature_startup(&s.id, now - Duration::days(7), until)
                .unwrap();
        }

        assert_eq!(store.count_active_featured(now).unwrap(), 2);
        assert_eq!(store.expired_featured(now).unwrap().len(), 1);

        let active = store.active_featured(now).unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|s| s.name != "expired"));
    }

    #[test]
    fn feature_startup_resets_counters() {
        let store = Store::in_memory().unwrap();
        let startup = Startup::new("Acme", "saas");
        store.upsert_startup(&startup).unwrap();

        store.record_engagement(&startup.id, 1000, 60).unwrap();
        store
            .feature_startup(&startup.id, Utc::now(), Some(Utc::now() + Duration::days(7)))
            .unwrap();

        let loaded = store.get_startup(&startup.id).unwrap().unwrap();
        assert_eq!(loaded.feature_impressions, 0);
        assert_eq!(loaded.feature_clicks, 0);
        assert!(loaded.is_featured);
    }

    #[test]
    fn milestone_recorded_once() {
        let store = Store::in_memory().unwrap();
        let startup = Startup::new("Acme", "saas");
        store.upsert_startup(&startup).unwrap();

        assert!(store
            .record_milestone(&startup.id, "mrr_10k", 10_500.0, Utc::now())
            .unwrap());
        assert!(!store
            .record_milestone(&startup.id, "mrr_10k", 11_000.0, Utc::now())
            .unwrap());
    }

    #[test]
    fn mark_verified_stamps_connection() {
        let store = Store::in_memory().unwrap();
        let startup = Startup::new("Acme", "saas");
        store.upsert_startup(&startup).unwrap();

        let connection = Connection::new(
            startup.id.clone(),
            ConnectionSource::Standalone {
                endpoint_url: "https://app.example.com".to_string(),
                encrypted_api_key: "blob".to_string(),
                public_key: None,
            },
        );
        store.insert_connection(&connection).unwrap();
        assert!(store
            .get_connection(&connection.id)
            .unwrap()
            .unwrap()
            .last_verified_at
            .is_none());

        let at = Utc::now();
        store.mark_verified(&connection.id, at).unwrap();
        let loaded = store.get_connection(&connection.id).unwrap().unwrap();
        assert_eq!(loaded.last_verified_at.map(|t| t.timestamp()), Some(at.timestamp()));
    }

    #[test]
    fn corrupted_timestamp_surfaces_an_error() {
        let store = Store::in_memory().unwrap();
        let startup = Startup::new("Acme", "saas");
        store.upsert_startup(&startup).unwrap();

        store
            .conn
            .lock()
            .unwrap()
            .execute("UPDATE startups SET created_at = 'not a timestamp'", [])
            .unwrap();

        assert!(store.get_startup(&startup.id).is_err());
        // A genuinely missing row is still None, not an error
        assert!(store.get_startup("no-such-id").unwrap().is_none());
    }
}
