//! SQLite session store

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::info;

use crate::records::{NewViolation, SessionRecord, ViolationRecord};
use crate::{SessionStore, StorageError};

const SCHEMA: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS sessions (
        client_id TEXT PRIMARY KEY NOT NULL,
        start_time INTEGER NOT NULL,
        end_time INTEGER,
        warning_count INTEGER NOT NULL DEFAULT 0,
        last_warning_time INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS violations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        client_id TEXT NOT NULL,
        violation_type TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        severity TEXT NOT NULL DEFAULT 'medium',
        details TEXT NOT NULL,
        integrity_score REAL,
        visibility_pct REAL,
        evidence_ref TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_violations_client ON violations(client_id, timestamp)",
];

fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StorageError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StorageError::SerializationError(format!("invalid timestamp {}", ms)))
}

fn opt_from_millis(ms: Option<i64>) -> Result<Option<DateTime<Utc>>, StorageError> {
    ms.map(from_millis).transpose()
}

fn session_from_row(row: &SqliteRow) -> Result<SessionRecord, StorageError> {
    Ok(SessionRecord {
        client_id: row.try_get("client_id")?,
        start_time: from_millis(row.try_get("start_time")?)?,
        end_time: opt_from_millis(row.try_get("end_time")?)?,
        warning_count: row.try_get::<i64, _>("warning_count")?.max(0) as u32,
        last_warning_time: opt_from_millis(row.try_get("last_warning_time")?)?,
    })
}

fn violation_from_row(row: &SqliteRow) -> Result<ViolationRecord, StorageError> {
    let details: String = row.try_get("details")?;
    Ok(ViolationRecord {
        id: row.try_get("id")?,
        client_id: row.try_get("client_id")?,
        violation_type: row.try_get("violation_type")?,
        timestamp: from_millis(row.try_get("timestamp")?)?,
        severity: row.try_get("severity")?,
        details: serde_json::from_str(&details)?,
        integrity_score: row.try_get::<Option<f64>, _>("integrity_score")?.map(|v| v as f32),
        visibility_pct: row.try_get::<Option<f64>, _>("visibility_pct")?.map(|v| v as f32),
        evidence_ref: row.try_get("evidence_ref")?,
    })
}

/// Store backed by a SQLite database
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url` and apply the schema.
    ///
    /// `sqlite::memory:` databases live on a single pooled connection.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let in_memory = url.contains(":memory:");

        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let store = Self { pool };
        store.migrate().await?;
        info!("SQLite session store ready: {}", url);
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn create_session(&self, client_id: &str, start_time: DateTime<Utc>) -> Result<bool, StorageError> {
        let result = sqlx::query("INSERT OR IGNORE INTO sessions (client_id, start_time) VALUES (?, ?)")
            .bind(client_id)
            .bind(to_millis(start_time))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn end_session(&self, client_id: &str, end_time: DateTime<Utc>) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE sessions SET end_time = ? WHERE client_id = ?")
            .bind(to_millis(end_time))
            .bind(client_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_session(&self, client_id: &str) -> Result<Option<SessionRecord>, StorageError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE client_id = ?")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn update_warning_count(
        &self,
        client_id: &str,
        warning_count: u32,
        last_warning_time: Option<DateTime<Utc>>,
    ) -> Result<(), StorageError> {
        let start = last_warning_time.unwrap_or_else(Utc::now);
        sqlx::query(
            "INSERT INTO sessions (client_id, start_time, warning_count, last_warning_time)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(client_id) DO UPDATE SET
                warning_count = excluded.warning_count,
                last_warning_time = excluded.last_warning_time",
        )
        .bind(client_id)
        .bind(to_millis(start))
        .bind(warning_count as i64)
        .bind(last_warning_time.map(to_millis))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn store_violation(
        &self,
        client_id: &str,
        violation: NewViolation,
        timestamp: DateTime<Utc>,
    ) -> Result<i64, StorageError> {
        let details = serde_json::to_string(&violation.details)?;
        let result = sqlx::query(
            "INSERT INTO violations
                (client_id, violation_type, timestamp, severity, details, integrity_score, visibility_pct, evidence_ref)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(client_id)
        .bind(&violation.violation_type)
        .bind(to_millis(timestamp))
        .bind(&violation.severity)
        .bind(details)
        .bind(violation.integrity_score.map(f64::from))
        .bind(violation.visibility_pct.map(f64::from))
        .bind(&violation.evidence_ref)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn get_violations(&self, client_id: &str) -> Result<Vec<ViolationRecord>, StorageError> {
        let rows = sqlx::query("SELECT * FROM violations WHERE client_id = ? ORDER BY timestamp DESC, id DESC")
            .bind(client_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(violation_from_row).collect()
    }

    async fn delete_session(&self, client_id: &str) -> Result<bool, StorageError> {
        let mut tx = self.pool.begin().await?;
        let violations = sqlx::query("DELETE FROM violations WHERE client_id = ?")
            .bind(client_id)
            .execute(&mut *tx)
            .await?;
        let sessions = sqlx::query("DELETE FROM sessions WHERE client_id = ?")
            .bind(client_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(client_id = %client_id, "Session and violations deleted");
        Ok(violations.rows_affected() + sessions.rows_affected() > 0)
    }

    async fn list_sessions(&self) -> Result<Vec<SessionRecord>, StorageError> {
        let rows = sqlx::query("SELECT * FROM sessions ORDER BY start_time DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(session_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    async fn store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:").await.unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_714_557_600_000 + secs * 1000).unwrap()
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let store = store().await;
        assert!(store.create_session("a", at(0)).await.unwrap());
        assert!(!store.create_session("a", at(1)).await.unwrap());

        store.update_warning_count("a", 2, Some(at(30))).await.unwrap();
        store.end_session("a", at(60)).await.unwrap();

        let s = store.get_session("a").await.unwrap().unwrap();
        assert_eq!(s.start_time, at(0));
        assert_eq!(s.warning_count, 2);
        assert_eq!(s.last_warning_time, Some(at(30)));
        assert_eq!(s.duration(), Some(Duration::seconds(60)));
    }

    #[tokio::test]
    async fn test_warning_upsert_creates_session() {
        let store = store().await;
        store.update_warning_count("b", 1, Some(at(5))).await.unwrap();
        let s = store.get_session("b").await.unwrap().unwrap();
        assert_eq!(s.warning_count, 1);
        assert_eq!(store.list_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_violations_round_trip() {
        let store = store().await;
        for (i, v_type) in ["no_face", "prohibited_items"].iter().enumerate() {
            store
                .store_violation(
                    "a",
                    NewViolation {
                        violation_type: v_type.to_string(),
                        severity: "high".into(),
                        details: json!({ "type": v_type, "confidence": 0.9 }),
                        integrity_score: Some(30.0),
                        visibility_pct: None,
                        evidence_ref: None,
                    },
                    at(i as i64),
                )
                .await
                .unwrap();
        }

        let v = store.get_violations("a").await.unwrap();
        assert_eq!(v.len(), 2);
        assert_eq!(v[0].violation_type, "prohibited_items");
        assert_eq!(v[0].details["confidence"], 0.9);
        assert_eq!(v[1].integrity_score, Some(30.0));
        assert!(store.get_violations("other").await.unwrap().is_empty());

        assert!(store.delete_session("a").await.unwrap());
        assert!(store.get_violations("a").await.unwrap().is_empty());
    }
}
