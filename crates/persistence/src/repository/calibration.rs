//! Calibration model versions
//!
//! Model rows are written once and never updated. Publishing inserts the new
//! version and moves the single-slot active pointer in the same transaction.

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CalibrationModelRecord {
    pub version: String,
    pub model_json: String,
    pub training_rows: i64,
    pub created_at: String,
}

pub struct CalibrationRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> CalibrationRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a version (idempotent on the version hash) and make it active
    pub async fn publish(&self, record: &CalibrationModelRecord, activated_at: &str) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT OR IGNORE INTO calibration_models (version, model_json, training_rows, created_at)
               VALUES (?1, ?2, ?3, ?4)"#,
        )
        .bind(&record.version)
        .bind(&record.model_json)
        .bind(record.training_rows)
        .bind(&record.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO calibration_active (slot, version, activated_at)
               VALUES (1, ?1, ?2)
               ON CONFLICT(slot) DO UPDATE SET
                 version = excluded.version,
                 activated_at = excluded.activated_at"#,
        )
        .bind(&record.version)
        .bind(activated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(version = %record.version, "Calibration version activated");
        Ok(())
    }

    pub async fn active(&self) -> DbResult<Option<CalibrationModelRecord>> {
        let record = sqlx::query_as::<_, CalibrationModelRecord>(
            r#"SELECT m.version, m.model_json, m.training_rows, m.created_at
               FROM calibration_active a
               JOIN calibration_models m ON m.version = a.version
               WHERE a.slot = 1"#,
        )
        .fetch_optional(self.pool)
        .await?;
        Ok(record)
    }

    pub async fn get(&self, version: &str) -> DbResult<Option<CalibrationModelRecord>> {
        let record = sqlx::query_as::<_, CalibrationModelRecord>(
            "SELECT * FROM calibration_models WHERE version = ?1",
        )
        .bind(version)
        .fetch_optional(self.pool)
        .await?;
        Ok(record)
    }

    /// Every stored version, newest first
    pub async fn versions(&self) -> DbResult<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT version FROM calibration_models ORDER BY created_at DESC")
                .fetch_all(self.pool)
                .await?;
        Ok(rows.into_iter().map(|(v,)| v).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn record(version: &str, created_at: &str) -> CalibrationModelRecord {
        CalibrationModelRecord {
            version: version.into(),
            model_json: format!("{{\"version\":\"{version}\"}}"),
            training_rows: 120,
            created_at: created_at.into(),
        }
    }

    #[tokio::test]
    async fn test_publish_replaces_active_version() {
        let db = Database::in_memory().await.unwrap();
        let repo = CalibrationRepository::new(db.pool());
        assert!(repo.active().await.unwrap().is_none());

        repo.publish(&record("cal-1", "2025-03-01T00:00:00Z"), "2025-03-01T00:00:00Z")
            .await
            .unwrap();
        repo.publish(&record("cal-2", "2025-03-08T00:00:00Z"), "2025-03-08T00:00:00Z")
            .await
            .unwrap();

        assert_eq!(repo.active().await.unwrap().unwrap().version, "cal-2");
        // older versions are kept untouched
        let old = repo.get("cal-1").await.unwrap().unwrap();
        assert_eq!(old.model_json, "{\"version\":\"cal-1\"}");
        assert_eq!(repo.versions().await.unwrap(), vec!["cal-2", "cal-1"]);
    }

    #[tokio::test]
    async fn test_republishing_old_version_only_moves_pointer() {
        let db = Database::in_memory().await.unwrap();
        let repo = CalibrationRepository::new(db.pool());
        repo.publish(&record("cal-1", "2025-03-01T00:00:00Z"), "t1").await.unwrap();
        repo.publish(&record("cal-2", "2025-03-08T00:00:00Z"), "t2").await.unwrap();
        repo.publish(&record("cal-1", "2025-03-01T00:00:00Z"), "t3").await.unwrap();
        assert_eq!(repo.active().await.unwrap().unwrap().version, "cal-1");
        assert_eq!(repo.versions().await.unwrap().len(), 2);
    }
}
