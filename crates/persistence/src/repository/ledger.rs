//! Graded outcome ledger
//!
//! Append-only. The unique key makes a second grading of the same
//! (player, market, date, source) a no-op.

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct GradedOutcomeRecord {
    pub id: Option<i64>,
    pub player_id: i64,
    pub market: String,
    pub game_date: String,
    pub source: String,
    pub player_name: String,
    pub direction: String,
    pub line_value: f64,
    pub raw_projection: f64,
    pub true_projection: f64,
    pub raw_edge: f64,
    pub true_edge: f64,
    pub price: i64,
    pub actual_value: f64,
    pub grade: String,
    /// Decimal as TEXT
    pub profit: String,
    pub graded_at: String,
}

/// A duplicate key is ignored, never overwritten
const INSERT_OUTCOME: &str = r#"INSERT OR IGNORE INTO graded_outcomes
    (player_id, market, game_date, source, player_name, direction, line_value,
     raw_projection, true_projection, raw_edge, true_edge, price, actual_value,
     grade, profit, graded_at)
   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"#;

pub struct LedgerRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> LedgerRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a batch in one transaction. Returns the number of new rows.
    pub async fn insert_many(&self, records: &[GradedOutcomeRecord]) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;
        for r in records {
            let result = sqlx::query(INSERT_OUTCOME)
                .bind(r.player_id)
                .bind(&r.market)
                .bind(&r.game_date)
                .bind(&r.source)
                .bind(&r.player_name)
                .bind(&r.direction)
                .bind(r.line_value)
                .bind(r.raw_projection)
                .bind(r.true_projection)
                .bind(r.raw_edge)
                .bind(r.true_edge)
                .bind(r.price)
                .bind(r.actual_value)
                .bind(&r.grade)
                .bind(&r.profit)
                .bind(&r.graded_at)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 1 {
                inserted += 1;
            }
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// The full ledger in insertion order
    pub async fn all(&self) -> DbResult<Vec<GradedOutcomeRecord>> {
        let rows = sqlx::query_as::<_, GradedOutcomeRecord>(
            "SELECT * FROM graded_outcomes ORDER BY id",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn for_date(&self, game_date: &str) -> DbResult<Vec<GradedOutcomeRecord>> {
        let rows = sqlx::query_as::<_, GradedOutcomeRecord>(
            "SELECT * FROM graded_outcomes WHERE game_date = ?1 ORDER BY id",
        )
        .bind(game_date)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM graded_outcomes")
            .fetch_one(self.pool)
            .await?;
        Ok(n)
    }
}
