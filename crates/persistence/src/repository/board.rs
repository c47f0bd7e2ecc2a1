//! Board repository: run snapshots and their ranked rows

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use tracing::debug;

/// Header row of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BoardRunRecord {
    pub run_id: String,
    pub game_date: String,
    pub model_version: String,
    pub calibration_version: Option<String>,
    pub summary_json: String,
    pub created_at: String,
}

/// One ranked row of one board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct BoardRowRecord {
    pub id: Option<i64>,
    pub run_id: String,
    pub board: String,
    pub rank: i64,
    pub player_id: i64,
    pub player_name: String,
    pub market: String,
    pub game_date: String,
    pub source: String,
    pub raw_projection: f64,
    pub variance: f64,
    pub true_projection: f64,
    pub line_value: f64,
    pub over_price: Option<i64>,
    pub under_price: Option<i64>,
    pub raw_edge: f64,
    pub true_edge: f64,
    pub direction: String,
    pub minutes_estimate: f64,
    pub calibration_status: String,
    pub calibration_version: Option<String>,
    pub model_version: String,
    pub scrape_timestamp: String,
}

pub struct BoardRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BoardRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Write a run and every board row in one transaction. Any failure rolls
    /// the whole run back; readers never see a partial snapshot.
    pub async fn save_run(&self, run: &BoardRunRecord, rows: &[BoardRowRecord]) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO board_runs
                (run_id, game_date, model_version, calibration_version, summary_json, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
        )
        .bind(&run.run_id)
        .bind(&run.game_date)
        .bind(&run.model_version)
        .bind(&run.calibration_version)
        .bind(&run.summary_json)
        .bind(&run.created_at)
        .execute(&mut *tx)
        .await?;

        for row in rows {
            sqlx::query(
                r#"INSERT INTO board_records
                    (run_id, board, rank, player_id, player_name, market, game_date, source,
                     raw_projection, variance, true_projection, line_value, over_price,
                     under_price, raw_edge, true_edge, direction, minutes_estimate,
                     calibration_status, calibration_version, model_version, scrape_timestamp)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                           ?16, ?17, ?18, ?19, ?20, ?21, ?22)"#,
            )
            .bind(&run.run_id)
            .bind(&row.board)
            .bind(row.rank)
            .bind(row.player_id)
            .bind(&row.player_name)
            .bind(&row.market)
            .bind(&row.game_date)
            .bind(&row.source)
            .bind(row.raw_projection)
            .bind(row.variance)
            .bind(row.true_projection)
            .bind(row.line_value)
            .bind(row.over_price)
            .bind(row.under_price)
            .bind(row.raw_edge)
            .bind(row.true_edge)
            .bind(&row.direction)
            .bind(row.minutes_estimate)
            .bind(&row.calibration_status)
            .bind(&row.calibration_version)
            .bind(&row.model_version)
            .bind(&row.scrape_timestamp)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(run_id = %run.run_id, rows = rows.len(), "Board snapshot committed");
        Ok(())
    }

    pub async fn latest_run(&self) -> DbResult<Option<BoardRunRecord>> {
        let run = sqlx::query_as::<_, BoardRunRecord>(
            "SELECT * FROM board_runs ORDER BY created_at DESC, run_id DESC LIMIT 1",
        )
        .fetch_optional(self.pool)
        .await?;
        Ok(run)
    }

    /// Latest run for one slate date
    pub async fn latest_run_for_date(&self, game_date: &str) -> DbResult<Option<BoardRunRecord>> {
        let run = sqlx::query_as::<_, BoardRunRecord>(
            "SELECT * FROM board_runs WHERE game_date = ?1 ORDER BY created_at DESC, run_id DESC LIMIT 1",
        )
        .bind(game_date)
        .fetch_optional(self.pool)
        .await?;
        Ok(run)
    }

    /// Rows of one board in rank order
    pub async fn board_rows(&self, run_id: &str, board: &str) -> DbResult<Vec<BoardRowRecord>> {
        let rows = sqlx::query_as::<_, BoardRowRecord>(
            "SELECT * FROM board_records WHERE run_id = ?1 AND board = ?2 ORDER BY rank",
        )
        .bind(run_id)
        .bind(board)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// Rows of every per-source board of a run (everything except `exclude`)
    pub async fn source_rows(&self, run_id: &str, exclude: &str) -> DbResult<Vec<BoardRowRecord>> {
        let rows = sqlx::query_as::<_, BoardRowRecord>(
            "SELECT * FROM board_records WHERE run_id = ?1 AND board != ?2 ORDER BY board, rank",
        )
        .bind(run_id)
        .bind(exclude)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn board_names(&self, run_id: &str) -> DbResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT board FROM board_records WHERE run_id = ?1 ORDER BY board",
        )
        .bind(run_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(|(b,)| b).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn run(id: &str, created_at: &str) -> BoardRunRecord {
        BoardRunRecord {
            run_id: id.into(),
            game_date: "2025-03-01".into(),
            model_version: "proj-abc".into(),
            calibration_version: None,
            summary_json: "{}".into(),
            created_at: created_at.into(),
        }
    }

    fn row(board: &str, rank: i64, player_id: i64) -> BoardRowRecord {
        BoardRowRecord {
            id: None,
            run_id: String::new(),
            board: board.into(),
            rank,
            player_id,
            player_name: format!("P{player_id}"),
            market: "PTS".into(),
            game_date: "2025-03-01".into(),
            source: "prizepicks".into(),
            raw_projection: 24.0,
            variance: 4.0,
            true_projection: 24.0,
            line_value: 21.5,
            over_price: None,
            under_price: None,
            raw_edge: 2.5,
            true_edge: 2.5,
            direction: "OVER".into(),
            minutes_estimate: 33.0,
            calibration_status: "UNCALIBRATED".into(),
            calibration_version: None,
            model_version: "proj-abc".into(),
            scrape_timestamp: "2025-03-01T12:00:00Z".into(),
        }
    }

    #[tokio::test]
    async fn test_save_and_read_latest_run() {
        let db = Database::in_memory().await.unwrap();
        let repo = BoardRepository::new(db.pool());

        repo.save_run(&run("r1", "2025-03-01T10:00:00Z"), &[row("unified", 0, 1)])
            .await
            .unwrap();
        repo.save_run(
            &run("r2", "2025-03-01T11:00:00Z"),
            &[row("unified", 0, 2), row("unified", 1, 3), row("prizepicks", 0, 2)],
        )
        .await
        .unwrap();

        let latest = repo.latest_run().await.unwrap().unwrap();
        assert_eq!(latest.run_id, "r2");
        let unified = repo.board_rows("r2", "unified").await.unwrap();
        assert_eq!(unified.len(), 2);
        assert_eq!(unified[1].player_id, 3);
        assert_eq!(unified[0].run_id, "r2");
        assert_eq!(repo.board_names("r2").await.unwrap(), vec!["prizepicks", "unified"]);
        assert_eq!(repo.source_rows("r2", "unified").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_snapshot_leaves_nothing_behind() {
        let db = Database::in_memory().await.unwrap();
        let repo = BoardRepository::new(db.pool());

        // duplicate (board, rank) violates the unique constraint mid-transaction
        let result = repo
            .save_run(&run("bad", "2025-03-01T10:00:00Z"), &[row("unified", 0, 1), row("unified", 0, 2)])
            .await;
        assert!(result.is_err());
        assert!(repo.latest_run().await.unwrap().is_none());
        assert!(repo.board_rows("bad", "unified").await.unwrap().is_empty());
    }
}
