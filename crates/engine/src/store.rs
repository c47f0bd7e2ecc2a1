//! Conversions between pipeline types and persistence records

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use persistence::repository::{
    BoardRepository, BoardRowRecord, BoardRunRecord, CalibrationModelRecord,
    CalibrationRepository, GradedOutcomeRecord, LedgerRepository,
};
use persistence::SqlitePool;
use rust_decimal::Decimal;
use tracing::info;

use crate::board::UNIFIED_BOARD;
use crate::calibration::CalibrationModel;
use crate::pipeline::RunSnapshot;
use crate::types::{
    BoardRow, CalibrationStatus, CanonicalPropKey, Direction, EdgeRecord, Grade, GradedOutcome,
    LinePricing, LineSnapshot, Market, ProjectionSnapshot,
};

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("bad timestamp '{}'", s))?
        .with_timezone(&Utc))
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    s.parse().with_context(|| format!("bad date '{}'", s))
}

// ============================================================================
// Boards
// ============================================================================

pub fn board_row_record(run_id: &str, board: &str, rank: usize, e: &EdgeRecord) -> BoardRowRecord {
    BoardRowRecord {
        id: None,
        run_id: run_id.to_string(),
        board: board.to_string(),
        rank: rank as i64,
        player_id: e.key.player_id as i64,
        player_name: e.player_name.clone(),
        market: e.key.market.code(),
        game_date: e.key.game_date.to_string(),
        source: e.source.clone(),
        raw_projection: e.projection.value,
        variance: e.projection.variance,
        true_projection: e.true_projection,
        line_value: e.line.line_value,
        over_price: e.line.pricing.over.map(i64::from),
        under_price: e.line.pricing.under.map(i64::from),
        raw_edge: e.raw_edge,
        true_edge: e.true_edge,
        direction: e.direction.label().to_string(),
        minutes_estimate: e.projection.minutes_estimate,
        calibration_status: e.calibration_status.label().to_string(),
        calibration_version: e.calibration_version.clone(),
        model_version: e.projection.model_version.clone(),
        scrape_timestamp: e.line.scrape_timestamp.to_rfc3339(),
    }
}

pub fn edge_from_row(r: &BoardRowRecord) -> Result<EdgeRecord> {
    Ok(EdgeRecord {
        key: CanonicalPropKey::new(
            u64::try_from(r.player_id)?,
            Market::parse(&r.market),
            parse_date(&r.game_date)?,
        ),
        player_name: r.player_name.clone(),
        source: r.source.clone(),
        projection: ProjectionSnapshot {
            value: r.raw_projection,
            variance: r.variance,
            minutes_estimate: r.minutes_estimate,
            model_version: r.model_version.clone(),
        },
        line: LineSnapshot {
            line_value: r.line_value,
            pricing: LinePricing {
                over: r.over_price.map(i32::try_from).transpose()?,
                under: r.under_price.map(i32::try_from).transpose()?,
            },
            scrape_timestamp: parse_time(&r.scrape_timestamp)?,
        },
        raw_edge: r.raw_edge,
        direction: Direction::parse(&r.direction),
        calibration_status: CalibrationStatus::parse(&r.calibration_status),
        true_projection: r.true_projection,
        true_edge: r.true_edge,
        calibration_version: r.calibration_version.clone(),
    })
}

/// Persist a finished run atomically: header plus every board
pub async fn save_snapshot(pool: &SqlitePool, snapshot: &RunSnapshot) -> Result<()> {
    let run = BoardRunRecord {
        run_id: snapshot.run_id.clone(),
        game_date: snapshot.game_date.to_string(),
        model_version: snapshot.model_version.clone(),
        calibration_version: snapshot.calibration_version.clone(),
        summary_json: serde_json::to_string(&snapshot.summary)?,
        created_at: snapshot.created_at.to_rfc3339(),
    };
    let rows: Vec<BoardRowRecord> = snapshot
        .boards
        .boards()
        .flat_map(|(board, records)| {
            records
                .iter()
                .enumerate()
                .map(move |(rank, e)| board_row_record(&snapshot.run_id, board, rank, e))
        })
        .collect();

    BoardRepository::new(pool).save_run(&run, &rows).await?;
    info!(run_id = %run.run_id, rows = rows.len(), "Saved board snapshot");
    Ok(())
}

/// One stored board of the latest run, plus the names of its siblings
#[derive(Debug, Clone)]
pub struct StoredBoard {
    pub run: BoardRunRecord,
    pub board: String,
    pub available: Vec<String>,
    pub rows: Vec<BoardRow>,
}

/// Latest stored run's `board` (the unified board when `None`)
pub async fn latest_board(pool: &SqlitePool, board: Option<&str>) -> Result<Option<StoredBoard>> {
    let repo = BoardRepository::new(pool);
    let Some(run) = repo.latest_run().await? else {
        return Ok(None);
    };
    let board = board.unwrap_or(UNIFIED_BOARD).to_string();
    let available = repo.board_names(&run.run_id).await?;
    let rows = repo
        .board_rows(&run.run_id, &board)
        .await?
        .iter()
        .map(|r| edge_from_row(r).map(|e| BoardRow::from(&e)))
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(StoredBoard {
        run,
        board,
        available,
        rows,
    }))
}

/// Every actionable record of the latest run for a date, across sources
pub async fn gradable_edges(pool: &SqlitePool, game_date: NaiveDate) -> Result<Vec<EdgeRecord>> {
    let repo = BoardRepository::new(pool);
    let Some(run) = repo.latest_run_for_date(&game_date.to_string()).await? else {
        return Ok(Vec::new());
    };
    repo.source_rows(&run.run_id, UNIFIED_BOARD)
        .await?
        .iter()
        .map(edge_from_row)
        .collect()
}

// ============================================================================
// Ledger
// ============================================================================

pub fn outcome_record(o: &GradedOutcome) -> GradedOutcomeRecord {
    GradedOutcomeRecord {
        id: None,
        player_id: o.key.player_id as i64,
        market: o.key.market.code(),
        game_date: o.key.game_date.to_string(),
        source: o.source.clone(),
        player_name: o.player_name.clone(),
        direction: o.direction.label().to_string(),
        line_value: o.line_value,
        raw_projection: o.raw_projection,
        true_projection: o.true_projection,
        raw_edge: o.raw_edge,
        true_edge: o.true_edge,
        price: i64::from(o.price),
        actual_value: o.actual_value,
        grade: o.grade.label().to_string(),
        profit: o.profit.to_string(),
        graded_at: o.graded_at.to_rfc3339(),
    }
}

pub fn outcome_from_record(r: &GradedOutcomeRecord) -> Result<GradedOutcome> {
    Ok(GradedOutcome {
        key: CanonicalPropKey::new(
            u64::try_from(r.player_id)?,
            Market::parse(&r.market),
            parse_date(&r.game_date)?,
        ),
        source: r.source.clone(),
        player_name: r.player_name.clone(),
        direction: Direction::parse(&r.direction),
        line_value: r.line_value,
        raw_projection: r.raw_projection,
        true_projection: r.true_projection,
        raw_edge: r.raw_edge,
        true_edge: r.true_edge,
        price: i32::try_from(r.price)?,
        actual_value: r.actual_value,
        grade: Grade::parse(&r.grade).with_context(|| format!("bad grade '{}'", r.grade))?,
        profit: r
            .profit
            .parse::<Decimal>()
            .with_context(|| format!("bad profit '{}'", r.profit))?,
        graded_at: parse_time(&r.graded_at)?,
    })
}

pub async fn load_ledger(pool: &SqlitePool) -> Result<Vec<GradedOutcome>> {
    LedgerRepository::new(pool)
        .all()
        .await?
        .iter()
        .map(outcome_from_record)
        .collect()
}

pub async fn graded_for_date(pool: &SqlitePool, game_date: NaiveDate) -> Result<Vec<GradedOutcome>> {
    LedgerRepository::new(pool)
        .for_date(&game_date.to_string())
        .await?
        .iter()
        .map(outcome_from_record)
        .collect()
}

pub async fn ledger_count(pool: &SqlitePool) -> Result<i64> {
    Ok(LedgerRepository::new(pool).count().await?)
}

/// Returns the number of outcomes that were new to the ledger
pub async fn append_outcomes(pool: &SqlitePool, outcomes: &[GradedOutcome]) -> Result<usize> {
    let records: Vec<GradedOutcomeRecord> = outcomes.iter().map(outcome_record).collect();
    Ok(LedgerRepository::new(pool).insert_many(&records).await?)
}

// ============================================================================
// Calibration
// ============================================================================

pub async fn publish_calibration(pool: &SqlitePool, model: &CalibrationModel) -> Result<()> {
    let record = CalibrationModelRecord {
        version: model.version.clone(),
        model_json: model.to_json()?,
        training_rows: model.training_rows as i64,
        created_at: model.created_at.to_rfc3339(),
    };
    CalibrationRepository::new(pool)
        .publish(&record, &Utc::now().to_rfc3339())
        .await?;
    Ok(())
}

pub async fn active_calibration(pool: &SqlitePool) -> Result<Option<CalibrationModel>> {
    match CalibrationRepository::new(pool).active().await? {
        Some(record) => Ok(Some(CalibrationModel::from_json(&record.model_json)?)),
        None => Ok(None),
    }
}

/// Stored versions, newest first
pub async fn calibration_versions(pool: &SqlitePool) -> Result<Vec<String>> {
    Ok(CalibrationRepository::new(pool).versions().await?)
}

pub async fn calibration(pool: &SqlitePool, version: &str) -> Result<Option<CalibrationModel>> {
    match CalibrationRepository::new(pool).get(version).await? {
        Some(record) => Ok(Some(CalibrationModel::from_json(&record.model_json)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::build_boards;
    use crate::config::CalibrationConfig;
    use crate::types::{PropType, StatCode};
    use persistence::Database;
    use rust_decimal_macros::dec;

    fn edge(player_id: u64, source: &str, line: f64) -> EdgeRecord {
        let projection = 25.0;
        EdgeRecord {
            key: CanonicalPropKey::new(
                player_id,
                Market::Stat(StatCode::Pts),
                NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            ),
            player_name: format!("P{}", player_id),
            source: source.into(),
            projection: ProjectionSnapshot {
                value: projection,
                variance: 6.25,
                minutes_estimate: 34.0,
                model_version: "proj-1".into(),
            },
            line: LineSnapshot {
                line_value: line,
                pricing: LinePricing {
                    over: Some(-120),
                    under: None,
                },
                scrape_timestamp: parse_time("2025-03-01T15:00:00Z").unwrap(),
            },
            raw_edge: projection - line,
            direction: Direction::Over,
            calibration_status: CalibrationStatus::Uncalibrated,
            true_projection: projection,
            true_edge: projection - line,
            calibration_version: None,
        }
    }

    #[test]
    fn test_board_row_round_trip_keeps_edge() {
        let e = edge(4, "underdog", 22.5);
        let back = edge_from_row(&board_row_record("r", "underdog", 0, &e)).unwrap();
        assert_eq!(back.key, e.key);
        assert_eq!(back.line, e.line);
        assert_eq!(back.projection, e.projection);
        assert_eq!(back.direction, Direction::Over);
    }

    #[tokio::test]
    async fn test_snapshot_feeds_grading_and_board_reads() {
        let db = Database::in_memory().await.unwrap();
        let edges = vec![edge(1, "prizepicks", 22.5), edge(1, "underdog", 21.5), edge(2, "prizepicks", 20.5)];
        let boards = build_boards(&edges);
        let snapshot = RunSnapshot {
            run_id: "20250301-1".into(),
            created_at: Utc::now(),
            game_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            model_version: "proj-1".into(),
            calibration_version: None,
            projections: Vec::new(),
            edges: edges.clone(),
            boards,
            unmatched_projections: Vec::new(),
            source_reports: Vec::new(),
            diagnostics: Default::default(),
            summary: Default::default(),
        };
        save_snapshot(db.pool(), &snapshot).await.unwrap();

        let latest = latest_board(db.pool(), None).await.unwrap().unwrap();
        assert_eq!(latest.run.run_id, "20250301-1");
        assert_eq!(latest.board, UNIFIED_BOARD);
        assert_eq!(latest.rows.len(), 2);
        assert_eq!(latest.rows[0].player_id, 2);
        assert_eq!(latest.rows[1].source, "underdog");
        assert_eq!(latest.available, vec!["prizepicks", "underdog", UNIFIED_BOARD]);

        let underdog = latest_board(db.pool(), Some("underdog")).await.unwrap().unwrap();
        assert_eq!(underdog.rows.len(), 1);
        let missing = latest_board(db.pool(), Some("sleeper")).await.unwrap().unwrap();
        assert!(missing.rows.is_empty());

        let gradable = gradable_edges(db.pool(), snapshot.game_date).await.unwrap();
        assert_eq!(gradable.len(), 3);
    }

    #[tokio::test]
    async fn test_ledger_round_trip_keeps_decimal_profit() {
        let db = Database::in_memory().await.unwrap();
        let e = edge(9, "prizepicks", 22.5);
        let outcome = GradedOutcome {
            key: e.key.clone(),
            source: e.source.clone(),
            player_name: e.player_name.clone(),
            direction: Direction::Over,
            line_value: 22.5,
            raw_projection: 25.0,
            true_projection: 25.0,
            raw_edge: 2.5,
            true_edge: 2.5,
            price: -120,
            actual_value: 30.0,
            grade: Grade::Win,
            profit: dec!(0.8333333333333333333333333333),
            graded_at: Utc::now(),
        };
        assert_eq!(append_outcomes(db.pool(), &[outcome.clone()]).await.unwrap(), 1);
        assert_eq!(append_outcomes(db.pool(), &[outcome.clone()]).await.unwrap(), 0);
        let ledger = load_ledger(db.pool()).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger_count(db.pool()).await.unwrap(), 1);
        assert_eq!(graded_for_date(db.pool(), e.key.game_date).await.unwrap().len(), 1);
        let next_day = e.key.game_date.succ_opt().unwrap();
        assert!(graded_for_date(db.pool(), next_day).await.unwrap().is_empty());
        assert_eq!(ledger[0].profit, outcome.profit);
        assert_eq!(ledger[0].key.market.prop_type(), PropType::Standard);
    }

    #[tokio::test]
    async fn test_stored_calibration_versions_stay_readable() {
        let db = Database::in_memory().await.unwrap();
        let cfg = CalibrationConfig::default();
        let first = CalibrationModel::train(&[], &cfg).unwrap();
        let second = CalibrationModel::train(
            &[],
            &CalibrationConfig {
                min_samples: cfg.min_samples + 1,
                ..cfg.clone()
            },
        )
        .unwrap();
        publish_calibration(db.pool(), &first).await.unwrap();
        publish_calibration(db.pool(), &second).await.unwrap();

        let versions = calibration_versions(db.pool()).await.unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions.contains(&first.version));
        let old = calibration(db.pool(), &first.version).await.unwrap().unwrap();
        assert_eq!(old.min_samples, cfg.min_samples);
        assert_eq!(active_calibration(db.pool()).await.unwrap().unwrap().version, second.version);
        assert!(calibration(db.pool(), "cal-missing").await.unwrap().is_none());
    }
}
