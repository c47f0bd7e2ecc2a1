//! Board builder
//!
//! Ranks edge records by |true edge| (|raw edge| when uncalibrated) and
//! produces a unified board plus one board per source. PASS records never
//! reach a board.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use crate::types::{BoardRow, Direction, EdgeRecord};

pub const UNIFIED_BOARD: &str = "unified";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoardSet {
    /// One record per (player, market, date) across every source
    pub unified: Vec<EdgeRecord>,
    /// Every actionable record of one source
    pub per_source: BTreeMap<String, Vec<EdgeRecord>>,
}

impl BoardSet {
    pub fn unified_rows(&self) -> Vec<BoardRow> {
        self.unified.iter().map(BoardRow::from).collect()
    }

    pub fn source_rows(&self, source: &str) -> Vec<BoardRow> {
        self.per_source
            .get(source)
            .map(|b| b.iter().map(BoardRow::from).collect())
            .unwrap_or_default()
    }

    /// (board name, records) for every board, unified first
    pub fn boards(&self) -> impl Iterator<Item = (&str, &[EdgeRecord])> {
        std::iter::once((UNIFIED_BOARD, self.unified.as_slice())).chain(
            self.per_source
                .iter()
                .map(|(name, records)| (name.as_str(), records.as_slice())),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.unified.is_empty()
    }
}

/// Strongest first; ties broken by key then source so output is stable
fn strongest_first(a: &EdgeRecord, b: &EdgeRecord) -> Ordering {
    b.ranking_edge()
        .abs()
        .total_cmp(&a.ranking_edge().abs())
        .then_with(|| a.key.cmp(&b.key))
        .then_with(|| a.source.cmp(&b.source))
}

pub fn rank(edges: &[EdgeRecord]) -> Vec<EdgeRecord> {
    let mut ranked: Vec<EdgeRecord> = edges
        .iter()
        .filter(|e| e.direction != Direction::Pass)
        .cloned()
        .collect();
    ranked.sort_by(strongest_first);
    ranked
}

pub fn build_boards(edges: &[EdgeRecord]) -> BoardSet {
    let ranked = rank(edges);

    let mut seen = HashSet::new();
    let unified = ranked
        .iter()
        .filter(|e| seen.insert(e.key.clone()))
        .cloned()
        .collect();

    let mut per_source: BTreeMap<String, Vec<EdgeRecord>> = BTreeMap::new();
    for e in ranked {
        per_source.entry(e.source.clone()).or_default().push(e);
    }

    BoardSet {
        unified,
        per_source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::classify;
    use crate::types::{
        CalibrationStatus, CanonicalPropKey, LinePricing, LineSnapshot, Market,
        ProjectionSnapshot, StatCode,
    };
    use chrono::{NaiveDate, Utc};

    fn edge(player_id: u64, source: &str, projection: f64, line: f64) -> EdgeRecord {
        let raw_edge = projection - line;
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
                variance: 1.0,
                minutes_estimate: 30.0,
                model_version: "proj-a".into(),
            },
            line: LineSnapshot {
                line_value: line,
                pricing: LinePricing::default(),
                scrape_timestamp: Utc::now(),
            },
            raw_edge,
            direction: classify(raw_edge, 0.25),
            calibration_status: CalibrationStatus::Uncalibrated,
            true_projection: projection,
            true_edge: raw_edge,
            calibration_version: None,
        }
    }

    #[test]
    fn test_unified_board_keeps_strongest_per_player() {
        let edges = vec![
            edge(1, "prizepicks", 25.0, 23.5),
            edge(1, "underdog", 25.0, 21.5),
            edge(2, "prizepicks", 10.0, 12.5),
        ];
        let boards = build_boards(&edges);
        assert_eq!(boards.unified.len(), 2);
        assert_eq!(boards.unified[0].source, "underdog");
        assert_eq!(boards.unified[1].key.player_id, 2);
        assert_eq!(boards.per_source["prizepicks"].len(), 2);
        assert_eq!(boards.per_source["underdog"].len(), 1);
    }

    #[test]
    fn test_pass_records_never_on_boards() {
        let boards = build_boards(&[edge(1, "prizepicks", 20.1, 20.0)]);
        assert!(boards.is_empty());
        assert!(boards.per_source.is_empty());
    }

    #[test]
    fn test_calibrated_edge_drives_ranking() {
        let mut a = edge(1, "prizepicks", 25.0, 22.0);
        a.calibration_status = CalibrationStatus::Calibrated;
        a.true_projection = 22.5;
        a.true_edge = 0.5;
        let b = edge(2, "prizepicks", 23.0, 22.0);
        let ranked = rank(&[a, b]);
        assert_eq!(ranked[0].key.player_id, 2);
    }

    #[test]
    fn test_board_rows_expose_fields() {
        let boards = build_boards(&[edge(3, "underdog", 18.0, 15.5)]);
        let rows = boards.unified_rows();
        assert_eq!(rows[0].stat_or_combo, "PTS");
        assert_eq!(rows[0].direction, Direction::Over);
        assert_eq!(boards.boards().count(), 2);
    }
}
