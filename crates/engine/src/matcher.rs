//! Edge matcher
//!
//! Joins canonical lines to the projection store on `CanonicalPropKey` and
//! computes raw edge and direction. Stale lines and low-minutes projections
//! are excluded; unmatched lines and projections are kept for reporting.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::MatchConfig;
use crate::error::PipelineError;
use crate::types::{
    CalibrationStatus, CanonicalPropKey, Direction, EdgeRecord, LineSnapshot, Market,
    PlayerProjections, ProjectionSnapshot, PropLine,
};

#[derive(Debug, Clone)]
pub struct StoredProjection {
    pub player_name: String,
    pub snapshot: ProjectionSnapshot,
}

/// Per-run projections addressable by canonical key
#[derive(Debug, Clone, Default)]
pub struct ProjectionStore {
    entries: BTreeMap<CanonicalPropKey, StoredProjection>,
}

impl ProjectionStore {
    pub fn from_players(players: &[PlayerProjections]) -> Self {
        let mut entries = BTreeMap::new();
        for p in players {
            for stat in &p.stats {
                entries.insert(
                    CanonicalPropKey::new(p.player_id, Market::Stat(stat.stat), p.game_date),
                    StoredProjection {
                        player_name: p.player_name.clone(),
                        snapshot: ProjectionSnapshot {
                            value: stat.adjusted_value,
                            variance: stat.variance,
                            minutes_estimate: stat.minutes_estimate,
                            model_version: stat.model_version.clone(),
                        },
                    },
                );
            }
            let model_version = p
                .stats
                .first()
                .map(|s| s.model_version.clone())
                .unwrap_or_default();
            for combo in &p.combos {
                entries.insert(
                    CanonicalPropKey::new(p.player_id, Market::Combo(combo.combo.clone()), p.game_date),
                    StoredProjection {
                        player_name: p.player_name.clone(),
                        snapshot: ProjectionSnapshot {
                            value: combo.value,
                            variance: combo.variance,
                            minutes_estimate: p.minutes_estimate,
                            model_version: model_version.clone(),
                        },
                    },
                );
            }
        }
        Self { entries }
    }

    pub fn get(&self, key: &CanonicalPropKey) -> Option<&StoredProjection> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &CanonicalPropKey> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// OVER above +epsilon, UNDER below -epsilon, PASS otherwise
pub fn classify(edge: f64, epsilon: f64) -> Direction {
    if edge > epsilon {
        Direction::Over
    } else if edge < -epsilon {
        Direction::Under
    } else {
        Direction::Pass
    }
}

#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub edges: Vec<EdgeRecord>,
    pub unmatched_lines: Vec<PropLine>,
    pub unmatched_projections: Vec<CanonicalPropKey>,
    pub stale_lines: Vec<PropLine>,
    pub below_floor: Vec<PropLine>,
    pub diagnostics: Vec<PipelineError>,
}

/// Keep one line per (source, key): the latest scrape wins
fn dedupe_lines(mut lines: Vec<PropLine>) -> Vec<PropLine> {
    lines.sort_by(|a, b| {
        (&a.source, &a.key, a.scrape_timestamp).cmp(&(&b.source, &b.key, b.scrape_timestamp))
    });
    let mut out: Vec<PropLine> = Vec::with_capacity(lines.len());
    for line in lines {
        match out.last_mut() {
            Some(prev) if prev.source == line.source && prev.key == line.key => *prev = line,
            _ => out.push(line),
        }
    }
    out
}

pub fn match_edges(
    store: &ProjectionStore,
    lines: Vec<PropLine>,
    cfg: &MatchConfig,
    now: DateTime<Utc>,
) -> MatchOutcome {
    let mut outcome = MatchOutcome::default();
    let mut matched_keys = BTreeSet::new();

    for line in dedupe_lines(lines) {
        let age_secs = (now - line.scrape_timestamp).num_seconds();
        if age_secs > cfg.staleness_secs {
            outcome.diagnostics.push(PipelineError::StaleLine {
                book: line.source.clone(),
                key: line.key.to_string(),
                age_secs,
            });
            outcome.stale_lines.push(line);
            continue;
        }

        let Some(stored) = store.get(&line.key) else {
            outcome.unmatched_lines.push(line);
            continue;
        };
        matched_keys.insert(line.key.clone());

        let projection = &stored.snapshot;
        if projection.minutes_estimate < cfg.minutes_floor {
            debug!(
                "Skipping {} from {}: {:.1} projected minutes below floor",
                line.key, line.source, projection.minutes_estimate
            );
            outcome.below_floor.push(line);
            continue;
        }

        let raw_edge = projection.value - line.line_value;
        outcome.edges.push(EdgeRecord {
            key: line.key.clone(),
            player_name: stored.player_name.clone(),
            source: line.source.clone(),
            projection: projection.clone(),
            line: LineSnapshot {
                line_value: line.line_value,
                pricing: line.pricing,
                scrape_timestamp: line.scrape_timestamp,
            },
            raw_edge,
            direction: classify(raw_edge, cfg.edge_epsilon),
            calibration_status: CalibrationStatus::Uncalibrated,
            true_projection: projection.value,
            true_edge: raw_edge,
            calibration_version: None,
        });
    }

    outcome.unmatched_projections = store
        .keys()
        .filter(|k| !matched_keys.contains(*k))
        .cloned()
        .collect();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LinePricing, Projection, StatCode};
    use chrono::{Duration, NaiveDate};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
    }

    fn players(minutes: f64) -> Vec<PlayerProjections> {
        let proj = |stat, value| Projection {
            player_id: 9,
            stat,
            raw_value: Some(value),
            adjusted_value: value,
            minutes_estimate: minutes,
            variance: 4.0,
            model_version: "proj-a".into(),
            timestamp: Utc::now(),
            adjustments: Vec::new(),
        };
        vec![PlayerProjections {
            player_id: 9,
            player_name: "Wing".into(),
            team: "MIA".into(),
            opponent: Some("ORL".into()),
            game_date: date(),
            minutes_estimate: minutes,
            stats: vec![proj(StatCode::Pts, 22.0), proj(StatCode::Reb, 6.1)],
            combos: Vec::new(),
        }]
    }

    fn line(source: &str, stat: StatCode, value: f64, age_mins: i64, now: DateTime<Utc>) -> PropLine {
        PropLine {
            source: source.into(),
            key: CanonicalPropKey::new(9, Market::Stat(stat), date()),
            player_name: "Wing".into(),
            line_value: value,
            pricing: LinePricing::default(),
            scrape_timestamp: now - Duration::minutes(age_mins),
        }
    }

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(classify(0.25, 0.25), Direction::Pass);
        assert_eq!(classify(-0.25, 0.25), Direction::Pass);
        assert_eq!(classify(0.26, 0.25), Direction::Over);
        assert_eq!(classify(-0.26, 0.25), Direction::Under);
    }

    #[test]
    fn test_edges_and_directions() {
        let now = Utc::now();
        let store = ProjectionStore::from_players(&players(32.0));
        let out = match_edges(
            &store,
            vec![
                line("prizepicks", StatCode::Pts, 20.5, 5, now),
                line("prizepicks", StatCode::Reb, 6.0, 5, now),
            ],
            &MatchConfig::default(),
            now,
        );
        assert_eq!(out.edges.len(), 2);
        let pts = out.edges.iter().find(|e| e.key.market == Market::Stat(StatCode::Pts)).unwrap();
        assert!((pts.raw_edge - 1.5).abs() < 1e-9);
        assert_eq!(pts.direction, Direction::Over);
        assert_eq!(pts.true_projection, 22.0);
        let reb = out.edges.iter().find(|e| e.key.market == Market::Stat(StatCode::Reb)).unwrap();
        assert_eq!(reb.direction, Direction::Pass);
        assert!(out.unmatched_projections.is_empty());
    }

    #[test]
    fn test_stale_line_excluded() {
        let now = Utc::now();
        let store = ProjectionStore::from_players(&players(32.0));
        let out = match_edges(
            &store,
            vec![line("underdog", StatCode::Pts, 20.5, 7 * 60, now)],
            &MatchConfig::default(),
            now,
        );
        assert!(out.edges.is_empty());
        assert_eq!(out.stale_lines.len(), 1);
        assert_eq!(out.diagnostics[0].kind(), "stale_line");
    }

    #[test]
    fn test_minutes_floor_excludes_bench_players() {
        let now = Utc::now();
        let store = ProjectionStore::from_players(&players(8.0));
        let out = match_edges(
            &store,
            vec![line("underdog", StatCode::Pts, 2.5, 5, now)],
            &MatchConfig::default(),
            now,
        );
        assert!(out.edges.is_empty());
        assert_eq!(out.below_floor.len(), 1);
    }

    #[test]
    fn test_latest_duplicate_line_wins() {
        let now = Utc::now();
        let store = ProjectionStore::from_players(&players(32.0));
        let out = match_edges(
            &store,
            vec![
                line("prizepicks", StatCode::Pts, 24.5, 5, now),
                line("prizepicks", StatCode::Pts, 20.5, 60, now),
            ],
            &MatchConfig::default(),
            now,
        );
        assert_eq!(out.edges.len(), 1);
        assert_eq!(out.edges[0].line.line_value, 24.5);
        assert_eq!(out.edges[0].direction, Direction::Under);
    }

    #[test]
    fn test_unmatched_lines_and_projections_recorded() {
        let now = Utc::now();
        let store = ProjectionStore::from_players(&players(32.0));
        let mut other = line("prizepicks", StatCode::Ast, 4.5, 5, now);
        other.key.player_id = 77;
        let out = match_edges(&store, vec![other], &MatchConfig::default(), now);
        assert_eq!(out.unmatched_lines.len(), 1);
        assert_eq!(out.unmatched_projections.len(), 2);
    }
}
