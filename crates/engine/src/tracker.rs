//! Performance tracker
//!
//! Each (canonical key, source) moves PENDING -> GRADED exactly once. The
//! graded ledger is the only source of truth; bucket aggregates are kept
//! incrementally for cheap reads and can always be rebuilt by replay.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::config::{ComboConfig, TrackerConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::types::{
    ActualStatLine, CanonicalPropKey, Direction, EdgeRecord, Grade, GradedOutcome, Market, PropType,
};

// ============================================================================
// Grading primitives
// ============================================================================

/// Realized value for a market; combos use the same weighted sum as projection
pub fn actual_value(market: &Market, actual: &ActualStatLine, combos: &ComboConfig) -> Option<f64> {
    match market {
        Market::Stat(stat) => Some(actual.stat(*stat)),
        Market::Combo(code) => combos
            .definition(code)
            .map(|def| def.combine(|s| actual.stat(s))),
    }
}

pub fn grade_pick(direction: Direction, line: f64, actual: f64) -> Option<Grade> {
    let grade = match direction {
        Direction::Pass => return None,
        _ if actual == line => Grade::Push,
        Direction::Over if actual > line => Grade::Win,
        Direction::Under if actual < line => Grade::Win,
        _ => Grade::Loss,
    };
    Some(grade)
}

/// Units won on a one-unit stake at an American price
pub fn profit_units(grade: Grade, price: i32) -> Decimal {
    match grade {
        Grade::Push => Decimal::ZERO,
        Grade::Loss => -Decimal::ONE,
        Grade::Win if price < 0 => Decimal::from(100) / Decimal::from(price.unsigned_abs()),
        Grade::Win => Decimal::from(price) / Decimal::from(100),
    }
}

/// Label of the bucket containing |edge|, e.g. "1-2" or "5+"
pub fn edge_bucket(edge: f64, boundaries: &[f64]) -> String {
    let magnitude = edge.abs();
    let mut lower = 0.0;
    for &upper in boundaries {
        if magnitude < upper {
            return format!("{}-{}", lower, upper);
        }
        lower = upper;
    }
    format!("{}+", lower)
}

// ============================================================================
// Aggregates
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub prop_type: PropType,
    pub direction: Direction,
    pub edge_bucket: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct BucketAccumulator {
    count: u64,
    wins: u64,
    losses: u64,
    pushes: u64,
    edge_sum: f64,
    profit: Decimal,
}

impl BucketAccumulator {
    fn add(&mut self, g: &GradedOutcome) {
        self.count += 1;
        match g.grade {
            Grade::Win => self.wins += 1,
            Grade::Loss => self.losses += 1,
            Grade::Push => self.pushes += 1,
        }
        self.edge_sum += g.true_edge.abs();
        self.profit += g.profit;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRow {
    pub prop_type: PropType,
    pub direction: Direction,
    pub edge_bucket: String,
    pub count: u64,
    pub wins: u64,
    pub losses: u64,
    pub pushes: u64,
    /// Wins over decided picks; pushes excluded
    pub win_rate: f64,
    pub push_rate: f64,
    pub average_edge: f64,
    pub profit: Decimal,
    /// Profit per unit staked
    pub roi: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub rows: Vec<PerformanceRow>,
    pub graded: u64,
    pub profit: Decimal,
}

impl PerformanceReport {
    fn from_buckets(buckets: &BTreeMap<BucketKey, BucketAccumulator>) -> Self {
        let mut report = Self::default();
        for (key, acc) in buckets {
            let decided = acc.wins + acc.losses;
            report.graded += acc.count;
            report.profit += acc.profit;
            report.rows.push(PerformanceRow {
                prop_type: key.prop_type,
                direction: key.direction,
                edge_bucket: key.edge_bucket.clone(),
                count: acc.count,
                wins: acc.wins,
                losses: acc.losses,
                pushes: acc.pushes,
                win_rate: if decided > 0 {
                    acc.wins as f64 / decided as f64
                } else {
                    0.0
                },
                push_rate: if acc.count > 0 {
                    acc.pushes as f64 / acc.count as f64
                } else {
                    0.0
                },
                average_edge: if acc.count > 0 {
                    acc.edge_sum / acc.count as f64
                } else {
                    0.0
                },
                profit: acc.profit,
                roi: if acc.count > 0 {
                    (acc.profit / Decimal::from(acc.count)).round_dp(4)
                } else {
                    Decimal::ZERO
                },
            });
        }
        report
    }

    pub fn row(&self, prop_type: PropType, direction: Direction, bucket: &str) -> Option<&PerformanceRow> {
        self.rows
            .iter()
            .find(|r| r.prop_type == prop_type && r.direction == direction && r.edge_bucket == bucket)
    }

    /// Profit per unit across every graded pick
    pub fn overall_roi(&self) -> Decimal {
        if self.graded == 0 {
            Decimal::ZERO
        } else {
            (self.profit / Decimal::from(self.graded)).round_dp(4)
        }
    }
}

// ============================================================================
// Tracker
// ============================================================================

type LedgerKey = (CanonicalPropKey, String);

#[derive(Debug, Default)]
struct TrackerState {
    pending: BTreeMap<LedgerKey, EdgeRecord>,
    graded: HashMap<LedgerKey, usize>,
    ledger: Vec<GradedOutcome>,
    buckets: BTreeMap<BucketKey, BucketAccumulator>,
}

impl TrackerState {
    fn append(&mut self, outcome: GradedOutcome, boundaries: &[f64]) -> bool {
        let key = (outcome.key.clone(), outcome.source.clone());
        if self.graded.contains_key(&key) {
            return false;
        }
        self.pending.remove(&key);
        self.buckets
            .entry(bucket_key(&outcome, boundaries))
            .or_default()
            .add(&outcome);
        self.graded.insert(key, self.ledger.len());
        self.ledger.push(outcome);
        true
    }
}

fn bucket_key(g: &GradedOutcome, boundaries: &[f64]) -> BucketKey {
    BucketKey {
        prop_type: g.key.market.prop_type(),
        direction: g.direction,
        edge_bucket: edge_bucket(g.true_edge, boundaries),
    }
}

pub struct PerformanceTracker {
    config: TrackerConfig,
    combos: ComboConfig,
    state: RwLock<TrackerState>,
}

impl PerformanceTracker {
    pub fn new(config: TrackerConfig, combos: ComboConfig) -> Self {
        Self {
            config,
            combos,
            state: RwLock::new(TrackerState::default()),
        }
    }

    /// Track board picks until their results arrive. Already graded keys and
    /// PASS records are ignored. Returns how many became pending.
    pub fn register(&self, edges: &[EdgeRecord]) -> usize {
        let mut state = self.state.write();
        let mut added = 0;
        for e in edges.iter().filter(|e| e.direction != Direction::Pass) {
            let key = (e.key.clone(), e.source.clone());
            if state.graded.contains_key(&key) {
                continue;
            }
            if state.pending.insert(key, e.clone()).is_none() {
                added += 1;
            }
        }
        added
    }

    /// Grade every pending pick this result settles. Redelivery is a no-op.
    pub fn grade(&self, actual: &ActualStatLine, graded_at: DateTime<Utc>) -> Vec<GradedOutcome> {
        let mut state = self.state.write();
        let settled: Vec<LedgerKey> = state
            .pending
            .keys()
            .filter(|(k, _)| k.player_id == actual.player_id && k.game_date == actual.game_date)
            .cloned()
            .collect();

        let mut out = Vec::new();
        for key in settled {
            let Some(edge) = state.pending.get(&key).cloned() else {
                continue;
            };
            let Some(value) = actual_value(&edge.key.market, actual, &self.combos) else {
                debug!("No actual for {} from {}", edge.key, edge.source);
                continue;
            };
            let Some(outcome) = self.outcome_for(&edge, value, graded_at) else {
                continue;
            };
            if state.append(outcome.clone(), &self.config.edge_buckets) {
                out.push(outcome);
            }
        }
        if !out.is_empty() {
            info!(
                "Graded {} picks for player {} on {}",
                out.len(),
                actual.player_id,
                actual.game_date
            );
        }
        out
    }

    fn outcome_for(&self, edge: &EdgeRecord, actual: f64, graded_at: DateTime<Utc>) -> Option<GradedOutcome> {
        let grade = grade_pick(edge.direction, edge.line.line_value, actual)?;
        let price = edge
            .pick_price()
            .unwrap_or_else(|| self.config.price_for(&edge.source));
        Some(GradedOutcome {
            key: edge.key.clone(),
            source: edge.source.clone(),
            player_name: edge.player_name.clone(),
            direction: edge.direction,
            line_value: edge.line.line_value,
            raw_projection: edge.projection.value,
            true_projection: edge.true_projection,
            raw_edge: edge.raw_edge,
            true_edge: edge.true_edge,
            price,
            actual_value: actual,
            grade,
            profit: profit_units(grade, price),
            graded_at,
        })
    }

    /// Append an outcome graded elsewhere (e.g. loaded from storage).
    /// A second outcome for an already graded (key, source) is rejected.
    pub fn record(&self, outcome: GradedOutcome) -> PipelineResult<()> {
        let key = outcome.key.to_string();
        let book = outcome.source.clone();
        if self.state.write().append(outcome, &self.config.edge_buckets) {
            Ok(())
        } else {
            Err(PipelineError::GradingConflict { key, book })
        }
    }

    pub fn is_graded(&self, key: &CanonicalPropKey, source: &str) -> bool {
        self.state
            .read()
            .graded
            .contains_key(&(key.clone(), source.to_string()))
    }

    pub fn pending(&self) -> Vec<EdgeRecord> {
        self.state.read().pending.values().cloned().collect()
    }

    pub fn ledger(&self) -> Vec<GradedOutcome> {
        self.state.read().ledger.clone()
    }

    /// Aggregates from one consistent snapshot of the ledger
    pub fn report(&self) -> PerformanceReport {
        PerformanceReport::from_buckets(&self.state.read().buckets)
    }

    /// Rebuild aggregates from a ledger, ignoring duplicate (key, source)
    pub fn replay(outcomes: &[GradedOutcome], config: &TrackerConfig) -> PerformanceReport {
        let mut state = TrackerState::default();
        for o in outcomes {
            state.append(o.clone(), &config.edge_buckets);
        }
        PerformanceReport::from_buckets(&state.buckets)
    }
}
