//! Calibrator
//!
//! Learns the residual (actual - raw projection) from the graded ledger with a
//! gradient-boosted tree ensemble and overlays `true_projection`/`true_edge`
//! on edge records. Only (market, source) pairs with enough graded history are
//! served; everything else passes through uncalibrated.
//!
//! Models are immutable. Publishing swaps the registry pointer to a new
//! version; runs already holding the previous `Arc` keep using it.

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;

use crate::config::CalibrationConfig;
use crate::error::PipelineError;
use crate::trees::{BoostingParams, GradientBoosted, TreeParams};
use crate::types::{CalibrationStatus, EdgeRecord, GradedOutcome, Market};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationExample {
    pub market: Market,
    pub source: String,
    pub raw_projection: f64,
    pub line_value: f64,
    pub actual_value: f64,
}

impl From<&GradedOutcome> for CalibrationExample {
    fn from(g: &GradedOutcome) -> Self {
        Self {
            market: g.key.market.clone(),
            source: g.source.clone(),
            raw_projection: g.raw_projection,
            line_value: g.line_value,
            actual_value: g.actual_value,
        }
    }
}

fn coverage_key(market: &Market, source: &str) -> String {
    format!("{}|{}", market.code(), source)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationModel {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub min_samples: usize,
    pub training_rows: usize,
    /// Graded examples seen per "MARKET|source", covered or not
    pub coverage: BTreeMap<String, usize>,
    markets: Vec<String>,
    sources: Vec<String>,
    model: Option<GradientBoosted>,
}

impl CalibrationModel {
    pub fn train(examples: &[CalibrationExample], cfg: &CalibrationConfig) -> anyhow::Result<Self> {
        let mut coverage: BTreeMap<String, usize> = BTreeMap::new();
        for e in examples {
            *coverage.entry(coverage_key(&e.market, &e.source)).or_default() += 1;
        }

        let covered: Vec<&CalibrationExample> = examples
            .iter()
            .filter(|e| {
                coverage
                    .get(&coverage_key(&e.market, &e.source))
                    .is_some_and(|n| *n >= cfg.min_samples)
            })
            .filter(|e| e.raw_projection.is_finite() && e.actual_value.is_finite())
            .collect();

        let markets: Vec<String> = covered
            .iter()
            .map(|e| e.market.code())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let sources: Vec<String> = covered
            .iter()
            .map(|e| e.source.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut model = Self {
            version: String::new(),
            created_at: Utc::now(),
            min_samples: cfg.min_samples,
            training_rows: covered.len(),
            coverage,
            markets,
            sources,
            model: None,
        };

        if !covered.is_empty() {
            let x: Vec<Vec<f64>> = covered
                .iter()
                .map(|e| model.features(&e.market, &e.source, e.raw_projection, e.line_value))
                .collect();
            let y: Vec<f64> = covered
                .iter()
                .map(|e| e.actual_value - e.raw_projection)
                .collect();
            model.model = Some(GradientBoosted::fit(
                &x,
                &y,
                &BoostingParams {
                    n_estimators: cfg.n_estimators,
                    learning_rate: cfg.learning_rate,
                    tree: TreeParams {
                        max_depth: cfg.max_depth,
                        min_leaf: cfg.min_leaf,
                    },
                },
            ));
        }

        let hash = Sha256::digest(serde_json::to_vec(&model)?);
        model.version = format!("cal-{}", &format!("{:x}", hash)[..16]);
        info!(
            "Trained calibration {} on {} rows ({} markets, {} sources)",
            model.version,
            model.training_rows,
            model.markets.len(),
            model.sources.len()
        );
        Ok(model)
    }

    fn features(&self, market: &Market, source: &str, raw: f64, line: f64) -> Vec<f64> {
        let mut row = vec![raw, line, raw - line];
        let code = market.code();
        row.extend(self.markets.iter().map(|m| if *m == code { 1.0 } else { 0.0 }));
        row.extend(self.sources.iter().map(|s| if s == source { 1.0 } else { 0.0 }));
        row
    }

    pub fn samples(&self, market: &Market, source: &str) -> usize {
        self.coverage
            .get(&coverage_key(market, source))
            .copied()
            .unwrap_or(0)
    }

    pub fn is_covered(&self, market: &Market, source: &str) -> bool {
        self.model.is_some() && self.samples(market, source) >= self.min_samples
    }

    /// Predicted residual, or None when the pair is not covered
    pub fn predict_residual(&self, market: &Market, source: &str, raw: f64, line: f64) -> Option<f64> {
        if !self.is_covered(market, source) {
            return None;
        }
        let model = self.model.as_ref()?;
        let r = model.predict(&self.features(market, source, raw, line));
        r.is_finite().then_some(r)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Overlay calibrated fields in place. Uncovered records are left untouched
/// and reported once per (market, source).
pub fn calibrate_edges(
    model: Option<&CalibrationModel>,
    edges: &mut [EdgeRecord],
    min_samples: usize,
) -> Vec<PipelineError> {
    let mut reported = BTreeSet::new();
    let mut diagnostics = Vec::new();

    for edge in edges.iter_mut() {
        let raw = edge.projection.value;
        let line = edge.line.line_value;
        let residual = model.and_then(|m| m.predict_residual(&edge.key.market, &edge.source, raw, line));

        match (model, residual) {
            (Some(m), Some(r)) => {
                edge.true_projection = raw + r;
                edge.true_edge = edge.true_projection - line;
                edge.calibration_status = CalibrationStatus::Calibrated;
                edge.calibration_version = Some(m.version.clone());
            }
            _ => {
                edge.calibration_status = CalibrationStatus::Uncalibrated;
                edge.true_projection = raw;
                edge.true_edge = edge.raw_edge;
                edge.calibration_version = None;
                if reported.insert(coverage_key(&edge.key.market, &edge.source)) {
                    diagnostics.push(PipelineError::CalibrationCoverage {
                        market: edge.key.market.code(),
                        book: edge.source.clone(),
                        samples: model.map(|m| m.samples(&edge.key.market, &edge.source)).unwrap_or(0),
                        required: model.map(|m| m.min_samples).unwrap_or(min_samples),
                    });
                }
            }
        }
    }
    diagnostics
}

/// Holds the active calibration version
#[derive(Default)]
pub struct CalibrationRegistry {
    current: ArcSwapOption<CalibrationModel>,
}

impl CalibrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(model: CalibrationModel) -> Self {
        let registry = Self::new();
        registry.publish(model);
        registry
    }

    /// Replace the active version; readers holding the old `Arc` are unaffected
    pub fn publish(&self, model: CalibrationModel) {
        info!("Publishing calibration version {}", model.version);
        self.current.store(Some(Arc::new(model)));
    }

    pub fn current(&self) -> Option<Arc<CalibrationModel>> {
        self.current.load_full()
    }

    pub fn version(&self) -> Option<String> {
        self.current().map(|m| m.version.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::classify;
    use crate::types::{
        CanonicalPropKey, LinePricing, LineSnapshot, ProjectionSnapshot, StatCode,
    };
    use chrono::NaiveDate;

    fn examples(market: Market, source: &str, n: usize, bias: f64) -> Vec<CalibrationExample> {
        (0..n)
            .map(|i| {
                let raw = 15.0 + (i % 10) as f64;
                CalibrationExample {
                    market: market.clone(),
                    source: source.into(),
                    raw_projection: raw,
                    line_value: raw - 0.5,
                    actual_value: raw + bias,
                }
            })
            .collect()
    }

    fn edge(market: Market, source: &str, raw: f64, line: f64) -> EdgeRecord {
        let raw_edge = raw - line;
        EdgeRecord {
            key: CanonicalPropKey::new(1, market, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()),
            player_name: "P".into(),
            source: source.into(),
            projection: ProjectionSnapshot {
                value: raw,
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
            true_projection: raw,
            true_edge: raw_edge,
            calibration_version: None,
        }
    }

    #[test]
    fn test_covered_pair_learns_bias() {
        let pts = Market::Stat(StatCode::Pts);
        let model = CalibrationModel::train(&examples(pts.clone(), "prizepicks", 80, -2.0), &CalibrationConfig::default())
            .unwrap();
        let mut edges = vec![edge(pts, "prizepicks", 20.0, 19.5)];
        let diags = calibrate_edges(Some(&model), &mut edges, 50);
        assert!(diags.is_empty());
        let e = &edges[0];
        assert_eq!(e.calibration_status, CalibrationStatus::Calibrated);
        assert!((e.true_projection - 18.0).abs() < 0.1);
        assert!((e.true_edge - (e.true_projection - 19.5)).abs() < 1e-9);
        assert_eq!(e.projection.value, 20.0);
        assert_eq!(e.calibration_version.as_deref(), Some(model.version.as_str()));
    }

    #[test]
    fn test_thin_pair_stays_uncalibrated() {
        let pts = Market::Stat(StatCode::Pts);
        let reb = Market::Stat(StatCode::Reb);
        let mut training = examples(pts, "prizepicks", 80, -2.0);
        training.extend(examples(reb.clone(), "underdog", 10, 3.0));
        let model = CalibrationModel::train(&training, &CalibrationConfig::default()).unwrap();

        let mut edges = vec![edge(reb, "underdog", 8.0, 6.5)];
        let diags = calibrate_edges(Some(&model), &mut edges, 50);
        let e = &edges[0];
        assert_eq!(e.calibration_status, CalibrationStatus::Uncalibrated);
        assert_eq!(e.true_projection, e.projection.value);
        assert_eq!(e.true_edge, e.raw_edge);
        assert_eq!(
            diags,
            vec![PipelineError::CalibrationCoverage {
                market: "REB".into(),
                book: "underdog".into(),
                samples: 10,
                required: 50,
            }]
        );
    }

    #[test]
    fn test_no_model_passes_through() {
        let mut edges = vec![
            edge(Market::Stat(StatCode::Ast), "prizepicks", 7.0, 5.5),
            edge(Market::Stat(StatCode::Ast), "prizepicks", 6.0, 5.5),
        ];
        let diags = calibrate_edges(None, &mut edges, 50);
        assert_eq!(diags.len(), 1);
        assert!(edges.iter().all(|e| e.calibration_status == CalibrationStatus::Uncalibrated));
    }

    #[test]
    fn test_registry_swaps_versions_without_touching_old() {
        let pts = Market::Stat(StatCode::Pts);
        let cfg = CalibrationConfig::default();
        let first = CalibrationModel::train(&examples(pts.clone(), "prizepicks", 60, 1.0), &cfg).unwrap();
        let registry = CalibrationRegistry::with_model(first);
        let held = registry.current().unwrap();

        let second = CalibrationModel::train(&examples(pts, "prizepicks", 60, -1.0), &cfg).unwrap();
        let second_version = second.version.clone();
        registry.publish(second);

        assert_ne!(held.version, second_version);
        assert_eq!(registry.version(), Some(second_version));
    }

    #[test]
    fn test_json_round_trip_keeps_predictions() {
        let pts = Market::Stat(StatCode::Pts);
        let model = CalibrationModel::train(&examples(pts.clone(), "prizepicks", 60, 1.5), &CalibrationConfig::default())
            .unwrap();
        let restored = CalibrationModel::from_json(&model.to_json().unwrap()).unwrap();
        let a = model.predict_residual(&pts, "prizepicks", 20.0, 19.5).unwrap();
        let b = restored.predict_residual(&pts, "prizepicks", 20.0, 19.5).unwrap();
        assert!((a - b).abs() < 1e-9);
        assert_eq!(restored.version, model.version);
    }
}
