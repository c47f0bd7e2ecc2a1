//! Pipeline configuration
//!
//! One immutable value per run. Every tunable named by the pipeline lives here;
//! nothing is read from ambient state once a run starts.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::{PipelineError, PipelineResult};
use crate::injuries::InjuryStatus;
use crate::types::{ComboCode, PlayerId, StatCode};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub features: FeatureConfig,
    pub league_priors: LeaguePriors,
    pub projector: ProjectorConfig,
    pub adjuster: AdjusterConfig,
    pub combos: ComboConfig,
    pub normalizer: NormalizerConfig,
    pub matching: MatchConfig,
    pub calibration: CalibrationConfig,
    pub tracker: TrackerConfig,
    pub injuries: InjuryConfig,
    pub sources: SourceConfig,
}

/// Rolling-window feature construction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub short_window: usize,
    pub medium_window: usize,
    /// Minimum season games before rolling windows are trusted
    pub min_games: usize,
    /// Per-game decay of recency weights inside a window (1.0 = flat)
    pub recency_decay: f64,
    /// Span of the exponentially weighted mean
    pub ewm_span: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            short_window: 5,
            medium_window: 15,
            min_games: 3,
            recency_decay: 0.85,
            ewm_span: 5.0,
        }
    }
}

/// League-average priors used when a player (or the whole league) lacks data
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaguePriors {
    pub per_minute: BTreeMap<StatCode, f64>,
    pub minutes: f64,
    pub pace: f64,
    pub usage: f64,
}

impl Default for LeaguePriors {
    fn default() -> Self {
        Self {
            per_minute: BTreeMap::from([
                (StatCode::Pts, 0.46),
                (StatCode::Reb, 0.19),
                (StatCode::Ast, 0.11),
                (StatCode::Stl, 0.033),
                (StatCode::Blk, 0.021),
                (StatCode::Tov, 0.095),
            ]),
            minutes: 22.0,
            pace: 99.0,
            usage: 0.55,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectorConfig {
    /// Regulation game length; projected minutes never exceed it
    pub minutes_cap: f64,
    /// Outputs below these floors are flagged implausible
    pub implausible_floor: BTreeMap<StatCode, f64>,
    /// Per-player inference timeout
    pub inference_timeout_ms: u64,
    /// Worker-pool width for per-player projection
    pub concurrency: usize,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            minutes_cap: 48.0,
            implausible_floor: BTreeMap::from([(StatCode::Tov, 0.25)]),
            inference_timeout_ms: 5_000,
            concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjusterConfig {
    pub fallback_enabled: bool,
    pub superstar_enabled: bool,
    pub bounds_enabled: bool,
    pub workload_enabled: bool,
    pub superstar: SuperstarConfig,
    pub bounds: BoundsConfig,
    pub workload: WorkloadConfig,
}

impl Default for AdjusterConfig {
    fn default() -> Self {
        Self {
            fallback_enabled: true,
            superstar_enabled: true,
            bounds_enabled: true,
            workload_enabled: true,
            superstar: SuperstarConfig::default(),
            bounds: BoundsConfig::default(),
            workload: WorkloadConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuperstarConfig {
    /// Usage percentile (0..1) at or above which a player is eligible
    pub usage_percentile: f64,
    /// Fraction below the rolling average that triggers the blend
    pub drop_threshold: f64,
    /// Weight given to the rolling average in the blend
    pub blend_weight: f64,
}

impl Default for SuperstarConfig {
    fn default() -> Self {
        Self {
            usage_percentile: 0.85,
            drop_threshold: 0.15,
            blend_weight: 0.65,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundsConfig {
    /// Ceiling as a multiple of the player's historical maximum
    pub max_multiple: f64,
    /// Hard ceiling per stat, also used when a player has no history
    pub absolute_caps: BTreeMap<StatCode, f64>,
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            max_multiple: 1.5,
            absolute_caps: BTreeMap::from([
                (StatCode::Pts, 70.0),
                (StatCode::Reb, 30.0),
                (StatCode::Ast, 25.0),
                (StatCode::Stl, 8.0),
                (StatCode::Blk, 10.0),
                (StatCode::Tov, 12.0),
            ]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Stats treated as per-minute rates
    pub rate_stats: Vec<StatCode>,
    pub min_ratio: f64,
    pub max_ratio: f64,
    /// How strongly team pace moves the projection (0 disables pace)
    pub pace_weight: f64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            rate_stats: StatCode::ALL.to_vec(),
            min_ratio: 0.6,
            max_ratio: 1.4,
            pace_weight: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComboDefinition {
    pub code: ComboCode,
    pub stats: Vec<StatCode>,
    /// Per-constituent multipliers; unlisted constituents weigh 1.0
    #[serde(default)]
    pub weights: BTreeMap<StatCode, f64>,
    /// Extra source labels that name this combo, e.g. "Fantasy Score"
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl ComboDefinition {
    pub fn new(code: &str, stats: &[StatCode]) -> Self {
        Self {
            code: ComboCode::new(code),
            stats: stats.to_vec(),
            weights: BTreeMap::new(),
            aliases: Vec::new(),
        }
    }

    pub fn weighted(mut self, weights: &[(StatCode, f64)]) -> Self {
        self.weights = weights.iter().copied().collect();
        self
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn stat_set(&self) -> BTreeSet<StatCode> {
        self.stats.iter().copied().collect()
    }

    pub fn weight(&self, stat: StatCode) -> f64 {
        self.weights.get(&stat).copied().unwrap_or(1.0)
    }

    /// Plain sums can be recognized from a "Pts+Rebs" style label
    pub fn is_plain_sum(&self) -> bool {
        self.stats.iter().all(|s| self.weight(*s) == 1.0)
    }

    /// Weighted sum over the distinct constituents
    pub fn combine(&self, value_of: impl Fn(StatCode) -> f64) -> f64 {
        self.stat_set()
            .into_iter()
            .map(|s| self.weight(s) * value_of(s))
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovarianceEntry {
    pub a: StatCode,
    pub b: StatCode,
    pub covariance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComboConfig {
    pub definitions: Vec<ComboDefinition>,
    /// Pairwise covariance overrides; pairs not listed are independent
    pub covariance: Vec<CovarianceEntry>,
}

impl Default for ComboConfig {
    fn default() -> Self {
        use StatCode::*;
        Self {
            definitions: vec![
                ComboDefinition::new("PR", &[Pts, Reb]),
                ComboDefinition::new("PA", &[Pts, Ast]),
                ComboDefinition::new("RA", &[Reb, Ast]),
                ComboDefinition::new("PRA", &[Pts, Reb, Ast]),
                ComboDefinition::new("SB", &[Stl, Blk]),
                ComboDefinition::new("FANTASY", &[Pts, Reb, Ast, Stl, Blk])
                    .weighted(&[(Reb, 1.2), (Ast, 1.5), (Stl, 3.0), (Blk, 3.0)])
                    .with_aliases(&["Fantasy Score", "Fantasy Points", "fantasy_points"]),
            ],
            covariance: Vec::new(),
        }
    }
}

impl ComboConfig {
    pub fn definition(&self, code: &ComboCode) -> Option<&ComboDefinition> {
        self.definitions.iter().find(|d| &d.code == code)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Minimum Jaro-Winkler similarity for a fuzzy player match
    pub fuzzy_threshold: f64,
    /// Required lead of the best fuzzy candidate over the runner-up
    pub ambiguity_margin: f64,
    /// Source-specific spellings mapped straight to a player id
    pub player_aliases: BTreeMap<String, PlayerId>,
    /// Source team labels mapped to canonical abbreviations
    pub team_aliases: BTreeMap<String, String>,
    /// Extra stat labels mapped to stat or combo codes
    pub stat_aliases: BTreeMap<String, String>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.93,
            ambiguity_margin: 0.03,
            player_aliases: BTreeMap::new(),
            team_aliases: BTreeMap::new(),
            stat_aliases: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// |edge| at or below this is a PASS
    pub edge_epsilon: f64,
    /// Lines scraped longer ago than this are excluded
    pub staleness_secs: i64,
    /// Projections below this many minutes never reach a board
    pub minutes_floor: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            edge_epsilon: 0.25,
            staleness_secs: 6 * 3600,
            minutes_floor: 12.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Minimum graded examples per (market, source) before calibrating
    pub min_samples: usize,
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_leaf: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_samples: 50,
            n_estimators: 200,
            learning_rate: 0.05,
            max_depth: 3,
            min_leaf: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Ascending boundaries over |edge|
    pub edge_buckets: Vec<f64>,
    /// American price assumed when a line carries none
    pub default_price: i32,
    /// Per-source override of the default price
    pub source_prices: BTreeMap<String, i32>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            edge_buckets: vec![0.5, 1.0, 2.0, 3.0, 5.0],
            default_price: -110,
            source_prices: BTreeMap::new(),
        }
    }
}

impl TrackerConfig {
    pub fn price_for(&self, source: &str) -> i32 {
        self.source_prices
            .get(source)
            .copied()
            .unwrap_or(self.default_price)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InjuryConfig {
    pub enabled: bool,
    /// Statuses that take a teammate out of the rotation
    pub impact_statuses: Vec<InjuryStatus>,
    /// Relative usage increase for the remaining players
    pub usage_bump: f64,
    /// Relative minutes increase for the remaining players
    pub minutes_bump: f64,
}

impl Default for InjuryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            impact_statuses: vec![InjuryStatus::Out, InjuryStatus::Doubtful],
            usage_bump: 0.10,
            minutes_bump: 0.06,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub timeout_secs: u64,
    /// Attempts per request for sources that fail transiently
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            max_retries: 3,
            retry_backoff_ms: 1_000,
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file; absent fields take their defaults
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {}", path.display(), e))?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would silently produce wrong output
    pub fn validate(&self) -> PipelineResult<()> {
        let bad = |msg: String| Err(PipelineError::Configuration(msg));

        let f = &self.features;
        if f.short_window == 0 || f.medium_window < f.short_window {
            return bad(format!(
                "windows must satisfy 0 < short ({}) <= medium ({})",
                f.short_window, f.medium_window
            ));
        }
        if !(f.recency_decay > 0.0 && f.recency_decay <= 1.0) {
            return bad(format!("recency_decay {} outside (0, 1]", f.recency_decay));
        }
        if f.ewm_span < 1.0 {
            return bad(format!("ewm_span {} must be >= 1", f.ewm_span));
        }

        if self.projector.minutes_cap <= 0.0 {
            return bad("minutes_cap must be positive".into());
        }
        if self.projector.concurrency == 0 {
            return bad("projector concurrency must be at least 1".into());
        }

        let s = &self.adjuster.superstar;
        if !(s.usage_percentile > 0.0 && s.usage_percentile < 1.0) {
            return bad(format!("usage_percentile {} outside (0, 1)", s.usage_percentile));
        }
        if !(0.0..=1.0).contains(&s.blend_weight) {
            return bad(format!("blend_weight {} outside [0, 1]", s.blend_weight));
        }
        if !(0.0..1.0).contains(&s.drop_threshold) {
            return bad(format!("drop_threshold {} outside [0, 1)", s.drop_threshold));
        }

        let b = &self.adjuster.bounds;
        if b.max_multiple < 1.0 {
            return bad(format!("bounds max_multiple {} must be >= 1", b.max_multiple));
        }
        for stat in StatCode::ALL {
            match b.absolute_caps.get(&stat) {
                Some(cap) if *cap > 0.0 => {}
                Some(cap) => return bad(format!("absolute cap for {} is {}", stat, cap)),
                None => return bad(format!("missing absolute cap for {}", stat)),
            }
        }

        let w = &self.adjuster.workload;
        if w.min_ratio <= 0.0 || w.max_ratio < w.min_ratio {
            return bad(format!(
                "workload ratio bounds [{}, {}] are malformed",
                w.min_ratio, w.max_ratio
            ));
        }

        let mut seen = BTreeSet::new();
        for def in &self.combos.definitions {
            if !seen.insert(def.code.clone()) {
                return bad(format!("combo {} defined twice", def.code));
            }
            if def.stats.len() < 2 {
                return bad(format!("combo {} needs at least two stats", def.code));
            }
            if def.stat_set().len() != def.stats.len() {
                return bad(format!("combo {} repeats a constituent", def.code));
            }
            if StatCode::from_code(def.code.as_str()).is_some() {
                return bad(format!("combo code {} collides with a base stat", def.code));
            }
            for (stat, w) in &def.weights {
                if !def.stats.contains(stat) {
                    return bad(format!("combo {} weights {} which is not a constituent", def.code, stat));
                }
                if !w.is_finite() || *w <= 0.0 {
                    return bad(format!("combo {} weight {} for {} must be positive", def.code, w, stat));
                }
            }
        }
        for c in &self.combos.covariance {
            if c.a == c.b {
                return bad(format!("covariance entry pairs {} with itself", c.a));
            }
            if !c.covariance.is_finite() {
                return bad(format!("covariance for {}/{} is not finite", c.a, c.b));
            }
        }

        let n = &self.normalizer;
        if !(0.0..=1.0).contains(&n.fuzzy_threshold) || n.ambiguity_margin < 0.0 {
            return bad("fuzzy threshold/margin malformed".into());
        }

        let m = &self.matching;
        if m.edge_epsilon < 0.0 {
            return bad(format!("edge_epsilon {} is negative", m.edge_epsilon));
        }
        if m.staleness_secs <= 0 {
            return bad("staleness_secs must be positive".into());
        }

        let i = &self.injuries;
        if !(0.0..1.0).contains(&i.usage_bump) || !(0.0..1.0).contains(&i.minutes_bump) {
            return bad(format!(
                "injury bumps ({}, {}) outside [0, 1)",
                i.usage_bump, i.minutes_bump
            ));
        }

        let c = &self.calibration;
        if c.min_samples == 0 || c.n_estimators == 0 || c.learning_rate <= 0.0 {
            return bad("calibration parameters must be positive".into());
        }

        let buckets = &self.tracker.edge_buckets;
        if buckets.iter().any(|v| !v.is_finite() || *v <= 0.0)
            || buckets.windows(2).any(|w| w[0] >= w[1])
        {
            return bad(format!(
                "edge bucket boundaries {:?} must be positive and strictly ascending",
                buckets
            ));
        }
        if self.tracker.default_price.abs() < 100 {
            return bad(format!("default price {} is not an American price", self.tracker.default_price));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_unsorted_buckets_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.tracker.edge_buckets = vec![1.0, 0.5];
        let err = cfg.validate().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_single_stat_combo_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.combos
            .definitions
            .push(ComboDefinition::new("PTSX", &[StatCode::Pts]));
        assert!(matches!(
            cfg.validate(),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn test_blend_weight_out_of_range_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.adjuster.superstar.blend_weight = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{"matching": {"edge_epsilon": 0.5}}"#).unwrap();
        assert_eq!(cfg.matching.edge_epsilon, 0.5);
        assert_eq!(cfg.matching.minutes_floor, 12.0);
        assert_eq!(cfg.combos.definitions.len(), 6);
        assert_eq!(cfg.injuries.minutes_bump, 0.06);
    }

    #[test]
    fn test_fantasy_combo_is_weighted() {
        let cfg = ComboConfig::default();
        let fantasy = cfg.definition(&ComboCode::new("FANTASY")).unwrap();
        assert!(!fantasy.is_plain_sum());
        // 20 + 1.2*10 + 1.5*5 + 3*2 + 3*1
        let value = fantasy.combine(|s| match s {
            StatCode::Pts => 20.0,
            StatCode::Reb => 10.0,
            StatCode::Ast => 5.0,
            StatCode::Stl => 2.0,
            StatCode::Blk => 1.0,
            StatCode::Tov => 100.0,
        });
        assert!((value - 48.5).abs() < 1e-9);
        assert!(cfg.definition(&ComboCode::new("PRA")).unwrap().is_plain_sum());
    }

    #[test]
    fn test_weight_on_non_constituent_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.combos.definitions.push(
            ComboDefinition::new("PRX", &[StatCode::Pts, StatCode::Reb])
                .weighted(&[(StatCode::Tov, 2.0)]),
        );
        assert!(matches!(cfg.validate(), Err(PipelineError::Configuration(_))));
    }
}
