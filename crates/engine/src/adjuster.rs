//! Projection adjuster
//!
//! Ordered, individually toggleable correction stages applied to every raw
//! projector output:
//!
//! 1. low-signal fallback (implausible output -> league rate x minutes)
//! 2. superstar blend toward the rolling average
//! 3. bounds clamp against the player's historical maximum
//! 4. workload scaling by minutes share and team pace
//!
//! Each stage is a pure function of the candidate and an immutable context.

use crate::config::AdjusterConfig;
use crate::features::{FeatureVector, LeagueContext};
use crate::projector::RawOutput;
use crate::types::{AdjustmentKind, StatCode};

/// Everything a stage may read. Nothing here is mutated.
#[derive(Debug, Clone, Copy)]
pub struct AdjustmentContext<'a> {
    pub stat: StatCode,
    pub features: &'a FeatureVector,
    pub league: &'a LeagueContext,
    pub minutes_estimate: f64,
    pub season_avg_minutes: f64,
    pub usage_percentile: f64,
    pub team_pace_factor: f64,
    pub config: &'a AdjusterConfig,
}

/// Value moving through the stages
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// `None` while the projector output is still flagged implausible
    pub value: Option<f64>,
    /// Already expressed at the projected minutes; workload scaling skips it
    pub minutes_scaled: bool,
    pub applied: Vec<AdjustmentKind>,
}

impl Candidate {
    pub fn from_raw(raw: &RawOutput) -> Self {
        Self {
            value: raw.value(),
            minutes_scaled: false,
            applied: Vec::new(),
        }
    }
}

pub trait AdjustmentStage: Send + Sync {
    fn kind(&self) -> AdjustmentKind;
    fn enabled(&self, config: &AdjusterConfig) -> bool;
    fn apply(&self, candidate: Candidate, ctx: &AdjustmentContext<'_>) -> Candidate;
}

// ============================================================================
// Stages
// ============================================================================

pub struct LowSignalFallback;

impl AdjustmentStage for LowSignalFallback {
    fn kind(&self) -> AdjustmentKind {
        AdjustmentKind::LowSignalFallback
    }

    fn enabled(&self, config: &AdjusterConfig) -> bool {
        config.fallback_enabled
    }

    fn apply(&self, mut c: Candidate, ctx: &AdjustmentContext<'_>) -> Candidate {
        if c.value.is_none() {
            c.value = Some(ctx.league.per_minute_rate(ctx.stat) * ctx.minutes_estimate);
            c.minutes_scaled = true;
            c.applied.push(self.kind());
        }
        c
    }
}

pub struct SuperstarBlend;

impl AdjustmentStage for SuperstarBlend {
    fn kind(&self) -> AdjustmentKind {
        AdjustmentKind::SuperstarBlend
    }

    fn enabled(&self, config: &AdjusterConfig) -> bool {
        config.superstar_enabled
    }

    fn apply(&self, mut c: Candidate, ctx: &AdjustmentContext<'_>) -> Candidate {
        let Some(raw) = c.value else { return c };
        let s = &ctx.config.superstar;
        let rolling = ctx.features.rolling_average();

        if ctx.usage_percentile >= s.usage_percentile
            && rolling > 0.0
            && raw < rolling * (1.0 - s.drop_threshold)
        {
            c.value = Some(s.blend_weight * rolling + (1.0 - s.blend_weight) * raw);
            c.applied.push(self.kind());
        }
        c
    }
}

pub struct BoundsClamp;

impl BoundsClamp {
    /// Absolute cap, tightened to a multiple of the historical maximum once
    /// the player has any games. A player who never recorded the stat gets 0.
    pub fn ceiling(ctx: &AdjustmentContext<'_>) -> f64 {
        let b = &ctx.config.bounds;
        let cap = b.absolute_caps.get(&ctx.stat).copied().unwrap_or(f64::INFINITY);
        if ctx.features.games_played > 0 {
            cap.min(b.max_multiple * ctx.features.historical_max.max(0.0))
        } else {
            cap
        }
    }
}

impl AdjustmentStage for BoundsClamp {
    fn kind(&self) -> AdjustmentKind {
        AdjustmentKind::BoundsClamp
    }

    fn enabled(&self, config: &AdjusterConfig) -> bool {
        config.bounds_enabled
    }

    fn apply(&self, mut c: Candidate, ctx: &AdjustmentContext<'_>) -> Candidate {
        let Some(v) = c.value else { return c };
        let clamped = v.clamp(0.0, Self::ceiling(ctx));
        if clamped != v {
            c.value = Some(clamped);
            c.applied.push(self.kind());
        }
        c
    }
}

pub struct WorkloadScaling;

impl AdjustmentStage for WorkloadScaling {
    fn kind(&self) -> AdjustmentKind {
        AdjustmentKind::WorkloadScaling
    }

    fn enabled(&self, config: &AdjusterConfig) -> bool {
        config.workload_enabled
    }

    fn apply(&self, mut c: Candidate, ctx: &AdjustmentContext<'_>) -> Candidate {
        let Some(v) = c.value else { return c };
        let w = &ctx.config.workload;
        if c.minutes_scaled || !w.rate_stats.contains(&ctx.stat) || ctx.season_avg_minutes <= 0.0 {
            return c;
        }

        let ratio = (ctx.minutes_estimate / ctx.season_avg_minutes).clamp(w.min_ratio, w.max_ratio);
        let pace = 1.0 + w.pace_weight * (ctx.team_pace_factor - 1.0);
        let factor = ratio * pace.max(0.0);
        if (factor - 1.0).abs() > 1e-9 {
            c.value = Some(v * factor);
            c.minutes_scaled = true;
            c.applied.push(self.kind());
        }
        c
    }
}

// ============================================================================
// Pipeline
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct AdjustedValue {
    pub value: f64,
    pub variance: f64,
    pub applied: Vec<AdjustmentKind>,
}

pub struct ProjectionAdjuster {
    stages: Vec<Box<dyn AdjustmentStage>>,
}

impl Default for ProjectionAdjuster {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectionAdjuster {
    pub fn new() -> Self {
        Self {
            stages: vec![
                Box::new(LowSignalFallback),
                Box::new(SuperstarBlend),
                Box::new(BoundsClamp),
                Box::new(WorkloadScaling),
            ],
        }
    }

    pub fn adjust(&self, raw: &RawOutput, ctx: &AdjustmentContext<'_>) -> AdjustedValue {
        let mut c = Candidate::from_raw(raw);
        for stage in self.stages.iter().filter(|s| s.enabled(ctx.config)) {
            c = stage.apply(c, ctx);
        }

        // an output left implausible (fallback disabled) contributes nothing
        let mut value = c.value.unwrap_or(0.0);
        if !value.is_finite() {
            value = 0.0;
        }
        value = value.max(0.0);
        if ctx.config.bounds_enabled {
            value = value.min(BoundsClamp::ceiling(ctx));
        }
        if ctx.minutes_estimate <= 0.0 {
            value = 0.0;
        }

        let variance = match raw {
            RawOutput::Value { value: raw_v, variance } if *raw_v > 0.0 => {
                // keep the model's dispersion relative to the mean
                variance * (value / raw_v).powi(2)
            }
            RawOutput::Value { variance, .. } => *variance,
            // count-like stat: Poisson variance equals the mean
            RawOutput::Implausible { .. } => value,
        };

        AdjustedValue {
            value,
            variance: if variance.is_finite() { variance.max(0.0) } else { 0.0 },
            applied: c.applied,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LeaguePriors;
    use crate::features::{FeatureSource, WindowAggregate};

    fn fv(stat: StatCode, rolling: f64, hist_max: f64) -> FeatureVector {
        FeatureVector {
            player_id: 1,
            stat,
            source: FeatureSource::Rolling,
            windows: vec![WindowAggregate {
                length: 5,
                games: 5,
                mean: rolling,
                weighted_mean: rolling,
            }],
            season_avg: rolling,
            per_minute_rate: rolling / 34.0,
            lag1: rolling,
            ewm: rolling,
            historical_max: hist_max,
            usage_rate: 0.9,
            team_pace: 1.0,
            opponent_factor: 1.0,
            games_played: 40,
            recency_weights: vec![1.0; 5],
        }
    }

    fn ctx<'a>(
        stat: StatCode,
        features: &'a FeatureVector,
        league: &'a LeagueContext,
        config: &'a AdjusterConfig,
        minutes: f64,
        usage_percentile: f64,
    ) -> AdjustmentContext<'a> {
        AdjustmentContext {
            stat,
            features,
            league,
            minutes_estimate: minutes,
            season_avg_minutes: minutes,
            usage_percentile,
            team_pace_factor: 1.0,
            config,
        }
    }

    #[test]
    fn test_superstar_blend_moves_toward_rolling_average() {
        let features = fv(StatCode::Ast, 8.0, 14.0);
        let league = LeagueContext::from_priors(&LeaguePriors::default());
        let config = AdjusterConfig::default();
        let c = ctx(StatCode::Ast, &features, &league, &config, 34.0, 0.95);

        let out = ProjectionAdjuster::new().adjust(
            &RawOutput::Value {
                value: 5.5,
                variance: 2.0,
            },
            &c,
        );
        let expected = 0.65 * 8.0 + 0.35 * 5.5;
        assert!((out.value - expected).abs() < 1e-9);
        assert!(out.value > 5.5 && out.value < 8.0);
        assert_eq!(out.applied, vec![AdjustmentKind::SuperstarBlend]);
    }

    #[test]
    fn test_superstar_blend_skips_low_usage_player() {
        let features = fv(StatCode::Ast, 8.0, 14.0);
        let league = LeagueContext::from_priors(&LeaguePriors::default());
        let config = AdjusterConfig::default();
        let c = ctx(StatCode::Ast, &features, &league, &config, 34.0, 0.40);
        let out = ProjectionAdjuster::new().adjust(
            &RawOutput::Value {
                value: 5.5,
                variance: 2.0,
            },
            &c,
        );
        assert_eq!(out.value, 5.5);
        assert!(out.applied.is_empty());
    }

    #[test]
    fn test_turnover_fallback_uses_league_rate() {
        let features = fv(StatCode::Tov, 0.0, 6.0);
        let mut league = LeagueContext::from_priors(&LeaguePriors::default());
        league.per_minute.insert(StatCode::Tov, 0.1);
        let config = AdjusterConfig::default();
        let mut c = ctx(StatCode::Tov, &features, &league, &config, 30.0, 0.2);
        c.season_avg_minutes = 22.0;

        let out = ProjectionAdjuster::new().adjust(
            &RawOutput::Implausible {
                reason: "non-finite output NaN".into(),
            },
            &c,
        );
        assert!((out.value - 3.0).abs() < 1e-9);
        assert_eq!(out.applied, vec![AdjustmentKind::LowSignalFallback]);
        assert!((out.variance - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_bounds_clamp_caps_at_multiple_of_history() {
        let features = fv(StatCode::Pts, 20.0, 30.0);
        let league = LeagueContext::from_priors(&LeaguePriors::default());
        let config = AdjusterConfig::default();
        let c = ctx(StatCode::Pts, &features, &league, &config, 34.0, 0.5);
        let out = ProjectionAdjuster::new().adjust(
            &RawOutput::Value {
                value: 80.0,
                variance: 10.0,
            },
            &c,
        );
        assert_eq!(out.value, 45.0);
        assert!(out.applied.contains(&AdjustmentKind::BoundsClamp));
    }

    #[test]
    fn test_stat_never_recorded_caps_at_zero() {
        let features = fv(StatCode::Blk, 0.0, 0.0);
        let league = LeagueContext::from_priors(&LeaguePriors::default());
        let config = AdjusterConfig::default();
        let c = ctx(StatCode::Blk, &features, &league, &config, 34.0, 0.5);
        assert_eq!(BoundsClamp::ceiling(&c), 0.0);
        let out = ProjectionAdjuster::new().adjust(
            &RawOutput::Value {
                value: 0.8,
                variance: 0.3,
            },
            &c,
        );
        assert_eq!(out.value, 0.0);
        assert!(out.applied.contains(&AdjustmentKind::BoundsClamp));
    }

    #[test]
    fn test_no_history_uses_absolute_cap_only() {
        let mut features = fv(StatCode::Pts, 0.0, 0.0);
        features.games_played = 0;
        let league = LeagueContext::from_priors(&LeaguePriors::default());
        let config = AdjusterConfig::default();
        let c = ctx(StatCode::Pts, &features, &league, &config, 34.0, 0.5);
        assert_eq!(BoundsClamp::ceiling(&c), 70.0);
    }

    #[test]
    fn test_negative_output_clamped_to_zero() {
        let features = fv(StatCode::Blk, 1.0, 3.0);
        let league = LeagueContext::from_priors(&LeaguePriors::default());
        let config = AdjusterConfig::default();
        let c = ctx(StatCode::Blk, &features, &league, &config, 34.0, 0.5);
        let out = ProjectionAdjuster::new().adjust(
            &RawOutput::Value {
                value: -0.4,
                variance: 0.2,
            },
            &c,
        );
        assert_eq!(out.value, 0.0);
    }

    #[test]
    fn test_workload_scales_with_minutes_share() {
        let features = fv(StatCode::Reb, 6.0, 12.0);
        let league = LeagueContext::from_priors(&LeaguePriors::default());
        let config = AdjusterConfig::default();
        let mut c = ctx(StatCode::Reb, &features, &league, &config, 30.0, 0.5);
        c.season_avg_minutes = 24.0;
        let out = ProjectionAdjuster::new().adjust(
            &RawOutput::Value {
                value: 6.0,
                variance: 1.0,
            },
            &c,
        );
        assert!((out.value - 7.5).abs() < 1e-9);
        assert_eq!(out.applied, vec![AdjustmentKind::WorkloadScaling]);
    }

    #[test]
    fn test_disabled_stages_are_skipped() {
        let features = fv(StatCode::Pts, 20.0, 30.0);
        let league = LeagueContext::from_priors(&LeaguePriors::default());
        let config = AdjusterConfig {
            bounds_enabled: false,
            ..AdjusterConfig::default()
        };
        let c = ctx(StatCode::Pts, &features, &league, &config, 34.0, 0.5);
        let out = ProjectionAdjuster::new().adjust(
            &RawOutput::Value {
                value: 80.0,
                variance: 10.0,
            },
            &c,
        );
        assert_eq!(out.value, 80.0);
    }

    #[test]
    fn test_zero_minutes_forces_zero() {
        let features = fv(StatCode::Pts, 20.0, 30.0);
        let league = LeagueContext::from_priors(&LeaguePriors::default());
        let config = AdjusterConfig::default();
        let c = ctx(StatCode::Pts, &features, &league, &config, 0.0, 0.5);
        let out = ProjectionAdjuster::new().adjust(
            &RawOutput::Value {
                value: 12.0,
                variance: 4.0,
            },
            &c,
        );
        assert_eq!(out.value, 0.0);
    }
}
