//! Feature builder
//!
//! Turns a player's ordered game-log history into per-stat feature vectors for
//! a target game. Pure function of history, league context and config. Never
//! fails: thin histories fall back to season-to-date averages, then to league
//! priors, and the fallback is reported as a `DataGap` diagnostic.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::config::{FeatureConfig, LeaguePriors};
use crate::error::PipelineError;
use crate::types::{GameContext, PlayerGameLog, PlayerHistory, PlayerId, StatCode};

/// Number of inputs fed to each per-stat model
pub const STAT_FEATURE_COUNT: usize = 10;
/// Number of inputs fed to the minutes model
pub const MINUTES_FEATURE_COUNT: usize = 6;

// ============================================================================
// League context
// ============================================================================

/// Sorted season usage values across the league
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageDistribution {
    values: Vec<f64>,
}

impl UsageDistribution {
    pub fn new(mut values: Vec<f64>) -> Self {
        values.retain(|v| v.is_finite());
        values.sort_by(|a, b| a.total_cmp(b));
        Self { values }
    }

    /// Fraction of league players at or below `usage` (0 when empty)
    pub fn percentile_of(&self, usage: f64) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let at_or_below = self.values.partition_point(|v| *v <= usage);
        at_or_below as f64 / self.values.len() as f64
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// League-wide rates derived from every history before a cutoff date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeagueContext {
    pub per_minute: BTreeMap<StatCode, f64>,
    pub avg_minutes: f64,
    pub avg_pace: f64,
    pub team_pace: HashMap<String, f64>,
    /// Per-minute rate conceded by each defense, relative to league rate
    pub opponent_factor: HashMap<String, BTreeMap<StatCode, f64>>,
    pub usage: UsageDistribution,
}

impl LeagueContext {
    /// Context made only of configured priors
    pub fn from_priors(priors: &LeaguePriors) -> Self {
        Self {
            per_minute: priors.per_minute.clone(),
            avg_minutes: priors.minutes,
            avg_pace: priors.pace,
            team_pace: HashMap::new(),
            opponent_factor: HashMap::new(),
            usage: UsageDistribution::default(),
        }
    }

    pub fn from_histories(
        histories: &[PlayerHistory],
        cutoff: NaiveDate,
        priors: &LeaguePriors,
    ) -> Self {
        let mut ctx = Self::from_priors(priors);

        let mut total_minutes = 0.0;
        let mut appearances = 0usize;
        let mut stat_totals: BTreeMap<StatCode, f64> = BTreeMap::new();
        // (team, date) -> possessions
        let mut team_games: HashMap<(String, NaiveDate), f64> = HashMap::new();
        // opponent -> (minutes, per-stat totals)
        let mut conceded: HashMap<String, (f64, BTreeMap<StatCode, f64>)> = HashMap::new();
        let mut usages = Vec::new();

        for history in histories {
            let prior = history.before(cutoff);
            if prior.is_empty() {
                continue;
            }
            for log in prior.iter().filter(|l| l.minutes > 0.0) {
                total_minutes += log.minutes;
                appearances += 1;
                for stat in StatCode::ALL {
                    *stat_totals.entry(stat).or_default() += log.stat(stat);
                }
                *team_games
                    .entry((log.team.clone(), log.game_date))
                    .or_default() += log.possessions();
                let entry = conceded.entry(log.opponent.clone()).or_default();
                entry.0 += log.minutes;
                for stat in StatCode::ALL {
                    *entry.1.entry(stat).or_default() += log.stat(stat);
                }
            }
            let season = current_season_logs(prior);
            if !season.is_empty() {
                usages.push(mean(season.iter().map(|l| l.usage_proxy())));
            }
        }

        if total_minutes > 0.0 {
            for (stat, total) in &stat_totals {
                ctx.per_minute.insert(*stat, total / total_minutes);
            }
            ctx.avg_minutes = total_minutes / appearances as f64;
        }

        let mut per_team: HashMap<String, (f64, usize)> = HashMap::new();
        for ((team, _), poss) in team_games {
            let e = per_team.entry(team).or_default();
            e.0 += poss;
            e.1 += 1;
        }
        let paces: Vec<f64> = per_team
            .iter()
            .filter(|(_, (p, _))| *p > 0.0)
            .map(|(_, (p, n))| p / *n as f64)
            .collect();
        if !paces.is_empty() {
            ctx.avg_pace = mean(paces.iter().copied());
            ctx.team_pace = per_team
                .into_iter()
                .filter(|(_, (p, _))| *p > 0.0)
                .map(|(team, (p, n))| (team, p / n as f64))
                .collect();
        }

        for (opponent, (minutes, totals)) in conceded {
            if minutes <= 0.0 {
                continue;
            }
            let factors = totals
                .into_iter()
                .filter_map(|(stat, total)| {
                    let league = ctx.per_minute.get(&stat).copied().unwrap_or(0.0);
                    (league > 0.0).then(|| (stat, (total / minutes) / league))
                })
                .collect();
            ctx.opponent_factor.insert(opponent, factors);
        }

        ctx.usage = UsageDistribution::new(usages);
        ctx
    }

    pub fn per_minute_rate(&self, stat: StatCode) -> f64 {
        self.per_minute.get(&stat).copied().unwrap_or(0.0)
    }

    /// Team pace relative to league average (1.0 when unknown)
    pub fn pace_factor(&self, team: &str) -> f64 {
        match self.team_pace.get(team) {
            Some(p) if self.avg_pace > 0.0 => p / self.avg_pace,
            _ => 1.0,
        }
    }

    pub fn opponent_factor(&self, opponent: Option<&str>, stat: StatCode) -> f64 {
        opponent
            .and_then(|o| self.opponent_factor.get(o))
            .and_then(|m| m.get(&stat))
            .copied()
            .unwrap_or(1.0)
    }
}

// ============================================================================
// Feature vectors
// ============================================================================

/// Which rung of the fallback ladder produced a feature vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSource {
    Rolling,
    SeasonFallback,
    LeaguePrior,
}

impl FeatureSource {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Rolling => "rolling",
            Self::SeasonFallback => "season_average",
            Self::LeaguePrior => "league_prior",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowAggregate {
    pub length: usize,
    /// Games actually available in the window
    pub games: usize,
    pub mean: f64,
    pub weighted_mean: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    pub player_id: PlayerId,
    pub stat: StatCode,
    pub source: FeatureSource,
    /// Short, medium and season windows, in that order
    pub windows: Vec<WindowAggregate>,
    pub season_avg: f64,
    pub per_minute_rate: f64,
    pub lag1: f64,
    pub ewm: f64,
    pub historical_max: f64,
    pub usage_rate: f64,
    pub team_pace: f64,
    pub opponent_factor: f64,
    pub games_played: usize,
    /// Weights applied to the short window, most recent first
    pub recency_weights: Vec<f64>,
}

impl FeatureVector {
    /// Recency-weighted short-window average
    pub fn rolling_average(&self) -> f64 {
        self.windows
            .first()
            .map(|w| w.weighted_mean)
            .unwrap_or(self.season_avg)
    }

    /// Model row at a given workload. Team pace is left out: the adjuster
    /// applies it together with the minutes ratio.
    pub fn model_inputs(&self, minutes: f64) -> [f64; STAT_FEATURE_COUNT] {
        let window = |i: usize| {
            self.windows
                .get(i)
                .map(|w| w.weighted_mean)
                .unwrap_or(self.season_avg)
        };
        [
            minutes,
            window(0),
            window(1),
            self.season_avg,
            self.per_minute_rate,
            self.per_minute_rate * minutes,
            self.ewm,
            self.lag1,
            self.usage_rate,
            self.opponent_factor,
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinutesFeatures {
    pub short_avg: f64,
    pub medium_avg: f64,
    pub season_avg: f64,
    pub lag1: f64,
    pub ewm: f64,
    pub games_played: usize,
}

impl MinutesFeatures {
    pub fn model_inputs(&self) -> [f64; MINUTES_FEATURE_COUNT] {
        [
            self.short_avg,
            self.medium_avg,
            self.season_avg,
            self.lag1,
            self.ewm,
            self.games_played as f64,
        ]
    }
}

/// Every feature the projector needs for one player/game
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerFeatures {
    pub player_id: PlayerId,
    pub player_name: String,
    pub team: String,
    pub game: GameContext,
    pub minutes: MinutesFeatures,
    pub stats: BTreeMap<StatCode, FeatureVector>,
    /// Player's position in the league usage distribution (0..1)
    pub usage_percentile: f64,
    pub season_avg_minutes: f64,
    pub team_pace_factor: f64,
    pub diagnostics: Vec<PipelineError>,
}

impl PlayerFeatures {
    pub fn stat(&self, stat: StatCode) -> Option<&FeatureVector> {
        self.stats.get(&stat)
    }
}

// ============================================================================
// Builder
// ============================================================================

pub fn build_player_features(
    history: &PlayerHistory,
    game: &GameContext,
    league: &LeagueContext,
    cfg: &FeatureConfig,
) -> PlayerFeatures {
    let prior = history.before(game.game_date);
    let season = current_season_logs(prior);
    let played: Vec<&PlayerGameLog> = prior.iter().filter(|l| l.minutes > 0.0).collect();

    let source = if played.len() >= cfg.min_games {
        FeatureSource::Rolling
    } else if !season.is_empty() {
        FeatureSource::SeasonFallback
    } else {
        FeatureSource::LeaguePrior
    };

    let minutes_series: Vec<f64> = played.iter().map(|l| l.minutes).collect();
    let season_minutes: Vec<f64> = season.iter().map(|l| l.minutes).collect();
    let season_avg_minutes = if season_minutes.is_empty() {
        league.avg_minutes
    } else {
        mean(season_minutes.iter().copied())
    };

    let minutes = match source {
        FeatureSource::Rolling => MinutesFeatures {
            short_avg: tail_mean(&minutes_series, cfg.short_window),
            medium_avg: tail_mean(&minutes_series, cfg.medium_window),
            season_avg: season_avg_minutes,
            lag1: minutes_series.last().copied().unwrap_or(season_avg_minutes),
            ewm: ewm(&minutes_series, cfg.ewm_span),
            games_played: played.len(),
        },
        _ => MinutesFeatures {
            short_avg: season_avg_minutes,
            medium_avg: season_avg_minutes,
            season_avg: season_avg_minutes,
            lag1: season_avg_minutes,
            ewm: season_avg_minutes,
            games_played: played.len(),
        },
    };

    let usage_rate = if season.is_empty() {
        0.0
    } else {
        mean(season.iter().map(|l| l.usage_proxy()))
    };
    let usage_percentile = if season.is_empty() {
        0.0
    } else {
        league.usage.percentile_of(usage_rate)
    };
    let team_pace_factor = league.pace_factor(&game.team);

    let mut diagnostics = Vec::new();
    let mut stats = BTreeMap::new();
    for stat in StatCode::ALL {
        let opp = league.opponent_factor(game.opponent.as_deref(), stat);
        let fv = match source {
            FeatureSource::Rolling => {
                let series: Vec<f64> = played.iter().map(|l| l.stat(stat)).collect();
                rolling_vector(history.player_id, stat, &series, &played, &season, cfg)
            }
            FeatureSource::SeasonFallback => {
                let avg = mean(season.iter().map(|l| l.stat(stat)));
                let rate = rate_of(season.iter().map(|l| (l.stat(stat), l.minutes)));
                let max = season.iter().map(|l| l.stat(stat)).fold(0.0, f64::max);
                flat_vector(history.player_id, stat, source, avg, rate, max, season.len(), cfg)
            }
            FeatureSource::LeaguePrior => {
                let rate = league.per_minute_rate(stat);
                flat_vector(
                    history.player_id,
                    stat,
                    source,
                    rate * league.avg_minutes,
                    rate,
                    0.0,
                    0,
                    cfg,
                )
            }
        };
        let fv = FeatureVector {
            usage_rate,
            team_pace: team_pace_factor,
            opponent_factor: opp,
            ..fv
        };
        if source != FeatureSource::Rolling {
            diagnostics.push(PipelineError::DataGap {
                player_id: history.player_id,
                stat,
                games: played.len(),
                fallback: source.label().to_string(),
            });
        }
        stats.insert(stat, fv);
    }

    PlayerFeatures {
        player_id: history.player_id,
        player_name: history.player_name.clone(),
        team: history.team.clone(),
        game: game.clone(),
        minutes,
        stats,
        usage_percentile,
        season_avg_minutes,
        team_pace_factor,
        diagnostics,
    }
}

fn rolling_vector(
    player_id: PlayerId,
    stat: StatCode,
    series: &[f64],
    played: &[&PlayerGameLog],
    season: &[PlayerGameLog],
    cfg: &FeatureConfig,
) -> FeatureVector {
    let season_len = season.iter().filter(|l| l.minutes > 0.0).count().max(1);
    let lengths = [cfg.short_window, cfg.medium_window, season_len];
    let windows = lengths
        .iter()
        .map(|&len| window_aggregate(series, len, cfg.recency_decay))
        .collect();

    let season_avg = if season.is_empty() {
        mean(series.iter().copied())
    } else {
        mean(season.iter().map(|l| l.stat(stat)))
    };

    FeatureVector {
        player_id,
        stat,
        source: FeatureSource::Rolling,
        windows,
        season_avg,
        per_minute_rate: rate_of(played.iter().map(|l| (l.stat(stat), l.minutes))),
        lag1: series.last().copied().unwrap_or(season_avg),
        ewm: ewm(series, cfg.ewm_span),
        historical_max: series.iter().copied().fold(0.0, f64::max),
        usage_rate: 0.0,
        team_pace: 1.0,
        opponent_factor: 1.0,
        games_played: series.len(),
        recency_weights: recency_weights(series.len().min(cfg.short_window), cfg.recency_decay),
    }
}

#[allow(clippy::too_many_arguments)]
fn flat_vector(
    player_id: PlayerId,
    stat: StatCode,
    source: FeatureSource,
    avg: f64,
    rate: f64,
    max: f64,
    games: usize,
    cfg: &FeatureConfig,
) -> FeatureVector {
    let windows = [cfg.short_window, cfg.medium_window, games.max(1)]
        .iter()
        .map(|&length| WindowAggregate {
            length,
            games,
            mean: avg,
            weighted_mean: avg,
        })
        .collect();
    FeatureVector {
        player_id,
        stat,
        source,
        windows,
        season_avg: avg,
        per_minute_rate: rate,
        lag1: avg,
        ewm: avg,
        historical_max: max,
        usage_rate: 0.0,
        team_pace: 1.0,
        opponent_factor: 1.0,
        games_played: games,
        recency_weights: Vec::new(),
    }
}

// ----------------------------------------------------------------------------
// Numeric helpers
// ----------------------------------------------------------------------------

/// Logs from the season of the most recent log
fn current_season_logs(logs: &[PlayerGameLog]) -> &[PlayerGameLog] {
    match logs.last() {
        Some(last) => {
            let start = logs.partition_point(|l| l.season < last.season);
            &logs[start..]
        }
        None => logs,
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

fn tail_mean(series: &[f64], len: usize) -> f64 {
    let start = series.len().saturating_sub(len);
    mean(series[start..].iter().copied())
}

fn rate_of(pairs: impl Iterator<Item = (f64, f64)>) -> f64 {
    let (total, minutes) = pairs.fold((0.0, 0.0), |(t, m), (v, mins)| (t + v, m + mins));
    if minutes > 0.0 {
        total / minutes
    } else {
        0.0
    }
}

/// decay^i for i = 0 (most recent) .. n-1
fn recency_weights(n: usize, decay: f64) -> Vec<f64> {
    (0..n).map(|i| decay.powi(i as i32)).collect()
}

fn window_aggregate(series: &[f64], length: usize, decay: f64) -> WindowAggregate {
    let start = series.len().saturating_sub(length);
    let window = &series[start..];
    let weights = recency_weights(window.len(), decay);
    let (num, den) = window
        .iter()
        .rev()
        .zip(&weights)
        .fold((0.0, 0.0), |(n, d), (v, w)| (n + v * w, d + w));
    WindowAggregate {
        length,
        games: window.len(),
        mean: mean(window.iter().copied()),
        weighted_mean: if den > 0.0 { num / den } else { 0.0 },
    }
}

/// Exponentially weighted mean with alpha = 2 / (span + 1), oldest first
fn ewm(series: &[f64], span: f64) -> f64 {
    let alpha = 2.0 / (span + 1.0);
    let mut iter = series.iter();
    let Some(first) = iter.next() else {
        return 0.0;
    };
    iter.fold(*first, |acc, v| alpha * v + (1.0 - alpha) * acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn log(d: u32, minutes: f64, ast: f64) -> PlayerGameLog {
        PlayerGameLog {
            player_id: 7,
            player_name: "Guard".into(),
            team: "BOS".into(),
            opponent: "NYK".into(),
            game_date: date(d),
            season: 2025,
            minutes,
            pts: 20.0,
            reb: 5.0,
            ast,
            stl: 1.0,
            blk: 0.5,
            tov: 3.0,
            fga: 18.0,
            fta: 5.0,
            oreb: 1.0,
        }
    }

    fn game(d: u32) -> GameContext {
        GameContext {
            game_date: date(d),
            team: "BOS".into(),
            opponent: Some("NYK".into()),
        }
    }

    #[test]
    fn test_rolling_features_with_enough_games() {
        let history = PlayerHistory::new(
            7,
            "Guard",
            "BOS",
            (1..=8).map(|d| log(d, 34.0, 8.0)).collect(),
        );
        let league = LeagueContext::from_priors(&LeaguePriors::default());
        let f = build_player_features(&history, &game(10), &league, &FeatureConfig::default());
        let ast = f.stat(StatCode::Ast).unwrap();
        assert_eq!(ast.source, FeatureSource::Rolling);
        assert!((ast.rolling_average() - 8.0).abs() < 1e-9);
        assert!((ast.per_minute_rate - 8.0 / 34.0).abs() < 1e-9);
        assert_eq!(ast.windows.len(), 3);
        assert!(f.diagnostics.is_empty());
        assert!((f.season_avg_minutes - 34.0).abs() < 1e-9);
    }

    #[test]
    fn test_recency_weighting_favors_latest_games() {
        let mut logs: Vec<_> = (1..=5).map(|d| log(d, 30.0, 2.0)).collect();
        logs.push(log(6, 30.0, 12.0));
        let history = PlayerHistory::new(7, "Guard", "BOS", logs);
        let league = LeagueContext::from_priors(&LeaguePriors::default());
        let f = build_player_features(&history, &game(10), &league, &FeatureConfig::default());
        let w = &f.stat(StatCode::Ast).unwrap().windows[0];
        assert!(w.weighted_mean > w.mean);
    }

    #[test]
    fn test_thin_history_falls_back_to_season_average() {
        let history = PlayerHistory::new(7, "Guard", "BOS", vec![log(1, 20.0, 4.0)]);
        let league = LeagueContext::from_priors(&LeaguePriors::default());
        let f = build_player_features(&history, &game(10), &league, &FeatureConfig::default());
        let ast = f.stat(StatCode::Ast).unwrap();
        assert_eq!(ast.source, FeatureSource::SeasonFallback);
        assert_eq!(ast.season_avg, 4.0);
        assert_eq!(f.diagnostics.len(), StatCode::ALL.len());
        assert!(f.diagnostics.iter().all(|d| d.kind() == "data_gap"));
    }

    #[test]
    fn test_empty_history_uses_league_prior() {
        let history = PlayerHistory::new(7, "Rookie", "BOS", vec![]);
        let priors = LeaguePriors::default();
        let league = LeagueContext::from_priors(&priors);
        let f = build_player_features(&history, &game(10), &league, &FeatureConfig::default());
        let tov = f.stat(StatCode::Tov).unwrap();
        assert_eq!(tov.source, FeatureSource::LeaguePrior);
        let expected = priors.per_minute[&StatCode::Tov] * priors.minutes;
        assert!((tov.season_avg - expected).abs() < 1e-9);
        assert_eq!(f.usage_percentile, 0.0);
    }

    #[test]
    fn test_target_game_log_is_not_used() {
        let history = PlayerHistory::new(
            7,
            "Guard",
            "BOS",
            (1..=5).map(|d| log(d, 30.0, 5.0)).chain([log(6, 30.0, 50.0)]).collect(),
        );
        let league = LeagueContext::from_priors(&LeaguePriors::default());
        let f = build_player_features(&history, &game(6), &league, &FeatureConfig::default());
        assert_eq!(f.stat(StatCode::Ast).unwrap().historical_max, 5.0);
    }

    #[test]
    fn test_usage_percentile() {
        let dist = UsageDistribution::new(vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(dist.percentile_of(0.4), 1.0);
        assert_eq!(dist.percentile_of(0.2), 0.5);
        assert_eq!(dist.percentile_of(0.05), 0.0);
    }

    #[test]
    fn test_league_context_rates() {
        let a = PlayerHistory::new(1, "A", "BOS", (1..=4).map(|d| log(d, 30.0, 3.0)).collect());
        let ctx = LeagueContext::from_histories(&[a], date(10), &LeaguePriors::default());
        assert!((ctx.per_minute_rate(StatCode::Ast) - 0.1).abs() < 1e-9);
        assert!((ctx.avg_minutes - 30.0).abs() < 1e-9);
        assert!((ctx.pace_factor("BOS") - 1.0).abs() < 1e-9);
        assert_eq!(ctx.usage.len(), 1);
    }

    #[test]
    fn test_ewm_tracks_recent_values() {
        assert_eq!(ewm(&[], 5.0), 0.0);
        let v = ewm(&[0.0, 0.0, 10.0], 5.0);
        assert!(v > 0.0 && v < 10.0);
    }
}
