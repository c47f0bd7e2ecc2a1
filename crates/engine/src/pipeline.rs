//! Run orchestration
//!
//! One run: build league context, keep the players whose team is on the
//! slate, apply injury boosts, project on a worker pool, normalize the
//! scraped lines, match, calibrate against the active version and rank. The
//! whole run is assembled in memory and handed back as a [`RunSnapshot`];
//! nothing is persisted until the snapshot is complete.

use chrono::{DateTime, NaiveDate, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::adjuster::{AdjustmentContext, ProjectionAdjuster};
use crate::board::{build_boards, BoardSet};
use crate::calibration::{calibrate_edges, CalibrationRegistry};
use crate::combos::aggregate_combos;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult, RunDiagnostics};
use crate::features::{build_player_features, LeagueContext, PlayerFeatures};
use crate::injuries::{InjuryBoost, InjuryReport};
use crate::matcher::{match_edges, ProjectionStore};
use crate::normalizer::{LookupTables, RawPropRecord};
use crate::progress::{RunProgress, RunStatus};
use crate::projector::{RawOutput, StatProjector};
use crate::sources::{
    collect_injuries, collect_lines, GameLogSource, InjurySource, PropSource, ScheduleSource,
    SourceReport,
};
use crate::types::{
    AdjustmentKind, CanonicalPropKey, EdgeRecord, GameContext, PlayerHistory, PlayerId,
    PlayerProjections, Projection, Slate, StatCode,
};

/// Everything one run needs, already collected
#[derive(Debug, Clone)]
pub struct RunInput {
    pub game_date: NaiveDate,
    pub histories: Vec<PlayerHistory>,
    /// Games on the date. Without one every history is projected with no
    /// known opponent.
    pub slate: Option<Slate>,
    pub injuries: InjuryReport,
    pub records: Vec<RawPropRecord>,
    pub source_reports: Vec<SourceReport>,
    /// Reference time for staleness checks
    pub now: DateTime<Utc>,
}

/// Live inputs for [`Pipeline::execute`]
pub struct RunSources<'a> {
    pub game_logs: &'a dyn GameLogSource,
    pub props: &'a [Arc<dyn PropSource>],
    pub schedule: Option<&'a dyn ScheduleSource>,
    pub injuries: &'a [Arc<dyn InjurySource>],
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub players: usize,
    pub skipped_players: usize,
    /// Histories whose team has no game on the slate
    pub off_slate_players: usize,
    pub ruled_out_players: usize,
    pub injury_boosted_players: usize,
    pub raw_records: usize,
    pub resolved_lines: usize,
    pub edges: usize,
    pub unified_board: usize,
    pub unmatched_lines: usize,
    pub unmatched_projections: usize,
    pub stale_lines: usize,
    pub below_floor: usize,
    pub data_gaps: usize,
    pub implausible_outputs: usize,
    pub unresolved_mappings: usize,
    pub coverage_gaps: usize,
}

/// Complete output of one run
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub game_date: NaiveDate,
    pub model_version: String,
    pub calibration_version: Option<String>,
    pub projections: Vec<PlayerProjections>,
    pub edges: Vec<EdgeRecord>,
    pub boards: BoardSet,
    pub unmatched_projections: Vec<CanonicalPropKey>,
    pub source_reports: Vec<SourceReport>,
    pub diagnostics: RunDiagnostics,
    pub summary: RunSummary,
}

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    projector: Arc<StatProjector>,
    adjuster: Arc<ProjectionAdjuster>,
    registry: Arc<CalibrationRegistry>,
}

impl Pipeline {
    /// Fails with `Configuration` before any work when the config is malformed
    pub fn new(
        config: PipelineConfig,
        projector: StatProjector,
        registry: Arc<CalibrationRegistry>,
    ) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            projector: Arc::new(projector),
            adjuster: Arc::new(ProjectionAdjuster::new()),
            registry,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<CalibrationRegistry> {
        &self.registry
    }

    /// Ingest from live sources, then run
    pub async fn execute(
        &self,
        sources: RunSources<'_>,
        game_date: NaiveDate,
        progress: &RunProgress,
    ) -> anyhow::Result<RunSnapshot> {
        progress.reset();
        let result = self.ingest_and_run(sources, game_date, progress).await;
        match &result {
            Ok(snapshot) => progress.complete(&snapshot.run_id),
            Err(e) => progress.fail(e.to_string()),
        }
        result
    }

    async fn ingest_and_run(
        &self,
        sources: RunSources<'_>,
        game_date: NaiveDate,
        progress: &RunProgress,
    ) -> anyhow::Result<RunSnapshot> {
        let histories = sources.game_logs.histories().await?;
        let timeout = Duration::from_secs(self.config.sources.timeout_secs);

        let slate = match sources.schedule {
            Some(schedule) => match tokio::time::timeout(timeout, schedule.slate(game_date)).await {
                Ok(Ok(slate)) => {
                    info!("{} games on the {} slate", slate.games.len(), game_date);
                    Some(slate)
                }
                Ok(Err(e)) => {
                    warn!("Schedule unavailable, projecting every player: {}", e);
                    None
                }
                Err(_) => {
                    warn!("Schedule timed out after {:?}, projecting every player", timeout);
                    None
                }
            },
            None => None,
        };
        let injuries = collect_injuries(sources.injuries, timeout).await;

        let (records, source_reports) = collect_lines(sources.props, timeout).await;
        progress
            .lines_collected
            .store(records.len() as u32, Ordering::Relaxed);

        let input = RunInput {
            game_date,
            histories,
            slate,
            injuries,
            records,
            source_reports,
            now: Utc::now(),
        };
        Ok(self.run(input, Some(progress)).await?)
    }

    pub async fn run(
        &self,
        input: RunInput,
        progress: Option<&RunProgress>,
    ) -> PipelineResult<RunSnapshot> {
        let created_at = Utc::now();
        let RunInput {
            game_date,
            histories,
            slate,
            injuries,
            records,
            source_reports,
            now,
        } = input;
        let mut diagnostics = RunDiagnostics::default();

        let league = Arc::new(LeagueContext::from_histories(
            &histories,
            game_date,
            &self.config.league_priors,
        ));
        // every known player stays resolvable, even when not projected
        let players = LookupTables::players_from_histories(&histories);
        let assignment =
            assign_players(histories, game_date, slate.as_ref(), &injuries, &self.config);
        if let Some(p) = progress {
            p.set_status(RunStatus::Projecting);
            p.total_players
                .store(assignment.tasks.len() as u32, Ordering::Relaxed);
        }
        let injury_boosted = assignment.tasks.iter().filter(|t| t.boost.is_some()).count();
        let (projections, skipped) = self
            .project_players(assignment.tasks, league, progress, &mut diagnostics)
            .await?;

        if let Some(p) = progress {
            p.set_status(RunStatus::Matching);
        }
        let tables = LookupTables::build(players, &self.config.normalizer, &self.config.combos);
        let (lines, unresolved) = tables.normalize_all(&records, game_date);
        for e in &unresolved {
            debug!("{}", e);
        }
        diagnostics.extend(unresolved);
        let resolved_lines = lines.len();

        let store = ProjectionStore::from_players(&projections);
        let outcome = match_edges(&store, lines, &self.config.matching, now);
        for e in &outcome.diagnostics {
            debug!("{}", e);
        }
        diagnostics.extend(outcome.diagnostics);

        // one snapshot of the active version for the whole run
        let calibration = self.registry.current();
        let mut edges = outcome.edges;
        let coverage = calibrate_edges(
            calibration.as_deref(),
            &mut edges,
            self.config.calibration.min_samples,
        );
        diagnostics.extend(coverage);

        let boards = build_boards(&edges);
        if let Some(p) = progress {
            p.edges_found.store(edges.len() as u32, Ordering::Relaxed);
        }

        let summary = RunSummary {
            players: projections.len(),
            skipped_players: skipped,
            off_slate_players: assignment.off_slate,
            ruled_out_players: assignment.ruled_out,
            injury_boosted_players: injury_boosted,
            raw_records: records.len(),
            resolved_lines,
            edges: edges.len(),
            unified_board: boards.unified.len(),
            unmatched_lines: outcome.unmatched_lines.len(),
            unmatched_projections: outcome.unmatched_projections.len(),
            stale_lines: outcome.stale_lines.len(),
            below_floor: outcome.below_floor.len(),
            data_gaps: diagnostics.count("data_gap"),
            implausible_outputs: diagnostics.count("implausible_output"),
            unresolved_mappings: diagnostics.count("unresolved_mapping"),
            coverage_gaps: diagnostics.count("calibration_coverage"),
        };
        info!(
            players = summary.players,
            lines = summary.resolved_lines,
            edges = summary.edges,
            board = summary.unified_board,
            stale = summary.stale_lines,
            unresolved = summary.unresolved_mappings,
            "Run complete for {}",
            game_date
        );

        Ok(RunSnapshot {
            run_id: format!("{}-{}", game_date.format("%Y%m%d"), created_at.timestamp_millis()),
            created_at,
            game_date,
            model_version: self.projector.model_version().to_string(),
            calibration_version: calibration.map(|m| m.version.clone()),
            projections,
            edges,
            boards,
            unmatched_projections: outcome.unmatched_projections,
            source_reports,
            diagnostics,
            summary,
        })
    }

    /// Fan out one blocking task per player, bounded by the configured
    /// concurrency and inference timeout. Results come back in player order.
    async fn project_players(
        &self,
        tasks: Vec<PlayerTask>,
        league: Arc<LeagueContext>,
        progress: Option<&RunProgress>,
        diagnostics: &mut RunDiagnostics,
    ) -> PipelineResult<(Vec<PlayerProjections>, usize)> {
        let timeout = Duration::from_millis(self.config.projector.inference_timeout_ms);
        let concurrency = self.config.projector.concurrency.max(1);

        let mut results: Vec<(PlayerId, Option<PipelineResult<PlayerRun>>)> =
            stream::iter(tasks)
                .map(|task| {
                    let config = Arc::clone(&self.config);
                    let projector = Arc::clone(&self.projector);
                    let adjuster = Arc::clone(&self.adjuster);
                    let league = Arc::clone(&league);
                    let player_id = task.history.player_id;
                    async move {
                        let task = tokio::task::spawn_blocking(move || {
                            project_player(&task, &league, &projector, &adjuster, &config)
                        });
                        let result = match tokio::time::timeout(timeout, task).await {
                            Ok(Ok(r)) => Some(r),
                            Ok(Err(e)) => {
                                warn!(player_id, "projection task failed: {}", e);
                                None
                            }
                            Err(_) => {
                                warn!(player_id, "projection timed out after {:?}", timeout);
                                None
                            }
                        };
                        if let Some(p) = progress {
                            p.projected_players.fetch_add(1, Ordering::Relaxed);
                        }
                        (player_id, result)
                    }
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

        results.sort_by_key(|(id, _)| *id);

        let mut projections = Vec::with_capacity(results.len());
        let mut skipped = 0;
        for (_, result) in results {
            match result {
                Some(Ok(run)) => {
                    diagnostics.extend(run.diagnostics);
                    projections.push(run.projections);
                }
                Some(Err(e)) => return Err(e),
                None => skipped += 1,
            }
        }
        Ok((projections, skipped))
    }
}

/// Projections for one player plus the non-fatal events raised building them
#[derive(Debug, Clone)]
pub struct PlayerRun {
    pub projections: PlayerProjections,
    pub diagnostics: Vec<PipelineError>,
}

/// One player scheduled for projection
#[derive(Debug, Clone)]
pub struct PlayerTask {
    pub history: PlayerHistory,
    pub game: GameContext,
    pub boost: Option<InjuryBoost>,
}

/// Slate and injury filtering of the run's histories
#[derive(Debug, Clone, Default)]
pub struct Assignment {
    pub tasks: Vec<PlayerTask>,
    pub off_slate: usize,
    pub ruled_out: usize,
}

/// Target game for a history: its current team against the slate opponent.
/// `None` when a slate is given and the team is not on it.
pub fn game_context(
    history: &PlayerHistory,
    game_date: NaiveDate,
    slate: Option<&Slate>,
) -> Option<GameContext> {
    let opponent = match slate {
        Some(slate) => Some(slate.opponent_of(&history.team)?.to_string()),
        None => None,
    };
    Some(GameContext {
        game_date,
        team: history.team.clone(),
        opponent,
    })
}

pub fn assign_players(
    histories: Vec<PlayerHistory>,
    game_date: NaiveDate,
    slate: Option<&Slate>,
    injuries: &InjuryReport,
    config: &PipelineConfig,
) -> Assignment {
    let mut out = Assignment::default();
    for history in histories {
        let Some(game) = game_context(&history, game_date, slate) else {
            out.off_slate += 1;
            continue;
        };
        if injuries.is_ruled_out(&history.player_name, &history.team) {
            debug!(player_id = history.player_id, "ruled out, not projected");
            out.ruled_out += 1;
            continue;
        }
        let boost = injuries.boost_for(&history.team, &history.player_name, &config.injuries);
        out.tasks.push(PlayerTask {
            history,
            game,
            boost,
        });
    }
    if out.off_slate > 0 || out.ruled_out > 0 {
        info!(
            projected = out.tasks.len(),
            off_slate = out.off_slate,
            ruled_out = out.ruled_out,
            "Players assigned for {}",
            game_date
        );
    }
    out
}

/// Features, minutes, injury boost, adjusted stats and combos for one player
pub fn project_player(
    task: &PlayerTask,
    league: &LeagueContext,
    projector: &StatProjector,
    adjuster: &ProjectionAdjuster,
    config: &PipelineConfig,
) -> PipelineResult<PlayerRun> {
    let history = &task.history;
    let mut features = build_player_features(history, &task.game, league, &config.features);
    if let Some(boost) = &task.boost {
        boost.apply(&mut features, league);
    }
    let mut minutes = projector.project_minutes(&features, &config.projector);
    if let Some(boost) = &task.boost {
        minutes = boost.scale_minutes(minutes, config.projector.minutes_cap);
    }

    let (mut stats, stat_diagnostics) =
        project_stats(&features, minutes, league, projector, adjuster, config);
    let mut diagnostics = features.diagnostics.clone();
    diagnostics.extend(stat_diagnostics);
    if task.boost.is_some() {
        for p in &mut stats {
            p.adjustments.insert(0, AdjustmentKind::InjuryBoost);
        }
    }

    let combos = aggregate_combos(&stats, &config.combos)?;
    Ok(PlayerRun {
        projections: PlayerProjections {
            player_id: history.player_id,
            player_name: history.player_name.clone(),
            team: history.team.clone(),
            opponent: task.game.opponent.clone(),
            game_date: task.game.game_date,
            minutes_estimate: minutes,
            stats,
            combos,
        },
        diagnostics,
    })
}

/// Raw and adjusted projection of every stat at `minutes`.
///
/// The model is evaluated at the player's season-average workload; the
/// workload stage alone moves the value to the projected minutes.
pub fn project_stats(
    features: &PlayerFeatures,
    minutes: f64,
    league: &LeagueContext,
    projector: &StatProjector,
    adjuster: &ProjectionAdjuster,
    config: &PipelineConfig,
) -> (Vec<Projection>, Vec<PipelineError>) {
    let baseline_minutes = features.season_avg_minutes;
    let timestamp = Utc::now();
    let mut stats = Vec::with_capacity(StatCode::ALL.len());
    let mut diagnostics = Vec::new();

    for stat in StatCode::ALL {
        let Some(fv) = features.stat(stat) else {
            continue;
        };
        let raw = projector.project_stat(features, stat, baseline_minutes, &config.projector);
        if let RawOutput::Implausible { reason } = &raw {
            debug!(player_id = features.player_id, %stat, "implausible output: {}", reason);
            diagnostics.push(PipelineError::ImplausibleOutput {
                player_id: features.player_id,
                stat,
                reason: reason.clone(),
            });
        }
        let ctx = AdjustmentContext {
            stat,
            features: fv,
            league,
            minutes_estimate: minutes,
            season_avg_minutes: baseline_minutes,
            usage_percentile: features.usage_percentile,
            team_pace_factor: features.team_pace_factor,
            config: &config.adjuster,
        };
        let adjusted = adjuster.adjust(&raw, &ctx);
        stats.push(Projection {
            player_id: features.player_id,
            stat,
            raw_value: raw.value(),
            adjusted_value: adjusted.value,
            minutes_estimate: minutes,
            variance: adjusted.variance,
            model_version: projector.model_version().to_string(),
            timestamp,
            adjustments: adjusted.applied,
        });
    }
    (stats, diagnostics)
}
