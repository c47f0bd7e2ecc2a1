//! Input sources: prop lines, game-log histories, the slate schedule, injury
//! reports and realized outcomes
//!
//! Every line source is fetched concurrently and bounded by a timeout. A
//! source that fails or times out is reported and dropped from the run; the
//! others are unaffected.

use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::future::FutureExt;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::injuries::{InjuryEntry, InjuryReport};
use crate::normalizer::RawPropRecord;
use crate::types::{ActualStatLine, PlayerGameLog, PlayerHistory, Slate, SlateGame};

// ============================================================================
// Traits
// ============================================================================

/// Scrape interface: one call per source, independently failable
#[async_trait]
pub trait PropSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self) -> anyhow::Result<Vec<RawPropRecord>>;
}

/// Ingestion interface: ordered game-log history per player
#[async_trait]
pub trait GameLogSource: Send + Sync {
    async fn histories(&self) -> anyhow::Result<Vec<PlayerHistory>>;
}

/// Outcome interface: realized box scores for one date
#[async_trait]
pub trait OutcomeSource: Send + Sync {
    async fn actuals(&self, date: NaiveDate) -> anyhow::Result<Vec<ActualStatLine>>;
}

/// Schedule interface: which teams play whom on a date
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    async fn slate(&self, date: NaiveDate) -> anyhow::Result<Slate>;
}

/// Injury interface: the current availability report
#[async_trait]
pub trait InjurySource: Send + Sync {
    fn name(&self) -> &str;
    async fn injuries(&self) -> anyhow::Result<InjuryReport>;
}

// ============================================================================
// JSON file implementations
// ============================================================================

/// Raw prop records stored as a JSON array
pub struct JsonFileSource {
    name: String,
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl PropSource for JsonFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> anyhow::Result<Vec<RawPropRecord>> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        let mut records: Vec<RawPropRecord> = serde_json::from_str(&text)?;
        for r in &mut records {
            if r.source.is_empty() {
                r.source = self.name.clone();
            }
        }
        Ok(records)
    }
}

/// Flat array of `PlayerGameLog` rows
pub struct JsonGameLogSource {
    path: PathBuf,
}

impl JsonGameLogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn logs(&self) -> anyhow::Result<Vec<PlayerGameLog>> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Group flat logs into per-player histories, ordered by player id
pub fn group_histories(logs: Vec<PlayerGameLog>) -> Vec<PlayerHistory> {
    let mut grouped: BTreeMap<u64, Vec<PlayerGameLog>> = BTreeMap::new();
    for log in logs {
        grouped.entry(log.player_id).or_default().push(log);
    }
    grouped
        .into_iter()
        .filter_map(|(player_id, logs)| {
            let latest = logs.iter().max_by_key(|l| l.game_date)?;
            let name = latest.player_name.clone();
            let team = latest.team.clone();
            Some(PlayerHistory::new(player_id, name, team, logs))
        })
        .collect()
}

#[async_trait]
impl GameLogSource for JsonGameLogSource {
    async fn histories(&self) -> anyhow::Result<Vec<PlayerHistory>> {
        Ok(group_histories(self.logs().await?))
    }
}

impl From<&PlayerGameLog> for ActualStatLine {
    fn from(l: &PlayerGameLog) -> Self {
        Self {
            player_id: l.player_id,
            game_date: l.game_date,
            pts: l.pts,
            reb: l.reb,
            ast: l.ast,
            stl: l.stl,
            blk: l.blk,
            tov: l.tov,
        }
    }
}

/// A game-log file doubles as an outcome feed once games are played
#[async_trait]
impl OutcomeSource for JsonGameLogSource {
    async fn actuals(&self, date: NaiveDate) -> anyhow::Result<Vec<ActualStatLine>> {
        Ok(self
            .logs()
            .await?
            .iter()
            .filter(|l| l.game_date == date)
            .map(ActualStatLine::from)
            .collect())
    }
}

/// Array of slates, one per date
pub struct JsonScheduleSource {
    path: PathBuf,
}

impl JsonScheduleSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ScheduleSource for JsonScheduleSource {
    async fn slate(&self, date: NaiveDate) -> anyhow::Result<Slate> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        let slates: Vec<Slate> = serde_json::from_str(&text)?;
        match slates.into_iter().find(|s| s.game_date == date) {
            Some(slate) => Ok(Slate::new(
                date,
                slate
                    .games
                    .into_iter()
                    .map(|g| SlateGame::new(g.home, g.away))
                    .collect(),
            )),
            None => {
                warn!("{}: no games listed for {}", self.path.display(), date);
                Ok(Slate::new(date, Vec::new()))
            }
        }
    }
}

/// Array of `InjuryEntry` rows
pub struct JsonInjurySource {
    path: PathBuf,
}

impl JsonInjurySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl InjurySource for JsonInjurySource {
    fn name(&self) -> &str {
        "injury-file"
    }

    async fn injuries(&self) -> anyhow::Result<InjuryReport> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        let entries: Vec<InjuryEntry> = serde_json::from_str(&text)?;
        Ok(InjuryReport::new(entries))
    }
}

/// Merge every injury feed. A failing feed is logged and skipped.
pub async fn collect_injuries(sources: &[Arc<dyn InjurySource>], timeout: Duration) -> InjuryReport {
    let mut report = InjuryReport::default();
    for source in sources {
        match tokio::time::timeout(timeout, source.injuries()).await {
            Ok(Ok(r)) => {
                info!("{}: {} injury listings", source.name(), r.len());
                report.merge(r);
            }
            Ok(Err(e)) => warn!("{}: injury fetch failed: {}", source.name(), e),
            Err(_) => warn!("{}: injury fetch timed out after {:?}", source.name(), timeout),
        }
    }
    report
}

// ============================================================================
// Concurrent collection
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SourceStatus {
    Fetched(usize),
    Failed(String),
    TimedOut,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub status: SourceStatus,
    pub elapsed_ms: u64,
}

impl SourceReport {
    pub fn is_ok(&self) -> bool {
        matches!(self.status, SourceStatus::Fetched(_))
    }
}

/// Fetch every source concurrently. Records come back grouped by source in
/// source-name order; reports cover every source, failed or not.
pub async fn collect_lines(
    sources: &[Arc<dyn PropSource>],
    timeout: Duration,
) -> (Vec<RawPropRecord>, Vec<SourceReport>) {
    let concurrency = sources.len().max(1);
    let mut results: Vec<(SourceReport, Vec<RawPropRecord>)> = stream::iter(sources.iter().cloned()
        .map(|source| async move {
            let started = Instant::now();
            let outcome = tokio::time::timeout(timeout, source.fetch()).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let name = source.name().to_string();
            match outcome {
                Ok(Ok(records)) => {
                    info!("{}: fetched {} records in {}ms", name, records.len(), elapsed_ms);
                    let report = SourceReport {
                        source: name,
                        status: SourceStatus::Fetched(records.len()),
                        elapsed_ms,
                    };
                    (report, records)
                }
                Ok(Err(e)) => {
                    warn!("{}: fetch failed: {}", name, e);
                    let report = SourceReport {
                        source: name,
                        status: SourceStatus::Failed(e.to_string()),
                        elapsed_ms,
                    };
                    (report, Vec::new())
                }
                Err(_) => {
                    warn!("{}: timed out after {:?}", name, timeout);
                    let report = SourceReport {
                        source: name,
                        status: SourceStatus::TimedOut,
                        elapsed_ms,
                    };
                    (report, Vec::new())
                }
            }
        }.boxed())
        .collect::<Vec<_>>())
        .buffer_unordered(concurrency)
        .collect()
        .await;

    results.sort_by(|a, b| a.0.source.cmp(&b.0.source));
    let mut records = Vec::new();
    let mut reports = Vec::with_capacity(results.len());
    for (report, mut batch) in results {
        records.append(&mut batch);
        reports.push(report);
    }
    (records, reports)
}
