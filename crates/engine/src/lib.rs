//! Courtside Engine: NBA player-prop projection and edge pipeline
//!
//! Provides:
//! - Feature building and tree-ensemble stat projection with rule-based adjustment
//! - Combo aggregation, line normalization and edge matching across sources
//! - Ranked boards, residual calibration and an idempotent graded ledger
//! - Schedule-aware projection with teammate injury boosts
//! - PrizePicks, Underdog, Sleeper and ESPN public API clients

pub mod adjuster;
pub mod api;
pub mod board;
pub mod calibration;
pub mod combos;
pub mod config;
pub mod error;
pub mod features;
pub mod injuries;
pub mod matcher;
pub mod normalizer;
pub mod pipeline;
pub mod progress;
pub mod projector;
pub mod sources;
pub mod store;
pub mod tracker;
pub mod trees;
pub mod types;

// Re-exports for convenience
pub use api::{EspnClient, PrizePicksClient, SleeperClient, UnderdogClient};
pub use board::{build_boards, BoardSet, UNIFIED_BOARD};
pub use calibration::{calibrate_edges, CalibrationExample, CalibrationModel, CalibrationRegistry};
pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult, RunDiagnostics};
pub use injuries::{InjuryEntry, InjuryReport, InjuryStatus};
pub use normalizer::{LookupTables, RawPropRecord, Resolution, UnresolvedReason};
pub use pipeline::{Pipeline, RunInput, RunSnapshot, RunSources, RunSummary};
pub use progress::{ProgressSnapshot, RunProgress, RunStatus};
pub use projector::StatProjector;
pub use sources::{
    collect_injuries, collect_lines, GameLogSource, InjurySource, JsonFileSource,
    JsonGameLogSource, JsonInjurySource, JsonScheduleSource, OutcomeSource, PropSource,
    ScheduleSource, SourceReport, SourceStatus,
};
pub use tracker::{PerformanceReport, PerformanceRow, PerformanceTracker};
pub use types::*;
