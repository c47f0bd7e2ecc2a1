//! Pipeline error taxonomy
//!
//! Only [`PipelineError::Configuration`] aborts a run. Every other variant is
//! handled by a fallback or an exclusion and recorded as a run diagnostic.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::StatCode;

#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineError {
    #[error("insufficient history for player {player_id} {stat}: {games} games, using {fallback}")]
    DataGap {
        player_id: u64,
        stat: StatCode,
        games: usize,
        fallback: String,
    },

    #[error("implausible projector output for player {player_id} {stat}: {reason}")]
    ImplausibleOutput {
        player_id: u64,
        stat: StatCode,
        reason: String,
    },

    #[error("unresolved mapping from {book} for '{raw}': {reason}")]
    UnresolvedMapping {
        book: String,
        raw: String,
        reason: String,
    },

    #[error("stale line from {book} for {key}: {age_secs}s old")]
    StaleLine {
        book: String,
        key: String,
        age_secs: i64,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("calibration coverage for {market}/{book}: {samples} samples, need {required}")]
    CalibrationCoverage {
        market: String,
        book: String,
        samples: usize,
        required: usize,
    },

    #[error("{key} from {book} is already graded")]
    GradingConflict { key: String, book: String },
}

impl PipelineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::DataGap { .. } => "data_gap",
            Self::ImplausibleOutput { .. } => "implausible_output",
            Self::UnresolvedMapping { .. } => "unresolved_mapping",
            Self::StaleLine { .. } => "stale_line",
            Self::Configuration(_) => "configuration",
            Self::CalibrationCoverage { .. } => "calibration_coverage",
            Self::GradingConflict { .. } => "grading_conflict",
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Non-fatal events collected over one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunDiagnostics {
    pub events: Vec<PipelineError>,
}

impl RunDiagnostics {
    pub fn push(&mut self, e: PipelineError) {
        self.events.push(e);
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = PipelineError>) {
        self.events.extend(events);
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events.iter().filter(|e| e.kind() == kind).count()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
