//! Stat projector
//!
//! One bagged tree ensemble per tracked stat plus one for minutes. Trained
//! offline from game-log histories and shipped as a JSON artifact whose
//! content hash is the model version. Inference is deterministic.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::config::{FeatureConfig, LeaguePriors, ProjectorConfig};
use crate::features::{build_player_features, LeagueContext, PlayerFeatures};
use crate::trees::{BaggedEnsemble, BaggingParams};
use crate::types::{GameContext, PlayerHistory, StatCode};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectorArtifact {
    pub trained_at: DateTime<Utc>,
    pub training_rows: usize,
    pub params: BaggingParams,
    pub minutes: BaggedEnsemble,
    pub stats: BTreeMap<StatCode, BaggedEnsemble>,
}

/// Raw projector output for one stat
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutput {
    Value { value: f64, variance: f64 },
    /// Degenerate output; the adjuster substitutes a fallback
    Implausible { reason: String },
}

impl RawOutput {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Value { value, .. } => Some(*value),
            Self::Implausible { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatProjector {
    artifact: ProjectorArtifact,
    model_version: String,
}

impl StatProjector {
    pub fn from_artifact(artifact: ProjectorArtifact) -> anyhow::Result<Self> {
        let bytes = serde_json::to_vec(&artifact)?;
        Ok(Self {
            artifact,
            model_version: version_of(&bytes),
        })
    }

    /// Train every model from player histories
    pub fn train(
        histories: &[PlayerHistory],
        features: &FeatureConfig,
        priors: &LeaguePriors,
        params: BaggingParams,
    ) -> anyhow::Result<Self> {
        let Some(last) = histories
            .iter()
            .filter_map(|h| h.logs.last())
            .map(|l| l.game_date)
            .max()
        else {
            anyhow::bail!("no game logs to train on");
        };
        let league = LeagueContext::from_histories(histories, last + Duration::days(1), priors);

        let mut minutes_x = Vec::new();
        let mut minutes_y = Vec::new();
        let mut stat_x: BTreeMap<StatCode, Vec<Vec<f64>>> = BTreeMap::new();
        let mut stat_y: BTreeMap<StatCode, Vec<f64>> = BTreeMap::new();

        for history in histories {
            for log in history.logs.iter().skip(1).filter(|l| l.minutes > 0.0) {
                let game = GameContext {
                    game_date: log.game_date,
                    team: log.team.clone(),
                    opponent: Some(log.opponent.clone()),
                };
                let f = build_player_features(history, &game, &league, features);
                minutes_x.push(f.minutes.model_inputs().to_vec());
                minutes_y.push(log.minutes);
                for (stat, fv) in &f.stats {
                    stat_x
                        .entry(*stat)
                        .or_default()
                        .push(fv.model_inputs(log.minutes).to_vec());
                    stat_y.entry(*stat).or_default().push(log.stat(*stat));
                }
            }
        }

        if minutes_y.is_empty() {
            anyhow::bail!("histories contain no games with prior history");
        }
        info!(
            "Training projector on {} rows from {} players",
            minutes_y.len(),
            histories.len()
        );

        let minutes = BaggedEnsemble::fit(&minutes_x, &minutes_y, &params);
        let mut stats = BTreeMap::new();
        for stat in StatCode::ALL {
            let x = stat_x.remove(&stat).unwrap_or_default();
            let y = stat_y.remove(&stat).unwrap_or_default();
            debug!("Fitting {} model on {} rows", stat, y.len());
            stats.insert(stat, BaggedEnsemble::fit(&x, &y, &params));
        }

        Self::from_artifact(ProjectorArtifact {
            trained_at: Utc::now(),
            training_rows: minutes_y.len(),
            params,
            minutes,
            stats,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec(&self.artifact)?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| anyhow::anyhow!("failed to read model {}: {}", path.display(), e))?;
        let artifact: ProjectorArtifact = serde_json::from_slice(&bytes)?;
        Ok(Self {
            artifact,
            model_version: version_of(&bytes),
        })
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn artifact(&self) -> &ProjectorArtifact {
        &self.artifact
    }

    /// Projected minutes, clamped to [0, minutes_cap]
    pub fn project_minutes(&self, features: &PlayerFeatures, cfg: &ProjectorConfig) -> f64 {
        let (mean, _) = self.artifact.minutes.predict(&features.minutes.model_inputs());
        let minutes = if mean.is_finite() {
            mean
        } else {
            features.minutes.season_avg
        };
        minutes.clamp(0.0, cfg.minutes_cap)
    }

    /// Raw model output at `minutes`, the player's baseline workload. Scaling
    /// to the projected minutes happens in the adjuster.
    pub fn project_stat(
        &self,
        features: &PlayerFeatures,
        stat: StatCode,
        minutes: f64,
        cfg: &ProjectorConfig,
    ) -> RawOutput {
        let Some(model) = self.artifact.stats.get(&stat).filter(|m| !m.is_empty()) else {
            return RawOutput::Implausible {
                reason: "no model for stat".into(),
            };
        };
        let Some(fv) = features.stat(stat) else {
            return RawOutput::Implausible {
                reason: "no feature vector".into(),
            };
        };

        let (value, variance) = model.predict(&fv.model_inputs(minutes));
        if !value.is_finite() || !variance.is_finite() {
            return RawOutput::Implausible {
                reason: format!("non-finite output {}", value),
            };
        }
        if minutes > 0.0 {
            if let Some(floor) = cfg.implausible_floor.get(&stat) {
                if value < *floor {
                    return RawOutput::Implausible {
                        reason: format!("{:.3} below floor {:.3}", value, floor),
                    };
                }
            }
        }
        RawOutput::Value {
            value,
            variance: variance.max(0.0),
        }
    }
}

/// Content fingerprint of the serialized artifact
fn version_of(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    format!("proj-{}", &format!("{:x}", hash)[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PlayerGameLog;
    use chrono::NaiveDate;

    fn histories() -> Vec<PlayerHistory> {
        (1..=4u64)
            .map(|pid| {
                let logs = (1..=20u32)
                    .map(|d| {
                        let minutes = 18.0 + 4.0 * pid as f64 + (d % 3) as f64;
                        PlayerGameLog {
                            player_id: pid,
                            player_name: format!("P{}", pid),
                            team: "BOS".into(),
                            opponent: "NYK".into(),
                            game_date: NaiveDate::from_ymd_opt(2025, 1, d).unwrap(),
                            season: 2025,
                            minutes,
                            pts: minutes * 0.5,
                            reb: minutes * 0.2,
                            ast: minutes * 0.1,
                            stl: 1.0,
                            blk: 0.5,
                            tov: minutes * 0.08,
                            fga: minutes * 0.4,
                            fta: 3.0,
                            oreb: 1.0,
                        }
                    })
                    .collect();
                PlayerHistory::new(pid, format!("P{}", pid), "BOS", logs)
            })
            .collect()
    }

    fn params() -> BaggingParams {
        BaggingParams {
            n_trees: 10,
            ..BaggingParams::default()
        }
    }

    #[test]
    fn test_train_and_project_is_deterministic() {
        let hs = histories();
        let p = StatProjector::train(&hs, &FeatureConfig::default(), &LeaguePriors::default(), params())
            .unwrap();
        let league = LeagueContext::from_priors(&LeaguePriors::default());
        let game = GameContext {
            game_date: NaiveDate::from_ymd_opt(2025, 1, 25).unwrap(),
            team: "BOS".into(),
            opponent: Some("NYK".into()),
        };
        let f = build_player_features(&hs[3], &game, &league, &FeatureConfig::default());
        let cfg = ProjectorConfig::default();

        let minutes = p.project_minutes(&f, &cfg);
        assert!(minutes > 0.0 && minutes <= cfg.minutes_cap);
        let a = p.project_stat(&f, StatCode::Pts, minutes, &cfg);
        let b = p.project_stat(&f, StatCode::Pts, minutes, &cfg);
        assert_eq!(a, b);
        assert!(a.value().unwrap() > 0.0);
        assert!(p.model_version().starts_with("proj-"));
    }

    #[test]
    fn test_save_load_keeps_version() {
        let hs = histories();
        let p = StatProjector::train(&hs, &FeatureConfig::default(), &LeaguePriors::default(), params())
            .unwrap();
        let path = std::env::temp_dir().join(format!("projector-{}.json", std::process::id()));
        p.save(&path).unwrap();
        let loaded = StatProjector::load(&path).unwrap();
        assert_eq!(loaded.model_version(), p.model_version());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_model_is_implausible() {
        let artifact = ProjectorArtifact {
            trained_at: Utc::now(),
            training_rows: 0,
            params: params(),
            minutes: BaggedEnsemble::fit(&[], &[], &params()),
            stats: BTreeMap::new(),
        };
        let p = StatProjector::from_artifact(artifact).unwrap();
        let hs = histories();
        let league = LeagueContext::from_priors(&LeaguePriors::default());
        let game = GameContext {
            game_date: NaiveDate::from_ymd_opt(2025, 1, 25).unwrap(),
            team: "BOS".into(),
            opponent: None,
        };
        let f = build_player_features(&hs[0], &game, &league, &FeatureConfig::default());
        let cfg = ProjectorConfig::default();
        let out = p.project_stat(&f, StatCode::Tov, 30.0, &cfg);
        assert!(matches!(out, RawOutput::Implausible { .. }));
        // empty minutes model falls back to the season average
        assert!((p.project_minutes(&f, &cfg) - f.minutes.season_avg).abs() < 1e-9);
    }

    #[test]
    fn test_train_rejects_empty_histories() {
        assert!(StatProjector::train(&[], &FeatureConfig::default(), &LeaguePriors::default(), params())
            .is_err());
    }
}
