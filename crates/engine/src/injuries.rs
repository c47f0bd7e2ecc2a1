//! Injury report and the teammate-absence boost
//!
//! A teammate listed with an impact status (OUT or DOUBTFUL by default) frees
//! up possessions and minutes. Everyone else on that roster gets a usage and a
//! minutes bump before projection. A player listed OUT is not projected.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::InjuryConfig;
use crate::features::{LeagueContext, PlayerFeatures};
use crate::normalizer::normalize_name;
use crate::types::canonical_team;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InjuryStatus {
    Out,
    Doubtful,
    Questionable,
    DayToDay,
    Probable,
    Unknown,
}

impl InjuryStatus {
    /// Map free-form feed text ("Out", "Day-To-Day", "GTD - Doubtful")
    pub fn parse(raw: &str) -> Self {
        let s = raw.trim().to_uppercase();
        if s.contains("OUT") {
            Self::Out
        } else if s.contains("DOUBT") {
            Self::Doubtful
        } else if s.contains("QUESTION") || s == "GTD" {
            Self::Questionable
        } else if s.contains("DAY") {
            Self::DayToDay
        } else if s.contains("PROB") {
            Self::Probable
        } else {
            Self::Unknown
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Out => "OUT",
            Self::Doubtful => "DOUBTFUL",
            Self::Questionable => "QUESTIONABLE",
            Self::DayToDay => "DAY_TO_DAY",
            Self::Probable => "PROBABLE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for InjuryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<String> for InjuryStatus {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<InjuryStatus> for String {
    fn from(s: InjuryStatus) -> Self {
        s.label().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjuryEntry {
    /// Team abbreviation; empty when the feed did not say
    #[serde(default)]
    pub team: String,
    pub player_name: String,
    pub status: InjuryStatus,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Everyone listed on the injury feeds for one slate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InjuryReport {
    pub entries: Vec<InjuryEntry>,
}

/// Multipliers applied to one player whose teammate is out
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InjuryBoost {
    pub usage_factor: f64,
    pub minutes_factor: f64,
    /// Teammates with an impact status
    pub absences: usize,
}

impl InjuryReport {
    pub fn new(entries: Vec<InjuryEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|e| InjuryEntry {
                team: canonical_team(&e.team),
                ..e
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge another feed; the first listing of a player wins
    pub fn merge(&mut self, other: InjuryReport) {
        for e in other.entries {
            if self.find(&e.player_name, &e.team).is_none() {
                self.entries.push(e);
            }
        }
    }

    fn find(&self, player_name: &str, team: &str) -> Option<&InjuryEntry> {
        let name = normalize_name(player_name);
        let team = canonical_team(team);
        self.entries.iter().find(|e| {
            normalize_name(&e.player_name) == name
                && (e.team.is_empty() || team.is_empty() || e.team == team)
        })
    }

    pub fn status_of(&self, player_name: &str, team: &str) -> Option<InjuryStatus> {
        self.find(player_name, team).map(|e| e.status)
    }

    pub fn is_ruled_out(&self, player_name: &str, team: &str) -> bool {
        self.status_of(player_name, team) == Some(InjuryStatus::Out)
    }

    /// Boost for `player_name` when any other player on `team` has an impact status
    pub fn boost_for(&self, team: &str, player_name: &str, cfg: &InjuryConfig) -> Option<InjuryBoost> {
        if !cfg.enabled {
            return None;
        }
        let team = canonical_team(team);
        let name = normalize_name(player_name);
        let absences = self
            .entries
            .iter()
            .filter(|e| e.team == team && normalize_name(&e.player_name) != name)
            .filter(|e| cfg.impact_statuses.contains(&e.status))
            .count();
        (absences > 0).then(|| InjuryBoost {
            usage_factor: 1.0 + cfg.usage_bump,
            minutes_factor: 1.0 + cfg.minutes_bump,
            absences,
        })
    }
}

impl InjuryBoost {
    /// Raise the usage feature on every stat and re-rank the player in the
    /// league usage distribution
    pub fn apply(&self, features: &mut PlayerFeatures, league: &LeagueContext) {
        for fv in features.stats.values_mut() {
            fv.usage_rate *= self.usage_factor;
        }
        let usage = features.stats.values().next().map(|fv| fv.usage_rate);
        if let Some(u) = usage.filter(|u| *u > 0.0) {
            features.usage_percentile = league.usage.percentile_of(u);
        }
    }

    pub fn scale_minutes(&self, minutes: f64, cap: f64) -> f64 {
        (minutes * self.minutes_factor).min(cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeatureConfig, LeaguePriors};
    use crate::features::{build_player_features, UsageDistribution};
    use crate::types::{GameContext, PlayerGameLog, PlayerHistory, StatCode};
    use chrono::NaiveDate;

    fn entry(team: &str, name: &str, status: &str) -> InjuryEntry {
        InjuryEntry {
            team: team.into(),
            player_name: name.into(),
            status: InjuryStatus::parse(status),
            detail: None,
        }
    }

    fn report() -> InjuryReport {
        InjuryReport::new(vec![
            entry("bos", "Jaylen Brown", "Out"),
            entry("NYK", "Jalen Brunson", "Questionable"),
            entry("LAL", "Anthony Davis", "Doubtful"),
        ])
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(InjuryStatus::parse("Out"), InjuryStatus::Out);
        assert_eq!(InjuryStatus::parse("Out For Season"), InjuryStatus::Out);
        assert_eq!(InjuryStatus::parse("doubtful"), InjuryStatus::Doubtful);
        assert_eq!(InjuryStatus::parse("Day-To-Day"), InjuryStatus::DayToDay);
        assert_eq!(InjuryStatus::parse("GTD"), InjuryStatus::Questionable);
        assert_eq!(InjuryStatus::parse("Available"), InjuryStatus::Unknown);
        let parsed: InjuryStatus = serde_json::from_str("\"Probable\"").unwrap();
        assert_eq!(parsed, InjuryStatus::Probable);
    }

    #[test]
    fn test_teammates_of_absent_player_are_boosted() {
        let cfg = InjuryConfig::default();
        let r = report();
        let boost = r.boost_for("BOS", "Jayson Tatum", &cfg).unwrap();
        assert!((boost.usage_factor - 1.10).abs() < 1e-12);
        assert!((boost.minutes_factor - 1.06).abs() < 1e-12);
        assert_eq!(boost.absences, 1);
        assert!(r.boost_for("LAL", "LeBron James", &cfg).is_some());
        // questionable does not move anything
        assert!(r.boost_for("NYK", "Josh Hart", &cfg).is_none());
    }

    #[test]
    fn test_absent_player_does_not_boost_himself() {
        let cfg = InjuryConfig::default();
        let r = report();
        assert!(r.boost_for("BOS", "Jaylen Brown", &cfg).is_none());
        assert!(r.is_ruled_out("Jaylen Brown", "BOS"));
        assert!(!r.is_ruled_out("Anthony Davis", "LAL"));
    }

    #[test]
    fn test_disabled_config_never_boosts() {
        let cfg = InjuryConfig {
            enabled: false,
            ..InjuryConfig::default()
        };
        assert!(report().boost_for("BOS", "Jayson Tatum", &cfg).is_none());
    }

    #[test]
    fn test_merge_keeps_first_listing() {
        let mut r = report();
        r.merge(InjuryReport::new(vec![
            entry("BOS", "Jaylen Brown", "Probable"),
            entry("MIA", "Jimmy Butler", "Out"),
        ]));
        assert_eq!(r.len(), 4);
        assert_eq!(r.status_of("Jaylen Brown", "BOS"), Some(InjuryStatus::Out));
    }

    #[test]
    fn test_boost_raises_usage_and_minutes() {
        let logs = (1..=6u32)
            .map(|d| PlayerGameLog {
                player_id: 1,
                player_name: "Jayson Tatum".into(),
                team: "BOS".into(),
                opponent: "NYK".into(),
                game_date: NaiveDate::from_ymd_opt(2025, 1, d).unwrap(),
                season: 2025,
                minutes: 30.0,
                pts: 25.0,
                reb: 8.0,
                ast: 4.0,
                stl: 1.0,
                blk: 1.0,
                tov: 3.0,
                fga: 20.0,
                fta: 6.0,
                oreb: 1.0,
            })
            .collect();
        let history = PlayerHistory::new(1, "Jayson Tatum", "BOS", logs);
        let mut league = LeagueContext::from_priors(&LeaguePriors::default());
        league.usage = UsageDistribution::new(vec![0.5, 0.8, 0.9, 1.0]);
        let game = GameContext {
            game_date: NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            team: "BOS".into(),
            opponent: Some("NYK".into()),
        };
        let mut features = build_player_features(&history, &game, &league, &FeatureConfig::default());
        let before = features.stat(StatCode::Pts).unwrap().usage_rate;

        let boost = report()
            .boost_for("BOS", "Jayson Tatum", &InjuryConfig::default())
            .unwrap();
        boost.apply(&mut features, &league);
        let after = features.stat(StatCode::Pts).unwrap().usage_rate;
        assert!((after - before * 1.10).abs() < 1e-9);
        // (20 + 0.44*6 + 3) / 30 = 0.855 before, 0.94 after
        assert_eq!(features.usage_percentile, 0.75);
        assert!((boost.scale_minutes(30.0, 48.0) - 31.8).abs() < 1e-9);
        assert_eq!(boost.scale_minutes(47.0, 48.0), 48.0);
    }
}
