//! Line normalizer
//!
//! Maps source-specific prop records onto canonical keys using alias tables,
//! a stat dictionary and a team table, with bounded Jaro-Winkler matching as
//! the last resort. A match that is not clearly better than its runner-up is
//! reported as unresolved instead of guessed.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use strsim::jaro_winkler;
use tracing::debug;

use crate::config::{ComboConfig, NormalizerConfig};
use crate::error::PipelineError;
use crate::types::{CanonicalPropKey, LinePricing, Market, PlayerHistory, PlayerId, PropLine, StatCode};

/// One scraped record exactly as the source labels it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPropRecord {
    pub source: String,
    pub player_name: String,
    pub stat_label: String,
    #[serde(default)]
    pub combo_label: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
    pub line_value: f64,
    #[serde(default)]
    pub over_price: Option<i32>,
    #[serde(default)]
    pub under_price: Option<i32>,
    pub scrape_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub game_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UnresolvedReason {
    UnknownPlayer,
    AmbiguousPlayer { candidates: Vec<PlayerId> },
    UnknownStat { label: String },
    UnknownCombo { label: String },
    InvalidLine,
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPlayer => write!(f, "no player match above threshold"),
            Self::AmbiguousPlayer { candidates } => {
                write!(f, "ambiguous player, candidates {:?}", candidates)
            }
            Self::UnknownStat { label } => write!(f, "unknown stat label '{}'", label),
            Self::UnknownCombo { label } => write!(f, "no configured combo for '{}'", label),
            Self::InvalidLine => write!(f, "line value is not a finite non-negative number"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(CanonicalPropKey),
    Unresolved(UnresolvedReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerEntry {
    pub player_id: PlayerId,
    pub name: String,
    pub team: String,
    normalized: String,
}

impl PlayerEntry {
    pub fn new(player_id: PlayerId, name: impl Into<String>, team: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            player_id,
            normalized: normalize_name(&name),
            name,
            team: team.into().trim().to_uppercase(),
        }
    }
}

/// Immutable lookup state for one run
#[derive(Debug, Clone)]
pub struct LookupTables {
    players: Vec<PlayerEntry>,
    by_name: HashMap<String, Vec<usize>>,
    player_aliases: HashMap<String, PlayerId>,
    team_aliases: HashMap<String, String>,
    stats: HashMap<String, StatCode>,
    market_aliases: HashMap<String, Market>,
    combos: Vec<(BTreeSet<StatCode>, Market)>,
    fuzzy_threshold: f64,
    ambiguity_margin: f64,
}

const STAT_DICTIONARY: &[(&str, StatCode)] = &[
    ("PTS", StatCode::Pts),
    ("POINTS", StatCode::Pts),
    ("POINT", StatCode::Pts),
    ("P", StatCode::Pts),
    ("REB", StatCode::Reb),
    ("REBS", StatCode::Reb),
    ("REBOUNDS", StatCode::Reb),
    ("R", StatCode::Reb),
    ("AST", StatCode::Ast),
    ("ASTS", StatCode::Ast),
    ("ASSISTS", StatCode::Ast),
    ("A", StatCode::Ast),
    ("STL", StatCode::Stl),
    ("STLS", StatCode::Stl),
    ("STEALS", StatCode::Stl),
    ("S", StatCode::Stl),
    ("BLK", StatCode::Blk),
    ("BLKS", StatCode::Blk),
    ("BLOCKS", StatCode::Blk),
    ("BLOCKEDSHOTS", StatCode::Blk),
    ("B", StatCode::Blk),
    ("TO", StatCode::Tov),
    ("TOV", StatCode::Tov),
    ("TURNOVER", StatCode::Tov),
    ("TURNOVERS", StatCode::Tov),
];

impl LookupTables {
    pub fn build(
        mut players: Vec<PlayerEntry>,
        cfg: &NormalizerConfig,
        combos: &ComboConfig,
    ) -> Self {
        players.sort_by_key(|p| p.player_id);
        players.dedup_by_key(|p| p.player_id);

        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, p) in players.iter().enumerate() {
            by_name.entry(p.normalized.clone()).or_default().push(i);
        }

        let stats = STAT_DICTIONARY
            .iter()
            .map(|(label, stat)| (label.to_string(), *stat))
            .collect();

        // a weighted combo is never inferred from its constituents
        let combo_sets = combos
            .definitions
            .iter()
            .filter(|d| d.is_plain_sum())
            .map(|d| (d.stat_set(), Market::Combo(d.code.clone())))
            .collect();

        let mut market_aliases: HashMap<String, Market> = HashMap::new();
        for d in &combos.definitions {
            let market = Market::Combo(d.code.clone());
            market_aliases.insert(d.code.as_str().to_string(), market.clone());
            for alias in &d.aliases {
                market_aliases.insert(squash(alias), market.clone());
            }
        }
        for (label, code) in &cfg.stat_aliases {
            market_aliases.insert(squash(label), Market::parse(code));
        }

        Self {
            players,
            by_name,
            player_aliases: cfg
                .player_aliases
                .iter()
                .map(|(k, v)| (normalize_name(k), *v))
                .collect(),
            team_aliases: cfg
                .team_aliases
                .iter()
                .map(|(k, v)| (k.trim().to_uppercase(), v.trim().to_uppercase()))
                .collect(),
            stats,
            market_aliases,
            combos: combo_sets,
            fuzzy_threshold: cfg.fuzzy_threshold,
            ambiguity_margin: cfg.ambiguity_margin,
        }
    }

    /// Player table taken from the histories being projected
    pub fn players_from_histories(histories: &[PlayerHistory]) -> Vec<PlayerEntry> {
        histories
            .iter()
            .map(|h| {
                let team = h.logs.last().map(|l| l.team.as_str()).unwrap_or(h.team.as_str());
                PlayerEntry::new(h.player_id, &h.player_name, team)
            })
            .collect()
    }

    pub fn canonical_team(&self, raw: &str) -> String {
        let t = raw.trim().to_uppercase();
        self.team_aliases.get(&t).cloned().unwrap_or(t)
    }

    fn resolve_player(&self, raw_name: &str, team: Option<&str>) -> Result<PlayerId, UnresolvedReason> {
        let name = normalize_name(raw_name);
        if let Some(id) = self.player_aliases.get(&name) {
            return Ok(*id);
        }
        let team = team.map(|t| self.canonical_team(t)).filter(|t| !t.is_empty());

        if let Some(hits) = self.by_name.get(&name) {
            if hits.len() == 1 {
                return Ok(self.players[hits[0]].player_id);
            }
            let on_team: Vec<PlayerId> = hits
                .iter()
                .map(|&i| &self.players[i])
                .filter(|p| team.as_deref() == Some(p.team.as_str()))
                .map(|p| p.player_id)
                .collect();
            return match on_team.as_slice() {
                [id] => Ok(*id),
                _ => Err(UnresolvedReason::AmbiguousPlayer {
                    candidates: hits.iter().map(|&i| self.players[i].player_id).collect(),
                }),
            };
        }

        let team_has_players = team
            .as_deref()
            .map(|t| self.players.iter().any(|p| p.team == t))
            .unwrap_or(false);
        let mut scored: Vec<(f64, PlayerId)> = self
            .players
            .iter()
            .filter(|p| !team_has_players || team.as_deref() == Some(p.team.as_str()))
            .map(|p| (jaro_winkler(&name, &p.normalized), p.player_id))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

        match scored.as_slice() {
            [(best, id), rest @ ..] if *best >= self.fuzzy_threshold => {
                match rest.first() {
                    Some((second, _)) if best - second < self.ambiguity_margin => {
                        Err(UnresolvedReason::AmbiguousPlayer {
                            candidates: scored
                                .iter()
                                .take_while(|(s, _)| best - s < self.ambiguity_margin)
                                .map(|(_, id)| *id)
                                .collect(),
                        })
                    }
                    _ => {
                        debug!("Fuzzy matched '{}' to player {} ({:.3})", raw_name, id, best);
                        Ok(*id)
                    }
                }
            }
            _ => Err(UnresolvedReason::UnknownPlayer),
        }
    }

    fn resolve_market(&self, stat_label: &str, combo_label: Option<&str>) -> Result<Market, UnresolvedReason> {
        let label = combo_label
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(stat_label);
        let squashed = squash(label);

        if let Some(m) = self.market_aliases.get(&squashed) {
            return Ok(m.clone());
        }
        if let Some(stat) = self.stats.get(&squashed) {
            return Ok(Market::Stat(*stat));
        }

        let parts: Vec<&str> = squashed.split(['+', '_', '&']).filter(|p| !p.is_empty()).collect();
        if parts.len() < 2 {
            return Err(UnresolvedReason::UnknownStat {
                label: label.to_string(),
            });
        }
        let mut set = BTreeSet::new();
        for part in parts {
            match self.stats.get(part) {
                Some(stat) => {
                    set.insert(*stat);
                }
                None => {
                    return Err(UnresolvedReason::UnknownStat {
                        label: label.to_string(),
                    })
                }
            }
        }
        if set.len() == 1 {
            // "Pts+Pts" style labels are not a combo
            return Err(UnresolvedReason::UnknownCombo {
                label: label.to_string(),
            });
        }
        self.combos
            .iter()
            .find(|(stats, _)| *stats == set)
            .map(|(_, m)| m.clone())
            .ok_or_else(|| UnresolvedReason::UnknownCombo {
                label: label.to_string(),
            })
    }

    /// Resolve one record. Pure over the record and the tables.
    pub fn normalize(&self, raw: &RawPropRecord, default_date: NaiveDate) -> Resolution {
        if !raw.line_value.is_finite() || raw.line_value < 0.0 {
            return Resolution::Unresolved(UnresolvedReason::InvalidLine);
        }
        let market = match self.resolve_market(&raw.stat_label, raw.combo_label.as_deref()) {
            Ok(m) => m,
            Err(reason) => return Resolution::Unresolved(reason),
        };
        let player_id = match self.resolve_player(&raw.player_name, raw.team.as_deref()) {
            Ok(id) => id,
            Err(reason) => return Resolution::Unresolved(reason),
        };
        Resolution::Resolved(CanonicalPropKey::new(
            player_id,
            market,
            raw.game_date.unwrap_or(default_date),
        ))
    }

    /// Normalize a batch; unresolved records come back as diagnostics
    pub fn normalize_all(
        &self,
        records: &[RawPropRecord],
        default_date: NaiveDate,
    ) -> (Vec<PropLine>, Vec<PipelineError>) {
        let mut lines = Vec::with_capacity(records.len());
        let mut unresolved = Vec::new();
        for raw in records {
            match self.normalize(raw, default_date) {
                Resolution::Resolved(key) => lines.push(PropLine {
                    source: raw.source.clone(),
                    key,
                    player_name: raw.player_name.trim().to_string(),
                    line_value: raw.line_value,
                    pricing: LinePricing {
                        over: raw.over_price,
                        under: raw.under_price,
                    },
                    scrape_timestamp: raw.scrape_timestamp,
                }),
                Resolution::Unresolved(reason) => {
                    let label = raw.combo_label.as_deref().unwrap_or(raw.stat_label.as_str());
                    unresolved.push(PipelineError::UnresolvedMapping {
                        book: raw.source.clone(),
                        raw: format!("{} / {}", raw.player_name, label),
                        reason: reason.to_string(),
                    });
                }
            }
        }
        (lines, unresolved)
    }
}

/// Lowercase, strip punctuation and generational suffixes, collapse spaces
pub fn normalize_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase();
    cleaned
        .split_whitespace()
        .filter(|w| !matches!(*w, "jr" | "sr" | "ii" | "iii" | "iv"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn squash(label: &str) -> String {
    label
        .to_uppercase()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '.' && *c != '-')
        .collect()
}
