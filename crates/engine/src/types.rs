//! Types shared by the projection, matching, calibration and grading stages

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Player identifier assigned by the ingestion source
pub type PlayerId = u64;

/// A tracked base statistic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatCode {
    Pts,
    Reb,
    Ast,
    Stl,
    Blk,
    Tov,
}

impl StatCode {
    pub const ALL: [StatCode; 6] = [
        StatCode::Pts,
        StatCode::Reb,
        StatCode::Ast,
        StatCode::Stl,
        StatCode::Blk,
        StatCode::Tov,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Self::Pts => "PTS",
            Self::Reb => "REB",
            Self::Ast => "AST",
            Self::Stl => "STL",
            Self::Blk => "BLK",
            Self::Tov => "TOV",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_uppercase().as_str() {
            "PTS" => Some(Self::Pts),
            "REB" => Some(Self::Reb),
            "AST" => Some(Self::Ast),
            "STL" => Some(Self::Stl),
            "BLK" => Some(Self::Blk),
            "TOV" | "TO" => Some(Self::Tov),
            _ => None,
        }
    }
}

impl fmt::Display for StatCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Identifier of a configured multi-stat combo, e.g. `PRA`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComboCode(pub String);

impl ComboCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComboCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a prop is written on: one base stat or a combo of stats
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Market {
    Stat(StatCode),
    Combo(ComboCode),
}

impl Market {
    pub fn code(&self) -> String {
        match self {
            Self::Stat(s) => s.code().to_string(),
            Self::Combo(c) => c.0.clone(),
        }
    }

    /// Parse a stored market code. Anything that is not a base stat is a combo.
    pub fn parse(code: &str) -> Self {
        match StatCode::from_code(code) {
            Some(stat) => Self::Stat(stat),
            None => Self::Combo(ComboCode::new(code)),
        }
    }

    pub fn prop_type(&self) -> PropType {
        match self {
            Self::Stat(_) => PropType::Standard,
            Self::Combo(_) => PropType::Combo,
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

impl From<Market> for String {
    fn from(m: Market) -> Self {
        m.code()
    }
}

impl From<String> for Market {
    fn from(s: String) -> Self {
        Market::parse(&s)
    }
}

/// Coarse prop family used for performance grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropType {
    Standard,
    Combo,
}

impl PropType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Combo => "combo",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("combo") {
            Self::Combo
        } else {
            Self::Standard
        }
    }
}

/// Source-independent identity of a player/market/date
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CanonicalPropKey {
    pub player_id: PlayerId,
    pub market: Market,
    pub game_date: NaiveDate,
}

impl CanonicalPropKey {
    pub fn new(player_id: PlayerId, market: Market, game_date: NaiveDate) -> Self {
        Self {
            player_id,
            market,
            game_date,
        }
    }
}

impl fmt::Display for CanonicalPropKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.player_id, self.market, self.game_date)
    }
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

/// One game's box score for one player. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerGameLog {
    pub player_id: PlayerId,
    pub player_name: String,
    pub team: String,
    pub opponent: String,
    pub game_date: NaiveDate,
    pub season: i32,
    pub minutes: f64,
    pub pts: f64,
    pub reb: f64,
    pub ast: f64,
    pub stl: f64,
    pub blk: f64,
    pub tov: f64,
    #[serde(default)]
    pub fga: f64,
    #[serde(default)]
    pub fta: f64,
    #[serde(default)]
    pub oreb: f64,
}

impl PlayerGameLog {
    pub fn stat(&self, stat: StatCode) -> f64 {
        match stat {
            StatCode::Pts => self.pts,
            StatCode::Reb => self.reb,
            StatCode::Ast => self.ast,
            StatCode::Stl => self.stl,
            StatCode::Blk => self.blk,
            StatCode::Tov => self.tov,
        }
    }

    /// Possession-usage proxy per minute: (FGA + 0.44·FTA + TOV) / minutes
    pub fn usage_proxy(&self) -> f64 {
        let minutes = if self.minutes > 0.0 { self.minutes } else { 0.1 };
        (self.fga + 0.44 * self.fta + self.tov) / minutes
    }

    /// Possessions proxy: FGA + 0.44·FTA − OREB + TOV
    pub fn possessions(&self) -> f64 {
        self.fga + 0.44 * self.fta - self.oreb + self.tov
    }
}

/// Ordered game-log history for one player
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerHistory {
    pub player_id: PlayerId,
    pub player_name: String,
    pub team: String,
    pub logs: Vec<PlayerGameLog>,
}

impl PlayerHistory {
    pub fn new(
        player_id: PlayerId,
        player_name: impl Into<String>,
        team: impl Into<String>,
        mut logs: Vec<PlayerGameLog>,
    ) -> Self {
        logs.sort_by_key(|l| l.game_date);
        Self {
            player_id,
            player_name: player_name.into(),
            team: team.into(),
            logs,
        }
    }

    /// Logs strictly before the given date
    pub fn before(&self, date: NaiveDate) -> &[PlayerGameLog] {
        let end = self.logs.partition_point(|l| l.game_date < date);
        &self.logs[..end]
    }
}

/// The game a projection targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameContext {
    pub game_date: NaiveDate,
    pub team: String,
    pub opponent: Option<String>,
}

/// One scheduled game on a slate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlateGame {
    pub home: String,
    pub away: String,
}

impl SlateGame {
    pub fn new(home: impl Into<String>, away: impl Into<String>) -> Self {
        Self {
            home: canonical_team(&home.into()),
            away: canonical_team(&away.into()),
        }
    }
}

/// Games scheduled on one date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slate {
    pub game_date: NaiveDate,
    pub games: Vec<SlateGame>,
}

impl Slate {
    pub fn new(game_date: NaiveDate, games: Vec<SlateGame>) -> Self {
        Self { game_date, games }
    }

    /// Opponent of `team` on this slate; `None` when the team is not playing
    pub fn opponent_of(&self, team: &str) -> Option<&str> {
        let team = canonical_team(team);
        self.games.iter().find_map(|g| {
            if g.home == team {
                Some(g.away.as_str())
            } else if g.away == team {
                Some(g.home.as_str())
            } else {
                None
            }
        })
    }

    pub fn is_playing(&self, team: &str) -> bool {
        self.opponent_of(team).is_some()
    }
}

/// Uppercased, trimmed team abbreviation
pub fn canonical_team(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Actual realized box score, delivered once a game completes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActualStatLine {
    pub player_id: PlayerId,
    pub game_date: NaiveDate,
    pub pts: f64,
    pub reb: f64,
    pub ast: f64,
    pub stl: f64,
    pub blk: f64,
    pub tov: f64,
}

impl ActualStatLine {
    pub fn stat(&self, stat: StatCode) -> f64 {
        match stat {
            StatCode::Pts => self.pts,
            StatCode::Reb => self.reb,
            StatCode::Ast => self.ast,
            StatCode::Stl => self.stl,
            StatCode::Blk => self.blk,
            StatCode::Tov => self.tov,
        }
    }
}

// ---------------------------------------------------------------------------
// Projections
// ---------------------------------------------------------------------------

/// Correction applied by the adjuster, kept on the projection for auditing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    LowSignalFallback,
    SuperstarBlend,
    BoundsClamp,
    WorkloadScaling,
    /// Teammate ruled out; usage and minutes were bumped before projection
    InjuryBoost,
}

/// Per-stat projection for one player/game
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Projection {
    pub player_id: PlayerId,
    pub stat: StatCode,
    /// Model output before adjustment; `None` when the projector flagged it implausible
    pub raw_value: Option<f64>,
    pub adjusted_value: f64,
    pub minutes_estimate: f64,
    pub variance: f64,
    pub model_version: String,
    pub timestamp: DateTime<Utc>,
    pub adjustments: Vec<AdjustmentKind>,
}

/// Sum of constituent projections for a configured combo
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComboProjection {
    pub player_id: PlayerId,
    pub combo: ComboCode,
    pub stats: Vec<StatCode>,
    pub value: f64,
    pub variance: f64,
}

/// All projections for one player/game
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerProjections {
    pub player_id: PlayerId,
    pub player_name: String,
    pub team: String,
    #[serde(default)]
    pub opponent: Option<String>,
    pub game_date: NaiveDate,
    pub minutes_estimate: f64,
    pub stats: Vec<Projection>,
    pub combos: Vec<ComboProjection>,
}

impl PlayerProjections {
    pub fn stat(&self, stat: StatCode) -> Option<&Projection> {
        self.stats.iter().find(|p| p.stat == stat)
    }
}

/// Projection values captured on an edge record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionSnapshot {
    pub value: f64,
    pub variance: f64,
    pub minutes_estimate: f64,
    pub model_version: String,
}

// ---------------------------------------------------------------------------
// Lines and edges
// ---------------------------------------------------------------------------

/// American prices for both sides of a line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinePricing {
    pub over: Option<i32>,
    pub under: Option<i32>,
}

/// A canonicalized sportsbook line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropLine {
    pub source: String,
    pub key: CanonicalPropKey,
    pub player_name: String,
    pub line_value: f64,
    pub pricing: LinePricing,
    pub scrape_timestamp: DateTime<Utc>,
}

/// Line values captured on an edge record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSnapshot {
    pub line_value: f64,
    pub pricing: LinePricing,
    pub scrape_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Over,
    Under,
    Pass,
}

impl Direction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Over => "OVER",
            Self::Under => "UNDER",
            Self::Pass => "PASS",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "OVER" => Self::Over,
            "UNDER" => Self::Under,
            _ => Self::Pass,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CalibrationStatus {
    Uncalibrated,
    Calibrated,
}

impl CalibrationStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Uncalibrated => "UNCALIBRATED",
            Self::Calibrated => "CALIBRATED",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("CALIBRATED") {
            Self::Calibrated
        } else {
            Self::Uncalibrated
        }
    }
}

/// A projection matched against one source's line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub key: CanonicalPropKey,
    pub player_name: String,
    pub source: String,
    pub projection: ProjectionSnapshot,
    pub line: LineSnapshot,
    pub raw_edge: f64,
    pub direction: Direction,
    pub calibration_status: CalibrationStatus,
    pub true_projection: f64,
    pub true_edge: f64,
    pub calibration_version: Option<String>,
}

impl EdgeRecord {
    /// Edge used for ranking: calibrated when available, raw otherwise
    pub fn ranking_edge(&self) -> f64 {
        match self.calibration_status {
            CalibrationStatus::Calibrated => self.true_edge,
            CalibrationStatus::Uncalibrated => self.raw_edge,
        }
    }

    /// American price of the side the record picks
    pub fn pick_price(&self) -> Option<i32> {
        match self.direction {
            Direction::Over => self.line.pricing.over,
            Direction::Under => self.line.pricing.under,
            Direction::Pass => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Grading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Grade {
    Win,
    Loss,
    Push,
}

impl Grade {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Win => "WIN",
            Self::Loss => "LOSS",
            Self::Push => "PUSH",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "WIN" => Some(Self::Win),
            "LOSS" => Some(Self::Loss),
            "PUSH" => Some(Self::Push),
            _ => None,
        }
    }
}

/// A graded edge. At most one exists per (key, source).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradedOutcome {
    pub key: CanonicalPropKey,
    pub source: String,
    pub player_name: String,
    pub direction: Direction,
    pub line_value: f64,
    pub raw_projection: f64,
    pub true_projection: f64,
    pub raw_edge: f64,
    pub true_edge: f64,
    pub price: i32,
    pub actual_value: f64,
    pub grade: Grade,
    /// Units won or lost on a one-unit stake
    pub profit: Decimal,
    pub graded_at: DateTime<Utc>,
}

/// Row of the exposed board output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardRow {
    pub player: String,
    pub player_id: PlayerId,
    pub stat_or_combo: String,
    pub game_date: NaiveDate,
    pub raw_projection: f64,
    pub true_projection: f64,
    pub line: f64,
    pub raw_edge: f64,
    pub true_edge: f64,
    pub direction: Direction,
    pub source: String,
    pub minutes_estimate: f64,
    pub calibration_status: CalibrationStatus,
}

impl From<&EdgeRecord> for BoardRow {
    fn from(e: &EdgeRecord) -> Self {
        Self {
            player: e.player_name.clone(),
            player_id: e.key.player_id,
            stat_or_combo: e.key.market.code(),
            game_date: e.key.game_date,
            raw_projection: e.projection.value,
            true_projection: e.true_projection,
            line: e.line.line_value,
            raw_edge: e.raw_edge,
            true_edge: e.true_edge,
            direction: e.direction,
            source: e.source.clone(),
            minutes_estimate: e.projection.minutes_estimate,
            calibration_status: e.calibration_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_code_round_trip_for_combo() {
        let m = Market::parse("pra");
        assert_eq!(m, Market::Combo(ComboCode::new("PRA")));
        assert_eq!(m.prop_type(), PropType::Combo);
        assert_eq!(Market::parse("TO"), Market::Stat(StatCode::Tov));
    }

    #[test]
    fn test_slate_opponent_lookup() {
        let slate = Slate::new(
            NaiveDate::from_ymd_opt(2025, 1, 25).unwrap(),
            vec![SlateGame::new("bos", "NYK"), SlateGame::new("LAL", "DEN")],
        );
        assert_eq!(slate.opponent_of("BOS"), Some("NYK"));
        assert_eq!(slate.opponent_of(" nyk "), Some("BOS"));
        assert_eq!(slate.opponent_of("DEN"), Some("LAL"));
        assert!(!slate.is_playing("MIA"));
    }

    #[test]
    fn test_history_before_excludes_target_date() {
        let date = |d: u32| NaiveDate::from_ymd_opt(2025, 1, d).unwrap();
        let log = |d: u32| PlayerGameLog {
            player_id: 1,
            player_name: "A".into(),
            team: "BOS".into(),
            opponent: "NYK".into(),
            game_date: date(d),
            season: 2025,
            minutes: 30.0,
            pts: 10.0,
            reb: 5.0,
            ast: 3.0,
            stl: 1.0,
            blk: 0.0,
            tov: 2.0,
            fga: 10.0,
            fta: 2.0,
            oreb: 1.0,
        };
        let h = PlayerHistory::new(1, "A", "BOS", vec![log(5), log(1), log(3)]);
        assert_eq!(h.before(date(5)).len(), 2);
        assert_eq!(h.logs[0].game_date, date(1));
    }
}
