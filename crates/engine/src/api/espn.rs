//! ESPN site API client: the daily scoreboard (slate) and the league injury
//! report
//!
//! ESPN abbreviations differ from the box-score feed for a handful of teams
//! (GS, NY, SA, NO, UTAH, WSH); they are mapped onto the game-log spelling.
//! Injury groups carry the full team name, which is mapped through the same
//! table when an athlete has no team abbreviation of its own.

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{str_field, USER_AGENT};
use crate::injuries::{InjuryEntry, InjuryReport, InjuryStatus};
use crate::sources::{InjurySource, ScheduleSource};
use crate::types::{Slate, SlateGame};

const SCOREBOARD_URL: &str = "https://site.api.espn.com/apis/site/v2/sports/basketball/nba/scoreboard";
const INJURIES_URL: &str = "https://site.api.espn.com/apis/site/v2/sports/basketball/nba/injuries";
pub const SOURCE_NAME: &str = "espn";

const ABBREVIATION_FIXES: [(&str, &str); 7] = [
    ("GS", "GSW"),
    ("NY", "NYK"),
    ("SA", "SAS"),
    ("NO", "NOP"),
    ("UTAH", "UTA"),
    ("WSH", "WAS"),
    ("PHO", "PHX"),
];

const TEAM_NAMES: [(&str, &str); 31] = [
    ("Atlanta Hawks", "ATL"),
    ("Boston Celtics", "BOS"),
    ("Brooklyn Nets", "BKN"),
    ("Charlotte Hornets", "CHA"),
    ("Chicago Bulls", "CHI"),
    ("Cleveland Cavaliers", "CLE"),
    ("Dallas Mavericks", "DAL"),
    ("Denver Nuggets", "DEN"),
    ("Detroit Pistons", "DET"),
    ("Golden State Warriors", "GSW"),
    ("Houston Rockets", "HOU"),
    ("Indiana Pacers", "IND"),
    ("LA Clippers", "LAC"),
    ("Los Angeles Clippers", "LAC"),
    ("Los Angeles Lakers", "LAL"),
    ("Memphis Grizzlies", "MEM"),
    ("Miami Heat", "MIA"),
    ("Milwaukee Bucks", "MIL"),
    ("Minnesota Timberwolves", "MIN"),
    ("New Orleans Pelicans", "NOP"),
    ("New York Knicks", "NYK"),
    ("Oklahoma City Thunder", "OKC"),
    ("Orlando Magic", "ORL"),
    ("Philadelphia 76ers", "PHI"),
    ("Phoenix Suns", "PHX"),
    ("Portland Trail Blazers", "POR"),
    ("Sacramento Kings", "SAC"),
    ("San Antonio Spurs", "SAS"),
    ("Toronto Raptors", "TOR"),
    ("Utah Jazz", "UTA"),
    ("Washington Wizards", "WAS"),
];

pub fn team_abbreviation(raw: &str) -> String {
    let t = raw.trim().to_uppercase();
    ABBREVIATION_FIXES
        .iter()
        .find(|(espn, _)| *espn == t)
        .map(|(_, fixed)| fixed.to_string())
        .unwrap_or(t)
}

pub fn team_from_name(name: &str) -> Option<&'static str> {
    let name = name.trim();
    TEAM_NAMES
        .iter()
        .find(|(full, _)| full.eq_ignore_ascii_case(name))
        .map(|(_, abbr)| *abbr)
}

#[derive(Clone)]
pub struct EspnClient {
    client: Client,
}

impl EspnClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value> {
        debug!("Fetching ESPN: {}", url);
        let resp = self
            .client
            .get(url)
            .query(query)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json")
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("ESPN error {} for {}: {}", status, url, body);
        }
        Ok(resp.json().await?)
    }

    pub async fn get_scoreboard(&self, date: NaiveDate) -> Result<Slate> {
        let body = self
            .get_json(SCOREBOARD_URL, &[("dates", date.format("%Y%m%d").to_string())])
            .await?;
        let slate = parse_scoreboard(&body, date);
        debug!(games = slate.games.len(), "ESPN scoreboard parsed for {}", date);
        Ok(slate)
    }

    pub async fn get_injuries(&self) -> Result<InjuryReport> {
        let body = self.get_json(INJURIES_URL, &[]).await?;
        let report = parse_injuries(&body);
        debug!(count = report.len(), "ESPN injuries parsed");
        Ok(report)
    }
}

#[async_trait]
impl ScheduleSource for EspnClient {
    async fn slate(&self, date: NaiveDate) -> Result<Slate> {
        self.get_scoreboard(date).await
    }
}

#[async_trait]
impl InjurySource for EspnClient {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn injuries(&self) -> Result<InjuryReport> {
        self.get_injuries().await
    }
}

/// Each event's first competition lists a home and an away competitor
pub fn parse_scoreboard(body: &Value, date: NaiveDate) -> Slate {
    let games = body["events"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|event| {
            let competitors = event["competitions"][0]["competitors"].as_array()?;
            let side = |which: &str| {
                competitors
                    .iter()
                    .find(|c| c["homeAway"].as_str() == Some(which))
                    .and_then(|c| str_field(&c["team"], "abbreviation"))
                    .map(team_abbreviation)
            };
            Some(SlateGame::new(side("home")?, side("away")?))
        })
        .collect();
    Slate::new(date, games)
}

pub fn parse_injuries(body: &Value) -> InjuryReport {
    let mut entries = Vec::new();
    for group in body["injuries"].as_array().into_iter().flatten() {
        let group_team = str_field(group, "displayName").and_then(team_from_name);
        for item in group["injuries"].as_array().into_iter().flatten() {
            let athlete = &item["athlete"];
            let Some(name) = str_field(athlete, "displayName") else {
                continue;
            };
            let team = str_field(&athlete["team"], "abbreviation")
                .map(team_abbreviation)
                .or_else(|| group_team.map(str::to_string))
                .unwrap_or_default();
            let status = str_field(item, "status").unwrap_or_default();
            entries.push(InjuryEntry {
                team,
                player_name: name.to_string(),
                status: InjuryStatus::parse(status),
                detail: str_field(item, "shortComment").map(str::to_string),
            });
        }
    }
    InjuryReport::new(entries)
}
