//! PrizePicks projections client, public endpoint
//!
//! The response is JSON:API shaped: projections under `data`, players under
//! `included` with type `new_player`. Only standard full-game NBA lines are
//! kept; goblin/demon variants and partial-game markets are dropped here.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::{as_f64, id_string, str_field, USER_AGENT};
use crate::normalizer::RawPropRecord;
use crate::sources::PropSource;

const URL: &str = "https://api.prizepicks.com/projections?per_page=1000&league_id=7";
pub const SOURCE_NAME: &str = "prizepicks";

const PARTIAL_GAME_MARKERS: [&str; 10] = [
    "1q", "2q", "3q", "4q", "quarter", "half", "1sthalf", "2ndhalf", "1st half", "2nd half",
];

#[derive(Clone)]
pub struct PrizePicksClient {
    client: Client,
}

impl PrizePicksClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    pub async fn get_projections(&self) -> Result<Vec<RawPropRecord>> {
        debug!("Fetching PrizePicks projections: {}", URL);
        let resp = self
            .client
            .get(URL)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json")
            .header("Origin", "https://app.prizepicks.com")
            .header("Referer", "https://app.prizepicks.com/")
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("PrizePicks projections error {}: {}", status, body);
        }

        let body: Value = resp.json().await?;
        let records = parse_projections(&body, Utc::now());
        debug!(count = records.len(), "PrizePicks projections parsed");
        Ok(records)
    }
}

#[async_trait]
impl PropSource for PrizePicksClient {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(&self) -> Result<Vec<RawPropRecord>> {
        self.get_projections().await
    }
}

struct PlayerRef {
    name: String,
    team: Option<String>,
}

fn is_full_game(attrs: &Value) -> bool {
    let text = ["description", "title", "market_type"]
        .iter()
        .filter_map(|f| str_field(attrs, f))
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    !PARTIAL_GAME_MARKERS.iter().any(|m| text.contains(m))
}

/// Turn one projections response into raw records. Labels are kept as the
/// source writes them; canonicalization happens in the normalizer.
pub fn parse_projections(body: &Value, scraped_at: DateTime<Utc>) -> Vec<RawPropRecord> {
    let mut players: HashMap<String, PlayerRef> = HashMap::new();
    for item in body["included"].as_array().into_iter().flatten() {
        if item["type"].as_str() != Some("new_player") {
            continue;
        }
        let attrs = &item["attributes"];
        let league = str_field(attrs, "league").unwrap_or_default().to_uppercase();
        if !league.contains("NBA") {
            continue;
        }
        let (Some(id), Some(name)) = (id_string(&item["id"]), str_field(attrs, "display_name")) else {
            continue;
        };
        players.insert(
            id,
            PlayerRef {
                name: name.to_string(),
                team: str_field(attrs, "team_name")
                    .or_else(|| str_field(attrs, "team"))
                    .map(str::to_string),
            },
        );
    }

    let mut records = Vec::new();
    for p in body["data"].as_array().into_iter().flatten() {
        let attrs = &p["attributes"];
        if str_field(attrs, "odds_type") != Some("standard") || !is_full_game(attrs) {
            continue;
        }
        let Some(label) = ["stat_type", "market_type", "title", "description"]
            .iter()
            .find_map(|f| str_field(attrs, f))
        else {
            continue;
        };
        let player_id = id_string(&attrs["player_id"])
            .or_else(|| id_string(&p["relationships"]["new_player"]["data"]["id"]));
        let Some(player) = player_id.as_ref().and_then(|id| players.get(id)) else {
            continue;
        };
        let Some(line_value) = as_f64(&attrs["line_score"]) else {
            continue;
        };
        let game_date = str_field(attrs, "start_time")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.date_naive());

        records.push(RawPropRecord {
            source: SOURCE_NAME.to_string(),
            player_name: player.name.clone(),
            stat_label: label.to_string(),
            combo_label: None,
            team: player.team.clone(),
            line_value,
            over_price: None,
            under_price: None,
            scrape_timestamp: scraped_at,
            game_date,
        });
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn fixture() -> Value {
        json!({
            "data": [
                {
                    "id": "1",
                    "attributes": {
                        "odds_type": "standard",
                        "stat_type": "Points",
                        "line_score": 27.5,
                        "start_time": "2025-03-01T19:30:00-05:00"
                    },
                    "relationships": {"new_player": {"data": {"id": "900", "type": "new_player"}}}
                },
                {
                    "id": "2",
                    "attributes": {
                        "odds_type": "standard",
                        "stat_type": "Pts+Rebs+Asts",
                        "line_score": "41",
                        "player_id": "900"
                    }
                },
                {
                    "id": "3",
                    "attributes": {"odds_type": "goblin", "stat_type": "Points", "line_score": 22.5},
                    "relationships": {"new_player": {"data": {"id": "900"}}}
                },
                {
                    "id": "4",
                    "attributes": {
                        "odds_type": "standard",
                        "stat_type": "Points",
                        "description": "1st Half",
                        "line_score": 13.5
                    },
                    "relationships": {"new_player": {"data": {"id": "900"}}}
                },
                {
                    "id": "5",
                    "attributes": {"odds_type": "standard", "stat_type": "Shots", "line_score": 3.5},
                    "relationships": {"new_player": {"data": {"id": "901"}}}
                }
            ],
            "included": [
                {"type": "new_player", "id": "900",
                 "attributes": {"display_name": "Jayson Tatum", "team_name": "BOS", "league": "NBA"}},
                {"type": "new_player", "id": "901",
                 "attributes": {"display_name": "Some Forward", "team_name": "X", "league": "NHL"}}
            ]
        })
    }

    #[test]
    fn test_parse_keeps_standard_full_game_nba_lines() {
        let records = parse_projections(&fixture(), Utc::now());
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].player_name, "Jayson Tatum");
        assert_eq!(records[0].stat_label, "Points");
        assert_eq!(records[0].line_value, 27.5);
        assert_eq!(records[0].team.as_deref(), Some("BOS"));
        assert_eq!(records[0].game_date, NaiveDate::from_ymd_opt(2025, 3, 1));
        assert_eq!(records[0].source, SOURCE_NAME);

        // string line and player id taken from attributes
        assert_eq!(records[1].stat_label, "Pts+Rebs+Asts");
        assert_eq!(records[1].line_value, 41.0);
        assert!(records[1].game_date.is_none());
    }

    #[test]
    fn test_parse_tolerates_empty_body() {
        assert!(parse_projections(&json!({}), Utc::now()).is_empty());
    }
}
