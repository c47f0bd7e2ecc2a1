//! Underdog over/under lines client, public endpoint
//!
//! Lines reference an over/under market, which references a player. The
//! league field moves around between `sport_slug`, `competition` and
//! `league`, so all three are checked.

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

const URL: &str = "https://api.underdogfantasy.com/beta/v3/over_under_lines";
pub const SOURCE_NAME: &str = "underdog";

#[derive(Clone)]
pub struct UnderdogClient {
    client: Client,
}

impl UnderdogClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
        })
    }

    pub async fn get_lines(&self) -> Result<Vec<RawPropRecord>> {
        debug!("Fetching Underdog lines: {}", URL);
        let resp = self
            .client
            .get(URL)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json")
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Underdog lines error {}: {}", status, body);
        }

        let body: Value = resp.json().await?;
        let records = parse_lines(&body, Utc::now());
        debug!(count = records.len(), "Underdog lines parsed");
        Ok(records)
    }
}

#[async_trait]
impl PropSource for UnderdogClient {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(&self) -> Result<Vec<RawPropRecord>> {
        self.get_lines().await
    }
}

fn is_basketball(player: &Value) -> bool {
    let league = ["sport_slug", "competition", "league"]
        .iter()
        .find_map(|f| str_field(player, f))
        .unwrap_or_default()
        .to_lowercase();
    league.contains("nba") || league.contains("basketball")
}

/// American price for one side; `higher` is the over
fn side_price(line: &Value, choice: &str) -> Option<i32> {
    line["options"]
        .as_array()?
        .iter()
        .find(|o| o["choice"].as_str() == Some(choice))
        .and_then(|o| as_f64(&o["american_price"]))
        .map(|p| p.round() as i32)
}

pub fn parse_lines(body: &Value, scraped_at: DateTime<Utc>) -> Vec<RawPropRecord> {
    let markets: HashMap<String, &Value> = body["over_unders"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|m| Some((id_string(&m["id"])?, m)))
        .collect();
    let players: HashMap<String, &Value> = body["players"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|p| Some((id_string(&p["id"])?, p)))
        .collect();

    let mut records = Vec::new();
    let mut skipped_league = 0usize;
    for line in body["over_under_lines"].as_array().into_iter().flatten() {
        let Some(market) = id_string(&line["over_under_id"]).and_then(|id| markets.get(&id)) else {
            continue;
        };
        let Some(player) = id_string(&market["player_id"]).and_then(|id| players.get(&id)) else {
            continue;
        };
        if !is_basketball(player) {
            skipped_league += 1;
            continue;
        }
        let (Some(name), Some(stat), Some(line_value)) = (
            str_field(player, "name"),
            str_field(market, "appearance_stat_type"),
            as_f64(&line["stat_value"]),
        ) else {
            continue;
        };

        records.push(RawPropRecord {
            source: SOURCE_NAME.to_string(),
            player_name: name.to_string(),
            stat_label: stat.to_string(),
            combo_label: None,
            team: str_field(player, "team_name").map(str::to_string),
            line_value,
            over_price: side_price(line, "higher"),
            under_price: side_price(line, "lower"),
            scrape_timestamp: scraped_at,
            game_date: None,
        });
    }
    if skipped_league > 0 {
        debug!(skipped_league, "Underdog lines outside the NBA skipped");
    }
    records
}
