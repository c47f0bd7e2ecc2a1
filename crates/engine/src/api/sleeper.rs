//! Sleeper picks client, public endpoint
//!
//! The endpoint answers 500 while the board is closed, so server errors are
//! retried with doubling backoff. The player field is either a bare name or
//! an object carrying `full_name`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::{as_f64, str_field, USER_AGENT};
use crate::normalizer::RawPropRecord;
use crate::sources::PropSource;

const URL: &str = "https://api.sleeper.app/v1/picks/nba";
pub const SOURCE_NAME: &str = "sleeper";
const MAX_BACKOFF_MS: u64 = 10_000;

#[derive(Clone)]
pub struct SleeperClient {
    client: Client,
    max_retries: u32,
    backoff_ms: u64,
}

impl SleeperClient {
    pub fn new(timeout: Duration, max_retries: u32, backoff_ms: u64) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            max_retries: max_retries.max(1),
            backoff_ms,
        })
    }

    pub async fn get_picks(&self) -> Result<Vec<RawPropRecord>> {
        let body = self.execute_with_retry().await?;
        let records = parse_picks(&body, Utc::now());
        debug!(count = records.len(), "Sleeper picks parsed");
        Ok(records)
    }

    async fn execute_with_retry(&self) -> Result<Value> {
        let mut backoff = self.backoff_ms;
        let mut last_error = String::new();

        for attempt in 0..self.max_retries {
            debug!("Fetching Sleeper picks: {} (attempt {})", URL, attempt + 1);
            let request = self
                .client
                .get(URL)
                .header("User-Agent", USER_AGENT)
                .header("Accept", "application/json");

            match request.send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp.json().await?),
                Ok(resp) if is_transient(resp.status()) => {
                    warn!("Sleeper returned {} on attempt {}", resp.status(), attempt + 1);
                    last_error = format!("HTTP {}", resp.status());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    anyhow::bail!("Sleeper picks error {}: {}", status, body);
                }
                Err(e) => {
                    warn!("Sleeper request failed (attempt {}): {}", attempt + 1, e);
                    last_error = e.to_string();
                }
            }

            if attempt + 1 < self.max_retries {
                debug!("Retrying in {}ms", backoff);
                sleep(Duration::from_millis(backoff)).await;
                backoff = (backoff * 2).min(MAX_BACKOFF_MS);
            }
        }
        anyhow::bail!("Sleeper unavailable after {} attempts: {}", self.max_retries, last_error)
    }
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl PropSource for SleeperClient {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch(&self) -> Result<Vec<RawPropRecord>> {
        self.get_picks().await
    }
}

fn player_name(pick: &Value) -> Option<&str> {
    match &pick["player"] {
        Value::Object(_) => str_field(&pick["player"], "full_name"),
        Value::String(s) if !s.trim().is_empty() => Some(s.as_str()),
        _ => None,
    }
}

pub fn parse_picks(body: &Value, scraped_at: DateTime<Utc>) -> Vec<RawPropRecord> {
    body.as_array()
        .into_iter()
        .flatten()
        .filter_map(|pick| {
            let name = player_name(pick)?;
            let stat = str_field(pick, "stat")?;
            let line_value = as_f64(&pick["line"])?;
            Some(RawPropRecord {
                source: SOURCE_NAME.to_string(),
                player_name: name.trim().to_string(),
                stat_label: stat.trim().to_string(),
                combo_label: None,
                team: str_field(pick, "team").map(str::to_string),
                line_value,
                over_price: None,
                under_price: None,
                scrape_timestamp: scraped_at,
                game_date: None,
            })
        })
        .collect()
}
