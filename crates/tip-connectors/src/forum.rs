//! Forum (Reddit-style) source adapter: per-subreddit polling with
//! regex-based ticker extraction.

use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tip_domain::{EventType, Source};
use tracing::warn;

use crate::framework::{Connector, ConnectorError, NormalizedEvent};

const LISTING_LIMIT: u32 = 25;
const TEXT_TRUNCATE_LEN: usize = 500;

static TICKER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([A-Z]{1,5})\b|\b([A-Z]{2,5})\b").expect("static pattern"));

static TICKER_BLACKLIST: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "THE", "AND", "FOR", "ARE", "BUT", "NOT", "YOU", "ALL", "CAN", "HAD", "HER", "WAS", "ONE",
        "OUR", "OUT", "HAS", "HIS", "HOW", "MAN", "NEW", "NOW", "OLD", "SEE", "WAY", "WHO", "BOY",
        "DID", "GET", "HIM", "LET", "PUT", "SAY", "SHE", "TOO", "USE", "CEO", "CFO", "IPO", "USA",
        "FBI", "CIA", "GDP", "IMO", "TBH", "LOL", "WTF", "OMG", "FYI", "EOD", "ATH", "ATL", "DD",
        "YOLO", "FOMO", "HODL", "WSB", "GME", "AMC", "APE", "APES", "MOON", "HOLD", "BUY", "SELL",
        "CALL", "PUT", "ITM", "OTM", "IV", "DTE",
    ]
    .into_iter()
    .collect()
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForumPost {
    pub id: String,
    pub subreddit: String,
    pub title: String,
    pub selftext: String,
    pub author: Option<String>,
    pub score: i64,
    pub upvote_ratio: f64,
    pub num_comments: i64,
    pub created_utc: i64,
    pub permalink: Option<String>,
    pub url: Option<String>,
    pub link_flair_text: Option<String>,
}

pub struct ForumConfig {
    pub subreddits: Vec<String>,
    pub user_agent: String,
}

pub struct ForumConnector {
    config: ForumConfig,
    client: reqwest::Client,
}

impl ForumConnector {
    pub fn new(config: ForumConfig) -> Result<Self, ConnectorError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| ConnectorError::Fetch {
                message: e.to_string(),
            })?;
        Ok(Self { config, client })
    }

    async fn fetch_subreddit(&self, subreddit: &str) -> Vec<ForumPost> {
        let url = format!("https://www.reddit.com/r/{subreddit}/new.json");
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, &self.config.user_agent)
            .query(&[("limit", LISTING_LIMIT.to_string()), ("raw_json", "1".to_string())])
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                warn!(subreddit, error = %e, "forum fetch failed, skipping this subreddit");
                return Vec::new();
            }
        };

        let body: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(subreddit, error = %e, "forum response parse failed");
                return Vec::new();
            }
        };

        body["data"]["children"]
            .as_array()
            .map(|children| {
                children
                    .iter()
                    .filter_map(|child| parse_post(&child["data"], subreddit))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn parse_post(data: &serde_json::Value, subreddit: &str) -> Option<ForumPost> {
    Some(ForumPost {
        id: data["id"].as_str()?.to_string(),
        subreddit: subreddit.to_string(),
        title: data["title"].as_str().unwrap_or_default().to_string(),
        selftext: data["selftext"].as_str().unwrap_or_default().to_string(),
        author: data["author"].as_str().map(str::to_string),
        score: data["score"].as_i64().unwrap_or(0),
        upvote_ratio: data["upvote_ratio"].as_f64().unwrap_or(0.0),
        num_comments: data["num_comments"].as_i64().unwrap_or(0),
        created_utc: data["created_utc"].as_f64().unwrap_or(0.0) as i64,
        permalink: data["permalink"].as_str().map(str::to_string),
        url: data["url"].as_str().map(str::to_string),
        link_flair_text: data["link_flair_text"].as_str().map(str::to_string),
    })
}

/// Extracts up to 5 candidate tickers, deduped within the post, skipping
/// the blacklist.
pub fn extract_tickers(text: &str) -> Vec<String> {
    let mut tickers = Vec::new();
    for capture in TICKER_PATTERN.captures_iter(text) {
        let candidate = capture
            .get(1)
            .or_else(|| capture.get(2))
            .map(|m| m.as_str().to_uppercase());
        let Some(candidate) = candidate else { continue };
        if TICKER_BLACKLIST.contains(candidate.as_str()) {
            continue;
        }
        if !tickers.contains(&candidate) {
            tickers.push(candidate);
        }
        if tickers.len() >= 5 {
            break;
        }
    }
    tickers
}

fn severity(score: i64, num_comments: i64) -> i32 {
    (((score + 2 * num_comments) as f64 / 50.0).floor() as i32).clamp(0, 100)
}

fn confidence(upvote_ratio: f64, score: i64, num_comments: i64) -> f64 {
    let engagement = ((score + num_comments) as f64 / 1000.0).min(1.0);
    ((0.7 * upvote_ratio + 0.3 * engagement) * 100.0).round() / 100.0
}

fn truncate_text(text: &str) -> String {
    text.chars().take(TEXT_TRUNCATE_LEN).collect()
}

fn event_time(created_utc: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(created_utc, 0).single().unwrap_or_else(Utc::now)
}

impl Connector for ForumConnector {
    type Raw = ForumPost;

    fn name(&self) -> &str {
        "tip-reddit-connector"
    }

    fn source(&self) -> Source {
        Source::Wsb
    }

    async fn fetch(&self) -> Result<Vec<Self::Raw>, ConnectorError> {
        let mut seen = HashSet::new();
        let mut all = Vec::new();
        for subreddit in &self.config.subreddits {
            for post in self.fetch_subreddit(subreddit).await {
                if seen.insert((post.subreddit.clone(), post.id.clone())) {
                    all.push(post);
                }
            }
        }
        Ok(all)
    }

    fn normalize(&self, raw: &Self::Raw) -> Result<NormalizedEvent, ConnectorError> {
        let tickers = extract_tickers(&format!("{} {}", raw.title, raw.selftext));
        Ok(NormalizedEvent {
            event_type: EventType::SocialMentions,
            ts_event: Some(event_time(raw.created_utc)),
            symbol: tickers.first().cloned(),
            entity_id: raw.author.clone(),
            severity: severity(raw.score, raw.num_comments),
            confidence: Some(confidence(raw.upvote_ratio, raw.score, raw.num_comments)),
            payload: serde_json::json!({
                "tickers": tickers,
                "title": raw.title,
                "text": truncate_text(&raw.selftext),
                "score": raw.score,
                "numComments": raw.num_comments,
                "permalink": raw.permalink,
            }),
            dedupe_key: Some(format!("reddit:{}:{}", raw.subreddit, raw.id)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_extraction_skips_blacklist_and_caps_at_five() {
        let tickers = extract_tickers("$OPEN to the moon with GME AMC APE ABCD EFGH WXYZ");
        assert!(tickers.contains(&"OPEN".to_string()));
        assert!(!tickers.contains(&"GME".to_string()));
        assert!(!tickers.contains(&"AMC".to_string()));
        assert!(tickers.len() <= 5);
    }

    #[test]
    fn ticker_extraction_dedupes_within_post() {
        let tickers = extract_tickers("OPEN OPEN OPEN");
        assert_eq!(tickers, vec!["OPEN".to_string()]);
    }

    #[test]
    fn severity_and_confidence_match_the_wsb_fixture() {
        // Fixture: score=420, upvote_ratio=0.95, num_comments=50.
        assert_eq!(severity(420, 50), 10);
        assert_eq!(confidence(0.95, 420, 50), 0.81);
    }

    #[test]
    fn text_is_truncated_to_five_hundred_chars() {
        let long_text: String = std::iter::repeat('a').take(600).collect();
        assert_eq!(truncate_text(&long_text).len(), 500);
    }
}
