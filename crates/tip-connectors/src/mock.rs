//! Fixture-backed mock source, standing in for a forum feed in demos
//! and local development where hitting the live endpoint is undesirable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tip_domain::{EventType, Source};

use crate::framework::{Connector, ConnectorError, NormalizedEvent};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockPost {
    pub post_id: String,
    pub subreddit: String,
    pub title: String,
    pub ticker: String,
    pub upvotes: i64,
    pub created_at: DateTime<Utc>,
}

fn fixture_post(now: DateTime<Utc>) -> MockPost {
    MockPost {
        post_id: "mock-0001".to_string(),
        subreddit: "wallstreetbets".to_string(),
        title: "GUH or moon, ape strong together".to_string(),
        ticker: "GME".to_string(),
        upvotes: 4200,
        created_at: now,
    }
}

pub struct MockConnector;

impl Connector for MockConnector {
    type Raw = MockPost;

    fn name(&self) -> &str {
        "tip-wsb-mock-connector"
    }

    fn source(&self) -> Source {
        Source::Wsb
    }

    async fn fetch(&self) -> Result<Vec<Self::Raw>, ConnectorError> {
        Ok(vec![fixture_post(Utc::now())])
    }

    fn normalize(&self, raw: &Self::Raw) -> Result<NormalizedEvent, ConnectorError> {
        Ok(NormalizedEvent {
            event_type: EventType::SocialMentions,
            ts_event: Some(raw.created_at),
            symbol: Some(raw.ticker.clone()),
            entity_id: None,
            severity: (raw.upvotes / 10).clamp(0, 100) as i32,
            confidence: Some(0.5),
            payload: serde_json::json!({
                "title": raw.title,
                "subreddit": raw.subreddit,
                "upvotes": raw.upvotes,
            }),
            dedupe_key: Some(format!("wsb:{}", raw.post_id)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_yields_exactly_one_fixture_post() {
        let connector = MockConnector;
        let posts = connector.fetch().await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].post_id, "mock-0001");
    }

    #[test]
    fn severity_is_upvotes_divided_by_ten_capped_at_one_hundred() {
        let connector = MockConnector;
        let raw = fixture_post(Utc::now());
        let normalized = connector.normalize(&raw).unwrap();
        assert_eq!(normalized.severity, 100);
    }

    #[test]
    fn dedupe_key_is_stable_for_the_same_post() {
        let connector = MockConnector;
        let raw = fixture_post(Utc::now());
        let normalized = connector.normalize(&raw).unwrap();
        assert_eq!(normalized.dedupe_key, Some("wsb:mock-0001".to_string()));
    }
}
