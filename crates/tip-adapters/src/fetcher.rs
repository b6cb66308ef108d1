//! Rate-limited, conditional-GET HTTP fetcher used by the disclosure
//! source adapter (and available to others): token-bucket pacing,
//! ETag/Last-Modified caching, and rate-limit backoff/cooldown.

use std::time::Duration;

use rand::Rng;
use reqwest::{header, Client, StatusCode};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Hard ceiling on request rate, regardless of configuration.
pub const ABSOLUTE_MAX_RPS: f64 = 8.0;
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;
const COOLDOWN_THRESHOLD: u32 = 3;
const COOLDOWN_BASE_SECS: f64 = 10.0 * 60.0;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("empty user agent: a polite identification string is required")]
    EmptyUserAgent,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Token bucket paced at `max_rps`, refilling at the same rate it drains,
/// capped at [`ABSOLUTE_MAX_RPS`] regardless of configuration.
pub struct TokenBucket {
    max_rps: f64,
    capacity: f64,
    state: Mutex<TokenBucketState>,
}

struct TokenBucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(max_rps: f64) -> Self {
        let capped = max_rps.min(ABSOLUTE_MAX_RPS);
        Self {
            max_rps: capped,
            capacity: capped,
            state: Mutex::new(TokenBucketState {
                tokens: capped,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn max_rps(&self) -> f64 {
        self.max_rps
    }

    /// Blocks until a token is available, then consumes it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.max_rps).min(self.capacity);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(deficit / self.max_rps))
                }
            };

            match wait {
                None => return,
                Some(duration) => tokio::time::sleep(duration).await,
            }
        }
    }
}

/// Outcome of one conditional GET, already accounting for the fetcher's
/// own backoff/cooldown sleeps.
pub enum FetchOutcome {
    /// 200 with a parsed JSON body and refreshed cache validators.
    Success {
        body: serde_json::Value,
        etag: Option<String>,
        last_modified: Option<String>,
    },
    /// 304: only `last_poll_at` should be updated by the caller.
    NotModified,
    /// 429/403: the fetcher already slept the appropriate backoff or
    /// cooldown; caller should treat this entity as yielding no records
    /// this cycle.
    RateLimited,
    /// 5xx: log and skip, no backoff escalation.
    ServerError { status: u16 },
    /// Connection/timeout failure: same treatment as a server error.
    TransportError { message: String },
}

/// Polite, rate-limited, conditional-GET HTTP client.
pub struct RateLimitedFetcher {
    client: Client,
    bucket: TokenBucket,
    user_agent: String,
    consecutive_errors: Mutex<u32>,
}

impl RateLimitedFetcher {
    pub fn new(user_agent: String, max_rps: f64, timeout: Duration) -> Result<Self, FetchError> {
        if user_agent.trim().is_empty() {
            return Err(FetchError::EmptyUserAgent);
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            bucket: TokenBucket::new(max_rps),
            user_agent,
            consecutive_errors: Mutex::new(0),
        })
    }

    pub fn max_rps(&self) -> f64 {
        self.bucket.max_rps()
    }

    /// Uniform random pause in [100ms, 500ms] between successive entity
    /// fetches, to smooth bursts.
    pub async fn jitter() {
        let millis = rand::thread_rng().gen_range(100..=500);
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }

    pub async fn conditional_get(
        &self,
        url: &str,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> FetchOutcome {
        self.bucket.acquire().await;

        let mut request = self.client.get(url).header(header::USER_AGENT, &self.user_agent);
        if let Some(tag) = etag {
            request = request.header(header::IF_NONE_MATCH, tag);
        }
        if let Some(modified) = last_modified {
            request = request.header(header::IF_MODIFIED_SINCE, modified);
        }

        let response = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(url, error = %e, "transport failure, skipping entity this cycle");
                return FetchOutcome::TransportError {
                    message: e.to_string(),
                };
            }
        };

        match response.status() {
            StatusCode::OK => {
                let etag = response
                    .headers()
                    .get(header::ETAG)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let last_modified = response
                    .headers()
                    .get(header::LAST_MODIFIED)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);

                *self.consecutive_errors.lock().await = 0;

                match response.json::<serde_json::Value>().await {
                    Ok(body) => FetchOutcome::Success {
                        body,
                        etag,
                        last_modified,
                    },
                    Err(e) => FetchOutcome::TransportError {
                        message: e.to_string(),
                    },
                }
            }
            StatusCode::NOT_MODIFIED => {
                *self.consecutive_errors.lock().await = 0;
                FetchOutcome::NotModified
            }
            StatusCode::TOO_MANY_REQUESTS | StatusCode::FORBIDDEN => {
                self.handle_rate_limit(response.headers().get(header::RETRY_AFTER))
                    .await;
                FetchOutcome::RateLimited
            }
            status if status.is_server_error() => {
                debug!(url, %status, "server error, skipping entity this cycle");
                FetchOutcome::ServerError {
                    status: status.as_u16(),
                }
            }
            status => FetchOutcome::ServerError {
                status: status.as_u16(),
            },
        }
    }

    async fn handle_rate_limit(&self, retry_after: Option<&header::HeaderValue>) {
        let wait_secs = retry_after
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);

        let mut consecutive = self.consecutive_errors.lock().await;
        *consecutive += 1;

        if *consecutive >= COOLDOWN_THRESHOLD {
            let jitter = rand::thread_rng().gen_range(0.8..=1.2);
            let cooldown = Duration::from_secs_f64(COOLDOWN_BASE_SECS * jitter);
            warn!(seconds = cooldown.as_secs(), "entering rate-limit cooldown");
            *consecutive = 0;
            drop(consecutive);
            tokio::time::sleep(cooldown).await;
        } else {
            warn!(seconds = wait_secs, "rate-limited, sleeping before next cycle");
            drop(consecutive);
            tokio::time::sleep(Duration::from_secs(wait_secs)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_user_agent_rejected() {
        let result = RateLimitedFetcher::new(String::new(), 2.0, Duration::from_secs(30));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn token_bucket_caps_at_absolute_max_rps() {
        let bucket = TokenBucket::new(1000.0);
        assert_eq!(bucket.max_rps(), ABSOLUTE_MAX_RPS);
    }

    #[tokio::test]
    async fn token_bucket_drains_and_refills() {
        let bucket = TokenBucket::new(8.0);
        // capacity starts at 8; should be able to acquire 8 instantly.
        for _ in 0..8 {
            bucket.acquire().await;
        }
    }
}
