//! Disclosure (SEC-style) source adapter: rate-limited, conditional
//! polling of a per-company filings feed.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tip_domain::{EventType, Source};
use tip_ports::FetchStateStore;
use tracing::{debug, warn};

use crate::framework::{Connector, ConnectorError, NormalizedEvent};
use tip_adapters::fetcher::{FetchOutcome, RateLimitedFetcher};

pub const DEFAULT_RPS: f64 = 2.0;
const MAX_ENTRIES_PER_CYCLE: usize = 100;

/// Forms surfaced by default; an operator may narrow this list.
pub fn default_forms_allowlist() -> Vec<String> {
    [
        "8-K", "10-Q", "10-K", "S-1", "424B1", "424B2", "424B3", "424B4", "424B5", "13D", "13G",
        "SC 13D", "SC 13G", "3", "4", "5",
    ]
    .into_iter()
    .map(String::to_string)
    .collect()
}

/// Zero-pads a company identifier to the 10-digit form the disclosure
/// endpoint requires.
pub fn normalize_cik(cik: &str) -> String {
    format!("{:0>10}", cik.trim_start_matches('0').trim())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisclosureRaw {
    pub cik: String,
    pub form: String,
    pub accession: String,
    pub filing_date: String,
    pub filing_index_url: String,
    pub primary_document: String,
    pub company_name: Option<String>,
    pub tickers: Vec<String>,
}

pub struct DisclosureConfig {
    pub ciks: Vec<String>,
    pub user_agent_name: String,
    pub user_agent_email: String,
    pub max_rps: f64,
    pub forms_allowlist: Vec<String>,
}

impl DisclosureConfig {
    pub fn user_agent(&self) -> String {
        format!(
            "{} {} (tip-disclosure-connector)",
            self.user_agent_name, self.user_agent_email
        )
    }
}

pub struct DisclosureConnector<F> {
    config: DisclosureConfig,
    fetcher: RateLimitedFetcher,
    fetch_state: F,
}

impl<F> DisclosureConnector<F>
where
    F: FetchStateStore,
{
    pub fn new(config: DisclosureConfig, fetch_state: F) -> Result<Self, ConnectorError> {
        let fetcher = RateLimitedFetcher::new(
            config.user_agent(),
            config.max_rps,
            std::time::Duration::from_secs(30),
        )
        .map_err(|e| ConnectorError::Fetch {
            message: e.to_string(),
        })?;

        Ok(Self {
            config,
            fetcher,
            fetch_state,
        })
    }

    async fn fetch_cik(&self, cik: &str) -> Vec<DisclosureRaw> {
        let state = self.fetch_state.get_entity_state(cik).await.ok().flatten();
        let url = format!("https://data.sec.gov/submissions/CIK{cik}.json");

        let outcome = self
            .fetcher
            .conditional_get(
                &url,
                state.as_ref().and_then(|s| s.last_etag.as_deref()),
                state.as_ref().and_then(|s| s.last_modified.as_deref()),
            )
            .await;

        match outcome {
            FetchOutcome::Success {
                body,
                etag,
                last_modified,
            } => {
                let _ = self
                    .fetch_state
                    .update_entity_state(cik, etag.as_deref(), last_modified.as_deref(), Utc::now())
                    .await;
                self.extract_filings(cik, &body).await
            }
            FetchOutcome::NotModified => {
                let _ = self
                    .fetch_state
                    .update_entity_state(cik, None, None, Utc::now())
                    .await;
                Vec::new()
            }
            FetchOutcome::RateLimited => Vec::new(),
            FetchOutcome::ServerError { status } => {
                debug!(cik, status, "disclosure endpoint server error, skipping this cycle");
                Vec::new()
            }
            FetchOutcome::TransportError { message } => {
                warn!(cik, message, "disclosure endpoint transport failure, skipping this cycle");
                Vec::new()
            }
        }
    }

    async fn extract_filings(&self, cik: &str, body: &serde_json::Value) -> Vec<DisclosureRaw> {
        let recent = &body["filings"]["recent"];
        let accessions = recent["accessionNumber"].as_array().cloned().unwrap_or_default();
        let forms = recent["form"].as_array().cloned().unwrap_or_default();
        let filing_dates = recent["filingDate"].as_array().cloned().unwrap_or_default();
        let primary_docs = recent["primaryDocument"].as_array().cloned().unwrap_or_default();
        let company_name = body["name"].as_str().map(str::to_string);
        let tickers: Vec<String> = body["tickers"]
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let allowlist_upper: Vec<String> = self
            .config
            .forms_allowlist
            .iter()
            .map(|f| f.to_uppercase())
            .collect();

        let mut out = Vec::new();
        let n = accessions.len().min(100);
        for i in 0..n {
            let accession = accessions[i].as_str().unwrap_or_default().to_string();
            let form = forms.get(i).and_then(|v| v.as_str()).unwrap_or_default().to_string();

            if !allowlist_upper.contains(&form.to_uppercase()) {
                continue;
            }
            if self.fetch_state.is_seen(cik, &accession).await.unwrap_or(false) {
                continue;
            }
            let _ = self.fetch_state.mark_seen(cik, &accession).await;

            let filing_date = filing_dates.get(i).and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let primary_document = primary_docs
                .get(i)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let accession_no_dashes = accession.replace('-', "");
            let filing_index_url = format!(
                "https://www.sec.gov/Archives/edgar/data/{}/{}/{}-index.htm",
                cik.trim_start_matches('0'),
                accession_no_dashes,
                accession
            );

            out.push(DisclosureRaw {
                cik: cik.to_string(),
                form,
                accession,
                filing_date,
                filing_index_url,
                primary_document,
                company_name: company_name.clone(),
                tickers: tickers.clone(),
            });

            if out.len() >= MAX_ENTRIES_PER_CYCLE {
                break;
            }
        }

        out
    }
}

fn severity_for_form(form: &str) -> i32 {
    let upper = form.to_uppercase();
    match upper.as_str() {
        "8-K" => 70,
        "10-K" | "10-Q" => 60,
        "13D" | "13G" | "SC 13D" | "SC 13G" => 65,
        "3" | "4" | "5" => 50,
        other if other.starts_with("S-") || other.starts_with("424") => 55,
        _ => 50,
    }
}

fn parse_filing_date(raw: &str) -> DateTime<Utc> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
        .unwrap_or_else(Utc::now)
}

impl<F> Connector for DisclosureConnector<F>
where
    F: FetchStateStore,
{
    type Raw = DisclosureRaw;

    fn name(&self) -> &str {
        "tip-edgar-connector"
    }

    fn source(&self) -> Source {
        Source::Edgar
    }

    async fn fetch(&self) -> Result<Vec<Self::Raw>, ConnectorError> {
        let mut all = Vec::new();
        let mut first = true;
        for cik in &self.config.ciks {
            if !first {
                RateLimitedFetcher::jitter().await;
            }
            first = false;
            all.extend(self.fetch_cik(cik).await);
        }
        Ok(all)
    }

    fn normalize(&self, raw: &Self::Raw) -> Result<NormalizedEvent, ConnectorError> {
        Ok(NormalizedEvent {
            event_type: EventType::DisclosureFiling,
            ts_event: Some(parse_filing_date(&raw.filing_date)),
            symbol: raw.tickers.first().cloned(),
            entity_id: Some(raw.cik.clone()),
            severity: severity_for_form(&raw.form),
            confidence: Some(1.0),
            payload: serde_json::json!({
                "form": raw.form,
                "accession": raw.accession,
                "filingIndexUrl": raw.filing_index_url,
                "primaryDocument": raw.primary_document,
                "companyName": raw.company_name,
            }),
            dedupe_key: Some(format!("edgar:{}:{}", raw.cik, raw.accession)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cik_normalization_zero_pads_to_ten_digits() {
        assert_eq!(normalize_cik("320193"), "0000320193");
        assert_eq!(normalize_cik("0000320193"), "0000320193");
    }

    #[test]
    fn severity_map_matches_form_policy() {
        assert_eq!(severity_for_form("8-K"), 70);
        assert_eq!(severity_for_form("10-K"), 60);
        assert_eq!(severity_for_form("10-Q"), 60);
        assert_eq!(severity_for_form("13D"), 65);
        assert_eq!(severity_for_form("SC 13G"), 65);
        assert_eq!(severity_for_form("424B3"), 55);
        assert_eq!(severity_for_form("S-1"), 55);
        assert_eq!(severity_for_form("4"), 50);
        assert_eq!(severity_for_form("UNKNOWN"), 50);
    }

    #[test]
    fn default_forms_allowlist_covers_the_documented_set() {
        let forms = default_forms_allowlist();
        assert!(forms.contains(&"8-K".to_string()));
        assert!(forms.contains(&"SC 13G".to_string()));
        assert_eq!(forms.len(), 16);
    }
}
