//! C1 — Trace Client.
//!
//! Authenticated pull from the external observability API. Supports
//! pull-by-project (projects → sessions → runs) and pull-by-session
//! (direct). Header-based auth with two required credentials, no OAuth
//! bearer fallback (spec §4.1, §6).
//!
//! Grounded on `scrapers/polymarket_api.rs`'s `execute_with_retry`
//! (timeout + exponential backoff loop) and `PolymarketScraper::new`'s
//! `reqwest::Client::builder()` construction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::TraceClientError;
use crate::models::Trace;
use crate::trace_client::dedup::TraceDedup;
use crate::trace_client::rate_limit::TokenBucket;

const API_KEY_HEADER: &str = "X-Observability-Api-Key";
const ORG_ID_HEADER: &str = "X-Observability-Org-Id";

const MAX_5XX_RETRIES: u32 = 3;
const MAX_429_ATTEMPTS: u32 = 5;
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct Project {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Session {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PagedResponse<T> {
    items: Vec<T>,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunDetail {
    id: String,
    timestamp: DateTime<Utc>,
    model: String,
    provider: String,
    spectrum: Option<String>,
    input: String,
    output: String,
    latency_ms: u64,
    #[serde(default)]
    tool_calls: Vec<String>,
    #[serde(default)]
    error: bool,
    user_feedback_score: Option<f64>,
}

impl TryFrom<RunDetail> for Trace {
    type Error = TraceClientError;

    fn try_from(r: RunDetail) -> Result<Self, Self::Error> {
        let spectrum = match r.spectrum {
            None => None,
            Some(s) => Some(parse_spectrum(&s)?),
        };
        Ok(Trace {
            id: r.id,
            timestamp: r.timestamp,
            model: r.model,
            provider: r.provider,
            spectrum,
            input: r.input,
            output: r.output,
            latency_ms: r.latency_ms,
            tool_calls: r.tool_calls,
            error: r.error,
            user_feedback_score: r.user_feedback_score,
        })
    }
}

fn parse_spectrum(s: &str) -> Result<crate::models::Spectrum, TraceClientError> {
    use crate::models::Spectrum::*;
    Ok(match s {
        "customer_identity" => CustomerIdentity,
        "financial_analysis" => FinancialAnalysis,
        "credit_analysis" => CreditAnalysis,
        "transaction_history" => TransactionHistory,
        "multi_field_search" => MultiFieldSearch,
        "conversational_context" => ConversationalContext,
        "performance" => Performance,
        other => return Err(TraceClientError::ContractViolation(format!("unknown spectrum tag: {other}"))),
    })
}

/// Outcome of one `fetch_recent` poll.
pub struct FetchResult {
    pub traces: Vec<Trace>,
    /// Monotonic cursor per project, to resume from next poll.
    pub cursors: HashMap<String, String>,
    /// Non-fatal per-project failures; the poll as a whole still succeeds.
    pub project_errors: Vec<(String, TraceClientError)>,
}

pub struct TraceClient {
    http: Client,
    config: Arc<Config>,
    limiter: Arc<TokenBucket>,
    dedup: Mutex<TraceDedup>,
}

impl TraceClient {
    pub fn new(config: Arc<Config>) -> Self {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .user_agent("quality-cycle/0.1")
            .build()
            .expect("failed to build observability HTTP client");
        let limiter = Arc::new(TokenBucket::new(config.rate_limit_per_minute));
        let dedup = Mutex::new(TraceDedup::new(config.trace_dedup_capacity));
        Self {
            http,
            config,
            limiter,
            dedup,
        }
    }

    fn auth_headers(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header(API_KEY_HEADER, &self.config.observability_api_key)
            .header(ORG_ID_HEADER, &self.config.observability_org_id)
    }

    /// Pull-by-project: enumerate projects, then sessions, then runs.
    /// Partial per-project failures are collected, not fatal — except an
    /// AuthFailure, which halts the whole poll immediately (spec §4.1,
    /// §7).
    pub async fn fetch_recent(&self, cursors: &HashMap<String, String>) -> Result<FetchResult, TraceClientError> {
        let projects = self.list_projects().await?;

        let mut traces = Vec::new();
        let mut new_cursors = HashMap::new();
        let mut project_errors = Vec::new();

        for project in projects {
            let since_cursor = cursors.get(&project.id).cloned();
            match self.fetch_project(&project.id, since_cursor).await {
                Ok((project_traces, cursor)) => {
                    traces.extend(project_traces);
                    if let Some(c) = cursor {
                        new_cursors.insert(project.id.clone(), c);
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(project = %project.id, error = %e, "project poll failed, continuing with others");
                    project_errors.push((project.id.clone(), e));
                }
            }
        }

        Ok(FetchResult {
            traces,
            cursors: new_cursors,
            project_errors,
        })
    }

    /// Pull-by-session: direct fetch of runs for a known session.
    pub async fn fetch_session(&self, session_id: &str) -> Result<Vec<Trace>, TraceClientError> {
        let runs = self.list_runs(session_id, None).await?.0;
        let mut traces = Vec::with_capacity(runs.len());
        for run_id in runs {
            if let Some(trace) = self.get_run_detail(&run_id).await? {
                traces.push(trace);
            }
        }
        Ok(traces)
    }

    async fn fetch_project(
        &self,
        project_id: &str,
        cursor: Option<String>,
    ) -> Result<(Vec<Trace>, Option<String>), TraceClientError> {
        let (sessions, next_cursor) = self.list_sessions(project_id, cursor).await?;
        let mut traces = Vec::new();
        for session in sessions {
            let (run_ids, _) = self.list_runs(&session.id, None).await?;
            for run_id in run_ids {
                if let Some(trace) = self.get_run_detail(&run_id).await? {
                    traces.push(trace);
                }
            }
        }
        Ok((traces, next_cursor))
    }

    async fn list_projects(&self) -> Result<Vec<Project>, TraceClientError> {
        let url = format!("{}/api/projects", self.config.observability_base_url);
        let resp = self.execute_with_retry(&url, None).await?;
        resp.json::<Vec<Project>>().await.map_err(TraceClientError::Http)
    }

    async fn list_sessions(
        &self,
        project_id: &str,
        cursor: Option<String>,
    ) -> Result<(Vec<Session>, Option<String>), TraceClientError> {
        let url = format!(
            "{}/api/projects/{}/sessions",
            self.config.observability_base_url, project_id
        );
        let mut params = HashMap::new();
        if let Some(c) = cursor {
            params.insert("cursor", c);
        }
        let resp = self.execute_with_retry(&url, Some(&params)).await?;
        let page: PagedResponse<Session> = resp.json().await.map_err(TraceClientError::Http)?;
        Ok((page.items, page.next_cursor))
    }

    async fn list_runs(&self, session_id: &str, cursor: Option<String>) -> Result<(Vec<String>, Option<String>), TraceClientError> {
        let url = format!("{}/api/sessions/{}/runs", self.config.observability_base_url, session_id);
        let mut params = HashMap::new();
        if let Some(c) = cursor {
            params.insert("cursor", c);
        }
        let resp = self.execute_with_retry(&url, Some(&params)).await?;
        #[derive(Deserialize)]
        struct RunIds {
            ids: Vec<String>,
            next_cursor: Option<String>,
        }
        let page: RunIds = resp.json().await.map_err(TraceClientError::Http)?;
        Ok((page.ids, page.next_cursor))
    }

    async fn get_run_detail(&self, run_id: &str) -> Result<Option<Trace>, TraceClientError> {
        let url = format!("{}/api/runs/{}", self.config.observability_base_url, run_id);
        let resp = self.execute_with_retry(&url, None).await?;
        let detail: RunDetail = resp.json().await.map_err(TraceClientError::Http)?;

        let is_new = self.dedup.lock().insert(&detail.id);
        if !is_new {
            debug!(run_id = %run_id, "duplicate trace id dropped");
            return Ok(None);
        }

        match Trace::try_from(detail) {
            Ok(t) => Ok(Some(t)),
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "dropping trace with contract violation");
                Ok(None)
            }
        }
    }

    /// Shared retry/backoff discipline for all outbound calls (spec §4.1):
    /// 401/403 fatal, 429 honors `Retry-After` with capped exponential
    /// backoff up to 5 attempts, 5xx up to 3 retries with jitter, other
    /// network errors get a single retry.
    async fn execute_with_retry(
        &self,
        url: &str,
        params: Option<&HashMap<&str, String>>,
    ) -> Result<reqwest::Response, TraceClientError> {
        self.limiter.acquire().await;

        let mut attempt_429 = 0u32;
        let mut attempt_5xx = 0u32;
        let mut attempted_network_retry = false;
        let mut backoff = Duration::from_millis(200);

        loop {
            let mut req = self.http.get(url);
            if let Some(p) = params {
                req = req.query(p);
            }
            req = self.auth_headers(req);

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                        error!(url = %url, status = %status, "observability auth failure");
                        return Err(TraceClientError::Auth(format!("HTTP {status}")));
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        attempt_429 += 1;
                        if attempt_429 > MAX_429_ATTEMPTS {
                            return Err(TraceClientError::Transient("rate limited: max attempts exceeded".into()));
                        }
                        let retry_after = resp
                            .headers()
                            .get("Retry-After")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .map(Duration::from_secs)
                            .unwrap_or(backoff);
                        let wait = retry_after.min(MAX_BACKOFF);
                        warn!(url = %url, attempt = attempt_429, wait_ms = wait.as_millis(), "429, backing off");
                        tokio::time::sleep(wait).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                        continue;
                    }
                    if status.is_server_error() {
                        attempt_5xx += 1;
                        if attempt_5xx > MAX_5XX_RETRIES {
                            return Err(TraceClientError::Transient(format!("server error {status}, retries exhausted")));
                        }
                        let jitter_ms = (attempt_5xx as u64 * 137) % 250;
                        let wait = backoff + Duration::from_millis(jitter_ms);
                        warn!(url = %url, attempt = attempt_5xx, "5xx, retrying");
                        tokio::time::sleep(wait.min(MAX_BACKOFF)).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                        continue;
                    }
                    return Err(TraceClientError::ContractViolation(format!("unexpected status {status}")));
                }
                Err(e) => {
                    if attempted_network_retry {
                        return Err(TraceClientError::Transient(format!("network error after retry: {e}")));
                    }
                    attempted_network_retry = true;
                    warn!(url = %url, error = %e, "network error, retrying once");
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    continue;
                }
            }
        }
    }
}

#[allow(dead_code)]
fn _assert_send<T: Send>() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_spectrum() {
        assert!(parse_spectrum("credit_analysis").is_ok());
    }

    #[test]
    fn parse_unknown_spectrum_is_contract_violation() {
        let err = parse_spectrum("not_a_real_spectrum").unwrap_err();
        assert!(matches!(err, TraceClientError::ContractViolation(_)));
    }
}
