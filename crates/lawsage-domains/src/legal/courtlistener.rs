use std::time::Duration;

use async_trait::async_trait;
use lawsage_core::authority::{AuthorityIndex, IndexHit};
use lawsage_core::error::AuthorityError;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const BASE: &str = "https://www.courtlistener.com/api/rest/v4";

/// CourtListener opinion search used as the authority index.
/// One client is shared by every request; it holds no per-request state.
pub struct CourtListenerClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub results: Vec<serde_json::Value>,
    pub next: Option<String>,
}

impl CourtListenerClient {
    pub fn new(api_key: &str) -> Self {
        Self {
            base_url: BASE.into(),
            api_key: api_key.to_string(),
            http: reqwest::Client::builder()
                .user_agent("lawsage/0.1 (legal-assistant)")
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn search_url(&self, query: &str) -> String {
        format!("{}/search/?q={}&type=o", self.base_url, urlencoding::encode(query))
    }

    pub async fn citation_lookup(&self, cite: &str) -> Result<SearchResult, AuthorityError> {
        if self.api_key.is_empty() {
            return Err(AuthorityError::Hard("COURTLISTENER_API_KEY not set".into()));
        }
        let resp = self
            .http
            .get(self.search_url(cite))
            .header("Authorization", format!("Token {}", self.api_key))
            .send()
            .await
            .map_err(|e| AuthorityError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "courtlistener error: {}", truncate(&body, 200));
            return Err(classify_status(status));
        }
        resp.json()
            .await
            .map_err(|e| AuthorityError::Hard(format!("unexpected response: {e}")))
    }
}

/// 5xx and 429 may clear up; anything else needs a human.
pub fn classify_status(status: StatusCode) -> AuthorityError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        AuthorityError::Transient(format!("API status {}", status.as_u16()))
    } else {
        AuthorityError::Hard(format!("API status {}", status.as_u16()))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[async_trait]
impl AuthorityIndex for CourtListenerClient {
    async fn lookup(&self, citation: &str) -> Result<IndexHit, AuthorityError> {
        let result = self.citation_lookup(citation).await?;
        let count = u32::try_from(result.count).unwrap_or(u32::MAX);
        debug!(citation, count, "courtlistener lookup");
        Ok(IndexHit::found(count))
    }

    fn name(&self) -> &str {
        "courtlistener"
    }
}
