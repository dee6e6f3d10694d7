//! GitHub API client
//!
//! Thin REST client for the pieces of the GitHub API the workflow needs:
//! fetching the issue under repair. Rate limiting maps to a retryable
//! error so the recovery manager can back off instead of aborting.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::GithubConfig;
use crate::{Error, Result};

/// An issue as returned by the GitHub REST API (fields we consume).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: String,
    pub html_url: String,
    pub user: IssueUser,
    #[serde(default)]
    pub labels: Vec<IssueLabel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueUser {
    pub login: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueLabel {
    pub name: String,
}

/// GitHub REST client
pub struct GitHubClient {
    api_url: String,
    client: reqwest::Client,
}

impl GitHubClient {
    pub fn new(config: &GithubConfig, token: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("mend"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| Error::Config(format!("invalid github token: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Github(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Fetch a single issue.
    pub async fn get_issue(&self, owner: &str, repo: &str, number: u64) -> Result<Issue> {
        let url = format!("{}/repos/{owner}/{repo}/issues/{number}", self.api_url);
        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            StatusCode::TOO_MANY_REQUESTS => Err(Error::RateLimited(format!(
                "github rate limit hit fetching {owner}/{repo}#{number}"
            ))),
            StatusCode::FORBIDDEN if quota_drained(response.headers()) => {
                Err(Error::RateLimited(format!(
                    "github rate limit hit fetching {owner}/{repo}#{number}"
                )))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::Github(format!(
                    "GET {url} returned {status}: {body}"
                )))
            }
        }
    }
}

/// GitHub also signals rate limiting as a 403 with a drained quota.
fn quota_drained(headers: &HeaderMap) -> bool {
    headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "0")
        .unwrap_or(false)
}
