//! REST client for the session API.

use anyhow::{Context, Result};
use reqwest::{Response, StatusCode};
use slurmgate_core::{AllocRequest, CreateSessionResponse, ErrorBody, SessionSummary};
use tracing::debug;

use crate::config::Endpoint;

const SESSIONS_PATH: &str = "/api/v1/salloc/interactive";

pub struct ApiClient {
    http: reqwest::Client,
    endpoint: Endpoint,
}

impl ApiClient {
    pub fn new(endpoint: Endpoint) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("slurmgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, endpoint })
    }

    /// Start an allocation and return its session ID.
    pub async fn create(&self, request: &AllocRequest) -> Result<String> {
        let url = self.endpoint.api_url(SESSIONS_PATH);
        debug!(url = %url, ?request, "creating session");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.endpoint.token)
            .json(request)
            .send()
            .await
            .with_context(|| format!("failed to reach {url}"))?;
        let body: CreateSessionResponse = check(resp)
            .await?
            .json()
            .await
            .context("malformed create response")?;
        Ok(body.session_id)
    }

    pub async fn list(&self) -> Result<Vec<SessionSummary>> {
        let url = self.endpoint.api_url(SESSIONS_PATH);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.endpoint.token)
            .send()
            .await
            .with_context(|| format!("failed to reach {url}"))?;
        check(resp)
            .await?
            .json()
            .await
            .context("malformed session list")
    }

    pub async fn close(&self, session_id: &str) -> Result<()> {
        let url = self.endpoint.api_url(&format!("{SESSIONS_PATH}/{session_id}"));
        let resp = self
            .http
            .delete(&url)
            .bearer_auth(&self.endpoint.token)
            .send()
            .await
            .with_context(|| format!("failed to reach {url}"))?;
        check(resp).await?;
        Ok(())
    }
}

/// Turn a non-2xx response into an error carrying the server's message.
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    anyhow::bail!("{}", describe_failure(status, &text))
}

pub fn describe_failure(status: StatusCode, body: &str) -> String {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.trim().to_string());
    if message.is_empty() {
        format!("server returned {status}")
    } else {
        format!("server returned {status}: {message}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_uses_error_body() {
        let msg = describe_failure(StatusCode::FORBIDDEN, r#"{"error":"not your session"}"#);
        assert_eq!(msg, "server returned 403 Forbidden: not your session");
    }

    #[test]
    fn failure_falls_back_to_raw_text() {
        let msg = describe_failure(StatusCode::BAD_GATEWAY, "upstream down\n");
        assert_eq!(msg, "server returned 502 Bad Gateway: upstream down");
        let msg = describe_failure(StatusCode::UNAUTHORIZED, "");
        assert_eq!(msg, "server returned 401 Unauthorized");
    }
}
