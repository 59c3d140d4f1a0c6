//! Reqwest-based JSON transport: bearer auth, status mapping, retry with backoff.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{Config, Profile};
use crate::error::{ExecError, ExecResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), doubling each time.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct Transport {
    http: Client,
    base_url: String,
    headers: HeaderMap,
    retry: RetryPolicy,
}

impl Transport {
    pub fn new(profile: &Profile, timeout: Duration, retry: RetryPolicy) -> ExecResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", profile.token))
            .map_err(|_| ExecError::Config("token contains characters not allowed in a header".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: profile.host.trim_end_matches('/').to_string(),
            headers,
            retry,
        })
    }

    pub fn from_config(cfg: &Config, profile: &Profile) -> ExecResult<Self> {
        let timeout = cfg.get_u64("REQUEST_TIMEOUT").unwrap_or(60);
        let retry = RetryPolicy {
            max_retries: cfg.get_u32("MAX_RETRIES").unwrap_or(3),
            ..Default::default()
        };
        Self::new(profile, Duration::from_secs(timeout), retry)
    }

    pub async fn get(&self, path: &str, query: &[(&str, &str)]) -> ExecResult<Value> {
        self.request(Method::GET, path, query, None::<&()>).await
    }

    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> ExecResult<Value> {
        self.request(Method::POST, path, &[], Some(body)).await
    }

    async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> ExecResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0u32;
        loop {
            match self.send_once(method.clone(), &url, query, body).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt);
                    attempt += 1;
                    warn!(%method, path, attempt, ?delay, error = %e, "transient failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> ExecResult<Value> {
        let mut req = self
            .http
            .request(method.clone(), url)
            .headers(self.headers.clone());
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req.send().await?;
        let status = resp.status();
        debug!(%method, url, status = status.as_u16(), "response");
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(ExecError::from_status(status, text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| ExecError::Protocol(format!("invalid JSON from {}: {}", url, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Language;
    use httpmock::prelude::*;

    fn profile(host: String) -> Profile {
        Profile {
            host,
            token: "test-token".into(),
            cluster_id: "c-1".into(),
            language: Language::Python,
        }
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(0), Duration::from_millis(500));
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(10), Duration::from_secs(8));
        assert_eq!(p.delay_for(u32::MAX), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn sends_bearer_token_and_decodes_json() {
        let server = MockServer::start_async().await;
        let m = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/ping")
                    .query_param("a", "1")
                    .header("authorization", "Bearer test-token");
                then.status(200).json_body(serde_json::json!({"ok": true}));
            })
            .await;

        let t = Transport::new(&profile(server.base_url()), Duration::from_secs(5), fast_retry(0)).unwrap();
        let v = t.get("/ping", &[("a", "1")]).await.unwrap();
        assert_eq!(v["ok"], true);
        m.assert_async().await;
    }

    #[tokio::test]
    async fn empty_success_body_is_null() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/empty");
                then.status(200);
            })
            .await;

        let t = Transport::new(&profile(server.base_url()), Duration::from_secs(5), fast_retry(0)).unwrap();
        let v = t.post("/empty", &serde_json::json!({})).await.unwrap();
        assert!(v.is_null());
    }

    #[tokio::test]
    async fn server_errors_are_retried_up_to_the_limit() {
        let server = MockServer::start_async().await;
        let m = server
            .mock_async(|when, then| {
                when.method(POST).path("/flaky");
                then.status(503).body("overloaded");
            })
            .await;

        let t = Transport::new(&profile(server.base_url()), Duration::from_secs(5), fast_retry(2)).unwrap();
        let err = t.post("/flaky", &serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ExecError::ServiceUnavailable { status: 503, ref body } if body == "overloaded"));
        m.assert_hits_async(3).await;
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start_async().await;
        let m = server
            .mock_async(|when, then| {
                when.method(POST).path("/auth");
                then.status(401).body("{\"error_code\":\"UNAUTHENTICATED\"}");
            })
            .await;

        let t = Transport::new(&profile(server.base_url()), Duration::from_secs(5), fast_retry(3)).unwrap();
        let err = t.post("/auth", &serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ExecError::Unauthorized(ref body) if body.contains("UNAUTHENTICATED")));
        m.assert_hits_async(1).await;
    }
}
