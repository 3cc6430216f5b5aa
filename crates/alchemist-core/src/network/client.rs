//! JSON HTTP client with the platform retry policy.
//!
//! Wraps reqwest with:
//! - bearer authentication per request
//! - bounded exponential backoff for transient failures
//! - unbounded, server-paced retries for 429 responses
//! - an optional append-only API log for diagnostics

use crate::config::NetworkConfig;
use crate::network::retry::{retry_async, RetryConfig, RetryDecision};
use crate::{AlchemistError, Result};
use chrono::{DateTime, Utc};
use reqwest::{header, Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// One recorded API call.
#[derive(Debug, Clone, Serialize)]
pub struct ApiLogEntry {
    pub method: String,
    pub url: String,
    pub status_code: Option<u16>,
    pub elapsed_ms: u64,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Append-only diagnostic log of API calls, shareable across clients.
#[derive(Debug, Clone, Default)]
pub struct ApiLog {
    entries: Arc<Mutex<Vec<ApiLogEntry>>>,
}

impl ApiLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: ApiLogEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.push(entry);
    }

    /// Snapshot of all entries recorded so far.
    pub fn entries(&self) -> Vec<ApiLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// HTTP client for JSON APIs.
pub struct HttpClient {
    client: Client,
    retry: RetryConfig,
    api_log: Option<ApiLog>,
}

impl HttpClient {
    /// Create a new HTTP client with default configuration.
    pub fn new() -> Result<Self> {
        Self::with_timeout(NetworkConfig::REQUEST_TIMEOUT)
    }

    /// Create a new HTTP client with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(NetworkConfig::CONNECT_TIMEOUT)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| AlchemistError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                cause: None,
            })?;

        Ok(Self {
            client,
            retry: RetryConfig::default(),
            api_log: None,
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_api_log(mut self, log: ApiLog) -> Self {
        self.api_log = Some(log);
        self
    }

    pub fn api_log(&self) -> Option<&ApiLog> {
        self.api_log.as_ref()
    }

    /// GET a JSON document.
    ///
    /// Returns `Ok(None)` for 404. 401/403 become `Unauthorized`; transient
    /// failures are retried per the configured policy before being surfaced.
    pub async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
        bearer: Option<&str>,
    ) -> Result<Option<Value>> {
        let (result, stats) = retry_async(
            &self.retry,
            || self.get_json_once(url, query, bearer),
            classify,
        )
        .await;

        if stats.attempts > 1 {
            debug!(
                "GET {} took {} attempts ({} rate limited, {:?} waiting)",
                url, stats.attempts, stats.rate_limited, stats.total_delay
            );
        }

        result
    }

    async fn get_json_once(
        &self,
        url: &str,
        query: &[(&str, String)],
        bearer: Option<&str>,
    ) -> Result<Option<Value>> {
        let mut request = self.client.get(url).query(query);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let start = Instant::now();
        let outcome = request.send().await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                self.log(url, None, elapsed_ms, Some(e.to_string()));
                if e.is_timeout() {
                    return Err(AlchemistError::Timeout(NetworkConfig::REQUEST_TIMEOUT));
                }
                return Err(AlchemistError::Network {
                    message: format!("GET {} failed: {}", url, e),
                    cause: None,
                });
            }
        };

        let status = response.status();
        let final_url = response.url().to_string();
        self.log(&final_url, Some(status.as_u16()), elapsed_ms, None);
        debug!("API GET {} -> {} ({}ms)", final_url, status.as_u16(), elapsed_ms);

        match status {
            StatusCode::NOT_FOUND => return Ok(None),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AlchemistError::Unauthorized {
                    message: format!("{} rejected the credential ({})", extract_domain(url), status),
                });
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.trim().parse::<u64>().ok());
                return Err(AlchemistError::RateLimited {
                    service: extract_domain(url),
                    retry_after_secs: retry_after,
                });
            }
            s if !s.is_success() => {
                return Err(AlchemistError::Http {
                    url: url.to_string(),
                    status: s.as_u16(),
                });
            }
            _ => {}
        }

        let body = response.bytes().await.map_err(|e| AlchemistError::Network {
            message: format!("Reading body from {} failed: {}", url, e),
            cause: None,
        })?;
        let value = serde_json::from_slice(&body)?;
        Ok(Some(value))
    }

    fn log(&self, url: &str, status: Option<u16>, elapsed_ms: u64, error: Option<String>) {
        if let Some(log) = &self.api_log {
            log.record(ApiLogEntry {
                method: "GET".to_string(),
                url: url.to_string(),
                status_code: status,
                elapsed_ms,
                error,
                timestamp: Utc::now(),
            });
        }
    }
}

/// Map an error to the retry policy.
fn classify(err: &AlchemistError) -> RetryDecision {
    match err {
        AlchemistError::RateLimited {
            retry_after_secs, ..
        } => RetryDecision::RetryAfter(
            retry_after_secs
                .map(Duration::from_secs)
                .unwrap_or(NetworkConfig::DEFAULT_RATE_LIMIT_WAIT),
        ),
        e if e.is_retryable() => RetryDecision::Retry,
        _ => RetryDecision::Stop,
    }
}

/// Extract domain from a URL.
pub fn extract_domain(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::get;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn fast_client() -> HttpClient {
        HttpClient::new().unwrap().with_retry(
            RetryConfig::default().with_base_delay(Duration::from_millis(5)),
        )
    }

    #[test]
    fn test_extract_domain() {
        assert_eq!(extract_domain("https://civitai.com/api/v1/models"), "civitai.com");
        assert_eq!(extract_domain("not a url"), "unknown");
    }

    #[test]
    fn test_classify() {
        let limited = AlchemistError::RateLimited {
            service: "civitai.com".into(),
            retry_after_secs: None,
        };
        assert_eq!(
            classify(&limited),
            RetryDecision::RetryAfter(Duration::from_secs(5))
        );
        let server = AlchemistError::Http {
            url: "u".into(),
            status: 502,
        };
        assert_eq!(classify(&server), RetryDecision::Retry);
        let bad = AlchemistError::Http {
            url: "u".into(),
            status: 400,
        };
        assert_eq!(classify(&bad), RetryDecision::Stop);
    }

    #[tokio::test]
    async fn test_not_found_is_none() {
        let base = spawn(Router::new().route(
            "/missing",
            get(|| async { AxumStatus::NOT_FOUND }),
        ))
        .await;

        let client = fast_client();
        let value = client
            .get_json(&format!("{}/missing", base), &[], None)
            .await
            .unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_unauthorized_not_retried() {
        let hits = Arc::new(AtomicU32::new(0));
        let router = Router::new()
            .route(
                "/secret",
                get(|State(hits): State<Arc<AtomicU32>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    AxumStatus::UNAUTHORIZED
                }),
            )
            .with_state(hits.clone());
        let base = spawn(router).await;

        let err = fast_client()
            .get_json(&format!("{}/secret", base), &[], Some("bad"))
            .await
            .unwrap_err();
        assert!(err.is_auth());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_errors_retry_then_succeed() {
        let hits = Arc::new(AtomicU32::new(0));
        let router = Router::new()
            .route(
                "/flaky",
                get(|State(hits): State<Arc<AtomicU32>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(AxumStatus::SERVICE_UNAVAILABLE)
                    } else {
                        Ok(Json(serde_json::json!({"id": 1})))
                    }
                }),
            )
            .with_state(hits.clone());
        let base = spawn(router).await;

        let log = ApiLog::new();
        let client = fast_client().with_api_log(log.clone());
        let value = client
            .get_json(&format!("{}/flaky", base), &[], None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value["id"], 1);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(log.len(), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_honours_retry_after() {
        let hits = Arc::new(AtomicU32::new(0));
        let router = Router::new()
            .route(
                "/limited",
                get(|State(hits): State<Arc<AtomicU32>>| async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < 5 {
                        let mut headers = HeaderMap::new();
                        headers.insert("Retry-After", "0".parse().unwrap());
                        Err((AxumStatus::TOO_MANY_REQUESTS, headers))
                    } else {
                        Ok(Json(serde_json::json!({"ok": true})))
                    }
                }),
            )
            .with_state(hits.clone());
        let base = spawn(router).await;

        // Five 429s exceed a budget of two attempts, yet the call succeeds.
        let client = fast_client().with_retry(RetryConfig::new().with_max_attempts(2));
        let value = client
            .get_json(&format!("{}/limited", base), &[], None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(hits.load(Ordering::SeqCst), 6);
    }
}
