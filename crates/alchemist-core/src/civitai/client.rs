//! Civitai API client.
//!
//! `CivitaiSource` is the seam the normalizer and resolver depend on, so they
//! can be exercised against an in-memory fake. `CivitaiClient` is the real
//! implementation over HTTP.

use crate::civitai::types::{GenerationData, ImageRecord, ModelSummary, ModelVersion};
use crate::config::CivitaiConfig;
use crate::network::{ApiLog, HttpClient, RetryConfig};
use crate::{AlchemistError, Result};
use async_trait::async_trait;
use mini_moka::sync::Cache;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

static IMAGE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"civitai\.com/images/(\d+)").unwrap());

/// Extract an image id from a bare number or a `civitai.com/images/<id>` URL.
pub fn parse_image_ref(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return trimmed
            .parse::<u64>()
            .map_err(|_| AlchemistError::InvalidImageRef {
                input: input.to_string(),
            });
    }

    IMAGE_URL_RE
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .ok_or_else(|| AlchemistError::InvalidImageRef {
            input: input.to_string(),
        })
}

/// Read access to the platform. `Ok(None)` and empty lists mean "not found".
#[async_trait]
pub trait CivitaiSource: Send + Sync {
    async fn get_image(&self, image_id: u64) -> Result<Option<ImageRecord>>;

    /// Server-side resolved generation data. Requires a credential.
    async fn get_generation_data(&self, image_id: u64) -> Result<Option<GenerationData>>;

    async fn get_model_version(&self, version_id: u64) -> Result<Option<ModelVersion>>;

    async fn get_model_version_by_hash(&self, hash: &str) -> Result<Option<ModelVersion>>;

    async fn search_models(&self, query: &str, limit: u32) -> Result<Vec<ModelSummary>>;
}

/// HTTP implementation of [`CivitaiSource`].
///
/// Clones share the HTTP connection pool and the lookup caches.
#[derive(Clone)]
pub struct CivitaiClient {
    http: Arc<HttpClient>,
    api_key: Option<String>,
    api_base: String,
    web_base: String,
    versions: Cache<u64, ModelVersion>,
    by_hash: Cache<String, ModelVersion>,
}

/// Builder for [`CivitaiClient`].
#[derive(Default)]
pub struct CivitaiClientBuilder {
    api_key: Option<String>,
    api_base: Option<String>,
    web_base: Option<String>,
    retry: Option<RetryConfig>,
    api_log: Option<ApiLog>,
}

impl CivitaiClientBuilder {
    pub fn api_key(mut self, key: Option<impl Into<String>>) -> Self {
        self.api_key = key.map(Into::into);
        self
    }

    /// Override the REST base (`https://civitai.com/api/v1`).
    pub fn api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = Some(base.into());
        self
    }

    /// Override the web base used for tRPC calls (`https://civitai.com`).
    pub fn web_base(mut self, base: impl Into<String>) -> Self {
        self.web_base = Some(base.into());
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn api_log(mut self, log: ApiLog) -> Self {
        self.api_log = Some(log);
        self
    }

    pub fn build(self) -> Result<CivitaiClient> {
        let mut http = HttpClient::new()?;
        if let Some(retry) = self.retry {
            http = http.with_retry(retry);
        }
        if let Some(log) = self.api_log {
            http = http.with_api_log(log);
        }

        Ok(CivitaiClient {
            http: Arc::new(http),
            api_key: self.api_key.filter(|k| !k.trim().is_empty()),
            api_base: trim_base(self.api_base.as_deref().unwrap_or(CivitaiConfig::API_BASE)),
            web_base: trim_base(self.web_base.as_deref().unwrap_or(CivitaiConfig::WEB_BASE)),
            versions: lookup_cache(),
            by_hash: lookup_cache(),
        })
    }
}

fn lookup_cache<K, V>() -> Cache<K, V>
where
    K: std::hash::Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    Cache::builder()
        .time_to_live(CivitaiConfig::LOOKUP_CACHE_TTL)
        .max_capacity(CivitaiConfig::LOOKUP_CACHE_CAPACITY)
        .build()
}

fn trim_base(base: &str) -> String {
    base.trim_end_matches('/').to_string()
}

impl CivitaiClient {
    pub fn builder() -> CivitaiClientBuilder {
        CivitaiClientBuilder::default()
    }

    /// Client with default endpoints and the given credential.
    pub fn new(api_key: Option<&str>) -> Result<Self> {
        Self::builder().api_key(api_key).build()
    }

    /// A view of this client using a different credential.
    ///
    /// Shares the connection pool and lookup caches with `self`.
    pub fn with_api_key(&self, api_key: Option<&str>) -> Self {
        Self {
            api_key: api_key
                .map(str::to_string)
                .filter(|k| !k.trim().is_empty()),
            ..self.clone()
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn api_log(&self) -> Option<&ApiLog> {
        self.http.api_log()
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<Option<Value>> {
        self.http.get_json(url, query, self.api_key.as_deref()).await
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|e| AlchemistError::Json {
        message: format!("Unexpected {} payload: {}", what, e),
        source: Some(e),
    })
}

#[async_trait]
impl CivitaiSource for CivitaiClient {
    async fn get_image(&self, image_id: u64) -> Result<Option<ImageRecord>> {
        let url = format!("{}/images", self.api_base);
        let query = [("imageId", image_id.to_string()), ("nsfw", "X".to_string())];

        let Some(body) = self.get(&url, &query).await? else {
            return Ok(None);
        };
        let first = body
            .get("items")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .cloned();

        match first {
            Some(item) => Ok(Some(decode(item, "image")?)),
            None => Ok(None),
        }
    }

    async fn get_generation_data(&self, image_id: u64) -> Result<Option<GenerationData>> {
        if self.api_key.is_none() {
            return Err(AlchemistError::Unauthorized {
                message: "generation data lookup requires a Civitai API key".to_string(),
            });
        }

        let url = format!("{}{}", self.web_base, CivitaiConfig::GENERATION_DATA_PATH);
        let input = json!({ "json": { "id": image_id } }).to_string();

        let Some(body) = self.get(&url, &[("input", input)]).await? else {
            return Ok(None);
        };
        match body.pointer("/result/data/json") {
            Some(Value::Null) | None => Ok(None),
            Some(data) => Ok(Some(decode(data.clone(), "generation data")?)),
        }
    }

    async fn get_model_version(&self, version_id: u64) -> Result<Option<ModelVersion>> {
        if let Some(hit) = self.versions.get(&version_id) {
            debug!("Model version {} served from cache", version_id);
            return Ok(Some(hit));
        }

        let url = format!("{}/model-versions/{}", self.api_base, version_id);
        let Some(body) = self.get(&url, &[]).await? else {
            return Ok(None);
        };
        let version: ModelVersion = decode(body, "model version")?;
        self.versions.insert(version_id, version.clone());
        Ok(Some(version))
    }

    async fn get_model_version_by_hash(&self, hash: &str) -> Result<Option<ModelVersion>> {
        let key = hash.to_ascii_uppercase();
        if let Some(hit) = self.by_hash.get(&key) {
            debug!("Hash {} served from cache", hash);
            return Ok(Some(hit));
        }

        let url = format!("{}/model-versions/by-hash/{}", self.api_base, hash);
        let Some(body) = self.get(&url, &[]).await? else {
            return Ok(None);
        };
        let version: ModelVersion = decode(body, "model version")?;
        self.by_hash.insert(key, version.clone());
        self.versions.insert(version.id, version.clone());
        Ok(Some(version))
    }

    async fn search_models(&self, query: &str, limit: u32) -> Result<Vec<ModelSummary>> {
        let url = format!("{}/models", self.api_base);
        let params = [("query", query.to_string()), ("limit", limit.to_string())];

        let Some(body) = self.get(&url, &params).await? else {
            return Ok(Vec::new());
        };
        let items = body.get("items").cloned().unwrap_or(Value::Array(Vec::new()));
        match serde_json::from_value::<Vec<ModelSummary>>(items) {
            Ok(models) => Ok(models),
            Err(e) => {
                warn!("Discarding malformed search response for '{}': {}", query, e);
                Ok(Vec::new())
            }
        }
    }
}
