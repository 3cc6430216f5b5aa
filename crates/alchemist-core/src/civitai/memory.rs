//! In-memory [`CivitaiSource`] for offline replay and tests.

use crate::civitai::client::CivitaiSource;
use crate::civitai::types::{GenerationData, ImageRecord, ModelSummary, ModelVersion};
use crate::{AlchemistError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// A platform snapshot held in memory.
///
/// Every call is appended to a call log (`"version:12345"`, `"hash:ABC"`,
/// `"search:name"`, ...) so callers can assert lookup order.
#[derive(Default)]
pub struct MemorySource {
    images: HashMap<u64, ImageRecord>,
    generation_data: HashMap<u64, GenerationData>,
    versions: HashMap<u64, ModelVersion>,
    hashes: HashMap<String, ModelVersion>,
    searches: HashMap<String, Vec<ModelSummary>>,
    failing_versions: HashSet<u64>,
    reject_credentials: bool,
    calls: Mutex<Vec<String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, image: ImageRecord) -> Self {
        self.images.insert(image.id, image);
        self
    }

    pub fn with_generation_data(mut self, image_id: u64, data: GenerationData) -> Self {
        self.generation_data.insert(image_id, data);
        self
    }

    pub fn with_version(mut self, version: ModelVersion) -> Self {
        self.versions.insert(version.id, version);
        self
    }

    pub fn with_hash(mut self, hash: &str, version: ModelVersion) -> Self {
        self.hashes.insert(hash.to_ascii_uppercase(), version);
        self
    }

    pub fn with_search(mut self, query: &str, models: Vec<ModelSummary>) -> Self {
        self.searches.insert(query.to_lowercase(), models);
        self
    }

    /// Version lookups for `version_id` fail with a transport error.
    pub fn with_failing_version(mut self, version_id: u64) -> Self {
        self.failing_versions.insert(version_id);
        self
    }

    /// Every call fails with `Unauthorized`.
    pub fn rejecting_credentials(mut self) -> Self {
        self.reject_credentials = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn record(&self, call: String) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(call);
        if self.reject_credentials {
            return Err(AlchemistError::Unauthorized {
                message: "credential rejected".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CivitaiSource for MemorySource {
    async fn get_image(&self, image_id: u64) -> Result<Option<ImageRecord>> {
        self.record(format!("image:{}", image_id))?;
        Ok(self.images.get(&image_id).cloned())
    }

    async fn get_generation_data(&self, image_id: u64) -> Result<Option<GenerationData>> {
        self.record(format!("generation:{}", image_id))?;
        Ok(self.generation_data.get(&image_id).cloned())
    }

    async fn get_model_version(&self, version_id: u64) -> Result<Option<ModelVersion>> {
        self.record(format!("version:{}", version_id))?;
        if self.failing_versions.contains(&version_id) {
            return Err(AlchemistError::Network {
                message: format!("connection reset while fetching version {}", version_id),
                cause: None,
            });
        }
        Ok(self.versions.get(&version_id).cloned())
    }

    async fn get_model_version_by_hash(&self, hash: &str) -> Result<Option<ModelVersion>> {
        self.record(format!("hash:{}", hash))?;
        Ok(self.hashes.get(&hash.to_ascii_uppercase()).cloned())
    }

    async fn search_models(&self, query: &str, limit: u32) -> Result<Vec<ModelSummary>> {
        self.record(format!("search:{}", query))?;
        let mut models = self
            .searches
            .get(&query.to_lowercase())
            .cloned()
            .unwrap_or_default();
        models.truncate(limit as usize);
        Ok(models)
    }
}
