//! Centralized configuration for Civitai Alchemist.
//!
//! Constant groups for network behaviour, platform endpoints and workflow
//! defaults, plus `Settings` for the values that come from the environment.

use std::path::PathBuf;
use std::time::Duration;

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const USER_AGENT: &'static str = "civitai-alchemist/0.3";
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
    /// One initial attempt plus three retries (1s, 2s, 4s backoff).
    pub const MAX_ATTEMPTS: u32 = 4;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(60);
    /// Wait used for a 429 response that carries no Retry-After header.
    pub const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(5);
    pub const DOWNLOAD_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);
    pub const DOWNLOAD_TEMP_SUFFIX: &'static str = ".part";
}

/// Civitai platform endpoints and lookup limits.
pub struct CivitaiConfig;

impl CivitaiConfig {
    pub const API_BASE: &'static str = "https://civitai.com/api/v1";
    pub const WEB_BASE: &'static str = "https://civitai.com";
    pub const GENERATION_DATA_PATH: &'static str = "/api/trpc/image.getGenerationData";
    pub const DOWNLOAD_BASE: &'static str = "https://civitai.com/api/download/models";
    pub const NAME_SEARCH_LIMIT: u32 = 5;
    pub const LOOKUP_CACHE_TTL: Duration = Duration::from_secs(600);
    pub const LOOKUP_CACHE_CAPACITY: u64 = 512;

    /// Canonical download URL for a model version.
    pub fn download_url(version_id: u64) -> String {
        format!("{}/{}", Self::DOWNLOAD_BASE, version_id)
    }
}

/// Defaults applied when metadata omits a generation parameter.
pub struct WorkflowDefaults;

impl WorkflowDefaults {
    pub const STEPS: u32 = 20;
    pub const CFG_SCALE: f64 = 7.0;
    pub const REFINE_DENOISE: f64 = 0.4;
    pub const IMAGE_SIZE: u32 = 512;
    pub const FILENAME_PREFIX: &'static str = "civitai_";
}

/// Run document file names.
pub struct PathsConfig;

impl PathsConfig {
    pub const METADATA_FILE: &'static str = "metadata.json";
    pub const RESOURCES_FILE: &'static str = "resources.json";
    pub const WORKFLOW_FILE: &'static str = "workflow.json";
    pub const DEFAULT_MODELS_DIR: &'static str = "models";
    pub const DEFAULT_OUTPUT_DIR: &'static str = "output";
}

/// Environment-provided settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: Option<String>,
    pub models_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Settings {
    pub const API_KEY_VAR: &'static str = "CIVITAI_API_KEY";
    pub const MODELS_DIR_VAR: &'static str = "MODELS_DIR";
    pub const OUTPUT_DIR_VAR: &'static str = "ALCHEMIST_OUTPUT_DIR";

    /// Load settings from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            api_key: non_empty(Self::API_KEY_VAR),
            models_dir: non_empty(Self::MODELS_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(PathsConfig::DEFAULT_MODELS_DIR)),
            output_dir: non_empty(Self::OUTPUT_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(PathsConfig::DEFAULT_OUTPUT_DIR)),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert!(settings.api_key.is_none());
        assert_eq!(settings.models_dir, PathBuf::from("models"));
        assert_eq!(settings.output_dir, PathBuf::from("output"));
    }

    #[test]
    fn test_settings_from_lookup_ignores_blank_values() {
        let env: HashMap<&str, &str> = [
            ("CIVITAI_API_KEY", "  "),
            ("MODELS_DIR", "/srv/comfy/models"),
        ]
        .into_iter()
        .collect();
        let settings = Settings::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert!(settings.api_key.is_none());
        assert_eq!(settings.models_dir, PathBuf::from("/srv/comfy/models"));
    }

    #[test]
    fn test_download_url_scheme() {
        assert_eq!(
            CivitaiConfig::download_url(12345),
            "https://civitai.com/api/download/models/12345"
        );
    }

    #[test]
    fn test_timeouts_are_reasonable() {
        assert!(NetworkConfig::REQUEST_TIMEOUT > Duration::ZERO);
        assert!(NetworkConfig::DOWNLOAD_PROGRESS_INTERVAL >= Duration::from_millis(500));
    }
}
