//! Configuration Management
//!
//! Reads the optional configuration file of infragraph. Effective values are
//! resolved as CLI flag > config file > environment > built-in default.

use crate::cloud::client::{DEFAULT_CACHE_TTL, DEFAULT_CALL_RETRIES};
use crate::cloud::{CallSettings, Endpoints};
use crate::resource::code::{DEFAULT_CODE_CACHE_TTL, DEFAULT_SCRATCH_MAX_AGE};
use crate::resource::DEFAULT_CONCURRENCY;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "infragraph";
const DEFAULT_CLI_PROGRAM: &str = "aws";

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Region passed to the control plane
    #[serde(default)]
    pub region: Option<String>,
    /// Endpoint used for every service (e.g. a local emulator)
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Per-service endpoint overrides, keyed by CLI service name
    #[serde(default)]
    pub service_endpoints: HashMap<String, String>,
    /// Control-plane CLI executable
    #[serde(default)]
    pub cli_program: Option<String>,
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    /// Reuse time of function code locations
    #[serde(default)]
    pub code_cache_ttl_secs: Option<u64>,
    #[serde(default)]
    pub call_retries: Option<u32>,
    /// Concurrent detail fetches per resource kind
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Where function code archives are extracted
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
    #[serde(default)]
    pub scratch_max_age_secs: Option<u64>,
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_DIR).join("config.json"))
    }

    /// Load configuration from disk. A missing or malformed file yields defaults.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring malformed config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Get effective region (CLI > config > AWS_REGION / AWS_DEFAULT_REGION)
    pub fn effective_region(&self, cli: Option<&str>) -> Option<String> {
        cli.map(|s| s.to_string())
            .or_else(|| self.region.clone())
            .or_else(|| env_var("AWS_REGION"))
            .or_else(|| env_var("AWS_DEFAULT_REGION"))
    }

    /// Get effective endpoints (CLI > config > AWS_ENDPOINT_URL)
    pub fn effective_endpoints(&self, cli: Option<&str>) -> Endpoints {
        Endpoints {
            default: cli
                .map(|s| s.to_string())
                .or_else(|| self.endpoint_url.clone())
                .or_else(|| env_var("AWS_ENDPOINT_URL")),
            services: self.service_endpoints.clone(),
        }
    }

    pub fn effective_cli_program(&self) -> String {
        self.cli_program
            .clone()
            .unwrap_or_else(|| DEFAULT_CLI_PROGRAM.to_string())
    }

    pub fn call_settings(&self) -> CallSettings {
        CallSettings {
            cache_ttl: self
                .cache_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CACHE_TTL),
            retries: self.call_retries.unwrap_or(DEFAULT_CALL_RETRIES),
        }
    }

    pub fn code_cache_ttl(&self) -> Duration {
        self.code_cache_ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CODE_CACHE_TTL)
    }

    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.unwrap_or(DEFAULT_CONCURRENCY).max(1)
    }

    /// Scratch directory for function code (config > cache dir > temp dir)
    pub fn effective_scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_DIR)
                .join("code")
        })
    }

    pub fn scratch_max_age(&self) -> Duration {
        self.scratch_max_age_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SCRATCH_MAX_AGE)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json"));
        assert!(config.region.is_none());
        assert_eq!(config.effective_cli_program(), "aws");
        assert_eq!(config.call_settings().cache_ttl, Duration::from_secs(5));
        assert_eq!(config.call_settings().retries, 1);
        assert_eq!(config.code_cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.effective_concurrency(), 8);
        assert_eq!(config.scratch_max_age(), Duration::from_secs(1800));
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load_from(&path).endpoint_url.is_none());
    }

    #[test]
    fn test_file_values_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "region": "eu-west-1",
                "endpoint_url": "http://localhost:4566",
                "service_endpoints": {"lambda": "http://localhost:4574"},
                "cache_ttl_secs": 30,
                "concurrency": 0
            }"#,
        )
        .unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config.effective_region(None).as_deref(), Some("eu-west-1"));
        assert_eq!(config.effective_region(Some("us-east-2")).as_deref(), Some("us-east-2"));
        assert_eq!(config.call_settings().cache_ttl, Duration::from_secs(30));
        assert_eq!(config.effective_concurrency(), 1);

        let endpoints = config.effective_endpoints(None);
        assert_eq!(endpoints.resolve("lambda"), Some("http://localhost:4574"));
        assert_eq!(endpoints.resolve("s3api"), Some("http://localhost:4566"));

        let overridden = config.effective_endpoints(Some("http://127.0.0.1:9000"));
        assert_eq!(overridden.resolve("s3api"), Some("http://127.0.0.1:9000"));
    }
}
