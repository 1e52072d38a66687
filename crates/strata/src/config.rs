// File: src/config.rs
// Purpose: Configuration parsing from strata.toml

use anyhow::{Context, Result};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use strata_query::CacheConfig;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub dev: DevConfig,
}

/// Project metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default = "default_version")]
    pub version: String,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

/// Routing configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoutingConfig {
    /// Match routes ignoring ASCII case (default: false)
    #[serde(default)]
    pub case_insensitive: bool,
}

/// Page rendering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// How long to hold the response for deferred content before flushing
    #[serde(default)]
    pub stream_hold_ms: u64,

    /// Known crawlers wait for the complete document
    #[serde(default = "default_true")]
    pub crawler_wait: bool,

    /// Include error messages in 500 documents
    #[serde(default)]
    pub expose_errors: bool,

    #[serde(default = "default_not_found_status")]
    pub not_found_status: u16,
}

/// Query cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Eviction delay for unobserved entries; negative disables eviction
    #[serde(default = "default_cache_time_ms")]
    pub cache_time_ms: i64,

    #[serde(default = "default_stale_time_ms")]
    pub stale_time_ms: u64,
}

/// Development configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevConfig {
    #[serde(default = "default_true")]
    pub hot_reload: bool,

    #[serde(default = "default_watch_paths")]
    pub watch_paths: Vec<String>,
}

// Default values
fn default_name() -> String {
    "strata-app".to_string()
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_not_found_status() -> u16 {
    404
}

fn default_cache_time_ms() -> i64 {
    300_000
}

fn default_stale_time_ms() -> u64 {
    100
}

fn default_watch_paths() -> Vec<String> {
    vec!["src/pages".to_string(), "static".to_string()]
}

fn default_true() -> bool {
    true
}

// Default implementations
impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            version: default_version(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            stream_hold_ms: 0,
            crawler_wait: true,
            expose_errors: false,
            not_found_status: default_not_found_status(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            cache_time_ms: default_cache_time_ms(),
            stale_time_ms: default_stale_time_ms(),
        }
    }
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            hot_reload: true,
            watch_paths: default_watch_paths(),
        }
    }
}

impl RenderConfig {
    pub fn stream_hold(&self) -> Duration {
        Duration::from_millis(self.stream_hold_ms)
    }

    /// Configured not-found status, falling back to 404 when out of range.
    pub fn not_found_status(&self) -> StatusCode {
        StatusCode::from_u16(self.not_found_status).unwrap_or(StatusCode::NOT_FOUND)
    }
}

impl QueryConfig {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            cache_time: u64::try_from(self.cache_time_ms)
                .ok()
                .map(Duration::from_millis),
            stale_time: Duration::from_millis(self.stale_time_ms),
        }
    }
}

impl Config {
    /// Load configuration from strata.toml
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // If file doesn't exist or is empty, return default config
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        Ok(config)
    }

    /// Load ./strata.toml and apply environment overrides
    pub fn load_default() -> Result<Self> {
        Ok(Self::load("strata.toml")?.with_env_overrides(|key| std::env::var(key).ok()))
    }

    /// Apply `STRATA_*` overrides read through `lookup`.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(flag) = lookup("STRATA_HOT_RELOAD").as_deref().and_then(parse_flag) {
            self.dev.hot_reload = flag;
        }
        self
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(!config.routing.case_insensitive);
        assert_eq!(config.render.not_found_status(), StatusCode::NOT_FOUND);
        assert_eq!(
            config.query.cache_config().cache_time,
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn test_empty_config() {
        let config = toml::from_str::<Config>("").unwrap_or_default();
        assert_eq!(config.render.stream_hold_ms, 0);
        assert!(config.render.crawler_wait);
        assert_eq!(config.query.stale_time_ms, 100);
    }

    #[test]
    fn test_custom_sections() {
        let toml = r#"
            [routing]
            case_insensitive = true

            [render]
            stream_hold_ms = 250
            expose_errors = true

            [query]
            cache_time_ms = -1
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.routing.case_insensitive);
        assert_eq!(config.render.stream_hold(), Duration::from_millis(250));
        assert!(config.render.expose_errors);
        assert_eq!(config.query.cache_config().cache_time, None);
    }

    #[test]
    fn test_env_override() {
        let config = Config::default().with_env_overrides(|key| {
            (key == "STRATA_HOT_RELOAD").then(|| "false".to_string())
        });
        assert!(!config.dev.hot_reload);

        let config = Config::default().with_env_overrides(|_| Some("maybe".to_string()));
        assert!(config.dev.hot_reload);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load("does-not-exist/strata.toml").unwrap();
        assert_eq!(config.project.name, "strata-app");
    }
}
