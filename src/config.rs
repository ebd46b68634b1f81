//! Runtime configuration

use crate::types::{MonitorError, MonitorResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CATALOG_URL: &str = "https://cmr.earthdata.nasa.gov/stac/LPCLOUD";
pub const DEFAULT_WEATHER_URL: &str = "https://archive-api.open-meteo.com/v1/archive";

const MAX_DAYS_BACK: u32 = 4500;

/// Settings shared by the catalog, index engine and processor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub cache_root: PathBuf,
    pub catalog_url: String,
    pub weather_url: String,
    /// Scene-list cache lifetime in seconds
    pub scene_cache_ttl_secs: u64,
    pub scene_memory_entries: usize,
    pub page_size: u32,
    pub max_items: usize,
    pub request_timeout_secs: u64,
    /// Timeout applied to each remote tile read
    pub tile_timeout_secs: u64,
    pub max_retries: u32,
    pub worker_cap: usize,
    pub enable_evi: bool,
    pub days_back_limit: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let constrained = is_constrained_environment();
        Self {
            cache_root: default_cache_root(constrained),
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            weather_url: DEFAULT_WEATHER_URL.to_string(),
            scene_cache_ttl_secs: 7 * 24 * 3600,
            scene_memory_entries: 32,
            page_size: 200,
            max_items: 2000,
            request_timeout_secs: 60,
            tile_timeout_secs: 60,
            max_retries: 3,
            worker_cap: if constrained { 1 } else { 8 },
            enable_evi: false,
            days_back_limit: 730,
        }
    }
}

impl MonitorConfig {
    /// Defaults overlaid with `CACHE_ROOT`, `WORKER_CAP`, `ENABLE_EVI` and `DAYS_BACK_LIMIT`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(root) = std::env::var("CACHE_ROOT") {
            if !root.trim().is_empty() {
                config.cache_root = PathBuf::from(root);
            }
        }

        if let Ok(raw) = std::env::var("WORKER_CAP") {
            match raw.trim().parse::<usize>() {
                Ok(cap) => config.worker_cap = cap.max(1),
                Err(_) => log::warn!("Ignoring invalid WORKER_CAP: {}", raw),
            }
        }

        if let Ok(raw) = std::env::var("ENABLE_EVI") {
            config.enable_evi = parse_flag(&raw);
        }

        if let Ok(raw) = std::env::var("DAYS_BACK_LIMIT") {
            match raw.trim().parse::<u32>() {
                Ok(days) => config.days_back_limit = days,
                Err(_) => log::warn!("Ignoring invalid DAYS_BACK_LIMIT: {}", raw),
            }
        }

        config.days_back_limit = config.days_back_limit.clamp(1, MAX_DAYS_BACK);
        log::debug!("Loaded configuration: {:?}", config);
        config
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> MonitorResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: MonitorConfig = serde_json::from_str(&content)?;
        if config.page_size == 0 {
            return Err(MonitorError::InvalidInput("page_size must be positive".to_string()));
        }
        config.days_back_limit = config.days_back_limit.clamp(1, MAX_DAYS_BACK);
        Ok(config)
    }

    /// Number of workers for a batch of `scene_count` scenes
    pub fn worker_budget(&self, scene_count: usize) -> usize {
        self.worker_cap.min(scene_count).max(1)
    }

    pub fn scene_cache_dir(&self) -> PathBuf {
        self.cache_root.join("stac")
    }

    pub fn index_cache_dir(&self) -> PathBuf {
        self.cache_root.clone()
    }

    /// Index kinds computed per scene
    pub fn index_kinds(&self) -> Vec<crate::types::IndexKind> {
        let mut kinds = vec![crate::types::IndexKind::Ndvi];
        if self.enable_evi {
            kinds.push(crate::types::IndexKind::Evi);
        }
        kinds
    }
}

fn is_constrained_environment() -> bool {
    std::env::var_os("K_SERVICE").is_some()
}

fn default_cache_root(constrained: bool) -> PathBuf {
    if constrained {
        return std::env::temp_dir().join("canopy_cache");
    }
    dirs::cache_dir()
        .map(|dir| dir.join("canopy"))
        .unwrap_or_else(|| PathBuf::from(".cache"))
}

fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
