//! Scene discovery against a STAC catalog, fronted by the scene cache

use crate::config::MonitorConfig;
use crate::core::aoi::AreaOfInterest;
use crate::core::fingerprint::{fingerprint, token_digest, SCHEMA_VERSION};
use crate::io::scene_cache::SceneCache;
use crate::types::{BandUrls, MonitorError, MonitorResult, SceneRecord};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const SENTINEL_COLLECTION: &str = "HLSS30.v2.0";
pub const LANDSAT_COLLECTION: &str = "HLSL30.v2.0";

const NIR_ASSETS: [&str; 2] = ["B8A", "B05"];
const RED_ASSET: &str = "B04";
const BLUE_ASSET: &str = "B02";

/// Which HLS product lines to search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatasetSelector {
    #[serde(rename = "Both")]
    Both,
    #[serde(rename = "HLSS30.v2.0")]
    Sentinel,
    #[serde(rename = "HLSL30.v2.0")]
    Landsat,
}

impl DatasetSelector {
    pub fn collections(&self) -> &'static [&'static str] {
        match self {
            DatasetSelector::Both => &[SENTINEL_COLLECTION, LANDSAT_COLLECTION],
            DatasetSelector::Sentinel => &[SENTINEL_COLLECTION],
            DatasetSelector::Landsat => &[LANDSAT_COLLECTION],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetSelector::Both => "Both",
            DatasetSelector::Sentinel => SENTINEL_COLLECTION,
            DatasetSelector::Landsat => LANDSAT_COLLECTION,
        }
    }

    pub fn parse(name: &str) -> MonitorResult<Self> {
        match name.trim() {
            "Both" | "both" => Ok(DatasetSelector::Both),
            SENTINEL_COLLECTION | "sentinel" | "S30" => Ok(DatasetSelector::Sentinel),
            LANDSAT_COLLECTION | "landsat" | "L30" => Ok(DatasetSelector::Landsat),
            other => Err(MonitorError::InvalidInput(format!("Unknown dataset: {}", other))),
        }
    }
}

/// Parameters of one scene search
#[derive(Debug, Clone)]
pub struct SceneQuery {
    pub aoi: AreaOfInterest,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub max_cloud_cover: f64,
    pub dataset: DatasetSelector,
}

impl SceneQuery {
    pub fn new(
        aoi: AreaOfInterest,
        start: NaiveDate,
        end: NaiveDate,
        max_cloud_cover: f64,
        dataset: DatasetSelector,
    ) -> MonitorResult<Self> {
        if end < start {
            return Err(MonitorError::InvalidInput(format!(
                "end date {} precedes start date {}",
                end, start
            )));
        }
        Ok(Self {
            aoi,
            start,
            end,
            max_cloud_cover,
            dataset,
        })
    }

    /// Cache key; the token only enters as its digest
    pub fn fingerprint(&self, token: Option<&str>) -> String {
        fingerprint(&json!({
            "bbox": self.aoi.rounded_bounds(),
            "start": self.start.to_string(),
            "end": self.end.to_string(),
            "max_cc": self.max_cloud_cover,
            "dataset": self.dataset.as_str(),
            "token": token_digest(token),
            "version": SCHEMA_VERSION,
        }))
    }

    fn datetime_range(&self) -> String {
        format!(
            "{}T00:00:00Z/{}T23:59:59Z",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

// STAC wire models

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacSearchParams {
    pub collections: Vec<String>,
    pub bbox: [f64; 4],
    pub datetime: String,
    pub limit: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StacItemCollection {
    #[serde(default)]
    pub features: Vec<StacItem>,
    #[serde(default)]
    pub links: Vec<StacLink>,
}

impl StacItemCollection {
    pub fn next_link(&self) -> Option<&StacLink> {
        self.links.iter().find(|l| l.rel == "next")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacItem {
    pub id: String,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub properties: StacItemProperties,
    #[serde(default)]
    pub assets: HashMap<String, StacAsset>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StacItemProperties {
    #[serde(default)]
    pub datetime: Option<String>,
    #[serde(default)]
    pub start_datetime: Option<String>,
    #[serde(rename = "eo:cloud_cover", default)]
    pub cloud_cover: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacAsset {
    pub href: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StacLink {
    pub rel: String,
    pub href: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub merge: Option<bool>,
}

impl StacItem {
    fn href(&self, key: &str) -> Option<String> {
        self.assets.get(key).map(|a| a.href.clone())
    }

    fn acquired_at(&self) -> Option<DateTime<Utc>> {
        let raw = self
            .properties
            .datetime
            .as_deref()
            .or(self.properties.start_datetime.as_deref())?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }

    /// Typed record, or `None` when a timestamp or required band is missing
    pub fn to_scene(&self, fallback_collection: &str) -> Option<SceneRecord> {
        let nir = NIR_ASSETS.iter().find_map(|key| self.href(key))?;
        let red = self.href(RED_ASSET)?;
        let blue = self.href(BLUE_ASSET)?;

        Some(SceneRecord {
            id: self.id.clone(),
            datetime: self.acquired_at()?,
            cloud_cover: self.cloud_cover(),
            collection: self
                .collection
                .clone()
                .unwrap_or_else(|| fallback_collection.to_string()),
            bands: BandUrls {
                red,
                nir,
                blue: Some(blue),
            },
        })
    }

    /// Missing cloud cover counts as fully clouded
    pub fn cloud_cover(&self) -> f64 {
        self.properties.cloud_cover.unwrap_or(100.0)
    }
}

/// Remote item search for one collection
pub trait CatalogBackend: Send + Sync {
    fn search(
        &self,
        collection: &str,
        query: &SceneQuery,
        token: Option<&str>,
    ) -> MonitorResult<Vec<StacItem>>;
}

/// Blocking STAC API client with paging and retries
pub struct StacCatalogClient {
    search_url: String,
    client: reqwest::blocking::Client,
    page_size: u32,
    max_items: usize,
    max_retries: u32,
}

impl StacCatalogClient {
    pub fn new(
        base_url: &str,
        page_size: u32,
        max_items: usize,
        timeout: Duration,
        max_retries: u32,
    ) -> MonitorResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("canopy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MonitorError::CatalogQueryFailed(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            search_url: Self::search_url(base_url),
            client,
            page_size: page_size.max(1),
            max_items: max_items.max(1),
            max_retries,
        })
    }

    pub fn from_config(config: &MonitorConfig) -> MonitorResult<Self> {
        Self::new(
            &config.catalog_url,
            config.page_size,
            config.max_items,
            Duration::from_secs(config.request_timeout_secs),
            config.max_retries,
        )
    }

    fn search_url(base: &str) -> String {
        let base = base.trim_end_matches('/');
        if base.ends_with("/search") {
            base.to_string()
        } else {
            format!("{}/search", base)
        }
    }

    fn post_search(
        &self,
        url: &str,
        body: &Value,
        token: Option<&str>,
    ) -> MonitorResult<StacItemCollection> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                std::thread::sleep(Duration::from_millis(500 * attempt as u64));
                log::debug!("Retrying catalog search (attempt {})", attempt + 1);
            }

            let mut request = self.client.post(url).json(body);
            if let Some(t) = token.filter(|t| !t.is_empty()) {
                request = request.bearer_auth(t);
            }

            match request.send() {
                Ok(response) if response.status().is_success() => {
                    let text = response.text()?;
                    return serde_json::from_str(&text).map_err(|e| {
                        MonitorError::CatalogQueryFailed(format!("Invalid STAC response: {}", e))
                    });
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().unwrap_or_default();
                    last_error = Some(MonitorError::CatalogQueryFailed(format!(
                        "STAC search returned HTTP {}: {}",
                        status,
                        text.chars().take(300).collect::<String>()
                    )));
                    if status.is_client_error() {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("Catalog request failed: {}", e);
                    last_error = Some(MonitorError::CatalogQueryFailed(e.to_string()));
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| MonitorError::CatalogQueryFailed("STAC search failed".to_string())))
    }

    fn follow_next(
        &self,
        link: &StacLink,
        params: &Value,
        token: Option<&str>,
    ) -> MonitorResult<StacItemCollection> {
        let method = link.method.as_deref().unwrap_or("GET").to_uppercase();

        if method == "POST" {
            let body = match (&link.body, link.merge.unwrap_or(false)) {
                (Some(extra), true) => {
                    let mut merged = params.clone();
                    if let (Some(base), Some(extra)) = (merged.as_object_mut(), extra.as_object()) {
                        for (k, v) in extra {
                            base.insert(k.clone(), v.clone());
                        }
                    }
                    merged
                }
                (Some(body), false) => body.clone(),
                (None, _) => params.clone(),
            };
            return self.post_search(&link.href, &body, token);
        }

        let mut request = self.client.get(&link.href);
        if let Some(t) = token.filter(|t| !t.is_empty()) {
            request = request.bearer_auth(t);
        }
        let response = request.send()?;
        if !response.status().is_success() {
            return Err(MonitorError::CatalogQueryFailed(format!(
                "STAC pagination returned HTTP {}",
                response.status()
            )));
        }
        let text = response.text()?;
        serde_json::from_str(&text)
            .map_err(|e| MonitorError::CatalogQueryFailed(format!("Invalid STAC page: {}", e)))
    }
}

impl CatalogBackend for StacCatalogClient {
    fn search(
        &self,
        collection: &str,
        query: &SceneQuery,
        token: Option<&str>,
    ) -> MonitorResult<Vec<StacItem>> {
        let params = StacSearchParams {
            collections: vec![collection.to_string()],
            bbox: query.aoi.bounds(),
            datetime: query.datetime_range(),
            limit: self.page_size,
        };
        let params = serde_json::to_value(&params)?;
        log::info!("Searching {} for {}", collection, query.datetime_range());

        let first = self.post_search(&self.search_url, &params, token)?;
        let paged = collect_pages(first, self.max_items, |link| self.follow_next(link, &params, token))?;

        if paged.truncated {
            log::warn!(
                "Catalog results for {} truncated at {} items",
                collection,
                self.max_items
            );
        }
        log::debug!(
            "{} returned {} items over {} page(s)",
            collection,
            paged.items.len(),
            paged.pages
        );
        Ok(paged.items)
    }
}

/// Items gathered across result pages
#[derive(Debug, Default)]
pub struct PagedItems {
    pub items: Vec<StacItem>,
    pub pages: usize,
    pub truncated: bool,
}

/// Follow `next` links from `first` until there are none, a page comes back
/// empty, or `max_items` is reached; anything past the cap is dropped.
pub fn collect_pages<F>(
    first: StacItemCollection,
    max_items: usize,
    mut fetch_next: F,
) -> MonitorResult<PagedItems>
where
    F: FnMut(&StacLink) -> MonitorResult<StacItemCollection>,
{
    let mut paged = PagedItems {
        pages: 1,
        ..PagedItems::default()
    };
    let mut page = first;

    loop {
        let next = page.next_link().cloned();
        paged.items.append(&mut page.features);

        if paged.items.len() >= max_items {
            paged.truncated = paged.items.len() > max_items || next.is_some();
            paged.items.truncate(max_items);
            break;
        }

        let Some(link) = next else { break };
        page = fetch_next(&link)?;
        paged.pages += 1;
        if page.features.is_empty() {
            break;
        }
    }

    Ok(paged)
}

/// Cached scene discovery
pub struct SceneCatalog {
    backend: Arc<dyn CatalogBackend>,
    cache: SceneCache,
}

impl SceneCatalog {
    pub fn new(backend: Arc<dyn CatalogBackend>, cache: SceneCache) -> Self {
        Self { backend, cache }
    }

    pub fn cache(&self) -> &SceneCache {
        &self.cache
    }

    /// Scenes sorted by acquisition time
    ///
    /// A remote failure returns `CatalogQueryFailed` and nothing is cached.
    pub fn find_scenes(
        &self,
        query: &SceneQuery,
        token: Option<&str>,
    ) -> MonitorResult<Vec<SceneRecord>> {
        let key = query.fingerprint(token);
        if let Some(records) = self.cache.get(&key) {
            log::info!("Using {} cached scene(s)", records.len());
            return Ok(records);
        }

        let mut scenes = Vec::new();
        for collection in query.dataset.collections() {
            let items = self
                .backend
                .search(collection, query, token)
                .map_err(|e| match e {
                    MonitorError::CatalogQueryFailed(_) => e,
                    other => MonitorError::CatalogQueryFailed(other.to_string()),
                })?;

            let total = items.len();
            let mut cloudy = 0usize;
            let mut incomplete = 0usize;
            for item in &items {
                if item.cloud_cover() > query.max_cloud_cover {
                    cloudy += 1;
                    continue;
                }
                match item.to_scene(collection) {
                    Some(scene) => scenes.push(scene),
                    None => incomplete += 1,
                }
            }
            log::debug!(
                "{}: {} items, {} over cloud limit, {} missing bands",
                collection,
                total,
                cloudy,
                incomplete
            );
        }

        scenes.sort_by(|a, b| a.datetime.cmp(&b.datetime).then_with(|| a.id.cmp(&b.id)));
        scenes.dedup_by(|a, b| a.id == b.id);

        if let Err(e) = self.cache.put(&key, &scenes) {
            log::warn!("Failed to persist scene cache: {}", e);
        }
        log::info!("Found {} scene(s)", scenes.len());
        Ok(scenes)
    }

    /// Like `find_scenes`, degrading a catalog failure to an empty list
    pub fn find_scenes_or_empty(&self, query: &SceneQuery, token: Option<&str>) -> Vec<SceneRecord> {
        match self.find_scenes(query, token) {
            Ok(scenes) => scenes,
            Err(e) => {
                log::warn!("Scene search failed, continuing without scenes: {}", e);
                Vec::new()
            }
        }
    }
}
