//! Remote catalog, raster, weather and cache access

pub mod catalog;
pub mod index_cache;
pub mod raster;
pub mod scene_cache;
pub mod weather;

pub use catalog::{
    CatalogBackend, DatasetSelector, SceneCatalog, SceneQuery, StacCatalogClient,
};
pub use index_cache::IndexCache;
pub use raster::{GdalRasterSource, InMemoryRasterSource, MaskedBand, RasterSource};
pub use scene_cache::SceneCache;
pub use weather::WeatherClient;
