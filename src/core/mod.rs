//! Core vegetation monitoring modules

pub mod aoi;
pub mod anomaly;
pub mod fingerprint;
pub mod index;
pub mod processor;
pub mod series;
pub mod window;

// Re-export main types
pub use aoi::{normalize_bbox, AreaOfInterest};
pub use anomaly::{AnomalyDetector, AnomalyReport, ChartSeries};
pub use index::{IndexEngine, IndexRaster, IndexResult};
pub use processor::{
    BatchRunner, FallbackStrategy, LogProgress, ProgressSink, ProgressUpdate, SceneProcessor,
    SequentialRunner,
};
#[cfg(feature = "parallel")]
pub use processor::ParallelRunner;
pub use series::{DailyObservation, DailySeries};
pub use window::{PixelWindow, RasterGrid};
