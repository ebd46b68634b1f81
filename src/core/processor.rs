//! Scene-level fan-out with a sequential fallback

use crate::core::aoi::AreaOfInterest;
use crate::core::index::IndexEngine;
use crate::types::{IndexKind, MonitorError, MonitorResult, SceneRecord, TimeSeriesPoint};
use chrono::{DateTime, Utc};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Progress after one scene finished, in completion order
///
/// `completed` restarts from 1 when a fallback phase reruns the batch;
/// `phase` names the runner that produced the update.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub phase: &'static str,
    pub completed: usize,
    pub total: usize,
    pub scene_id: String,
    pub date: DateTime<Utc>,
}

impl ProgressUpdate {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

pub trait ProgressSink: Sync {
    fn report(&self, update: &ProgressUpdate);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressUpdate) + Sync,
{
    fn report(&self, update: &ProgressUpdate) {
        self(update)
    }
}

/// Writes progress lines to the log
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, update: &ProgressUpdate) {
        log::info!(
            "[{}] Processing scene {}/{} ({}): {}",
            update.phase,
            update.completed,
            update.total,
            update.scene_id,
            update.date.format("%Y-%m-%d")
        );
    }
}

/// Per-scene work item
pub type SceneTask<'a> = dyn Fn(&SceneRecord) -> Option<TimeSeriesPoint> + Sync + 'a;

/// Executes a scene task over a batch and collects the successful points
pub trait BatchRunner: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(
        &self,
        scenes: &[SceneRecord],
        task: &SceneTask<'_>,
        progress: &dyn ProgressSink,
    ) -> MonitorResult<Vec<TimeSeriesPoint>>;
}

/// One scene at a time on the calling thread; a panicking scene is skipped
pub struct SequentialRunner;

impl BatchRunner for SequentialRunner {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn run(
        &self,
        scenes: &[SceneRecord],
        task: &SceneTask<'_>,
        progress: &dyn ProgressSink,
    ) -> MonitorResult<Vec<TimeSeriesPoint>> {
        let mut points = Vec::new();
        for (i, scene) in scenes.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| task(scene))) {
                Ok(Some(point)) => points.push(point),
                Ok(None) => {}
                Err(_) => log::error!("Scene {} panicked; skipping", scene.id),
            }
            progress.report(&ProgressUpdate {
                phase: self.name(),
                completed: i + 1,
                total: scenes.len(),
                scene_id: scene.id.clone(),
                date: scene.datetime,
            });
        }
        Ok(points)
    }
}

/// Bounded rayon pool; any worker panic fails the whole run
#[cfg(feature = "parallel")]
pub struct ParallelRunner {
    workers: usize,
}

#[cfg(feature = "parallel")]
impl ParallelRunner {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

#[cfg(feature = "parallel")]
impl BatchRunner for ParallelRunner {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn run(
        &self,
        scenes: &[SceneRecord],
        task: &SceneTask<'_>,
        progress: &dyn ProgressSink,
    ) -> MonitorResult<Vec<TimeSeriesPoint>> {
        use rayon::prelude::*;
        use std::sync::Mutex;

        let threads = self.workers.min(scenes.len()).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("canopy-worker-{}", i))
            .build()
            .map_err(|e| MonitorError::AllWorkersFailed(format!("thread pool: {}", e)))?;

        log::debug!("Processing {} scene(s) on {} worker(s)", scenes.len(), threads);

        // Completion counter and accumulator live under one lock
        let state: Mutex<(usize, Vec<TimeSeriesPoint>)> = Mutex::new((0, Vec::new()));
        let total = scenes.len();
        let phase = self.name();

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            pool.install(|| {
                scenes.par_iter().for_each(|scene| {
                    let point = task(scene);
                    let completed = {
                        let mut guard = state.lock().unwrap_or_else(|p| p.into_inner());
                        guard.0 += 1;
                        if let Some(point) = point {
                            guard.1.push(point);
                        }
                        guard.0
                    };
                    progress.report(&ProgressUpdate {
                        phase,
                        completed,
                        total,
                        scene_id: scene.id.clone(),
                        date: scene.datetime,
                    });
                });
            })
        }));

        if outcome.is_err() {
            return Err(MonitorError::AllWorkersFailed(
                "a worker panicked during parallel processing".to_string(),
            ));
        }

        let (_, points) = state.into_inner().unwrap_or_else(|p| p.into_inner());
        Ok(points)
    }
}

/// Runs `primary`, then `fallback` when the first phase fails or yields nothing
pub struct FallbackStrategy<P, S> {
    primary: P,
    fallback: S,
}

impl<P: BatchRunner, S: BatchRunner> FallbackStrategy<P, S> {
    pub fn new(primary: P, fallback: S) -> Self {
        Self { primary, fallback }
    }
}

impl<P: BatchRunner, S: BatchRunner> BatchRunner for FallbackStrategy<P, S> {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn run(
        &self,
        scenes: &[SceneRecord],
        task: &SceneTask<'_>,
        progress: &dyn ProgressSink,
    ) -> MonitorResult<Vec<TimeSeriesPoint>> {
        let primary_error = match self.primary.run(scenes, task, progress) {
            Ok(points) if !points.is_empty() || scenes.is_empty() => return Ok(points),
            Ok(_) => {
                log::warn!(
                    "{} processing produced no results; retrying {}",
                    self.primary.name(),
                    self.fallback.name()
                );
                None
            }
            Err(e) => {
                log::warn!(
                    "{} processing failed ({}); retrying {}",
                    self.primary.name(),
                    e,
                    self.fallback.name()
                );
                Some(e)
            }
        };

        self.fallback.run(scenes, task, progress).map_err(|e| {
            let first = primary_error
                .map(|p| p.to_string())
                .unwrap_or_else(|| "no results".to_string());
            MonitorError::AllWorkersFailed(format!(
                "{}: {}; {}: {}",
                self.primary.name(),
                first,
                self.fallback.name(),
                e
            ))
        })
    }
}

/// Default two-phase strategy for a worker budget
pub fn default_strategy(workers: usize) -> Box<dyn BatchRunner> {
    #[cfg(feature = "parallel")]
    {
        Box::new(FallbackStrategy::new(ParallelRunner::new(workers), SequentialRunner))
    }

    #[cfg(not(feature = "parallel"))]
    {
        let _ = workers;
        Box::new(SequentialRunner)
    }
}

/// Builds time-series points from scenes through the index engine
pub struct SceneProcessor {
    engine: Arc<IndexEngine>,
}

impl SceneProcessor {
    pub fn new(engine: Arc<IndexEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &IndexEngine {
        &self.engine
    }

    /// Point for one scene, `None` when every requested index failed
    pub fn process_scene(
        &self,
        scene: &SceneRecord,
        kinds: &[IndexKind],
        aoi: &AreaOfInterest,
        token: Option<&str>,
    ) -> Option<TimeSeriesPoint> {
        let mut point = TimeSeriesPoint::from_scene(scene);

        for &kind in kinds {
            let Some(result) = self.engine.compute_index(kind, &scene.bands, aoi, token) else {
                continue;
            };
            match kind {
                IndexKind::Ndvi => {
                    point.ndvi = Some(result.mean);
                    point.coverage = result.coverage;
                }
                IndexKind::Evi => point.evi = Some(result.mean),
            }
        }

        if point.has_any_index() {
            Some(point)
        } else {
            log::debug!("Scene {} produced no index values", scene.id);
            None
        }
    }

    /// All scenes under a worker budget, sorted by date
    pub fn process_all(
        &self,
        scenes: &[SceneRecord],
        kinds: &[IndexKind],
        aoi: &AreaOfInterest,
        token: Option<&str>,
        worker_budget: usize,
        progress: &dyn ProgressSink,
    ) -> MonitorResult<Vec<TimeSeriesPoint>> {
        let workers = worker_budget.min(scenes.len()).max(1);
        let runner = default_strategy(workers);
        self.process_with(runner.as_ref(), scenes, kinds, aoi, token, progress)
    }

    pub fn process_with(
        &self,
        runner: &dyn BatchRunner,
        scenes: &[SceneRecord],
        kinds: &[IndexKind],
        aoi: &AreaOfInterest,
        token: Option<&str>,
        progress: &dyn ProgressSink,
    ) -> MonitorResult<Vec<TimeSeriesPoint>> {
        if scenes.is_empty() {
            return Ok(Vec::new());
        }
        if kinds.is_empty() {
            return Err(MonitorError::InvalidInput("no index kinds requested".to_string()));
        }

        let task = |scene: &SceneRecord| self.process_scene(scene, kinds, aoi, token);
        let mut points = runner.run(scenes, &task, progress)?;

        points.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.scene_id.cmp(&b.scene_id)));
        log::info!(
            "Computed {} of {} scene(s) with the {} runner",
            points.len(),
            scenes.len(),
            runner.name()
        );
        Ok(points)
    }
}
