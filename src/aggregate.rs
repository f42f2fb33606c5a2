//! Basin averages over every (raster, basin) pair.

use std::{
    any::Any,
    io,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
};

use rayon::{prelude::*, ThreadPoolBuilder};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    basin::{BasinBoundary, BasinId},
    cli::create_progress_bar,
    error::Result,
    raster::{ascii::write_ascii_grid, RasterArtifact},
    time_unit::TimeUnit,
};

/// Decimal places kept by the series stores.
pub const STORAGE_SCALE: u32 = 2;

/// Rounds half away from zero to `decimals` places.
pub fn round_to_scale(value: f64, decimals: u32) -> f64 {
    let factor = 10_f64.powi(decimals as i32);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationSettings {
    pub workers: usize,
    pub no_data: f64,
}

/// Average precipitation of one basin at one time unit.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationResult {
    pub time_unit: TimeUnit,
    pub basin: BasinId,
    pub value: f64,
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("basin does not overlap the raster grid")]
    NoOverlap,

    #[error("no cell inside the basin holds data")]
    NoEligibleCells,

    #[error("failed to write cropped raster: {0}")]
    Io(#[from] io::Error),

    #[error("task panicked: {0}")]
    Panicked(String),
}

#[derive(Debug)]
pub struct TaskFailure {
    pub time_unit: TimeUnit,
    pub basin: BasinId,
    pub error: TaskError,
}

#[derive(Debug, Default)]
pub struct AggregationOutcome {
    pub results: Vec<AggregationResult>,
    pub failures: Vec<TaskFailure>,
}

/// Crops every raster to every basin on a fixed-size worker pool.
#[derive(Debug, Clone)]
pub struct AggregationEngine {
    settings: AggregationSettings,
    output_dir: PathBuf,
}

impl AggregationEngine {
    /// Cropped rasters are written under `output_dir`.
    pub fn new(settings: AggregationSettings, output_dir: &Path) -> Self {
        AggregationEngine {
            settings,
            output_dir: output_dir.to_path_buf(),
        }
    }

    /// Runs one task per (basin, raster) pair. Results come back in
    /// submission order: basins outer, rasters inner. Only a pool that
    /// cannot be built fails the call.
    pub fn run(
        &self,
        rasters: &[RasterArtifact],
        basins: &[BasinBoundary],
    ) -> Result<AggregationOutcome> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.settings.workers)
            .build()?;

        let tasks: Vec<(&BasinBoundary, &RasterArtifact)> = basins
            .iter()
            .flat_map(|basin| rasters.iter().map(move |raster| (basin, raster)))
            .collect();

        info!(
            tasks = tasks.len(),
            workers = self.settings.workers,
            "Aggregating basin averages"
        );
        let progress_bar = create_progress_bar(tasks.len() as u64, "Aggregating basins".to_string());

        let outcomes: Vec<std::result::Result<AggregationResult, TaskFailure>> = pool.install(|| {
            tasks
                .par_iter()
                .map(|(basin, raster)| {
                    let outcome = self.run_task(basin, raster);
                    progress_bar.inc(1);
                    outcome
                })
                .collect()
        });
        progress_bar.finish_and_clear();

        let mut outcome = AggregationOutcome::default();
        for task in outcomes {
            match task {
                Ok(result) => outcome.results.push(result),
                Err(failure) => {
                    warn!(
                        basin = %failure.basin,
                        time_unit = %failure.time_unit,
                        "Aggregation task failed: {}",
                        failure.error
                    );
                    outcome.failures.push(failure);
                }
            }
        }

        info!(
            results = outcome.results.len(),
            failures = outcome.failures.len(),
            "Aggregation finished"
        );

        Ok(outcome)
    }

    /// Where the cropped raster of a task is written.
    pub fn cropped_path(&self, basin: &BasinId, time_unit: &TimeUnit) -> PathBuf {
        self.output_dir
            .join(path_component(&basin.macro_basin))
            .join(path_component(&basin.sub_basin))
            .join(format!("{}.asc", time_unit.instant().format("%Y%m%d%H")))
    }

    fn run_task(
        &self,
        basin: &BasinBoundary,
        raster: &RasterArtifact,
    ) -> std::result::Result<AggregationResult, TaskFailure> {
        let value = panic::catch_unwind(AssertUnwindSafe(|| self.average(basin, raster)))
            .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(payload))));

        match value {
            Ok(value) => Ok(AggregationResult {
                time_unit: raster.time_unit,
                basin: basin.id.clone(),
                value,
            }),
            Err(error) => Err(TaskFailure {
                time_unit: raster.time_unit,
                basin: basin.id.clone(),
                error,
            }),
        }
    }

    fn average(
        &self,
        basin: &BasinBoundary,
        raster: &RasterArtifact,
    ) -> std::result::Result<f64, TaskError> {
        let no_data = self.settings.no_data;
        let cropped = raster
            .grid
            .crop(&basin.geometry, no_data)
            .ok_or(TaskError::NoOverlap)?;

        write_ascii_grid(
            &cropped,
            &self.cropped_path(&basin.id, &raster.time_unit),
            no_data,
        )?;

        let mean = cropped
            .mean_excluding(no_data)
            .ok_or(TaskError::NoEligibleCells)?;

        Ok(round_to_scale(mean, STORAGE_SCALE))
    }
}

fn path_component(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

// -- Tests -------------------------------------------------------------------
