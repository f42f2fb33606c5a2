//! Drives one synchronisation run: plan, fetch, ingest, store, aggregate.

use std::{fs, path::PathBuf, sync::Arc};

use chrono::NaiveDateTime;
use tempfile::TempDir;
use tokio::task;
use tracing::{info, instrument};

use crate::{
    aggregate::AggregationEngine,
    basin::BoundarySource,
    config::Settings,
    db::{RasterRecord, SeriesStore},
    download::{fetch_batches, SourceGateway},
    error::{Result, SyncError},
    parquet::{make_parquet_file_name, save_basin_series},
    raster::{ascii::encode_ascii_grid, RasterDecoder, RasterIngestor},
    window::{SyncWindow, WindowPlanner, WindowPolicy},
};

/// Counters of what a run did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunReport {
    pub window: Option<SyncWindow>,
    pub units_planned: usize,
    pub fetched: usize,
    pub not_found: usize,
    pub fetch_failed: usize,
    pub ingest_format_errors: usize,
    pub decode_errors: usize,
    pub rasters_ingested: usize,
    pub rasters_written: u64,
    pub basins: usize,
    pub aggregation_failures: usize,
    pub basin_rows_written: u64,
    pub exported: Option<PathBuf>,
}

pub struct Pipeline {
    settings: Settings,
    gateway: Arc<dyn SourceGateway>,
    decoder: Arc<dyn RasterDecoder>,
    store: Arc<dyn SeriesStore>,
    boundaries: Arc<dyn BoundarySource>,
}

impl Pipeline {
    pub fn new(
        settings: Settings,
        gateway: Arc<dyn SourceGateway>,
        decoder: Arc<dyn RasterDecoder>,
        store: Arc<dyn SeriesStore>,
        boundaries: Arc<dyn BoundarySource>,
    ) -> Self {
        Pipeline {
            settings,
            gateway,
            decoder,
            store,
            boundaries,
        }
    }

    /// Runs every stage in order. `now` bounds the trailing and cursor windows.
    #[instrument(skip_all, fields(granularity = %self.settings.granularity))]
    pub async fn run(&self, now: NaiveDateTime) -> Result<RunReport> {
        let settings = &self.settings;
        let granularity = settings.granularity;
        let mut report = RunReport::default();

        let planner = WindowPlanner::new(granularity);
        let policy = planner.policy(&settings.window)?;
        let cursor = match policy {
            WindowPolicy::CursorFallback => self.store.last_synced(granularity).await?,
            _ => None,
        };
        let window = planner.window(policy, cursor, now)?;
        report.window = Some(window);
        report.units_planned = window.len();

        if window.is_empty() {
            info!("Database is up to date, nothing to synchronise");
            return Ok(report);
        }

        let work_area = match &settings.work_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                TempDir::new_in(dir)?
            }
            None => TempDir::new()?,
        };

        let resolver = settings.resolver();
        let fetch = fetch_batches(
            self.gateway.as_ref(),
            &resolver,
            &window.batches(),
            &work_area.path().join("downloads"),
            settings.strict_fetch,
        )
        .await?;
        report.fetched = fetch.artifacts.len();
        report.not_found = fetch.not_found;
        report.fetch_failed = fetch.failed;

        if fetch.artifacts.is_empty() {
            info!("No files available on period or they are already on database");
            work_area.close()?;
            return Ok(report);
        }
        info!(files = report.fetched, "Files downloaded from the archive");

        let ingestor = RasterIngestor::new(granularity, &resolver);
        let decoder = Arc::clone(&self.decoder);
        let fetched = fetch.artifacts;
        let ingest = task::spawn_blocking(move || ingestor.ingest(&fetched, decoder.as_ref())).await?;
        report.ingest_format_errors = ingest.format_errors;
        report.decode_errors = ingest.decode_errors;
        report.rasters_ingested = ingest.artifacts.len();

        if ingest.artifacts.is_empty() {
            info!("No raster could be ingested, nothing to store");
            work_area.close()?;
            return Ok(report);
        }

        if settings.skip_write_raster {
            info!("Skipping raster table write");
        } else {
            let records: Vec<RasterRecord> = ingest
                .artifacts
                .iter()
                .map(|artifact| RasterRecord {
                    time_unit: artifact.time_unit,
                    content: encode_ascii_grid(&artifact.grid, settings.aggregation.no_data),
                })
                .collect();
            info!(rasters = records.len(), "Writing rasters");
            report.rasters_written = self.store.upsert_rasters(&records).await?;
        }

        if settings.skip_write_basin {
            info!("Skipping basin series write");
        } else {
            let boundaries = self.boundaries.load().await?;
            report.basins = boundaries.len();

            let engine = AggregationEngine::new(settings.aggregation, &work_area.path().join("cropped"));
            let rasters = ingest.artifacts;
            let aggregation =
                task::spawn_blocking(move || engine.run(&rasters, &boundaries)).await??;
            report.aggregation_failures = aggregation.failures.len();

            report.basin_rows_written = self.store.append_basin_series(&aggregation.results).await?;

            if let Some(dir) = &settings.export_dir {
                let path = make_parquet_file_name(dir, granularity, now.date());
                save_basin_series(&aggregation.results, granularity, now, &path)
                    .map_err(|e| SyncError::Export(format!("{e:#}")))?;
                info!(path = %path.display(), "Basin series exported");
                report.exported = Some(path);
            }
        }

        work_area.close()?;
        info!(
            rasters = report.rasters_written,
            basin_rows = report.basin_rows_written,
            "Synchronisation finished"
        );

        Ok(report)
    }
}

// -- Tests -------------------------------------------------------------------
