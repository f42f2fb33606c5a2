//! Binds fetched artifacts to the time unit encoded in their names.

use tracing::{debug, error};

use super::{Grid, RasterDecoder};
use crate::{
    address::FetchAddressResolver,
    download::FetchedArtifact,
    error::{Result, SyncError},
    time_unit::{Granularity, TimeUnit},
};

/// A decoded raster bound to its time unit.
#[derive(Debug, Clone)]
pub struct RasterArtifact {
    pub time_unit: TimeUnit,
    pub grid: Grid,
}

/// Artifacts that made it through ingestion, plus what was skipped.
#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub artifacts: Vec<RasterArtifact>,
    pub format_errors: usize,
    pub decode_errors: usize,
}

pub struct RasterIngestor {
    granularity: Granularity,
    head: String,
    tail: String,
}

impl RasterIngestor {
    pub fn new(granularity: Granularity, resolver: &FetchAddressResolver) -> Self {
        RasterIngestor {
            granularity,
            head: format!("MERGE_{}_", resolver.prefix()).to_ascii_uppercase(),
            tail: format!(".{}", resolver.extension()).to_ascii_uppercase(),
        }
    }

    /// Recovers the time unit from an artifact name such as `MERGE_CPTEC_2024010100.grib2`.
    pub fn bind(&self, file_name: &str) -> Result<TimeUnit> {
        let upper = file_name.to_ascii_uppercase();
        let stamp = upper
            .strip_prefix(&self.head)
            .and_then(|rest| rest.strip_suffix(&self.tail))
            .ok_or_else(|| SyncError::IngestFormat(file_name.to_string()))?;

        TimeUnit::from_stamp(self.granularity, stamp)
            .ok_or_else(|| SyncError::IngestFormat(file_name.to_string()))
    }

    /// Binds and decodes every fetched artifact. A bad item is logged and
    /// skipped without affecting the others.
    pub fn ingest(&self, fetched: &[FetchedArtifact], decoder: &dyn RasterDecoder) -> IngestOutcome {
        let mut outcome = IngestOutcome::default();

        for item in fetched {
            let time_unit = match self.bind(&item.file_name) {
                Ok(time_unit) => time_unit,
                Err(e) => {
                    error!("{e}");
                    outcome.format_errors += 1;
                    continue;
                }
            };

            match decoder.decode(&item.path) {
                Ok(grid) => {
                    debug!(%time_unit, width = grid.width, height = grid.height, "Ingested raster");
                    outcome.artifacts.push(RasterArtifact {
                        time_unit,
                        grid,
                    });
                }
                Err(e) => {
                    error!(%time_unit, "{e}");
                    outcome.decode_errors += 1;
                }
            }
        }

        outcome
    }
}

// -- Tests -------------------------------------------------------------------
