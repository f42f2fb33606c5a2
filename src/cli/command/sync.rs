use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use reqwest::Client;
use tracing::info;

use crate::{
    basin::{BoundarySource, GeoJsonBoundaries},
    config::{Settings, SyncArgs},
    db::postgres::{PgBoundarySource, PgSeriesStore},
    download::HttpGateway,
    pipeline::{Pipeline, RunReport},
    raster::Grib2Decoder,
    refresh::trigger_refresh,
};

pub async fn sync(args: &SyncArgs) -> Result<RunReport> {
    let settings = Settings::from_args(args)?;
    let targets = settings.store_targets()?;

    let store = PgSeriesStore::connect(
        &targets.database_url,
        settings.granularity,
        &targets.raster_table,
        &targets.basin_table,
    )
    .context("cannot open series database")?;

    let boundaries: Arc<dyn BoundarySource> = match &settings.basins_file {
        Some(path) => Arc::new(GeoJsonBoundaries::new(path)),
        None => Arc::new(
            PgBoundarySource::connect(&settings.shapes_database_url()?, &settings.contour_column)
                .context("cannot open shapes database")?,
        ),
    };

    let pipeline = Pipeline::new(
        settings.clone(),
        Arc::new(HttpGateway::new(settings.request_timeout)?),
        Arc::new(Grib2Decoder),
        Arc::new(store),
        boundaries,
    );

    info!("Starting synchronisation");
    let report = pipeline
        .run(Local::now().naive_local())
        .await
        .context("synchronisation failed")?;

    if let Some(target) = &settings.refresh {
        if report.fetched > 0 {
            trigger_refresh(&Client::new(), target).await;
        }
    }

    Ok(report)
}
