//! PostgreSQL/PostGIS stores.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info, warn};

use super::{RasterRecord, SeriesStore};
use crate::{
    aggregate::AggregationResult,
    basin::{BasinBoundary, BasinId, BoundarySource, Geometry},
    error::{Result, SyncError},
    time_unit::{Granularity, TimeUnit},
};

const UNDEFINED_COLUMN: &str = "42703";

// Keeps each statement well under the 65535 bind parameter limit.
const INSERT_CHUNK: usize = 1000;

fn pool(database_url: &str) -> Result<PgPool> {
    Ok(PgPoolOptions::new()
        .max_connections(4)
        .connect_lazy(database_url)?)
}

fn cursor_statement(table: &str, granularity: Granularity) -> String {
    format!("SELECT max({}) FROM {table}", granularity.time_column())
}

fn upsert_statement(table: &str, granularity: Granularity) -> String {
    let column = granularity.time_column();
    format!(
        "INSERT INTO {table} ({column}, mapa) VALUES ($1, ST_FromGDALRaster($2)) \
         ON CONFLICT ({column}) DO UPDATE SET mapa = EXCLUDED.mapa"
    )
}

fn append_statement(table: &str, granularity: Granularity) -> String {
    format!(
        "INSERT INTO {table} ({}, macro_bacia, sub_bacia, valor) ",
        granularity.time_column()
    )
}

fn shapes_statement(contour_column: &str) -> String {
    format!(
        "SELECT c.bacia AS macro_bacia, c.sub_bacia, \
         (SELECT ST_AsGeoJSON(ct.contorno) FROM smap.contorno AS ct \
          WHERE ct.nome_referencia = c.{contour_column} LIMIT 1) AS contorno \
         FROM smap.config AS c \
         WHERE c.{contour_column} IS NOT NULL"
    )
}

fn is_undefined_column(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(e) => e.code().as_deref() == Some(UNDEFINED_COLUMN),
        _ => false,
    }
}

/// Raster table and basin series table, both keyed by the granularity's
/// time column (`data_hora` or `data`).
pub struct PgSeriesStore {
    pool: PgPool,
    granularity: Granularity,
    raster_table: String,
    basin_table: String,
}

impl PgSeriesStore {
    /// Table names must already be validated identifiers.
    pub fn connect(
        database_url: &str,
        granularity: Granularity,
        raster_table: &str,
        basin_table: &str,
    ) -> Result<Self> {
        Ok(PgSeriesStore {
            pool: pool(database_url)?,
            granularity,
            raster_table: raster_table.to_string(),
            basin_table: basin_table.to_string(),
        })
    }
}

#[async_trait]
impl SeriesStore for PgSeriesStore {
    async fn last_synced(&self, granularity: Granularity) -> Result<Option<TimeUnit>> {
        let sql = cursor_statement(&self.raster_table, granularity);
        debug!(%sql, "Reading sync cursor");

        let instant = match granularity {
            Granularity::Hourly => sqlx::query_scalar::<_, Option<NaiveDateTime>>(&sql)
                .fetch_one(&self.pool)
                .await,
            Granularity::Daily => sqlx::query_scalar::<_, Option<NaiveDate>>(&sql)
                .fetch_one(&self.pool)
                .await
                .map(|date| date.and_then(|d| d.and_hms_opt(0, 0, 0))),
        };

        let instant = instant.map_err(|e| {
            if is_undefined_column(&e) {
                SyncError::config(format!(
                    "raster table `{}` is not compatible with GRANULARITY {granularity}",
                    self.raster_table
                ))
            } else {
                SyncError::Persistence(e)
            }
        })?;

        Ok(instant.map(|instant| TimeUnit::truncate(granularity, instant)))
    }

    async fn upsert_rasters(&self, records: &[RasterRecord]) -> Result<u64> {
        let sql = upsert_statement(&self.raster_table, self.granularity);
        let mut transaction = self.pool.begin().await?;
        let mut affected = 0;

        for record in records {
            let query = sqlx::query(&sql);
            let query = match self.granularity {
                Granularity::Hourly => query.bind(record.time_unit.instant()),
                Granularity::Daily => query.bind(record.time_unit.date()),
            };
            affected += query
                .bind(record.content.as_slice())
                .execute(&mut *transaction)
                .await?
                .rows_affected();
            debug!(time_unit = %record.time_unit, "Upserted raster");
        }

        transaction.commit().await?;
        info!(rasters = affected, table = %self.raster_table, "Raster table updated");

        Ok(affected)
    }

    async fn append_basin_series(&self, results: &[AggregationResult]) -> Result<u64> {
        if results.is_empty() {
            return Ok(0);
        }

        let granularity = self.granularity;
        let mut transaction = self.pool.begin().await?;
        let mut affected = 0;

        for chunk in results.chunks(INSERT_CHUNK) {
            let mut qb =
                QueryBuilder::<Postgres>::new(append_statement(&self.basin_table, granularity));
            qb.push_values(chunk, |mut row, result| {
                match granularity {
                    Granularity::Hourly => row.push_bind(result.time_unit.instant()),
                    Granularity::Daily => row.push_bind(result.time_unit.date()),
                };
                row.push_bind(result.basin.macro_basin.clone())
                    .push_bind(result.basin.sub_basin.clone())
                    .push_bind(result.value);
            });

            affected += qb.build().execute(&mut *transaction).await?.rows_affected();
        }

        transaction.commit().await?;
        info!(rows = affected, table = %self.basin_table, "Basin series appended");

        Ok(affected)
    }
}

/// Sub-basin contours stored in the `smap` schema.
pub struct PgBoundarySource {
    pool: PgPool,
    contour_column: String,
}

impl PgBoundarySource {
    /// `contour_column` is `contorno_eta` or `contorno_gfs`.
    pub fn connect(database_url: &str, contour_column: &str) -> Result<Self> {
        Ok(PgBoundarySource {
            pool: pool(database_url)?,
            contour_column: contour_column.to_string(),
        })
    }
}

#[async_trait]
impl BoundarySource for PgBoundarySource {
    async fn load(&self) -> Result<Vec<BasinBoundary>> {
        info!("Retrieving shapes from database");
        let rows = sqlx::query(&shapes_statement(&self.contour_column))
            .fetch_all(&self.pool)
            .await?;

        let mut boundaries = Vec::with_capacity(rows.len());
        for row in rows {
            let id = BasinId::new(
                row.try_get::<String, _>("macro_bacia")?,
                row.try_get::<String, _>("sub_bacia")?,
            );
            match row.try_get::<Option<String>, _>("contorno")? {
                Some(geojson) => boundaries.push(BasinBoundary {
                    geometry: Geometry::from_geojson(&geojson)?,
                    id,
                }),
                None => warn!(basin = %id, "Sub-basin has no contour, skipping"),
            }
        }

        info!(count = boundaries.len(), "Read sub-basin boundaries from database");

        Ok(boundaries)
    }
}

// -- Tests -------------------------------------------------------------------
