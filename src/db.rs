//! Series stores: the raster table and the basin series table.

pub mod postgres;

use async_trait::async_trait;

use crate::{
    aggregate::AggregationResult,
    error::Result,
    time_unit::{Granularity, TimeUnit},
};

/// Decoded grid of a time unit, encoded as an ESRI ASCII raster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterRecord {
    pub time_unit: TimeUnit,
    pub content: Vec<u8>,
}

#[async_trait]
pub trait SeriesStore: Send + Sync {
    /// Latest time unit present in the raster table, aligned to `granularity`.
    async fn last_synced(&self, granularity: Granularity) -> Result<Option<TimeUnit>>;

    /// Inserts or replaces the raster of each record's time unit.
    async fn upsert_rasters(&self, records: &[RasterRecord]) -> Result<u64>;

    /// Appends basin averages. Re-running a period adds duplicate rows.
    async fn append_basin_series(&self, results: &[AggregationResult]) -> Result<u64>;
}

#[cfg(test)]
pub(crate) mod test {
    use std::{collections::BTreeMap, sync::Mutex};

    use super::*;

    /// In-memory store with the same write semantics as the database.
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub rasters: Mutex<BTreeMap<TimeUnit, Vec<u8>>>,
        pub basin_rows: Mutex<Vec<AggregationResult>>,
        pub cursor_reads: Mutex<usize>,
    }

    impl MemoryStore {
        pub fn with_cursor(unit: TimeUnit) -> Self {
            let store = MemoryStore::default();
            store.rasters.lock().unwrap().insert(unit, Vec::new());
            store
        }
    }

    #[async_trait]
    impl SeriesStore for MemoryStore {
        async fn last_synced(&self, granularity: Granularity) -> Result<Option<TimeUnit>> {
            *self.cursor_reads.lock().unwrap() += 1;
            let rasters = self.rasters.lock().unwrap();
            Ok(rasters
                .keys()
                .next_back()
                .map(|unit| TimeUnit::truncate(granularity, unit.instant())))
        }

        async fn upsert_rasters(&self, records: &[RasterRecord]) -> Result<u64> {
            let mut rasters = self.rasters.lock().unwrap();
            for record in records {
                rasters.insert(record.time_unit, record.content.clone());
            }
            Ok(records.len() as u64)
        }

        async fn append_basin_series(&self, results: &[AggregationResult]) -> Result<u64> {
            self.basin_rows.lock().unwrap().extend_from_slice(results);
            Ok(results.len() as u64)
        }
    }
}
