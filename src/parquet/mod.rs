//! Handles serialising the basin series to disk in the _parquet_ file format.

pub mod series;

use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};

use crate::time_unit::Granularity;

pub use series::save_basin_series;

pub fn make_parquet_file_name(dir: &Path, granularity: Granularity, today: NaiveDate) -> PathBuf {
    let file_name = format!(
        "merge-{}-{}-{:02}-{:02}.parquet",
        granularity.as_str().to_lowercase(),
        today.year(),
        today.month(),
        today.day()
    );

    dir.join(file_name)
}
