//! Save basin averages to a parquet file.

use std::{fs::File, path::Path, sync::Arc};

use anyhow::Result;
use arrow::{
    array::{
        ArrayRef, Date32Builder, Float64Builder, StringBuilder, TimestampMillisecondBuilder,
    },
    datatypes::{DataType, Field, Schema, TimeUnit as ArrowTimeUnit},
    record_batch::RecordBatch,
};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use parquet::{arrow::ArrowWriter, file::properties::WriterProperties};

use crate::{aggregate::AggregationResult, time_unit::Granularity};

const CHUNK_SIZE: usize = 100_000;

/// Writes `results` to `file_path`. Hourly series carry a millisecond
/// timestamp, daily series a date.
pub fn save_basin_series(
    results: &[AggregationResult],
    granularity: Granularity,
    inserted_at: NaiveDateTime,
    file_path: &Path,
) -> Result<()> {
    let time_type = match granularity {
        Granularity::Hourly => DataType::Timestamp(ArrowTimeUnit::Millisecond, None),
        Granularity::Daily => DataType::Date32,
    };
    let schema = Arc::new(Schema::new(vec![
        Field::new("time", time_type, false),
        Field::new("macro_basin", DataType::Utf8, false),
        Field::new("sub_basin", DataType::Utf8, false),
        Field::new("value", DataType::Float64, false),
        Field::new(
            "inserted_at",
            DataType::Timestamp(ArrowTimeUnit::Millisecond, None),
            false,
        ),
    ]));

    let props = WriterProperties::builder()
        .set_compression(parquet::basic::Compression::ZSTD(
            parquet::basic::ZstdLevel::default(),
        ))
        .set_dictionary_enabled(true)
        .build();

    let file = File::create(file_path)?;
    let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;

    let epoch_offset = NaiveDate::from_ymd_opt(1970, 1, 1)
        .map(|epoch| epoch.num_days_from_ce())
        .unwrap_or(719_163);
    let inserted_at = inserted_at.and_utc().timestamp_millis();

    for chunk in results.chunks(CHUNK_SIZE) {
        let time: ArrayRef = match granularity {
            Granularity::Hourly => {
                let mut builder = TimestampMillisecondBuilder::with_capacity(chunk.len());
                for result in chunk {
                    builder.append_value(result.time_unit.instant().and_utc().timestamp_millis());
                }
                Arc::new(builder.finish())
            }
            Granularity::Daily => {
                let mut builder = Date32Builder::with_capacity(chunk.len());
                for result in chunk {
                    builder.append_value(result.time_unit.date().num_days_from_ce() - epoch_offset);
                }
                Arc::new(builder.finish())
            }
        };

        let mut macro_builder = StringBuilder::with_capacity(chunk.len(), chunk.len() * 12);
        let mut sub_builder = StringBuilder::with_capacity(chunk.len(), chunk.len() * 16);
        let mut value_builder = Float64Builder::with_capacity(chunk.len());
        let mut inserted_builder = TimestampMillisecondBuilder::with_capacity(chunk.len());

        for result in chunk {
            macro_builder.append_value(&result.basin.macro_basin);
            sub_builder.append_value(&result.basin.sub_basin);
            value_builder.append_value(result.value);
            inserted_builder.append_value(inserted_at);
        }

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                time,
                Arc::new(macro_builder.finish()),
                Arc::new(sub_builder.finish()),
                Arc::new(value_builder.finish()),
                Arc::new(inserted_builder.finish()),
            ],
        )?;

        writer.write(&batch)?;
    }

    writer.close()?;
    Ok(())
}

// -- Tests -------------------------------------------------------------------
