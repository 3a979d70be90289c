//! Decodes a day of raw samples from a long-format parquet file.
//!
//! The file holds one row per (time, cell) with columns `time`, `cell` and the
//! variable's value column, whose name comes from [`VariableSpec::source_field`].
//! Cells absent for a timestamp are no-data.

use std::{collections::BTreeMap, fs::File, path::Path};

use arrow::{
    array::{Array, Float32Array, TimestampSecondArray, UInt32Array},
    compute::cast,
    datatypes::{DataType, TimeUnit},
    record_batch::RecordBatch,
};
use chrono::DateTime;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::{
    error::{FetchError, SpatialError},
    grid::{Grid, GridSpec},
};

use super::{RawSample, VariableSpec};

pub const TIME_COLUMN: &str = "time";
pub const CELL_COLUMN: &str = "cell";

/// Reads every sample in `path`, ordered by timestamp.
pub fn read_samples(
    path: &Path,
    variable: &VariableSpec,
    spec: &GridSpec,
) -> Result<Vec<RawSample>, FetchError> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

    let schema = builder.schema().clone();
    for column in [TIME_COLUMN, CELL_COLUMN, variable.source_field.as_str()] {
        if schema.column_with_name(column).is_none() {
            return Err(decode_error(path, format!("missing column `{column}`")));
        }
    }

    let reader = builder.build()?;
    let mut frames: BTreeMap<i64, Vec<f32>> = BTreeMap::new();

    for batch in reader {
        let batch = batch?;
        let (times, cells, values) = columns(&batch, &variable.source_field)?;

        for i in 0..batch.num_rows() {
            if times.is_null(i) || cells.is_null(i) {
                return Err(decode_error(path, format!("null time or cell at row {i}")));
            }

            let cell = cells.value(i) as usize;
            if cell >= spec.cells() {
                return Err(SpatialError::SpatialMismatch {
                    expected: spec.to_string(),
                    actual: format!("cell index {cell}"),
                }
                .into());
            }

            let frame = frames
                .entry(times.value(i))
                .or_insert_with(|| vec![f32::NAN; spec.cells()]);
            if values.is_valid(i) {
                frame[cell] = values.value(i);
            }
        }
    }

    frames
        .into_iter()
        .map(|(seconds, values)| -> Result<RawSample, FetchError> {
            let time = DateTime::from_timestamp(seconds, 0)
                .ok_or_else(|| decode_error(path, format!("timestamp {seconds} out of range")))?;
            let grid = Grid::new(spec.clone(), values)?;
            Ok(RawSample::new(time, grid))
        })
        .collect()
}

fn columns(
    batch: &RecordBatch,
    field: &str,
) -> Result<(TimestampSecondArray, UInt32Array, Float32Array), FetchError> {
    let column = |name: &str, to: &DataType| -> Result<_, FetchError> {
        let array = batch
            .column_by_name(name)
            .ok_or_else(|| arrow::error::ArrowError::SchemaError(format!("no column `{name}`")))?;
        Ok(cast(array, to)?)
    };

    let times = column(TIME_COLUMN, &DataType::Timestamp(TimeUnit::Second, None))?;
    let cells = column(CELL_COLUMN, &DataType::UInt32)?;
    let values = column(field, &DataType::Float32)?;

    let times = times
        .as_any()
        .downcast_ref::<TimestampSecondArray>()
        .cloned()
        .ok_or_else(|| arrow::error::ArrowError::CastError("time".to_string()))?;
    let cells = cells
        .as_any()
        .downcast_ref::<UInt32Array>()
        .cloned()
        .ok_or_else(|| arrow::error::ArrowError::CastError("cell".to_string()))?;
    let values = values
        .as_any()
        .downcast_ref::<Float32Array>()
        .cloned()
        .ok_or_else(|| arrow::error::ArrowError::CastError(field.to_string()))?;

    Ok((times, cells, values))
}

fn decode_error(path: &Path, reason: String) -> FetchError {
    FetchError::Decode {
        path: path.to_path_buf(),
        reason,
    }
}

// -- Tests -------------------------------------------------------------------
