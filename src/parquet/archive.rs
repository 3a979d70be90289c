//! Yearly long-format archive of daily grids.
//!
//! One file per variable and year, rows `(cell, date, value, peak_time)` sorted
//! by cell then date. Every row group holds a fixed run of `cells_per_chunk`
//! cells across all days of the year, so reading one cell's year touches a
//! single row group.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use arrow::{
    array::{Array, Date32Array, Float32Array, TimestampSecondArray, UInt32Array},
    datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit},
    record_batch::RecordBatch,
};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use dashmap::DashMap;
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter, ProjectionMask},
    basic::{Compression, ZstdLevel},
    file::properties::WriterProperties,
    format::KeyValue,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    error::StoreError, grid::GridSpec, reduce::DailyReducedGrid, store::ArchiveStore,
};

/// Days between 0001-01-01 and 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;
const MAX_DAYS_PER_YEAR: usize = 366;

const KEY_VARIABLE: &str = "gridbin.variable";
const KEY_UNITS: &str = "gridbin.units";
const KEY_GRID: &str = "gridbin.grid";
const KEY_CELLS_PER_CHUNK: &str = "gridbin.cells_per_chunk";

pub fn to_date32(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
}

pub fn from_date32(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
}

/// One day of one cell, as read back from the archive.
#[derive(Debug, Clone, PartialEq)]
pub struct PointValue {
    pub date: NaiveDate,
    pub value: f32,
    pub peak_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Row {
    cell: u32,
    date: i32,
    value: f32,
    peak: Option<i64>,
}

/// Layout recorded in every year file.
#[derive(Debug, Clone, PartialEq)]
struct YearLayout {
    variable: String,
    units: String,
    grid: GridSpec,
    cells_per_chunk: usize,
}

impl YearLayout {
    fn to_key_values(&self) -> Result<Vec<KeyValue>, StoreError> {
        Ok(vec![
            KeyValue::new(KEY_VARIABLE.to_string(), self.variable.clone()),
            KeyValue::new(KEY_UNITS.to_string(), self.units.clone()),
            KeyValue::new(KEY_GRID.to_string(), serde_json::to_string(&self.grid)?),
            KeyValue::new(
                KEY_CELLS_PER_CHUNK.to_string(),
                self.cells_per_chunk.to_string(),
            ),
        ])
    }

    fn from_key_values(path: &Path, kvs: Option<&Vec<KeyValue>>) -> Result<Self, StoreError> {
        let lookup = |key: &str| -> Result<String, StoreError> {
            kvs.and_then(|kvs| kvs.iter().find(|kv| kv.key == key))
                .and_then(|kv| kv.value.clone())
                .ok_or_else(|| StoreError::Corrupt {
                    path: path.to_path_buf(),
                    reason: format!("missing `{key}` metadata"),
                })
        };

        let cells_per_chunk =
            lookup(KEY_CELLS_PER_CHUNK)?
                .parse()
                .map_err(|_| StoreError::Corrupt {
                    path: path.to_path_buf(),
                    reason: format!("bad `{KEY_CELLS_PER_CHUNK}` metadata"),
                })?;

        Ok(YearLayout {
            variable: lookup(KEY_VARIABLE)?,
            units: lookup(KEY_UNITS)?,
            grid: serde_json::from_str(&lookup(KEY_GRID)?)?,
            cells_per_chunk,
        })
    }

    fn chunks(&self) -> usize {
        self.grid.cells().div_ceil(self.cells_per_chunk)
    }

    fn ensure_compatible(&self, other: &YearLayout, path: &Path) -> Result<(), StoreError> {
        let reason = if self.variable != other.variable {
            format!("holds `{}`, not `{}`", self.variable, other.variable)
        } else if self.units != other.units {
            format!("holds units `{}`, not `{}`", self.units, other.units)
        } else if self.grid != other.grid {
            format!("holds grid {}, not {}", self.grid, other.grid)
        } else if self.cells_per_chunk != other.cells_per_chunk {
            format!(
                "chunked by {} cells, not {}",
                self.cells_per_chunk, other.cells_per_chunk
            )
        } else {
            return Ok(());
        };

        Err(StoreError::Incompatible {
            path: path.to_path_buf(),
            reason,
        })
    }
}

fn archive_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("cell", DataType::UInt32, false),
        Field::new("date", DataType::Date32, false),
        Field::new("value", DataType::Float32, false),
        Field::new(
            "peak_time",
            DataType::Timestamp(TimeUnit::Second, Some("UTC".into())),
            true,
        ),
    ]))
}

fn corrupt(path: &Path, reason: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str, path: &Path) -> Result<&'a T, StoreError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| corrupt(path, format!("column `{name}` is missing or mistyped")))
}

fn open(path: &Path) -> Result<ParquetRecordBatchReaderBuilder<File>, StoreError> {
    Ok(ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?)
}

fn read_layout(path: &Path) -> Result<YearLayout, StoreError> {
    let builder = open(path)?;
    YearLayout::from_key_values(path, builder.metadata().file_metadata().key_value_metadata())
}

fn read_chunk(path: &Path, chunk: usize) -> Result<Vec<Row>, StoreError> {
    let reader = open(path)?.with_row_groups(vec![chunk]).build()?;

    let mut rows = vec![];
    for batch in reader {
        let batch = batch?;
        let cells = column::<UInt32Array>(&batch, "cell", path)?;
        let dates = column::<Date32Array>(&batch, "date", path)?;
        let values = column::<Float32Array>(&batch, "value", path)?;
        let peaks = column::<TimestampSecondArray>(&batch, "peak_time", path)?;

        for i in 0..batch.num_rows() {
            rows.push(Row {
                cell: cells.value(i),
                date: dates.value(i),
                value: values.value(i),
                peak: peaks.is_valid(i).then(|| peaks.value(i)),
            });
        }
    }
    Ok(rows)
}

fn rows_to_batch(schema: &SchemaRef, rows: &[Row]) -> Result<RecordBatch, StoreError> {
    let cells = UInt32Array::from_iter_values(rows.iter().map(|r| r.cell));
    let dates = Date32Array::from_iter_values(rows.iter().map(|r| r.date));
    let values = Float32Array::from_iter_values(rows.iter().map(|r| r.value));
    let peaks = TimestampSecondArray::from(rows.iter().map(|r| r.peak).collect::<Vec<_>>())
        .with_timezone("UTC");

    Ok(RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(cells),
            Arc::new(dates),
            Arc::new(values),
            Arc::new(peaks),
        ],
    )?)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[derive(Clone)]
pub struct ParquetArchive {
    root: PathBuf,
    variable: String,
    spec: GridSpec,
    cells_per_chunk: usize,
    /// Serialises rewrites of one year file.
    year_locks: Arc<DashMap<i32, Arc<Mutex<()>>>>,
}

impl ParquetArchive {
    pub fn new(
        root: impl Into<PathBuf>,
        variable: impl Into<String>,
        spec: GridSpec,
        cells_per_chunk: usize,
    ) -> Self {
        ParquetArchive {
            root: root.into(),
            variable: variable.into(),
            spec,
            cells_per_chunk: cells_per_chunk.max(1),
            year_locks: Arc::new(DashMap::new()),
        }
    }

    /// `<root>/<variable>/<variable>_<YYYY>.parquet`
    pub fn year_path(&self, year: i32) -> PathBuf {
        self.root
            .join(&self.variable)
            .join(format!("{}_{}.parquet", self.variable, year))
    }

    fn year_lock(&self, year: i32) -> Arc<Mutex<()>> {
        self.year_locks
            .entry(year)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Every date stored for `year`. Only the date column of the first row
    /// group is read, since every chunk holds the same dates.
    pub fn dates_in_year(&self, year: i32) -> Result<BTreeSet<NaiveDate>, StoreError> {
        let path = self.year_path(year);
        if !path.is_file() {
            return Ok(BTreeSet::new());
        }

        let builder = open(&path)?;
        if builder.metadata().num_row_groups() == 0 {
            return Ok(BTreeSet::new());
        }
        let mask = ProjectionMask::roots(builder.parquet_schema(), [1]);
        let reader = builder
            .with_row_groups(vec![0])
            .with_projection(mask)
            .build()?;

        let mut dates = BTreeSet::new();
        for batch in reader {
            let batch = batch?;
            let days = column::<Date32Array>(&batch, "date", &path)?;
            for d in days.values().iter() {
                let date = from_date32(*d).ok_or_else(|| corrupt(&path, "date out of range"))?;
                dates.insert(date);
            }
        }
        Ok(dates)
    }

    /// The stored time series of one cell for one year, in date order.
    pub fn read_point(&self, year: i32, row: usize, col: usize) -> Result<Vec<PointValue>, StoreError> {
        let path = self.year_path(year);
        if !path.is_file() {
            return Ok(vec![]);
        }
        let layout = read_layout(&path)?;
        let cell = layout
            .grid
            .cell_index(row, col)
            .ok_or_else(|| StoreError::ShapeMismatch {
                expected: layout.grid.to_string(),
                actual: format!("cell ({row}, {col})"),
            })?;

        let rows = read_chunk(&path, cell / layout.cells_per_chunk)?;
        let mut points = rows
            .into_iter()
            .filter(|r| r.cell as usize == cell)
            .map(|r| -> Result<PointValue, StoreError> {
                Ok(PointValue {
                    date: from_date32(r.date).ok_or_else(|| corrupt(&path, "date out of range"))?,
                    value: r.value,
                    peak_time: r.peak.and_then(|s| DateTime::from_timestamp(s, 0)),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        points.sort_by_key(|p| p.date);
        Ok(points)
    }

    fn day_rows(&self, grid: &DailyReducedGrid, cells: std::ops::Range<usize>) -> Vec<Row> {
        let date = to_date32(grid.date);
        let values = grid.values.values();
        let peaks = grid.peak.as_ref().map(|p| p.times());

        cells
            .map(|cell| Row {
                cell: cell as u32,
                date,
                value: values[cell],
                peak: peaks.and_then(|p| p[cell]).map(|t| t.timestamp()),
            })
            .collect()
    }

    /// Writes the year file with `grid`'s day merged in, one chunk at a time,
    /// to a temp file that replaces the original only once complete.
    fn rewrite_year(&self, grid: &DailyReducedGrid) -> Result<(), StoreError> {
        let path = self.year_path(grid.date.year());
        let layout = YearLayout {
            variable: self.variable.clone(),
            units: grid.units.clone(),
            grid: self.spec.clone(),
            cells_per_chunk: self.cells_per_chunk,
        };

        let existing = path.is_file();
        if existing {
            read_layout(&path)?.ensure_compatible(&layout, &path)?;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension("parquet.tmp");
        let written = self
            .write_merged(&path, &temp_path, existing, grid, &layout)
            .and_then(|_| fs::rename(&temp_path, &path).map_err(StoreError::from));
        if let Err(e) = written {
            remove_if_exists(&temp_path)?;
            return Err(e);
        }
        Ok(())
    }

    fn write_merged(
        &self,
        path: &Path,
        temp_path: &Path,
        existing: bool,
        grid: &DailyReducedGrid,
        layout: &YearLayout,
    ) -> Result<(), StoreError> {
        let schema = archive_schema();
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(ZstdLevel::default()))
            .set_max_row_group_size(layout.cells_per_chunk * MAX_DAYS_PER_YEAR)
            .set_key_value_metadata(Some(layout.to_key_values()?))
            .build();
        let mut writer = ArrowWriter::try_new(File::create(temp_path)?, schema.clone(), Some(props))?;

        let new_date = to_date32(grid.date);
        let cells = self.spec.cells();
        for chunk in 0..layout.chunks() {
            let start = chunk * layout.cells_per_chunk;
            let end = (start + layout.cells_per_chunk).min(cells);

            let mut rows = if existing {
                read_chunk(path, chunk)?
            } else {
                vec![]
            };
            rows.retain(|r| r.date != new_date);
            rows.extend(self.day_rows(grid, start..end));
            rows.sort_by_key(|r| (r.cell, r.date));

            writer.write(&rows_to_batch(&schema, &rows)?)?;
            writer.flush()?;
        }

        writer.close()?;
        Ok(())
    }
}

#[async_trait]
impl ArchiveStore for ParquetArchive {
    async fn exists(&self, date: NaiveDate) -> Result<bool, StoreError> {
        Ok(self.dates_in_year(date.year())?.contains(&date))
    }

    async fn present_dates(&self, dates: &[NaiveDate]) -> Result<BTreeSet<NaiveDate>, StoreError> {
        let mut by_year: BTreeMap<i32, BTreeSet<NaiveDate>> = BTreeMap::new();
        for &date in dates {
            by_year.entry(date.year()).or_default().insert(date);
        }

        let mut present = BTreeSet::new();
        for (year, wanted) in by_year {
            let stored = self.dates_in_year(year)?;
            present.extend(wanted.intersection(&stored).copied());
        }
        Ok(present)
    }

    async fn append(&self, grid: &DailyReducedGrid) -> Result<(), StoreError> {
        if grid.values.spec() != &self.spec {
            return Err(StoreError::ShapeMismatch {
                expected: self.spec.to_string(),
                actual: grid.values.spec().to_string(),
            });
        }

        let year = grid.date.year();
        let lock = self.year_lock(year);
        let _guard = lock.lock().await;

        debug!(variable = %self.variable, year, date = %grid.date, "rewriting archive year");
        let archive = self.clone();
        let day = grid.clone();
        tokio::task::spawn_blocking(move || archive.rewrite_year(&day)).await??;
        info!(variable = %self.variable, date = %grid.date, "appended to archive");
        Ok(())
    }
}

// -- Tests -------------------------------------------------------------------
