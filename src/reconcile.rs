//! Brings a date range into both stores.
//!
//! The set of dates to process is recomputed from the stores on every run. A
//! date counts as present only when both the tile store and the archive hold
//! it. Each date either reaches both stores or neither: the tile is written
//! first and kept restorable, the archive append is the last mutation, and any
//! failure in between rolls the tile back.

use std::{collections::BTreeSet, fmt, sync::Arc};

use chrono::NaiveDate;
use futures::{stream, StreamExt};
use indicatif::ProgressBar;
use tracing::{error, info, warn};

use crate::{
    catalog::{Catalog, NoopCatalog},
    error::{ConfigError, DateFailure, FetchError, SpatialError, StoreError},
    grid::{CellMask, Grid, GridSpec},
    reading::{RawSample, VariableSpec},
    reduce::{reduce_day, DailyReducedGrid},
    source::RawSource,
    spatial::{MaskedSpatial, SpatialOps},
    store::{ArchiveStore, TileStore},
};

/// Inclusive range of UTC days.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ConfigError> {
        if end < start {
            return Err(ConfigError::Invalid(format!(
                "date range ends ({end}) before it starts ({start})"
            )));
        }
        Ok(DateRange { start, end })
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.start
            .iter_days()
            .take_while(|d| *d <= self.end)
            .collect()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DateStatus {
    /// Both stores already held the date.
    Present,
    Written,
    SkippedUnavailable,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DateOutcome {
    pub date: NaiveDate,
    pub status: DateStatus,
}

/// Per-date results of a run, in date order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub outcomes: Vec<DateOutcome>,
}

impl RunReport {
    fn count(&self, f: impl Fn(&DateStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| f(&o.status)).count()
    }

    pub fn written(&self) -> usize {
        self.count(|s| *s == DateStatus::Written)
    }

    pub fn present(&self) -> usize {
        self.count(|s| *s == DateStatus::Present)
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| *s == DateStatus::SkippedUnavailable)
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, DateStatus::Failed(_)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (NaiveDate, &str)> {
        self.outcomes.iter().filter_map(|o| match &o.status {
            DateStatus::Failed(reason) => Some((o.date, reason.as_str())),
            _ => None,
        })
    }
}

pub struct Scheduler {
    variable: VariableSpec,
    grid: GridSpec,
    mask: Option<CellMask>,
    source: Arc<dyn RawSource>,
    spatial: Arc<dyn SpatialOps>,
    tiles: Arc<dyn TileStore>,
    archive: Arc<dyn ArchiveStore>,
    catalog: Arc<dyn Catalog>,
    concurrency: usize,
}

impl Scheduler {
    pub fn new(
        variable: VariableSpec,
        grid: GridSpec,
        source: Arc<dyn RawSource>,
        tiles: Arc<dyn TileStore>,
        archive: Arc<dyn ArchiveStore>,
    ) -> Self {
        Scheduler {
            variable,
            grid,
            mask: None,
            source,
            spatial: Arc::new(MaskedSpatial),
            tiles,
            archive,
            catalog: Arc::new(NoopCatalog),
            concurrency: 1,
        }
    }

    pub fn with_mask(mut self, mask: CellMask) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn with_spatial(mut self, spatial: Arc<dyn SpatialOps>) -> Self {
        self.spatial = spatial;
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Dates in `range` missing from either store.
    pub async fn missing_dates(&self, range: &DateRange) -> Result<BTreeSet<NaiveDate>, StoreError> {
        let dates = range.dates();
        let tiles = self.tiles.present_dates(&dates).await?;
        let archived = self.archive.present_dates(&dates).await?;

        Ok(dates
            .into_iter()
            .filter(|d| !(tiles.contains(d) && archived.contains(d)))
            .collect())
    }

    /// Processes every date of `range`, or only the missing ones when
    /// `skip_existing` is set. A failing date never stops the others.
    pub async fn run(
        &self,
        range: &DateRange,
        skip_existing: bool,
        progress: &ProgressBar,
    ) -> Result<RunReport, StoreError> {
        let dates = range.dates();
        let todo: BTreeSet<NaiveDate> = if skip_existing {
            self.missing_dates(range).await?
        } else {
            dates.iter().copied().collect()
        };
        info!(
            variable = %self.variable.name,
            %range,
            to_process = todo.len(),
            present = dates.len() - todo.len(),
            "starting run"
        );

        let todo = &todo;
        let mut outcomes: Vec<DateOutcome> = stream::iter(dates)
            .map(|date| async move {
                let status = if todo.contains(&date) {
                    self.process_date(date).await
                } else {
                    DateStatus::Present
                };
                progress.inc(1);
                DateOutcome { date, status }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        outcomes.sort_by_key(|o| o.date);

        Ok(RunReport { outcomes })
    }

    pub async fn process_date(&self, date: NaiveDate) -> DateStatus {
        match self.try_date(date).await {
            Ok(()) => DateStatus::Written,
            Err(e) if e.is_unavailable() => {
                warn!(variable = %self.variable.name, %date, "no upstream data, skipping");
                DateStatus::SkippedUnavailable
            }
            Err(e) => {
                warn!(variable = %self.variable.name, %date, error = %e, "date failed");
                DateStatus::Failed(e.to_string())
            }
        }
    }

    async fn try_date(&self, date: NaiveDate) -> Result<(), DateFailure> {
        let samples = self.source.fetch_raw(&self.variable, date).await?;
        if samples.is_empty() {
            return Err(FetchError::DataUnavailable {
                variable: self.variable.name.clone(),
                date,
            }
            .into());
        }

        let footprint = match &self.mask {
            Some(mask) => Some(self.footprint(samples[0].grid.spec(), mask)?),
            None => None,
        };
        let samples = samples
            .into_iter()
            .map(|s| self.prepare(s))
            .collect::<Result<Vec<_>, SpatialError>>()?;

        // clipped cells hold no samples, so the reduction fills them with the
        // sentinel; put them back to no-data
        let mut reduced = reduce_day(&self.variable, date, &self.grid, &samples)?;
        if let Some(footprint) = &footprint {
            reduced = reduced.mask_outside(footprint)?;
        }
        let reduced = reduced.convert(&self.variable)?;

        self.commit(&reduced).await?;
        info!(variable = %self.variable.name, %date, "wrote date to both stores");
        Ok(())
    }

    /// Cells of the canonical grid that survive clipping by `mask`.
    fn footprint(&self, native: &GridSpec, mask: &CellMask) -> Result<CellMask, SpatialError> {
        let kept = self.spatial.clip(Grid::filled(native.clone(), 1.0), mask)?;
        let kept = self.spatial.reproject(kept, &self.grid)?;
        Ok(CellMask::new(kept.values().iter().map(|v| !v.is_nan()).collect()))
    }

    fn prepare(&self, sample: RawSample) -> Result<RawSample, SpatialError> {
        let grid = match &self.mask {
            Some(mask) => self.spatial.clip(sample.grid, mask)?,
            None => sample.grid,
        };
        let grid = self.spatial.reproject(grid, &self.grid)?;
        Ok(RawSample::new(sample.time, grid))
    }

    async fn commit(&self, grid: &DailyReducedGrid) -> Result<(), StoreError> {
        let write = self.tiles.write(grid).await?;

        if let Err(e) = self.archive.append(grid).await {
            let date = write.date;
            if let Err(rollback) = self.tiles.rollback(write).await {
                error!(%date, error = %rollback, "failed to roll back tile");
            }
            return Err(e);
        }

        let path = write.path.clone();
        if let Err(e) = self.tiles.finalize(write).await {
            warn!(date = %grid.date, error = %e, "failed to discard previous tile");
        }
        if let Err(e) = self.catalog.register(&path, grid.date).await {
            warn!(date = %grid.date, error = %e, "failed to register tile in catalog");
        }
        Ok(())
    }
}

// -- Tests -------------------------------------------------------------------
