//! The two persistent stores every processed date must reach.

use std::{collections::BTreeSet, path::PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{error::StoreError, reduce::DailyReducedGrid};

/// A tile written but not yet committed.
///
/// Holds where the previous version of the tile was moved, if there was one, so
/// the write can be undone.
#[derive(Debug, Clone, PartialEq)]
pub struct TileWrite {
    pub date: NaiveDate,
    pub path: PathBuf,
    pub backup: Option<PathBuf>,
}

/// One single-day raster per date.
#[async_trait]
pub trait TileStore: Send + Sync {
    async fn exists(&self, date: NaiveDate) -> Result<bool, StoreError>;

    /// Replaces the tile for `grid.date`. The prior tile, if any, is kept until
    /// [`finalize`](TileStore::finalize) or [`rollback`](TileStore::rollback).
    async fn write(&self, grid: &DailyReducedGrid) -> Result<TileWrite, StoreError>;

    async fn finalize(&self, write: TileWrite) -> Result<(), StoreError>;

    /// Restores the tile that was in place before `write`.
    async fn rollback(&self, write: TileWrite) -> Result<(), StoreError>;

    async fn present_dates(&self, dates: &[NaiveDate]) -> Result<BTreeSet<NaiveDate>, StoreError> {
        let mut present = BTreeSet::new();
        for &date in dates {
            if self.exists(date).await? {
                present.insert(date);
            }
        }
        Ok(present)
    }
}

/// Year-partitioned columnar archive.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    async fn exists(&self, date: NaiveDate) -> Result<bool, StoreError>;

    async fn present_dates(&self, dates: &[NaiveDate]) -> Result<BTreeSet<NaiveDate>, StoreError> {
        let mut present = BTreeSet::new();
        for &date in dates {
            if self.exists(date).await? {
                present.insert(date);
            }
        }
        Ok(present)
    }

    /// Inserts or replaces `grid.date` in its year. Either the whole day lands or
    /// the archive is left untouched.
    async fn append(&self, grid: &DailyReducedGrid) -> Result<(), StoreError>;
}
