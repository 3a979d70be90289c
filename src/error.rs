//! Error types shared across the pipeline.
//!
//! Every failure that can happen while processing one date is folded into a
//! [`DateFailure`], which the scheduler records against that date and never
//! lets escape into the processing of other dates.

use std::{io, path::PathBuf};

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpatialError {
    #[error("spatial mismatch: expected grid {expected}, got {actual}")]
    SpatialMismatch { expected: String, actual: String },

    #[error("mask covers {mask} cells but the grid has {grid}")]
    MaskMismatch { mask: usize, grid: usize },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no upstream data for `{variable}` on {date}")]
    DataUnavailable { variable: String, date: NaiveDate },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode `{}`: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Spatial(#[from] SpatialError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failure to read from or write to the tile store, the archive or the catalog.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("grid shape mismatch: store expects {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("`{}` is not a valid store file: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("`{}` was written for a different layout: {reason}", path.display())]
    Incompatible { path: PathBuf, reason: String },

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Tiff(#[from] tiff::TiffError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("store task did not finish: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{}`: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("bin length of {minutes} minutes for `{variable}` does not divide a day")]
    InvalidBinLength { variable: String, minutes: u32 },

    #[error("unknown variable `{0}`")]
    UnknownVariable(String),

    #[error("grid for `{variable}` is in `{actual}`, conversion expects `{expected}`")]
    UnitsMismatch {
        variable: String,
        expected: String,
        actual: String,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Why a single date could not be brought into both stores.
#[derive(Debug, Error)]
pub enum DateFailure {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Spatial(#[from] SpatialError),

    #[error("store write failure: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DateFailure {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, DateFailure::Fetch(FetchError::DataUnavailable { .. }))
    }
}
