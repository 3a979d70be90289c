//! Upstream raw data sources.

pub mod http;
pub mod local;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};

use crate::{
    error::FetchError,
    reading::{RawSample, VariableSpec},
};

pub use http::HttpSource;
pub use local::ParquetDirSource;

/// Supplies the raw samples of one variable for one UTC day, ordered by time.
#[async_trait]
pub trait RawSource: Send + Sync {
    async fn fetch_raw(
        &self,
        variable: &VariableSpec,
        date: NaiveDate,
    ) -> Result<Vec<RawSample>, FetchError>;
}

pub fn sample_file_name(variable: &str, date: NaiveDate) -> String {
    format!(
        "{}_{}{:02}{:02}.parquet",
        variable,
        date.year(),
        date.month(),
        date.day()
    )
}

/// Relative location of a day's sample file: `<variable>/<YYYY>/<variable>_<YYYYMMDD>.parquet`.
pub fn sample_path(variable: &str, date: NaiveDate) -> PathBuf {
    PathBuf::from(variable)
        .join(format!("{}", date.year()))
        .join(sample_file_name(variable, date))
}

// -- Tests -------------------------------------------------------------------
