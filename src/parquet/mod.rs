//! Handles serialising daily grids to disk in the _parquet_ file format.

pub mod archive;

pub use archive::{ParquetArchive, PointValue};
