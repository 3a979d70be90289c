use std::path::PathBuf;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{
    error::FetchError,
    grid::GridSpec,
    reading::{read_samples, RawSample, VariableSpec},
};

use super::{sample_path, RawSource};

/// Reads daily sample files from a local directory tree.
#[derive(Debug, Clone)]
pub struct ParquetDirSource {
    root: PathBuf,
    spec: GridSpec,
}

impl ParquetDirSource {
    pub fn new(root: impl Into<PathBuf>, spec: GridSpec) -> Self {
        ParquetDirSource {
            root: root.into(),
            spec,
        }
    }
}

#[async_trait]
impl RawSource for ParquetDirSource {
    async fn fetch_raw(
        &self,
        variable: &VariableSpec,
        date: NaiveDate,
    ) -> Result<Vec<RawSample>, FetchError> {
        let path = self.root.join(sample_path(&variable.name, date));
        if !path.exists() {
            return Err(FetchError::DataUnavailable {
                variable: variable.name.clone(),
                date,
            });
        }

        read_samples(&path, variable, &self.spec)
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    use super::*;
    use crate::{
        grid::test::spec_fixture,
        reading::{samples::test::write_samples, variable::test::lightning_fixture},
    };

    #[tokio::test]
    async fn should_read_day_from_directory_tree() {
        let dir = TempDir::new().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 4).unwrap();
        let t = Utc.with_ymd_and_hms(2024, 5, 4, 12, 0, 0).unwrap().timestamp();
        write_samples(
            &dir.path().join("lightning/2024/lightning_20240504.parquet"),
            "flash_count",
            &[(t, 0, Some(3.0)), (t, 1, Some(4.0))],
        );

        let source = ParquetDirSource::new(dir.path(), spec_fixture(1, 2));
        let samples = source.fetch_raw(&lightning_fixture(), date).await.unwrap();

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].grid.values(), &[3.0, 4.0]);
    }

    #[tokio::test]
    async fn should_report_missing_day_as_unavailable() {
        let dir = TempDir::new().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 5).unwrap();

        let source = ParquetDirSource::new(dir.path(), spec_fixture(1, 2));
        let result = source.fetch_raw(&lightning_fixture(), date).await;

        assert!(matches!(result, Err(FetchError::DataUnavailable { .. })));
    }
}
