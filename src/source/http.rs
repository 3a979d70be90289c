use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use reqwest::Client;
use tempfile::TempDir;
use tracing::info;

use crate::{
    download::download_file,
    error::FetchError,
    grid::GridSpec,
    reading::{read_samples, RawSample, VariableSpec},
};

use super::{sample_file_name, RawSource};

/// Downloads each day's sample file from a URL template.
///
/// The template may use `{variable}`, `{year}` and `{date}` (`YYYYMMDD`).
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    url_template: String,
    spec: GridSpec,
}

impl HttpSource {
    pub fn new(url_template: impl Into<String>, spec: GridSpec) -> Self {
        HttpSource {
            client: Client::new(),
            url_template: url_template.into(),
            spec,
        }
    }

    pub fn url(&self, variable: &str, date: NaiveDate) -> String {
        let compact = format!("{}{:02}{:02}", date.year(), date.month(), date.day());
        self.url_template
            .replace("{variable}", variable)
            .replace("{year}", &date.year().to_string())
            .replace("{date}", &compact)
    }
}

#[async_trait]
impl RawSource for HttpSource {
    async fn fetch_raw(
        &self,
        variable: &VariableSpec,
        date: NaiveDate,
    ) -> Result<Vec<RawSample>, FetchError> {
        let tmp_dir = TempDir::new()?;
        let file_path = tmp_dir.path().join(sample_file_name(&variable.name, date));
        let url = self.url(&variable.name, date);

        match download_file(&self.client, &url, &file_path).await? {
            Some(bytes) => info!(variable = %variable.name, %date, bytes, "fetched raw samples"),
            None => {
                return Err(FetchError::DataUnavailable {
                    variable: variable.name.clone(),
                    date,
                })
            }
        }

        read_samples(&file_path, variable, &self.spec)
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        download::test::{local_client, serve},
        grid::test::spec_fixture,
        reading::{samples::test::write_samples, variable::test::lightning_fixture},
    };

    fn local_source(url_template: String) -> HttpSource {
        HttpSource {
            client: local_client(),
            url_template,
            spec: spec_fixture(1, 2),
        }
    }

    fn day_file() -> Vec<u8> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("day.parquet");
        let noon = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap().timestamp();
        write_samples(
            &path,
            "flash_count",
            &[(noon, 0, Some(3.0)), (noon, 1, Some(4.0)), (noon + 600, 0, Some(7.0))],
        );
        std::fs::read(&path).unwrap()
    }

    #[tokio::test]
    async fn should_decode_downloaded_day() {
        let base = serve(day_file()).await;
        let source = local_source(format!(
            "{base}/{{variable}}/{{year}}/{{variable}}_{{date}}.parquet"
        ));
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();

        let samples = source.fetch_raw(&lightning_fixture(), date).await.unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].grid.values(), &[3.0, 4.0]);
        assert_eq!(samples[1].grid.values()[0], 7.0);
        assert!(samples[1].grid.values()[1].is_nan());
    }

    #[tokio::test]
    async fn should_map_not_found_to_unavailable() {
        let base = serve(day_file()).await;
        let source = local_source(format!("{base}/missing/{{variable}}_{{date}}.parquet"));
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();

        let result = source.fetch_raw(&lightning_fixture(), date).await;

        assert!(matches!(
            result,
            Err(FetchError::DataUnavailable { date: d, .. }) if d == date
        ));
    }

    #[test]
    fn should_render_url_template() {
        let source = HttpSource::new(
            "https://data.example.org/{variable}/{year}/{variable}_{date}.parquet",
            spec_fixture(1, 1),
        );
        let date = NaiveDate::from_ymd_opt(2021, 11, 3).unwrap();

        assert_eq!(
            source.url("lightning", date),
            "https://data.example.org/lightning/2021/lightning_20211103.parquet"
        );
    }
}
