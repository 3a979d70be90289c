//! Single-day GeoTIFF tiles.
//!
//! Page one holds the daily values. Peak-window variables get a second page
//! with the minute of day at which each cell peaked (NaN where it never did).
//! Both pages carry the same georeferencing and an `ImageDescription` with the
//! variable, units and date as JSON.

use std::{
    fs::{self, File},
    io::{self, BufWriter, Seek, Write},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tiff::{
    encoder::{colortype, TiffEncoder},
    tags::Tag,
};
use tracing::{debug, warn};

use crate::{
    error::StoreError,
    grid::GridSpec,
    reduce::{day_offset, DailyReducedGrid},
    store::{TileStore, TileWrite},
};

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GDAL_NODATA: u16 = 42113;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileDescription {
    pub variable: String,
    pub units: String,
    pub date: NaiveDate,
    pub peak_page: bool,
}

impl From<&DailyReducedGrid> for TileDescription {
    fn from(grid: &DailyReducedGrid) -> Self {
        TileDescription {
            variable: grid.variable.clone(),
            units: grid.units.clone(),
            date: grid.date,
            peak_page: grid.peak.is_some(),
        }
    }
}

pub fn tile_file_name(variable: &str, date: NaiveDate) -> String {
    format!(
        "{}_{}{:02}{:02}.tif",
        variable,
        date.year(),
        date.month(),
        date.day()
    )
}

#[derive(Debug, Clone)]
pub struct GeoTiffTileStore {
    root: PathBuf,
    variable: String,
    spec: GridSpec,
}

impl GeoTiffTileStore {
    pub fn new(root: impl Into<PathBuf>, variable: impl Into<String>, spec: GridSpec) -> Self {
        GeoTiffTileStore {
            root: root.into(),
            variable: variable.into(),
            spec,
        }
    }

    /// `<root>/<variable>/<YYYY>/<variable>_<YYYYMMDD>.tif`
    pub fn tile_path(&self, date: NaiveDate) -> PathBuf {
        self.root
            .join(&self.variable)
            .join(format!("{}", date.year()))
            .join(tile_file_name(&self.variable, date))
    }

    fn encode(&self, grid: &DailyReducedGrid, path: &Path) -> Result<(), StoreError> {
        let description = serde_json::to_string(&TileDescription::from(grid))?;
        let mut writer = BufWriter::new(File::create(path)?);
        {
            let mut encoder = TiffEncoder::new(&mut writer)?;
            write_page(&mut encoder, &self.spec, &description, grid.values.values())?;

            if let Some(peak) = &grid.peak {
                let minutes: Vec<f32> = peak
                    .times()
                    .iter()
                    .map(|time| {
                        time.and_then(|t| day_offset(grid.date, t))
                            .map(|secs| (secs / 60) as f32)
                            .unwrap_or(f32::NAN)
                    })
                    .collect();
                write_page(&mut encoder, &self.spec, &description, &minutes)?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Copies any existing tile aside, then encodes to a temp file and renames it into place.
    fn write_blocking(&self, grid: &DailyReducedGrid) -> Result<TileWrite, StoreError> {
        let path = self.tile_path(grid.date);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let backup = if path.is_file() {
            let backup = path.with_extension("tif.bak");
            fs::copy(&path, &backup)?;
            Some(backup)
        } else {
            None
        };

        let temp_path = path.with_extension("tif.tmp");
        let written = self
            .encode(grid, &temp_path)
            .and_then(|_| fs::rename(&temp_path, &path).map_err(StoreError::from));
        if let Err(e) = written {
            remove_if_exists(&temp_path)?;
            if let Some(backup) = &backup {
                remove_if_exists(backup)?;
            }
            return Err(e);
        }

        debug!(path = %path.display(), replaced = backup.is_some(), "wrote tile");
        Ok(TileWrite {
            date: grid.date,
            path,
            backup,
        })
    }
}

fn geo_keys(epsg: u16) -> [u16; 16] {
    let (model, crs_key) = if epsg == 4326 {
        // geographic lat/lon, GeographicTypeGeoKey
        (2, 2048)
    } else {
        // projected, ProjectedCSTypeGeoKey
        (1, 3072)
    };

    [
        1, 1, 0, 3, // header: version, revision, minor, key count
        1024, 0, 1, model, // GTModelTypeGeoKey
        1025, 0, 1, 1, // GTRasterTypeGeoKey: PixelIsArea
        crs_key, 0, 1, epsg,
    ]
}

fn write_page<W: Write + Seek>(
    encoder: &mut TiffEncoder<W>,
    spec: &GridSpec,
    description: &str,
    data: &[f32],
) -> Result<(), StoreError> {
    let mut image = encoder.new_image::<colortype::Gray32Float>(spec.cols as u32, spec.rows as u32)?;

    let dir = image.encoder();
    dir.write_tag(Tag::ImageDescription, description)?;
    dir.write_tag(Tag::Unknown(MODEL_PIXEL_SCALE), &[spec.dx, spec.dy, 0.0][..])?;
    dir.write_tag(
        Tag::Unknown(MODEL_TIEPOINT),
        &[0.0, 0.0, 0.0, spec.west, spec.north, 0.0][..],
    )?;
    dir.write_tag(Tag::Unknown(GEO_KEY_DIRECTORY), &geo_keys(spec.epsg)[..])?;
    dir.write_tag(Tag::Unknown(GDAL_NODATA), "nan")?;

    image.write_data(data)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[async_trait]
impl TileStore for GeoTiffTileStore {
    async fn exists(&self, date: NaiveDate) -> Result<bool, StoreError> {
        Ok(self.tile_path(date).is_file())
    }

    async fn write(&self, grid: &DailyReducedGrid) -> Result<TileWrite, StoreError> {
        if grid.values.spec() != &self.spec {
            return Err(StoreError::ShapeMismatch {
                expected: self.spec.to_string(),
                actual: grid.values.spec().to_string(),
            });
        }

        let store = self.clone();
        let grid = grid.clone();
        tokio::task::spawn_blocking(move || store.write_blocking(&grid)).await?
    }

    async fn finalize(&self, write: TileWrite) -> Result<(), StoreError> {
        if let Some(backup) = &write.backup {
            remove_if_exists(backup)?;
        }
        Ok(())
    }

    async fn rollback(&self, write: TileWrite) -> Result<(), StoreError> {
        match &write.backup {
            Some(backup) => fs::rename(backup, &write.path)?,
            None => remove_if_exists(&write.path)?,
        }
        warn!(date = %write.date, path = %write.path.display(), "rolled back tile");
        Ok(())
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test {
    use tempfile::TempDir;
    use tiff::decoder::{Decoder, DecodingResult};

    use super::*;
    use crate::{grid::test::spec_fixture, reduce::test::reduced_fixture};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 8, 2).unwrap()
    }

    pub fn read_pages(path: &Path) -> Vec<Vec<f32>> {
        let mut decoder = Decoder::new(File::open(path).unwrap()).unwrap();
        let mut pages = vec![];
        loop {
            match decoder.read_image().unwrap() {
                DecodingResult::F32(values) => pages.push(values),
                _ => panic!("tile page is not f32"),
            }
            if !decoder.more_images() {
                break;
            }
            decoder.next_image().unwrap();
        }
        pages
    }

    #[tokio::test]
    async fn should_write_values_and_peak_minutes() {
        let dir = TempDir::new().unwrap();
        let store = GeoTiffTileStore::new(dir.path(), "lightning", spec_fixture(1, 3));
        let grid = reduced_fixture(date(), vec![5.0, f32::NAN, 2.0]);

        let write = store.write(&grid).await.unwrap();

        assert_eq!(
            write.path,
            dir.path().join("lightning/2024/lightning_20240802.tif")
        );
        let pages = read_pages(&write.path);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0], vec![5.0, 0.0, 2.0]);
        // the empty cell peaks in the first bin with the zero sentinel
        assert_eq!(pages[1], vec![720.0, 0.0, 720.0]);
    }

    #[tokio::test]
    async fn should_describe_tile_in_image_description() {
        let dir = TempDir::new().unwrap();
        let store = GeoTiffTileStore::new(dir.path(), "lightning", spec_fixture(1, 2));
        let write = store
            .write(&reduced_fixture(date(), vec![1.0, 2.0]))
            .await
            .unwrap();

        let mut decoder = Decoder::new(File::open(&write.path).unwrap()).unwrap();
        assert_eq!(decoder.dimensions().unwrap(), (2, 1));
        let description = decoder.get_tag_ascii_string(Tag::ImageDescription).unwrap();
        let description: TileDescription = serde_json::from_str(&description).unwrap();

        assert_eq!(description.variable, "lightning");
        assert_eq!(description.units, "flashes");
        assert_eq!(description.date, date());
        assert!(description.peak_page);
    }

    #[tokio::test]
    async fn should_write_identical_bytes_for_same_day() {
        let dir = TempDir::new().unwrap();
        let store = GeoTiffTileStore::new(dir.path(), "lightning", spec_fixture(1, 2));
        let grid = reduced_fixture(date(), vec![3.0, 4.0]);

        let first = store.write(&grid).await.unwrap();
        let bytes = fs::read(&first.path).unwrap();
        store.finalize(first).await.unwrap();
        let second = store.write(&grid).await.unwrap();

        assert_eq!(fs::read(&second.path).unwrap(), bytes);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn should_write_tiles_of_different_days_concurrently() {
        let dir = TempDir::new().unwrap();
        let store = GeoTiffTileStore::new(dir.path(), "lightning", spec_fixture(1, 2));

        let writes = (1..=8).map(|d| {
            let store = store.clone();
            tokio::spawn(async move {
                let date = NaiveDate::from_ymd_opt(2024, 8, d).unwrap();
                let write = store.write(&reduced_fixture(date, vec![d as f32; 2])).await?;
                store.finalize(write).await
            })
        });
        for handle in futures::future::join_all(writes).await {
            handle.unwrap().unwrap();
        }

        for d in 1..=8 {
            let date = NaiveDate::from_ymd_opt(2024, 8, d).unwrap();
            assert_eq!(read_pages(&store.tile_path(date))[0], vec![d as f32; 2]);
        }
    }

    #[tokio::test]
    async fn should_restore_prior_tile_on_rollback() {
        let dir = TempDir::new().unwrap();
        let store = GeoTiffTileStore::new(dir.path(), "lightning", spec_fixture(1, 2));

        let first = store
            .write(&reduced_fixture(date(), vec![1.0, 1.0]))
            .await
            .unwrap();
        store.finalize(first).await.unwrap();

        let second = store
            .write(&reduced_fixture(date(), vec![9.0, 9.0]))
            .await
            .unwrap();
        let path = second.path.clone();
        assert!(second.backup.is_some());
        store.rollback(second).await.unwrap();

        assert_eq!(read_pages(&path)[0], vec![1.0, 1.0]);
        assert!(!path.with_extension("tif.bak").exists());
    }

    #[tokio::test]
    async fn should_remove_new_tile_on_rollback() {
        let dir = TempDir::new().unwrap();
        let store = GeoTiffTileStore::new(dir.path(), "lightning", spec_fixture(1, 2));

        let write = store
            .write(&reduced_fixture(date(), vec![1.0, 1.0]))
            .await
            .unwrap();
        store.rollback(write).await.unwrap();

        assert!(!store.exists(date()).await.unwrap());
    }

    #[tokio::test]
    async fn should_drop_backup_on_finalize() {
        let dir = TempDir::new().unwrap();
        let store = GeoTiffTileStore::new(dir.path(), "lightning", spec_fixture(1, 2));
        let grid = reduced_fixture(date(), vec![1.0, 1.0]);

        let first = store.write(&grid).await.unwrap();
        store.finalize(first).await.unwrap();
        let second = store.write(&grid).await.unwrap();
        let backup = second.backup.clone().unwrap();
        store.finalize(second).await.unwrap();

        assert!(!backup.exists());
        assert!(store.exists(date()).await.unwrap());
    }

    #[tokio::test]
    async fn should_refuse_grid_of_wrong_shape() {
        let dir = TempDir::new().unwrap();
        let store = GeoTiffTileStore::new(dir.path(), "lightning", spec_fixture(2, 2));

        let result = store.write(&reduced_fixture(date(), vec![1.0, 1.0])).await;

        assert!(matches!(result, Err(StoreError::ShapeMismatch { .. })));
        assert!(!store.exists(date()).await.unwrap());
    }
}
