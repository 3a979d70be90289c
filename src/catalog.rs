//! Time index of published tiles, polled by map servers.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn register(&self, tile: &Path, date: NaiveDate) -> Result<(), StoreError>;
}

/// Used when no catalog is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCatalog;

#[async_trait]
impl Catalog for NoopCatalog {
    async fn register(&self, _tile: &Path, _date: NaiveDate) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogIndex {
    pub variable: String,
    pub dates: BTreeMap<NaiveDate, PathBuf>,
}

/// A JSON file mapping each date to its tile.
#[derive(Debug)]
pub struct IndexCatalog {
    path: PathBuf,
    variable: String,
    lock: Mutex<()>,
}

impl IndexCatalog {
    pub fn new(path: impl Into<PathBuf>, variable: impl Into<String>) -> Self {
        IndexCatalog {
            path: path.into(),
            variable: variable.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn load(&self) -> Result<CatalogIndex, StoreError> {
        if !self.path.is_file() {
            return Ok(CatalogIndex {
                variable: self.variable.clone(),
                dates: BTreeMap::new(),
            });
        }
        let text = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl Catalog for IndexCatalog {
    async fn register(&self, tile: &Path, date: NaiveDate) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;

        let mut index = self.load()?;
        index.dates.insert(date, tile.to_path_buf());

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, serde_json::to_string_pretty(&index)?)?;
        fs::rename(&temp_path, &self.path)?;

        debug!(%date, tile = %tile.display(), "registered tile in catalog");
        Ok(())
    }
}

// -- Tests -------------------------------------------------------------------
