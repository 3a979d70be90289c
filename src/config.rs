//! Run configuration, read from a TOML file.
//!
//! ```toml
//! root = "/data/gridbin"
//! concurrency = 4
//!
//! [source]
//! kind = "http"
//! url_template = "https://example.org/{variable}/{year}/{variable}_{date}.parquet"
//!
//! [grid]
//! rows = 720
//! cols = 1440
//! west = -180.0
//! north = 90.0
//! dx = 0.25
//! dy = 0.25
//!
//! [[variables]]
//! name = "lightning"
//! units = "flashes"
//! source_field = "flash_count"
//! sentinel = "zero"
//! statistic = { kind = "peak_window", bin_minutes = 30, reduction = "sum" }
//! ```

use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{
    error::ConfigError,
    grid::{BoundingBox, CellMask, GridSpec},
    reading::VariableSpec,
};

pub const DEFAULT_CONFIG_FILE: &str = "gridbin.toml";

fn default_root() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join("gridbin"))
        .unwrap_or_else(|| PathBuf::from("gridbin"))
}

fn default_concurrency() -> usize {
    1
}

fn default_cells_per_chunk() -> usize {
    4096
}

fn default_catalog() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    /// Daily sample files under a local directory.
    Dir { path: PathBuf },
    /// Daily sample files behind a URL template.
    Http { url_template: String },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Defaults to `<root>/tiles`.
    pub tile_dir: Option<PathBuf>,
    /// Defaults to `<root>/archive`.
    pub archive_dir: Option<PathBuf>,
    #[serde(default = "default_catalog")]
    pub catalog: bool,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_cells_per_chunk")]
    pub cells_per_chunk: usize,
    pub source: SourceConfig,
    /// Canonical grid every stored day is on.
    pub grid: GridSpec,
    /// Grid of the upstream samples. Defaults to `grid`.
    pub native_grid: Option<GridSpec>,
    /// Region to keep; cells outside it become no-data.
    pub clip: Option<BoundingBox>,
    pub variables: Vec<VariableSpec>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Config::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Config, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.cells_per_chunk == 0 {
            return Err(ConfigError::Invalid("cells_per_chunk must be at least 1".into()));
        }
        for grid in std::iter::once(&self.grid).chain(self.native_grid.as_ref()) {
            if grid.cells() == 0 || grid.dx <= 0.0 || grid.dy <= 0.0 {
                return Err(ConfigError::Invalid(format!("degenerate grid {grid}")));
            }
        }
        if self.mask().is_some_and(|mask| !mask.covers_any()) {
            return Err(ConfigError::Invalid(format!(
                "clip box holds no cell of {}",
                self.native_grid()
            )));
        }
        if self.variables.is_empty() {
            return Err(ConfigError::Invalid("no variables configured".into()));
        }

        let mut names = BTreeSet::new();
        for variable in &self.variables {
            variable.validate()?;
            if !names.insert(variable.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "variable `{}` is configured twice",
                    variable.name
                )));
            }
        }
        Ok(())
    }

    pub fn variable(&self, name: &str) -> Result<&VariableSpec, ConfigError> {
        self.variables
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| ConfigError::UnknownVariable(name.to_string()))
    }

    pub fn tile_dir(&self) -> PathBuf {
        self.tile_dir
            .clone()
            .unwrap_or_else(|| self.root.join("tiles"))
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.archive_dir
            .clone()
            .unwrap_or_else(|| self.root.join("archive"))
    }

    /// `<tile_dir>/<variable>/catalog.json`, when the catalog is enabled.
    pub fn catalog_path(&self, variable: &str) -> Option<PathBuf> {
        self.catalog
            .then(|| self.tile_dir().join(variable).join("catalog.json"))
    }

    pub fn native_grid(&self) -> &GridSpec {
        self.native_grid.as_ref().unwrap_or(&self.grid)
    }

    pub fn mask(&self) -> Option<CellMask> {
        self.clip
            .as_ref()
            .map(|bbox| CellMask::from_bbox(self.native_grid(), bbox))
    }
}

// -- Tests -------------------------------------------------------------------
