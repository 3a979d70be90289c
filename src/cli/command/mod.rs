pub mod missing;
pub mod point;
pub mod run;

use std::sync::Arc;

use anyhow::Result;

use crate::{
    catalog::IndexCatalog,
    config::{Config, SourceConfig},
    parquet::ParquetArchive,
    reconcile::Scheduler,
    source::{HttpSource, ParquetDirSource, RawSource},
    tile::GeoTiffTileStore,
};

pub use missing::missing;
pub use point::point;
pub use run::run;

/// Wires the configured source and stores for one variable.
pub fn build_scheduler(config: &Config, variable: &str) -> Result<Scheduler> {
    let spec = config.variable(variable)?.clone();

    let source: Arc<dyn RawSource> = match &config.source {
        SourceConfig::Dir { path } => Arc::new(ParquetDirSource::new(path, config.native_grid().clone())),
        SourceConfig::Http { url_template } => {
            Arc::new(HttpSource::new(url_template, config.native_grid().clone()))
        }
    };
    let tiles = GeoTiffTileStore::new(config.tile_dir(), &spec.name, config.grid.clone());
    let archive = make_archive(config, &spec.name);

    let mut scheduler = Scheduler::new(
        spec,
        config.grid.clone(),
        source,
        Arc::new(tiles),
        Arc::new(archive),
    )
    .with_concurrency(config.concurrency);

    if let Some(mask) = config.mask() {
        scheduler = scheduler.with_mask(mask);
    }
    if let Some(path) = config.catalog_path(variable) {
        scheduler = scheduler.with_catalog(Arc::new(IndexCatalog::new(path, variable)));
    }

    Ok(scheduler)
}

pub fn make_archive(config: &Config, variable: &str) -> ParquetArchive {
    ParquetArchive::new(
        config.archive_dir(),
        variable,
        config.grid.clone(),
        config.cells_per_chunk,
    )
}
