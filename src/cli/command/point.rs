use anyhow::Result;

use crate::{config::Config, parquet::PointValue};

use super::make_archive;

pub fn point(config: &Config, variable: &str, year: i32, row: usize, col: usize) -> Result<Vec<PointValue>> {
    let spec = config.variable(variable)?;
    let archive = make_archive(config, &spec.name);

    Ok(archive.read_point(year, row, col)?)
}
