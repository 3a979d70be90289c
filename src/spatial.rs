//! Spatial clipping and reprojection.
//!
//! Real reprojection is delegated to an external implementation of
//! [`SpatialOps`]. [`MaskedSpatial`] clips by a cell mask and only accepts grids
//! that are already on the target grid.

use crate::{
    error::SpatialError,
    grid::{CellMask, Grid, GridSpec},
};

pub trait SpatialOps: Send + Sync {
    /// Sets every cell outside `mask` to no-data.
    fn clip(&self, grid: Grid, mask: &CellMask) -> Result<Grid, SpatialError>;

    /// Resamples `grid` onto `target`.
    fn reproject(&self, grid: Grid, target: &GridSpec) -> Result<Grid, SpatialError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MaskedSpatial;

impl SpatialOps for MaskedSpatial {
    fn clip(&self, mut grid: Grid, mask: &CellMask) -> Result<Grid, SpatialError> {
        if mask.len() != grid.spec().cells() {
            return Err(SpatialError::MaskMismatch {
                mask: mask.len(),
                grid: grid.spec().cells(),
            });
        }

        for (cell, v) in grid.values_mut().iter_mut().enumerate() {
            if !mask.contains(cell) {
                *v = f32::NAN;
            }
        }

        Ok(grid)
    }

    fn reproject(&self, grid: Grid, target: &GridSpec) -> Result<Grid, SpatialError> {
        target.ensure_same_extent(grid.spec())?;
        Ok(grid)
    }
}

// -- Tests -------------------------------------------------------------------
