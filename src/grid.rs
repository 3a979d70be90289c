//! Canonical grid description and the gridded values that flow through the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SpatialError;

const EXTENT_TOLERANCE: f64 = 1e-9;

fn default_epsg() -> u16 {
    4326
}

/// A regular lat/lon (or projected) grid. Cells are addressed row-major from the
/// north-west corner: `cell = row * cols + col`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub rows: usize,
    pub cols: usize,
    pub west: f64,
    pub north: f64,
    pub dx: f64,
    pub dy: f64,
    #[serde(default = "default_epsg")]
    pub epsg: u16,
}

impl GridSpec {
    pub fn cells(&self) -> usize {
        self.rows * self.cols
    }

    pub fn cell_index(&self, row: usize, col: usize) -> Option<usize> {
        (row < self.rows && col < self.cols).then(|| row * self.cols + col)
    }

    /// Centre of a cell as (x, y).
    pub fn cell_centre(&self, cell: usize) -> (f64, f64) {
        let row = cell / self.cols;
        let col = cell % self.cols;
        (
            self.west + (col as f64 + 0.5) * self.dx,
            self.north - (row as f64 + 0.5) * self.dy,
        )
    }

    /// True when both specs describe the same cells on the same extent.
    pub fn same_extent(&self, other: &GridSpec) -> bool {
        self.rows == other.rows
            && self.cols == other.cols
            && self.epsg == other.epsg
            && (self.west - other.west).abs() < EXTENT_TOLERANCE
            && (self.north - other.north).abs() < EXTENT_TOLERANCE
            && (self.dx - other.dx).abs() < EXTENT_TOLERANCE
            && (self.dy - other.dy).abs() < EXTENT_TOLERANCE
    }

    pub fn ensure_same_extent(&self, other: &GridSpec) -> Result<(), SpatialError> {
        if self.same_extent(other) {
            Ok(())
        } else {
            Err(SpatialError::SpatialMismatch {
                expected: self.to_string(),
                actual: other.to_string(),
            })
        }
    }
}

impl fmt::Display for GridSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} @ ({}, {}) step ({}, {}) EPSG:{}",
            self.rows, self.cols, self.west, self.north, self.dx, self.dy, self.epsg
        )
    }
}

/// Values on a [`GridSpec`]. NaN marks no-data.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    spec: GridSpec,
    values: Vec<f32>,
}

impl Grid {
    pub fn new(spec: GridSpec, values: Vec<f32>) -> Result<Self, SpatialError> {
        if values.len() != spec.cells() {
            return Err(SpatialError::SpatialMismatch {
                expected: format!("{} cells ({})", spec.cells(), spec),
                actual: format!("{} values", values.len()),
            });
        }

        Ok(Grid { spec, values })
    }

    pub fn filled(spec: GridSpec, value: f32) -> Self {
        let values = vec![value; spec.cells()];
        Grid { spec, values }
    }

    pub fn spec(&self) -> &GridSpec {
        &self.spec
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    pub fn map(mut self, f: impl Fn(f32) -> f32) -> Self {
        for v in self.values.iter_mut() {
            *v = f(*v);
        }
        self
    }
}

/// Geographic bounding box used to build a [`CellMask`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

/// Per-cell inclusion flags used for spatial clipping.
#[derive(Debug, Clone, PartialEq)]
pub struct CellMask {
    inside: Vec<bool>,
}

impl CellMask {
    pub fn new(inside: Vec<bool>) -> Self {
        CellMask { inside }
    }

    /// Keeps every cell whose centre falls inside `bbox`.
    pub fn from_bbox(spec: &GridSpec, bbox: &BoundingBox) -> Self {
        let inside = (0..spec.cells())
            .map(|cell| {
                let (x, y) = spec.cell_centre(cell);
                x >= bbox.west && x <= bbox.east && y >= bbox.south && y <= bbox.north
            })
            .collect();

        CellMask { inside }
    }

    pub fn len(&self) -> usize {
        self.inside.len()
    }

    /// Whether at least one cell lies inside the mask.
    pub fn covers_any(&self) -> bool {
        self.inside.contains(&true)
    }

    pub fn contains(&self, cell: usize) -> bool {
        self.inside.get(cell).copied().unwrap_or(false)
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    pub fn spec_fixture(rows: usize, cols: usize) -> GridSpec {
        GridSpec {
            rows,
            cols,
            west: -10.0,
            north: 60.0,
            dx: 0.5,
            dy: 0.5,
            epsg: 4326,
        }
    }

    #[test]
    fn should_reject_wrong_value_count() {
        let spec = spec_fixture(2, 3);
        assert!(Grid::new(spec.clone(), vec![0.0; 6]).is_ok());
        assert!(matches!(
            Grid::new(spec, vec![0.0; 5]),
            Err(SpatialError::SpatialMismatch { .. })
        ));
    }

    #[test]
    fn should_address_cells_row_major() {
        let spec = spec_fixture(2, 3);

        assert_eq!(spec.cell_index(0, 2), Some(2));
        assert_eq!(spec.cell_index(1, 0), Some(3));
        assert_eq!(spec.cell_index(2, 0), None);
        assert_eq!(spec.cell_index(0, 3), None);
    }

    #[test]
    fn should_compare_extents() {
        let a = spec_fixture(2, 3);
        let mut b = a.clone();
        assert!(a.same_extent(&b));

        b.west += 0.25;
        assert!(!a.same_extent(&b));
        assert!(a.ensure_same_extent(&b).is_err());
    }

    #[test]
    fn should_build_mask_from_bbox() {
        // Centres: x in {-9.75, -9.25}, y in {59.75, 59.25}
        let spec = spec_fixture(2, 2);
        let bbox = BoundingBox {
            west: -10.0,
            south: 59.5,
            east: -9.5,
            north: 60.0,
        };
        let mask = CellMask::from_bbox(&spec, &bbox);

        assert_eq!(mask.len(), 4);
        assert!(mask.contains(0));
        assert!(!mask.contains(1));
        assert!(!mask.contains(2));
        assert!(!mask.contains(3));
        assert!(mask.covers_any());
        assert!(!CellMask::new(vec![false; 4]).covers_any());
    }
}
