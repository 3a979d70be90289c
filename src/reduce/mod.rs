//! Reduction of one day of raw samples to the single grid that represents it.

pub mod bins;
pub mod extremum;

use chrono::NaiveDate;
use tracing::debug;

use crate::{
    error::{ConfigError, DateFailure, SpatialError},
    grid::{CellMask, Grid, GridSpec},
    reading::{DailyStatistic, RawSample, Reduction, Sentinel, VariableSpec},
    spatial::{MaskedSpatial, SpatialOps},
};

pub use bins::{bin_day, day_offset, BinAggregate};
pub use extremum::{track_peaks, PeakTimeGrid};

/// Running per-cell reduction. NaN inputs are skipped.
pub(crate) struct Accumulator {
    reduction: Reduction,
    acc: Vec<f64>,
    counts: Vec<u32>,
}

impl Accumulator {
    pub fn new(reduction: Reduction, cells: usize) -> Self {
        let init = match reduction {
            Reduction::Sum | Reduction::Mean => 0.0,
            Reduction::Max => f64::NEG_INFINITY,
            Reduction::Min => f64::INFINITY,
        };

        Accumulator {
            reduction,
            acc: vec![init; cells],
            counts: vec![0; cells],
        }
    }

    pub fn push(&mut self, values: &[f32]) {
        let cells = self.acc.iter_mut().zip(self.counts.iter_mut());
        for ((acc, count), &v) in cells.zip(values) {
            if v.is_nan() {
                continue;
            }
            let v = v as f64;
            match self.reduction {
                Reduction::Sum | Reduction::Mean => *acc += v,
                Reduction::Max => *acc = acc.max(v),
                Reduction::Min => *acc = acc.min(v),
            }
            *count += 1;
        }
    }

    pub fn finish(self, sentinel: Sentinel) -> Vec<f32> {
        let reduction = self.reduction;
        self.acc
            .into_iter()
            .zip(self.counts)
            .map(|(acc, count)| match (count, reduction) {
                (0, _) => sentinel.value(),
                (n, Reduction::Mean) => (acc / n as f64) as f32,
                _ => acc as f32,
            })
            .collect()
    }
}

/// The grid chosen to represent one day of one variable.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyReducedGrid {
    pub variable: String,
    pub date: NaiveDate,
    pub units: String,
    pub values: Grid,
    /// Start of the winning bin per cell, for peak-window variables.
    pub peak: Option<PeakTimeGrid>,
}

impl DailyReducedGrid {
    /// Marks every cell outside `mask` as no-data, with no peak time.
    pub fn mask_outside(mut self, mask: &CellMask) -> Result<Self, SpatialError> {
        self.values = MaskedSpatial.clip(self.values, mask)?;
        if let Some(peak) = self.peak.as_mut() {
            peak.clear_outside(mask)?;
        }
        Ok(self)
    }

    /// Applies the variable's unit conversion. A grid that is no longer in the
    /// native units is refused, so the conversion can never be applied twice.
    pub fn convert(self, variable: &VariableSpec) -> Result<Self, ConfigError> {
        let Some(conversion) = &variable.conversion else {
            return Ok(self);
        };
        if self.units != variable.units {
            return Err(ConfigError::UnitsMismatch {
                variable: variable.name.clone(),
                expected: variable.units.clone(),
                actual: self.units,
            });
        }

        Ok(DailyReducedGrid {
            units: conversion.units.clone(),
            values: conversion.apply(self.values),
            ..self
        })
    }
}

/// Reduces the samples of `date` according to the variable's statistic.
///
/// Every sample must already be on `spec`.
pub fn reduce_day(
    variable: &VariableSpec,
    date: NaiveDate,
    spec: &GridSpec,
    samples: &[RawSample],
) -> Result<DailyReducedGrid, DateFailure> {
    let (values, peak) = match variable.statistic {
        DailyStatistic::PeakWindow { reduction, .. } => {
            let bin_length = variable
                .bin_length()?
                .ok_or_else(|| ConfigError::Invalid("peak window without bins".to_string()))?;
            let binned = bin_day(date, spec, samples, bin_length, reduction, variable.sentinel)?;
            debug!(
                variable = %variable.name,
                %date,
                bins = binned.bins.len(),
                dropped = binned.dropped,
                "binned samples"
            );
            let (values, peak) = track_peaks(spec, &binned.bins)?;
            (values, Some(peak))
        }
        DailyStatistic::Direct { reduction } => {
            let values = reduce_direct(date, spec, samples, reduction, variable.sentinel)?;
            (values, None)
        }
    };

    Ok(DailyReducedGrid {
        variable: variable.name.clone(),
        date,
        units: variable.units.clone(),
        values,
        peak,
    })
}

/// One reduction over every sample of the day, without binning.
pub fn reduce_direct(
    date: NaiveDate,
    spec: &GridSpec,
    samples: &[RawSample],
    reduction: Reduction,
    sentinel: Sentinel,
) -> Result<Grid, SpatialError> {
    let mut acc = Accumulator::new(reduction, spec.cells());
    for sample in samples {
        spec.ensure_same_extent(sample.grid.spec())?;
        if day_offset(date, sample.time).is_some() {
            acc.push(sample.grid.values());
        }
    }

    Grid::new(spec.clone(), acc.finish(sentinel))
}

// -- Tests -------------------------------------------------------------------
