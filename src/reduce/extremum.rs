//! Per-cell argmax over a day's bins.

use chrono::{DateTime, Utc};

use crate::{
    error::SpatialError,
    grid::{CellMask, Grid, GridSpec},
};

use super::BinAggregate;

/// Start time of the winning bin for every cell. `None` where every bin was no-data.
#[derive(Debug, Clone, PartialEq)]
pub struct PeakTimeGrid {
    spec: GridSpec,
    times: Vec<Option<DateTime<Utc>>>,
}

impl PeakTimeGrid {
    pub fn times(&self) -> &[Option<DateTime<Utc>>] {
        &self.times
    }

    /// Drops the peak of every cell outside `mask`.
    pub fn clear_outside(&mut self, mask: &CellMask) -> Result<(), SpatialError> {
        if mask.len() != self.spec.cells() {
            return Err(SpatialError::MaskMismatch {
                mask: mask.len(),
                grid: self.spec.cells(),
            });
        }
        for (cell, time) in self.times.iter_mut().enumerate() {
            if !mask.contains(cell) {
                *time = None;
            }
        }
        Ok(())
    }
}

/// Picks, independently for every cell, the bin with the largest aggregate.
///
/// Ties go to the bin with the earliest start, whatever order `bins` is in.
/// NaN aggregates never win.
pub fn track_peaks(
    spec: &GridSpec,
    bins: &[BinAggregate],
) -> Result<(Grid, PeakTimeGrid), SpatialError> {
    let mut best = vec![f32::NAN; spec.cells()];
    let mut times: Vec<Option<DateTime<Utc>>> = vec![None; spec.cells()];

    for bin in bins {
        spec.ensure_same_extent(bin.grid.spec())?;
        let cells = best.iter_mut().zip(times.iter_mut());
        for ((best, time), &v) in cells.zip(bin.grid.values()) {
            if v.is_nan() {
                continue;
            }
            let wins = match *time {
                None => true,
                Some(t) => v > *best || (v == *best && bin.start < t),
            };
            if wins {
                *best = v;
                *time = Some(bin.start);
            }
        }
    }

    let values = Grid::new(spec.clone(), best)?;
    let peaks = PeakTimeGrid {
        spec: spec.clone(),
        times,
    };

    Ok((values, peaks))
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use chrono::{NaiveDate, TimeZone};

    use super::*;
    use crate::{
        grid::test::spec_fixture,
        reading::{BinLength, RawSample, Reduction, Sentinel},
        reduce::bin_day,
    };

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 2, h, m, 0).unwrap()
    }

    fn bin(start: DateTime<Utc>, values: Vec<f32>) -> BinAggregate {
        let spec = spec_fixture(1, values.len());
        BinAggregate {
            start,
            samples: 1,
            grid: Grid::new(spec, values).unwrap(),
        }
    }

    #[test]
    fn should_pick_max_per_cell_independently() {
        let spec = spec_fixture(1, 3);
        let bins = vec![
            bin(at(0, 0), vec![1.0, 9.0, 2.0]),
            bin(at(0, 30), vec![5.0, 3.0, 2.5]),
            bin(at(1, 0), vec![4.0, 8.0, 7.0]),
        ];

        let (values, peaks) = track_peaks(&spec, &bins).unwrap();

        assert_eq!(values.values(), &[5.0, 9.0, 7.0]);
        assert_eq!(peaks.times()[0], Some(at(0, 30)));
        assert_eq!(peaks.times()[1], Some(at(0, 0)));
        assert_eq!(peaks.times()[2], Some(at(1, 0)));
    }

    #[test]
    fn should_break_ties_towards_the_earlier_bin() {
        let spec = spec_fixture(1, 1);
        let ordered = vec![bin(at(3, 0), vec![6.0]), bin(at(9, 30), vec![6.0])];
        let reversed = vec![bin(at(9, 30), vec![6.0]), bin(at(3, 0), vec![6.0])];

        for bins in [ordered, reversed] {
            let (values, peaks) = track_peaks(&spec, &bins).unwrap();
            assert_eq!(values.values(), &[6.0]);
            assert_eq!(peaks.times()[0], Some(at(3, 0)));
        }
    }

    #[test]
    fn should_leave_all_nodata_cells_without_peak() {
        let spec = spec_fixture(1, 2);
        let bins = vec![
            bin(at(0, 0), vec![f32::NAN, 1.0]),
            bin(at(0, 30), vec![f32::NAN, f32::NAN]),
        ];

        let (values, peaks) = track_peaks(&spec, &bins).unwrap();

        assert!(values.values()[0].is_nan());
        assert_eq!(peaks.times()[0], None);
        assert_eq!(values.values()[1], 1.0);
        assert_eq!(peaks.times()[1], Some(at(0, 0)));
    }

    #[test]
    fn should_reject_bins_on_another_grid() {
        let spec = spec_fixture(1, 2);
        let bins = vec![bin(at(0, 0), vec![1.0, 2.0, 3.0])];

        assert!(track_peaks(&spec, &bins).is_err());
    }

    #[test]
    fn should_report_spike_in_its_bin() {
        let date = NaiveDate::from_ymd_opt(2024, 8, 2).unwrap();
        let spec = spec_fixture(1, 2);
        let spike = RawSample::new(
            at(14, 15),
            Grid::new(spec.clone(), vec![1247.0, f32::NAN]).unwrap(),
        );

        // 15 minute bins open a bin at 14:15
        let quarter = BinLength::from_minutes("lightning", 15).unwrap();
        let day = bin_day(date, &spec, &[spike.clone()], quarter, Reduction::Sum, Sentinel::Zero)
            .unwrap();
        let (values, peaks) = track_peaks(&spec, &day.bins).unwrap();
        assert_eq!(values.values()[0], 1247.0);
        assert_eq!(peaks.times()[0], Some(at(14, 15)));

        // 30 minute bins are anchored at midnight, so 14:15 belongs to [14:00, 14:30)
        let half = BinLength::from_minutes("lightning", 30).unwrap();
        let day = bin_day(date, &spec, &[spike], half, Reduction::Sum, Sentinel::Zero).unwrap();
        let (values, peaks) = track_peaks(&spec, &day.bins).unwrap();
        assert_eq!(values.values()[0], 1247.0);
        assert_eq!(peaks.times()[0], Some(at(14, 0)));

        // Cell without samples: every bin holds the zero sentinel, earliest bin wins
        assert_eq!(values.values()[1], 0.0);
        assert_eq!(peaks.times()[1], Some(at(0, 0)));
    }

    #[test]
    fn should_clear_peaks_outside_mask() {
        let spec = spec_fixture(1, 3);
        let bins = vec![bin(at(6, 0), vec![1.0, 2.0, 3.0])];
        let (_, mut peaks) = track_peaks(&spec, &bins).unwrap();

        peaks.clear_outside(&CellMask::new(vec![true, false, true])).unwrap();

        assert_eq!(peaks.times(), &[Some(at(6, 0)), None, Some(at(6, 0))]);
        assert!(peaks.clear_outside(&CellMask::new(vec![true; 2])).is_err());
    }
}
