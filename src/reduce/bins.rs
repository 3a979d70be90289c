//! Midnight-anchored temporal bins.
//!
//! A day is cut into `86400 / Δ` bins covering `[00:00, 24:00)` UTC. Which bin
//! a sample lands in depends only on its wall-clock time, never on which other
//! samples exist. Bins never reach across midnight: the last bin of one day and
//! the first bin of the next are reduced independently.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

use crate::{
    error::SpatialError,
    grid::{Grid, GridSpec},
    reading::{BinLength, RawSample, Reduction, Sentinel},
};

use super::Accumulator;

/// The reduction of every sample falling into `[start, start + Δ)`.
#[derive(Debug, Clone, PartialEq)]
pub struct BinAggregate {
    pub start: DateTime<Utc>,
    /// Number of samples that contributed.
    pub samples: usize,
    pub grid: Grid,
}

#[derive(Debug, Clone)]
pub struct BinnedDay {
    pub bins: Vec<BinAggregate>,
    /// Samples that fell outside the day and were ignored.
    pub dropped: usize,
}

pub fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Seconds since midnight of `date`, or `None` if `time` is not on that day.
pub fn day_offset(date: NaiveDate, time: DateTime<Utc>) -> Option<u32> {
    let start = midnight(date);
    if time < start {
        return None;
    }

    let offset = (time - start).num_seconds();
    (offset < crate::reading::variable::SECONDS_PER_DAY as i64).then_some(offset as u32)
}

/// Start times of every bin of `date`, in order.
pub fn bin_starts(date: NaiveDate, bin_length: BinLength) -> Vec<DateTime<Utc>> {
    let start = midnight(date);
    (0..bin_length.bins_per_day())
        .map(|i| start + Duration::seconds(i as i64 * bin_length.seconds() as i64))
        .collect()
}

/// Index of the bin `time` belongs to. A time exactly on a boundary belongs to
/// the bin it opens.
pub fn bin_index(date: NaiveDate, bin_length: BinLength, time: DateTime<Utc>) -> Option<usize> {
    day_offset(date, time).map(|offset| (offset / bin_length.seconds()) as usize)
}

/// Groups the samples of `date` into bins and reduces each bin per cell.
///
/// Every sample must be on `spec`; a mismatch fails the whole day. Bins that
/// receive no samples hold the sentinel.
pub fn bin_day(
    date: NaiveDate,
    spec: &GridSpec,
    samples: &[RawSample],
    bin_length: BinLength,
    reduction: Reduction,
    sentinel: Sentinel,
) -> Result<BinnedDay, SpatialError> {
    let mut accumulators: Vec<Accumulator> = (0..bin_length.bins_per_day())
        .map(|_| Accumulator::new(reduction, spec.cells()))
        .collect();
    let mut counts = vec![0usize; bin_length.bins_per_day()];
    let mut dropped = 0;

    for sample in samples {
        spec.ensure_same_extent(sample.grid.spec())?;

        match bin_index(date, bin_length, sample.time) {
            Some(i) => {
                accumulators[i].push(sample.grid.values());
                counts[i] += 1;
            }
            None => dropped += 1,
        }
    }

    let bins = bin_starts(date, bin_length)
        .into_iter()
        .zip(accumulators)
        .zip(counts)
        .map(|((start, acc), samples)| -> Result<BinAggregate, SpatialError> {
            let grid = Grid::new(spec.clone(), acc.finish(sentinel))?;
            Ok(BinAggregate {
                start,
                samples,
                grid,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(BinnedDay { bins, dropped })
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use chrono::{TimeZone, Timelike};

    use super::*;
    use crate::grid::test::spec_fixture;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, h, m, s).unwrap()
    }

    fn sample(time: DateTime<Utc>, values: Vec<f32>) -> RawSample {
        let spec = spec_fixture(1, values.len());
        RawSample::new(time, Grid::new(spec, values).unwrap())
    }

    fn bins(minutes: u32) -> BinLength {
        BinLength::from_minutes("test", minutes).unwrap()
    }

    #[test]
    fn should_tile_the_day_exactly() {
        for minutes in [1, 10, 15, 30, 60, 180] {
            let bin_length = bins(minutes);
            let starts = bin_starts(date(), bin_length);

            assert_eq!(starts.len(), 86_400 / (minutes as usize * 60));
            assert_eq!(starts[0], midnight(date()));
            for pair in starts.windows(2) {
                assert_eq!(pair[1] - pair[0], Duration::minutes(minutes as i64));
            }
            let end = *starts.last().unwrap() + Duration::minutes(minutes as i64);
            assert_eq!(end, midnight(date().succ_opt().unwrap()));
        }
    }

    #[test]
    fn should_assign_boundary_to_the_bin_it_opens() {
        let bin_length = bins(30);

        assert_eq!(bin_index(date(), bin_length, at(0, 0, 0)), Some(0));
        assert_eq!(bin_index(date(), bin_length, at(0, 29, 59)), Some(0));
        assert_eq!(bin_index(date(), bin_length, at(0, 30, 0)), Some(1));
        assert_eq!(bin_index(date(), bin_length, at(14, 15, 0)), Some(28));
        assert_eq!(bin_index(date(), bin_length, at(23, 59, 59)), Some(47));
    }

    #[test]
    fn should_ignore_samples_from_other_days() {
        let bin_length = bins(30);
        let next_midnight = midnight(date().succ_opt().unwrap());
        let before = midnight(date()) - Duration::seconds(1);

        assert_eq!(bin_index(date(), bin_length, next_midnight), None);
        assert_eq!(bin_index(date(), bin_length, before), None);

        let spec = spec_fixture(1, 1);
        let samples = vec![
            sample(before, vec![100.0]),
            sample(at(23, 45, 0), vec![1.0]),
            sample(next_midnight, vec![100.0]),
        ];
        let day = bin_day(date(), &spec, &samples, bin_length, Reduction::Sum, Sentinel::Zero)
            .unwrap();

        assert_eq!(day.dropped, 2);
        assert_eq!(day.bins[47].grid.values(), &[1.0]);
        assert_eq!(day.bins[0].grid.values(), &[0.0]);
    }

    #[test]
    fn should_fill_empty_bins_with_sentinel() {
        let spec = spec_fixture(1, 2);
        let samples = vec![sample(at(6, 10, 0), vec![2.0, 3.0])];

        let zero = bin_day(date(), &spec, &samples, bins(60), Reduction::Sum, Sentinel::Zero)
            .unwrap();
        assert_eq!(zero.bins.len(), 24);
        assert_eq!(zero.bins[6].grid.values(), &[2.0, 3.0]);
        assert_eq!(zero.bins[6].samples, 1);
        assert_eq!(zero.bins[7].grid.values(), &[0.0, 0.0]);
        assert_eq!(zero.bins[7].samples, 0);

        let nodata = bin_day(date(), &spec, &samples, bins(60), Reduction::Max, Sentinel::Nodata)
            .unwrap();
        assert!(nodata.bins[7].grid.values().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn should_reduce_partial_bins_over_present_samples() {
        let spec = spec_fixture(1, 1);
        // Only 2 of 30 minute samples present in the 10:00 bin
        let samples = vec![
            sample(at(10, 0, 0), vec![4.0]),
            sample(at(10, 17, 0), vec![8.0]),
            sample(at(10, 30, 0), vec![1.0]),
        ];

        let sum = bin_day(date(), &spec, &samples, bins(30), Reduction::Sum, Sentinel::Zero)
            .unwrap();
        let mean = bin_day(date(), &spec, &samples, bins(30), Reduction::Mean, Sentinel::Zero)
            .unwrap();

        assert_eq!(sum.bins[20].grid.values(), &[12.0]);
        assert_eq!(mean.bins[20].grid.values(), &[6.0]);
        assert_eq!(sum.bins[21].grid.values(), &[1.0]);
        assert_eq!(sum.bins[20].start.hour(), 10);
    }

    #[test]
    fn should_fail_on_mismatched_shapes() {
        let spec = spec_fixture(1, 2);
        let samples = vec![
            sample(at(1, 0, 0), vec![1.0, 2.0]),
            sample(at(2, 0, 0), vec![1.0, 2.0, 3.0]),
        ];

        let result = bin_day(date(), &spec, &samples, bins(30), Reduction::Sum, Sentinel::Zero);
        assert!(matches!(result, Err(SpatialError::SpatialMismatch { .. })));
    }

    #[test]
    fn should_bin_a_day_with_no_samples() {
        let spec = spec_fixture(2, 2);
        let day = bin_day(date(), &spec, &[], bins(30), Reduction::Sum, Sentinel::Zero).unwrap();

        assert_eq!(day.bins.len(), 48);
        assert!(day.bins.iter().all(|b| b.samples == 0));
        assert!(day.bins.iter().all(|b| b.grid.values() == [0.0; 4]));
    }
}
