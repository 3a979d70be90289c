pub mod samples;
pub mod variable;

use chrono::{DateTime, Utc};

use crate::grid::Grid;

pub use samples::read_samples;
pub use variable::{BinLength, DailyStatistic, Reduction, Sentinel, VariableSpec};

/// One timestamped grid in native units, as delivered by a raw source.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub time: DateTime<Utc>,
    pub grid: Grid,
}

impl RawSample {
    pub fn new(time: DateTime<Utc>, grid: Grid) -> Self {
        RawSample { time, grid }
    }
}
