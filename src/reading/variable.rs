//! Per-variable reduction settings and the upstream schema descriptor.
//!
//! Every choice that affects how a day is reduced is explicit here: the bin
//! length, the reduction applied inside a bin, whether the day is represented
//! by its peak window or by a direct statistic, the empty-bin sentinel and the
//! unit conversion applied before persisting.

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, grid::Grid};

pub const SECONDS_PER_DAY: u32 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// How the values falling into one bin (or one day) are combined per cell.
pub enum Reduction {
    Sum,
    Mean,
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Value given to a cell that received no valid samples.
pub enum Sentinel {
    Zero,
    Nodata,
}

impl Sentinel {
    pub fn value(&self) -> f32 {
        match self {
            Sentinel::Zero => 0.0,
            Sentinel::Nodata => f32::NAN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
/// The statistic chosen to represent a whole day.
pub enum DailyStatistic {
    /// Maximum over midnight-anchored bins, with the start time of the winning bin.
    PeakWindow { bin_minutes: u32, reduction: Reduction },
    /// A single reduction over every raw sample of the day.
    Direct { reduction: Reduction },
}

/// Fixed bin length that evenly partitions a UTC day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinLength {
    seconds: u32,
}

impl BinLength {
    pub fn from_minutes(variable: &str, minutes: u32) -> Result<Self, ConfigError> {
        let seconds = minutes.saturating_mul(60);
        if seconds == 0 || seconds > SECONDS_PER_DAY || SECONDS_PER_DAY % seconds != 0 {
            return Err(ConfigError::InvalidBinLength {
                variable: variable.to_string(),
                minutes,
            });
        }

        Ok(BinLength { seconds })
    }

    pub fn seconds(&self) -> u32 {
        self.seconds
    }

    /// Number of bins in one day.
    pub fn bins_per_day(&self) -> usize {
        (SECONDS_PER_DAY / self.seconds) as usize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Linear conversion `value * scale + offset` from the native units to `units`.
pub struct UnitConversion {
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
    pub units: String,
}

fn default_scale() -> f64 {
    1.0
}

impl UnitConversion {
    pub fn apply(&self, grid: Grid) -> Grid {
        let (scale, offset) = (self.scale, self.offset);
        grid.map(|v| (v as f64 * scale + offset) as f32)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Describes one upstream variable and how it is reduced.
pub struct VariableSpec {
    pub name: String,
    /// Native units of the upstream data.
    pub units: String,
    /// Name of the value column in the upstream sample files.
    pub source_field: String,
    pub statistic: DailyStatistic,
    pub sentinel: Sentinel,
    #[serde(default)]
    pub conversion: Option<UnitConversion>,
}

impl VariableSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() || self.name.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "variable name `{}` cannot be used in file names",
                self.name
            )));
        }
        if let DailyStatistic::PeakWindow { bin_minutes, .. } = self.statistic {
            BinLength::from_minutes(&self.name, bin_minutes)?;
        }
        // converted grids are told apart from native ones by their units
        if let Some(conversion) = &self.conversion {
            if conversion.units == self.units {
                return Err(ConfigError::Invalid(format!(
                    "conversion for `{}` must change its units from `{}`",
                    self.name, self.units
                )));
            }
        }

        Ok(())
    }

    pub fn bin_length(&self) -> Result<Option<BinLength>, ConfigError> {
        match self.statistic {
            DailyStatistic::PeakWindow { bin_minutes, .. } => {
                BinLength::from_minutes(&self.name, bin_minutes).map(Some)
            }
            DailyStatistic::Direct { .. } => Ok(None),
        }
    }

    /// Units of the persisted grids.
    pub fn output_units(&self) -> &str {
        self.conversion
            .as_ref()
            .map(|c| c.units.as_str())
            .unwrap_or(&self.units)
    }
}

// -- Tests -------------------------------------------------------------------
