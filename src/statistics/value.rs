//! Value statistics: one named reduction applied to every band

use super::operations::{Reduction, TemporalReduction};
use crate::errors::Result;
use crate::model::{Measurement, OutputVolume, Volume};

/// Reduces each band independently along time with a named reduction
///
/// Output variables keep the input names and declarations.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueStatistic {
    pub reduction: Reduction,
    pub masked: bool,
}

impl ValueStatistic {
    #[must_use]
    pub const fn new(reduction: Reduction) -> Self {
        Self {
            reduction,
            masked: true,
        }
    }

    /// Build from a reduction name such as `"mean"`
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unknown reduction.
    pub fn from_stat_name(name: &str) -> Result<Self> {
        Ok(Self::new(name.parse()?))
    }

    pub fn compute(&self, data: &Volume) -> Result<OutputVolume> {
        let mut output = OutputVolume::new();
        for band in data.bands() {
            output.push(
                band.measurement.name.clone(),
                band.data.reduce_time(self.reduction)?,
            );
        }
        Ok(output)
    }

    #[must_use]
    pub fn measurements(&self, input: &[Measurement]) -> Vec<Measurement> {
        input.to_vec()
    }
}
