//! Normalised difference statistics (NDVI, NDWI and friends)

use super::operations::{Reduction, TemporalReduction};
use crate::errors::{Result, StatsError};
use crate::model::{DType, Measurement, OutputVolume, Volume};
use ndarray::{Array3, Zip};

/// Computes `(A - B) / (A + B)` per observation, then summarises it along
/// time with each configured reduction
///
/// One `float32` output variable is produced per reduction, named
/// `<name>_<reduction>`.
#[derive(Debug, Clone, PartialEq)]
pub struct BandRatioStatistic {
    pub name: String,
    pub band_a: String,
    pub band_b: String,
    pub reductions: Vec<Reduction>,
    pub masked: bool,
}

impl BandRatioStatistic {
    pub fn new(
        name: impl Into<String>,
        band_a: impl Into<String>,
        band_b: impl Into<String>,
        reductions: Vec<Reduction>,
    ) -> Self {
        let reductions = if reductions.is_empty() {
            vec![Reduction::Min, Reduction::Max, Reduction::Mean]
        } else {
            reductions
        };
        Self {
            name: name.into(),
            band_a: band_a.into(),
            band_b: band_b.into(),
            reductions,
            masked: true,
        }
    }

    fn output_name(&self, reduction: Reduction) -> String {
        format!("{}_{}", self.name, reduction)
    }

    pub fn compute(&self, data: &Volume) -> Result<OutputVolume> {
        let a = &data.require_band(&self.band_a)?.data;
        let b = &data.require_band(&self.band_b)?.data;

        let ratio: Array3<f32> = Zip::from(a).and(b).map_collect(|&a, &b| {
            let ratio = (a - b) / (a + b);
            if ratio.is_finite() {
                ratio
            } else {
                f32::NAN
            }
        });

        let mut output = OutputVolume::new();
        for &reduction in &self.reductions {
            output.push(self.output_name(reduction), ratio.reduce_time(reduction)?);
        }
        Ok(output)
    }

    /// # Errors
    ///
    /// Returns [`StatsError::MissingBand`] if either input band is absent.
    pub fn measurements(&self, input: &[Measurement]) -> Result<Vec<Measurement>> {
        for band in [&self.band_a, &self.band_b] {
            if !input.iter().any(|m| &m.name == band) {
                return Err(StatsError::MissingBand {
                    statistic: self.name.clone(),
                    band: band.clone(),
                });
            }
        }
        Ok(self
            .reductions
            .iter()
            .map(|&r| Measurement::new(self.output_name(r), DType::Float32, -1.0, "1"))
            .collect())
    }
}
