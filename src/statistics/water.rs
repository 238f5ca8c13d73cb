//! Water observation frequency
//!
//! Operates on the raw classification codes of a water band, so it is run on
//! unmasked data: a code of 128 is a wet observation, 0 is a clear dry one,
//! anything else (cloud, shadow, no data) is ignored.

use crate::errors::{Result, StatsError};
use crate::model::{DType, Measurement, OutputVolume, Volume};
use ndarray::{Array2, Axis, Zip};

pub const WET_CODE: f32 = 128.0;
pub const DRY_CODE: f32 = 0.0;

#[derive(Debug, Clone, PartialEq)]
pub struct WaterFrequencyStatistic {
    pub band: String,
    pub wet_code: f32,
    pub dry_code: f32,
    pub masked: bool,
}

impl Default for WaterFrequencyStatistic {
    fn default() -> Self {
        Self {
            band: "water".to_string(),
            wet_code: WET_CODE,
            dry_code: DRY_CODE,
            masked: false,
        }
    }
}

impl WaterFrequencyStatistic {
    pub fn compute(&self, data: &Volume) -> Result<OutputVolume> {
        let water = &data.require_band(&self.band)?.data;

        let count = |code: f32| -> Array2<f64> {
            water.map_axis(Axis(0), |stack| stack.iter().filter(|&&v| v == code).count() as f64)
        };
        let wet = count(self.wet_code);
        let dry = count(self.dry_code);
        let clear = &wet + &dry;
        let frequency = Zip::from(&wet)
            .and(&clear)
            .map_collect(|&w, &c| if c > 0.0 { w / c } else { f64::NAN });

        let mut output = OutputVolume::new();
        output.push("count_wet", wet);
        output.push("count_clear", clear);
        output.push("frequency", frequency);
        Ok(output)
    }

    /// # Errors
    ///
    /// Returns [`StatsError::MissingBand`] if the water band is absent.
    pub fn measurements(&self, input: &[Measurement]) -> Result<Vec<Measurement>> {
        if !input.iter().any(|m| m.name == self.band) {
            return Err(StatsError::MissingBand {
                statistic: "wofs".to_string(),
                band: self.band.clone(),
            });
        }
        Ok(vec![
            Measurement::new("count_wet", DType::Int16, -1.0, "1"),
            Measurement::new("count_clear", DType::Int16, -1.0, "1"),
            Measurement::new("frequency", DType::Float32, -1.0, "1"),
        ])
    }
}
