//! Index-preserving statistics
//!
//! These statistics choose one observation per pixel and copy it, together
//! with where it came from, into the output. For every selection three
//! provenance variables are written:
//!
//! | suffix           | dtype   | nodata | content                         |
//! |------------------|---------|--------|---------------------------------|
//! | `source`         | int8    | -1     | index of the contributing source |
//! | `observed`       | float64 | 0      | seconds since the Unix epoch     |
//! | `observed_date`  | int32   | 0      | calendar date as `YYYYMMDD`      |
//!
//! Variable order is fixed: all value bands first, then every `source`
//! variable, then every `observed`, then every `observed_date`.

use super::index::{gather_by_index, medoid_indices, percentile_indices};
use crate::dates::{datetime_to_inttime, epoch_seconds};
use crate::errors::{Result, StatsError};
use crate::model::{DType, Measurement, OutputVolume, Volume};
use ndarray::{Array2, ArrayView3, Axis};

const SOURCE_SUFFIX: &str = "source";
const OBSERVED_SUFFIX: &str = "observed";
const OBSERVED_DATE_SUFFIX: &str = "observed_date";

fn source_measurement(name: String) -> Measurement {
    Measurement::new(name, DType::Int8, -1.0, "1")
}

fn observed_measurement(name: String) -> Measurement {
    Measurement::new(name, DType::Float64, 0.0, "seconds since 1970-01-01 00:00:00")
}

fn observed_date_measurement(name: String) -> Measurement {
    Measurement::new(name, DType::Int32, 0.0, "Date as YYYYMMDD")
}

fn suffixed(prefix: Option<&str>, suffix: &str) -> String {
    prefix.map_or_else(|| suffix.to_string(), |p| format!("{p}_{suffix}"))
}

/// Provenance arrays for one index selection
struct Provenance {
    source: Array2<f64>,
    observed: Array2<f64>,
    observed_date: Array2<f64>,
}

impl Provenance {
    fn gather(indices: &Array2<Option<usize>>, data: &Volume) -> Self {
        let sources: Vec<f64> = data.sources().iter().map(|&s| s as f64).collect();
        let observed: Vec<f64> = data.times().iter().map(epoch_seconds).collect();
        let dates: Vec<f64> = data
            .times()
            .iter()
            .map(|t| f64::from(datetime_to_inttime(t)))
            .collect();

        let pick = |table: &[f64]| indices.mapv(|i| i.map_or(f64::NAN, |i| table[i]));
        Self {
            source: pick(&sources),
            observed: pick(&observed),
            observed_date: pick(&dates),
        }
    }
}

/// Percentile statistic
///
/// For each band independently, selects the observation nearest the `q`-th
/// percentile and reports its value and provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct PerBandIndexStatistic {
    pub q: f64,
    pub masked: bool,
}

impl PerBandIndexStatistic {
    /// # Errors
    ///
    /// Returns a configuration error if `q` is outside `[0, 100]`.
    pub fn percentile(q: f64) -> Result<Self> {
        if !(0.0..=100.0).contains(&q) {
            return Err(StatsError::config(format!(
                "percentile must be within 0..=100, got {q}"
            )));
        }
        Ok(Self { q, masked: true })
    }

    pub fn compute(&self, data: &Volume) -> Result<OutputVolume> {
        let n = data.bands().len();
        let mut sources = Vec::with_capacity(n);
        let mut observed = Vec::with_capacity(n);
        let mut observed_dates = Vec::with_capacity(n);

        let mut output = OutputVolume::new();
        for band in data.bands() {
            let name = band.measurement.name.as_str();
            let indices = percentile_indices(band.data.view(), self.q);
            let gathered = gather_by_index(band.data.view(), indices.view(), Axis(0), f32::NAN)?;
            output.push(name, gathered.mapv(f64::from));

            let p = Provenance::gather(&indices, data);
            sources.push((suffixed(Some(name), SOURCE_SUFFIX), p.source));
            observed.push((suffixed(Some(name), OBSERVED_SUFFIX), p.observed));
            observed_dates.push((suffixed(Some(name), OBSERVED_DATE_SUFFIX), p.observed_date));
        }

        for (name, values) in sources.into_iter().chain(observed).chain(observed_dates) {
            output.push(name, values);
        }
        Ok(output)
    }

    #[must_use]
    pub fn measurements(&self, input: &[Measurement]) -> Vec<Measurement> {
        let names = || input.iter().map(|m| Some(m.name.as_str()));
        input
            .iter()
            .cloned()
            .chain(names().map(|n| source_measurement(suffixed(n, SOURCE_SUFFIX))))
            .chain(names().map(|n| observed_measurement(suffixed(n, OBSERVED_SUFFIX))))
            .chain(names().map(|n| observed_date_measurement(suffixed(n, OBSERVED_DATE_SUFFIX))))
            .collect()
    }
}

/// Medoid statistic
///
/// Selects one observation per pixel jointly across all bands (the medoid
/// of the band vectors) and reports every band's value at it plus a single
/// set of provenance variables.
#[derive(Debug, Clone, PartialEq)]
pub struct PerStatIndexStatistic {
    pub masked: bool,
}

impl PerStatIndexStatistic {
    #[must_use]
    pub const fn medoid() -> Self {
        Self { masked: true }
    }

    pub fn compute(&self, data: &Volume) -> Result<OutputVolume> {
        let views: Vec<ArrayView3<'_, f32>> = data.bands().iter().map(|b| b.data.view()).collect();
        let indices = medoid_indices(&views)?;

        let mut output = OutputVolume::new();
        for band in data.bands() {
            let gathered = gather_by_index(band.data.view(), indices.view(), Axis(0), f32::NAN)?;
            output.push(band.measurement.name.clone(), gathered.mapv(f64::from));
        }

        let provenance = Provenance::gather(&indices, data);
        output.push(SOURCE_SUFFIX, provenance.source);
        output.push(OBSERVED_SUFFIX, provenance.observed);
        output.push(OBSERVED_DATE_SUFFIX, provenance.observed_date);
        Ok(output)
    }

    #[must_use]
    pub fn measurements(&self, input: &[Measurement]) -> Vec<Measurement> {
        let mut measurements = input.to_vec();
        measurements.push(source_measurement(suffixed(None, SOURCE_SUFFIX)));
        measurements.push(observed_measurement(suffixed(None, OBSERVED_SUFFIX)));
        measurements.push(observed_date_measurement(suffixed(None, OBSERVED_DATE_SUFFIX)));
        measurements
    }
}
