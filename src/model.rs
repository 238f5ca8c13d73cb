//! In-memory data model: measurements, input volumes and output volumes

use crate::errors::{Result, StatsError};
use crate::geometry::GeoBox;
use chrono::{DateTime, Utc};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Storage type of a measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DType {
    Int8,
    Int16,
    Int32,
    UInt8,
    UInt16,
    Float32,
    Float64,
}

impl DType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }

    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Convert a computed value into the representable range of this type
    ///
    /// Non-finite values become `nodata`; integer types round to nearest and
    /// saturate at their bounds.
    #[must_use]
    pub fn coerce(self, value: f64, nodata: f64) -> f64 {
        if !value.is_finite() {
            return nodata;
        }
        let (lo, hi) = match self {
            Self::Int8 => (f64::from(i8::MIN), f64::from(i8::MAX)),
            Self::Int16 => (f64::from(i16::MIN), f64::from(i16::MAX)),
            Self::Int32 => (f64::from(i32::MIN), f64::from(i32::MAX)),
            Self::UInt8 => (0.0, f64::from(u8::MAX)),
            Self::UInt16 => (0.0, f64::from(u16::MAX)),
            Self::Float32 | Self::Float64 => return value,
        };
        value.round().clamp(lo, hi)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "int8" => Self::Int8,
            "int16" => Self::Int16,
            "int32" => Self::Int32,
            "uint8" => Self::UInt8,
            "uint16" => Self::UInt16,
            "float32" => Self::Float32,
            "float64" => Self::Float64,
            other => return Err(StatsError::config(format!("unsupported dtype '{other}'"))),
        })
    }
}

impl TryFrom<String> for DType {
    type Error = StatsError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<DType> for String {
    fn from(dtype: DType) -> Self {
        dtype.as_str().to_string()
    }
}

/// Declaration of one variable: name, storage type, no-data sentinel and units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub name: String,
    pub dtype: DType,
    pub nodata: f64,
    #[serde(default = "default_units")]
    pub units: String,
}

fn default_units() -> String {
    "1".to_string()
}

impl Measurement {
    pub fn new(name: impl Into<String>, dtype: DType, nodata: f64, units: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dtype,
            nodata,
            units: units.into(),
        }
    }

    /// Same declaration under a different name
    #[must_use]
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

/// One named variable of a [`Volume`], shaped `(time, y, x)`
#[derive(Debug, Clone)]
pub struct Band {
    pub measurement: Measurement,
    pub data: Array3<f32>,
}

/// A multi-band stack of observations sharing `(time, y, x)` coordinates
///
/// Each time slice carries its timestamp and the index of the configured
/// source it was loaded from. In a masked volume invalid values are `NaN`.
#[derive(Debug, Clone)]
pub struct Volume {
    times: Vec<DateTime<Utc>>,
    sources: Vec<usize>,
    geobox: GeoBox,
    bands: Vec<Band>,
    masked: bool,
}

impl Volume {
    /// Assemble a volume, checking that all coordinates agree
    ///
    /// # Errors
    ///
    /// Returns a compute error if a band's shape differs from
    /// `(times.len(), geobox.height, geobox.width)` or the source tags do not
    /// match the time axis.
    pub fn new(
        times: Vec<DateTime<Utc>>,
        sources: Vec<usize>,
        geobox: GeoBox,
        bands: Vec<Band>,
        masked: bool,
    ) -> Result<Self> {
        if sources.len() != times.len() {
            return Err(StatsError::compute(format!(
                "{} source tags for {} time slices",
                sources.len(),
                times.len()
            )));
        }
        let expected = [times.len(), geobox.height, geobox.width];
        for band in &bands {
            if band.data.shape() != expected {
                return Err(StatsError::compute(format!(
                    "band '{}' has shape {:?}, expected {:?}",
                    band.measurement.name,
                    band.data.shape(),
                    expected
                )));
            }
        }
        Ok(Self {
            times,
            sources,
            geobox,
            bands,
            masked,
        })
    }

    #[must_use]
    pub fn times(&self) -> &[DateTime<Utc>] {
        &self.times
    }

    #[must_use]
    pub fn sources(&self) -> &[usize] {
        &self.sources
    }

    #[must_use]
    pub fn geobox(&self) -> &GeoBox {
        &self.geobox
    }

    #[must_use]
    pub fn crs(&self) -> &str {
        &self.geobox.crs
    }

    #[must_use]
    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    #[must_use]
    pub const fn is_masked(&self) -> bool {
        self.masked
    }

    /// Number of time slices
    #[must_use]
    pub fn len(&self) -> usize {
        self.times.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// `(y, x)` size of every band
    #[must_use]
    pub const fn spatial_shape(&self) -> (usize, usize) {
        self.geobox.shape()
    }

    /// Look up a band by name
    #[must_use]
    pub fn band(&self, name: &str) -> Option<&Band> {
        self.bands.iter().find(|b| b.measurement.name == name)
    }

    /// Look up a band by name, failing with a data error
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::BandNotFound`] if the band is absent.
    pub fn require_band(&self, name: &str) -> Result<&Band> {
        self.band(name).ok_or_else(|| StatsError::BandNotFound {
            band: name.to_string(),
            source_name: "loaded volume".to_string(),
        })
    }

    /// Declarations of the loaded bands, in order
    #[must_use]
    pub fn measurements(&self) -> Vec<Measurement> {
        self.bands.iter().map(|b| b.measurement.clone()).collect()
    }

    pub(crate) fn into_parts(self) -> (Vec<DateTime<Utc>>, Vec<usize>, GeoBox, Vec<Band>, bool) {
        (self.times, self.sources, self.geobox, self.bands, self.masked)
    }
}

/// Result of one statistic over one chunk: named 2-D variables, no time axis
///
/// `NaN` marks pixels without a result.
#[derive(Debug, Clone, Default)]
pub struct OutputVolume {
    variables: Vec<(String, Array2<f64>)>,
}

impl OutputVolume {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, values: Array2<f64>) {
        self.variables.push((name.into(), values));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Array2<f64>> {
        self.variables
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Variable names in output order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array2<f64>)> {
        self.variables.iter().map(|(n, v)| (n.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dtype_names_round_trip() {
        for dtype in [
            DType::Int8,
            DType::Int16,
            DType::Int32,
            DType::UInt8,
            DType::UInt16,
            DType::Float32,
            DType::Float64,
        ] {
            assert_eq!(dtype.as_str().parse::<DType>().unwrap(), dtype);
        }
        assert!("complex64".parse::<DType>().is_err());
    }

    #[test]
    fn coerce_integer_types() {
        assert_eq!(DType::Int16.coerce(f64::NAN, -999.0), -999.0);
        assert_eq!(DType::Int16.coerce(12.6, -999.0), 13.0);
        assert_eq!(DType::Int8.coerce(300.0, -1.0), 127.0);
        assert_eq!(DType::UInt8.coerce(-4.0, 0.0), 0.0);
        assert_eq!(DType::Float32.coerce(0.25, -1.0), 0.25);
        assert_eq!(DType::Float64.coerce(f64::INFINITY, 0.0), 0.0);
    }
}
