//! Statistic descriptors and the statistic registry
//!
//! A statistic turns a masked or unmasked [`Volume`] for one chunk into an
//! [`OutputVolume`] without a time axis. Every statistic can also derive its
//! output variable declarations from the input declarations alone, so
//! output files can be allocated before any data is read.
//!
//! # Organization
//!
//! - [`index`]: time-index selection (percentile, medoid) and gathering
//! - [`operations`]: named reductions and the reduction trait
//! - [`parallel`]: parallel reduction implementations
//! - [`value`], [`index_stats`], [`band_ratio`], [`water`]: the statistic kinds

pub mod band_ratio;
pub mod index;
pub mod index_stats;
pub mod operations;
pub mod parallel;
pub mod value;
pub mod water;

use crate::errors::{Result, StatsError};
use crate::model::{Measurement, OutputVolume, Volume};
use std::collections::BTreeMap;

pub use band_ratio::BandRatioStatistic;
pub use index::{gather_by_index, medoid_index, percentile_index};
pub use index_stats::{PerBandIndexStatistic, PerStatIndexStatistic};
pub use operations::{Reduction, TemporalReduction};
pub use value::ValueStatistic;
pub use water::WaterFrequencyStatistic;

/// The closed set of statistic kinds
#[derive(Debug, Clone, PartialEq)]
pub enum Statistic {
    Value(ValueStatistic),
    PerBandIndex(PerBandIndexStatistic),
    PerStatIndex(PerStatIndexStatistic),
    BandRatio(BandRatioStatistic),
    WaterFrequency(WaterFrequencyStatistic),
}

impl Statistic {
    /// Whether the statistic expects no-data values replaced by NaN
    #[must_use]
    pub const fn masked(&self) -> bool {
        match self {
            Self::Value(s) => s.masked,
            Self::PerBandIndex(s) => s.masked,
            Self::PerStatIndex(s) => s.masked,
            Self::BandRatio(s) => s.masked,
            Self::WaterFrequency(s) => s.masked,
        }
    }

    /// Short description of the statistic kind, for logging
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::PerBandIndex(_) => "per-band index",
            Self::PerStatIndex(_) => "per-stat index",
            Self::BandRatio(_) => "band ratio",
            Self::WaterFrequency(_) => "water frequency",
        }
    }

    /// Compute the statistic over one chunk
    ///
    /// Output variables appear in the same order as [`Statistic::measurements`].
    ///
    /// # Errors
    ///
    /// Returns a compute or data error on malformed input.
    pub fn compute(&self, data: &Volume) -> Result<OutputVolume> {
        match self {
            Self::Value(s) => s.compute(data),
            Self::PerBandIndex(s) => s.compute(data),
            Self::PerStatIndex(s) => s.compute(data),
            Self::BandRatio(s) => s.compute(data),
            Self::WaterFrequency(s) => s.compute(data),
        }
    }

    /// Output variable declarations for the given input declarations
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a required input band is missing.
    pub fn measurements(&self, input: &[Measurement]) -> Result<Vec<Measurement>> {
        match self {
            Self::Value(s) => Ok(s.measurements(input)),
            Self::PerBandIndex(s) => Ok(s.measurements(input)),
            Self::PerStatIndex(s) => Ok(s.measurements(input)),
            Self::BandRatio(s) => s.measurements(input),
            Self::WaterFrequency(s) => s.measurements(input),
        }
    }
}

/// Named statistics available to output product definitions
///
/// Built once at start-up and passed to whatever resolves product
/// definitions.
#[derive(Debug, Clone, Default)]
pub struct StatisticRegistry {
    entries: BTreeMap<String, Statistic>,
}

impl StatisticRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with the standard statistics
    ///
    /// `min`, `max`, `mean`, `sum`, `percentile_10`, `percentile_50`,
    /// `percentile_90`, `medoid`, `ndvi_stats`, `ndwi_stats` and `wofs`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a built-in statistic is invalid.
    pub fn standard() -> Result<Self> {
        let mut registry = Self::empty();
        for reduction in [Reduction::Min, Reduction::Max, Reduction::Mean, Reduction::Sum] {
            registry.register(
                reduction.as_str(),
                Statistic::Value(ValueStatistic::new(reduction)),
            );
        }
        for q in [10_u8, 50, 90] {
            registry.register_percentile(f64::from(q))?;
        }
        registry.register("medoid", Statistic::PerStatIndex(PerStatIndexStatistic::medoid()));

        let summary = vec![Reduction::Min, Reduction::Mean, Reduction::Max];
        registry.register(
            "ndvi_stats",
            Statistic::BandRatio(BandRatioStatistic::new("ndvi", "nir", "red", summary.clone())),
        );
        registry.register(
            "ndwi_stats",
            Statistic::BandRatio(BandRatioStatistic::new("ndwi", "green", "swir1", summary)),
        );
        registry.register(
            "wofs",
            Statistic::WaterFrequency(WaterFrequencyStatistic::default()),
        );
        Ok(registry)
    }

    /// Register `percentile_<q>`
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `q` is outside `[0, 100]`.
    pub fn register_percentile(&mut self, q: f64) -> Result<()> {
        let statistic = PerBandIndexStatistic::percentile(q)?;
        self.register(format!("percentile_{q}"), Statistic::PerBandIndex(statistic));
        Ok(())
    }

    /// Add or replace a named statistic
    pub fn register(&mut self, name: impl Into<String>, statistic: Statistic) {
        self.entries.insert(name.into(), statistic);
    }

    /// Look up a statistic by name
    ///
    /// # Errors
    ///
    /// Returns [`StatsError::UnknownStatistic`] if the name is not registered.
    pub fn get(&self, name: &str) -> Result<&Statistic> {
        self.entries
            .get(name)
            .ok_or_else(|| StatsError::UnknownStatistic {
                name: name.to_string(),
            })
    }

    /// Registered names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
