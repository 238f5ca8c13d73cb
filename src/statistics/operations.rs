//! Core reduction operations and traits
//!
//! This module defines the named reductions value statistics are built from.

use crate::errors::{Result, StatsError};
use ndarray::{Array2, Array3};
use std::fmt;
use std::str::FromStr;

/// Supported reductions along the time axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reduction {
    /// Arithmetic mean
    Mean,
    /// Sum of values
    Sum,
    /// Minimum value
    Min,
    /// Maximum value
    Max,
}

impl Reduction {
    /// Get the string representation of the reduction
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Reduction {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mean" => Ok(Self::Mean),
            "sum" => Ok(Self::Sum),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            other => Err(StatsError::config(format!("unknown reduction '{other}'"))),
        }
    }
}

/// Trait for stacks that can be reduced along their time axis
pub trait TemporalReduction {
    /// Reduce the leading (time) axis, skipping NaN values
    ///
    /// # Errors
    ///
    /// Returns an error if the result cannot be reshaped to the spatial grid.
    fn reduce_time(&self, reduction: Reduction) -> Result<Array2<f64>>;
}

impl TemporalReduction for Array3<f32> {
    fn reduce_time(&self, reduction: Reduction) -> Result<Array2<f64>> {
        match reduction {
            Reduction::Mean => super::parallel::parallel_mean_time(self),
            Reduction::Sum => Ok(super::parallel::parallel_sum_time(self)),
            Reduction::Min => Ok(super::parallel::parallel_min_time(self)),
            Reduction::Max => Ok(super::parallel::parallel_max_time(self)),
        }
    }
}
