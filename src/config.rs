//! Run configuration
//!
//! A single YAML document describes a statistics run: output storage, input
//! sources and their masks, output products, the time range and how it is
//! split into periods, the memory budget for chunking, the output location
//! and, optionally, a region that replaces grid tiling.
//!
//! ```yaml
//! location: /g/data/stats
//! start_date: 2015-01-01
//! end_date: 2017-01-01
//! stats_duration: 1y
//! step_size: 1y
//! storage:
//!   driver: NetCDF CF
//!   crs: EPSG:3577
//!   tile_size: {x: 100000.0, y: 100000.0}
//!   resolution: {x: 25, y: -25}
//!   chunking: {x: 200, y: 200, time: 1}
//!   dimension_order: [time, y, x]
//! computation:
//!   chunking: {x: 1000, y: 1000}
//! sources:
//!   - product: ls8_nbar_albers
//!     measurements: [red, green, blue, nir, swir1, swir2]
//!     group_by: solar_day
//!     masks:
//!       - product: ls8_pq_albers
//!         measurement: pixelquality
//!         flags: {contiguous: true, cloud_acca: no_cloud}
//! output_products:
//!   - name: nbar_mean
//!     statistic: mean
//!     file_path_template: 'mean/{x}_{y}/LS_MEAN_{x}_{y}_{start_time:%Y%m%d}.nc'
//! ```

use crate::dates::{date_sequence, parse_date, Interval, TimePeriod};
use crate::errors::{Result, StatsError};
use crate::geometry::{Bounds, ChunkSize, GridSpec, Resolution};
use crate::model::DType;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Group-by key used when a source does not name one
pub const DEFAULT_GROUP_BY: &str = "time";

/// Default spatial chunk when neither chunking nor a memory limit is given
pub const DEFAULT_CHUNK: ChunkSize = ChunkSize { x: 1000, y: 1000 };

/// Top-level statistics run configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatsConfig {
    pub storage: StorageConfig,
    pub sources: Vec<SourceSpec>,
    pub output_products: Vec<OutputProductDef>,
    #[serde(deserialize_with = "de_date")]
    pub start_date: DateTime<Utc>,
    #[serde(deserialize_with = "de_date")]
    pub end_date: DateTime<Utc>,
    pub stats_duration: Interval,
    pub step_size: Interval,
    #[serde(default)]
    pub computation: ComputationConfig,
    pub location: PathBuf,
    #[serde(default)]
    pub input_region: Option<InputRegion>,
}

fn de_date<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error> {
    let s = String::deserialize(deserializer)?;
    parse_date(&s).map_err(serde::de::Error::custom)
}

impl<'de> Deserialize<'de> for Interval {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Output storage description
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    pub driver: DriverKind,
    pub crs: String,
    #[serde(default)]
    pub tile_size: Option<Resolution>,
    pub resolution: Resolution,
    pub chunking: BTreeMap<String, usize>,
    pub dimension_order: Vec<String>,
}

/// Recognised output drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum DriverKind {
    /// One multi-variable NetCDF file per output product
    #[serde(rename = "NetCDF CF")]
    NetcdfCf,
    /// One single-band GeoTIFF per output variable
    #[serde(rename = "Geotiff", alias = "GeoTIFF")]
    Geotiff,
}

impl StorageConfig {
    /// Grid used for tiling, if a tile size is configured
    #[must_use]
    pub fn grid_spec(&self) -> Option<GridSpec> {
        self.tile_size.map(|tile_size| GridSpec {
            crs: self.crs.clone(),
            tile_size,
            resolution: self.resolution,
        })
    }

    /// Storage chunk sizes listed in dimension order
    ///
    /// # Errors
    ///
    /// Returns a configuration error if chunking names a dimension not in
    /// `dimension_order`, misses one that is, or has a zero size.
    pub fn chunk_sizes(&self) -> Result<Vec<usize>> {
        let ordered: BTreeSet<&str> = self.dimension_order.iter().map(String::as_str).collect();
        if ordered.len() != self.dimension_order.len() {
            return Err(StatsError::config(format!(
                "storage dimension_order {:?} repeats a dimension",
                self.dimension_order
            )));
        }
        if let Some(extra) = self.chunking.keys().find(|k| !ordered.contains(k.as_str())) {
            return Err(StatsError::config(format!(
                "storage chunking names dimension '{extra}' which is not in dimension_order {:?}",
                self.dimension_order
            )));
        }

        self.dimension_order
            .iter()
            .map(|dim| match self.chunking.get(dim) {
                Some(0) => Err(StatsError::config(format!(
                    "storage chunking for '{dim}' must be positive"
                ))),
                Some(&size) => Ok(size),
                None => Err(StatsError::config(format!(
                    "storage chunking has no entry for dimension '{dim}'"
                ))),
            })
            .collect()
    }

    /// Spatial block size of the storage chunking
    ///
    /// # Errors
    ///
    /// Returns a configuration error if chunking is inconsistent or lacks `x`/`y`.
    pub fn spatial_chunking(&self) -> Result<ChunkSize> {
        let sizes = self.chunk_sizes()?;
        let lookup = |dim: &str| {
            self.dimension_order
                .iter()
                .position(|d| d == dim)
                .map(|i| sizes[i])
                .ok_or_else(|| StatsError::config(format!("storage dimension_order lacks '{dim}'")))
        };
        Ok(ChunkSize {
            x: lookup("x")?,
            y: lookup("y")?,
        })
    }
}

/// One input product and how to load and mask it
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SourceSpec {
    pub product: String,
    pub measurements: Vec<String>,
    #[serde(default)]
    pub masks: Vec<MaskSpec>,
    #[serde(default)]
    pub group_by: Option<String>,
}

impl SourceSpec {
    #[must_use]
    pub fn group_by(&self) -> &str {
        self.group_by.as_deref().unwrap_or(DEFAULT_GROUP_BY)
    }
}

/// A mask product applied to a source
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MaskSpec {
    pub product: String,
    pub measurement: String,
    /// Flag name to required value
    pub flags: BTreeMap<String, FlagValue>,
    /// Named rule for merging several mask observations in one group
    #[serde(default)]
    pub fuse_func: Option<String>,
}

/// Required value of a mask flag
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Int(i64),
    Name(String),
}

/// Definition of one output product
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OutputProductDef {
    pub name: String,
    pub statistic: String,
    pub file_path_template: String,
    #[serde(default)]
    pub zlib: Option<bool>,
    #[serde(default)]
    pub complevel: Option<i32>,
    #[serde(default)]
    pub shuffle: Option<bool>,
    /// Extra attributes written on every output variable
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    /// Storage type overrides for individual output variables
    #[serde(default)]
    pub dtype_overrides: BTreeMap<String, DType>,
    /// Output variables of the statistic that are not written
    #[serde(default)]
    pub exclude_variables: Vec<String>,
}

/// How tasks are split into chunks
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ComputationConfig {
    /// Explicit chunk size in pixels
    #[serde(default)]
    pub chunking: Option<ChunkSize>,
    /// Memory budget per chunk; used when no explicit chunking is given
    #[serde(default)]
    pub memory_limit_mb: Option<usize>,
}

impl ComputationConfig {
    /// Chunk size for a task holding `observations` time slices of `bands` bands
    #[must_use]
    pub fn chunk_size(&self, observations: usize, bands: usize) -> ChunkSize {
        if let Some(chunking) = self.chunking {
            return chunking;
        }
        match self.memory_limit_mb {
            Some(mb) => {
                let bytes_per_pixel = observations.max(1) * bands.max(1) * std::mem::size_of::<f32>();
                ChunkSize::for_memory_budget(mb * 1024 * 1024, bytes_per_pixel)
            }
            None => DEFAULT_CHUNK,
        }
    }
}

/// A user defined area processed as a single task per period
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct InputRegion {
    /// CRS of the coordinates; defaults to the storage CRS
    #[serde(default)]
    pub crs: Option<String>,
    pub x: (f64, f64),
    pub y: (f64, f64),
}

impl InputRegion {
    #[must_use]
    pub fn bounds(&self) -> Bounds {
        Bounds {
            left: self.x.0.min(self.x.1),
            right: self.x.0.max(self.x.1),
            bottom: self.y.0.min(self.y.1),
            top: self.y.0.max(self.y.1),
        }
    }
}

impl StatsConfig {
    /// Parse and validate a configuration document
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the document is malformed or
    /// inconsistent.
    pub fn from_yaml_str(document: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or a configuration
    /// error if it is invalid.
    pub fn from_path(path: &Path) -> Result<Self> {
        let document = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&document)
    }

    /// Check the cross-field rules serde cannot express
    ///
    /// # Errors
    ///
    /// Returns the first violated rule as a configuration error.
    pub fn validate(&self) -> Result<()> {
        if self.start_date >= self.end_date {
            return Err(StatsError::config(format!(
                "start_date {} must be before end_date {}",
                self.start_date, self.end_date
            )));
        }

        let first = self
            .sources
            .first()
            .ok_or_else(|| StatsError::config("at least one source is required"))?;
        if self.sources.iter().any(|s| s.measurements != first.measurements) {
            return Err(StatsError::config(
                "listed measurements of source products are not all the same",
            ));
        }

        if self.output_products.is_empty() {
            return Err(StatsError::config("at least one output product is required"));
        }
        let mut seen = BTreeSet::new();
        let duplicates: BTreeSet<&str> = self
            .output_products
            .iter()
            .map(|p| p.name.as_str())
            .filter(|name| !seen.insert(*name))
            .collect();
        if !duplicates.is_empty() {
            return Err(StatsError::config(format!(
                "Output products must all have different names. Duplicates found: {duplicates:?}"
            )));
        }

        match &self.input_region {
            None if self.storage.tile_size.is_none() => {
                return Err(StatsError::config(
                    "storage.tile_size is required unless an input_region is given",
                ));
            }
            Some(region) => {
                if let Some(crs) = region.crs.as_deref().filter(|crs| *crs != self.storage.crs) {
                    return Err(StatsError::config(format!(
                        "input_region crs '{crs}' differs from storage crs '{}'; reprojection is not supported",
                        self.storage.crs
                    )));
                }
            }
            None => {}
        }

        self.storage.chunk_sizes()?;
        Ok(())
    }

    /// The statistic periods of this run
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the calendar arithmetic overflows.
    pub fn time_periods(&self) -> Result<Vec<TimePeriod>> {
        date_sequence(self.start_date, self.end_date, self.stats_duration, self.step_size)
    }

    /// Restrict the run to one calendar year
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a year chrono cannot represent.
    pub fn with_year(mut self, year: i32) -> Result<Self> {
        let jan_first = |y: i32| {
            Utc.with_ymd_and_hms(y, 1, 1, 0, 0, 0)
                .single()
                .ok_or_else(|| StatsError::config(format!("invalid year {y}")))
        };
        self.start_date = jan_first(year)?;
        self.end_date = jan_first(year + 1)?;
        Ok(self)
    }

    /// Whether tasks are built over a region instead of grid tiles
    #[must_use]
    pub const fn is_region_mode(&self) -> bool {
        self.input_region.is_some()
    }
}
