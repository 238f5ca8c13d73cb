//! Collaborator interfaces: catalog lookup, raster decoding and mask decoding
//!
//! The engine never touches input files directly. It asks a [`Catalog`]
//! which observations exist, a [`RasterReader`] to decode a window of them
//! and a [`MaskDecoder`] to turn flag bands into boolean masks. All three
//! are shared between worker threads.

use crate::config::FlagValue;
use crate::dates::TimePeriod;
use crate::errors::{Result, StatsError};
use crate::geometry::{ChunkWindow, GeoBox, GridSpec, TileIndex};
use crate::model::{Band, Measurement, Volume};
use chrono::{DateTime, Utc};
use ndarray::{Array3, ArrayView2, ArrayViewMut2, Zip};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// One group of datasets observed together
///
/// Several files end up in one observation when they are grouped by solar
/// day; the reader fuses them into a single time slice.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub time: DateTime<Utc>,
    pub paths: Vec<PathBuf>,
}

/// The observations of one product covering one spatial extent
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTile {
    pub product: String,
    pub geobox: GeoBox,
    /// Sorted by time
    pub observations: Vec<Observation>,
}

impl SourceTile {
    #[must_use]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn times(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        self.observations.iter().map(|o| o.time)
    }
}

/// Rule for merging several files of one observation group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fuser {
    /// Keep the first value that is not no-data
    #[default]
    FirstValid,
    /// Bitwise AND of integer flag values
    BitwiseAnd,
}

impl Fuser {
    /// Merge `src` into `dest` in place
    pub fn fuse(self, mut dest: ArrayViewMut2<'_, f32>, src: ArrayView2<'_, f32>, nodata: f32) {
        match self {
            Self::FirstValid => Zip::from(&mut dest).and(&src).for_each(|d, &s| {
                if d.is_nan() || *d == nodata {
                    *d = s;
                }
            }),
            Self::BitwiseAnd => Zip::from(&mut dest).and(&src).for_each(|d, &s| {
                *d = ((*d as u32) & (s as u32)) as f32;
            }),
        }
    }
}

impl fmt::Display for Fuser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FirstValid => "first_valid",
            Self::BitwiseAnd => "bitwise_and",
        })
    }
}

impl FromStr for Fuser {
    type Err = StatsError;

    /// Accepts `first_valid`, `bitwise_and`, or a dotted path ending in
    /// `ga_pq_fuser` (the pixel quality fuser, which is a bitwise AND)
    fn from_str(s: &str) -> Result<Self> {
        match s.rsplit('.').next().unwrap_or(s) {
            "first_valid" => Ok(Self::FirstValid),
            "bitwise_and" | "ga_pq_fuser" => Ok(Self::BitwiseAnd),
            other => Err(StatsError::config(format!("unknown fuse_func '{other}'"))),
        }
    }
}

/// Dataset index lookups
pub trait Catalog: Send + Sync {
    /// All measurements a product declares
    fn measurements(&self, product: &str) -> Result<Vec<Measurement>>;

    /// Observations of `product` in `period`, split into grid cells
    fn list_cells(
        &self,
        product: &str,
        period: &TimePeriod,
        group_by: &str,
        grid: &GridSpec,
    ) -> Result<BTreeMap<TileIndex, SourceTile>>;

    /// Observations of `product` in `period` overlapping `geobox`
    fn find_region(
        &self,
        product: &str,
        period: &TimePeriod,
        group_by: &str,
        geobox: &GeoBox,
    ) -> Result<SourceTile>;
}

/// Raster decoding
pub trait RasterReader: Send + Sync {
    /// Load `bands` for `window` of every observation in `tile`
    ///
    /// The returned volume is unmasked, has one time slice per observation
    /// and tags every slice with source `0`.
    fn load(&self, tile: &SourceTile, window: &ChunkWindow, bands: &[String], fuse: Fuser) -> Result<Volume>;
}

/// Bit-flag decoding
pub trait MaskDecoder: Send + Sync {
    /// `true` where every requested flag has the requested value
    fn make_mask(&self, band: &Band, flags: &BTreeMap<String, FlagValue>) -> Result<Array3<bool>>;
}
