//! A YAML file index usable as the run's [`Catalog`]
//!
//! ```yaml
//! products:
//!   ls8_nbar_albers:
//!     measurements:
//!       - {name: red, dtype: int16, nodata: -999}
//!       - {name: nir, dtype: int16, nodata: -999}
//!   ls8_pq_albers:
//!     measurements:
//!       - {name: pixelquality, dtype: int16, nodata: 0}
//!     flags_definition:
//!       pixelquality:
//!         contiguous: {bits: 8, values: {0: false, 1: true}}
//! observations:
//!   - product: ls8_nbar_albers
//!     time: 2015-03-01T00:12:00Z
//!     path: nbar/LS8_15_-40_20150301.nc
//!     tile: {x: 15, y: -40}
//! ```
//!
//! Relative observation paths are resolved against the index file's
//! directory. Observations need a `tile` to be found by grid queries and
//! may carry `bounds` to be filtered by region queries.

use crate::dates::TimePeriod;
use crate::errors::{Result, StatsError};
use crate::geometry::{Bounds, GeoBox, GridSpec, TileIndex};
use crate::masking::{FlagMaskDecoder, FlagsDefinition};
use crate::model::Measurement;
use crate::netcdf_io::NetcdfReader;
use crate::sources::{Catalog, Observation, SourceTile};
use chrono::{DateTime, NaiveTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Declarations of one indexed product
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProductEntry {
    pub measurements: Vec<Measurement>,
    /// Flag definitions per quality measurement
    #[serde(default)]
    pub flags_definition: BTreeMap<String, FlagsDefinition>,
}

/// One indexed dataset file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObservationEntry {
    pub product: String,
    pub time: DateTime<Utc>,
    pub path: PathBuf,
    #[serde(default)]
    pub tile: Option<TileIndex>,
    #[serde(default)]
    pub bounds: Option<Bounds>,
}

/// How observations are merged into time slices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupBy {
    /// Identical timestamps
    Time,
    /// Same UTC calendar day, stamped at midnight
    SolarDay,
}

impl GroupBy {
    fn parse(name: &str) -> Result<Self> {
        match name {
            "time" => Ok(Self::Time),
            "solar_day" => Ok(Self::SolarDay),
            other => Err(StatsError::config(format!("unknown group_by '{other}'"))),
        }
    }

    /// Timestamp of the group holding an observation taken at `t`
    fn group_time(self, t: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Time => t,
            Self::SolarDay => t.date_naive().and_time(NaiveTime::MIN).and_utc(),
        }
    }
}

/// In-memory catalog of dataset files
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileIndex {
    pub products: BTreeMap<String, ProductEntry>,
    #[serde(default)]
    pub observations: Vec<ObservationEntry>,
}

impl FileIndex {
    /// Parse an index document; relative paths are resolved against `base`
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the document is malformed or an
    /// observation names an unknown product.
    pub fn from_yaml_str(document: &str, base: &Path) -> Result<Self> {
        let mut index: Self = serde_yaml::from_str(document)?;
        for observation in &mut index.observations {
            if !index.products.contains_key(&observation.product) {
                return Err(StatsError::config(format!(
                    "observation {} refers to unknown product '{}'",
                    observation.path.display(),
                    observation.product
                )));
            }
            if observation.path.is_relative() {
                observation.path = base.join(&observation.path);
            }
        }
        index.observations.sort_by_key(|o| o.time);
        Ok(index)
    }

    /// Read an index file
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or a configuration
    /// error if it is invalid.
    pub fn from_path(path: &Path) -> Result<Self> {
        let document = std::fs::read_to_string(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let index = Self::from_yaml_str(&document, base)?;
        debug!(
            path = %path.display(),
            products = index.products.len(),
            observations = index.observations.len(),
            "Loaded file index"
        );
        Ok(index)
    }

    /// Measurement lists of every product
    #[must_use]
    pub fn product_measurements(&self) -> BTreeMap<String, Vec<Measurement>> {
        self.products
            .iter()
            .map(|(name, product)| (name.clone(), product.measurements.clone()))
            .collect()
    }

    /// Reader for the indexed files
    #[must_use]
    pub fn reader(&self) -> NetcdfReader {
        NetcdfReader::new(self.product_measurements())
    }

    /// Mask decoder for every flag definition in the index
    #[must_use]
    pub fn mask_decoder(&self) -> FlagMaskDecoder {
        let mut decoder = FlagMaskDecoder::default();
        for product in self.products.values() {
            for (measurement, flags) in &product.flags_definition {
                decoder.insert(measurement.clone(), flags.clone());
            }
        }
        decoder
    }

    fn product(&self, name: &str) -> Result<&ProductEntry> {
        self.products
            .get(name)
            .ok_or_else(|| StatsError::config(format!("product '{name}' is not in the file index")))
    }

    fn matching<'a>(
        &'a self,
        product: &'a str,
        period: &'a TimePeriod,
    ) -> impl Iterator<Item = &'a ObservationEntry> + 'a {
        self.observations
            .iter()
            .filter(move |o| o.product == product && period.contains(&o.time))
    }
}

/// Merge observations into time-sorted groups
///
/// A group's time depends only on its key, so products grouped the same way
/// line up slice for slice whatever order their scenes were indexed in.
fn group<'a>(entries: impl IntoIterator<Item = &'a ObservationEntry>, group_by: GroupBy) -> Vec<Observation> {
    let mut groups: BTreeMap<DateTime<Utc>, Vec<PathBuf>> = BTreeMap::new();
    for entry in entries {
        groups
            .entry(group_by.group_time(entry.time))
            .or_default()
            .push(entry.path.clone());
    }
    groups
        .into_iter()
        .map(|(time, paths)| Observation { time, paths })
        .collect()
}

impl Catalog for FileIndex {
    fn measurements(&self, product: &str) -> Result<Vec<Measurement>> {
        Ok(self.product(product)?.measurements.clone())
    }

    fn list_cells(
        &self,
        product: &str,
        period: &TimePeriod,
        group_by: &str,
        grid: &GridSpec,
    ) -> Result<BTreeMap<TileIndex, SourceTile>> {
        self.product(product)?;
        let group_by = GroupBy::parse(group_by)?;

        let mut by_tile: BTreeMap<TileIndex, Vec<&ObservationEntry>> = BTreeMap::new();
        for entry in self.matching(product, period) {
            match entry.tile {
                Some(tile) => by_tile.entry(tile).or_default().push(entry),
                None => warn!(path = %entry.path.display(), "Observation without tile ignored by grid query"),
            }
        }

        Ok(by_tile
            .into_iter()
            .map(|(tile, entries)| {
                let source = SourceTile {
                    product: product.to_string(),
                    geobox: grid.tile_geobox(tile),
                    observations: group(entries, group_by),
                };
                (tile, source)
            })
            .collect())
    }

    fn find_region(
        &self,
        product: &str,
        period: &TimePeriod,
        group_by: &str,
        geobox: &GeoBox,
    ) -> Result<SourceTile> {
        self.product(product)?;
        let group_by = GroupBy::parse(group_by)?;
        let region = geobox.bounds();

        let entries = self
            .matching(product, period)
            .filter(|o| o.bounds.map_or(true, |b| b.intersects(&region)));
        Ok(SourceTile {
            product: product.to_string(),
            geobox: geobox.clone(),
            observations: group(entries, group_by),
        })
    }
}
