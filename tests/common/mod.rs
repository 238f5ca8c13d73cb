//! Shared fixtures: in-memory catalog and reader, volumes and configurations

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use ndarray::{s, Array2, Array3, Axis};
use stack_stats::config::{FlagValue, StatsConfig};
use stack_stats::dates::TimePeriod;
use stack_stats::errors::{Result, StatsError};
use stack_stats::geometry::{ChunkWindow, GeoBox, GeoTransform, GridSpec, Resolution, TileIndex};
use stack_stats::model::{Band, DType, Measurement, Volume};
use stack_stats::sources::{Catalog, Fuser, MaskDecoder, Observation, RasterReader, SourceTile};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub fn utc(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

pub fn geobox(width: usize, height: usize) -> GeoBox {
    GeoBox::new(
        width,
        height,
        GeoTransform {
            x_origin: 0.0,
            y_origin: height as f64 * 25.0,
            resolution: Resolution { x: 25.0, y: -25.0 },
        },
        "EPSG:3577",
    )
}

pub fn int16(name: &str) -> Measurement {
    Measurement::new(name, DType::Int16, -999.0, "1")
}

/// Volume with one `(time, y, x)` array per band, all from source 0
pub fn volume(bands: Vec<(&str, Array3<f32>)>, masked: bool) -> Volume {
    let (t, h, w) = bands[0].1.dim();
    let times = (0..t).map(|i| utc(2015, 1, 1 + i as u32)).collect();
    let bands = bands
        .into_iter()
        .map(|(name, data)| Band {
            measurement: int16(name),
            data,
        })
        .collect();
    Volume::new(times, vec![0; t], geobox(w, h), bands, masked).unwrap()
}

/// Stack a per-pixel time series into a `(t, 1, 1)` array
pub fn series(values: &[f32]) -> Array3<f32> {
    Array3::from_shape_vec((values.len(), 1, 1), values.to_vec()).unwrap()
}

/// Catalog holding fixed tiles per product
#[derive(Default)]
pub struct MemoryCatalog {
    pub measurements: BTreeMap<String, Vec<Measurement>>,
    pub tiles: BTreeMap<String, BTreeMap<TileIndex, SourceTile>>,
}

impl MemoryCatalog {
    pub fn with_product(mut self, product: &str, measurements: Vec<Measurement>) -> Self {
        self.measurements.insert(product.to_string(), measurements);
        self
    }

    pub fn with_tile(mut self, tile_index: TileIndex, tile: SourceTile) -> Self {
        self.tiles
            .entry(tile.product.clone())
            .or_default()
            .insert(tile_index, tile);
        self
    }
}

impl Catalog for MemoryCatalog {
    fn measurements(&self, product: &str) -> Result<Vec<Measurement>> {
        self.measurements
            .get(product)
            .cloned()
            .ok_or_else(|| StatsError::Configuration(format!("unknown product {product}")))
    }

    fn list_cells(
        &self,
        product: &str,
        period: &TimePeriod,
        _group_by: &str,
        _grid: &GridSpec,
    ) -> Result<BTreeMap<TileIndex, SourceTile>> {
        Ok(self
            .tiles
            .get(product)
            .into_iter()
            .flatten()
            .filter_map(|(index, tile)| {
                let observations: Vec<Observation> = tile
                    .observations
                    .iter()
                    .filter(|o| period.contains(&o.time))
                    .cloned()
                    .collect();
                (!observations.is_empty()).then(|| {
                    (
                        *index,
                        SourceTile {
                            observations,
                            ..tile.clone()
                        },
                    )
                })
            })
            .collect())
    }

    fn find_region(
        &self,
        product: &str,
        period: &TimePeriod,
        _group_by: &str,
        geobox: &GeoBox,
    ) -> Result<SourceTile> {
        let observations = self
            .tiles
            .get(product)
            .into_iter()
            .flat_map(|tiles| tiles.values())
            .flat_map(|tile| tile.observations.iter())
            .filter(|o| period.contains(&o.time))
            .cloned()
            .collect();
        Ok(SourceTile {
            product: product.to_string(),
            geobox: geobox.clone(),
            observations,
        })
    }
}

/// Reader serving full-extent arrays keyed by file path and band
#[derive(Default)]
pub struct MemoryReader {
    pub measurements: BTreeMap<String, Vec<Measurement>>,
    pub files: BTreeMap<(PathBuf, String), Array2<f32>>,
}

impl MemoryReader {
    pub fn with_product(mut self, product: &str, measurements: Vec<Measurement>) -> Self {
        self.measurements.insert(product.to_string(), measurements);
        self
    }

    pub fn with_file(mut self, path: &str, band: &str, values: Array2<f32>) -> Self {
        self.files.insert((PathBuf::from(path), band.to_string()), values);
        self
    }
}

impl RasterReader for MemoryReader {
    fn load(&self, tile: &SourceTile, window: &ChunkWindow, bands: &[String], fuse: Fuser) -> Result<Volume> {
        let times: Vec<DateTime<Utc>> = tile.times().collect();
        let mut loaded = Vec::new();
        for name in bands {
            let measurement = self
                .measurements
                .get(&tile.product)
                .and_then(|ms| ms.iter().find(|m| &m.name == name))
                .cloned()
                .ok_or_else(|| StatsError::BandNotFound {
                    band: name.clone(),
                    source_name: tile.product.clone(),
                })?;
            let nodata = measurement.nodata as f32;
            let mut data = Array3::from_elem((times.len(), window.height(), window.width()), nodata);
            for (mut slice, observation) in data.axis_iter_mut(Axis(0)).zip(&tile.observations) {
                for (i, path) in observation.paths.iter().enumerate() {
                    let full = self.file(path, name)?;
                    let part = full.slice(s![window.y.clone(), window.x.clone()]);
                    if i == 0 {
                        slice.assign(&part);
                    } else {
                        fuse.fuse(slice.view_mut(), part, nodata);
                    }
                }
            }
            loaded.push(Band { measurement, data });
        }
        let sources = vec![0; times.len()];
        Volume::new(times, sources, tile.geobox.window(window)?, loaded, false)
    }
}

impl MemoryReader {
    fn file(&self, path: &Path, band: &str) -> Result<&Array2<f32>> {
        self.files
            .get(&(path.to_path_buf(), band.to_string()))
            .ok_or_else(|| StatsError::BandNotFound {
                band: band.to_string(),
                source_name: path.display().to_string(),
            })
    }
}

/// Decoder treating a mask band value of 1 as valid
pub struct ValueMaskDecoder;

impl MaskDecoder for ValueMaskDecoder {
    fn make_mask(&self, band: &Band, _flags: &BTreeMap<String, FlagValue>) -> Result<Array3<bool>> {
        Ok(band.data.mapv(|v| v == 1.0))
    }
}

pub fn observation(time: DateTime<Utc>, path: &str) -> Observation {
    Observation {
        time,
        paths: vec![PathBuf::from(path)],
    }
}

pub fn tile(product: &str, geobox: GeoBox, observations: Vec<Observation>) -> SourceTile {
    SourceTile {
        product: product.to_string(),
        geobox,
        observations,
    }
}

/// Grid-mode configuration over 2015-2017 with yearly periods
pub fn grid_config(location: &Path, driver: &str, products: &str) -> StatsConfig {
    let document = format!(
        "
location: {location}
start_date: 2015-01-01
end_date: 2017-01-01
stats_duration: 1y
step_size: 1y
storage:
  driver: {driver}
  crs: EPSG:3577
  tile_size: {{x: 100.0, y: 100.0}}
  resolution: {{x: 25, y: -25}}
  chunking: {{x: 2, y: 2, time: 1}}
  dimension_order: [time, y, x]
computation:
  chunking: {{x: 3, y: 3}}
sources:
  - product: nbar
    measurements: [red, nir]
output_products:
{products}
",
        location = location.display(),
    );
    StatsConfig::from_yaml_str(&document).unwrap()
}
