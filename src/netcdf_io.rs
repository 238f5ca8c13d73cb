//! NetCDF input: reading chunk windows of observation files
//!
//! Each observation file covers exactly the pixel grid of the tile it is
//! listed under. Bands are stored either as `(y, x)` or as `(time, y, x)`
//! with a single time step; only the requested window is read.

use crate::errors::{Result, StatsError};
use crate::geometry::ChunkWindow;
use crate::model::{Band, Measurement, Volume};
use crate::sources::{Fuser, RasterReader, SourceTile};
use ndarray::{Array2, Array3, Axis};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::trace;

/// Read one band window from a NetCDF file as `f32`
///
/// # Errors
///
/// Returns [`StatsError::BandNotFound`] if the variable is absent, a data
/// error if its layout does not match `extent`, or the NetCDF error.
pub fn read_window(path: &Path, band: &str, window: &ChunkWindow, extent: (usize, usize)) -> Result<Array2<f32>> {
    let file = ::netcdf::open(path)?;
    let var = file.variable(band).ok_or_else(|| StatsError::BandNotFound {
        band: band.to_string(),
        source_name: path.display().to_string(),
    })?;

    let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
    let spatial = &shape[shape.len().saturating_sub(2)..];
    if spatial != [extent.0, extent.1] {
        return Err(StatsError::data(format!(
            "'{band}' in {} has shape {shape:?}, expected a {}x{} grid",
            path.display(),
            extent.0,
            extent.1
        )));
    }

    let (y, x) = (window.y.clone(), window.x.clone());
    let values: Vec<f32> = match shape.len() {
        2 => var.get_values::<f32, _>((y, x))?,
        3 if shape[0] == 1 => var.get_values::<f32, _>((0..1, y, x))?,
        _ => {
            return Err(StatsError::data(format!(
                "'{band}' in {} must be (y, x) or (time=1, y, x), found shape {shape:?}",
                path.display()
            )))
        }
    };
    Ok(Array2::from_shape_vec((window.height(), window.width()), values)?)
}

/// [`RasterReader`] over NetCDF observation files
///
/// Band declarations come from the product measurement lists given at
/// construction.
#[derive(Debug, Clone, Default)]
pub struct NetcdfReader {
    measurements: BTreeMap<String, Vec<Measurement>>,
}

impl NetcdfReader {
    #[must_use]
    pub fn new(measurements: BTreeMap<String, Vec<Measurement>>) -> Self {
        Self { measurements }
    }

    fn measurement(&self, product: &str, band: &str) -> Result<&Measurement> {
        self.measurements
            .get(product)
            .and_then(|ms| ms.iter().find(|m| m.name == band))
            .ok_or_else(|| StatsError::BandNotFound {
                band: band.to_string(),
                source_name: format!("product '{product}'"),
            })
    }
}

impl RasterReader for NetcdfReader {
    fn load(&self, tile: &SourceTile, window: &ChunkWindow, bands: &[String], fuse: Fuser) -> Result<Volume> {
        let extent = tile.geobox.shape();
        let geobox = tile.geobox.window(window)?;
        let times = tile.times().collect::<Vec<_>>();

        let bands = bands
            .iter()
            .map(|name| -> Result<Band> {
                let measurement = self.measurement(&tile.product, name)?.clone();
                let nodata = measurement.nodata as f32;
                let mut data = Array3::from_elem((times.len(), window.height(), window.width()), nodata);

                for (mut slice, observation) in data.axis_iter_mut(Axis(0)).zip(&tile.observations) {
                    for (i, path) in observation.paths.iter().enumerate() {
                        let values = read_window(path, name, window, extent)?;
                        if i == 0 {
                            slice.assign(&values);
                        } else {
                            fuse.fuse(slice.view_mut(), values.view(), nodata);
                        }
                    }
                }
                trace!(product = %tile.product, band = %name, slices = times.len(), %window, "Read band");
                Ok(Band { measurement, data })
            })
            .collect::<Result<Vec<_>>>()?;

        let sources = vec![0; times.len()];
        Volume::new(times, sources, geobox, bands, false)
    }
}
