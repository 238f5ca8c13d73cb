//! NetCDF output: one file per output product
//!
//! Each file holds a single time step and every output variable of its
//! product on `(time, y, x)`, with coordinate variables, a `_FillValue` per
//! variable, storage chunking and optional zlib compression. Pixels that are
//! never written read back as the fill value.

use super::{check_write, not_open, prepare_output_path, unknown_target, OutputDriver};
use crate::config::StorageConfig;
use crate::dates::epoch_seconds;
use crate::errors::{Result, StatsError};
use crate::geometry::{is_geographic, ChunkWindow, GeoBox};
use crate::model::{DType, Measurement};
use crate::products::OutputProduct;
use crate::tasks::Task;
use ::netcdf::FileMut;
use chrono::Utc;
use ndarray::Array2;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const DIMENSIONS: [&str; 3] = ["time", "y", "x"];

/// Run `$body` with `$t` bound to the in-file type of `$dtype`
macro_rules! with_storage_type {
    ($dtype:expr, $t:ident => $body:block) => {
        match $dtype {
            DType::Int8 => {
                type $t = i8;
                $body
            }
            DType::Int16 => {
                type $t = i16;
                $body
            }
            DType::Int32 => {
                type $t = i32;
                $body
            }
            DType::UInt8 => {
                type $t = u8;
                $body
            }
            DType::UInt16 => {
                type $t = u16;
                $body
            }
            DType::Float32 => {
                type $t = f32;
                $body
            }
            DType::Float64 => {
                type $t = f64;
                $body
            }
        }
    };
}

struct ProductFile {
    path: PathBuf,
    file: FileMut,
    extent: (usize, usize),
    measurements: Vec<Measurement>,
}

/// Writes each output product of a task to its own NetCDF file
pub struct NetcdfDriver {
    storage: StorageConfig,
    location: PathBuf,
    files: BTreeMap<String, ProductFile>,
    paths: Vec<PathBuf>,
    is_open: bool,
}

impl NetcdfDriver {
    pub fn new(storage: StorageConfig, location: &Path) -> Self {
        Self {
            storage,
            location: location.to_path_buf(),
            files: BTreeMap::new(),
            paths: Vec::new(),
            is_open: false,
        }
    }

    /// Storage chunk sizes for `(time, y, x)`, clamped to the file extent
    fn chunking(&self, extent: (usize, usize)) -> Result<[usize; 3]> {
        let sizes = self.storage.chunk_sizes()?;
        let size_of = |dim: &str, len: usize| {
            self.storage
                .dimension_order
                .iter()
                .position(|d| d == dim)
                .map(|i| sizes[i].min(len.max(1)))
                .ok_or_else(|| {
                    StatsError::config(format!(
                        "storage dimension_order {:?} lacks '{dim}'",
                        self.storage.dimension_order
                    ))
                })
        };
        Ok([size_of("time", 1)?, size_of("y", extent.0)?, size_of("x", extent.1)?])
    }

    fn create_file(&self, product: &OutputProduct, task: &Task, geobox: &GeoBox) -> Result<ProductFile> {
        let path = prepare_output_path(&self.location, product, None, task)?;
        let extent = geobox.shape();
        let chunking = self.chunking(extent)?;

        let mut file = ::netcdf::create(&path)?;
        file.add_dimension("time", 1)?;
        file.add_dimension("y", extent.0)?;
        file.add_dimension("x", extent.1)?;

        {
            let mut var = file.add_variable::<f64>("time", &["time"])?;
            var.put_attribute("units", "seconds since 1970-01-01 00:00:00")?;
            var.put_attribute("calendar", "standard")?;
            var.put_values(&[epoch_seconds(&task.period.start)], ..)?;
        }
        let (y_units, x_units) = coordinate_units(&geobox.crs);
        for (name, units, coords) in [("y", y_units, geobox.y_coords()), ("x", x_units, geobox.x_coords())] {
            let mut var = file.add_variable::<f64>(name, &[name])?;
            var.put_attribute("units", units)?;
            var.put_values(&coords, ..)?;
        }

        for m in &product.measurements {
            with_storage_type!(m.dtype, T => {
                let mut var = file.add_variable::<T>(&m.name, &DIMENSIONS)?;
                var.set_chunking(&chunking)?;
                if let Some(level) = product.compression() {
                    var.set_compression(level, product.shuffle())?;
                }
                var.put_attribute("_FillValue", m.nodata as T)?;
                var.put_attribute("units", m.units.as_str())?;
                var.put_attribute("crs", geobox.crs.as_str())?;
                for (key, value) in &product.definition.attrs {
                    var.put_attribute(key, value.as_str())?;
                }
            });
        }

        let definition = serde_json::json!({
            "definition": product.definition,
            "measurements": product.measurements,
        });
        file.add_attribute("product_definition", definition.to_string())?;
        file.add_attribute("crs", geobox.crs.as_str())?;
        file.add_attribute("time_period", task.period.to_string())?;
        file.add_attribute(
            "history",
            format!("Created by stack-stats on {}", Utc::now().to_rfc3339()),
        )?;

        debug!(product = %product.name, path = %path.display(), variables = product.measurements.len(), "Created NetCDF output");
        Ok(ProductFile {
            path,
            file,
            extent,
            measurements: product.measurements.clone(),
        })
    }
}

/// Units of the `(y, x)` coordinate variables
fn coordinate_units(crs: &str) -> (&'static str, &'static str) {
    if is_geographic(crs) {
        ("degrees_north", "degrees_east")
    } else {
        ("metre", "metre")
    }
}

impl OutputDriver for NetcdfDriver {
    fn open(&mut self, task: &Task) -> Result<()> {
        if self.is_open {
            return Err(StatsError::Output("driver is already open".to_string()));
        }
        self.storage.chunk_sizes()?;
        let geobox = task.geobox()?;

        self.paths.clear();
        for product in task.products.iter() {
            let file = self.create_file(product, task, geobox)?;
            self.paths.push(file.path.clone());
            self.files.insert(product.name.clone(), file);
        }
        self.is_open = true;
        Ok(())
    }

    fn write(&mut self, product: &str, variable: &str, window: &ChunkWindow, values: &Array2<f64>) -> Result<()> {
        if !self.is_open {
            return Err(not_open());
        }
        let target = self
            .files
            .get_mut(product)
            .ok_or_else(|| unknown_target(product, variable))?;
        let m = target
            .measurements
            .iter()
            .find(|m| m.name == variable)
            .ok_or_else(|| unknown_target(product, variable))?;
        check_write(window, values, target.extent)?;

        {
            let mut var = target
                .file
                .variable_mut(variable)
                .ok_or_else(|| unknown_target(product, variable))?;
            let extents = (0..1, window.y.clone(), window.x.clone());
            with_storage_type!(m.dtype, T => {
                let buf: Vec<T> = values.iter().map(|&v| m.dtype.coerce(v, m.nodata) as T).collect();
                var.put_values(&buf, extents)?;
            });
        }
        target.file.sync()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.is_open {
            return Ok(());
        }
        self.is_open = false;

        let mut first_error = None;
        for (product, ProductFile { path, file, .. }) in std::mem::take(&mut self.files) {
            match file.close() {
                Ok(()) => info!(%product, path = %path.display(), "Closed NetCDF output"),
                Err(e) => {
                    warn!(%product, path = %path.display(), error = %e, "Failed to close NetCDF output");
                    first_error.get_or_insert(StatsError::from(e));
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn output_paths(&self) -> Vec<PathBuf> {
        self.paths.clone()
    }
}

impl Drop for NetcdfDriver {
    fn drop(&mut self) {
        if self.is_open {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_units_follow_crs() {
        assert_eq!(coordinate_units("EPSG:4326"), ("degrees_north", "degrees_east"));
        assert_eq!(coordinate_units("EPSG:3577"), ("metre", "metre"));
    }
}
