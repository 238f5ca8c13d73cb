//! Output drivers
//!
//! A driver owns the files of one task. It is opened once with the task,
//! receives each chunk result variable by variable, and is closed when the
//! task ends, successfully or not:
//!
//! ```text
//! Closed --open(task)--> Open --write(..)*--> Open --close()--> Closed
//! ```
//!
//! - [`netcdf`]: one multi-variable NetCDF file per output product
//! - [`geotiff`]: one single-band GeoTIFF per output variable
//! - [`template`]: output file path templates

pub mod geotiff;
pub mod netcdf;
pub mod template;

use crate::config::{DriverKind, StorageConfig};
use crate::errors::{Result, StatsError};
use crate::geometry::ChunkWindow;
use crate::products::OutputProduct;
use crate::tasks::Task;
use ndarray::Array2;
use std::fs;
use std::path::{Path, PathBuf};

pub use self::geotiff::GeoTiffDriver;
pub use self::netcdf::NetcdfDriver;

/// Sink for the results of one task
pub trait OutputDriver: Send {
    /// Create every output file of `task`
    ///
    /// # Errors
    ///
    /// Fails before any data is computed if the storage settings are
    /// inconsistent or a file cannot be created.
    fn open(&mut self, task: &Task) -> Result<()>;

    /// Overwrite `window` of one output variable
    ///
    /// `values` is shaped like the window; `NaN` marks no data.
    fn write(&mut self, product: &str, variable: &str, window: &ChunkWindow, values: &Array2<f64>) -> Result<()>;

    /// Finalise and release every file; closing a closed driver is a no-op
    fn close(&mut self) -> Result<()>;

    /// Files created by the last `open`
    fn output_paths(&self) -> Vec<PathBuf>;
}

/// Driver for the configured storage
#[must_use]
pub fn create_driver(storage: &StorageConfig, location: &Path) -> Box<dyn OutputDriver> {
    match storage.driver {
        DriverKind::NetcdfCf => Box::new(NetcdfDriver::new(storage.clone(), location)),
        DriverKind::Geotiff => Box::new(GeoTiffDriver::new(storage.clone(), location)),
    }
}

/// Resolve a product's path template for a task and make room for the file
///
/// Missing parent directories are created and an existing file is removed.
pub(crate) fn prepare_output_path(
    location: &Path,
    product: &OutputProduct,
    var_name: Option<&str>,
    task: &Task,
) -> Result<PathBuf> {
    let relative = template::render(
        &product.definition.file_path_template,
        &product.name,
        var_name,
        &task.template_context(),
    )?;
    let path = location.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if path.exists() {
        fs::remove_file(&path)?;
    }
    Ok(path)
}

/// Check that a chunk result matches its window and lies within the extent
pub(crate) fn check_write(window: &ChunkWindow, values: &Array2<f64>, extent: (usize, usize)) -> Result<()> {
    window.check_within(extent.0, extent.1)?;
    if values.dim() != (window.height(), window.width()) {
        return Err(StatsError::compute(format!(
            "values of shape {:?} do not fit window {window}",
            values.dim()
        )));
    }
    Ok(())
}

pub(crate) fn not_open() -> StatsError {
    StatsError::Output("driver is not open".to_string())
}

pub(crate) fn unknown_target(product: &str, variable: &str) -> StatsError {
    StatsError::config(format!("no output variable '{variable}' in product '{product}'"))
}
