//! GeoTIFF output: one single-band file per output variable
//!
//! TIFF strips cannot be rewritten in place, so each variable is composed in
//! a full-extent buffer filled with its no-data value and encoded when the
//! driver is closed. Buffers hold the variable's storage type, so an open
//! driver needs `width * height * size_of(dtype)` bytes per output variable
//! of the task. Georeferencing uses the GeoTIFF pixel scale and tie point
//! tags, a GeoKey directory for `EPSG:<code>` CRSs and the GDAL no-data tag.

use super::{check_write, not_open, prepare_output_path, unknown_target, OutputDriver};
use crate::config::StorageConfig;
use crate::errors::{Result, StatsError};
use crate::geometry::{epsg_code, is_geographic, ChunkWindow, GeoBox};
use crate::model::{DType, Measurement};
use crate::tasks::Task;
use ndarray::{s, Array2, Zip};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tiff::encoder::colortype::{self, ColorType};
use tiff::encoder::{TiffEncoder, TiffValue};
use tiff::tags::Tag;
use tracing::{debug, info, warn};

/// Full-extent pixels of one variable in its storage type
enum Raster {
    I8(Array2<i8>),
    I16(Array2<i16>),
    I32(Array2<i32>),
    U8(Array2<u8>),
    U16(Array2<u16>),
    F32(Array2<f32>),
    F64(Array2<f64>),
}

impl Raster {
    fn filled(m: &Measurement, shape: (usize, usize)) -> Self {
        let nodata = m.dtype.coerce(m.nodata, m.nodata);
        match m.dtype {
            DType::Int8 => Self::I8(Array2::from_elem(shape, nodata as i8)),
            DType::Int16 => Self::I16(Array2::from_elem(shape, nodata as i16)),
            DType::Int32 => Self::I32(Array2::from_elem(shape, nodata as i32)),
            DType::UInt8 => Self::U8(Array2::from_elem(shape, nodata as u8)),
            DType::UInt16 => Self::U16(Array2::from_elem(shape, nodata as u16)),
            DType::Float32 => Self::F32(Array2::from_elem(shape, nodata as f32)),
            DType::Float64 => Self::F64(Array2::from_elem(shape, nodata)),
        }
    }

    fn assign(&mut self, window: &ChunkWindow, values: &Array2<f64>, m: &Measurement) {
        let cast = |v: f64| m.dtype.coerce(v, m.nodata);
        match self {
            Self::I8(b) => assign_window(b, window, values, |v| cast(v) as i8),
            Self::I16(b) => assign_window(b, window, values, |v| cast(v) as i16),
            Self::I32(b) => assign_window(b, window, values, |v| cast(v) as i32),
            Self::U8(b) => assign_window(b, window, values, |v| cast(v) as u8),
            Self::U16(b) => assign_window(b, window, values, |v| cast(v) as u16),
            Self::F32(b) => assign_window(b, window, values, |v| cast(v) as f32),
            Self::F64(b) => assign_window(b, window, values, cast),
        }
    }
}

fn assign_window<T>(buffer: &mut Array2<T>, window: &ChunkWindow, values: &Array2<f64>, cast: impl Fn(f64) -> T) {
    let mut target = buffer.slice_mut(s![window.y.clone(), window.x.clone()]);
    Zip::from(&mut target).and(values).for_each(|t, &v| *t = cast(v));
}

fn pixels<T>(buffer: &Array2<T>) -> Result<&[T]> {
    buffer
        .as_slice()
        .ok_or_else(|| StatsError::Output("raster buffer is not in row-major order".to_string()))
}

struct VariableImage {
    path: PathBuf,
    measurement: Measurement,
    geobox: GeoBox,
    raster: Raster,
}

/// Writes each output variable of a task to its own GeoTIFF
pub struct GeoTiffDriver {
    storage: StorageConfig,
    location: PathBuf,
    /// Keyed by `(product, variable)`
    images: BTreeMap<(String, String), VariableImage>,
    paths: Vec<PathBuf>,
    is_open: bool,
}

impl GeoTiffDriver {
    pub fn new(storage: StorageConfig, location: &Path) -> Self {
        Self {
            storage,
            location: location.to_path_buf(),
            images: BTreeMap::new(),
            paths: Vec::new(),
            is_open: false,
        }
    }
}

impl OutputDriver for GeoTiffDriver {
    fn open(&mut self, task: &Task) -> Result<()> {
        if self.is_open {
            return Err(StatsError::Output("driver is already open".to_string()));
        }
        self.storage.chunk_sizes()?;
        let geobox = task.geobox()?;

        self.paths.clear();
        for product in task.products.iter() {
            for m in &product.measurements {
                let path = prepare_output_path(&self.location, product, Some(&m.name), task)?;
                // Empty until close
                File::create(&path)?;
                debug!(product = %product.name, variable = %m.name, path = %path.display(), "Created GeoTIFF output");
                self.paths.push(path.clone());
                self.images.insert(
                    (product.name.clone(), m.name.clone()),
                    VariableImage {
                        path,
                        measurement: m.clone(),
                        geobox: geobox.clone(),
                        raster: Raster::filled(m, geobox.shape()),
                    },
                );
            }
        }
        self.is_open = true;
        Ok(())
    }

    fn write(&mut self, product: &str, variable: &str, window: &ChunkWindow, values: &Array2<f64>) -> Result<()> {
        if !self.is_open {
            return Err(not_open());
        }
        let image = self
            .images
            .get_mut(&(product.to_string(), variable.to_string()))
            .ok_or_else(|| unknown_target(product, variable))?;
        check_write(window, values, image.geobox.shape())?;

        image.raster.assign(window, values, &image.measurement);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.is_open {
            return Ok(());
        }
        self.is_open = false;

        let mut first_error = None;
        for (_, image) in std::mem::take(&mut self.images) {
            match encode(&image) {
                Ok(()) => info!(path = %image.path.display(), "Wrote GeoTIFF output"),
                Err(e) => {
                    warn!(path = %image.path.display(), error = %e, "Failed to write GeoTIFF output");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn output_paths(&self) -> Vec<PathBuf> {
        self.paths.clone()
    }
}

impl Drop for GeoTiffDriver {
    fn drop(&mut self) {
        if self.is_open {
            let _ = self.close();
        }
    }
}

fn encode(image: &VariableImage) -> Result<()> {
    match &image.raster {
        Raster::I8(b) => write_tiff::<colortype::GrayI8>(image, pixels(b)?),
        Raster::I16(b) => write_tiff::<colortype::GrayI16>(image, pixels(b)?),
        Raster::I32(b) => write_tiff::<colortype::GrayI32>(image, pixels(b)?),
        Raster::U8(b) => write_tiff::<colortype::Gray8>(image, pixels(b)?),
        Raster::U16(b) => write_tiff::<colortype::Gray16>(image, pixels(b)?),
        Raster::F32(b) => write_tiff::<colortype::Gray32Float>(image, pixels(b)?),
        Raster::F64(b) => write_tiff::<colortype::Gray64Float>(image, pixels(b)?),
    }
}

fn write_tiff<CT>(image: &VariableImage, data: &[CT::Inner]) -> Result<()>
where
    CT: ColorType,
    [CT::Inner]: TiffValue,
{
    let geobox = &image.geobox;
    let t = &geobox.transform;
    let (width, height) = (to_u32(geobox.width)?, to_u32(geobox.height)?);

    let file = BufWriter::new(File::create(&image.path)?);
    let mut encoder = TiffEncoder::new(file)?;
    let mut tiff = encoder.new_image::<CT>(width, height)?;

    let scale = [t.resolution.x.abs(), t.resolution.y.abs(), 0.0];
    tiff.encoder().write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
    let tiepoint = [0.0, 0.0, 0.0, t.x_origin, t.y_origin, 0.0];
    tiff.encoder().write_tag(Tag::ModelTiepointTag, &tiepoint[..])?;
    if let Some(keys) = geo_key_directory(&geobox.crs) {
        tiff.encoder().write_tag(Tag::GeoKeyDirectoryTag, &keys[..])?;
    } else {
        debug!(crs = %geobox.crs, "CRS has no EPSG code, GeoKey directory omitted");
    }
    let nodata = image.measurement.nodata.to_string();
    tiff.encoder().write_tag(Tag::GdalNodata, nodata.as_str())?;

    tiff.write_data(data)?;
    Ok(())
}

fn to_u32(n: usize) -> Result<u32> {
    u32::try_from(n).map_err(|_| StatsError::Output(format!("raster dimension {n} is too large for TIFF")))
}

/// GeoKey directory declaring an `EPSG:<code>` CRS, pixel-is-area
fn geo_key_directory(crs: &str) -> Option<Vec<u16>> {
    let code = u16::try_from(epsg_code(crs)?).ok()?;
    let (model_type, crs_key) = if is_geographic(crs) { (2, 2048) } else { (1, 3072) };
    Some(vec![
        1, 1, 0, 3, // version, revision, minor revision, key count
        1024, 0, 1, model_type, // GTModelTypeGeoKey
        1025, 0, 1, 1, // GTRasterTypeGeoKey: pixel is area
        crs_key, 0, 1, code,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geo_keys_for_epsg_codes() {
        let keys = geo_key_directory("EPSG:3577").unwrap();
        assert_eq!(&keys[12..], &[3072, 0, 1, 3577]);
        let keys = geo_key_directory("EPSG:4326").unwrap();
        assert_eq!(keys[7], 2);
        assert_eq!(keys[12], 2048);
        assert!(geo_key_directory("+proj=longlat").is_none());
    }

    #[test]
    fn raster_keeps_storage_type() {
        let m = Measurement::new("count", DType::Int16, -1.0, "1");
        let mut raster = Raster::filled(&m, (2, 3));
        let values = Array2::from_shape_vec((1, 2), vec![2.6, f64::NAN]).unwrap();
        raster.assign(&ChunkWindow::new(1..2, 1..3), &values, &m);

        let Raster::I16(pixels) = raster else {
            panic!("int16 variables are buffered as i16");
        };
        assert_eq!(pixels.as_slice().unwrap(), &[-1, -1, -1, -1, 3, -1]);
    }
}
