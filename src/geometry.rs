//! Spatial extents, grid tiles and chunk windows
//!
//! A [`GeoBox`] describes the pixel grid of a task: its size, an axis-aligned
//! affine transform and a coordinate reference system. Tasks are split into
//! [`ChunkWindow`]s, rectangular pixel ranges processed one at a time.

use crate::errors::{Result, StatsError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Index of a cell in a regular spatial grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileIndex {
    pub x: i32,
    pub y: i32,
}

impl TileIndex {
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Pixel size in CRS units; `y` is usually negative (north-up rasters)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub x: f64,
    pub y: f64,
}

/// Axis-aligned affine transform from pixel to CRS coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    /// CRS x coordinate of the left edge of column 0
    pub x_origin: f64,
    /// CRS y coordinate of the top edge of row 0
    pub y_origin: f64,
    pub resolution: Resolution,
}

/// Pixel grid of a raster: size, transform and coordinate reference system
#[derive(Debug, Clone, PartialEq)]
pub struct GeoBox {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub crs: String,
}

impl GeoBox {
    #[must_use]
    pub fn new(width: usize, height: usize, transform: GeoTransform, crs: impl Into<String>) -> Self {
        Self {
            width,
            height,
            transform,
            crs: crs.into(),
        }
    }

    /// Build the pixel grid covering a bounding box at the given resolution
    ///
    /// The box is snapped outwards to whole pixels.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty box or zero resolution.
    pub fn from_bounds(bounds: &Bounds, resolution: Resolution, crs: &str) -> Result<Self> {
        if resolution.x == 0.0 || resolution.y == 0.0 {
            return Err(StatsError::config("resolution must be non-zero"));
        }
        if bounds.left >= bounds.right || bounds.bottom >= bounds.top {
            return Err(StatsError::config(format!("empty region {bounds:?}")));
        }

        let width = ((bounds.right - bounds.left) / resolution.x.abs()).ceil() as usize;
        let height = ((bounds.top - bounds.bottom) / resolution.y.abs()).ceil() as usize;
        let x_origin = if resolution.x > 0.0 { bounds.left } else { bounds.right };
        let y_origin = if resolution.y < 0.0 { bounds.top } else { bounds.bottom };

        Ok(Self::new(
            width,
            height,
            GeoTransform {
                x_origin,
                y_origin,
                resolution,
            },
            crs,
        ))
    }

    /// Number of pixels `(height, width)`
    #[must_use]
    pub const fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// CRS x coordinates of pixel centres
    #[must_use]
    pub fn x_coords(&self) -> Vec<f64> {
        let t = &self.transform;
        (0..self.width)
            .map(|i| t.x_origin + (i as f64 + 0.5) * t.resolution.x)
            .collect()
    }

    /// CRS y coordinates of pixel centres
    #[must_use]
    pub fn y_coords(&self) -> Vec<f64> {
        let t = &self.transform;
        (0..self.height)
            .map(|j| t.y_origin + (j as f64 + 0.5) * t.resolution.y)
            .collect()
    }

    /// The sub-grid covered by `window`
    ///
    /// # Errors
    ///
    /// Returns a compute error if the window is outside this grid.
    pub fn window(&self, window: &ChunkWindow) -> Result<Self> {
        window.check_within(self.height, self.width)?;
        let t = &self.transform;
        Ok(Self::new(
            window.width(),
            window.height(),
            GeoTransform {
                x_origin: t.x_origin + window.x.start as f64 * t.resolution.x,
                y_origin: t.y_origin + window.y.start as f64 * t.resolution.y,
                resolution: t.resolution,
            },
            self.crs.clone(),
        ))
    }

    /// Window covering the whole grid
    #[must_use]
    pub fn full_window(&self) -> ChunkWindow {
        ChunkWindow::new(0..self.height, 0..self.width)
    }

    /// Outer edges of the grid in CRS units
    #[must_use]
    pub fn bounds(&self) -> Bounds {
        let t = &self.transform;
        let x_end = t.x_origin + self.width as f64 * t.resolution.x;
        let y_end = t.y_origin + self.height as f64 * t.resolution.y;
        Bounds {
            left: t.x_origin.min(x_end),
            right: t.x_origin.max(x_end),
            bottom: t.y_origin.min(y_end),
            top: t.y_origin.max(y_end),
        }
    }
}

/// Numeric code of an `EPSG:<code>` CRS
#[must_use]
pub fn epsg_code(crs: &str) -> Option<u32> {
    crs.strip_prefix("EPSG:")
        .or_else(|| crs.strip_prefix("epsg:"))?
        .parse()
        .ok()
}

/// Whether the CRS has angular axes
///
/// EPSG codes 4000-4999 are treated as geographic, everything else as
/// projected.
#[must_use]
pub fn is_geographic(crs: &str) -> bool {
    epsg_code(crs).is_some_and(|code| (4000..5000).contains(&code))
}

/// Bounding box in CRS units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl Bounds {
    /// Whether the two boxes share any area
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.left < other.right && other.left < self.right && self.bottom < other.top && other.bottom < self.top
    }
}

/// Regular tiling of a CRS into equally sized cells
#[derive(Debug, Clone, PartialEq)]
pub struct GridSpec {
    pub crs: String,
    /// Tile size in CRS units
    pub tile_size: Resolution,
    pub resolution: Resolution,
}

impl GridSpec {
    /// Pixel grid of one tile
    ///
    /// Tile `(i, j)` spans `[i * size_x, (i + 1) * size_x)` and likewise in y;
    /// the origin sits on the edge the resolution sign points away from.
    #[must_use]
    pub fn tile_geobox(&self, index: TileIndex) -> GeoBox {
        let res = self.resolution;
        let left = f64::from(index.x) * self.tile_size.x;
        let bottom = f64::from(index.y) * self.tile_size.y;
        let x_origin = if res.x < 0.0 { left + self.tile_size.x } else { left };
        let y_origin = if res.y < 0.0 { bottom + self.tile_size.y } else { bottom };

        GeoBox::new(
            (self.tile_size.x / res.x).abs().round() as usize,
            (self.tile_size.y / res.y).abs().round() as usize,
            GeoTransform {
                x_origin,
                y_origin,
                resolution: res,
            },
            self.crs.clone(),
        )
    }
}

/// Rectangular pixel range of a task extent, processed as one unit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkWindow {
    pub y: Range<usize>,
    pub x: Range<usize>,
}

impl ChunkWindow {
    #[must_use]
    pub const fn new(y: Range<usize>, x: Range<usize>) -> Self {
        Self { y, x }
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.y.len()
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.x.len()
    }

    /// Number of pixels in the window
    #[must_use]
    pub fn len(&self) -> usize {
        self.height() * self.width()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fail unless this window lies inside a `height × width` grid
    ///
    /// # Errors
    ///
    /// Returns a compute error describing the offending range.
    pub fn check_within(&self, height: usize, width: usize) -> Result<()> {
        if self.y.start > self.y.end || self.x.start > self.x.end || self.y.end > height || self.x.end > width {
            return Err(StatsError::compute(format!(
                "window {self} is outside a {height}x{width} extent"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ChunkWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[y {}:{}, x {}:{}]",
            self.y.start, self.y.end, self.x.start, self.x.end
        )
    }
}

/// Chunk size in pixels along each spatial axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSize {
    pub x: usize,
    pub y: usize,
}

impl ChunkSize {
    /// Largest square chunk whose time stack fits in `memory_limit_bytes`
    ///
    /// `bytes_per_pixel` is the in-memory cost of one pixel's full time
    /// series across all loaded bands.
    #[must_use]
    pub fn for_memory_budget(memory_limit_bytes: usize, bytes_per_pixel: usize) -> Self {
        let pixels = memory_limit_bytes / bytes_per_pixel.max(1);
        let side = ((pixels as f64).sqrt().floor() as usize).max(1);
        Self { x: side, y: side }
    }
}

/// Split a `height × width` extent into row-major chunk windows
///
/// Edge chunks are truncated to the extent.
///
/// # Errors
///
/// Returns a configuration error if either chunk dimension is zero.
pub fn chunk_windows(height: usize, width: usize, chunk: ChunkSize) -> Result<Vec<ChunkWindow>> {
    if chunk.x == 0 || chunk.y == 0 {
        return Err(StatsError::config(format!(
            "chunk size must be positive, got {}x{}",
            chunk.y, chunk.x
        )));
    }

    let mut windows = Vec::with_capacity(height.div_ceil(chunk.y) * width.div_ceil(chunk.x));
    for y0 in (0..height).step_by(chunk.y) {
        for x0 in (0..width).step_by(chunk.x) {
            windows.push(ChunkWindow::new(
                y0..(y0 + chunk.y).min(height),
                x0..(x0 + chunk.x).min(width),
            ));
        }
    }
    Ok(windows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crs_kinds() {
        assert_eq!(epsg_code("EPSG:3577"), Some(3577));
        assert!(is_geographic("EPSG:4326"));
        assert!(!is_geographic("EPSG:3577"));
        assert!(!is_geographic("+proj=longlat"));
    }

    #[test]
    fn chunk_windows_cover_extent_exactly_once() {
        let windows = chunk_windows(7, 5, ChunkSize { x: 2, y: 3 }).unwrap();
        assert_eq!(windows.len(), 9);

        let mut hits = vec![0u8; 35];
        for w in &windows {
            for y in w.y.clone() {
                for x in w.x.clone() {
                    hits[y * 5 + x] += 1;
                }
            }
        }
        assert!(hits.iter().all(|&h| h == 1));
        assert_eq!(windows[8], ChunkWindow::new(6..7, 4..5));
    }

    #[test]
    fn zero_chunk_is_rejected() {
        assert!(chunk_windows(4, 4, ChunkSize { x: 0, y: 2 }).is_err());
    }

    #[test]
    fn memory_budget_chunk() {
        // 1 MiB budget, 100 observations of 4 bands of f32 per pixel
        let chunk = ChunkSize::for_memory_budget(1 << 20, 100 * 4 * 4);
        assert_eq!(chunk, ChunkSize { x: 25, y: 25 });
        assert_eq!(ChunkSize::for_memory_budget(10, 1000), ChunkSize { x: 1, y: 1 });
    }

    #[test]
    fn tile_geobox_north_up() {
        let grid = GridSpec {
            crs: "EPSG:3577".to_string(),
            tile_size: Resolution { x: 100_000.0, y: 100_000.0 },
            resolution: Resolution { x: 25.0, y: -25.0 },
        };
        let geobox = grid.tile_geobox(TileIndex::new(15, -40));
        assert_eq!(geobox.shape(), (4000, 4000));
        assert_eq!(geobox.transform.x_origin, 1_500_000.0);
        assert_eq!(geobox.transform.y_origin, -3_900_000.0);
        assert_eq!(geobox.y_coords()[0], -3_900_012.5);
    }

    #[test]
    fn geobox_from_bounds_and_window() {
        let bounds = Bounds { left: 0.0, bottom: 0.0, right: 100.0, top: 50.0 };
        let geobox =
            GeoBox::from_bounds(&bounds, Resolution { x: 25.0, y: -25.0 }, "EPSG:3577").unwrap();
        assert_eq!(geobox.shape(), (2, 4));
        assert_eq!(geobox.x_coords(), vec![12.5, 37.5, 62.5, 87.5]);
        assert_eq!(geobox.y_coords(), vec![37.5, 12.5]);

        let sub = geobox.window(&ChunkWindow::new(1..2, 2..4)).unwrap();
        assert_eq!(sub.shape(), (1, 2));
        assert_eq!(sub.x_coords(), vec![62.5, 87.5]);
        assert!(geobox.window(&ChunkWindow::new(0..3, 0..1)).is_err());
    }
}
