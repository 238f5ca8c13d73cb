//! Loading one chunk of a task into a single time-sorted volume
//!
//! Each source bundle of a task is loaded separately, optionally masked, and
//! then all bundles are merged along time. Every time slice remembers the
//! position within the task of the bundle it came from.

use crate::errors::{Result, StatsError};
use crate::geometry::{ChunkWindow, GeoBox};
use crate::model::{Band, Volume};
use crate::sources::{Fuser, MaskDecoder, RasterReader};
use crate::tasks::SourceBundle;
use chrono::{DateTime, Utc};
use ndarray::{stack, Array3, ArrayView2, Axis, Zip};
use tracing::{debug, trace};

/// One bundle's contribution to a chunk
struct Loaded {
    source: usize,
    times: Vec<DateTime<Utc>>,
    geobox: GeoBox,
    bands: Vec<Band>,
}

/// Load `window` of every bundle and merge the results
///
/// With `masked` set, no-data values become `NaN` and each of the bundle's
/// masks is applied; data slices with no mask observation at the same time
/// are dropped. Unmasked loads return raw values.
///
/// # Errors
///
/// Returns a data error if a band or mask cannot be loaded or bundles
/// disagree on their bands or spatial shape.
pub fn load_data(
    window: &ChunkWindow,
    bundles: &[SourceBundle],
    masked: bool,
    reader: &dyn RasterReader,
    decoder: &dyn MaskDecoder,
) -> Result<Volume> {
    let loaded = bundles
        .iter()
        .enumerate()
        .map(|(source, bundle)| load_bundle(window, source, bundle, masked, reader, decoder))
        .collect::<Result<Vec<_>>>()?;
    merge(loaded, masked)
}

fn load_bundle(
    window: &ChunkWindow,
    source: usize,
    bundle: &SourceBundle,
    masked: bool,
    reader: &dyn RasterReader,
    decoder: &dyn MaskDecoder,
) -> Result<Loaded> {
    let spec = &bundle.spec;
    let volume = reader.load(&bundle.data, window, &spec.measurements, Fuser::default())?;
    let (mut times, _, geobox, mut bands, _) = volume.into_parts();
    trace!(product = %spec.product, slices = times.len(), %window, "Loaded source");

    if !masked {
        return Ok(Loaded {
            source,
            times,
            geobox,
            bands,
        });
    }

    for band in &mut bands {
        let nodata = band.measurement.nodata as f32;
        band.data.mapv_inplace(|v| if v == nodata { f32::NAN } else { v });
    }

    let (_, height, width) = bands
        .first()
        .map_or((0, geobox.height, geobox.width), |b| b.data.dim());
    let mut valid = Array3::from_elem((times.len(), height, width), true);
    let mut keep = vec![true; times.len()];

    for (mask_spec, tile) in spec.masks.iter().zip(&bundle.masks) {
        let tile = tile.as_ref().ok_or_else(|| {
            StatsError::data(format!(
                "no '{}' mask data for source '{}'",
                mask_spec.product, spec.product
            ))
        })?;
        let fuse = mask_spec
            .fuse_func
            .as_deref()
            .map(str::parse::<Fuser>)
            .transpose()?
            .unwrap_or_default();
        let mask_volume = reader.load(tile, window, std::slice::from_ref(&mask_spec.measurement), fuse)?;
        let flags = decoder.make_mask(mask_volume.require_band(&mask_spec.measurement)?, &mask_spec.flags)?;
        if flags.dim().1 != height || flags.dim().2 != width {
            return Err(StatsError::data(format!(
                "mask '{}' has extent {:?}, data has {:?}",
                mask_spec.product,
                (flags.dim().1, flags.dim().2),
                (height, width)
            )));
        }

        for (i, time) in times.iter().enumerate() {
            match mask_volume.times().iter().position(|t| t == time) {
                Some(j) => {
                    let mut slice = valid.index_axis_mut(Axis(0), i);
                    Zip::from(&mut slice)
                        .and(&flags.index_axis(Axis(0), j))
                        .for_each(|v, &f| *v &= f);
                }
                None => keep[i] = false,
            }
        }
    }

    for band in &mut bands {
        Zip::from(&mut band.data).and(&valid).for_each(|v, &ok| {
            if !ok {
                *v = f32::NAN;
            }
        });
    }

    let dropped = keep.iter().filter(|k| !**k).count();
    if dropped > 0 {
        debug!(product = %spec.product, dropped, "Dropped observations without mask data");
        let kept: Vec<usize> = (0..times.len()).filter(|&i| keep[i]).collect();
        for band in &mut bands {
            band.data = band.data.select(Axis(0), &kept);
        }
        times = kept.iter().map(|&i| times[i]).collect();
    }

    Ok(Loaded {
        source,
        times,
        geobox,
        bands,
    })
}

/// Concatenate loaded sources along time and stable-sort by timestamp
fn merge(loaded: Vec<Loaded>, masked: bool) -> Result<Volume> {
    let first = loaded
        .first()
        .ok_or_else(|| StatsError::data("no source data to load"))?;
    let geobox = first.geobox.clone();
    let names: Vec<&str> = first.bands.iter().map(|b| b.measurement.name.as_str()).collect();

    for other in &loaded[1..] {
        let other_names: Vec<&str> = other.bands.iter().map(|b| b.measurement.name.as_str()).collect();
        if other_names != names {
            return Err(StatsError::data(format!(
                "sources disagree on bands: {names:?} vs {other_names:?}"
            )));
        }
        if other.geobox.shape() != geobox.shape() {
            return Err(StatsError::data(format!(
                "sources disagree on extent: {:?} vs {:?}",
                geobox.shape(),
                other.geobox.shape()
            )));
        }
    }

    // (time, source, position in `loaded`, slice index)
    let mut order: Vec<(DateTime<Utc>, usize, usize, usize)> = loaded
        .iter()
        .enumerate()
        .flat_map(|(li, l)| l.times.iter().enumerate().map(move |(ti, &t)| (t, l.source, li, ti)))
        .collect();
    order.sort_by_key(|&(t, ..)| t);

    let (height, width) = geobox.shape();
    let bands = (0..names.len())
        .map(|b| -> Result<Band> {
            let data = if order.is_empty() {
                Array3::from_elem((0, height, width), f32::NAN)
            } else {
                let slices: Vec<ArrayView2<'_, f32>> = order
                    .iter()
                    .map(|&(_, _, li, ti)| loaded[li].bands[b].data.index_axis(Axis(0), ti))
                    .collect();
                stack(Axis(0), &slices)?
            };
            Ok(Band {
                measurement: first.bands[b].measurement.clone(),
                data,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let times = order.iter().map(|&(t, ..)| t).collect();
    let sources = order.iter().map(|&(_, s, ..)| s).collect();
    Volume::new(times, sources, geobox, bands, masked)
}
