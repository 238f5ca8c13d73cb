//! Index selection along the time axis
//!
//! Provenance-preserving statistics do not compute a new value for each
//! pixel; they pick one observation out of the pixel's time series and copy
//! it (and its timestamp and source) to the output. The functions here
//! select that observation. A selection is an `Option<usize>`: `None` means
//! the pixel had no valid observation and downstream gathers write no-data.

use crate::errors::{Result, StatsError};
use ndarray::{Array, Array2, ArrayView, ArrayView1, ArrayView2, ArrayView3, Axis, RemoveAxis, Zip};
use rayon::prelude::*;

/// Pick the value at a per-position index along `axis`
///
/// `indices` has the shape of `values` with `axis` removed. `None` entries
/// produce `fill`.
///
/// # Errors
///
/// Returns a compute error if `axis` is out of bounds, the index array has
/// the wrong shape, or an index exceeds the axis length.
pub fn gather_by_index<T, D>(
    values: ArrayView<'_, T, D>,
    indices: ArrayView<'_, Option<usize>, D::Smaller>,
    axis: Axis,
    fill: T,
) -> Result<Array<T, D::Smaller>>
where
    T: Copy,
    D: RemoveAxis,
{
    if axis.index() >= values.ndim() {
        return Err(StatsError::compute(format!(
            "Axis {} is out of bounds for array with {} dimensions",
            axis.index(),
            values.ndim()
        )));
    }
    let expected = values.raw_dim().remove_axis(axis);
    if indices.raw_dim() != expected {
        return Err(StatsError::compute(format!(
            "index array shape {:?} does not match data shape {:?} without axis {}",
            indices.shape(),
            values.shape(),
            axis.index()
        )));
    }
    let len = values.len_of(axis);
    if let Some(bad) = indices.iter().flatten().find(|&&i| i >= len) {
        return Err(StatsError::compute(format!(
            "index {bad} out of range for axis of length {len}"
        )));
    }

    Ok(Zip::from(values.lanes(axis))
        .and(&indices)
        .map_collect(|lane, &index| index.map_or(fill, |i| lane[i])))
}

/// Position of the observation closest to the `q`-th percentile
///
/// Nearest-rank selection without interpolation: the non-NaN values are
/// ranked (stable, so equal values keep their time order) and the element at
/// `floor(q / 100 * (n_valid - 1) + 0.5)` is chosen. When several
/// observations share the selected value the earliest one is returned.
/// Returns `None` if every value is NaN.
#[must_use]
pub fn percentile_index(stack: ArrayView1<'_, f32>, q: f64) -> Option<usize> {
    let mut valid: Vec<usize> = (0..stack.len()).filter(|&i| !stack[i].is_nan()).collect();
    if valid.is_empty() {
        return None;
    }
    valid.sort_by(|&a, &b| stack[a].total_cmp(&stack[b]));

    let rank = ((q / 100.0) * (valid.len() - 1) as f64 + 0.5).floor();
    let rank = (rank.max(0.0) as usize).min(valid.len() - 1);
    let selected = stack[valid[rank]];

    valid.into_iter().find(|&i| stack[i] == selected)
}

/// Position of the medoid of one pixel's observations
///
/// `matrix` is laid out `(variable, time)`. Every time slice holding a NaN in
/// any variable is excluded, both as a candidate and from the distance sums
/// of the other candidates. Among the remaining slices the one with the
/// smallest summed Euclidean distance to all others is returned, the
/// earliest on ties. Returns `None` if no slice is complete.
///
/// Cost is O(T²·V) for T time slices and V variables.
#[must_use]
pub fn medoid_index(matrix: ArrayView2<'_, f32>) -> Option<usize> {
    let valid: Vec<usize> = (0..matrix.ncols())
        .filter(|&t| matrix.column(t).iter().all(|v| !v.is_nan()))
        .collect();

    let mut best: Option<(usize, f64)> = None;
    for &i in &valid {
        let candidate = matrix.column(i);
        let total: f64 = valid
            .iter()
            .map(|&j| {
                candidate
                    .iter()
                    .zip(matrix.column(j))
                    .map(|(&a, &b)| {
                        let d = f64::from(a) - f64::from(b);
                        d * d
                    })
                    .sum::<f64>()
                    .sqrt()
            })
            .sum();

        if best.map_or(true, |(_, best_total)| total < best_total) {
            best = Some((i, total));
        }
    }
    best.map(|(i, _)| i)
}

/// Per-pixel percentile selection over a `(time, y, x)` band
#[must_use]
pub fn percentile_indices(data: ArrayView3<'_, f32>, q: f64) -> Array2<Option<usize>> {
    Zip::from(data.lanes(Axis(0))).par_map_collect(|stack| percentile_index(stack, q))
}

/// Per-pixel medoid selection across several `(time, y, x)` bands
///
/// Pixels are independent, so they are processed in parallel; each pixel
/// still costs O(T²·V).
///
/// # Errors
///
/// Returns a compute error if the bands differ in shape.
pub fn medoid_indices(bands: &[ArrayView3<'_, f32>]) -> Result<Array2<Option<usize>>> {
    let Some(first) = bands.first() else {
        return Err(StatsError::compute("medoid requires at least one band"));
    };
    let (nt, ny, nx) = first.dim();
    if let Some(bad) = bands.iter().find(|b| b.dim() != (nt, ny, nx)) {
        return Err(StatsError::compute(format!(
            "medoid bands differ in shape: {:?} vs {:?}",
            bad.shape(),
            first.shape()
        )));
    }

    let indices: Vec<Option<usize>> = (0..ny * nx)
        .into_par_iter()
        .map(|flat_idx| {
            let (iy, ix) = (flat_idx / nx, flat_idx % nx);
            let matrix = Array2::from_shape_fn((bands.len(), nt), |(v, t)| bands[v][[t, iy, ix]]);
            medoid_index(matrix.view())
        })
        .collect();

    Ok(Array2::from_shape_vec((ny, nx), indices)?)
}
