//! Parallel computation implementations for time-axis reductions
//!
//! All reductions skip NaN (masked) observations. A pixel without any valid
//! observation reduces to NaN, except for the sum which is zero.

use crate::errors::Result;
use ndarray::{Array2, Array3, Axis, Zip};
use rayon::prelude::*;

/// Computes the mean along the time axis using parallel processing
///
/// Values are accumulated in f64 to avoid precision loss on long stacks.
///
/// # Errors
///
/// Returns an error if the result cannot be reshaped.
pub fn parallel_mean_time(data: &Array3<f32>) -> Result<Array2<f64>> {
    let (nt, ny, nx) = data.dim();

    tracing::trace!(
        pixels = ny * nx,
        threads = rayon::current_num_threads(),
        "computing temporal mean"
    );

    let result: Vec<f64> = (0..ny * nx)
        .into_par_iter()
        .map(|flat_idx| {
            let (iy, ix) = (flat_idx / nx, flat_idx % nx);

            let mut sum = 0.0_f64;
            let mut count = 0_u32;
            for it in 0..nt {
                let value = data[[it, iy, ix]];
                if !value.is_nan() {
                    sum += f64::from(value);
                    count += 1;
                }
            }

            if count > 0 {
                sum / f64::from(count)
            } else {
                f64::NAN
            }
        })
        .collect();

    Ok(Array2::from_shape_vec((ny, nx), result)?)
}

/// Computes the sum along the time axis
#[must_use]
pub fn parallel_sum_time(data: &Array3<f32>) -> Array2<f64> {
    Zip::from(data.lanes(Axis(0))).par_map_collect(|stack| {
        stack
            .iter()
            .filter(|v| !v.is_nan())
            .map(|&v| f64::from(v))
            .sum::<f64>()
    })
}

/// Computes the minimum along the time axis
#[must_use]
pub fn parallel_min_time(data: &Array3<f32>) -> Array2<f64> {
    let result = data.fold_axis(Axis(0), f32::INFINITY, |&acc, &x| {
        if x.is_nan() {
            acc
        } else {
            acc.min(x)
        }
    });

    // Convert INFINITY to NaN where no valid values were found
    result.mapv(|x| if x == f32::INFINITY { f64::NAN } else { f64::from(x) })
}

/// Computes the maximum along the time axis
#[must_use]
pub fn parallel_max_time(data: &Array3<f32>) -> Array2<f64> {
    let result = data.fold_axis(Axis(0), f32::NEG_INFINITY, |&acc, &x| {
        if x.is_nan() {
            acc
        } else {
            acc.max(x)
        }
    });

    // Convert NEG_INFINITY to NaN where no valid values were found
    result.mapv(|x| if x == f32::NEG_INFINITY { f64::NAN } else { f64::from(x) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn stack() -> Array3<f32> {
        // time=0..3 at two pixels; second pixel fully masked
        Array3::from_shape_vec(
            (3, 1, 2),
            vec![1.0, f32::NAN, 2.0, f32::NAN, 6.0, f32::NAN],
        )
        .unwrap()
    }

    #[test]
    fn mean_skips_nan() {
        let mean = parallel_mean_time(&stack()).unwrap();
        assert_eq!(mean[[0, 0]], 3.0);
        assert!(mean[[0, 1]].is_nan());
    }

    #[test]
    fn min_max_sum() {
        let data = stack();
        assert_eq!(parallel_min_time(&data)[[0, 0]], 1.0);
        assert_eq!(parallel_max_time(&data)[[0, 0]], 6.0);
        assert!(parallel_max_time(&data)[[0, 1]].is_nan());
        assert_eq!(parallel_sum_time(&data)[[0, 0]], 9.0);
        assert_eq!(parallel_sum_time(&data)[[0, 1]], 0.0);
    }
}
