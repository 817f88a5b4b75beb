use ndarray::{Array3, ArrayView1, ArrayView3, ArrayViewMut1, Axis, Zip};
use thiserror::Error;

use crate::volume::CalibratedVolume;

#[derive(Debug, Error, PartialEq)]
pub enum ResampleError {
    #[error("Spacing must be positive and finite, got {0:?}")]
    InvalidSpacing([f64; 3]),

    #[error("Cannot resample an empty volume")]
    EmptyVolume,
}

/// Edge samples repeated on each side of a lane before prefiltering, so the
/// spline continues with the nearest value past the borders.
const EDGE_PADDING: usize = 12;

/// Pole of the cubic B-spline prefilter, `sqrt(3) - 2`.
const POLE: f64 = -0.267_949_192_431_122_7;

/// Output of [`Interpolator::resample`].
#[derive(Debug, Clone)]
pub struct Resampled {
    pub volume: CalibratedVolume,
    /// Spacing actually achieved after rounding the shape, (z, row, column).
    pub spacing: [f64; 3],
}

pub struct Interpolator;

impl Interpolator {
    /// Shape closest to `spacing / target_spacing` times the current shape,
    /// never smaller than one voxel per axis.
    pub fn isotropic_dimensions(
        spacing: [f64; 3],
        target_spacing: [f64; 3],
        original_dim: (usize, usize, usize),
    ) -> (usize, usize, usize) {
        let dims = [original_dim.0, original_dim.1, original_dim.2];
        let new: Vec<usize> = (0..3)
            .map(|axis| {
                let factor = spacing[axis] / target_spacing[axis];
                ((dims[axis] as f64 * factor).round() as usize).max(1)
            })
            .collect();
        (new[0], new[1], new[2])
    }

    /// Resample to (approximately) `target_spacing`.
    ///
    /// The shape is rounded to whole voxels, so the returned spacing is
    /// recomputed from the rounded shape and generally differs slightly
    /// from the request.
    ///
    /// # Errors
    ///
    /// `InvalidSpacing` when either spacing has a zero, negative or
    /// non-finite component, `EmptyVolume` when an axis has no voxels.
    pub fn resample(
        volume: &CalibratedVolume,
        target_spacing: [f64; 3],
    ) -> Result<Resampled, ResampleError> {
        let spacing = volume.spacing();
        for candidate in [spacing, target_spacing] {
            if candidate.iter().any(|s| !s.is_finite() || *s <= 0.0) {
                return Err(ResampleError::InvalidSpacing(candidate));
            }
        }
        if volume.data().is_empty() {
            return Err(ResampleError::EmptyVolume);
        }

        let dim = volume.dim();
        let new_dim = Self::isotropic_dimensions(spacing, target_spacing, dim);
        let old = [dim.0, dim.1, dim.2];
        let new = [new_dim.0, new_dim.1, new_dim.2];
        let achieved: [f64; 3] =
            std::array::from_fn(|axis| spacing[axis] * old[axis] as f64 / new[axis] as f64);

        let data = Self::zoom(&volume.view(), new_dim);
        Ok(Resampled {
            volume: CalibratedVolume::new(data, achieved),
            spacing: achieved,
        })
    }

    /// Cubic B-spline zoom mapping the first and last voxel centres of each
    /// axis onto each other. Past the borders the signal continues with the
    /// edge value. Axes whose length does not change are copied as is.
    pub fn zoom(input: &ArrayView3<'_, f32>, new_dim: (usize, usize, usize)) -> Array3<f32> {
        let target = [new_dim.0, new_dim.1, new_dim.2];
        if input.is_empty() || target.contains(&0) {
            return Array3::zeros(new_dim);
        }

        let mut data = input.to_owned();
        for (axis, &length) in target.iter().enumerate() {
            if data.len_of(Axis(axis)) == length {
                continue;
            }
            let mut shape = data.raw_dim();
            shape[axis] = length;
            let mut output = Array3::<f32>::zeros(shape);
            Zip::from(output.lanes_mut(Axis(axis)))
                .and(data.lanes(Axis(axis)))
                .par_for_each(|out, lane| resample_lane(lane, out));
            data = output;
        }
        data
    }
}

/// Cubic B-spline basis:
/// `2/3 - |x|^2 + |x|^3 / 2` below 1, `(2 - |x|)^3 / 6` below 2, else 0.
#[inline]
fn cubic_bspline(x: f64) -> f64 {
    let abs_x = x.abs();
    if abs_x < 1.0 {
        (2.0 / 3.0) - abs_x.powi(2) + 0.5 * abs_x.powi(3)
    } else if abs_x < 2.0 {
        (2.0 - abs_x).powi(3) / 6.0
    } else {
        0.0
    }
}

fn resample_lane(lane: ArrayView1<'_, f32>, mut out: ArrayViewMut1<'_, f32>) {
    let n = lane.len();
    let m = out.len();
    let first = f64::from(lane[0]);
    let last = f64::from(lane[n - 1]);

    let mut coefficients: Vec<f64> = std::iter::repeat_n(first, EDGE_PADDING)
        .chain(lane.iter().map(|&v| f64::from(v)))
        .chain(std::iter::repeat_n(last, EDGE_PADDING))
        .collect();
    spline_coefficients(&mut coefficients);

    let step = if m > 1 {
        (n - 1) as f64 / (m - 1) as f64
    } else {
        0.0
    };
    let max_index = (coefficients.len() - 1) as isize;
    for (i, value) in out.iter_mut().enumerate() {
        let t = (i as f64 * step).min((n - 1) as f64) + EDGE_PADDING as f64;
        let base = t.floor() as isize;
        let sum: f64 = (base - 1..=base + 2)
            .map(|j| coefficients[j.clamp(0, max_index) as usize] * cubic_bspline(t - j as f64))
            .sum();
        *value = sum as f32;
    }
}

/// Replace `samples` in place by the coefficients of the interpolating
/// cubic B-spline, with mirror boundaries (causal then anti-causal pass).
fn spline_coefficients(samples: &mut [f64]) {
    let n = samples.len();
    if n < 2 {
        return;
    }
    let z = POLE;
    let gain = (1.0 - z) * (1.0 - 1.0 / z);
    samples.iter_mut().for_each(|s| *s *= gain);

    samples[0] = causal_initial(samples, z);
    for k in 1..n {
        samples[k] += z * samples[k - 1];
    }
    samples[n - 1] = (z / (z * z - 1.0)) * (samples[n - 1] + z * samples[n - 2]);
    for k in (0..n - 1).rev() {
        samples[k] = z * (samples[k + 1] - samples[k]);
    }
}

fn causal_initial(samples: &[f64], z: f64) -> f64 {
    let n = samples.len();
    let inverse = 1.0 / z;
    let mut zn = z;
    let mut z2n = z.powi(n as i32 - 1);
    let mut sum = samples[0] + z2n * samples[n - 1];
    z2n *= z2n * inverse;
    for &sample in &samples[1..n - 1] {
        sum += (zn + z2n) * sample;
        zn *= z;
        z2n *= inverse;
    }
    sum / (1.0 - zn * zn)
}
