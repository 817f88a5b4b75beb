use ndarray::{Array3, Axis};
use rayon::prelude::*;

use crate::{
    config::CalibrationConfig,
    filter::GaussianFilter,
    volume::{CalibratedVolume, Rescale, Volume},
};

/// Sentinel clamp, rescale to HU, window onto `[0, 1]`, then smoothing.
/// Smoothing runs after the clip so out-of-window densities cannot bleed.
pub struct HounsfieldCalibrator {
    config: CalibrationConfig,
}

impl HounsfieldCalibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self { config }
    }

    /// Full calibration: HU, window normalization, smoothing.
    pub fn calibrate(&self, volume: &Volume) -> CalibratedVolume {
        let mut data = self.to_hounsfield(volume);
        normalize(&mut data, self.config.min_bound, self.config.max_bound);
        let mut data = GaussianFilter::new(self.config.smoothing_sigma).apply(&data);
        data.mapv_inplace(|v| v.clamp(0.0, 1.0));
        CalibratedVolume::new(data, volume.spacing())
    }

    /// Apply each slice's rescale to its stored values.
    pub fn to_hounsfield(&self, volume: &Volume) -> Array3<f32> {
        let mut hu = Array3::<f32>::zeros(volume.data.raw_dim());
        hu.axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(volume.data.axis_iter(Axis(0)).into_par_iter())
            .zip(volume.headers.par_iter())
            .for_each(|((mut out, raw), header)| {
                out.zip_mut_with(&raw, |o, &r| *o = self.hounsfield(r, header.rescale));
            });
        hu
    }

    /// Calibrate one stored value. The sentinel maps to stored value 0, the
    /// slope is skipped when it is exactly one and both the scaled value and
    /// the intercept are truncated to whole HU.
    #[inline]
    pub fn hounsfield(&self, raw: i16, rescale: Rescale) -> f32 {
        let raw = if raw == self.config.sentinel { 0 } else { raw };
        let scaled = if rescale.slope != 1.0 {
            (f64::from(raw) * rescale.slope).trunc()
        } else {
            f64::from(raw)
        };
        (scaled + rescale.intercept.trunc()) as f32
    }
}

/// Clip to `[min_bound, max_bound]` and map linearly onto `[0, 1]`.
pub fn normalize(data: &mut Array3<f32>, min_bound: f32, max_bound: f32) {
    let range = (max_bound - min_bound).max(f32::EPSILON);
    data.par_mapv_inplace(|v| ((v - min_bound) / range).clamp(0.0, 1.0));
}
