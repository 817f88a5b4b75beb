use ndarray::{Array3, ArrayView1, ArrayViewMut1, Axis, Zip};

/// Kernel extent in standard deviations.
const TRUNCATE: f64 = 4.0;

/// Separable Gaussian smoothing over voxel indices.
///
/// The kernel radius is `round(4 * sigma)` and borders are handled by
/// half-sample symmetric reflection (`d c b a | a b c d | d c b a`), which
/// keeps a constant volume constant.
#[derive(Debug, Clone)]
pub struct GaussianFilter {
    sigma: f64,
}

impl GaussianFilter {
    pub fn new(sigma: f64) -> Self {
        Self { sigma }
    }

    pub fn radius(&self) -> usize {
        (TRUNCATE * self.sigma + 0.5) as usize
    }

    pub fn kernel(&self) -> Vec<f32> {
        let radius = self.radius() as isize;
        let two_sigma2 = 2.0 * self.sigma * self.sigma;
        let weights: Vec<f64> = (-radius..=radius)
            .map(|x| (-((x * x) as f64) / two_sigma2).exp())
            .collect();
        let sum: f64 = weights.iter().sum();
        weights.into_iter().map(|w| (w / sum) as f32).collect()
    }

    /// Smooth along every axis in turn.
    pub fn apply(&self, input: &Array3<f32>) -> Array3<f32> {
        if self.sigma <= 1e-6 {
            return input.clone();
        }
        let kernel = self.kernel();
        let mut data = input.clone();
        for axis in 0..3 {
            let mut output = Array3::<f32>::zeros(data.raw_dim());
            Zip::from(output.lanes_mut(Axis(axis)))
                .and(data.lanes(Axis(axis)))
                .par_for_each(|out, lane| convolve_lane(lane, &kernel, out));
            data = output;
        }
        data
    }
}

#[inline]
fn reflect(index: isize, len: isize) -> usize {
    if len == 1 {
        return 0;
    }
    let period = 2 * len;
    let mut folded = index.rem_euclid(period);
    if folded >= len {
        folded = period - folded - 1;
    }
    folded as usize
}

fn convolve_lane(lane: ArrayView1<'_, f32>, kernel: &[f32], mut out: ArrayViewMut1<'_, f32>) {
    let len = lane.len() as isize;
    let radius = (kernel.len() / 2) as isize;
    for (i, value) in out.iter_mut().enumerate() {
        let centre = i as isize;
        *value = kernel
            .iter()
            .enumerate()
            .map(|(k, w)| w * lane[reflect(centre + k as isize - radius, len)])
            .sum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let kernel = GaussianFilter::new(1.0).kernel();
        assert_eq!(kernel.len(), 9);
        let sum: f32 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert_eq!(kernel[0], kernel[8]);
        assert!(kernel[4] > kernel[3]);
    }

    #[test]
    fn reflect_mirrors_at_borders() {
        assert_eq!(reflect(-1, 5), 0);
        assert_eq!(reflect(-2, 5), 1);
        assert_eq!(reflect(5, 5), 4);
        assert_eq!(reflect(6, 5), 3);
        assert_eq!(reflect(-7, 2), 0);
        assert_eq!(reflect(3, 1), 0);
    }

    #[test]
    fn constant_volume_is_unchanged() {
        let volume = Array3::from_elem((3, 4, 5), 0.25f32);
        let smoothed = GaussianFilter::new(1.0).apply(&volume);
        assert!(smoothed.iter().all(|v| (v - 0.25).abs() < 1e-6));
    }

    #[test]
    fn impulse_spreads_symmetrically() {
        let mut volume = Array3::<f32>::zeros((9, 9, 9));
        volume[[4, 4, 4]] = 1.0;
        let smoothed = GaussianFilter::new(1.0).apply(&volume);
        assert!(smoothed[[4, 4, 4]] < 1.0);
        assert!((smoothed[[3, 4, 4]] - smoothed[[5, 4, 4]]).abs() < 1e-7);
        assert!((smoothed[[4, 3, 4]] - smoothed[[4, 4, 5]]).abs() < 1e-7);
        assert!((smoothed.sum() - 1.0).abs() < 1e-4);
    }
}
