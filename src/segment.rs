use ndarray::{Array3, ArrayView3, ArrayViewMut2, Axis, Zip};
use rayon::prelude::*;
use tracing::debug;

use crate::{
    config::SegmentationConfig,
    labeling::{label_2d, label_3d, largest_label},
    volume::{CalibratedVolume, LungMask},
};

const AIR: u8 = 1;
const TISSUE: u8 = 2;

/// Threshold, paint the air around the body (the component under voxel
/// `(0, 0, 0)`) as tissue, optionally fill each slice, invert and keep the
/// largest 3D component. A table touching that corner breaks the mask.
pub struct LungSegmenter {
    config: SegmentationConfig,
}

impl LungSegmenter {
    pub fn new(config: SegmentationConfig) -> Self {
        Self { config }
    }

    pub fn segment(&self, volume: &CalibratedVolume) -> LungMask {
        self.segment_with(&volume.view(), self.config.fill_lung_structures)
    }

    /// Segment with an explicit structure-filling choice.
    pub fn segment_with(&self, volume: &ArrayView3<'_, f32>, fill_lung_structures: bool) -> LungMask {
        let threshold = self.config.threshold;
        let mut binary = volume.mapv(|v| if v > threshold { TISSUE } else { AIR });
        if binary.is_empty() {
            return LungMask { data: binary };
        }

        let labeling = label_3d(&binary.view());
        let outside = labeling.labels[[0, 0, 0]];
        Zip::from(&mut binary)
            .and(&labeling.labels)
            .for_each(|b, &label| {
                if label == outside {
                    *b = TISSUE;
                }
            });

        if fill_lung_structures {
            binary
                .axis_iter_mut(Axis(0))
                .into_par_iter()
                .enumerate()
                .for_each(|(index, slice)| fill_slice(index, slice));
        }

        // {1, 2} -> {0, 1} -> inverted: lung is 1.
        binary.mapv_inplace(|v| 1 - (v - 1));

        keep_largest_component(&mut binary);
        LungMask { data: binary }
    }
}

/// Everything but the largest tissue region of the slice becomes air.
fn fill_slice(index: usize, mut slice: ArrayViewMut2<'_, u8>) {
    let tissue = slice.mapv(|v| v - 1);
    let labeling = label_2d(&tissue.view());
    let Some(body) = largest_label(labeling.labels.iter(), labeling.count) else {
        debug!(slice = index, "no tissue on slice, nothing to fill");
        return;
    };
    Zip::from(&mut slice)
        .and(&labeling.labels)
        .for_each(|v, &label| {
            if label != body {
                *v = AIR;
            }
        });
}

fn keep_largest_component(mask: &mut Array3<u8>) {
    let labeling = label_3d(&mask.view());
    let Some(lung) = largest_label(labeling.labels.iter(), labeling.count) else {
        debug!("no lung component found");
        return;
    };
    Zip::from(mask)
        .and(&labeling.labels)
        .for_each(|v, &label| {
            if label != lung {
                *v = 0;
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;

    fn segmenter() -> LungSegmenter {
        LungSegmenter::new(SegmentationConfig::default())
    }

    /// Air border around a dense body with two enclosed cavities.
    fn phantom() -> Array3<f32> {
        let mut volume = Array3::<f32>::zeros((6, 12, 12));
        volume.slice_mut(s![.., 1..11, 1..11]).fill(1.0);
        volume.slice_mut(s![1..5, 2..7, 2..7]).fill(0.0);
        volume.slice_mut(s![1..3, 8..10, 8..10]).fill(0.0);
        volume
    }

    #[test]
    fn below_threshold_volume_has_no_lung() {
        let volume = Array3::<f32>::from_elem((4, 8, 8), 0.1);
        let mask = segmenter().segment_with(&volume.view(), false);
        assert_eq!(mask.dim(), (4, 8, 8));
        assert_eq!(mask.voxel_count(), 0);

        let mask = segmenter().segment_with(&volume.view(), true);
        assert_eq!(mask.voxel_count(), 0);
    }

    #[test]
    fn keeps_only_largest_cavity() {
        let volume = phantom();
        let mask = segmenter().segment_with(&volume.view(), false);
        assert_eq!(mask.voxel_count(), 4 * 5 * 5);
        assert!(mask.data.slice(s![1..5, 2..7, 2..7]).iter().all(|&v| v == 1));
        assert!(mask.data.slice(s![1..3, 8..10, 8..10]).iter().all(|&v| v == 0));
        assert_eq!(mask.data[[0, 0, 0]], 0);
    }

    #[test]
    fn filling_closes_enclosed_structures() {
        let mut volume = phantom();
        volume[[2, 4, 4]] = 1.0;

        let open = segmenter().segment_with(&volume.view(), false);
        assert_eq!(open.data[[2, 4, 4]], 0);
        assert_eq!(open.voxel_count(), 4 * 5 * 5 - 1);

        let filled = segmenter().segment_with(&volume.view(), true);
        assert_eq!(filled.data[[2, 4, 4]], 1);
        assert_eq!(filled.voxel_count(), 4 * 5 * 5);
    }

    #[test]
    fn segment_uses_configured_fill() {
        let mut volume = phantom();
        volume[[2, 4, 4]] = 1.0;
        let calibrated = CalibratedVolume::new(volume, [1.0; 3]);
        let config = SegmentationConfig {
            fill_lung_structures: true,
            ..SegmentationConfig::default()
        };
        let mask = LungSegmenter::new(config).segment(&calibrated);
        assert_eq!(mask.data[[2, 4, 4]], 1);
    }
}
