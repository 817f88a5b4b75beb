use lidc_prep::{
    CalibratedVolume, HounsfieldCalibrator, Interpolator, LungSegmenter,
    config::{CalibrationConfig, SegmentationConfig},
    volume::{Rescale, Slice, SliceHeader},
    volume_loader::VolumeLoader,
};
use ndarray::{Array2, Array3, s};
use proptest::prelude::*;

fn slice(uid: &str, z: f64, raw: i16) -> Slice {
    Slice {
        header: SliceHeader {
            sop_instance_uid: uid.to_string(),
            position: Some([0.0, 0.0, z]),
            slice_location: None,
            pixel_spacing: (0.7, 0.7),
            rescale: Rescale {
                slope: 1.0,
                intercept: -1024.0,
            },
            slice_thickness: None,
        },
        pixels: Array2::from_elem((4, 4), raw),
    }
}

#[test]
fn air_scan_calibrates_to_zero_and_has_no_lung() {
    let volume = VolumeLoader::assemble(vec![
        slice("c", 2.0, 24),
        slice("a", 0.0, 24),
        slice("b", 1.0, 24),
    ])
    .unwrap();
    assert_eq!(volume.slice_thickness, 1.0);
    assert_eq!(volume.instance_uids().collect::<Vec<_>>(), ["a", "b", "c"]);

    let calibrated = HounsfieldCalibrator::new(CalibrationConfig::default()).calibrate(&volume);
    assert!(calibrated.data().iter().all(|&v| v == 0.0));
    assert_eq!(calibrated.spacing(), [1.0, 0.7, 0.7]);

    let mask = LungSegmenter::new(SegmentationConfig::default()).segment(&calibrated);
    assert_eq!(mask.voxel_count(), 0);
}

proptest! {
    #[test]
    fn resampling_preserves_physical_extent(
        depth in 1usize..6,
        side in 1usize..10,
        spacing in prop::array::uniform3(0.3f64..3.0),
        target in prop::array::uniform3(0.5f64..2.0),
    ) {
        let volume = CalibratedVolume::new(Array3::zeros((depth, side, side)), spacing);
        let resampled = Interpolator::resample(&volume, target).unwrap();
        let (d, h, w) = resampled.volume.dim();
        let old = [depth, side, side];
        for (axis, new) in [d, h, w].into_iter().enumerate() {
            let extent = spacing[axis] * old[axis] as f64;
            prop_assert!((resampled.spacing[axis] * new as f64 - extent).abs() < 1e-9);
            prop_assert!((target[axis] * new as f64 - extent).abs() <= target[axis]);
        }
    }

    #[test]
    fn largest_cavity_is_kept_whatever_the_layout(
        big_first in any::<bool>(),
        small_side in 1usize..3,
    ) {
        // Two cavities in a dense body; the bigger one must survive no matter
        // which is met first in raster order.
        let mut volume = Array3::<f32>::zeros((5, 14, 14));
        volume.slice_mut(s![.., 1..13, 1..13]).fill(1.0);
        let (big, small) = if big_first { (2usize, 9usize) } else { (9, 2) };
        volume.slice_mut(s![1..4, big..big + 3, 2..5]).fill(0.0);
        volume
            .slice_mut(s![1..2, small..small + small_side, 9..9 + small_side])
            .fill(0.0);

        let mask = LungSegmenter::new(SegmentationConfig::default())
            .segment_with(&volume.view(), false);
        prop_assert_eq!(mask.voxel_count(), 27);
        prop_assert!(mask.data.slice(s![1..4, big..big + 3, 2..5]).iter().all(|&v| v == 1));
    }
}
