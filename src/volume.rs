use std::path::Path;

use dicom::object::InMemDicomObject;
use dicom_dictionary_std::tags;
use image::{GrayImage, ImageBuffer, Luma};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;

/// Rescale Slope / Rescale Intercept pair of a slice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rescale {
    pub slope: f64,
    pub intercept: f64,
}

impl Default for Rescale {
    fn default() -> Self {
        Self {
            slope: 1.0,
            intercept: 0.0,
        }
    }
}

/// Per-slice metadata read from the DICOM header.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceHeader {
    pub sop_instance_uid: String,
    /// Image Position (Patient), x/y/z in millimetres.
    pub position: Option<[f64; 3]>,
    pub slice_location: Option<f64>,
    /// (row spacing, column spacing) in millimetres.
    pub pixel_spacing: (f64, f64),
    pub rescale: Rescale,
    /// Set by the loader once the scan is ordered.
    pub slice_thickness: Option<f64>,
}

impl SliceHeader {
    /// Read the attributes the pipeline relies on.
    ///
    /// Returns the name of the first required attribute that is missing:
    /// SOP Instance UID, Pixel Spacing, or both positional attributes.
    pub fn from_object(object: &InMemDicomObject) -> Result<Self, &'static str> {
        let sop_instance_uid = object
            .element(tags::SOP_INSTANCE_UID)
            .ok()
            .and_then(|e| e.to_str().ok())
            .map(|s| s.trim_end_matches(['\0', ' ']).to_string())
            .filter(|s| !s.is_empty())
            .ok_or("SOPInstanceUID")?;

        let pixel_spacing = object
            .element(tags::PIXEL_SPACING)
            .ok()
            .and_then(|e| e.to_multi_float64().ok())
            .filter(|v| v.len() >= 2)
            .map(|v| (v[0], v[1]))
            .ok_or("PixelSpacing")?;

        let position = object
            .element(tags::IMAGE_POSITION_PATIENT)
            .ok()
            .and_then(|e| e.to_multi_float64().ok())
            .filter(|v| v.len() == 3)
            .map(|v| [v[0], v[1], v[2]]);

        let slice_location = object
            .element(tags::SLICE_LOCATION)
            .ok()
            .and_then(|e| e.to_float64().ok());

        if position.is_none() && slice_location.is_none() {
            return Err("ImagePositionPatient");
        }

        let slope = object
            .element(tags::RESCALE_SLOPE)
            .ok()
            .and_then(|e| e.to_float64().ok())
            .unwrap_or(1.0);
        let intercept = object
            .element(tags::RESCALE_INTERCEPT)
            .ok()
            .and_then(|e| e.to_float64().ok())
            .unwrap_or(0.0);

        Ok(Self {
            sop_instance_uid,
            position,
            slice_location,
            pixel_spacing,
            rescale: Rescale { slope, intercept },
            slice_thickness: None,
        })
    }

    /// Coordinate along the scan axis used for ordering.
    pub fn z(&self) -> Option<f64> {
        self.position.map(|p| p[2]).or(self.slice_location)
    }
}

/// One stored 2D image plus its header.
#[derive(Debug, Clone)]
pub struct Slice {
    pub header: SliceHeader,
    pub pixels: Array2<i16>,
}

/// Raw slices of one scan stacked along axis 0 in ascending z order.
#[derive(Debug, Clone)]
pub struct Volume {
    pub data: Array3<i16>,
    pub headers: Vec<SliceHeader>,
    pub slice_thickness: f64,
    pub pixel_spacing: (f64, f64),
}

impl Volume {
    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Voxel spacing ordered like the array axes: (z, row, column).
    pub fn spacing(&self) -> [f64; 3] {
        [self.slice_thickness, self.pixel_spacing.0, self.pixel_spacing.1]
    }

    pub fn instance_uids(&self) -> impl Iterator<Item = &str> {
        self.headers.iter().map(|h| h.sop_instance_uid.as_str())
    }
}

/// Hounsfield-calibrated volume normalized to `[0, 1]`.
#[derive(Debug, Clone)]
pub struct CalibratedVolume {
    data: Array3<f32>,
    spacing: [f64; 3],
}

impl CalibratedVolume {
    /// Wrap already normalized intensities.
    pub fn new(data: Array3<f32>, spacing: [f64; 3]) -> Self {
        Self { data, spacing }
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }
}

/// Binary lung mask, 1 = lung.
#[derive(Debug, Clone, PartialEq)]
pub struct LungMask {
    pub data: Array3<u8>,
}

impl LungMask {
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn voxel_count(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0).count()
    }

    pub fn to_f32(&self) -> Array3<f32> {
        self.data.mapv(f32::from)
    }

    /// Calibrated intensities with everything outside the lungs zeroed.
    pub fn apply(&self, calibrated: &CalibratedVolume) -> Array3<f32> {
        let mut masked = calibrated.data().clone();
        masked.zip_mut_with(&self.data, |v, &m| {
            if m == 0 {
                *v = 0.0;
            }
        });
        masked
    }
}

#[inline]
fn normalize_to_u8(value: f32, min: f32, range: f32) -> u8 {
    if range <= f32::EPSILON {
        return 0;
    }
    (((value - min) / range) * 255.0).clamp(0.0, 255.0) as u8
}

/// Min-max stretch one axial slice to 8-bit grayscale.
pub fn slice_to_image(slice: &ArrayView2<'_, f32>) -> Option<GrayImage> {
    let (height, width) = slice.dim();
    let (min, max) = slice
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;
    let pixel_data: Vec<u8> = slice
        .iter()
        .map(|&v| normalize_to_u8(v, min, range))
        .collect();
    ImageBuffer::<Luma<u8>, _>::from_raw(width as u32, height as u32, pixel_data)
}

/// Write every axial slice of `volume` as `<name>.jpg` into `dir`.
pub fn save_axial_slices(
    volume: &ArrayView3<'_, f32>,
    names: &[String],
    dir: &Path,
) -> Result<usize, image::ImageError> {
    std::fs::create_dir_all(dir)?;
    let written = volume
        .axis_iter(Axis(0))
        .into_par_iter()
        .zip(names.par_iter())
        .map(|(slice, name)| match slice_to_image(&slice) {
            Some(image) => image.save(dir.join(format!("{name}.jpg"))).map(|_| true),
            None => Ok(false),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(written.into_iter().filter(|&w| w).count())
}
