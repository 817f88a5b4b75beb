use std::path::PathBuf;

use crate::enums::{OutputImage, ScanSelection};

/// Hounsfield calibration and intensity normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationConfig {
    /// Stored value marking pixels outside the scanner's field of view.
    pub sentinel: i16,
    pub min_bound: f32,
    pub max_bound: f32,
    /// Gaussian sigma in voxels; `0.0` disables smoothing.
    pub smoothing_sigma: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            sentinel: -2000,
            min_bound: -1000.0,
            max_bound: 400.0,
            smoothing_sigma: 1.0,
        }
    }
}

impl CalibrationConfig {
    pub fn with_bounds(mut self, min_bound: f32, max_bound: f32) -> Self {
        self.min_bound = min_bound;
        self.max_bound = max_bound;
        self
    }

    pub fn with_smoothing_sigma(mut self, sigma: f64) -> Self {
        self.smoothing_sigma = sigma;
        self
    }
}

/// Isotropic resampling. Off on the default path.
#[derive(Debug, Clone, PartialEq)]
pub struct ResampleConfig {
    pub enabled: bool,
    /// Target spacing in millimetres, ordered (z, row, column).
    pub target_spacing: [f64; 3],
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_spacing: [1.0, 1.0, 1.0],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationConfig {
    /// Normalized intensity above which a voxel counts as tissue.
    pub threshold: f32,
    pub fill_lung_structures: bool,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            fill_lung_structures: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationConfig {
    /// XML namespace of the LIDC read messages.
    pub namespace: String,
    pub xml_extension: String,
    /// File names of the persisted tables, relative to the patient folder.
    pub annotation_file: String,
    pub characteristics_file: String,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            namespace: "http://www.nih.gov".to_string(),
            xml_extension: "xml".to_string(),
            annotation_file: "annotation.csv".to_string(),
            characteristics_file: "char_list.csv".to_string(),
        }
    }
}

/// Detection-label geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelConfig {
    pub image_width: u32,
    pub image_height: u32,
    /// Box side in pixels used when no rectangle applies.
    pub default_box_size: f64,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            image_width: 512,
            image_height: 512,
            default_box_size: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    pub scan_selection: ScanSelection,
    pub dicom_extension: String,
    pub calibration: CalibrationConfig,
    pub resample: ResampleConfig,
    pub segmentation: SegmentationConfig,
    pub annotation: AnnotationConfig,
    pub labels: LabelConfig,
    pub output_image: OutputImage,
    pub process_images: bool,
    pub process_annotations: bool,
}

impl PipelineConfig {
    pub fn new(input_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            input_root: input_root.into(),
            output_root: output_root.into(),
            scan_selection: ScanSelection::default(),
            dicom_extension: "dcm".to_string(),
            calibration: CalibrationConfig::default(),
            resample: ResampleConfig::default(),
            segmentation: SegmentationConfig::default(),
            annotation: AnnotationConfig::default(),
            labels: LabelConfig::default(),
            output_image: OutputImage::default(),
            process_images: true,
            process_annotations: true,
        }
    }

    pub fn with_scan_selection(mut self, selection: ScanSelection) -> Self {
        self.scan_selection = selection;
        self
    }

    pub fn with_calibration(mut self, calibration: CalibrationConfig) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn with_resample(mut self, resample: ResampleConfig) -> Self {
        self.resample = resample;
        self
    }

    pub fn with_segmentation(mut self, segmentation: SegmentationConfig) -> Self {
        self.segmentation = segmentation;
        self
    }

    pub fn with_labels(mut self, labels: LabelConfig) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_output_image(mut self, output_image: OutputImage) -> Self {
        self.output_image = output_image;
        self
    }

    pub fn with_images(mut self, enabled: bool) -> Self {
        self.process_images = enabled;
        self
    }

    pub fn with_annotations(mut self, enabled: bool) -> Self {
        self.process_annotations = enabled;
        self
    }
}
