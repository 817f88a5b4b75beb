//! # LIDC-IDRI preprocessing library
//!
//! This crate turns the CT scans and radiologist read messages of the
//! LIDC-IDRI collection into training data: lung masks or calibrated slices
//! as 8-bit images, and per-slice labels derived from the annotations.
//!
//! A patient folder holds one or more DICOM series and the XML read message
//! of the CT series. Per patient the pipeline
//!  - picks the scan folder (the folder with the most files by default),
//!  - loads and orders the slices into a volume,
//!  - calibrates stored values to Hounsfield units, windows them to `[0, 1]`
//!    and smooths the result,
//!  - optionally resamples to an isotropic spacing,
//!  - segments the lungs and writes one image per axial slice,
//!  - parses the annotations into flat tables, cached next to the scan,
//!  - labels each slice positive when a scored nodule outline lies on it.
//!
//! Patients are processed in parallel using rayon. A failing patient is
//! logged and skipped.
//!
//! DICOM files are assumed to have the following attributes:
//!   - Axial acquisition
//!   - No multiframe (always the first frame is used)
//!   - SOP Instance UID, Pixel Spacing and Image Position (Patient) or
//!     Slice Location
//!
//! # Examples
//!
//! ## Segmenting one scan
//!
//! ```no_run
//! # use lidc_prep::{HounsfieldCalibrator, LungSegmenter, VolumeLoader};
//! # use lidc_prep::config::{CalibrationConfig, SegmentationConfig};
//! let volume = VolumeLoader::load_from_directory("LIDC-IDRI-0001/scan", "dcm")
//!     .expect("should have loaded the scan");
//! let calibrated = HounsfieldCalibrator::new(CalibrationConfig::default()).calibrate(&volume);
//! let mask = LungSegmenter::new(SegmentationConfig::default()).segment(&calibrated);
//! println!("{} lung voxels", mask.voxel_count());
//! ```
//!
//! ## Running a batch
//!
//! ```no_run
//! # use lidc_prep::{Pipeline, PipelineConfig};
//! let report = Pipeline::new(PipelineConfig::new("LIDC-IDRI", "prepared"))
//!     .run_batch()
//!     .expect("input root should exist");
//! println!("{} patients failed", report.failed.len());
//! ```

pub mod annotation;
pub mod calibrate;
pub mod config;
pub mod correlate;
pub mod enums;
pub mod filter;
pub mod interpolator;
pub mod labeling;
pub mod pipeline;
pub mod segment;
pub mod volume;
pub mod volume_loader;

pub use annotation::{AnnotationError, AnnotationParser, AnnotationStore, AnnotationTables};
pub use calibrate::HounsfieldCalibrator;
pub use config::PipelineConfig;
pub use correlate::{DetectionLabel, SliceAnnotationCorrelator};
pub use interpolator::{Interpolator, ResampleError};
pub use pipeline::{BatchReport, Pipeline, PipelineError};
pub use segment::LungSegmenter;
pub use volume::{CalibratedVolume, LungMask, Volume};
pub use volume_loader::{VolumeLoader, VolumeLoaderError};
