use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
};

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    annotation::{AnnotationError, AnnotationStore},
    calibrate::HounsfieldCalibrator,
    config::PipelineConfig,
    correlate::{
        SliceAnnotationCorrelator, detection_labels, write_detection_labels, write_slice_manifest,
    },
    enums::{OutputImage, SliceLabel},
    interpolator::{Interpolator, ResampleError},
    segment::LungSegmenter,
    volume::save_axial_slices,
    volume_loader::{VolumeLoader, VolumeLoaderError},
};

pub const SLICE_MANIFEST: &str = "slice_labels.csv";
pub const LABELS_DIR: &str = "labels";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Input root {0} does not exist or is not a directory")]
    MissingInputRoot(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum PatientError {
    #[error(transparent)]
    Volume(#[from] VolumeLoaderError),

    #[error(transparent)]
    Annotation(#[from] AnnotationError),

    #[error(transparent)]
    Resample(#[from] ResampleError),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatientReport {
    pub patient: String,
    pub images_written: usize,
    pub slices: usize,
    pub positive_slices: usize,
    pub detection_labels: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientFailure {
    pub patient: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub completed: Vec<PatientReport>,
    pub failed: Vec<PatientFailure>,
}

impl BatchReport {
    pub fn images_written(&self) -> usize {
        self.completed.iter().map(|r| r.images_written).sum()
    }

    pub fn positive_slices(&self) -> usize {
        self.completed.iter().map(|r| r.positive_slices).sum()
    }
}

/// Runs every patient folder below the input root as an independent unit;
/// a failing patient is logged and reported, the batch carries on.
pub struct Pipeline {
    config: PipelineConfig,
    calibrator: HounsfieldCalibrator,
    segmenter: LungSegmenter,
    store: AnnotationStore,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            calibrator: HounsfieldCalibrator::new(config.calibration.clone()),
            segmenter: LungSegmenter::new(config.segmentation.clone()),
            store: AnnotationStore::from_pipeline(&config),
            config,
        }
    }

    /// Subfolders of the input root, sorted by name. Plain files such as
    /// the dataset licence are ignored.
    pub fn patient_folders(&self) -> Result<Vec<PathBuf>, PipelineError> {
        let root = &self.config.input_root;
        if !root.is_dir() {
            return Err(PipelineError::MissingInputRoot(root.clone()));
        }
        let mut folders: Vec<PathBuf> = fs::read_dir(root)?
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
            .map(|entry| entry.path())
            .collect();
        folders.sort();
        Ok(folders)
    }

    pub fn run_batch(&self) -> Result<BatchReport, PipelineError> {
        let folders = self.patient_folders()?;
        info!(
            patients = folders.len(),
            input = %self.config.input_root.display(),
            output = %self.config.output_root.display(),
            "starting batch"
        );

        let outcomes: Vec<Result<PatientReport, PatientFailure>> = folders
            .par_iter()
            .map(|dir| {
                self.process_patient(dir).map_err(|e| {
                    let patient = patient_name(dir);
                    warn!(patient = %patient, error = %e, "skipping patient");
                    PatientFailure {
                        patient,
                        error: e.to_string(),
                    }
                })
            })
            .collect();

        let mut report = BatchReport::default();
        for outcome in outcomes {
            match outcome {
                Ok(patient) => report.completed.push(patient),
                Err(failure) => report.failed.push(failure),
            }
        }
        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            images = report.images_written(),
            "batch finished"
        );
        Ok(report)
    }

    pub fn process_patient(&self, patient_dir: &Path) -> Result<PatientReport, PatientError> {
        let patient = patient_name(patient_dir);
        let output_dir = self.config.output_root.join(&patient);
        let scan_dir = VolumeLoader::select_scan_folder(
            patient_dir,
            &self.config.scan_selection,
            &self.config.dicom_extension,
        )?;
        debug!(patient = %patient, scan = %scan_dir.display(), "selected scan folder");

        let mut report = PatientReport {
            patient: patient.clone(),
            ..PatientReport::default()
        };

        let mut scan_order = Vec::new();
        if self.config.process_images {
            let (written, uids) = self.process_images(&scan_dir, &output_dir)?;
            report.images_written = written;
            report.slices = uids.len();
            scan_order = uids;
        }

        if self.config.process_annotations {
            let uids = VolumeLoader::instance_uids(&scan_dir, &self.config.dicom_extension)?;
            let uids = manifest_order(uids, &scan_order);
            self.process_annotations(patient_dir, uids, &output_dir, &mut report)?;
        }

        info!(
            patient = %patient,
            images = report.images_written,
            slices = report.slices,
            positive = report.positive_slices,
            "patient done"
        );
        Ok(report)
    }

    /// Returns the number of images written and the slice UIDs in scan order.
    fn process_images(
        &self,
        scan_dir: &Path,
        output_dir: &Path,
    ) -> Result<(usize, Vec<String>), PatientError> {
        let volume = VolumeLoader::load_from_directory(scan_dir, &self.config.dicom_extension)?;
        let uids: Vec<String> = volume.instance_uids().map(str::to_string).collect();

        let calibrated = self.calibrator.calibrate(&volume);
        let (calibrated, names) = if self.config.resample.enabled {
            let resampled = Interpolator::resample(&calibrated, self.config.resample.target_spacing)?;
            debug!(spacing = ?resampled.spacing, dim = ?resampled.volume.dim(), "resampled scan");
            let names = (0..resampled.volume.dim().0)
                .map(|index| format!("slice_{index}"))
                .collect();
            (resampled.volume, names)
        } else {
            (calibrated, uids.clone())
        };

        let mask = self.segmenter.segment(&calibrated);
        let image = match self.config.output_image {
            OutputImage::Mask => mask.to_f32(),
            OutputImage::Calibrated => calibrated.data().clone(),
            OutputImage::MaskedCalibrated => mask.apply(&calibrated),
        };
        let written = save_axial_slices(&image.view(), &names, output_dir)?;
        Ok((written, uids))
    }

    fn process_annotations(
        &self,
        patient_dir: &Path,
        uids: Vec<String>,
        output_dir: &Path,
        report: &mut PatientReport,
    ) -> Result<(), PatientError> {
        let tables = self.store.load_or_parse(patient_dir)?;
        let correlator = SliceAnnotationCorrelator::new(&tables);
        let slices = correlator.classify(uids);

        fs::create_dir_all(output_dir)?;
        write_slice_manifest(&output_dir.join(SLICE_MANIFEST), &slices)?;
        let labels = detection_labels(&tables, &self.config.labels);
        report.detection_labels = write_detection_labels(&output_dir.join(LABELS_DIR), &labels)?;

        report.slices = slices.len();
        report.positive_slices = slices
            .iter()
            .filter(|s| s.label == SliceLabel::Positive)
            .count();
        Ok(())
    }
}

/// Every UID found in the scan folder, decoded slices first in scan order,
/// then the slices that could not be decoded in file name order.
fn manifest_order(mut uids: Vec<String>, scan_order: &[String]) -> Vec<String> {
    let rank: HashMap<&str, usize> = scan_order
        .iter()
        .enumerate()
        .map(|(index, uid)| (uid.as_str(), index))
        .collect();
    uids.sort_by_key(|uid| rank.get(uid.as_str()).copied().unwrap_or(usize::MAX));
    uids
}

fn patient_name(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}
