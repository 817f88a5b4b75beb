use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lidc_prep::{
    config::{CalibrationConfig, PipelineConfig, ResampleConfig, SegmentationConfig},
    enums::{OutputImage, ScanSelection},
    pipeline::Pipeline,
};

#[derive(Parser)]
#[command(name = "lidc-prep")]
#[command(about = "Preprocess LIDC-IDRI CT scans and radiologist annotations")]
struct Cli {
    /// Folder holding one subfolder per patient
    input: PathBuf,

    /// Folder receiving images and labels, one subfolder per patient
    output: PathBuf,

    /// Volume written as images
    #[arg(long, value_enum, default_value = "mask")]
    image: ImageKind,

    /// Close nodules and vessels inside the lungs before masking
    #[arg(long)]
    fill_lung_structures: bool,

    /// Tissue threshold on the normalized scale
    #[arg(long, default_value_t = 0.3)]
    threshold: f32,

    /// Lower end of the Hounsfield window
    #[arg(long, default_value_t = -1000.0, allow_hyphen_values = true)]
    min_bound: f32,

    /// Upper end of the Hounsfield window
    #[arg(long, default_value_t = 400.0, allow_hyphen_values = true)]
    max_bound: f32,

    /// Gaussian smoothing sigma in voxels, 0 disables smoothing
    #[arg(long, default_value_t = 1.0)]
    sigma: f64,

    /// Resample to the target spacing before segmenting
    #[arg(long)]
    resample: bool,

    /// Target spacing in millimetres as z,row,column
    #[arg(long, value_delimiter = ',', default_values_t = [1.0, 1.0, 1.0])]
    target_spacing: Vec<f64>,

    /// Pick the scan folder by Series Instance UID instead of file count
    #[arg(long)]
    series_uid: Option<String>,

    /// Skip image generation
    #[arg(long)]
    skip_images: bool,

    /// Skip annotation parsing and slice labels
    #[arg(long)]
    skip_annotations: bool,

    /// Worker threads, defaults to one per core
    #[arg(short, long)]
    jobs: Option<usize>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ImageKind {
    Mask,
    Calibrated,
    Masked,
}

impl From<ImageKind> for OutputImage {
    fn from(kind: ImageKind) -> Self {
        match kind {
            ImageKind::Mask => OutputImage::Mask,
            ImageKind::Calibrated => OutputImage::Calibrated,
            ImageKind::Masked => OutputImage::MaskedCalibrated,
        }
    }
}

impl Cli {
    fn config(&self) -> Result<PipelineConfig> {
        let target_spacing: [f64; 3] = self
            .target_spacing
            .as_slice()
            .try_into()
            .context("target spacing needs three values")?;
        anyhow::ensure!(
            target_spacing.iter().all(|s| s.is_finite() && *s > 0.0),
            "target spacing must be positive, got {target_spacing:?}"
        );
        if self.min_bound >= self.max_bound {
            anyhow::bail!("min bound {} is not below max bound {}", self.min_bound, self.max_bound);
        }

        let scan_selection = match &self.series_uid {
            Some(uid) => ScanSelection::SeriesInstanceUid(uid.clone()),
            None => ScanSelection::MostFiles,
        };

        Ok(PipelineConfig::new(&self.input, &self.output)
            .with_scan_selection(scan_selection)
            .with_calibration(
                CalibrationConfig::default()
                    .with_bounds(self.min_bound, self.max_bound)
                    .with_smoothing_sigma(self.sigma),
            )
            .with_resample(ResampleConfig {
                enabled: self.resample,
                target_spacing,
            })
            .with_segmentation(SegmentationConfig {
                threshold: self.threshold,
                fill_lung_structures: self.fill_lung_structures,
            })
            .with_output_image(self.image.into())
            .with_images(!self.skip_images)
            .with_annotations(!self.skip_annotations))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config()?;

    let pipeline = Pipeline::new(config);
    let report = match cli.jobs {
        Some(jobs) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(jobs)
                .build()
                .context("failed to build worker pool")?;
            pool.install(|| pipeline.run_batch())
        }
        None => pipeline.run_batch(),
    }
    .context("batch aborted")?;

    for failure in &report.failed {
        warn!(patient = %failure.patient, error = %failure.error, "patient failed");
    }
    info!(
        completed = report.completed.len(),
        failed = report.failed.len(),
        images = report.images_written(),
        positive_slices = report.positive_slices(),
        "done"
    );
    Ok(())
}
