use crate::{
    enums::ScanSelection,
    volume::{Slice, SliceHeader, Volume},
};

use dicom::{
    object::{FileDicomObject, InMemDicomObject, OpenFileOptions, open_file},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use ndarray::{Array2, Array3, s};
use rayon::prelude::*;
use std::{
    cmp::Ordering,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found in {0}")]
    NoValidImages(PathBuf),

    #[error("No folder with files found below {0}")]
    NoScanFolder(PathBuf),

    #[error("Missing attribute {0}")]
    MissingAttribute(&'static str),

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Inconsistent pixel spacing")]
    InconsistentSpacing,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

const SPACING_TOLERANCE: f64 = 1e-4;

pub struct VolumeLoader;

impl VolumeLoader {
    /// Pick the folder holding the actual scan below `patient_dir`.
    pub fn select_scan_folder(
        patient_dir: &Path,
        selection: &ScanSelection,
        extension: &str,
    ) -> Result<PathBuf, VolumeLoaderError> {
        match selection {
            ScanSelection::MostFiles => Self::folder_with_most_files(patient_dir),
            ScanSelection::SeriesInstanceUid(uid) => {
                Self::folder_with_series(patient_dir, uid, extension)
            }
        }
    }

    /// The folder with the largest number of files anywhere below `root`.
    /// Folders are visited in name order; ties keep the first one seen.
    pub fn folder_with_most_files(root: &Path) -> Result<PathBuf, VolumeLoaderError> {
        let mut best: Option<(usize, PathBuf)> = None;
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|e| match e.into_io_error() {
                Some(io) => VolumeLoaderError::Io(io),
                None => VolumeLoaderError::NoScanFolder(root.to_path_buf()),
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let files = fs::read_dir(entry.path())?
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_ok_and(|t| t.is_file()))
                .count();
            if files > best.as_ref().map_or(0, |(n, _)| *n) {
                best = Some((files, entry.into_path()));
            }
        }
        best.map(|(_, path)| path)
            .ok_or_else(|| VolumeLoaderError::NoScanFolder(root.to_path_buf()))
    }

    fn folder_with_series(
        root: &Path,
        series_uid: &str,
        extension: &str,
    ) -> Result<PathBuf, VolumeLoaderError> {
        for entry in WalkDir::new(root).sort_by_file_name() {
            let Ok(entry) = entry else { continue };
            if !entry.file_type().is_dir() {
                continue;
            }
            let Some(first) = Self::dicom_paths(entry.path(), extension)?.into_iter().next()
            else {
                continue;
            };
            let header = OpenFileOptions::new()
                .read_until(tags::PIXEL_DATA)
                .open_file(&first)?;
            let matches = header
                .element(tags::SERIES_INSTANCE_UID)
                .ok()
                .and_then(|e| e.to_str().ok())
                .is_some_and(|uid| uid.trim_end_matches(['\0', ' ']) == series_uid);
            if matches {
                return Ok(entry.into_path());
            }
        }
        Err(VolumeLoaderError::NoScanFolder(root.to_path_buf()))
    }

    /// Files in `dir` with the DICOM extension, sorted by name.
    pub fn dicom_paths(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, VolumeLoaderError> {
        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// SOP Instance UIDs of the scan in `dir`, in file name order. Only the
    /// headers are read; files without a UID are skipped.
    pub fn instance_uids(dir: &Path, extension: &str) -> Result<Vec<String>, VolumeLoaderError> {
        let paths = Self::dicom_paths(dir, extension)?;
        let uids: Vec<String> = paths
            .par_iter()
            .filter_map(|path| {
                let header = match OpenFileOptions::new()
                    .read_until(tags::PIXEL_DATA)
                    .open_file(path)
                {
                    Ok(header) => header,
                    Err(e) => {
                        warn!(file = %path.display(), error = %e, "skipping unreadable header");
                        return None;
                    }
                };
                header
                    .element(tags::SOP_INSTANCE_UID)
                    .ok()
                    .and_then(|e| e.to_str().ok())
                    .map(|uid| uid.trim_end_matches(['\0', ' ']).to_string())
                    .filter(|uid| !uid.is_empty())
            })
            .collect();

        if uids.is_empty() {
            return Err(VolumeLoaderError::NoValidImages(dir.to_path_buf()));
        }
        Ok(uids)
    }

    /// Load the scan in `dir`: read every DICOM file, order and stack.
    pub fn load_from_directory(
        dir: impl AsRef<Path>,
        extension: &str,
    ) -> Result<Volume, VolumeLoaderError> {
        let dir = dir.as_ref();
        let paths = Self::dicom_paths(dir, extension)?;
        if paths.is_empty() {
            return Err(VolumeLoaderError::NoValidImages(dir.to_path_buf()));
        }

        let slices: Vec<Slice> = paths
            .par_iter()
            .filter_map(|path| match Self::read_slice(path) {
                Ok(slice) => slice,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping unreadable slice");
                    None
                }
            })
            .collect();

        if slices.is_empty() {
            return Err(VolumeLoaderError::NoValidImages(dir.to_path_buf()));
        }
        Self::assemble(slices)
    }

    fn read_slice(path: &Path) -> Result<Option<Slice>, VolumeLoaderError> {
        let object = open_file(path)?;
        let header = match SliceHeader::from_object(&object) {
            Ok(header) => header,
            Err(attribute) => {
                warn!(file = %path.display(), attribute, "skipping slice with missing attribute");
                return Ok(None);
            }
        };
        let Some(pixels) = Self::decode_image(&object) else {
            warn!(file = %path.display(), "skipping slice without decodable pixel data");
            return Ok(None);
        };
        Ok(Some(Slice { header, pixels }))
    }

    /// Stored values of the first frame, before any modality LUT.
    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<i16>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let options = ConvertOptions::new()
            .with_modality_lut(ModalityLutOption::None)
            .with_voi_lut(VoiLutOption::Identity);
        pixel_data
            .to_ndarray_with_options::<i32>(&options)
            .ok()
            .map(|arr| {
                arr.slice_move(s![0, .., .., 0])
                    .mapv(|v| v.clamp(i16::MIN as i32, i16::MAX as i32) as i16)
            })
    }

    /// Order slices by ascending z, derive the slice thickness and stack them.
    ///
    /// # Errors
    ///
    /// `MissingAttribute` when fewer than two slices remain or no thickness
    /// can be derived, `InconsistentDimensions` / `InconsistentSpacing` when
    /// the slices do not share one in-plane geometry.
    pub fn assemble(slices: Vec<Slice>) -> Result<Volume, VolumeLoaderError> {
        let mut slices: Vec<Slice> = slices
            .into_iter()
            .filter(|slice| {
                let ordered = slice.header.z().is_some();
                if !ordered {
                    warn!(uid = %slice.header.sop_instance_uid, "skipping slice without position");
                }
                ordered
            })
            .collect();

        if slices.len() < 2 {
            return Err(VolumeLoaderError::MissingAttribute("SliceThickness"));
        }

        Self::sort_slices(&mut slices);
        let slice_thickness = Self::slice_thickness(&slices[0].header, &slices[1].header)
            .ok_or(VolumeLoaderError::MissingAttribute("SliceThickness"))?;
        debug!(slice_thickness, slices = slices.len(), "ordered scan");

        Self::validate_geometry(&slices)?;

        let pixel_spacing = slices[0].header.pixel_spacing;
        let data = Self::build_volume_array(&slices);
        let headers = slices
            .into_iter()
            .map(|slice| SliceHeader {
                slice_thickness: Some(slice_thickness),
                ..slice.header
            })
            .collect();

        Ok(Volume {
            data,
            headers,
            slice_thickness,
            pixel_spacing,
        })
    }

    fn sort_slices(slices: &mut [Slice]) {
        slices.sort_by(|a, b| {
            a.header
                .z()
                .partial_cmp(&b.header.z())
                .unwrap_or(Ordering::Equal)
        });
    }

    /// Position delta of the first two slices, falling back to the slice
    /// location delta when a position is missing or both coincide. `None`
    /// unless the delta is finite and positive.
    pub fn slice_thickness(first: &SliceHeader, second: &SliceHeader) -> Option<f64> {
        let usable = |d: &f64| d.is_finite() && *d > 0.0;
        let by_position = first
            .position
            .zip(second.position)
            .map(|(a, b)| (a[2] - b[2]).abs())
            .filter(usable);
        let by_location = || {
            first
                .slice_location
                .zip(second.slice_location)
                .map(|(a, b)| (a - b).abs())
                .filter(usable)
        };
        by_position.or_else(by_location)
    }

    fn validate_geometry(slices: &[Slice]) -> Result<(), VolumeLoaderError> {
        let first = &slices[0];
        let first_dim = first.pixels.dim();
        if slices.iter().any(|s| s.pixels.dim() != first_dim) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }
        let (row, col) = first.header.pixel_spacing;
        if slices.iter().any(|s| {
            let (r, c) = s.header.pixel_spacing;
            (r - row).abs() > SPACING_TOLERANCE || (c - col).abs() > SPACING_TOLERANCE
        }) {
            return Err(VolumeLoaderError::InconsistentSpacing);
        }
        Ok(())
    }

    fn build_volume_array(slices: &[Slice]) -> Array3<i16> {
        let (height, width) = slices[0].pixels.dim();
        let depth = slices.len();
        let mut volume = Array3::<i16>::zeros((depth, height, width));

        for (i, slice) in slices.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(&slice.pixels);
        }

        volume
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::Rescale;

    fn slice(uid: &str, z: Option<f64>, location: Option<f64>) -> Slice {
        Slice {
            header: SliceHeader {
                sop_instance_uid: uid.to_string(),
                position: z.map(|z| [0.0, 0.0, z]),
                slice_location: location,
                pixel_spacing: (0.7, 0.7),
                rescale: Rescale::default(),
                slice_thickness: None,
            },
            pixels: Array2::from_elem((2, 2), z.unwrap_or(0.0) as i16),
        }
    }

    #[test]
    fn orders_by_z_and_derives_thickness() {
        let volume = VolumeLoader::assemble(vec![
            slice("c", Some(2.0), None),
            slice("a", Some(0.0), None),
            slice("b", Some(1.0), None),
        ])
        .unwrap();
        assert_eq!(volume.instance_uids().collect::<Vec<_>>(), ["a", "b", "c"]);
        assert_eq!(volume.slice_thickness, 1.0);
        assert_eq!(volume.spacing(), [1.0, 0.7, 0.7]);
        assert!(volume.headers.iter().all(|h| h.slice_thickness == Some(1.0)));
        assert_eq!(volume.data[[2, 0, 0]], 2);
    }

    #[test]
    fn falls_back_to_slice_location() {
        let volume = VolumeLoader::assemble(vec![
            slice("a", Some(5.0), Some(-10.0)),
            slice("b", Some(5.0), Some(-12.5)),
        ])
        .unwrap();
        assert_eq!(volume.slice_thickness, 2.5);
    }

    #[test]
    fn coincident_slices_have_no_thickness() {
        let err = VolumeLoader::assemble(vec![
            slice("a", Some(5.0), Some(5.0)),
            slice("b", Some(5.0), Some(5.0)),
        ])
        .unwrap_err();
        assert!(matches!(err, VolumeLoaderError::MissingAttribute("SliceThickness")));

        let err = VolumeLoader::assemble(vec![slice("a", Some(5.0), None), slice("b", Some(5.0), None)])
            .unwrap_err();
        assert!(matches!(err, VolumeLoaderError::MissingAttribute("SliceThickness")));
    }

    #[test]
    fn single_slice_has_no_thickness() {
        let err = VolumeLoader::assemble(vec![slice("a", Some(0.0), None)]).unwrap_err();
        assert!(matches!(err, VolumeLoaderError::MissingAttribute("SliceThickness")));
    }

    #[test]
    fn rejects_mixed_spacing() {
        let mut odd = slice("b", Some(1.0), None);
        odd.header.pixel_spacing = (0.8, 0.8);
        let err = VolumeLoader::assemble(vec![slice("a", Some(0.0), None), odd]).unwrap_err();
        assert!(matches!(err, VolumeLoaderError::InconsistentSpacing));
    }

    #[test]
    fn rejects_mixed_dimensions() {
        let mut odd = slice("b", Some(1.0), None);
        odd.pixels = Array2::zeros((3, 2));
        let err = VolumeLoader::assemble(vec![slice("a", Some(0.0), None), odd]).unwrap_err();
        assert!(matches!(err, VolumeLoaderError::InconsistentDimensions));
    }

    #[test]
    fn picks_folder_with_most_files() {
        let temp = tempfile::tempdir().unwrap();
        let scan = temp.path().join("study/3000566-series");
        let thumbs = temp.path().join("study/3000923-thumbs");
        fs::create_dir_all(&scan).unwrap();
        fs::create_dir_all(&thumbs).unwrap();
        for i in 0..3 {
            fs::write(scan.join(format!("1-{i:03}.dcm")), b"").unwrap();
        }
        fs::write(thumbs.join("1-001.dcm"), b"").unwrap();
        fs::write(temp.path().join("069.xml"), b"").unwrap();

        let selected = VolumeLoader::folder_with_most_files(temp.path()).unwrap();
        assert_eq!(selected, scan);
        assert_eq!(VolumeLoader::dicom_paths(&selected, "dcm").unwrap().len(), 3);
    }

    #[test]
    fn empty_tree_has_no_scan_folder() {
        let temp = tempfile::tempdir().unwrap();
        let err = VolumeLoader::folder_with_most_files(temp.path()).unwrap_err();
        assert!(matches!(err, VolumeLoaderError::NoScanFolder(_)));
    }
}
