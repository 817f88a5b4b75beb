use std::{collections::HashSet, fmt, fs, io, path::Path};

use serde::Serialize;
use tracing::debug;

use crate::{
    annotation::{AnnotationRow, AnnotationTables},
    config::LabelConfig,
    enums::{NoduleType, SliceLabel},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabeledSlice {
    pub uid: String,
    pub label: SliceLabel,
}

/// A slice is positive when its SOP Instance UID carries an inclusion region
/// of a scored nodule, by any radiologist.
#[derive(Debug, Clone, Default)]
pub struct SliceAnnotationCorrelator {
    positive: HashSet<String>,
}

impl SliceAnnotationCorrelator {
    pub fn new(tables: &AnnotationTables) -> Self {
        Self::from_rows(&tables.regions)
    }

    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a AnnotationRow>) -> Self {
        let positive = rows
            .into_iter()
            .filter(|row| row.is_nodule_outline())
            .map(|row| row.sop_uid.clone())
            .collect();
        Self { positive }
    }

    pub fn label(&self, uid: &str) -> SliceLabel {
        if self.positive.contains(uid) {
            SliceLabel::Positive
        } else {
            SliceLabel::Negative
        }
    }

    /// Label every slice of a scan, keeping the given order.
    pub fn classify<I, S>(&self, uids: I) -> Vec<LabeledSlice>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        uids.into_iter()
            .map(|uid| {
                let uid = uid.into();
                let label = self.label(&uid);
                LabeledSlice { uid, label }
            })
            .collect()
    }

    /// Number of distinct positive UIDs, present in the scan or not.
    pub fn positive_count(&self) -> usize {
        self.positive.len()
    }
}

/// `<label> <x_center> <y_center> <width> <height>`, geometry in `[0, 1]`
/// image fractions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionLabel {
    pub label: SliceLabel,
    pub x_center: f64,
    pub y_center: f64,
    pub width: f64,
    pub height: f64,
}

impl fmt::Display for DetectionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.label.as_u8(),
            self.x_center,
            self.y_center,
            self.width,
            self.height
        )
    }
}

impl DetectionLabel {
    /// Derive the label of one annotation row.
    ///
    /// The class is positive for a scored nodule with a non-zero malignancy.
    /// The centre is the region centroid, or the point itself for a single
    /// point marker; rows with neither yield `None`. Positive rows take
    /// their box from the outline extent, every other row gets the default
    /// box.
    pub fn from_row(
        row: &AnnotationRow,
        malignancy: Option<u8>,
        config: &LabelConfig,
    ) -> Option<Self> {
        let label = if row.nodule_type == NoduleType::Normal && malignancy.is_some_and(|m| m != 0) {
            SliceLabel::Positive
        } else {
            SliceLabel::Negative
        };

        let (x, y) = match (row.centroid, row.points.as_slice()) {
            (Some(centroid), _) => centroid,
            (None, [point]) => (f64::from(point.x), f64::from(point.y)),
            (None, _) => return None,
        };

        let (width, height) = match (label, row.rect) {
            (SliceLabel::Positive, Some(rect)) => (f64::from(rect.width()), f64::from(rect.height())),
            _ => (config.default_box_size, config.default_box_size),
        };

        let image_width = f64::from(config.image_width);
        let image_height = f64::from(config.image_height);
        Some(Self {
            label,
            x_center: x / image_width,
            y_center: y / image_height,
            width: width / image_width,
            height: height / image_height,
        })
    }
}

/// One detection label per annotated slice, from the first row of that
/// slice in table order.
pub fn detection_labels(tables: &AnnotationTables, config: &LabelConfig) -> Vec<(String, DetectionLabel)> {
    let mut seen = HashSet::new();
    tables
        .regions
        .iter()
        .filter(|row| seen.insert(row.sop_uid.as_str()))
        .filter_map(|row| {
            let malignancy = tables.malignancy(row.radiologist, row.number);
            match DetectionLabel::from_row(row, malignancy, config) {
                Some(label) => Some((row.sop_uid.clone(), label)),
                None => {
                    debug!(
                        uid = %row.sop_uid,
                        points = row.point_count(),
                        "no centre for detection label"
                    );
                    None
                }
            }
        })
        .collect()
}

/// Write `<uid>.txt` per label into `dir`.
pub fn write_detection_labels(dir: &Path, labels: &[(String, DetectionLabel)]) -> io::Result<usize> {
    fs::create_dir_all(dir)?;
    for (uid, label) in labels {
        fs::write(dir.join(format!("{uid}.txt")), format!("{label}\n"))?;
    }
    Ok(labels.len())
}

/// Write the `uid,label` manifest of a scan.
pub fn write_slice_manifest(path: &Path, slices: &[LabeledSlice]) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_path(path)?;
    for slice in slices {
        writer.serialize(slice)?;
    }
    writer.flush()?;
    Ok(())
}
