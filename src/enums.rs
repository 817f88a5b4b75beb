use std::fmt;

use serde::{Deserialize, Serialize};

/// How the scan folder is picked among the subfolders of a patient folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ScanSelection {
    /// The folder holding the most files anywhere below the patient folder.
    #[default]
    MostFiles,
    /// The folder whose DICOM files carry this Series Instance UID.
    SeriesInstanceUid(String),
}

/// Which volume is rasterized into the per-patient image folder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputImage {
    #[default]
    Mask,
    Calibrated,
    MaskedCalibrated,
}

/// Tag of a flattened annotation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoduleType {
    #[serde(rename = "N")]
    Normal,
    #[serde(rename = "S")]
    Small,
    #[serde(rename = "NN")]
    NonNodule,
}

impl NoduleType {
    pub fn tag(self) -> &'static str {
        match self {
            NoduleType::Normal => "N",
            NoduleType::Small => "S",
            NoduleType::NonNodule => "NN",
        }
    }
}

impl fmt::Display for NoduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Binary classification of a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SliceLabel {
    #[serde(rename = "0")]
    Negative,
    #[serde(rename = "1")]
    Positive,
}

impl SliceLabel {
    pub fn as_u8(self) -> u8 {
        match self {
            SliceLabel::Negative => 0,
            SliceLabel::Positive => 1,
        }
    }
}
