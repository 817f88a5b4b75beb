pub mod model;
pub mod parser;
pub mod table;

use std::path::PathBuf;

use thiserror::Error;

use crate::volume_loader::VolumeLoaderError;

pub use model::{
    AnnotationDocument, AnnotationHeader, BoundingRect, EdgePoint, Nodule, NoduleCharacteristics,
    NoduleKind, RadiologistReading, Region,
};
pub use parser::AnnotationParser;
pub use table::{AnnotationRow, AnnotationStore, AnnotationTables, CharacteristicsRow};

#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("Missing {0}")]
    MissingData(String),

    #[error("Expected one annotation file in {dir}, found {count}")]
    AmbiguousData { dir: PathBuf, count: usize },

    #[error("Malformed {field}: {value:?}")]
    MalformedValue { field: String, value: String },

    #[error("Unexpected columns in {path}: {found:?}")]
    UnexpectedHeader { path: PathBuf, found: String },

    #[error("XML error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    ScanFolder(#[from] VolumeLoaderError),
}

impl AnnotationError {
    pub(crate) fn malformed(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::MalformedValue {
            field: field.into(),
            value: value.into(),
        }
    }
}
