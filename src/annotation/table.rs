use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{
    AnnotationError, AnnotationParser,
    model::{AnnotationDocument, BoundingRect, EdgePoint, NoduleCharacteristics},
};
use crate::{
    config::{AnnotationConfig, PipelineConfig},
    enums::{NoduleType, ScanSelection},
    volume_loader::VolumeLoader,
};

const REGION_COLUMNS: [&str; 15] = [
    "radiologist",
    "nodule_type",
    "number",
    "nodule_id",
    "inclusion",
    "z_position",
    "sop_uid",
    "point_count",
    "points",
    "centroid_x",
    "centroid_y",
    "rect_x_min",
    "rect_y_min",
    "rect_x_max",
    "rect_y_max",
];

const CHARACTERISTICS_COLUMNS: [&str; 13] = [
    "radiologist",
    "nodule_type",
    "number",
    "nodule_id",
    "subtlety",
    "internal_structure",
    "calcification",
    "sphericity",
    "margin",
    "lobulation",
    "spiculation",
    "texture",
    "malignancy",
];

/// One region of one nodule.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRow {
    /// 1-based reading session.
    pub radiologist: usize,
    pub nodule_type: NoduleType,
    pub number: usize,
    pub nodule_id: String,
    pub inclusion: bool,
    pub z_position: f64,
    pub sop_uid: String,
    pub points: Vec<EdgePoint>,
    pub centroid: Option<(f64, f64)>,
    pub rect: Option<BoundingRect>,
}

impl AnnotationRow {
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Whether the row outlines part of a scored nodule.
    pub fn is_nodule_outline(&self) -> bool {
        self.nodule_type == NoduleType::Normal && self.inclusion
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CharacteristicsRow {
    pub radiologist: usize,
    pub nodule_type: NoduleType,
    pub number: usize,
    pub nodule_id: String,
    pub characteristics: NoduleCharacteristics,
}

/// One row per region, grouped per session as normal, small, non-nodule.
/// `number` counts nodules from 1 within their type and session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationTables {
    pub regions: Vec<AnnotationRow>,
    pub characteristics: Vec<CharacteristicsRow>,
}

impl AnnotationTables {
    pub fn from_document(document: &AnnotationDocument) -> Self {
        let mut tables = Self::default();
        for reading in &document.readings {
            for (nodule_type, nodules) in reading.groups() {
                for (index, nodule) in nodules.iter().enumerate() {
                    let number = index + 1;
                    tables.regions.extend(nodule.regions.iter().map(|region| AnnotationRow {
                        radiologist: reading.number,
                        nodule_type,
                        number,
                        nodule_id: nodule.id.clone(),
                        inclusion: region.inclusion,
                        z_position: region.z_position,
                        sop_uid: region.sop_uid.clone(),
                        points: region.edge_points.clone(),
                        centroid: region.bounds.map(|rect| rect.centroid()),
                        rect: region.bounds,
                    }));
                    if let Some(characteristics) = nodule.kind.characteristics() {
                        tables.characteristics.push(CharacteristicsRow {
                            radiologist: reading.number,
                            nodule_type,
                            number,
                            nodule_id: nodule.id.clone(),
                            characteristics: *characteristics,
                        });
                    }
                }
            }
        }
        tables
    }

    /// Malignancy score of a normal nodule.
    pub fn malignancy(&self, radiologist: usize, number: usize) -> Option<u8> {
        self.characteristics
            .iter()
            .find(|row| row.radiologist == radiologist && row.number == number)
            .map(|row| row.characteristics.malignancy)
    }

    pub fn write(&self, regions_path: &Path, characteristics_path: &Path) -> Result<(), AnnotationError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(regions_path)?;
        writer.write_record(REGION_COLUMNS)?;
        for row in &self.regions {
            writer.serialize(RegionRecord::from(row))?;
        }
        writer.flush()?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(characteristics_path)?;
        writer.write_record(CHARACTERISTICS_COLUMNS)?;
        for row in &self.characteristics {
            writer.serialize(CharacteristicsRecord::from(row))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Load persisted tables. Rows that fail to parse are logged and skipped;
    /// a file whose header is not ours fails with `UnexpectedHeader`.
    pub fn read(regions_path: &Path, characteristics_path: &Path) -> Result<Self, AnnotationError> {
        let regions = read_rows::<RegionRecord, AnnotationRow>(regions_path, &REGION_COLUMNS)?;
        let characteristics = read_rows::<CharacteristicsRecord, CharacteristicsRow>(
            characteristics_path,
            &CHARACTERISTICS_COLUMNS,
        )?;
        Ok(Self {
            regions,
            characteristics,
        })
    }
}

fn read_rows<R, T>(path: &Path, columns: &[&str]) -> Result<Vec<T>, AnnotationError>
where
    R: for<'de> Deserialize<'de>,
    T: TryFrom<R, Error = AnnotationError>,
{
    let mut reader = csv::Reader::from_path(path)?;
    let header = reader.headers()?;
    if !header.iter().eq(columns.iter().copied()) {
        return Err(AnnotationError::UnexpectedHeader {
            path: path.to_path_buf(),
            found: header.iter().collect::<Vec<_>>().join(","),
        });
    }
    let mut rows = Vec::new();
    for (index, record) in reader.deserialize::<R>().enumerate() {
        let parsed = match record {
            Ok(record) => T::try_from(record),
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => Err(e.into()),
        };
        match parsed {
            Ok(row) => rows.push(row),
            Err(e) => warn!(file = %path.display(), row = index + 1, error = %e, "skipping malformed row"),
        }
    }
    Ok(rows)
}

#[derive(Debug, Serialize, Deserialize)]
struct RegionRecord {
    radiologist: usize,
    nodule_type: NoduleType,
    number: usize,
    nodule_id: String,
    inclusion: bool,
    z_position: f64,
    sop_uid: String,
    point_count: usize,
    /// `x y` pairs separated by `;`.
    points: String,
    centroid_x: Option<f64>,
    centroid_y: Option<f64>,
    rect_x_min: Option<i32>,
    rect_y_min: Option<i32>,
    rect_x_max: Option<i32>,
    rect_y_max: Option<i32>,
}

impl From<&AnnotationRow> for RegionRecord {
    fn from(row: &AnnotationRow) -> Self {
        let points = row
            .points
            .iter()
            .map(|p| format!("{} {}", p.x, p.y))
            .collect::<Vec<_>>()
            .join(";");
        Self {
            radiologist: row.radiologist,
            nodule_type: row.nodule_type,
            number: row.number,
            nodule_id: row.nodule_id.clone(),
            inclusion: row.inclusion,
            z_position: row.z_position,
            sop_uid: row.sop_uid.clone(),
            point_count: row.points.len(),
            points,
            centroid_x: row.centroid.map(|c| c.0),
            centroid_y: row.centroid.map(|c| c.1),
            rect_x_min: row.rect.map(|r| r.x_min),
            rect_y_min: row.rect.map(|r| r.y_min),
            rect_x_max: row.rect.map(|r| r.x_max),
            rect_y_max: row.rect.map(|r| r.y_max),
        }
    }
}

impl TryFrom<RegionRecord> for AnnotationRow {
    type Error = AnnotationError;

    fn try_from(record: RegionRecord) -> Result<Self, Self::Error> {
        let points = parse_points(&record.points)?;
        if points.len() != record.point_count {
            return Err(AnnotationError::malformed(
                "point_count",
                record.point_count.to_string(),
            ));
        }

        let centroid = match (record.centroid_x, record.centroid_y) {
            (Some(x), Some(y)) => Some((x, y)),
            (None, None) => None,
            partial => return Err(AnnotationError::malformed("centroid", format!("{partial:?}"))),
        };
        let rect = match (
            record.rect_x_min,
            record.rect_y_min,
            record.rect_x_max,
            record.rect_y_max,
        ) {
            (Some(x_min), Some(y_min), Some(x_max), Some(y_max)) => Some(BoundingRect {
                x_min,
                y_min,
                x_max,
                y_max,
            }),
            (None, None, None, None) => None,
            partial => return Err(AnnotationError::malformed("rect", format!("{partial:?}"))),
        };

        Ok(Self {
            radiologist: record.radiologist,
            nodule_type: record.nodule_type,
            number: record.number,
            nodule_id: record.nodule_id,
            inclusion: record.inclusion,
            z_position: record.z_position,
            sop_uid: record.sop_uid,
            points,
            centroid,
            rect,
        })
    }
}

fn parse_points(text: &str) -> Result<Vec<EdgePoint>, AnnotationError> {
    text.split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let mut coords = pair.split_whitespace().map(str::parse::<i32>);
            match (coords.next(), coords.next(), coords.next()) {
                (Some(Ok(x)), Some(Ok(y)), None) => Ok(EdgePoint::new(x, y)),
                _ => Err(AnnotationError::malformed("points", pair)),
            }
        })
        .collect()
}

#[derive(Debug, Serialize, Deserialize)]
struct CharacteristicsRecord {
    radiologist: usize,
    nodule_type: NoduleType,
    number: usize,
    nodule_id: String,
    subtlety: u8,
    internal_structure: u8,
    calcification: u8,
    sphericity: u8,
    margin: u8,
    lobulation: u8,
    spiculation: u8,
    texture: u8,
    malignancy: u8,
}

impl From<&CharacteristicsRow> for CharacteristicsRecord {
    fn from(row: &CharacteristicsRow) -> Self {
        let c = &row.characteristics;
        Self {
            radiologist: row.radiologist,
            nodule_type: row.nodule_type,
            number: row.number,
            nodule_id: row.nodule_id.clone(),
            subtlety: c.subtlety,
            internal_structure: c.internal_structure,
            calcification: c.calcification,
            sphericity: c.sphericity,
            margin: c.margin,
            lobulation: c.lobulation,
            spiculation: c.spiculation,
            texture: c.texture,
            malignancy: c.malignancy,
        }
    }
}

impl TryFrom<CharacteristicsRecord> for CharacteristicsRow {
    type Error = AnnotationError;

    fn try_from(record: CharacteristicsRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            radiologist: record.radiologist,
            nodule_type: record.nodule_type,
            number: record.number,
            nodule_id: record.nodule_id,
            characteristics: NoduleCharacteristics {
                subtlety: record.subtlety,
                internal_structure: record.internal_structure,
                calcification: record.calcification,
                sphericity: record.sphericity,
                margin: record.margin,
                lobulation: record.lobulation,
                spiculation: record.spiculation,
                texture: record.texture,
                malignancy: record.malignancy,
            },
        })
    }
}

/// Read-through cache of annotation tables, keyed by patient folder.
///
/// The tables are stored inside the patient folder. When both files exist
/// with our columns they are loaded as is; otherwise the read message of the
/// scan folder is parsed and the tables are (re)written for the next run.
#[derive(Debug, Clone)]
pub struct AnnotationStore {
    parser: AnnotationParser,
    config: AnnotationConfig,
    scan_selection: ScanSelection,
    dicom_extension: String,
}

impl AnnotationStore {
    pub fn new(
        config: AnnotationConfig,
        scan_selection: ScanSelection,
        dicom_extension: impl Into<String>,
    ) -> Self {
        Self {
            parser: AnnotationParser::from_config(&config),
            config,
            scan_selection,
            dicom_extension: dicom_extension.into(),
        }
    }

    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self::new(
            config.annotation.clone(),
            config.scan_selection.clone(),
            config.dicom_extension.clone(),
        )
    }

    /// Paths of the region and characteristics tables of a patient.
    pub fn table_paths(&self, patient_dir: &Path) -> (PathBuf, PathBuf) {
        (
            patient_dir.join(&self.config.annotation_file),
            patient_dir.join(&self.config.characteristics_file),
        )
    }

    pub fn load_or_parse(&self, patient_dir: &Path) -> Result<AnnotationTables, AnnotationError> {
        let (regions_path, characteristics_path) = self.table_paths(patient_dir);
        if regions_path.is_file() && characteristics_path.is_file() {
            debug!(path = %regions_path.display(), "loading cached annotation tables");
            match AnnotationTables::read(&regions_path, &characteristics_path) {
                Err(AnnotationError::UnexpectedHeader { path, found }) => {
                    warn!(file = %path.display(), columns = %found, "ignoring foreign annotation table");
                }
                cached => return cached,
            }
        }

        let scan_dir = VolumeLoader::select_scan_folder(
            patient_dir,
            &self.scan_selection,
            &self.dicom_extension,
        )?;
        let xml = self.find_annotation_file(&scan_dir)?;
        let document = self.parser.parse_file(&xml)?;
        let tables = AnnotationTables::from_document(&document);
        info!(
            file = %xml.display(),
            readings = document.readings.len(),
            regions = tables.regions.len(),
            "parsed annotations"
        );

        tables.write(&regions_path, &characteristics_path)?;
        Ok(tables)
    }

    /// The single read message below `scan_dir`.
    pub fn find_annotation_file(&self, scan_dir: &Path) -> Result<PathBuf, AnnotationError> {
        let mut found: Vec<PathBuf> = WalkDir::new(scan_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.config.xml_extension))
            })
            .collect();

        match found.len() {
            1 => Ok(found.remove(0)),
            0 => Err(AnnotationError::MissingData(format!(
                "annotation file in {}",
                scan_dir.display()
            ))),
            count => Err(AnnotationError::AmbiguousData {
                dir: scan_dir.to_path_buf(),
                count,
            }),
        }
    }
}
