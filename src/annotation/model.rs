use crate::enums::NoduleType;

/// One contour or locus point in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgePoint {
    pub x: i32,
    pub y: i32,
}

impl EdgePoint {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned extent of a region's edge points, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingRect {
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
}

impl BoundingRect {
    pub fn from_points(points: &[EdgePoint]) -> Option<Self> {
        let first = points.first()?;
        Some(points.iter().fold(
            Self {
                x_min: first.x,
                y_min: first.y,
                x_max: first.x,
                y_max: first.y,
            },
            |r, p| Self {
                x_min: r.x_min.min(p.x),
                y_min: r.y_min.min(p.y),
                x_max: r.x_max.max(p.x),
                y_max: r.y_max.max(p.y),
            },
        ))
    }

    pub fn width(&self) -> i32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> i32 {
        self.y_max - self.y_min
    }

    /// Midpoint of the extrema.
    pub fn centroid(&self) -> (f64, f64) {
        (
            f64::from(self.x_max + self.x_min) / 2.0,
            f64::from(self.y_max + self.y_min) / 2.0,
        )
    }
}

/// Region of interest: one nodule outline (or marker) on one slice.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub z_position: f64,
    pub sop_uid: String,
    /// `false` marks a hole cut out of an enclosing region.
    pub inclusion: bool,
    /// In document order.
    pub edge_points: Vec<EdgePoint>,
    /// Only derived for scored nodules.
    pub bounds: Option<BoundingRect>,
}

/// Radiologist scores of a nodule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoduleCharacteristics {
    pub subtlety: u8,
    pub internal_structure: u8,
    pub calcification: u8,
    pub sphericity: u8,
    pub margin: u8,
    pub lobulation: u8,
    pub spiculation: u8,
    pub texture: u8,
    pub malignancy: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NoduleKind {
    Normal(NoduleCharacteristics),
    Small,
    NonNodule,
}

impl NoduleKind {
    pub fn nodule_type(&self) -> NoduleType {
        match self {
            NoduleKind::Normal(_) => NoduleType::Normal,
            NoduleKind::Small => NoduleType::Small,
            NoduleKind::NonNodule => NoduleType::NonNodule,
        }
    }

    pub fn characteristics(&self) -> Option<&NoduleCharacteristics> {
        match self {
            NoduleKind::Normal(characteristics) => Some(characteristics),
            NoduleKind::Small | NoduleKind::NonNodule => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Nodule {
    pub id: String,
    pub kind: NoduleKind,
    pub regions: Vec<Region>,
}

/// One radiologist's reading session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RadiologistReading {
    /// 1-based position of the session in the document.
    pub number: usize,
    pub version: Option<String>,
    pub radiologist_id: Option<String>,
    pub normal_nodules: Vec<Nodule>,
    pub small_nodules: Vec<Nodule>,
    pub non_nodules: Vec<Nodule>,
}

impl RadiologistReading {
    pub fn new(number: usize) -> Self {
        Self {
            number,
            ..Self::default()
        }
    }

    /// File a nodule under the list matching its kind.
    pub fn push(&mut self, nodule: Nodule) {
        match nodule.kind {
            NoduleKind::Normal(_) => self.normal_nodules.push(nodule),
            NoduleKind::Small => self.small_nodules.push(nodule),
            NoduleKind::NonNodule => self.non_nodules.push(nodule),
        }
    }

    /// Nodule lists in row order: normal, small, non-nodule.
    pub fn groups(&self) -> [(NoduleType, &[Nodule]); 3] {
        [
            (NoduleType::Normal, self.normal_nodules.as_slice()),
            (NoduleType::Small, self.small_nodules.as_slice()),
            (NoduleType::NonNodule, self.non_nodules.as_slice()),
        ]
    }

    pub fn region_count(&self) -> usize {
        self.groups()
            .iter()
            .flat_map(|(_, nodules)| nodules.iter())
            .map(|n| n.regions.len())
            .sum()
    }
}

/// `ResponseHeader` of a read message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationHeader {
    pub version: Option<String>,
    pub message_id: Option<String>,
    pub date_request: Option<String>,
    pub time_request: Option<String>,
    pub task_description: Option<String>,
    pub series_instance_uid: Option<String>,
    pub date_service: Option<String>,
    pub time_service: Option<String>,
    pub study_instance_uid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationDocument {
    pub header: Option<AnnotationHeader>,
    pub readings: Vec<RadiologistReading>,
}

impl AnnotationDocument {
    pub fn region_count(&self) -> usize {
        self.readings.iter().map(RadiologistReading::region_count).sum()
    }
}
