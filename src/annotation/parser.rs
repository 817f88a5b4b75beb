use std::{fs, path::Path, str::FromStr};

use roxmltree::{Document, Node};
use tracing::{debug, warn};

use super::{
    AnnotationError,
    model::{
        AnnotationDocument, AnnotationHeader, BoundingRect, EdgePoint, Nodule,
        NoduleCharacteristics, NoduleKind, RadiologistReading, Region,
    },
};
use crate::config::AnnotationConfig;

/// Reader for LIDC read messages.
///
/// Elements are matched by local name within one namespace. A nodule whose
/// own fields are missing or malformed is dropped, as is a single region
/// with a bad field; the rest of the document is still returned.
#[derive(Debug, Clone)]
pub struct AnnotationParser {
    namespace: String,
}

impl AnnotationParser {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn from_config(config: &AnnotationConfig) -> Self {
        Self::new(config.namespace.clone())
    }

    pub fn parse_file(&self, path: &Path) -> Result<AnnotationDocument, AnnotationError> {
        debug!(path = %path.display(), "parsing annotation file");
        let xml = fs::read_to_string(path)?;
        self.parse_str(&xml)
    }

    pub fn parse_str(&self, xml: &str) -> Result<AnnotationDocument, AnnotationError> {
        let document = Document::parse(xml)?;
        let root = document.root_element();

        let header = self
            .child(root, "ResponseHeader")
            .map(|node| self.parse_header(node));
        let readings: Vec<_> = self
            .children(root, "readingSession")
            .enumerate()
            .map(|(index, session)| self.parse_reading(session, index + 1))
            .collect();

        if readings.is_empty() {
            debug!(namespace = %self.namespace, "no reading sessions in annotation file");
        }
        Ok(AnnotationDocument { header, readings })
    }

    fn parse_header(&self, node: Node<'_, '_>) -> AnnotationHeader {
        AnnotationHeader {
            version: self.optional_text(node, "Version"),
            message_id: self.optional_text(node, "MessageId"),
            date_request: self.optional_text(node, "DateRequest"),
            time_request: self.optional_text(node, "TimeRequest"),
            task_description: self.optional_text(node, "TaskDescription"),
            series_instance_uid: self.optional_text(node, "SeriesInstanceUid"),
            date_service: self.optional_text(node, "DateService"),
            time_service: self.optional_text(node, "TimeService"),
            study_instance_uid: self.optional_text(node, "StudyInstanceUID"),
        }
    }

    fn parse_reading(&self, session: Node<'_, '_>, number: usize) -> RadiologistReading {
        let mut reading = RadiologistReading::new(number);
        reading.version = self.optional_text(session, "annotationVersion");
        reading.radiologist_id = self.optional_text(session, "servicingRadiologistID");

        for node in self.children(session, "unblindedReadNodule") {
            match self.parse_nodule(node) {
                Ok(nodule) => reading.push(nodule),
                Err(e) => warn!(reading = number, error = %e, "skipping nodule"),
            }
        }
        for node in self.children(session, "nonNodule") {
            match self.parse_non_nodule(node) {
                Ok(nodule) => reading.push(nodule),
                Err(e) => warn!(reading = number, error = %e, "skipping non-nodule"),
            }
        }
        reading
    }

    fn parse_nodule(&self, node: Node<'_, '_>) -> Result<Nodule, AnnotationError> {
        let id = self.text(node, "noduleID")?.to_string();

        // Scores are only given for nodules of 3 mm and above.
        let kind = match self
            .child(node, "characteristics")
            .filter(|c| c.children().any(|n| n.is_element()))
        {
            Some(characteristics) => {
                NoduleKind::Normal(self.parse_characteristics(characteristics)?)
            }
            None => NoduleKind::Small,
        };
        let scored = matches!(kind, NoduleKind::Normal(_));

        let regions = self
            .children(node, "roi")
            .filter_map(|roi| match self.parse_region(roi, scored) {
                Ok(region) => Some(region),
                Err(e) => {
                    warn!(nodule = %id, error = %e, "skipping region");
                    None
                }
            })
            .collect();

        Ok(Nodule { id, kind, regions })
    }

    fn parse_characteristics(
        &self,
        node: Node<'_, '_>,
    ) -> Result<NoduleCharacteristics, AnnotationError> {
        Ok(NoduleCharacteristics {
            subtlety: self.number(node, "subtlety")?,
            internal_structure: self.number(node, "internalStructure")?,
            calcification: self.number(node, "calcification")?,
            sphericity: self.number(node, "sphericity")?,
            margin: self.number(node, "margin")?,
            lobulation: self.number(node, "lobulation")?,
            spiculation: self.number(node, "spiculation")?,
            texture: self.number(node, "texture")?,
            malignancy: self.number(node, "malignancy")?,
        })
    }

    fn parse_region(&self, roi: Node<'_, '_>, scored: bool) -> Result<Region, AnnotationError> {
        let z_position = self.number(roi, "imageZposition")?;
        let sop_uid = self.text(roi, "imageSOP_UID")?.to_string();
        let inclusion = self.text(roi, "inclusion")?.eq_ignore_ascii_case("true");
        let edge_points = self
            .children(roi, "edgeMap")
            .map(|edge| self.point(edge))
            .collect::<Result<Vec<_>, _>>()?;
        let bounds = if scored {
            BoundingRect::from_points(&edge_points)
        } else {
            None
        };

        Ok(Region {
            z_position,
            sop_uid,
            inclusion,
            edge_points,
            bounds,
        })
    }

    /// A non-nodule is a single marker on one slice.
    fn parse_non_nodule(&self, node: Node<'_, '_>) -> Result<Nodule, AnnotationError> {
        let id = self.text(node, "nonNoduleID")?.to_string();
        let region = Region {
            z_position: self.number(node, "imageZposition")?,
            sop_uid: self.text(node, "imageSOP_UID")?.to_string(),
            inclusion: true,
            edge_points: self
                .children(node, "locus")
                .map(|locus| self.point(locus))
                .collect::<Result<Vec<_>, _>>()?,
            bounds: None,
        };

        Ok(Nodule {
            id,
            kind: NoduleKind::NonNodule,
            regions: vec![region],
        })
    }

    fn point(&self, node: Node<'_, '_>) -> Result<EdgePoint, AnnotationError> {
        Ok(EdgePoint::new(
            self.number(node, "xCoord")?,
            self.number(node, "yCoord")?,
        ))
    }

    fn is(&self, node: &Node<'_, '_>, name: &str) -> bool {
        node.is_element()
            && node.tag_name().name() == name
            && node.tag_name().namespace() == Some(self.namespace.as_str())
    }

    fn child<'a, 'input>(&self, node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
        node.children().find(|n| self.is(n, name))
    }

    fn children<'a, 'input>(
        &self,
        node: Node<'a, 'input>,
        name: &str,
    ) -> impl Iterator<Item = Node<'a, 'input>> {
        node.children().filter(move |n| self.is(n, name))
    }

    fn text<'a>(&self, node: Node<'a, '_>, name: &str) -> Result<&'a str, AnnotationError> {
        self.child(node, name)
            .and_then(|n| n.text())
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| AnnotationError::MissingData(name.to_string()))
    }

    fn optional_text(&self, node: Node<'_, '_>, name: &str) -> Option<String> {
        self.text(node, name).ok().map(str::to_string)
    }

    fn number<T: FromStr>(&self, node: Node<'_, '_>, name: &str) -> Result<T, AnnotationError> {
        let text = self.text(node, name)?;
        text.parse()
            .map_err(|_| AnnotationError::malformed(name, text))
    }
}

impl Default for AnnotationParser {
    fn default() -> Self {
        Self::from_config(&AnnotationConfig::default())
    }
}
