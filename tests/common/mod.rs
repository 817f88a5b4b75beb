#![allow(dead_code)]

use std::{fs, path::Path};

use dicom::{
    core::{DataElement, PrimitiveValue, VR, dicom_value},
    object::{FileMetaTableBuilder, InMemDicomObject},
};
use dicom_dictionary_std::{tags, uids};

pub const NAMESPACE: &str = "http://www.nih.gov";

pub struct CtSlice<'a> {
    pub uid: &'a str,
    pub z: f64,
    pub pixels: Vec<u16>,
}

/// Write a single-frame, 16-bit unsigned CT slice with intercept -1024.
/// Empty `pixels` leave Pixel Data out, so only the header can be read.
pub fn write_ct_slice(path: &Path, rows: u16, columns: u16, slice: &CtSlice<'_>) {
    let z = format!("{:.1}", slice.z);
    let mut elements = vec![
        DataElement::new(tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(uids::CT_IMAGE_STORAGE)),
        DataElement::new(tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(slice.uid)),
        DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("CT")),
        DataElement::new(tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3.9")),
        DataElement::new(
            tags::IMAGE_POSITION_PATIENT,
            VR::DS,
            dicom_value!(Strs, ["0.0", "0.0", z.as_str()]),
        ),
        DataElement::new(tags::SLICE_LOCATION, VR::DS, PrimitiveValue::from(z.as_str())),
        DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)),
        DataElement::new(
            tags::PHOTOMETRIC_INTERPRETATION,
            VR::CS,
            PrimitiveValue::from("MONOCHROME2"),
        ),
        DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(rows)),
        DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(columns)),
        DataElement::new(tags::PIXEL_SPACING, VR::DS, dicom_value!(Strs, ["0.7", "0.7"])),
        DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16)),
        DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(16_u16)),
        DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(15_u16)),
        DataElement::new(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0_u16)),
        DataElement::new(tags::RESCALE_INTERCEPT, VR::DS, PrimitiveValue::from("-1024")),
        DataElement::new(tags::RESCALE_SLOPE, VR::DS, PrimitiveValue::from("1")),
    ];
    if !slice.pixels.is_empty() {
        elements.push(DataElement::new(
            tags::PIXEL_DATA,
            VR::OW,
            PrimitiveValue::U16(slice.pixels.clone().into()),
        ));
    }
    let object = InMemDicomObject::from_element_iter(elements);

    let file = object
        .with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
                .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
                .media_storage_sop_instance_uid(slice.uid),
        )
        .unwrap();
    file.write_to_file(path).unwrap();
}

/// A body of soft tissue with an air cavity inside, surrounded by air.
pub fn chest_pixels(rows: u16, columns: u16) -> Vec<u16> {
    let (rows, columns) = (rows as usize, columns as usize);
    (0..rows * columns)
        .map(|i| {
            let (y, x) = (i / columns, i % columns);
            let body = y >= 1 && y + 1 < rows && x >= 1 && x + 1 < columns;
            let cavity = y >= 3 && y + 3 < rows && x >= 3 && x + 3 < columns;
            if body && !cavity { 1064 } else { 24 }
        })
        .collect()
}

pub const CHARACTERISTICS: &str = "<characteristics><subtlety>5</subtlety>\
    <internalStructure>1</internalStructure><calcification>6</calcification>\
    <sphericity>4</sphericity><margin>5</margin><lobulation>1</lobulation>\
    <spiculation>1</spiculation><texture>5</texture><malignancy>{malignancy}</malignancy>\
    </characteristics>";

pub fn roi(uid: &str, z: f64, inclusion: bool, points: &[(i32, i32)]) -> String {
    let edges: String = points
        .iter()
        .map(|(x, y)| format!("<edgeMap><xCoord>{x}</xCoord><yCoord>{y}</yCoord></edgeMap>"))
        .collect();
    let inclusion = if inclusion { "TRUE" } else { "FALSE" };
    format!(
        "<roi><imageZposition>{z}</imageZposition><imageSOP_UID>{uid}</imageSOP_UID>\
         <inclusion>{inclusion}</inclusion>{edges}</roi>"
    )
}

/// An unblinded-read nodule; `malignancy` of `None` leaves it unscored.
pub fn nodule(id: &str, malignancy: Option<u8>, rois: &[String]) -> String {
    let characteristics = malignancy
        .map(|m| CHARACTERISTICS.replace("{malignancy}", &m.to_string()))
        .unwrap_or_default();
    format!(
        "<unblindedReadNodule><noduleID>{id}</noduleID>{characteristics}{}</unblindedReadNodule>",
        rois.concat()
    )
}

pub fn non_nodule(id: &str, uid: &str, z: f64, point: (i32, i32)) -> String {
    format!(
        "<nonNodule><nonNoduleID>{id}</nonNoduleID><imageZposition>{z}</imageZposition>\
         <imageSOP_UID>{uid}</imageSOP_UID><locus><xCoord>{}</xCoord><yCoord>{}</yCoord></locus>\
         </nonNodule>",
        point.0, point.1
    )
}

pub fn session(body: &[String]) -> String {
    format!(
        "<readingSession><annotationVersion>3.12</annotationVersion>\
         <servicingRadiologistID>anon</servicingRadiologistID>{}</readingSession>",
        body.concat()
    )
}

pub fn message(sessions: &[String]) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <LidcReadMessage xmlns=\"{NAMESPACE}\"><ResponseHeader><Version>1.8.1</Version>\
         <TaskDescription>Second unblinded read</TaskDescription></ResponseHeader>{}\
         </LidcReadMessage>",
        sessions.concat()
    )
}

pub fn write(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}
