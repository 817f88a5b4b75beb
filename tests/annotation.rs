mod common;

use std::fs;

use lidc_prep::{
    AnnotationError, AnnotationParser, AnnotationStore, AnnotationTables, SliceAnnotationCorrelator,
    config::AnnotationConfig,
    enums::{NoduleType, ScanSelection, SliceLabel},
};
use proptest::prelude::*;
use tempfile::tempdir;

use common::{message, nodule, non_nodule, roi, session, write};

fn store() -> AnnotationStore {
    AnnotationStore::new(AnnotationConfig::default(), ScanSelection::MostFiles, "dcm")
}

fn two_readings() -> String {
    message(&[
        session(&[
            nodule(
                "Nodule 001",
                Some(3),
                &[
                    roi("A", -10.0, true, &[(10, 10), (12, 14), (11, 9)]),
                    roi("B", -12.5, true, &[(10, 10), (12, 12)]),
                    roi("B", -12.5, false, &[(11, 11)]),
                ],
            ),
            nodule("IL057_1", None, &[roi("C", -15.0, true, &[(40, 40)])]),
            non_nodule("NN 1", "D", -17.5, (100, 100)),
        ]),
        session(&[
            nodule("1", Some(0), &[roi("E", -20.0, true, &[(5, 5), (7, 7)])]),
            nodule("2", Some(5), &[roi("A", -10.0, true, &[(10, 10), (13, 13)])]),
        ]),
    ])
}

#[test]
fn row_count_matches_regions_per_reading() {
    let document = AnnotationParser::default().parse_str(&two_readings()).unwrap();
    let tables = AnnotationTables::from_document(&document);

    assert_eq!(document.readings.len(), 2);
    for reading in &document.readings {
        let rows = tables
            .regions
            .iter()
            .filter(|r| r.radiologist == reading.number)
            .count();
        assert_eq!(rows, reading.region_count());
    }
    assert_eq!(tables.regions.len(), 7);
    assert_eq!(tables.characteristics.len(), 3);

    let second: Vec<_> = tables
        .regions
        .iter()
        .filter(|r| r.radiologist == 2)
        .map(|r| (r.nodule_type, r.number, r.nodule_id.as_str()))
        .collect();
    assert_eq!(second, [(NoduleType::Normal, 1, "1"), (NoduleType::Normal, 2, "2")]);
    assert_eq!(tables.malignancy(2, 2), Some(5));
}

#[test]
fn correlates_example_scan() {
    let document = AnnotationParser::default().parse_str(&two_readings()).unwrap();
    let tables = AnnotationTables::from_document(&document);
    let correlator = SliceAnnotationCorrelator::new(&tables);

    let labels: Vec<_> = correlator
        .classify(["A", "B", "C", "D", "E", "F"])
        .into_iter()
        .map(|s| s.label)
        .collect();
    use SliceLabel::{Negative, Positive};
    assert_eq!(labels, [Positive, Positive, Negative, Negative, Positive, Negative]);
}

#[test]
fn tables_are_cached_in_patient_folder() {
    let dir = tempdir().unwrap();
    let patient = dir.path().join("LIDC-IDRI-0001");
    let series = patient.join("study").join("series");
    for name in ["1-001.dcm", "1-002.dcm", "1-003.dcm"] {
        write(&series.join(name), "");
    }
    write(&series.join("069.xml"), &two_readings());

    let parsed = store().load_or_parse(&patient).unwrap();
    assert!(patient.join("annotation.csv").is_file());
    assert!(patient.join("char_list.csv").is_file());

    fs::remove_file(series.join("069.xml")).unwrap();
    let cached = store().load_or_parse(&patient).unwrap();
    assert_eq!(cached, parsed);
}

#[test]
fn foreign_tables_are_rebuilt_from_the_read_message() {
    let dir = tempdir().unwrap();
    let patient = dir.path().join("LIDC-IDRI-0003");
    let series = patient.join("series");
    for name in ["1-001.dcm", "1-002.dcm"] {
        write(&series.join(name), "");
    }
    write(&series.join("069.xml"), &two_readings());
    write(
        &patient.join("annotation.csv"),
        "Radiologist No.,Nodule Type,Nodule No.,Nodule ID,Inclusion,Z Position,SOP UID\n\
         1,N,1,Nodule 001,True,-10.0,A\n",
    );
    write(
        &patient.join("char_list.csv"),
        "Radiologist No.,Nodule No.,Malignancy\n1,1,3\n",
    );

    let tables = store().load_or_parse(&patient).unwrap();
    assert_eq!(tables.regions.len(), 7);
    let slices = SliceAnnotationCorrelator::new(&tables).classify(["A"]);
    assert_eq!(slices[0].label, SliceLabel::Positive);

    let rewritten = fs::read_to_string(patient.join("annotation.csv")).unwrap();
    assert!(rewritten.starts_with("radiologist,nodule_type,number"));
    assert_eq!(store().load_or_parse(&patient).unwrap(), tables);
}

#[test]
fn patient_without_single_read_message_fails() {
    let dir = tempdir().unwrap();
    let patient = dir.path().join("LIDC-IDRI-0002");
    let series = patient.join("series");
    write(&series.join("1-001.dcm"), "");
    assert!(matches!(
        store().load_or_parse(&patient),
        Err(AnnotationError::MissingData(_))
    ));

    write(&series.join("069.xml"), &two_readings());
    write(&series.join("070.xml"), &two_readings());
    assert!(matches!(
        store().load_or_parse(&patient),
        Err(AnnotationError::AmbiguousData { count: 2, .. })
    ));
    assert!(!patient.join("annotation.csv").exists());
}

proptest! {
    #[test]
    fn scored_block_decides_nodule_kind(
        scores in prop::option::of(1u8..=5),
        empty_block in any::<bool>(),
    ) {
        let body = match scores {
            Some(malignancy) => nodule("n", Some(malignancy), &[roi("A", 0.0, true, &[(1, 1)])]),
            None if empty_block => format!(
                "<unblindedReadNodule><noduleID>n</noduleID><characteristics></characteristics>{}\
                 </unblindedReadNodule>",
                roi("A", 0.0, true, &[(1, 1)])
            ),
            None => nodule("n", None, &[roi("A", 0.0, true, &[(1, 1)])]),
        };
        let document = AnnotationParser::default()
            .parse_str(&message(&[session(&[body])]))
            .unwrap();
        let reading = &document.readings[0];
        match scores {
            Some(malignancy) => {
                prop_assert_eq!(reading.normal_nodules.len(), 1);
                prop_assert_eq!(
                    reading.normal_nodules[0].kind.characteristics().map(|c| c.malignancy),
                    Some(malignancy)
                );
            }
            None => {
                prop_assert_eq!(reading.small_nodules.len(), 1);
                prop_assert!(reading.normal_nodules.is_empty());
            }
        }
    }
}
