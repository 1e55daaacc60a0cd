//
// deid_workflows.rs
// Dicom-Deid-rs
//
// End-to-end tests over synthetic CT / RTSTRUCT / RTPLAN / RTDOSE folders: scan, validation, anonymisation,
// reference repair and re-identification.
//
// Thales Matheus Mendonça Santos - October 2026

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dicom::core::value::{DataSetSequence, Value};
use dicom::core::{DataElement, Length, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::{FileDicomObject, FileMetaTableBuilder, InMemDicomObject};
use dicom::transfer_syntax::entries::EXPLICIT_VR_LITTLE_ENDIAN;
use dicom_deid::cipher::{CipherError, IdentityCipher};
use dicom_deid::dicom_access::{find_str_recursive, open_tolerant, ElementAccess};
use dicom_deid::engine::{
    AnonymiseError, Anonymiser, CancelToken, LogProgress, NewIdentity, RunOutcome, RunState,
    Selection,
};
use dicom_deid::escrow;
use dicom_deid::study::{RoiMapping, StudyType};
use dicom_deid::tags::*;
use dicom_deid::uid::collect_uids;
use dicom_deid::validate::{check_scan, check_selection, RejectReason};
use dicom_deid::{scan, AesGcmCipher, DeidentConfig};
use tempfile::{tempdir, TempDir};

const CT_CLASS: &str = "1.2.840.10008.5.1.4.1.1.2";
const RTSTRUCT_CLASS: &str = "1.2.840.10008.5.1.4.1.1.481.3";
const RTPLAN_CLASS: &str = "1.2.840.10008.5.1.4.1.1.481.5";
const RTDOSE_CLASS: &str = "1.2.840.10008.5.1.4.1.1.481.2";

const STUDY_UID: &str = "1.2.826.0.1.3680043.8.498.1";
const FRAME_UID: &str = "1.2.3";
const CT_SERIES: &str = "1.2.826.0.1.3680043.8.498.1.1";
const RS_SERIES: &str = "1.2.826.0.1.3680043.8.498.1.2";
const RS_UID: &str = "1.2.826.0.1.3680043.8.498.1.2.1";
const CONTOUR_IMAGE_SEQUENCE: Tag = Tag(0x3006, 0x0016);

fn put(obj: &mut InMemDicomObject, tag: Tag, vr: VR, value: &str) {
    obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
}

fn seq(obj: &mut InMemDicomObject, tag: Tag, items: Vec<InMemDicomObject>) {
    obj.put(DataElement::new(
        tag,
        VR::SQ,
        Value::Sequence(DataSetSequence::new(items, Length::UNDEFINED)),
    ));
}

fn reference(uid: &str) -> InMemDicomObject {
    let mut item = InMemDicomObject::new_empty();
    put(&mut item, REFERENCED_SOP_INSTANCE_UID, VR::UI, uid);
    item
}

fn ct_uid(i: usize) -> String {
    format!("{CT_SERIES}.{i}")
}

fn base(modality: &str, class: &str, study: &str, series: &str, sop: &str) -> InMemDicomObject {
    let mut obj = InMemDicomObject::new_empty_with_dict(StandardDataDictionary);
    put(&mut obj, SOP_CLASS_UID, VR::UI, class);
    put(&mut obj, SOP_INSTANCE_UID, VR::UI, sop);
    put(&mut obj, STUDY_DATE, VR::DA, "20240101");
    put(&mut obj, MODALITY, VR::CS, modality);
    put(&mut obj, MANUFACTURER, VR::LO, "SIEMENS");
    put(&mut obj, INSTITUTION_NAME, VR::LO, "General Hospital");
    put(&mut obj, STUDY_DESCRIPTION, VR::LO, "Pelvis P001");
    put(&mut obj, PATIENT_NAME, VR::PN, "DOE^JOHN");
    put(&mut obj, PATIENT_ID, VR::LO, "P001");
    put(&mut obj, PATIENT_BIRTH_DATE, VR::DA, "19650412");
    put(&mut obj, PATIENT_SEX, VR::CS, "M");
    put(&mut obj, STUDY_INSTANCE_UID, VR::UI, study);
    put(&mut obj, SERIES_INSTANCE_UID, VR::UI, series);
    put(&mut obj, Tag(0x0009, 0x0010), VR::LO, "SIEMENS CT VA0 COAD");
    obj
}

fn write_object(dir: &Path, name: &str, obj: InMemDicomObject) -> PathBuf {
    let path = dir.join(name);
    let class = obj.element_str(SOP_CLASS_UID).expect("class");
    let sop = obj.element_str(SOP_INSTANCE_UID).expect("sop");
    let meta = FileMetaTableBuilder::new()
        .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN.uid())
        .media_storage_sop_class_uid(class.as_str())
        .media_storage_sop_instance_uid(sop.as_str())
        .build()
        .expect("meta");
    let mut file_obj = FileDicomObject::new_empty_with_dict_and_meta(StandardDataDictionary, meta);
    for elem in obj {
        file_obj.put(elem);
    }
    file_obj.write_to_file(&path).expect("write test dicom");
    path
}

fn write_ct_series(dir: &Path, prefix: &str, study: &str, series: &str, count: usize) {
    for i in 1..=count {
        let sop = format!("{series}.{i}");
        let mut obj = base("CT", CT_CLASS, study, series, &sop);
        put(&mut obj, INSTANCE_NUMBER, VR::IS, &i.to_string());
        put(&mut obj, FRAME_OF_REFERENCE_UID, VR::UI, FRAME_UID);
        put(&mut obj, IMAGE_COMMENTS, VR::LT, "scan of P001");
        write_object(dir, &format!("{prefix}{i:04}"), obj);
    }
}

fn write_structure_set(dir: &Path) {
    let mut obj = base("RTSTRUCT", RTSTRUCT_CLASS, STUDY_UID, RS_SERIES, RS_UID);
    put(&mut obj, STRUCTURE_SET_LABEL, VR::SH, "P001 contours");

    let mut frame = InMemDicomObject::new_empty();
    put(&mut frame, FRAME_OF_REFERENCE_UID, VR::UI, FRAME_UID);
    seq(
        &mut frame,
        CONTOUR_IMAGE_SEQUENCE,
        (1..=10).map(|i| reference(&ct_uid(i))).collect(),
    );
    seq(&mut obj, REFERENCED_FRAME_OF_REFERENCE_SEQUENCE, vec![frame]);

    let roi = |number: &str, name: &str| {
        let mut item = InMemDicomObject::new_empty();
        put(&mut item, ROI_NUMBER, VR::IS, number);
        put(&mut item, REFERENCED_FRAME_OF_REFERENCE_UID, VR::UI, FRAME_UID);
        put(&mut item, ROI_NAME, VR::LO, name);
        item
    };
    seq(
        &mut obj,
        STRUCTURE_SET_ROI_SEQUENCE,
        vec![roi("1", "PTV"), roi("2", "Bladder")],
    );
    let mut observation = InMemDicomObject::new_empty();
    put(&mut observation, REFERENCED_ROI_NUMBER, VR::IS, "1");
    put(&mut observation, RT_ROI_INTERPRETED_TYPE, VR::CS, "PTV");
    seq(&mut obj, RT_ROI_OBSERVATIONS_SEQUENCE, vec![observation]);

    write_object(dir, "RS.dcm", obj);
}

fn write_plan(dir: &Path, index: usize, beams: usize) -> String {
    let series = format!("{STUDY_UID}.3");
    let sop = format!("{series}.{index}");
    let mut obj = base("RTPLAN", RTPLAN_CLASS, STUDY_UID, &series, &sop);
    put(&mut obj, RT_PLAN_LABEL, VR::SH, &format!("P001 plan {index}"));
    put(&mut obj, FRAME_OF_REFERENCE_UID, VR::UI, FRAME_UID);
    seq(&mut obj, REFERENCED_STRUCTURE_SET_SEQUENCE, vec![reference(RS_UID)]);
    seq(
        &mut obj,
        BEAM_SEQUENCE,
        (0..beams).map(|_| InMemDicomObject::new_empty()).collect(),
    );
    write_object(dir, &format!("RP{index}.dcm"), obj);
    sop
}

fn write_dose(dir: &Path, index: usize, summation: &str, plan: &str) {
    let series = format!("{STUDY_UID}.4");
    let sop = format!("{series}.{index}");
    let mut obj = base("RTDOSE", RTDOSE_CLASS, STUDY_UID, &series, &sop);
    put(&mut obj, FRAME_OF_REFERENCE_UID, VR::UI, FRAME_UID);
    put(&mut obj, DOSE_SUMMATION_TYPE, VR::CS, summation);
    seq(&mut obj, REFERENCED_RT_PLAN_SEQUENCE, vec![reference(plan)]);
    // stale reference the engine must repoint
    seq(
        &mut obj,
        REFERENCED_STRUCTURE_SET_SEQUENCE,
        vec![reference("1.2.826.0.1.3680043.8.498.99")],
    );
    write_object(dir, &format!("RD{index}.dcm"), obj);
}

/// 10 CT instances plus one structure set referencing all of them.
fn contouring_folder() -> TempDir {
    let dir = tempdir().expect("tempdir");
    write_ct_series(dir.path(), "IM", STUDY_UID, CT_SERIES, 10);
    write_structure_set(dir.path());
    fs::write(dir.path().join("export.log"), "P001 exported").expect("write log");
    dir
}

fn treatment_plan_folder() -> TempDir {
    let dir = contouring_folder();
    let plan = write_plan(dir.path(), 1, 2);
    write_dose(dir.path(), 1, "PLAN", &plan);
    dir
}

fn roi_mapping() -> RoiMapping {
    let mut mapping = RoiMapping::new();
    mapping.insert(1, "PTV", "PTV_High");
    mapping.insert(2, "Bladder", "Bladder_O");
    mapping
}

fn cipher() -> AesGcmCipher {
    AesGcmCipher::new(&[7u8; 32])
}

fn output_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .expect("read output dir")
        .map(|e| e.expect("entry").path())
        .collect();
    files.sort();
    files
}

fn anonymise(input: &Path, output: &Path, config: DeidentConfig) -> (Anonymiser, RunOutcome) {
    let report = scan(input, &config.defaults).expect("scan");
    let (patient, study) = report.model.studies().next().expect("one study");
    let selection = Selection::from_study(patient, study).with_roi_mapping(roi_mapping());
    let mut engine = Anonymiser::new(config, Arc::new(cipher()));
    let outcome = engine
        .run(&selection, &NewIdentity::new("RPB-001"), output, &LogProgress)
        .expect("run");
    (engine, outcome)
}

fn contains(bytes: &[u8], needle: &str) -> bool {
    bytes
        .windows(needle.len())
        .any(|w| w == needle.as_bytes())
}

#[test]
fn contouring_scan_classifies_and_validates() {
    let dir = contouring_folder();
    let report = scan(dir.path(), &DeidentConfig::default().defaults).expect("scan");

    assert!(report.issues.is_empty());
    assert_eq!(report.model.determine_study_type(), StudyType::Contouring);
    assert!(report.model.is_frame_of_reference_unique());
    assert!(report.model.has_one_patient());
    assert!(check_scan(&report, &DeidentConfig::default()).is_empty());

    let series: Vec<_> = report.model.all_series().collect();
    assert_eq!(series.len(), 2);
    assert_eq!(series[0].instances.len(), 10);
    assert_eq!(series[1].rois.len(), 2);
}

#[test]
fn scanning_twice_gives_identical_tree() {
    let dir = contouring_folder();
    let a = scan(dir.path(), &DeidentConfig::default().defaults).expect("scan");
    let b = scan(dir.path(), &DeidentConfig::default().defaults).expect("scan");
    assert_eq!(a.model.patients(), b.model.patients());
}

#[test]
fn contouring_run_pseudonymises_every_file() {
    let input = contouring_folder();
    let output = tempdir().expect("tempdir");
    let (engine, outcome) = anonymise(input.path(), output.path(), DeidentConfig::default());

    let RunOutcome::Done(report) = outcome else {
        panic!("run should complete");
    };
    assert_eq!(engine.state(), RunState::Done);
    assert_eq!(report.written.len(), 11);
    assert_eq!(report.method_codes, vec!["113100"]);
    assert_eq!(output_files(output.path()).len(), 11);

    for path in output_files(output.path()) {
        let bytes = fs::read(&path).expect("read output");
        assert!(!contains(&bytes, "P001"), "{} leaks P001", path.display());
        assert!(!contains(&bytes, "DOE^JOHN"), "{} leaks name", path.display());

        let obj = open_tolerant(&path).expect("open output");
        assert_eq!(
            obj.element_str(STUDY_INSTANCE_UID).as_deref(),
            Some(report.study_instance_uid.as_str())
        );
        assert_eq!(obj.element_str(PATIENT_ID).as_deref(), Some("RPB-001"));
        assert_eq!(obj.element_str(PATIENT_NAME).as_deref(), Some("RPB-001"));
        assert_eq!(obj.element_str(PATIENT_IDENTITY_REMOVED).as_deref(), Some("YES"));
        assert!(!obj.has_element(STUDY_DESCRIPTION));
        assert!(!obj.has_element(INSTITUTION_NAME));
        assert!(!obj.has_element(Tag(0x0009, 0x0010)));
        assert_eq!(
            obj.meta().media_storage_sop_instance_uid().trim_end_matches('\0'),
            obj.element_str(SOP_INSTANCE_UID).expect("sop")
        );

        let name = path.file_name().and_then(|n| n.to_str()).expect("name");
        assert!(name.starts_with("CT_") || name.starts_with("RTSTRUCT_"));
        if name.starts_with("RTSTRUCT_") {
            let names: Vec<String> = obj
                .items_of(STRUCTURE_SET_ROI_SEQUENCE)
                .iter()
                .filter_map(|i| i.element_str(ROI_NAME))
                .collect();
            assert_eq!(names, vec!["PTV_High", "Bladder_O"]);
        }
    }
}

#[test]
fn uid_remap_is_total_and_consistent() {
    let input = contouring_folder();
    let output = tempdir().expect("tempdir");
    let (_, outcome) = anonymise(input.path(), output.path(), DeidentConfig::default());
    assert!(matches!(outcome, RunOutcome::Done(_)));

    let originals: BTreeSet<String> = (1..=10)
        .map(ct_uid)
        .chain([STUDY_UID, FRAME_UID, CT_SERIES, RS_SERIES, RS_UID].map(String::from))
        .collect();

    let mut ct_uids = BTreeSet::new();
    let mut contour_refs = BTreeSet::new();
    let mut frames = BTreeSet::new();
    let mut issued = Vec::new();
    for path in output_files(output.path()) {
        let obj = open_tolerant(&path).expect("open");
        let meta_sop = obj.meta().media_storage_sop_instance_uid();
        let mut uids = vec![meta_sop.trim_end_matches('\0').to_string()];
        collect_uids(&obj, &mut uids);
        for uid in &uids {
            assert!(!originals.contains(uid), "{} still carries {uid}", path.display());
            assert!(uid.starts_with("2.25."));
        }
        issued.extend(uids);

        if let Some(frame) = find_str_recursive(&obj, FRAME_OF_REFERENCE_UID) {
            frames.insert(frame);
        }
        match obj.element_str(MODALITY).as_deref() {
            Some("CT") => {
                ct_uids.insert(obj.element_str(SOP_INSTANCE_UID).expect("sop"));
            }
            Some("RTSTRUCT") => {
                let frame = &obj.items_of(REFERENCED_FRAME_OF_REFERENCE_SEQUENCE)[0];
                for item in frame.items_of(CONTOUR_IMAGE_SEQUENCE) {
                    contour_refs.insert(item.element_str(REFERENCED_SOP_INSTANCE_UID).expect("ref"));
                }
                for roi in obj.items_of(STRUCTURE_SET_ROI_SEQUENCE) {
                    frames.insert(roi.element_str(REFERENCED_FRAME_OF_REFERENCE_UID).expect("roi frame"));
                }
            }
            other => panic!("unexpected modality {other:?}"),
        }
    }

    assert_eq!(ct_uids.len(), 10);
    assert_eq!(ct_uids, contour_refs);
    // 11 SOP instances, 2 series, 1 study, 1 frame of reference
    let distinct: BTreeSet<&String> = issued.iter().collect();
    assert_eq!(distinct.len(), 15);
    assert_eq!(frames.len(), 1);
    assert!(!frames.contains(FRAME_UID));
}

#[test]
fn plan_and_dose_point_at_the_remapped_structure_set() {
    let input = treatment_plan_folder();
    let report = scan(input.path(), &DeidentConfig::default().defaults).expect("scan");
    assert_eq!(report.model.determine_study_type(), StudyType::TreatmentPlan);
    assert!(report.model.plans_have_all_doses());

    let output = tempdir().expect("tempdir");
    let (_, outcome) = anonymise(input.path(), output.path(), DeidentConfig::default());
    let RunOutcome::Done(run) = outcome else {
        panic!("run should complete");
    };
    assert_eq!(run.written.len(), 13);

    let mut structure_set = None;
    let mut plan = None;
    let mut plan_refs = Vec::new();
    let mut dose_plan_ref = None;
    for path in output_files(output.path()) {
        let bytes = fs::read(&path).expect("read output");
        assert!(!contains(&bytes, "P001"), "{} leaks P001", path.display());

        let obj = open_tolerant(&path).expect("open");
        let sop = obj.element_str(SOP_INSTANCE_UID);
        let rs_ref = |o: &InMemDicomObject| {
            o.items_of(REFERENCED_STRUCTURE_SET_SEQUENCE)[0]
                .element_str(REFERENCED_SOP_INSTANCE_UID)
                .expect("structure set ref")
        };
        match obj.element_str(MODALITY).as_deref() {
            Some("RTSTRUCT") => structure_set = sop,
            Some("RTPLAN") => {
                assert_eq!(obj.element_str(RT_PLAN_LABEL).as_deref(), Some("plan 1"));
                plan = sop;
                plan_refs.push(rs_ref(&*obj));
            }
            Some("RTDOSE") => {
                plan_refs.push(rs_ref(&*obj));
                dose_plan_ref = obj.items_of(REFERENCED_RT_PLAN_SEQUENCE)[0]
                    .element_str(REFERENCED_SOP_INSTANCE_UID);
            }
            _ => {}
        }
    }

    let structure_set = structure_set.expect("structure set written");
    assert_eq!(plan_refs, vec![structure_set.clone(), structure_set]);
    assert_eq!(dose_plan_ref, plan);
}

#[test]
fn beam_and_plan_dose_cardinality() {
    let dir = contouring_folder();
    let a = write_plan(dir.path(), 1, 3);
    write_plan(dir.path(), 2, 2);
    write_dose(dir.path(), 1, "BEAM", &a);
    let report = scan(dir.path(), &DeidentConfig::default().defaults).expect("scan");
    assert!(report.model.plans_have_all_doses());

    let dir = contouring_folder();
    let a = write_plan(dir.path(), 1, 3);
    write_plan(dir.path(), 2, 2);
    write_dose(dir.path(), 1, "PLAN", &a);
    let report = scan(dir.path(), &DeidentConfig::default().defaults).expect("scan");
    assert!(!report.model.plans_have_all_doses());
    let series: Vec<_> = report.model.all_series().collect();
    assert!(check_selection(&series, &DeidentConfig::default())
        .contains(&RejectReason::IncompleteDoses));
}

#[test]
fn multiple_studies_are_rejected_before_anonymisation() {
    let dir = tempdir().expect("tempdir");
    write_ct_series(dir.path(), "A", STUDY_UID, CT_SERIES, 1);
    write_ct_series(
        dir.path(),
        "B",
        "1.2.826.0.1.3680043.8.498.2",
        "1.2.826.0.1.3680043.8.498.2.1",
        1,
    );
    let report = scan(dir.path(), &DeidentConfig::default().defaults).expect("scan");
    assert!(!report.model.has_one_study());
    let reasons = check_scan(&report, &DeidentConfig::default());
    assert!(reasons.contains(&RejectReason::MultipleStudies));
    assert!(reasons.iter().any(|r| r.to_string() == "multiple studies"));

    let (patient, study) = report.model.studies().next().expect("study");
    let mut selection = Selection::from_study(patient, study);
    selection
        .series
        .extend(report.model.all_series().skip(1).cloned());

    let output = tempdir().expect("tempdir");
    let mut engine = Anonymiser::new(DeidentConfig::default(), Arc::new(cipher()));
    let err = engine
        .run(&selection, &NewIdentity::new("RPB-001"), output.path(), &LogProgress)
        .unwrap_err();
    assert!(matches!(err, AnonymiseError::Selection(ref r) if r.contains(&RejectReason::MultipleStudies)));
    assert_eq!(engine.state(), RunState::Failed);
    assert!(output_files(output.path()).is_empty());
}

#[test]
fn reidentify_restores_original_identity() {
    let input = contouring_folder();
    let output = tempdir().expect("tempdir");
    let (_, outcome) = anonymise(input.path(), output.path(), DeidentConfig::default());
    assert!(matches!(outcome, RunOutcome::Done(_)));

    let ct = output_files(output.path())
        .into_iter()
        .find(|p| p.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with("CT_")))
        .expect("ct output");
    let mut obj = open_tolerant(&ct).expect("open").into_inner();
    let identity = escrow::unseal(&mut obj, &cipher()).expect("unseal");

    assert_eq!(identity.patient_id.as_deref(), Some("P001"));
    assert_eq!(identity.patient_name.as_deref(), Some("DOE^JOHN"));
    assert_eq!(identity.patient_birth_date.as_deref(), Some("19650412"));
    assert_eq!(identity.study_instance_uid.as_deref(), Some(STUDY_UID));
    assert_eq!(identity.frame_of_reference_uid.as_deref(), Some(FRAME_UID));
    assert!(identity
        .sop_instance_uid
        .as_deref()
        .is_some_and(|uid| uid.starts_with(CT_SERIES)));

    assert_eq!(obj.element_str(PATIENT_ID).as_deref(), Some("P001"));
    assert_eq!(obj.element_str(STUDY_INSTANCE_UID).as_deref(), Some(STUDY_UID));
    assert_eq!(obj.element_str(FRAME_OF_REFERENCE_UID).as_deref(), Some(FRAME_UID));
    assert_eq!(obj.element_str(PATIENT_IDENTITY_REMOVED).as_deref(), Some("NO"));
    assert!(!obj.has_element(ENCRYPTED_ATTRIBUTES_SEQUENCE));
}

#[test]
fn options_keep_dates_and_extend_method_codes() {
    let input = contouring_folder();
    let output = tempdir().expect("tempdir");
    let config = DeidentConfig {
        retain_full_dates: true,
        retain_patient_characteristics: true,
        ..DeidentConfig::default()
    };
    let (_, outcome) = anonymise(input.path(), output.path(), config);
    let RunOutcome::Done(report) = outcome else {
        panic!("run should complete");
    };
    assert_eq!(report.method_codes, vec!["113100", "113106", "113108"]);

    let obj = open_tolerant(&report.written[0]).expect("open");
    assert_eq!(obj.element_str(STUDY_DATE).as_deref(), Some("20240101"));
    assert_eq!(obj.element_str(PATIENT_SEX).as_deref(), Some("M"));
    assert_eq!(
        obj.element_str(LONGITUDINAL_TEMPORAL_INFORMATION_MODIFIED).as_deref(),
        Some("UNMODIFIED")
    );
    let codes: Vec<String> = obj
        .items_of(DEIDENTIFICATION_METHOD_CODE_SEQUENCE)
        .iter()
        .filter_map(|i| i.element_str(CODE_VALUE))
        .collect();
    assert_eq!(codes, report.method_codes);
}

#[test]
fn cancelled_run_reports_skipped_files() {
    let input = contouring_folder();
    let output = tempdir().expect("tempdir");
    let report = scan(input.path(), &DeidentConfig::default().defaults).expect("scan");
    let (patient, study) = report.model.studies().next().expect("study");
    let selection = Selection::from_study(patient, study);

    let token = CancelToken::new();
    let mut engine =
        Anonymiser::new(DeidentConfig::default(), Arc::new(cipher())).with_cancel_token(token.clone());
    token.cancel();
    let outcome = engine
        .run(&selection, &NewIdentity::new("RPB-001"), output.path(), &LogProgress)
        .expect("cancellation is not an error");

    match outcome {
        RunOutcome::Cancelled { completed, skipped } => {
            assert!(completed.is_empty());
            assert_eq!(skipped.len(), 11);
        }
        RunOutcome::Done(_) => panic!("run should have been cancelled"),
    }
    assert_eq!(engine.state(), RunState::Failed);
    assert!(output_files(output.path()).is_empty());
}

#[test]
fn missing_output_directory_is_reported_up_front() {
    let input = contouring_folder();
    let report = scan(input.path(), &DeidentConfig::default().defaults).expect("scan");
    let (patient, study) = report.model.studies().next().expect("study");
    let selection = Selection::from_study(patient, study);

    let mut engine = Anonymiser::new(DeidentConfig::default(), Arc::new(cipher()));
    let err = engine
        .run(
            &selection,
            &NewIdentity::new("RPB-001"),
            &input.path().join("does-not-exist"),
            &LogProgress,
        )
        .unwrap_err();
    assert!(matches!(err, AnonymiseError::OutputDirectory(_)));
    assert_eq!(engine.state(), RunState::Failed);

    let again = engine
        .run(&selection, &NewIdentity::new("RPB-001"), input.path(), &LogProgress)
        .unwrap_err();
    assert!(matches!(again, AnonymiseError::InvalidTransition { .. }));
}

struct BrokenCipher;

impl IdentityCipher for BrokenCipher {
    fn encrypt(&self, _plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        Err(CipherError::Encrypt("hardware key unavailable".into()))
    }

    fn decrypt(&self, _ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        Err(CipherError::Decrypt("hardware key unavailable".into()))
    }
}

#[test]
fn cipher_failure_fails_the_run_with_the_file_named() {
    let input = contouring_folder();
    let output = tempdir().expect("tempdir");
    let report = scan(input.path(), &DeidentConfig::default().defaults).expect("scan");
    let (patient, study) = report.model.studies().next().expect("study");
    let selection = Selection::from_study(patient, study);
    let sources: Vec<PathBuf> = selection.files().map(|d| d.path.clone()).collect();

    let mut engine = Anonymiser::new(DeidentConfig::default(), Arc::new(BrokenCipher));
    let err = engine
        .run(&selection, &NewIdentity::new("RPB-001"), output.path(), &LogProgress)
        .unwrap_err();

    match &err {
        AnonymiseError::File { path, reason } => {
            assert!(sources.contains(path), "{} is not a selected file", path.display());
            assert!(reason.contains("hardware key unavailable"), "{reason}");
        }
        other => panic!("expected a per-file error, got {other:?}"),
    }
    assert_eq!(engine.state(), RunState::Failed);
    assert!(output_files(output.path()).is_empty());
}
