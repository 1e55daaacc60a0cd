use std::path::Path;

use dicom::core::Tag;
use dicom::object::{InMemDicomObject, ReadError};
use tracing::warn;

use crate::config::ScanDefaults;
use crate::dicom_access::{find_str_recursive, open_tolerant, ElementAccess};
use crate::models::{FileDescriptor, IssueKind, Modality, Roi};
use crate::tags::*;

fn text_for_tag<T: ElementAccess>(obj: &T, tag: Tag) -> Option<String> {
    obj.element_str(tag)
}

fn int_for_tag<T: ElementAccess>(obj: &T, tag: Tag) -> Option<i32> {
    text_for_tag(obj, tag).and_then(|s| s.parse().ok())
}

fn or_default(path: &Path, label: &str, value: Option<String>, fallback: &str) -> String {
    value.unwrap_or_else(|| {
        warn!("{}: {} absent, using {:?}", path.display(), label, fallback);
        fallback.to_string()
    })
}

/// First Referenced SOP Instance UID under the given reference sequence.
fn referenced_uid(obj: &InMemDicomObject, sequence: Tag) -> Option<String> {
    obj.items_of(sequence)
        .iter()
        .find_map(|item| item.element_str(REFERENCED_SOP_INSTANCE_UID))
}

/// ROI number/name table joined with the per-ROI observation metadata.
pub fn extract_rois(obj: &InMemDicomObject) -> Vec<Roi> {
    let observations = obj.items_of(RT_ROI_OBSERVATIONS_SEQUENCE);
    let mut rois: Vec<Roi> = obj
        .items_of(STRUCTURE_SET_ROI_SEQUENCE)
        .iter()
        .filter_map(|item| {
            let number = int_for_tag(item, ROI_NUMBER)?;
            let observation = observations
                .iter()
                .find(|o| int_for_tag(*o, REFERENCED_ROI_NUMBER) == Some(number));
            Some(Roi {
                number,
                name: text_for_tag(item, ROI_NAME).unwrap_or_default(),
                observation_label: observation.and_then(|o| text_for_tag(o, ROI_OBSERVATION_LABEL)),
                interpreted_type: observation
                    .and_then(|o| text_for_tag(o, RT_ROI_INTERPRETED_TYPE)),
            })
        })
        .collect();
    rois.sort_by_key(|r| r.number);
    rois
}

/// Beam Sequence item count, else the Number of Beams summed over fraction groups.
fn beam_count(obj: &InMemDicomObject) -> Option<usize> {
    let beams = obj.items_of(BEAM_SEQUENCE);
    if !beams.is_empty() {
        return Some(beams.len());
    }
    let declared: Vec<usize> = obj
        .items_of(FRACTION_GROUP_SEQUENCE)
        .iter()
        .filter_map(|group| text_for_tag(group, NUMBER_OF_BEAMS))
        .filter_map(|n| n.parse().ok())
        .collect();
    if declared.is_empty() {
        None
    } else {
        Some(declared.into_iter().sum())
    }
}

/// Builds the scanner's descriptor for one parsed object. Absent identifying
/// attributes come back as issues; absent demographics are defaulted.
pub fn extract_descriptor(
    path: &Path,
    obj: &InMemDicomObject,
    defaults: &ScanDefaults,
) -> (FileDescriptor, Vec<IssueKind>) {
    let modality: Option<Modality> = text_for_tag(obj, MODALITY).and_then(|m| m.parse().ok());

    let mut issues = Vec::new();
    let patient_id = text_for_tag(obj, PATIENT_ID);
    let study_instance_uid = text_for_tag(obj, STUDY_INSTANCE_UID);
    let series_instance_uid = text_for_tag(obj, SERIES_INSTANCE_UID);
    for (label, value) in [
        ("PatientID", &patient_id),
        ("StudyInstanceUID", &study_instance_uid),
        ("SeriesInstanceUID", &series_instance_uid),
    ] {
        if value.is_none() {
            issues.push(IssueKind::MissingAttribute(label.to_string()));
        }
    }

    let rois = if modality == Some(Modality::RtStruct) {
        extract_rois(obj)
    } else {
        Vec::new()
    };
    let beam_count = if modality == Some(Modality::RtPlan) {
        beam_count(obj)
    } else {
        None
    };

    let descriptor = FileDescriptor {
        path: path.to_path_buf(),
        patient_id,
        study_instance_uid,
        series_instance_uid,
        sop_instance_uid: text_for_tag(obj, SOP_INSTANCE_UID),
        sop_class_uid: text_for_tag(obj, SOP_CLASS_UID),
        patient_name: or_default(
            path,
            "PatientName",
            text_for_tag(obj, PATIENT_NAME),
            &defaults.patient_name,
        ),
        patient_birth_date: or_default(
            path,
            "PatientBirthDate",
            text_for_tag(obj, PATIENT_BIRTH_DATE),
            &defaults.patient_birth_date,
        ),
        patient_sex: or_default(
            path,
            "PatientSex",
            text_for_tag(obj, PATIENT_SEX),
            &defaults.patient_sex,
        ),
        study_description: text_for_tag(obj, STUDY_DESCRIPTION),
        series_description: text_for_tag(obj, SERIES_DESCRIPTION),
        instance_number: int_for_tag(obj, INSTANCE_NUMBER),
        frame_of_reference_uid: find_str_recursive(obj, FRAME_OF_REFERENCE_UID),
        manufacturer: text_for_tag(obj, MANUFACTURER),
        manufacturer_model_name: text_for_tag(obj, MANUFACTURER_MODEL_NAME),
        referenced_structure_set_uid: referenced_uid(obj, REFERENCED_STRUCTURE_SET_SEQUENCE),
        referenced_plan_uid: referenced_uid(obj, REFERENCED_RT_PLAN_SEQUENCE),
        dose_summation_type: text_for_tag(obj, DOSE_SUMMATION_TYPE)
            .map(|s| s.to_ascii_uppercase()),
        beam_count,
        modality,
        rois,
    };
    (descriptor, issues)
}

pub fn read_descriptor(
    path: &Path,
    defaults: &ScanDefaults,
) -> Result<(FileDescriptor, Vec<IssueKind>), ReadError> {
    let obj = open_tolerant(path)?;
    Ok(extract_descriptor(path, &obj, defaults))
}
