//
// study.rs
// Dicom-Deid-rs
//
// Patient -> Study -> Series -> Instance tree built from scanned descriptors, the flat uniqueness index,
// and the completeness rules evaluated over a set of series.
//
// Thales Matheus Mendonça Santos - October 2026

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{FileDescriptor, Modality, Roi};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub series_instance_uid: String,
    pub modality: Option<Modality>,
    /// Descriptor of the first instance in sort order.
    pub info: FileDescriptor,
    pub instances: Vec<FileDescriptor>,
    /// Only populated for RTSTRUCT series.
    pub rois: Vec<Roi>,
}

impl Series {
    pub fn is_modality(&self, modality: &Modality) -> bool {
        self.modality.as_ref() == Some(modality)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Study {
    pub study_instance_uid: String,
    pub description: Option<String>,
    pub series: Vec<Series>,
}

impl Study {
    pub fn instances(&self) -> impl Iterator<Item = &FileDescriptor> {
        self.series.iter().flat_map(|s| s.instances.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Patient {
    pub patient_id: String,
    pub name: String,
    pub birth_date: String,
    pub sex: String,
    pub studies: Vec<Study>,
}

/// Descriptor attributes the uniqueness index covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DescriptorField {
    PatientId,
    PatientName,
    PatientBirthDate,
    PatientSex,
    StudyInstanceUid,
    SeriesInstanceUid,
    SopInstanceUid,
    Modality,
    FrameOfReferenceUid,
    Manufacturer,
    DoseSummationType,
}

impl DescriptorField {
    pub const ALL: [DescriptorField; 11] = [
        DescriptorField::PatientId,
        DescriptorField::PatientName,
        DescriptorField::PatientBirthDate,
        DescriptorField::PatientSex,
        DescriptorField::StudyInstanceUid,
        DescriptorField::SeriesInstanceUid,
        DescriptorField::SopInstanceUid,
        DescriptorField::Modality,
        DescriptorField::FrameOfReferenceUid,
        DescriptorField::Manufacturer,
        DescriptorField::DoseSummationType,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            DescriptorField::PatientId => "PatientID",
            DescriptorField::PatientName => "PatientName",
            DescriptorField::PatientBirthDate => "PatientBirthDate",
            DescriptorField::PatientSex => "PatientSex",
            DescriptorField::StudyInstanceUid => "StudyInstanceUID",
            DescriptorField::SeriesInstanceUid => "SeriesInstanceUID",
            DescriptorField::SopInstanceUid => "SOPInstanceUID",
            DescriptorField::Modality => "Modality",
            DescriptorField::FrameOfReferenceUid => "FrameOfReferenceUID",
            DescriptorField::Manufacturer => "Manufacturer",
            DescriptorField::DoseSummationType => "DoseSummationType",
        }
    }

    fn value_of(self, d: &FileDescriptor) -> Option<String> {
        match self {
            DescriptorField::PatientId => d.patient_id.clone(),
            DescriptorField::PatientName => Some(d.patient_name.clone()),
            DescriptorField::PatientBirthDate => Some(d.patient_birth_date.clone()),
            DescriptorField::PatientSex => Some(d.patient_sex.clone()),
            DescriptorField::StudyInstanceUid => d.study_instance_uid.clone(),
            DescriptorField::SeriesInstanceUid => d.series_instance_uid.clone(),
            DescriptorField::SopInstanceUid => d.sop_instance_uid.clone(),
            DescriptorField::Modality => d.modality.as_ref().map(|m| m.as_str().to_string()),
            DescriptorField::FrameOfReferenceUid => d.frame_of_reference_uid.clone(),
            DescriptorField::Manufacturer => d.manufacturer.clone(),
            DescriptorField::DoseSummationType => d.dose_summation_type.clone(),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown descriptor field {0:?}")]
pub struct UnknownField(pub String);

impl FromStr for DescriptorField {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.keyword().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownField(s.to_string()))
    }
}

/// Coarse classification of a set of series by the modalities present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StudyType {
    Contouring,
    TreatmentPlan,
    PetCt,
    PetMri,
    Mri,
    Ct,
    Us,
    Spect,
    Other,
}

impl fmt::Display for StudyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StudyType::Contouring => "Contouring",
            StudyType::TreatmentPlan => "TreatmentPlan",
            StudyType::PetCt => "PET-CT",
            StudyType::PetMri => "PET-MRI",
            StudyType::Mri => "MRI",
            StudyType::Ct => "CT",
            StudyType::Us => "US",
            StudyType::Spect => "SPECT",
            StudyType::Other => "Other",
        };
        f.write_str(label)
    }
}

/// In-memory model of one scanned folder.
#[derive(Debug, Clone, Default)]
pub struct StudyModel {
    patients: Vec<Patient>,
    descriptors: Vec<FileDescriptor>,
    index: HashMap<DescriptorField, BTreeSet<String>>,
}

impl StudyModel {
    /// Groups descriptors into series and studies. The result does not depend
    /// on the order the descriptors arrive in.
    pub fn build(mut descriptors: Vec<FileDescriptor>) -> Self {
        descriptors.sort_by(|a, b| a.path.cmp(&b.path));

        let mut index: HashMap<DescriptorField, BTreeSet<String>> = HashMap::new();
        for d in &descriptors {
            for field in DescriptorField::ALL {
                if let Some(value) = field.value_of(d) {
                    index.entry(field).or_default().insert(value);
                }
            }
        }

        // Files lacking any of the three grouping keys stay out of the tree.
        let mut by_series: BTreeMap<&str, Vec<&FileDescriptor>> = BTreeMap::new();
        for d in &descriptors {
            if let (Some(_), Some(_), Some(series_uid)) = (
                d.patient_id.as_deref(),
                d.study_instance_uid.as_deref(),
                d.series_instance_uid.as_deref(),
            ) {
                by_series.entry(series_uid).or_default().push(d);
            }
        }

        // patient id -> study uid -> series (already in UID order)
        let mut tree: BTreeMap<String, BTreeMap<String, Vec<Series>>> = BTreeMap::new();
        for (series_uid, mut members) in by_series {
            members.sort_by(|a, b| {
                a.instance_number
                    .unwrap_or(i32::MAX)
                    .cmp(&b.instance_number.unwrap_or(i32::MAX))
                    .then_with(|| a.sop_instance_uid.cmp(&b.sop_instance_uid))
                    .then_with(|| a.path.cmp(&b.path))
            });
            let instances: Vec<FileDescriptor> = members.into_iter().cloned().collect();
            let info = instances[0].clone();
            let rois = instances
                .iter()
                .find(|d| !d.rois.is_empty())
                .map(|d| d.rois.clone())
                .unwrap_or_default();
            let patient_id = info.patient_id.clone().unwrap_or_default();
            let study_uid = info.study_instance_uid.clone().unwrap_or_default();
            tree.entry(patient_id)
                .or_default()
                .entry(study_uid)
                .or_default()
                .push(Series {
                    series_instance_uid: series_uid.to_string(),
                    modality: info.modality.clone(),
                    info,
                    instances,
                    rois,
                });
        }

        let patients = tree
            .into_iter()
            .map(|(patient_id, studies)| {
                let studies: Vec<Study> = studies
                    .into_iter()
                    .map(|(study_instance_uid, series)| Study {
                        description: series
                            .iter()
                            .find_map(|s| s.info.study_description.clone()),
                        study_instance_uid,
                        series,
                    })
                    .collect();
                let first = &studies[0].series[0].info;
                Patient {
                    name: first.patient_name.clone(),
                    birth_date: first.patient_birth_date.clone(),
                    sex: first.patient_sex.clone(),
                    patient_id,
                    studies,
                }
            })
            .collect();

        Self {
            patients,
            descriptors,
            index,
        }
    }

    pub fn patients(&self) -> &[Patient] {
        &self.patients
    }

    /// Every descriptor of the scan, including those left out of the tree.
    pub fn descriptors(&self) -> &[FileDescriptor] {
        &self.descriptors
    }

    pub fn studies(&self) -> impl Iterator<Item = (&Patient, &Study)> {
        self.patients
            .iter()
            .flat_map(|p| p.studies.iter().map(move |s| (p, s)))
    }

    pub fn find_study(&self, study_instance_uid: &str) -> Option<(&Patient, &Study)> {
        self.studies()
            .find(|(_, s)| s.study_instance_uid == study_instance_uid)
    }

    pub fn all_series(&self) -> impl Iterator<Item = &Series> {
        self.studies().flat_map(|(_, s)| s.series.iter())
    }

    /// Distinct values seen for `field` across the whole scan, sorted.
    pub fn unique(&self, field: DescriptorField) -> Vec<&str> {
        self.index
            .get(&field)
            .map(|values| values.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn is_unique(&self, field: DescriptorField) -> bool {
        self.unique(field).len() == 1
    }

    pub fn has_one_patient(&self) -> bool {
        self.is_unique(DescriptorField::PatientId)
    }

    pub fn has_one_study(&self) -> bool {
        self.is_unique(DescriptorField::StudyInstanceUid)
    }

    pub fn is_frame_of_reference_unique(&self) -> bool {
        frame_of_reference_unique(self.all_series())
    }

    pub fn determine_study_type(&self) -> StudyType {
        determine_study_type(self.all_series())
    }

    pub fn plans_have_all_doses(&self) -> bool {
        plans_have_all_doses(self.all_series())
    }
}

/// True when the CT/RTSTRUCT/RTPLAN/RTDOSE instances agree on at most one frame of reference.
pub fn frame_of_reference_unique<'a, I>(series: I) -> bool
where
    I: IntoIterator<Item = &'a Series>,
{
    let frames: BTreeSet<&str> = series
        .into_iter()
        .flat_map(|s| s.instances.iter())
        .filter(|d| d.modality.as_ref().is_some_and(Modality::shares_frame_of_reference))
        .filter_map(|d| d.frame_of_reference_uid.as_deref())
        .collect();
    frames.len() <= 1
}

pub fn determine_study_type<'a, I>(series: I) -> StudyType
where
    I: IntoIterator<Item = &'a Series>,
{
    let present: BTreeSet<Modality> = series
        .into_iter()
        .filter_map(|s| s.modality.clone())
        .collect();
    let has = |m: Modality| present.contains(&m);

    if has(Modality::RtPlan) || has(Modality::RtDose) {
        StudyType::TreatmentPlan
    } else if has(Modality::RtStruct) {
        StudyType::Contouring
    } else if has(Modality::Pt) && has(Modality::Ct) {
        StudyType::PetCt
    } else if has(Modality::Pt) && has(Modality::Mr) {
        StudyType::PetMri
    } else if has(Modality::Mr) {
        StudyType::Mri
    } else if has(Modality::Ct) {
        StudyType::Ct
    } else if has(Modality::Us) {
        StudyType::Us
    } else if has(Modality::St) || has(Modality::Nm) {
        StudyType::Spect
    } else {
        StudyType::Other
    }
}

/// Dosimetric completeness of the plans in `series`.
///
/// `PLAN` summation needs one dose per plan; `BEAM` accepts a single
/// aggregate dose or at least as many doses as the summed beams allow.
/// Without any plan there is nothing to check.
pub fn plans_have_all_doses<'a, I>(series: I) -> bool
where
    I: IntoIterator<Item = &'a Series>,
{
    let instances: Vec<&FileDescriptor> = series
        .into_iter()
        .flat_map(|s| s.instances.iter())
        .collect();
    let plans: Vec<&FileDescriptor> = instances
        .iter()
        .copied()
        .filter(|d| d.is_modality(&Modality::RtPlan))
        .collect();
    let doses: Vec<&FileDescriptor> = instances
        .iter()
        .copied()
        .filter(|d| d.is_modality(&Modality::RtDose))
        .collect();

    if plans.is_empty() {
        return true;
    }
    if doses.is_empty() {
        return false;
    }

    let summation = doses.iter().find_map(|d| d.dose_summation_type.as_deref());
    match summation {
        Some("PLAN") => plans.len() == doses.len(),
        Some("BEAM") => {
            let beams: usize = plans.iter().map(|p| p.beam_count.unwrap_or(0)).sum();
            beams <= doses.len() || doses.len() == 1
        }
        _ => true,
    }
}

/// Caller-approved ROI rename, validated against the name it was made for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoiRename {
    pub original_name: String,
    pub new_name: String,
}

/// ROI number -> rename.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoiMapping(BTreeMap<i32, RoiRename>);

impl RoiMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, number: i32, original_name: &str, new_name: &str) {
        self.0.insert(
            number,
            RoiRename {
                original_name: original_name.to_string(),
                new_name: new_name.to_string(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// New name for ROI `number` if the mapping was made for `current_name`.
    pub fn resolve(&self, number: i32, current_name: &str) -> Option<&str> {
        self.0
            .get(&number)
            .filter(|r| r.original_name.trim() == current_name.trim())
            .map(|r| r.new_name.as_str())
    }

    /// Maps every ROI whose name equals a vocabulary entry once case and
    /// whitespace are ignored. Unmatched ROIs are left out.
    pub fn auto_match<S: AsRef<str>>(rois: &[Roi], vocabulary: &[S]) -> Self {
        let mut mapping = Self::new();
        for roi in rois {
            let key = normalise(&roi.name);
            if let Some(term) = vocabulary.iter().find(|v| normalise(v.as_ref()) == key) {
                mapping.insert(roi.number, &roi.name, term.as_ref());
            }
        }
        mapping
    }
}

fn normalise(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}
