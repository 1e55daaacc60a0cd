//
// policy.rs
// Dicom-Deid-rs
//
// Basic Application Confidentiality Profile plus the configurable retain/clean options, and the
// element dispatch that applies them to a data set.
//
// Thales Matheus Mendonça Santos - October 2026

use dicom::core::header::Header;
use dicom::core::value::{DataSetSequence, Value};
use dicom::core::{DataElement, Length, PrimitiveValue, Tag, VR};
use dicom::object::mem::InMemElement;
use dicom::object::InMemDicomObject;
use tracing::debug;

use crate::attribute::{scrub_element, Attribute, Idat};
use crate::config::DeidentConfig;
use crate::tags::*;

pub const DEFAULT_DATE: &str = "19000101";
pub const DEFAULT_TIME: &str = "000000.00";
pub const DEFAULT_DATE_TIME: &str = "19000101000000.00";

/// DICOM PS3.16 CID 7050 codes identifying the applied de-identification methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodCode {
    BasicProfile,
    CleanDescriptors,
    RetainFullDates,
    RetainPatientCharacteristics,
    RetainDeviceIdentity,
}

impl MethodCode {
    pub fn value(self) -> &'static str {
        match self {
            MethodCode::BasicProfile => "113100",
            MethodCode::CleanDescriptors => "113105",
            MethodCode::RetainFullDates => "113106",
            MethodCode::RetainPatientCharacteristics => "113108",
            MethodCode::RetainDeviceIdentity => "113109",
        }
    }

    pub fn meaning(self) -> &'static str {
        match self {
            MethodCode::BasicProfile => "Basic Application Confidentiality Profile",
            MethodCode::CleanDescriptors => "Clean Descriptors Option",
            MethodCode::RetainFullDates => {
                "Retain Longitudinal Temporal Information Full Dates Option"
            }
            MethodCode::RetainPatientCharacteristics => "Retain Patient Characteristics Option",
            MethodCode::RetainDeviceIdentity => "Retain Device Identity Option",
        }
    }

    pub const CODING_SCHEME: &'static str = "DCM";
}

/// A named de-identification option: a coded method carrying its attribute bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeidentOption {
    pub name: &'static str,
    pub code: MethodCode,
    pub attributes: Vec<Attribute>,
}

impl DeidentOption {
    pub fn retain_full_dates() -> Self {
        Self {
            name: "Retain Full Dates",
            code: MethodCode::RetainFullDates,
            attributes: vec![
                Attribute::keep("StudyDate", STUDY_DATE, VR::DA, "1"),
                Attribute::keep("SeriesDate", SERIES_DATE, VR::DA, "1"),
                Attribute::keep("AcquisitionDate", ACQUISITION_DATE, VR::DA, "1"),
                Attribute::keep("ContentDate", CONTENT_DATE, VR::DA, "1"),
                Attribute::keep("AcquisitionDateTime", ACQUISITION_DATE_TIME, VR::DT, "1"),
                Attribute::keep("StudyTime", STUDY_TIME, VR::TM, "1"),
                Attribute::keep("SeriesTime", SERIES_TIME, VR::TM, "1"),
                Attribute::keep("AcquisitionTime", ACQUISITION_TIME, VR::TM, "1"),
                Attribute::keep("ContentTime", CONTENT_TIME, VR::TM, "1"),
                Attribute::keep("InstanceCreationDate", INSTANCE_CREATION_DATE, VR::DA, "1"),
                Attribute::keep("InstanceCreationTime", INSTANCE_CREATION_TIME, VR::TM, "1"),
                Attribute::keep("StructureSetDate", STRUCTURE_SET_DATE, VR::DA, "1"),
                Attribute::keep("StructureSetTime", STRUCTURE_SET_TIME, VR::TM, "1"),
                Attribute::keep("RTPlanDate", RT_PLAN_DATE, VR::DA, "1"),
                Attribute::keep("RTPlanTime", RT_PLAN_TIME, VR::TM, "1"),
                Attribute::keep("ReviewDate", REVIEW_DATE, VR::DA, "1"),
                Attribute::keep("ReviewTime", REVIEW_TIME, VR::TM, "1"),
                Attribute::keep(
                    "PerformedProcedureStepStartDate",
                    PERFORMED_PROCEDURE_STEP_START_DATE,
                    VR::DA,
                    "1",
                ),
                Attribute::keep(
                    "PerformedProcedureStepStartTime",
                    PERFORMED_PROCEDURE_STEP_START_TIME,
                    VR::TM,
                    "1",
                ),
            ],
        }
    }

    pub fn retain_patient_characteristics() -> Self {
        Self {
            name: "Retain Patient Characteristics",
            code: MethodCode::RetainPatientCharacteristics,
            attributes: vec![
                Attribute::keep("PatientSex", PATIENT_SEX, VR::CS, "1"),
                Attribute::keep("PatientAge", PATIENT_AGE, VR::AS, "1"),
                Attribute::keep("PatientSize", PATIENT_SIZE, VR::DS, "1"),
                Attribute::keep("PatientWeight", PATIENT_WEIGHT, VR::DS, "1"),
                Attribute::keep("EthnicGroup", ETHNIC_GROUP, VR::SH, "1"),
                Attribute::keep("SmokingStatus", SMOKING_STATUS, VR::CS, "1"),
                Attribute::keep("PregnancyStatus", PREGNANCY_STATUS, VR::US, "1"),
                Attribute::keep("PatientSexNeutered", PATIENT_SEX_NEUTERED, VR::CS, "1"),
            ],
        }
    }

    pub fn retain_device_identity() -> Self {
        Self {
            name: "Retain Device Identity",
            code: MethodCode::RetainDeviceIdentity,
            attributes: vec![
                Attribute::keep("StationName", STATION_NAME, VR::SH, "1"),
                Attribute::keep("DeviceSerialNumber", DEVICE_SERIAL_NUMBER, VR::LO, "1"),
                Attribute::keep("DeviceUID", DEVICE_UID, VR::UI, "1"),
                Attribute::keep("PlateID", PLATE_ID, VR::LO, "1"),
                Attribute::keep("GeneratorID", GENERATOR_ID, VR::LO, "1"),
                Attribute::keep("CassetteID", CASSETTE_ID, VR::LO, "1"),
                Attribute::keep("GantryID", GANTRY_ID, VR::LO, "1"),
                Attribute::keep("DetectorID", DETECTOR_ID, VR::SH, "1"),
                Attribute::keep("SourceSerialNumber", SOURCE_SERIAL_NUMBER, VR::LO, "1"),
            ],
        }
    }

    pub fn clean_descriptors() -> Self {
        Self {
            name: "Clean Descriptors",
            code: MethodCode::CleanDescriptors,
            attributes: vec![
                Attribute::clean("ImageComments", IMAGE_COMMENTS, VR::LT, "1"),
                Attribute::clean("ProtocolName", PROTOCOL_NAME, VR::LO, "1"),
                Attribute::clean("DerivationDescription", DERIVATION_DESCRIPTION, VR::ST, "1"),
                Attribute::clean("PatientComments", PATIENT_COMMENTS, VR::LT, "1"),
                Attribute::clean(
                    "AdditionalPatientHistory",
                    ADDITIONAL_PATIENT_HISTORY,
                    VR::LT,
                    "1",
                ),
                Attribute::clean(
                    "AdmittingDiagnosesDescription",
                    ADMITTING_DIAGNOSES_DESCRIPTION,
                    VR::LO,
                    "1-n",
                ),
                Attribute::clean(
                    "RequestedProcedureDescription",
                    REQUESTED_PROCEDURE_DESCRIPTION,
                    VR::LO,
                    "1",
                ),
                Attribute::clean(
                    "ScheduledProcedureStepDescription",
                    SCHEDULED_PROCEDURE_STEP_DESCRIPTION,
                    VR::LO,
                    "1",
                ),
                Attribute::clean(
                    "PerformedProcedureStepDescription",
                    PERFORMED_PROCEDURE_STEP_DESCRIPTION,
                    VR::LO,
                    "1",
                ),
                Attribute::clean("StructureSetLabel", STRUCTURE_SET_LABEL, VR::SH, "1"),
            ],
        }
    }
}

/// Fallback decision of the basic profile for an element no option claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileAction {
    Remove,
    Replace,
    Retain,
}

/// Basic Application Confidentiality Profile; fixed, not configurable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BasicProfile;

impl BasicProfile {
    pub fn classify(&self, tag: Tag, vr: VR) -> ProfileAction {
        match tag {
            ISSUER_OF_PATIENT_ID
            | COUNTRY_OF_RESIDENCE
            | RELIGIOUS_PREFERENCE
            | RESPONSIBLE_PERSON
            | CONTENT_CREATOR_NAME
            | PERSON_NAME
            | ROI_INTERPRETER
            | INSTITUTION_CODE_SEQUENCE
            | REFERRING_PHYSICIAN_IDENTIFICATION_SEQUENCE
            | PHYSICIANS_OF_RECORD_IDENTIFICATION_SEQUENCE
            | PERFORMING_PHYSICIAN_IDENTIFICATION_SEQUENCE
            | PHYSICIANS_READING_STUDY_IDENTIFICATION_SEQUENCE
            | OPERATOR_IDENTIFICATION_SEQUENCE
            | OTHER_PATIENT_IDS
            | OTHER_PATIENT_NAMES
            | OTHER_PATIENT_IDS_SEQUENCE
            | PATIENT_BIRTH_TIME
            | PATIENT_BIRTH_NAME
            | PATIENT_AGE
            | PATIENT_SIZE
            | PATIENT_WEIGHT
            | PATIENT_ADDRESS
            | PATIENT_MOTHER_BIRTH_NAME
            | PATIENT_TELEPHONE_NUMBERS
            | PATIENT_INSURANCE_PLAN_CODE_SEQUENCE
            | ETHNIC_GROUP
            | SMOKING_STATUS
            | PREGNANCY_STATUS
            | PATIENT_SEX_NEUTERED
            | PATIENT_COMMENTS
            | MILITARY_RANK
            | OCCUPATION
            | ADDITIONAL_PATIENT_HISTORY
            | MEDICAL_RECORD_LOCATOR
            | REFERENCED_PATIENT_SEQUENCE
            | INSTITUTION_NAME
            | INSTITUTION_ADDRESS
            | INSTITUTIONAL_DEPARTMENT_NAME
            | REFERRING_PHYSICIAN_ADDRESS
            | REFERRING_PHYSICIAN_TELEPHONE_NUMBERS
            | STATION_NAME
            | PHYSICIANS_OF_RECORD
            | PERFORMING_PHYSICIAN_NAME
            | NAME_OF_PHYSICIANS_READING_STUDY
            | OPERATORS_NAME
            | ADMITTING_DIAGNOSES_DESCRIPTION
            | IMAGE_COMMENTS
            | PROTOCOL_NAME
            | DERIVATION_DESCRIPTION
            | DEVICE_SERIAL_NUMBER
            | DEVICE_UID
            | PLATE_ID
            | GENERATOR_ID
            | CASSETTE_ID
            | GANTRY_ID
            | DETECTOR_ID
            | SOURCE_SERIAL_NUMBER
            | SERIES_DATE
            | SERIES_TIME
            | ACQUISITION_DATE
            | ACQUISITION_TIME
            | ACQUISITION_DATE_TIME
            | INSTANCE_CREATION_DATE
            | INSTANCE_CREATION_TIME
            | PERFORMED_PROCEDURE_STEP_START_DATE
            | PERFORMED_PROCEDURE_STEP_START_TIME
            | PERFORMED_PROCEDURE_STEP_ID
            | PERFORMED_PROCEDURE_STEP_DESCRIPTION
            | SCHEDULED_PROCEDURE_STEP_DESCRIPTION
            | REQUESTED_PROCEDURE_DESCRIPTION
            | REQUEST_ATTRIBUTES_SEQUENCE
            | REVIEW_DATE
            | REVIEW_TIME
            | REVIEWER_NAME
            | STRUCTURE_SET_LABEL => ProfileAction::Remove,
            PATIENT_NAME
            | PATIENT_ID
            | PATIENT_BIRTH_DATE
            | PATIENT_SEX
            | STUDY_DATE
            | STUDY_TIME
            | CONTENT_DATE
            | CONTENT_TIME
            | ACCESSION_NUMBER
            | REFERRING_PHYSICIAN_NAME
            | STUDY_ID
            | STRUCTURE_SET_DATE
            | STRUCTURE_SET_TIME
            | RT_PLAN_DATE
            | RT_PLAN_TIME
            | PROCEDURE_CODE_SEQUENCE => ProfileAction::Replace,
            // any other patient attribute, and every AE title
            _ if tag.group() == 0x0010 || vr == VR::AE => ProfileAction::Remove,
            _ => ProfileAction::Retain,
        }
    }

    /// VR-appropriate placeholder for an element in the Replace set.
    pub fn replacement(&self, tag: Tag, vr: VR) -> InMemElement {
        match vr {
            VR::SQ => DataElement::new(
                tag,
                vr,
                Value::Sequence(DataSetSequence::new(
                    vec![InMemDicomObject::new_empty()],
                    Length::UNDEFINED,
                )),
            ),
            VR::DA => DataElement::new(tag, vr, PrimitiveValue::from(DEFAULT_DATE)),
            VR::TM => DataElement::new(tag, vr, PrimitiveValue::from(DEFAULT_TIME)),
            VR::DT => DataElement::new(tag, vr, PrimitiveValue::from(DEFAULT_DATE_TIME)),
            _ => DataElement::new(tag, vr, PrimitiveValue::Empty),
        }
    }
}

/// Outcome of offering an element to the configured options.
#[derive(Debug)]
pub enum Dispatch {
    Claimed(InMemElement),
    Unclaimed(InMemElement),
}

/// Immutable per-run policy: the mandatory profile plus enabled options, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    profile: BasicProfile,
    options: Vec<DeidentOption>,
}

impl Policy {
    pub fn load(config: &DeidentConfig) -> Self {
        let mut options = Vec::new();
        if config.retain_full_dates {
            options.push(DeidentOption::retain_full_dates());
        }
        if config.retain_patient_characteristics {
            options.push(DeidentOption::retain_patient_characteristics());
        }
        if config.retain_device_identity {
            options.push(DeidentOption::retain_device_identity());
        }
        if config.clean_descriptors {
            options.push(DeidentOption::clean_descriptors());
        }
        debug!(
            "Policy loaded with options: {:?}",
            options.iter().map(|o| o.name).collect::<Vec<_>>()
        );
        Self {
            profile: BasicProfile,
            options,
        }
    }

    pub fn options(&self) -> &[DeidentOption] {
        &self.options
    }

    pub fn profile(&self) -> &BasicProfile {
        &self.profile
    }

    /// Codes of every method this policy applies, profile first.
    pub fn applied_method_codes(&self) -> Vec<MethodCode> {
        std::iter::once(MethodCode::BasicProfile)
            .chain(self.options.iter().map(|o| o.code))
            .collect()
    }

    /// Free-text companion of the method code sequence.
    pub fn method_description(&self) -> String {
        std::iter::once("Basic Application Confidentiality Profile")
            .chain(self.options.iter().map(|o| o.name))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Offers the element to the options in order; the first binding on its tag wins.
    /// Overlapping bindings across options are not reported.
    pub fn deidentify(&self, element: InMemElement, idat: &Idat) -> Dispatch {
        let tag = element.tag();
        let binding = self
            .options
            .iter()
            .flat_map(|o| o.attributes.iter())
            .find(|a| a.matches(tag));
        match binding {
            Some(attribute) => Dispatch::Claimed(attribute.action.perform_deident(element, idat)),
            None => Dispatch::Unclaimed(element),
        }
    }

    /// Options, then the profile's Remove/Replace sets, then recursion into sequences.
    pub fn apply(&self, obj: InMemDicomObject, idat: &Idat) -> InMemDicomObject {
        InMemDicomObject::from_element_iter(
            obj.into_iter()
                .filter_map(|element| self.apply_element(element, idat)),
        )
    }

    fn apply_element(&self, element: InMemElement, idat: &Idat) -> Option<InMemElement> {
        if is_escrow_or_audit(element.tag()) {
            return Some(element);
        }
        let element = match self.deidentify(element, idat) {
            Dispatch::Claimed(element) => return Some(element),
            Dispatch::Unclaimed(element) => element,
        };
        let tag = element.tag();
        let vr = element.vr();
        match self.profile.classify(tag, vr) {
            ProfileAction::Remove => None,
            ProfileAction::Replace => Some(self.profile.replacement(tag, vr)),
            ProfileAction::Retain => match element.into_value() {
                Value::Sequence(seq) => {
                    let items: Vec<InMemDicomObject> = seq
                        .into_items()
                        .into_iter()
                        .map(|item| self.apply(item, idat))
                        .collect();
                    Some(DataElement::new(
                        tag,
                        vr,
                        Value::Sequence(DataSetSequence::new(items, Length::UNDEFINED)),
                    ))
                }
                other => Some(scrub_element(DataElement::new(tag, vr, other), idat)),
            },
        }
    }
}
