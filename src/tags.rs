//
// tags.rs
// Dicom-Deid-rs
//
// Named attribute tags used by the scanner, the policy tables and the engine, plus the fixed UID-bearing set.
//
// Thales Matheus Mendonça Santos - October 2026

use dicom::core::Tag;

// File meta
pub const MEDIA_STORAGE_SOP_INSTANCE_UID: Tag = Tag(0x0002, 0x0003);

// SOP common / general study / general series
pub const INSTANCE_CREATION_DATE: Tag = Tag(0x0008, 0x0012);
pub const INSTANCE_CREATION_TIME: Tag = Tag(0x0008, 0x0013);
pub const INSTANCE_CREATOR_UID: Tag = Tag(0x0008, 0x0014);
pub const SOP_CLASS_UID: Tag = Tag(0x0008, 0x0016);
pub const SOP_INSTANCE_UID: Tag = Tag(0x0008, 0x0018);
pub const STUDY_DATE: Tag = Tag(0x0008, 0x0020);
pub const SERIES_DATE: Tag = Tag(0x0008, 0x0021);
pub const ACQUISITION_DATE: Tag = Tag(0x0008, 0x0022);
pub const CONTENT_DATE: Tag = Tag(0x0008, 0x0023);
pub const ACQUISITION_DATE_TIME: Tag = Tag(0x0008, 0x002A);
pub const STUDY_TIME: Tag = Tag(0x0008, 0x0030);
pub const SERIES_TIME: Tag = Tag(0x0008, 0x0031);
pub const ACQUISITION_TIME: Tag = Tag(0x0008, 0x0032);
pub const CONTENT_TIME: Tag = Tag(0x0008, 0x0033);
pub const ACCESSION_NUMBER: Tag = Tag(0x0008, 0x0050);
pub const MODALITY: Tag = Tag(0x0008, 0x0060);
pub const MANUFACTURER: Tag = Tag(0x0008, 0x0070);
pub const INSTITUTION_NAME: Tag = Tag(0x0008, 0x0080);
pub const INSTITUTION_ADDRESS: Tag = Tag(0x0008, 0x0081);
pub const INSTITUTION_CODE_SEQUENCE: Tag = Tag(0x0008, 0x0082);
pub const REFERRING_PHYSICIAN_NAME: Tag = Tag(0x0008, 0x0090);
pub const REFERRING_PHYSICIAN_ADDRESS: Tag = Tag(0x0008, 0x0092);
pub const REFERRING_PHYSICIAN_TELEPHONE_NUMBERS: Tag = Tag(0x0008, 0x0094);
pub const REFERRING_PHYSICIAN_IDENTIFICATION_SEQUENCE: Tag = Tag(0x0008, 0x0096);
pub const CODE_VALUE: Tag = Tag(0x0008, 0x0100);
pub const CODING_SCHEME_DESIGNATOR: Tag = Tag(0x0008, 0x0102);
pub const CODE_MEANING: Tag = Tag(0x0008, 0x0104);
pub const STATION_NAME: Tag = Tag(0x0008, 0x1010);
pub const STUDY_DESCRIPTION: Tag = Tag(0x0008, 0x1030);
pub const PROCEDURE_CODE_SEQUENCE: Tag = Tag(0x0008, 0x1032);
pub const SERIES_DESCRIPTION: Tag = Tag(0x0008, 0x103E);
pub const INSTITUTIONAL_DEPARTMENT_NAME: Tag = Tag(0x0008, 0x1040);
pub const PHYSICIANS_OF_RECORD: Tag = Tag(0x0008, 0x1048);
pub const PHYSICIANS_OF_RECORD_IDENTIFICATION_SEQUENCE: Tag = Tag(0x0008, 0x1049);
pub const PERFORMING_PHYSICIAN_NAME: Tag = Tag(0x0008, 0x1050);
pub const PERFORMING_PHYSICIAN_IDENTIFICATION_SEQUENCE: Tag = Tag(0x0008, 0x1052);
pub const NAME_OF_PHYSICIANS_READING_STUDY: Tag = Tag(0x0008, 0x1060);
pub const PHYSICIANS_READING_STUDY_IDENTIFICATION_SEQUENCE: Tag = Tag(0x0008, 0x1062);
pub const OPERATORS_NAME: Tag = Tag(0x0008, 0x1070);
pub const OPERATOR_IDENTIFICATION_SEQUENCE: Tag = Tag(0x0008, 0x1072);
pub const ADMITTING_DIAGNOSES_DESCRIPTION: Tag = Tag(0x0008, 0x1080);
pub const MANUFACTURER_MODEL_NAME: Tag = Tag(0x0008, 0x1090);
pub const REFERENCED_PATIENT_SEQUENCE: Tag = Tag(0x0008, 0x1120);
pub const REFERENCED_SOP_INSTANCE_UID: Tag = Tag(0x0008, 0x1155);
pub const DERIVATION_DESCRIPTION: Tag = Tag(0x0008, 0x2111);
pub const IRRADIATION_EVENT_UID: Tag = Tag(0x0008, 0x3010);

// Patient
pub const PATIENT_NAME: Tag = Tag(0x0010, 0x0010);
pub const PATIENT_ID: Tag = Tag(0x0010, 0x0020);
pub const ISSUER_OF_PATIENT_ID: Tag = Tag(0x0010, 0x0021);
pub const PATIENT_BIRTH_DATE: Tag = Tag(0x0010, 0x0030);
pub const PATIENT_BIRTH_TIME: Tag = Tag(0x0010, 0x0032);
pub const PATIENT_SEX: Tag = Tag(0x0010, 0x0040);
pub const PATIENT_INSURANCE_PLAN_CODE_SEQUENCE: Tag = Tag(0x0010, 0x0050);
pub const OTHER_PATIENT_IDS: Tag = Tag(0x0010, 0x1000);
pub const OTHER_PATIENT_NAMES: Tag = Tag(0x0010, 0x1001);
pub const OTHER_PATIENT_IDS_SEQUENCE: Tag = Tag(0x0010, 0x1002);
pub const PATIENT_BIRTH_NAME: Tag = Tag(0x0010, 0x1005);
pub const PATIENT_AGE: Tag = Tag(0x0010, 0x1010);
pub const PATIENT_SIZE: Tag = Tag(0x0010, 0x1020);
pub const PATIENT_WEIGHT: Tag = Tag(0x0010, 0x1030);
pub const PATIENT_ADDRESS: Tag = Tag(0x0010, 0x1040);
pub const PATIENT_MOTHER_BIRTH_NAME: Tag = Tag(0x0010, 0x1060);
pub const MILITARY_RANK: Tag = Tag(0x0010, 0x1080);
pub const MEDICAL_RECORD_LOCATOR: Tag = Tag(0x0010, 0x1090);
pub const COUNTRY_OF_RESIDENCE: Tag = Tag(0x0010, 0x2150);
pub const PATIENT_TELEPHONE_NUMBERS: Tag = Tag(0x0010, 0x2154);
pub const ETHNIC_GROUP: Tag = Tag(0x0010, 0x2160);
pub const OCCUPATION: Tag = Tag(0x0010, 0x2180);
pub const SMOKING_STATUS: Tag = Tag(0x0010, 0x21A0);
pub const ADDITIONAL_PATIENT_HISTORY: Tag = Tag(0x0010, 0x21B0);
pub const PREGNANCY_STATUS: Tag = Tag(0x0010, 0x21C0);
pub const RELIGIOUS_PREFERENCE: Tag = Tag(0x0010, 0x21F0);
pub const PATIENT_SEX_NEUTERED: Tag = Tag(0x0010, 0x2203);
pub const RESPONSIBLE_PERSON: Tag = Tag(0x0010, 0x2297);
pub const PATIENT_COMMENTS: Tag = Tag(0x0010, 0x4000);

// De-identification audit
pub const PATIENT_IDENTITY_REMOVED: Tag = Tag(0x0012, 0x0062);
pub const DEIDENTIFICATION_METHOD: Tag = Tag(0x0012, 0x0063);
pub const DEIDENTIFICATION_METHOD_CODE_SEQUENCE: Tag = Tag(0x0012, 0x0064);
pub const LONGITUDINAL_TEMPORAL_INFORMATION_MODIFIED: Tag = Tag(0x0028, 0x0303);

// Equipment
pub const DEVICE_SERIAL_NUMBER: Tag = Tag(0x0018, 0x1000);
pub const DEVICE_UID: Tag = Tag(0x0018, 0x1002);
pub const PLATE_ID: Tag = Tag(0x0018, 0x1004);
pub const GENERATOR_ID: Tag = Tag(0x0018, 0x1005);
pub const CASSETTE_ID: Tag = Tag(0x0018, 0x1007);
pub const GANTRY_ID: Tag = Tag(0x0018, 0x1008);
pub const PROTOCOL_NAME: Tag = Tag(0x0018, 0x1030);
pub const DETECTOR_ID: Tag = Tag(0x0018, 0x700A);

// Relationship / frame of reference
pub const STUDY_INSTANCE_UID: Tag = Tag(0x0020, 0x000D);
pub const SERIES_INSTANCE_UID: Tag = Tag(0x0020, 0x000E);
pub const STUDY_ID: Tag = Tag(0x0020, 0x0010);
pub const INSTANCE_NUMBER: Tag = Tag(0x0020, 0x0013);
pub const FRAME_OF_REFERENCE_UID: Tag = Tag(0x0020, 0x0052);
pub const SYNCHRONIZATION_FRAME_OF_REFERENCE_UID: Tag = Tag(0x0020, 0x0200);
pub const IMAGE_COMMENTS: Tag = Tag(0x0020, 0x4000);
pub const CONCATENATION_UID: Tag = Tag(0x0020, 0x9161);
pub const DIMENSION_ORGANIZATION_UID: Tag = Tag(0x0020, 0x9164);

// Requests / procedure steps
pub const REQUESTED_PROCEDURE_DESCRIPTION: Tag = Tag(0x0032, 0x1060);
pub const SCHEDULED_PROCEDURE_STEP_DESCRIPTION: Tag = Tag(0x0040, 0x0007);
pub const PERFORMED_PROCEDURE_STEP_START_DATE: Tag = Tag(0x0040, 0x0244);
pub const PERFORMED_PROCEDURE_STEP_START_TIME: Tag = Tag(0x0040, 0x0245);
pub const PERFORMED_PROCEDURE_STEP_ID: Tag = Tag(0x0040, 0x0253);
pub const PERFORMED_PROCEDURE_STEP_DESCRIPTION: Tag = Tag(0x0040, 0x0254);
pub const REQUEST_ATTRIBUTES_SEQUENCE: Tag = Tag(0x0040, 0x0275);
pub const PERSON_NAME: Tag = Tag(0x0040, 0xA123);
pub const CONTENT_CREATOR_NAME: Tag = Tag(0x0070, 0x0084);
pub const STORAGE_MEDIA_FILE_SET_UID: Tag = Tag(0x0088, 0x0140);

// RT
pub const DOSE_SUMMATION_TYPE: Tag = Tag(0x3004, 0x000A);
pub const STRUCTURE_SET_LABEL: Tag = Tag(0x3006, 0x0002);
pub const STRUCTURE_SET_DATE: Tag = Tag(0x3006, 0x0008);
pub const STRUCTURE_SET_TIME: Tag = Tag(0x3006, 0x0009);
pub const REFERENCED_FRAME_OF_REFERENCE_SEQUENCE: Tag = Tag(0x3006, 0x0010);
pub const STRUCTURE_SET_ROI_SEQUENCE: Tag = Tag(0x3006, 0x0020);
pub const ROI_NUMBER: Tag = Tag(0x3006, 0x0022);
pub const REFERENCED_FRAME_OF_REFERENCE_UID: Tag = Tag(0x3006, 0x0024);
pub const ROI_NAME: Tag = Tag(0x3006, 0x0026);
pub const RT_ROI_OBSERVATIONS_SEQUENCE: Tag = Tag(0x3006, 0x0080);
pub const REFERENCED_ROI_NUMBER: Tag = Tag(0x3006, 0x0084);
pub const ROI_OBSERVATION_LABEL: Tag = Tag(0x3006, 0x0085);
pub const RT_ROI_INTERPRETED_TYPE: Tag = Tag(0x3006, 0x00A4);
pub const ROI_INTERPRETER: Tag = Tag(0x3006, 0x00A6);
pub const RELATED_FRAME_OF_REFERENCE_UID: Tag = Tag(0x3006, 0x00C2);
pub const SOURCE_SERIAL_NUMBER: Tag = Tag(0x3008, 0x0105);
pub const RT_PLAN_LABEL: Tag = Tag(0x300A, 0x0002);
pub const RT_PLAN_DATE: Tag = Tag(0x300A, 0x0006);
pub const RT_PLAN_TIME: Tag = Tag(0x300A, 0x0007);
pub const DOSE_REFERENCE_UID: Tag = Tag(0x300A, 0x0013);
pub const FRACTION_GROUP_SEQUENCE: Tag = Tag(0x300A, 0x0070);
pub const NUMBER_OF_BEAMS: Tag = Tag(0x300A, 0x0080);
pub const BEAM_SEQUENCE: Tag = Tag(0x300A, 0x00B0);
pub const REFERENCED_RT_PLAN_SEQUENCE: Tag = Tag(0x300C, 0x0002);
pub const REFERENCED_STRUCTURE_SET_SEQUENCE: Tag = Tag(0x300C, 0x0060);
pub const REVIEW_DATE: Tag = Tag(0x300E, 0x0004);
pub const REVIEW_TIME: Tag = Tag(0x300E, 0x0005);
pub const REVIEWER_NAME: Tag = Tag(0x300E, 0x0008);

// Encrypted attributes (identity escrow)
pub const ENCRYPTED_ATTRIBUTES_SEQUENCE: Tag = Tag(0x0400, 0x0500);
pub const ENCRYPTED_CONTENT_TRANSFER_SYNTAX_UID: Tag = Tag(0x0400, 0x0510);
pub const ENCRYPTED_CONTENT: Tag = Tag(0x0400, 0x0520);
pub const MODIFIED_ATTRIBUTES_SEQUENCE: Tag = Tag(0x0400, 0x0550);

/// Attributes whose UI values identify an entity of the study and therefore get remapped.
///
/// SOP Class UID and Transfer Syntax UID are deliberately absent: they name
/// standard definitions, not instances.
pub fn is_uid_bearing(tag: Tag) -> bool {
    matches!(
        tag,
        MEDIA_STORAGE_SOP_INSTANCE_UID
            | INSTANCE_CREATOR_UID
            | SOP_INSTANCE_UID
            | REFERENCED_SOP_INSTANCE_UID
            | IRRADIATION_EVENT_UID
            | STUDY_INSTANCE_UID
            | SERIES_INSTANCE_UID
            | FRAME_OF_REFERENCE_UID
            | SYNCHRONIZATION_FRAME_OF_REFERENCE_UID
            | CONCATENATION_UID
            | DIMENSION_ORGANIZATION_UID
            | STORAGE_MEDIA_FILE_SET_UID
            | REFERENCED_FRAME_OF_REFERENCE_UID
            | RELATED_FRAME_OF_REFERENCE_UID
            | DOSE_REFERENCE_UID
    )
}

/// Elements written by the escrow/audit step; policy passes leave them alone.
pub fn is_escrow_or_audit(tag: Tag) -> bool {
    matches!(
        tag,
        ENCRYPTED_ATTRIBUTES_SEQUENCE
            | PATIENT_IDENTITY_REMOVED
            | DEIDENTIFICATION_METHOD
            | DEIDENTIFICATION_METHOD_CODE_SEQUENCE
            | LONGITUDINAL_TEMPORAL_INFORMATION_MODIFIED
    )
}

pub fn is_private(tag: Tag) -> bool {
    tag.group() % 2 == 1
}
