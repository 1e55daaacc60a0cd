//
// escrow.rs
// Dicom-Deid-rs
//
// Seals the original identifying values of an object into an Encrypted Attributes Sequence and restores
// them for authorised re-identification.
//
// Thales Matheus Mendonça Santos - October 2026

use dicom::core::header::Header;
use dicom::core::value::{DataSetSequence, Value};
use dicom::core::{DataElement, Length, PrimitiveValue, Tag, VR};
use dicom::encoding::TransferSyntaxIndex;
use dicom::object::InMemDicomObject;
use dicom::transfer_syntax::entries::EXPLICIT_VR_LITTLE_ENDIAN;
use dicom::transfer_syntax::TransferSyntaxRegistry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cipher::{CipherError, IdentityCipher};
use crate::dicom_access::{find_str_recursive, ElementAccess};
use crate::policy::MethodCode;
use crate::tags::*;

#[derive(Debug, Error)]
pub enum EscrowError {
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error("escrow encoding failed: {0}")]
    Encoding(String),
    #[error("escrow decoding failed: {0}")]
    Decoding(String),
    #[error("object is not flagged as de-identified")]
    NotDeidentified,
    #[error("object carries no encrypted attributes")]
    Missing,
    #[error("unsupported escrow transfer syntax {0}")]
    UnsupportedTransferSyntax(String),
}

/// The attributes whose original values are escrowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectedAttribute {
    FrameOfReferenceUid,
    PatientId,
    PatientName,
    PatientBirthDate,
    SopInstanceUid,
    StudyInstanceUid,
}

impl ProtectedAttribute {
    pub const ALL: [ProtectedAttribute; 6] = [
        ProtectedAttribute::FrameOfReferenceUid,
        ProtectedAttribute::PatientId,
        ProtectedAttribute::PatientName,
        ProtectedAttribute::PatientBirthDate,
        ProtectedAttribute::SopInstanceUid,
        ProtectedAttribute::StudyInstanceUid,
    ];

    pub fn tag(self) -> Tag {
        match self {
            ProtectedAttribute::FrameOfReferenceUid => FRAME_OF_REFERENCE_UID,
            ProtectedAttribute::PatientId => PATIENT_ID,
            ProtectedAttribute::PatientName => PATIENT_NAME,
            ProtectedAttribute::PatientBirthDate => PATIENT_BIRTH_DATE,
            ProtectedAttribute::SopInstanceUid => SOP_INSTANCE_UID,
            ProtectedAttribute::StudyInstanceUid => STUDY_INSTANCE_UID,
        }
    }

    pub fn vr(self) -> VR {
        match self {
            ProtectedAttribute::FrameOfReferenceUid
            | ProtectedAttribute::SopInstanceUid
            | ProtectedAttribute::StudyInstanceUid => VR::UI,
            ProtectedAttribute::PatientId => VR::LO,
            ProtectedAttribute::PatientName => VR::PN,
            ProtectedAttribute::PatientBirthDate => VR::DA,
        }
    }

    fn from_tag(tag: Tag) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.tag() == tag)
    }
}

/// Original identity of one object. Absent attributes stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityEscrow {
    pub frame_of_reference_uid: Option<String>,
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub patient_birth_date: Option<String>,
    pub sop_instance_uid: Option<String>,
    pub study_instance_uid: Option<String>,
}

impl IdentityEscrow {
    /// Captures the protected values of an untouched object. The frame of
    /// reference is searched through nested sequences (RTSTRUCT keeps it there).
    pub fn from_object(obj: &InMemDicomObject) -> Self {
        Self {
            frame_of_reference_uid: find_str_recursive(obj, FRAME_OF_REFERENCE_UID),
            patient_id: obj.element_str(PATIENT_ID),
            patient_name: obj.element_str(PATIENT_NAME),
            patient_birth_date: obj.element_str(PATIENT_BIRTH_DATE),
            sop_instance_uid: obj.element_str(SOP_INSTANCE_UID),
            study_instance_uid: obj.element_str(STUDY_INSTANCE_UID),
        }
    }

    pub fn get(&self, attribute: ProtectedAttribute) -> Option<&str> {
        match attribute {
            ProtectedAttribute::FrameOfReferenceUid => self.frame_of_reference_uid.as_deref(),
            ProtectedAttribute::PatientId => self.patient_id.as_deref(),
            ProtectedAttribute::PatientName => self.patient_name.as_deref(),
            ProtectedAttribute::PatientBirthDate => self.patient_birth_date.as_deref(),
            ProtectedAttribute::SopInstanceUid => self.sop_instance_uid.as_deref(),
            ProtectedAttribute::StudyInstanceUid => self.study_instance_uid.as_deref(),
        }
    }

    fn slot(&mut self, attribute: ProtectedAttribute) -> &mut Option<String> {
        match attribute {
            ProtectedAttribute::FrameOfReferenceUid => &mut self.frame_of_reference_uid,
            ProtectedAttribute::PatientId => &mut self.patient_id,
            ProtectedAttribute::PatientName => &mut self.patient_name,
            ProtectedAttribute::PatientBirthDate => &mut self.patient_birth_date,
            ProtectedAttribute::SopInstanceUid => &mut self.sop_instance_uid,
            ProtectedAttribute::StudyInstanceUid => &mut self.study_instance_uid,
        }
    }

    pub fn is_empty(&self) -> bool {
        ProtectedAttribute::ALL.iter().all(|a| self.get(*a).is_none())
    }

    /// One Modified Attributes Sequence item per present attribute.
    fn to_plaintext_object(&self) -> InMemDicomObject {
        let items: Vec<InMemDicomObject> = ProtectedAttribute::ALL
            .iter()
            .filter_map(|attribute| {
                self.get(*attribute).map(|value| {
                    let mut item = InMemDicomObject::new_empty();
                    item.put(DataElement::new(
                        attribute.tag(),
                        attribute.vr(),
                        PrimitiveValue::from(value),
                    ));
                    item
                })
            })
            .collect();

        let mut obj = InMemDicomObject::new_empty();
        obj.put(sequence(MODIFIED_ATTRIBUTES_SEQUENCE, items));
        obj
    }

    fn from_plaintext_object(obj: &InMemDicomObject) -> Self {
        let mut escrow = Self::default();
        for item in obj.items_of(MODIFIED_ATTRIBUTES_SEQUENCE) {
            for elem in item.iter() {
                if let Some(attribute) = ProtectedAttribute::from_tag(elem.tag()) {
                    *escrow.slot(attribute) = item.element_str(elem.tag());
                }
            }
        }
        escrow
    }
}

fn sequence(tag: Tag, items: Vec<InMemDicomObject>) -> dicom::object::mem::InMemElement {
    DataElement::new(
        tag,
        VR::SQ,
        Value::Sequence(DataSetSequence::new(items, Length::UNDEFINED)),
    )
}

/// Encrypts the escrow and returns the Encrypted Attributes Sequence item.
pub fn seal(
    original: &IdentityEscrow,
    cipher: &dyn IdentityCipher,
) -> Result<InMemDicomObject, EscrowError> {
    let ts_uid = EXPLICIT_VR_LITTLE_ENDIAN.uid();
    let ts = TransferSyntaxRegistry
        .get(ts_uid)
        .ok_or_else(|| EscrowError::UnsupportedTransferSyntax(ts_uid.to_string()))?;

    let mut plaintext = Vec::new();
    original
        .to_plaintext_object()
        .write_dataset_with_ts(&mut plaintext, ts)
        .map_err(|e| EscrowError::Encoding(e.to_string()))?;
    let ciphertext = cipher.encrypt(&plaintext)?;

    let mut item = InMemDicomObject::new_empty();
    item.put(DataElement::new(
        ENCRYPTED_CONTENT_TRANSFER_SYNTAX_UID,
        VR::UI,
        PrimitiveValue::from(ts_uid),
    ));
    item.put(DataElement::new(
        ENCRYPTED_CONTENT,
        VR::OB,
        PrimitiveValue::from(ciphertext),
    ));
    Ok(item)
}

/// Writes the sealed item plus the de-identification audit attributes into `obj`.
pub fn embed(
    obj: &mut InMemDicomObject,
    sealed: InMemDicomObject,
    method_codes: &[MethodCode],
    method_description: &str,
) {
    obj.put(sequence(ENCRYPTED_ATTRIBUTES_SEQUENCE, vec![sealed]));
    obj.put(DataElement::new(
        PATIENT_IDENTITY_REMOVED,
        VR::CS,
        PrimitiveValue::from("YES"),
    ));
    obj.put(DataElement::new(
        DEIDENTIFICATION_METHOD,
        VR::LO,
        PrimitiveValue::from(method_description),
    ));
    let codes = method_codes
        .iter()
        .map(|code| {
            let mut item = InMemDicomObject::new_empty();
            item.put(DataElement::new(CODE_VALUE, VR::SH, PrimitiveValue::from(code.value())));
            item.put(DataElement::new(
                CODING_SCHEME_DESIGNATOR,
                VR::SH,
                PrimitiveValue::from(MethodCode::CODING_SCHEME),
            ));
            item.put(DataElement::new(CODE_MEANING, VR::LO, PrimitiveValue::from(code.meaning())));
            item
        })
        .collect();
    obj.put(sequence(DEIDENTIFICATION_METHOD_CODE_SEQUENCE, codes));
}

/// Decrypts the escrow of a de-identified object without modifying it.
pub fn open(obj: &InMemDicomObject, cipher: &dyn IdentityCipher) -> Result<IdentityEscrow, EscrowError> {
    if obj.element_str(PATIENT_IDENTITY_REMOVED).as_deref() != Some("YES") {
        return Err(EscrowError::NotDeidentified);
    }
    let item = obj
        .items_of(ENCRYPTED_ATTRIBUTES_SEQUENCE)
        .first()
        .ok_or(EscrowError::Missing)?;
    let ts_uid = item
        .element_str(ENCRYPTED_CONTENT_TRANSFER_SYNTAX_UID)
        .ok_or(EscrowError::Missing)?;
    let ts = TransferSyntaxRegistry
        .get(&ts_uid)
        .ok_or_else(|| EscrowError::UnsupportedTransferSyntax(ts_uid.clone()))?;
    let ciphertext = item
        .element(ENCRYPTED_CONTENT)
        .map_err(|_| EscrowError::Missing)?
        .to_bytes()
        .map_err(|e| EscrowError::Decoding(e.to_string()))?;

    let plaintext = cipher.decrypt(&ciphertext)?;
    let decoded = InMemDicomObject::read_dataset_with_ts(&plaintext[..], ts)
        .map_err(|e| EscrowError::Decoding(e.to_string()))?;
    Ok(IdentityEscrow::from_plaintext_object(&decoded))
}

/// Restores every escrowed value into `obj`, then clears the flag and the escrow elements.
pub fn unseal(
    obj: &mut InMemDicomObject,
    cipher: &dyn IdentityCipher,
) -> Result<IdentityEscrow, EscrowError> {
    let original = open(obj, cipher)?;

    for attribute in ProtectedAttribute::ALL {
        let Some(value) = original.get(attribute) else {
            continue;
        };
        if attribute == ProtectedAttribute::FrameOfReferenceUid {
            restore_everywhere(obj, attribute.tag(), value);
        } else {
            obj.put(DataElement::new(
                attribute.tag(),
                attribute.vr(),
                PrimitiveValue::from(value),
            ));
        }
    }

    obj.remove_element(ENCRYPTED_ATTRIBUTES_SEQUENCE);
    obj.remove_element(DEIDENTIFICATION_METHOD);
    obj.remove_element(DEIDENTIFICATION_METHOD_CODE_SEQUENCE);
    obj.put(DataElement::new(
        PATIENT_IDENTITY_REMOVED,
        VR::CS,
        PrimitiveValue::from("NO"),
    ));
    Ok(original)
}

/// Replaces every occurrence of `tag`, at any depth, with `value`.
fn restore_everywhere(obj: &mut InMemDicomObject, tag: Tag, value: &str) {
    let taken = std::mem::replace(obj, InMemDicomObject::new_empty());
    *obj = InMemDicomObject::from_element_iter(taken.into_iter().map(|elem| {
        let elem_tag = elem.tag();
        let vr = elem.vr();
        if elem_tag == tag {
            return DataElement::new(elem_tag, vr, PrimitiveValue::from(value));
        }
        match elem.into_value() {
            Value::Sequence(seq) => {
                let items: Vec<InMemDicomObject> = seq
                    .into_items()
                    .into_iter()
                    .map(|mut item| {
                        restore_everywhere(&mut item, tag, value);
                        item
                    })
                    .collect();
                DataElement::new(
                    elem_tag,
                    vr,
                    Value::Sequence(DataSetSequence::new(items, Length::UNDEFINED)),
                )
            }
            other => DataElement::new(elem_tag, vr, other),
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::AesGcmCipher;

    fn full_escrow() -> IdentityEscrow {
        IdentityEscrow {
            frame_of_reference_uid: Some("1.2.3".into()),
            patient_id: Some("P001".into()),
            patient_name: Some("DOE^JOHN".into()),
            patient_birth_date: Some("19650412".into()),
            sop_instance_uid: Some("1.2.3.4.1".into()),
            study_instance_uid: Some("1.2.3.4".into()),
        }
    }

    fn embedded(original: &IdentityEscrow, cipher: &AesGcmCipher) -> InMemDicomObject {
        let sealed = seal(original, cipher).expect("seal");
        let mut obj = InMemDicomObject::new_empty();
        embed(&mut obj, sealed, &[MethodCode::BasicProfile], "Basic");
        obj
    }

    #[test]
    fn seal_then_open_is_identity() {
        let cipher = AesGcmCipher::new(&AesGcmCipher::generate_key());
        for original in [
            full_escrow(),
            IdentityEscrow {
                patient_id: Some("P001".into()),
                ..IdentityEscrow::default()
            },
            IdentityEscrow::default(),
        ] {
            let obj = embedded(&original, &cipher);
            assert_eq!(open(&obj, &cipher).expect("open"), original);
        }
    }

    #[test]
    fn ciphertext_hides_identifying_literals() {
        let cipher = AesGcmCipher::new(&AesGcmCipher::generate_key());
        let item = seal(&full_escrow(), &cipher).expect("seal");
        let bytes = item
            .element(ENCRYPTED_CONTENT)
            .expect("content")
            .to_bytes()
            .expect("bytes")
            .into_owned();
        for needle in [b"P001".as_slice(), b"DOE^JOHN".as_slice()] {
            assert!(!bytes.windows(needle.len()).any(|w| w == needle));
        }
    }

    #[test]
    fn embed_records_flag_and_codes() {
        let cipher = AesGcmCipher::new(&AesGcmCipher::generate_key());
        let sealed = seal(&full_escrow(), &cipher).expect("seal");
        let mut obj = InMemDicomObject::new_empty();
        embed(
            &mut obj,
            sealed,
            &[MethodCode::BasicProfile, MethodCode::RetainFullDates],
            "Basic Application Confidentiality Profile; Retain Full Dates",
        );
        assert_eq!(obj.element_str(PATIENT_IDENTITY_REMOVED).as_deref(), Some("YES"));
        let codes: Vec<String> = obj
            .items_of(DEIDENTIFICATION_METHOD_CODE_SEQUENCE)
            .iter()
            .filter_map(|i| i.element_str(CODE_VALUE))
            .collect();
        assert_eq!(codes, vec!["113100", "113106"]);
    }

    #[test]
    fn unseal_restores_and_clears() {
        let cipher = AesGcmCipher::new(&AesGcmCipher::generate_key());
        let mut obj = embedded(&full_escrow(), &cipher);
        obj.put(DataElement::new(PATIENT_ID, VR::LO, PrimitiveValue::from("RPB-001")));
        let mut ref_item = InMemDicomObject::new_empty();
        ref_item.put(DataElement::new(
            FRAME_OF_REFERENCE_UID,
            VR::UI,
            PrimitiveValue::from("2.25.99"),
        ));
        obj.put(sequence(REFERENCED_FRAME_OF_REFERENCE_SEQUENCE, vec![ref_item]));

        let restored = unseal(&mut obj, &cipher).expect("unseal");
        assert_eq!(restored, full_escrow());
        assert_eq!(obj.element_str(PATIENT_ID).as_deref(), Some("P001"));
        assert_eq!(obj.element_str(PATIENT_NAME).as_deref(), Some("DOE^JOHN"));
        assert_eq!(
            obj.items_of(REFERENCED_FRAME_OF_REFERENCE_SEQUENCE)[0]
                .element_str(FRAME_OF_REFERENCE_UID)
                .as_deref(),
            Some("1.2.3")
        );
        assert!(!obj.has_element(ENCRYPTED_ATTRIBUTES_SEQUENCE));
        assert_eq!(obj.element_str(PATIENT_IDENTITY_REMOVED).as_deref(), Some("NO"));
        assert!(matches!(
            open(&obj, &cipher),
            Err(EscrowError::NotDeidentified)
        ));
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let obj = embedded(&full_escrow(), &AesGcmCipher::new(&AesGcmCipher::generate_key()));
        let other = AesGcmCipher::new(&AesGcmCipher::generate_key());
        assert!(matches!(open(&obj, &other), Err(EscrowError::Cipher(_))));
    }
}
