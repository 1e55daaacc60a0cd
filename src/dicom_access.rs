use std::fs;
use std::path::Path;

use dicom::core::value::Value;
use dicom::core::Tag;
use dicom::dictionary_std::StandardDataDictionary;
use dicom::encoding::TransferSyntaxIndex;
use dicom::object::file::ReadPreamble;
use dicom::object::{
    DefaultDicomObject, FileDicomObject, FileMetaTableBuilder, InMemDicomObject, OpenFileOptions,
    ReadError,
};
use dicom::transfer_syntax::entries::{EXPLICIT_VR_LITTLE_ENDIAN, IMPLICIT_VR_LITTLE_ENDIAN};
use dicom::transfer_syntax::TransferSyntaxRegistry;
use tracing::debug;

use crate::tags::{SOP_CLASS_UID, SOP_INSTANCE_UID};

/// Small helper trait to pull string values from different DICOM object shapes.
pub trait ElementAccess {
    fn element_str(&self, tag: Tag) -> Option<String>;
    fn has_element(&self, tag: Tag) -> bool;
    /// Items of the sequence at `tag`, or an empty slice.
    fn items_of(&self, tag: Tag) -> &[InMemDicomObject];
}

impl ElementAccess for DefaultDicomObject {
    fn element_str(&self, tag: Tag) -> Option<String> {
        (**self).element_str(tag)
    }

    fn has_element(&self, tag: Tag) -> bool {
        self.element(tag).is_ok()
    }

    fn items_of(&self, tag: Tag) -> &[InMemDicomObject] {
        (**self).items_of(tag)
    }
}

impl ElementAccess for InMemDicomObject<StandardDataDictionary> {
    fn element_str(&self, tag: Tag) -> Option<String> {
        self.element(tag)
            .ok()
            .and_then(|e| e.to_str().ok())
            .map(|s| clean_text(&s))
            .filter(|s| !s.is_empty())
    }

    fn has_element(&self, tag: Tag) -> bool {
        self.element(tag).is_ok()
    }

    fn items_of(&self, tag: Tag) -> &[InMemDicomObject] {
        self.element(tag)
            .ok()
            .and_then(|e| e.items())
            .unwrap_or(&[])
    }
}

/// Depth-first search for the first non-empty value of `tag`, descending into every sequence.
pub fn find_str_recursive(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
    if let Some(value) = obj.element_str(tag) {
        return Some(value);
    }
    obj.iter().find_map(|elem| match elem.value() {
        Value::Sequence(seq) => seq
            .items()
            .iter()
            .find_map(|item| find_str_recursive(item, tag)),
        _ => None,
    })
}

/// Opens a file in tolerant mode: a missing 128-byte preamble is accepted, and so is a
/// data set stored with no file meta group at all.
///
/// For the latter a file meta group is synthesised carrying the transfer syntax that
/// decoded the data set, so writers re-encode the object the same way.
pub fn open_tolerant(path: &Path) -> Result<DefaultDicomObject, ReadError> {
    let err = match OpenFileOptions::new()
        .read_preamble(ReadPreamble::Auto)
        .open_file(path)
    {
        Ok(obj) => return Ok(obj),
        Err(err) => err,
    };
    match read_bare_dataset(path) {
        Some(obj) => {
            debug!(
                "{} has no file meta group, read as {}",
                path.display(),
                obj.meta().transfer_syntax().trim_end_matches('\0')
            );
            Ok(obj)
        }
        None => Err(err),
    }
}

/// Tries implicit then explicit VR little endian; only a data set naming its SOP class
/// and instance is accepted.
fn read_bare_dataset(path: &Path) -> Option<DefaultDicomObject> {
    let bytes = fs::read(path).ok()?;
    [IMPLICIT_VR_LITTLE_ENDIAN.uid(), EXPLICIT_VR_LITTLE_ENDIAN.uid()]
        .into_iter()
        .find_map(|ts_uid| {
            let ts = TransferSyntaxRegistry.get(ts_uid)?;
            let dataset = InMemDicomObject::read_dataset_with_ts(&bytes[..], ts).ok()?;
            let sop_class_uid = dataset.element_str(SOP_CLASS_UID)?;
            let sop_instance_uid = dataset.element_str(SOP_INSTANCE_UID)?;
            let meta = FileMetaTableBuilder::new()
                .transfer_syntax(ts_uid)
                .media_storage_sop_class_uid(sop_class_uid.as_str())
                .media_storage_sop_instance_uid(sop_instance_uid.as_str())
                .build()
                .ok()?;
            let mut file =
                FileDicomObject::new_empty_with_dict_and_meta(StandardDataDictionary, meta);
            for elem in dataset {
                file.put(elem);
            }
            Some(file)
        })
}

fn clean_text(raw: &str) -> String {
    raw.trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}
