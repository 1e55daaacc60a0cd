//! UID generation and the per-run original -> new UID table.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use dicom::core::header::Header;
use dicom::core::value::{DataSetSequence, Value};
use dicom::core::{DataElement, Length, PrimitiveValue, VR};
use dicom::object::InMemDicomObject;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::dicom_access::open_tolerant;
use crate::tags::is_uid_bearing;

const UID_PREFIX: &str = "2.25.";

#[derive(Debug, Error)]
#[error("cannot collect UIDs from {path}: {reason}")]
pub struct UidCollectError {
    pub path: PathBuf,
    pub reason: String,
}

/// Produces `2.25.<n>` UIDs where `n` is 128 bits of SHA-256 over a UUID, the pid and random bits.
///
/// Only guards against repeating the immediately preceding value.
#[derive(Debug, Default)]
pub struct UidGenerator {
    last: Mutex<Option<String>>,
}

impl UidGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate(&self) -> String {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        loop {
            let candidate = fresh_uid();
            if last.as_deref() != Some(candidate.as_str()) {
                *last = Some(candidate.clone());
                return candidate;
            }
        }
    }
}

fn fresh_uid() -> String {
    let mut hasher = Sha256::new();
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(rand::thread_rng().next_u64().to_le_bytes());
    let digest = hasher.finalize();

    let mut high = [0u8; 16];
    high.copy_from_slice(&digest[..16]);
    format!("{}{}", UID_PREFIX, u128::from_be_bytes(high))
}

/// Bijective mapping from every UID-bearing value of a selection to a fresh UID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UidRemapTable {
    order: Vec<String>,
    map: HashMap<String, String>,
}

impl UidRemapTable {
    /// Builds the table from already-collected originals, in first-seen order.
    pub fn from_originals<I>(originals: I, generator: &UidGenerator) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut table = Self::default();
        let mut issued: HashSet<String> = HashSet::new();
        for original in originals {
            if table.map.contains_key(&original) {
                continue;
            }
            let new_uid = loop {
                let candidate = generator.generate();
                if candidate != original && !issued.contains(&candidate) {
                    break candidate;
                }
            };
            issued.insert(new_uid.clone());
            table.order.push(original.clone());
            table.map.insert(original, new_uid);
        }
        table
    }

    /// Read-only collection pass over every file of the selection.
    pub fn collect<'a, I>(
        paths: I,
        generator: &UidGenerator,
    ) -> Result<Self, UidCollectError>
    where
        I: IntoIterator<Item = &'a Path>,
    {
        let mut originals = Vec::new();
        for path in paths {
            let obj = open_tolerant(path).map_err(|e| UidCollectError {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
            let meta_uid = obj
                .meta()
                .media_storage_sop_instance_uid()
                .trim_end_matches('\0')
                .trim();
            if !meta_uid.is_empty() {
                originals.push(meta_uid.to_string());
            }
            collect_uids(&obj, &mut originals);
        }
        let table = Self::from_originals(originals, generator);
        debug!("Collected {} distinct UIDs", table.len());
        Ok(table)
    }

    pub fn get(&self, original: &str) -> Option<&str> {
        self.map.get(original.trim()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Pairs in first-seen order of the originals.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.order
            .iter()
            .map(move |o| (o.as_str(), self.map[o].as_str()))
    }

    /// Rewrites every UID-bearing UI value, recursing through sequences.
    pub fn remap_object(&self, obj: InMemDicomObject) -> InMemDicomObject {
        InMemDicomObject::from_element_iter(obj.into_iter().map(|elem| {
            let tag = elem.tag();
            let vr = elem.vr();
            match elem.into_value() {
                Value::Primitive(p) if vr == VR::UI && is_uid_bearing(tag) => {
                    DataElement::new(tag, vr, Value::Primitive(self.remap_value(p)))
                }
                Value::Sequence(seq) => {
                    let items: Vec<InMemDicomObject> = seq
                        .into_items()
                        .into_iter()
                        .map(|item| self.remap_object(item))
                        .collect();
                    DataElement::new(
                        tag,
                        vr,
                        Value::Sequence(DataSetSequence::new(items, Length::UNDEFINED)),
                    )
                }
                other => DataElement::new(tag, vr, other),
            }
        }))
    }

    fn remap_value(&self, value: PrimitiveValue) -> PrimitiveValue {
        match value {
            PrimitiveValue::Str(s) => PrimitiveValue::Str(self.remap_str(s)),
            PrimitiveValue::Strs(values) => {
                PrimitiveValue::Strs(values.into_iter().map(|s| self.remap_str(s)).collect())
            }
            other => other,
        }
    }

    fn remap_str(&self, original: String) -> String {
        let key = original.trim_end_matches('\0').trim();
        match self.map.get(key) {
            Some(new_uid) => new_uid.clone(),
            None => original,
        }
    }
}

/// Appends every UID-bearing value found in `obj` (depth-first) to `out`.
pub fn collect_uids(obj: &InMemDicomObject, out: &mut Vec<String>) {
    for elem in obj.iter() {
        match elem.value() {
            Value::Primitive(p) if elem.vr() == VR::UI && is_uid_bearing(elem.tag()) => {
                for uid in p.to_multi_str().iter() {
                    let uid = uid.trim_end_matches('\0').trim();
                    if !uid.is_empty() {
                        out.push(uid.to_string());
                    }
                }
            }
            Value::Sequence(seq) => {
                for item in seq.items() {
                    collect_uids(item, out);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dicom_access::ElementAccess;
    use crate::tags::*;

    #[test]
    fn generated_uids_are_valid_and_distinct() {
        let generator = UidGenerator::new();
        let a = generator.generate();
        let b = generator.generate();
        assert_ne!(a, b);
        for uid in [&a, &b] {
            assert!(uid.starts_with("2.25."));
            assert!(uid.len() <= 64);
            assert!(uid[5..].chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn table_dedups_and_never_maps_to_self() {
        let generator = UidGenerator::new();
        let table = UidRemapTable::from_originals(
            ["1.2.3", "1.2.4", "1.2.3"].map(String::from),
            &generator,
        );
        assert_eq!(table.len(), 2);
        let a = table.get("1.2.3").unwrap();
        let b = table.get("1.2.4").unwrap();
        assert_ne!(a, b);
        assert_ne!(a, "1.2.3");
        let order: Vec<&str> = table.iter().map(|(o, _)| o).collect();
        assert_eq!(order, vec!["1.2.3", "1.2.4"]);
    }

    #[test]
    fn remap_reaches_nested_references_only() {
        let mut item = InMemDicomObject::new_empty();
        item.put(DataElement::new(
            REFERENCED_SOP_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from("1.2.3"),
        ));
        let mut obj = InMemDicomObject::new_empty();
        obj.put(DataElement::new(SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from("1.2.3")));
        obj.put(DataElement::new(
            SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from("1.2.840.10008.5.1.4.1.1.2"),
        ));
        obj.put(DataElement::new(
            REFERENCED_STRUCTURE_SET_SEQUENCE,
            VR::SQ,
            Value::Sequence(DataSetSequence::new(vec![item], Length::UNDEFINED)),
        ));

        let mut originals = Vec::new();
        collect_uids(&obj, &mut originals);
        assert_eq!(originals, vec!["1.2.3".to_string(), "1.2.3".to_string()]);

        let table = UidRemapTable::from_originals(originals, &UidGenerator::new());
        let out = table.remap_object(obj);
        let new_uid = table.get("1.2.3").unwrap();
        assert_eq!(out.element_str(SOP_INSTANCE_UID).as_deref(), Some(new_uid));
        assert_eq!(
            out.element_str(SOP_CLASS_UID).as_deref(),
            Some("1.2.840.10008.5.1.4.1.1.2")
        );
        let nested = out.items_of(REFERENCED_STRUCTURE_SET_SEQUENCE);
        assert_eq!(
            nested[0].element_str(REFERENCED_SOP_INSTANCE_UID).as_deref(),
            Some(new_uid)
        );
    }
}
