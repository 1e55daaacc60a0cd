//! Attribute/action value objects and the IDAT scrubbing they share.

use dicom::core::header::Header;
use dicom::core::value::{DataSetSequence, Value};
use dicom::core::{DataElement, Length, PrimitiveValue, Tag, VR};
use dicom::object::mem::InMemElement;
use dicom::object::InMemDicomObject;

/// Literal identifying strings (original Patient ID, Patient's Name) that must
/// not survive in any free-text value of the output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Idat {
    needles: Vec<String>,
}

impl Idat {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut needles: Vec<String> = values
            .into_iter()
            .map(|v| v.as_ref().trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        // longest first so "DOE^JOHN" goes before "DOE"
        needles.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        needles.dedup();
        Self { needles }
    }

    pub fn is_empty(&self) -> bool {
        self.needles.is_empty()
    }

    /// Returns the scrubbed text, or `None` when nothing matched.
    pub fn scrub(&self, text: &str) -> Option<String> {
        if !self.needles.iter().any(|n| text.contains(n.as_str())) {
            return None;
        }
        let mut out = text.to_string();
        for needle in &self.needles {
            out = out.replace(needle.as_str(), "");
        }
        Some(out)
    }
}

/// Free-text VRs where an identifying substring can hide.
fn is_text_vr(vr: VR) -> bool {
    matches!(
        vr,
        VR::LO | VR::LT | VR::PN | VR::SH | VR::ST | VR::UC | VR::UT
    )
}

fn scrub_primitive(value: PrimitiveValue, idat: &Idat) -> PrimitiveValue {
    match value {
        PrimitiveValue::Str(s) => match idat.scrub(&s) {
            Some(clean) => PrimitiveValue::Str(clean),
            None => PrimitiveValue::Str(s),
        },
        PrimitiveValue::Strs(values) => PrimitiveValue::Strs(
            values
                .into_iter()
                .map(|s| idat.scrub(&s).unwrap_or(s))
                .collect(),
        ),
        other => other,
    }
}

/// Strips IDAT from a text element; sequences are scrubbed item by item.
pub fn scrub_element(element: InMemElement, idat: &Idat) -> InMemElement {
    if idat.is_empty() {
        return element;
    }
    let tag = element.tag();
    let vr = element.vr();
    match element.into_value() {
        Value::Primitive(p) if is_text_vr(vr) => {
            DataElement::new(tag, vr, Value::Primitive(scrub_primitive(p, idat)))
        }
        Value::Sequence(seq) => {
            DataElement::new(tag, vr, Value::Sequence(scrub_sequence(seq, idat)))
        }
        other => DataElement::new(tag, vr, other),
    }
}

fn scrub_sequence(
    seq: DataSetSequence<InMemDicomObject>,
    idat: &Idat,
) -> DataSetSequence<InMemDicomObject> {
    let items: Vec<InMemDicomObject> = seq
        .into_items()
        .into_iter()
        .map(|item| scrub_object(item, idat))
        .collect();
    DataSetSequence::new(items, Length::UNDEFINED)
}

pub fn scrub_object(obj: InMemDicomObject, idat: &Idat) -> InMemDicomObject {
    InMemDicomObject::from_element_iter(obj.into_iter().map(|e| scrub_element(e, idat)))
}

/// What a bound attribute does to the element it claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Scalars pass through; kept sequences still lose any IDAT substring.
    Keep,
    /// IDAT substrings are stripped from scalars and sequences alike.
    Clean,
}

impl Action {
    pub fn perform_deident(self, element: InMemElement, idat: &Idat) -> InMemElement {
        match self {
            Action::Keep => {
                if element.vr() == VR::SQ {
                    scrub_element(element, idat)
                } else {
                    element
                }
            }
            Action::Clean => scrub_element(element, idat),
        }
    }
}

/// A DICOM attribute bound to the action a de-identification method takes on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute {
    pub name: &'static str,
    pub tag: Tag,
    pub vr: VR,
    pub vm: &'static str,
    pub action: Action,
}

impl Attribute {
    pub const fn keep(name: &'static str, tag: Tag, vr: VR, vm: &'static str) -> Self {
        Self {
            name,
            tag,
            vr,
            vm,
            action: Action::Keep,
        }
    }

    pub const fn clean(name: &'static str, tag: Tag, vr: VR, vm: &'static str) -> Self {
        Self {
            name,
            tag,
            vr,
            vm,
            action: Action::Clean,
        }
    }

    pub fn matches(&self, tag: Tag) -> bool {
        self.tag == tag
    }
}
