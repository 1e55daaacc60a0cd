//
// models.rs
// Dicom-Deid-rs
//
// Defines serializable data structures for per-file descriptors, ROI tables, scan issues and run reports.
//
// Thales Matheus Mendonça Santos - October 2026

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Modalities the completeness rules care about; everything else is carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Modality {
    Ct,
    Mr,
    Pt,
    Us,
    St,
    Nm,
    RtStruct,
    RtPlan,
    RtDose,
    RtImage,
    Other(String),
}

impl Modality {
    pub fn as_str(&self) -> &str {
        match self {
            Modality::Ct => "CT",
            Modality::Mr => "MR",
            Modality::Pt => "PT",
            Modality::Us => "US",
            Modality::St => "ST",
            Modality::Nm => "NM",
            Modality::RtStruct => "RTSTRUCT",
            Modality::RtPlan => "RTPLAN",
            Modality::RtDose => "RTDOSE",
            Modality::RtImage => "RTIMAGE",
            Modality::Other(code) => code,
        }
    }

    /// Modalities whose frame of reference must agree across the study.
    pub fn shares_frame_of_reference(&self) -> bool {
        matches!(
            self,
            Modality::Ct | Modality::RtStruct | Modality::RtPlan | Modality::RtDose
        )
    }
}

impl FromStr for Modality {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "CT" => Modality::Ct,
            "MR" => Modality::Mr,
            "PT" => Modality::Pt,
            "US" => Modality::Us,
            "ST" => Modality::St,
            "NM" => Modality::Nm,
            "RTSTRUCT" => Modality::RtStruct,
            "RTPLAN" => Modality::RtPlan,
            "RTDOSE" => Modality::RtDose,
            "RTIMAGE" => Modality::RtImage,
            other => Modality::Other(other.to_string()),
        })
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One region of interest declared by a structure set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub number: i32,
    pub name: String,
    pub observation_label: Option<String>,
    pub interpreted_type: Option<String>,
}

/// Lightweight per-file record built by the scanner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub patient_id: Option<String>,
    pub study_instance_uid: Option<String>,
    pub series_instance_uid: Option<String>,
    pub sop_instance_uid: Option<String>,
    pub sop_class_uid: Option<String>,
    pub modality: Option<Modality>,
    pub patient_name: String,
    pub patient_birth_date: String,
    pub patient_sex: String,
    pub study_description: Option<String>,
    pub series_description: Option<String>,
    pub instance_number: Option<i32>,
    pub frame_of_reference_uid: Option<String>,
    pub manufacturer: Option<String>,
    pub manufacturer_model_name: Option<String>,
    /// RTPLAN/RTDOSE: SOP Instance UID found under Referenced Structure Set Sequence.
    pub referenced_structure_set_uid: Option<String>,
    /// RTDOSE: SOP Instance UID found under Referenced RT Plan Sequence.
    pub referenced_plan_uid: Option<String>,
    pub dose_summation_type: Option<String>,
    pub beam_count: Option<usize>,
    pub rois: Vec<Roi>,
}

impl FileDescriptor {
    pub fn is_modality(&self, modality: &Modality) -> bool {
        self.modality.as_ref() == Some(modality)
    }
}

/// Problems recorded while scanning; none of them abort the scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueKind {
    Unreadable(String),
    MissingAttribute(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanIssue {
    pub path: PathBuf,
    pub kind: IssueKind,
}

impl fmt::Display for ScanIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            IssueKind::Unreadable(reason) => {
                write!(f, "{}: not readable as DICOM ({reason})", self.path.display())
            }
            IssueKind::MissingAttribute(name) => {
                write!(f, "{}: missing {name}", self.path.display())
            }
        }
    }
}

/// Summary handed back to the caller after a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub study_instance_uid: String,
    pub written: Vec<PathBuf>,
    pub method_codes: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
