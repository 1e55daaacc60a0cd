use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

use crate::config::DeidentConfig;
use crate::models::{FileDescriptor, IssueKind, Modality};
use crate::scanner::ScanReport;
use crate::study::{frame_of_reference_unique, plans_have_all_doses, Series};

/// Why a scan or selection must not be anonymised. Surfaced before any file is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum RejectReason {
    #[error("multiple patients")]
    MultiplePatients,
    #[error("no study")]
    NoStudy,
    #[error("multiple studies")]
    MultipleStudies,
    #[error("frame of reference not unique")]
    FrameOfReferenceNotUnique,
    #[error("incomplete doses")]
    IncompleteDoses,
    #[error("multiple structure sets")]
    MultipleStructureSets,
    #[error("plan references no selected structure set")]
    MissingPlanReference,
    #[error("too many scan errors ({count} > {max})")]
    TooManyScanErrors { count: usize, max: usize },
    #[error("{0} files lack PatientID, StudyInstanceUID or SeriesInstanceUID")]
    DescriptorErrors(usize),
}

fn instances<'a>(series: &'a [&'a Series]) -> impl Iterator<Item = &'a FileDescriptor> + 'a {
    series.iter().flat_map(|s| s.instances.iter())
}

fn patient_and_study_reasons<'a, I>(descriptors: I, config: &DeidentConfig) -> Vec<RejectReason>
where
    I: IntoIterator<Item = &'a FileDescriptor>,
{
    let mut patients = BTreeSet::new();
    let mut studies = BTreeSet::new();
    for d in descriptors {
        if let Some(id) = d.patient_id.as_deref() {
            patients.insert(id);
        }
        if let Some(uid) = d.study_instance_uid.as_deref() {
            studies.insert(uid);
        }
    }

    let mut reasons = Vec::new();
    if patients.len() > 1 && !config.allow_multiple_patient_ids {
        reasons.push(RejectReason::MultiplePatients);
    }
    match studies.len() {
        0 => reasons.push(RejectReason::NoStudy),
        1 => {}
        _ => reasons.push(RejectReason::MultipleStudies),
    }
    reasons
}

/// Whole-scan gate evaluated right after the directory walk.
pub fn check_scan(report: &ScanReport, config: &DeidentConfig) -> Vec<RejectReason> {
    let mut reasons = Vec::new();
    if report.should_refuse(config.max_scan_errors) {
        reasons.push(RejectReason::TooManyScanErrors {
            count: report.error_count(),
            max: config.max_scan_errors,
        });
    }

    let incomplete: BTreeSet<_> = report
        .issues
        .iter()
        .filter(|i| matches!(i.kind, IssueKind::MissingAttribute(_)))
        .map(|i| &i.path)
        .collect();
    if !incomplete.is_empty() {
        reasons.push(RejectReason::DescriptorErrors(incomplete.len()));
    }

    reasons.extend(patient_and_study_reasons(report.model.descriptors(), config));
    reasons
}

/// The structure set every plan and dose of the selection will point at.
///
/// With several structure sets, `auto_roi_reference` lets the one the plans
/// reference win; otherwise the selection is ambiguous.
pub fn select_structure_set(
    series: &[&Series],
    config: &DeidentConfig,
) -> Result<Option<String>, RejectReason> {
    let structure_sets: BTreeSet<&str> = instances(series)
        .filter(|d| d.is_modality(&Modality::RtStruct))
        .filter_map(|d| d.sop_instance_uid.as_deref())
        .collect();

    match structure_sets.len() {
        0 => Ok(None),
        1 => Ok(structure_sets.into_iter().next().map(str::to_string)),
        _ if config.auto_roi_reference => {
            let referenced: BTreeSet<&str> = instances(series)
                .filter(|d| d.is_modality(&Modality::RtPlan))
                .filter_map(|d| d.referenced_structure_set_uid.as_deref())
                .filter(|uid| structure_sets.contains(uid))
                .collect();
            match referenced.len() {
                1 => Ok(referenced.into_iter().next().map(str::to_string)),
                0 => Err(RejectReason::MissingPlanReference),
                _ => Err(RejectReason::MultipleStructureSets),
            }
        }
        _ => Err(RejectReason::MultipleStructureSets),
    }
}

/// Completeness rules over the series chosen for export.
pub fn check_selection(series: &[&Series], config: &DeidentConfig) -> Vec<RejectReason> {
    let mut reasons = patient_and_study_reasons(instances(series), config);
    if !frame_of_reference_unique(series.iter().copied()) {
        reasons.push(RejectReason::FrameOfReferenceNotUnique);
    }
    if !plans_have_all_doses(series.iter().copied()) {
        reasons.push(RejectReason::IncompleteDoses);
    }
    if let Err(reason) = select_structure_set(series, config) {
        reasons.push(reason);
    }
    reasons
}
