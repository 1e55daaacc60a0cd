//
// engine.rs
// Dicom-Deid-rs
//
// Anonymisation run: UID collection pass, parallel per-file rewrite (escrow, remap, private tags, policy,
// RT reference repair, new identity) and the run state machine around them.
//
// Thales Matheus Mendonça Santos - October 2026

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dicom::core::header::Header;
use dicom::core::value::{DataSetSequence, Value};
use dicom::core::{DataElement, Length, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::{FileDicomObject, FileMetaTableBuilder, InMemDicomObject};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::attribute::Idat;
use crate::cipher::IdentityCipher;
use crate::config::DeidentConfig;
use crate::dicom_access::{open_tolerant, ElementAccess};
use crate::escrow::{self, IdentityEscrow};
use crate::models::{FileDescriptor, Modality, Roi, RunReport};
use crate::policy::{MethodCode, Policy};
use crate::storage::{OutputDirectory, StorageError};
use crate::study::{Patient, RoiMapping, Series, Study};
use crate::tags::*;
use crate::uid::{UidGenerator, UidRemapTable};
use crate::validate::{check_selection, select_structure_set, RejectReason};

/// (Manufacturer, Manufacturer's Model Name) pairs whose private tags are needed
/// to decompress the pixel data or to interpret dose and plan objects.
pub const PRIVATE_TAG_ALLOW_LIST: &[(&str, &str)] = &[
    ("SIEMENS", "Biograph_mMR"),
    ("SIEMENS", "Biograph64_mCT"),
    ("Philips Medical Systems", "Ingenuity TF PET/MR"),
    ("GE MEDICAL SYSTEMS", "SIGNA PET/MR"),
    ("Varian Medical Systems", "ARIA RadOnc"),
    ("Varian Medical Systems", "Eclipse"),
    ("Elekta", "Monaco"),
    ("Accuray", "TomoTherapy Hi-Art"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Initialized,
    UidsCollected,
    Anonymising,
    Sealed,
    Done,
    Failed,
}

impl RunState {
    fn can_become(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Initialized, UidsCollected)
                | (UidsCollected, Anonymising)
                | (Anonymising, Sealed)
                | (Sealed, Done)
                | (Initialized | UidsCollected | Anonymising | Sealed, Failed)
        )
    }
}

#[derive(Debug, Error)]
pub enum AnonymiseError {
    #[error(transparent)]
    OutputDirectory(#[from] StorageError),
    #[error("selection rejected: {}", join_reasons(.0))]
    Selection(Vec<RejectReason>),
    #[error("{path}: {reason}")]
    File { path: PathBuf, reason: String },
    #[error("invalid run transition {from:?} -> {to:?}")]
    InvalidTransition { from: RunState, to: RunState },
}

fn join_reasons(reasons: &[RejectReason]) -> String {
    reasons
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn file_error(path: &Path, reason: impl fmt::Display) -> AnonymiseError {
    AnonymiseError::File {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// The subset of a scanned study handed to the engine.
#[derive(Debug, Clone)]
pub struct Selection {
    pub patient_id: String,
    pub study_instance_uid: String,
    pub series: Vec<Series>,
    pub roi_mapping: RoiMapping,
}

impl Selection {
    /// Every series of `study`, no ROI renames.
    pub fn from_study(patient: &Patient, study: &Study) -> Self {
        Self {
            patient_id: patient.patient_id.clone(),
            study_instance_uid: study.study_instance_uid.clone(),
            series: study.series.clone(),
            roi_mapping: RoiMapping::default(),
        }
    }

    pub fn with_roi_mapping(mut self, roi_mapping: RoiMapping) -> Self {
        self.roi_mapping = roi_mapping;
        self
    }

    /// Keeps only the listed series.
    pub fn retain_series(mut self, series_uids: &[&str]) -> Self {
        self.series
            .retain(|s| series_uids.contains(&s.series_instance_uid.as_str()));
        self
    }

    pub fn files(&self) -> impl Iterator<Item = &FileDescriptor> {
        self.series.iter().flat_map(|s| s.instances.iter())
    }

    /// ROIs of the selected structure set series.
    pub fn rois(&self) -> Vec<Roi> {
        self.series
            .iter()
            .filter(|s| s.is_modality(&Modality::RtStruct))
            .flat_map(|s| s.rois.iter().cloned())
            .collect()
    }
}

/// Caller-approved replacement identity.
#[derive(Debug, Clone, Default)]
pub struct NewIdentity {
    pub patient_id: String,
    /// Falls back to the configured replacement rule when absent.
    pub patient_name: Option<String>,
    pub study_description: Option<String>,
    /// Keyed by original Series Instance UID.
    pub series_descriptions: BTreeMap<String, String>,
}

impl NewIdentity {
    pub fn new(patient_id: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            ..Self::default()
        }
    }
}

/// Receives `(processed, total)` after each written file.
pub trait ProgressSink: Send + Sync {
    fn progress(&self, processed: usize, total: usize);

    fn log(&self, line: &str) {
        info!("{}", line);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn progress(&self, processed: usize, total: usize) {
        info!("Progress: {}/{}", processed, total);
    }
}

/// Cooperative cancellation flag, checked between files.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Done(RunReport),
    /// Source paths that were written versus never started.
    Cancelled {
        completed: Vec<PathBuf>,
        skipped: Vec<PathBuf>,
    },
}

enum FileResult {
    Written { source: PathBuf, output: PathBuf },
    Skipped(PathBuf),
    Failed(AnonymiseError),
}

/// Read-only state shared by every file of one run.
struct FileContext<'a> {
    config: &'a DeidentConfig,
    policy: &'a Policy,
    cipher: &'a dyn IdentityCipher,
    generator: &'a UidGenerator,
    table: &'a UidRemapTable,
    output: &'a OutputDirectory,
    identity: &'a NewIdentity,
    roi_mapping: &'a RoiMapping,
    new_study_uid: &'a str,
    new_structure_set_uid: Option<&'a str>,
    patient_name: String,
    method_codes: Vec<MethodCode>,
    method_description: String,
}

pub struct Anonymiser {
    config: DeidentConfig,
    policy: Policy,
    cipher: Arc<dyn IdentityCipher>,
    generator: UidGenerator,
    cancel: CancelToken,
    state: RunState,
}

impl fmt::Debug for Anonymiser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Anonymiser")
            .field("policy", &self.policy)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Anonymiser {
    pub fn new(config: DeidentConfig, cipher: Arc<dyn IdentityCipher>) -> Self {
        let policy = Policy::load(&config);
        Self {
            config,
            policy,
            cipher,
            generator: UidGenerator::new(),
            cancel: CancelToken::new(),
            state: RunState::Initialized,
        }
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    fn transition(&mut self, next: RunState) -> Result<(), AnonymiseError> {
        if !self.state.can_become(next) {
            return Err(AnonymiseError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!("Run state {:?} -> {:?}", self.state, next);
        self.state = next;
        Ok(())
    }

    fn fail(&mut self, err: AnonymiseError) -> AnonymiseError {
        error!("Anonymisation failed: {}", err);
        self.state = RunState::Failed;
        err
    }

    /// Runs the whole pipeline once. A second call on the same engine is an
    /// invalid transition.
    pub fn run(
        &mut self,
        selection: &Selection,
        identity: &NewIdentity,
        output_dir: &Path,
        progress: &dyn ProgressSink,
    ) -> Result<RunOutcome, AnonymiseError> {
        if self.state != RunState::Initialized {
            return Err(AnonymiseError::InvalidTransition {
                from: self.state,
                to: RunState::UidsCollected,
            });
        }
        let started_at = Utc::now();

        let output = match OutputDirectory::open(output_dir) {
            Ok(output) => output,
            Err(e) => return Err(self.fail(e.into())),
        };

        let series: Vec<&Series> = selection.series.iter().collect();
        let reasons = check_selection(&series, &self.config);
        if !reasons.is_empty() {
            return Err(self.fail(AnonymiseError::Selection(reasons)));
        }
        let structure_set_uid = match select_structure_set(&series, &self.config) {
            Ok(uid) => uid,
            Err(reason) => return Err(self.fail(AnonymiseError::Selection(vec![reason]))),
        };

        let files: Vec<&FileDescriptor> = selection.files().collect();
        info!(
            "Anonymising {} files of study {} into {}",
            files.len(),
            selection.study_instance_uid,
            output.root().display()
        );

        // Pass 1: the table must be total before any file is rewritten.
        let table = match UidRemapTable::collect(
            files.iter().map(|d| d.path.as_path()),
            &self.generator,
        ) {
            Ok(table) => table,
            Err(e) => return Err(self.fail(file_error(&e.path, &e.reason))),
        };
        self.transition(RunState::UidsCollected)?;

        let new_study_uid = table
            .get(&selection.study_instance_uid)
            .map(str::to_string)
            .unwrap_or_else(|| self.generator.generate());
        let new_structure_set_uid = structure_set_uid
            .as_deref()
            .and_then(|uid| table.get(uid))
            .map(str::to_string);

        self.transition(RunState::Anonymising)?;
        let ctx = FileContext {
            config: &self.config,
            policy: &self.policy,
            cipher: self.cipher.as_ref(),
            generator: &self.generator,
            table: &table,
            output: &output,
            identity,
            roi_mapping: &selection.roi_mapping,
            new_study_uid: &new_study_uid,
            new_structure_set_uid: new_structure_set_uid.as_deref(),
            patient_name: identity
                .patient_name
                .clone()
                .unwrap_or_else(|| self.config.patient_name_for(&identity.patient_id)),
            method_codes: self.policy.applied_method_codes(),
            method_description: self.policy.method_description(),
        };

        // Pass 2
        let total = files.len();
        let processed = AtomicUsize::new(0);
        let aborted = AtomicBool::new(false);
        let cancel = &self.cancel;
        let results: Vec<FileResult> = files
            .par_iter()
            .map(|descriptor| {
                if cancel.is_cancelled() || aborted.load(Ordering::SeqCst) {
                    return FileResult::Skipped(descriptor.path.clone());
                }
                match anonymise_file(&ctx, descriptor) {
                    Ok(output) => {
                        let n = processed.fetch_add(1, Ordering::SeqCst) + 1;
                        progress.progress(n, total);
                        FileResult::Written {
                            source: descriptor.path.clone(),
                            output,
                        }
                    }
                    Err(e) => {
                        aborted.store(true, Ordering::SeqCst);
                        FileResult::Failed(e)
                    }
                }
            })
            .collect();
        drop(ctx);

        let mut completed = Vec::new();
        let mut written = Vec::new();
        let mut skipped = Vec::new();
        let mut failures = Vec::new();
        for result in results {
            match result {
                FileResult::Written { source, output } => {
                    completed.push(source);
                    written.push(output);
                }
                FileResult::Skipped(source) => skipped.push(source),
                FileResult::Failed(e) => failures.push(e),
            }
        }

        if let Some(first) = failures.into_iter().next() {
            if !written.is_empty() {
                warn!(
                    "{} files were already written to {} and are left in place",
                    written.len(),
                    output.root().display()
                );
            }
            return Err(self.fail(first));
        }
        if !skipped.is_empty() {
            progress.log(&format!(
                "Run cancelled: {} files completed, {} skipped",
                completed.len(),
                skipped.len()
            ));
            self.state = RunState::Failed;
            return Ok(RunOutcome::Cancelled { completed, skipped });
        }

        self.transition(RunState::Sealed)?;
        written.sort();
        let report = RunReport {
            study_instance_uid: new_study_uid,
            written,
            method_codes: self
                .policy
                .applied_method_codes()
                .into_iter()
                .map(|c| c.value().to_string())
                .collect(),
            started_at,
            finished_at: Utc::now(),
        };
        self.transition(RunState::Done)?;
        progress.log(&format!(
            "Study anonymised as {} ({} files)",
            report.study_instance_uid,
            report.written.len()
        ));
        Ok(RunOutcome::Done(report))
    }
}

fn anonymise_file(ctx: &FileContext<'_>, descriptor: &FileDescriptor) -> Result<PathBuf, AnonymiseError> {
    let path = descriptor.path.as_path();
    let file = open_tolerant(path).map_err(|e| file_error(path, e))?;
    let transfer_syntax = file
        .meta()
        .transfer_syntax()
        .trim_end_matches('\0')
        .to_string();
    let mut obj = file.into_inner();

    // a. identifying literals
    let idat = Idat::new(
        [obj.element_str(PATIENT_ID), obj.element_str(PATIENT_NAME)]
            .into_iter()
            .flatten(),
    );

    // b. descriptions
    match &ctx.identity.study_description {
        Some(text) => put_str(&mut obj, STUDY_DESCRIPTION, VR::LO, text),
        None => {
            obj.remove_element(STUDY_DESCRIPTION);
        }
    }
    let series_text = descriptor
        .series_instance_uid
        .as_ref()
        .and_then(|uid| ctx.identity.series_descriptions.get(uid));
    match series_text {
        Some(text) => put_str(&mut obj, SERIES_DESCRIPTION, VR::LO, text),
        None => {
            obj.remove_element(SERIES_DESCRIPTION);
        }
    }

    // c. escrow of the untouched identity
    let original = IdentityEscrow::from_object(&obj);
    let sealed = escrow::seal(&original, ctx.cipher).map_err(|e| file_error(path, e))?;
    escrow::embed(&mut obj, sealed, &ctx.method_codes, &ctx.method_description);
    let temporal = if ctx.config.retain_full_dates {
        "UNMODIFIED"
    } else {
        "MODIFIED"
    };
    put_str(&mut obj, LONGITUDINAL_TEMPORAL_INFORMATION_MODIFIED, VR::CS, temporal);

    // d. UIDs
    let mut obj = ctx.table.remap_object(obj);
    let sop_instance_uid = match original.sop_instance_uid.as_deref() {
        Some(uid) => ctx.table.get(uid).map(str::to_string),
        None => None,
    }
    .ok_or_else(|| file_error(path, "no SOP Instance UID"))?;

    // e. private tags
    let manufacturer = obj.element_str(MANUFACTURER);
    let model = obj.element_str(MANUFACTURER_MODEL_NAME);
    if !private_tags_allowed(manufacturer.as_deref(), model.as_deref()) {
        obj = strip_private(obj);
    }

    // f. policy
    obj = ctx.policy.apply(obj, &idat);

    // g. ROI names
    let modality = descriptor.modality.as_ref();
    if modality == Some(&Modality::RtStruct) && !ctx.roi_mapping.is_empty() {
        obj = rewrite_items(obj, STRUCTURE_SET_ROI_SEQUENCE, |mut item| {
            rename_roi(&mut item, ctx.roi_mapping);
            item
        });
    }

    // h. single structure set for the whole study
    if let Some(new_rs) = ctx.new_structure_set_uid {
        if matches!(modality, Some(Modality::RtPlan | Modality::RtDose)) {
            obj = rewrite_items(obj, REFERENCED_STRUCTURE_SET_SEQUENCE, |mut item| {
                put_str(&mut item, REFERENCED_SOP_INSTANCE_UID, VR::UI, new_rs);
                item
            });
        }
    }

    // i. new identity
    put_str(&mut obj, PATIENT_ID, VR::LO, &ctx.identity.patient_id);
    put_str(&mut obj, PATIENT_NAME, VR::PN, &ctx.patient_name);
    put_str(&mut obj, STUDY_INSTANCE_UID, VR::UI, ctx.new_study_uid);

    // j. persist under a fresh name
    let sop_class_uid = obj
        .element_str(SOP_CLASS_UID)
        .or_else(|| descriptor.sop_class_uid.clone())
        .ok_or_else(|| file_error(path, "no SOP Class UID"))?;
    let meta = FileMetaTableBuilder::new()
        .transfer_syntax(transfer_syntax.as_str())
        .media_storage_sop_class_uid(sop_class_uid.as_str())
        .media_storage_sop_instance_uid(sop_instance_uid.as_str())
        .build()
        .map_err(|e| file_error(path, e))?;
    let mut file_obj = FileDicomObject::new_empty_with_dict_and_meta(StandardDataDictionary, meta);
    for elem in obj {
        file_obj.put(elem);
    }

    let target = ctx.output.path_for(modality, &ctx.generator.generate());
    file_obj
        .write_to_file(&target)
        .map_err(|e| file_error(path, e))?;
    debug!("{} -> {}", path.display(), target.display());
    Ok(target)
}

fn put_str(obj: &mut InMemDicomObject, tag: Tag, vr: VR, value: &str) {
    obj.put(DataElement::new(tag, vr, PrimitiveValue::from(value)));
}

pub fn private_tags_allowed(manufacturer: Option<&str>, model: Option<&str>) -> bool {
    let (Some(manufacturer), Some(model)) = (manufacturer, model) else {
        return false;
    };
    PRIVATE_TAG_ALLOW_LIST.iter().any(|(m, n)| {
        m.eq_ignore_ascii_case(manufacturer.trim()) && n.eq_ignore_ascii_case(model.trim())
    })
}

/// Drops odd-group elements at every depth.
pub fn strip_private(obj: InMemDicomObject) -> InMemDicomObject {
    InMemDicomObject::from_element_iter(obj.into_iter().filter(|e| !is_private(e.tag())).map(
        |elem| {
            let tag = elem.tag();
            let vr = elem.vr();
            match elem.into_value() {
                Value::Sequence(seq) => {
                    let items: Vec<InMemDicomObject> =
                        seq.into_items().into_iter().map(strip_private).collect();
                    DataElement::new(
                        tag,
                        vr,
                        Value::Sequence(DataSetSequence::new(items, Length::UNDEFINED)),
                    )
                }
                other => DataElement::new(tag, vr, other),
            }
        },
    ))
}

/// Applies `f` to every item of the top-level sequence at `tag`.
fn rewrite_items<F>(obj: InMemDicomObject, tag: Tag, f: F) -> InMemDicomObject
where
    F: Fn(InMemDicomObject) -> InMemDicomObject,
{
    InMemDicomObject::from_element_iter(obj.into_iter().map(|elem| {
        if elem.tag() != tag {
            return elem;
        }
        let vr = elem.vr();
        match elem.into_value() {
            Value::Sequence(seq) => {
                let items: Vec<InMemDicomObject> = seq.into_items().into_iter().map(&f).collect();
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

fn rename_roi(item: &mut InMemDicomObject, mapping: &RoiMapping) {
    let Some(number) = item.element_str(ROI_NUMBER).and_then(|n| n.parse::<i32>().ok()) else {
        return;
    };
    let current = item.element_str(ROI_NAME).unwrap_or_default();
    match mapping.resolve(number, &current) {
        Some(new_name) => put_str(item, ROI_NAME, VR::LO, new_name),
        None => debug!("ROI {} ({}) left unchanged", number, current),
    }
}
