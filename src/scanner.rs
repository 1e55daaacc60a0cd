use std::path::{Path, PathBuf};

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::ScanDefaults;
use crate::metadata::read_descriptor;
use crate::models::{FileDescriptor, IssueKind, ScanIssue};
use crate::study::StudyModel;

/// File names that are never DICOM objects.
const IGNORED_NAMES: &[&str] = &["DICOMDIR", "LOCKFILE", "VERSION", "Thumbs.db", ".DS_Store"];
/// Extensions of catalogue, log and vendor session files.
const IGNORED_EXTENSIONS: &[&str] = &["txt", "log", "xml", "ini", "json", "key", "htm", "html"];

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan root {0} does not exist")]
    Missing(PathBuf),
    #[error("scan root {0} is not a directory")]
    NotADirectory(PathBuf),
}

#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub model: StudyModel,
    pub issues: Vec<ScanIssue>,
}

impl ScanReport {
    pub fn error_count(&self) -> usize {
        self.issues.len()
    }

    /// Too many issues to review one by one; the import should be refused outright.
    pub fn should_refuse(&self, max_scan_errors: usize) -> bool {
        self.error_count() > max_scan_errors
    }

    pub fn errors(&self) -> Vec<String> {
        self.issues.iter().map(ToString::to_string).collect()
    }
}

fn is_ignored(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    if IGNORED_NAMES.iter().any(|n| n.eq_ignore_ascii_case(name)) {
        return true;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| IGNORED_EXTENSIONS.iter().any(|i| i.eq_ignore_ascii_case(ext)))
}

/// Candidate files under `root`, sorted by path, plus the entries the walk could not read.
///
/// Symbolic links are followed, so a dangling link surfaces as an issue.
pub fn list_candidates(root: &Path) -> (Vec<PathBuf>, Vec<ScanIssue>) {
    let mut files = Vec::new();
    let mut issues = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file() && !is_ignored(entry.path()) {
                    files.push(entry.into_path());
                }
            }
            Err(err) => {
                let path = err.path().unwrap_or(root).to_path_buf();
                warn!("Cannot walk {}: {}", path.display(), err);
                issues.push(ScanIssue {
                    path,
                    kind: IssueKind::Unreadable(err.to_string()),
                });
            }
        }
    }
    files.sort();
    issues.sort_by(|a, b| a.path.cmp(&b.path));
    (files, issues)
}

/// Parses every candidate file in parallel and builds the study model.
pub fn scan(root: &Path, defaults: &ScanDefaults) -> Result<ScanReport, ScanError> {
    if !root.exists() {
        return Err(ScanError::Missing(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }

    let (files, mut issues) = list_candidates(root);
    info!("Scanning {} files under {}", files.len(), root.display());

    let results: Vec<(PathBuf, Result<(FileDescriptor, Vec<IssueKind>), String>)> = files
        .par_iter()
        .map(|path| {
            let res = read_descriptor(path, defaults).map_err(|e| e.to_string());
            (path.clone(), res)
        })
        .collect();

    let mut descriptors = Vec::with_capacity(results.len());
    for (path, res) in results {
        match res {
            Ok((descriptor, kinds)) => {
                for kind in kinds {
                    warn!("{}", ScanIssue { path: path.clone(), kind: kind.clone() });
                    issues.push(ScanIssue {
                        path: path.clone(),
                        kind,
                    });
                }
                descriptors.push(descriptor);
            }
            Err(reason) => {
                debug!("Skipping {}: {}", path.display(), reason);
                issues.push(ScanIssue {
                    path,
                    kind: IssueKind::Unreadable(reason),
                });
            }
        }
    }

    let model = StudyModel::build(descriptors);
    info!(
        "Scan finished: {} patients, {} issues",
        model.patients().len(),
        issues.len()
    );
    Ok(ScanReport { model, issues })
}
