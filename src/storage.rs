//
// storage.rs
// Dicom-Deid-rs
//
// Destination directory for pseudonymised files: up-front writability check and collision-free naming.
//
// Thales Matheus Mendonça Santos - October 2026

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::models::Modality;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("output directory {0} does not exist")]
    Missing(PathBuf),
    #[error("output path {0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("output directory {path} is not writable: {source}")]
    Unwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Throwaway file written once to confirm the directory accepts writes.
const WRITE_CHECK_NAME: &str = ".dicom-deid-write-check";

/// An existing, writable directory. Never created on the caller's behalf.
#[derive(Debug, Clone)]
pub struct OutputDirectory {
    root: PathBuf,
}

impl OutputDirectory {
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            return Err(StorageError::Missing(root));
        }
        if !root.is_dir() {
            return Err(StorageError::NotADirectory(root));
        }

        let marker = root.join(WRITE_CHECK_NAME);
        fs::write(&marker, b"").map_err(|source| StorageError::Unwritable {
            path: root.clone(),
            source,
        })?;
        discard(&marker);

        debug!("Output directory ready: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{Modality}_{uid}.dcm`, or `{uid}.dcm` when the modality is unknown.
    pub fn path_for(&self, modality: Option<&Modality>, uid: &str) -> PathBuf {
        self.root.join(file_name(modality, uid))
    }
}

/// Removes a scratch file; a failure is logged, never raised.
fn discard(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) => {
            warn!("Could not remove {}: {}", path.display(), e);
            false
        }
    }
}

pub fn file_name(modality: Option<&Modality>, uid: &str) -> String {
    let uid = sanitize_filename(uid);
    match modality.map(|m| sanitize_filename(m.as_str())) {
        Some(prefix) if !prefix.is_empty() => format!("{}_{}.dcm", prefix, uid),
        _ => format!("{}.dcm", uid),
    }
}

fn sanitize_filename(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(*c, '-' | '_' | '.'))
        .collect()
}
