//
// config.rs
// Dicom-Deid-rs
//
// User-configurable de-identification flags, read once from JSON and consumed when the policy is built.
//
// Thales Matheus Mendonça Santos - October 2026

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// What ends up in Patient's Name of the pseudonymised study.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PatientNameReplacement {
    /// Reuse the new pseudonymous patient id.
    #[default]
    Pseudonym,
    Constant(String),
}

/// Values substituted when a scanned file lacks the attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanDefaults {
    pub patient_name: String,
    pub patient_birth_date: String,
    pub patient_sex: String,
}

impl Default for ScanDefaults {
    fn default() -> Self {
        Self {
            patient_name: "anonymous".to_string(),
            patient_birth_date: "19000101".to_string(),
            patient_sex: "O".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeidentConfig {
    pub replace_patient_name_with: PatientNameReplacement,
    pub retain_full_dates: bool,
    pub retain_patient_characteristics: bool,
    pub retain_device_identity: bool,
    pub clean_descriptors: bool,
    pub allow_multiple_patient_ids: bool,
    pub auto_roi_match: bool,
    pub auto_roi_reference: bool,
    /// Above this many scan issues the import is refused as a whole.
    pub max_scan_errors: usize,
    pub defaults: ScanDefaults,
}

impl Default for DeidentConfig {
    fn default() -> Self {
        Self {
            replace_patient_name_with: PatientNameReplacement::default(),
            retain_full_dates: false,
            retain_patient_characteristics: false,
            retain_device_identity: false,
            clean_descriptors: false,
            allow_multiple_patient_ids: false,
            auto_roi_match: false,
            auto_roi_reference: false,
            max_scan_errors: 10,
            defaults: ScanDefaults::default(),
        }
    }
}

impl DeidentConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Patient's Name written to the output given the new pseudonymous id.
    pub fn patient_name_for(&self, new_patient_id: &str) -> String {
        match &self.replace_patient_name_with {
            PatientNameReplacement::Pseudonym => new_patient_id.to_string(),
            PatientNameReplacement::Constant(name) => name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: DeidentConfig = serde_json::from_str(
            r#"{ "retain_full_dates": true, "replace_patient_name_with": { "constant": "TRIAL" } }"#,
        )
        .expect("parse");
        assert!(config.retain_full_dates);
        assert!(!config.retain_device_identity);
        assert_eq!(config.max_scan_errors, 10);
        assert_eq!(config.defaults.patient_sex, "O");
        assert_eq!(config.patient_name_for("RPB-001"), "TRIAL");
    }

    #[test]
    fn pseudonym_name_reuses_patient_id() {
        let config = DeidentConfig::default();
        assert_eq!(config.patient_name_for("RPB-001"), "RPB-001");
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let path = dir.path().join("deid.json");
        fs::write(&path, "{ not json").expect("write");
        let err = DeidentConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("deid.json"));
    }
}
