//
// lib.rs
// Dicom-Deid-rs
//
// Exposes the crate's modules and re-exports the types most callers need to scan, validate and anonymise a study.
//
// Thales Matheus Mendonça Santos - October 2026

pub mod attribute;
pub mod cipher;
pub mod cli;
pub mod config;
pub mod dicom_access;
pub mod engine;
pub mod escrow;
pub mod metadata;
pub mod models;
pub mod policy;
pub mod scanner;
pub mod storage;
pub mod study;
pub mod tags;
pub mod uid;
pub mod validate;

pub use cipher::{AesGcmCipher, IdentityCipher};
pub use cli::{run as run_cli, Cli, Commands};
pub use config::DeidentConfig;
pub use engine::{Anonymiser, CancelToken, NewIdentity, RunOutcome, RunState, Selection};
pub use policy::Policy;
pub use scanner::{scan, ScanReport};
pub use study::{StudyModel, StudyType};
