//
// cli.rs
// Dicom-Deid-rs
//
// Defines the CLI surface with Clap and dispatches scan, anonymise, reidentify and keygen to the library.
//
// Thales Matheus Mendonça Santos - October 2026

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::{FileDicomObject, FileMetaTableBuilder};
use tracing::info;

use crate::cipher::AesGcmCipher;
use crate::config::DeidentConfig;
use crate::dicom_access::{open_tolerant, ElementAccess};
use crate::engine::{Anonymiser, LogProgress, NewIdentity, RunOutcome, Selection};
use crate::escrow;
use crate::scanner::{self, ScanReport};
use crate::study::RoiMapping;
use crate::tags::{SOP_CLASS_UID, SOP_INSTANCE_UID};
use crate::validate::{check_scan, check_selection};

#[derive(Parser)]
#[command(name = "dicom-deid")]
#[command(about = "Pseudonimização de estudos DICOM em Rust", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan a folder and report its patient/study/series tree and completeness
    Scan {
        directory: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Pseudonymise one study of a folder into an existing output directory
    Anonymise {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long)]
        patient_id: String,
        #[arg(long)]
        patient_name: Option<String>,
        /// Study Instance UID to export when the folder holds several
        #[arg(long)]
        study: Option<String>,
        /// Restrict the export to these Series Instance UIDs
        #[arg(long)]
        series: Vec<String>,
        #[arg(long)]
        study_description: Option<String>,
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Hex key file used to seal the original identity
        #[arg(short, long)]
        key: PathBuf,
        /// JSON object: ROI number -> { original_name, new_name }
        #[arg(long)]
        roi_mapping: Option<PathBuf>,
        /// JSON array of approved ROI names, used when auto_roi_match is set
        #[arg(long)]
        roi_vocabulary: Option<PathBuf>,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Restore the escrowed identity of a pseudonymised file
    Reidentify {
        file: PathBuf,
        #[arg(short, long)]
        key: PathBuf,
        /// Write the re-identified object here; otherwise only print the identity
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Generate a new 256-bit escrow key
    Keygen { path: PathBuf },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<DeidentConfig> {
    match path {
        Some(path) => Ok(DeidentConfig::load(path)?),
        None => Ok(DeidentConfig::default()),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("Falha ao ler {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("JSON inválido em {}", path.display()))
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { directory, config } => {
            let config = load_config(config.as_deref())?;
            let report = scanner::scan(&directory, &config.defaults)?;
            print_scan(&report, &config);
        }
        Commands::Anonymise {
            input,
            output,
            patient_id,
            patient_name,
            study,
            series,
            study_description,
            config,
            key,
            roi_mapping,
            roi_vocabulary,
            json,
        } => {
            let config = load_config(config.as_deref())?;
            let report = scanner::scan(&input, &config.defaults)?;
            let reasons = check_scan(&report, &config);
            let only_multi_study = reasons
                .iter()
                .all(|r| matches!(r, crate::validate::RejectReason::MultipleStudies));
            // several studies are fine when one is picked explicitly
            if !reasons.is_empty() && !(study.is_some() && only_multi_study) {
                for issue in report.errors() {
                    eprintln!("  {}", issue);
                }
                bail!(
                    "Importação recusada: {}",
                    reasons
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }

            let (patient, chosen) = match study.as_deref() {
                Some(uid) => report
                    .model
                    .find_study(uid)
                    .ok_or_else(|| anyhow!("Estudo {} não encontrado", uid))?,
                None => report
                    .model
                    .studies()
                    .next()
                    .ok_or_else(|| anyhow!("Nenhum estudo encontrado"))?,
            };
            let mut selection = Selection::from_study(patient, chosen);
            if !series.is_empty() {
                let wanted: Vec<&str> = series.iter().map(String::as_str).collect();
                selection = selection.retain_series(&wanted);
            }

            let mut mapping = match roi_mapping {
                Some(path) => read_json::<RoiMapping>(&path)?,
                None => RoiMapping::default(),
            };
            if mapping.is_empty() && config.auto_roi_match {
                if let Some(path) = roi_vocabulary {
                    let vocabulary: Vec<String> = read_json(&path)?;
                    mapping = RoiMapping::auto_match(&selection.rois(), &vocabulary);
                    info!("Auto-matched {} ROI names", mapping.len());
                }
            }
            let selection = selection.with_roi_mapping(mapping);

            let identity = NewIdentity {
                patient_name,
                study_description,
                ..NewIdentity::new(patient_id)
            };
            let cipher = AesGcmCipher::load(&key)?;
            let mut engine = Anonymiser::new(config, Arc::new(cipher));
            match engine.run(&selection, &identity, &output, &LogProgress)? {
                RunOutcome::Done(report) => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&report)?);
                    } else {
                        println!("StudyInstanceUID: {}", report.study_instance_uid);
                        println!("Arquivos gerados: {}", report.written.len());
                        println!("Métodos: {}", report.method_codes.join(", "));
                    }
                }
                RunOutcome::Cancelled { completed, skipped } => {
                    bail!(
                        "Execução cancelada: {} concluídos, {} ignorados",
                        completed.len(),
                        skipped.len()
                    );
                }
            }
        }
        Commands::Reidentify { file, key, output } => {
            let cipher = AesGcmCipher::load(&key)?;
            reidentify(&file, output.as_deref(), &cipher)?;
        }
        Commands::Keygen { path } => {
            if path.exists() {
                bail!("{} já existe; não será sobrescrito", path.display());
            }
            AesGcmCipher::write_key_file(&path, &AesGcmCipher::generate_key())?;
            println!("Chave gravada em {}", path.display());
        }
    }

    Ok(())
}

fn print_scan(report: &ScanReport, config: &DeidentConfig) {
    let model = &report.model;
    println!("{}", "=".repeat(80));
    for patient in model.patients() {
        println!("PATIENT {} ({})", patient.patient_id, patient.name);
        for study in &patient.studies {
            println!(
                "  STUDY {} {}",
                study.study_instance_uid,
                study.description.as_deref().unwrap_or("")
            );
            for series in &study.series {
                println!(
                    "    SERIES {} [{}] {} instances",
                    series.series_instance_uid,
                    series
                        .modality
                        .as_ref()
                        .map(|m| m.as_str())
                        .unwrap_or("N/A"),
                    series.instances.len()
                );
                for roi in &series.rois {
                    println!("      ROI {:>3}: {}", roi.number, roi.name);
                }
            }
        }
    }
    println!("{}", "=".repeat(80));
    println!("Study type: {}", model.determine_study_type());
    println!(
        "Frame of reference unique: {}",
        model.is_frame_of_reference_unique()
    );
    println!("Plans have all doses: {}", model.plans_have_all_doses());

    for issue in report.errors() {
        println!("  ! {}", issue);
    }
    let mut reasons = check_scan(report, config);
    let series: Vec<_> = model.all_series().collect();
    for reason in check_selection(&series, config) {
        if !reasons.contains(&reason) {
            reasons.push(reason);
        }
    }
    if reasons.is_empty() {
        println!("Ready for anonymisation");
    } else {
        for reason in reasons {
            println!("Rejected: {}", reason);
        }
    }
}

/// Decrypts the escrow of `input`, printing the identity and optionally
/// writing the restored object.
fn reidentify(input: &Path, output: Option<&Path>, cipher: &AesGcmCipher) -> anyhow::Result<()> {
    let file = open_tolerant(input).context("Falha ao abrir arquivo DICOM")?;
    let transfer_syntax = file.meta().transfer_syntax().trim_end_matches('\0').to_string();
    let mut obj = file.into_inner();
    let identity = escrow::unseal(&mut obj, cipher)?;
    println!("{}", serde_json::to_string_pretty(&identity)?);

    let Some(output) = output else {
        return Ok(());
    };
    let sop_class_uid = obj
        .element_str(SOP_CLASS_UID)
        .ok_or_else(|| anyhow!("SOP Class UID ausente"))?;
    let sop_instance_uid = obj
        .element_str(SOP_INSTANCE_UID)
        .ok_or_else(|| anyhow!("SOP Instance UID ausente"))?;
    let meta = FileMetaTableBuilder::new()
        .transfer_syntax(transfer_syntax.as_str())
        .media_storage_sop_class_uid(sop_class_uid.as_str())
        .media_storage_sop_instance_uid(sop_instance_uid.as_str())
        .build()?;
    let mut file_obj = FileDicomObject::new_empty_with_dict_and_meta(StandardDataDictionary, meta);
    for elem in obj {
        file_obj.put(elem);
    }
    file_obj
        .write_to_file(output)
        .context("Failed to write output file")?;
    println!("Re-identified copy written to {}", output.display());
    Ok(())
}
