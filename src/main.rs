//
// main.rs
// Dicom-Deid-rs
//
// Installs the tracing subscriber and hands off execution to the CLI layer.
//
// Thales Matheus Mendonça Santos - October 2026

use dicom_deid::cli;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    cli::run()
}
