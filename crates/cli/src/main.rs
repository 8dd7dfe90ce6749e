//! dualvision CLI
//!
//! Asks every configured vision model about a local image file and prints
//! the answers as one JSON object on stdout. Failures are printed as
//! `{"error": "..."}` with a non-zero exit code.

use anyhow::{bail, Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use core_pipeline::QueryRequest;
use llm_bridge::{AggregatedResult, ServiceConfig, VisionService};
use serde_json::{json, Value};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

const USAGE_ERROR: &str = "Invalid arguments. Usage: dualvision <image_path> <query>";

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\nbuilt: ",
    env!("DUALVISION_BUILT_AT"),
    "\ntarget: ",
    env!("DUALVISION_TARGET"),
    "\ncommit: ",
    env!("DUALVISION_COMMIT")
);

#[derive(Parser, Debug)]
#[command(name = "dualvision")]
#[command(about = "Ask two vision models about an image", long_about = None)]
#[command(version, long_version = LONG_VERSION)]
struct Cli {
    /// Image file to analyze
    image_path: PathBuf,

    /// Question about the image
    #[arg(allow_hyphen_values = true)]
    query: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    // Logs go to stderr, stdout carries only JSON
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            tracing::debug!("Argument parsing failed: {}", err);
            return emit_error(USAGE_ERROR);
        }
    };

    tracing::debug!(
        "dualvision {} ({} build, {})",
        built_info::PKG_VERSION,
        built_info::PROFILE,
        built_info::RUSTC_VERSION
    );

    match run(&cli).await {
        Ok(result) => match serde_json::to_string(&result) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(err) => {
                tracing::error!("Failed to serialize result: {}", err);
                emit_error("An unexpected error occurred")
            }
        },
        Err(err) => {
            tracing::error!("{:#}", err);
            emit_error(&err.to_string())
        }
    }
}

async fn run(cli: &Cli) -> Result<AggregatedResult> {
    let config = ServiceConfig::from_env()?;
    let service = VisionService::from_config(config).context("Failed to create HTTP client")?;

    let request = load_request(&cli.image_path, &cli.query).await?;
    Ok(service.answer(request).await?)
}

/// Read the image file and pair it with the query
async fn load_request(path: &Path, query: &str) -> Result<QueryRequest> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            bail!("Image file not found: {}", path.display())
        }
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to read image file {}", path.display()))
        }
    };
    tracing::debug!("Read {} bytes from {}", bytes.len(), path.display());

    Ok(QueryRequest::new(bytes, query)?)
}

fn error_json(message: &str) -> Value {
    json!({ "error": message })
}

fn emit_error(message: &str) -> ExitCode {
    println!("{}", error_json(message));
    ExitCode::FAILURE
}
