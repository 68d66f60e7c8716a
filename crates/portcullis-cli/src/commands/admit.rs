//! The `portcullis admit` subcommand.
//!
//! Decides admission requests read from files (or stdin) against a policy
//! and an on-disk attestation store.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::Args;
use color_eyre::eyre::{Result, WrapErr};
use portcullis_admission::{AdmissionEngine, AdmissionRequest, FileStore};
use portcullis_verify::load_policy;

/// Arguments for `portcullis admit`.
#[derive(Args)]
pub struct AdmitArgs {
    /// Request files (bare requests or `AdmissionReview`s). Reads stdin when
    /// none are given or for `-`.
    pub requests: Vec<PathBuf>,

    /// Policy file (.toml or .json).
    #[arg(long, value_name = "PATH")]
    pub policy: PathBuf,

    /// Attestation store directory.
    #[arg(long, value_name = "DIR")]
    pub store: PathBuf,

    /// Print `AdmissionReview` responses as JSON.
    #[arg(long)]
    pub json: bool,
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .wrap_err("failed to read requests from stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).wrap_err_with(|| format!("failed to read {}", path.display()))
}

/// Execute the admit command.
pub async fn execute(args: AdmitArgs) -> Result<()> {
    let policy = load_policy(&args.policy)?;
    tracing::info!(
        policy = policy.name(),
        rules = policy.rules().len(),
        store = %args.store.display(),
        "policy loaded"
    );

    let inputs = if args.requests.is_empty() {
        vec![PathBuf::from("-")]
    } else {
        args.requests
    };
    let mut requests = Vec::new();
    for input in &inputs {
        let text = read_input(input)?;
        let parsed = AdmissionRequest::from_json_many(&text)
            .wrap_err_with(|| format!("invalid request in {}", input.display()))?;
        requests.extend(parsed);
    }

    let engine = Arc::new(AdmissionEngine::new(FileStore::new(&args.store), policy));
    let decisions = engine.decide_all(requests).await;

    if args.json {
        let reviews: Vec<serde_json::Value> =
            decisions.iter().map(|d| d.to_admission_review()).collect();
        let output = if reviews.len() == 1 {
            reviews.into_iter().next().unwrap_or_default()
        } else {
            serde_json::Value::Array(reviews)
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for decision in &decisions {
            println!("{decision}");
            for warning in &decision.warnings {
                println!("  warning: {warning}");
            }
        }
    }

    if decisions.iter().any(|d| !d.allowed) {
        process::exit(1);
    }

    Ok(())
}
