//! The `portcullis inspect` subcommand.
//!
//! Displays stored attestations in human-readable form. Nothing is
//! verified; the output says what an attestation claims, not whether to
//! believe it.

use std::path::PathBuf;

use chrono::Utc;
use clap::Args;
use color_eyre::eyre::{Result, WrapErr};
use portcullis_attest::predicate::{VULN_PREDICATE_TYPE, VulnPredicate};
use portcullis_attest::{Attestation, VerificationMaterial};

/// Arguments for `portcullis inspect`.
#[derive(Args)]
pub struct InspectArgs {
    /// Attestation file: one attestation or a JSON array of them.
    pub attestations: PathBuf,

    /// Output decoded statements as JSON.
    #[arg(long)]
    pub json: bool,
}

fn read_attestations(text: &str) -> Result<Vec<Attestation>> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let attestations = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    Ok(attestations)
}

/// Execute the inspect command.
pub fn execute(args: &InspectArgs) -> Result<()> {
    let text = std::fs::read_to_string(&args.attestations)
        .wrap_err_with(|| format!("failed to read {}", args.attestations.display()))?;
    let attestations = read_attestations(&text)?;

    if args.json {
        let output: Vec<serde_json::Value> = attestations
            .iter()
            .map(|a| {
                serde_json::json!({
                    "digest": a.content_digest(),
                    "verification_material": a.verification_material,
                    "statement": a.dsse_envelope.extract_statement().ok(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{} attestation(s), UNVERIFIED", attestations.len());
    for attestation in &attestations {
        println!();
        println!("Attestation {}", attestation.content_digest());
        println!("  payload type: {}", attestation.dsse_envelope.payload_type);
        println!("  signatures:   {}", attestation.dsse_envelope.signatures.len());
        match &attestation.verification_material {
            VerificationMaterial::PublicKey { hint } => {
                println!("  signed with:  key ({})", hint.as_deref().unwrap_or("no hint"));
            }
            VerificationMaterial::Certificate { .. } => {
                println!("  signed with:  certificate chain (keyless)");
            }
        }

        let statement = match attestation.dsse_envelope.extract_statement() {
            Ok(statement) => statement,
            Err(e) => {
                println!("  statement:    unreadable ({e})");
                continue;
            }
        };
        println!("  predicate:    {}", statement.predicate_type);
        for subject in &statement.subject {
            let digest = subject.digest.sha256.as_deref().unwrap_or("-");
            println!("  subject:      {} sha256:{digest}", subject.name);
        }
        if statement.predicate_type == VULN_PREDICATE_TYPE {
            match VulnPredicate::from_value(&statement.predicate) {
                Ok(scan) => {
                    let age = scan.scan_age(Utc::now());
                    println!("  scanner:      {}", scan.scanner.uri);
                    println!(
                        "  scanned:      {} ({}h ago)",
                        scan.metadata.scan_finished_on.to_rfc3339(),
                        age.num_hours()
                    );
                }
                Err(e) => println!("  scan report:  malformed ({e})"),
            }
        }
    }

    Ok(())
}
