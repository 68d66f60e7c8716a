//! The `portcullis check-policy` subcommand.

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::Result;
use portcullis_verify::{FailurePolicy, ValidationAction, load_policy};

/// Arguments for `portcullis check-policy`.
#[derive(Args)]
pub struct CheckPolicyArgs {
    /// Policy file (.toml or .json).
    pub policy: PathBuf,
}

/// Execute the check-policy command.
pub fn execute(args: &CheckPolicyArgs) -> Result<()> {
    let policy = load_policy(&args.policy)?;

    let action = match policy.action() {
        ValidationAction::Enforce => "enforce",
        ValidationAction::Audit => "audit",
    };
    let on_timeout = match policy.failure_policy() {
        FailurePolicy::Fail => "fail (deny)",
        FailurePolicy::Ignore => "ignore (allow)",
    };

    println!("Policy `{}` is valid", policy.name());
    println!("  action:       {action}");
    println!("  on timeout:   {on_timeout} after {}s", policy.timeout().as_secs());
    println!("  require match: {}", policy.require_match());

    for rule in policy.rules() {
        println!();
        println!("Rule `{}`", rule.name());
        println!("  images: {}", rule.patterns().join(", "));
        for key in rule.trust().keys() {
            println!("  trusts key `{}`", key.name);
        }
        for identity in rule.trust().identities() {
            println!("  trusts {} (issuer {})", identity.subject, identity.issuer);
        }
        for required in rule.attestations() {
            println!(
                "  requires {} ({} condition(s))",
                required.predicate_type,
                required.conditions.len()
            );
            for condition in &required.conditions {
                println!(
                    "    {} {:?} {}",
                    condition.key, condition.operator, condition.value
                );
            }
        }
    }

    Ok(())
}
