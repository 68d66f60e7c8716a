//! Portcullis CLI: admission-time verification of signed scan attestations.
//!
//! Decide admission requests against a policy, validate policy files, and
//! inspect stored attestations.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

/// Portcullis: admit only images with fresh, trusted scan attestations.
///
/// Reads admission requests, fetches each image's attestations from a local
/// store, verifies their signatures against the policy's trust set, and
/// checks the attested predicates before allowing or denying.
#[derive(Parser)]
#[command(name = "portcullis", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (repeat for more detail: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output logs as JSON (for machine consumption).
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Decide admission requests against a policy.
    Admit(commands::admit::AdmitArgs),
    /// Validate a policy file and print its rules.
    CheckPolicy(commands::check_policy::CheckPolicyArgs),
    /// Display stored attestations without verifying them.
    Inspect(commands::inspect::InspectArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // Logs go to stderr so decisions on stdout stay machine-readable.
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Admit(args) => commands::admit::execute(args).await,
        Commands::CheckPolicy(args) => commands::check_policy::execute(&args),
        Commands::Inspect(args) => commands::inspect::execute(&args),
    }
}
