//! SCEP server - certificate enrollment over HTTP
//!
//! Serves a file-depot backed CA, either as a long-running HTTP listener or
//! as a one-shot gateway handler. The `ca` subcommand bootstraps the depot.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use scep_ca::{provision, CsrVerifier, ExecutableVerifier, FileDepot};

mod config;
mod logging;
mod service;
mod transport;

use config::{CaConfig, CaFlags, Environment, ProcessEnv, ServeConfig, ServeFlags};
use transport::launcher::{Mode, TransportLauncher};

/// Build-time version, handed to the composition root.
const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// CLI Definition
// ============================================================================

/// SCEP server - certificate enrollment service
#[derive(Parser)]
#[command(name = "scepserver", version, about, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    serve: ServeFlags,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the CA in the depot
    Ca(CaFlags),
}

#[tokio::main]
async fn main() -> ExitCode {
    // Missing .env is fine
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let env = ProcessEnv;

    let result = match cli.command {
        Some(Commands::Ca(flags)) => cmd_ca(&flags, &env),
        None => cmd_serve(&cli.serve, &env, VERSION).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            // Config errors can happen before logging is set up
            logging::init(false, false);
            tracing::error!(err = %format!("{:#}", e), "fatal");
            ExitCode::FAILURE
        }
    }
}

// ============================================================================
// CA Bootstrap
// ============================================================================

fn cmd_ca(flags: &CaFlags, env: &impl Environment) -> anyhow::Result<ExitCode> {
    let config = CaConfig::resolve(flags, env)?;
    logging::init(false, false);

    if config.init_ca.value {
        tracing::info!("Initializing new CA via main CLI");
    } else {
        tracing::info!("Initializing new CA");
    }
    bootstrap(&config)?;
    Ok(ExitCode::SUCCESS)
}

fn bootstrap(config: &CaConfig) -> anyhow::Result<()> {
    let depot = FileDepot::new(&config.depot.value);
    let strategy = config.inputs.strategy();
    tracing::info!(
        depot = %depot.root().display(),
        strategy = %strategy,
        "Provisioning CA"
    );
    provision(&depot, &config.inputs)
        .with_context(|| format!("failed to provision CA ({})", strategy))?;
    tracing::info!(depot = %depot.root().display(), "CA provisioned");
    Ok(())
}

// ============================================================================
// Server
// ============================================================================

async fn cmd_serve(
    flags: &ServeFlags,
    env: &impl Environment,
    version: &'static str,
) -> anyhow::Result<ExitCode> {
    let config = ServeConfig::resolve(flags, env)?;
    logging::init(config.debug.value, config.log_json.value);

    tracing::info!(version, "Starting scepserver");
    config.log_settings();

    let depot = FileDepot::new(&config.depot.value);
    log_depot_listing(&depot);

    if config.delete_ca.value {
        tracing::warn!(depot = %depot.root().display(), "Deleting CA depot");
        if let Err(e) = depot.wipe() {
            tracing::info!(err = %e, "attempted to remove depot");
        }
    }

    if config.init_ca.value && !depot.has_identity() {
        tracing::info!("Initializing new CA");
        let ca_config = CaConfig::for_serve(config.depot.value.clone(), &config.ca_pass.value, env)?;
        bootstrap(&ca_config)?;
    }

    let identity = Arc::new(
        depot
            .open(&config.ca_pass.value)
            .with_context(|| format!("failed to open CA depot {}", depot.root().display()))?,
    );
    tracing::info!(
        common_name = %identity.common_name().unwrap_or_default(),
        "CA loaded"
    );

    let verifier = match config.csr_verifier() {
        Some(program) => Some(load_verifier(&program)?),
        None => None,
    };

    let chain = service::signer_chain(
        identity.clone(),
        config.signer_options(),
        config.challenge.value.as_str(),
        verifier,
    );
    tracing::debug!(stages = ?chain.order(), "Signer chain");

    let service = service::compose(&identity, chain)?;
    let router = transport::http::router(Arc::new(service));

    let mode = if config.lambda.value {
        Mode::Gateway
    } else {
        Mode::Http(config.listen.value.clone())
    };

    let mut launcher = TransportLauncher::new(router, mode);
    let termination = launcher.run().await;

    if termination.is_failure() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn load_verifier(program: &Path) -> anyhow::Result<Arc<dyn CsrVerifier>> {
    let verifier = ExecutableVerifier::new(program)
        .with_context(|| format!("could not instantiate CSR verifier {}", program.display()))?;
    tracing::info!(program = %verifier.program().display(), "CSR verifier enabled");
    Ok(Arc::new(verifier))
}

fn log_depot_listing(depot: &FileDepot) {
    match depot.list() {
        Ok(entries) => {
            for entry in entries {
                tracing::info!(file = %entry.name, is_dir = entry.is_dir, "depot entry");
            }
        }
        Err(e) => tracing::info!(err = %e, "trying to list files"),
    }
}
