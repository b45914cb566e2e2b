// decision-gate-contract/src/main.rs
// ============================================================================
// Module: Contract CLI
// Description: CLI entrypoint for validating registry documents.
// Purpose: Let an operator check a registry overlay document before pointing
//          a running kernel at it.
// Dependencies: clap, decision-gate-contract
// ============================================================================

//! ## Overview
//! `decision-gate-contract validate` reads a registry document off disk and
//! runs it through the full schema-then-structural validation pipeline,
//! printing either a success line or every violation found.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clap::Subcommand;
use decision_gate_contract::ContractError;
use decision_gate_contract::validate_registry_document;

// ============================================================================
// SECTION: CLI Definition
// ============================================================================

/// Registry contract CLI arguments.
#[derive(Debug, Parser)]
#[command(name = "decision-gate-contract", about = "Validate Decision Gate registry documents.")]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Supported CLI subcommands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Validate a registry document against the canonical schema and
    /// structural rules.
    Validate {
        /// Path to the registry document (JSON).
        #[arg(long, value_name = "FILE")]
        registry: PathBuf,
    },
}

// ============================================================================
// SECTION: CLI Execution
// ============================================================================

/// CLI entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let mut stderr = std::io::stderr();
            let _ = writeln!(stderr, "{err}");
            ExitCode::FAILURE
        }
    }
}

/// Executes the CLI command.
fn run(cli: &Cli) -> Result<(), ContractError> {
    match &cli.command {
        Command::Validate { registry } => {
            let bytes = std::fs::read(registry)
                .map_err(|err| ContractError::Json(format!("failed to read {}: {err}", registry.display())))?;
            let validated = validate_registry_document(&bytes)?;
            let mut stdout = std::io::stdout();
            let _ = writeln!(
                stdout,
                "registry {} is valid ({} actions, {} tools)",
                validated.registry_id.as_str(),
                validated.actions.len(),
                validated.tools.len()
            );
            Ok(())
        }
    }
}
