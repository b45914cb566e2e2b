#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        clippy::dbg_macro,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only output and panic-based assertions are permitted."
    )
)]
// decision-gate-cli/src/main.rs
// ============================================================================
// Module: Decision Gate CLI Entry Point
// Description: Command dispatcher for submitting, tailing, approving, and
//              verifying tasks run through the decision gate kernel.
// Purpose: Give an operator a thin, local way to drive the flow engine
//          without standing up the planner/transport layers it otherwise
//          lives behind.
// Dependencies: clap, decision-gate-cli, decision-gate-config, decision-gate-core
// ============================================================================

//! ## Overview
//! `decision-gate` has three subcommands: `submit` creates and advances a
//! task in one process invocation, `tail` prints a run's recorded events,
//! and `verify` checks the HMAC hash chain for a run. `approve` records a
//! human decision against a pending approval and resumes the run. All four
//! operate against a [`KernelConfig`] loaded once at startup.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use decision_gate_cli::kernel::Kernel;
use decision_gate_cli::kernel::load_registry;
use decision_gate_config::KernelConfig;
use decision_gate_core::ApprovalDecision;
use decision_gate_core::ApprovalVerdict;
use decision_gate_core::RunId;
use decision_gate_core::Task;
use decision_gate_core::TaskId;
use decision_gate_core::TenantId;
use decision_gate_core::Timestamp;
use decision_gate_core::core::identifiers::ApprovalId;
use thiserror::Error;
use time::OffsetDateTime;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(
    name = "decision-gate",
    disable_help_subcommand = true,
    disable_version_flag = true,
    arg_required_else_help = true
)]
struct Cli {
    /// Print version information and exit.
    #[arg(long = "version", action = ArgAction::SetTrue, global = true)]
    show_version: bool,
    /// Path to `decision-gate.toml` (see `decision_gate_config::DEFAULT_CONFIG_NAME`).
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit a task and advance it once.
    Submit(SubmitCommand),
    /// Print recorded events for a run.
    Tail(TailCommand),
    /// Record an approval decision and resume the run.
    Approve(ApproveCommand),
    /// Verify a run's HMAC hash chain.
    Verify(VerifyCommand),
}

/// Arguments for the `submit` command.
#[derive(Args, Debug)]
struct SubmitCommand {
    /// Caller-supplied task id; uniquely identifies the resulting run.
    #[arg(long)]
    task_id: String,
    /// Tenant the task is submitted under.
    #[arg(long)]
    tenant_id: String,
    /// Natural-language task description.
    #[arg(long)]
    message: String,
    /// Submitting user id, if any.
    #[arg(long)]
    user_id: Option<String>,
    /// Submitting organization id, if any.
    #[arg(long)]
    org_id: Option<String>,
    /// Roles asserted for the submitting principal, comma-separated.
    #[arg(long, value_delimiter = ',')]
    roles: Vec<String>,
    /// Task metadata as a JSON object, merged verbatim into `task.metadata`.
    #[arg(long)]
    metadata: Option<String>,
}

/// Arguments for the `tail` command.
#[derive(Args, Debug)]
struct TailCommand {
    /// Run id to tail.
    #[arg(long)]
    run_id: String,
    /// Only print events with `seq` greater than this value.
    #[arg(long, default_value_t = 0)]
    since_seq: u64,
}

/// Arguments for the `approve` command.
#[derive(Args, Debug)]
struct ApproveCommand {
    /// Run id the approval belongs to.
    #[arg(long)]
    run_id: String,
    /// Whether to approve (default) or deny the pending request.
    #[arg(long, action = ArgAction::SetTrue)]
    deny: bool,
    /// Identity of the human recording the decision.
    #[arg(long)]
    by: String,
    /// Optional reason recorded alongside the decision.
    #[arg(long)]
    reason: Option<String>,
}

/// Arguments for the `verify` command.
#[derive(Args, Debug)]
struct VerifyCommand {
    /// Run id to verify.
    #[arg(long)]
    run_id: String,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper.
#[derive(Debug, Error)]
#[error("{0}")]
struct CliError(String);

impl CliError {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Executes the CLI command dispatcher.
fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();

    if cli.show_version {
        println!("decision-gate {}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::SUCCESS);
    }

    let config =
        KernelConfig::load(cli.config.as_deref()).map_err(|err| CliError::new(format!("config load failed: {err}")))?;

    match cli.command {
        Commands::Submit(command) => command_submit(&config, &command),
        Commands::Tail(command) => command_tail(&config, &command),
        Commands::Approve(command) => command_approve(&config, &command),
        Commands::Verify(command) => command_verify(&config, &command),
    }
}

// ============================================================================
// SECTION: Submit
// ============================================================================

/// Executes the `submit` command: submits a task and advances it once.
fn command_submit(config: &KernelConfig, command: &SubmitCommand) -> CliResult<ExitCode> {
    let kernel = Kernel::build(config).map_err(|err| CliError::new(err.to_string()))?;
    let registry = load_registry(&config.registry_path).map_err(|err| CliError::new(err.to_string()))?;

    let metadata = match &command.metadata {
        Some(raw) => parse_metadata(raw)?,
        None => BTreeMap::new(),
    };
    let task = Task {
        task_id: TaskId::new(command.task_id.clone()),
        tenant_id: TenantId::new(command.tenant_id.clone()),
        user_message: command.message.clone(),
        user_id: command.user_id.clone().map(decision_gate_core::UserId::new),
        org_id: command.org_id.clone().map(decision_gate_core::OrgId::new),
        roles: command.roles.clone(),
        metadata,
    };

    let run =
        kernel.submit_and_advance(task, &registry, now()).map_err(|err| CliError::new(format!("submit failed: {err}")))?;

    println!("run_id={} state={:?}", run.run_id, run.state);
    Ok(ExitCode::SUCCESS)
}

/// Parses `--metadata` as a JSON object.
fn parse_metadata(raw: &str) -> CliResult<BTreeMap<String, serde_json::Value>> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|err| CliError::new(format!("--metadata is not valid json: {err}")))?;
    match value {
        serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Err(CliError::new("--metadata must be a json object")),
    }
}

// ============================================================================
// SECTION: Tail
// ============================================================================

/// Executes the `tail` command: prints every event recorded since `since_seq`.
fn command_tail(config: &KernelConfig, command: &TailCommand) -> CliResult<ExitCode> {
    let kernel = Kernel::build(config).map_err(|err| CliError::new(err.to_string()))?;
    let run_id = RunId::new(command.run_id.clone());
    let records = kernel.tail(&run_id, command.since_seq).map_err(|err| CliError::new(err.to_string()))?;
    for record in &records {
        let line = serde_jcs::to_string(&record).map_err(|err| CliError::new(format!("event serialization failed: {err}")))?;
        println!("{line}");
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Approve
// ============================================================================

/// Executes the `approve` command: records a decision and resumes the run.
fn command_approve(config: &KernelConfig, command: &ApproveCommand) -> CliResult<ExitCode> {
    let kernel = Kernel::build(config).map_err(|err| CliError::new(err.to_string()))?;
    let registry = load_registry(&config.registry_path).map_err(|err| CliError::new(err.to_string()))?;
    let run_id = RunId::new(command.run_id.clone());
    let approval_id = ApprovalId::new(format!("apr_{}", run_id.as_str()));
    let decision = ApprovalDecision {
        decision: if command.deny { ApprovalVerdict::Denied } else { ApprovalVerdict::Approved },
        by: command.by.clone(),
        ts: now(),
        reason: command.reason.clone(),
    };

    let run = kernel
        .decide_and_advance(&approval_id, &run_id, &registry, decision, now())
        .map_err(|err| CliError::new(format!("approve failed: {err}")))?;

    println!("run_id={} state={:?}", run.run_id, run.state);
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Verify
// ============================================================================

/// Executes the `verify` command: checks a run's hash chain end-to-end.
fn command_verify(config: &KernelConfig, command: &VerifyCommand) -> CliResult<ExitCode> {
    let kernel = Kernel::build(config).map_err(|err| CliError::new(err.to_string()))?;
    let run_id = RunId::new(command.run_id.clone());
    match kernel.verify_chain(&run_id) {
        Ok(()) => {
            println!("ok: chain verified for {run_id}");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            println!("fail: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}

// ============================================================================
// SECTION: Time
// ============================================================================

/// Returns the current wall-clock timestamp, truncated to whole seconds.
fn now() -> Timestamp {
    Timestamp::from_offset(OffsetDateTime::now_utc())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions are permitted."
)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_submit_with_roles_and_metadata() {
        let cli = Cli::parse_from([
            "decision-gate",
            "submit",
            "--task-id",
            "task_1",
            "--tenant-id",
            "tenant_a",
            "--message",
            "refund please",
            "--roles",
            "member,support",
            "--metadata",
            r#"{"customer_id":"cust_1"}"#,
        ]);
        let Commands::Submit(command) = cli.command else {
            panic!("expected submit command");
        };
        assert_eq!(command.roles, vec!["member".to_string(), "support".to_string()]);
        assert_eq!(command.metadata.as_deref(), Some(r#"{"customer_id":"cust_1"}"#));
    }

    #[test]
    fn metadata_must_be_a_json_object() {
        let err = parse_metadata("[1,2,3]").unwrap_err();
        assert!(err.to_string().contains("json object"));
    }
}
