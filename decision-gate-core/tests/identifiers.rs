// decision-gate-core/tests/identifiers.rs
// ============================================================================
// Module: Identifier Tests
// Description: Tests for kernel identifier wrappers.
// Purpose: Ensure IDs round-trip through serde and display correctly.
// Dependencies: decision-gate-core, serde_json
// ============================================================================
//! ## Overview
//! Validates that identifier wrappers preserve their underlying string values.

#![allow(
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
)]

use decision_gate_core::ActionId;
use decision_gate_core::ApprovalId;
use decision_gate_core::JobId;
use decision_gate_core::PolicyId;
use decision_gate_core::RunId;
use decision_gate_core::StepId;
use decision_gate_core::TaskId;
use decision_gate_core::TenantId;
use decision_gate_core::ToolId;

#[test]
fn identifier_round_trips_through_json() {
    let run_id = RunId::new("run_abc");
    let json = serde_json::to_string(&run_id).unwrap();
    assert_eq!(json, "\"run_abc\"");
    let parsed: RunId = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, run_id);
}

#[test]
fn identifier_displays_as_its_raw_string() {
    assert_eq!(TaskId::new("t1").to_string(), "t1");
    assert_eq!(TenantId::new("tenant-a").to_string(), "tenant-a");
}

#[test]
fn identifiers_compare_by_underlying_string() {
    assert_eq!(ActionId::new("email.send"), ActionId::new("email.send"));
    assert_ne!(ToolId::new("email"), ToolId::new("sms"));
}

#[test]
fn approval_id_is_deterministic_from_run_id() {
    let run_id = RunId::new("run_42");
    let approval_id = decision_gate_core::Approval::id_for_run(&run_id);
    assert_eq!(approval_id, ApprovalId::new("apr_run_42"));
}

#[test]
fn distinct_identifier_types_do_not_implicitly_convert() {
    let step_id = StepId::new("s1");
    let job_id = JobId::new("s1");
    assert_eq!(step_id.as_str(), job_id.as_str());
    let policy_id: PolicyId = "deny-all".into();
    assert_eq!(policy_id.as_str(), "deny-all");
}
