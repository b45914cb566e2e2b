// system-tests/tests/seed_scenarios.rs
// ============================================================================
// Module: Seed Scenario Conformance Tests
// Description: The six named seed scenarios, each run against both the
//              in-memory and the SQLite storage profiles with identical
//              assertions, proving the two profiles behaviorally equivalent.
// Purpose: End-to-end coverage of the flow engine's staged pipeline that
//          `decision-gate-core`'s own unit tests, working against minimal
//          single-action fixtures, do not attempt.
// Dependencies: system-tests, decision-gate-core, decision-gate-store-sqlite
// ============================================================================

use std::sync::Arc;

use decision_gate_core::ApprovalDecision;
use decision_gate_core::ApprovalStore;
use decision_gate_core::ApprovalVerdict;
use decision_gate_core::EventBody;
use decision_gate_core::EventLog;
use decision_gate_core::FlowEngine;
use decision_gate_core::FlowEngineError;
use decision_gate_core::Registry;
use decision_gate_core::Run;
use decision_gate_core::RunState;
use decision_gate_core::Task;
use decision_gate_core::interfaces::BillingLedger;
use decision_gate_core::interfaces::BudgetStore;
use decision_gate_core::interfaces::JobQueue;
use decision_gate_core::interfaces::Projections;
use decision_gate_core::interfaces::QuotaStore;
use decision_gate_core::interfaces::StepCache;
use system_tests::RecordingTool;
use system_tests::approval_id_for;
use system_tests::base_registry;
use system_tests::build_in_memory_engine;
use system_tests::build_sqlite_engine;
use system_tests::deny_registry;
use system_tests::effective_registry;
use system_tests::now;
use system_tests::obligation_registry;
use system_tests::single_email_plan;
use system_tests::support_ticket_plan;
use system_tests::task;

/// Submits `t` and advances `run_id` under `registry`, via the in-memory
/// engine `engine`, returning the resulting run.
fn in_memory_submit_and_advance(
    engine: &system_tests::InMemoryEngine,
    t: Task,
    registry: &Registry,
) -> Result<Run, FlowEngineError> {
    let run = engine.submit(t, now())?;
    engine.advance(run, registry, now())
}

fn sqlite_submit_and_advance(
    engine: &system_tests::SqliteEngine,
    t: Task,
    registry: &Registry,
) -> Result<Run, FlowEngineError> {
    let run = engine.submit(t, now())?;
    engine.advance(run, registry, now())
}

// ============================================================================
// SECTION: Scenario 1 — Happy Path
// ============================================================================

#[test]
fn happy_path_completes_with_one_ticket_and_one_email() {
    let registry = effective_registry("tenant_enterprise_eu");
    let t = task("task_1", "tenant_enterprise_eu", None);

    let tool = Arc::new(RecordingTool::new());
    let engine = build_in_memory_engine(support_ticket_plan(), tool.clone());
    let run = in_memory_submit_and_advance(&engine, t.clone(), &registry).unwrap();
    assert_eq!(run.state, RunState::Completed);
    assert_eq!(tool.call_count("ticket.create"), 1);
    assert_eq!(tool.call_count("email.send"), 1);
    let history = engine.event_log().list_since(&run.run_id, 0).unwrap();
    let step_results = history.iter().filter(|r| matches!(&r.event.body, EventBody::TaskArtifactUpdateEvent { artifact_type, .. } if artifact_type == "step_result")).count();
    assert_eq!(step_results, 6);
    engine.event_log().verify_chain(&run.run_id).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let tool = Arc::new(RecordingTool::new());
    let engine = build_sqlite_engine(&dir.path().join("seed1.sqlite"), support_ticket_plan(), tool.clone());
    let run = sqlite_submit_and_advance(&engine, t, &registry).unwrap();
    assert_eq!(run.state, RunState::Completed);
    assert_eq!(tool.call_count("ticket.create"), 1);
    assert_eq!(tool.call_count("email.send"), 1);
    let history = engine.event_log().list_since(&run.run_id, 0).unwrap();
    let step_results = history.iter().filter(|r| matches!(&r.event.body, EventBody::TaskArtifactUpdateEvent { artifact_type, .. } if artifact_type == "step_result")).count();
    assert_eq!(step_results, 6);
    engine.event_log().verify_chain(&run.run_id).unwrap();
}

// ============================================================================
// SECTION: Scenario 2 — Approval Path
// ============================================================================

#[test]
fn approval_path_blocks_on_email_then_completes_once_approved() {
    let registry = effective_registry("tenant_demo");
    let t = task("task_2", "tenant_demo", None);

    let tool = Arc::new(RecordingTool::new());
    let engine = build_in_memory_engine(support_ticket_plan(), tool.clone());
    let run = in_memory_submit_and_advance(&engine, t.clone(), &registry).unwrap();
    assert_eq!(run.state, RunState::InputRequired);
    assert_eq!(tool.call_count("email.send"), 0);
    assert_eq!(tool.call_count("ticket.create"), 1);

    let approval_id = approval_id_for("task_2");
    engine
        .approvals()
        .decide(
            &approval_id,
            ApprovalDecision { decision: ApprovalVerdict::Approved, by: "ops-lead".to_string(), ts: now(), reason: None },
        )
        .unwrap();
    let run = engine.advance(run, &registry, now()).unwrap();
    assert_eq!(run.state, RunState::Completed);
    assert_eq!(tool.call_count("email.send"), 1);

    let dir = tempfile::tempdir().unwrap();
    let tool = Arc::new(RecordingTool::new());
    let engine = build_sqlite_engine(&dir.path().join("seed2.sqlite"), support_ticket_plan(), tool.clone());
    let run = sqlite_submit_and_advance(&engine, t, &registry).unwrap();
    assert_eq!(run.state, RunState::InputRequired);
    assert_eq!(tool.call_count("email.send"), 0);

    let approval_id = approval_id_for("task_2");
    engine
        .approvals()
        .decide(
            &approval_id,
            ApprovalDecision { decision: ApprovalVerdict::Approved, by: "ops-lead".to_string(), ts: now(), reason: None },
        )
        .unwrap();
    let run = engine.advance(run, &registry, now()).unwrap();
    assert_eq!(run.state, RunState::Completed);
    assert_eq!(tool.call_count("email.send"), 1);
}

// ============================================================================
// SECTION: Scenario 3 — Rate-Limit Retry
// ============================================================================

#[test]
fn rate_limited_email_send_retries_and_completes() {
    let registry = base_registry();
    let t = task("task_3", "tenant_enterprise_eu", None);

    let tool = Arc::new(RecordingTool::rate_limiting("email.send"));
    let engine = build_in_memory_engine(support_ticket_plan(), tool.clone());
    let run = in_memory_submit_and_advance(&engine, t.clone(), &registry).unwrap();
    assert_eq!(run.state, RunState::Completed);
    assert_eq!(tool.call_count("email.send"), 2);
    let history = engine.event_log().list_since(&run.run_id, 0).unwrap();
    let email_results: Vec<_> = history
        .iter()
        .filter_map(|r| match &r.event.body {
            EventBody::TaskArtifactUpdateEvent { artifact_type, artifact } if artifact_type == "step_result" => {
                (artifact.get("action_id").and_then(|v| v.as_str()) == Some("email.send")).then_some(artifact)
            }
            _ => None,
        })
        .collect();
    assert_eq!(email_results.len(), 1);
    assert_eq!(email_results[0].get("attempts").and_then(|v| v.as_u64()), Some(2));

    let dir = tempfile::tempdir().unwrap();
    let tool = Arc::new(RecordingTool::rate_limiting("email.send"));
    let engine = build_sqlite_engine(&dir.path().join("seed3.sqlite"), support_ticket_plan(), tool.clone());
    let run = sqlite_submit_and_advance(&engine, t, &registry).unwrap();
    assert_eq!(run.state, RunState::Completed);
    assert_eq!(tool.call_count("email.send"), 2);
    let history = engine.event_log().list_since(&run.run_id, 0).unwrap();
    let email_results: Vec<_> = history
        .iter()
        .filter_map(|r| match &r.event.body {
            EventBody::TaskArtifactUpdateEvent { artifact_type, artifact } if artifact_type == "step_result" => {
                (artifact.get("action_id").and_then(|v| v.as_str()) == Some("email.send")).then_some(artifact)
            }
            _ => None,
        })
        .collect();
    assert_eq!(email_results.len(), 1);
    assert_eq!(email_results[0].get("attempts").and_then(|v| v.as_u64()), Some(2));
}

// ============================================================================
// SECTION: Scenario 4 — Crash Replay
// ============================================================================

fn assert_crash_replay<L, C, A, B, Q, J, Pr, Bl>(engine: &FlowEngine<L, C, A, B, Q, J, Pr, Bl>, registry: &Registry, tool: &RecordingTool)
where
    L: EventLog,
    C: StepCache,
    A: ApprovalStore,
    B: BudgetStore,
    Q: QuotaStore,
    J: JobQueue,
    Pr: Projections,
    Bl: BillingLedger,
{
    let crashing_task = task("task_4", "tenant_enterprise_eu", Some("s6"));
    let run = engine.submit(crashing_task, now()).unwrap();
    let run_id = run.run_id.clone();
    let err = engine.advance(run, registry, now()).unwrap_err();
    assert!(matches!(err, FlowEngineError::SimulatedCrash { step_id } if step_id == "s6"));
    assert_eq!(tool.call_count("email.send"), 1);
    assert_eq!(tool.call_count("ticket.create"), 1);

    let resumed_task = task("task_4", "tenant_enterprise_eu", None);
    let resumed_run = Run::new(run_id, resumed_task, now());
    let run = engine.advance(resumed_run, registry, now()).unwrap();
    assert_eq!(run.state, RunState::Completed);
    assert_eq!(tool.call_count("email.send"), 1, "resume must replay the cached result, not call the tool again");
    assert_eq!(tool.call_count("ticket.create"), 1);
}

#[test]
fn crash_after_the_last_step_replays_idempotently_on_resume() {
    let registry = base_registry();

    let tool = Arc::new(RecordingTool::new());
    let engine = build_in_memory_engine(support_ticket_plan(), tool.clone());
    assert_crash_replay(&engine, &registry, &tool);

    let dir = tempfile::tempdir().unwrap();
    let tool = Arc::new(RecordingTool::new());
    let engine = build_sqlite_engine(&dir.path().join("seed4.sqlite"), support_ticket_plan(), tool.clone());
    assert_crash_replay(&engine, &registry, &tool);
}

// ============================================================================
// SECTION: Scenario 5 — Policy Deny
// ============================================================================

#[test]
fn policy_denied_step_fails_without_ever_calling_the_tool() {
    let registry = deny_registry();
    let t = task("task_5", "tenant_enterprise_eu", None);

    let tool = Arc::new(RecordingTool::new());
    let engine = build_in_memory_engine(single_email_plan(), tool.clone());
    let run = in_memory_submit_and_advance(&engine, t.clone(), &registry).unwrap();
    assert_eq!(run.state, RunState::Failed);
    assert_eq!(tool.call_count("email.send"), 0);
    let history = engine.event_log().list_since(&run.run_id, 0).unwrap();
    let denial_recorded = history.iter().any(|r| matches!(&r.event.body, EventBody::TaskStatusUpdateEvent { message, .. } if message.contains("policy denied")));
    assert!(denial_recorded);

    let dir = tempfile::tempdir().unwrap();
    let tool = Arc::new(RecordingTool::new());
    let engine = build_sqlite_engine(&dir.path().join("seed5.sqlite"), single_email_plan(), tool.clone());
    let run = sqlite_submit_and_advance(&engine, t, &registry).unwrap();
    assert_eq!(run.state, RunState::Failed);
    assert_eq!(tool.call_count("email.send"), 0);
}

// ============================================================================
// SECTION: Scenario 6 — Obligation Miss
// ============================================================================

#[test]
fn unmet_reply_draft_obligation_fails_the_run_with_an_artifact() {
    let registry = obligation_registry();
    let t = task("task_6", "tenant_enterprise_eu", None);

    let tool = Arc::new(RecordingTool::new());
    let engine = build_in_memory_engine(support_ticket_plan(), tool.clone());
    let run = in_memory_submit_and_advance(&engine, t.clone(), &registry).unwrap();
    assert_eq!(run.state, RunState::Failed);
    let history = engine.event_log().list_since(&run.run_id, 0).unwrap();
    let obligations_artifact = history.iter().find(|r| matches!(&r.event.body, EventBody::TaskArtifactUpdateEvent { artifact_type, .. } if artifact_type == "policy_obligations_failed"));
    assert!(obligations_artifact.is_some());

    let dir = tempfile::tempdir().unwrap();
    let tool = Arc::new(RecordingTool::new());
    let engine = build_sqlite_engine(&dir.path().join("seed6.sqlite"), support_ticket_plan(), tool.clone());
    let run = sqlite_submit_and_advance(&engine, t, &registry).unwrap();
    assert_eq!(run.state, RunState::Failed);
    let history = engine.event_log().list_since(&run.run_id, 0).unwrap();
    let obligations_artifact = history.iter().find(|r| matches!(&r.event.body, EventBody::TaskArtifactUpdateEvent { artifact_type, .. } if artifact_type == "policy_obligations_failed"));
    assert!(obligations_artifact.is_some());
}
