// decision-gate-core/tests/flow_engine_scenarios.rs
// ============================================================================
// Module: Flow Engine Scenario Tests
// Description: End-to-end scenarios against the in-memory storage profile.
// Purpose: Exercise rate-limit retry and obligation-miss failure, which the
//          engine's own unit tests do not cover.
// Dependencies: decision-gate-core
// ============================================================================
//! ## Overview
//! These complement `decision_gate_core::runtime::engine`'s unit tests, which
//! already cover the happy path, policy deny, approval gating, tool failure,
//! and crash replay.

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

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use decision_gate_core::Action;
use decision_gate_core::ActionId;
use decision_gate_core::ActionSecurity;
use decision_gate_core::AuditKey;
use decision_gate_core::AuditKeyring;
use decision_gate_core::Effect;
use decision_gate_core::FlowEngine;
use decision_gate_core::FlowEngineConfig;
use decision_gate_core::IdempotencyConfig;
use decision_gate_core::IdempotencyMode;
use decision_gate_core::InMemoryApprovalStore;
use decision_gate_core::InMemoryBillingLedger;
use decision_gate_core::InMemoryBudgetStore;
use decision_gate_core::InMemoryEventLog;
use decision_gate_core::InMemoryJobQueue;
use decision_gate_core::InMemoryProjections;
use decision_gate_core::InMemoryQuotaStore;
use decision_gate_core::InMemoryStepCache;
use decision_gate_core::KeyId;
use decision_gate_core::Limits;
use decision_gate_core::Obligation;
use decision_gate_core::Plan;
use decision_gate_core::PlanStep;
use decision_gate_core::Planner;
use decision_gate_core::PlannerError;
use decision_gate_core::Policy;
use decision_gate_core::PolicyId;
use decision_gate_core::PolicyPhase;
use decision_gate_core::Registry;
use decision_gate_core::RegistryId;
use decision_gate_core::RetryClass;
use decision_gate_core::RetryClassId;
use decision_gate_core::RunState;
use decision_gate_core::Task;
use decision_gate_core::TaskId;
use decision_gate_core::TenantId;
use decision_gate_core::Timestamp;
use decision_gate_core::Tool;
use decision_gate_core::ToolCallContext;
use decision_gate_core::ToolCallFailure;
use decision_gate_core::ToolContract;
use decision_gate_core::ErrorClass;
use decision_gate_core::ToolId;
use time::OffsetDateTime;

fn now() -> Timestamp {
    Timestamp::from_offset(OffsetDateTime::now_utc())
}

fn keyring() -> Arc<AuditKeyring> {
    Arc::new(AuditKeyring::new(vec![AuditKey { kid: KeyId::new("k1"), secret: b"scenario-secret".to_vec(), active: true }]))
}

fn task() -> Task {
    Task {
        task_id: TaskId::new("t-scenario"),
        tenant_id: TenantId::new("tenant-a"),
        user_message: "notify the customer".to_string(),
        user_id: None,
        org_id: None,
        roles: vec!["member".to_string()],
        metadata: BTreeMap::new(),
    }
}

fn single_step_plan() -> Plan {
    Plan {
        steps: vec![PlanStep {
            step_id: decision_gate_core::StepId::new("s1"),
            action_id: ActionId::new("notify.send"),
            args: serde_json::json!({"to": "customer@example.com", "idempotency_key": "notify-send-s1"}),
            requires_approval: None,
            cost_units_override: None,
            policy_ids: Vec::new(),
        }],
        ..Plan::default()
    }
}

fn notify_action() -> Action {
    Action {
        action_id: ActionId::new("notify.send"),
        tool: ToolId::new("notify"),
        timeout_ms: None,
        retry_class: RetryClassId::new("rate-limited"),
        idempotency: IdempotencyConfig { mode: IdempotencyMode::HashArgs },
        cost_units: Some(1),
        side_effect: true,
        security: ActionSecurity::default(),
    }
}

struct FixedPlanner(Plan);

impl Planner for FixedPlanner {
    fn plan(&self, _task: &Task, _registry: &Registry) -> Result<Plan, PlannerError> {
        Ok(self.0.clone())
    }
}

/// Fails with a rate-limit error on its first call, then succeeds.
struct FlakyTool {
    calls: AtomicU32,
}

impl ToolContract for FlakyTool {
    fn call(&self, _tool: &Tool, _action: &Action, _args: &serde_json::Value, _ctx: &ToolCallContext) -> Result<serde_json::Value, ToolCallFailure> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call == 0 {
            Err(ToolCallFailure { message: "429 rate limit exceeded".to_string(), type_name: "RateLimitError".to_string() })
        } else {
            Ok(serde_json::json!({"delivered": true}))
        }
    }
}

struct SilentTool;

impl ToolContract for SilentTool {
    fn call(&self, _tool: &Tool, _action: &Action, _args: &serde_json::Value, _ctx: &ToolCallContext) -> Result<serde_json::Value, ToolCallFailure> {
        Ok(serde_json::json!({"delivered": true}))
    }
}

type TestEngine = FlowEngine<
    InMemoryEventLog,
    InMemoryStepCache,
    InMemoryApprovalStore,
    InMemoryBudgetStore,
    InMemoryQuotaStore,
    InMemoryJobQueue,
    InMemoryProjections,
    InMemoryBillingLedger,
>;

fn build_engine(plan: Plan, tools: Arc<dyn ToolContract + Send + Sync>) -> TestEngine {
    FlowEngine::new(
        InMemoryEventLog::new(keyring()),
        InMemoryStepCache::new(),
        InMemoryApprovalStore::new(),
        InMemoryBudgetStore::new(),
        InMemoryQuotaStore::new(),
        InMemoryJobQueue::new(4),
        InMemoryProjections::new(),
        InMemoryBillingLedger::new(),
        Arc::new(FixedPlanner(plan)),
        tools,
        FlowEngineConfig { llm_model: "gpt-test".to_string(), ..FlowEngineConfig::default() },
    )
}

fn registry(actions: Vec<Action>, policies: Vec<Policy>, retry_classes: Vec<RetryClass>) -> Registry {
    Registry {
        registry_id: RegistryId::new("r"),
        schema_version: "1".to_string(),
        tools: vec![Tool { tool_id: ToolId::new("notify"), tool_ref: "stub:notify".to_string() }],
        actions,
        policies,
        retry_classes,
        roles: BTreeMap::new(),
        limits: Limits::default(),
    }
}

#[test]
fn rate_limited_call_retries_and_completes() {
    let retry_class =
        RetryClass { retry_class_id: RetryClassId::new("rate-limited"), max_attempts: 3, backoff_ms: vec![0], retry_on: vec![ErrorClass::RateLimit] };
    let reg = registry(vec![notify_action()], Vec::new(), vec![retry_class]);
    let engine = build_engine(single_step_plan(), Arc::new(FlakyTool { calls: AtomicU32::new(0) }));
    let run = engine.submit(task(), now()).unwrap();
    let run = engine.advance(run, &reg, now()).unwrap();
    assert_eq!(run.state, RunState::Completed);

    let history = engine.event_log().list_since(&run.run_id, 0).unwrap();
    let step_result = history
        .iter()
        .find_map(|record| match &record.event.body {
            decision_gate_core::EventBody::TaskArtifactUpdateEvent { artifact_type, artifact } if artifact_type == "step_result" => {
                serde_json::from_value::<decision_gate_core::StepResult>(artifact.clone()).ok()
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(step_result.attempts, 2);
}

#[test]
fn unmet_obligation_fails_the_run_even_though_the_step_succeeded() {
    let retry_class = RetryClass::default();
    let policies = vec![Policy {
        policy_id: PolicyId::new("require-receipt"),
        priority: 1,
        phase: PolicyPhase::Exec,
        when: decision_gate_core::Condition::Leaf(decision_gate_core::Leaf::Action("notify.*".to_string())),
        effect: Effect { obligations: vec![Obligation::MustEmitArtifact { artifact_type: "delivery_receipt".to_string() }], ..Effect::default() },
    }];
    let reg = registry(vec![notify_action()], policies, vec![retry_class]);
    let engine = build_engine(single_step_plan(), Arc::new(SilentTool));
    let run = engine.submit(task(), now()).unwrap();
    let run = engine.advance(run, &reg, now()).unwrap();

    // The step itself succeeds, but nothing ever emits the required
    // "delivery_receipt" artifact, so the run fails on the post-execution
    // obligation scan rather than completing.
    assert_eq!(run.state, RunState::Failed);
}

#[test]
fn chain_verification_detects_no_tampering_on_a_clean_run() {
    let reg = registry(vec![notify_action()], Vec::new(), vec![RetryClass::default()]);
    let engine = build_engine(single_step_plan(), Arc::new(SilentTool));
    let run = engine.submit(task(), now()).unwrap();
    let run = engine.advance(run, &reg, now()).unwrap();
    assert_eq!(run.state, RunState::Completed);
    assert!(engine.event_log().verify_chain(&run.run_id).is_ok());
}
