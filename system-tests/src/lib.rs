// system-tests/src/lib.rs
// ============================================================================
// Module: Decision Gate System Tests Library
// Description: Shared fixtures (registry, plan, planner, tool) for the seed
//              scenarios, built once and driven against both storage
//              profiles so the profiles are proven behaviorally equivalent.
// Purpose: Keep the scenario tests under `tests/` free of fixture
//          boilerplate; they should read as the scenario narrative, not
//          plumbing.
// Dependencies: decision-gate-core, decision-gate-store-sqlite, serde_json
// ============================================================================

//! ## Overview
//! The six seed scenarios all drive the same underlying cast: a six-step
//! support-ticket plan (`ticket.lookup` -> `ticket.classify` -> `ticket.create`
//! -> `draft.compose` -> `draft.review` -> `email.send`), a [`RecordingTool`]
//! that counts calls per action and can be told to rate-limit one action's
//! first call, and a [`FixedPlanner`] that always returns that plan. Scenario
//! 2's tenant-scoped approval requirement is expressed the way the kernel
//! itself expresses per-tenant differences: a registry overlay document
//! merged with [`apply_overlays`], not a condition-based policy rule (the
//! condition algebra has no tenant predicate).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use decision_gate_core::Action;
use decision_gate_core::ActionId;
use decision_gate_core::ActionSecurity;
use decision_gate_core::ApprovalId;
use decision_gate_core::AuditKey;
use decision_gate_core::AuditKeyring;
use decision_gate_core::ErrorClass;
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
use decision_gate_core::OrgId;
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
use decision_gate_core::RunId;
use decision_gate_core::StepId;
use decision_gate_core::Task;
use decision_gate_core::TaskId;
use decision_gate_core::TenantId;
use decision_gate_core::Timestamp;
use decision_gate_core::Tool;
use decision_gate_core::ToolCallContext;
use decision_gate_core::ToolCallFailure;
use decision_gate_core::ToolContract;
use decision_gate_core::ToolId;
use decision_gate_core::UserId;
use decision_gate_core::apply_overlays;
use decision_gate_core::policy::Condition;
use decision_gate_core::policy::Effect;
use decision_gate_core::policy::Leaf;
use decision_gate_core::policy::Obligation;
use decision_gate_store_sqlite::SqliteApprovalStore;
use decision_gate_store_sqlite::SqliteBillingLedger;
use decision_gate_store_sqlite::SqliteBudgetStore;
use decision_gate_store_sqlite::SqliteEventLog;
use decision_gate_store_sqlite::SqliteJobQueue;
use decision_gate_store_sqlite::SqliteProfile;
use decision_gate_store_sqlite::SqliteProjections;
use decision_gate_store_sqlite::SqliteQuotaStore;
use decision_gate_store_sqlite::SqliteStepCache;
use decision_gate_store_sqlite::SqliteStoreConfig;
use decision_gate_store_sqlite::SqliteStoreMode;
use decision_gate_store_sqlite::SqliteSyncMode;
use serde_json::Value;
use serde_json::json;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Clock and Audit Keyring
// ============================================================================

/// Returns the current wall-clock time as a kernel [`Timestamp`].
#[must_use]
pub fn now() -> Timestamp {
    Timestamp::from_offset(OffsetDateTime::now_utc())
}

/// Builds the audit keyring every fixture engine signs its event chain with.
#[must_use]
pub fn keyring() -> Arc<AuditKeyring> {
    Arc::new(AuditKeyring::new(vec![AuditKey {
        kid: KeyId::new("seed-key"),
        secret: b"system-tests-seed-secret".to_vec(),
        active: true,
    }]))
}

// ============================================================================
// SECTION: Task Construction
// ============================================================================

/// Builds a task for `task_id` under `tenant_id`, optionally crash-tagged.
#[must_use]
pub fn task(task_id: &str, tenant_id: &str, crash_after_step: Option<&str>) -> Task {
    let mut metadata = BTreeMap::new();
    if let Some(step_id) = crash_after_step {
        metadata.insert("crash_after_step".to_string(), Value::String(step_id.to_string()));
    }
    Task {
        task_id: TaskId::new(task_id),
        tenant_id: TenantId::new(tenant_id),
        user_message: "customer reports a billing discrepancy, please investigate and respond".to_string(),
        user_id: Some(UserId::new("u_support_agent")),
        org_id: Some(OrgId::new("org_acme")),
        roles: vec!["member".to_string()],
        metadata,
    }
}

/// The deterministic run id `FlowEngine::submit` derives for `task_id`.
#[must_use]
pub fn run_id_for(task_id: &str) -> RunId {
    RunId::new(format!("run_{task_id}"))
}

/// The conventional approval id for a run's approval gate.
#[must_use]
pub fn approval_id_for(task_id: &str) -> ApprovalId {
    ApprovalId::new(format!("apr_{}", run_id_for(task_id).as_str()))
}

// ============================================================================
// SECTION: Support-Ticket Plan
// ============================================================================

/// The six-step support-ticket plan shared by every scenario: two read-only
/// ticket steps, the ticket-creation side effect, two read-only drafting
/// steps, and the email-send side effect.
#[must_use]
pub fn support_ticket_plan() -> Plan {
    Plan {
        steps: vec![
            plan_step("s1", "ticket.lookup", json!({})),
            plan_step("s2", "ticket.classify", json!({})),
            plan_step(
                "s3",
                "ticket.create",
                json!({"subject": "billing discrepancy", "idempotency_key": "ticket-create-s3"}),
            ),
            plan_step("s4", "draft.compose", json!({})),
            plan_step("s5", "draft.review", json!({})),
            plan_step(
                "s6",
                "email.send",
                json!({"to": "customer@example.com", "idempotency_key": "email-send-s6"}),
            ),
        ],
        ..Plan::default()
    }
}

/// A single-step plan used by the policy-deny scenario, where the scenario's
/// only assertion of interest is that the tool is never invoked at all.
#[must_use]
pub fn single_email_plan() -> Plan {
    Plan {
        steps: vec![plan_step(
            "s1",
            "email.send",
            json!({"to": "customer@example.com", "idempotency_key": "email-send-s1"}),
        )],
        ..Plan::default()
    }
}

/// Builds a [`PlanStep`] with no approval/cost overrides, the common case
/// for every fixture plan in this crate.
fn plan_step(step_id: &str, action_id: &str, args: Value) -> PlanStep {
    PlanStep {
        step_id: StepId::new(step_id),
        action_id: ActionId::new(action_id),
        args,
        requires_approval: None,
        cost_units_override: None,
        policy_ids: Vec::new(),
    }
}

// ============================================================================
// SECTION: Base Registry
// ============================================================================

/// Declares an action bound to `tool` with the given retry class and
/// side-effect flag; every action in this fixture uses hash-args idempotency.
fn action(action_id: &str, tool: &str, retry_class: &str, side_effect: bool) -> Action {
    Action {
        action_id: ActionId::new(action_id),
        tool: ToolId::new(tool),
        timeout_ms: None,
        retry_class: RetryClassId::new(retry_class),
        idempotency: IdempotencyConfig { mode: IdempotencyMode::HashArgs },
        cost_units: Some(1),
        side_effect,
        security: ActionSecurity { allowed_roles: vec!["member".to_string()], requires_approval: false },
    }
}

/// The base registry every tenant's effective registry is overlaid on:
/// three tools, the six support-ticket actions, a default retry class and a
/// rate-limited one bound to `email.send` alone.
#[must_use]
pub fn base_registry() -> Registry {
    Registry {
        registry_id: RegistryId::new("acme-base"),
        schema_version: "1".to_string(),
        tools: vec![
            Tool { tool_id: ToolId::new("ticket"), tool_ref: "stub:ticket".to_string() },
            Tool { tool_id: ToolId::new("draft"), tool_ref: "stub:draft".to_string() },
            Tool { tool_id: ToolId::new("email"), tool_ref: "stub:email".to_string() },
        ],
        actions: vec![
            action("ticket.lookup", "ticket", "default", false),
            action("ticket.classify", "ticket", "default", false),
            action("ticket.create", "ticket", "default", true),
            action("draft.compose", "draft", "default", false),
            action("draft.review", "draft", "default", false),
            action("email.send", "email", "email-retry", true),
        ],
        policies: Vec::new(),
        retry_classes: vec![
            RetryClass::default(),
            RetryClass {
                retry_class_id: RetryClassId::new("email-retry"),
                max_attempts: 3,
                backoff_ms: vec![1],
                retry_on: vec![ErrorClass::RateLimit],
            },
        ],
        roles: BTreeMap::new(),
        limits: Limits { max_tool_calls: Some(50), ..Limits::default() },
    }
}

/// The overlay document `tenant_demo` carries over the base registry: it
/// requires a human approval decision before `email.send` may run, expressed
/// as a direct override of the action's own security block rather than a
/// condition-based policy (the condition algebra has no tenant predicate).
#[must_use]
pub fn tenant_demo_overlay() -> Value {
    json!({
        "actions": [
            { "action_id": "email.send", "security": { "allowed_roles": ["member"], "requires_approval": true } }
        ]
    })
}

/// Resolves the effective registry for `tenant_id`: the base registry
/// unmodified for every tenant except `tenant_demo`, which gets the approval
/// overlay merged in via [`apply_overlays`].
///
/// # Panics
///
/// Panics if the overlay fails to merge, which would indicate a malformed
/// fixture rather than a scenario-under-test failure.
#[must_use]
pub fn effective_registry(tenant_id: &str) -> Registry {
    let base = base_registry();
    if tenant_id == "tenant_demo" {
        apply_overlays(&base, std::slice::from_ref(&tenant_demo_overlay())).expect("overlay merges cleanly")
    } else {
        base
    }
}

/// A minimal registry for the policy-deny scenario: a single `email.send`
/// action gated by a rule that denies every invocation.
#[must_use]
pub fn deny_registry() -> Registry {
    let mut registry = base_registry();
    registry.actions.retain(|a| a.action_id.as_str() == "email.send");
    registry.policies = vec![Policy {
        policy_id: PolicyId::new("deny-email"),
        priority: 10,
        phase: PolicyPhase::Exec,
        when: Condition::Leaf(Leaf::Action("email.send".to_string())),
        effect: Effect { deny: Some("email sending is disabled for this tenant".to_string()), ..Effect::default() },
    }];
    registry
}

/// The base registry with an unsatisfiable obligation attached to every
/// step: a `reply_draft` artifact that none of the support-ticket actions
/// ever emits, so the obligation-miss scenario fails deterministically.
#[must_use]
pub fn obligation_registry() -> Registry {
    let mut registry = base_registry();
    registry.policies = vec![Policy {
        policy_id: PolicyId::new("require-reply-draft"),
        priority: 1,
        phase: PolicyPhase::Exec,
        when: Condition::All(Vec::new()),
        effect: Effect {
            obligations: vec![Obligation::MustEmitArtifact { artifact_type: "reply_draft".to_string() }],
            ..Effect::default()
        },
    }];
    registry
}

// ============================================================================
// SECTION: Recording Tool
// ============================================================================

/// A [`ToolContract`] that counts invocations per action id and can be told
/// to answer one action's first call with a rate-limit failure, exercising
/// the retry runner the same way a flaky upstream would.
pub struct RecordingTool {
    calls: Mutex<BTreeMap<String, u32>>,
    rate_limit_once: Option<String>,
}

impl RecordingTool {
    /// Builds a tool that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self { calls: Mutex::new(BTreeMap::new()), rate_limit_once: None }
    }

    /// Builds a tool that answers `action_id`'s first call with a 429 and
    /// succeeds on every subsequent call, including later calls to the same
    /// action.
    #[must_use]
    pub fn rate_limiting(action_id: &str) -> Self {
        Self { calls: Mutex::new(BTreeMap::new()), rate_limit_once: Some(action_id.to_string()) }
    }

    /// Returns the number of times `action_id` was invoked.
    #[must_use]
    pub fn call_count(&self, action_id: &str) -> u32 {
        self.calls.lock().expect("recording tool mutex poisoned").get(action_id).copied().unwrap_or(0)
    }
}

impl Default for RecordingTool {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolContract for RecordingTool {
    fn call(&self, _tool: &Tool, action: &Action, _args: &Value, _ctx: &ToolCallContext) -> Result<Value, ToolCallFailure> {
        let action_id = action.action_id.as_str().to_string();
        let mut calls = self.calls.lock().expect("recording tool mutex poisoned");
        let count = calls.entry(action_id.clone()).or_insert(0);
        *count += 1;
        let this_call = *count;
        drop(calls);

        if self.rate_limit_once.as_deref() == Some(action_id.as_str()) && this_call == 1 {
            return Err(ToolCallFailure { message: "429 too many requests".to_string(), type_name: "RateLimitError".to_string() });
        }
        Ok(json!({ "action_id": action_id, "ok": true }))
    }
}

// ============================================================================
// SECTION: Fixed Planner
// ============================================================================

/// A [`Planner`] that always returns the plan it was built with, regardless
/// of the task or registry it is asked to plan against.
pub struct FixedPlanner {
    plan: Plan,
}

impl FixedPlanner {
    /// Wraps `plan` as a fixed planner.
    #[must_use]
    pub fn new(plan: Plan) -> Self {
        Self { plan }
    }
}

impl Planner for FixedPlanner {
    fn plan(&self, _task: &Task, _registry: &Registry) -> Result<Plan, PlannerError> {
        Ok(self.plan.clone())
    }
}

// ============================================================================
// SECTION: In-Memory Engine
// ============================================================================

/// The in-memory flow engine type every scenario drives one half of its
/// dual-profile assertions against.
pub type InMemoryEngine = FlowEngine<
    InMemoryEventLog,
    InMemoryStepCache,
    InMemoryApprovalStore,
    InMemoryBudgetStore,
    InMemoryQuotaStore,
    InMemoryJobQueue,
    InMemoryProjections,
    InMemoryBillingLedger,
>;

/// Builds a fresh in-memory engine over `plan`, driven by `tool`.
#[must_use]
pub fn build_in_memory_engine(plan: Plan, tool: Arc<dyn ToolContract + Send + Sync>) -> InMemoryEngine {
    FlowEngine::new(
        InMemoryEventLog::new(keyring()),
        InMemoryStepCache::new(),
        InMemoryApprovalStore::new(),
        InMemoryBudgetStore::new(),
        InMemoryQuotaStore::new(),
        InMemoryJobQueue::new(4),
        InMemoryProjections::new(),
        InMemoryBillingLedger::new(),
        Arc::new(FixedPlanner::new(plan)),
        tool,
        FlowEngineConfig { llm_model: "seed-scenarios".to_string(), ..FlowEngineConfig::default() },
    )
}

// ============================================================================
// SECTION: SQLite Engine
// ============================================================================

/// The `SQLite`-backed flow engine type every scenario drives the other half
/// of its dual-profile assertions against.
pub type SqliteEngine = FlowEngine<
    SqliteEventLog,
    SqliteStepCache,
    SqliteApprovalStore,
    SqliteBudgetStore,
    SqliteQuotaStore,
    SqliteJobQueue,
    SqliteProjections,
    SqliteBillingLedger,
>;

/// Opens a fresh `SQLite` database under `db_path` and builds an engine over
/// `plan`, driven by `tool`.
///
/// # Panics
///
/// Panics if the database cannot be opened, which would indicate a broken
/// fixture (an unwritable temp directory) rather than a scenario failure.
#[must_use]
pub fn build_sqlite_engine(db_path: &Path, plan: Plan, tool: Arc<dyn ToolContract + Send + Sync>) -> SqliteEngine {
    let config = SqliteStoreConfig {
        path: db_path.to_path_buf(),
        busy_timeout_ms: 5_000,
        journal_mode: SqliteStoreMode::Wal,
        sync_mode: SqliteSyncMode::Full,
        max_concurrent_per_tenant: 4,
    };
    let profile = SqliteProfile::open(&config, keyring()).expect("sqlite profile opens cleanly");
    FlowEngine::new(
        profile.event_log(),
        profile.step_cache(),
        profile.approval_store(),
        profile.budget_store(),
        profile.quota_store(),
        profile.job_queue(),
        profile.projections(),
        profile.billing_ledger(),
        Arc::new(FixedPlanner::new(plan)),
        tool,
        FlowEngineConfig { llm_model: "seed-scenarios".to_string(), ..FlowEngineConfig::default() },
    )
}
