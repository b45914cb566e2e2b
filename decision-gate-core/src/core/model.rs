// decision-gate-core/src/core/model.rs
// ============================================================================
// Module: Kernel Data Model
// Description: Task, Run, Event, StepResult, and Approval record shapes.
// Purpose: Provide the canonical, serializable types shared by every component.
// Dependencies: serde, std::collections
// ============================================================================

//! ## Overview
//! These types are the wire and storage shapes for the kernel: a `Task` is the
//! immutable submission, a `Run` is its durable mutable state, and `Event`s are
//! the append-only log entries a run emits as it advances.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::ActionId;
use crate::core::identifiers::ApprovalId;
use crate::core::identifiers::OrgId;
use crate::core::identifiers::PolicyId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::StepId;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::TenantId;
use crate::core::identifiers::ToolId;
use crate::core::identifiers::UserId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Task
// ============================================================================

/// Immutable task submission. Uniquely identifies one [`Run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Caller-supplied or server-generated task id.
    pub task_id: TaskId,
    /// Tenant the task is submitted under.
    pub tenant_id: TenantId,
    /// Natural-language task description.
    pub user_message: String,
    /// Submitting user, if known.
    pub user_id: Option<UserId>,
    /// Submitting organization, if known.
    pub org_id: Option<OrgId>,
    /// Roles asserted for the submitting principal.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Free-form metadata, including test-only fields like `crash_after_step`.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Task {
    /// Returns the test-only crash-simulation step id from `metadata.crash_after_step`.
    #[must_use]
    pub fn crash_after_step(&self) -> Option<&str> {
        self.metadata.get("crash_after_step").and_then(Value::as_str)
    }
}

// ============================================================================
// SECTION: Run
// ============================================================================

/// Run lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    /// Run accepted, not yet advancing.
    Submitted,
    /// Run actively advancing through the pipeline.
    Working,
    /// Run is blocked waiting on an approval decision.
    InputRequired,
    /// Run finished successfully.
    Completed,
    /// Run finished with a failure.
    Failed,
    /// Run was canceled before completion.
    Canceled,
}

impl RunState {
    /// Returns true for any state that will not transition further.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

/// Per-run consumption counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetUsed {
    /// Total tool invocations counted against this run.
    #[serde(default)]
    pub tool_calls: u64,
    /// Total planner/LLM calls counted against this run.
    #[serde(default)]
    pub llm_calls: u64,
    /// Total cost units debited against this run.
    #[serde(default)]
    pub cost_units: u64,
    /// Tool-scoped call counters, keyed by [`ToolId`] string form.
    #[serde(default)]
    pub per_tool: BTreeMap<String, u64>,
    /// Action-scoped call counters, keyed by [`ActionId`] string form.
    #[serde(default)]
    pub per_action: BTreeMap<String, u64>,
}

impl BudgetUsed {
    /// Records one tool call against `tool_id`/`action_id`, debiting `cost_units`.
    pub fn record_tool_call(&mut self, tool_id: &ToolId, action_id: &ActionId, cost_units: u64) {
        self.tool_calls += 1;
        self.cost_units += cost_units;
        *self.per_tool.entry(tool_id.as_str().to_string()).or_insert(0) += 1;
        *self.per_action.entry(action_id.as_str().to_string()).or_insert(0) += 1;
    }

    /// Records one planner/LLM call, debiting `cost_units`.
    pub fn record_llm_call(&mut self, cost_units: u64) {
        self.llm_calls += 1;
        self.cost_units += cost_units;
    }
}

/// Durable, mutable run state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Durable run identifier.
    pub run_id: RunId,
    /// Originating task id; 1:1 with `run_id`.
    pub task_id: TaskId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Current lifecycle state.
    pub state: RunState,
    /// Optional human-readable title, set once a plan exists.
    pub title: Option<String>,
    /// Free-form tags attached during the run.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Consumption counters.
    #[serde(default)]
    pub budget_used: BudgetUsed,
    /// The originating task, retained for replay.
    pub task_input: Task,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Last-update timestamp.
    pub updated_at: Timestamp,
}

impl Run {
    /// Creates a new run in the `submitted` state.
    #[must_use]
    pub fn new(run_id: RunId, task: Task, now: Timestamp) -> Self {
        Self {
            run_id,
            task_id: task.task_id.clone(),
            tenant_id: task.tenant_id.clone(),
            state: RunState::Submitted,
            title: None,
            tags: Vec::new(),
            budget_used: BudgetUsed::default(),
            task_input: task,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transitions to `state`, bumping `updated_at`.
    pub fn transition(&mut self, state: RunState, now: Timestamp) {
        self.state = state;
        self.updated_at = now;
    }
}

// ============================================================================
// SECTION: Events
// ============================================================================

/// Streamed event payloads. The envelope's `_seq` is assigned by the event log
/// at persist time, not constructed here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventBody {
    /// Run lifecycle status change.
    TaskStatusUpdateEvent {
        /// New run state.
        state: RunState,
        /// Human-readable status message.
        message: String,
        /// Free-form status metadata.
        #[serde(default)]
        meta: BTreeMap<String, Value>,
    },
    /// An artifact was produced by the run (a plan, a step result, a diagnostic).
    TaskArtifactUpdateEvent {
        /// Artifact kind discriminator, e.g. `"plan"`, `"step_result"`.
        artifact_type: String,
        /// Artifact payload.
        artifact: Value,
    },
    /// Budget or quota counters changed.
    TaskBudgetUpdateEvent {
        /// Updated consumption counters.
        used: BudgetUsed,
        /// Effective limits at the time of the update.
        limits: Value,
    },
}

/// One event envelope, prior to chaining. `ts`/`task_id`/`run_id` are common to
/// every event type; `body` carries the type-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event timestamp.
    pub ts: Timestamp,
    /// Originating task id.
    pub task_id: TaskId,
    /// Owning run id.
    pub run_id: RunId,
    /// Type-specific payload.
    #[serde(flatten)]
    pub body: EventBody,
}

/// A persisted, chained event row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Strictly increasing per-run sequence number, starting at 1.
    pub seq: u64,
    /// The event envelope, with `_seq` embedded in its canonical form.
    pub event: Event,
    /// Canonical JSON bytes of `event` with `_seq` embedded, as a UTF-8 string.
    pub canonical: String,
    /// Chain hash of the previous row, empty string for `seq == 1`.
    pub prev_hash: String,
    /// This row's chain hash.
    pub hash: String,
    /// Audit keyring key id used to compute `hash`.
    pub key_id: String,
}

// ============================================================================
// SECTION: Step Results
// ============================================================================

/// Error classification taxonomy shared by the executor, retry runner, and
/// policy gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClass {
    /// Caller presented no or invalid credentials.
    Auth,
    /// Caller lacks permission for the requested operation.
    Permission,
    /// Upstream signaled rate limiting.
    RateLimit,
    /// Input failed validation.
    Validation,
    /// Referenced resource does not exist.
    NotFound,
    /// Request conflicts with current state.
    Conflict,
    /// Transient network or connection failure.
    Transient,
    /// Operation exceeded its deadline.
    Timeout,
    /// Upstream dependency failed.
    Upstream,
    /// Run or tenant budget exceeded.
    Budget,
    /// Daily quota exceeded.
    Quota,
    /// Idempotency key missing or invalid for a side-effecting step.
    Idempotency,
    /// Required approval was denied.
    ApprovalDenied,
    /// Policy gate denied the step.
    Policy,
    /// Role-based access control denied the step.
    Rbac,
    /// Could not classify the failure.
    Unknown,
}

impl ErrorClass {
    /// Error classes the retry runner will never retry, regardless of
    /// `retry_class.retry_on`.
    pub const NON_RETRYABLE: &'static [Self] = &[
        Self::Auth,
        Self::Permission,
        Self::Validation,
        Self::Budget,
        Self::Quota,
        Self::Idempotency,
        Self::ApprovalDenied,
        Self::Policy,
        Self::Rbac,
    ];

    /// Returns true if this class is never retried.
    #[must_use]
    pub fn is_non_retryable(self) -> bool {
        Self::NON_RETRYABLE.contains(&self)
    }
}

/// Terminal status of a single step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The step's tool call succeeded.
    Succeeded,
    /// The step failed; see `StepResult::error`.
    Failed,
}

/// Details for a failed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    /// Error classification.
    pub class: ErrorClass,
    /// Human-readable error message.
    pub message: String,
}

/// Cached, idempotency-keyed outcome of one plan step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Plan step id, e.g. `s1`.
    pub step_id: StepId,
    /// Registry action invoked.
    pub action_id: ActionId,
    /// Tool the action is bound to.
    pub tool: ToolId,
    /// Terminal status.
    pub status: StepStatus,
    /// Number of tool-call attempts made.
    pub attempts: u32,
    /// Idempotency key this result is cached under.
    pub idempotency_key: String,
    /// Tool output, present on success.
    pub output: Option<Value>,
    /// Error details, present on failure.
    pub error: Option<StepError>,
    /// Policy ids matched against this step during gating.
    #[serde(default)]
    pub policy_ids: Vec<PolicyId>,
    /// Set when this result was served from the idempotency cache rather than
    /// produced by a fresh tool invocation.
    #[serde(default)]
    pub cache_hit: bool,
}

// ============================================================================
// SECTION: Approval
// ============================================================================

/// Decision verdict on an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalVerdict {
    /// The plan may proceed.
    Approved,
    /// The plan must not proceed.
    Denied,
}

/// A resolved approval decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    /// Approve or deny.
    pub decision: ApprovalVerdict,
    /// Identity that made the decision (`"system"` for timeout synthesis).
    pub by: String,
    /// Decision timestamp.
    pub ts: Timestamp,
    /// Optional free-text reason.
    pub reason: Option<String>,
}

/// An approval request and, once resolved, its decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    /// Approval id, conventionally `"apr_" + run_id`.
    pub approval_id: ApprovalId,
    /// Run this approval gates.
    pub run_id: RunId,
    /// The plan or step payload presented for approval.
    pub payload: Value,
    /// The resolved decision, if any.
    pub decision: Option<ApprovalDecision>,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Decision timestamp, if resolved.
    pub decided_at: Option<Timestamp>,
}

impl Approval {
    /// Builds the conventional approval id for a run.
    #[must_use]
    pub fn id_for_run(run_id: &RunId) -> ApprovalId {
        ApprovalId::new(format!("apr_{}", run_id.as_str()))
    }
}
