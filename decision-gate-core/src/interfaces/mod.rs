// decision-gate-core/src/interfaces/mod.rs
// ============================================================================
// Module: Kernel Capability Interfaces
// Description: Backend-agnostic storage and execution contract surfaces.
// Purpose: Define the capability traits the flow engine and step executor are
//          generic over, so the same stage-transition code drives both the
//          in-memory profile and the durable SQLite-backed worker.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! The kernel never talks to a concrete store or tool transport directly.
//! Every durable or external concern is expressed as a capability trait here:
//! [`EventLog`], [`StepCache`], [`ApprovalStore`], [`BudgetStore`],
//! [`QuotaStore`], [`BillingLedger`], [`JobQueue`], and [`Projections`] cover
//! persistence; [`Planner`] and [`ToolContract`] cover the two points where
//! the kernel calls out to model- or tenant-owned logic. Implementations must
//! be deterministic given their inputs and fail closed on missing or invalid
//! data.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::Action;
use crate::core::ActionId;
use crate::core::Approval;
use crate::core::ApprovalDecision;
use crate::core::ApprovalId;
use crate::core::BudgetUsed;
use crate::core::Event;
use crate::core::EventRecord;
use crate::core::JobId;
use crate::core::OrgId;
use crate::core::Policy;
use crate::core::PolicyId;
use crate::core::Registry;
use crate::core::RunId;
use crate::core::StepId;
use crate::core::StepResult;
use crate::core::Task;
use crate::core::TenantId;
use crate::core::Timestamp;
use crate::core::Tool;
use crate::core::UserId;
use crate::policy::Obligation;

// ============================================================================
// SECTION: Event Log
// ============================================================================

/// Errors raised appending to or reading the durable event log.
#[derive(Debug, Error)]
pub enum EventLogError {
    /// Underlying storage reported an error.
    #[error("event log storage error: {0}")]
    Storage(String),
    /// The run's hash chain failed verification.
    #[error("event chain verification failed for run {run_id} at seq {seq}")]
    ChainBroken {
        /// The offending run.
        run_id: String,
        /// The first sequence number whose hash does not match.
        seq: u64,
    },
    /// The requested run has no events.
    #[error("no events recorded for run {0}")]
    EmptyRun(String),
}

/// Append-only, HMAC-chained log of task status, artifact, and budget events.
///
/// Every event is persisted before it is emitted to any subscriber; `append`
/// is the single choke point that enforces that ordering, computing the
/// sequence number and hash chain link internally from the run's current tip.
pub trait EventLog {
    /// Appends `event` to `run_id`'s log, returning the durable record with
    /// its assigned sequence number and hash chain link.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Storage`] on a storage failure.
    fn append(&self, run_id: &RunId, event: Event) -> Result<EventRecord, EventLogError>;

    /// Lists events for `run_id` with `seq > after_seq`, in sequence order.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::Storage`] on a storage failure.
    fn list_since(&self, run_id: &RunId, after_seq: u64) -> Result<Vec<EventRecord>, EventLogError>;

    /// Re-derives and checks every hash chain link for `run_id`.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::ChainBroken`] at the first mismatching
    /// sequence number, or [`EventLogError::EmptyRun`] if the run has no
    /// events.
    fn verify_chain(&self, run_id: &RunId) -> Result<(), EventLogError>;
}

// ============================================================================
// SECTION: Step Cache
// ============================================================================

/// Errors raised reading or writing the step result cache.
#[derive(Debug, Error)]
pub enum StepCacheError {
    /// Underlying storage reported an error.
    #[error("step cache storage error: {0}")]
    Storage(String),
}

/// Cache of completed step results keyed by idempotency key, used to short
/// circuit re-execution of a side-effecting step across retries and replays.
pub trait StepCache {
    /// Returns the cached result for `idempotency_key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StepCacheError::Storage`] on a storage failure.
    fn get(&self, idempotency_key: &str) -> Result<Option<StepResult>, StepCacheError>;

    /// Stores `result` under `idempotency_key`. Overwriting an existing entry
    /// is permitted; cached results are content-addressed by the key's inputs
    /// so a collision implies identical intended effect.
    ///
    /// # Errors
    ///
    /// Returns [`StepCacheError::Storage`] on a storage failure.
    fn put(&self, idempotency_key: &str, result: &StepResult) -> Result<(), StepCacheError>;
}

// ============================================================================
// SECTION: Approval Store
// ============================================================================

/// Errors raised managing human-in-the-loop approvals.
#[derive(Debug, Error)]
pub enum ApprovalStoreError {
    /// Underlying storage reported an error.
    #[error("approval store storage error: {0}")]
    Storage(String),
    /// An approval was decided twice.
    #[error("approval {0} already decided")]
    AlreadyDecided(String),
}

/// Store of pending and decided approvals.
pub trait ApprovalStore {
    /// Returns the approval with the given id, if one has been created.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalStoreError::Storage`] on a storage failure.
    fn get(&self, approval_id: &ApprovalId) -> Result<Option<Approval>, ApprovalStoreError>;

    /// Creates a pending approval request. Creating an approval that already
    /// exists for the same id is idempotent and returns the existing record.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalStoreError::Storage`] on a storage failure.
    fn create(&self, approval: Approval) -> Result<Approval, ApprovalStoreError>;

    /// Records a human decision against a pending approval.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalStoreError::AlreadyDecided`] if the approval was
    /// already decided, or [`ApprovalStoreError::Storage`] on a storage
    /// failure.
    fn decide(
        &self,
        approval_id: &ApprovalId,
        decision: ApprovalDecision,
    ) -> Result<Approval, ApprovalStoreError>;
}

// ============================================================================
// SECTION: Budget Store
// ============================================================================

/// Errors raised tracking per-run budget consumption.
#[derive(Debug, Error)]
pub enum BudgetStoreError {
    /// Underlying storage reported an error.
    #[error("budget store storage error: {0}")]
    Storage(String),
}

/// Per-run accounting of tool calls, LLM calls, and cost units consumed.
pub trait BudgetStore {
    /// Returns the current budget usage for `run_id`, defaulting to zero
    /// usage if the run has not yet recorded any.
    ///
    /// # Errors
    ///
    /// Returns [`BudgetStoreError::Storage`] on a storage failure.
    fn load(&self, run_id: &RunId) -> Result<BudgetUsed, BudgetStoreError>;

    /// Atomically records one tool call against `run_id` and returns the
    /// updated totals.
    ///
    /// # Errors
    ///
    /// Returns [`BudgetStoreError::Storage`] on a storage failure.
    fn record_tool_call(
        &self,
        run_id: &RunId,
        tool_id: &str,
        action_id: &str,
        cost_units: u64,
    ) -> Result<BudgetUsed, BudgetStoreError>;

    /// Atomically records one LLM call against `run_id` and returns the
    /// updated totals.
    ///
    /// # Errors
    ///
    /// Returns [`BudgetStoreError::Storage`] on a storage failure.
    fn record_llm_call(&self, run_id: &RunId, cost_units: u64) -> Result<BudgetUsed, BudgetStoreError>;
}

// ============================================================================
// SECTION: Quota Store
// ============================================================================

/// The scope a daily quota is tracked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaScope {
    /// Daily token consumption, tenant-wide.
    Tokens,
    /// Daily cost-unit consumption, tenant-wide.
    CostUnits,
}

/// Errors raised checking or consuming a tenant's daily quota.
#[derive(Debug, Error)]
pub enum QuotaError {
    /// Underlying storage reported an error.
    #[error("quota store storage error: {0}")]
    Storage(String),
    /// The requested consumption would exceed the tenant's daily quota.
    #[error("tenant {tenant_id} exceeded its daily {scope:?} quota of {limit}")]
    Exceeded {
        /// The offending tenant.
        tenant_id: String,
        /// The quota scope exceeded.
        scope: QuotaScope,
        /// The configured daily limit.
        limit: u64,
    },
}

/// Tracks and enforces a tenant's rolling daily quota.
///
/// The counter key is `(tenant_id, day, scope, model)`, matching the data
/// model's `QuotaCounter` shape. Org- and user-level sub-scoping is not
/// independently enforced: the registry's `Limits` carries only tenant-wide
/// ceilings, so tenant is the sole binding boundary a quota check has a
/// configured limit for; org/user identifiers are still recorded on the
/// billing ledger for invoicing breakdown.
pub trait QuotaStore {
    /// Atomically checks that consuming `amount` under `scope`/`model` would
    /// not exceed `tenant_id`'s `limit` for the UTC day containing `now`, and
    /// if so, records the consumption. The day boundary is derived from `now`
    /// rather than a wall-clock read, so replays and tests stay deterministic.
    ///
    /// # Errors
    ///
    /// Returns [`QuotaError::Exceeded`] when the consumption would exceed the
    /// limit, or [`QuotaError::Storage`] on a storage failure.
    fn check_and_consume(
        &self,
        tenant_id: &TenantId,
        scope: QuotaScope,
        model: &str,
        amount: u64,
        limit: u64,
        now: &Timestamp,
    ) -> Result<(), QuotaError>;
}

// ============================================================================
// SECTION: Billing Ledger
// ============================================================================

/// Errors raised appending to the billing ledger.
#[derive(Debug, Error)]
pub enum BillingLedgerError {
    /// Underlying storage reported an error.
    #[error("billing ledger storage error: {0}")]
    Storage(String),
}

/// One append-only billing ledger row, matching the data model's
/// `billing_ledger` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingEntry {
    /// Charged tenant.
    pub tenant_id: TenantId,
    /// Submitting organization, if known.
    pub org_id: Option<OrgId>,
    /// Submitting user, if known.
    pub user_id: Option<UserId>,
    /// Run the charge was incurred by.
    pub run_id: RunId,
    /// Charge kind, e.g. `"select_nodes"`, `"plan"`, `"tool_call"`.
    pub kind: String,
    /// Model identifier the charge was incurred against, when applicable.
    pub model: Option<String>,
    /// Tokens consumed, when token accounting is available.
    pub tokens: Option<u64>,
    /// Cost units charged.
    pub cost_units: u64,
    /// Charge timestamp.
    pub ts: Timestamp,
}

/// Durable, append-only record of cost-unit consumption for invoicing.
pub trait BillingLedger {
    /// Appends `entry` to the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`BillingLedgerError::Storage`] on a storage failure.
    fn record(&self, entry: &BillingEntry) -> Result<(), BillingLedgerError>;
}

// ============================================================================
// SECTION: Job Queue
// ============================================================================

/// The stage a durable job re-enters the flow engine at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Resume staged-pipeline processing for a run.
    Advance,
    /// Re-enter a run after an approval decision was recorded.
    ResumeAfterApproval,
}

/// A unit of durable work claimed and processed by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier.
    pub job_id: JobId,
    /// Tenant the job belongs to, used for concurrency-slot assignment.
    pub tenant_id: TenantId,
    /// Run this job advances.
    pub run_id: RunId,
    /// What the worker should do with the run once claimed.
    pub kind: JobKind,
    /// Job creation time.
    pub created_at: Timestamp,
}

/// Errors raised enqueuing, claiming, or completing durable jobs.
#[derive(Debug, Error)]
pub enum JobQueueError {
    /// Underlying storage reported an error.
    #[error("job queue storage error: {0}")]
    Storage(String),
}

/// Durable FIFO work queue feeding the worker pool, plus the tenant
/// concurrency-slot lock a claim is gated behind.
pub trait JobQueue {
    /// Enqueues a new job, returning its assigned id.
    ///
    /// # Errors
    ///
    /// Returns [`JobQueueError::Storage`] on a storage failure.
    fn enqueue(&self, job: Job) -> Result<JobId, JobQueueError>;

    /// Atomically claims the oldest queued job whose tenant currently holds a
    /// free concurrency slot, marking it running and returning it. Returns
    /// `None` if no claimable job exists.
    ///
    /// # Errors
    ///
    /// Returns [`JobQueueError::Storage`] on a storage failure.
    fn claim(&self, worker_id: &str) -> Result<Option<Job>, JobQueueError>;

    /// Marks `job_id` complete and releases its tenant concurrency slot.
    ///
    /// # Errors
    ///
    /// Returns [`JobQueueError::Storage`] on a storage failure.
    fn complete(&self, job_id: &JobId) -> Result<(), JobQueueError>;

    /// Marks `job_id` failed, releasing its tenant concurrency slot and, if
    /// `requeue` is set, re-enqueuing it at the back of the queue.
    ///
    /// # Errors
    ///
    /// Returns [`JobQueueError::Storage`] on a storage failure.
    fn fail(&self, job_id: &JobId, requeue: bool) -> Result<(), JobQueueError>;
}

// ============================================================================
// SECTION: Projections
// ============================================================================

/// A materialized, read-optimized summary of one run's current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run identifier.
    pub run_id: RunId,
    /// Tenant identifier.
    pub tenant_id: TenantId,
    /// Current run state, serialized as the reference implementation's
    /// string form (e.g. `"working"`, `"completed"`).
    pub state: String,
    /// Count of steps recorded so far.
    pub step_count: u64,
    /// Budget consumed so far.
    pub budget_used: BudgetUsed,
    /// Timestamp of the most recently projected event.
    pub updated_at: Timestamp,
}

/// Errors raised reading or refreshing materialized projections.
#[derive(Debug, Error)]
pub enum ProjectionsError {
    /// Underlying storage reported an error.
    #[error("projections storage error: {0}")]
    Storage(String),
}

/// Read-optimized materialized views derived from the event log, refreshed
/// on a cadence independent of the write path.
pub trait Projections {
    /// Returns the current materialized summary for `run_id`, if the
    /// projection has observed it.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionsError::Storage`] on a storage failure.
    fn run_summary(&self, run_id: &RunId) -> Result<Option<RunSummary>, ProjectionsError>;

    /// Upserts the materialized summary for one run, called by the flow
    /// engine synchronously after every state transition. Backends that
    /// derive projections lazily from the event log instead may treat this as
    /// a no-op and do all the work in `refresh`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionsError::Storage`] on a storage failure.
    fn observe(&self, summary: RunSummary) -> Result<(), ProjectionsError>;

    /// Re-derives every materialized view from the event log's current
    /// state. Idempotent; safe to call on a fixed cadence.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionsError::Storage`] on a storage failure.
    fn refresh(&self) -> Result<(), ProjectionsError>;
}

// ============================================================================
// SECTION: Planner
// ============================================================================

/// One step of a plan: a single action invocation with resolved or
/// yet-to-be-resolved arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Step identifier, unique within the plan (e.g. `s1`).
    pub step_id: StepId,
    /// The registry action this step invokes.
    pub action_id: ActionId,
    /// Arguments, which may contain `$sX.output.Y`-style references to the
    /// outputs of earlier steps in the same plan.
    pub args: Value,
    /// Plan-declared approval requirement for this step. Combined with
    /// whatever the policy gate separately derives for the same step: either
    /// source requiring approval is enough to require it.
    #[serde(default)]
    pub requires_approval: Option<bool>,
    /// Plan-declared cost-unit override for this step, used when no policy
    /// rule sets `set_cost_units` for it.
    #[serde(default)]
    pub cost_units_override: Option<u64>,
    /// Policy ids the plan itself already associates with this step (e.g.
    /// from an upstream gate pass); superseded by whatever the policy engine
    /// matches when it gates the step here.
    #[serde(default)]
    pub policy_ids: Vec<PolicyId>,
}

/// Plan-wide execution controls a planner may declare alongside its steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanControls {
    /// Requires approval before any step runs, regardless of any per-step or
    /// policy-derived requirement.
    #[serde(default)]
    pub requires_approval: bool,
    /// Caps the plan's total tool calls below whatever the tenant/registry
    /// limits already allow.
    #[serde(default)]
    pub max_tool_calls: Option<u64>,
    /// When non-empty, every step's bound tool must appear in this list.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
}

/// An ordered sequence of steps produced for one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Human-readable summary of what the plan accomplishes.
    #[serde(default)]
    pub goal: String,
    /// Plan-wide execution controls.
    #[serde(default)]
    pub controls: PlanControls,
    /// Steps in execution order.
    pub steps: Vec<PlanStep>,
    /// Plan-wide obligations checked after every step has run.
    #[serde(default)]
    pub obligations: Vec<Obligation>,
}

/// Errors raised producing a plan for a task.
#[derive(Debug, Error)]
pub enum PlannerError {
    /// The planner itself failed (e.g. an upstream model call failed).
    #[error("planning failed: {0}")]
    Failed(String),
}

/// Token usage observed from the planner's most recent LLM call, used to
/// compute the cost-unit charge for that call.
///
/// `prompt_tokens`/`candidates_tokens`/`total_tokens`/`cached_tokens` are
/// populated when the underlying model API reports them; `prompt_chars`/
/// `response_chars` are always populated so [`PlannerUsage::estimated_total_tokens`]
/// has a fallback when it did not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerUsage {
    /// Tokens consumed by the prompt, when reported.
    pub prompt_tokens: Option<u64>,
    /// Tokens consumed by the response, when reported.
    pub candidates_tokens: Option<u64>,
    /// Total tokens, when reported directly by the model API.
    pub total_tokens: Option<u64>,
    /// Tokens served from a prompt cache, when reported.
    pub cached_tokens: Option<u64>,
    /// Prompt length in characters, for the estimation fallback.
    pub prompt_chars: u64,
    /// Response length in characters, for the estimation fallback.
    pub response_chars: u64,
}

impl PlannerUsage {
    /// Returns `total_tokens` if the model reported it, else the character-count
    /// estimate `⌊(prompt_chars + response_chars) / 4⌋`.
    #[must_use]
    pub fn estimated_total_tokens(&self) -> u64 {
        self.total_tokens.unwrap_or_else(|| (self.prompt_chars + self.response_chars) / 4)
    }
}

/// Produces the ordered step plan for a task against the effective registry.
///
/// Implementations may be as simple as a fixed, deterministic stub (used by
/// tests and the seed scenarios) or may call out to a model. The flow engine
/// drives three opaque collaborator calls per task: `select_nodes` at the
/// `select_nodes` stage, `plan` at the `plan` stage, and `last_usage` after
/// each to compute that call's cost-unit charge. Implementations that never
/// call a metered model may leave `select_nodes` and `last_usage` at their
/// defaults.
pub trait Planner {
    /// Selects up to 8 context node paths relevant to `task.user_message`
    /// from `trees`, consulting `policies` for anything that should narrow
    /// the selection. The default implementation selects nothing, which is
    /// correct for planners that build their own context internally (e.g. an
    /// [`HttpPlanner`](../../decision_gate_providers/struct.HttpPlanner.html)
    /// that resolves context server-side).
    ///
    /// # Errors
    ///
    /// Returns [`PlannerError::Failed`] when node selection fails.
    fn select_nodes(&self, task: &Task, trees: &Value, policies: &[Policy]) -> Result<Vec<String>, PlannerError> {
        let _ = (task, trees, policies);
        Ok(Vec::new())
    }

    /// Produces the plan for `task` given the effective `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`PlannerError::Failed`] when plan generation fails.
    fn plan(&self, task: &Task, registry: &Registry) -> Result<Plan, PlannerError>;

    /// Returns usage observed from the most recently completed call
    /// (`select_nodes` or `plan`). The default implementation reports no
    /// usage, which routes the flow engine's cost computation to the
    /// configured flat per-call rate instead of token-based pricing.
    fn last_usage(&self) -> PlannerUsage {
        PlannerUsage::default()
    }
}

// ============================================================================
// SECTION: Tool Contract
// ============================================================================

/// Context passed to a tool invocation alongside its resolved arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallContext {
    /// Tenant the call is made on behalf of.
    pub tenant_id: TenantId,
    /// Run the call belongs to.
    pub run_id: RunId,
    /// Step the call belongs to.
    pub step_id: StepId,
    /// Idempotency key for this invocation, when the action requires one.
    pub idempotency_key: Option<String>,
    /// Per-call timeout, taken from the bound action's effective timeout.
    pub timeout_ms: u64,
}

/// A tool invocation failure, carrying enough detail for
/// `crate::retry::classify_error` to classify it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallFailure {
    /// Raw error message from the tool or transport.
    pub message: String,
    /// Exception- or error-type name, when the transport provides one.
    pub type_name: String,
}

/// A bound, callable tool. One implementation per `tool_ref` scheme (e.g.
/// `http:`, `stub:`); the registry's [`Tool::tool_ref`](crate::core::Tool)
/// selects which implementation an action is bound to.
pub trait ToolContract {
    /// Invokes `tool` with `args` under `ctx`, returning the raw JSON result.
    ///
    /// # Errors
    ///
    /// Returns [`ToolCallFailure`] on any failure; the caller (the step
    /// executor's retry runner) is responsible for classification and retry.
    fn call(&self, tool: &Tool, action: &Action, args: &Value, ctx: &ToolCallContext) -> Result<Value, ToolCallFailure>;
}
