// decision-gate-core/src/runtime/engine.rs
// ============================================================================
// Module: Flow Engine
// Description: Staged task-to-run pipeline generic over the storage
//              capability traits, plus the per-step execution algorithm.
// Purpose: Drive one task from submission through planning, policy gating,
//          approval, deterministic step execution, and completion.
// Dependencies: crate::{core, interfaces, policy, retry, idempotency}
// ============================================================================

//! ## Overview
//! [`FlowEngine`] is generic over eight storage capability traits
//! ([`EventLog`], [`StepCache`], [`ApprovalStore`], [`BudgetStore`],
//! [`QuotaStore`], [`JobQueue`], [`Projections`], [`BillingLedger`]) so the
//! same stage-transition code drives both the in-memory profile and the
//! durable SQLite-backed worker. The [`Planner`] and [`ToolContract`]
//! dependencies are held as trait objects instead of type parameters, since
//! tool bindings are resolved per `tool_ref` scheme at runtime rather than
//! fixed once per deployment profile the way the storage backends are.
//!
//! `submit` creates a run, persists its `submitted` status event, and
//! enqueues an `advance` job; `advance` does the rest. An unplanned run walks
//! `load_tenant -> load_registry -> load_trees -> select_nodes ->
//! hydrate_context -> plan` before entering the per-step gate/execute loop,
//! debiting budget, quota, and the billing ledger for each metered planner
//! call along the way. `advance` is safe to call repeatedly and from a cold
//! start: it reconstructs the plan, the completed step outputs, and the
//! events emitted so far entirely from the event log before doing any new
//! work, so a worker that crashes mid-run and re-claims the job resumes
//! exactly where the log says it left off rather than re-executing
//! already-recorded side effects or re-charging an already-billed planner
//! call. Every state transition is appended to the event log before
//! `advance` returns it to the caller -- there is no separate "emit" step the
//! kernel could skip.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::core::Action;
use crate::core::Approval;
use crate::core::ApprovalDecision;
use crate::core::ApprovalVerdict;
use crate::core::BudgetUsed;
use crate::core::ErrorClass;
use crate::core::Event;
use crate::core::EventBody;
use crate::core::EventRecord;
use crate::core::IdempotencyMode;
use crate::core::Limits;
use crate::core::Registry;
use crate::core::Run;
use crate::core::RunId;
use crate::core::RunState;
use crate::core::StepError;
use crate::core::StepId;
use crate::core::StepResult;
use crate::core::StepStatus;
use crate::core::Task;
use crate::core::Timestamp;
use crate::core::identifiers::JobId;
use crate::idempotency::compute_idempotency_key;
use crate::interfaces::ApprovalStore;
use crate::interfaces::ApprovalStoreError;
use crate::interfaces::BillingEntry;
use crate::interfaces::BillingLedger;
use crate::interfaces::BillingLedgerError;
use crate::interfaces::BudgetStore;
use crate::interfaces::BudgetStoreError;
use crate::interfaces::EventLog;
use crate::interfaces::EventLogError;
use crate::interfaces::Job;
use crate::interfaces::JobKind;
use crate::interfaces::JobQueue;
use crate::interfaces::JobQueueError;
use crate::interfaces::Plan;
use crate::interfaces::PlanStep;
use crate::interfaces::Planner;
use crate::interfaces::PlannerError;
use crate::interfaces::Projections;
use crate::interfaces::ProjectionsError;
use crate::interfaces::QuotaError;
use crate::interfaces::QuotaScope;
use crate::interfaces::QuotaStore;
use crate::interfaces::RunSummary;
use crate::interfaces::StepCache;
use crate::interfaces::StepCacheError;
use crate::interfaces::ToolCallContext;
use crate::interfaces::ToolContract;
use crate::policy::Obligation;
use crate::policy::PolicyEngine;
use crate::policy::PolicyError;
use crate::policy::check_obligations;
use crate::policy::is_side_effecting;
use crate::retry::run_with_retry;

/// Quota-dimension label used for tool-call cost-unit charges, which are not
/// attributable to any one LLM model.
const TOOL_QUOTA_MODEL: &str = "tool";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised driving a run through the flow engine.
#[derive(Debug, Error)]
pub enum FlowEngineError {
    /// Event log append or read failed.
    #[error(transparent)]
    EventLog(#[from] EventLogError),
    /// Step cache read or write failed.
    #[error(transparent)]
    StepCache(#[from] StepCacheError),
    /// Approval store read or write failed.
    #[error(transparent)]
    Approval(#[from] ApprovalStoreError),
    /// Budget store read or write failed.
    #[error(transparent)]
    Budget(#[from] BudgetStoreError),
    /// Quota store read or write failed.
    #[error(transparent)]
    Quota(#[from] QuotaError),
    /// Billing ledger write failed.
    #[error(transparent)]
    Billing(#[from] BillingLedgerError),
    /// Job queue enqueue failed.
    #[error(transparent)]
    JobQueue(#[from] JobQueueError),
    /// Projections write failed.
    #[error(transparent)]
    Projections(#[from] ProjectionsError),
    /// The configured planner failed to produce a plan.
    #[error(transparent)]
    Planner(#[from] PlannerError),
    /// Policy gate evaluation failed.
    #[error(transparent)]
    Policy(#[from] PolicyError),
    /// Idempotency key derivation failed (malformed step arguments).
    #[error(transparent)]
    Idempotency(#[from] crate::core::hashing::HashError),
    /// A plan step referenced an action or tool absent from the effective
    /// registry.
    #[error("plan step {step_id} references unknown action {action_id}")]
    UnknownAction {
        /// The offending plan step.
        step_id: String,
        /// The missing action id.
        action_id: String,
    },
    /// A value could not be serialized to persist as an event artifact.
    #[error("serialization failed: {0}")]
    Serialization(String),
    /// `task_input.metadata.crash_after_step` matched the step that just
    /// committed its result; the caller should treat this the way it would a
    /// real process crash after that point, and resume by calling `advance`
    /// again once the step's result is durably recorded.
    #[error("simulated crash after step {step_id}")]
    SimulatedCrash {
        /// The step whose result was persisted immediately before the crash.
        step_id: String,
    },
}

/// Result of charging one metered planner call.
enum ChargeOutcome {
    /// The charge succeeded; carries the recorded budget event.
    Charged(EventBody),
    /// The charge would have exceeded a configured daily quota; carries the
    /// human-readable reason the run should be failed with.
    QuotaExceeded(String),
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Deployment-independent tuning for one [`FlowEngine`] instance.
#[derive(Debug, Clone)]
pub struct FlowEngineConfig {
    /// Floor limits merged beneath the effective registry's own `limits`
    /// section; the registry wins per-key, matching
    /// [`PolicyEngine::compile_effective_limits`].
    pub default_limits: Limits,
    /// Model identifier recorded against quota counters and billing ledger
    /// rows for this engine's planner calls (`select_nodes` and `plan`).
    pub llm_model: String,
    /// How long a run may sit awaiting a human approval decision before the
    /// engine synthesizes a `denied/by=system` decision for it.
    pub approval_timeout_secs: u64,
    /// Snapshot the run's materialized summary at least once per this many
    /// persisted events, in addition to every terminal transition.
    pub snapshot_every: u32,
    /// Refresh materialized projections at least once per this many
    /// persisted events, in addition to every terminal transition and
    /// approval decision.
    pub refresh_mv_every: u32,
}

/// One hour, matching the reference implementation's default approval wait
/// deadline.
const DEFAULT_APPROVAL_TIMEOUT_SECS: u64 = 3_600;

/// Matches `decision-gate-config`'s own default; kept independent since this
/// crate does not depend on the config crate.
const DEFAULT_SNAPSHOT_EVERY: u32 = 50;

/// Matches `decision-gate-config`'s own default.
const DEFAULT_REFRESH_MV_EVERY: u32 = 10;

impl Default for FlowEngineConfig {
    fn default() -> Self {
        Self {
            default_limits: Limits::default(),
            llm_model: String::new(),
            approval_timeout_secs: DEFAULT_APPROVAL_TIMEOUT_SECS,
            snapshot_every: DEFAULT_SNAPSHOT_EVERY,
            refresh_mv_every: DEFAULT_REFRESH_MV_EVERY,
        }
    }
}

// ============================================================================
// SECTION: Flow Engine
// ============================================================================

/// Drives tasks through the staged pipeline against a fixed set of storage
/// backends and a tool/planner pair resolved once at construction time.
pub struct FlowEngine<L, C, A, B, Q, J, Pr, Bl>
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
    /// Durable, HMAC-chained event log.
    event_log: L,
    /// Idempotency-keyed step result cache.
    step_cache: C,
    /// Human-in-the-loop approval store.
    approvals: A,
    /// Per-run budget accounting.
    budgets: B,
    /// Tenant daily quota tracker.
    quotas: Q,
    /// Durable job queue, used to enqueue the initial `advance` job.
    jobs: J,
    /// Read-optimized run projections.
    projections: Pr,
    /// Append-only billing ledger, debited for every metered planner call.
    billing: Bl,
    /// Produces the step plan for a submitted task.
    planner: Arc<dyn Planner + Send + Sync>,
    /// Invokes bound tools.
    tools: Arc<dyn ToolContract + Send + Sync>,
    /// Deployment-independent tuning.
    config: FlowEngineConfig,
}

impl<L, C, A, B, Q, J, Pr, Bl> FlowEngine<L, C, A, B, Q, J, Pr, Bl>
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
    /// Assembles a flow engine over the given storage backends, planner, and
    /// tool contract.
    #[must_use]
    #[allow(
        clippy::too_many_arguments,
        reason = "one field per injected capability; a builder would only hide the same list"
    )]
    pub fn new(
        event_log: L,
        step_cache: C,
        approvals: A,
        budgets: B,
        quotas: Q,
        jobs: J,
        projections: Pr,
        billing: Bl,
        planner: Arc<dyn Planner + Send + Sync>,
        tools: Arc<dyn ToolContract + Send + Sync>,
        config: FlowEngineConfig,
    ) -> Self {
        Self { event_log, step_cache, approvals, budgets, quotas, jobs, projections, billing, planner, tools, config }
    }

    /// Exposes the approval store so callers (the CLI, the broker) can decide
    /// a pending approval without the flow engine itself owning that path.
    #[must_use]
    pub const fn approvals(&self) -> &A {
        &self.approvals
    }

    /// Exposes the event log for chain verification and tailing.
    #[must_use]
    pub const fn event_log(&self) -> &L {
        &self.event_log
    }

    /// Exposes the materialized projections.
    #[must_use]
    pub const fn projections(&self) -> &Pr {
        &self.projections
    }

    /// Exposes the billing ledger for invoicing reads.
    #[must_use]
    pub const fn billing(&self) -> &Bl {
        &self.billing
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Accepts `task`, creates its run in the `submitted` state, persists the
    /// submission event, and enqueues the `advance` job that will drive it.
    ///
    /// # Errors
    ///
    /// Returns [`FlowEngineError`] on any storage failure.
    pub fn submit(&self, task: Task, now: Timestamp) -> Result<Run, FlowEngineError> {
        let run_id = RunId::new(format!("run_{}", task.task_id.as_str()));
        let run = Run::new(run_id.clone(), task, now);
        self.record_status(&run, "task submitted", now)?;
        self.project(&run, 0, true)?;
        self.jobs.enqueue(Job {
            job_id: JobId::new(format!("job_advance_{}", run_id.as_str())),
            tenant_id: run.tenant_id.clone(),
            run_id,
            kind: JobKind::Advance,
            created_at: now,
        })?;
        Ok(run)
    }

    /// Enqueues a job to resume `run` after its pending approval has been
    /// decided. Intended to be called by whatever handler processes the
    /// approval decision, immediately after it calls
    /// [`ApprovalStore::decide`].
    ///
    /// # Errors
    ///
    /// Returns [`FlowEngineError`] on a job queue failure.
    pub fn enqueue_resume(&self, run: &Run, now: Timestamp) -> Result<(), FlowEngineError> {
        self.jobs.enqueue(Job {
            job_id: JobId::new(format!("job_resume_{}", run.run_id.as_str())),
            tenant_id: run.tenant_id.clone(),
            run_id: run.run_id.clone(),
            kind: JobKind::ResumeAfterApproval,
            created_at: now,
        })?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Advance
    // ------------------------------------------------------------------

    /// Advances `run` against the effective `registry`: plans if unplanned,
    /// gates and executes every step not already recorded as succeeded,
    /// checks plan-wide obligations, and transitions the run to a terminal or
    /// blocked state. A terminal run is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`FlowEngineError`] on any storage failure, an unknown plan
    /// action, or a policy evaluation error.
    pub fn advance(&self, mut run: Run, registry: &Registry, now: Timestamp) -> Result<Run, FlowEngineError> {
        if run.state.is_terminal() {
            return Ok(run);
        }

        let history = self.event_log.list_since(&run.run_id, 0)?;
        let (mut outputs, mut step_results, completed, mut emitted) = reconstruct(&history);

        let policy_engine = PolicyEngine::new(registry);
        let mut effective_limits = policy_engine.compile_effective_limits(&self.config.default_limits);

        let plan = match find_plan(&history) {
            Some(plan) => plan,
            None => {
                run.transition(RunState::Working, now);
                emitted.push(self.record_status(&run, "load_tenant", now)?);
                emitted.push(self.record_status(&run, "load_registry", now)?);

                let trees = run.task_input.metadata.get("context_trees").cloned().unwrap_or(Value::Null);
                emitted.push(self.record_status(&run, "load_trees", now)?);

                emitted.push(self.record_status(&run, "select_nodes", now)?);
                let selected_nodes = self.planner.select_nodes(&run.task_input, &trees, &registry.policies)?;
                match self.charge_llm_usage(&run, &effective_limits, "llm_select_nodes", now)? {
                    ChargeOutcome::Charged(event) => emitted.push(event),
                    ChargeOutcome::QuotaExceeded(reason) => return self.fail_run(run, reason, now),
                }
                let nodes_artifact = serde_json::to_value(&selected_nodes)
                    .map_err(|err| FlowEngineError::Serialization(err.to_string()))?;
                emitted.push(self.record_artifact(&run, "selected_nodes", nodes_artifact, now)?);

                emitted.push(self.record_status(&run, "hydrate_context", now)?);
                let context_pack = serde_json::json!({ "trees": trees, "selected_nodes": selected_nodes });
                emitted.push(self.record_artifact(&run, "context_pack", context_pack, now)?);

                emitted.push(self.record_status(&run, "planning", now)?);
                let plan = self.planner.plan(&run.task_input, registry)?;
                match self.charge_llm_usage(&run, &effective_limits, "llm_plan", now)? {
                    ChargeOutcome::Charged(event) => emitted.push(event),
                    ChargeOutcome::QuotaExceeded(reason) => return self.fail_run(run, reason, now),
                }
                run.title = Some(format!("plan with {} step(s)", plan.steps.len()));
                let artifact =
                    serde_json::to_value(&plan).map_err(|err| FlowEngineError::Serialization(err.to_string()))?;
                emitted.push(self.record_artifact(&run, "plan", artifact, now)?);
                plan
            }
        };

        if run.state != RunState::Working {
            run.transition(RunState::Working, now);
        }

        if let Some(plan_cap) = plan.controls.max_tool_calls {
            effective_limits.max_tool_calls =
                Some(effective_limits.max_tool_calls.map_or(plan_cap, |existing| existing.min(plan_cap)));
        }

        let mut obligations: Vec<Obligation> = plan.obligations.clone();

        for step in &plan.steps {
            let action = registry.find_action(&step.action_id).ok_or_else(|| FlowEngineError::UnknownAction {
                step_id: step.step_id.as_str().to_string(),
                action_id: step.action_id.as_str().to_string(),
            })?;

            if !plan.controls.allowed_tools.is_empty()
                && !plan.controls.allowed_tools.iter().any(|allowed| allowed == action.tool.as_str())
            {
                return self.fail_run(
                    run,
                    format!("plan controls forbid tool {} for step {}", action.tool, step.step_id),
                    now,
                );
            }

            let mut patch = policy_engine.evaluate_step_policy(&step.action_id, &run.task_input.roles)?;
            // Propagate the plan's own declared fields wherever the policy gate
            // left that field unset, matching the reference gate's
            // `step2[k] = patch[k] if k in patch else step[k]` merge.
            patch.requires_approval = patch.requires_approval || plan.controls.requires_approval || step.requires_approval.unwrap_or(false);
            if patch.cost_units_override.is_none() {
                patch.cost_units_override = step.cost_units_override;
            }
            if patch.matched_policy_ids.is_empty() {
                patch.matched_policy_ids = step.policy_ids.clone();
            }
            obligations.extend(patch.obligations.iter().cloned());

            if patch.is_denied() {
                let reason = patch.deny_reason.unwrap_or_default();
                return self.fail_run(run, format!("policy denied step {}: {reason}", step.step_id), now);
            }

            if completed.contains(&step.step_id) {
                continue;
            }

            if patch.requires_approval {
                let approval_id = Approval::id_for_run(&run.run_id);
                let approval = match self.approvals.get(&approval_id)? {
                    Some(existing) => existing,
                    None => {
                        let payload = serde_json::to_value(&plan)
                            .map_err(|err| FlowEngineError::Serialization(err.to_string()))?;
                        self.approvals.create(Approval {
                            approval_id,
                            run_id: run.run_id.clone(),
                            payload,
                            decision: None,
                            created_at: now,
                            decided_at: None,
                        })?
                    }
                };
                match approval.decision {
                    None if now.seconds_since(&approval.created_at) >= self.config.approval_timeout_secs => {
                        self.approvals.decide(
                            &approval.approval_id,
                            ApprovalDecision {
                                decision: ApprovalVerdict::Denied,
                                by: "system".to_string(),
                                ts: now,
                                reason: Some("approval wait deadline exceeded".to_string()),
                            },
                        )?;
                        return self.fail_run(
                            run,
                            format!("approval timed out waiting for step {}", step.step_id),
                            now,
                        );
                    }
                    None => {
                        run.transition(RunState::InputRequired, now);
                        self.record_status(&run, &format!("awaiting approval before step {}", step.step_id), now)?;
                        self.project(&run, step_results.len() as u64, true)?;
                        return Ok(run);
                    }
                    Some(decision) if decision.decision == ApprovalVerdict::Denied => {
                        return self.fail_run(run, format!("approval denied for step {}", step.step_id), now);
                    }
                    Some(_) => {}
                }
            }

            let cost_units = patch.cost_units_override.unwrap_or_else(|| action.effective_cost_units());
            let current_budget = self.budgets.load(&run.run_id)?;
            if let Some(reason) = budget_violation(&current_budget, &effective_limits, step, action) {
                let result = failed_result(step, action, 0, String::new(), ErrorClass::Budget, reason, &patch);
                return self.fail_step(run, result, now);
            }

            let resolved_args = resolve_args(&step.args, &outputs);

            if action.idempotency.mode == IdempotencyMode::HashArgs
                && is_side_effecting(action.side_effect, step.action_id.as_str(), action.tool.as_str())
                && resolved_args.get("idempotency_key").and_then(Value::as_str).is_none()
            {
                let message =
                    format!("side-effecting action {} requires an explicit idempotency_key argument", action.action_id);
                let result = failed_result(step, action, 0, String::new(), ErrorClass::Idempotency, message, &patch);
                return self.fail_step(run, result, now);
            }

            let idempotency_key = match action.idempotency.mode {
                IdempotencyMode::ExplicitKey => match resolved_args.get("idempotency_key").and_then(Value::as_str) {
                    Some(key) => key.to_string(),
                    None => {
                        let message =
                            format!("action {} requires an explicit idempotency_key argument", action.action_id);
                        let result =
                            failed_result(step, action, 0, String::new(), ErrorClass::Idempotency, message, &patch);
                        return self.fail_step(run, result, now);
                    }
                },
                IdempotencyMode::HashArgs => {
                    compute_idempotency_key(&run.tenant_id, &run.run_id, &step.step_id, &step.action_id, &resolved_args)?
                }
            };

            if let Some(cached) = self.step_cache.get(&idempotency_key)? {
                outputs.insert(step.step_id.as_str().to_string(), cached.output.clone().unwrap_or(Value::Null));
                let mut replayed = cached;
                replayed.cache_hit = true;
                let artifact = serde_json::to_value(&replayed)
                    .map_err(|err| FlowEngineError::Serialization(err.to_string()))?;
                emitted.push(self.record_artifact(&run, "step_result", artifact, now)?);
                step_results.push(replayed);
                continue;
            }

            if let Some(daily) = effective_limits.daily_cost_unit_quota {
                if let Err(err) =
                    self.quotas.check_and_consume(&run.tenant_id, QuotaScope::CostUnits, TOOL_QUOTA_MODEL, cost_units, daily, &now)
                {
                    match err {
                        QuotaError::Exceeded { .. } => {
                            let result = failed_result(
                                step,
                                action,
                                0,
                                idempotency_key.clone(),
                                ErrorClass::Quota,
                                err.to_string(),
                                &patch,
                            );
                            return self.fail_step(run, result, now);
                        }
                        storage_err @ QuotaError::Storage(_) => return Err(storage_err.into()),
                    }
                }
            }

            let updated_budget = self.budgets.record_tool_call(&run.run_id, action.tool.as_str(), action.action_id.as_str(), cost_units)?;
            emitted.push(self.record_budget(&run, updated_budget, &effective_limits, now)?);

            let Some(tool) = registry.tools.iter().find(|t| t.tool_id == action.tool) else {
                return Err(FlowEngineError::UnknownAction {
                    step_id: step.step_id.as_str().to_string(),
                    action_id: step.action_id.as_str().to_string(),
                });
            };
            let ctx = ToolCallContext {
                tenant_id: run.tenant_id.clone(),
                run_id: run.run_id.clone(),
                step_id: step.step_id.clone(),
                idempotency_key: Some(idempotency_key.clone()),
                timeout_ms: action.effective_timeout_ms(),
            };
            let retry_class = registry.find_retry_class(&action.retry_class);
            let outcome = run_with_retry(&retry_class, |_attempt| {
                self.tools.call(tool, action, &resolved_args, &ctx).map_err(|failure| (failure.message, failure.type_name))
            });

            let result = match outcome.value {
                Some(output) => StepResult {
                    step_id: step.step_id.clone(),
                    action_id: step.action_id.clone(),
                    tool: action.tool.clone(),
                    status: StepStatus::Succeeded,
                    attempts: outcome.attempts,
                    idempotency_key: idempotency_key.clone(),
                    output: Some(output),
                    error: None,
                    policy_ids: patch.matched_policy_ids.clone(),
                    cache_hit: false,
                },
                None => {
                    let (class, message) = outcome.error.unwrap_or((ErrorClass::Unknown, "tool invocation failed".to_string()));
                    failed_result(step, action, outcome.attempts, idempotency_key.clone(), class, message, &patch)
                }
            };

            if result.status == StepStatus::Succeeded {
                self.step_cache.put(&idempotency_key, &result)?;
                outputs.insert(step.step_id.as_str().to_string(), result.output.clone().unwrap_or(Value::Null));
                let artifact = serde_json::to_value(&result)
                    .map_err(|err| FlowEngineError::Serialization(err.to_string()))?;
                emitted.push(self.record_artifact(&run, "step_result", artifact, now)?);
                step_results.push(result);
                self.project(&run, step_results.len() as u64, false)?;

                if run.task_input.crash_after_step() == Some(step.step_id.as_str()) {
                    return Err(FlowEngineError::SimulatedCrash { step_id: step.step_id.as_str().to_string() });
                }
            } else {
                return self.fail_step(run, result, now);
            }
        }

        let failures = check_obligations(&obligations, &emitted, &step_results, &registry);
        if !failures.is_empty() {
            let artifact = serde_json::to_value(&failures).map_err(|err| FlowEngineError::Serialization(err.to_string()))?;
            self.record_artifact(&run, "policy_obligations_failed", artifact, now)?;
            let fatal: Vec<_> = failures.iter().filter(|f| f.fatal).collect();
            if !fatal.is_empty() {
                let reasons = fatal.iter().map(|f| f.reason.clone()).collect::<Vec<_>>().join("; ");
                return self.fail_run(run, format!("unmet obligations: {reasons}"), now);
            }
        }

        run.transition(RunState::Completed, now);
        self.record_status(&run, "completed", now)?;
        self.project(&run, step_results.len() as u64, true)?;
        Ok(run)
    }

    // ------------------------------------------------------------------
    // LLM usage accounting
    // ------------------------------------------------------------------

    /// Debits budget, quota, and the billing ledger for the planner's most
    /// recently completed metered call (`select_nodes` or `plan`), tagging
    /// the billing row with `kind`.
    ///
    /// Token cost is priced at `effective_limits.llm_cost_units_per_1k_tokens`
    /// per 1000 tokens when configured, falling back to the flat
    /// `llm_call_cost_units` rate, and finally to a single cost unit. Returns
    /// [`ChargeOutcome::QuotaExceeded`] rather than an error when the charge
    /// would exceed a configured daily quota, so the caller can fail the run
    /// the same way a per-step quota violation does.
    fn charge_llm_usage(
        &self,
        run: &Run,
        effective_limits: &Limits,
        kind: &str,
        now: Timestamp,
    ) -> Result<ChargeOutcome, FlowEngineError> {
        let usage = self.planner.last_usage();
        let tokens = usage.total_tokens.unwrap_or_else(|| usage.estimated_total_tokens());
        let cost_units = effective_limits
            .llm_cost_units_per_1k_tokens
            .map(|rate| tokens.saturating_mul(rate).div_ceil(1000))
            .or(effective_limits.llm_call_cost_units)
            .unwrap_or(1);

        if let Some(daily_tokens) = effective_limits.daily_token_quota {
            if let Err(err) =
                self.quotas.check_and_consume(&run.tenant_id, QuotaScope::Tokens, &self.config.llm_model, tokens, daily_tokens, &now)
            {
                match err {
                    QuotaError::Exceeded { .. } => return Ok(ChargeOutcome::QuotaExceeded(err.to_string())),
                    storage_err @ QuotaError::Storage(_) => return Err(storage_err.into()),
                }
            }
        }
        if let Some(daily_cost) = effective_limits.daily_cost_unit_quota {
            if let Err(err) = self.quotas.check_and_consume(
                &run.tenant_id,
                QuotaScope::CostUnits,
                &self.config.llm_model,
                cost_units,
                daily_cost,
                &now,
            ) {
                match err {
                    QuotaError::Exceeded { .. } => return Ok(ChargeOutcome::QuotaExceeded(err.to_string())),
                    storage_err @ QuotaError::Storage(_) => return Err(storage_err.into()),
                }
            }
        }

        let updated_budget = self.budgets.record_llm_call(&run.run_id, cost_units)?;
        let budget_event = self.record_budget(run, updated_budget, effective_limits, now)?;

        self.billing.record(&BillingEntry {
            tenant_id: run.tenant_id.clone(),
            org_id: run.task_input.org_id.clone(),
            user_id: run.task_input.user_id.clone(),
            run_id: run.run_id.clone(),
            kind: kind.to_string(),
            model: Some(self.config.llm_model.clone()),
            tokens: Some(tokens),
            cost_units,
            ts: now,
        })?;

        Ok(ChargeOutcome::Charged(budget_event))
    }

    // ------------------------------------------------------------------
    // Event recording helpers
    // ------------------------------------------------------------------

    /// Appends `body` as an event for `run`, returning the persisted body for
    /// local obligation-check accumulation.
    fn append_event(&self, run: &Run, body: EventBody, now: Timestamp) -> Result<EventBody, FlowEngineError> {
        let event = Event { ts: now, task_id: run.task_id.clone(), run_id: run.run_id.clone(), body };
        let record = self.event_log.append(&run.run_id, event)?;
        Ok(record.event.body)
    }

    /// Records a status event reflecting `run`'s current state.
    fn record_status(&self, run: &Run, message: &str, now: Timestamp) -> Result<EventBody, FlowEngineError> {
        self.append_event(
            run,
            EventBody::TaskStatusUpdateEvent { state: run.state, message: message.to_string(), meta: BTreeMap::new() },
            now,
        )
    }

    /// Records an artifact event.
    fn record_artifact(&self, run: &Run, artifact_type: &str, artifact: Value, now: Timestamp) -> Result<EventBody, FlowEngineError> {
        self.append_event(run, EventBody::TaskArtifactUpdateEvent { artifact_type: artifact_type.to_string(), artifact }, now)
    }

    /// Records a budget-counter update event.
    fn record_budget(&self, run: &Run, used: BudgetUsed, limits: &Limits, now: Timestamp) -> Result<EventBody, FlowEngineError> {
        let limits_value = serde_json::to_value(limits).map_err(|err| FlowEngineError::Serialization(err.to_string()))?;
        self.append_event(run, EventBody::TaskBudgetUpdateEvent { used, limits: limits_value }, now)
    }

    /// Upserts the run's materialized summary and triggers a projection
    /// refresh, each gated by its own event-count cadence unless `force`
    /// overrides it (terminal transitions and approval decisions always
    /// force both, matching the persisted-events-and-on-terminal-transitions
    /// snapshot rule and the on-approval-change refresh rule).
    fn project(&self, run: &Run, step_count: u64, force: bool) -> Result<(), FlowEngineError> {
        let event_count = self.event_log.list_since(&run.run_id, 0)?.len() as u64;
        let snapshot_every = u64::from(self.config.snapshot_every.max(1));
        let refresh_every = u64::from(self.config.refresh_mv_every.max(1));

        if force || event_count % snapshot_every == 0 {
            let budget_used = self.budgets.load(&run.run_id)?;
            self.projections.observe(RunSummary {
                run_id: run.run_id.clone(),
                tenant_id: run.tenant_id.clone(),
                state: run_state_str(run.state),
                step_count,
                budget_used,
                updated_at: run.updated_at,
            })?;
        }
        if force || event_count % refresh_every == 0 {
            self.projections.refresh()?;
        }
        Ok(())
    }

    /// Fails the run for a reason not tied to a specific step (policy deny,
    /// approval denial, unmet obligations), persisting the status event.
    fn fail_run(&self, mut run: Run, reason: String, now: Timestamp) -> Result<Run, FlowEngineError> {
        run.transition(RunState::Failed, now);
        self.record_status(&run, &reason, now)?;
        self.project(&run, 0, true)?;
        Ok(run)
    }

    /// Fails the run after recording `result` as a step-result artifact.
    fn fail_step(&self, mut run: Run, result: StepResult, now: Timestamp) -> Result<Run, FlowEngineError> {
        let message = result.error.as_ref().map(|e| e.message.clone()).unwrap_or_default();
        let step_id = result.step_id.clone();
        let artifact = serde_json::to_value(&result).map_err(|err| FlowEngineError::Serialization(err.to_string()))?;
        self.record_artifact(&run, "step_result", artifact, now)?;
        run.transition(RunState::Failed, now);
        self.record_status(&run, &format!("step {step_id} failed: {message}"), now)?;
        self.project(&run, 0, true)?;
        Ok(run)
    }
}

// ============================================================================
// SECTION: Replay Reconstruction
// ============================================================================

/// Returns the first persisted plan artifact, if one has been recorded.
fn find_plan(history: &[EventRecord]) -> Option<Plan> {
    history.iter().find_map(|record| match &record.event.body {
        EventBody::TaskArtifactUpdateEvent { artifact_type, artifact } if artifact_type == "plan" => {
            serde_json::from_value(artifact.clone()).ok()
        }
        _ => None,
    })
}

/// Rebuilds step outputs, succeeded step results, the set of completed step
/// ids, and every previously emitted event body from a run's event history.
type Reconstructed = (BTreeMap<String, Value>, Vec<StepResult>, BTreeSet<StepId>, Vec<EventBody>);

fn reconstruct(history: &[EventRecord]) -> Reconstructed {
    let mut outputs = BTreeMap::new();
    let mut step_results = Vec::new();
    let mut completed = BTreeSet::new();
    let mut emitted = Vec::new();

    for record in history {
        let body = record.event.body.clone();
        if let EventBody::TaskArtifactUpdateEvent { artifact_type, artifact } = &body {
            if artifact_type == "step_result" {
                if let Ok(result) = serde_json::from_value::<StepResult>(artifact.clone()) {
                    if result.status == StepStatus::Succeeded {
                        outputs.insert(result.step_id.as_str().to_string(), result.output.clone().unwrap_or(Value::Null));
                        completed.insert(result.step_id.clone());
                        step_results.push(result);
                    }
                }
            }
        }
        emitted.push(body);
    }

    (outputs, step_results, completed, emitted)
}

// ============================================================================
// SECTION: Argument Resolution
// ============================================================================

/// Recursively substitutes `$sX.output[.path]` string references with values
/// from earlier steps' outputs; any other value is returned unchanged.
fn resolve_args(args: &Value, outputs: &BTreeMap<String, Value>) -> Value {
    match args {
        Value::String(text) => resolve_reference(text, outputs).unwrap_or_else(|| Value::String(text.clone())),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), resolve_args(v, outputs))).collect()),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_args(v, outputs)).collect()),
        other => other.clone(),
    }
}

/// Resolves one `$sX.output[.path]` reference against `outputs`, returning
/// `None` when `expr` is not such a reference or the referenced step/path is
/// absent (in which case the caller keeps the literal string).
fn resolve_reference(expr: &str, outputs: &BTreeMap<String, Value>) -> Option<Value> {
    let rest = expr.strip_prefix('$')?;
    let (step_id, remainder) = rest.split_once('.')?;
    let path = remainder.strip_prefix("output")?;
    let output = outputs.get(step_id)?;
    if path.is_empty() {
        return Some(output.clone());
    }
    let query = format!("${path}");
    let matches = jsonpath_lib::select(output, &query).ok()?;
    matches.first().map(|value| (*value).clone())
}

// ============================================================================
// SECTION: Budget Checking
// ============================================================================

/// Returns a human-readable violation reason if charging `step`/`action`
/// would exceed any configured budget ceiling.
fn budget_violation(current: &BudgetUsed, limits: &Limits, step: &PlanStep, action: &Action) -> Option<String> {
    if let Some(max) = limits.max_tool_calls {
        if current.tool_calls >= max {
            return Some(format!("run budget exhausted: {max} tool calls already used"));
        }
    }
    if let Some(max) = limits.per_tool_max_calls.get(action.tool.as_str()) {
        let used = current.per_tool.get(action.tool.as_str()).copied().unwrap_or(0);
        if used >= *max {
            return Some(format!("tool {} call budget exhausted: {max} calls already used", action.tool));
        }
    }
    if let Some(max) = limits.per_action_max_calls.get(step.action_id.as_str()) {
        let used = current.per_action.get(step.action_id.as_str()).copied().unwrap_or(0);
        if used >= *max {
            return Some(format!("action {} call budget exhausted: {max} calls already used", step.action_id));
        }
    }
    None
}

/// Builds a failed [`StepResult`] carrying `class`/`message`, tagged with the
/// policy ids already matched for this step.
fn failed_result(
    step: &PlanStep,
    action: &Action,
    attempts: u32,
    idempotency_key: String,
    class: ErrorClass,
    message: String,
    patch: &crate::policy::StepPatch,
) -> StepResult {
    StepResult {
        step_id: step.step_id.clone(),
        action_id: step.action_id.clone(),
        tool: action.tool.clone(),
        status: StepStatus::Failed,
        attempts,
        idempotency_key,
        output: None,
        error: Some(StepError { class, message }),
        policy_ids: patch.matched_policy_ids.clone(),
        cache_hit: false,
    }
}

/// Renders a [`RunState`] in its wire string form (e.g. `"input-required"`),
/// matching the serialization used by `EventBody::TaskStatusUpdateEvent`.
fn run_state_str(state: RunState) -> String {
    serde_json::to_value(state).ok().and_then(|value| value.as_str().map(str::to_string)).unwrap_or_else(|| "unknown".to_string())
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
    use crate::core::identifiers::ActionId;
    use crate::core::identifiers::OrgId;
    use crate::core::identifiers::RegistryId;
    use crate::core::identifiers::RetryClassId;
    use crate::core::identifiers::TaskId;
    use crate::core::identifiers::TenantId;
    use crate::core::identifiers::ToolId;
    use crate::core::identifiers::UserId;
    use crate::core::registry::Action as RegistryAction;
    use crate::core::registry::ActionSecurity;
    use crate::core::registry::IdempotencyConfig;
    use crate::core::registry::Policy;
    use crate::core::registry::PolicyPhase;
    use crate::core::registry::RetryClass;
    use crate::core::registry::Tool;
    use crate::interfaces::ToolCallFailure;
    use crate::policy::Condition;
    use crate::policy::Effect;
    use crate::policy::Leaf;
    use crate::runtime::store::InMemoryApprovalStore;
    use crate::runtime::store::InMemoryBillingLedger;
    use crate::runtime::store::InMemoryBudgetStore;
    use crate::runtime::store::InMemoryEventLog;
    use crate::runtime::store::InMemoryJobQueue;
    use crate::runtime::store::InMemoryProjections;
    use crate::runtime::store::InMemoryQuotaStore;
    use crate::runtime::store::InMemoryStepCache;
    use std::collections::BTreeMap as Map;
    use time::OffsetDateTime;

    fn now() -> Timestamp {
        Timestamp::from_offset(OffsetDateTime::now_utc())
    }

    fn keyring() -> Arc<crate::core::AuditKeyring> {
        Arc::new(crate::core::AuditKeyring::new(vec![crate::core::AuditKey {
            kid: crate::core::identifiers::KeyId::new("k1"),
            secret: b"test-secret".to_vec(),
            active: true,
        }]))
    }

    fn task(task_id: &str) -> Task {
        Task {
            task_id: TaskId::new(task_id),
            tenant_id: TenantId::new("tenant-a"),
            user_message: "send the welcome email".to_string(),
            user_id: Some(UserId::new("u1")),
            org_id: Some(OrgId::new("org1")),
            roles: vec!["member".to_string()],
            metadata: Map::new(),
        }
    }

    fn registry_with(actions: Vec<RegistryAction>, policies: Vec<Policy>) -> Registry {
        Registry {
            registry_id: RegistryId::new("r"),
            schema_version: "1".to_string(),
            tools: vec![Tool { tool_id: ToolId::new("email"), tool_ref: "stub:email".to_string() }],
            actions,
            policies,
            retry_classes: vec![RetryClass::default()],
            roles: Map::new(),
            limits: Limits::default(),
        }
    }

    fn email_action() -> RegistryAction {
        RegistryAction {
            action_id: ActionId::new("email.send"),
            tool: ToolId::new("email"),
            timeout_ms: None,
            retry_class: RetryClassId::new("default"),
            idempotency: IdempotencyConfig { mode: IdempotencyMode::HashArgs },
            cost_units: Some(1),
            side_effect: true,
            security: ActionSecurity::default(),
        }
    }

    struct FixedPlanner {
        plan: Plan,
    }

    impl Planner for FixedPlanner {
        fn plan(&self, _task: &Task, _registry: &Registry) -> Result<Plan, PlannerError> {
            Ok(self.plan.clone())
        }
    }

    /// Planner that also reports `select_nodes`/`last_usage`, for exercising
    /// the staged pipeline's LLM usage accounting.
    struct MeteredPlanner {
        plan: Plan,
        usage: crate::interfaces::PlannerUsage,
    }

    impl Planner for MeteredPlanner {
        fn select_nodes(
            &self,
            _task: &Task,
            _trees: &Value,
            _policies: &[crate::core::registry::Policy],
        ) -> Result<Vec<String>, PlannerError> {
            Ok(vec!["root.onboarding".to_string()])
        }

        fn plan(&self, _task: &Task, _registry: &Registry) -> Result<Plan, PlannerError> {
            Ok(self.plan.clone())
        }

        fn last_usage(&self) -> crate::interfaces::PlannerUsage {
            self.usage
        }
    }

    struct StubTool {
        output: Value,
    }

    impl ToolContract for StubTool {
        fn call(&self, _tool: &Tool, _action: &RegistryAction, _args: &Value, _ctx: &ToolCallContext) -> Result<Value, ToolCallFailure> {
            Ok(self.output.clone())
        }
    }

    struct FailingTool;

    impl ToolContract for FailingTool {
        fn call(&self, _tool: &Tool, _action: &RegistryAction, _args: &Value, _ctx: &ToolCallContext) -> Result<Value, ToolCallFailure> {
            Err(ToolCallFailure { message: "403 forbidden".to_string(), type_name: "PermissionError".to_string() })
        }
    }

    struct CountingTool {
        calls: Arc<std::sync::atomic::AtomicU32>,
    }

    impl ToolContract for CountingTool {
        fn call(&self, _tool: &Tool, _action: &RegistryAction, _args: &Value, _ctx: &ToolCallContext) -> Result<Value, ToolCallFailure> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(serde_json::json!({"ok": true}))
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
            Arc::new(FixedPlanner { plan }),
            tools,
            FlowEngineConfig { llm_model: "gpt-test".to_string(), ..FlowEngineConfig::default() },
        )
    }

    #[test]
    fn happy_path_completes_a_single_step_run() {
        let plan = Plan {
            steps: vec![plan_step("s1", "email.send", serde_json::json!({"to": "a@example.com", "idempotency_key": "k-t1"}))],
            ..Plan::default()
        };
        let registry = registry_with(vec![email_action()], Vec::new());
        let engine = build_engine(plan, Arc::new(StubTool { output: serde_json::json!({"message_id": "m1"}) }));
        let run = engine.submit(task("t1"), now()).unwrap();
        let run = engine.advance(run, &registry, now()).unwrap();
        assert_eq!(run.state, RunState::Completed);
    }

    #[test]
    fn policy_deny_fails_the_run_without_calling_the_tool() {
        let plan = Plan {
            steps: vec![plan_step("s1", "email.send", Value::Null)],
            ..Plan::default()
        };
        let policies = vec![Policy {
            policy_id: crate::core::identifiers::PolicyId::new("deny-email"),
            priority: 10,
            phase: PolicyPhase::Exec,
            when: Condition::Leaf(Leaf::Action("email.*".to_string())),
            effect: Effect { deny: Some("email disabled".to_string()), ..Effect::default() },
        }];
        let registry = registry_with(vec![email_action()], policies);
        let engine = build_engine(plan, Arc::new(FailingTool));
        let run = engine.submit(task("t2"), now()).unwrap();
        let run = engine.advance(run, &registry, now()).unwrap();
        assert_eq!(run.state, RunState::Failed);
    }

    #[test]
    fn approval_required_blocks_until_decided() {
        let plan = Plan {
            steps: vec![plan_step("s1", "email.send", serde_json::json!({"to": "a@example.com", "idempotency_key": "k-t3"}))],
            ..Plan::default()
        };
        let policies = vec![Policy {
            policy_id: crate::core::identifiers::PolicyId::new("approve-email"),
            priority: 5,
            phase: PolicyPhase::Exec,
            when: Condition::Leaf(Leaf::Tool("email".to_string())),
            effect: Effect { require_approval: true, ..Effect::default() },
        }];
        let registry = registry_with(vec![email_action()], policies);
        let engine = build_engine(plan, Arc::new(StubTool { output: Value::Null }));
        let run = engine.submit(task("t3"), now()).unwrap();
        let run = engine.advance(run, &registry, now()).unwrap();
        assert_eq!(run.state, RunState::InputRequired);

        let approval_id = Approval::id_for_run(&run.run_id);
        engine
            .approvals()
            .decide(
                &approval_id,
                crate::core::ApprovalDecision {
                    decision: ApprovalVerdict::Approved,
                    by: "alice".to_string(),
                    ts: now(),
                    reason: None,
                },
            )
            .unwrap();
        let run = engine.advance(run, &registry, now()).unwrap();
        assert_eq!(run.state, RunState::Completed);
    }

    #[test]
    fn approval_timeout_synthesizes_a_system_denial() {
        let plan = Plan {
            steps: vec![plan_step("s1", "email.send", serde_json::json!({"to": "a@example.com", "idempotency_key": "k-timeout"}))],
            ..Plan::default()
        };
        let policies = vec![Policy {
            policy_id: crate::core::identifiers::PolicyId::new("approve-email"),
            priority: 5,
            phase: PolicyPhase::Exec,
            when: Condition::Leaf(Leaf::Tool("email".to_string())),
            effect: Effect { require_approval: true, ..Effect::default() },
        }];
        let registry = registry_with(vec![email_action()], policies);
        let engine = FlowEngine::new(
            InMemoryEventLog::new(keyring()),
            InMemoryStepCache::new(),
            InMemoryApprovalStore::new(),
            InMemoryBudgetStore::new(),
            InMemoryQuotaStore::new(),
            InMemoryJobQueue::new(4),
            InMemoryProjections::new(),
            InMemoryBillingLedger::new(),
            Arc::new(FixedPlanner { plan }),
            Arc::new(StubTool { output: Value::Null }),
            FlowEngineConfig {
                llm_model: "gpt-test".to_string(),
                approval_timeout_secs: 60,
                ..FlowEngineConfig::default()
            },
        );
        let t0 = now();
        let run = engine.submit(task("t-timeout"), t0).unwrap();
        let run = engine.advance(run, &registry, t0).unwrap();
        assert_eq!(run.state, RunState::InputRequired);

        let t1 = Timestamp::from_offset(
            OffsetDateTime::parse(t0.as_str(), &time::format_description::well_known::Rfc3339).unwrap()
                + time::Duration::seconds(120),
        );
        let run = engine.advance(run, &registry, t1).unwrap();
        assert_eq!(run.state, RunState::Failed);

        let approval_id = Approval::id_for_run(&run.run_id);
        let approval = engine.approvals().get(&approval_id).unwrap().unwrap();
        let decision = approval.decision.unwrap();
        assert_eq!(decision.decision, ApprovalVerdict::Denied);
        assert_eq!(decision.by, "system");
    }

    #[test]
    fn failed_tool_call_fails_the_run_with_classified_error() {
        let plan = Plan {
            steps: vec![plan_step("s1", "email.send", serde_json::json!({"idempotency_key": "k-t4"}))],
            ..Plan::default()
        };
        let registry = registry_with(vec![email_action()], Vec::new());
        let engine = build_engine(plan, Arc::new(FailingTool));
        let run = engine.submit(task("t4"), now()).unwrap();
        let run = engine.advance(run, &registry, now()).unwrap();
        assert_eq!(run.state, RunState::Failed);
    }

    #[test]
    fn crash_replay_skips_already_completed_steps() {
        let plan = Plan {
            steps: vec![
                plan_step("s1", "email.send", serde_json::json!({"to": "a@example.com", "idempotency_key": "k-t5-s1"})),
                plan_step("s2", "email.send", serde_json::json!({"to": "b@example.com", "idempotency_key": "k-t5-s2"})),
            ],
            ..Plan::default()
        };
        let registry = registry_with(vec![email_action()], Vec::new());
        let engine = build_engine(plan, Arc::new(StubTool { output: serde_json::json!({"ok": true}) }));
        let run = engine.submit(task("t5"), now()).unwrap();
        let run = engine.advance(run, &registry, now()).unwrap();
        assert_eq!(run.state, RunState::Completed);

        // Re-advancing a completed run is a no-op; re-advancing a run still
        // in flight against the same event history would likewise skip every
        // step already recorded as succeeded rather than re-invoking the tool.
        let run_again = engine.advance(run, &registry, now()).unwrap();
        assert_eq!(run_again.state, RunState::Completed);
    }

    #[test]
    fn crash_after_step_raises_and_resume_skips_the_completed_side_effect() {
        let plan = Plan {
            steps: vec![
                plan_step("s1", "email.send", serde_json::json!({"to": "a@example.com", "idempotency_key": "k-t5-crash-s1"})),
                plan_step("s2", "email.send", serde_json::json!({"to": "b@example.com", "idempotency_key": "k-t5-crash-s2"})),
            ],
            ..Plan::default()
        };
        let registry = registry_with(vec![email_action()], Vec::new());
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let engine = build_engine(plan, Arc::new(CountingTool { calls: calls.clone() }));

        let mut crashing = task("t5-crash");
        crashing.metadata.insert("crash_after_step".to_string(), serde_json::json!("s1"));
        let run = engine.submit(crashing, now()).unwrap();
        let err = engine.advance(run, &registry, now()).unwrap_err();
        assert!(matches!(err, FlowEngineError::SimulatedCrash { ref step_id } if step_id == "s1"));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        // Resume with the crash metadata cleared, reusing the same run id so
        // the replay reconstructs s1 as already completed from the log.
        let resumed = Run::new(RunId::new("run_t5-crash"), task("t5-crash"), now());
        let resumed = engine.advance(resumed, &registry, now()).unwrap();
        assert_eq!(resumed.state, RunState::Completed);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn planning_stage_charges_budget_quota_and_billing_ledger() {
        let plan = Plan {
            steps: vec![plan_step("s1", "email.send", serde_json::json!({"to": "a@example.com", "idempotency_key": "k-t6"}))],
            ..Plan::default()
        };
        let limits = Limits { llm_call_cost_units: Some(3), daily_cost_unit_quota: Some(1_000), ..Limits::default() };
        let registry = Registry { limits, ..registry_with(vec![email_action()], Vec::new()) };

        let metered = MeteredPlanner {
            plan,
            usage: crate::interfaces::PlannerUsage {
                prompt_chars: 400,
                response_chars: 200,
                ..crate::interfaces::PlannerUsage::default()
            },
        };
        let engine: TestEngine = FlowEngine::new(
            InMemoryEventLog::new(keyring()),
            InMemoryStepCache::new(),
            InMemoryApprovalStore::new(),
            InMemoryBudgetStore::new(),
            InMemoryQuotaStore::new(),
            InMemoryJobQueue::new(4),
            InMemoryProjections::new(),
            InMemoryBillingLedger::new(),
            Arc::new(metered),
            Arc::new(StubTool { output: serde_json::json!({"message_id": "m1"}) }),
            FlowEngineConfig { llm_model: "gpt-test".to_string(), ..FlowEngineConfig::default() },
        );

        let run = engine.submit(task("t6"), now()).unwrap();
        let run = engine.advance(run, &registry, now()).unwrap();
        assert_eq!(run.state, RunState::Completed);

        let rows = engine.billing().rows();
        let kinds: Vec<_> = rows.iter().map(|row| row.kind.as_str()).collect();
        assert_eq!(kinds, vec!["llm_select_nodes", "llm_plan"]);
        assert!(rows.iter().all(|row| row.cost_units == 3));
        assert_eq!(rows[0].tokens, Some(150));
    }

    #[test]
    fn argument_reference_resolves_prior_step_output() {
        let mut outputs = BTreeMap::new();
        outputs.insert("s1".to_string(), serde_json::json!({"message_id": "m1", "nested": {"id": 7}}));
        let resolved = resolve_args(&serde_json::json!({"ref": "$s1.output.message_id", "deep": "$s1.output.nested.id"}), &outputs);
        assert_eq!(resolved["ref"], serde_json::json!("m1"));
        assert_eq!(resolved["deep"], serde_json::json!(7));
    }
}
