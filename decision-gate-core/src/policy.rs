// decision-gate-core/src/policy.rs
// ============================================================================
// Module: Policy Engine
// Description: Condition algebra, effective limits, and per-step gate evaluation.
// Purpose: Compose registry policies into a patch (deny/approval/cost/obligations)
//          for each plan step.
// Dependencies: globset, serde, crate::{core, registry}
// ============================================================================

//! ## Overview
//! The condition language is a small Boolean algebra over glob-matched action
//! and tool names and role membership, shaped after the teacher's universal
//! `Requirement<P>` composition (`all`/`any`/`not` over a domain-specific
//! leaf) but evaluated directly: this domain has no partial evidence, so a
//! plain recursive `bool` evaluation is both simpler and exact, and none of
//! the row/batch machinery built for evidence evaluation applies here.

use std::collections::BTreeSet;

use globset::Glob;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::ActionId;
use crate::core::identifiers::PolicyId;
use crate::core::identifiers::ToolId;
use crate::core::model::ErrorClass;
use crate::core::registry::Limits;
use crate::core::registry::Policy;
use crate::core::registry::PolicyPhase;
use crate::core::registry::Registry;

// ============================================================================
// SECTION: Condition Language
// ============================================================================

/// A leaf predicate over one plan step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leaf {
    /// Matches when the step's `action_id` matches the glob.
    Action(String),
    /// Matches when the step's bound `tool_id` matches the glob.
    Tool(String),
    /// Matches when the principal has at least one of the listed roles.
    RolesAny(Vec<String>),
    /// Matches when the principal has all of the listed roles.
    RolesAll(Vec<String>),
}

/// A composable condition tree. Leaves are [`Leaf`]; `all`/`any`/`not` are the
/// universal Boolean combinators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// Logical AND. An empty list is trivially satisfied.
    All(Vec<Condition>),
    /// Logical OR. An empty list is trivially unsatisfied.
    Any(Vec<Condition>),
    /// Logical NOT.
    Not(Box<Condition>),
    /// A leaf predicate.
    Leaf(Leaf),
}

/// Context a condition is evaluated against.
pub struct StepContext<'a> {
    /// The step's action id.
    pub action_id: &'a ActionId,
    /// The step's bound tool id.
    pub tool_id: &'a ToolId,
    /// Roles asserted by the submitting principal.
    pub roles: &'a [String],
}

impl Condition {
    /// Evaluates this condition against `ctx`.
    ///
    /// Malformed globs are treated as non-matching rather than erroring, so a
    /// single bad policy document degrades to fail-open on that rule only;
    /// registry validation is the place to reject bad globs up front.
    #[must_use]
    pub fn eval(&self, ctx: &StepContext<'_>) -> bool {
        match self {
            Self::All(conds) => conds.iter().all(|c| c.eval(ctx)),
            Self::Any(conds) => conds.iter().any(|c| c.eval(ctx)),
            Self::Not(cond) => !cond.eval(ctx),
            Self::Leaf(Leaf::Action(pattern)) => glob_matches(pattern, ctx.action_id.as_str()),
            Self::Leaf(Leaf::Tool(pattern)) => glob_matches(pattern, ctx.tool_id.as_str()),
            Self::Leaf(Leaf::RolesAny(roles)) => roles.iter().any(|r| ctx.roles.contains(r)),
            Self::Leaf(Leaf::RolesAll(roles)) => roles.iter().all(|r| ctx.roles.contains(r)),
        }
    }
}

fn glob_matches(pattern: &str, candidate: &str) -> bool {
    Glob::new(pattern).map(|g| g.compile_matcher().is_match(candidate)).unwrap_or(false)
}

// ============================================================================
// SECTION: Effects and Obligations
// ============================================================================

/// A plan-wide assertion checked after execution.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Obligation {
    /// At least one `TaskArtifactUpdateEvent` of `artifact_type` must appear
    /// before the run reaches a terminal state.
    MustEmitArtifact {
        /// Required artifact type.
        artifact_type: String,
    },
    /// Every side-effecting step result must carry `policy_id` in its
    /// `policy_ids`.
    MustReferencePolicyId {
        /// Required policy id.
        policy_id: String,
    },
    /// An obligation kind the core does not interpret; retained verbatim and
    /// surfaced as a non-fatal observability failure.
    Unrecognized(Value),
}

/// The effect a matched policy rule applies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    /// Deny the step outright, with a human-readable reason.
    pub deny: Option<String>,
    /// Require an approval decision before the step runs.
    #[serde(default)]
    pub require_approval: bool,
    /// Override the step's cost-unit charge.
    pub set_cost_units: Option<u64>,
    /// Obligations to attach to the plan.
    #[serde(default)]
    pub obligations: Vec<Obligation>,
}

// ============================================================================
// SECTION: Gate Patch
// ============================================================================

/// The outcome of evaluating one plan step against all matching policies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepPatch {
    /// Present when the step must not execute.
    pub deny_reason: Option<String>,
    /// Whether the step requires an approval decision.
    pub requires_approval: bool,
    /// Overridden cost-unit charge, if any rule set one.
    pub cost_units_override: Option<u64>,
    /// Obligations attached by matched rules, in match order.
    pub obligations: Vec<Obligation>,
    /// Ids of every rule that matched this step, in priority order.
    pub matched_policy_ids: Vec<PolicyId>,
}

impl StepPatch {
    /// Returns true when the step must not execute.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        self.deny_reason.is_some()
    }
}

/// Errors raised by the policy engine.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The step referenced an action that is not declared in the registry.
    #[error("unknown action: {0}")]
    UnknownAction(String),
}

// ============================================================================
// SECTION: Policy Engine
// ============================================================================

/// Stateless evaluator over one effective [`Registry`].
pub struct PolicyEngine<'a> {
    registry: &'a Registry,
}

impl<'a> PolicyEngine<'a> {
    /// Wraps a registry for gating.
    #[must_use]
    pub const fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
        }
    }

    /// Merges tenant limits with registry limits, registry winning per-key.
    #[must_use]
    pub fn compile_effective_limits(&self, tenant_limits: &Limits) -> Limits {
        tenant_limits.merged_with_registry(&self.registry.limits)
    }

    /// Returns policies in `phase` sorted by descending priority, matching the
    /// reference implementation's rule ordering.
    fn rules_for_phase(&self, phase: &PolicyPhase) -> Vec<&Policy> {
        let mut rules: Vec<&Policy> =
            self.registry.policies.iter().filter(|p| &p.phase == phase).collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        rules
    }

    /// Evaluates one plan step against the `exec` phase, producing a
    /// [`StepPatch`].
    ///
    /// Precedence: (1) step-local RBAC deny if the principal's roles are
    /// disjoint from `action.security.allowed_roles`; (2) for each matched
    /// rule in priority order, `deny` short-circuits, `require_approval` sets
    /// a flag, `set_cost_units` sets an override, and `obligations` append.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::UnknownAction`] when `action_id` is not declared.
    pub fn evaluate_step_policy(
        &self,
        action_id: &ActionId,
        roles: &[String],
    ) -> Result<StepPatch, PolicyError> {
        let action = self
            .registry
            .find_action(action_id)
            .ok_or_else(|| PolicyError::UnknownAction(action_id.as_str().to_string()))?;

        let mut patch = StepPatch::default();

        if !action.security.allowed_roles.is_empty()
            && !action.security.allowed_roles.iter().any(|r| roles.contains(r))
        {
            patch.deny_reason = Some(format!(
                "role mismatch: action {} requires one of {:?}",
                action_id, action.security.allowed_roles
            ));
            return Ok(patch);
        }

        if action.security.requires_approval {
            patch.requires_approval = true;
        }

        let ctx = StepContext {
            action_id,
            tool_id: &action.tool,
            roles,
        };

        for rule in self.rules_for_phase(&PolicyPhase::Exec) {
            if !rule.when.eval(&ctx) {
                continue;
            }
            patch.matched_policy_ids.push(rule.policy_id.clone());

            if let Some(reason) = &rule.effect.deny {
                patch.deny_reason = Some(reason.clone());
                return Ok(patch);
            }
            if rule.effect.require_approval {
                patch.requires_approval = true;
            }
            if let Some(cost_units) = rule.effect.set_cost_units {
                patch.cost_units_override = Some(cost_units);
            }
            patch.obligations.extend(rule.effect.obligations.iter().cloned());
        }

        dedupe_obligations(&mut patch.obligations);
        Ok(patch)
    }
}

fn dedupe_obligations(obligations: &mut Vec<Obligation>) {
    let mut seen = BTreeSet::new();
    obligations.retain(|ob| {
        let canonical = serde_json::to_string(ob).unwrap_or_default();
        seen.insert(canonical)
    });
}

// ============================================================================
// SECTION: Obligation Checking
// ============================================================================

use crate::core::model::EventBody;
use crate::core::model::StepResult;

/// A single obligation that failed verification after execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObligationFailure {
    /// The obligation that was not satisfied.
    pub obligation: Obligation,
    /// Human-readable explanation.
    pub reason: String,
    /// Unrecognized obligation kinds are retained for observability but never
    /// fail a run; everything else is fatal.
    pub fatal: bool,
}

const SIDE_EFFECT_ACTION_MARKERS: [&str; 7] = ["send", "create", "write", "delete", "update", "charge", "refund"];
const SIDE_EFFECT_TOOL_MARKERS: [&str; 4] = ["email", "gmail", "calendar", "crm"];

/// Whether an action/tool pair is side-effecting: flagged `side_effect: true`
/// on the registry action, or its action or tool name matches one of the
/// reference implementation's marker substrings
/// (`send`/`create`/`write`/`delete`/`update`/`charge`/`refund` for actions,
/// `email`/`gmail`/`calendar`/`crm` for tools). Shared by the step executor's
/// idempotency-key guard (§4.4 step 3) and the `must_reference_policy_id`
/// obligation scope below, which both need the same classification from
/// different inputs.
#[must_use]
pub fn is_side_effecting(side_effect_flag: bool, action_id: &str, tool: &str) -> bool {
    if side_effect_flag {
        return true;
    }
    let action_id = action_id.to_ascii_lowercase();
    let tool = tool.to_ascii_lowercase();
    SIDE_EFFECT_ACTION_MARKERS.iter().any(|marker| action_id.contains(marker))
        || SIDE_EFFECT_TOOL_MARKERS.iter().any(|marker| tool.contains(marker))
}

/// Whether a step result reflects a side-effecting action, used to scope
/// `must_reference_policy_id`.
fn is_side_effect(result: &StepResult, registry: &Registry) -> bool {
    let side_effect_flag = registry.find_action(&result.action_id).is_some_and(|action| action.side_effect);
    is_side_effecting(side_effect_flag, result.action_id.as_str(), result.tool.as_str())
}

/// Checks plan-wide obligations against the emitted artifact events and the
/// recorded step results, matching the reference implementation's
/// post-execution obligation scan.
///
/// `registry` is consulted, alongside action/tool name markers, to decide
/// which step results are side-effecting so `must_reference_policy_id` is
/// only enforced against the steps the obligation actually describes.
#[must_use]
pub fn check_obligations(
    obligations: &[Obligation],
    emitted_events: &[EventBody],
    step_results: &[StepResult],
    registry: &Registry,
) -> Vec<ObligationFailure> {
    let mut failures = Vec::new();
    for obligation in obligations {
        match obligation {
            Obligation::MustEmitArtifact {
                artifact_type,
            } => {
                let satisfied = emitted_events.iter().any(|event| {
                    matches!(
                        event,
                        EventBody::TaskArtifactUpdateEvent { artifact_type: emitted, .. }
                            if emitted == artifact_type
                    )
                });
                if !satisfied {
                    failures.push(ObligationFailure {
                        obligation: obligation.clone(),
                        reason: format!("no artifact of type {artifact_type} was emitted"),
                        fatal: true,
                    });
                }
            }
            Obligation::MustReferencePolicyId {
                policy_id,
            } => {
                for result in step_results {
                    if !is_side_effect(result, registry) {
                        continue;
                    }
                    let referenced = result.policy_ids.iter().any(|p| p.as_str() == policy_id);
                    if !referenced {
                        failures.push(ObligationFailure {
                            obligation: obligation.clone(),
                            reason: format!(
                                "side-effect step {} did not reference required policy id {policy_id}",
                                result.step_id
                            ),
                            fatal: true,
                        });
                    }
                }
            }
            Obligation::Unrecognized(value) => {
                failures.push(ObligationFailure {
                    obligation: obligation.clone(),
                    reason: format!("unrecognized obligation kind: {value}"),
                    fatal: false,
                });
            }
        }
    }
    failures
}

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
    use crate::core::identifiers::RegistryId;
    use crate::core::identifiers::RetryClassId;
    use crate::core::registry::Action;
    use crate::core::registry::ActionSecurity;
    use crate::core::registry::IdempotencyConfig;
    use crate::core::registry::IdempotencyMode;
    use crate::core::registry::RetryClass;
    use crate::core::registry::Tool;
    use std::collections::BTreeMap;

    fn registry_with_policies(policies: Vec<Policy>) -> Registry {
        Registry {
            registry_id: RegistryId::new("r"),
            schema_version: "1".to_string(),
            tools: vec![Tool {
                tool_id: ToolId::new("email"),
                tool_ref: "stub:email".to_string(),
            }],
            actions: vec![Action {
                action_id: ActionId::new("email.send"),
                tool: ToolId::new("email"),
                timeout_ms: None,
                retry_class: RetryClassId::new("default"),
                idempotency: IdempotencyConfig {
                    mode: IdempotencyMode::HashArgs,
                },
                cost_units: Some(1),
                side_effect: true,
                security: ActionSecurity::default(),
            }],
            policies,
            retry_classes: vec![RetryClass::default()],
            roles: BTreeMap::new(),
            limits: Limits::default(),
        }
    }

    #[test]
    fn deny_rule_short_circuits() {
        let registry = registry_with_policies(vec![Policy {
            policy_id: PolicyId::new("deny-email"),
            priority: 10,
            phase: PolicyPhase::Exec,
            when: Condition::Leaf(Leaf::Action("email.*".to_string())),
            effect: Effect {
                deny: Some("email disabled".to_string()),
                ..Effect::default()
            },
        }]);
        let engine = PolicyEngine::new(&registry);
        let patch = engine.evaluate_step_policy(&ActionId::new("email.send"), &[]).unwrap();
        assert!(patch.is_denied());
        assert_eq!(patch.matched_policy_ids, vec![PolicyId::new("deny-email")]);
    }

    #[test]
    fn require_approval_rule_sets_flag_without_denying() {
        let registry = registry_with_policies(vec![Policy {
            policy_id: PolicyId::new("approve-email"),
            priority: 5,
            phase: PolicyPhase::Exec,
            when: Condition::Leaf(Leaf::Tool("email".to_string())),
            effect: Effect {
                require_approval: true,
                ..Effect::default()
            },
        }]);
        let engine = PolicyEngine::new(&registry);
        let patch = engine.evaluate_step_policy(&ActionId::new("email.send"), &[]).unwrap();
        assert!(!patch.is_denied());
        assert!(patch.requires_approval);
    }

    #[test]
    fn rbac_mismatch_denies_before_rules_run() {
        let mut registry = registry_with_policies(Vec::new());
        registry.actions[0].security.allowed_roles = vec!["ops".to_string()];
        let engine = PolicyEngine::new(&registry);
        let patch =
            engine.evaluate_step_policy(&ActionId::new("email.send"), &["guest".to_string()]).unwrap();
        assert!(patch.is_denied());
    }

    #[test]
    fn obligation_must_emit_artifact_reports_failure_when_missing() {
        let registry = registry_with_policies(Vec::new());
        let obligations =
            vec![Obligation::MustEmitArtifact { artifact_type: "reply_draft".to_string() }];
        let failures = check_obligations(&obligations, &[], &[], &registry);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].fatal);
    }

    #[test]
    fn obligation_must_reference_policy_id_ignores_non_side_effecting_steps() {
        let registry = registry_with_policies(Vec::new());
        let obligations =
            vec![Obligation::MustReferencePolicyId { policy_id: PolicyId::new("approve-email") }];
        let read_only = StepResult {
            step_id: crate::core::identifiers::StepId::new("s1"),
            action_id: ActionId::new("lookup.read"),
            tool: ToolId::new("lookup"),
            status: crate::core::model::StepStatus::Succeeded,
            attempts: 1,
            idempotency_key: "idem_1".to_string(),
            output: None,
            error: None,
            policy_ids: Vec::new(),
            cache_hit: false,
        };
        let failures = check_obligations(&obligations, &[], &[read_only], &registry);
        assert!(failures.is_empty());
    }

    #[test]
    fn obligation_must_reference_policy_id_fails_unannotated_side_effect_step() {
        let registry = registry_with_policies(Vec::new());
        let obligations =
            vec![Obligation::MustReferencePolicyId { policy_id: PolicyId::new("approve-email") }];
        let side_effecting = StepResult {
            step_id: crate::core::identifiers::StepId::new("s1"),
            action_id: ActionId::new("email.send"),
            tool: ToolId::new("email"),
            status: crate::core::model::StepStatus::Succeeded,
            attempts: 1,
            idempotency_key: "idem_1".to_string(),
            output: None,
            error: None,
            policy_ids: Vec::new(),
            cache_hit: false,
        };
        let failures = check_obligations(&obligations, &[], &[side_effecting], &registry);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].fatal);
    }

    #[test]
    fn obligation_unrecognized_kind_is_reported_but_not_fatal() {
        let registry = registry_with_policies(Vec::new());
        let obligations = vec![Obligation::Unrecognized(serde_json::json!({"kind": "future_thing"}))];
        let failures = check_obligations(&obligations, &[], &[], &registry);
        assert_eq!(failures.len(), 1);
        assert!(!failures[0].fatal);
    }
}
