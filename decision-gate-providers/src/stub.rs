// decision-gate-providers/src/stub.rs
// ============================================================================
// Module: Stub Planner
// Description: Deterministic in-memory planner for tests and seed scenarios.
// Purpose: Give a host process a plan source with no network dependency.
// Dependencies: decision-gate-core
// ============================================================================

//! ## Overview
//! [`StubPlanner`] returns a fixed [`Plan`] regardless of the task it is
//! given, or derives one mechanically from the registry's declared actions
//! when no fixed plan was configured. It never calls out to a network
//! service, making it suitable for seed scenarios and deterministic tests.

use decision_gate_core::Action;
use decision_gate_core::Plan;
use decision_gate_core::PlanStep;
use decision_gate_core::Planner;
use decision_gate_core::PlannerError;
use decision_gate_core::Registry;
use decision_gate_core::StepId;
use decision_gate_core::Task;
use serde_json::Value;

/// Planner that returns a fixed plan, or one step per declared action.
#[derive(Debug, Clone, Default)]
pub struct StubPlanner {
    fixed_plan: Option<Plan>,
}

impl StubPlanner {
    /// Creates a planner that derives a plan from the registry's actions,
    /// one step per action in declaration order, with empty arguments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a planner that always returns `plan`, ignoring the task and registry.
    #[must_use]
    pub fn with_fixed_plan(plan: Plan) -> Self {
        Self {
            fixed_plan: Some(plan),
        }
    }

    fn derive_plan(registry: &Registry) -> Plan {
        let steps = registry
            .actions
            .iter()
            .enumerate()
            .map(|(index, action): (usize, &Action)| PlanStep {
                step_id: StepId::new(format!("s{}", index + 1)),
                action_id: action.action_id.clone(),
                args: Value::Object(serde_json::Map::new()),
                requires_approval: None,
                cost_units_override: None,
                policy_ids: Vec::new(),
            })
            .collect();
        Plan {
            steps,
            ..Plan::default()
        }
    }
}

impl Planner for StubPlanner {
    fn plan(&self, _task: &Task, registry: &Registry) -> Result<Plan, PlannerError> {
        Ok(self.fixed_plan.clone().unwrap_or_else(|| Self::derive_plan(registry)))
    }
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
    use std::collections::BTreeMap;

    use decision_gate_core::ActionId;
    use decision_gate_core::ActionSecurity;
    use decision_gate_core::IdempotencyConfig;
    use decision_gate_core::IdempotencyMode;
    use decision_gate_core::RegistryId;
    use decision_gate_core::RetryClassId;
    use decision_gate_core::TaskId;
    use decision_gate_core::TenantId;
    use decision_gate_core::ToolId;

    use super::*;

    fn task() -> Task {
        Task {
            task_id: TaskId::new("task-1"),
            tenant_id: TenantId::new("tenant-1"),
            user_message: "send a welcome email".to_string(),
            user_id: None,
            org_id: None,
            roles: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    fn registry_with_one_action() -> Registry {
        Registry {
            registry_id: RegistryId::new("base"),
            schema_version: "1".to_string(),
            tools: Vec::new(),
            actions: vec![Action {
                action_id: ActionId::new("email.send"),
                tool: ToolId::new("email"),
                timeout_ms: None,
                retry_class: RetryClassId::new("default"),
                idempotency: IdempotencyConfig {
                    mode: IdempotencyMode::HashArgs,
                },
                cost_units: None,
                side_effect: true,
                security: ActionSecurity::default(),
            }],
            policies: Vec::new(),
            retry_classes: Vec::new(),
            roles: BTreeMap::new(),
            limits: Default::default(),
        }
    }

    #[test]
    fn stub_planner_derives_one_step_per_action() {
        let planner = StubPlanner::new();
        let plan = planner.plan(&task(), &registry_with_one_action()).expect("plan");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].action_id.as_str(), "email.send");
        assert_eq!(plan.steps[0].step_id.as_str(), "s1");
    }

    #[test]
    fn stub_planner_returns_fixed_plan_regardless_of_registry() {
        let fixed = Plan {
            steps: vec![PlanStep {
                step_id: StepId::new("s1"),
                action_id: ActionId::new("ticket.create"),
                args: Value::Object(serde_json::Map::new()),
                requires_approval: None,
                cost_units_override: None,
                policy_ids: Vec::new(),
            }],
            ..Plan::default()
        };
        let planner = StubPlanner::with_fixed_plan(fixed.clone());
        let plan = planner.plan(&task(), &registry_with_one_action()).expect("plan");
        assert_eq!(plan, fixed);
    }
}
