// decision-gate-broker/src/router.rs
// ============================================================================
// Module: Tool Contract Router
// Description: Dispatches tool calls to a concrete contract by tool_ref scheme.
// Purpose: Let a host process register one or more transports and present them
//          to the kernel as a single `ToolContract`.
// Dependencies: decision-gate-core
// ============================================================================

//! ## Overview
//! A [`Tool::tool_ref`] is an opaque string whose scheme (the part before the
//! first `:`) identifies which transport should handle it — `http:`/`https:`
//! for [`crate::HttpToolContract`], `stub:` for [`crate::StubToolContract`],
//! or any other scheme a host process registers. [`ToolContractRouter`] holds
//! one boxed contract per scheme and dispatches by looking up the `tool_ref`'s
//! scheme prefix, failing closed when no transport is registered for it.
//!
//! [`Tool::tool_ref`]: decision_gate_core::Tool

use std::collections::BTreeMap;

use decision_gate_core::Action;
use decision_gate_core::Tool;
use decision_gate_core::ToolCallContext;
use decision_gate_core::ToolCallFailure;
use decision_gate_core::ToolContract;
use serde_json::Value;

/// Routes tool calls to a registered contract by `tool_ref` scheme.
#[derive(Default)]
pub struct ToolContractRouter {
    routes: BTreeMap<String, Box<dyn ToolContract + Send + Sync>>,
}

impl ToolContractRouter {
    /// Creates a router with no registered schemes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `contract` as the handler for `tool_ref` values beginning
    /// with `scheme:`. A later call for the same scheme replaces the earlier one.
    #[must_use]
    pub fn with_route(mut self, scheme: impl Into<String>, contract: Box<dyn ToolContract + Send + Sync>) -> Self {
        self.routes.insert(scheme.into(), contract);
        self
    }

    fn scheme_of(tool_ref: &str) -> Option<&str> {
        tool_ref.split_once(':').map(|(scheme, _rest)| scheme)
    }
}

impl ToolContract for ToolContractRouter {
    fn call(
        &self,
        tool: &Tool,
        action: &Action,
        args: &Value,
        ctx: &ToolCallContext,
    ) -> Result<Value, ToolCallFailure> {
        let scheme = Self::scheme_of(&tool.tool_ref).ok_or_else(|| ToolCallFailure {
            message: format!("tool_ref has no scheme: {}", tool.tool_ref),
            type_name: "UnroutableToolRef".to_string(),
        })?;
        let contract = self.routes.get(scheme).ok_or_else(|| ToolCallFailure {
            message: format!("no tool contract registered for scheme {scheme}"),
            type_name: "UnroutableToolRef".to_string(),
        })?;
        contract.call(tool, action, args, ctx)
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
    use decision_gate_core::ActionId;
    use decision_gate_core::ActionSecurity;
    use decision_gate_core::IdempotencyConfig;
    use decision_gate_core::IdempotencyMode;
    use decision_gate_core::RetryClassId;
    use decision_gate_core::RunId;
    use decision_gate_core::StepId;
    use decision_gate_core::TenantId;
    use decision_gate_core::ToolId;

    use super::*;
    use crate::stub::StubToolContract;

    fn action() -> Action {
        Action {
            action_id: ActionId::new("a1"),
            tool: ToolId::new("t1"),
            timeout_ms: None,
            retry_class: RetryClassId::new("default"),
            idempotency: IdempotencyConfig {
                mode: IdempotencyMode::HashArgs,
            },
            cost_units: None,
            side_effect: false,
            security: ActionSecurity::default(),
        }
    }

    fn ctx() -> ToolCallContext {
        ToolCallContext {
            tenant_id: TenantId::new("tenant-1"),
            run_id: RunId::new("run-1"),
            step_id: StepId::new("s1"),
            idempotency_key: None,
            timeout_ms: 1_000,
        }
    }

    #[test]
    fn router_dispatches_by_scheme() {
        let router = ToolContractRouter::new().with_route("stub", Box::new(StubToolContract::new()));
        let tool = Tool {
            tool_id: ToolId::new("t1"),
            tool_ref: "stub:t1".to_string(),
        };
        let result = router.call(&tool, &action(), &serde_json::json!({"a": 1}), &ctx()).expect("call");
        assert_eq!(result["action_id"], "a1");
    }

    #[test]
    fn router_rejects_unregistered_scheme() {
        let router = ToolContractRouter::new();
        let tool = Tool {
            tool_id: ToolId::new("t1"),
            tool_ref: "https://example.com/invoke".to_string(),
        };
        let err = router.call(&tool, &action(), &serde_json::json!({}), &ctx()).unwrap_err();
        assert_eq!(err.type_name, "UnroutableToolRef");
    }

    #[test]
    fn router_rejects_tool_ref_without_scheme() {
        let router = ToolContractRouter::new().with_route("stub", Box::new(StubToolContract::new()));
        let tool = Tool {
            tool_id: ToolId::new("t1"),
            tool_ref: "not-a-scheme".to_string(),
        };
        let err = router.call(&tool, &action(), &serde_json::json!({}), &ctx()).unwrap_err();
        assert_eq!(err.type_name, "UnroutableToolRef");
    }
}
