// decision-gate-broker/src/stub.rs
// ============================================================================
// Module: Stub Tool Contract
// Description: Deterministic in-memory tool contract for tests and seeds.
// Purpose: Give seed scenarios and tests a tool transport with no network
//          dependency, keyed by the `stub:` tool_ref scheme.
// Dependencies: decision-gate-core
// ============================================================================

//! ## Overview
//! [`StubToolContract`] echoes back the call's arguments wrapped with the
//! action id that was invoked, so a seed scenario or test can assert on what
//! was dispatched without standing up a real tool endpoint. Registered
//! `tool_ref` values use the `stub:{id}` convention already used by the
//! registry's own fixtures.

use std::collections::BTreeMap;

use decision_gate_core::Action;
use decision_gate_core::Tool;
use decision_gate_core::ToolCallContext;
use decision_gate_core::ToolCallFailure;
use decision_gate_core::ToolContract;
use serde_json::Value;

/// Deterministic tool contract that echoes its arguments back.
///
/// Responses can be overridden per action id via [`StubToolContract::with_response`],
/// and failures can be forced via [`StubToolContract::with_failure`] — useful for
/// exercising retry and error-classification paths without a real transport.
#[derive(Debug, Clone, Default)]
pub struct StubToolContract {
    responses: BTreeMap<String, Value>,
    failures: BTreeMap<String, ToolCallFailure>,
}

impl StubToolContract {
    /// Creates a stub contract with no overrides; every call echoes its arguments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fixed response for the given action id.
    #[must_use]
    pub fn with_response(mut self, action_id: impl Into<String>, response: Value) -> Self {
        self.responses.insert(action_id.into(), response);
        self
    }

    /// Registers a forced failure for the given action id.
    #[must_use]
    pub fn with_failure(mut self, action_id: impl Into<String>, failure: ToolCallFailure) -> Self {
        self.failures.insert(action_id.into(), failure);
        self
    }
}

impl ToolContract for StubToolContract {
    fn call(
        &self,
        _tool: &Tool,
        action: &Action,
        args: &Value,
        _ctx: &ToolCallContext,
    ) -> Result<Value, ToolCallFailure> {
        let action_id = action.action_id.as_str();
        if let Some(failure) = self.failures.get(action_id) {
            return Err(failure.clone());
        }
        if let Some(response) = self.responses.get(action_id) {
            return Ok(response.clone());
        }
        Ok(serde_json::json!({
            "action_id": action_id,
            "echo": args,
        }))
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

    fn action(id: &str) -> Action {
        Action {
            action_id: ActionId::new(id),
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

    fn tool() -> Tool {
        Tool {
            tool_id: ToolId::new("t1"),
            tool_ref: "stub:t1".to_string(),
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
    fn stub_echoes_args_by_default() {
        let contract = StubToolContract::new();
        let args = serde_json::json!({"a": 1});
        let result = contract.call(&tool(), &action("a1"), &args, &ctx()).expect("call");
        assert_eq!(result["action_id"], "a1");
        assert_eq!(result["echo"], args);
    }

    #[test]
    fn stub_returns_registered_response() {
        let contract = StubToolContract::new().with_response("a1", serde_json::json!({"ok": true}));
        let result = contract.call(&tool(), &action("a1"), &serde_json::json!({}), &ctx()).expect("call");
        assert_eq!(result, serde_json::json!({"ok": true}));
    }

    #[test]
    fn stub_returns_registered_failure() {
        let failure = ToolCallFailure {
            message: "forced failure".to_string(),
            type_name: "Forced".to_string(),
        };
        let contract = StubToolContract::new().with_failure("a1", failure.clone());
        let err = contract.call(&tool(), &action("a1"), &serde_json::json!({}), &ctx()).unwrap_err();
        assert_eq!(err, failure);
    }
}
