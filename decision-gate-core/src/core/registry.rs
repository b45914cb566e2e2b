// decision-gate-core/src/core/registry.rs
// ============================================================================
// Module: Registry Document
// Description: Base registry document shape: tools, actions, policies, limits.
// Purpose: Provide the typed document consumed by the overlay merge
//          (`crate::overlay`), `PolicyEngine`, and `StepExecutor`.
// Dependencies: serde, std::collections
// ============================================================================

//! ## Overview
//! A [`Registry`] document is loaded once as a base and, per task, overlaid
//! with org, tenant, and user documents by [`crate::overlay::apply_overlays`].
//! That merge is pure: each call returns a fresh registry, never mutating the
//! base. This module owns only the document shape and its structural
//! validation; the merge itself lives in `crate::overlay` because it operates
//! generically over JSON, not just the typed fields below.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::ActionId;
use crate::core::identifiers::PolicyId;
use crate::core::identifiers::RegistryId;
use crate::core::identifiers::RetryClassId;
use crate::core::identifiers::ToolId;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Effective resource limits for a tenant/run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    /// Maximum tool calls for one run.
    pub max_tool_calls: Option<u64>,
    /// Maximum calls to a single tool within a run.
    #[serde(default)]
    pub per_tool_max_calls: BTreeMap<String, u64>,
    /// Maximum calls to a single action within a run.
    #[serde(default)]
    pub per_action_max_calls: BTreeMap<String, u64>,
    /// Flat cost-unit rate charged per LLM call when token accounting is
    /// unavailable.
    pub llm_call_cost_units: Option<u64>,
    /// Cost units per 1000 tokens, when token accounting is available.
    pub llm_cost_units_per_1k_tokens: Option<u64>,
    /// Daily token quota per scope.
    pub daily_token_quota: Option<u64>,
    /// Daily cost-unit quota per scope.
    pub daily_cost_unit_quota: Option<u64>,
}

impl Limits {
    /// Merges `self` (tenant-scoped) with `other` (registry-scoped); `other`
    /// wins per-key, matching the spec's "registry wins per-key" rule.
    #[must_use]
    pub fn merged_with_registry(&self, other: &Self) -> Self {
        Self {
            max_tool_calls: other.max_tool_calls.or(self.max_tool_calls),
            per_tool_max_calls: merge_u64_maps(&self.per_tool_max_calls, &other.per_tool_max_calls),
            per_action_max_calls: merge_u64_maps(
                &self.per_action_max_calls,
                &other.per_action_max_calls,
            ),
            llm_call_cost_units: other.llm_call_cost_units.or(self.llm_call_cost_units),
            llm_cost_units_per_1k_tokens: other
                .llm_cost_units_per_1k_tokens
                .or(self.llm_cost_units_per_1k_tokens),
            daily_token_quota: other.daily_token_quota.or(self.daily_token_quota),
            daily_cost_unit_quota: other.daily_cost_unit_quota.or(self.daily_cost_unit_quota),
        }
    }
}

fn merge_u64_maps(
    base: &BTreeMap<String, u64>,
    overlay: &BTreeMap<String, u64>,
) -> BTreeMap<String, u64> {
    let mut merged = base.clone();
    for (key, value) in overlay {
        merged.insert(key.clone(), *value);
    }
    merged
}

// ============================================================================
// SECTION: Tools, Actions, Retry Classes
// ============================================================================

/// A declared remote or local callable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// Tool identifier.
    pub tool_id: ToolId,
    /// Opaque reference passed to the tool contract's `call`.
    pub tool_ref: String,
}

/// Idempotency strategy for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyMode {
    /// Caller must supply `args.idempotency_key`.
    ExplicitKey,
    /// Key derived from a stable hash of `(tenant_id, run_id, step_id, action_id, args)`.
    HashArgs,
}

/// Idempotency configuration for an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    /// Strategy used to derive the idempotency key.
    pub mode: IdempotencyMode,
}

/// Security configuration for an action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionSecurity {
    /// Roles permitted to invoke the action; empty means unrestricted.
    #[serde(default)]
    pub allowed_roles: Vec<String>,
    /// Whether every invocation requires an approval decision.
    #[serde(default)]
    pub requires_approval: bool,
}

/// A declarative binding of an `action_id` to a `tool`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Action identifier.
    pub action_id: ActionId,
    /// Bound tool identifier; must reference a declared [`Tool`].
    pub tool: ToolId,
    /// Tool-call timeout. Defaults to 15000ms when absent.
    pub timeout_ms: Option<u64>,
    /// Retry class id; must reference a declared retry class.
    pub retry_class: RetryClassId,
    /// Idempotency strategy.
    pub idempotency: IdempotencyConfig,
    /// Cost units charged for one successful call. Defaults to 1.
    pub cost_units: Option<u64>,
    /// Whether this action is known to mutate external state.
    #[serde(default)]
    pub side_effect: bool,
    /// Security configuration.
    #[serde(default)]
    pub security: ActionSecurity,
}

impl Action {
    /// Returns the effective tool-call timeout, defaulting to 15 seconds.
    #[must_use]
    pub fn effective_timeout_ms(&self) -> u64 {
        self.timeout_ms.unwrap_or(15_000)
    }

    /// Returns the effective cost units, defaulting to 1.
    #[must_use]
    pub fn effective_cost_units(&self) -> u64 {
        self.cost_units.unwrap_or(1)
    }
}

/// Retry policy referenced by actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryClass {
    /// Retry class identifier.
    pub retry_class_id: RetryClassId,
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Backoff schedule in milliseconds, indexed by `attempt - 1`, clamped to
    /// the last entry. Defaults to 250ms when empty.
    #[serde(default)]
    pub backoff_ms: Vec<u64>,
    /// Error classes eligible for retry (subject to the non-retryable set).
    #[serde(default)]
    pub retry_on: Vec<crate::core::model::ErrorClass>,
}

impl Default for RetryClass {
    fn default() -> Self {
        Self {
            retry_class_id: RetryClassId::new("default"),
            max_attempts: 1,
            backoff_ms: Vec::new(),
            retry_on: Vec::new(),
        }
    }
}

// ============================================================================
// SECTION: Policy
// ============================================================================

/// The phase a policy applies to. Only `exec` is consumed by the kernel today;
/// other phases pass through unevaluated for forward compatibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyPhase {
    /// Evaluated during plan gating, immediately before execution.
    Exec,
    /// Reserved for future phases; evaluated as a no-op today.
    Other(String),
}

/// A single policy rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Policy identifier.
    pub policy_id: PolicyId,
    /// Higher priority rules are evaluated first.
    pub priority: i64,
    /// The phase this rule applies to.
    pub phase: PolicyPhase,
    /// The condition tree gating this rule.
    pub when: crate::policy::Condition,
    /// The effect applied when `when` matches.
    pub effect: crate::policy::Effect,
}

// ============================================================================
// SECTION: Registry Document
// ============================================================================

/// The base or effective registry document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    /// Registry document identifier.
    pub registry_id: RegistryId,
    /// Schema version of the document.
    pub schema_version: String,
    /// Declared tools.
    #[serde(default)]
    pub tools: Vec<Tool>,
    /// Declared actions.
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Declared policies.
    #[serde(default)]
    pub policies: Vec<Policy>,
    /// Declared retry classes.
    #[serde(default)]
    pub retry_classes: Vec<RetryClass>,
    /// Role catalogue, informational.
    #[serde(default)]
    pub roles: BTreeMap<String, Value>,
    /// Effective limits declared by this document.
    #[serde(default)]
    pub limits: Limits,
}

/// Errors raised applying or validating a registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// An action referenced a tool id that is not declared.
    #[error("action {action} references undeclared tool {tool}")]
    DanglingTool {
        /// Offending action id.
        action: String,
        /// Missing tool id.
        tool: String,
    },
    /// An action referenced a retry class id that is not declared.
    #[error("action {action} references undeclared retry class {retry_class}")]
    DanglingRetryClass {
        /// Offending action id.
        action: String,
        /// Missing retry class id.
        retry_class: String,
    },
    /// Two entries in the same list shared an id.
    #[error("duplicate {kind} id: {id}")]
    DuplicateId {
        /// The kind of entry (`tool`, `action`, `policy`, `retry_class`).
        kind: &'static str,
        /// The duplicated id.
        id: String,
    },
}

impl Registry {
    /// Validates structural invariants: no dangling tool/retry-class
    /// references, and no duplicate ids within any one keyed list.
    ///
    /// # Errors
    ///
    /// Returns the first [`RegistryError`] encountered.
    pub fn validate(&self) -> Result<(), RegistryError> {
        reject_duplicates("tool", self.tools.iter().map(|t| t.tool_id.as_str()))?;
        reject_duplicates("action", self.actions.iter().map(|a| a.action_id.as_str()))?;
        reject_duplicates("policy", self.policies.iter().map(|p| p.policy_id.as_str()))?;
        reject_duplicates(
            "retry_class",
            self.retry_classes.iter().map(|r| r.retry_class_id.as_str()),
        )?;

        for action in &self.actions {
            if !self.tools.iter().any(|t| t.tool_id == action.tool) {
                return Err(RegistryError::DanglingTool {
                    action: action.action_id.as_str().to_string(),
                    tool: action.tool.as_str().to_string(),
                });
            }
            if !self.retry_classes.iter().any(|r| r.retry_class_id == action.retry_class) {
                return Err(RegistryError::DanglingRetryClass {
                    action: action.action_id.as_str().to_string(),
                    retry_class: action.retry_class.as_str().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Returns the action with the given id, if declared.
    #[must_use]
    pub fn find_action(&self, action_id: &ActionId) -> Option<&Action> {
        self.actions.iter().find(|a| &a.action_id == action_id)
    }

    /// Returns the retry class with the given id, falling back to a
    /// single-attempt default when unknown (matches the reference behavior of
    /// tolerating an unrecognized retry class rather than failing the step).
    #[must_use]
    pub fn find_retry_class(&self, retry_class_id: &RetryClassId) -> RetryClass {
        self.retry_classes
            .iter()
            .find(|r| &r.retry_class_id == retry_class_id)
            .cloned()
            .unwrap_or_default()
    }
}

fn reject_duplicates<'a>(
    kind: &'static str,
    ids: impl Iterator<Item = &'a str>,
) -> Result<(), RegistryError> {
    let mut seen = std::collections::BTreeSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(RegistryError::DuplicateId {
                kind,
                id: id.to_string(),
            });
        }
    }
    Ok(())
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

    fn tool(id: &str) -> Tool {
        Tool {
            tool_id: ToolId::new(id),
            tool_ref: format!("stub:{id}"),
        }
    }

    fn action(id: &str, tool_id: &str) -> Action {
        Action {
            action_id: ActionId::new(id),
            tool: ToolId::new(tool_id),
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

    fn base_registry() -> Registry {
        Registry {
            registry_id: RegistryId::new("base"),
            schema_version: "1".to_string(),
            tools: vec![tool("email"), tool("ticket")],
            actions: vec![action("email.send", "email"), action("ticket.create", "ticket")],
            policies: Vec::new(),
            retry_classes: vec![RetryClass::default()],
            roles: BTreeMap::new(),
            limits: Limits::default(),
        }
    }

    #[test]
    fn validate_accepts_well_formed_registry() {
        assert!(base_registry().validate().is_ok());
    }

    #[test]
    fn validate_rejects_dangling_tool() {
        let mut registry = base_registry();
        registry.actions.push(action("sms.send", "sms"));
        assert!(matches!(registry.validate(), Err(RegistryError::DanglingTool { .. })));
    }

}
