// decision-gate-contract/src/schema.rs
// ============================================================================
// Module: Registry Document Schema
// Description: Canonical JSON Schema for a registry overlay document.
// Purpose: Catch shape errors in an untrusted registry document before it
//          ever reaches `Registry::validate`'s structural checks.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! This schema validates shape only: field presence, types, and the keyed
//! list sections a registry overlay is allowed to contain. It deliberately
//! does not attempt to express cross-reference invariants (an action's tool
//! must exist, ids must be unique) — those stay owned by
//! [`decision_gate_core::core::registry::Registry::validate`], the single
//! source of truth for structural correctness. Schema and structural
//! validation are complementary, not redundant: the schema gives an operator
//! a path-qualified error for a malformed document before the
//! semantically richer check ever runs.

use serde_json::Value;
use serde_json::json;

/// Returns the canonical JSON Schema (draft 2020-12) for a registry overlay
/// document, matching `decision_gate_core::core::registry::Registry`'s wire
/// shape.
#[must_use]
pub fn registry_json_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": "https://decision-gate.internal/schema/registry.json",
        "title": "Decision Gate Registry Document",
        "type": "object",
        "properties": {
            "registry_id": { "type": "string", "minLength": 1 },
            "schema_version": { "type": "string", "minLength": 1 },
            "tools": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "tool_id": { "type": "string", "minLength": 1 },
                        "tool_ref": { "type": "string", "minLength": 1 }
                    },
                    "required": ["tool_id", "tool_ref"]
                }
            },
            "actions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "action_id": { "type": "string", "minLength": 1 },
                        "tool": { "type": "string", "minLength": 1 },
                        "timeout_ms": { "type": ["integer", "null"], "minimum": 0 },
                        "retry_class": { "type": "string", "minLength": 1 },
                        "idempotency": {
                            "type": "object",
                            "properties": {
                                "mode": { "type": "string", "enum": ["explicit_key", "hash_args"] }
                            },
                            "required": ["mode"]
                        },
                        "cost_units": { "type": ["integer", "null"], "minimum": 0 },
                        "side_effect": { "type": "boolean" },
                        "security": {
                            "type": "object",
                            "properties": {
                                "allowed_roles": { "type": "array", "items": { "type": "string" } },
                                "requires_approval": { "type": "boolean" }
                            }
                        }
                    },
                    "required": ["action_id", "tool", "retry_class"]
                }
            },
            "policies": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "policy_id": { "type": "string", "minLength": 1 },
                        "priority": { "type": "integer" },
                        "phase": {},
                        "when": { "type": "object" },
                        "effect": { "type": "object" }
                    },
                    "required": ["policy_id", "priority", "phase", "when", "effect"]
                }
            },
            "retry_classes": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "retry_class_id": { "type": "string", "minLength": 1 },
                        "max_attempts": { "type": "integer", "minimum": 1 },
                        "backoff_ms": { "type": "array", "items": { "type": "integer", "minimum": 0 } },
                        "retry_on": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["retry_class_id", "max_attempts"]
                }
            },
            "roles": { "type": "object" },
            "limits": {
                "type": "object",
                "properties": {
                    "max_tool_calls": { "type": ["integer", "null"], "minimum": 0 },
                    "per_tool_max_calls": { "type": "object" },
                    "per_action_max_calls": { "type": "object" },
                    "llm_call_cost_units": { "type": ["integer", "null"], "minimum": 0 },
                    "llm_cost_units_per_1k_tokens": { "type": ["integer", "null"], "minimum": 0 },
                    "daily_token_quota": { "type": ["integer", "null"], "minimum": 0 },
                    "daily_cost_unit_quota": { "type": ["integer", "null"], "minimum": 0 }
                }
            }
        },
        "additionalProperties": false
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_compiles_as_a_valid_json_schema_document() {
        let schema = registry_json_schema();
        let compiled = jsonschema::validator_for(&schema);
        assert!(compiled.is_ok());
    }
}
