// decision-gate-contract/tests/registry_validation.rs
// ============================================================================
// Module: Registry Validation Integration Tests
// Description: End-to-end schema-then-structural validation of a realistic
//              multi-action registry document.
// Purpose: Exercise the crate's public API the way an operator's tooling
//          would, as opposed to `validate.rs`'s unit tests against minimal
//          fixtures.
// Dependencies: decision-gate-contract
// ============================================================================

#![allow(clippy::unwrap_used, reason = "Test assertions on constructed values.")]

use decision_gate_contract::ContractError;
use decision_gate_contract::validate_registry_document;
use serde_json::json;

fn realistic_registry() -> serde_json::Value {
    json!({
        "registry_id": "acme-base",
        "schema_version": "1",
        "tools": [
            {"tool_id": "ticket", "tool_ref": "stub:ticket"},
            {"tool_id": "email", "tool_ref": "stub:email"}
        ],
        "actions": [
            {
                "action_id": "ticket.create",
                "tool": "ticket",
                "retry_class": "default",
                "idempotency": {"mode": "hash_args"},
                "cost_units": 1,
                "side_effect": true,
                "security": {"allowed_roles": ["member"], "requires_approval": false}
            },
            {
                "action_id": "email.send",
                "tool": "email",
                "retry_class": "rate-limited",
                "idempotency": {"mode": "explicit_key"},
                "cost_units": 1,
                "side_effect": true,
                "security": {"allowed_roles": ["member"], "requires_approval": true}
            }
        ],
        "policies": [],
        "retry_classes": [
            {"retry_class_id": "default", "max_attempts": 1, "backoff_ms": [], "retry_on": []},
            {"retry_class_id": "rate-limited", "max_attempts": 3, "backoff_ms": [100, 500], "retry_on": ["rate_limit"]}
        ],
        "roles": {},
        "limits": {"max_tool_calls": 20, "daily_cost_unit_quota": 5000}
    })
}

#[test]
fn realistic_multi_action_registry_validates() {
    let bytes = serde_json::to_vec(&realistic_registry()).unwrap();
    let registry = validate_registry_document(&bytes).unwrap();
    assert_eq!(registry.actions.len(), 2);
    assert_eq!(registry.retry_classes.len(), 2);
}

#[test]
fn duplicate_action_id_is_rejected() {
    let mut document = realistic_registry();
    let duplicate = document["actions"][0].clone();
    document["actions"].as_array_mut().unwrap().push(duplicate);
    let bytes = serde_json::to_vec(&document).unwrap();
    let err = validate_registry_document(&bytes).unwrap_err();
    assert!(matches!(err, ContractError::Structural(_)));
}

#[test]
fn dangling_retry_class_reference_is_rejected() {
    let mut document = realistic_registry();
    document["actions"][1]["retry_class"] = json!("nonexistent");
    let bytes = serde_json::to_vec(&document).unwrap();
    let err = validate_registry_document(&bytes).unwrap_err();
    assert!(matches!(err, ContractError::Structural(_)));
}
