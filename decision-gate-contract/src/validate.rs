// decision-gate-contract/src/validate.rs
// ============================================================================
// Module: Registry Document Validation
// Description: Schema-then-structural validation for registry documents.
// Purpose: Let an operator catch a malformed registry overlay document
//          before `RegistryOverlay::apply_overlays` ever loads it.
// Dependencies: decision-gate-core, jsonschema, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Validation runs in two passes, matching the separation of concerns
//! between [`schema`] and `decision_gate_core::core::registry`: schema
//! validation first, so a shape error is reported with a JSON pointer rather
//! than a generic deserialization failure; then structural validation, which
//! deserializes the (schema-valid) document into a
//! [`decision_gate_core::core::registry::Registry`] and runs its own
//! `validate` to catch duplicate ids and dangling references.

use decision_gate_core::core::registry::Registry;
use decision_gate_core::core::registry::RegistryError;
use jsonschema::Draft;
use serde_json::Value;
use thiserror::Error;

use crate::schema::registry_json_schema;

/// Errors raised validating a registry document.
#[derive(Debug, Error)]
pub enum ContractError {
    /// The document is not valid JSON.
    #[error("registry document is not valid json: {0}")]
    Json(String),
    /// The document failed schema validation.
    #[error("registry document failed schema validation: {0}")]
    Schema(String),
    /// The document is schema-valid but failed structural validation.
    #[error(transparent)]
    Structural(#[from] RegistryError),
    /// The canonical schema itself failed to compile. This indicates a bug
    /// in [`registry_json_schema`], not in the input document.
    #[error("registry schema failed to compile: {0}")]
    SchemaCompile(String),
}

/// Validates a registry document's raw JSON bytes, first against the
/// canonical schema and then, if schema-valid, structurally via
/// [`Registry::validate`], returning the parsed, validated [`Registry`] on
/// success.
///
/// # Errors
///
/// Returns [`ContractError::Json`] if `bytes` is not valid JSON,
/// [`ContractError::Schema`] if it does not match the canonical schema, and
/// [`ContractError::Structural`] if it is schema-valid but has a duplicate
/// id or a dangling tool or retry-class reference.
pub fn validate_registry_document(bytes: &[u8]) -> Result<Registry, ContractError> {
    let document: Value = serde_json::from_slice(bytes).map_err(|err| ContractError::Json(err.to_string()))?;
    validate_schema(&document)?;
    let registry: Registry =
        serde_json::from_value(document).map_err(|err| ContractError::Json(err.to_string()))?;
    registry.validate()?;
    Ok(registry)
}

/// Runs the canonical registry schema against `document`, collecting every
/// violation into one path-qualified error message.
fn validate_schema(document: &Value) -> Result<(), ContractError> {
    let schema = registry_json_schema();
    let validator = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| ContractError::SchemaCompile(err.to_string()))?;
    let messages: Vec<String> = validator.iter_errors(document).map(|error| error.to_string()).collect();
    if messages.is_empty() {
        Ok(())
    } else {
        Err(ContractError::Schema(messages.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test assertions on constructed values.")]

    use super::*;

    fn minimal_document() -> Value {
        serde_json::json!({
            "registry_id": "r1",
            "schema_version": "1",
            "tools": [{"tool_id": "email", "tool_ref": "stub:email"}],
            "actions": [{
                "action_id": "email.send",
                "tool": "email",
                "retry_class": "default",
                "idempotency": {"mode": "hash_args"},
                "side_effect": true
            }],
            "policies": [],
            "retry_classes": [{"retry_class_id": "default", "max_attempts": 1}],
            "roles": {},
            "limits": {}
        })
    }

    #[test]
    fn well_formed_document_validates() {
        let bytes = serde_json::to_vec(&minimal_document()).unwrap();
        let registry = validate_registry_document(&bytes).unwrap();
        assert_eq!(registry.registry_id.as_str(), "r1");
    }

    #[test]
    fn dangling_tool_reference_is_rejected_structurally() {
        let mut document = minimal_document();
        document["actions"][0]["tool"] = Value::String("nonexistent".to_string());
        let bytes = serde_json::to_vec(&document).unwrap();
        let err = validate_registry_document(&bytes).unwrap_err();
        assert!(matches!(err, ContractError::Structural(RegistryError::DanglingTool { .. })));
    }

    #[test]
    fn wrong_type_field_is_rejected_by_schema() {
        let mut document = minimal_document();
        document["actions"][0]["side_effect"] = Value::String("yes".to_string());
        let bytes = serde_json::to_vec(&document).unwrap();
        let err = validate_registry_document(&bytes).unwrap_err();
        assert!(matches!(err, ContractError::Schema(_)));
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = validate_registry_document(b"{not json").unwrap_err();
        assert!(matches!(err, ContractError::Json(_)));
    }
}
