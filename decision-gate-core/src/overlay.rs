// decision-gate-core/src/overlay.rs
// ============================================================================
// Module: Registry Overlay
// Description: Pure org -> tenant -> user deep-merge over a base registry.
// Purpose: Produce the fresh, effective per-task [`Registry`] consumed by
//          `PolicyEngine` and `StepExecutor`.
// Dependencies: serde_json, crate::core::registry
// ============================================================================

//! ## Overview
//! `RegistryOverlay` loads a base registry once and, per task, layers org,
//! tenant, and user overlay documents on top of it. Each overlay is itself a
//! partial registry document (any subset of fields, as raw JSON). Maps merge
//! recursively; the keyed lists (`tools`, `actions`, `policies`,
//! `retry_classes`) merge entry-by-entry on their id field, preserving the
//! base order and appending new entries after it; every other list is
//! replaced wholesale by the overlay; scalars in an overlay always win. The
//! merge is pure — `apply_overlays` never mutates its inputs, and always
//! returns a fresh [`Registry`].

use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::core::registry::Registry;
use crate::core::registry::RegistryError;

/// Id field name used to key each list section that merges by entry rather
/// than wholesale replacement, matching the spec's keyed-list rule.
const KEYED_LISTS: &[(&str, &str)] =
    &[("tools", "tool_id"), ("actions", "action_id"), ("policies", "policy_id"), ("retry_classes", "retry_class_id")];

/// Errors raised applying a registry overlay.
#[derive(Debug, Error)]
pub enum OverlayError {
    /// An overlay document was not a JSON object.
    #[error("overlay document must be a JSON object, got {0}")]
    NotAnObject(&'static str),
    /// The merged document failed to deserialize into a [`Registry`].
    #[error("merged registry document is malformed: {0}")]
    Malformed(String),
    /// The merged, effective registry failed structural validation.
    #[error(transparent)]
    Invalid(#[from] RegistryError),
}

/// Applies `overlays` in order (conventionally org, then tenant, then user)
/// on top of `base`, returning a fresh, validated, effective [`Registry`].
///
/// `base` is never mutated; every overlay is a partial registry document
/// (any JSON object subset of [`Registry`]'s fields). An empty overlay list
/// returns a clone of `base` unchanged.
///
/// # Errors
///
/// Returns [`OverlayError`] when an overlay is not an object, the merged
/// document cannot be deserialized into a [`Registry`], or the effective
/// registry fails structural validation.
pub fn apply_overlays(base: &Registry, overlays: &[Value]) -> Result<Registry, OverlayError> {
    let mut merged = serde_json::to_value(base).map_err(|err| OverlayError::Malformed(err.to_string()))?;
    for overlay in overlays {
        if overlay.is_null() {
            continue;
        }
        if !overlay.is_object() {
            return Err(OverlayError::NotAnObject(value_kind(overlay)));
        }
        merged = deep_merge(&merged, overlay);
    }
    let effective: Registry =
        serde_json::from_value(merged).map_err(|err| OverlayError::Malformed(err.to_string()))?;
    effective.validate()?;
    Ok(effective)
}

/// Recursively merges `overlay` onto `base`. Objects merge key-by-key;
/// known keyed-list keys merge by id; other arrays are replaced wholesale by
/// the overlay; scalars take the overlay's value.
fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            Value::Object(merge_object(base_map, overlay_map))
        }
        (_, overlay) => overlay.clone(),
    }
}

fn merge_object(base: &Map<String, Value>, overlay: &Map<String, Value>) -> Map<String, Value> {
    let mut result = base.clone();
    for (key, overlay_value) in overlay {
        if let Some(id_field) = keyed_list_id_field(key) {
            let base_value = result.get(key).cloned().unwrap_or_else(|| Value::Array(Vec::new()));
            result.insert(key.clone(), merge_keyed_list(&base_value, overlay_value, id_field));
            continue;
        }
        match result.get(key) {
            Some(base_value) => {
                result.insert(key.clone(), deep_merge(base_value, overlay_value));
            }
            None => {
                result.insert(key.clone(), overlay_value.clone());
            }
        }
    }
    result
}

fn keyed_list_id_field(key: &str) -> Option<&'static str> {
    KEYED_LISTS.iter().find(|(name, _)| *name == key).map(|(_, id_field)| *id_field)
}

/// Merges two JSON arrays of objects keyed by `id_field`: overlay entries
/// replace the fields of a matching base entry by id (not a wholesale
/// object replace, so partial overlay entries still inherit unmentioned base
/// fields); entries only present in the overlay are appended after the
/// preserved base order.
fn merge_keyed_list(base: &Value, overlay: &Value, id_field: &str) -> Value {
    let Value::Array(base_items) = base else {
        return overlay.clone();
    };
    let Value::Array(overlay_items) = overlay else {
        return overlay.clone();
    };

    let mut merged: Vec<Value> = Vec::with_capacity(base_items.len() + overlay_items.len());
    let mut consumed = vec![false; overlay_items.len()];

    for base_item in base_items {
        let base_id = base_item.get(id_field);
        let matching = overlay_items
            .iter()
            .enumerate()
            .find(|(idx, item)| !consumed[*idx] && item.get(id_field) == base_id && base_id.is_some());
        if let Some((idx, overlay_item)) = matching {
            consumed[idx] = true;
            merged.push(deep_merge(base_item, overlay_item));
        } else {
            merged.push(base_item.clone());
        }
    }

    for (idx, overlay_item) in overlay_items.iter().enumerate() {
        if !consumed[idx] {
            merged.push(overlay_item.clone());
        }
    }

    Value::Array(merged)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
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
    use super::*;
    use crate::core::identifiers::ActionId;
    use crate::core::identifiers::RegistryId;
    use crate::core::identifiers::RetryClassId;
    use crate::core::identifiers::ToolId;
    use crate::core::registry::Action;
    use crate::core::registry::ActionSecurity;
    use crate::core::registry::IdempotencyConfig;
    use crate::core::registry::IdempotencyMode;
    use crate::core::registry::Limits;
    use crate::core::registry::RetryClass;
    use crate::core::registry::Tool;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn base_registry() -> Registry {
        Registry {
            registry_id: RegistryId::new("base"),
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
            policies: Vec::new(),
            retry_classes: vec![RetryClass::default()],
            roles: BTreeMap::new(),
            limits: Limits {
                max_tool_calls: Some(10),
                ..Limits::default()
            },
        }
    }

    #[test]
    fn no_overlays_returns_equivalent_registry() {
        let base = base_registry();
        let effective = apply_overlays(&base, &[]).unwrap();
        assert_eq!(effective, base);
    }

    #[test]
    fn scalar_overlay_wins_and_keyed_list_merges_by_id() {
        let base = base_registry();
        let tenant_overlay = json!({
            "limits": { "max_tool_calls": 3 },
            "actions": [
                { "action_id": "email.send", "security": { "requires_approval": true } }
            ]
        });
        let effective = apply_overlays(&base, &[tenant_overlay]).unwrap();
        assert_eq!(effective.limits.max_tool_calls, Some(3));
        assert_eq!(effective.actions.len(), 1);
        assert!(effective.actions[0].security.requires_approval);
        assert_eq!(effective.actions[0].tool, ToolId::new("email"));
    }

    #[test]
    fn new_action_appended_after_preserved_base_order() {
        let base = base_registry();
        let user_overlay = json!({
            "tools": [{ "tool_id": "sms", "tool_ref": "stub:sms" }],
            "actions": [
                {
                    "action_id": "sms.send",
                    "tool": "sms",
                    "retry_class": "default",
                    "idempotency": { "mode": "hash_args" },
                    "side_effect": true,
                }
            ]
        });
        let effective = apply_overlays(&base, &[user_overlay]).unwrap();
        assert_eq!(effective.actions.len(), 2);
        assert_eq!(effective.actions[0].action_id, ActionId::new("email.send"));
        assert_eq!(effective.actions[1].action_id, ActionId::new("sms.send"));
    }

    #[test]
    fn three_level_overlay_applies_in_order() {
        let base = base_registry();
        let org_overlay = json!({ "limits": { "max_tool_calls": 100 } });
        let tenant_overlay = json!({ "limits": { "max_tool_calls": 50 } });
        let user_overlay = json!({ "limits": { "daily_cost_unit_quota": 10 } });
        let effective = apply_overlays(&base, &[org_overlay, tenant_overlay, user_overlay]).unwrap();
        assert_eq!(effective.limits.max_tool_calls, Some(50));
        assert_eq!(effective.limits.daily_cost_unit_quota, Some(10));
    }

    #[test]
    fn non_object_overlay_is_rejected() {
        let base = base_registry();
        let err = apply_overlays(&base, &[json!([1, 2, 3])]).unwrap_err();
        assert!(matches!(err, OverlayError::NotAnObject("array")));
    }

    #[test]
    fn overlay_does_not_mutate_base() {
        let base = base_registry();
        let before = base.clone();
        let _ = apply_overlays(&base, &[json!({ "limits": { "max_tool_calls": 1 } })]).unwrap();
        assert_eq!(base, before);
    }
}
