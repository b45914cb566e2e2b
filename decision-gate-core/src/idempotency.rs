// decision-gate-core/src/idempotency.rs
// ============================================================================
// Module: Idempotency Hashing
// Description: Stable content hash for (tenant, run, step, action, args).
// Purpose: Derive the `hash_args` idempotency key used to deduplicate step
//          executions across retries and replays.
// Dependencies: serde_json, crate::core::hashing
// ============================================================================

//! ## Overview
//! Side-effecting steps are deduplicated by an idempotency key: either the
//! caller's explicit `args.idempotency_key`, or a SHA-256 hash of the step's
//! full identity and arguments under canonical JSON.

use serde_json::Value;

use crate::core::hashing::HashAlgorithm;
use crate::core::hashing::HashError;
use crate::core::hashing::hash_canonical_json;
use crate::core::identifiers::ActionId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::StepId;
use crate::core::identifiers::TenantId;

/// Computes the `hash_args` idempotency key: `idem_<sha256 hex>` over the
/// canonical JSON of `{tenant_id, run_id, step_id, action_id, args}`.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] if `args` cannot be canonicalized
/// (e.g. it contains non-finite floats).
pub fn compute_idempotency_key(
    tenant_id: &TenantId,
    run_id: &RunId,
    step_id: &StepId,
    action_id: &ActionId,
    args: &Value,
) -> Result<String, HashError> {
    let keyed = serde_json::json!({
        "tenant_id": tenant_id.as_str(),
        "run_id": run_id.as_str(),
        "step_id": step_id.as_str(),
        "action_id": action_id.as_str(),
        "args": args,
    });
    let digest = hash_canonical_json(HashAlgorithm::Sha256, &keyed)?;
    Ok(format!("idem_{}", digest.value))
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

    #[test]
    fn same_inputs_produce_same_key() {
        let args = serde_json::json!({"to": "a@example.com"});
        let a = compute_idempotency_key(
            &TenantId::new("t"),
            &RunId::new("r"),
            &StepId::new("s1"),
            &ActionId::new("email.send"),
            &args,
        )
        .unwrap();
        let b = compute_idempotency_key(
            &TenantId::new("t"),
            &RunId::new("r"),
            &StepId::new("s1"),
            &ActionId::new("email.send"),
            &args,
        )
        .unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("idem_"));
    }

    #[test]
    fn different_args_produce_different_keys() {
        let a = compute_idempotency_key(
            &TenantId::new("t"),
            &RunId::new("r"),
            &StepId::new("s1"),
            &ActionId::new("email.send"),
            &serde_json::json!({"to": "a@example.com"}),
        )
        .unwrap();
        let b = compute_idempotency_key(
            &TenantId::new("t"),
            &RunId::new("r"),
            &StepId::new("s1"),
            &ActionId::new("email.send"),
            &serde_json::json!({"to": "b@example.com"}),
        )
        .unwrap();
        assert_ne!(a, b);
    }
}
