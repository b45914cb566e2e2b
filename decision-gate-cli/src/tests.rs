// decision-gate-cli/src/tests.rs
// ============================================================================
// Module: CLI Kernel Integration Tests
// Description: End-to-end tests driving `Kernel::build` the way the binary
//              does, against a temp registry document and both storage
//              profiles.
// Purpose: Exercise submit/tail/verify/approve through the same construction
//          path `main.rs` uses, rather than unit-testing `FlowEngine`
//          directly (already covered in `decision-gate-core`).
// Dependencies: decision-gate-config, decision-gate-core, decision-gate-store-sqlite
// ============================================================================

#![allow(clippy::unwrap_used, clippy::expect_used, reason = "Test assertions on constructed values.")]

use std::time::Duration;

use decision_gate_config::KernelConfig;
use decision_gate_config::StorageProfile;
use decision_gate_core::ApprovalDecision;
use decision_gate_core::ApprovalVerdict;
use decision_gate_core::AuditKey;
use decision_gate_core::AuditKeyring;
use decision_gate_core::Limits;
use decision_gate_core::RunId;
use decision_gate_core::RunState;
use decision_gate_core::Task;
use decision_gate_core::Timestamp;
use decision_gate_core::core::identifiers::ApprovalId;
use decision_gate_core::core::identifiers::KeyId;
use decision_gate_core::core::identifiers::OrgId;
use decision_gate_core::core::identifiers::TaskId;
use decision_gate_core::core::identifiers::TenantId;
use decision_gate_core::core::identifiers::UserId;
use serde_json::json;
use time::OffsetDateTime;

use crate::kernel::Kernel;
use crate::kernel::load_registry;

fn now() -> Timestamp {
    Timestamp::from_offset(OffsetDateTime::now_utc())
}

fn keyring() -> AuditKeyring {
    AuditKeyring::new(vec![AuditKey { kid: KeyId::new("k1"), secret: b"cli-test-secret".to_vec(), active: true }])
}

fn write_registry(dir: &std::path::Path, policies: serde_json::Value) -> std::path::PathBuf {
    let document = json!({
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
                "retry_class": "default",
                "idempotency": {"mode": "hash_args"},
                "cost_units": 1,
                "side_effect": true,
                "security": {"allowed_roles": ["member"], "requires_approval": false}
            }
        ],
        "policies": policies,
        "retry_classes": [
            {"retry_class_id": "default", "max_attempts": 1, "backoff_ms": [], "retry_on": []}
        ],
        "roles": {},
        "limits": {"max_tool_calls": 20}
    });
    let path = dir.join("registry.json");
    std::fs::write(&path, serde_json::to_vec(&document).unwrap()).unwrap();
    path
}

fn config_with(registry_path: std::path::PathBuf) -> KernelConfig {
    KernelConfig {
        audit_keyring: keyring(),
        registry_path,
        storage: StorageProfile::InMemory,
        default_limits: Limits::default(),
        approval_timeout: Duration::from_secs(3600),
        snapshot_every: 50,
        refresh_mv_every: 10,
        tenant_concurrency_slots: 4,
    }
}

fn task(task_id: &str) -> Task {
    Task {
        task_id: TaskId::new(task_id),
        tenant_id: TenantId::new("tenant_enterprise_eu"),
        user_message: "refund please".to_string(),
        user_id: Some(UserId::new("u1")),
        org_id: Some(OrgId::new("org1")),
        roles: vec!["member".to_string()],
        metadata: std::collections::BTreeMap::new(),
    }
}

#[test]
fn submit_and_advance_completes_a_two_step_plan() {
    let dir = tempfile::tempdir().unwrap();
    let registry_path = write_registry(dir.path(), json!([]));
    let config = config_with(registry_path);
    let kernel = Kernel::build(&config).unwrap();
    let registry = load_registry(&config.registry_path).unwrap();

    let run = kernel.submit_and_advance(task("task_1"), &registry, now()).unwrap();
    assert_eq!(run.state, RunState::Completed);

    let records = kernel.tail(&run.run_id, 0).unwrap();
    assert!(!records.is_empty());
    assert!(records.iter().enumerate().all(|(idx, record)| record.seq == (idx as u64) + 1));

    kernel.verify_chain(&run.run_id).unwrap();
}

#[test]
fn approval_required_blocks_then_resumes_after_decide() {
    let dir = tempfile::tempdir().unwrap();
    let policies = json!([{
        "policy_id": "approve-email",
        "priority": 5,
        "phase": "exec",
        "when": {"leaf": {"tool": "email"}},
        "effect": {"require_approval": true}
    }]);
    let registry_path = write_registry(dir.path(), policies);
    let config = config_with(registry_path);
    let kernel = Kernel::build(&config).unwrap();
    let registry = load_registry(&config.registry_path).unwrap();

    let run = kernel.submit_and_advance(task("task_2"), &registry, now()).unwrap();
    assert_eq!(run.state, RunState::InputRequired);

    let approval_id = ApprovalId::new(format!("apr_{}", run.run_id.as_str()));
    let run = kernel
        .decide_and_advance(
            &approval_id,
            &run.run_id,
            &registry,
            ApprovalDecision { decision: ApprovalVerdict::Approved, by: "alice".to_string(), ts: now(), reason: None },
            now(),
        )
        .unwrap();
    assert_eq!(run.state, RunState::Completed);
}

#[test]
fn verify_chain_fails_for_an_unknown_run() {
    let dir = tempfile::tempdir().unwrap();
    let registry_path = write_registry(dir.path(), json!([]));
    let config = config_with(registry_path);
    let kernel = Kernel::build(&config).unwrap();

    let err = kernel.verify_chain(&RunId::new("run_does_not_exist")).unwrap_err();
    assert!(err.to_string().contains("no events recorded"));
}
