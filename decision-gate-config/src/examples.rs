// decision-gate-config/src/examples.rs
// ============================================================================
// Module: Kernel Configuration Example
// Description: Deterministic example `decision-gate.toml` document.
// Purpose: Give operators a working starting point and back the config
//          loader's own tests with one canonical fixture.
// Dependencies: none
// ============================================================================

/// Returns a minimal, valid `decision-gate.toml` document using the
/// in-memory storage profile, suitable as a starting point for operators and
/// as the fixture this crate's own tests load.
#[must_use]
pub fn kernel_config_toml_example() -> &'static str {
    r#"
registry_path = "registry.json"
approval_timeout_secs = 3600
snapshot_every = 50
refresh_mv_every = 10
tenant_concurrency_slots = 4

[storage]
kind = "in_memory"

[[audit_keyring]]
kid = "k1"
secret_base64 = "c2VjcmV0LWtleS1tYXRlcmlhbA=="
active = true

[default_limits]
max_tool_calls = 50
daily_cost_unit_quota = 10000
"#
}
