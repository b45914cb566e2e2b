// decision-gate-config/src/lib.rs
// ============================================================================
// Module: Decision Gate Config Library
// Description: Canonical kernel configuration model and loader.
// Purpose: Single source of truth for decision-gate.toml semantics.
// Dependencies: decision-gate-core, decision-gate-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `decision-gate-config` defines [`KernelConfig`], the process-startup
//! configuration the kernel is constructed from exactly once: which audit
//! keys sign the event log, where the registry document lives, which storage
//! profile backs the capability traits, and the tenant-wide defaults that
//! apply before any per-action override. It provides strict, fail-closed
//! parse-then-validate loading and a deterministic example renderer.
//!
//! Security posture: config inputs are untrusted; see
//! `Docs/security/threat_model.md`.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod examples;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::CONFIG_ENV_VAR;
pub use config::ConfigError;
pub use config::DEFAULT_CONFIG_NAME;
pub use config::KernelConfig;
pub use config::RawKernelConfig;
pub use config::StorageProfile;
pub use examples::kernel_config_toml_example;
