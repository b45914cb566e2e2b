// decision-gate-contract/src/lib.rs
// ============================================================================
// Module: Decision Gate Contract Library
// Description: Registry document schema validation and authoring surface.
// Purpose: Let an operator validate a registry overlay document — structure
//          and references — before `RegistryOverlay` ever loads it at
//          runtime.
// Dependencies: decision-gate-core, jsonschema, serde_json, thiserror
// ============================================================================

//! ## Overview
//! A registry document is the wire format [`decision_gate_core::overlay`]
//! merges and the flow engine consumes. This crate is the authoring-time half
//! of that contract: [`schema::registry_json_schema`] is the canonical JSON
//! Schema for the document shape, and [`validate::validate_registry_document`]
//! runs it against an untrusted document before attempting the structural
//! checks already owned by [`decision_gate_core::core::registry::Registry::validate`]
//! (duplicate ids, dangling tool and retry-class references). Schema
//! validation catches shape errors — a missing field, a string where a
//! number belongs — with a path-qualified message; structural validation
//! catches semantic errors a schema cannot express.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod schema;
pub mod validate;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use schema::registry_json_schema;
pub use validate::ContractError;
pub use validate::validate_registry_document;
