// decision-gate-core/src/core/mod.rs
// ============================================================================
// Module: Kernel Core Types
// Description: Canonical task, run, event, and registry document types.
// Purpose: Provide stable, serializable types shared by every kernel crate.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Kernel core types define the task/run/event model, the HMAC-chained
//! event hashing primitives, the registry document shape, and the kernel's
//! identifier and timestamp newtypes. These types are the canonical source
//! of truth for every derived surface (CLI, HTTP, storage backends).

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod hashing;
pub mod identifiers;
pub mod model;
pub mod registry;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use hashing::AuditKey;
pub use hashing::AuditKeyring;
pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use hashing::HashError;
pub use hashing::KeyringError;
pub use identifiers::ActionId;
pub use identifiers::ApprovalId;
pub use identifiers::IdempotencyKey;
pub use identifiers::JobId;
pub use identifiers::KeyId;
pub use identifiers::OrgId;
pub use identifiers::PolicyId;
pub use identifiers::RegistryId;
pub use identifiers::RetryClassId;
pub use identifiers::RunId;
pub use identifiers::StepId;
pub use identifiers::TaskId;
pub use identifiers::TenantId;
pub use identifiers::ToolId;
pub use identifiers::UserId;
pub use model::Approval;
pub use model::ApprovalDecision;
pub use model::ApprovalVerdict;
pub use model::BudgetUsed;
pub use model::ErrorClass;
pub use model::Event;
pub use model::EventBody;
pub use model::EventRecord;
pub use model::Run;
pub use model::RunState;
pub use model::StepError;
pub use model::StepResult;
pub use model::StepStatus;
pub use model::Task;
pub use registry::Action;
pub use registry::ActionSecurity;
pub use registry::IdempotencyConfig;
pub use registry::IdempotencyMode;
pub use registry::Limits;
pub use registry::Policy;
pub use registry::PolicyPhase;
pub use registry::Registry;
pub use registry::RegistryError;
pub use registry::RetryClass;
pub use registry::Tool;
pub use time::Timestamp;
