// decision-gate-core/src/core/identifiers.rs
// ============================================================================
// Module: Kernel Identifiers
// Description: Canonical opaque identifiers for tasks, runs, and registry entities.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! This module defines the canonical string-based identifiers used throughout the
//! kernel. Identifiers are opaque and serialize as strings. Validation beyond
//! non-emptiness is handled at registry or run boundaries rather than here.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

macro_rules! newtype_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Creates a new `", stringify!($name), "`.")]
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

newtype_id!(
    /// Tenant identifier scoped to runs and registries.
    TenantId
);
newtype_id!(
    /// Organization identifier, one level above tenant in the overlay chain.
    OrgId
);
newtype_id!(
    /// End-user identifier attached to a task submission.
    UserId
);
newtype_id!(
    /// Caller-supplied or server-generated task identifier, unique to one run.
    TaskId
);
newtype_id!(
    /// Durable run identifier.
    RunId
);
newtype_id!(
    /// Plan step identifier (e.g. `s1`, `s2`).
    StepId
);
newtype_id!(
    /// Registry action identifier.
    ActionId
);
newtype_id!(
    /// Registry tool identifier.
    ToolId
);
newtype_id!(
    /// Registry policy identifier.
    PolicyId
);
newtype_id!(
    /// Registry retry-class identifier.
    RetryClassId
);
newtype_id!(
    /// Registry identifier for the document itself.
    RegistryId
);
newtype_id!(
    /// Approval identifier, deterministically derived from a run id.
    ApprovalId
);
newtype_id!(
    /// Durable job identifier.
    JobId
);
newtype_id!(
    /// Content-addressed or explicit idempotency key.
    IdempotencyKey
);
newtype_id!(
    /// Audit keyring key identifier.
    KeyId
);
