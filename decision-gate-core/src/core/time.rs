// decision-gate-core/src/core/time.rs
// ============================================================================
// Module: Kernel Timestamps
// Description: Second-resolution UTC timestamps for events and audit records.
// Purpose: Provide a stable, canonical-JSON-friendly timestamp wrapper.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Every event and audit row carries an ISO-8601 UTC timestamp at second
//! resolution. Wrapping `OffsetDateTime` keeps the wire format stable even if
//! the underlying time crate's `Serialize` impl changes.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Second-resolution UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
    /// Builds a timestamp from an `OffsetDateTime`, truncating to whole seconds.
    #[must_use]
    pub fn from_offset(at: OffsetDateTime) -> Self {
        let truncated = at.replace_nanosecond(0).unwrap_or(at);
        let rendered = truncated
            .format(&Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string());
        Self(rendered)
    }

    /// Returns the timestamp's RFC 3339 string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses a timestamp from an RFC 3339 string, rejecting malformed input.
    ///
    /// # Errors
    ///
    /// Returns an error when `value` is not valid RFC 3339.
    pub fn parse(value: &str) -> Result<Self, time::error::Parse> {
        let at = OffsetDateTime::parse(value, &Rfc3339)?;
        Ok(Self::from_offset(at))
    }

    /// Seconds elapsed between `earlier` and `self`, saturating to zero if
    /// `self` is not after `earlier` (e.g. a clock rollback).
    #[must_use]
    pub fn seconds_since(&self, earlier: &Self) -> u64 {
        let Ok(at) = OffsetDateTime::parse(&self.0, &Rfc3339) else {
            return 0;
        };
        let Ok(since) = OffsetDateTime::parse(&earlier.0, &Rfc3339) else {
            return 0;
        };
        u64::try_from((at - since).whole_seconds()).unwrap_or(0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
