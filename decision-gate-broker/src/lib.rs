// decision-gate-broker/src/lib.rs
// ============================================================================
// Module: Decision Gate Broker Library
// Description: Reference ToolContract implementations for host processes.
// Purpose: Provide an HTTP-backed tool runner plus a deterministic stub, and
//          a router that dispatches by tool reference scheme.
// Dependencies: decision-gate-core, reqwest, url
// ============================================================================

//! ## Overview
//! The kernel treats tool transport as an opaque collaborator: a [`Tool`]'s
//! `tool_ref` is a plain string, and `decision-gate-core::interfaces::ToolContract`
//! is the only contract the flow engine calls through. This crate supplies two
//! concrete transports — [`HttpToolContract`], which resolves `http(s)://`
//! tool references with the same SSRF-hardened request policy the broker's
//! reference payload source used, and [`StubToolContract`], a deterministic
//! echo used by seed scenarios and tests — plus [`ToolContractRouter`], which
//! dispatches by `tool_ref` scheme so a host process can mix both behind one
//! `ToolContract` impl.
//!
//! [`Tool`]: decision_gate_core::core::registry::Tool

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod http;
pub mod router;
pub mod stub;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use http::HttpToolContract;
pub use http::HttpToolContractConfig;
pub use http::HttpToolPolicy;
pub use router::ToolContractRouter;
pub use stub::StubToolContract;

#[cfg(test)]
mod tests {
    //! Test-only lint relaxations for panic-based assertions and debug output.
    #![allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        clippy::dbg_macro,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only output and panic-based assertions are permitted."
    )]
}
