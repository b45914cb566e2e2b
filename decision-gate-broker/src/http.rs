// decision-gate-broker/src/http.rs
// ============================================================================
// Module: HTTP Tool Contract
// Description: HTTP-backed implementation of the kernel's tool contract.
// Purpose: Invoke `http(s)://` tool references with SSRF-hardened defaults.
// Dependencies: decision-gate-core, reqwest, url
// ============================================================================

//! ## Overview
//! [`HttpToolContract`] resolves a [`Tool::tool_ref`] of the form
//! `http://host/path` or `https://host/path` into a bounded POST request
//! carrying the step's resolved arguments as a JSON body, and parses the
//! response body as the step's output value. Redirects are not followed,
//! response size is capped, and by default requests to private or link-local
//! addresses are rejected — the same posture the reference payload source
//! applied to untrusted remote content.
//!
//! [`Tool::tool_ref`]: decision_gate_core::Tool

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::io::Read;
use std::net::IpAddr;
use std::net::ToSocketAddrs;
use std::time::Duration;

use decision_gate_core::Action;
use decision_gate_core::Tool;
use decision_gate_core::ToolCallContext;
use decision_gate_core::ToolCallFailure;
use decision_gate_core::ToolContract;
use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use serde_json::Value;
use url::Host;
use url::Url;

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Host allow/deny policy enforced before any request is sent.
#[derive(Debug, Clone, Default)]
pub struct HttpToolPolicy {
    /// Optional allowlist of hosts; when set, only matching hosts are permitted.
    pub allowed_hosts: Option<BTreeSet<String>>,
    /// Whether requests to private, loopback, or link-local addresses are permitted.
    pub allow_private_networks: bool,
}

impl HttpToolPolicy {
    fn enforce(&self, url: &Url) -> Result<(), ToolCallFailure> {
        match url.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(transport_failure(format!("unsupported tool_ref scheme: {scheme}")));
            }
        }
        let host = url.host().ok_or_else(|| transport_failure("tool_ref missing host".to_string()))?;
        let host_label = host.to_string().to_ascii_lowercase();
        if let Some(allowlist) = &self.allowed_hosts
            && !allowlist.contains(&host_label)
        {
            return Err(transport_failure(format!("tool_ref host not allowed: {host_label}")));
        }
        if !self.allow_private_networks {
            let ips = resolve_host_ips(&host, url)?;
            if ips.iter().any(is_private_or_link_local) {
                return Err(transport_failure(format!(
                    "tool_ref host resolves to a private address: {host_label}"
                )));
            }
        }
        Ok(())
    }
}

/// Resolves a URL's host to the IP addresses a connection would use.
fn resolve_host_ips(host: &Host<&str>, url: &Url) -> Result<Vec<IpAddr>, ToolCallFailure> {
    match host {
        Host::Ipv4(ip) => Ok(vec![IpAddr::V4(*ip)]),
        Host::Ipv6(ip) => Ok(vec![IpAddr::V6(*ip)]),
        Host::Domain(domain) => {
            let port = url
                .port_or_known_default()
                .ok_or_else(|| transport_failure("tool_ref missing port for host resolution".to_string()))?;
            (*domain, port)
                .to_socket_addrs()
                .map(|iter| iter.map(|addr| addr.ip()).collect())
                .map_err(|err| transport_failure(format!("dns lookup failed: {err}")))
        }
    }
}

/// Returns true for private, loopback, link-local, or otherwise non-routable addresses.
fn is_private_or_link_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => {
            addr.is_private()
                || addr.is_loopback()
                || addr.is_link_local()
                || addr.is_unspecified()
                || addr.is_multicast()
                || addr.is_broadcast()
        }
        IpAddr::V6(addr) => {
            addr.is_loopback()
                || addr.is_unique_local()
                || addr.is_unicast_link_local()
                || addr.is_unspecified()
                || addr.is_multicast()
        }
    }
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configuration for [`HttpToolContract`].
#[derive(Debug, Clone)]
pub struct HttpToolContractConfig {
    /// Maximum response body size, in bytes.
    pub max_response_bytes: usize,
    /// User agent string for outbound requests.
    pub user_agent: String,
    /// Host policy enforced before dispatch.
    pub policy: HttpToolPolicy,
}

impl Default for HttpToolContractConfig {
    fn default() -> Self {
        Self {
            max_response_bytes: 1024 * 1024,
            user_agent: "decision-gate-broker/0.1".to_string(),
            policy: HttpToolPolicy::default(),
        }
    }
}

// ============================================================================
// SECTION: Tool Contract
// ============================================================================

/// HTTP-backed tool contract for `http(s)://` tool references.
#[derive(Debug)]
pub struct HttpToolContract {
    config: HttpToolContractConfig,
    client: Client,
}

impl HttpToolContract {
    /// Builds an HTTP tool contract with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ToolCallFailure`] when the underlying HTTP client cannot be built.
    pub fn new(config: HttpToolContractConfig) -> Result<Self, ToolCallFailure> {
        let client = Client::builder()
            .redirect(Policy::none())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|err| transport_failure(format!("http client build failed: {err}")))?;
        Ok(Self {
            config,
            client,
        })
    }
}

impl ToolContract for HttpToolContract {
    fn call(
        &self,
        tool: &Tool,
        _action: &Action,
        args: &Value,
        ctx: &ToolCallContext,
    ) -> Result<Value, ToolCallFailure> {
        let url = Url::parse(&tool.tool_ref)
            .map_err(|err| transport_failure(format!("invalid tool_ref: {err}")))?;
        self.config.policy.enforce(&url)?;

        let mut request = self
            .client
            .post(url.clone())
            .timeout(Duration::from_millis(ctx.timeout_ms))
            .json(args);
        if let Some(key) = &ctx.idempotency_key {
            request = request.header("Idempotency-Key", key.as_str());
        }
        request = request
            .header("X-Decision-Gate-Tenant", ctx.tenant_id.as_str())
            .header("X-Decision-Gate-Run", ctx.run_id.as_str())
            .header("X-Decision-Gate-Step", ctx.step_id.as_str());

        let mut response = request.send().map_err(|err| transport_failure(err.to_string()))?;
        let status = response.status();
        let body = read_response_limited(&mut response, self.config.max_response_bytes)?;
        if !status.is_success() {
            let message = String::from_utf8_lossy(&body).into_owned();
            return Err(ToolCallFailure {
                message: format!("tool {} returned status {status}: {message}", tool.tool_id),
                type_name: "HttpStatus".to_string(),
            });
        }
        serde_json::from_slice(&body)
            .map_err(|err| transport_failure(format!("tool response was not valid json: {err}")))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds a [`ToolCallFailure`] for a transport-level failure.
fn transport_failure(message: String) -> ToolCallFailure {
    ToolCallFailure {
        message,
        type_name: "Transport".to_string(),
    }
}

/// Reads a response body while enforcing a byte limit.
fn read_response_limited(
    response: &mut reqwest::blocking::Response,
    max_bytes: usize,
) -> Result<Vec<u8>, ToolCallFailure> {
    let max_bytes_u64 = u64::try_from(max_bytes).unwrap_or(u64::MAX);
    if let Some(expected) = response.content_length()
        && expected > max_bytes_u64
    {
        return Err(transport_failure("tool response exceeds size limit".to_string()));
    }
    let mut buf = Vec::new();
    let limit = max_bytes_u64.saturating_add(1);
    response
        .take(limit)
        .read_to_end(&mut buf)
        .map_err(|err| transport_failure(format!("failed to read tool response: {err}")))?;
    if buf.len() > max_bytes {
        return Err(transport_failure("tool response exceeds size limit".to_string()));
    }
    Ok(buf)
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
    use std::thread;

    use decision_gate_core::ActionId;
    use decision_gate_core::IdempotencyConfig;
    use decision_gate_core::IdempotencyMode;
    use decision_gate_core::RetryClassId;
    use decision_gate_core::RunId;
    use decision_gate_core::StepId;
    use decision_gate_core::TenantId;
    use decision_gate_core::ToolId;
    use tiny_http::Response;
    use tiny_http::Server;

    use super::*;

    fn action() -> Action {
        Action {
            action_id: ActionId::new("a1"),
            tool: ToolId::new("t1"),
            timeout_ms: Some(1_000),
            retry_class: RetryClassId::new("default"),
            idempotency: IdempotencyConfig {
                mode: IdempotencyMode::HashArgs,
            },
            cost_units: Some(1),
            side_effect: false,
            security: Default::default(),
        }
    }

    fn ctx() -> ToolCallContext {
        ToolCallContext {
            tenant_id: TenantId::new("tenant-1"),
            run_id: RunId::new("run-1"),
            step_id: StepId::new("s1"),
            idempotency_key: Some("idem-1".to_string()),
            timeout_ms: 1_000,
        }
    }

    #[test]
    fn http_tool_contract_calls_and_parses_json_response() {
        let server = Server::http("127.0.0.1:0").expect("http server");
        let addr = server.server_addr();
        let handle = thread::spawn(move || {
            if let Ok(request) = server.recv() {
                request.respond(Response::from_string(r#"{"ok":true}"#)).expect("respond");
            }
        });

        let tool = Tool {
            tool_id: ToolId::new("t1"),
            tool_ref: format!("http://{addr}/invoke"),
        };
        let contract = HttpToolContract::new(HttpToolContractConfig {
            policy: HttpToolPolicy {
                allowed_hosts: None,
                allow_private_networks: true,
            },
            ..HttpToolContractConfig::default()
        })
        .expect("build contract");
        let result = contract.call(&tool, &action(), &serde_json::json!({"x": 1}), &ctx()).expect("call");
        assert_eq!(result, serde_json::json!({"ok": true}));
        handle.join().expect("server thread");
    }

    #[test]
    fn http_tool_contract_rejects_non_success_status() {
        let server = Server::http("127.0.0.1:0").expect("http server");
        let addr = server.server_addr();
        let handle = thread::spawn(move || {
            if let Ok(request) = server.recv() {
                let response = Response::from_string("boom").with_status_code(tiny_http::StatusCode(500));
                request.respond(response).expect("respond");
            }
        });

        let tool = Tool {
            tool_id: ToolId::new("t1"),
            tool_ref: format!("http://{addr}/invoke"),
        };
        let contract = HttpToolContract::new(HttpToolContractConfig {
            policy: HttpToolPolicy {
                allowed_hosts: None,
                allow_private_networks: true,
            },
            ..HttpToolContractConfig::default()
        })
        .expect("build contract");
        let err = contract.call(&tool, &action(), &serde_json::json!({}), &ctx()).unwrap_err();
        assert_eq!(err.type_name, "HttpStatus");
        handle.join().expect("server thread");
    }

    #[test]
    fn http_tool_contract_rejects_private_network_by_default() {
        let tool = Tool {
            tool_id: ToolId::new("t1"),
            tool_ref: "http://127.0.0.1:1/invoke".to_string(),
        };
        let contract = HttpToolContract::new(HttpToolContractConfig::default()).expect("build contract");
        let err = contract.call(&tool, &action(), &serde_json::json!({}), &ctx()).unwrap_err();
        assert!(err.message.contains("private"));
    }

    #[test]
    fn http_tool_contract_rejects_non_http_scheme() {
        let tool = Tool {
            tool_id: ToolId::new("t1"),
            tool_ref: "stub:echo".to_string(),
        };
        let contract = HttpToolContract::new(HttpToolContractConfig::default()).expect("build contract");
        let err = contract.call(&tool, &action(), &serde_json::json!({}), &ctx()).unwrap_err();
        assert!(err.message.contains("unsupported tool_ref scheme"));
    }
}
