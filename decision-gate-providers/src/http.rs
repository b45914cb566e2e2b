// decision-gate-providers/src/http.rs
// ============================================================================
// Module: HTTP Planner
// Description: Planner implementation backed by an HTTP endpoint.
// Purpose: Let a host process delegate plan generation to a remote model
//          service without the kernel depending on any particular transport.
// Dependencies: decision-gate-core, reqwest, serde_json
// ============================================================================

//! ## Overview
//! [`HttpPlanner`] POSTs the task and effective registry to a configured
//! endpoint and parses the response body as a [`Plan`]. It enforces the same
//! bounded-request posture the crate's providers have always used for
//! untrusted network calls: a scheme restriction, an optional host allowlist,
//! redirects disabled, and a byte-length cap on the response.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::io::Read;
use std::time::Duration;

use decision_gate_core::Plan;
use decision_gate_core::Planner;
use decision_gate_core::PlannerError;
use decision_gate_core::Registry;
use decision_gate_core::Task;
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::redirect::Policy;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configuration for [`HttpPlanner`].
#[derive(Debug, Clone)]
pub struct HttpPlannerConfig {
    /// Endpoint the task and registry are POSTed to.
    pub endpoint: String,
    /// Allow cleartext HTTP (disabled by default).
    pub allow_http: bool,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum response size allowed, in bytes.
    pub max_response_bytes: usize,
    /// Optional host allowlist.
    pub allowed_hosts: Option<BTreeSet<String>>,
    /// User agent string for outbound requests.
    pub user_agent: String,
}

impl HttpPlannerConfig {
    /// Creates a configuration targeting `endpoint` with otherwise default settings.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            allow_http: false,
            timeout_ms: 30_000,
            max_response_bytes: 1024 * 1024,
            allowed_hosts: None,
            user_agent: "decision-gate/0.1".to_string(),
        }
    }
}

// ============================================================================
// SECTION: Planner Implementation
// ============================================================================

/// Planner that delegates plan generation to a remote HTTP endpoint.
#[derive(Debug)]
pub struct HttpPlanner {
    config: HttpPlannerConfig,
    client: Client,
}

impl HttpPlanner {
    /// Creates a new HTTP planner with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PlannerError::Failed`] when the HTTP client cannot be built.
    pub fn new(config: HttpPlannerConfig) -> Result<Self, PlannerError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .redirect(Policy::none())
            .build()
            .map_err(|err| PlannerError::Failed(format!("http client build failed: {err}")))?;
        Ok(Self {
            config,
            client,
        })
    }

    fn validate_url(&self, url: &Url) -> Result<(), PlannerError> {
        match url.scheme() {
            "https" => {}
            "http" if self.config.allow_http => {}
            scheme => return Err(PlannerError::Failed(format!("unsupported planner endpoint scheme: {scheme}"))),
        }
        if let Some(allowlist) = &self.config.allowed_hosts {
            let host = url
                .host_str()
                .ok_or_else(|| PlannerError::Failed("planner endpoint missing host".to_string()))?;
            if !allowlist.contains(host) {
                return Err(PlannerError::Failed(format!("planner endpoint host not allowed: {host}")));
            }
        }
        Ok(())
    }
}

impl Planner for HttpPlanner {
    fn plan(&self, task: &Task, registry: &Registry) -> Result<Plan, PlannerError> {
        let url = Url::parse(&self.config.endpoint)
            .map_err(|err| PlannerError::Failed(format!("invalid planner endpoint: {err}")))?;
        self.validate_url(&url)?;

        let mut response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "task": task, "registry": registry }))
            .send()
            .map_err(|err| PlannerError::Failed(format!("planner request failed: {err}")))?;
        let status = response.status();
        let body = read_response_limited(&mut response, self.config.max_response_bytes)?;
        if !status.is_success() {
            let message = String::from_utf8_lossy(&body).into_owned();
            return Err(PlannerError::Failed(format!("planner endpoint returned {status}: {message}")));
        }
        serde_json::from_slice(&body)
            .map_err(|err| PlannerError::Failed(format!("planner response was not a valid plan: {err}")))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads the response body while enforcing a byte limit.
fn read_response_limited(
    response: &mut reqwest::blocking::Response,
    max_bytes: usize,
) -> Result<Vec<u8>, PlannerError> {
    let max_bytes_u64 = u64::try_from(max_bytes).unwrap_or(u64::MAX);
    if let Some(expected) = response.content_length()
        && expected > max_bytes_u64
    {
        return Err(PlannerError::Failed("planner response exceeds size limit".to_string()));
    }
    let mut buf = Vec::new();
    let limit = max_bytes_u64.saturating_add(1);
    response
        .take(limit)
        .read_to_end(&mut buf)
        .map_err(|err| PlannerError::Failed(format!("failed to read planner response: {err}")))?;
    if buf.len() > max_bytes {
        return Err(PlannerError::Failed("planner response exceeds size limit".to_string()));
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
    use std::collections::BTreeMap;
    use std::thread;

    use decision_gate_core::RegistryId;
    use decision_gate_core::TaskId;
    use decision_gate_core::TenantId;
    use tiny_http::Response;
    use tiny_http::Server;

    use super::*;

    fn task() -> Task {
        Task {
            task_id: TaskId::new("task-1"),
            tenant_id: TenantId::new("tenant-1"),
            user_message: "send a welcome email".to_string(),
            user_id: None,
            org_id: None,
            roles: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    fn registry() -> Registry {
        Registry {
            registry_id: RegistryId::new("base"),
            schema_version: "1".to_string(),
            tools: Vec::new(),
            actions: Vec::new(),
            policies: Vec::new(),
            retry_classes: Vec::new(),
            roles: BTreeMap::new(),
            limits: Default::default(),
        }
    }

    #[test]
    fn http_planner_parses_plan_response() {
        let server = Server::http("127.0.0.1:0").expect("http server");
        let addr = server.server_addr();
        let handle = thread::spawn(move || {
            if let Ok(request) = server.recv() {
                let body = r#"{"steps":[{"step_id":"s1","action_id":"email.send","args":{}}]}"#;
                request.respond(Response::from_string(body)).expect("respond");
            }
        });

        let planner = HttpPlanner::new(HttpPlannerConfig {
            allow_http: true,
            ..HttpPlannerConfig::new(format!("http://{addr}/plan"))
        })
        .expect("build planner");
        let plan = planner.plan(&task(), &registry()).expect("plan");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].step_id.as_str(), "s1");
        handle.join().expect("server thread");
    }

    #[test]
    fn http_planner_rejects_non_success_status() {
        let server = Server::http("127.0.0.1:0").expect("http server");
        let addr = server.server_addr();
        let handle = thread::spawn(move || {
            if let Ok(request) = server.recv() {
                let response = Response::from_string("planner exploded").with_status_code(tiny_http::StatusCode(500));
                request.respond(response).expect("respond");
            }
        });

        let planner = HttpPlanner::new(HttpPlannerConfig {
            allow_http: true,
            ..HttpPlannerConfig::new(format!("http://{addr}/plan"))
        })
        .expect("build planner");
        let err = planner.plan(&task(), &registry()).unwrap_err();
        assert!(matches!(err, PlannerError::Failed(_)));
        handle.join().expect("server thread");
    }

    #[test]
    fn http_planner_rejects_cleartext_by_default() {
        let planner = HttpPlanner::new(HttpPlannerConfig::new("http://example.com/plan")).expect("build planner");
        let err = planner.plan(&task(), &registry()).unwrap_err();
        let PlannerError::Failed(message) = err;
        assert!(message.contains("unsupported planner endpoint scheme"));
    }
}
