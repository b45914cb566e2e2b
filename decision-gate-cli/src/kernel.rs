// decision-gate-cli/src/kernel.rs
// ============================================================================
// Module: CLI Kernel
// Description: Profile-dispatching wrapper over `FlowEngine` for the binary.
// Purpose: Construct the flow engine once from a `KernelConfig` and expose
//          the operator-facing submit/advance/tail/verify operations the
//          `decision-gate` binary drives, without the binary itself knowing
//          which storage profile backs it.
// Dependencies: decision-gate-core, decision-gate-config, decision-gate-contract,
//               decision-gate-broker, decision-gate-providers, decision-gate-store-sqlite
// ============================================================================

//! ## Overview
//! [`Kernel`] is an enum over the two [`StorageProfile`] variants, each
//! holding its own monomorphized `FlowEngine`. Every operator-facing method
//! matches on the variant and delegates to the same `FlowEngine` call; there
//! is no shared trait object because the flow engine's generic storage
//! parameters differ per profile, not because the operations differ.
//!
//! The planner and tool contract are fixed at construction: a `StubPlanner`
//! derives one step per declared registry action, and a `ToolContractRouter`
//! dispatches `stub:` tool references to `StubToolContract` and `http(s):`
//! references to `HttpToolContract`. A host embedding this kernel behind a
//! real model service would substitute its own `Planner` at this seam.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use decision_gate_broker::HttpToolContract;
use decision_gate_broker::HttpToolContractConfig;
use decision_gate_broker::StubToolContract;
use decision_gate_broker::ToolContractRouter;
use decision_gate_config::KernelConfig;
use decision_gate_config::StorageProfile;
use decision_gate_core::ApprovalDecision;
use decision_gate_core::EventBody;
use decision_gate_core::EventRecord;
use decision_gate_core::FlowEngine;
use decision_gate_core::FlowEngineConfig;
use decision_gate_core::InMemoryApprovalStore;
use decision_gate_core::InMemoryBillingLedger;
use decision_gate_core::InMemoryBudgetStore;
use decision_gate_core::InMemoryEventLog;
use decision_gate_core::InMemoryJobQueue;
use decision_gate_core::InMemoryProjections;
use decision_gate_core::InMemoryQuotaStore;
use decision_gate_core::InMemoryStepCache;
use decision_gate_core::Registry;
use decision_gate_core::Run;
use decision_gate_core::RunId;
use decision_gate_core::Task;
use decision_gate_core::Timestamp;
use decision_gate_core::core::identifiers::ApprovalId;
use decision_gate_core::interfaces::ApprovalStore;
use decision_gate_core::interfaces::EventLog;
use decision_gate_providers::StubPlanner;
use decision_gate_store_sqlite::SqliteApprovalStore;
use decision_gate_store_sqlite::SqliteBillingLedger;
use decision_gate_store_sqlite::SqliteBudgetStore;
use decision_gate_store_sqlite::SqliteEventLog;
use decision_gate_store_sqlite::SqliteJobQueue;
use decision_gate_store_sqlite::SqliteProfile;
use decision_gate_store_sqlite::SqliteProjections;
use decision_gate_store_sqlite::SqliteQuotaStore;
use decision_gate_store_sqlite::SqliteStepCache;
use thiserror::Error;

/// Model label recorded against billing rows and quota counters for this
/// binary's planner calls.
const CLI_LLM_MODEL: &str = "decision-gate-cli-stub";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised constructing or driving the CLI's kernel.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The registry document could not be read from disk.
    #[error("failed to read registry document {path}: {source}")]
    RegistryIo {
        /// Path that failed to read.
        path: String,
        /// Underlying I/O error, rendered as a string.
        source: String,
    },
    /// The registry document failed schema or structural validation.
    #[error(transparent)]
    Registry(#[from] decision_gate_contract::ContractError),
    /// The default HTTP tool contract's client failed to build.
    #[error("failed to build the default http tool contract: {0}")]
    ToolContract(String),
    /// The `SQLite` storage profile failed to open.
    #[error(transparent)]
    Sqlite(#[from] decision_gate_store_sqlite::SqliteStoreError),
    /// The underlying flow engine reported an error advancing the run.
    #[error(transparent)]
    Flow(#[from] decision_gate_core::FlowEngineError),
    /// No run exists with the requested id.
    #[error("no run found for id {0}")]
    RunNotFound(String),
}

type InMemoryEngine = FlowEngine<
    InMemoryEventLog,
    InMemoryStepCache,
    InMemoryApprovalStore,
    InMemoryBudgetStore,
    InMemoryQuotaStore,
    InMemoryJobQueue,
    InMemoryProjections,
    InMemoryBillingLedger,
>;

type SqliteEngine = FlowEngine<
    SqliteEventLog,
    SqliteStepCache,
    SqliteApprovalStore,
    SqliteBudgetStore,
    SqliteQuotaStore,
    SqliteJobQueue,
    SqliteProjections,
    SqliteBillingLedger,
>;

// ============================================================================
// SECTION: Kernel
// ============================================================================

/// Profile-dispatching handle the CLI drives every subcommand through.
pub enum Kernel {
    /// Volatile, process-local storage profile.
    InMemory(InMemoryEngine),
    /// Durable `SQLite` storage profile.
    Sqlite(SqliteEngine),
}

impl Kernel {
    /// Builds a kernel from `config`, constructing the storage profile it
    /// names. The base registry document is loaded separately via
    /// [`load_registry`], since `advance` takes the effective registry by
    /// reference on every call rather than the kernel owning one copy of it.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError`] if the default tool contract's HTTP client
    /// fails to build, or the `SQLite` profile fails to open.
    pub fn build(config: &KernelConfig) -> Result<Self, KernelError> {
        let http_tools = HttpToolContract::new(HttpToolContractConfig::default())
            .map_err(|failure| KernelError::ToolContract(failure.message))?;
        let tools = Arc::new(
            ToolContractRouter::new()
                .with_route("stub", Box::new(StubToolContract::new()))
                .with_route("http", Box::new(http_tools)),
        );
        let planner = Arc::new(StubPlanner::new());
        let engine_config = FlowEngineConfig {
            default_limits: config.default_limits.clone(),
            llm_model: CLI_LLM_MODEL.to_string(),
            approval_timeout_secs: config.approval_timeout.as_secs(),
        };

        match &config.storage {
            StorageProfile::InMemory => {
                let keyring = Arc::new(config.audit_keyring.clone());
                Ok(Self::InMemory(FlowEngine::new(
                    InMemoryEventLog::new(keyring),
                    InMemoryStepCache::new(),
                    InMemoryApprovalStore::new(),
                    InMemoryBudgetStore::new(),
                    InMemoryQuotaStore::new(),
                    InMemoryJobQueue::new(u64::from(config.tenant_concurrency_slots)),
                    InMemoryProjections::new(),
                    InMemoryBillingLedger::new(),
                    planner,
                    tools,
                    engine_config,
                )))
            }
            StorageProfile::Sqlite(store_config) => {
                let keyring = Arc::new(config.audit_keyring.clone());
                let profile = SqliteProfile::open(store_config, keyring)?;
                Ok(Self::Sqlite(FlowEngine::new(
                    profile.event_log(),
                    profile.step_cache(),
                    profile.approval_store(),
                    profile.budget_store(),
                    profile.quota_store(),
                    profile.job_queue(),
                    profile.projections(),
                    profile.billing_ledger(),
                    planner,
                    tools,
                    engine_config,
                )))
            }
        }
    }

    /// Submits `task`, then immediately advances the resulting run once
    /// against `registry`. The CLI drives both stages synchronously in one
    /// process rather than dispatching through a worker pool, which is the
    /// durable profile's job-queue concern (`decision-gate-cli` has no
    /// worker loop of its own).
    ///
    /// # Errors
    ///
    /// Returns [`KernelError`] on any storage or policy failure.
    pub fn submit_and_advance(&self, task: Task, registry: &Registry, now: Timestamp) -> Result<Run, KernelError> {
        match self {
            Self::InMemory(engine) => {
                let run = engine.submit(task, now)?;
                Ok(engine.advance(run, registry, now)?)
            }
            Self::Sqlite(engine) => {
                let run = engine.submit(task, now)?;
                Ok(engine.advance(run, registry, now)?)
            }
        }
    }

    /// Tails every event recorded for `run_id` with `seq > after_seq`.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError`] on a storage failure.
    pub fn tail(&self, run_id: &RunId, after_seq: u64) -> Result<Vec<EventRecord>, KernelError> {
        let records = match self {
            Self::InMemory(engine) => engine.event_log().list_since(run_id, after_seq),
            Self::Sqlite(engine) => engine.event_log().list_since(run_id, after_seq),
        };
        Ok(records.map_err(decision_gate_core::FlowEngineError::from)?)
    }

    /// Verifies the HMAC hash chain for `run_id` end-to-end.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError`] if the chain diverges or storage fails.
    pub fn verify_chain(&self, run_id: &RunId) -> Result<(), KernelError> {
        let result = match self {
            Self::InMemory(engine) => engine.event_log().verify_chain(run_id),
            Self::Sqlite(engine) => engine.event_log().verify_chain(run_id),
        };
        Ok(result.map_err(decision_gate_core::FlowEngineError::from)?)
    }

    /// Records an approval decision for `run_id` and advances it once more.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::RunNotFound`] if no events are recorded for
    /// `run_id`, or propagates a storage or flow-engine failure.
    pub fn decide_and_advance(
        &self,
        approval_id: &ApprovalId,
        run_id: &RunId,
        registry: &Registry,
        decision: ApprovalDecision,
        now: Timestamp,
    ) -> Result<Run, KernelError> {
        let run = self.reconstruct_run(run_id)?;
        match self {
            Self::InMemory(engine) => {
                engine.approvals().decide(approval_id, decision).map_err(decision_gate_core::FlowEngineError::from)?;
                Ok(engine.advance(run, registry, now)?)
            }
            Self::Sqlite(engine) => {
                engine.approvals().decide(approval_id, decision).map_err(decision_gate_core::FlowEngineError::from)?;
                Ok(engine.advance(run, registry, now)?)
            }
        }
    }

    /// Rebuilds a [`Run`]'s current lifecycle state from its event history
    /// and its materialized summary. A CLI invocation that decides an
    /// approval runs as a separate process invocation from the one that
    /// submitted the task, so it never holds the original `Run` value;
    /// `advance` re-derives the plan, step outputs, and budget entirely from
    /// the log regardless, so only the run's identifiers and current state
    /// need reconstructing here. The tenant id comes from the projected
    /// [`RunSummary`](decision_gate_core::interfaces::RunSummary), since the
    /// event envelope itself carries no tenant field.
    fn reconstruct_run(&self, run_id: &RunId) -> Result<Run, KernelError> {
        let history = self.tail(run_id, 0)?;
        let first = history.first().ok_or_else(|| KernelError::RunNotFound(run_id.as_str().to_string()))?;
        let summary = self.run_summary(run_id)?.ok_or_else(|| KernelError::RunNotFound(run_id.as_str().to_string()))?;
        let task = Task {
            task_id: first.event.task_id.clone(),
            tenant_id: summary.tenant_id,
            user_message: String::new(),
            user_id: None,
            org_id: None,
            roles: Vec::new(),
            metadata: BTreeMap::new(),
        };
        let mut run = Run::new(run_id.clone(), task, first.event.ts);
        for record in &history {
            if let EventBody::TaskStatusUpdateEvent { state, .. } = &record.event.body {
                run.transition(*state, record.event.ts);
            }
        }
        Ok(run)
    }

    /// Reads the materialized summary for `run_id`, if projected.
    fn run_summary(&self, run_id: &RunId) -> Result<Option<decision_gate_core::interfaces::RunSummary>, KernelError> {
        use decision_gate_core::interfaces::Projections;
        let summary = match self {
            Self::InMemory(engine) => engine.projections().run_summary(run_id),
            Self::Sqlite(engine) => engine.projections().run_summary(run_id),
        };
        Ok(summary.map_err(decision_gate_core::FlowEngineError::from)?)
    }
}

/// Reads and validates the base registry document at `path`.
///
/// # Errors
///
/// Returns [`KernelError::RegistryIo`] if the file cannot be read, or
/// [`KernelError::Registry`] if it fails schema or structural validation.
pub fn load_registry(path: &Path) -> Result<Registry, KernelError> {
    let bytes =
        fs::read(path).map_err(|err| KernelError::RegistryIo { path: path.display().to_string(), source: err.to_string() })?;
    Ok(decision_gate_contract::validate_registry_document(&bytes)?)
}
