// decision-gate-core/src/runtime/store.rs
// ============================================================================
// Module: In-Memory Capability Store Implementations
// Description: Simple, process-local implementations of every capability
//              trait, used by the `InMemory` storage profile and by tests.
// Purpose: Provide a deterministic, dependency-free backend so the flow
//          engine can run end to end without a SQLite file.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! Each store here is a `Mutex`-guarded in-memory structure implementing one
//! capability trait from `crate::interfaces`. None of them are durable across
//! process restarts; the SQLite-backed equivalents in
//! `decision-gate-store-sqlite` implement the same traits over a file.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use crate::core::AuditKeyring;
use crate::core::BudgetUsed;
use crate::core::Event;
use crate::core::EventRecord;
use crate::core::RunId;
use crate::core::Timestamp;
use crate::core::hashing::canonical_json_bytes;
use crate::core::hashing::hmac_chain;
use crate::core::identifiers::ApprovalId;
use crate::core::identifiers::JobId;
use crate::core::identifiers::KeyId;
use crate::core::identifiers::TenantId;
use crate::core::model::Approval;
use crate::core::model::ApprovalDecision;
use crate::core::model::StepResult;
use crate::interfaces::ApprovalStore;
use crate::interfaces::ApprovalStoreError;
use crate::interfaces::BillingEntry;
use crate::interfaces::BillingLedger;
use crate::interfaces::BillingLedgerError;
use crate::interfaces::BudgetStore;
use crate::interfaces::BudgetStoreError;
use crate::interfaces::EventLog;
use crate::interfaces::EventLogError;
use crate::interfaces::Job;
use crate::interfaces::JobQueue;
use crate::interfaces::JobQueueError;
use crate::interfaces::Projections;
use crate::interfaces::ProjectionsError;
use crate::interfaces::QuotaError;
use crate::interfaces::QuotaScope;
use crate::interfaces::QuotaStore;
use crate::interfaces::RunSummary;
use crate::interfaces::StepCache;
use crate::interfaces::StepCacheError;

/// Renders a poisoned-mutex error message naming the store it occurred in.
fn poisoned(what: &str) -> String {
    format!("{what} mutex poisoned")
}

// ============================================================================
// SECTION: Event Log
// ============================================================================

/// In-memory, HMAC-chained event log keyed by run id.
#[derive(Clone)]
pub struct InMemoryEventLog {
    /// Keyring used to sign new entries and verify historical ones.
    keyring: Arc<AuditKeyring>,
    /// Per-run append-only row list, in sequence order.
    runs: Arc<Mutex<BTreeMap<String, Vec<EventRecord>>>>,
}

impl InMemoryEventLog {
    /// Creates a new event log signing new entries with `keyring`'s active key.
    #[must_use]
    pub fn new(keyring: Arc<AuditKeyring>) -> Self {
        Self {
            keyring,
            runs: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }
}

impl EventLog for InMemoryEventLog {
    fn append(&self, run_id: &RunId, event: Event) -> Result<EventRecord, EventLogError> {
        let active = self
            .keyring
            .active()
            .map_err(|err| EventLogError::Storage(err.to_string()))?;
        let mut runs = self.runs.lock().map_err(|_| EventLogError::Storage(poisoned("event log")))?;
        let rows = runs.entry(run_id.as_str().to_string()).or_default();
        let seq = u64::try_from(rows.len()).unwrap_or(u64::MAX) + 1;
        let prev_hash = rows.last().map(|row| row.hash.clone()).unwrap_or_default();

        let mut envelope = serde_json::to_value(&event).map_err(|err| EventLogError::Storage(err.to_string()))?;
        if let Some(map) = envelope.as_object_mut() {
            map.insert("_seq".to_string(), serde_json::json!(seq));
        }
        let canonical_bytes =
            canonical_json_bytes(&envelope).map_err(|err| EventLogError::Storage(err.to_string()))?;
        let canonical = String::from_utf8(canonical_bytes.clone())
            .map_err(|err| EventLogError::Storage(err.to_string()))?;
        let digest = hmac_chain(&active.secret, &prev_hash, &canonical_bytes)
            .map_err(|err| EventLogError::Storage(err.to_string()))?;

        let record = EventRecord {
            seq,
            event,
            canonical,
            prev_hash,
            hash: digest.value,
            key_id: active.kid.as_str().to_string(),
        };
        rows.push(record.clone());
        Ok(record)
    }

    fn list_since(&self, run_id: &RunId, after_seq: u64) -> Result<Vec<EventRecord>, EventLogError> {
        let runs = self.runs.lock().map_err(|_| EventLogError::Storage(poisoned("event log")))?;
        Ok(runs
            .get(run_id.as_str())
            .map(|rows| rows.iter().filter(|row| row.seq > after_seq).cloned().collect())
            .unwrap_or_default())
    }

    fn verify_chain(&self, run_id: &RunId) -> Result<(), EventLogError> {
        let runs = self.runs.lock().map_err(|_| EventLogError::Storage(poisoned("event log")))?;
        let rows = runs
            .get(run_id.as_str())
            .ok_or_else(|| EventLogError::EmptyRun(run_id.as_str().to_string()))?;
        if rows.is_empty() {
            return Err(EventLogError::EmptyRun(run_id.as_str().to_string()));
        }
        for row in rows {
            let key = self
                .keyring
                .lookup(&KeyId::new(row.key_id.clone()))
                .map_err(|err| EventLogError::Storage(err.to_string()))?;
            let expected = hmac_chain(&key.secret, &row.prev_hash, row.canonical.as_bytes())
                .map_err(|err| EventLogError::Storage(err.to_string()))?;
            if expected.value != row.hash {
                return Err(EventLogError::ChainBroken {
                    run_id: run_id.as_str().to_string(),
                    seq: row.seq,
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Step Cache
// ============================================================================

/// In-memory idempotency-keyed step result cache.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStepCache {
    /// Cached results, keyed by idempotency key.
    results: Arc<Mutex<HashMap<String, StepResult>>>,
}

impl InMemoryStepCache {
    /// Creates a new, empty step cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StepCache for InMemoryStepCache {
    fn get(&self, idempotency_key: &str) -> Result<Option<StepResult>, StepCacheError> {
        let guard = self.results.lock().map_err(|_| StepCacheError::Storage(poisoned("step cache")))?;
        Ok(guard.get(idempotency_key).cloned())
    }

    fn put(&self, idempotency_key: &str, result: &StepResult) -> Result<(), StepCacheError> {
        let mut guard = self.results.lock().map_err(|_| StepCacheError::Storage(poisoned("step cache")))?;
        guard.insert(idempotency_key.to_string(), result.clone());
        Ok(())
    }
}

// ============================================================================
// SECTION: Approval Store
// ============================================================================

/// In-memory approval request/decision store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryApprovalStore {
    /// Approvals keyed by approval id.
    approvals: Arc<Mutex<BTreeMap<String, Approval>>>,
}

impl InMemoryApprovalStore {
    /// Creates a new, empty approval store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ApprovalStore for InMemoryApprovalStore {
    fn get(&self, approval_id: &ApprovalId) -> Result<Option<Approval>, ApprovalStoreError> {
        let guard = self.approvals.lock().map_err(|_| ApprovalStoreError::Storage(poisoned("approval store")))?;
        Ok(guard.get(approval_id.as_str()).cloned())
    }

    fn create(&self, approval: Approval) -> Result<Approval, ApprovalStoreError> {
        let mut guard = self.approvals.lock().map_err(|_| ApprovalStoreError::Storage(poisoned("approval store")))?;
        let entry = guard.entry(approval.approval_id.as_str().to_string()).or_insert(approval);
        Ok(entry.clone())
    }

    fn decide(
        &self,
        approval_id: &ApprovalId,
        decision: ApprovalDecision,
    ) -> Result<Approval, ApprovalStoreError> {
        let mut guard = self.approvals.lock().map_err(|_| ApprovalStoreError::Storage(poisoned("approval store")))?;
        let approval = guard
            .get_mut(approval_id.as_str())
            .ok_or_else(|| ApprovalStoreError::Storage(format!("unknown approval {approval_id}")))?;
        if approval.decision.is_some() {
            return Err(ApprovalStoreError::AlreadyDecided(approval_id.as_str().to_string()));
        }
        approval.decided_at = Some(decision.ts);
        approval.decision = Some(decision);
        Ok(approval.clone())
    }
}

// ============================================================================
// SECTION: Budget Store
// ============================================================================

/// In-memory per-run budget accounting.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBudgetStore {
    /// Budget counters keyed by run id.
    budgets: Arc<Mutex<BTreeMap<String, BudgetUsed>>>,
}

impl InMemoryBudgetStore {
    /// Creates a new, empty budget store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BudgetStore for InMemoryBudgetStore {
    fn load(&self, run_id: &RunId) -> Result<BudgetUsed, BudgetStoreError> {
        let guard = self.budgets.lock().map_err(|_| BudgetStoreError::Storage(poisoned("budget store")))?;
        Ok(guard.get(run_id.as_str()).cloned().unwrap_or_default())
    }

    fn record_tool_call(
        &self,
        run_id: &RunId,
        tool_id: &str,
        action_id: &str,
        cost_units: u64,
    ) -> Result<BudgetUsed, BudgetStoreError> {
        let mut guard = self.budgets.lock().map_err(|_| BudgetStoreError::Storage(poisoned("budget store")))?;
        let budget = guard.entry(run_id.as_str().to_string()).or_default();
        budget.tool_calls += 1;
        budget.cost_units += cost_units;
        *budget.per_tool.entry(tool_id.to_string()).or_insert(0) += 1;
        *budget.per_action.entry(action_id.to_string()).or_insert(0) += 1;
        Ok(budget.clone())
    }

    fn record_llm_call(&self, run_id: &RunId, cost_units: u64) -> Result<BudgetUsed, BudgetStoreError> {
        let mut guard = self.budgets.lock().map_err(|_| BudgetStoreError::Storage(poisoned("budget store")))?;
        let budget = guard.entry(run_id.as_str().to_string()).or_default();
        budget.llm_calls += 1;
        budget.cost_units += cost_units;
        Ok(budget.clone())
    }
}

// ============================================================================
// SECTION: Quota Store
// ============================================================================

/// In-memory tenant daily quota tracker, keyed by `(tenant, day, scope, model)`.
#[derive(Debug, Default, Clone)]
pub struct InMemoryQuotaStore {
    /// Consumption so far, keyed by `(tenant_id, day, scope, model)`.
    usage: Arc<Mutex<BTreeMap<(String, String, QuotaScope, String), u64>>>,
}

impl InMemoryQuotaStore {
    /// Creates a new, empty quota store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Extracts the `YYYY-MM-DD` UTC day prefix from an RFC 3339 timestamp.
fn day_of(now: &Timestamp) -> String {
    now.as_str().get(..10).unwrap_or(now.as_str()).to_string()
}

impl QuotaStore for InMemoryQuotaStore {
    fn check_and_consume(
        &self,
        tenant_id: &TenantId,
        scope: QuotaScope,
        model: &str,
        amount: u64,
        limit: u64,
        now: &Timestamp,
    ) -> Result<(), QuotaError> {
        let mut guard = self.usage.lock().map_err(|_| QuotaError::Storage(poisoned("quota store")))?;
        let key = (tenant_id.as_str().to_string(), day_of(now), scope, model.to_string());
        let used = guard.get(&key).copied().unwrap_or(0);
        let projected = used.saturating_add(amount);
        if projected > limit {
            return Err(QuotaError::Exceeded {
                tenant_id: tenant_id.as_str().to_string(),
                scope,
                limit,
            });
        }
        guard.insert(key, projected);
        Ok(())
    }
}

// ============================================================================
// SECTION: Billing Ledger
// ============================================================================

/// A single billing ledger row, retained in memory for inspection in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingLedgerRow {
    /// Charged tenant.
    pub tenant_id: String,
    /// Charged organization, when known.
    pub org_id: Option<String>,
    /// Charged user, when known.
    pub user_id: Option<String>,
    /// Originating run.
    pub run_id: String,
    /// What kind of charge this row records (e.g. `"tool_call"`, `"llm_select_nodes"`, `"llm_plan"`).
    pub kind: String,
    /// Model identifier, for LLM-call rows.
    pub model: Option<String>,
    /// Tokens charged, for LLM-call rows.
    pub tokens: Option<u64>,
    /// Cost units charged.
    pub cost_units: u64,
    /// Charge timestamp, RFC 3339.
    pub ts: String,
}

/// In-memory, append-only billing ledger.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBillingLedger {
    /// Rows recorded so far, in insertion order.
    rows: Arc<Mutex<Vec<BillingLedgerRow>>>,
}

impl InMemoryBillingLedger {
    /// Creates a new, empty billing ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every row recorded so far, for test assertions. Returns an
    /// empty vector if the internal mutex is poisoned rather than panicking.
    #[must_use]
    pub fn rows(&self) -> Vec<BillingLedgerRow> {
        self.rows.lock().map(|guard| guard.clone()).unwrap_or_default()
    }
}

impl BillingLedger for InMemoryBillingLedger {
    fn record(&self, entry: &BillingEntry) -> Result<(), BillingLedgerError> {
        let mut guard = self.rows.lock().map_err(|_| BillingLedgerError::Storage(poisoned("billing ledger")))?;
        guard.push(BillingLedgerRow {
            tenant_id: entry.tenant_id.as_str().to_string(),
            org_id: entry.org_id.as_ref().map(|id| id.as_str().to_string()),
            user_id: entry.user_id.as_ref().map(|id| id.as_str().to_string()),
            run_id: entry.run_id.as_str().to_string(),
            kind: entry.kind.clone(),
            model: entry.model.clone(),
            tokens: entry.tokens,
            cost_units: entry.cost_units,
            ts: entry.ts.as_str().to_string(),
        });
        Ok(())
    }
}

// ============================================================================
// SECTION: Job Queue
// ============================================================================

/// Mutable state guarded by [`InMemoryJobQueue`]'s mutex.
struct JobQueueState {
    /// Jobs waiting to be claimed, oldest first.
    queued: VecDeque<Job>,
    /// Jobs currently claimed, keyed by job id.
    running: HashMap<String, Job>,
    /// Count of running jobs per tenant, for slot accounting.
    tenant_running: HashMap<String, u64>,
}

/// In-memory FIFO job queue with a per-tenant concurrency slot limit.
#[derive(Clone)]
pub struct InMemoryJobQueue {
    /// Maximum jobs any one tenant may have running at once.
    max_concurrent_per_tenant: u64,
    /// Guarded queue state.
    state: Arc<Mutex<JobQueueState>>,
}

impl InMemoryJobQueue {
    /// Creates a new job queue allowing up to `max_concurrent_per_tenant`
    /// jobs running at once for any one tenant.
    #[must_use]
    pub fn new(max_concurrent_per_tenant: u64) -> Self {
        Self {
            max_concurrent_per_tenant,
            state: Arc::new(Mutex::new(JobQueueState {
                queued: VecDeque::new(),
                running: HashMap::new(),
                tenant_running: HashMap::new(),
            })),
        }
    }
}

impl JobQueue for InMemoryJobQueue {
    fn enqueue(&self, job: Job) -> Result<JobId, JobQueueError> {
        let mut state = self.state.lock().map_err(|_| JobQueueError::Storage(poisoned("job queue")))?;
        let job_id = job.job_id.clone();
        state.queued.push_back(job);
        Ok(job_id)
    }

    fn claim(&self, _worker_id: &str) -> Result<Option<Job>, JobQueueError> {
        let mut state = self.state.lock().map_err(|_| JobQueueError::Storage(poisoned("job queue")))?;
        let mut claimable_index = None;
        for (index, job) in state.queued.iter().enumerate() {
            let running = state.tenant_running.get(job.tenant_id.as_str()).copied().unwrap_or(0);
            if running < self.max_concurrent_per_tenant {
                claimable_index = Some(index);
                break;
            }
        }
        let Some(index) = claimable_index else {
            return Ok(None);
        };
        let Some(job) = state.queued.remove(index) else {
            return Ok(None);
        };
        *state.tenant_running.entry(job.tenant_id.as_str().to_string()).or_insert(0) += 1;
        state.running.insert(job.job_id.as_str().to_string(), job.clone());
        Ok(Some(job))
    }

    fn complete(&self, job_id: &JobId) -> Result<(), JobQueueError> {
        let mut state = self.state.lock().map_err(|_| JobQueueError::Storage(poisoned("job queue")))?;
        release_slot(&mut state, job_id);
        Ok(())
    }

    fn fail(&self, job_id: &JobId, requeue: bool) -> Result<(), JobQueueError> {
        let mut state = self.state.lock().map_err(|_| JobQueueError::Storage(poisoned("job queue")))?;
        if let Some(job) = release_slot(&mut state, job_id) {
            if requeue {
                state.queued.push_back(job);
            }
        }
        Ok(())
    }
}

/// Removes `job_id` from `running` and frees its tenant's concurrency slot,
/// returning the removed job so the caller can decide whether to requeue it.
fn release_slot(state: &mut JobQueueState, job_id: &JobId) -> Option<Job> {
    let job = state.running.remove(job_id.as_str())?;
    if let Some(count) = state.tenant_running.get_mut(job.tenant_id.as_str()) {
        *count = count.saturating_sub(1);
    }
    Some(job)
}

// ============================================================================
// SECTION: Projections
// ============================================================================

/// In-memory materialized run summaries, updated synchronously by the flow
/// engine as events are appended; `refresh` is a no-op for this profile since
/// there is no separate derivation lag to catch up on.
#[derive(Debug, Default, Clone)]
pub struct InMemoryProjections {
    /// Materialized summaries keyed by run id.
    summaries: Arc<Mutex<BTreeMap<String, RunSummary>>>,
}

impl InMemoryProjections {
    /// Creates a new, empty projection store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Projections for InMemoryProjections {
    fn run_summary(&self, run_id: &RunId) -> Result<Option<RunSummary>, ProjectionsError> {
        let guard = self.summaries.lock().map_err(|_| ProjectionsError::Storage(poisoned("projections")))?;
        Ok(guard.get(run_id.as_str()).cloned())
    }

    fn observe(&self, summary: RunSummary) -> Result<(), ProjectionsError> {
        let mut guard = self.summaries.lock().map_err(|_| ProjectionsError::Storage(poisoned("projections")))?;
        guard.insert(summary.run_id.as_str().to_string(), summary);
        Ok(())
    }

    fn refresh(&self) -> Result<(), ProjectionsError> {
        Ok(())
    }
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
    use super::*;
    use crate::core::identifiers::TaskId;
    use crate::core::model::EventBody;
    use crate::core::model::RunState;
    use crate::core::time::Timestamp;
    use crate::interfaces::JobKind;
    use std::collections::BTreeMap as Map;
    use time::OffsetDateTime;

    fn keyring() -> Arc<AuditKeyring> {
        Arc::new(AuditKeyring::new(vec![crate::core::hashing::AuditKey {
            kid: KeyId::new("k1"),
            secret: b"secret".to_vec(),
            active: true,
        }]))
    }

    fn now() -> Timestamp {
        Timestamp::from_offset(OffsetDateTime::now_utc())
    }

    #[test]
    fn event_log_chains_and_verifies() {
        let log = InMemoryEventLog::new(keyring());
        let run_id = RunId::new("r1");
        for i in 0..3 {
            log.append(
                &run_id,
                Event {
                    ts: now(),
                    task_id: TaskId::new("t1"),
                    run_id: run_id.clone(),
                    body: EventBody::TaskStatusUpdateEvent {
                        state: RunState::Working,
                        message: format!("step {i}"),
                        meta: Map::new(),
                    },
                },
            )
            .unwrap();
        }
        assert!(log.verify_chain(&run_id).is_ok());
        let rows = log.list_since(&run_id, 0).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].prev_hash, "");
        assert_eq!(rows[1].prev_hash, rows[0].hash);
    }

    #[test]
    fn event_log_tampering_breaks_verification() {
        let log = InMemoryEventLog::new(keyring());
        let run_id = RunId::new("r1");
        log.append(
            &run_id,
            Event {
                ts: now(),
                task_id: TaskId::new("t1"),
                run_id: run_id.clone(),
                body: EventBody::TaskStatusUpdateEvent {
                    state: RunState::Working,
                    message: "hi".to_string(),
                    meta: Map::new(),
                },
            },
        )
        .unwrap();
        {
            let mut runs = log.runs.lock().unwrap();
            let rows = runs.get_mut(run_id.as_str()).unwrap();
            rows[0].hash = "tampered".to_string();
        }
        assert!(matches!(log.verify_chain(&run_id), Err(EventLogError::ChainBroken { .. })));
    }

    #[test]
    fn quota_store_rejects_once_limit_exceeded() {
        let store = InMemoryQuotaStore::new();
        let tenant = TenantId::new("t1");
        let ts = now();
        store.check_and_consume(&tenant, QuotaScope::CostUnits, "gpt-test", 5, 10, &ts).unwrap();
        store.check_and_consume(&tenant, QuotaScope::CostUnits, "gpt-test", 4, 10, &ts).unwrap();
        let err = store.check_and_consume(&tenant, QuotaScope::CostUnits, "gpt-test", 4, 10, &ts).unwrap_err();
        assert!(matches!(err, QuotaError::Exceeded { .. }));
    }

    #[test]
    fn quota_store_tracks_models_independently() {
        let store = InMemoryQuotaStore::new();
        let tenant = TenantId::new("t1");
        let ts = now();
        store.check_and_consume(&tenant, QuotaScope::Tokens, "gpt-a", 8, 10, &ts).unwrap();
        store.check_and_consume(&tenant, QuotaScope::Tokens, "gpt-b", 8, 10, &ts).unwrap();
    }

    #[test]
    fn job_queue_respects_tenant_concurrency_slots() {
        let queue = InMemoryJobQueue::new(1);
        let tenant = TenantId::new("t1");
        let job = |id: &str| Job {
            job_id: JobId::new(id),
            tenant_id: tenant.clone(),
            run_id: RunId::new(id),
            kind: JobKind::Advance,
            created_at: now(),
        };
        queue.enqueue(job("j1")).unwrap();
        queue.enqueue(job("j2")).unwrap();
        let claimed = queue.claim("w1").unwrap().unwrap();
        assert_eq!(claimed.job_id, JobId::new("j1"));
        assert!(queue.claim("w1").unwrap().is_none());
        queue.complete(&claimed.job_id).unwrap();
        let next = queue.claim("w1").unwrap().unwrap();
        assert_eq!(next.job_id, JobId::new("j2"));
    }

    #[test]
    fn approval_store_rejects_double_decision() {
        let store = InMemoryApprovalStore::new();
        let run_id = RunId::new("r1");
        let approval_id = Approval::id_for_run(&run_id);
        store
            .create(Approval {
                approval_id: approval_id.clone(),
                run_id: run_id.clone(),
                payload: serde_json::json!({}),
                decision: None,
                created_at: now(),
                decided_at: None,
            })
            .unwrap();
        let decision = ApprovalDecision {
            decision: crate::core::model::ApprovalVerdict::Approved,
            by: "alice".to_string(),
            ts: now(),
            reason: None,
        };
        store.decide(&approval_id, decision.clone()).unwrap();
        assert!(matches!(
            store.decide(&approval_id, decision),
            Err(ApprovalStoreError::AlreadyDecided(_))
        ));
    }
}
