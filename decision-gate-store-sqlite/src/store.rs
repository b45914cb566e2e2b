// decision-gate-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Capability Store Implementations
// Description: Durable, SQLite-backed implementations of every kernel
//              capability trait, sharing one connection per process.
// Purpose: Give the flow engine a crash-safe storage profile that survives
//          process restarts, behind the same traits the in-memory profile
//          implements.
// Dependencies: decision-gate-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! `SqliteProfile::open` opens one `SQLite` connection, applies durability
//! pragmas, and migrates the schema. Each capability trait is implemented by
//! a small handle struct cloned out of the profile; all handles share the
//! same `Arc<Mutex<Connection>>`, so every write commits inside a single
//! serialized writer, matching `SQLite`'s concurrency model rather than
//! fighting it. Security posture: database contents are untrusted; storage
//! errors never leak raw `SQLite` messages past the `Storage(String)` trait
//! error variants.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use decision_gate_core::ApprovalDecision;
use decision_gate_core::BudgetUsed;
use decision_gate_core::Event;
use decision_gate_core::EventRecord;
use decision_gate_core::RunId;
use decision_gate_core::RunSummary;
use decision_gate_core::StepResult;
use decision_gate_core::TenantId;
use decision_gate_core::Timestamp;
use decision_gate_core::core::AuditKeyring;
use decision_gate_core::core::hashing::canonical_json_bytes;
use decision_gate_core::core::hashing::hmac_chain;
use decision_gate_core::core::identifiers::ApprovalId;
use decision_gate_core::core::identifiers::JobId;
use decision_gate_core::core::identifiers::KeyId;
use decision_gate_core::core::identifiers::OrgId;
use decision_gate_core::core::identifiers::UserId;
use decision_gate_core::core::model::Approval;
use decision_gate_core::interfaces::ApprovalStore;
use decision_gate_core::interfaces::ApprovalStoreError;
use decision_gate_core::interfaces::BillingEntry;
use decision_gate_core::interfaces::BillingLedger;
use decision_gate_core::interfaces::BillingLedgerError;
use decision_gate_core::interfaces::BudgetStore;
use decision_gate_core::interfaces::BudgetStoreError;
use decision_gate_core::interfaces::EventLog;
use decision_gate_core::interfaces::EventLogError;
use decision_gate_core::interfaces::Job;
use decision_gate_core::interfaces::JobKind;
use decision_gate_core::interfaces::JobQueue;
use decision_gate_core::interfaces::JobQueueError;
use decision_gate_core::interfaces::Projections;
use decision_gate_core::interfaces::ProjectionsError;
use decision_gate_core::interfaces::QuotaError;
use decision_gate_core::interfaces::QuotaScope;
use decision_gate_core::interfaces::QuotaStore;
use decision_gate_core::interfaces::StepCache;
use decision_gate_core::interfaces::StepCacheError;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for this store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite`-backed storage profile.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Maximum jobs any one tenant may have running at once.
    #[serde(default = "default_max_concurrent_per_tenant")]
    pub max_concurrent_per_tenant: u64,
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default per-tenant job concurrency slot count.
const fn default_max_concurrent_per_tenant() -> u64 {
    4
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Internal `SQLite` store errors, mapped into each trait's own error type at
/// the call boundary.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
}

impl From<rusqlite::Error> for SqliteStoreError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Db(error.to_string())
    }
}

/// Renders a poisoned-mutex error message naming the handle it occurred in.
fn poisoned(what: &str) -> SqliteStoreError {
    SqliteStoreError::Db(format!("{what} mutex poisoned"))
}

// ============================================================================
// SECTION: Connection Setup
// ============================================================================

/// Ensures the parent directory of `path` exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with secure defaults.
fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability.
fn apply_pragmas(connection: &Connection, config: &SqliteStoreConfig) -> Result<(), SqliteStoreError> {
    connection.execute_batch("PRAGMA foreign_keys = ON;")?;
    connection.execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))?;
    connection.execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))?;
    connection.busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))?;
    Ok(())
}

/// Initializes the `SQLite` schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction()?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")?;
    let version: Option<i64> =
        tx.query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0)).optional()?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS run_events (
                    run_id TEXT NOT NULL,
                    seq INTEGER NOT NULL,
                    event_json TEXT NOT NULL,
                    canonical TEXT NOT NULL,
                    prev_hash TEXT NOT NULL,
                    hash TEXT NOT NULL,
                    key_id TEXT NOT NULL,
                    PRIMARY KEY (run_id, seq)
                );
                CREATE TABLE IF NOT EXISTS step_cache (
                    idempotency_key TEXT PRIMARY KEY,
                    result_json TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS approvals (
                    approval_id TEXT PRIMARY KEY,
                    run_id TEXT NOT NULL,
                    payload_json TEXT NOT NULL,
                    decision_json TEXT,
                    created_at TEXT NOT NULL,
                    decided_at TEXT
                );
                CREATE TABLE IF NOT EXISTS run_budgets (
                    run_id TEXT PRIMARY KEY,
                    tool_calls INTEGER NOT NULL DEFAULT 0,
                    llm_calls INTEGER NOT NULL DEFAULT 0,
                    cost_units INTEGER NOT NULL DEFAULT 0,
                    per_tool_json TEXT NOT NULL DEFAULT '{}',
                    per_action_json TEXT NOT NULL DEFAULT '{}'
                );
                CREATE TABLE IF NOT EXISTS quota_usage (
                    tenant_id TEXT NOT NULL,
                    day TEXT NOT NULL,
                    scope TEXT NOT NULL,
                    model TEXT NOT NULL DEFAULT '',
                    used INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (tenant_id, day, scope, model)
                );
                CREATE TABLE IF NOT EXISTS billing_ledger (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    tenant_id TEXT NOT NULL,
                    org_id TEXT,
                    user_id TEXT,
                    run_id TEXT NOT NULL,
                    kind TEXT NOT NULL DEFAULT '',
                    model TEXT,
                    tokens INTEGER,
                    cost_units INTEGER NOT NULL,
                    ts TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS jobs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    job_id TEXT UNIQUE NOT NULL,
                    tenant_id TEXT NOT NULL,
                    run_id TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    status TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs (status, id);
                CREATE TABLE IF NOT EXISTS tenant_slots (
                    tenant_id TEXT PRIMARY KEY,
                    running INTEGER NOT NULL DEFAULT 0
                );
                CREATE TABLE IF NOT EXISTS run_summaries (
                    run_id TEXT PRIMARY KEY,
                    tenant_id TEXT NOT NULL,
                    state TEXT NOT NULL,
                    step_count INTEGER NOT NULL,
                    budget_json TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS audit_keys (
                    kid TEXT PRIMARY KEY,
                    active INTEGER NOT NULL
                );",
            )?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!("unsupported schema version: {value}")));
        }
    }
    tx.commit()?;
    Ok(())
}

// ============================================================================
// SECTION: Profile
// ============================================================================

/// Opens and owns the shared connection behind every `SQLite` capability
/// handle. One profile per process; handles are cheap to clone and hand out
/// to the flow engine's generic parameters.
#[derive(Clone)]
pub struct SqliteProfile {
    conn: Arc<Mutex<Connection>>,
    keyring: Arc<AuditKeyring>,
    max_concurrent_per_tenant: u64,
}

impl SqliteProfile {
    /// Opens a durable storage profile at `config.path`, migrating the schema
    /// if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened,
    /// validated, or migrated.
    pub fn open(config: &SqliteStoreConfig, keyring: Arc<AuditKeyring>) -> Result<Self, SqliteStoreError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(connection)),
            keyring,
            max_concurrent_per_tenant: config.max_concurrent_per_tenant,
        })
    }

    /// Returns a handle implementing [`EventLog`].
    #[must_use]
    pub fn event_log(&self) -> SqliteEventLog {
        SqliteEventLog {
            conn: Arc::clone(&self.conn),
            keyring: Arc::clone(&self.keyring),
        }
    }

    /// Returns a handle implementing [`StepCache`].
    #[must_use]
    pub fn step_cache(&self) -> SqliteStepCache {
        SqliteStepCache {
            conn: Arc::clone(&self.conn),
        }
    }

    /// Returns a handle implementing [`ApprovalStore`].
    #[must_use]
    pub fn approval_store(&self) -> SqliteApprovalStore {
        SqliteApprovalStore {
            conn: Arc::clone(&self.conn),
        }
    }

    /// Returns a handle implementing [`BudgetStore`].
    #[must_use]
    pub fn budget_store(&self) -> SqliteBudgetStore {
        SqliteBudgetStore {
            conn: Arc::clone(&self.conn),
        }
    }

    /// Returns a handle implementing [`QuotaStore`].
    #[must_use]
    pub fn quota_store(&self) -> SqliteQuotaStore {
        SqliteQuotaStore {
            conn: Arc::clone(&self.conn),
        }
    }

    /// Returns a handle implementing [`BillingLedger`].
    #[must_use]
    pub fn billing_ledger(&self) -> SqliteBillingLedger {
        SqliteBillingLedger {
            conn: Arc::clone(&self.conn),
        }
    }

    /// Returns a handle implementing [`JobQueue`].
    #[must_use]
    pub fn job_queue(&self) -> SqliteJobQueue {
        SqliteJobQueue {
            conn: Arc::clone(&self.conn),
            max_concurrent_per_tenant: self.max_concurrent_per_tenant,
        }
    }

    /// Returns a handle implementing [`Projections`].
    #[must_use]
    pub fn projections(&self) -> SqliteProjections {
        SqliteProjections {
            conn: Arc::clone(&self.conn),
        }
    }
}

// ============================================================================
// SECTION: Event Log
// ============================================================================

/// `SQLite`-backed, HMAC-chained event log.
#[derive(Clone)]
pub struct SqliteEventLog {
    conn: Arc<Mutex<Connection>>,
    keyring: Arc<AuditKeyring>,
}

impl EventLog for SqliteEventLog {
    fn append(&self, run_id: &RunId, event: Event) -> Result<EventRecord, EventLogError> {
        let active = self.keyring.active().map_err(|err| EventLogError::Storage(err.to_string()))?;
        let mut guard = self.conn.lock().map_err(|_| EventLogError::Storage(poisoned("event log").to_string()))?;
        let tx = guard.transaction().map_err(|err| EventLogError::Storage(err.to_string()))?;

        let prev_hash: Option<String> = tx
            .query_row(
                "SELECT hash FROM run_events WHERE run_id = ?1 ORDER BY seq DESC LIMIT 1",
                params![run_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| EventLogError::Storage(err.to_string()))?;
        let next_seq: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM run_events WHERE run_id = ?1",
                params![run_id.as_str()],
                |row| row.get(0),
            )
            .map_err(|err| EventLogError::Storage(err.to_string()))?;
        let seq = u64::try_from(next_seq).unwrap_or(u64::MAX);
        let prev_hash = prev_hash.unwrap_or_default();

        let event_json = serde_json::to_string(&event).map_err(|err| EventLogError::Storage(err.to_string()))?;
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

        tx.execute(
            "INSERT INTO run_events (run_id, seq, event_json, canonical, prev_hash, hash, key_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run_id.as_str(),
                next_seq,
                event_json,
                canonical,
                prev_hash,
                digest.value,
                active.kid.as_str(),
            ],
        )
        .map_err(|err| EventLogError::Storage(err.to_string()))?;
        tx.commit().map_err(|err| EventLogError::Storage(err.to_string()))?;

        Ok(EventRecord {
            seq,
            event,
            canonical,
            prev_hash,
            hash: digest.value,
            key_id: active.kid.as_str().to_string(),
        })
    }

    fn list_since(&self, run_id: &RunId, after_seq: u64) -> Result<Vec<EventRecord>, EventLogError> {
        let guard = self.conn.lock().map_err(|_| EventLogError::Storage(poisoned("event log").to_string()))?;
        let mut stmt = guard
            .prepare(
                "SELECT seq, event_json, canonical, prev_hash, hash, key_id
                 FROM run_events WHERE run_id = ?1 AND seq > ?2 ORDER BY seq ASC",
            )
            .map_err(|err| EventLogError::Storage(err.to_string()))?;
        let after = i64::try_from(after_seq).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![run_id.as_str(), after], row_to_event_record)
            .map_err(|err| EventLogError::Storage(err.to_string()))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|err| EventLogError::Storage(err.to_string()))?);
        }
        Ok(out)
    }

    fn verify_chain(&self, run_id: &RunId) -> Result<(), EventLogError> {
        let guard = self.conn.lock().map_err(|_| EventLogError::Storage(poisoned("event log").to_string()))?;
        let mut stmt = guard
            .prepare(
                "SELECT seq, event_json, canonical, prev_hash, hash, key_id
                 FROM run_events WHERE run_id = ?1 ORDER BY seq ASC",
            )
            .map_err(|err| EventLogError::Storage(err.to_string()))?;
        let rows = stmt
            .query_map(params![run_id.as_str()], row_to_event_record)
            .map_err(|err| EventLogError::Storage(err.to_string()))?;
        let mut any = false;
        for row in rows {
            let record = row.map_err(|err| EventLogError::Storage(err.to_string()))?;
            any = true;
            let key = self
                .keyring
                .lookup(&KeyId::new(record.key_id.clone()))
                .map_err(|err| EventLogError::Storage(err.to_string()))?;
            let expected = hmac_chain(&key.secret, &record.prev_hash, record.canonical.as_bytes())
                .map_err(|err| EventLogError::Storage(err.to_string()))?;
            if expected.value != record.hash {
                return Err(EventLogError::ChainBroken {
                    run_id: run_id.as_str().to_string(),
                    seq: record.seq,
                });
            }
        }
        if !any {
            return Err(EventLogError::EmptyRun(run_id.as_str().to_string()));
        }
        Ok(())
    }
}

/// Deserializes one `run_events` row into an [`EventRecord`].
fn row_to_event_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRecord> {
    let seq: i64 = row.get(0)?;
    let event_json: String = row.get(1)?;
    let canonical: String = row.get(2)?;
    let prev_hash: String = row.get(3)?;
    let hash: String = row.get(4)?;
    let key_id: String = row.get(5)?;
    let event: Event = serde_json::from_str(&event_json)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(err)))?;
    Ok(EventRecord {
        seq: u64::try_from(seq).unwrap_or(u64::MAX),
        event,
        canonical,
        prev_hash,
        hash,
        key_id,
    })
}

// ============================================================================
// SECTION: Step Cache
// ============================================================================

/// `SQLite`-backed idempotency-keyed step result cache.
#[derive(Clone)]
pub struct SqliteStepCache {
    conn: Arc<Mutex<Connection>>,
}

impl StepCache for SqliteStepCache {
    fn get(&self, idempotency_key: &str) -> Result<Option<StepResult>, StepCacheError> {
        let guard = self.conn.lock().map_err(|_| StepCacheError::Storage(poisoned("step cache").to_string()))?;
        let result_json: Option<String> = guard
            .query_row(
                "SELECT result_json FROM step_cache WHERE idempotency_key = ?1",
                params![idempotency_key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| StepCacheError::Storage(err.to_string()))?;
        result_json
            .map(|json| serde_json::from_str(&json).map_err(|err| StepCacheError::Storage(err.to_string())))
            .transpose()
    }

    fn put(&self, idempotency_key: &str, result: &StepResult) -> Result<(), StepCacheError> {
        let guard = self.conn.lock().map_err(|_| StepCacheError::Storage(poisoned("step cache").to_string()))?;
        let json = serde_json::to_string(result).map_err(|err| StepCacheError::Storage(err.to_string()))?;
        guard
            .execute(
                "INSERT INTO step_cache (idempotency_key, result_json) VALUES (?1, ?2)
                 ON CONFLICT(idempotency_key) DO UPDATE SET result_json = excluded.result_json",
                params![idempotency_key, json],
            )
            .map_err(|err| StepCacheError::Storage(err.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Approval Store
// ============================================================================

/// `SQLite`-backed approval request/decision store.
#[derive(Clone)]
pub struct SqliteApprovalStore {
    conn: Arc<Mutex<Connection>>,
}

/// Reconstructs an [`Approval`] from a `approvals` row.
fn row_to_approval(row: &rusqlite::Row<'_>) -> rusqlite::Result<Approval> {
    let approval_id: String = row.get(0)?;
    let run_id: String = row.get(1)?;
    let payload_json: String = row.get(2)?;
    let decision_json: Option<String> = row.get(3)?;
    let created_at: String = row.get(4)?;
    let decided_at: Option<String> = row.get(5)?;
    let payload = serde_json::from_str(&payload_json)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(err)))?;
    let decision = decision_json
        .map(|json| {
            serde_json::from_str::<ApprovalDecision>(&json).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(err))
            })
        })
        .transpose()?;
    let created_at = Timestamp::parse(&created_at)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(err)))?;
    let decided_at = decided_at
        .map(|value| {
            Timestamp::parse(&value).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(err))
            })
        })
        .transpose()?;
    Ok(Approval {
        approval_id: ApprovalId::new(approval_id),
        run_id: RunId::new(run_id),
        payload,
        decision,
        created_at,
        decided_at,
    })
}

impl ApprovalStore for SqliteApprovalStore {
    fn get(&self, approval_id: &ApprovalId) -> Result<Option<Approval>, ApprovalStoreError> {
        let guard =
            self.conn.lock().map_err(|_| ApprovalStoreError::Storage(poisoned("approval store").to_string()))?;
        guard
            .query_row(
                "SELECT approval_id, run_id, payload_json, decision_json, created_at, decided_at
                 FROM approvals WHERE approval_id = ?1",
                params![approval_id.as_str()],
                row_to_approval,
            )
            .optional()
            .map_err(|err| ApprovalStoreError::Storage(err.to_string()))
    }

    fn create(&self, approval: Approval) -> Result<Approval, ApprovalStoreError> {
        let guard =
            self.conn.lock().map_err(|_| ApprovalStoreError::Storage(poisoned("approval store").to_string()))?;
        let payload_json =
            serde_json::to_string(&approval.payload).map_err(|err| ApprovalStoreError::Storage(err.to_string()))?;
        guard
            .execute(
                "INSERT OR IGNORE INTO approvals (approval_id, run_id, payload_json, decision_json, created_at, \
                 decided_at) VALUES (?1, ?2, ?3, NULL, ?4, NULL)",
                params![
                    approval.approval_id.as_str(),
                    approval.run_id.as_str(),
                    payload_json,
                    approval.created_at.as_str(),
                ],
            )
            .map_err(|err| ApprovalStoreError::Storage(err.to_string()))?;
        guard
            .query_row(
                "SELECT approval_id, run_id, payload_json, decision_json, created_at, decided_at
                 FROM approvals WHERE approval_id = ?1",
                params![approval.approval_id.as_str()],
                row_to_approval,
            )
            .map_err(|err| ApprovalStoreError::Storage(err.to_string()))
    }

    fn decide(
        &self,
        approval_id: &ApprovalId,
        decision: ApprovalDecision,
    ) -> Result<Approval, ApprovalStoreError> {
        let guard =
            self.conn.lock().map_err(|_| ApprovalStoreError::Storage(poisoned("approval store").to_string()))?;
        let existing: Option<Option<String>> = guard
            .query_row(
                "SELECT decision_json FROM approvals WHERE approval_id = ?1",
                params![approval_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| ApprovalStoreError::Storage(err.to_string()))?;
        let existing =
            existing.ok_or_else(|| ApprovalStoreError::Storage(format!("unknown approval {approval_id}")))?;
        if existing.is_some() {
            return Err(ApprovalStoreError::AlreadyDecided(approval_id.as_str().to_string()));
        }
        let decision_json =
            serde_json::to_string(&decision).map_err(|err| ApprovalStoreError::Storage(err.to_string()))?;
        guard
            .execute(
                "UPDATE approvals SET decision_json = ?1, decided_at = ?2 WHERE approval_id = ?3",
                params![decision_json, decision.ts.as_str(), approval_id.as_str()],
            )
            .map_err(|err| ApprovalStoreError::Storage(err.to_string()))?;
        guard
            .query_row(
                "SELECT approval_id, run_id, payload_json, decision_json, created_at, decided_at
                 FROM approvals WHERE approval_id = ?1",
                params![approval_id.as_str()],
                row_to_approval,
            )
            .map_err(|err| ApprovalStoreError::Storage(err.to_string()))
    }
}

// ============================================================================
// SECTION: Budget Store
// ============================================================================

/// `SQLite`-backed per-run budget accounting.
#[derive(Clone)]
pub struct SqliteBudgetStore {
    conn: Arc<Mutex<Connection>>,
}

/// Loads `run_id`'s current budget row, defaulting to zero usage.
fn load_budget(tx: &rusqlite::Transaction<'_>, run_id: &RunId) -> Result<BudgetUsed, SqliteStoreError> {
    let row: Option<(i64, i64, i64, String, String)> = tx
        .query_row(
            "SELECT tool_calls, llm_calls, cost_units, per_tool_json, per_action_json
             FROM run_budgets WHERE run_id = ?1",
            params![run_id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )
        .optional()?;
    let Some((tool_calls, llm_calls, cost_units, per_tool_json, per_action_json)) = row else {
        return Ok(BudgetUsed::default());
    };
    Ok(BudgetUsed {
        tool_calls: u64::try_from(tool_calls).unwrap_or_default(),
        llm_calls: u64::try_from(llm_calls).unwrap_or_default(),
        cost_units: u64::try_from(cost_units).unwrap_or_default(),
        per_tool: serde_json::from_str(&per_tool_json).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?,
        per_action: serde_json::from_str(&per_action_json)
            .map_err(|err| SqliteStoreError::Invalid(err.to_string()))?,
    })
}

/// Upserts `run_id`'s budget row with `budget`'s current counters.
fn save_budget(
    tx: &rusqlite::Transaction<'_>,
    run_id: &RunId,
    budget: &BudgetUsed,
) -> Result<(), SqliteStoreError> {
    let per_tool_json =
        serde_json::to_string(&budget.per_tool).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    let per_action_json =
        serde_json::to_string(&budget.per_action).map_err(|err| SqliteStoreError::Invalid(err.to_string()))?;
    tx.execute(
        "INSERT INTO run_budgets (run_id, tool_calls, llm_calls, cost_units, per_tool_json, per_action_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(run_id) DO UPDATE SET
             tool_calls = excluded.tool_calls,
             llm_calls = excluded.llm_calls,
             cost_units = excluded.cost_units,
             per_tool_json = excluded.per_tool_json,
             per_action_json = excluded.per_action_json",
        params![
            run_id.as_str(),
            i64::try_from(budget.tool_calls).unwrap_or(i64::MAX),
            i64::try_from(budget.llm_calls).unwrap_or(i64::MAX),
            i64::try_from(budget.cost_units).unwrap_or(i64::MAX),
            per_tool_json,
            per_action_json,
        ],
    )?;
    Ok(())
}

impl BudgetStore for SqliteBudgetStore {
    fn load(&self, run_id: &RunId) -> Result<BudgetUsed, BudgetStoreError> {
        let mut guard =
            self.conn.lock().map_err(|_| BudgetStoreError::Storage(poisoned("budget store").to_string()))?;
        let tx = guard.transaction().map_err(|err| BudgetStoreError::Storage(err.to_string()))?;
        let budget = load_budget(&tx, run_id).map_err(|err| BudgetStoreError::Storage(err.to_string()))?;
        tx.commit().map_err(|err| BudgetStoreError::Storage(err.to_string()))?;
        Ok(budget)
    }

    fn record_tool_call(
        &self,
        run_id: &RunId,
        tool_id: &str,
        action_id: &str,
        cost_units: u64,
    ) -> Result<BudgetUsed, BudgetStoreError> {
        let mut guard =
            self.conn.lock().map_err(|_| BudgetStoreError::Storage(poisoned("budget store").to_string()))?;
        let tx = guard.transaction().map_err(|err| BudgetStoreError::Storage(err.to_string()))?;
        let mut budget = load_budget(&tx, run_id).map_err(|err| BudgetStoreError::Storage(err.to_string()))?;
        budget.tool_calls += 1;
        budget.cost_units += cost_units;
        *budget.per_tool.entry(tool_id.to_string()).or_insert(0) += 1;
        *budget.per_action.entry(action_id.to_string()).or_insert(0) += 1;
        save_budget(&tx, run_id, &budget).map_err(|err| BudgetStoreError::Storage(err.to_string()))?;
        tx.commit().map_err(|err| BudgetStoreError::Storage(err.to_string()))?;
        Ok(budget)
    }

    fn record_llm_call(&self, run_id: &RunId, cost_units: u64) -> Result<BudgetUsed, BudgetStoreError> {
        let mut guard =
            self.conn.lock().map_err(|_| BudgetStoreError::Storage(poisoned("budget store").to_string()))?;
        let tx = guard.transaction().map_err(|err| BudgetStoreError::Storage(err.to_string()))?;
        let mut budget = load_budget(&tx, run_id).map_err(|err| BudgetStoreError::Storage(err.to_string()))?;
        budget.llm_calls += 1;
        budget.cost_units += cost_units;
        save_budget(&tx, run_id, &budget).map_err(|err| BudgetStoreError::Storage(err.to_string()))?;
        tx.commit().map_err(|err| BudgetStoreError::Storage(err.to_string()))?;
        Ok(budget)
    }
}

// ============================================================================
// SECTION: Quota Store
// ============================================================================

/// `SQLite`-backed tenant daily quota tracker.
#[derive(Clone)]
pub struct SqliteQuotaStore {
    conn: Arc<Mutex<Connection>>,
}

/// Extracts the `YYYY-MM-DD` UTC day prefix from an RFC 3339 timestamp.
fn day_of(now: &Timestamp) -> String {
    now.as_str().get(..10).unwrap_or(now.as_str()).to_string()
}

/// Renders a quota scope as its stable `SQLite` row key.
const fn scope_label(scope: QuotaScope) -> &'static str {
    match scope {
        QuotaScope::Tokens => "tokens",
        QuotaScope::CostUnits => "cost_units",
    }
}

impl QuotaStore for SqliteQuotaStore {
    fn check_and_consume(
        &self,
        tenant_id: &TenantId,
        scope: QuotaScope,
        model: &str,
        amount: u64,
        limit: u64,
        now: &Timestamp,
    ) -> Result<(), QuotaError> {
        let mut guard = self.conn.lock().map_err(|_| QuotaError::Storage(poisoned("quota store").to_string()))?;
        let tx = guard.transaction().map_err(|err| QuotaError::Storage(err.to_string()))?;
        let day = day_of(now);
        let scope_key = scope_label(scope);
        let used: i64 = tx
            .query_row(
                "SELECT used FROM quota_usage WHERE tenant_id = ?1 AND day = ?2 AND scope = ?3 AND model = ?4",
                params![tenant_id.as_str(), day, scope_key, model],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| QuotaError::Storage(err.to_string()))?
            .unwrap_or(0);
        let used = u64::try_from(used).unwrap_or(0);
        let projected = used.saturating_add(amount);
        if projected > limit {
            return Err(QuotaError::Exceeded {
                tenant_id: tenant_id.as_str().to_string(),
                scope,
                limit,
            });
        }
        tx.execute(
            "INSERT INTO quota_usage (tenant_id, day, scope, model, used) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(tenant_id, day, scope, model) DO UPDATE SET used = excluded.used",
            params![tenant_id.as_str(), day, scope_key, model, i64::try_from(projected).unwrap_or(i64::MAX)],
        )
        .map_err(|err| QuotaError::Storage(err.to_string()))?;
        tx.commit().map_err(|err| QuotaError::Storage(err.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Billing Ledger
// ============================================================================

/// `SQLite`-backed, append-only billing ledger.
#[derive(Clone)]
pub struct SqliteBillingLedger {
    conn: Arc<Mutex<Connection>>,
}

impl BillingLedger for SqliteBillingLedger {
    fn record(&self, entry: &BillingEntry) -> Result<(), BillingLedgerError> {
        let guard =
            self.conn.lock().map_err(|_| BillingLedgerError::Storage(poisoned("billing ledger").to_string()))?;
        guard
            .execute(
                "INSERT INTO billing_ledger (tenant_id, org_id, user_id, run_id, kind, model, tokens, cost_units, ts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    entry.tenant_id.as_str(),
                    entry.org_id.as_ref().map(OrgId::as_str),
                    entry.user_id.as_ref().map(UserId::as_str),
                    entry.run_id.as_str(),
                    entry.kind,
                    entry.model,
                    entry.tokens.map(|tokens| i64::try_from(tokens).unwrap_or(i64::MAX)),
                    i64::try_from(entry.cost_units).unwrap_or(i64::MAX),
                    entry.ts.as_str()
                ],
            )
            .map_err(|err| BillingLedgerError::Storage(err.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Job Queue
// ============================================================================

/// `SQLite`-backed durable job queue. Claims are atomic `SQLite` transactions
/// rather than `SELECT ... FOR UPDATE SKIP LOCKED`: `SQLite` serializes all
/// writers against one file, so a single transaction that both selects the
/// claimable row and flips its status already gives the same exactly-once
/// claim guarantee a row-lock skip would on a server database.
#[derive(Clone)]
pub struct SqliteJobQueue {
    conn: Arc<Mutex<Connection>>,
    max_concurrent_per_tenant: u64,
}

/// Renders a job kind as its stable `SQLite` row value.
const fn job_kind_label(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Advance => "advance",
        JobKind::ResumeAfterApproval => "resume_after_approval",
    }
}

/// Parses a job kind from its stored row value.
fn parse_job_kind(label: &str) -> Result<JobKind, SqliteStoreError> {
    match label {
        "advance" => Ok(JobKind::Advance),
        "resume_after_approval" => Ok(JobKind::ResumeAfterApproval),
        other => Err(SqliteStoreError::Invalid(format!("unknown job kind: {other}"))),
    }
}

impl JobQueue for SqliteJobQueue {
    fn enqueue(&self, job: Job) -> Result<JobId, JobQueueError> {
        let guard = self.conn.lock().map_err(|_| JobQueueError::Storage(poisoned("job queue").to_string()))?;
        guard
            .execute(
                "INSERT INTO jobs (job_id, tenant_id, run_id, kind, created_at, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'queued')",
                params![
                    job.job_id.as_str(),
                    job.tenant_id.as_str(),
                    job.run_id.as_str(),
                    job_kind_label(job.kind),
                    job.created_at.as_str(),
                ],
            )
            .map_err(|err| JobQueueError::Storage(err.to_string()))?;
        Ok(job.job_id)
    }

    fn claim(&self, _worker_id: &str) -> Result<Option<Job>, JobQueueError> {
        let mut guard = self.conn.lock().map_err(|_| JobQueueError::Storage(poisoned("job queue").to_string()))?;
        let tx = guard.transaction().map_err(|err| JobQueueError::Storage(err.to_string()))?;
        let row: Option<(i64, String, String, String, String, String)> = tx
            .query_row(
                "SELECT j.id, j.job_id, j.tenant_id, j.run_id, j.kind, j.created_at
                 FROM jobs j
                 LEFT JOIN tenant_slots t ON t.tenant_id = j.tenant_id
                 WHERE j.status = 'queued' AND COALESCE(t.running, 0) < ?1
                 ORDER BY j.id ASC LIMIT 1",
                params![i64::try_from(self.max_concurrent_per_tenant).unwrap_or(i64::MAX)],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?)),
            )
            .optional()
            .map_err(|err| JobQueueError::Storage(err.to_string()))?;
        let Some((id, job_id, tenant_id, run_id, kind, created_at)) = row else {
            return Ok(None);
        };
        tx.execute("UPDATE jobs SET status = 'running' WHERE id = ?1", params![id])
            .map_err(|err| JobQueueError::Storage(err.to_string()))?;
        tx.execute(
            "INSERT INTO tenant_slots (tenant_id, running) VALUES (?1, 1)
             ON CONFLICT(tenant_id) DO UPDATE SET running = running + 1",
            params![tenant_id],
        )
        .map_err(|err| JobQueueError::Storage(err.to_string()))?;
        tx.commit().map_err(|err| JobQueueError::Storage(err.to_string()))?;

        let kind = parse_job_kind(&kind).map_err(|err| JobQueueError::Storage(err.to_string()))?;
        let created_at = Timestamp::parse(&created_at).map_err(|err| JobQueueError::Storage(err.to_string()))?;
        Ok(Some(Job {
            job_id: JobId::new(job_id),
            tenant_id: TenantId::new(tenant_id),
            run_id: RunId::new(run_id),
            kind,
            created_at,
        }))
    }

    fn complete(&self, job_id: &JobId) -> Result<(), JobQueueError> {
        let mut guard = self.conn.lock().map_err(|_| JobQueueError::Storage(poisoned("job queue").to_string()))?;
        let tx = guard.transaction().map_err(|err| JobQueueError::Storage(err.to_string()))?;
        release_slot(&tx, job_id).map_err(|err| JobQueueError::Storage(err.to_string()))?;
        tx.execute("DELETE FROM jobs WHERE job_id = ?1", params![job_id.as_str()])
            .map_err(|err| JobQueueError::Storage(err.to_string()))?;
        tx.commit().map_err(|err| JobQueueError::Storage(err.to_string()))?;
        Ok(())
    }

    fn fail(&self, job_id: &JobId, requeue: bool) -> Result<(), JobQueueError> {
        let mut guard = self.conn.lock().map_err(|_| JobQueueError::Storage(poisoned("job queue").to_string()))?;
        let tx = guard.transaction().map_err(|err| JobQueueError::Storage(err.to_string()))?;
        release_slot(&tx, job_id).map_err(|err| JobQueueError::Storage(err.to_string()))?;
        if requeue {
            tx.execute(
                "UPDATE jobs SET status = 'queued', id = (SELECT COALESCE(MAX(id), 0) + 1 FROM jobs)
                 WHERE job_id = ?1",
                params![job_id.as_str()],
            )
            .map_err(|err| JobQueueError::Storage(err.to_string()))?;
        } else {
            tx.execute("DELETE FROM jobs WHERE job_id = ?1", params![job_id.as_str()])
                .map_err(|err| JobQueueError::Storage(err.to_string()))?;
        }
        tx.commit().map_err(|err| JobQueueError::Storage(err.to_string()))?;
        Ok(())
    }
}

/// Frees `job_id`'s tenant concurrency slot, looking the tenant up from its
/// current row before the caller deletes or resets it.
fn release_slot(tx: &rusqlite::Transaction<'_>, job_id: &JobId) -> Result<(), SqliteStoreError> {
    let tenant_id: Option<String> = tx
        .query_row("SELECT tenant_id FROM jobs WHERE job_id = ?1", params![job_id.as_str()], |row| row.get(0))
        .optional()?;
    let Some(tenant_id) = tenant_id else {
        return Ok(());
    };
    tx.execute(
        "UPDATE tenant_slots SET running = MAX(running - 1, 0) WHERE tenant_id = ?1",
        params![tenant_id],
    )?;
    Ok(())
}

// ============================================================================
// SECTION: Projections
// ============================================================================

/// `SQLite`-backed materialized run summaries, written synchronously by the
/// flow engine after every state transition.
#[derive(Clone)]
pub struct SqliteProjections {
    conn: Arc<Mutex<Connection>>,
}

impl Projections for SqliteProjections {
    fn run_summary(&self, run_id: &RunId) -> Result<Option<RunSummary>, ProjectionsError> {
        let guard = self.conn.lock().map_err(|_| ProjectionsError::Storage(poisoned("projections").to_string()))?;
        let row: Option<(String, String, String, i64, String, String)> = guard
            .query_row(
                "SELECT run_id, tenant_id, state, step_count, budget_json, updated_at
                 FROM run_summaries WHERE run_id = ?1",
                params![run_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?)),
            )
            .optional()
            .map_err(|err| ProjectionsError::Storage(err.to_string()))?;
        let Some((run_id, tenant_id, state, step_count, budget_json, updated_at)) = row else {
            return Ok(None);
        };
        let budget_used: BudgetUsed =
            serde_json::from_str(&budget_json).map_err(|err| ProjectionsError::Storage(err.to_string()))?;
        let updated_at =
            Timestamp::parse(&updated_at).map_err(|err| ProjectionsError::Storage(err.to_string()))?;
        Ok(Some(RunSummary {
            run_id: RunId::new(run_id),
            tenant_id: TenantId::new(tenant_id),
            state,
            step_count: u64::try_from(step_count).unwrap_or_default(),
            budget_used,
            updated_at,
        }))
    }

    fn observe(&self, summary: RunSummary) -> Result<(), ProjectionsError> {
        let guard = self.conn.lock().map_err(|_| ProjectionsError::Storage(poisoned("projections").to_string()))?;
        let budget_json =
            serde_json::to_string(&summary.budget_used).map_err(|err| ProjectionsError::Storage(err.to_string()))?;
        guard
            .execute(
                "INSERT INTO run_summaries (run_id, tenant_id, state, step_count, budget_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(run_id) DO UPDATE SET
                     tenant_id = excluded.tenant_id,
                     state = excluded.state,
                     step_count = excluded.step_count,
                     budget_json = excluded.budget_json,
                     updated_at = excluded.updated_at",
                params![
                    summary.run_id.as_str(),
                    summary.tenant_id.as_str(),
                    summary.state,
                    i64::try_from(summary.step_count).unwrap_or(i64::MAX),
                    budget_json,
                    summary.updated_at.as_str(),
                ],
            )
            .map_err(|err| ProjectionsError::Storage(err.to_string()))?;
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
    use decision_gate_core::core::hashing::AuditKey;
    use decision_gate_core::core::identifiers::TaskId;
    use decision_gate_core::core::model::EventBody;
    use decision_gate_core::core::model::RunState;
    use std::collections::BTreeMap as Map;
    use time::OffsetDateTime;

    fn keyring() -> Arc<AuditKeyring> {
        Arc::new(AuditKeyring::new(vec![AuditKey {
            kid: KeyId::new("k1"),
            secret: b"secret".to_vec(),
            active: true,
        }]))
    }

    fn now() -> Timestamp {
        Timestamp::from_offset(OffsetDateTime::now_utc())
    }

    fn open_profile() -> (tempfile::TempDir, SqliteProfile) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = SqliteStoreConfig {
            path: dir.path().join("kernel.sqlite3"),
            busy_timeout_ms: 1_000,
            journal_mode: SqliteStoreMode::Wal,
            sync_mode: SqliteSyncMode::Full,
            max_concurrent_per_tenant: 1,
        };
        let profile = SqliteProfile::open(&config, keyring()).expect("open profile");
        (dir, profile)
    }

    #[test]
    fn event_log_chains_and_verifies_across_appends() {
        let (_dir, profile) = open_profile();
        let log = profile.event_log();
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
    fn event_log_survives_reopen() {
        let (dir, profile) = open_profile();
        let run_id = RunId::new("r1");
        profile
            .event_log()
            .append(
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
        drop(profile);
        let config = SqliteStoreConfig {
            path: dir.path().join("kernel.sqlite3"),
            busy_timeout_ms: 1_000,
            journal_mode: SqliteStoreMode::Wal,
            sync_mode: SqliteSyncMode::Full,
            max_concurrent_per_tenant: 1,
        };
        let reopened = SqliteProfile::open(&config, keyring()).unwrap();
        let rows = reopened.event_log().list_since(&run_id, 0).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(reopened.event_log().verify_chain(&run_id).is_ok());
    }

    #[test]
    fn quota_store_rejects_once_limit_exceeded() {
        let (_dir, profile) = open_profile();
        let store = profile.quota_store();
        let tenant = TenantId::new("t1");
        let ts = now();
        store.check_and_consume(&tenant, QuotaScope::CostUnits, "gpt-test", 5, 10, &ts).unwrap();
        store.check_and_consume(&tenant, QuotaScope::CostUnits, "gpt-test", 4, 10, &ts).unwrap();
        let err = store.check_and_consume(&tenant, QuotaScope::CostUnits, "gpt-test", 4, 10, &ts).unwrap_err();
        assert!(matches!(err, QuotaError::Exceeded { .. }));
    }

    #[test]
    fn job_queue_respects_tenant_concurrency_slots() {
        let (_dir, profile) = open_profile();
        let queue = profile.job_queue();
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
        let (_dir, profile) = open_profile();
        let store = profile.approval_store();
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
            decision: decision_gate_core::core::model::ApprovalVerdict::Approved,
            by: "alice".to_string(),
            ts: now(),
            reason: None,
        };
        store.decide(&approval_id, decision.clone()).unwrap();
        assert!(matches!(store.decide(&approval_id, decision), Err(ApprovalStoreError::AlreadyDecided(_))));
    }

    #[test]
    fn budget_store_accumulates_across_calls() {
        let (_dir, profile) = open_profile();
        let store = profile.budget_store();
        let run_id = RunId::new("r1");
        store.record_tool_call(&run_id, "tool-a", "action-a", 2).unwrap();
        let budget = store.record_llm_call(&run_id, 3).unwrap();
        assert_eq!(budget.tool_calls, 1);
        assert_eq!(budget.llm_calls, 1);
        assert_eq!(budget.cost_units, 5);
        assert_eq!(budget.per_tool.get("tool-a"), Some(&1));
    }
}
