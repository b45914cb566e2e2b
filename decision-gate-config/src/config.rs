// decision-gate-config/src/config.rs
// ============================================================================
// Module: Kernel Configuration Model
// Description: Process-startup configuration for the decision gate kernel.
// Purpose: Parse and validate `decision-gate.toml` into a single immutable
//          KernelConfig, constructed once and threaded through explicitly
//          rather than reached for through global state.
// Dependencies: decision-gate-core, decision-gate-store-sqlite, base64, toml
// ============================================================================

//! ## Overview
//! Loading is a two-phase parse-then-validate: `toml::from_str` deserializes
//! the untrusted document into [`RawKernelConfig`], a structurally loose
//! mirror of the file; [`RawKernelConfig::validate`] then checks cross-field
//! invariants (at least one active audit key, a resolvable registry path) and
//! produces the immutable [`KernelConfig`] the rest of the process holds for
//! its lifetime. No field of `KernelConfig` is ever read from a process-wide
//! global: every component that needs it receives it by construction.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use decision_gate_core::core::hashing::AuditKey;
use decision_gate_core::core::hashing::AuditKeyring;
use decision_gate_core::core::identifiers::KeyId;
use decision_gate_core::core::registry::Limits;
use decision_gate_store_sqlite::SqliteStoreConfig;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default file name looked for in the current directory when no explicit
/// path is given.
pub const DEFAULT_CONFIG_NAME: &str = "decision-gate.toml";
/// Environment variable naming an explicit config path, overriding the
/// default file name.
pub const CONFIG_ENV_VAR: &str = "DECISION_GATE_CONFIG";
/// Maximum size of a config file this loader will read.
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;
/// Maximum length of a single path component accepted anywhere in the config.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total length of any path accepted in the config.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Default approval wait timeout, in seconds.
const DEFAULT_APPROVAL_TIMEOUT_SECS: u64 = 60 * 60;
/// Default run-state snapshot interval, in events.
const DEFAULT_SNAPSHOT_EVERY: u32 = 50;
/// Default materialized-view refresh interval, in events.
const DEFAULT_REFRESH_MV_EVERY: u32 = 10;
/// Default number of concurrent runs a single tenant may occupy.
const DEFAULT_TENANT_CONCURRENCY_SLOTS: u32 = 4;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised loading or validating a kernel configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error, rendered as a string to stay `Send + Sync`.
        source: String,
    },
    /// The config file exceeded [`MAX_CONFIG_FILE_SIZE`].
    #[error("config file {0} exceeds the maximum size of {MAX_CONFIG_FILE_SIZE} bytes")]
    TooLarge(PathBuf),
    /// A path field contained an overlong component or total length.
    #[error("config path field is invalid: {0}")]
    InvalidPath(String),
    /// The document failed to parse as TOML.
    #[error("failed to parse config as toml: {0}")]
    Parse(String),
    /// A cross-field validation rule failed.
    #[error("config validation failed: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Storage Profile
// ============================================================================

/// Which storage profile backs the capability traits the kernel is built
/// from.
#[derive(Debug, Clone)]
pub enum StorageProfile {
    /// Volatile, process-local storage. Suitable for tests and demos; state
    /// does not survive a restart.
    InMemory,
    /// Durable, crash-safe storage backed by a single `SQLite` file.
    Sqlite(SqliteStoreConfig),
}

/// Raw, on-disk shape of [`StorageProfile`], before validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RawStorageProfile {
    /// See [`StorageProfile::InMemory`].
    InMemory,
    /// See [`StorageProfile::Sqlite`].
    Sqlite {
        /// Path to the `SQLite` database file.
        path: PathBuf,
        /// Busy timeout in milliseconds, defaulting to the store's own
        /// default when omitted.
        #[serde(default)]
        busy_timeout_ms: Option<u64>,
        /// Maximum jobs any one tenant may have running at once, defaulting
        /// to the store's own default when omitted.
        #[serde(default)]
        max_concurrent_per_tenant: Option<u64>,
    },
}

// ============================================================================
// SECTION: Audit Keys
// ============================================================================

/// Raw, on-disk shape of an [`AuditKey`], before decoding.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAuditKey {
    /// Key identifier stored alongside each chained event.
    pub kid: String,
    /// Base64-encoded shared secret. Never written back to the discovery
    /// mirror; only `kid` and `active` are persisted there.
    pub secret_base64: String,
    /// Whether new events should be signed under this key.
    #[serde(default)]
    pub active: bool,
}

// ============================================================================
// SECTION: Raw Config
// ============================================================================

/// Structurally loose mirror of `decision-gate.toml`, the direct target of
/// `toml::from_str`. Every field here is validated by
/// [`RawKernelConfig::validate`] before becoming a [`KernelConfig`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawKernelConfig {
    /// Audit keys available to sign and verify the event log.
    pub audit_keyring: Vec<RawAuditKey>,
    /// Path to the base registry document.
    pub registry_path: PathBuf,
    /// Storage profile backing the capability traits.
    pub storage: RawStorageProfile,
    /// Tenant-wide default limits, overridable per registry overlay.
    #[serde(default)]
    pub default_limits: Limits,
    /// Approval wait timeout, in seconds.
    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,
    /// Run-state snapshot interval, in events.
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: u32,
    /// Materialized-view refresh interval, in events.
    #[serde(default = "default_refresh_mv_every")]
    pub refresh_mv_every: u32,
    /// Number of concurrent runs a single tenant may occupy.
    #[serde(default = "default_tenant_concurrency_slots")]
    pub tenant_concurrency_slots: u32,
}

const fn default_approval_timeout_secs() -> u64 {
    DEFAULT_APPROVAL_TIMEOUT_SECS
}

const fn default_snapshot_every() -> u32 {
    DEFAULT_SNAPSHOT_EVERY
}

const fn default_refresh_mv_every() -> u32 {
    DEFAULT_REFRESH_MV_EVERY
}

const fn default_tenant_concurrency_slots() -> u32 {
    DEFAULT_TENANT_CONCURRENCY_SLOTS
}

// ============================================================================
// SECTION: Kernel Config
// ============================================================================

/// Validated, immutable kernel configuration, constructed once at process
/// startup and threaded through every collaborator that needs it.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Audit keys available to sign and verify the event log.
    pub audit_keyring: AuditKeyring,
    /// Path to the base registry document. Existence is not checked here;
    /// the registry overlay loader checks it lazily on first use.
    pub registry_path: PathBuf,
    /// Storage profile backing the capability traits.
    pub storage: StorageProfile,
    /// Tenant-wide default limits, overridable per registry overlay.
    pub default_limits: Limits,
    /// How long a run waits in `AwaitingApproval` before the approval job
    /// times out.
    pub approval_timeout: Duration,
    /// Run-state snapshot interval, in events.
    pub snapshot_every: u32,
    /// Materialized-view refresh interval, in events.
    pub refresh_mv_every: u32,
    /// Number of concurrent runs a single tenant may occupy.
    pub tenant_concurrency_slots: u32,
}

impl KernelConfig {
    /// Loads and validates a kernel configuration from `path`, or from the
    /// path named by [`CONFIG_ENV_VAR`], or from [`DEFAULT_CONFIG_NAME`] in
    /// the current directory, in that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, exceeds the
    /// maximum size, is not valid UTF-8 TOML, or fails cross-field
    /// validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path);
        let raw = read_raw(&resolved)?;
        raw.validate()
    }
}

impl RawKernelConfig {
    /// Validates this raw document and produces an immutable
    /// [`KernelConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if no audit key is marked active, or
    /// a key's secret is not valid base64. Returns
    /// [`ConfigError::InvalidPath`] if `registry_path` or a `Sqlite` storage
    /// path fails the component or total length limits.
    pub fn validate(self) -> Result<KernelConfig, ConfigError> {
        validate_path(&self.registry_path)?;
        let keys = self
            .audit_keyring
            .into_iter()
            .map(decode_audit_key)
            .collect::<Result<Vec<_>, ConfigError>>()?;
        if !keys.iter().any(|key| key.active) {
            return Err(ConfigError::Invalid("audit_keyring must mark exactly one key active".to_string()));
        }
        let storage = match self.storage {
            RawStorageProfile::InMemory => StorageProfile::InMemory,
            RawStorageProfile::Sqlite { path, busy_timeout_ms, max_concurrent_per_tenant } => {
                validate_path(&path)?;
                let store_config = SqliteStoreConfig {
                    path,
                    busy_timeout_ms: busy_timeout_ms.unwrap_or(5_000),
                    journal_mode: decision_gate_store_sqlite::SqliteStoreMode::default(),
                    sync_mode: decision_gate_store_sqlite::SqliteSyncMode::default(),
                    max_concurrent_per_tenant: max_concurrent_per_tenant.unwrap_or(4),
                };
                StorageProfile::Sqlite(store_config)
            }
        };
        Ok(KernelConfig {
            audit_keyring: AuditKeyring::new(keys),
            registry_path: self.registry_path,
            storage,
            default_limits: self.default_limits,
            approval_timeout: Duration::from_secs(self.approval_timeout_secs),
            snapshot_every: self.snapshot_every,
            refresh_mv_every: self.refresh_mv_every,
            tenant_concurrency_slots: self.tenant_concurrency_slots,
        })
    }
}

/// Decodes a raw audit key's base64 secret into an [`AuditKey`].
fn decode_audit_key(raw: RawAuditKey) -> Result<AuditKey, ConfigError> {
    use base64::Engine as _;
    let secret = base64::engine::general_purpose::STANDARD
        .decode(raw.secret_base64.as_bytes())
        .map_err(|err| ConfigError::Invalid(format!("audit key {} has invalid base64 secret: {err}", raw.kid)))?;
    Ok(AuditKey { kid: KeyId::new(raw.kid), secret, active: raw.active })
}

// ============================================================================
// SECTION: Path Resolution
// ============================================================================

/// Resolves which config file to load, in order of precedence: an explicit
/// `path` argument, then [`CONFIG_ENV_VAR`], then [`DEFAULT_CONFIG_NAME`] in
/// the current directory.
fn resolve_path(path: Option<&Path>) -> PathBuf {
    if let Some(path) = path {
        return path.to_path_buf();
    }
    if let Ok(from_env) = std::env::var(CONFIG_ENV_VAR) {
        return PathBuf::from(from_env);
    }
    PathBuf::from(DEFAULT_CONFIG_NAME)
}

/// Reads and parses a config file, enforcing the size limit before parsing.
fn read_raw(path: &Path) -> Result<RawKernelConfig, ConfigError> {
    let metadata = std::fs::metadata(path)
        .map_err(|err| ConfigError::Io { path: path.to_path_buf(), source: err.to_string() })?;
    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::TooLarge(path.to_path_buf()));
    }
    let bytes = std::fs::read(path)
        .map_err(|err| ConfigError::Io { path: path.to_path_buf(), source: err.to_string() })?;
    let text = String::from_utf8(bytes)
        .map_err(|err| ConfigError::Parse(format!("config file is not valid utf-8: {err}")))?;
    toml::from_str(&text).map_err(|err| ConfigError::Parse(err.to_string()))
}

/// Validates a path field against the component and total length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let rendered = path.display().to_string();
    if rendered.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::InvalidPath(format!("{rendered} exceeds the maximum total path length")));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::InvalidPath(format!("{rendered} has a component exceeding the maximum length")));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test assertions on constructed values.")]

    use super::*;

    fn minimal_raw() -> RawKernelConfig {
        toml::from_str(crate::examples::kernel_config_toml_example()).unwrap()
    }

    #[test]
    fn example_document_validates() {
        let config = minimal_raw().validate().unwrap();
        assert_eq!(config.tenant_concurrency_slots, DEFAULT_TENANT_CONCURRENCY_SLOTS);
        assert!(config.audit_keyring.active().is_ok());
    }

    #[test]
    fn missing_active_key_is_rejected() {
        let mut raw = minimal_raw();
        for key in &mut raw.audit_keyring {
            key.active = false;
        }
        let err = raw.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn overlong_registry_path_is_rejected() {
        let mut raw = minimal_raw();
        raw.registry_path = PathBuf::from("a".repeat(MAX_TOTAL_PATH_LENGTH + 1));
        let err = raw.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPath(_)));
    }

    #[test]
    fn load_from_explicit_path_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_NAME);
        std::fs::write(&path, crate::examples::kernel_config_toml_example()).unwrap();
        let config = KernelConfig::load(Some(&path)).unwrap();
        assert_eq!(config.snapshot_every, DEFAULT_SNAPSHOT_EVERY);
    }

    #[test]
    fn oversized_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_NAME);
        let oversized = "x = \"".to_string() + &"a".repeat(MAX_CONFIG_FILE_SIZE as usize + 1) + "\"";
        std::fs::write(&path, oversized).unwrap();
        let err = KernelConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
    }
}
