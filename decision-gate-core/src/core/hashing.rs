// decision-gate-core/src/core/hashing.rs
// ============================================================================
// Module: Decision Gate Canonical Hashing
// Description: RFC 8785 JSON canonicalization and content hashing utilities.
// Purpose: Provide deterministic hashes for specs, logs, and runpack artifacts.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! The kernel hashes all canonical JSON using RFC 8785 (JCS) to guarantee stable,
//! replayable digests, and chains every run's event log with HMAC-SHA256 so
//! tampering is detectable without a central authority holding every secret.

// ============================================================================
// SECTION: Imports
// ============================================================================

use hmac::Hmac;
use hmac::Mac;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

use crate::core::identifiers::KeyId;

type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// SECTION: Hash Algorithm
// ============================================================================

/// Supported hash algorithms for Decision Gate artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-256 hashing (FIPS-friendly default).
    Sha256,
}

/// Default hash algorithm for Decision Gate.
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

// ============================================================================
// SECTION: Hash Digest
// ============================================================================

/// Deterministic content hash representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashDigest {
    /// Hash algorithm identifier.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex-encoded digest bytes.
    pub value: String,
}

impl HashDigest {
    /// Creates a new digest from raw bytes.
    #[must_use]
    pub fn new(algorithm: HashAlgorithm, bytes: &[u8]) -> Self {
        Self {
            algorithm,
            value: hex_encode(bytes),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised when computing canonical hashes.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

// ============================================================================
// SECTION: Audit Keyring
// ============================================================================

/// A single keyring entry used to chain a run's event log.
///
/// Exactly one entry in a keyring should be `active` at a time. New events are
/// signed under the active key; verification looks up the row's stored
/// `key_id` so rotation never invalidates previously chained events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditKey {
    /// Key identifier stored alongside each chained event.
    pub kid: KeyId,
    /// Shared secret. Never persisted to the discovery-mirror `audit_keys` table.
    pub secret: Vec<u8>,
    /// Whether new events should be signed under this key.
    pub active: bool,
}

/// Errors raised while chaining or verifying the event log.
#[derive(Debug, Error)]
pub enum KeyringError {
    /// No key in the keyring is marked active.
    #[error("audit keyring has no active key")]
    NoActiveKey,
    /// A chained event referenced a `key_id` the keyring does not know.
    #[error("unknown audit key id: {0}")]
    UnknownKey(String),
}

/// Holds the set of known audit keys and resolves the active signing key.
#[derive(Debug, Clone, Default)]
pub struct AuditKeyring {
    keys: Vec<AuditKey>,
}

impl AuditKeyring {
    /// Builds a keyring from a list of keys.
    #[must_use]
    pub fn new(keys: Vec<AuditKey>) -> Self {
        Self {
            keys,
        }
    }

    /// Returns the currently active key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::NoActiveKey`] when no key is marked active.
    pub fn active(&self) -> Result<&AuditKey, KeyringError> {
        self.keys.iter().find(|k| k.active).ok_or(KeyringError::NoActiveKey)
    }

    /// Looks up a key by id, for chain verification of historical events.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::UnknownKey`] when `kid` is not present.
    pub fn lookup(&self, kid: &KeyId) -> Result<&AuditKey, KeyringError> {
        self.keys
            .iter()
            .find(|k| &k.kid == kid)
            .ok_or_else(|| KeyringError::UnknownKey(kid.as_str().to_string()))
    }
}

// ============================================================================
// SECTION: Event Chain
// ============================================================================

/// Computes the next chain link: `HMAC_SHA256(secret, prev_hash || "|" || canonical)`.
///
/// `prev_hash` is the empty string for the first event in a run.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] only if the HMAC implementation
/// rejects the key; HMAC-SHA256 accepts keys of any length, so this is not
/// expected to occur with a well-formed [`AuditKey`].
pub fn hmac_chain(secret: &[u8], prev_hash: &str, canonical: &[u8]) -> Result<HashDigest, HashError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret)
        .map_err(|err| HashError::Canonicalization(err.to_string()))?;
    mac.update(prev_hash.as_bytes());
    mac.update(b"|");
    mac.update(canonical);
    let tag = mac.finalize().into_bytes();
    Ok(HashDigest::new(HashAlgorithm::Sha256, &tag))
}

// ============================================================================
// SECTION: Hashing Helpers
// ============================================================================

/// Returns canonical JSON bytes for a serializable value using RFC 8785.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn canonical_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

/// Hashes canonical JSON using the provided algorithm.
///
/// # Errors
///
/// Returns [`HashError::Canonicalization`] when serialization fails.
pub fn hash_canonical_json<T: Serialize + ?Sized>(
    algorithm: HashAlgorithm,
    value: &T,
) -> Result<HashDigest, HashError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(hash_bytes(algorithm, &bytes))
}

/// Hashes raw bytes using the provided algorithm.
#[must_use]
pub fn hash_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> HashDigest {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(bytes);
            let digest = hasher.finalize();
            HashDigest::new(HashAlgorithm::Sha256, &digest)
        }
    }
}

// ============================================================================
// SECTION: Hex Encoding
// ============================================================================

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}
