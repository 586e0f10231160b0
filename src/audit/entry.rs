use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Previous-hash value of the first entry. A sentinel string rather than a zero
/// hash, so an empty or zeroed field reads as corruption instead of a chain root.
pub const GENESIS_HASH: &str = "GENESIS";

/// One line of the audit log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// UTC, RFC 3339 with millisecond precision.
    pub timestamp: String,
    pub event_type: String,
    pub message: String,
    pub previous_hash: String,
    pub hash: String,
}

impl AuditEntry {
    /// Build an entry chained onto `previous_hash`.
    pub fn chained(
        previous_hash: &str,
        timestamp: DateTime<Utc>,
        event_type: &str,
        message: &str,
    ) -> Self {
        let timestamp = format_timestamp(timestamp);
        let hash = hash_entry(previous_hash, &timestamp, event_type, message);
        Self {
            timestamp,
            event_type: event_type.to_string(),
            message: message.to_string(),
            previous_hash: previous_hash.to_string(),
            hash,
        }
    }

    /// Recompute the self-hash from the stored fields.
    pub fn computed_hash(&self) -> String {
        hash_entry(
            &self.previous_hash,
            &self.timestamp,
            &self.event_type,
            &self.message,
        )
    }
}

/// Self-hash of an entry: hex SHA-256 over the fields in chain order.
///
/// Each field is prefixed with its byte length (u64 little-endian), so no choice of
/// field contents can move a boundary between two fields.
pub fn hash_entry(previous_hash: &str, timestamp: &str, event_type: &str, message: &str) -> String {
    let mut hasher = Sha256::new();
    for field in [previous_hash, timestamp, event_type, message] {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    hex::encode(hasher.finalize())
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
