use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::DateTime;

use crate::audit::entry::{AuditEntry, GENESIS_HASH};
use crate::audit::validate_event_type;

/// What went wrong at the first bad entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViolationKind {
    /// `previous_hash` does not match the preceding entry's hash (or genesis).
    BrokenLink { expected: String, found: String },
    /// Stored hash disagrees with the recomputed hash of the entry's fields.
    HashMismatch { computed: String, stored: String },
    /// The line could not be parsed as an entry, or a field is syntactically invalid.
    Malformed(String),
}

/// Evidence of tampering, reported distinctly from I/O failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntegrityViolation {
    /// Zero-based entry index (line number among non-empty lines).
    pub index: usize,
    pub kind: ViolationKind,
}

impl std::fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ViolationKind::BrokenLink { expected, found } => write!(
                f,
                "integrity check failed at entry {}: previous_hash={}, expected_prev={}",
                self.index, found, expected
            ),
            ViolationKind::HashMismatch { computed, stored } => write!(
                f,
                "integrity check failed at entry {}: computed_hash={}, stored_hash={}",
                self.index, computed, stored
            ),
            ViolationKind::Malformed(why) => write!(
                f,
                "integrity check failed at entry {}: malformed record ({})",
                self.index, why
            ),
        }
    }
}

impl std::error::Error for IntegrityViolation {}

/// Outcome of replaying a chain from genesis.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verification {
    Valid { entries: usize, head: String },
    Invalid(IntegrityViolation),
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid { .. })
    }

    /// Human-readable detail line.
    pub fn detail(&self) -> String {
        match self {
            Verification::Valid { entries, head } => {
                format!("chain valid: {} entries, head={}", entries, head)
            }
            Verification::Invalid(violation) => violation.to_string(),
        }
    }

    /// Index of the first bad entry, if any.
    pub fn first_invalid_index(&self) -> Option<usize> {
        match self {
            Verification::Valid { .. } => None,
            Verification::Invalid(v) => Some(v.index),
        }
    }

    /// Convert into a `Result`, with the violation carried as a typed error.
    pub fn into_result(self) -> Result<(usize, String)> {
        match self {
            Verification::Valid { entries, head } => Ok((entries, head)),
            Verification::Invalid(violation) => Err(violation.into()),
        }
    }
}

/// Incremental chain checker; feed entries in order.
pub(crate) struct ChainVerifier {
    expected_prev: String,
    count: usize,
}

impl ChainVerifier {
    pub(crate) fn new() -> Self {
        Self {
            expected_prev: GENESIS_HASH.to_string(),
            count: 0,
        }
    }

    pub(crate) fn check(&mut self, entry: &AuditEntry) -> Result<(), IntegrityViolation> {
        let index = self.count;
        if entry.previous_hash != self.expected_prev {
            return Err(IntegrityViolation {
                index,
                kind: ViolationKind::BrokenLink {
                    expected: self.expected_prev.clone(),
                    found: entry.previous_hash.clone(),
                },
            });
        }
        if let Err(e) = validate_event_type(&entry.event_type) {
            return Err(IntegrityViolation {
                index,
                kind: ViolationKind::Malformed(format!("{:#}", e)),
            });
        }
        if let Err(e) = DateTime::parse_from_rfc3339(&entry.timestamp) {
            return Err(IntegrityViolation {
                index,
                kind: ViolationKind::Malformed(format!(
                    "timestamp {:?} is not RFC 3339: {}",
                    entry.timestamp, e
                )),
            });
        }
        let computed = entry.computed_hash();
        if computed != entry.hash {
            return Err(IntegrityViolation {
                index,
                kind: ViolationKind::HashMismatch {
                    computed,
                    stored: entry.hash.clone(),
                },
            });
        }
        self.expected_prev = entry.hash.clone();
        self.count += 1;
        Ok(())
    }

    fn malformed(&self, why: String) -> IntegrityViolation {
        IntegrityViolation {
            index: self.count,
            kind: ViolationKind::Malformed(why),
        }
    }

    fn finish(self) -> Verification {
        Verification::Valid {
            entries: self.count,
            head: self.expected_prev,
        }
    }
}

/// Replay an in-memory chain from genesis.
pub fn verify_entries(entries: &[AuditEntry]) -> Verification {
    let mut verifier = ChainVerifier::new();
    for entry in entries {
        if let Err(violation) = verifier.check(entry) {
            return Verification::Invalid(violation);
        }
    }
    verifier.finish()
}

/// Replay an audit log file from genesis, calling `on_entry` for each verified entry.
///
/// I/O failures are returned as errors; tampering is returned as `Verification::Invalid`.
pub fn verify_file_with<F>(path: &Path, mut on_entry: F) -> Result<Verification>
where
    F: FnMut(usize, &AuditEntry),
{
    let file = File::open(path)
        .with_context(|| format!("failed to open audit log {}", path.display()))?;
    let mut verifier = ChainVerifier::new();

    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("failed to read audit log {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: AuditEntry = match serde_json::from_str(&line) {
            Ok(entry) => entry,
            Err(e) => return Ok(Verification::Invalid(verifier.malformed(e.to_string()))),
        };
        let index = verifier.count;
        if let Err(violation) = verifier.check(&entry) {
            return Ok(Verification::Invalid(violation));
        }
        on_entry(index, &entry);
    }

    Ok(verifier.finish())
}

pub fn verify_file(path: &Path) -> Result<Verification> {
    verify_file_with(path, |_, _| {})
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn chain(n: usize) -> Vec<AuditEntry> {
        let start = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let mut prev = GENESIS_HASH.to_string();
        (0..n)
            .map(|i| {
                let e = AuditEntry::chained(
                    &prev,
                    start + Duration::seconds(i as i64),
                    "PERSON_DETECTED",
                    &format!("entry {}", i),
                );
                prev = e.hash.clone();
                e
            })
            .collect()
    }

    #[test]
    fn untouched_chain_is_valid() {
        let entries = chain(10);
        let v = verify_entries(&entries);
        assert!(v.is_valid());
        assert_eq!(
            v,
            Verification::Valid {
                entries: 10,
                head: entries[9].hash.clone()
            }
        );
    }

    #[test]
    fn empty_chain_is_valid_at_genesis() {
        assert_eq!(
            verify_entries(&[]),
            Verification::Valid {
                entries: 0,
                head: GENESIS_HASH.to_string()
            }
        );
    }

    #[test]
    fn edited_message_is_caught_at_its_index() {
        for i in 0..6 {
            let mut entries = chain(6);
            entries[i].message = "nothing happened".into();
            let v = verify_entries(&entries);
            assert_eq!(v.first_invalid_index(), Some(i));
            assert!(matches!(
                v,
                Verification::Invalid(IntegrityViolation {
                    kind: ViolationKind::HashMismatch { .. },
                    ..
                })
            ));
        }
    }

    #[test]
    fn edited_timestamp_is_caught_at_its_index() {
        let mut entries = chain(5);
        entries[3].timestamp = "2020-01-01T00:00:00.000Z".into();
        assert_eq!(verify_entries(&entries).first_invalid_index(), Some(3));
    }

    #[test]
    fn edited_previous_hash_is_caught_at_its_index() {
        let mut entries = chain(5);
        entries[2].previous_hash = entries[0].hash.clone();
        let v = verify_entries(&entries);
        assert_eq!(v.first_invalid_index(), Some(2));
        assert!(matches!(
            v,
            Verification::Invalid(IntegrityViolation {
                kind: ViolationKind::BrokenLink { .. },
                ..
            })
        ));
    }

    #[test]
    fn shifted_field_boundary_is_caught() {
        let start = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let original = AuditEntry::chained(
            GENESIS_HASH,
            start,
            "LOCKDOWN",
            "x|Lockdown engaged: 100 evidence frames secured",
        );
        let mut shifted = original.clone();
        shifted.event_type = "LOCKDOWN|x".into();
        shifted.message = "Lockdown engaged: 100 evidence frames secured".into();
        let v = verify_entries(&[shifted.clone()]);
        assert_eq!(v.first_invalid_index(), Some(0));

        // Even with a valid-looking type the self-hash no longer matches.
        shifted.event_type = "LOCKDOWN".into();
        shifted.message = "Lockdown engaged: 100 evidence frames secured|x".into();
        assert_eq!(verify_entries(&[shifted]).first_invalid_index(), Some(0));
        assert!(verify_entries(&[original]).is_valid());
    }

    #[test]
    fn invalid_field_syntax_is_malformed() {
        let mut entries = chain(3);
        entries[1].event_type = "person detected".into();
        entries[1].hash = entries[1].computed_hash();
        assert!(matches!(
            verify_entries(&entries),
            Verification::Invalid(IntegrityViolation {
                index: 1,
                kind: ViolationKind::Malformed(_),
            })
        ));

        let mut entries = chain(3);
        entries[2].timestamp = "yesterday".into();
        entries[2].hash = entries[2].computed_hash();
        assert!(matches!(
            verify_entries(&entries),
            Verification::Invalid(IntegrityViolation {
                index: 2,
                kind: ViolationKind::Malformed(_),
            })
        ));
    }

    #[test]
    fn rehashed_edit_still_breaks_the_next_link() {
        let mut entries = chain(5);
        entries[1].message = "forged".into();
        entries[1].hash = entries[1].computed_hash();
        assert_eq!(verify_entries(&entries).first_invalid_index(), Some(2));
    }

    #[test]
    fn deleted_and_reordered_entries_are_caught() {
        let mut entries = chain(5);
        entries.remove(2);
        assert_eq!(verify_entries(&entries).first_invalid_index(), Some(2));

        let mut entries = chain(5);
        entries.swap(1, 3);
        assert_eq!(verify_entries(&entries).first_invalid_index(), Some(1));
    }

    #[test]
    fn violation_survives_anyhow_downcast() {
        let mut entries = chain(3);
        entries[0].message.clear();
        let err = verify_entries(&entries).into_result().unwrap_err();
        let violation = err
            .downcast_ref::<IntegrityViolation>()
            .expect("typed violation");
        assert_eq!(violation.index, 0);
    }
}
