//! Tamper-evident audit log.
//!
//! Append-only JSON Lines file; each entry carries the hash of its predecessor and a
//! hash of itself, rooted at `GENESIS_HASH`. Appends are serialized under one lock that
//! covers read-last-hash, compute-new-hash and persist, so concurrent callers cannot
//! fork the chain. Each line is also copied to an optional mirror file on a best-effort
//! basis; mirror failures never block or corrupt the local chain.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

mod entry;
mod verify;

pub use entry::{format_timestamp, hash_entry, AuditEntry, GENESIS_HASH};
pub use verify::{
    verify_entries, verify_file, verify_file_with, IntegrityViolation, Verification,
    ViolationKind,
};

/// Audit event types used by the recorder.
pub mod events {
    pub const SESSION_STARTED: &str = "SESSION_STARTED";
    pub const SESSION_STOPPED: &str = "SESSION_STOPPED";
    pub const PERSON_DETECTED: &str = "PERSON_DETECTED";
    pub const LOCKDOWN: &str = "LOCKDOWN";
    pub const MIRROR_RESTORED: &str = "MIRROR_RESTORED";
}

/// Event types are upper-snake tokens.
pub fn validate_event_type(event_type: &str) -> Result<()> {
    static EVENT_TYPE_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = EVENT_TYPE_RE
        .get_or_init(|| regex::Regex::new(r"^[A-Z][A-Z0-9_]{0,63}$").expect("static regex"));
    if !re.is_match(event_type) {
        return Err(anyhow!(
            "audit event_type must match ^[A-Z][A-Z0-9_]{{0,63}}$, got {:?}",
            event_type
        ));
    }
    Ok(())
}

struct ChainHead {
    file: File,
    last_hash: String,
    entries: usize,
}

pub struct AuditLog {
    path: PathBuf,
    mirror_path: Option<PathBuf>,
    head: Mutex<ChainHead>,
}

impl AuditLog {
    /// Open (or create) the log at `path`, resuming the chain from its last entry.
    ///
    /// A malformed tail refuses to open instead of starting a fork.
    pub fn open(path: impl Into<PathBuf>, mirror_path: Option<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let (last_hash, entries) = read_chain_head(&path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open audit log {}", path.display()))?;

        log::info!(
            "audit log {} opened ({} entries, mirror={})",
            path.display(),
            entries,
            mirror_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "none".to_string())
        );

        Ok(Self {
            path,
            mirror_path,
            head: Mutex::new(ChainHead {
                file,
                last_hash,
                entries,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mirror_path(&self) -> Option<&Path> {
        self.mirror_path.as_deref()
    }

    /// Append a new entry stamped with the current UTC time.
    pub fn append(&self, event_type: &str, message: &str) -> Result<AuditEntry> {
        self.append_at(Utc::now(), event_type, message)
    }

    /// Append a new entry with an explicit timestamp.
    pub fn append_at(
        &self,
        timestamp: DateTime<Utc>,
        event_type: &str,
        message: &str,
    ) -> Result<AuditEntry> {
        validate_event_type(event_type)?;

        let mut head = self
            .head
            .lock()
            .map_err(|_| anyhow!("audit log lock poisoned"))?;

        let entry = AuditEntry::chained(&head.last_hash, timestamp, event_type, message);
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        write_or_rollback(&mut head.file, line.as_bytes(), |file| {
            file.flush()?;
            file.sync_data()
        })
        .with_context(|| format!("failed to append to audit log {}", self.path.display()))?;
        head.last_hash = entry.hash.clone();
        head.entries += 1;

        // Still under the lock so the mirror sees entries in chain order.
        if let Some(mirror) = &self.mirror_path {
            if let Err(e) = append_line(mirror, &line) {
                log::warn!("audit mirror write to {} failed: {:#}", mirror.display(), e);
            }
        }

        log::debug!("audit #{} {} {}", head.entries, entry.event_type, &entry.hash[..16]);
        Ok(entry)
    }

    /// Hash of the most recent entry (or `GENESIS_HASH` when empty).
    pub fn head_hash(&self) -> Result<String> {
        let head = self
            .head
            .lock()
            .map_err(|_| anyhow!("audit log lock poisoned"))?;
        Ok(head.last_hash.clone())
    }

    pub fn len(&self) -> Result<usize> {
        let head = self
            .head
            .lock()
            .map_err(|_| anyhow!("audit log lock poisoned"))?;
        Ok(head.entries)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Replay the local file from genesis.
    pub fn verify(&self) -> Result<Verification> {
        // Hold the lock so no append interleaves with the replay.
        let _head = self
            .head
            .lock()
            .map_err(|_| anyhow!("audit log lock poisoned"))?;
        verify_file(&self.path)
    }
}

/// Read every entry of an audit log file in order.
pub fn load_entries(path: &Path) -> Result<Vec<AuditEntry>> {
    let file =
        File::open(path).with_context(|| format!("failed to open audit log {}", path.display()))?;
    let mut entries = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: AuditEntry = serde_json::from_str(&line).map_err(|e| IntegrityViolation {
            index,
            kind: ViolationKind::Malformed(e.to_string()),
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

fn read_chain_head(path: &Path) -> Result<(String, usize)> {
    if !path.exists() {
        return Ok((GENESIS_HASH.to_string(), 0));
    }
    let file =
        File::open(path).with_context(|| format!("failed to read audit log {}", path.display()))?;
    let mut last: Option<String> = None;
    let mut count = 0usize;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        count += 1;
        last = Some(line);
    }
    match last {
        None => Ok((GENESIS_HASH.to_string(), 0)),
        Some(line) => {
            let entry: AuditEntry = serde_json::from_str(&line).map_err(|e| IntegrityViolation {
                index: count - 1,
                kind: ViolationKind::Malformed(e.to_string()),
            })?;
            Ok((entry.hash, count))
        }
    }
}

/// Append `line` and commit it; on any failure truncate back to the prior length so
/// a torn write never leaves a fragment for the next entry to land behind.
fn write_or_rollback<F>(file: &mut File, line: &[u8], commit: F) -> std::io::Result<()>
where
    F: FnOnce(&mut File) -> std::io::Result<()>,
{
    let start = file.metadata()?.len();
    let result = file.write_all(line).and_then(|_| commit(file));
    if let Err(e) = result {
        if let Err(truncate) = file.set_len(start) {
            log::error!(
                "audit append failed ({}) and rollback to {} bytes failed: {}",
                e,
                start,
                truncate
            );
        }
        return Err(e);
    }
    Ok(())
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn append_chains_and_verifies() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let log = AuditLog::open(dir.path().join("audit.jsonl"), None)?;
        let a = log.append(events::SESSION_STARTED, "session 1")?;
        let b = log.append(events::PERSON_DETECTED, "person 0.91")?;
        assert_eq!(a.previous_hash, GENESIS_HASH);
        assert_eq!(b.previous_hash, a.hash);
        assert_eq!(log.len()?, 2);
        assert!(log.verify()?.is_valid());
        Ok(())
    }

    #[test]
    fn reopen_resumes_chain() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("audit.jsonl");
        let first = {
            let log = AuditLog::open(&path, None)?;
            log.append(events::SESSION_STARTED, "one")?
        };
        let log = AuditLog::open(&path, None)?;
        assert_eq!(log.head_hash()?, first.hash);
        let second = log.append(events::SESSION_STOPPED, "two")?;
        assert_eq!(second.previous_hash, first.hash);
        assert_eq!(verify_file(&path)?.first_invalid_index(), None);
        Ok(())
    }

    #[test]
    fn malformed_tail_refuses_to_open() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("audit.jsonl");
        {
            let log = AuditLog::open(&path, None)?;
            log.append(events::SESSION_STARTED, "one")?;
        }
        append_line(&path, "{not json\n")?;
        let err = AuditLog::open(&path, None).err().expect("open must fail");
        assert!(err.downcast_ref::<IntegrityViolation>().is_some());
        Ok(())
    }

    #[test]
    fn failed_commit_rolls_back_partial_line() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("audit.jsonl");
        {
            let log = AuditLog::open(&path, None)?;
            log.append(events::SESSION_STARTED, "one")?;
        }
        let before = fs::read(&path)?;

        let mut file = OpenOptions::new().append(true).open(&path)?;
        let err = write_or_rollback(&mut file, b"{\"timestamp\":\"2026-", |_| {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left on device"))
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "no space left on device");
        drop(file);
        assert_eq!(fs::read(&path)?, before);

        // The chain resumes cleanly after the failed write.
        let log = AuditLog::open(&path, None)?;
        log.append(events::SESSION_STOPPED, "two")?;
        assert_eq!(log.len()?, 2);
        assert!(log.verify()?.is_valid());
        Ok(())
    }

    #[test]
    fn rejects_bad_event_type() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let log = AuditLog::open(dir.path().join("audit.jsonl"), None)?;
        assert!(log.append("lower case", "x").is_err());
        assert!(log.is_empty()?);
        Ok(())
    }

    #[test]
    fn concurrent_appends_keep_a_single_chain() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let log = Arc::new(AuditLog::open(dir.path().join("audit.jsonl"), None)?);
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        log.append(events::PERSON_DETECTED, &format!("t{} i{}", t, i))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(log.len()?, 200);
        assert_eq!(
            log.verify()?.first_invalid_index(),
            None,
            "chain forked under concurrency"
        );
        Ok(())
    }

    #[test]
    fn mirror_receives_identical_lines() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let local = dir.path().join("local/audit.jsonl");
        let mirror = dir.path().join("mirror/audit/audit.jsonl");
        let log = AuditLog::open(&local, Some(mirror.clone()))?;
        log.append(events::SESSION_STARTED, "a")?;
        log.append(events::LOCKDOWN, "b")?;
        assert_eq!(fs::read_to_string(&local)?, fs::read_to_string(&mirror)?);
        assert!(verify_file(&mirror)?.is_valid());
        Ok(())
    }

    #[test]
    fn unwritable_mirror_does_not_block_local_chain() -> Result<()> {
        let dir = tempfile::tempdir()?;
        // The mirror "directory" is a regular file, so every mirror write fails.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x")?;
        let log = AuditLog::open(
            dir.path().join("audit.jsonl"),
            Some(blocker.join("audit.jsonl")),
        )?;
        log.append(events::SESSION_STARTED, "a")?;
        log.append(events::SESSION_STOPPED, "b")?;
        assert_eq!(log.len()?, 2);
        assert!(log.verify()?.is_valid());
        Ok(())
    }

    #[test]
    fn load_entries_returns_append_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::open(&path, None)?;
        for i in 0..4 {
            log.append(events::PERSON_DETECTED, &i.to_string())?;
        }
        let entries = load_entries(&path)?;
        let messages: Vec<&str> = entries.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["0", "1", "2", "3"]);
        assert!(verify_entries(&entries).is_valid());
        Ok(())
    }
}
