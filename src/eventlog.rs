//! Per-session event log.
//!
//! A review aid, not a security control: entries are timestamped relative to the
//! recording start and appended as JSON Lines to a companion file next to the final
//! video. Loading never fails; a missing or malformed file reads as empty.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    System,
    Object,
    Sound,
    Security,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventCategory::System => "System",
            EventCategory::Object => "Object",
            EventCategory::Sound => "Sound",
            EventCategory::Security => "Security",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// Milliseconds since the recording started.
    pub offset_ms: u64,
    pub category: EventCategory,
    pub description: String,
}

impl EventLogEntry {
    pub fn new(offset: Duration, category: EventCategory, description: impl Into<String>) -> Self {
        Self {
            offset_ms: offset.as_millis().min(u64::MAX as u128) as u64,
            category,
            description: description.into(),
        }
    }

    pub fn offset(&self) -> Duration {
        Duration::from_millis(self.offset_ms)
    }
}

/// `HH:MM:SS`, hours not wrapped.
pub fn format_hms(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Companion record path for a final video: `<video>.events.jsonl`.
pub fn companion_path(video: &Path) -> PathBuf {
    let mut name = video
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".events.jsonl");
    video.with_file_name(name)
}

pub struct EventLog {
    started_at: Instant,
    path: Option<PathBuf>,
    entries: Mutex<Vec<EventLogEntry>>,
}

impl EventLog {
    /// Empty log for a session that started at `started_at`, persisting to `path`.
    pub fn new(started_at: Instant, path: Option<PathBuf>) -> Self {
        Self {
            started_at,
            path,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// In-memory only.
    pub fn detached(started_at: Instant) -> Self {
        Self::new(started_at, None)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Append an entry at an explicit offset from the session start.
    ///
    /// The in-memory append always happens; a persistence failure is returned after it.
    pub fn log(
        &self,
        category: EventCategory,
        description: impl Into<String>,
        offset: Duration,
    ) -> Result<EventLogEntry> {
        let entry = EventLogEntry::new(offset, category, description);
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("event log lock poisoned"))?;
        entries.push(entry.clone());
        if let Some(path) = &self.path {
            persist_line(path, &entry)
                .with_context(|| format!("failed to persist event log {}", path.display()))?;
        }
        Ok(entry)
    }

    /// Append an entry stamped with the time elapsed since the session start.
    pub fn log_now(
        &self,
        category: EventCategory,
        description: impl Into<String>,
    ) -> Result<EventLogEntry> {
        self.log(category, description, self.started_at.elapsed())
    }

    pub fn entries(&self) -> Vec<EventLogEntry> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn persist_line(path: &Path, entry: &EventLogEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.flush()?;
    Ok(())
}

/// Load a persisted event log in append order.
///
/// Returns an empty list if the file is missing or any line fails to parse.
pub fn load(path: &Path) -> Vec<EventLogEntry> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return Vec::new(),
    };
    let parsed: Result<Vec<EventLogEntry>, _> = raw
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect();
    match parsed {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("event log {} is malformed: {}", path.display(), e);
            Vec::new()
        }
    }
}
