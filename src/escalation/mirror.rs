use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};

/// Resolves the mirrored (cloud-synced) storage root. Absence is normal.
pub trait MirrorLocator: Send + Sync {
    fn locate(&self) -> Option<PathBuf>;
}

/// A fixed directory, available only while it exists.
#[derive(Clone, Debug, Default)]
pub struct ConfiguredMirror {
    root: Option<PathBuf>,
}

impl ConfiguredMirror {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }
}

impl MirrorLocator for ConfiguredMirror {
    fn locate(&self) -> Option<PathBuf> {
        self.root.as_ref().filter(|p| p.is_dir()).cloned()
    }
}

/// What a connector action actually did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncAction {
    Applied,
    /// No mechanism is configured; synchronization was left as it was.
    NotConfigured,
}

/// Control over the process that syncs the mirror root off-device.
pub trait MirrorConnector: Send {
    /// Cut live synchronization so already-uploaded evidence cannot be deleted remotely.
    fn sever(&self) -> Result<SyncAction>;

    /// Resume synchronization.
    fn restore(&self) -> Result<SyncAction>;
}

/// Runs argv commands (no shell) for sever and restore. Empty argv reports
/// `SyncAction::NotConfigured`.
#[derive(Clone, Debug, Default)]
pub struct CommandConnector {
    sever: Vec<String>,
    restore: Vec<String>,
}

impl CommandConnector {
    pub fn new(sever: Vec<String>, restore: Vec<String>) -> Self {
        Self { sever, restore }
    }

    fn run(argv: &[String], action: &str) -> Result<SyncAction> {
        let Some((program, args)) = argv.split_first() else {
            log::warn!("mirror {} requested but no command is configured", action);
            return Ok(SyncAction::NotConfigured);
        };
        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .with_context(|| format!("failed to run mirror {} command {:?}", action, program))?;
        if !status.success() {
            bail!("mirror {} command {:?} exited with {}", action, program, status);
        }
        log::info!("mirror {} command {:?} succeeded", action, program);
        Ok(SyncAction::Applied)
    }
}

impl MirrorConnector for CommandConnector {
    fn sever(&self) -> Result<SyncAction> {
        Self::run(&self.sever, "sever")
    }

    fn restore(&self) -> Result<SyncAction> {
        Self::run(&self.restore, "restore")
    }
}

/// Parse a whitespace-separated command line into argv.
pub fn parse_argv(command: &str) -> Result<Vec<String>> {
    let argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
    if argv.is_empty() {
        return Err(anyhow!("empty command"));
    }
    Ok(argv)
}
