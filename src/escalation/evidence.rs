use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::escalation::mirror::MirrorLocator;
use crate::frame::Frame;

const JPEG_QUALITY: u8 = 90;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvidenceKind {
    /// `n`th frame of the current alert run, starting at 1.
    Alert(u32),
    Snapshot,
}

/// Where one evidence frame landed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvidenceWrite {
    pub local: PathBuf,
    /// `None` when no mirror was available or the mirror write failed.
    pub mirror: Option<PathBuf>,
}

pub trait EvidenceSink: Send {
    /// Persist locally and, best-effort, to the mirror.
    fn persist(&self, frame: &Frame, kind: EvidenceKind, at: DateTime<Local>) -> Result<EvidenceWrite>;
}

/// `evidence/<YYYY-MM-DD>/alert_<HHMMSS>_<nnn>.jpg` or `.../snapshot_<HHMMSS>.jpg`.
pub fn evidence_relative_path(kind: EvidenceKind, at: DateTime<Local>) -> PathBuf {
    let day = at.format("%Y-%m-%d").to_string();
    let time = at.format("%H%M%S");
    let name = match kind {
        EvidenceKind::Alert(n) => format!("alert_{}_{:03}.jpg", time, n),
        EvidenceKind::Snapshot => format!("snapshot_{}.jpg", time),
    };
    Path::new("evidence").join(day).join(name)
}

/// JPEG evidence under a local root, mirrored under the same relative path.
pub struct EvidenceStore {
    root: PathBuf,
    mirror: Box<dyn MirrorLocator>,
}

impl EvidenceStore {
    pub fn new(root: impl Into<PathBuf>, mirror: Box<dyn MirrorLocator>) -> Self {
        Self {
            root: root.into(),
            mirror,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl EvidenceSink for EvidenceStore {
    fn persist(&self, frame: &Frame, kind: EvidenceKind, at: DateTime<Local>) -> Result<EvidenceWrite> {
        let jpeg = encode_jpeg(frame)?;
        let relative = evidence_relative_path(kind, at);

        let local = self.root.join(&relative);
        write_file(&local, &jpeg)
            .with_context(|| format!("failed to write evidence {}", local.display()))?;

        let mirror = match self.mirror.locate() {
            Some(mirror_root) => {
                let target = mirror_root.join(&relative);
                match write_file(&target, &jpeg) {
                    Ok(()) => Some(target),
                    Err(e) => {
                        log::warn!("mirror evidence write to {} failed: {:#}", target.display(), e);
                        None
                    }
                }
            }
            None => None,
        };

        Ok(EvidenceWrite { local, mirror })
    }
}

fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>> {
    let rgb = frame.to_rgb()?;
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode(&rgb, frame.width, frame.height, ExtendedColorType::Rgb8)
        .context("jpeg encode failed")?;
    Ok(out)
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)?;
    Ok(())
}
