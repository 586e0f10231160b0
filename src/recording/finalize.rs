use std::fs;
use std::path::{Path, PathBuf};

use crate::recording::{FinalizeJob, Muxer, SessionError, StatusNotifier};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Merged { output: PathBuf },
    /// Merge failed; the silent video track was kept instead.
    SavedWithoutAudio { output: PathBuf, reason: String },
    /// Nothing was saved. Temp files are left in place for inspection.
    Failed(SessionError),
}

impl FinalizeOutcome {
    pub fn output(&self) -> Option<&Path> {
        match self {
            FinalizeOutcome::Merged { output }
            | FinalizeOutcome::SavedWithoutAudio { output, .. } => Some(output),
            FinalizeOutcome::Failed(_) => None,
        }
    }
}

/// Reconcile a stopped session's temp tracks into its final output.
///
/// Missing temp tracks fail the session without touching anything. A failed merge
/// falls back to copying the silent video. Temp files are removed only after
/// something was saved, and only when `keep_temp_files` is off.
pub fn finalize(
    job: &FinalizeJob,
    muxer: &dyn Muxer,
    keep_temp_files: bool,
    status: &StatusNotifier,
) -> FinalizeOutcome {
    let session = &job.session;
    status.progress(0);
    status.message("Finalizing recording...");

    let outcome = if !session.temp_video.exists() {
        FinalizeOutcome::Failed(SessionError::new(
            SessionError::MISSING_TEMP_VIDEO,
            format!("temp video {} not found", session.temp_video.display()),
        ))
    } else if !session.temp_audio.exists() {
        FinalizeOutcome::Failed(SessionError::new(
            SessionError::MISSING_TEMP_AUDIO,
            format!("temp audio {} not found", session.temp_audio.display()),
        ))
    } else {
        status.progress(50);
        merge_or_fallback(job, muxer)
    };

    match &outcome {
        FinalizeOutcome::Merged { output } => {
            status.message(format!("Saved {}", output.display()));
        }
        FinalizeOutcome::SavedWithoutAudio { output, reason } => {
            log::warn!("session {} saved without audio: {}", session.id, reason);
            status.message(format!("Saved without audio: {}", output.display()));
        }
        FinalizeOutcome::Failed(err) => {
            log::error!("session {} could not be finalized: {}", session.id, err);
            status.message(format!("Recording could not be saved: {}", err));
        }
    }

    if outcome.output().is_some() {
        if keep_temp_files {
            log::info!(
                "keeping temp files {} and {}",
                session.temp_video.display(),
                session.temp_audio.display()
            );
        } else {
            remove_temp(&session.temp_video);
            remove_temp(&session.temp_audio);
        }
    }

    status.progress(100);
    outcome
}

fn merge_or_fallback(job: &FinalizeJob, muxer: &dyn Muxer) -> FinalizeOutcome {
    let session = &job.session;
    let reason = match muxer.merge(&session.temp_video, &session.temp_audio, &session.final_path)
    {
        Ok(()) => {
            return FinalizeOutcome::Merged {
                output: session.final_path.clone(),
            }
        }
        Err(e) => format!("{:#}", e),
    };

    log::warn!("merge failed ({}); keeping silent video", reason);
    match fs::copy(&session.temp_video, &session.final_path) {
        Ok(_) => FinalizeOutcome::SavedWithoutAudio {
            output: session.final_path.clone(),
            reason,
        },
        Err(e) => FinalizeOutcome::Failed(SessionError::new(
            SessionError::SAVE_FAILED,
            format!(
                "merge failed ({}) and copying {} failed: {}",
                reason,
                session.temp_video.display(),
                e
            ),
        )),
    }
}

fn remove_temp(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        log::warn!("failed to remove temp file {}: {}", path.display(), e);
    }
}
