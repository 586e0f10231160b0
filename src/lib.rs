//! Lapse Guard
//!
//! A time-lapse security recorder. A live camera feed is decimated to one frame per
//! second and written to a time-lapse video; the same frames are run through an object
//! detector, and person detections escalate to evidence preservation.
//!
//! # Pipeline
//!
//! ```text
//! source ─▶ decimate ─▶ recording (video writer)
//!                   └─▶ detect ─▶ escalation ─▶ evidence / event log / audit log
//! ```
//!
//! # Module Structure
//!
//! - `frame`: owned pixel buffers, zeroized on drop
//! - `decimate`: 1 Hz gate anchored on the last emitted frame
//! - `detect`: YOLO output decode, NMS, pluggable inference backends
//! - `recording`: session state machine and the ffmpeg collaborators
//! - `escalation`: alert budget, periodic snapshots, lockdown
//! - `audit`: hash-chained, tamper-evident audit log
//! - `eventlog`: per-session review log
//! - `pipeline`: the coordinator that wires the above together
//! - `ingest`, `config`: daemon plumbing

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};

pub mod audit;
pub mod config;
pub mod decimate;
pub mod detect;
pub mod escalation;
pub mod eventlog;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod recording;

pub use audit::{AuditEntry, AuditLog, IntegrityViolation, Verification};
pub use config::SentinelConfig;
pub use decimate::FrameDecimator;
pub use detect::{BoundingBox, DetectionEngine, DetectionResult, InferenceBackend};
pub use escalation::{EscalationOutcome, EscalationPolicy, EscalationState};
pub use eventlog::{EventCategory, EventLog, EventLogEntry};
pub use frame::{Frame, PixelLayout};
pub use pipeline::{Coordinator, FinalizeHandle, PipelineSettings, SessionStop};
pub use recording::{
    FinalizeOutcome, Recorder, RecordingSession, RecordingState, SessionError, StartOutcome,
    StatusNotifier, StatusUpdate,
};

/// Model path value that selects the no-op backend.
pub const STUB_MODEL: &str = "stub";

/// Lazily loads the configured model. `stub` selects `StubBackend`.
pub fn model_loader(cfg: &SentinelConfig) -> detect::BackendLoader {
    let path = cfg.detection.model_path.clone();
    let input = cfg.detection.input_size;
    Box::new(move || -> Result<Box<dyn InferenceBackend>> {
        if path.as_os_str() == STUB_MODEL {
            return Ok(Box::new(detect::StubBackend::new()));
        }
        load_model(&path, input)
    })
}

#[cfg(feature = "backend-tract")]
fn load_model(path: &Path, input: u32) -> Result<Box<dyn InferenceBackend>> {
    if !path.exists() {
        return Err(anyhow!("model not found at {}", path.display()));
    }
    Ok(Box::new(detect::TractBackend::new(path, input, input)?))
}

#[cfg(not(feature = "backend-tract"))]
fn load_model(path: &Path, _input: u32) -> Result<Box<dyn InferenceBackend>> {
    if !path.exists() {
        return Err(anyhow!("model not found at {}", path.display()));
    }
    Err(anyhow!(
        "cannot load {}: built without the backend-tract feature",
        path.display()
    ))
}

/// Assemble a coordinator from configuration with the ffmpeg collaborators.
pub fn build_coordinator(cfg: &SentinelConfig, status: StatusNotifier) -> Result<Coordinator> {
    let audit = Arc::new(AuditLog::open(cfg.audit_path(), cfg.audit_mirror_path())?);

    let ffmpeg = cfg.recording.ffmpeg_path.clone();
    let recorder = Recorder::new(
        cfg.recorder_paths(),
        Box::new(
            recording::FfmpegAudioCapture::new(cfg.audio.input_format.clone())
                .with_program(ffmpeg.clone()),
        ),
        Box::new(
            recording::FfmpegVideoSinkFactory::new(cfg.recording.playback_fps)
                .with_program(ffmpeg.clone()),
        ),
        status,
    )
    .with_audio_device(cfg.audio.device.clone());

    let engine = Arc::new(
        DetectionEngine::new(model_loader(cfg)).with_iou_threshold(cfg.detection.iou_threshold),
    );

    let policy = EscalationPolicy::new(
        cfg.escalation_config(),
        Box::new(escalation::EvidenceStore::new(
            cfg.data_root.clone(),
            Box::new(escalation::ConfiguredMirror::new(cfg.mirror_root.clone())),
        )),
        Box::new(escalation::CommandConnector::new(
            cfg.escalation.lockdown_command.clone(),
            cfg.escalation.restore_command.clone(),
        )),
        audit.clone(),
    );

    Coordinator::new(
        cfg.pipeline_settings(),
        recorder,
        engine,
        policy,
        audit,
        Arc::new(recording::FfmpegMuxer::new().with_program(ffmpeg)),
    )
}
