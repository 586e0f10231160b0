//! Recording state machine.
//!
//! One session at a time: `Idle -> Recording -> Stopping -> Idle`. The video writer is
//! created lazily from the first decimated frame's dimensions; audio capture and the
//! final merge are external collaborators behind the traits below.

use std::path::Path;

use anyhow::Result;

use crate::frame::Frame;

mod ffmpeg;
mod finalize;
mod session;
mod status;

pub use ffmpeg::{FfmpegAudioCapture, FfmpegMuxer, FfmpegVideoSinkFactory};
pub use finalize::{finalize, FinalizeOutcome};
pub use session::{FinalizeJob, Recorder, RecorderPaths, RecordingSession, StartOutcome, StopOutcome};
pub use status::{StatusNotifier, StatusUpdate};

#[cfg(test)]
pub(crate) use session::fakes;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
    Stopping,
}

impl std::fmt::Display for RecordingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecordingState::Idle => "idle",
            RecordingState::Recording => "recording",
            RecordingState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Recording failure with a stable code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionError {
    pub code: &'static str,
    pub message: String,
}

impl SessionError {
    pub const START_FAILED: &'static str = "START_FAILED";
    pub const MISSING_TEMP_VIDEO: &'static str = "MISSING_TEMP_VIDEO";
    pub const MISSING_TEMP_AUDIO: &'static str = "MISSING_TEMP_AUDIO";
    pub const SAVE_FAILED: &'static str = "SAVE_FAILED";

    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for SessionError {}

/// Encoder for decimated frames. Called only by the decimator's single consumer.
pub trait VideoSink: Send {
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and close the output file.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Builds a sink once the frame dimensions are known.
pub trait VideoSinkFactory: Send {
    fn create(&self, path: &Path, width: u32, height: u32) -> Result<Box<dyn VideoSink>>;
}

/// Write-only audio recorder.
pub trait AudioCapture: Send {
    fn start(&mut self, device: Option<&str>, output: &Path) -> Result<()>;

    /// Stop and wait until the output file is complete.
    fn stop(&mut self) -> Result<()>;
}

/// Combines the temp video and audio tracks into the final container.
pub trait Muxer: Send + Sync {
    fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<()>;
}
