//! Frame ingestion sources.
//!
//! - `stub://...` produces synthetic frames (tests, demos)
//! - anything else is decoded by an `ffmpeg` child process into rgb24 frames
//!
//! Sources stamp each frame with its capture `Instant` and hand ownership to the
//! caller. They never store or log pixel content.

use anyhow::Result;

use crate::frame::Frame;

mod ffmpeg_pipe;
mod synthetic;

use ffmpeg_pipe::FfmpegPipeSource;
use synthetic::SyntheticSource;

#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// `stub://name`, an RTSP/HTTP URL, a device path or a file.
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    pub ffmpeg_path: std::path::PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "stub://camera".to_string(),
            target_fps: 15,
            width: 640,
            height: 480,
            ffmpeg_path: std::path::PathBuf::from("ffmpeg"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub url: String,
}

pub struct CameraSource {
    backend: SourceBackend,
}

enum SourceBackend {
    Synthetic(SyntheticSource),
    Ffmpeg(FfmpegPipeSource),
}

impl CameraSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let backend = if config.url.starts_with("stub://") {
            SourceBackend::Synthetic(SyntheticSource::new(config))
        } else {
            SourceBackend::Ffmpeg(FfmpegPipeSource::new(config))
        };
        Ok(Self { backend })
    }

    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.connect(),
            SourceBackend::Ffmpeg(source) => source.connect(),
        }
    }

    /// Block until the next frame is available.
    pub fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.next_frame(),
            SourceBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    pub fn is_healthy(&mut self) -> bool {
        match &mut self.backend {
            SourceBackend::Synthetic(_) => true,
            SourceBackend::Ffmpeg(source) => source.is_healthy(),
        }
    }

    pub fn stats(&self) -> SourceStats {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.stats(),
            SourceBackend::Ffmpeg(source) => source.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_url_selects_synthetic_source() -> Result<()> {
        let mut source = CameraSource::new(SourceConfig {
            width: 32,
            height: 16,
            ..Default::default()
        })?;
        source.connect()?;
        let frame = source.next_frame()?;
        assert_eq!((frame.width, frame.height), (32, 16));
        assert!(source.is_healthy());
        assert_eq!(source.stats().frames_captured, 1);
        Ok(())
    }

    #[test]
    fn missing_ffmpeg_fails_to_connect() -> Result<()> {
        let mut source = CameraSource::new(SourceConfig {
            url: "rtsp://127.0.0.1:1/stream".to_string(),
            ffmpeg_path: "/nonexistent/ffmpeg".into(),
            ..Default::default()
        })?;
        assert!(source.connect().is_err());
        Ok(())
    }
}
