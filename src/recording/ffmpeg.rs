//! Collaborators backed by the `ffmpeg` command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};

use crate::frame::Frame;
use crate::recording::{AudioCapture, Muxer, VideoSink, VideoSinkFactory};

const DEFAULT_PROGRAM: &str = "ffmpeg";

/// Spawns one `ffmpeg -f rawvideo` encoder per session.
#[derive(Clone, Debug)]
pub struct FfmpegVideoSinkFactory {
    program: PathBuf,
    playback_fps: u32,
}

impl FfmpegVideoSinkFactory {
    pub fn new(playback_fps: u32) -> Self {
        Self {
            program: PathBuf::from(DEFAULT_PROGRAM),
            playback_fps,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }
}

impl VideoSinkFactory for FfmpegVideoSinkFactory {
    fn create(&self, path: &Path, width: u32, height: u32) -> Result<Box<dyn VideoSink>> {
        let mut child = Command::new(&self.program)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .arg("-s")
            .arg(format!("{}x{}", width, height))
            .arg("-r")
            .arg(self.playback_fps.to_string())
            .args(["-i", "pipe:0", "-c:v", "libx264", "-pix_fmt", "yuv420p"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program.display()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to open ffmpeg stdin"))?;
        Ok(Box::new(FfmpegVideoSink {
            child,
            stdin: Some(stdin),
            width,
            height,
            path: path.to_path_buf(),
        }))
    }
}

struct FfmpegVideoSink {
    child: Child,
    stdin: Option<ChildStdin>,
    width: u32,
    height: u32,
    path: PathBuf,
}

impl VideoSink for FfmpegVideoSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if (frame.width, frame.height) != (self.width, self.height) {
            bail!(
                "encoder for {} expects {}x{}, got {}x{}",
                self.path.display(),
                self.width,
                self.height,
                frame.width,
                frame.height
            );
        }
        let rgb = frame.to_rgb()?;
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("encoder input already closed"))?;
        stdin
            .write_all(&rgb)
            .context("failed to write frame to ffmpeg")?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        // Closing stdin is ffmpeg's end-of-stream.
        drop(self.stdin.take());
        let status = self.child.wait().context("failed to wait for ffmpeg")?;
        if !status.success() {
            bail!("ffmpeg encoder for {} exited with {}", self.path.display(), status);
        }
        Ok(())
    }
}

impl Drop for FfmpegVideoSink {
    // Reached without `finish` when a session is abandoned; let the encoder see EOF
    // and reap it. After `finish` the status is already cached.
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Err(e) = self.child.wait() {
            log::warn!("failed to reap ffmpeg encoder for {}: {}", self.path.display(), e);
        }
    }
}

/// Records an input device to WAV until stopped.
///
/// `input_format` is ffmpeg's `-f` demuxer (`alsa`, `pulse`, `avfoundation`, or
/// `lavfi` with device `anullsrc` for silence).
pub struct FfmpegAudioCapture {
    program: PathBuf,
    input_format: String,
    child: Option<Child>,
}

impl FfmpegAudioCapture {
    pub fn new(input_format: impl Into<String>) -> Self {
        Self {
            program: PathBuf::from(DEFAULT_PROGRAM),
            input_format: input_format.into(),
            child: None,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }
}

impl AudioCapture for FfmpegAudioCapture {
    fn start(&mut self, device: Option<&str>, output: &Path) -> Result<()> {
        if self.child.is_some() {
            bail!("audio capture already running");
        }
        let mut child = Command::new(&self.program)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", self.input_format.as_str()])
            .args(["-i", device.unwrap_or("default")])
            .args(["-ac", "1", "-ar", "44100"])
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program.display()))?;

        // Fail the start if the device is rejected immediately.
        std::thread::sleep(std::time::Duration::from_millis(200));
        if let Some(status) = child.try_wait()? {
            bail!(
                "audio capture from {:?} ({}) exited with {}",
                device.unwrap_or("default"),
                self.input_format,
                status
            );
        }
        self.child = Some(child);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        // `q` on stdin asks ffmpeg to finish the file; kill only if that fails.
        let graceful = child
            .stdin
            .take()
            .map(|mut stdin| stdin.write_all(b"q").is_ok())
            .unwrap_or(false);
        if !graceful {
            let _ = child.kill();
        }
        let status = child.wait().context("failed to wait for audio capture")?;
        if graceful && !status.success() {
            log::warn!("audio capture exited with {}", status);
        }
        Ok(())
    }
}

impl Drop for FfmpegAudioCapture {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Copies the video stream and encodes the audio track as AAC.
#[derive(Clone, Debug)]
pub struct FfmpegMuxer {
    program: PathBuf,
}

impl FfmpegMuxer {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_PROGRAM),
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }
}

impl Default for FfmpegMuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Muxer for FfmpegMuxer {
    fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        let out = Command::new(&self.program)
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .arg("-i")
            .arg(video)
            .arg("-i")
            .arg(audio)
            .args(["-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy", "-c:a", "aac"])
            .arg(output)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to spawn {}", self.program.display()))?;
        if !out.status.success() {
            bail!(
                "ffmpeg merge exited with {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_fails_to_create_sink() {
        let dir = tempfile::tempdir().unwrap();
        let factory = FfmpegVideoSinkFactory::new(30).with_program("/nonexistent/ffmpeg");
        assert!(factory.create(&dir.path().join("v.mp4"), 4, 4).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn dropped_sink_closes_input_and_reaps_encoder() {
        let mut child = Command::new("cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let pid = child.id();
        let stdin = child.stdin.take();
        let sink = FfmpegVideoSink {
            child,
            stdin,
            width: 2,
            height: 2,
            path: PathBuf::from("abandoned.mp4"),
        };
        assert!(Path::new(&format!("/proc/{}", pid)).exists());
        drop(sink);
        assert!(!Path::new(&format!("/proc/{}", pid)).exists());
    }

    #[test]
    fn missing_program_fails_to_start_audio() {
        let dir = tempfile::tempdir().unwrap();
        let mut audio = FfmpegAudioCapture::new("alsa").with_program("/nonexistent/ffmpeg");
        assert!(audio.start(None, &dir.path().join("a.wav")).is_err());
        // Never started, so stop is a no-op.
        assert!(audio.stop().is_ok());
    }

    #[test]
    fn missing_program_fails_merge() {
        let dir = tempfile::tempdir().unwrap();
        let muxer = FfmpegMuxer::new().with_program("/nonexistent/ffmpeg");
        let p = dir.path();
        assert!(muxer
            .merge(&p.join("v.mp4"), &p.join("a.wav"), &p.join("out.mp4"))
            .is_err());
    }
}
