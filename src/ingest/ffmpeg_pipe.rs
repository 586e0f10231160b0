use std::io::{BufReader, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};

use crate::frame::Frame;
use crate::ingest::{SourceConfig, SourceStats};

/// Decodes any ffmpeg-readable input to fixed-size rgb24 frames on stdout.
pub(super) struct FfmpegPipeSource {
    config: SourceConfig,
    child: Option<Child>,
    stdout: Option<BufReader<ChildStdout>>,
    frame_count: u64,
}

impl FfmpegPipeSource {
    pub(super) fn new(config: SourceConfig) -> Self {
        Self {
            config,
            child: None,
            stdout: None,
            frame_count: 0,
        }
    }

    pub(super) fn connect(&mut self) -> Result<()> {
        self.disconnect();
        let mut command = Command::new(&self.config.ffmpeg_path);
        command.args(["-hide_banner", "-loglevel", "error", "-nostdin"]);
        if self.config.url.starts_with("rtsp://") {
            command.args(["-rtsp_transport", "tcp"]);
        }
        let mut child = command
            .arg("-i")
            .arg(&self.config.url)
            .args(["-an", "-f", "rawvideo", "-pix_fmt", "rgb24"])
            .arg("-vf")
            .arg(format!(
                "fps={},scale={}:{}",
                self.config.target_fps, self.config.width, self.config.height
            ))
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.config.ffmpeg_path.display()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to open ffmpeg stdout"))?;
        self.stdout = Some(BufReader::new(stdout));
        self.child = Some(child);
        log::info!(
            "source {} connected via ffmpeg ({}x{} @ {} fps)",
            self.config.url,
            self.config.width,
            self.config.height,
            self.config.target_fps
        );
        Ok(())
    }

    pub(super) fn next_frame(&mut self) -> Result<Frame> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| anyhow!("source {} is not connected", self.config.url))?;
        let len = self.config.width as usize * self.config.height as usize * 3;
        let mut pixels = vec![0u8; len];
        if let Err(e) = stdout.read_exact(&mut pixels) {
            self.disconnect();
            bail!("source {} ended: {}", self.config.url, e);
        }
        self.frame_count += 1;
        Frame::rgb(pixels, self.config.width, self.config.height, Instant::now())
    }

    pub(super) fn is_healthy(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub(super) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            url: self.config.url.clone(),
        }
    }

    fn disconnect(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for FfmpegPipeSource {
    fn drop(&mut self) {
        self.disconnect();
    }
}
