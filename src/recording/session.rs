use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};

use crate::eventlog::{companion_path, format_hms, EventCategory, EventLog};
use crate::frame::Frame;
use crate::recording::{
    AudioCapture, RecordingState, SessionError, StatusNotifier, VideoSink, VideoSinkFactory,
};

/// Where temp tracks and finished recordings go.
#[derive(Clone, Debug)]
pub struct RecorderPaths {
    pub temp_dir: PathBuf,
    pub output_dir: PathBuf,
}

/// Descriptor of one recording session.
#[derive(Clone, Debug)]
pub struct RecordingSession {
    /// Monotonic per-recorder generation; stale work tagged with an older id is dropped.
    pub id: u64,
    pub started_at: Instant,
    pub started_wall: DateTime<Local>,
    pub final_path: PathBuf,
    pub temp_video: PathBuf,
    pub temp_audio: PathBuf,
    /// Set from the first decimated frame.
    pub frame_size: Option<(u32, u32)>,
}

impl RecordingSession {
    pub fn event_log_path(&self) -> PathBuf {
        companion_path(&self.final_path)
    }
}

#[derive(Clone, Debug)]
pub enum StartOutcome {
    Started(RecordingSession),
    /// A session is already active; nothing changed.
    AlreadyRecording,
    Failed(SessionError),
}

pub enum StopOutcome {
    /// No active session; nothing changed.
    NotRecording,
    Stopped(FinalizeJob),
}

/// Everything finalization needs once the session has left `Recording`.
pub struct FinalizeJob {
    pub session: RecordingSession,
    pub events: Arc<EventLog>,
    pub frames_written: u64,
    pub elapsed: Duration,
}

struct ActiveSession {
    info: RecordingSession,
    writer: Option<Box<dyn VideoSink>>,
    events: Arc<EventLog>,
    frames_written: u64,
}

pub struct Recorder {
    paths: RecorderPaths,
    audio_device: Option<String>,
    audio: Box<dyn AudioCapture>,
    sinks: Box<dyn VideoSinkFactory>,
    status: StatusNotifier,
    state: RecordingState,
    active: Option<ActiveSession>,
    generation: u64,
}

impl Recorder {
    pub fn new(
        paths: RecorderPaths,
        audio: Box<dyn AudioCapture>,
        sinks: Box<dyn VideoSinkFactory>,
        status: StatusNotifier,
    ) -> Self {
        Self {
            paths,
            audio_device: None,
            audio,
            sinks,
            status,
            state: RecordingState::Idle,
            active: None,
            generation: 0,
        }
    }

    pub fn with_audio_device(mut self, device: Option<String>) -> Self {
        self.audio_device = device;
        self
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecordingState::Recording
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.active.as_ref().map(|a| &a.info)
    }

    /// Event log of the active session.
    pub fn events(&self) -> Option<Arc<EventLog>> {
        self.active.as_ref().map(|a| a.events.clone())
    }

    pub fn status(&self) -> &StatusNotifier {
        &self.status
    }

    /// Begin a session. A start while recording is a no-op.
    pub fn start(&mut self) -> StartOutcome {
        if self.active.is_some() {
            log::debug!("start ignored: session already active");
            return StartOutcome::AlreadyRecording;
        }

        match self.open_session() {
            Ok(info) => {
                self.state = RecordingState::Recording;
                self.status.state(self.state);
                self.status.message(format!(
                    "Recording to {}",
                    info.final_path.display()
                ));
                StartOutcome::Started(info)
            }
            Err(e) => {
                let err = SessionError::new(SessionError::START_FAILED, format!("{:#}", e));
                log::error!("failed to start recording: {}", err);
                self.status.message(format!("Failed to start recording: {:#}", e));
                StartOutcome::Failed(err)
            }
        }
    }

    fn open_session(&mut self) -> Result<RecordingSession> {
        fs::create_dir_all(&self.paths.temp_dir)?;
        fs::create_dir_all(&self.paths.output_dir)?;

        let id = self.generation + 1;
        let started_wall = Local::now();
        let stamp = started_wall.format("%Y%m%d_%H%M%S").to_string();
        let info = RecordingSession {
            id,
            started_at: Instant::now(),
            started_wall,
            final_path: unique_output_path(&self.paths.output_dir, &stamp),
            temp_video: self.paths.temp_dir.join(format!("session_{}_{}_video.mp4", stamp, id)),
            temp_audio: self.paths.temp_dir.join(format!("session_{}_{}_audio.wav", stamp, id)),
            frame_size: None,
        };

        self.audio
            .start(self.audio_device.as_deref(), &info.temp_audio)
            .map_err(|e| anyhow!("audio capture failed to start: {:#}", e))?;

        let events = Arc::new(EventLog::new(info.started_at, Some(info.event_log_path())));
        if let Err(e) = events.log(EventCategory::System, "Recording Started", Duration::ZERO) {
            log::warn!("{:#}", e);
        }

        self.generation = id;
        self.active = Some(ActiveSession {
            info: info.clone(),
            writer: None,
            events,
            frames_written: 0,
        });
        log::info!("session {} started", id);
        Ok(info)
    }

    /// Append a decimated frame to the active session. Returns false when idle.
    ///
    /// The writer is constructed on the first frame, sized to that frame.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<bool> {
        let Some(active) = self.active.as_mut() else {
            return Ok(false);
        };

        if active.writer.is_none() {
            let writer = self
                .sinks
                .create(&active.info.temp_video, frame.width, frame.height)?;
            active.info.frame_size = Some((frame.width, frame.height));
            active.writer = Some(writer);
            log::info!(
                "session {} video writer opened at {}x{}",
                active.info.id,
                frame.width,
                frame.height
            );
        }

        if active.info.frame_size != Some((frame.width, frame.height)) {
            return Err(anyhow!(
                "frame size {}x{} does not match session size {:?}",
                frame.width,
                frame.height,
                active.info.frame_size
            ));
        }

        if let Some(writer) = active.writer.as_mut() {
            writer.write_frame(frame)?;
            active.frames_written += 1;
        }
        Ok(true)
    }

    /// End the active session: stop audio, close the writer, log the duration.
    ///
    /// Stopping while idle is a no-op.
    pub fn stop(&mut self) -> StopOutcome {
        let Some(active) = self.active.take() else {
            return StopOutcome::NotRecording;
        };
        self.state = RecordingState::Stopping;
        self.status.state(self.state);

        if let Err(e) = self.audio.stop() {
            log::warn!("audio capture did not stop cleanly: {:#}", e);
        }
        if let Some(writer) = active.writer {
            if let Err(e) = writer.finish() {
                log::warn!("video writer did not close cleanly: {:#}", e);
            }
        }

        let elapsed = active.info.started_at.elapsed();
        if let Err(e) = active.events.log(
            EventCategory::System,
            format!("Recording Stopped. Duration: {}", format_hms(elapsed)),
            elapsed,
        ) {
            log::warn!("{:#}", e);
        }

        self.state = RecordingState::Idle;
        self.status.state(self.state);
        log::info!(
            "session {} stopped after {} ({} frames)",
            active.info.id,
            format_hms(elapsed),
            active.frames_written
        );

        StopOutcome::Stopped(FinalizeJob {
            session: active.info,
            events: active.events,
            frames_written: active.frames_written,
            elapsed,
        })
    }
}

fn unique_output_path(dir: &Path, stamp: &str) -> PathBuf {
    let free = |p: &PathBuf| !p.exists() && !companion_path(p).exists();
    let first = dir.join(format!("timelapse_{}.mp4", stamp));
    if free(&first) {
        return first;
    }
    (2u32..)
        .map(|n| dir.join(format!("timelapse_{}_{}.mp4", stamp, n)))
        .find(free)
        .unwrap_or(first)
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct SinkLog {
        pub created: AtomicUsize,
        pub frames: AtomicUsize,
        pub finished: AtomicUsize,
    }

    pub struct FakeSinkFactory(pub Arc<SinkLog>);

    struct FakeSink {
        path: PathBuf,
        log: Arc<SinkLog>,
    }

    impl VideoSinkFactory for FakeSinkFactory {
        fn create(&self, path: &Path, _width: u32, _height: u32) -> Result<Box<dyn VideoSink>> {
            self.0.created.fetch_add(1, Ordering::SeqCst);
            fs::write(path, b"")?;
            Ok(Box::new(FakeSink {
                path: path.to_path_buf(),
                log: self.0.clone(),
            }))
        }
    }

    impl VideoSink for FakeSink {
        fn write_frame(&mut self, frame: &Frame) -> Result<()> {
            use std::io::Write;
            let mut f = fs::OpenOptions::new().append(true).open(&self.path)?;
            f.write_all(&frame.width.to_le_bytes())?;
            self.log.frames.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn finish(self: Box<Self>) -> Result<()> {
            self.log.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeAudio {
        pub fail_start: bool,
        pub output: Arc<Mutex<Option<PathBuf>>>,
    }

    impl AudioCapture for FakeAudio {
        fn start(&mut self, _device: Option<&str>, output: &Path) -> Result<()> {
            if self.fail_start {
                return Err(anyhow!("no such audio device"));
            }
            fs::write(output, b"RIFF")?;
            *self.output.lock().unwrap() = Some(output.to_path_buf());
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }
    }

    pub fn recorder(root: &Path, audio: FakeAudio) -> (Recorder, Arc<SinkLog>) {
        let log = Arc::new(SinkLog::default());
        let recorder = Recorder::new(
            RecorderPaths {
                temp_dir: root.join("tmp"),
                output_dir: root.join("out"),
            },
            Box::new(audio),
            Box::new(FakeSinkFactory(log.clone())),
            StatusNotifier::disabled(),
        );
        (recorder, log)
    }
}
