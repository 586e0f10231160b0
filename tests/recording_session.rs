use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Result};

use lapse_guard::eventlog::{self, EventCategory};
use lapse_guard::recording::{
    finalize, AudioCapture, FinalizeOutcome, Muxer, Recorder, RecorderPaths, StartOutcome,
    StatusNotifier, StopOutcome, VideoSink, VideoSinkFactory,
};
use lapse_guard::Frame;

struct FileSinks;

struct FileSink(fs::File);

impl VideoSinkFactory for FileSinks {
    fn create(&self, path: &Path, _width: u32, _height: u32) -> Result<Box<dyn VideoSink>> {
        Ok(Box::new(FileSink(fs::File::create(path)?)))
    }
}

impl VideoSink for FileSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.0.write_all(frame.pixels())?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        self.0.sync_all()?;
        Ok(())
    }
}

struct WavStub;

impl AudioCapture for WavStub {
    fn start(&mut self, _device: Option<&str>, output: &Path) -> Result<()> {
        fs::write(output, b"RIFF....WAVE")?;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Concatenates both tracks so the test can see what was merged.
struct ConcatMuxer;

impl Muxer for ConcatMuxer {
    fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        let mut merged = fs::read(video)?;
        merged.extend(fs::read(audio)?);
        fs::write(output, merged)?;
        Ok(())
    }
}

struct NoMuxer;

impl Muxer for NoMuxer {
    fn merge(&self, _video: &Path, _audio: &Path, _output: &Path) -> Result<()> {
        Err(anyhow!("ffmpeg exited with status 1"))
    }
}

fn recorder(root: &Path) -> Recorder {
    Recorder::new(
        RecorderPaths {
            temp_dir: root.join("tmp"),
            output_dir: root.join("recordings"),
        },
        Box::new(WavStub),
        Box::new(FileSinks),
        StatusNotifier::disabled(),
    )
}

fn frame(fill: u8) -> Frame {
    Frame::rgb(vec![fill; 4 * 2 * 3], 4, 2, Instant::now()).expect("frame")
}

fn record_three_frames(recorder: &mut Recorder) -> Result<(PathBuf, lapse_guard::recording::FinalizeJob)> {
    let session = match recorder.start() {
        StartOutcome::Started(session) => session,
        other => return Err(anyhow!("unexpected start outcome {:?}", other)),
    };
    for fill in [1, 2, 3] {
        assert!(recorder.write_frame(&frame(fill))?);
    }
    match recorder.stop() {
        StopOutcome::Stopped(job) => Ok((session.final_path, job)),
        StopOutcome::NotRecording => Err(anyhow!("recorder was not recording")),
    }
}

#[test]
fn three_frame_session_merges_and_logs_two_events() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut recorder = recorder(dir.path());

    let (final_path, job) = record_three_frames(&mut recorder)?;
    assert_eq!(job.frames_written, 3);

    let outcome = finalize(&job, &ConcatMuxer, false, &StatusNotifier::disabled());
    assert_eq!(
        outcome,
        FinalizeOutcome::Merged {
            output: final_path.clone()
        }
    );

    let merged = fs::read(&final_path)?;
    assert_eq!(merged.len(), 3 * 24 + b"RIFF....WAVE".len());
    assert!(!job.session.temp_video.exists());
    assert!(!job.session.temp_audio.exists());

    let events = eventlog::load(&eventlog::companion_path(&final_path));
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].category, EventCategory::System);
    assert_eq!(events[0].description, "Recording Started");
    assert_eq!(events[0].offset_ms, 0);
    assert!(events[1]
        .description
        .starts_with("Recording Stopped. Duration: 00:00:0"));
    Ok(())
}

#[test]
fn failed_merge_keeps_silent_video() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut recorder = recorder(dir.path());

    let (final_path, job) = record_three_frames(&mut recorder)?;
    let outcome = finalize(&job, &NoMuxer, true, &StatusNotifier::disabled());

    match &outcome {
        FinalizeOutcome::SavedWithoutAudio { output, reason } => {
            assert_eq!(output, &final_path);
            assert!(reason.contains("status 1"));
        }
        other => panic!("expected silent fallback, got {:?}", other),
    }
    assert_eq!(fs::read(&final_path)?.len(), 3 * 24);
    assert!(job.session.temp_video.exists());
    assert!(job.session.temp_audio.exists());
    Ok(())
}

#[test]
fn back_to_back_sessions_get_distinct_outputs() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut recorder = recorder(dir.path());

    let (first, job) = record_three_frames(&mut recorder)?;
    finalize(&job, &ConcatMuxer, false, &StatusNotifier::disabled());
    let (second, job) = record_three_frames(&mut recorder)?;
    finalize(&job, &ConcatMuxer, false, &StatusNotifier::disabled());

    assert_ne!(first, second);
    assert!(first.exists() && second.exists());
    Ok(())
}
