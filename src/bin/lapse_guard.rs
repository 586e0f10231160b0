//! lapse_guard - time-lapse security recorder daemon
//!
//! 1. Loads configuration (`LAPSE_CONFIG` file + `LAPSE_*` environment)
//! 2. Connects the frame source (`stub://` synthetic or anything ffmpeg can read)
//! 3. Starts a recording session and feeds every frame to the coordinator
//! 4. On Ctrl-C (or `--duration`), stops the session and waits for the merge
//!
//! No audio level source is wired here: audio is only recorded to the session's WAV
//! track, so `Coordinator::on_audio_level` (loud-sound events) is left to embedders
//! that own a level meter.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lapse_guard::ingest::{CameraSource, SourceConfig};
use lapse_guard::{
    build_coordinator, FinalizeOutcome, SentinelConfig, SessionStop, StartOutcome, StatusNotifier,
    StatusUpdate,
};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "lapse_guard", about = "Time-lapse security recorder")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension)
    #[arg(long, env = "LAPSE_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Stop automatically after this many seconds
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Some(path) = &args.config {
        std::env::set_var("LAPSE_CONFIG", path);
    }
    let cfg = SentinelConfig::load()?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            log::info!("interrupt received; stopping");
            running.store(false, Ordering::SeqCst);
        })?;
    }

    let (status_tx, status_rx) = crossbeam_channel::unbounded();
    std::thread::spawn(move || {
        for update in status_rx {
            if let StatusUpdate::Progress(percent) = update {
                log::debug!("finalize progress {}%", percent);
            }
        }
    });

    let coordinator = build_coordinator(&cfg, StatusNotifier::new(status_tx))?;

    let mut source = CameraSource::new(SourceConfig {
        url: cfg.source.url.clone(),
        target_fps: cfg.source.target_fps,
        width: cfg.source.width,
        height: cfg.source.height,
        ffmpeg_path: cfg.recording.ffmpeg_path.clone(),
    })?;
    source.connect()?;

    match coordinator.start() {
        StartOutcome::Started(session) => {
            log::info!("lapse_guard recording to {}", session.final_path.display());
        }
        StartOutcome::AlreadyRecording => {}
        StartOutcome::Failed(err) => return Err(anyhow!("could not start recording: {}", err)),
    }
    log::info!(
        "data_root={} mirror_root={}",
        cfg.data_root.display(),
        cfg.mirror_root
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".to_string())
    );

    let deadline = args.duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let frame_interval = Duration::from_secs_f64(1.0 / cfg.source.target_fps as f64);
    let mut last_health_log = Instant::now();

    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            log::info!("duration elapsed; stopping");
            break;
        }
        let tick = Instant::now();
        match source.next_frame() {
            Ok(frame) => coordinator.on_frame(frame),
            Err(e) => {
                log::warn!("frame source error: {:#}", e);
                std::thread::sleep(RECONNECT_DELAY);
                if let Err(e) = source.connect() {
                    log::error!("reconnect failed: {:#}", e);
                }
                continue;
            }
        }

        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let stats = source.stats();
            log::info!(
                "source health={} frames={} url={}",
                source.is_healthy(),
                stats.frames_captured,
                stats.url
            );
            last_health_log = Instant::now();
        }

        if let Some(rest) = frame_interval.checked_sub(tick.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    match coordinator.stop() {
        SessionStop::NotRecording => Ok(()),
        SessionStop::Finalizing(handle) => match handle.wait() {
            FinalizeOutcome::Merged { output } => {
                log::info!("saved {}", output.display());
                Ok(())
            }
            FinalizeOutcome::SavedWithoutAudio { output, reason } => {
                log::warn!("saved {} without audio ({})", output.display(), reason);
                Ok(())
            }
            FinalizeOutcome::Failed(err) => Err(anyhow!("recording not saved: {}", err)),
        },
    }
}
