use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::escalation::{parse_argv, EscalationConfig};
use crate::pipeline::PipelineSettings;
use crate::recording::RecorderPaths;

const APP_DIR: &str = "lapse-guard";
const DEFAULT_SOURCE_URL: &str = "stub://front_door";
const DEFAULT_SOURCE_FPS: u32 = 15;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_MODEL_FILE: &str = "yolov8n.onnx";
const DEFAULT_MODEL_INPUT: u32 = crate::detect::DEFAULT_MODEL_INPUT;
const DEFAULT_PLAYBACK_FPS: u32 = 30;
const DEFAULT_AUDIO_FORMAT: &str = "alsa";
const DEFAULT_SNAPSHOT_INTERVAL_SECS: u64 = 60 * 60;

#[derive(Debug, Deserialize, Default)]
struct SentinelConfigFile {
    data_root: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    mirror_root: Option<PathBuf>,
    source: Option<SourceConfigFile>,
    detection: Option<DetectionConfigFile>,
    escalation: Option<EscalationConfigFile>,
    audio: Option<AudioConfigFile>,
    recording: Option<RecordingConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    model_path: Option<PathBuf>,
    confidence: Option<f32>,
    security_confidence: Option<f32>,
    iou_threshold: Option<f32>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct EscalationConfigFile {
    alert_budget: Option<u32>,
    snapshot_interval_secs: Option<u64>,
    lockdown_command: Option<Vec<String>>,
    restore_command: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct AudioConfigFile {
    device: Option<String>,
    input_format: Option<String>,
    loud_threshold: Option<f32>,
    loud_cooldown_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RecordingConfigFile {
    playback_fps: Option<u32>,
    keep_temp_files: Option<bool>,
    ffmpeg_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub data_root: PathBuf,
    pub output_dir: PathBuf,
    pub mirror_root: Option<PathBuf>,
    pub source: SourceSettings,
    pub detection: DetectionSettings,
    pub escalation: EscalationSettings,
    pub audio: AudioSettings,
    pub recording: RecordingSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub model_path: PathBuf,
    pub confidence: f32,
    pub security_confidence: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
}

#[derive(Debug, Clone)]
pub struct EscalationSettings {
    pub alert_budget: u32,
    pub snapshot_interval: Duration,
    pub lockdown_command: Vec<String>,
    pub restore_command: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AudioSettings {
    pub device: Option<String>,
    pub input_format: String,
    pub loud_threshold: f32,
    pub loud_cooldown: Duration,
}

#[derive(Debug, Clone)]
pub struct RecordingSettings {
    pub playback_fps: u32,
    pub keep_temp_files: bool,
    pub ffmpeg_path: PathBuf,
}

impl SentinelConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LAPSE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut file = file_cfg.unwrap_or_default();
        // Paths derived from the data root must follow its override.
        if let Some(root) = env_path("LAPSE_DATA_ROOT") {
            file.data_root = Some(root);
        }
        let mut cfg = Self::from_file(file)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentinelConfigFile) -> Result<Self> {
        let data_root = match file.data_root {
            Some(root) => root,
            None => default_data_root()?,
        };
        let output_dir = file
            .output_dir
            .unwrap_or_else(|| data_root.join("recordings"));

        let source = file.source.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let escalation = file.escalation.unwrap_or_default();
        let audio = file.audio.unwrap_or_default();
        let recording = file.recording.unwrap_or_default();

        Ok(Self {
            source: SourceSettings {
                url: source.url.unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                target_fps: source.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
                width: source.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
                height: source.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
            },
            detection: DetectionSettings {
                model_path: detection
                    .model_path
                    .unwrap_or_else(|| data_root.join("models").join(DEFAULT_MODEL_FILE)),
                confidence: detection
                    .confidence
                    .unwrap_or(crate::detect::DEFAULT_CONFIDENCE_THRESHOLD),
                security_confidence: detection
                    .security_confidence
                    .unwrap_or(crate::detect::SECURITY_CONFIDENCE_THRESHOLD),
                iou_threshold: detection
                    .iou_threshold
                    .unwrap_or(crate::detect::DEFAULT_IOU_THRESHOLD),
                input_size: detection.input_size.unwrap_or(DEFAULT_MODEL_INPUT),
            },
            escalation: EscalationSettings {
                alert_budget: escalation
                    .alert_budget
                    .unwrap_or(crate::escalation::DEFAULT_ALERT_BUDGET),
                snapshot_interval: Duration::from_secs(
                    escalation
                        .snapshot_interval_secs
                        .unwrap_or(DEFAULT_SNAPSHOT_INTERVAL_SECS),
                ),
                lockdown_command: escalation.lockdown_command.unwrap_or_default(),
                restore_command: escalation.restore_command.unwrap_or_default(),
            },
            audio: AudioSettings {
                device: audio.device,
                input_format: audio
                    .input_format
                    .unwrap_or_else(|| DEFAULT_AUDIO_FORMAT.to_string()),
                loud_threshold: audio
                    .loud_threshold
                    .unwrap_or(crate::pipeline::LOUD_SOUND_THRESHOLD),
                loud_cooldown: audio
                    .loud_cooldown_secs
                    .map(Duration::from_secs)
                    .unwrap_or(crate::pipeline::LOUD_SOUND_COOLDOWN),
            },
            recording: RecordingSettings {
                playback_fps: recording.playback_fps.unwrap_or(DEFAULT_PLAYBACK_FPS),
                keep_temp_files: recording.keep_temp_files.unwrap_or(false),
                ffmpeg_path: recording
                    .ffmpeg_path
                    .unwrap_or_else(|| PathBuf::from("ffmpeg")),
            },
            data_root,
            output_dir,
            mirror_root: file.mirror_root,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(dir) = env_path("LAPSE_OUTPUT_DIR") {
            self.output_dir = dir;
        }
        if let Some(root) = env_path("LAPSE_MIRROR_ROOT") {
            self.mirror_root = Some(root);
        }
        if let Some(model) = env_path("LAPSE_MODEL_PATH") {
            self.detection.model_path = model;
        }
        if let Ok(url) = std::env::var("LAPSE_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(device) = std::env::var("LAPSE_AUDIO_DEVICE") {
            if !device.trim().is_empty() {
                self.audio.device = Some(device);
            }
        }
        if let Ok(interval) = std::env::var("LAPSE_SNAPSHOT_INTERVAL_SECS") {
            let seconds: u64 = interval.parse().map_err(|_| {
                anyhow!("LAPSE_SNAPSHOT_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.escalation.snapshot_interval = Duration::from_secs(seconds);
        }
        if let Ok(command) = std::env::var("LAPSE_LOCKDOWN_COMMAND") {
            self.escalation.lockdown_command = parse_argv(&command)
                .map_err(|e| anyhow!("LAPSE_LOCKDOWN_COMMAND: {}", e))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("detection.confidence", self.detection.confidence),
            ("detection.security_confidence", self.detection.security_confidence),
            ("detection.iou_threshold", self.detection.iou_threshold),
            ("audio.loud_threshold", self.audio.loud_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(anyhow!("{} must be in (0, 1], got {}", name, value));
            }
        }
        if self.escalation.alert_budget == 0 {
            return Err(anyhow!("escalation.alert_budget must be greater than zero"));
        }
        if self.escalation.snapshot_interval.is_zero() {
            return Err(anyhow!("snapshot interval must be greater than zero"));
        }
        if self.recording.playback_fps == 0 || self.source.target_fps == 0 {
            return Err(anyhow!("frame rates must be greater than zero"));
        }
        if self.detection.input_size == 0 || self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("frame and model dimensions must be greater than zero"));
        }
        Ok(())
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.data_root.join("tmp")
    }

    pub fn audit_path(&self) -> PathBuf {
        self.data_root.join("audit").join("audit.jsonl")
    }

    /// Audit mirror file, if the mirror root is currently present.
    pub fn audit_mirror_path(&self) -> Option<PathBuf> {
        self.mirror_root
            .as_ref()
            .filter(|root| root.is_dir())
            .map(|root| root.join("audit").join("audit.jsonl"))
    }

    pub fn recorder_paths(&self) -> RecorderPaths {
        RecorderPaths {
            temp_dir: self.temp_dir(),
            output_dir: self.output_dir.clone(),
        }
    }

    pub fn escalation_config(&self) -> EscalationConfig {
        EscalationConfig {
            person_threshold: self.detection.security_confidence,
            alert_budget: self.escalation.alert_budget,
            snapshot_interval: self.escalation.snapshot_interval,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            general_confidence: self.detection.confidence,
            security_confidence: self.detection.security_confidence,
            loud_sound_threshold: self.audio.loud_threshold,
            loud_sound_cooldown: self.audio.loud_cooldown,
            keep_temp_files: self.recording.keep_temp_files,
            ..PipelineSettings::default()
        }
    }
}

fn default_data_root() -> Result<PathBuf> {
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or_else(|| anyhow!("no local data directory; set LAPSE_DATA_ROOT"))
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
