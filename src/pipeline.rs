//! Pipeline coordinator.
//!
//! Frame arrival (any thread) → decimator → recorder (writer, under the session lock)
//! → detection worker (bounded queue, drops on backlog) → escalation worker (FIFO,
//! single consumer, so frames are evaluated in arrival order). Work is tagged with the
//! session id it was captured under; the escalation worker discards anything from a
//! session that is no longer current.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};

use crate::audit::{events, AuditLog};
use crate::decimate::FrameDecimator;
use crate::detect::{DetectionEngine, DetectionResult, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::escalation::{EscalationOutcome, EscalationPolicy};
use crate::eventlog::{format_hms, EventCategory, EventLog};
use crate::frame::Frame;
use crate::recording::{
    finalize, FinalizeOutcome, Muxer, Recorder, SessionError, StartOutcome, StatusNotifier,
    StopOutcome,
};

pub const LOUD_SOUND_THRESHOLD: f32 = 0.8;
pub const LOUD_SOUND_COOLDOWN: Duration = Duration::from_secs(5);
pub const OBJECT_EVENT_COOLDOWN: Duration = Duration::from_secs(10);
const DETECTION_QUEUE_DEPTH: usize = 4;

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub decimation_interval: Duration,
    /// Threshold for `Object` event log entries.
    pub general_confidence: f32,
    /// Lowest confidence the escalation path needs from the detector.
    pub security_confidence: f32,
    pub object_event_cooldown: Duration,
    pub loud_sound_threshold: f32,
    pub loud_sound_cooldown: Duration,
    pub keep_temp_files: bool,
    pub detection_queue_depth: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            decimation_interval: crate::decimate::DEFAULT_DECIMATION_INTERVAL,
            general_confidence: DEFAULT_CONFIDENCE_THRESHOLD,
            security_confidence: crate::detect::SECURITY_CONFIDENCE_THRESHOLD,
            object_event_cooldown: OBJECT_EVENT_COOLDOWN,
            loud_sound_threshold: LOUD_SOUND_THRESHOLD,
            loud_sound_cooldown: LOUD_SOUND_COOLDOWN,
            keep_temp_files: false,
            detection_queue_depth: DETECTION_QUEUE_DEPTH,
        }
    }
}

/// Result of a coordinator stop.
pub enum SessionStop {
    NotRecording,
    /// Merge is running on a background thread.
    Finalizing(FinalizeHandle),
}

pub struct FinalizeHandle {
    session_id: u64,
    handle: JoinHandle<FinalizeOutcome>,
}

impl FinalizeHandle {
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Block until the merge finishes.
    pub fn wait(self) -> FinalizeOutcome {
        self.handle.join().unwrap_or_else(|_| {
            FinalizeOutcome::Failed(SessionError::new(
                SessionError::SAVE_FAILED,
                "finalize thread panicked",
            ))
        })
    }
}

struct Analysis {
    session: u64,
    frame: Arc<Frame>,
    events: Arc<EventLog>,
}

enum DetectMsg {
    Frame(Analysis),
    Barrier(Sender<()>),
    Shutdown,
}

enum EscalateMsg {
    Begin(u64),
    Frame {
        analysis: Analysis,
        detections: Vec<DetectionResult>,
    },
    Barrier(Sender<()>),
    Shutdown,
}

pub struct Coordinator {
    settings: PipelineSettings,
    recorder: Arc<Mutex<Recorder>>,
    decimator: Mutex<FrameDecimator>,
    /// Id of the session currently recording, 0 when idle.
    current: Arc<AtomicU64>,
    detect_tx: Sender<DetectMsg>,
    escalate_tx: Sender<EscalateMsg>,
    audit: Arc<AuditLog>,
    muxer: Arc<dyn Muxer>,
    status: StatusNotifier,
    last_loud: Mutex<Option<Instant>>,
    workers: Vec<JoinHandle<()>>,
}

impl Coordinator {
    pub fn new(
        settings: PipelineSettings,
        recorder: Recorder,
        engine: Arc<DetectionEngine>,
        policy: EscalationPolicy,
        audit: Arc<AuditLog>,
        muxer: Arc<dyn Muxer>,
    ) -> Result<Self> {
        let status = recorder.status().clone();
        let current = Arc::new(AtomicU64::new(0));
        let (detect_tx, detect_rx) = bounded(settings.detection_queue_depth.max(1));
        let (escalate_tx, escalate_rx) = unbounded();

        let detection = DetectionWorker {
            engine,
            rx: detect_rx,
            tx: escalate_tx.clone(),
            current: current.clone(),
            detect_threshold: settings.security_confidence.min(settings.general_confidence),
            general_confidence: settings.general_confidence,
            object_cooldown: settings.object_event_cooldown,
            last_object_event: HashMap::new(),
            object_session: 0,
        };
        let escalation = EscalationWorker {
            policy,
            rx: escalate_rx,
            current: current.clone(),
        };

        let workers = vec![
            thread::Builder::new()
                .name("lapse-detect".into())
                .spawn(move || detection.run())
                .context("failed to spawn detection worker")?,
            thread::Builder::new()
                .name("lapse-escalate".into())
                .spawn(move || escalation.run())
                .context("failed to spawn escalation worker")?,
        ];

        Ok(Self {
            decimator: Mutex::new(FrameDecimator::new(settings.decimation_interval)),
            settings,
            recorder: Arc::new(Mutex::new(recorder)),
            current,
            detect_tx,
            escalate_tx,
            audit,
            muxer,
            status,
            last_loud: Mutex::new(None),
            workers,
        })
    }

    fn recorder(&self) -> Result<MutexGuard<'_, Recorder>> {
        self.recorder
            .lock()
            .map_err(|_| anyhow!("recorder lock poisoned"))
    }

    pub fn is_recording(&self) -> bool {
        self.recorder().map(|r| r.is_recording()).unwrap_or(false)
    }

    /// Event log of the active session.
    pub fn events(&self) -> Option<Arc<EventLog>> {
        self.recorder().ok().and_then(|r| r.events())
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Start a session and reset escalation for it.
    pub fn start(&self) -> StartOutcome {
        let mut recorder = match self.recorder() {
            Ok(recorder) => recorder,
            Err(e) => {
                return StartOutcome::Failed(SessionError::new(
                    SessionError::START_FAILED,
                    e.to_string(),
                ))
            }
        };
        let outcome = recorder.start();
        if let StartOutcome::Started(session) = &outcome {
            // Under the recorder lock: Begin is queued before any frame of this session.
            self.current.store(session.id, Ordering::SeqCst);
            let _ = self.escalate_tx.send(EscalateMsg::Begin(session.id));
            if let Ok(mut decimator) = self.decimator.lock() {
                decimator.reset();
            }
            if let Ok(mut last) = self.last_loud.lock() {
                *last = None;
            }
            self.audit_append(
                events::SESSION_STARTED,
                &format!("Recording session {} started", session.final_path.display()),
            );
        }
        outcome
    }

    /// Stop the active session and merge its tracks in the background.
    pub fn stop(&self) -> SessionStop {
        let job = {
            let mut recorder = match self.recorder() {
                Ok(recorder) => recorder,
                Err(e) => {
                    log::error!("stop failed: {:#}", e);
                    return SessionStop::NotRecording;
                }
            };
            match recorder.stop() {
                StopOutcome::NotRecording => return SessionStop::NotRecording,
                StopOutcome::Stopped(job) => {
                    self.current.store(0, Ordering::SeqCst);
                    job
                }
            }
        };

        self.audit_append(
            events::SESSION_STOPPED,
            &format!(
                "Recording session {} stopped after {} ({} frames)",
                job.session.final_path.display(),
                format_hms(job.elapsed),
                job.frames_written
            ),
        );

        let session_id = job.session.id;
        let muxer = self.muxer.clone();
        let keep = self.settings.keep_temp_files;
        let status = self.status.clone();
        let handle = thread::Builder::new()
            .name("lapse-finalize".into())
            .spawn(move || finalize(&job, muxer.as_ref(), keep, &status));
        match handle {
            Ok(handle) => SessionStop::Finalizing(FinalizeHandle { session_id, handle }),
            Err(e) => {
                log::error!("failed to spawn finalize thread: {}", e);
                SessionStop::NotRecording
            }
        }
    }

    /// Capture callback. Invoked at source frame rate.
    pub fn on_frame(&self, frame: Frame) {
        let admitted = match self.decimator.lock() {
            Ok(mut decimator) => decimator.offer(frame),
            Err(_) => {
                log::error!("decimator lock poisoned; frame dropped");
                return;
            }
        };
        let Some(frame) = admitted else {
            return;
        };

        let analysis = {
            let mut recorder = match self.recorder() {
                Ok(recorder) => recorder,
                Err(e) => {
                    log::error!("{:#}", e);
                    return;
                }
            };
            let (Some(session), Some(events)) = (recorder.session().map(|s| s.id), recorder.events())
            else {
                return;
            };
            if let Err(e) = recorder.write_frame(&frame) {
                log::warn!("frame not written to session {}: {:#}", session, e);
            }
            Analysis {
                session,
                frame: Arc::new(frame),
                events,
            }
        };

        match self.detect_tx.try_send(DetectMsg::Frame(analysis)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::warn!("detection backlog; frame skipped for analysis");
            }
            Err(TrySendError::Disconnected(_)) => {
                log::error!("detection worker is gone");
            }
        }
    }

    /// Audio loudness callback, normalized to `[0, 1]`.
    pub fn on_audio_level(&self, level: f32) {
        if !(level > self.settings.loud_sound_threshold) {
            return;
        }
        let Some(events) = self.events() else {
            return;
        };
        let now = Instant::now();
        let Ok(mut last) = self.last_loud.lock() else {
            return;
        };
        if let Some(prev) = *last {
            if now.saturating_duration_since(prev) < self.settings.loud_sound_cooldown {
                return;
            }
        }
        *last = Some(now);
        if let Err(e) = events.log_now(EventCategory::Sound, "Loud sound detected") {
            log::warn!("{:#}", e);
        }
    }

    /// Wait until every frame handed to the workers so far has been evaluated.
    pub fn drain(&self) {
        let (ack_tx, ack_rx) = bounded(1);
        if self.detect_tx.send(DetectMsg::Barrier(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    fn audit_append(&self, event_type: &str, message: &str) {
        if let Err(e) = self.audit.append(event_type, message) {
            log::error!("audit append {} failed: {:#}", event_type, e);
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        let _ = self.detect_tx.send(DetectMsg::Shutdown);
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("pipeline worker panicked");
            }
        }
    }
}

struct DetectionWorker {
    engine: Arc<DetectionEngine>,
    rx: Receiver<DetectMsg>,
    tx: Sender<EscalateMsg>,
    current: Arc<AtomicU64>,
    detect_threshold: f32,
    general_confidence: f32,
    object_cooldown: Duration,
    last_object_event: HashMap<String, Instant>,
    object_session: u64,
}

impl DetectionWorker {
    fn run(mut self) {
        while let Ok(msg) = self.rx.recv() {
            match msg {
                DetectMsg::Frame(analysis) => {
                    if analysis.session != self.current.load(Ordering::SeqCst) {
                        continue;
                    }
                    match self.engine.detect(&analysis.frame, self.detect_threshold) {
                        Ok(_) if analysis.session != self.current.load(Ordering::SeqCst) => {
                            log::debug!("session {} ended during detection", analysis.session);
                        }
                        Ok(detections) => {
                            self.log_objects(&analysis, &detections);
                            let _ = self.tx.send(EscalateMsg::Frame {
                                analysis,
                                detections,
                            });
                        }
                        Err(e) => {
                            log::warn!("detection failed; escalation skipped for frame: {:#}", e)
                        }
                    }
                }
                DetectMsg::Barrier(ack) => {
                    let _ = self.tx.send(EscalateMsg::Barrier(ack));
                }
                DetectMsg::Shutdown => {
                    let _ = self.tx.send(EscalateMsg::Shutdown);
                    break;
                }
            }
        }
    }

    fn log_objects(&mut self, analysis: &Analysis, detections: &[DetectionResult]) {
        if analysis.session != self.object_session {
            self.object_session = analysis.session;
            self.last_object_event.clear();
        }
        let at = analysis.frame.captured_at;
        for det in detections
            .iter()
            .filter(|d| d.confidence > self.general_confidence)
        {
            let due = self
                .last_object_event
                .get(&det.label)
                .map_or(true, |prev| at.saturating_duration_since(*prev) >= self.object_cooldown);
            if !due {
                continue;
            }
            self.last_object_event.insert(det.label.clone(), at);
            let offset = at.saturating_duration_since(analysis.events.started_at());
            let description = format!(
                "Detected: {} ({}%)",
                det.label,
                (det.confidence * 100.0).round() as u32
            );
            if let Err(e) = analysis.events.log(EventCategory::Object, description, offset) {
                log::warn!("{:#}", e);
            }
        }
    }
}

struct EscalationWorker {
    policy: EscalationPolicy,
    rx: Receiver<EscalateMsg>,
    current: Arc<AtomicU64>,
}

impl EscalationWorker {
    fn run(mut self) {
        let mut session = 0u64;
        while let Ok(msg) = self.rx.recv() {
            match msg {
                EscalateMsg::Begin(id) => {
                    session = id;
                    self.policy.begin_session();
                }
                EscalateMsg::Frame {
                    analysis,
                    detections,
                } => {
                    if analysis.session != session
                        || analysis.session != self.current.load(Ordering::SeqCst)
                    {
                        log::debug!("dropping frame from stale session {}", analysis.session);
                        continue;
                    }
                    let outcome =
                        self.policy
                            .evaluate(&analysis.frame, &detections, Some(&analysis.events));
                    if !matches!(outcome, EscalationOutcome::Idle) {
                        log::debug!("escalation: {:?}", outcome);
                    }
                }
                EscalateMsg::Barrier(ack) => {
                    let _ = ack.send(());
                }
                EscalateMsg::Shutdown => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::InferenceBackend;
    use crate::escalation::{
        EscalationConfig, EvidenceKind, EvidenceSink, EvidenceWrite, MirrorConnector, SyncAction,
    };
    use crate::recording::fakes::{recorder, FakeAudio};
    use chrono::{DateTime, Local};
    use ndarray::{Array3, Array4};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicUsize;

    /// Reports one person at the confidence stored in the first pixel's red channel / 100.
    /// With a gate, each inference waits for one token first.
    #[derive(Default)]
    struct PixelBackend {
        gate: Option<Receiver<()>>,
    }

    impl InferenceBackend for PixelBackend {
        fn name(&self) -> &'static str {
            "pixel"
        }

        fn input_size(&self) -> (u32, u32) {
            (8, 8)
        }

        fn run(&self, input: &Array4<f32>) -> Result<Array3<f32>> {
            if let Some(gate) = &self.gate {
                gate.recv()?;
            }
            let confidence = (input[[0, 0, 0, 0]] * 255.0).round() / 100.0;
            let mut out = Array3::<f32>::zeros((1, 84, 1));
            out[[0, 0, 0]] = 4.0;
            out[[0, 1, 0]] = 4.0;
            out[[0, 2, 0]] = 4.0;
            out[[0, 3, 0]] = 4.0;
            out[[0, 4, 0]] = confidence;
            Ok(out)
        }
    }

    #[derive(Default)]
    struct Counts {
        alerts: AtomicUsize,
        /// Position in run of every alert frame, in write order.
        alert_runs: std::sync::Mutex<Vec<u32>>,
        snapshots: AtomicUsize,
        severs: AtomicUsize,
    }

    struct CountingSink(Arc<Counts>);

    impl EvidenceSink for CountingSink {
        fn persist(&self, _f: &Frame, kind: EvidenceKind, _at: DateTime<Local>) -> Result<EvidenceWrite> {
            match kind {
                EvidenceKind::Alert(n) => {
                    if let Ok(mut runs) = self.0.alert_runs.lock() {
                        runs.push(n);
                    }
                    self.0.alerts.fetch_add(1, Ordering::SeqCst)
                }
                EvidenceKind::Snapshot => self.0.snapshots.fetch_add(1, Ordering::SeqCst),
            };
            Ok(EvidenceWrite {
                local: PathBuf::new(),
                mirror: None,
            })
        }
    }

    struct CountingConnector(Arc<Counts>);

    impl MirrorConnector for CountingConnector {
        fn sever(&self) -> Result<SyncAction> {
            self.0.severs.fetch_add(1, Ordering::SeqCst);
            Ok(SyncAction::Applied)
        }

        fn restore(&self) -> Result<SyncAction> {
            Ok(SyncAction::Applied)
        }
    }

    struct CopyMuxer;

    impl Muxer for CopyMuxer {
        fn merge(&self, video: &Path, _audio: &Path, output: &Path) -> Result<()> {
            std::fs::copy(video, output)?;
            Ok(())
        }
    }

    fn coordinator(root: &Path, counts: Arc<Counts>) -> Coordinator {
        coordinator_with(root, counts, PixelBackend::default())
    }

    fn coordinator_with(root: &Path, counts: Arc<Counts>, backend: PixelBackend) -> Coordinator {
        let audit = Arc::new(AuditLog::open(root.join("audit.jsonl"), None).unwrap());
        let (rec, _) = recorder(root, FakeAudio::default());
        let policy = EscalationPolicy::new(
            EscalationConfig::default(),
            Box::new(CountingSink(counts.clone())),
            Box::new(CountingConnector(counts)),
            audit.clone(),
        );
        Coordinator::new(
            PipelineSettings {
                detection_queue_depth: 1024,
                ..Default::default()
            },
            rec,
            Arc::new(DetectionEngine::with_backend(backend)),
            policy,
            audit,
            Arc::new(CopyMuxer),
        )
        .unwrap()
    }

    fn frame(base: Instant, ms: u64, percent: u8) -> Frame {
        Frame::rgb(vec![percent; 8 * 8 * 3], 8, 8, base + Duration::from_millis(ms)).unwrap()
    }

    #[test]
    fn frames_are_decimated_before_detection() {
        let dir = tempfile::tempdir().unwrap();
        let counts = Arc::new(Counts::default());
        let c = coordinator(dir.path(), counts.clone());
        assert!(matches!(c.start(), StartOutcome::Started(_)));
        let base = Instant::now();
        // 30 fps for 10 s, person at 90%.
        for i in 0..300 {
            c.on_frame(frame(base, i * 33, 90));
        }
        c.drain();
        assert_eq!(counts.alerts.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn idle_coordinator_ignores_frames() {
        let dir = tempfile::tempdir().unwrap();
        let counts = Arc::new(Counts::default());
        let c = coordinator(dir.path(), counts.clone());
        let base = Instant::now();
        for i in 0..5 {
            c.on_frame(frame(base, i * 1000, 90));
        }
        c.drain();
        assert_eq!(counts.alerts.load(Ordering::SeqCst), 0);
        assert!(matches!(c.stop(), SessionStop::NotRecording));
    }

    #[test]
    fn loud_sound_is_rate_limited() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator(dir.path(), Arc::new(Counts::default()));
        c.on_audio_level(0.95);
        c.start();
        c.on_audio_level(0.8);
        c.on_audio_level(0.95);
        c.on_audio_level(0.99);
        let sounds = c
            .events()
            .unwrap()
            .entries()
            .into_iter()
            .filter(|e| e.category == EventCategory::Sound)
            .count();
        assert_eq!(sounds, 1);
    }

    #[test]
    fn object_events_use_general_threshold_and_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator(dir.path(), Arc::new(Counts::default()));
        c.start();
        let base = Instant::now();
        // 45% is above the security threshold but below the general one.
        c.on_frame(frame(base, 0, 45));
        for s in 1..=25u64 {
            c.on_frame(frame(base, s * 1000, 80));
        }
        c.drain();
        let objects: Vec<String> = c
            .events()
            .unwrap()
            .entries()
            .into_iter()
            .filter(|e| e.category == EventCategory::Object)
            .map(|e| e.description)
            .collect();
        // Seconds 1, 11, 21.
        assert_eq!(objects.len(), 3);
        assert_eq!(objects[0], "Detected: person (80%)");
    }

    #[test]
    fn stop_finalizes_and_audits_session() {
        let dir = tempfile::tempdir().unwrap();
        let c = coordinator(dir.path(), Arc::new(Counts::default()));
        c.start();
        let base = Instant::now();
        for s in 0..3 {
            c.on_frame(frame(base, s * 1000, 0));
        }
        c.drain();
        let SessionStop::Finalizing(handle) = c.stop() else {
            panic!("expected finalize");
        };
        let FinalizeOutcome::Merged { output } = handle.wait() else {
            panic!("expected merged output");
        };
        assert!(output.exists());
        let entries = crate::eventlog::load(&crate::eventlog::companion_path(&output));
        let descriptions: Vec<&str> = entries.iter().map(|e| e.description.as_str()).collect();
        assert_eq!(descriptions.len(), 2);
        assert_eq!(descriptions[0], "Recording Started");
        assert!(descriptions[1].starts_with("Recording Stopped. Duration: 00:00:0"));
        assert!(entries.iter().all(|e| e.category == EventCategory::System));
        let types: Vec<String> = crate::audit::load_entries(c.audit().path())
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(types, vec![events::SESSION_STARTED, events::SESSION_STOPPED]);
    }

    #[test]
    fn late_frames_never_reach_the_next_session() {
        let dir = tempfile::tempdir().unwrap();
        let counts = Arc::new(Counts::default());
        let (gate_tx, gate_rx) = unbounded();
        let c = coordinator_with(
            dir.path(),
            counts.clone(),
            PixelBackend {
                gate: Some(gate_rx),
            },
        );

        assert!(matches!(c.start(), StartOutcome::Started(_)));
        let base = Instant::now();
        for s in 0..3 {
            c.on_frame(frame(base, s * 1000, 90));
        }
        // The detector is still holding the first frame when the session ends.
        let SessionStop::Finalizing(handle) = c.stop() else {
            panic!("expected finalize");
        };
        assert!(matches!(c.start(), StartOutcome::Started(_)));
        for _ in 0..3 {
            gate_tx.send(()).unwrap();
        }
        c.drain();
        let first_output = handle.wait().output().map(Path::to_path_buf);

        assert_eq!(counts.alerts.load(Ordering::SeqCst), 0);
        let first = crate::eventlog::load(&crate::eventlog::companion_path(
            first_output.as_deref().unwrap(),
        ));
        assert!(first.iter().all(|e| e.category == EventCategory::System));
        let events = c.events().unwrap().entries();
        assert!(events.iter().all(|e| e.category != EventCategory::Security));

        let base = Instant::now();
        for s in 0..2 {
            gate_tx.send(()).unwrap();
            c.on_frame(frame(base, s * 1000, 90));
        }
        c.drain();
        assert_eq!(*counts.alert_runs.lock().unwrap(), vec![1, 2]);
        let security = c
            .events()
            .unwrap()
            .entries()
            .into_iter()
            .filter(|e| e.category == EventCategory::Security)
            .count();
        assert_eq!(security, 1);
    }
}
