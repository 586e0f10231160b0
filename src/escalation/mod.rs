//! Security escalation policy.
//!
//! Each decimated frame is classified, in priority order, as an alert frame (person
//! present, budget not exhausted), a periodic snapshot (no person, snapshot due) or
//! nothing. Alert frames are persisted as evidence; the frame that exhausts the budget
//! severs the mirror connector once per session. The policy is single-owner state:
//! callers must feed frames in arrival order from one thread.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;

use crate::audit::{events, AuditLog};
use crate::detect::{DetectionResult, PERSON_LABEL, SECURITY_CONFIDENCE_THRESHOLD};
use crate::eventlog::{EventCategory, EventLog};
use crate::frame::Frame;

mod evidence;
mod mirror;

pub use evidence::{evidence_relative_path, EvidenceKind, EvidenceSink, EvidenceStore, EvidenceWrite};
pub use mirror::{
    parse_argv, CommandConnector, ConfiguredMirror, MirrorConnector, MirrorLocator, SyncAction,
};

pub const DEFAULT_ALERT_BUDGET: u32 = 100;
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone, Copy, Debug)]
pub struct EscalationConfig {
    /// Person detections strictly above this confidence raise an alert.
    pub person_threshold: f32,
    /// Alert frames persisted per run before lockdown.
    pub alert_budget: u32,
    pub snapshot_interval: Duration,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            person_threshold: SECURITY_CONFIDENCE_THRESHOLD,
            alert_budget: DEFAULT_ALERT_BUDGET,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EscalationState {
    pub consecutive_alert_frames: u32,
    pub last_snapshot: Option<Instant>,
    pub lockdown_triggered: bool,
    /// Evidence frames successfully written in the current run.
    secured_frames: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EscalationOutcome {
    /// No person and no snapshot due.
    Idle,
    Alert {
        /// Position of this frame in the run, 1-based.
        frame_in_run: u32,
        evidence: Option<EvidenceWrite>,
        lockdown_triggered: bool,
    },
    /// A person is present but the budget is spent or lockdown already fired.
    Suppressed,
    Snapshot { evidence: Option<EvidenceWrite> },
}

pub struct EscalationPolicy {
    config: EscalationConfig,
    state: EscalationState,
    evidence: Box<dyn EvidenceSink>,
    connector: Box<dyn MirrorConnector>,
    audit: Arc<AuditLog>,
}

impl EscalationPolicy {
    pub fn new(
        config: EscalationConfig,
        evidence: Box<dyn EvidenceSink>,
        connector: Box<dyn MirrorConnector>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            config,
            state: EscalationState::default(),
            evidence,
            connector,
            audit,
        }
    }

    pub fn state(&self) -> &EscalationState {
        &self.state
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    /// Reset for a new recording session. Restores the mirror if the previous
    /// session locked it down.
    pub fn begin_session(&mut self) {
        if self.state.lockdown_triggered {
            match self.connector.restore() {
                Ok(SyncAction::Applied) => {
                    self.audit_append(events::MIRROR_RESTORED, "Mirror sync restored for new session")
                }
                Ok(SyncAction::NotConfigured) => {
                    log::warn!("no mirror restore command configured; sync left as is")
                }
                Err(e) => log::error!("failed to restore mirror sync: {:#}", e),
            }
        }
        self.state = EscalationState::default();
    }

    /// Classify one decimated frame and carry out the resulting action.
    ///
    /// Never fails: write and audit errors are logged and the frame is still counted.
    pub fn evaluate(
        &mut self,
        frame: &Frame,
        detections: &[DetectionResult],
        events: Option<&EventLog>,
    ) -> EscalationOutcome {
        let person = detections
            .iter()
            .filter(|d| d.is_label(PERSON_LABEL) && d.confidence > self.config.person_threshold)
            .map(|d| d.confidence)
            .fold(None, |best: Option<f32>, c| Some(best.map_or(c, |b| b.max(c))));

        match person {
            Some(confidence) => {
                if self.state.lockdown_triggered
                    || self.state.consecutive_alert_frames >= self.config.alert_budget
                {
                    return EscalationOutcome::Suppressed;
                }
                self.alert(frame, confidence, events)
            }
            None => {
                if self.state.consecutive_alert_frames > 0 {
                    log::info!(
                        "alert run ended after {} frames",
                        self.state.consecutive_alert_frames
                    );
                }
                self.state.consecutive_alert_frames = 0;
                self.state.secured_frames = 0;
                self.maybe_snapshot(frame)
            }
        }
    }

    fn alert(&mut self, frame: &Frame, confidence: f32, events: Option<&EventLog>) -> EscalationOutcome {
        self.state.consecutive_alert_frames += 1;
        let frame_in_run = self.state.consecutive_alert_frames;

        if frame_in_run == 1 {
            let pct = (confidence * 100.0).round() as u32;
            log::warn!("person detected ({}%); preserving evidence", pct);
            if let Some(events) = events {
                let offset = frame.captured_at.saturating_duration_since(events.started_at());
                if let Err(e) = events.log(
                    EventCategory::Security,
                    format!("Person detected ({}%). Evidence capture started", pct),
                    offset,
                ) {
                    log::warn!("{:#}", e);
                }
            }
            self.audit_append(
                events::PERSON_DETECTED,
                &format!("Person detected with confidence {:.2}", confidence),
            );
        }

        let evidence = match self
            .evidence
            .persist(frame, EvidenceKind::Alert(frame_in_run), Local::now())
        {
            Ok(written) => {
                self.state.secured_frames += 1;
                Some(written)
            }
            Err(e) => {
                log::error!("alert frame {} not saved: {:#}", frame_in_run, e);
                None
            }
        };

        let mut lockdown_triggered = false;
        if frame_in_run >= self.config.alert_budget && !self.state.lockdown_triggered {
            self.lockdown();
            lockdown_triggered = true;
        }

        EscalationOutcome::Alert {
            frame_in_run,
            evidence,
            lockdown_triggered,
        }
    }

    fn lockdown(&mut self) {
        // Irreversible for this session even if severing fails.
        self.state.lockdown_triggered = true;
        let secured = self.state.secured_frames;
        let message = match self.connector.sever() {
            Ok(SyncAction::Applied) => format!(
                "Lockdown engaged: {} evidence frames secured; mirror sync severed",
                secured
            ),
            Ok(SyncAction::NotConfigured) => format!(
                "Lockdown engaged: {} evidence frames secured; no mirror connector configured, sync NOT severed",
                secured
            ),
            Err(e) => {
                log::error!("failed to sever mirror sync: {:#}", e);
                format!(
                    "Lockdown engaged: {} evidence frames secured; mirror sever failed: {:#}",
                    secured, e
                )
            }
        };
        log::warn!("{}", message);
        self.audit_append(events::LOCKDOWN, &message);
    }

    fn maybe_snapshot(&mut self, frame: &Frame) -> EscalationOutcome {
        let due = match self.state.last_snapshot {
            None => true,
            Some(last) => {
                frame.captured_at.saturating_duration_since(last) >= self.config.snapshot_interval
            }
        };
        if !due {
            return EscalationOutcome::Idle;
        }
        self.state.last_snapshot = Some(frame.captured_at);
        let evidence = match self.evidence.persist(frame, EvidenceKind::Snapshot, Local::now()) {
            Ok(written) => Some(written),
            Err(e) => {
                log::error!("periodic snapshot not saved: {:#}", e);
                None
            }
        };
        EscalationOutcome::Snapshot { evidence }
    }

    fn audit_append(&self, event_type: &str, message: &str) {
        if let Err(e) = self.audit.append(event_type, message) {
            log::error!("audit append {} failed: {:#}", event_type, e);
        }
    }
}
