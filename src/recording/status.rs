use crossbeam_channel::Sender;

use crate::recording::RecordingState;

/// Informational notifications for a presentation layer. Nothing flows back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusUpdate {
    State(RecordingState),
    Message(String),
    /// Finalization progress, 0..=100.
    Progress(u8),
}

#[derive(Clone, Default)]
pub struct StatusNotifier {
    tx: Option<Sender<StatusUpdate>>,
}

impl StatusNotifier {
    pub fn new(tx: Sender<StatusUpdate>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn state(&self, state: RecordingState) {
        log::debug!("recording state -> {}", state);
        self.send(StatusUpdate::State(state));
    }

    pub fn message(&self, message: impl Into<String>) {
        let message = message.into();
        log::info!("{}", message);
        self.send(StatusUpdate::Message(message));
    }

    pub fn progress(&self, percent: u8) {
        self.send(StatusUpdate::Progress(percent.min(100)));
    }

    fn send(&self, update: StatusUpdate) {
        // A listener that went away is not an error.
        if let Some(tx) = &self.tx {
            let _ = tx.send(update);
        }
    }
}
