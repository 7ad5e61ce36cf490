use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::ingest::SourceSpec;
use crate::session::{FrameSink, SessionFrame, SessionSummary};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    Finished,
    Error,
}

/// What `/status` reports.
#[derive(Clone, Debug, Default, Serialize)]
pub struct StatusSnapshot {
    pub state: SessionState,
    pub source: Option<SourceSpec>,
    pub backend: String,
    pub frame: Option<SessionFrame>,
    pub summary: Option<SessionSummary>,
    pub error: Option<String>,
}

/// Latest published state plus the latest annotated JPEG.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub status: StatusSnapshot,
    pub jpeg: Option<Vec<u8>>,
}

pub type SharedSnapshot = Arc<Mutex<Snapshot>>;

pub fn shared_snapshot(backend: &str) -> SharedSnapshot {
    Arc::new(Mutex::new(Snapshot {
        status: StatusSnapshot {
            backend: backend.to_string(),
            ..StatusSnapshot::default()
        },
        jpeg: None,
    }))
}

pub(crate) fn update<T>(shared: &SharedSnapshot, f: impl FnOnce(&mut Snapshot) -> T) -> Result<T> {
    let mut guard = shared
        .lock()
        .map_err(|_| anyhow!("snapshot lock poisoned"))?;
    Ok(f(&mut guard))
}

impl Snapshot {
    pub fn mark_running(&mut self, source: &SourceSpec) {
        self.status.state = SessionState::Running;
        self.status.source = Some(source.clone());
        self.status.frame = None;
        self.status.summary = None;
        self.status.error = None;
        self.jpeg = None;
    }

    pub fn mark_finished(&mut self, summary: SessionSummary) {
        self.status.state = SessionState::Finished;
        self.status.summary = Some(summary);
    }

    pub fn mark_error(&mut self, error: String) {
        self.status.state = SessionState::Error;
        self.status.error = Some(error);
    }
}

/// Publishes session frames into the shared snapshot.
pub struct SnapshotSink {
    shared: SharedSnapshot,
}

impl SnapshotSink {
    pub fn new(shared: SharedSnapshot) -> Self {
        Self { shared }
    }
}

impl FrameSink for SnapshotSink {
    fn publish(&mut self, frame: &SessionFrame) -> Result<()> {
        let mut status_frame = frame.clone();
        let jpeg = status_frame.jpeg.take();
        update(&self.shared, |snapshot| {
            snapshot.status.frame = Some(status_frame);
            if jpeg.is_some() {
                snapshot.jpeg = jpeg;
            }
        })
    }
}
