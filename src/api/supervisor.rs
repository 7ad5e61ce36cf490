use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use anyhow::Result;

use super::state::{update, SharedSnapshot, SnapshotSink};
use crate::detect::SharedBackend;
use crate::ingest::SourceSpec;
use crate::session::{Session, SessionCommand, SessionSettings};

const IDLE_POLL: Duration = Duration::from_millis(100);

/// Runs sessions on the calling thread as commands arrive.
///
/// A `Start` while a session is running replaces it; `Stop` ends it between
/// frames. Failed sessions are reported in the snapshot and the supervisor goes
/// back to waiting.
pub struct Supervisor {
    settings: SessionSettings,
    detector: SharedBackend,
    snapshot: SharedSnapshot,
    commands: Receiver<SessionCommand>,
}

impl Supervisor {
    pub fn new(
        settings: SessionSettings,
        detector: SharedBackend,
        snapshot: SharedSnapshot,
        commands: Receiver<SessionCommand>,
    ) -> Self {
        Self {
            settings,
            detector,
            snapshot,
            commands,
        }
    }

    /// Serve commands until `shutdown` is set or every sender is gone.
    pub fn run(&self, shutdown: &AtomicBool) -> Result<()> {
        let mut pending: Option<SourceSpec> = None;
        loop {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            let command = match pending.take() {
                Some(spec) => SessionCommand::Start(spec),
                None => match self.commands.recv_timeout(IDLE_POLL) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
            };
            match command {
                SessionCommand::Start(spec) => pending = self.run_session(spec, shutdown)?,
                SessionCommand::Stop => log::debug!("supervisor: stop with no running session"),
            }
        }
        Ok(())
    }

    /// Run one session; returns the source of a `Start` that interrupted it.
    fn run_session(
        &self,
        spec: SourceSpec,
        shutdown: &AtomicBool,
    ) -> Result<Option<SourceSpec>> {
        update(&self.snapshot, |s| s.mark_running(&spec))?;

        let started = Session::new(spec.clone(), &self.settings, self.detector.clone());
        let mut session = match started {
            Ok(session) => session,
            Err(err) => {
                log::error!("supervisor: failed to start {}: {:#}", spec, err);
                update(&self.snapshot, |s| s.mark_error(format!("{:#}", err)))?;
                return Ok(None);
            }
        };

        let next = RefCell::new(None);
        let stop = || {
            if shutdown.load(Ordering::SeqCst) {
                return true;
            }
            match self.commands.try_recv() {
                Ok(SessionCommand::Stop) => true,
                Ok(SessionCommand::Start(spec)) => {
                    next.replace(Some(spec));
                    true
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => false,
            }
        };

        let mut sink = SnapshotSink::new(self.snapshot.clone());
        match session.run(&mut sink, &stop) {
            Ok(summary) => update(&self.snapshot, |s| s.mark_finished(summary))?,
            Err(err) => {
                log::error!("supervisor: session on {} failed: {:#}", spec, err);
                update(&self.snapshot, |s| s.mark_error(format!("{:#}", err)))?;
            }
        }
        Ok(next.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::state::{shared_snapshot, SessionState};
    use crate::detect::CpuBackend;
    use crate::ingest::SourceSettings;
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};

    fn settings() -> SessionSettings {
        SessionSettings {
            source: SourceSettings {
                width: 160,
                height: 120,
                max_frames: Some(4),
                ..SourceSettings::default()
            },
            pace: false,
            ..SessionSettings::default()
        }
    }

    #[test]
    fn runs_session_and_reports_summary() -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let snapshot = shared_snapshot("cpu");
        let supervisor = Supervisor::new(
            settings(),
            Arc::new(Mutex::new(CpuBackend::new())),
            snapshot.clone(),
            rx,
        );
        tx.send(SessionCommand::Start(SourceSpec::parse("stub://scene")?))?;
        drop(tx);
        supervisor.run(&AtomicBool::new(false))?;

        let guard = snapshot.lock().expect("snapshot");
        assert_eq!(guard.status.state, SessionState::Finished);
        assert_eq!(guard.status.summary.as_ref().map(|s| s.frames), Some(4));
        assert_eq!(guard.status.frame.as_ref().map(|f| f.index), Some(3));
        assert!(guard.jpeg.is_some());
        Ok(())
    }

    #[test]
    fn start_failure_is_published_as_error() -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let snapshot = shared_snapshot("cpu");
        let supervisor = Supervisor::new(
            settings(),
            Arc::new(Mutex::new(CpuBackend::new())),
            snapshot.clone(),
            rx,
        );
        tx.send(SessionCommand::Start(SourceSpec::parse("stub://nowhere")?))?;
        drop(tx);
        supervisor.run(&AtomicBool::new(false))?;

        let guard = snapshot.lock().expect("snapshot");
        assert_eq!(guard.status.state, SessionState::Error);
        assert!(guard
            .status
            .error
            .as_deref()
            .is_some_and(|e| e.contains("nowhere")));
        Ok(())
    }
}
