use crate::source::{AudioSource, AudioSourceCallback, TrackInfo};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

/// One notification as observed by a [`RecordingCallback`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedEvent {
    TrackInfo(TrackInfo),
    Playing,
    Paused,
    Progress(f64),
}

impl RecordedEvent {
    /// The notifications a source emits when it has nothing to report.
    pub fn reset_triple() -> Vec<RecordedEvent> {
        vec![
            RecordedEvent::TrackInfo(TrackInfo::empty()),
            RecordedEvent::Paused,
            RecordedEvent::Progress(0.0),
        ]
    }
}

/// Callback that records every notification, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingCallback {
    events: Mutex<Vec<RecordedEvent>>,
    changed: Condvar,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Return and forget everything recorded so far.
    pub fn take(&self) -> Vec<RecordedEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Block until at least `count` events are recorded or `timeout` passes.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        while events.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            events = self
                .changed
                .wait_timeout(events, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    fn record(&self, event: RecordedEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        self.changed.notify_all();
    }
}

impl AudioSourceCallback for RecordingCallback {
    fn track_info_changed(&self, info: TrackInfo) {
        self.record(RecordedEvent::TrackInfo(info));
    }

    fn track_playing(&self) {
        self.record(RecordedEvent::Playing);
    }

    fn track_paused(&self) {
        self.record(RecordedEvent::Paused);
    }

    fn track_progress_changed(&self, percent: f64) {
        self.record(RecordedEvent::Progress(percent));
    }
}

/// Expectations supplied by a source implementation to run the shared contract suite.
#[derive(Debug, Clone)]
pub struct AudioSourceContractExpectations {
    /// The name the source must report for its whole lifetime.
    pub name: String,
}

/// Errors surfaced by the audio source contract test harness.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AudioSourceContractError {
    #[error("name mismatch: expected {expected:?}, got {actual:?}")]
    NameMismatch { expected: String, actual: String },
    #[error("name changed during {stage}: was {before:?}, now {after:?}")]
    NameChanged {
        stage: &'static str,
        before: String,
        after: String,
    },
    #[error("liveness ping failed during {stage}: {message}")]
    NotAlive { stage: &'static str, message: String },
    #[error("{operation} failed during {stage}: {message}")]
    OperationFailed {
        operation: &'static str,
        stage: &'static str,
        message: String,
    },
}

/// Run the shared contract suite against a source implementation.
///
/// Exercises the guarantees every source owes its host: a constant name, a ping
/// that always answers, idempotent activate/deactivate in any order, and
/// transport controls that are harmless when there is nothing to control.
pub fn run_audio_source_contract<S: AudioSource + ?Sized>(
    source: &S,
    expectations: &AudioSourceContractExpectations,
) -> Result<(), AudioSourceContractError> {
    let name = source.name().to_string();
    if name != expectations.name {
        return Err(AudioSourceContractError::NameMismatch {
            expected: expectations.name.clone(),
            actual: name,
        });
    }

    ping(source, "startup")?;

    step(source, "deactivate", "before activation", |s| s.deactivate())?;
    transport_round(source, "before activation")?;

    step(source, "activate", "first activation", |s| s.activate())?;
    step(source, "activate", "repeated activation", |s| s.activate())?;
    ping(source, "activation")?;
    check_name(source, &name, "activation")?;
    transport_round(source, "activation")?;

    step(source, "deactivate", "deactivation", |s| s.deactivate())?;
    step(source, "deactivate", "repeated deactivation", |s| {
        s.deactivate()
    })?;
    ping(source, "deactivation")?;
    transport_round(source, "after deactivation")?;

    // a source must be re-activatable after a full cycle
    step(source, "activate", "reactivation", |s| s.activate())?;
    step(source, "deactivate", "final deactivation", |s| s.deactivate())?;

    check_name(source, &name, "shutdown")
}

fn ping<S: AudioSource + ?Sized>(
    source: &S,
    stage: &'static str,
) -> Result<(), AudioSourceContractError> {
    source
        .is_alive()
        .map_err(|e| AudioSourceContractError::NotAlive {
            stage,
            message: e.to_string(),
        })
}

fn check_name<S: AudioSource + ?Sized>(
    source: &S,
    before: &str,
    stage: &'static str,
) -> Result<(), AudioSourceContractError> {
    let after = source.name();
    if after != before {
        return Err(AudioSourceContractError::NameChanged {
            stage,
            before: before.to_string(),
            after: after.to_string(),
        });
    }
    Ok(())
}

fn step<S: AudioSource + ?Sized>(
    source: &S,
    operation: &'static str,
    stage: &'static str,
    op: impl FnOnce(&S) -> crate::SourceResult<()>,
) -> Result<(), AudioSourceContractError> {
    op(source).map_err(|e| AudioSourceContractError::OperationFailed {
        operation,
        stage,
        message: e.to_string(),
    })
}

fn transport_round<S: AudioSource + ?Sized>(
    source: &S,
    stage: &'static str,
) -> Result<(), AudioSourceContractError> {
    step(source, "play_track", stage, |s| s.play_track())?;
    step(source, "pause_track", stage, |s| s.pause_track())?;
    step(source, "previous_track", stage, |s| s.previous_track())?;
    step(source, "next_track", stage, |s| s.next_track())
}
