//! The connection state machine.
//!
//! Every tick asks the probe whether the media application is up and moves
//! between three states:
//!
//! | state        | application up          | application down          |
//! |--------------|-------------------------|---------------------------|
//! | NeverStarted | (only left via `start`) | (only left via `start`)   |
//! | Probing      | open session, Connected | nothing                   |
//! | Connected    | nothing                 | close session, reset      |
//!
//! A failed open leaves the supervisor in `Probing`, so the next tick tries
//! again. Once `Connected`, nothing reconnects until the application is seen
//! going away.

use crate::driver::{PluginSession, SessionDriver, SessionError};
use crate::probe::TargetProbe;
use crate::translator::EventQueue;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisionState {
    NeverStarted,
    Probing,
    Connected,
}

struct Inner {
    state: SupervisionState,
    session: Option<PluginSession>,
}

pub struct Supervisor {
    probe: Arc<dyn TargetProbe>,
    driver: SessionDriver,
    events: EventQueue,
    inner: Mutex<Inner>,
}

impl Supervisor {
    pub fn new(probe: Arc<dyn TargetProbe>, driver: SessionDriver, events: EventQueue) -> Self {
        Self {
            probe,
            driver,
            events,
            inner: Mutex::new(Inner {
                state: SupervisionState::NeverStarted,
                session: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SupervisionState {
        self.lock().state
    }

    pub fn has_session(&self) -> bool {
        self.lock().session.is_some()
    }

    /// The activation tick: connect if the application is up, otherwise
    /// publish the cleared state. Does nothing once started.
    pub fn start(&self) {
        let mut inner = self.lock();
        if inner.state != SupervisionState::NeverStarted {
            return;
        }

        inner.state = SupervisionState::Probing;
        if !self.probe.is_target_running() {
            tracing::info!("media application not running, waiting for it");
            self.events.push_reset();
            return;
        }

        match self.driver.open() {
            Ok(session) => {
                inner.session = Some(session);
                inner.state = SupervisionState::Connected;
            }
            Err(err) => {
                tracing::warn!(error = %err, "initial connect failed, will retry");
                self.events.push_reset();
            }
        }
    }

    /// One probe-and-decide step.
    pub fn tick(&self) -> Result<(), SessionError> {
        let mut inner = self.lock();
        match inner.state {
            SupervisionState::NeverStarted => Ok(()),
            SupervisionState::Probing => {
                if !self.probe.is_target_running() {
                    return Ok(());
                }
                let session = self.driver.open()?;
                inner.session = Some(session);
                inner.state = SupervisionState::Connected;
                tracing::info!("connected to media application");
                Ok(())
            }
            SupervisionState::Connected => {
                if self.probe.is_target_running() {
                    return Ok(());
                }
                if let Some(mut session) = inner.session.take() {
                    session.close();
                }
                inner.state = SupervisionState::Probing;
                self.events.push_reset();
                tracing::info!("media application went away");
                Ok(())
            }
        }
    }

    /// Timer entry point. Errors and panics are logged and swallowed so the
    /// next tick still runs.
    pub fn run_tick(&self) {
        match panic::catch_unwind(AssertUnwindSafe(|| self.tick())) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(error = %err, "connect attempt failed, retrying next tick"),
            Err(_) => tracing::error!("supervisor tick panicked"),
        }
    }

    /// Run `f` against the live session, if there is one.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut PluginSession) -> R) -> Option<R> {
        let mut inner = self.lock();
        if inner.state != SupervisionState::Connected {
            return None;
        }
        inner.session.as_mut().map(f)
    }

    /// Close any live session and forget everything. Safe in any state.
    pub fn stop(&self) {
        let mut inner = self.lock();
        if let Some(mut session) = inner.session.take() {
            session.close();
        }
        inner.state = SupervisionState::NeverStarted;
    }
}
