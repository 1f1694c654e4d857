use crate::client::{MediaClient, TransportCommand};
use crate::driver::SessionDriver;
use crate::probe::{ClientProbe, ProcessProbe, TargetProbe};
use crate::supervisor::{SupervisionState, Supervisor};
use crate::timer::ProbeTimer;
use crate::translator::{Translator, TranslatorWorker};
use audiolink_core::{MediaAppConfig, ProbeKind, ValidationError};
use audiolink_plugin::{AudioSource, AudioSourceCallback, SourceError, SourceResult};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// How long `activate` waits for its notifications to reach the callback.
const ACTIVATE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables for a [`MediaAppSource`].
#[derive(Debug, Clone)]
pub struct MediaAppSettings {
    pub name: String,
    pub probe_interval: Duration,
    pub album_art_size: u32,
    pub event_queue_capacity: usize,
}

impl Default for MediaAppSettings {
    fn default() -> Self {
        Self::from(&MediaAppConfig::default())
    }
}

impl From<&MediaAppConfig> for MediaAppSettings {
    fn from(config: &MediaAppConfig) -> Self {
        Self {
            name: config.name.clone(),
            probe_interval: config.probe_interval(),
            album_art_size: config.album_art_size,
            event_queue_capacity: config.event_queue_capacity,
        }
    }
}

/// Everything that exists only between `activate` and `deactivate`.
struct Activation {
    supervisor: Arc<Supervisor>,
    timer: ProbeTimer,
    translator: TranslatorWorker,
}

/// Audio source backed by the local media application.
///
/// Activation starts a supervisor that connects whenever the application is
/// up and clears the host's display whenever it goes away. Transport controls
/// reach the application only while a session is live; otherwise they are
/// accepted and ignored.
pub struct MediaAppSource {
    settings: MediaAppSettings,
    client: Arc<dyn MediaClient>,
    probe: Arc<dyn TargetProbe>,
    callback: Arc<dyn AudioSourceCallback>,
    activation: Mutex<Option<Activation>>,
}

impl MediaAppSource {
    pub fn new(
        settings: MediaAppSettings,
        client: Arc<dyn MediaClient>,
        probe: Arc<dyn TargetProbe>,
        callback: Arc<dyn AudioSourceCallback>,
    ) -> Self {
        Self {
            settings,
            client,
            probe,
            callback,
            activation: Mutex::new(None),
        }
    }

    /// Build a source from the `[media_app]` config section.
    pub fn from_config(
        config: &MediaAppConfig,
        client: Arc<dyn MediaClient>,
        callback: Arc<dyn AudioSourceCallback>,
    ) -> Result<Self, ValidationError> {
        let probe: Arc<dyn TargetProbe> = match config.probe.kind {
            ProbeKind::Client => Arc::new(ClientProbe::new(client.clone())),
            ProbeKind::Process => {
                let app = config
                    .probe
                    .app_process
                    .clone()
                    .ok_or(ValidationError::MissingAppProcess)?;
                let helper = config
                    .probe
                    .helper_process
                    .clone()
                    .ok_or(ValidationError::MissingHelperProcess)?;
                Arc::new(ProcessProbe::new(app, helper))
            }
        };
        Ok(Self::new(config.into(), client, probe, callback))
    }

    fn activation(&self) -> MutexGuard<'_, Option<Activation>> {
        self.activation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current supervision state; `NeverStarted` while inactive.
    pub fn state(&self) -> SupervisionState {
        self.activation()
            .as_ref()
            .map_or(SupervisionState::NeverStarted, |a| a.supervisor.state())
    }

    fn supervisor(&self) -> Option<Arc<Supervisor>> {
        self.activation()
            .as_ref()
            .map(|a| Arc::clone(&a.supervisor))
    }

    fn transport(&self, command: TransportCommand) -> SourceResult<()> {
        let Some(supervisor) = self.supervisor() else {
            tracing::debug!(%command, "ignoring command, source is not active");
            return Ok(());
        };
        match supervisor.with_session(|session| session.command(command)) {
            None => tracing::debug!(%command, "ignoring command, not connected"),
            Some(Ok(())) => tracing::debug!(%command, "command sent"),
            Some(Err(err)) => tracing::warn!(error = %err, %command, "command failed"),
        }
        Ok(())
    }
}

fn spawn_error(what: &str, err: std::io::Error) -> SourceError {
    SourceError::Other {
        message: format!("failed to start {what}: {err}"),
    }
}

impl AudioSource for MediaAppSource {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn activate(&self) -> SourceResult<()> {
        let mut slot = self.activation();
        if slot.is_some() {
            tracing::debug!("already active");
            return Ok(());
        }

        let translator = TranslatorWorker::spawn(
            Translator::new(
                self.client.clone(),
                self.callback.clone(),
                self.settings.album_art_size,
            ),
            self.settings.event_queue_capacity,
        )
        .map_err(|e| spawn_error("event translator", e))?;
        let events = translator.queue();
        let supervisor = Arc::new(Supervisor::new(
            self.probe.clone(),
            SessionDriver::new(self.client.clone(), events.clone()),
            events.clone(),
        ));

        supervisor.start();
        if !events.flush(ACTIVATE_FLUSH_TIMEOUT) {
            tracing::warn!("activation notifications were not delivered in time");
        }

        let ticking = Arc::clone(&supervisor);
        let timer = match ProbeTimer::arm(self.settings.probe_interval, move || ticking.run_tick())
        {
            Ok(timer) => timer,
            Err(err) => {
                supervisor.stop();
                return Err(spawn_error("probe timer", err));
            }
        };

        tracing::info!(
            source = %self.settings.name,
            state = ?supervisor.state(),
            "activated"
        );
        *slot = Some(Activation {
            supervisor,
            timer,
            translator,
        });
        Ok(())
    }

    fn deactivate(&self) -> SourceResult<()> {
        let Some(mut activation) = self.activation().take() else {
            return Ok(());
        };
        // the timer goes first so no tick can reopen the session
        activation.timer.disarm();
        activation.supervisor.stop();
        activation.translator.shutdown();
        tracing::info!(source = %self.settings.name, "deactivated");
        Ok(())
    }

    fn play_track(&self) -> SourceResult<()> {
        self.transport(TransportCommand::Play)
    }

    fn pause_track(&self) -> SourceResult<()> {
        self.transport(TransportCommand::Pause)
    }

    fn previous_track(&self) -> SourceResult<()> {
        self.transport(TransportCommand::Previous)
    }

    fn next_track(&self) -> SourceResult<()> {
        self.transport(TransportCommand::Next)
    }
}

impl Drop for MediaAppSource {
    fn drop(&mut self) {
        let _ = self.deactivate();
    }
}
