//! Host-side proxy that implements [`AudioSource`] for an external plugin process.

use crate::host::{ExecPluginHost, PluginConfig, PluginHostError};
use crate::protocol::{PluginMethod, PluginResult};
use crate::source::{AudioSource, AudioSourceCallback, SourceError, SourceResult};
use std::sync::Arc;

/// An audio source backed by an external plugin process.
///
/// Every trait call becomes one request to the plugin; notifications the plugin
/// emits are delivered to the callback passed to [`ExecAudioSource::new`].
pub struct ExecAudioSource {
    host: ExecPluginHost,
    id: String,
    name: String,
}

impl ExecAudioSource {
    /// Launch the plugin and fetch its name.
    pub fn new(
        config: PluginConfig,
        callback: Arc<dyn AudioSourceCallback>,
    ) -> Result<Self, PluginHostError> {
        let host = ExecPluginHost::new(config);
        let info = host.start(callback)?;

        let name = match host.send_request(PluginMethod::GetName)? {
            PluginResult::Name { name } => name,
            _ => return Err(PluginHostError::UnexpectedResponse),
        };

        Ok(Self {
            host,
            id: info.id,
            name,
        })
    }

    /// Plugin identifier reported at handshake.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stop the underlying plugin process.
    pub fn stop(&self) -> Result<(), PluginHostError> {
        self.host.stop()
    }

    /// Check if the plugin process is running.
    pub fn is_running(&self) -> bool {
        self.host.is_running()
    }

    fn call(&self, method: PluginMethod) -> SourceResult<()> {
        match self.host.send_request(method).map_err(Self::map_host_error)? {
            PluginResult::Done | PluginResult::Alive => Ok(()),
            PluginResult::Error(err) => Err(err.into()),
            _ => Err(SourceError::Other {
                message: "unexpected response type".to_string(),
            }),
        }
    }

    fn map_host_error(err: PluginHostError) -> SourceError {
        match err {
            PluginHostError::PluginError(err) => err.into(),
            other => SourceError::Transport {
                message: other.to_string(),
            },
        }
    }
}

impl AudioSource for ExecAudioSource {
    fn is_alive(&self) -> SourceResult<()> {
        self.call(PluginMethod::IsAlive)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn activate(&self) -> SourceResult<()> {
        self.call(PluginMethod::Activate)
    }

    fn deactivate(&self) -> SourceResult<()> {
        self.call(PluginMethod::Deactivate)
    }

    fn play_track(&self) -> SourceResult<()> {
        self.call(PluginMethod::PlayTrack)
    }

    fn pause_track(&self) -> SourceResult<()> {
        self.call(PluginMethod::PauseTrack)
    }

    fn previous_track(&self) -> SourceResult<()> {
        self.call(PluginMethod::PreviousTrack)
    }

    fn next_track(&self) -> SourceResult<()> {
        self.call(PluginMethod::NextTrack)
    }
}
