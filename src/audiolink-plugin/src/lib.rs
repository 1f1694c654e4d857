//! Out-of-process audio source support for Audiolink.
//!
//! This crate provides:
//! - The [`AudioSource`] contract and its [`AudioSourceCallback`] notification channel
//! - A JSON-based protocol for carrying both across a process boundary
//! - A plugin-side [`serve`] loop that exposes an `AudioSource` on stdin/stdout
//! - An exec-based host that spawns plugin processes, and [`ExecAudioSource`],
//!   which implements `AudioSource` on top of it
//! - A shared contract suite ([`run_audio_source_contract`]) for source crates
//!
//! # Plugin Protocol
//!
//! The host writes [`PluginRequest`] messages (one per line) to the plugin's
//! stdin. The plugin writes [`PluginMessage`] lines to stdout: either the
//! response to a request, or a notification it raised on its own.
//!
//! ```text
//! -> {"id":1,"method":{"type":"Initialize"}}
//! <- {"kind":"Response","id":1,"result":{"status":"Initialized","id":"media-app",...}}
//! -> {"id":2,"method":{"type":"Activate"}}
//! <- {"kind":"Notification","event":{"type":"TrackInfoChanged","title":"","artist":"","album_art":null}}
//! <- {"kind":"Notification","event":{"type":"TrackPaused"}}
//! <- {"kind":"Notification","event":{"type":"TrackProgressChanged","percent":0.0}}
//! <- {"kind":"Response","id":2,"result":{"status":"Done"}}
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use audiolink_plugin::{AudioSource, ExecAudioSource, PluginConfig, RecordingCallback};
//! use std::sync::Arc;
//!
//! let callback = Arc::new(RecordingCallback::new());
//! let source = ExecAudioSource::new(config, callback.clone())?;
//! source.activate()?;
//! ```

mod adapter;
pub mod contract;
mod host;
pub mod protocol;
mod server;
mod source;

pub use adapter::ExecAudioSource;
pub use contract::{
    run_audio_source_contract, AudioSourceContractError, AudioSourceContractExpectations,
    RecordedEvent, RecordingCallback,
};
pub use host::{ExecPluginHost, PluginConfig, PluginHostError};
pub use protocol::{
    PluginError, PluginErrorKind, PluginInfo, PluginMessage, PluginMethod, PluginNotification,
    PluginRequest, PluginResponse, PluginResult, PROTOCOL_VERSION,
};
pub use server::{serve, MessageWriter, NotificationForwarder, ServeError};
pub use source::{AudioSource, AudioSourceCallback, SourceError, SourceResult, TrackInfo};
