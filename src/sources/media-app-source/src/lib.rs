//! Audio source plugin for a local media application.
//!
//! The plugin watches for the application, keeps at most one live session to
//! it, and turns the application's own events into [`AudioSourceCallback`]
//! notifications:
//!
//! ```text
//! TargetProbe -> Supervisor -> SessionDriver -> native events
//!     -> EventQueue -> Translator -> AudioSourceCallback
//! ```
//!
//! [`MediaAppSource`] ties the pieces together behind the [`AudioSource`]
//! trait. The application itself is reached through the [`MediaClient`]
//! trait; [`SimulatedClient`] is the in-tree implementation used by the
//! plugin executable and by tests.
//!
//! [`AudioSource`]: audiolink_plugin::AudioSource
//! [`AudioSourceCallback`]: audiolink_plugin::AudioSourceCallback

pub mod client;
mod driver;
pub mod probe;
pub mod simulated;
mod source;
mod supervisor;
mod timer;
mod translator;

pub use client::{
    ClientError, ClientResult, EventHandler, MediaClient, MediaConnection, NativeEvent,
    NativeEventKind, NativeTrack, PlayerStatus, SubscriptionId, TransportCommand,
};
pub use driver::{PluginSession, SessionDriver, SessionError};
pub use probe::{ClientProbe, ProcessProbe, TargetProbe};
pub use simulated::{ClockHandle, SimulatedClient};
pub use source::{MediaAppSettings, MediaAppSource};
pub use supervisor::{SupervisionState, Supervisor};
pub use timer::ProbeTimer;
pub use translator::{progress_percent, EventQueue, Translator, TranslatorInput, TranslatorWorker};

/// Identifier reported in the plugin handshake.
pub const PLUGIN_ID: &str = "media-app";
