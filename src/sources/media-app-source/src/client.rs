//! Interface to the local media application's control surface.
//!
//! The application itself is opaque: all this crate needs is a way to ask
//! whether it (and its helper process) is running, open a connection, read the
//! player status, subscribe to its native events and issue transport commands.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A track as the media application describes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeTrack {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    /// Zero when the application does not know the length.
    pub length_secs: u32,
}

/// Point-in-time player status.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStatus {
    pub track: Option<NativeTrack>,
    pub position_secs: f64,
    pub playing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NativeEventKind {
    TrackChanged,
    PlayStateChanged,
    PositionChanged,
}

impl NativeEventKind {
    pub const ALL: [NativeEventKind; 3] = [
        NativeEventKind::TrackChanged,
        NativeEventKind::PlayStateChanged,
        NativeEventKind::PositionChanged,
    ];
}

/// Event raised by the media application on its own threads.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeEvent {
    TrackChanged(NativeTrack),
    PlayStateChanged { playing: bool },
    PositionChanged { position_secs: f64 },
}

impl NativeEvent {
    pub fn kind(&self) -> NativeEventKind {
        match self {
            NativeEvent::TrackChanged(_) => NativeEventKind::TrackChanged,
            NativeEvent::PlayStateChanged { .. } => NativeEventKind::PlayStateChanged,
            NativeEvent::PositionChanged { .. } => NativeEventKind::PositionChanged,
        }
    }
}

/// Handle for one native event subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

pub type EventHandler = Arc<dyn Fn(NativeEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportCommand {
    Play,
    Pause,
    Previous,
    Next,
}

impl fmt::Display for TransportCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportCommand::Play => "play",
            TransportCommand::Pause => "pause",
            TransportCommand::Previous => "previous",
            TransportCommand::Next => "next",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("media application is not running")]
    NotRunning,
    /// The local API refused the call, typically while the application is
    /// still starting up.
    #[error("media application rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("connection already released")]
    Closed,
    #[error("unknown subscription {0:?}")]
    UnknownSubscription(SubscriptionId),
    #[error("{message}")]
    Other { message: String },
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Entry point into the media application's local API.
pub trait MediaClient: Send + Sync {
    fn is_running(&self) -> ClientResult<bool>;

    /// The companion process the application needs for remote control.
    fn is_helper_running(&self) -> ClientResult<bool>;

    /// Open a fresh connection handle.
    fn connect(&self) -> ClientResult<Box<dyn MediaConnection>>;

    /// Album art for `track`, scaled to roughly `size` pixels square.
    fn album_art(&self, track: &NativeTrack, size: u32) -> ClientResult<Option<Vec<u8>>>;
}

/// A live connection to the media application.
pub trait MediaConnection: Send {
    fn status(&mut self) -> ClientResult<PlayerStatus>;

    /// Register `handler` for events of `kind`. The application may invoke it
    /// from any thread until the subscription is removed.
    fn subscribe(
        &mut self,
        kind: NativeEventKind,
        handler: EventHandler,
    ) -> ClientResult<SubscriptionId>;

    fn unsubscribe(&mut self, id: SubscriptionId) -> ClientResult<()>;

    fn send(&mut self, command: TransportCommand) -> ClientResult<()>;

    /// Release the handle. Later calls fail with [`ClientError::Closed`].
    fn release(&mut self) -> ClientResult<()>;
}
