//! The audio source contract shared by hosts and plugins.
//!
//! A plugin implements [`AudioSource`] and reports playback through an
//! [`AudioSourceCallback`] supplied by whoever hosts it. The host side proxy
//! ([`crate::ExecAudioSource`]) implements the very same trait, so host code is
//! written against one interface whether the source runs in-process or not.

use thiserror::Error;

/// Immutable snapshot of the track currently loaded in the target application.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackInfo {
    pub title: String,
    pub artist: String,
    /// Encoded image bytes (whatever format the application hands out).
    pub album_art: Option<Vec<u8>>,
}

impl TrackInfo {
    /// The cleared state: no title, no artist, no artwork.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.artist.is_empty() && self.album_art.is_none()
    }
}

/// Notifications a source pushes to its host.
///
/// Implementations are invoked from plugin worker threads and must not block
/// for long.
pub trait AudioSourceCallback: Send + Sync {
    fn track_info_changed(&self, info: TrackInfo);

    fn track_playing(&self);

    fn track_paused(&self);

    /// Progress through the current track in percent. Nominally `[0, 100]` but
    /// clock skew in the application can push it past either end; clamp before
    /// displaying.
    fn track_progress_changed(&self, percent: f64);
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("audio source unavailable: {message}")]
    Unavailable { message: String },
    #[error("plugin transport error: {message}")]
    Transport { message: String },
    #[error("operation not supported: {operation}")]
    NotSupported { operation: String },
    #[error("{message}")]
    Other { message: String },
}

pub type SourceResult<T> = Result<T, SourceError>;

/// Remote operation set every audio source honors.
///
/// `activate`/`deactivate` are idempotent. Transport controls issued while the
/// source has nothing to control are no-ops, not errors.
pub trait AudioSource: Send + Sync {
    /// Liveness ping. Returns immediately and has no side effects.
    fn is_alive(&self) -> SourceResult<()> {
        Ok(())
    }

    /// Stable identifier, constant for the lifetime of the source.
    fn name(&self) -> &str;

    fn activate(&self) -> SourceResult<()>;

    fn deactivate(&self) -> SourceResult<()>;

    fn play_track(&self) -> SourceResult<()>;

    fn pause_track(&self) -> SourceResult<()>;

    fn previous_track(&self) -> SourceResult<()>;

    fn next_track(&self) -> SourceResult<()>;
}
