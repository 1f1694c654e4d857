//! Native events in, contract notifications out.
//!
//! Everything the host sees passes through one bounded queue and one worker
//! thread, in order: the initial snapshot of a new session, the native events
//! that follow it, and the reset emitted when the application goes away.

use crate::client::{MediaClient, NativeEvent, NativeTrack, PlayerStatus};
use audiolink_plugin::{AudioSourceCallback, TrackInfo};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Percent of the track played. Unknown (zero) length reads as 0%.
pub fn progress_percent(elapsed_secs: f64, length_secs: u32) -> f64 {
    if length_secs == 0 {
        return 0.0;
    }
    let percent = elapsed_secs / f64::from(length_secs) * 100.0;
    if percent.is_finite() {
        percent
    } else {
        0.0
    }
}

/// Work items for the translator worker.
#[derive(Debug)]
pub enum TranslatorInput {
    Native(NativeEvent),
    /// Status read right after a session opened.
    Snapshot(PlayerStatus),
    /// The application is gone; clear everything the host displays.
    Reset,
    /// Acknowledged once everything queued before it has been delivered.
    Flush(Sender<()>),
    Shutdown,
}

/// Producer side of the translator queue.
#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: Sender<TranslatorInput>,
}

impl EventQueue {
    /// Queue a native event. Position ticks are dropped when the queue is
    /// full (the next tick supersedes them); other events wait for room.
    pub fn push_native(&self, event: NativeEvent) {
        if let NativeEvent::PositionChanged { .. } = event {
            match self.tx.try_send(TranslatorInput::Native(event)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::debug!("translator queue full, dropping position tick");
                }
                Err(TrySendError::Disconnected(_)) => {
                    tracing::debug!("translator stopped, dropping position tick");
                }
            }
            return;
        }
        self.send(TranslatorInput::Native(event));
    }

    pub fn push_snapshot(&self, status: PlayerStatus) {
        self.send(TranslatorInput::Snapshot(status));
    }

    pub fn push_reset(&self) {
        self.send(TranslatorInput::Reset);
    }

    /// Wait until everything queued so far has reached the callback.
    pub fn flush(&self, timeout: Duration) -> bool {
        let (ack_tx, ack_rx) = bounded(1);
        if self.tx.send(TranslatorInput::Flush(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv_timeout(timeout).is_ok()
    }

    fn send(&self, input: TranslatorInput) {
        if self.tx.send(input).is_err() {
            tracing::debug!("translator stopped, dropping event");
        }
    }
}

/// Turns queued inputs into callback invocations.
pub struct Translator {
    client: Arc<dyn MediaClient>,
    callback: Arc<dyn AudioSourceCallback>,
    album_art_size: u32,
    track_length: u32,
}

impl Translator {
    pub fn new(
        client: Arc<dyn MediaClient>,
        callback: Arc<dyn AudioSourceCallback>,
        album_art_size: u32,
    ) -> Self {
        Self {
            client,
            callback,
            album_art_size,
            track_length: 0,
        }
    }

    pub fn handle(&mut self, input: TranslatorInput) {
        match input {
            TranslatorInput::Native(NativeEvent::TrackChanged(track)) => self.track_changed(&track),
            TranslatorInput::Native(NativeEvent::PlayStateChanged { playing }) => {
                self.play_state(playing)
            }
            TranslatorInput::Native(NativeEvent::PositionChanged { position_secs }) => {
                self.progress(position_secs)
            }
            TranslatorInput::Snapshot(status) => self.snapshot(status),
            TranslatorInput::Reset => self.reset(),
            TranslatorInput::Flush(ack) => {
                let _ = ack.send(());
            }
            TranslatorInput::Shutdown => {}
        }
    }

    fn track_changed(&mut self, track: &NativeTrack) {
        self.track_length = track.length_secs;
        let album_art = match self.client.album_art(track, self.album_art_size) {
            Ok(art) => art,
            Err(err) => {
                tracing::warn!(error = %err, title = %track.title, "album art unavailable");
                None
            }
        };
        self.callback.track_info_changed(TrackInfo {
            title: track.title.clone(),
            artist: track.artist.clone(),
            album_art,
        });
    }

    fn play_state(&self, playing: bool) {
        if playing {
            self.callback.track_playing();
        } else {
            self.callback.track_paused();
        }
    }

    fn progress(&self, position_secs: f64) {
        self.callback
            .track_progress_changed(progress_percent(position_secs, self.track_length));
    }

    fn snapshot(&mut self, status: PlayerStatus) {
        let Some(track) = status.track else {
            self.reset();
            return;
        };
        self.track_length = track.length_secs;
        self.progress(status.position_secs);
        self.track_changed(&track);
        self.play_state(status.playing);
    }

    fn reset(&mut self) {
        self.track_length = 0;
        self.callback.track_info_changed(TrackInfo::empty());
        self.callback.track_paused();
        self.callback.track_progress_changed(0.0);
    }
}

/// The translator running on its own thread.
pub struct TranslatorWorker {
    queue: EventQueue,
    join: Option<JoinHandle<()>>,
}

impl TranslatorWorker {
    pub fn spawn(mut translator: Translator, capacity: usize) -> std::io::Result<Self> {
        let (tx, rx) = bounded(capacity.max(1));
        let join = thread::Builder::new()
            .name("event-translator".into())
            .spawn(move || run(&mut translator, rx))?;
        Ok(Self {
            queue: EventQueue { tx },
            join: Some(join),
        })
    }

    pub fn queue(&self) -> EventQueue {
        self.queue.clone()
    }

    /// Deliver what is already queued, then stop the worker.
    pub fn shutdown(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        let _ = self.queue.tx.send(TranslatorInput::Shutdown);
        if join.join().is_err() {
            tracing::error!("event translator panicked");
        }
    }
}

impl Drop for TranslatorWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(translator: &mut Translator, rx: Receiver<TranslatorInput>) {
    for input in rx {
        if let TranslatorInput::Shutdown = input {
            break;
        }
        translator.handle(input);
    }
    tracing::debug!("event translator stopped");
}
