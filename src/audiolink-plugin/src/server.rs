//! Plugin-side serve loop: reads requests from the host and answers them.

use crate::protocol::{
    PluginError, PluginErrorKind, PluginInfo, PluginMessage, PluginMethod, PluginNotification,
    PluginRequest, PluginResponse, PluginResult,
};
use crate::source::{AudioSource, AudioSourceCallback, TrackInfo};
use crossbeam_channel::{unbounded, Receiver};
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to read from host: {0}")]
    ReadError(std::io::Error),
    #[error("failed to write to host: {0}")]
    WriteError(std::io::Error),
    #[error("failed to encode message: {0}")]
    Encode(serde_json::Error),
    #[error("failed to start request dispatcher: {0}")]
    Spawn(std::io::Error),
    #[error("request dispatcher exited unexpectedly")]
    DispatcherPanicked,
}

/// Line-oriented writer shared by everything that talks back to the host.
#[derive(Clone)]
pub struct MessageWriter {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl MessageWriter {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn send(&self, message: &PluginMessage) -> Result<(), ServeError> {
        let json = serde_json::to_string(message).map_err(ServeError::Encode)?;
        let mut out = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(out, "{}", json).map_err(ServeError::WriteError)?;
        out.flush().map_err(ServeError::WriteError)
    }

    fn respond(&self, id: u64, result: PluginResult) -> Result<(), ServeError> {
        self.send(&PluginMessage::Response(PluginResponse { id, result }))
    }
}

impl std::fmt::Debug for MessageWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageWriter").finish_non_exhaustive()
    }
}

/// Callback that turns source notifications into wire notifications.
#[derive(Debug, Clone)]
pub struct NotificationForwarder {
    writer: MessageWriter,
}

impl NotificationForwarder {
    pub fn new(writer: MessageWriter) -> Self {
        Self { writer }
    }

    fn forward(&self, event: PluginNotification) {
        if let Err(err) = self.writer.send(&PluginMessage::Notification { event }) {
            tracing::warn!(error = %err, "failed to forward notification to host");
        }
    }
}

impl AudioSourceCallback for NotificationForwarder {
    fn track_info_changed(&self, info: TrackInfo) {
        self.forward(info.into());
    }

    fn track_playing(&self) {
        self.forward(PluginNotification::TrackPlaying);
    }

    fn track_paused(&self) {
        self.forward(PluginNotification::TrackPaused);
    }

    fn track_progress_changed(&self, percent: f64) {
        self.forward(PluginNotification::TrackProgressChanged { percent });
    }
}

/// Serve `source` until the host sends `Shutdown` or closes the input.
///
/// The calling thread only reads and answers pings, the handshake and name
/// queries; every other request runs in order on a dispatcher thread so a slow
/// operation never delays a liveness ping. The source is deactivated before
/// this returns.
pub fn serve<S, R>(
    source: Arc<S>,
    info: PluginInfo,
    input: R,
    writer: MessageWriter,
) -> Result<(), ServeError>
where
    S: AudioSource + ?Sized + 'static,
    R: BufRead,
{
    let (tx, rx) = unbounded::<PluginRequest>();
    let dispatcher = {
        let source = Arc::clone(&source);
        let writer = writer.clone();
        thread::Builder::new()
            .name("plugin-dispatch".into())
            .spawn(move || dispatch_loop(source.as_ref(), rx, &writer))
            .map_err(ServeError::Spawn)?
    };

    let read_result = read_loop(source.as_ref(), &info, input, &writer, |request| {
        // the dispatcher only stops once this sender is dropped
        let _ = tx.send(request);
    });
    drop(tx);

    let dispatch_result = dispatcher
        .join()
        .map_err(|_| ServeError::DispatcherPanicked)?;

    if let Err(err) = source.deactivate() {
        tracing::warn!(error = %err, "deactivate during serve shutdown failed");
    }

    read_result?;
    dispatch_result
}

fn read_loop<S, R>(
    source: &S,
    info: &PluginInfo,
    input: R,
    writer: &MessageWriter,
    mut enqueue: impl FnMut(PluginRequest),
) -> Result<(), ServeError>
where
    S: AudioSource + ?Sized,
    R: BufRead,
{
    for line in input.lines() {
        let line = line.map_err(ServeError::ReadError)?;
        if line.trim().is_empty() {
            continue;
        }

        let request: PluginRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed request");
                writer.respond(
                    0,
                    PluginResult::Error(PluginError {
                        kind: PluginErrorKind::Malformed,
                        message: err.to_string(),
                    }),
                )?;
                continue;
            }
        };

        match request.method {
            PluginMethod::IsAlive => writer.respond(request.id, PluginResult::Alive)?,
            PluginMethod::Initialize => {
                writer.respond(request.id, PluginResult::Initialized(info.clone()))?
            }
            PluginMethod::GetName => writer.respond(
                request.id,
                PluginResult::Name {
                    name: source.name().to_string(),
                },
            )?,
            PluginMethod::Shutdown => {
                enqueue(request);
                break;
            }
            _ => enqueue(request),
        }
    }
    Ok(())
}

fn dispatch_loop<S>(
    source: &S,
    requests: Receiver<PluginRequest>,
    writer: &MessageWriter,
) -> Result<(), ServeError>
where
    S: AudioSource + ?Sized,
{
    for request in requests {
        tracing::debug!(id = request.id, method = ?request.method, "dispatching request");
        let result = handle(source, &request.method);
        writer.respond(request.id, result)?;
        if request.method == PluginMethod::Shutdown {
            break;
        }
    }
    Ok(())
}

fn handle<S>(source: &S, method: &PluginMethod) -> PluginResult
where
    S: AudioSource + ?Sized,
{
    let outcome = match method {
        PluginMethod::Activate => source.activate(),
        PluginMethod::Deactivate => source.deactivate(),
        PluginMethod::PlayTrack => source.play_track(),
        PluginMethod::PauseTrack => source.pause_track(),
        PluginMethod::PreviousTrack => source.previous_track(),
        PluginMethod::NextTrack => source.next_track(),
        PluginMethod::Shutdown => {
            return match source.deactivate() {
                Ok(()) => PluginResult::ShutdownAck,
                Err(err) => PluginResult::Error(err.into()),
            };
        }
        PluginMethod::IsAlive => source.is_alive(),
        PluginMethod::Initialize | PluginMethod::GetName => {
            return PluginResult::Error(PluginError {
                kind: PluginErrorKind::Internal,
                message: format!("{method:?} is answered by the reader"),
            });
        }
    };

    match outcome {
        Ok(()) => PluginResult::Done,
        Err(err) => PluginResult::Error(err.into()),
    }
}
