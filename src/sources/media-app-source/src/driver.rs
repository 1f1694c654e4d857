//! Opening and closing sessions against the media application.

use crate::client::{
    ClientError, EventHandler, MediaClient, MediaConnection, NativeEvent, NativeEventKind,
    PlayerStatus, SubscriptionId, TransportCommand,
};
use crate::translator::EventQueue;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to connect to the media application: {0}")]
    Connect(#[source] ClientError),
    #[error("failed to read player status: {0}")]
    Status(#[source] ClientError),
    #[error("failed to subscribe to {kind:?} events: {source}")]
    Subscribe {
        kind: NativeEventKind,
        #[source]
        source: ClientError,
    },
    #[error("{command} command failed: {source}")]
    Command {
        command: TransportCommand,
        #[source]
        source: ClientError,
    },
    #[error("session is closed")]
    Closed,
}

enum GateState {
    /// Session still opening; events wait until the snapshot is queued.
    Pending(Vec<NativeEvent>),
    Open,
    Closed,
}

/// Sits between a session's native handlers and the translator queue.
///
/// The application may call a handler at any time, including while the
/// session is still being opened and after it has been closed. Nothing goes
/// out before the snapshot, and nothing goes out once the session is closed.
#[derive(Clone)]
struct EventGate {
    state: Arc<Mutex<GateState>>,
    events: EventQueue,
}

impl EventGate {
    fn new(events: EventQueue) -> Self {
        Self {
            state: Arc::new(Mutex::new(GateState::Pending(Vec::new()))),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handler(&self) -> EventHandler {
        let gate = self.clone();
        Arc::new(move |event| gate.deliver(event))
    }

    fn deliver(&self, event: NativeEvent) {
        let mut state = self.lock();
        match &mut *state {
            GateState::Pending(held) => held.push(event),
            // pushed under the lock so close() cannot slip in between
            GateState::Open => self.events.push_native(event),
            GateState::Closed => {
                tracing::debug!(kind = ?event.kind(), "session closed, dropping native event");
            }
        }
    }

    /// Queue the snapshot, then whatever arrived while opening.
    fn open(&self, status: PlayerStatus) {
        let mut state = self.lock();
        let held = match &mut *state {
            GateState::Pending(held) => std::mem::take(held),
            GateState::Open | GateState::Closed => return,
        };
        self.events.push_snapshot(status);
        for event in held {
            self.events.push_native(event);
        }
        *state = GateState::Open;
    }

    fn close(&self) {
        *self.lock() = GateState::Closed;
    }
}

/// Builds sessions whose native events feed the translator queue.
#[derive(Clone)]
pub struct SessionDriver {
    client: Arc<dyn MediaClient>,
    events: EventQueue,
}

impl SessionDriver {
    pub fn new(client: Arc<dyn MediaClient>, events: EventQueue) -> Self {
        Self { client, events }
    }

    /// Connect, read the current status and subscribe to every event kind.
    ///
    /// The status snapshot is queued only once the whole session is up, ahead
    /// of any event delivered meanwhile. On failure nothing is queued and
    /// anything acquired is released again.
    pub fn open(&self) -> Result<PluginSession, SessionError> {
        let connection = self.client.connect().map_err(SessionError::Connect)?;
        let mut session = PluginSession {
            connection,
            subscriptions: Vec::new(),
            gate: EventGate::new(self.events.clone()),
            closed: false,
        };

        let status = match session.connection.status() {
            Ok(status) => status,
            Err(err) => {
                session.close();
                return Err(SessionError::Status(err));
            }
        };

        for kind in NativeEventKind::ALL {
            let handler = session.gate.handler();
            match session.connection.subscribe(kind, handler) {
                Ok(id) => session.subscriptions.push(id),
                Err(source) => {
                    session.close();
                    return Err(SessionError::Subscribe { kind, source });
                }
            }
        }

        session.gate.open(status);
        tracing::info!(
            subscriptions = session.subscriptions.len(),
            "media application session opened"
        );
        Ok(session)
    }
}

/// A connection plus the subscriptions registered on it.
pub struct PluginSession {
    connection: Box<dyn MediaConnection>,
    subscriptions: Vec<SubscriptionId>,
    gate: EventGate,
    closed: bool,
}

impl PluginSession {
    pub fn command(&mut self, command: TransportCommand) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        self.connection
            .send(command)
            .map_err(|source| SessionError::Command { command, source })
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop forwarding events, unsubscribe everything and release the handle.
    /// Failures are logged and skipped; calling this again does nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.gate.close();
        for id in self.subscriptions.drain(..) {
            if let Err(err) = self.connection.unsubscribe(id) {
                tracing::warn!(error = %err, subscription = id.0, "unsubscribe failed");
            }
        }
        if let Err(err) = self.connection.release() {
            tracing::warn!(error = %err, "releasing connection failed");
        }
        tracing::debug!("media application session closed");
    }
}

impl Drop for PluginSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientResult, NativeTrack};
    use crate::simulated::SimulatedClient;
    use crate::translator::{Translator, TranslatorWorker};
    use audiolink_plugin::{RecordedEvent, RecordingCallback, TrackInfo};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn library() -> Vec<NativeTrack> {
        vec![NativeTrack {
            title: "Song".into(),
            artist: "Artist".into(),
            album: None,
            length_secs: 100,
        }]
    }

    fn worker(
        client: Arc<dyn MediaClient>,
        callback: &Arc<RecordingCallback>,
    ) -> TranslatorWorker {
        TranslatorWorker::spawn(Translator::new(client, callback.clone(), 64), 16).expect("spawn")
    }

    #[test]
    fn open_publishes_snapshot_then_events() {
        let sim = SimulatedClient::new(library());
        sim.set_position(25.0);
        let client: Arc<dyn MediaClient> = Arc::new(sim.clone());
        let callback = Arc::new(RecordingCallback::new());
        let worker = worker(client.clone(), &callback);
        let driver = SessionDriver::new(client, worker.queue());

        let mut session = driver.open().expect("open");
        assert_eq!(sim.active_subscriptions(), 3);
        session.command(TransportCommand::Play).expect("play");
        assert!(worker.queue().flush(Duration::from_secs(2)));

        let events = callback.events();
        assert_eq!(events[0], RecordedEvent::Progress(25.0));
        assert!(matches!(events[1], RecordedEvent::TrackInfo(_)));
        assert_eq!(events[2], RecordedEvent::Paused);
        assert_eq!(events[3], RecordedEvent::Playing);

        session.close();
        session.close();
        assert!(session.is_closed());
        assert_eq!(sim.active_subscriptions(), 0);
        assert_eq!(sim.release_count(), 1);
        assert!(matches!(
            session.command(TransportCommand::Pause),
            Err(SessionError::Closed)
        ));
    }

    #[test]
    fn dropping_a_session_releases_it() {
        let sim = SimulatedClient::new(library());
        let client: Arc<dyn MediaClient> = Arc::new(sim.clone());
        let callback = Arc::new(RecordingCallback::new());
        let worker = worker(client.clone(), &callback);
        let session = SessionDriver::new(client, worker.queue()).open().unwrap();
        drop(session);
        assert_eq!(sim.release_count(), 1);
        assert_eq!(sim.active_subscriptions(), 0);
    }

    /// What a [`ScriptedConnection`] saw, shared with the test.
    #[derive(Default)]
    struct ConnectionLog {
        subscribed: AtomicUsize,
        unsubscribed: AtomicUsize,
        released: AtomicBool,
        handlers: Mutex<Vec<EventHandler>>,
    }

    /// Connection whose Nth subscribe can fail and which can raise an event
    /// from inside `subscribe`, the way a busy application might.
    struct ScriptedConnection {
        fail_at: Option<usize>,
        eager_event: Option<NativeEvent>,
        log: Arc<ConnectionLog>,
    }

    impl MediaConnection for ScriptedConnection {
        fn status(&mut self) -> ClientResult<PlayerStatus> {
            Ok(PlayerStatus {
                track: Some(library().remove(0)),
                position_secs: 50.0,
                playing: false,
            })
        }

        fn subscribe(
            &mut self,
            kind: NativeEventKind,
            handler: EventHandler,
        ) -> ClientResult<SubscriptionId> {
            let n = self.log.subscribed.fetch_add(1, Ordering::SeqCst);
            if self.fail_at == Some(n) {
                return Err(ClientError::Rejected {
                    status: 403,
                    message: "subscription refused".into(),
                });
            }
            if let Some(event) = self.eager_event.clone() {
                if event.kind() == kind {
                    handler(event);
                }
            }
            self.log.handlers.lock().unwrap().push(handler);
            Ok(SubscriptionId(n as u64))
        }

        fn unsubscribe(&mut self, _id: SubscriptionId) -> ClientResult<()> {
            self.log.unsubscribed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn send(&mut self, _command: TransportCommand) -> ClientResult<()> {
            Ok(())
        }

        fn release(&mut self) -> ClientResult<()> {
            self.log.released.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct ScriptedClient {
        fail_at: Option<usize>,
        eager_event: Option<NativeEvent>,
        log: Arc<ConnectionLog>,
    }

    impl MediaClient for ScriptedClient {
        fn is_running(&self) -> ClientResult<bool> {
            Ok(true)
        }

        fn is_helper_running(&self) -> ClientResult<bool> {
            Ok(true)
        }

        fn connect(&self) -> ClientResult<Box<dyn MediaConnection>> {
            Ok(Box::new(ScriptedConnection {
                fail_at: self.fail_at,
                eager_event: self.eager_event.clone(),
                log: self.log.clone(),
            }))
        }

        fn album_art(&self, _track: &NativeTrack, _size: u32) -> ClientResult<Option<Vec<u8>>> {
            Ok(None)
        }
    }

    fn song_snapshot() -> Vec<RecordedEvent> {
        vec![
            RecordedEvent::Progress(50.0),
            RecordedEvent::TrackInfo(TrackInfo {
                title: "Song".into(),
                artist: "Artist".into(),
                album_art: None,
            }),
            RecordedEvent::Paused,
        ]
    }

    #[test]
    fn partial_subscription_is_rolled_back_without_a_snapshot() {
        let scripted = Arc::new(ScriptedClient {
            fail_at: Some(2),
            ..ScriptedClient::default()
        });
        let callback = Arc::new(RecordingCallback::new());
        let worker = worker(scripted.clone(), &callback);

        let err = SessionDriver::new(scripted.clone(), worker.queue())
            .open()
            .err()
            .expect("open should fail");
        assert!(matches!(
            err,
            SessionError::Subscribe {
                kind: NativeEventKind::PositionChanged,
                ..
            }
        ));
        assert_eq!(scripted.log.unsubscribed.load(Ordering::SeqCst), 2);
        assert!(scripted.log.released.load(Ordering::SeqCst));

        assert!(worker.queue().flush(Duration::from_secs(2)));
        assert!(callback.events().is_empty());
    }

    #[test]
    fn events_raised_while_opening_follow_the_snapshot() {
        let scripted = Arc::new(ScriptedClient {
            eager_event: Some(NativeEvent::PlayStateChanged { playing: true }),
            ..ScriptedClient::default()
        });
        let callback = Arc::new(RecordingCallback::new());
        let worker = worker(scripted.clone(), &callback);

        let _session = SessionDriver::new(scripted, worker.queue())
            .open()
            .expect("open");
        assert!(worker.queue().flush(Duration::from_secs(2)));

        let mut expected = song_snapshot();
        expected.push(RecordedEvent::Playing);
        assert_eq!(callback.events(), expected);
    }

    #[test]
    fn events_after_close_are_dropped() {
        let scripted = Arc::new(ScriptedClient::default());
        let callback = Arc::new(RecordingCallback::new());
        let worker = worker(scripted.clone(), &callback);

        let mut session = SessionDriver::new(scripted.clone(), worker.queue())
            .open()
            .expect("open");
        let handler = scripted.log.handlers.lock().unwrap()[0].clone();
        handler(NativeEvent::PlayStateChanged { playing: true });
        assert!(worker.queue().flush(Duration::from_secs(2)));
        assert_eq!(callback.take().len(), 4);

        session.close();
        // an application thread that was mid-delivery when the session closed
        handler(NativeEvent::TrackChanged(NativeTrack {
            title: "Late".into(),
            artist: "Artist".into(),
            album: None,
            length_secs: 10,
        }));
        assert!(worker.queue().flush(Duration::from_secs(2)));
        assert!(callback.events().is_empty());
    }

    #[test]
    fn connect_failure_is_reported() {
        let sim = SimulatedClient::new(library());
        sim.fail_next_connects(1);
        let client: Arc<dyn MediaClient> = Arc::new(sim.clone());
        let callback = Arc::new(RecordingCallback::new());
        let worker = worker(client.clone(), &callback);
        assert!(matches!(
            SessionDriver::new(client, worker.queue()).open(),
            Err(SessionError::Connect(ClientError::Rejected { .. }))
        ));
        assert_eq!(sim.release_count(), 0);
    }
}
