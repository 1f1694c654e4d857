//! A deterministic stand-in for the media application.
//!
//! Used by the plugin executable in headless/demo setups and by tests. The
//! "application" keeps a small library, a play head and a set of subscribers;
//! time only moves when [`SimulatedClient::advance`] is called, either by a
//! test or by the background clock from [`SimulatedClient::start_clock`].

use crate::client::{
    ClientError, ClientResult, EventHandler, MediaClient, MediaConnection, NativeEvent,
    NativeEventKind, NativeTrack, PlayerStatus, SubscriptionId, TransportCommand,
};
use audiolink_core::SimulationConfig;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Tracks used when the configuration does not provide a library.
fn default_library() -> Vec<NativeTrack> {
    vec![
        NativeTrack {
            title: "Signal Path".into(),
            artist: "The Oscillators".into(),
            album: Some("Bench Tests".into()),
            length_secs: 184,
        },
        NativeTrack {
            title: "Ground Loop".into(),
            artist: "The Oscillators".into(),
            album: Some("Bench Tests".into()),
            length_secs: 211,
        },
        NativeTrack {
            title: "Idle Hum".into(),
            artist: "Low Pass".into(),
            album: None,
            length_secs: 0,
        },
    ]
}

#[derive(Default)]
struct SimState {
    running: bool,
    helper_running: bool,
    fail_presence: bool,
    pending_connect_failures: usize,
    fail_subscriptions: bool,
    library: Vec<NativeTrack>,
    current: usize,
    position_secs: f64,
    playing: bool,
    next_subscription: u64,
    handlers: BTreeMap<u64, (NativeEventKind, EventHandler)>,
    connects: usize,
    releases: usize,
    commands: HashMap<TransportCommand, usize>,
}

impl SimState {
    fn current_track(&self) -> Option<&NativeTrack> {
        self.library.get(self.current)
    }

    fn status(&self) -> PlayerStatus {
        PlayerStatus {
            track: self.current_track().cloned(),
            position_secs: self.position_secs,
            playing: self.playing,
        }
    }

    fn select(&mut self, index: usize) -> Option<NativeEvent> {
        if self.library.is_empty() {
            return None;
        }
        self.current = index % self.library.len();
        self.position_secs = 0.0;
        self.current_track().cloned().map(NativeEvent::TrackChanged)
    }

    /// Subscribers for `events`, paired up so they can be invoked unlocked.
    fn deliveries(&self, events: Vec<NativeEvent>) -> Vec<(EventHandler, NativeEvent)> {
        let mut out = Vec::new();
        for event in events {
            for (kind, handler) in self.handlers.values() {
                if *kind == event.kind() {
                    out.push((Arc::clone(handler), event.clone()));
                }
            }
        }
        out
    }
}

/// Simulated media application.
#[derive(Clone)]
pub struct SimulatedClient {
    state: Arc<Mutex<SimState>>,
    presence_file: Option<PathBuf>,
}

impl std::fmt::Debug for SimulatedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SimulatedClient")
            .field("running", &state.running)
            .field("tracks", &state.library.len())
            .field("playing", &state.playing)
            .field("subscriptions", &state.handlers.len())
            .finish_non_exhaustive()
    }
}

impl SimulatedClient {
    /// A running application, paused at the start of the first track.
    pub fn new(library: Vec<NativeTrack>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                running: true,
                helper_running: true,
                library,
                ..SimState::default()
            })),
            presence_file: None,
        }
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        let library = if config.library.is_empty() {
            default_library()
        } else {
            config
                .library
                .iter()
                .map(|t| NativeTrack {
                    title: t.title.clone(),
                    artist: t.artist.clone(),
                    album: t.album.clone(),
                    length_secs: t.length_secs,
                })
                .collect()
        };
        let mut client = Self::new(library);
        client.presence_file = config.presence_file.clone();
        client.lock().playing = config.autoplay;
        client
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_running(&self, running: bool) {
        self.lock().running = running;
    }

    pub fn set_helper_running(&self, running: bool) {
        self.lock().helper_running = running;
    }

    /// Make presence queries fail instead of answering.
    pub fn fail_presence_queries(&self, fail: bool) {
        self.lock().fail_presence = fail;
    }

    /// Reject the next `count` connection attempts.
    pub fn fail_next_connects(&self, count: usize) {
        self.lock().pending_connect_failures = count;
    }

    /// Refuse every event subscription while set.
    pub fn fail_subscriptions(&self, fail: bool) {
        self.lock().fail_subscriptions = fail;
    }

    pub fn set_position(&self, position_secs: f64) {
        self.lock().position_secs = position_secs;
    }

    pub fn set_playing(&self, playing: bool) {
        self.lock().playing = playing;
    }

    /// Raise `event` to every current subscriber of its kind.
    pub fn emit(&self, event: NativeEvent) {
        let deliveries = self.lock().deliveries(vec![event]);
        deliver(deliveries);
    }

    /// Move the play head forward, rolling over to the next track at the end.
    pub fn advance(&self, secs: f64) {
        let deliveries = {
            let mut state = self.lock();
            if !state.playing {
                return;
            }
            let length = state.current_track().map_or(0, |t| t.length_secs);
            state.position_secs += secs;
            let mut events = Vec::new();
            if length > 0 && state.position_secs >= f64::from(length) {
                let next = state.current + 1;
                events.extend(state.select(next));
            }
            events.push(NativeEvent::PositionChanged {
                position_secs: state.position_secs,
            });
            state.deliveries(events)
        };
        deliver(deliveries);
    }

    /// Advance by `interval` every `interval` until the handle is dropped.
    pub fn start_clock(&self, interval: Duration) -> std::io::Result<ClockHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let client = self.clone();
        let stop_flag = Arc::clone(&stop);
        let join = thread::Builder::new()
            .name("simulated-clock".into())
            .spawn(move || {
                while !stop_flag.load(Ordering::SeqCst) {
                    thread::sleep(interval);
                    let running = client.lock().running;
                    if running {
                        client.advance(interval.as_secs_f64());
                    }
                }
            })?;
        Ok(ClockHandle {
            stop,
            join: Some(join),
        })
    }

    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    pub fn release_count(&self) -> usize {
        self.lock().releases
    }

    pub fn command_count(&self, command: TransportCommand) -> usize {
        self.lock().commands.get(&command).copied().unwrap_or(0)
    }

    pub fn total_commands(&self) -> usize {
        self.lock().commands.values().sum()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.lock().handlers.len()
    }
}

fn deliver(deliveries: Vec<(EventHandler, NativeEvent)>) {
    for (handler, event) in deliveries {
        handler(event);
    }
}

impl MediaClient for SimulatedClient {
    fn is_running(&self) -> ClientResult<bool> {
        let state = self.lock();
        if state.fail_presence {
            return Err(ClientError::Other {
                message: "presence query failed".into(),
            });
        }
        match &self.presence_file {
            Some(path) => Ok(path.exists()),
            None => Ok(state.running),
        }
    }

    fn is_helper_running(&self) -> ClientResult<bool> {
        let state = self.lock();
        if state.fail_presence {
            return Err(ClientError::Other {
                message: "presence query failed".into(),
            });
        }
        Ok(state.helper_running)
    }

    fn connect(&self) -> ClientResult<Box<dyn MediaConnection>> {
        let mut state = self.lock();
        state.connects += 1;
        if state.pending_connect_failures > 0 {
            state.pending_connect_failures -= 1;
            return Err(ClientError::Rejected {
                status: 403,
                message: "application is still starting".into(),
            });
        }
        Ok(Box::new(SimulatedConnection {
            state: Arc::clone(&self.state),
            subscriptions: Vec::new(),
            released: false,
        }))
    }

    fn album_art(&self, track: &NativeTrack, size: u32) -> ClientResult<Option<Vec<u8>>> {
        if track.title.is_empty() {
            return Ok(None);
        }
        Ok(Some(format!("art:{}:{size}", track.title).into_bytes()))
    }
}

struct SimulatedConnection {
    state: Arc<Mutex<SimState>>,
    subscriptions: Vec<u64>,
    released: bool,
}

impl SimulatedConnection {
    fn lock(&self) -> ClientResult<MutexGuard<'_, SimState>> {
        if self.released {
            return Err(ClientError::Closed);
        }
        Ok(self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl MediaConnection for SimulatedConnection {
    fn status(&mut self) -> ClientResult<PlayerStatus> {
        Ok(self.lock()?.status())
    }

    fn subscribe(
        &mut self,
        kind: NativeEventKind,
        handler: EventHandler,
    ) -> ClientResult<SubscriptionId> {
        let id = {
            let mut state = self.lock()?;
            if state.fail_subscriptions {
                return Err(ClientError::Rejected {
                    status: 403,
                    message: "subscription refused".into(),
                });
            }
            state.next_subscription += 1;
            let id = state.next_subscription;
            state.handlers.insert(id, (kind, handler));
            id
        };
        self.subscriptions.push(id);
        Ok(SubscriptionId(id))
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> ClientResult<()> {
        let removed = self.lock()?.handlers.remove(&id.0);
        self.subscriptions.retain(|s| *s != id.0);
        match removed {
            Some(_) => Ok(()),
            None => Err(ClientError::UnknownSubscription(id)),
        }
    }

    fn send(&mut self, command: TransportCommand) -> ClientResult<()> {
        let deliveries = {
            let mut state = self.lock()?;
            *state.commands.entry(command).or_insert(0) += 1;
            let mut events = Vec::new();
            match command {
                TransportCommand::Play if !state.playing => {
                    state.playing = true;
                    events.push(NativeEvent::PlayStateChanged { playing: true });
                }
                TransportCommand::Pause if state.playing => {
                    state.playing = false;
                    events.push(NativeEvent::PlayStateChanged { playing: false });
                }
                TransportCommand::Next => {
                    let next = state.current + 1;
                    events.extend(state.select(next));
                }
                TransportCommand::Previous => {
                    let len = state.library.len().max(1);
                    let previous = (state.current + len - 1) % len;
                    events.extend(state.select(previous));
                }
                TransportCommand::Play | TransportCommand::Pause => {}
            }
            state.deliveries(events)
        };
        deliver(deliveries);
        Ok(())
    }

    fn release(&mut self) -> ClientResult<()> {
        let ids = std::mem::take(&mut self.subscriptions);
        {
            let mut state = self.lock()?;
            for id in ids {
                state.handlers.remove(&id);
            }
            state.releases += 1;
        }
        self.released = true;
        Ok(())
    }
}

/// Stops the simulated clock when dropped.
pub struct ClockHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl Drop for ClockHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
