//! Exec-based plugin host that communicates with external processes via JSON over stdio.

use crate::protocol::{
    PluginError, PluginInfo, PluginMessage, PluginMethod, PluginRequest, PluginResponse,
    PluginResult, PROTOCOL_VERSION,
};
use crate::source::AudioSourceCallback;
use audiolink_core::PluginEntry;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors from plugin host operations.
#[derive(Debug, Error)]
pub enum PluginHostError {
    #[error("failed to spawn plugin process: {0}")]
    SpawnFailed(std::io::Error),
    #[error("plugin process has no stdin")]
    NoStdin,
    #[error("plugin process has no stdout")]
    NoStdout,
    #[error("failed to write to plugin: {0}")]
    WriteError(std::io::Error),
    #[error("failed to parse plugin message: {0}")]
    ParseError(serde_json::Error),
    #[error("plugin returned error: {}", .0.message)]
    PluginError(PluginError),
    #[error("protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolMismatch { expected: u32, actual: u32 },
    #[error("unexpected response type for method")]
    UnexpectedResponse,
    #[error("request/response ID mismatch: sent {sent}, received {received}")]
    IdMismatch { sent: u64, received: u64 },
    #[error("plugin did not answer within {0:?}")]
    Timeout(Duration),
    #[error("plugin process terminated unexpectedly")]
    ProcessTerminated,
}

/// Configuration for an external plugin.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// Path to the plugin executable.
    pub executable: PathBuf,
    /// Arguments to pass to the plugin.
    pub args: Vec<String>,
    /// Working directory for the plugin process.
    pub working_dir: Option<PathBuf>,
    /// Environment variables to set for the plugin.
    pub env: Vec<(String, String)>,
    /// How long to wait for each response.
    pub request_timeout: Duration,
}

impl From<&PluginEntry> for PluginConfig {
    fn from(entry: &PluginEntry) -> Self {
        Self {
            executable: entry.executable.clone(),
            args: entry.args.clone(),
            working_dir: entry.working_dir.clone(),
            env: entry
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            request_timeout: entry.request_timeout(),
        }
    }
}

/// Host for an external plugin process.
///
/// A reader thread owns the plugin's stdout: responses are handed to the
/// request in flight, notifications go straight to the host callback. Requests
/// are serialized, so at most one is outstanding at a time.
pub struct ExecPluginHost {
    config: PluginConfig,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    responses: Mutex<Option<Receiver<PluginResponse>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    request_id: AtomicU64,
    info: Mutex<Option<PluginInfo>>,
}

impl ExecPluginHost {
    /// Create a new plugin host with the given configuration.
    pub fn new(config: PluginConfig) -> Self {
        Self {
            config,
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            responses: Mutex::new(None),
            reader: Mutex::new(None),
            request_id: AtomicU64::new(1),
            info: Mutex::new(None),
        }
    }

    /// Start the plugin process, wire notifications to `callback`, and run the handshake.
    pub fn start(
        &self,
        callback: Arc<dyn AudioSourceCallback>,
    ) -> Result<PluginInfo, PluginHostError> {
        let mut cmd = Command::new(&self.config.executable);
        cmd.args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        if let Some(ref dir) = self.config.working_dir {
            cmd.current_dir(dir);
        }

        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(PluginHostError::SpawnFailed)?;

        let stdin = child.stdin.take().ok_or(PluginHostError::NoStdin)?;
        let stdout = child.stdout.take().ok_or(PluginHostError::NoStdout)?;

        let (tx, rx) = unbounded();
        let reader = thread::Builder::new()
            .name("plugin-reader".into())
            .spawn(move || read_messages(BufReader::new(stdout), tx, callback))
            .map_err(PluginHostError::SpawnFailed)?;

        *lock(&self.child) = Some(child);
        *lock(&self.stdin) = Some(stdin);
        *lock(&self.responses) = Some(rx);
        *lock(&self.reader) = Some(reader);

        let info = match self.initialize() {
            Ok(info) => info,
            Err(err) => {
                let _ = self.stop();
                return Err(err);
            }
        };
        *lock(&self.info) = Some(info.clone());

        Ok(info)
    }

    /// Stop the plugin process gracefully.
    pub fn stop(&self) -> Result<(), PluginHostError> {
        if lock(&self.stdin).is_some() {
            if let Err(err) = self.send_request(PluginMethod::Shutdown) {
                tracing::debug!(error = %err, "plugin did not acknowledge shutdown");
            }
        }

        // closing stdin lets a well-behaved plugin exit on EOF
        *lock(&self.stdin) = None;

        if let Some(mut child) = lock(&self.child).take() {
            let _ = child.kill();
            let _ = child.wait();
        }

        if let Some(reader) = lock(&self.reader).take() {
            let _ = reader.join();
        }

        *lock(&self.responses) = None;
        *lock(&self.info) = None;

        Ok(())
    }

    /// Check if the plugin process is running.
    pub fn is_running(&self) -> bool {
        lock(&self.child)
            .as_mut()
            .map(|c| c.try_wait().ok().flatten().is_none())
            .unwrap_or(false)
    }

    /// Get the plugin info (available after start).
    pub fn info(&self) -> Option<PluginInfo> {
        lock(&self.info).clone()
    }

    /// Send a request to the plugin and wait for its response.
    pub fn send_request(&self, method: PluginMethod) -> Result<PluginResult, PluginHostError> {
        // held for the whole round trip: one request in flight at a time
        let responses_guard = lock(&self.responses);
        let responses = responses_guard
            .as_ref()
            .ok_or(PluginHostError::ProcessTerminated)?;

        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = PluginRequest { id, method };
        let json = serde_json::to_string(&request).map_err(PluginHostError::ParseError)?;

        {
            let mut stdin_guard = lock(&self.stdin);
            let stdin = stdin_guard
                .as_mut()
                .ok_or(PluginHostError::ProcessTerminated)?;
            writeln!(stdin, "{}", json).map_err(PluginHostError::WriteError)?;
            stdin.flush().map_err(PluginHostError::WriteError)?;
        }

        let response = wait_for_response(responses, id, self.config.request_timeout)?;

        match response.result {
            PluginResult::Error(err) => Err(PluginHostError::PluginError(err)),
            result => Ok(result),
        }
    }

    fn initialize(&self) -> Result<PluginInfo, PluginHostError> {
        let result = self.send_request(PluginMethod::Initialize)?;
        match result {
            PluginResult::Initialized(info) => {
                if info.protocol_version != PROTOCOL_VERSION {
                    return Err(PluginHostError::ProtocolMismatch {
                        expected: PROTOCOL_VERSION,
                        actual: info.protocol_version,
                    });
                }
                tracing::info!(
                    plugin_id = %info.id,
                    plugin_name = %info.name,
                    plugin_version = %info.version,
                    "Plugin initialized"
                );
                Ok(info)
            }
            _ => Err(PluginHostError::UnexpectedResponse),
        }
    }
}

impl Drop for ExecPluginHost {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wait for the response to `id`, skipping late answers to earlier requests
/// that already timed out.
fn wait_for_response(
    responses: &Receiver<PluginResponse>,
    id: u64,
    timeout: Duration,
) -> Result<PluginResponse, PluginHostError> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match responses.recv_timeout(remaining) {
            Ok(response) if response.id == id => return Ok(response),
            Ok(response) if response.id < id => {
                tracing::debug!(stale_id = response.id, "discarding stale plugin response");
            }
            Ok(response) => {
                return Err(PluginHostError::IdMismatch {
                    sent: id,
                    received: response.id,
                })
            }
            Err(RecvTimeoutError::Timeout) => return Err(PluginHostError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => return Err(PluginHostError::ProcessTerminated),
        }
    }
}

fn read_messages<R: BufRead>(
    stdout: R,
    responses: Sender<PluginResponse>,
    callback: Arc<dyn AudioSourceCallback>,
) {
    for line in stdout.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read from plugin");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<PluginMessage>(&line) {
            Ok(PluginMessage::Response(response)) => {
                if responses.send(response).is_err() {
                    break;
                }
            }
            Ok(PluginMessage::Notification { event }) => event.dispatch(callback.as_ref()),
            Err(err) => tracing::warn!(error = %err, "ignoring unparseable plugin output"),
        }
    }
    tracing::debug!("plugin output closed");
}
