use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Runs a tick closure on a fixed interval until disarmed.
///
/// Ticks never overlap: the next wait starts only after the previous tick
/// returned.
pub struct ProbeTimer {
    stop: Option<Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl ProbeTimer {
    pub fn arm<F>(interval: Duration, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let join = thread::Builder::new()
            .name("probe-timer".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => tick(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        tracing::debug!(interval_ms = interval.as_millis() as u64, "probe timer armed");
        Ok(Self {
            stop: Some(stop_tx),
            join: Some(join),
        })
    }

    pub fn is_armed(&self) -> bool {
        self.join.is_some()
    }

    /// Stop ticking and wait for an in-flight tick to finish.
    pub fn disarm(&mut self) {
        // dropping the sender wakes the timer thread
        self.stop.take();
        if let Some(join) = self.join.take() {
            if join.thread().id() == thread::current().id() {
                // disarmed from inside a tick; the loop exits on its own
                return;
            }
            if join.join().is_err() {
                tracing::error!("probe timer thread panicked");
            }
            tracing::debug!("probe timer disarmed");
        }
    }
}

impl Drop for ProbeTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}
