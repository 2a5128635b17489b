//! Line queue between a device's background reader and the log parser.

use crate::device::DeviceState;
use crate::error::DeviceError;
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use log::{debug, error, warn};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Lines buffered per session before the reader blocks.
pub const QUEUE_CAPACITY: usize = 4096;
/// Granularity of every blocking wait on the queue.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// State one device session shares with its background threads.
#[derive(Debug)]
pub struct SessionShared {
    state: Mutex<DeviceState>,
    error: Mutex<Option<DeviceError>>,
    stop_requested: AtomicBool,
    timed_out: AtomicBool,
}

impl Default for SessionShared {
    fn default() -> Self {
        Self {
            state: Mutex::new(DeviceState::Disconnected),
            error: Mutex::new(None),
            stop_requested: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
        }
    }
}

impl SessionShared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock_state(&self) -> MutexGuard<'_, DeviceState> {
        // a panicked reader must not take the session down with it
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn state(&self) -> DeviceState {
        *self.lock_state()
    }

    pub fn set_state(&self, state: DeviceState) {
        let mut current = self.lock_state();
        debug!("Device state {:?} -> {:?}", *current, state);
        *current = state;
    }

    /// Moves to `state` unless the session already reached a terminal state.
    pub fn finish_with(&self, state: DeviceState) {
        let mut current = self.lock_state();
        if !current.is_terminal() {
            debug!("Device state {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    /// Keeps the first asynchronously captured error; later ones are only logged.
    pub fn record_error(&self, err: DeviceError) {
        let mut slot = self.error.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            error!("{err}");
            *slot = Some(err);
        } else {
            warn!("Additional device error: {err}");
        }
    }

    pub fn take_error(&self) -> Option<DeviceError> {
        self.error.lock().unwrap_or_else(|p| p.into_inner()).take()
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn mark_timed_out(&self) {
        self.timed_out.store(true, Ordering::SeqCst);
        self.finish_with(DeviceState::TimedOut);
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    /// Clears per-run flags when a new run starts on the same connection.
    pub fn reset_run(&self) {
        self.stop_requested.store(false, Ordering::SeqCst);
        self.timed_out.store(false, Ordering::SeqCst);
    }
}

pub fn channel() -> (Sender<String>, Receiver<String>) {
    crossbeam_channel::bounded(QUEUE_CAPACITY)
}

/// Lazy sequence of decoded output lines.
///
/// Ends when the producer hangs up, the deadline passes, or a stop is requested and the
/// queue has drained. Every wait is bounded by [`POLL_INTERVAL`] so the iteration stays
/// cancellable.
pub struct OutputStream {
    rx: Option<Receiver<String>>,
    deadline: Option<Instant>,
    shared: Option<Arc<SessionShared>>,
}

impl OutputStream {
    pub fn new(rx: Receiver<String>, deadline: Option<Instant>, shared: Arc<SessionShared>) -> Self {
        Self {
            rx: Some(rx),
            deadline,
            shared: Some(shared),
        }
    }

    /// Stream that yields nothing, for adapters that were never flashed.
    pub fn empty() -> Self {
        Self {
            rx: None,
            deadline: None,
            shared: None,
        }
    }
}

impl Iterator for OutputStream {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let rx = self.rx.as_ref()?;
        loop {
            if self.deadline.is_some_and(|d| Instant::now() >= d) {
                return None;
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(line) => return Some(line),
                Err(RecvTimeoutError::Timeout) => {
                    if self.shared.as_ref().is_some_and(|s| s.stop_requested()) {
                        return None;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

/// Pushes one line, giving up when the consumer is gone or the session is stopping.
pub fn push_line(tx: &Sender<String>, mut line: String, shared: &SessionShared) -> bool {
    loop {
        match tx.send_timeout(line, POLL_INTERVAL) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(l)) => {
                if shared.stop_requested() {
                    return false;
                }
                line = l;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

fn decode(buf: &[u8]) -> String {
    String::from_utf8_lossy(buf)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

/// Reads `reader` line by line into the queue, teeing each line into `dump` if given.
pub fn spawn_line_reader<R>(
    name: &str,
    reader: R,
    tx: Sender<String>,
    mut dump: Option<File>,
    shared: Arc<SessionShared>,
) -> std::io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new().name(name.to_string()).spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::with_capacity(256);
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = decode(&buf);
                    if let Some(file) = dump.as_mut() {
                        if let Err(e) = writeln!(file, "{line}") {
                            warn!("Failed to write device dump: {e}");
                            dump = None;
                        }
                    }
                    if !push_line(&tx, line, &shared) {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("Output reader stopped: {e}");
                    break;
                }
            }
        }
    })
}

/// Splits arbitrary chunks into complete lines, keeping the trailing partial line.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
}

impl LineAssembler {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let rest = self.pending.split_off(pos + 1);
            lines.push(decode(&self.pending));
            self.pending = rest;
        }
        lines
    }

    /// Whatever is left once the source has closed.
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            let line = decode(&self.pending);
            self.pending.clear();
            Some(line)
        }
    }
}

/// Joins a background thread, waiting at most `timeout`.
///
/// Returns false when the thread panicked; a thread still running at the deadline is
/// left detached and logged.
pub fn join_bounded(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let start = Instant::now();
    while !handle.is_finished() {
        if start.elapsed() >= timeout {
            warn!(
                "Background thread {:?} did not finish within {timeout:?}",
                handle.thread().name()
            );
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    handle.join().is_ok()
}
