//! Child process supervision shared by the native and emulator adapters.
//!
//! Children are spawned as leaders of their own process group so the whole tree can be
//! signalled at once; run tools routinely leave grandchildren behind otherwise.

use crate::device::DeviceState;
use crate::device::output::{SessionShared, join_bounded};
use crate::error::DeviceError;
use crossbeam_channel::RecvTimeoutError;
use log::{debug, info, warn};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, ExitStatus};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Time a group gets to exit after SIGTERM before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(1);
/// Upper bound for joining each background thread on stop.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends `signal` to the process group led by `pid`; a vanished group is not an error.
pub fn signal_group(pid: u32, signal: Signal) {
    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) => debug!("Sent {signal} to process group {pid}"),
        Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!("Failed to send {signal} to process group {pid}: {e}"),
    }
}

/// Maps a finished child's status to the session outcome.
///
/// SIGTERM counts as a normal stop, and anything after a caller-requested stop does too.
pub fn classify_exit(status: ExitStatus, stop_requested: bool) -> Result<(), DeviceError> {
    if status.success() || stop_requested {
        return Ok(());
    }
    match (status.code(), status.signal()) {
        (_, Some(sig)) if sig == Signal::SIGTERM as i32 => Ok(()),
        (Some(code), _) => Err(DeviceError::Run(format!("process exited with code {code}"))),
        (None, Some(sig)) => Err(DeviceError::Run(format!("process killed by signal {sig}"))),
        (None, None) => Err(DeviceError::Run("process ended without a status".to_string())),
    }
}

fn launch_error(program: &Path, error: io::Error) -> DeviceError {
    if error.kind() == io::ErrorKind::NotFound {
        DeviceError::FileNotFound(program.to_path_buf())
    } else {
        DeviceError::Run(format!("failed to start {}: {error}", program.display()))
    }
}

/// Runs `cmd` in its own process group and waits for it, killing the group after `timeout`.
///
/// Returns `None` if the command timed out.
pub fn run_to_completion(
    mut cmd: Command,
    program: &Path,
    timeout: Duration,
) -> Result<Option<ExitStatus>, DeviceError> {
    cmd.process_group(0);
    info!("Running {cmd:?}");
    let mut child = cmd.spawn().map_err(|e| launch_error(program, e))?;
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status)),
            Ok(None) if start.elapsed() >= timeout => {
                warn!("{} timed out after {timeout:?}", program.display());
                signal_group(child.id(), Signal::SIGKILL);
                let _ = child.wait();
                return Ok(None);
            }
            Ok(None) => thread::sleep(Duration::from_millis(50)),
            Err(e) => {
                return Err(DeviceError::Run(format!(
                    "failed to wait for {}: {e}",
                    program.display()
                )));
            }
        }
    }
}

/// A spawned child plus its waiter and watchdog threads.
#[derive(Debug)]
pub struct RunningProcess {
    pid: u32,
    threads: Vec<JoinHandle<()>>,
}

impl RunningProcess {
    /// Spawns `cmd` in a new process group and starts supervising it.
    ///
    /// The watchdog kills the group once `timeout` elapses and records the timeout as a
    /// flag; the waiter classifies the exit and stores any error in `shared`.
    pub fn spawn(
        mut cmd: Command,
        program: &Path,
        timeout: Duration,
        shared: &Arc<SessionShared>,
    ) -> Result<(Self, Option<ChildStdout>), DeviceError> {
        cmd.process_group(0);
        info!("Running {cmd:?}");
        let mut child: Child = cmd.spawn().map_err(|e| launch_error(program, e))?;
        let pid = child.id();
        let stdout = child.stdout.take();
        shared.set_state(DeviceState::Running);

        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);

        let waiter_shared = Arc::clone(shared);
        let waiter = thread::Builder::new()
            .name(format!("device-wait-{pid}"))
            .spawn(move || {
                let status = child.wait();
                drop(done_tx);
                let shared = waiter_shared;
                match status {
                    Err(e) => {
                        shared.record_error(DeviceError::Run(format!("wait failed: {e}")));
                        shared.finish_with(DeviceState::Errored);
                    }
                    Ok(_) if shared.timed_out() => {
                        info!("Process group {pid} ended after timeout");
                    }
                    Ok(status) => match classify_exit(status, shared.stop_requested()) {
                        Ok(()) => {
                            debug!("Process group {pid} finished: {status}");
                            shared.finish_with(DeviceState::Finished);
                        }
                        Err(e) => {
                            shared.record_error(e);
                            shared.finish_with(DeviceState::Errored);
                        }
                    },
                }
            })
            .map_err(|e| DeviceError::Run(format!("failed to start waiter thread: {e}")))?;

        let watchdog_shared = Arc::clone(shared);
        let watchdog = thread::Builder::new()
            .name(format!("device-watchdog-{pid}"))
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(timeout) {
                    if !watchdog_shared.stop_requested() {
                        warn!("Process group {pid} timed out after {timeout:?}");
                        watchdog_shared.mark_timed_out();
                    }
                    signal_group(pid, Signal::SIGKILL);
                }
            })
            .map_err(|e| DeviceError::Run(format!("failed to start watchdog thread: {e}")))?;

        Ok((
            Self {
                pid,
                threads: vec![waiter, watchdog],
            },
            stdout,
        ))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Adds another thread to be joined on stop, e.g. an output reader.
    pub fn attach(&mut self, handle: JoinHandle<()>) {
        self.threads.push(handle);
    }

    /// Terminates the whole group and joins every background thread with a bounded wait.
    pub fn stop(mut self, shared: &SessionShared) {
        shared.request_stop();
        if !shared.state().is_terminal() {
            signal_group(self.pid, Signal::SIGTERM);
            let start = Instant::now();
            while !shared.state().is_terminal() && start.elapsed() < TERMINATE_GRACE {
                thread::sleep(Duration::from_millis(20));
            }
        }
        // stragglers that ignored SIGTERM or reparented inside the group
        signal_group(self.pid, Signal::SIGKILL);

        for handle in self.threads.drain(..) {
            if !join_bounded(handle, JOIN_TIMEOUT) {
                shared.record_error(DeviceError::Run("background thread panicked".to_string()));
            }
        }
    }
}
