//! Named-pipe console used by emulators.
//!
//! The pipe names follow the emulator's point of view: it reads `<name>.in` and writes
//! `<name>.out`.

use crate::device::output::POLL_INTERVAL;
use crate::error::DeviceError;
use log::{debug, warn};
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct FifoPair {
    base: PathBuf,
    in_path: PathBuf,
    out_path: PathBuf,
}

/// Open ends of the pipe pair: the console output to read and the input to write.
#[derive(Debug)]
pub struct FifoEnds {
    pub output: File,
    pub input: File,
}

impl FifoPair {
    /// Creates fresh `<dir>/<name>.in` and `<dir>/<name>.out`, removing stale ones first.
    pub fn create(dir: &Path, name: &str) -> Result<Self, DeviceError> {
        let base = dir.join(name);
        let pair = Self {
            in_path: base.with_extension("in"),
            out_path: base.with_extension("out"),
            base,
        };
        for path in [&pair.in_path, &pair.out_path] {
            if fs::symlink_metadata(path).is_ok() {
                debug!("Removing stale fifo {}", path.display());
                fs::remove_file(path).map_err(|e| {
                    DeviceError::Startup(format!("cannot remove {}: {e}", path.display()))
                })?;
            }
            mkfifo(path.as_path(), Mode::S_IRUSR | Mode::S_IWUSR).map_err(|e| {
                DeviceError::Startup(format!("cannot create fifo {}: {e}", path.display()))
            })?;
        }
        Ok(pair)
    }

    /// Path handed to the emulator, without extension.
    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn in_path(&self) -> &Path {
        &self.in_path
    }

    pub fn out_path(&self) -> &Path {
        &self.out_path
    }

    /// Waits for the emulator to open its ends of both pipes.
    ///
    /// Opening a FIFO blocks until the peer shows up, so the opens happen on a helper
    /// thread and are abandoned after `timeout`, or earlier once `gave_up` returns true.
    pub fn open<F>(&self, timeout: Duration, gave_up: F) -> Result<FifoEnds, DeviceError>
    where
        F: Fn() -> bool,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let in_path = self.in_path.clone();
        let out_path = self.out_path.clone();
        let opener = thread::Builder::new()
            .name("fifo-open".to_string())
            .spawn(move || {
                let ends = OpenOptions::new()
                    .write(true)
                    .open(&in_path)
                    .and_then(|input| {
                        File::open(&out_path).map(|output| FifoEnds { output, input })
                    });
                let _ = tx.send(ends);
            })
            .map_err(|e| DeviceError::Startup(format!("failed to start fifo opener: {e}")))?;

        let start = Instant::now();
        let failure = loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(ends)) => return Ok(ends),
                Ok(Err(e)) => break format!("cannot open {}: {e}", self.base.display()),
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    break "fifo opener exited without a result".to_string();
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            }
            if gave_up() {
                break "emulator exited before opening its console".to_string();
            }
            if start.elapsed() >= timeout {
                break format!("emulator did not open {} within {timeout:?}", self.base.display());
            }
        };

        self.unblock(opener);
        Err(DeviceError::Startup(failure))
    }

    /// Releases a helper thread stuck in a blocking open by playing the missing peer.
    fn unblock(&self, opener: thread::JoinHandle<()>) {
        let nonblock = OFlag::O_NONBLOCK.bits();
        let mut peers = Vec::new();
        for _ in 0..20 {
            if opener.is_finished() {
                break;
            }
            if let Ok(f) = OpenOptions::new()
                .read(true)
                .custom_flags(nonblock)
                .open(&self.in_path)
            {
                peers.push(f);
            }
            if let Ok(f) = OpenOptions::new()
                .write(true)
                .custom_flags(nonblock)
                .open(&self.out_path)
            {
                peers.push(f);
            }
            thread::sleep(Duration::from_millis(50));
        }
        if opener.is_finished() {
            let _ = opener.join();
        } else {
            warn!("fifo opener for {} is still blocked", self.base.display());
        }
    }
}
