//! 仿真器适配器
//!
//! Starts the emulator through the build tool's `run` target and reads its console from
//! a FIFO pair instead of the tool's stdout, which carries build noise.

use crate::device::fifo::{FifoEnds, FifoPair};
use crate::device::native::HANDLER_LOG;
use crate::device::output::{self, OutputStream, SessionShared};
use crate::device::process::RunningProcess;
use crate::device::{DeviceAdapter, DeviceState};
use crate::error::DeviceError;
use crossbeam_channel::Receiver;
use log::{info, warn};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const FIFO_NAME: &str = "qemu-fifo";
pub const DEVICE_LOG: &str = "device.log";
const STREAM_GRACE: Duration = Duration::from_secs(2);

pub struct EmulatorAdapter {
    build_tool: String,
    fifo_timeout: Duration,
    shared: Arc<SessionShared>,
    process: Option<RunningProcess>,
    /// Kept open so the emulator never sees its input side close mid-run.
    console_input: Option<File>,
    rx: Option<Receiver<String>>,
    deadline: Option<Instant>,
}

impl EmulatorAdapter {
    pub fn new(build_tool: &str, fifo_timeout: Duration) -> Self {
        Self {
            build_tool: build_tool.to_string(),
            fifo_timeout,
            shared: SessionShared::new(),
            process: None,
            console_input: None,
            rx: None,
            deadline: None,
        }
    }

    /// `<tool> build -d <build_dir> -t run`
    pub fn run_command(&self, build_dir: &Path) -> Vec<String> {
        vec![
            "build".to_string(),
            "-d".to_string(),
            build_dir.display().to_string(),
            "-t".to_string(),
            "run".to_string(),
        ]
    }

    fn log_stdio(build_dir: &Path) -> (Stdio, Stdio) {
        match File::create(build_dir.join(HANDLER_LOG)) {
            Ok(file) => match file.try_clone() {
                Ok(clone) => (Stdio::from(file), Stdio::from(clone)),
                Err(_) => (Stdio::from(file), Stdio::null()),
            },
            Err(e) => {
                warn!("Cannot create {HANDLER_LOG} in {}: {e}", build_dir.display());
                (Stdio::null(), Stdio::null())
            }
        }
    }

    fn start_console(
        &mut self,
        ends: FifoEnds,
        build_dir: &Path,
        process: &mut RunningProcess,
    ) -> Result<Receiver<String>, DeviceError> {
        let dump = OpenOptions::new()
            .create(true)
            .append(true)
            .open(build_dir.join(DEVICE_LOG))
            .map_err(|e| warn!("Cannot open {DEVICE_LOG}: {e}"))
            .ok();
        let (tx, rx) = output::channel();
        let reader = output::spawn_line_reader(
            "emulator-console",
            ends.output,
            tx,
            dump,
            Arc::clone(&self.shared),
        )
        .map_err(|e| DeviceError::Startup(format!("failed to start console reader: {e}")))?;
        process.attach(reader);
        self.console_input = Some(ends.input);
        Ok(rx)
    }
}

impl DeviceAdapter for EmulatorAdapter {
    fn connect(&mut self) -> Result<(), DeviceError> {
        self.shared.set_state(DeviceState::Connected);
        Ok(())
    }

    fn flash(&mut self, build_dir: &Path, timeout: Duration) -> Result<(), DeviceError> {
        if self.process.is_some() {
            self.stop()?;
        }
        let fifos = FifoPair::create(build_dir, FIFO_NAME)?;

        let shared = SessionShared::new();
        shared.set_state(DeviceState::Connected);
        self.shared = Arc::clone(&shared);

        let program = PathBuf::from(&self.build_tool);
        let (stdout, stderr) = Self::log_stdio(build_dir);
        let mut cmd = Command::new(&program);
        cmd.args(self.run_command(build_dir))
            .env("QEMU_PIPE", fifos.base())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);

        let (mut process, _) = RunningProcess::spawn(cmd, &program, timeout, &shared)?;

        let ends = match fifos.open(self.fifo_timeout, || shared.state().is_terminal()) {
            Ok(ends) => ends,
            Err(e) => {
                process.stop(&shared);
                shared.set_state(DeviceState::Errored);
                return Err(match (e, shared.take_error()) {
                    (DeviceError::Startup(msg), Some(cause)) => {
                        DeviceError::Startup(format!("{msg} ({cause})"))
                    }
                    (e, _) => e,
                });
            }
        };
        info!("Emulator console attached at {}", fifos.base().display());

        let rx = match self.start_console(ends, build_dir, &mut process) {
            Ok(rx) => rx,
            Err(e) => {
                process.stop(&shared);
                return Err(e);
            }
        };
        self.process = Some(process);
        self.rx = Some(rx);
        self.deadline = Some(Instant::now() + timeout + STREAM_GRACE);
        Ok(())
    }

    fn output(&mut self) -> OutputStream {
        match &self.rx {
            Some(rx) => OutputStream::new(rx.clone(), self.deadline, Arc::clone(&self.shared)),
            None => OutputStream::empty(),
        }
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.console_input = None;
        if let Some(process) = self.process.take() {
            process.stop(&self.shared);
        }
        self.shared.finish_with(DeviceState::Finished);
        match self.shared.take_error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn disconnect(&mut self) -> Result<(), DeviceError> {
        let result = if self.process.is_some() {
            self.stop()
        } else {
            Ok(())
        };
        self.rx = None;
        self.shared.set_state(DeviceState::Disconnected);
        result
    }

    fn state(&self) -> DeviceState {
        self.shared.state()
    }

    fn timed_out(&self) -> bool {
        self.shared.timed_out()
    }
}

impl Drop for EmulatorAdapter {
    fn drop(&mut self) {
        if let Some(process) = self.process.take() {
            process.stop(&self.shared);
        }
    }
}
