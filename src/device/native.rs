//! 本地进程适配器
//!
//! Runs the host executable produced by a native or unit-test build.

use crate::config::platform_config::PlatformType;
use crate::device::output::{self, OutputStream, SessionShared};
use crate::device::process::RunningProcess;
use crate::device::{DeviceAdapter, DeviceState};
use crate::error::DeviceError;
use crossbeam_channel::Receiver;
use log::{debug, warn};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const HANDLER_LOG: &str = "handler.log";
/// Extra time the output stream stays open after the run timeout so the watchdog's
/// kill can drain through the reader.
const STREAM_GRACE: Duration = Duration::from_secs(2);

/// Executable a build produces for `platform_type`, relative to the build directory.
pub fn executable_path(build_dir: &Path, platform_type: PlatformType) -> PathBuf {
    match platform_type {
        PlatformType::Unit => build_dir.join("testbinary"),
        _ => build_dir.join("zephyr").join("zephyr.exe"),
    }
}

pub struct NativeAdapter {
    platform_type: PlatformType,
    command: Option<Vec<String>>,
    shared: Arc<SessionShared>,
    process: Option<RunningProcess>,
    rx: Option<Receiver<String>>,
    deadline: Option<Instant>,
}

impl NativeAdapter {
    pub fn new(platform_type: PlatformType) -> Self {
        Self {
            platform_type,
            command: None,
            shared: SessionShared::new(),
            process: None,
            rx: None,
            deadline: None,
        }
    }

    /// Runs `command` instead of the build's executable.
    pub fn with_command(command: Vec<String>) -> Self {
        let mut adapter = Self::new(PlatformType::Native);
        adapter.command = Some(command);
        adapter
    }

    fn command_line(&self, build_dir: &Path) -> Vec<String> {
        match &self.command {
            Some(command) => command.clone(),
            None => vec![
                executable_path(build_dir, self.platform_type)
                    .display()
                    .to_string(),
            ],
        }
    }

    fn open_handler_log(build_dir: &Path) -> Option<File> {
        match File::create(build_dir.join(HANDLER_LOG)) {
            Ok(file) => Some(file),
            Err(e) => {
                warn!("Cannot create {HANDLER_LOG} in {}: {e}", build_dir.display());
                None
            }
        }
    }
}

impl DeviceAdapter for NativeAdapter {
    fn connect(&mut self) -> Result<(), DeviceError> {
        self.shared.set_state(DeviceState::Connected);
        Ok(())
    }

    fn flash(&mut self, build_dir: &Path, timeout: Duration) -> Result<(), DeviceError> {
        if self.process.is_some() {
            self.stop()?;
        }
        let argv = self.command_line(build_dir);
        let Some((program, args)) = argv.split_first() else {
            return Err(DeviceError::Run("empty command line".to_string()));
        };
        let program = PathBuf::from(program);

        let shared = SessionShared::new();
        shared.set_state(DeviceState::Connected);
        self.shared = Arc::clone(&shared);

        let log = Self::open_handler_log(build_dir);
        let stderr = log
            .as_ref()
            .and_then(|f| f.try_clone().ok())
            .map_or_else(Stdio::null, Stdio::from);

        let mut cmd = Command::new(&program);
        cmd.args(args)
            .current_dir(build_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(stderr);

        let (mut process, stdout) = RunningProcess::spawn(cmd, &program, timeout, &shared)?;
        let (tx, rx) = output::channel();
        if let Some(stdout) = stdout {
            match output::spawn_line_reader("native-output", stdout, tx, log, Arc::clone(&shared)) {
                Ok(reader) => process.attach(reader),
                Err(e) => {
                    process.stop(&shared);
                    return Err(DeviceError::Run(format!("failed to start output reader: {e}")));
                }
            }
        }
        debug!("Native process {} started", process.pid());

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

impl Drop for NativeAdapter {
    fn drop(&mut self) {
        if let Some(process) = self.process.take() {
            process.stop(&self.shared);
        }
    }
}
