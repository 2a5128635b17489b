//! 硬件板卡适配器
//!
//! 通过串口读取板卡输出，通过外部烧录工具烧录镜像。

use crate::config::hardware_config::HardwareConfig;
use crate::device::output::{
    self, LineAssembler, OutputStream, POLL_INTERVAL, SessionShared, join_bounded, push_line,
};
use crate::device::process::{JOIN_TIMEOUT, run_to_completion};
use crate::device::{DeviceAdapter, DeviceState};
use crate::error::DeviceError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use mio_serial::SerialPort;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const FLASH_LOG: &str = "flash.log";
const HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Runner-specific flags selecting one probe by serial number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerArgs {
    /// Appended to the flash command itself.
    pub base: Vec<String>,
    /// Passed to the runner after `--`.
    pub extra: Vec<String>,
}

/// 烧录工具参数表
///
/// Product strings are USB descriptor values and must match exactly.
pub fn runner_args(runner: &str, probe_id: &str, product: Option<&str>) -> RunnerArgs {
    let mut args = RunnerArgs::default();
    match (runner, product) {
        ("pyocd", _) => {
            args.extra.push("--board-id".to_string());
            args.extra.push(probe_id.to_string());
        }
        ("nrfjprog", _) => {
            args.extra.push("--dev-id".to_string());
            args.extra.push(probe_id.to_string());
        }
        ("openocd", Some("STM32 STLink" | "STLINK-V3")) => {
            args.extra.push("--cmd-pre-init".to_string());
            args.extra.push(format!("hla_serial {probe_id}"));
        }
        ("openocd", Some("EDBG CMSIS-DAP")) => {
            args.extra.push("--cmd-pre-init".to_string());
            args.extra.push(format!("cmsis_dap_serial {probe_id}"));
        }
        ("jlink", _) => args.base.push(format!("--tool-opt=-SelectEmuBySN {probe_id}")),
        ("stm32cubeprogrammer", _) => args.base.push(format!("--tool-opt=sn={probe_id}")),
        _ => debug!("No probe selection flags for runner {runner}"),
    }
    args
}

/// Arguments for `<tool> flash`, without the tool itself.
pub fn flash_command(build_dir: &Path, hardware: &HardwareConfig) -> Vec<String> {
    let mut cmd = vec![
        "flash".to_string(),
        "--skip-rebuild".to_string(),
        "--build-dir".to_string(),
        build_dir.display().to_string(),
    ];
    let Some(runner) = &hardware.runner else {
        return cmd;
    };
    cmd.push("--runner".to_string());
    cmd.push(runner.clone());

    if let Some(id) = &hardware.id {
        let args = runner_args(runner, id, hardware.product.as_deref());
        cmd.extend(args.base);
        if !args.extra.is_empty() {
            cmd.push("--".to_string());
            cmd.extend(args.extra);
        }
    }
    cmd
}

/// 串口读取线程
struct SerialReader {
    closing: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl SerialReader {
    fn spawn(
        mut port: Box<dyn SerialPort + Send>,
        tx: Sender<String>,
        shared: Arc<SessionShared>,
    ) -> Result<Self, DeviceError> {
        let closing = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&closing);
        let handle = thread::Builder::new()
            .name("serial-reader".to_string())
            .spawn(move || {
                let mut buf = [0u8; 4096];
                let mut lines = LineAssembler::default();
                while !flag.load(Ordering::SeqCst) {
                    match port.read(&mut buf) {
                        Ok(0) => thread::sleep(Duration::from_millis(10)),
                        Ok(n) => {
                            for line in lines.push(&buf[..n]) {
                                // a full queue during a stop drops the line
                                if !push_line(&tx, line, &shared) && flag.load(Ordering::SeqCst) {
                                    return;
                                }
                            }
                        }
                        Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
                        Err(e) if e.kind() == ErrorKind::Interrupted => {}
                        Err(e) => {
                            shared.record_error(DeviceError::Serial(e.to_string()));
                            shared.finish_with(DeviceState::Errored);
                            break;
                        }
                    }
                }
                if let Some(rest) = lines.flush() {
                    let _ = tx.try_send(rest);
                }
            })
            .map_err(|e| DeviceError::Serial(format!("failed to start serial reader: {e}")))?;
        Ok(Self { closing, handle })
    }

    fn close(self) -> bool {
        self.closing.store(true, Ordering::SeqCst);
        join_bounded(self.handle, JOIN_TIMEOUT)
    }
}

/// Marks the run timed out when its deadline passes before a stop.
struct RunWatchdog {
    done: Sender<()>,
    handle: JoinHandle<()>,
}

impl RunWatchdog {
    fn spawn(timeout: Duration, shared: Arc<SessionShared>) -> Result<Self, DeviceError> {
        let (done, done_rx) = crossbeam_channel::bounded::<()>(0);
        let handle = thread::Builder::new()
            .name("serial-watchdog".to_string())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(timeout) {
                    warn!("Device run timed out after {timeout:?}");
                    shared.mark_timed_out();
                }
            })
            .map_err(|e| DeviceError::Run(format!("failed to start watchdog: {e}")))?;
        Ok(Self { done, handle })
    }

    fn cancel(self) -> bool {
        drop(self.done);
        join_bounded(self.handle, JOIN_TIMEOUT)
    }
}

pub struct HardwareAdapter {
    hardware: HardwareConfig,
    build_tool: String,
    flash_timeout: Duration,
    shared: Arc<SessionShared>,
    reader: Option<SerialReader>,
    watchdog: Option<RunWatchdog>,
    rx: Option<Receiver<String>>,
    deadline: Option<Instant>,
}

impl HardwareAdapter {
    pub fn new(hardware: HardwareConfig, build_tool: &str, flash_timeout: Duration) -> Self {
        Self {
            hardware,
            build_tool: build_tool.to_string(),
            flash_timeout,
            shared: SessionShared::new(),
            reader: None,
            watchdog: None,
            rx: None,
            deadline: None,
        }
    }

    /// 打开串口（使用mio-serial）
    fn open_port(&self) -> Result<Box<dyn SerialPort + Send>, DeviceError> {
        let port = mio_serial::new(&self.hardware.serial, self.hardware.baud_rate)
            .timeout(POLL_INTERVAL)
            .open_native()
            .map_err(|e| {
                DeviceError::Serial(format!("unable to open {}: {e}", self.hardware.serial))
            })?;
        Ok(Box::new(port))
    }

    fn run_hook(script: &Path, stage: &str) {
        info!("Running {stage} script {}", script.display());
        match run_to_completion(Command::new(script), script, HOOK_TIMEOUT) {
            Ok(Some(status)) if status.success() => {}
            Ok(Some(status)) => error!("{stage} script {} failed: {status}", script.display()),
            Ok(None) => error!("{stage} script {} timed out", script.display()),
            Err(e) => error!("{stage} script {}: {e}", script.display()),
        }
    }

    fn run_flash(&self, build_dir: &Path) -> Result<(), DeviceError> {
        let program = PathBuf::from(&self.build_tool);
        let mut cmd = Command::new(&program);
        cmd.args(flash_command(build_dir, &self.hardware))
            .stdin(Stdio::null());
        let log_path = build_dir.join(FLASH_LOG);
        if let Ok(log) = File::create(&log_path) {
            if let Ok(clone) = log.try_clone() {
                cmd.stderr(clone);
            }
            cmd.stdout(log);
        }

        match run_to_completion(cmd, &program, self.flash_timeout)? {
            Some(status) if status.success() => {
                info!("Flashed {} from {}", self.hardware.platform, build_dir.display());
                Ok(())
            }
            Some(status) => Err(DeviceError::Flash(format!(
                "flash tool exited with {status}, see {}",
                log_path.display()
            ))),
            None => Err(DeviceError::Flash(format!(
                "flash timed out after {:?}",
                self.flash_timeout
            ))),
        }
    }
}

impl DeviceAdapter for HardwareAdapter {
    fn connect(&mut self) -> Result<(), DeviceError> {
        if self.reader.is_some() {
            return Ok(());
        }
        let port = self.open_port()?;
        let shared = SessionShared::new();
        let (tx, rx) = output::channel();
        self.reader = Some(SerialReader::spawn(port, tx, Arc::clone(&shared))?);
        shared.set_state(DeviceState::Connected);
        self.shared = shared;
        self.rx = Some(rx);
        debug!("Connected to {} at {} baud", self.hardware.serial, self.hardware.baud_rate);
        Ok(())
    }

    fn flash(&mut self, build_dir: &Path, timeout: Duration) -> Result<(), DeviceError> {
        let Some(rx) = &self.rx else {
            return Err(DeviceError::Serial("flash before connect".to_string()));
        };
        // whatever the board printed before this image does not belong to the run
        while rx.try_recv().is_ok() {}
        self.shared.reset_run();

        if let Some(script) = &self.hardware.pre_script {
            Self::run_hook(script, "pre");
        }
        if let Err(e) = self.run_flash(build_dir) {
            self.shared.set_state(DeviceState::Errored);
            return Err(e);
        }
        if let Some(script) = &self.hardware.post_flash_script {
            Self::run_hook(script, "post-flash");
        }

        self.shared.set_state(DeviceState::Running);
        self.watchdog = Some(RunWatchdog::spawn(timeout, Arc::clone(&self.shared))?);
        self.deadline = Some(Instant::now() + timeout);
        Ok(())
    }

    fn output(&mut self) -> OutputStream {
        match &self.rx {
            Some(rx) => OutputStream::new(rx.clone(), self.deadline, Arc::clone(&self.shared)),
            None => OutputStream::empty(),
        }
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.shared.request_stop();
        if let Some(watchdog) = self.watchdog.take() {
            if !watchdog.cancel() {
                self.shared
                    .record_error(DeviceError::Run("watchdog thread panicked".to_string()));
            }
        }
        self.shared.finish_with(DeviceState::Finished);
        match self.shared.take_error() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn disconnect(&mut self) -> Result<(), DeviceError> {
        let result = if self.watchdog.is_some() {
            self.stop()
        } else {
            Ok(())
        };
        if let Some(reader) = self.reader.take() {
            if !reader.close() {
                warn!("Serial reader for {} panicked", self.hardware.serial);
            }
        }
        self.rx = None;
        if let Some(script) = &self.hardware.post_script {
            Self::run_hook(script, "post");
        }
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
