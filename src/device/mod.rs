//! 设备适配器模块
//!
//! 统一的设备接口：硬件板卡（串口 + 烧录工具）、本地进程和仿真器。
//!
//! Every adapter follows the same lifecycle:
//! `Disconnected -> Connected -> Running -> {Finished, TimedOut, Errored} -> Disconnected`.
//! Output is read from a per-session queue fed by one background reader; timeouts are
//! recorded on the adapter and never returned as errors.

use crate::config::hardware_config::HardwareConfig;
use crate::config::platform_config::{PlatformDescriptor, PlatformType, Simulation};
use crate::error::DeviceError;
use std::path::Path;
use std::time::Duration;

pub mod emulator;
pub mod fifo;
pub mod hardware;
pub mod native;
pub mod output;
pub mod process;

pub use emulator::EmulatorAdapter;
pub use hardware::HardwareAdapter;
pub use native::NativeAdapter;
pub use output::OutputStream;

/// Execution path for a built image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AdapterKind {
    /// Physical board behind a serial console and a flash runner.
    Hardware,
    /// Host executable produced by the build.
    NativeProcess,
    /// Emulator started through the build tool's `run` target.
    Emulator,
}

impl AdapterKind {
    /// Picks the adapter for `platform`, or `None` if this host has no way to run it.
    pub fn select(platform: &PlatformDescriptor, hardware_attached: bool) -> Option<Self> {
        match (platform.platform_type, platform.simulation) {
            (PlatformType::Native | PlatformType::Unit, _) => Some(AdapterKind::NativeProcess),
            (_, Simulation::Qemu) => Some(AdapterKind::Emulator),
            (PlatformType::Mcu, Simulation::None) if hardware_attached => {
                Some(AdapterKind::Hardware)
            }
            _ => None,
        }
    }
}

/// 设备会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Disconnected,
    Connected,
    Running,
    Finished,
    TimedOut,
    Errored,
}

impl DeviceState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeviceState::Finished | DeviceState::TimedOut | DeviceState::Errored
        )
    }
}

/// 设备适配器特质
pub trait DeviceAdapter: Send {
    /// Opens the device channel. A no-op for process-backed adapters.
    fn connect(&mut self) -> Result<(), DeviceError>;

    /// Starts executing the image in `build_dir`; `timeout` bounds the run that follows.
    fn flash(&mut self, build_dir: &Path, timeout: Duration) -> Result<(), DeviceError>;

    /// Output lines of the current session.
    ///
    /// Calling this again during the same session continues from where the previous
    /// stream stopped; lines are never replayed.
    fn output(&mut self) -> OutputStream;

    /// Ends the run, killing whatever the adapter started, and surfaces any error a
    /// background thread captured.
    fn stop(&mut self) -> Result<(), DeviceError>;

    /// Releases the channel opened by [`DeviceAdapter::connect`].
    fn disconnect(&mut self) -> Result<(), DeviceError>;

    fn state(&self) -> DeviceState;

    fn timed_out(&self) -> bool;
}

/// Everything an adapter constructor may need.
#[derive(Debug, Clone)]
pub struct DeviceOptions {
    pub build_tool: String,
    pub platform_type: PlatformType,
    pub fifo_timeout: Duration,
    pub flash_timeout: Duration,
    /// Board attached for this platform, required by the hardware adapter.
    pub hardware: Option<HardwareConfig>,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            build_tool: "west".to_string(),
            platform_type: PlatformType::default(),
            fifo_timeout: Duration::from_secs(10),
            flash_timeout: Duration::from_secs(60),
            hardware: None,
        }
    }
}

/// Constructor registered per [`AdapterKind`].
pub type AdapterConstructor = fn(&DeviceOptions) -> Result<Box<dyn DeviceAdapter>, DeviceError>;

/// 设备适配器工厂
pub struct DeviceFactory;

impl DeviceFactory {
    pub fn native(options: &DeviceOptions) -> Result<Box<dyn DeviceAdapter>, DeviceError> {
        Ok(Box::new(NativeAdapter::new(options.platform_type)))
    }

    pub fn emulator(options: &DeviceOptions) -> Result<Box<dyn DeviceAdapter>, DeviceError> {
        Ok(Box::new(EmulatorAdapter::new(
            &options.build_tool,
            options.fifo_timeout,
        )))
    }

    pub fn hardware(options: &DeviceOptions) -> Result<Box<dyn DeviceAdapter>, DeviceError> {
        let hardware = options.hardware.clone().ok_or_else(|| {
            DeviceError::Serial("no [[hardware]] entry for this platform".to_string())
        })?;
        Ok(Box::new(HardwareAdapter::new(
            hardware,
            &options.build_tool,
            options.flash_timeout,
        )))
    }

    /// Default constructor for every adapter kind.
    pub fn constructors() -> Vec<(AdapterKind, AdapterConstructor)> {
        vec![
            (AdapterKind::Hardware, Self::hardware as AdapterConstructor),
            (AdapterKind::NativeProcess, Self::native as AdapterConstructor),
            (AdapterKind::Emulator, Self::emulator as AdapterConstructor),
        ]
    }
}
