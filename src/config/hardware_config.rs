//! 串口与烧录配置
//!
//! One `[[hardware]]` entry per physical board attached to this host.
use serde::Deserialize;
use std::path::PathBuf;

fn default_baud_rate() -> u32 {
    115200
}

#[derive(Debug, Clone, Deserialize)]
pub struct HardwareConfig {
    /// Platform identifier this board runs.
    pub platform: String,
    /// Serial console device, e.g. `/dev/ttyACM0`.
    pub serial: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Flash runner passed to `--runner` (pyocd, jlink, openocd...).
    pub runner: Option<String>,
    /// Probe serial number used for runner-specific selection flags.
    pub id: Option<String>,
    /// USB product descriptor string of the probe.
    pub product: Option<String>,
    #[serde(default)]
    pub fixtures: Vec<String>,
    pub pre_script: Option<PathBuf>,
    pub post_flash_script: Option<PathBuf>,
    pub post_script: Option<PathBuf>,
}

impl HardwareConfig {
    pub fn new(platform: &str, serial: &str) -> Self {
        Self {
            platform: platform.to_string(),
            serial: serial.to_string(),
            baud_rate: default_baud_rate(),
            runner: None,
            id: None,
            product: None,
            fixtures: Vec::new(),
            pre_script: None,
            post_flash_script: None,
            post_script: None,
        }
    }
}
