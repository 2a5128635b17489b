//! Run configuration: executor knobs plus the boards attached to this host.
//!
//! ```toml
//! [executor]
//! build_tool = "west"
//! build_wait_timeout = "10m"
//! fixtures = ["gpio_loopback"]
//!
//! [[hardware]]
//! platform = "frdm_k64f"
//! serial = "/dev/ttyACM0"
//! runner = "pyocd"
//! id = "0240000026334e450015400f5e0e000b4eb1000097969900"
//! ```

pub mod cli_args;
pub mod executor_config;
pub mod hardware_config;
pub mod platform_config;
pub mod testsuite_config;

use crate::utils;
use anyhow::Result;
use cli_args::CliArgs;
use executor_config::ExecutorConfig;
use hardware_config::HardwareConfig;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub hardware: Vec<HardwareConfig>,
}

impl RunConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        utils::read_toml_from_file(path)
    }

    /// Loads `path` if given, otherwise starts from the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// 命令行参数覆盖配置文件
    pub fn apply_cli(&mut self, args: &CliArgs) {
        let executor = &mut self.executor;
        if let Some(jobs) = args.jobs {
            executor.jobs = jobs;
        }
        if let Some(multiplier) = args.timeout_multiplier {
            executor.timeout_multiplier = multiplier;
        }
        if let Some(retries) = args.retry_failed {
            executor.retry_failed = retries;
        }
        executor.overflow_as_errors |= args.overflow_as_errors;
        executor.fault_strict |= args.fault_strict;
        executor.enable_slow |= args.enable_slow;
        executor.device_testing |= args.device_testing;
        executor.fixtures.extend(args.fixture.iter().cloned());
        executor.extra_args.extend(args.extra_args.iter().cloned());
    }

    /// First board entry attached for `platform`, if any.
    pub fn hardware_for(&self, platform: &str) -> Option<&HardwareConfig> {
        self.hardware.iter().find(|hw| hw.platform == platform)
    }
}
