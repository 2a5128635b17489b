//! 执行器配置参数
//!
//! Knobs for building, flashing and running, read from the `[executor]` table of the
//! run configuration file.
use humantime_serde;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExecutorConfig {
    /// External build/flash/run tool (west-compatible command line).
    pub build_tool: String,
    /// Shared build ledger; defaults to `hiltestor_builder.json` in the output directory.
    pub ledger_path: Option<PathBuf>,
    #[serde(with = "humantime_serde")]
    pub build_wait_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub ledger_lock_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub ledger_poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub fifo_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub flash_timeout: Duration,
    pub timeout_multiplier: f64,
    /// Treat linker/image overflow as a build error instead of a skip.
    pub overflow_as_errors: bool,
    /// Raise immediately on a device fatal fault instead of waiting for the suite verdict.
    pub fault_strict: bool,
    pub fixtures: Vec<String>,
    pub enable_slow: bool,
    pub device_testing: bool,
    pub retry_failed: u32,
    pub extra_args: Vec<String>,
    pub jobs: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            build_tool: "west".to_string(),
            ledger_path: None,
            build_wait_timeout: Duration::from_secs(600),
            ledger_lock_timeout: Duration::from_secs(10),
            ledger_poll_interval: Duration::from_secs(1),
            fifo_timeout: Duration::from_secs(10),
            flash_timeout: Duration::from_secs(60),
            timeout_multiplier: 1.0,
            overflow_as_errors: false,
            fault_strict: false,
            fixtures: Vec::new(),
            enable_slow: false,
            device_testing: false,
            retry_failed: 0,
            extra_args: Vec::new(),
            jobs: 1,
        }
    }
}
