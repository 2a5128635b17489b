//! Error taxonomy for the build/run/parse pipeline.
//!
//! Ordinary (test, platform) mismatches are never errors; they are returned as skip
//! reasons by the resolver. Timeouts on a running device are recorded as a flag on the
//! adapter and never appear here.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Malformed platform or test specification data.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("duplicate platform identifier `{identifier}` (defined in {first} and {second})")]
    DuplicatePlatform {
        identifier: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        error: io::Error,
    },

    #[error("failed to parse {path}")]
    Parse {
        path: PathBuf,
        #[source]
        error: serde_yaml::Error,
    },

    #[error("invalid scenario `{scenario}`: {message}")]
    InvalidScenario { scenario: String, message: String },

    #[error("unknown platform `{0}`")]
    UnknownPlatform(String),
}

/// Failure to produce a build directory.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to launch build tool `{program}`")]
    Launch {
        program: String,
        #[source]
        error: io::Error,
    },

    #[error("build of {build_dir} failed with exit code {code:?}")]
    ExitCode { build_dir: String, code: Option<i32> },

    #[error("{region} overflow while building {build_dir}")]
    MemoryOverflow { build_dir: String, region: String },

    #[error("timed out after {timeout:?} waiting for the build ledger lock at {path}")]
    LockTimeout { path: PathBuf, timeout: Duration },

    #[error("timed out after {timeout:?} waiting for another worker to build {build_dir}")]
    WaitTimeout { build_dir: String, timeout: Duration },

    #[error("build of {build_dir} already failed in this run")]
    PreviouslyFailed { build_dir: String },

    #[error("build ledger I/O error at {path}")]
    LedgerIo {
        path: PathBuf,
        #[source]
        error: io::Error,
    },

    #[error("build ledger at {path} is not valid JSON")]
    LedgerFormat {
        path: PathBuf,
        #[source]
        error: serde_json::Error,
    },

    #[error("failed to prepare build directory {path}")]
    Prepare {
        path: PathBuf,
        #[source]
        error: io::Error,
    },
}

impl BuildError {
    /// Returns true for the overflow category, which callers may treat as advisory.
    pub fn is_memory_overflow(&self) -> bool {
        matches!(self, BuildError::MemoryOverflow { .. })
    }
}

/// Failures while flashing, starting or talking to a device.
#[derive(Debug, Error, Clone)]
pub enum DeviceError {
    #[error("flashing failed: {0}")]
    Flash(String),

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("run failed: {0}")]
    Run(String),

    #[error("device failed to start: {0}")]
    Startup(String),

    #[error("serial port error: {0}")]
    Serial(String),
}

/// Failures raised while parsing device output.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("fatal error reported by device: {line}")]
    Fatal { line: String },

    #[error("invalid harness pattern `{pattern}`")]
    InvalidPattern {
        pattern: String,
        #[source]
        error: regex::Error,
    },

    #[error("harness configuration error: {0}")]
    Config(String),

    #[error("device output was already parsed for this session")]
    AlreadyParsed,
}
