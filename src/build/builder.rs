//! Invocation of the external build tool.

use crate::build::args;
use crate::config::platform_config::PlatformDescriptor;
use crate::error::BuildError;
use crate::testspec::TestSpecification;
use crate::utils::sanitize_path_component;
use log::{debug, error, info};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

/// Directory inside a build directory where hiltestor keeps its own generated files.
pub const GENERATED_DIR: &str = "hiltestor";
const EXTRA_CONF_FILE: &str = "testsuite_extra.conf";
const BUILD_LOG_FILE: &str = "build.log";

static REGION_OVERFLOW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"region `(FLASH|ROM|RAM|ICCM|DCCM|SRAM|dram\d_\d_seg)' overflowed by")
        .expect("static regex is valid")
});
static IMGTOOL_OVERFLOW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Error: Image size \(.*\) \+ trailer \(.*\) exceeds requested size")
        .expect("static regex is valid")
});

/// Everything a builder needs to produce one build directory.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildRequest {
    pub platform: String,
    pub arch: String,
    pub source_dir: PathBuf,
    pub build_dir: PathBuf,
    pub extra_args: Vec<String>,
    pub extra_configs: Vec<String>,
    /// Run-wide arguments appended after the scenario's own.
    pub global_args: Vec<String>,
}

impl BuildRequest {
    pub fn for_spec(
        spec: &TestSpecification,
        platform: &PlatformDescriptor,
        outdir: &Path,
        global_args: &[String],
    ) -> Self {
        Self {
            platform: platform.identifier.clone(),
            arch: platform.arch.clone(),
            source_dir: spec.source_dir.clone(),
            build_dir: outdir
                .join(sanitize_path_component(&platform.identifier))
                .join(&spec.scenario),
            extra_args: spec.extra_args.clone(),
            extra_configs: spec.extra_configs.clone(),
            global_args: global_args.to_vec(),
        }
    }

    /// Ledger key for this build.
    pub fn key(&self) -> String {
        self.build_dir.display().to_string()
    }
}

/// Produces a build directory. Implementations block until the build finishes.
pub trait Builder: Send + Sync {
    fn build(&self, request: &BuildRequest) -> Result<(), BuildError>;
}

/// Scans build output for linker or image-tool overflow messages.
///
/// Returns the overflowing region name, or `"image"` for an imgtool size overflow.
pub fn detect_overflow(output: &str) -> Option<String> {
    if let Some(caps) = REGION_OVERFLOW_RE.captures(output) {
        return Some(caps[1].to_string());
    }
    IMGTOOL_OVERFLOW_RE
        .is_match(output)
        .then(|| "image".to_string())
}

/// Drives a west-compatible meta-tool as a blocking subprocess.
#[derive(Debug, Clone)]
pub struct WestBuilder {
    program: String,
}

impl WestBuilder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Command line for one build, without running it.
    ///
    /// Writes the extra Kconfig fragment into the build directory when the scenario has one.
    pub fn command_args(&self, request: &BuildRequest) -> Result<Vec<String>, BuildError> {
        let overlay = self.write_extra_config(request)?;
        let cmake = args::cmake_args(
            &[request.extra_args.as_slice(), request.global_args.as_slice()],
            &request.arch,
            &request.platform,
            overlay.as_deref(),
        );

        let mut cmd = vec![
            "build".to_string(),
            "--pristine".to_string(),
            "always".to_string(),
            "--board".to_string(),
            request.platform.clone(),
            request.source_dir.display().to_string(),
            "--build-dir".to_string(),
            request.build_dir.display().to_string(),
        ];
        if !cmake.is_empty() {
            cmd.push("--".to_string());
            cmd.extend(cmake);
        }
        Ok(cmd)
    }

    fn write_extra_config(&self, request: &BuildRequest) -> Result<Option<String>, BuildError> {
        let Some(fragment) =
            args::extra_config_fragment(&request.extra_configs, &request.arch, &request.platform)
        else {
            return Ok(None);
        };
        let dir = request.build_dir.join(GENERATED_DIR);
        fs::create_dir_all(&dir).map_err(|error| BuildError::Prepare {
            path: dir.clone(),
            error,
        })?;
        let path = dir.join(EXTRA_CONF_FILE);
        fs::write(&path, fragment).map_err(|error| BuildError::Prepare {
            path: path.clone(),
            error,
        })?;
        Ok(Some(path.display().to_string()))
    }
}

impl Builder for WestBuilder {
    fn build(&self, request: &BuildRequest) -> Result<(), BuildError> {
        fs::create_dir_all(&request.build_dir).map_err(|error| BuildError::Prepare {
            path: request.build_dir.clone(),
            error,
        })?;
        let args = self.command_args(request)?;
        info!("Building {}: {} {}", request.key(), self.program, args.join(" "));

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|error| BuildError::Launch {
                program: self.program.clone(),
                error,
            })?;

        let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stderr));
        let log_path = request.build_dir.join(BUILD_LOG_FILE);
        if let Err(e) = fs::write(&log_path, &log) {
            error!("Failed to write {}: {e}", log_path.display());
        }

        if output.status.success() {
            debug!("Build of {} finished", request.key());
            return Ok(());
        }

        if let Some(region) = detect_overflow(&log) {
            return Err(BuildError::MemoryOverflow {
                build_dir: request.key(),
                region,
            });
        }
        Err(BuildError::ExitCode {
            build_dir: request.key(),
            code: output.status.code(),
        })
    }
}
