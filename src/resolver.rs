//! Decides which (test, platform) pairs are built and which of those are executed.
//!
//! `should_skip` filters pairs out of the run entirely; `is_runnable` only decides
//! whether a pair that is built also gets flashed and executed on this host.

use crate::config::platform_config::{PlatformDescriptor, Simulation};
use crate::config::testsuite_config::HarnessKind;
use crate::device::AdapterKind;
use crate::error::ConfigurationError;
use crate::testspec::TestSpecification;
use log::{debug, info};
use std::collections::BTreeSet;
use std::fmt::Display;

/// Why a pair is filtered out. Empty means the pair is kept.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SkipVerdict {
    pub reasons: Vec<String>,
}

impl SkipVerdict {
    pub fn skip(&self) -> bool {
        !self.reasons.is_empty()
    }

    /// All fired predicates joined into one line for reports.
    pub fn reason(&self) -> Option<String> {
        self.skip().then(|| self.reasons.join("; "))
    }
}

/// Checks a specification for contradictions that do not depend on any platform.
pub fn validate(spec: &TestSpecification) -> Result<(), ConfigurationError> {
    let pairs = [
        ("arch_allow", &spec.arch_allow, "arch_exclude", &spec.arch_exclude),
        ("platform_allow", &spec.platform_allow, "platform_exclude", &spec.platform_exclude),
        ("toolchain_allow", &spec.toolchain_allow, "toolchain_exclude", &spec.toolchain_exclude),
    ];
    for (allow_name, allow, exclude_name, exclude) in pairs {
        if let Some(both) = allow.intersection(exclude).next() {
            return Err(ConfigurationError::InvalidScenario {
                scenario: spec.scenario.clone(),
                message: format!("`{both}` is listed in both {allow_name} and {exclude_name}"),
            });
        }
    }
    if !spec.timeout.is_finite() || spec.timeout <= 0.0 {
        return Err(ConfigurationError::InvalidScenario {
            scenario: spec.scenario.clone(),
            message: format!("timeout must be positive, got {}", spec.timeout),
        });
    }
    Ok(())
}

/// Evaluates every filter predicate for one pair. Pure apart from logging.
pub fn should_skip(
    spec: &TestSpecification,
    platform: &PlatformDescriptor,
) -> Result<SkipVerdict, ConfigurationError> {
    validate(spec)?;

    let mut reasons = Vec::new();
    let mut fire = |reason: String| {
        debug!("{} on {}: {reason}", spec.scenario, platform.identifier);
        reasons.push(reason);
    };

    if spec.skip {
        fire("scenario is marked skip".to_string());
    }

    if !spec.arch_allow.is_empty() && !spec.arch_allow.contains(&platform.arch) {
        fire(format!("architecture {} not in arch_allow", platform.arch));
    }
    if spec.arch_exclude.contains(&platform.arch) {
        fire(format!("architecture {} in arch_exclude", platform.arch));
    }

    if !spec.platform_allow.is_empty() && !spec.platform_allow.contains(&platform.identifier) {
        fire("platform not in platform_allow".to_string());
    }
    if spec.platform_exclude.contains(&platform.identifier) {
        fire("platform in platform_exclude".to_string());
    }

    if !spec.platform_type.is_empty() && !spec.platform_type.contains(platform.platform_type.as_str())
    {
        fire(format!("platform type {} not in platform_type", platform.platform_type));
    }

    if platform.ram < spec.min_ram {
        fire(format!("not enough RAM ({} KB < {} KB)", platform.ram, spec.min_ram));
    }
    if platform.flash < spec.min_flash {
        fire(format!("not enough FLASH ({} KB < {} KB)", platform.flash, spec.min_flash));
    }

    if !platform.toolchains.is_empty() {
        if !spec.toolchain_allow.is_empty()
            && spec.toolchain_allow.is_disjoint(&platform.toolchains)
        {
            fire(format!(
                "no supported toolchain in toolchain_allow ({})",
                join(&spec.toolchain_allow)
            ));
        }
        if !spec.toolchain_exclude.is_disjoint(&platform.toolchains) {
            fire(format!(
                "toolchain excluded ({})",
                join(spec.toolchain_exclude.intersection(&platform.toolchains))
            ));
        }
    }

    if !platform.only_tags.is_empty() && spec.tags.is_disjoint(&platform.only_tags) {
        fire("scenario tags not in platform only_tags".to_string());
    }
    if !spec.tags.is_disjoint(&platform.ignore_tags) {
        fire(format!(
            "excluded tags per platform ({})",
            join(spec.tags.intersection(&platform.ignore_tags))
        ));
    }

    if !spec.depends_on.is_subset(&platform.supported) {
        fire(format!(
            "platform lacks required features ({})",
            join(spec.depends_on.difference(&platform.supported))
        ));
    }

    if spec.harness.is_pass_through() {
        fire(format!("harness {} is executed by the outer runner", spec.harness.as_str()));
    }

    Ok(SkipVerdict { reasons })
}

fn join<I, T>(items: I) -> String
where
    I: IntoIterator<Item = T>,
    T: Display,
{
    items
        .into_iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Operating system family of the machine driving the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    Unix,
    Windows,
}

/// How simulator executables are located.
#[derive(Debug, Clone)]
pub enum ExecLookup {
    /// Search `PATH`.
    Path,
    /// Fixed set of available executables.
    Fixed(BTreeSet<String>),
}

impl ExecLookup {
    fn available(&self, exec: &str) -> bool {
        match self {
            ExecLookup::Path => which::which(exec).is_ok(),
            ExecLookup::Fixed(set) => set.contains(exec),
        }
    }
}

/// What the host running the tests can do.
#[derive(Debug, Clone)]
pub struct HostCapabilities {
    pub os: HostOs,
    /// `QEMU_BIN_PATH` is set; required for QEMU on Windows hosts.
    pub qemu_bin_path: bool,
    pub exec_lookup: ExecLookup,
}

impl HostCapabilities {
    pub fn detect() -> Self {
        Self {
            os: if cfg!(windows) { HostOs::Windows } else { HostOs::Unix },
            qemu_bin_path: std::env::var_os("QEMU_BIN_PATH").is_some(),
            exec_lookup: ExecLookup::Path,
        }
    }
}

/// Result of [`Resolver::is_runnable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Runnability {
    pub adapter: Option<AdapterKind>,
    /// Set when the pair is built but not executed.
    pub reason: Option<String>,
}

impl Runnability {
    pub fn runnable(&self) -> bool {
        self.reason.is_none()
    }
}

/// Host- and run-level facts used to decide whether a built image gets executed.
#[derive(Debug, Clone)]
pub struct Resolver {
    pub host: HostCapabilities,
    /// Adapter kinds with a registered constructor.
    pub adapters: BTreeSet<AdapterKind>,
    /// Harness kinds with a registered parser.
    pub parsers: BTreeSet<HarnessKind>,
    pub fixtures: BTreeSet<String>,
    pub enable_slow: bool,
    pub device_testing: bool,
    /// Platforms with a board attached to this host.
    pub attached: BTreeSet<String>,
}

impl Resolver {
    pub fn should_skip(
        &self,
        spec: &TestSpecification,
        platform: &PlatformDescriptor,
    ) -> Result<SkipVerdict, ConfigurationError> {
        should_skip(spec, platform)
    }

    pub fn is_runnable(
        &self,
        spec: &TestSpecification,
        platform: &PlatformDescriptor,
    ) -> Runnability {
        let adapter = AdapterKind::select(
            platform,
            self.device_testing && self.attached.contains(&platform.identifier),
        );
        let reason = self.not_runnable_reason(spec, platform, adapter);
        if let Some(reason) = &reason {
            info!("{} will be built but not run: {reason}", spec.name);
        }
        Runnability { adapter, reason }
    }

    fn not_runnable_reason(
        &self,
        spec: &TestSpecification,
        platform: &PlatformDescriptor,
        adapter: Option<AdapterKind>,
    ) -> Option<String> {
        if self.host.os == HostOs::Windows {
            match platform.simulation {
                Simulation::None => {}
                Simulation::Qemu if self.host.qemu_bin_path => {}
                Simulation::Qemu => return Some("QEMU_BIN_PATH is not set".to_string()),
                sim => return Some(format!("simulation {sim} is not supported on this host")),
            }
        }

        if spec.build_only {
            return Some("scenario is build only".to_string());
        }

        if spec.slow && !self.enable_slow {
            return Some("slow scenario and slow tests are disabled".to_string());
        }

        if !self.parsers.contains(&spec.harness) {
            return Some(format!("no parser for harness {}", spec.harness.as_str()));
        }

        match adapter {
            None => {
                return Some(format!(
                    "no execution path for {} platform with simulation {}",
                    platform.platform_type, platform.simulation
                ));
            }
            Some(kind) if !self.adapters.contains(&kind) => {
                return Some(format!("no {kind:?} adapter registered"));
            }
            Some(_) => {}
        }

        if platform.simulation.requires_exec() {
            if let Some(exec) = &platform.simulation_exec {
                if !self.host.exec_lookup.available(exec) {
                    return Some(format!("simulator executable {exec} not found"));
                }
            }
        }

        if let Some(fixture) = spec.fixture() {
            if !self.fixtures.contains(fixture) {
                return Some(format!("fixture {fixture} is not available"));
            }
        }

        None
    }
}
