//! Per-(scenario, platform) test specification.

use crate::config::platform_config::PlatformDescriptor;
use crate::config::testsuite_config::{HarnessKind, Scenario};
use crate::utils::instance_name;
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

/// One embedded test scenario bound to one target platform.
///
/// Built once at collection time. Only `runnable` and `retries` change afterwards.
#[derive(Debug, Clone)]
pub struct TestSpecification {
    /// `<platform>/<scenario>`.
    pub name: String,
    pub scenario: String,
    pub source_dir: PathBuf,
    pub platform: String,
    /// Run timeout in seconds, platform and run multipliers applied.
    pub timeout: f64,
    pub tags: BTreeSet<String>,
    pub arch_allow: BTreeSet<String>,
    pub arch_exclude: BTreeSet<String>,
    pub platform_allow: BTreeSet<String>,
    pub platform_exclude: BTreeSet<String>,
    pub platform_type: BTreeSet<String>,
    pub toolchain_allow: BTreeSet<String>,
    pub toolchain_exclude: BTreeSet<String>,
    pub depends_on: BTreeSet<String>,
    pub min_ram: u64,
    pub min_flash: u64,
    pub harness: HarnessKind,
    pub harness_config: BTreeMap<String, Value>,
    pub build_only: bool,
    pub slow: bool,
    pub skip: bool,
    pub extra_args: Vec<String>,
    pub extra_configs: Vec<String>,
    pub runnable: bool,
    pub retries: u32,
}

impl TestSpecification {
    pub fn for_platform(
        scenario: &Scenario,
        platform: &PlatformDescriptor,
        timeout_multiplier: f64,
    ) -> Self {
        let cfg = &scenario.config;
        Self {
            name: instance_name(&platform.identifier, &scenario.id),
            scenario: scenario.id.clone(),
            source_dir: scenario.source_dir.clone(),
            platform: platform.identifier.clone(),
            timeout: cfg.timeout * platform.timeout_multiplier * timeout_multiplier,
            tags: cfg.tags.clone(),
            arch_allow: cfg.arch_allow.clone(),
            arch_exclude: cfg.arch_exclude.clone(),
            platform_allow: cfg.platform_allow.clone(),
            platform_exclude: cfg.platform_exclude.clone(),
            platform_type: cfg.platform_type.clone(),
            toolchain_allow: cfg.toolchain_allow.clone(),
            toolchain_exclude: cfg.toolchain_exclude.clone(),
            depends_on: cfg.depends_on.clone(),
            min_ram: cfg.min_ram,
            min_flash: cfg.min_flash,
            harness: cfg.harness,
            harness_config: cfg.harness_config.clone(),
            build_only: cfg.build_only,
            slow: cfg.slow,
            skip: cfg.skip,
            extra_args: cfg.extra_args.clone(),
            extra_configs: cfg.extra_configs.clone(),
            runnable: false,
            retries: 0,
        }
    }

    /// Bare specification with everything unconstrained.
    pub fn new(scenario: &str, platform: &str) -> Self {
        Self {
            name: instance_name(platform, scenario),
            scenario: scenario.to_string(),
            source_dir: PathBuf::new(),
            platform: platform.to_string(),
            timeout: 60.0,
            tags: BTreeSet::new(),
            arch_allow: BTreeSet::new(),
            arch_exclude: BTreeSet::new(),
            platform_allow: BTreeSet::new(),
            platform_exclude: BTreeSet::new(),
            platform_type: BTreeSet::new(),
            toolchain_allow: BTreeSet::new(),
            toolchain_exclude: BTreeSet::new(),
            depends_on: BTreeSet::new(),
            min_ram: 0,
            min_flash: 0,
            harness: HarnessKind::default(),
            harness_config: BTreeMap::new(),
            build_only: false,
            slow: false,
            skip: false,
            extra_args: Vec::new(),
            extra_configs: Vec::new(),
            runnable: false,
            retries: 0,
        }
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.timeout.max(0.0))
    }

    /// Fixture named in `harness_config.fixture`, if any.
    pub fn fixture(&self) -> Option<&str> {
        self.harness_config.get("fixture").and_then(Value::as_str)
    }
}
