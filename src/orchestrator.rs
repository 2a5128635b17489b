//! Ties resolver, build coordinator, device adapters and log parsers together.
//!
//! `plan` decides what happens to every (scenario, platform) pair; `execute` carries one
//! planned item through build, flash, run and parse.

use crate::build::{BuildCoordinator, BuildOutcome, BuildRequest};
use crate::config::hardware_config::HardwareConfig;
use crate::config::platform_config::PlatformDescriptor;
use crate::config::testsuite_config::{HarnessKind, Scenario};
use crate::device::{AdapterConstructor, AdapterKind, DeviceAdapter, DeviceFactory, DeviceOptions};
use crate::error::{ConfigurationError, DeviceError, HarnessError};
use crate::harness::{
    Harness, HarnessOptions, LogParser, ParserConstructor, ParserFactory, SubTestResult, SuiteState,
};
use crate::resolver::Resolver;
use crate::testspec::TestSpecification;
use log::{debug, error, info, warn};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Constructors available to this run, keyed by capability.
#[derive(Clone, Default)]
pub struct Registry {
    adapters: HashMap<AdapterKind, AdapterConstructor>,
    parsers: HashMap<HarnessKind, ParserConstructor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in adapter and parser.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for (kind, ctor) in DeviceFactory::constructors() {
            registry.register_adapter(kind, ctor);
        }
        for (kind, ctor) in ParserFactory::constructors() {
            registry.register_parser(kind, ctor);
        }
        registry
    }

    pub fn register_adapter(&mut self, kind: AdapterKind, ctor: AdapterConstructor) -> &mut Self {
        self.adapters.insert(kind, ctor);
        self
    }

    pub fn register_parser(&mut self, kind: HarnessKind, ctor: ParserConstructor) -> &mut Self {
        self.parsers.insert(kind, ctor);
        self
    }

    pub fn adapter_kinds(&self) -> BTreeSet<AdapterKind> {
        self.adapters.keys().copied().collect()
    }

    pub fn parser_kinds(&self) -> BTreeSet<HarnessKind> {
        self.parsers.keys().copied().collect()
    }

    pub fn create_adapter(
        &self,
        kind: AdapterKind,
        options: &DeviceOptions,
    ) -> Result<Box<dyn DeviceAdapter>, DeviceError> {
        let ctor = self
            .adapters
            .get(&kind)
            .ok_or_else(|| DeviceError::Run(format!("no {kind:?} adapter registered")))?;
        ctor(options)
    }

    pub fn create_parser(
        &self,
        spec: &TestSpecification,
        options: &HarnessOptions,
    ) -> Result<Box<dyn LogParser>, HarnessError> {
        let ctor = self.parsers.get(&spec.harness).ok_or_else(|| {
            HarnessError::Config(format!("no parser registered for {}", spec.harness.as_str()))
        })?;
        ctor(spec, options)
    }
}

/// What `plan` decided for one pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanStatus {
    /// Filtered out; never built.
    Skipped(String),
    /// Built, then executed with this adapter.
    Runnable(AdapterKind),
    /// Built but not executed on this host.
    BuildOnly(String),
}

#[derive(Debug, Clone)]
pub struct TestItem {
    pub spec: TestSpecification,
    pub platform: PlatformDescriptor,
    pub status: PlanStatus,
}

impl TestItem {
    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

/// Final result of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed(String),
    Error(String),
    Skipped(String),
    /// Built and intentionally not executed.
    Built,
}

impl TestOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, TestOutcome::Failed(_) | TestOutcome::Error(_))
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Passed => f.write_str("PASSED"),
            TestOutcome::Failed(reason) => write!(f, "FAILED ({reason})"),
            TestOutcome::Error(message) => write!(f, "ERROR ({message})"),
            TestOutcome::Skipped(reason) => write!(f, "SKIPPED ({reason})"),
            TestOutcome::Built => f.write_str("BUILT"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub outdir: PathBuf,
    /// Run-wide extra build arguments.
    pub extra_args: Vec<String>,
    pub timeout_multiplier: f64,
    pub retry_failed: u32,
    pub fault_strict: bool,
    pub build_tool: String,
    pub fifo_timeout: Duration,
    pub flash_timeout: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            outdir: PathBuf::from("hiltestor-out"),
            extra_args: Vec::new(),
            timeout_multiplier: 1.0,
            retry_failed: 0,
            fault_strict: false,
            build_tool: "west".to_string(),
            fifo_timeout: Duration::from_secs(10),
            flash_timeout: Duration::from_secs(60),
        }
    }
}

/// Receives sub-test results as they are parsed.
pub type ResultSink<'a> = dyn FnMut(&TestItem, &SubTestResult) + 'a;

pub struct Orchestrator {
    registry: Registry,
    resolver: Resolver,
    coordinator: BuildCoordinator,
    hardware: Vec<HardwareConfig>,
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(
        registry: Registry,
        resolver: Resolver,
        coordinator: BuildCoordinator,
        hardware: Vec<HardwareConfig>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            registry,
            resolver,
            coordinator,
            hardware,
            options,
        }
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Expands scenarios over platforms and decides the fate of every pair.
    pub fn plan(
        &self,
        scenarios: &[Scenario],
        platforms: &[&PlatformDescriptor],
    ) -> Result<Vec<TestItem>, ConfigurationError> {
        let mut items = Vec::with_capacity(scenarios.len() * platforms.len());
        for scenario in scenarios {
            for platform in platforms {
                let mut spec =
                    TestSpecification::for_platform(scenario, platform, self.options.timeout_multiplier);
                let verdict = self.resolver.should_skip(&spec, platform)?;
                let status = match verdict.reason() {
                    Some(reason) => PlanStatus::Skipped(reason),
                    None => {
                        let runnability = self.resolver.is_runnable(&spec, platform);
                        spec.runnable = runnability.runnable();
                        match (runnability.adapter, runnability.reason) {
                            (Some(kind), None) => PlanStatus::Runnable(kind),
                            (_, Some(reason)) => PlanStatus::BuildOnly(reason),
                            (None, None) => PlanStatus::BuildOnly("no execution path".to_string()),
                        }
                    }
                };
                debug!("Planned {}: {status:?}", spec.name);
                items.push(TestItem {
                    spec,
                    platform: (*platform).clone(),
                    status,
                });
            }
        }
        Ok(items)
    }

    /// Builds and, if planned, runs one item; failed runs are retried.
    pub fn execute(&self, item: &TestItem, sink: &mut ResultSink<'_>) -> TestOutcome {
        let kind = match &item.status {
            PlanStatus::Skipped(reason) => return TestOutcome::Skipped(reason.clone()),
            PlanStatus::Runnable(kind) => Some(*kind),
            PlanStatus::BuildOnly(_) => None,
        };

        let request = BuildRequest::for_spec(
            &item.spec,
            &item.platform,
            &self.options.outdir,
            &self.options.extra_args,
        );
        match self.coordinator.build(&request) {
            Ok(BuildOutcome::Overflow(reason)) => return TestOutcome::Skipped(reason),
            Ok(outcome) => debug!("{}: {outcome:?}", item.name()),
            Err(e) => {
                error!("{}: {e}", item.name());
                return TestOutcome::Error(e.to_string());
            }
        }

        let Some(kind) = kind else {
            return TestOutcome::Built;
        };

        let mut attempt = 0;
        loop {
            let outcome = self.run_once(item, kind, &request.build_dir, sink);
            if matches!(outcome, TestOutcome::Failed(_)) && attempt < self.options.retry_failed {
                attempt += 1;
                warn!(
                    "{} {outcome}, retry {attempt}/{}",
                    item.name(),
                    self.options.retry_failed
                );
                continue;
            }
            return outcome;
        }
    }

    fn device_options(&self, item: &TestItem) -> DeviceOptions {
        DeviceOptions {
            build_tool: self.options.build_tool.clone(),
            platform_type: item.platform.platform_type,
            fifo_timeout: self.options.fifo_timeout,
            flash_timeout: self.options.flash_timeout,
            hardware: self
                .hardware
                .iter()
                .find(|hw| hw.platform == item.platform.identifier)
                .cloned(),
        }
    }

    fn run_once(
        &self,
        item: &TestItem,
        kind: AdapterKind,
        build_dir: &Path,
        sink: &mut ResultSink<'_>,
    ) -> TestOutcome {
        let mut device = match self.registry.create_adapter(kind, &self.device_options(item)) {
            Ok(device) => device,
            Err(e) => return TestOutcome::Error(e.to_string()),
        };
        let parser = match self.registry.create_parser(
            &item.spec,
            &HarnessOptions {
                fault_strict: self.options.fault_strict,
            },
        ) {
            Ok(parser) => parser,
            Err(e) => return TestOutcome::Error(e.to_string()),
        };
        let mut harness = Harness::new(parser);

        if let Err(e) = device.connect() {
            return TestOutcome::Error(e.to_string());
        }
        let timeout = item.spec.timeout_duration();
        info!("Running {} ({kind:?}, timeout {timeout:?})", item.name());
        let started = Instant::now();
        if let Err(e) = device.flash(build_dir, timeout) {
            if let Err(e) = device.disconnect() {
                warn!("{}: {e}", item.name());
            }
            return TestOutcome::Error(e.to_string());
        }

        let mut fatal = None;
        match harness.parse(device.output(), timeout) {
            Ok(parse) => {
                for result in parse {
                    match result {
                        Ok(result) => sink(item, &result),
                        Err(e) => fatal = Some(e),
                    }
                }
            }
            Err(e) => fatal = Some(e),
        }

        let timed_out = device.timed_out() || started.elapsed() >= timeout;
        let run_error = device.stop().err();
        if let Err(e) = device.disconnect() {
            warn!("{}: {e}", item.name());
        }
        for record in harness.records() {
            info!("{} record: {record:?}", item.name());
        }

        if let Some(e) = fatal {
            return TestOutcome::Failed(e.to_string());
        }
        match (harness.state(), run_error) {
            (SuiteState::Passed, None) => TestOutcome::Passed,
            (SuiteState::Passed, Some(e)) => TestOutcome::Error(e.to_string()),
            (SuiteState::Failed, _) if harness.decided_in_stream() || !timed_out => {
                TestOutcome::Failed(harness.reason().unwrap_or_else(|| "suite failed".to_string()))
            }
            (_, _) if timed_out => TestOutcome::Failed("timeout".to_string()),
            (_, Some(e)) => TestOutcome::Error(e.to_string()),
            (_, None) => TestOutcome::Failed("no suite verdict in device output".to_string()),
        }
    }
}
