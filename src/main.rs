use anyhow::{Context, Result, bail};
use hiltestor::build::{BuildCoordinator, BuildLedger, CoordinatorOptions, WestBuilder};
use hiltestor::config::RunConfig;
use hiltestor::config::cli_args::CliArgs;
use hiltestor::discovery::{ScenarioFilter, discover_testsuites, load_and_filter};
use hiltestor::orchestrator::{Orchestrator, OrchestratorOptions, PlanStatus, Registry};
use hiltestor::platform::PlatformCatalog;
use hiltestor::resolver::{HostCapabilities, Resolver};
use hiltestor::scheduler::{self, RunSummary};
use log::{error, info};
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    let args = CliArgs::parse_args();
    env_logger::Builder::new()
        .filter_level(args.log_level())
        .parse_default_env()
        .init();

    match run(&args) {
        Ok(summary) => {
            if !args.quiet {
                for report in &summary.reports {
                    println!("{}: {}", report.name, report.outcome);
                }
            }
            println!("{}", summary.summary_line());
            if summary.has_failures() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

fn run(args: &CliArgs) -> Result<RunSummary> {
    let mut config = RunConfig::load(args.config.as_deref())
        .with_context(|| format!("Failed to load run configuration {:?}", args.config))?;
    config.apply_cli(args);
    let executor = &config.executor;

    if args.testsuite_root.is_empty() {
        bail!("at least one --testsuite-root is required");
    }

    let catalog = PlatformCatalog::load(&args.board_root).context("Failed to load platforms")?;
    let mut platforms = if args.platform.is_empty() {
        catalog.default_platforms()
    } else {
        catalog.select(&args.platform)?
    };
    if platforms.is_empty() {
        platforms = catalog.iter().collect();
    }
    if platforms.is_empty() {
        bail!("no platforms found under {:?}", args.board_root);
    }

    let filter = ScenarioFilter {
        names: args.scenario.clone(),
        tags: args.tag.clone(),
        exclude_tags: args.exclude_tag.clone(),
    };
    let mut files = Vec::new();
    for root in &args.testsuite_root {
        files.extend(discover_testsuites(root)?);
    }
    let scenarios = load_and_filter(&files, &filter);
    info!("{} scenarios on {} platforms", scenarios.len(), platforms.len());

    let registry = Registry::with_defaults();
    let resolver = Resolver {
        host: HostCapabilities::detect(),
        adapters: registry.adapter_kinds(),
        parsers: registry.parser_kinds(),
        fixtures: executor.fixtures.iter().cloned().collect(),
        enable_slow: executor.enable_slow,
        device_testing: executor.device_testing,
        attached: config.hardware.iter().map(|hw| hw.platform.clone()).collect(),
    };

    let ledger = BuildLedger::new(
        executor
            .ledger_path
            .clone()
            .unwrap_or_else(|| BuildLedger::default_path(&args.outdir)),
        executor.ledger_lock_timeout,
    );
    if args.clobber_ledger {
        ledger.clear_all()?;
    }
    let coordinator = BuildCoordinator::new(
        ledger,
        Arc::new(WestBuilder::new(&executor.build_tool)),
        CoordinatorOptions {
            wait_timeout: executor.build_wait_timeout,
            poll_interval: executor.ledger_poll_interval,
            overflow_as_errors: executor.overflow_as_errors,
        },
    );

    let options = OrchestratorOptions {
        outdir: args.outdir.clone(),
        extra_args: executor.extra_args.clone(),
        timeout_multiplier: executor.timeout_multiplier,
        retry_failed: executor.retry_failed,
        fault_strict: executor.fault_strict,
        build_tool: executor.build_tool.clone(),
        fifo_timeout: executor.fifo_timeout,
        flash_timeout: executor.flash_timeout,
    };
    let jobs = executor.jobs;
    let orchestrator =
        Orchestrator::new(registry, resolver, coordinator, config.hardware.clone(), options);

    let mut items = orchestrator.plan(&scenarios, &platforms)?;
    if args.build_only {
        for item in &mut items {
            if let PlanStatus::Runnable(_) = item.status {
                item.status = PlanStatus::BuildOnly("build only run".to_string());
            }
        }
    }

    Ok(scheduler::run_all(&orchestrator, items, jobs))
}
