use hiltestor::config::RunConfig;
use hiltestor::config::cli_args::CliArgs;
use hiltestor::config::platform_config::{PlatformDescriptor, PlatformType, Simulation};
use hiltestor::config::testsuite_config::{HarnessKind, scenarios_from_str};
use hiltestor::discovery::{ScenarioFilter, discover_testsuites, load_and_filter, matches_filter};
use hiltestor::error::ConfigurationError;
use hiltestor::platform::PlatformCatalog;
use hiltestor::testspec::TestSpecification;
use clap::Parser;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;
use test_log::test;

const TESTCASE: &str = r#"
common:
  tags: kernel
  arch_exclude: xtensa
  extra_args: CONFIG_ASSERT=y
  harness_config:
    type: one_line
tests:
  kernel.common:
    tags: [smoke]
    timeout: 30
  kernel.common.misra:
    extra_args:
      - CONFIG_MISRA_SANE=y
    harness: console
    harness_config:
      regex: "Hello"
"#;

#[test]
fn test_common_block_is_merged() {
    let scenarios = scenarios_from_str(TESTCASE, Path::new("tests/kernel/common")).unwrap();
    assert_eq!(scenarios.len(), 2);

    let common = &scenarios[0];
    assert_eq!(common.id, "kernel.common");
    assert!(common.config.tags.contains("kernel"));
    assert!(common.config.tags.contains("smoke"));
    assert!(common.config.arch_exclude.contains("xtensa"));
    assert_eq!(common.config.timeout, 30.0);
    assert_eq!(common.config.harness, HarnessKind::Test);

    let misra = &scenarios[1];
    assert_eq!(misra.config.extra_args, vec!["CONFIG_ASSERT=y", "CONFIG_MISRA_SANE=y"]);
    assert_eq!(misra.config.timeout, 60.0);
    assert_eq!(misra.config.harness, HarnessKind::Console);
    // nested maps merge key by key
    assert_eq!(misra.config.harness_config["type"].as_str(), Some("one_line"));
    assert_eq!(misra.config.harness_config["regex"].as_str(), Some("Hello"));
    assert_eq!(misra.source_dir, Path::new("tests/kernel/common"));
}

#[test]
fn test_quoted_extra_args_stay_whole() {
    let yaml = r#"
tests:
  sample.overlay:
    extra_args: OVERLAY_CONFIG="a.conf b.conf" CONFIG_FOO=y
"#;
    let scenarios = scenarios_from_str(yaml, Path::new(".")).unwrap();
    assert_eq!(
        scenarios[0].config.extra_args,
        vec!["OVERLAY_CONFIG=a.conf b.conf", "CONFIG_FOO=y"]
    );
}

#[test]
fn test_non_positive_timeout_is_rejected() {
    let yaml = "tests:\n  kernel.bad:\n    timeout: 0\n";
    let err = scenarios_from_str(yaml, Path::new(".")).unwrap_err();
    match err {
        ConfigurationError::InvalidScenario { scenario, message } => {
            assert_eq!(scenario, "kernel.bad");
            assert!(message.contains("timeout"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_platform_descriptor_from_yaml() {
    let yaml = r#"
identifier: qemu_cortex_m3
name: QEMU Emulation for Cortex-M3
type: qemu
simulation:
  - name: qemu
  - name: renode
    exec: renode
arch: arm
ram: 64
toolchain:
  - zephyr
  - gnuarmemb
supported: netif:serial-net
testing:
  default: true
  ignore_tags: [net, bluetooth]
  timeout_multiplier: 2
"#;
    let descriptor = PlatformDescriptor::from_yaml(yaml).unwrap();
    assert_eq!(descriptor.identifier, "qemu_cortex_m3");
    assert_eq!(descriptor.platform_type, PlatformType::Qemu);
    assert_eq!(descriptor.simulation, Simulation::Qemu);
    assert_eq!(descriptor.ram, 64);
    assert_eq!(descriptor.flash, 512);
    assert!(descriptor.toolchains.contains("gnuarmemb"));
    assert!(descriptor.ignore_tags.contains("bluetooth"));
    assert!(descriptor.default);
    assert_eq!(descriptor.timeout_multiplier, 2.0);
}

#[test]
fn test_board_without_testing_block_keeps_timeouts() {
    let descriptor = PlatformDescriptor::from_yaml("identifier: qemu_x86\narch: x86\ntype: qemu\n").unwrap();
    assert_eq!(descriptor.timeout_multiplier, 1.0);
    assert!(!descriptor.default);

    let scenarios = scenarios_from_str(TESTCASE, Path::new(".")).unwrap();
    let spec = TestSpecification::for_platform(&scenarios[0], &descriptor, 1.0);
    assert_eq!(spec.timeout_duration(), Duration::from_secs(30));
}

#[test]
fn test_unknown_harness_keeps_sibling_scenarios() {
    let yaml = "tests:\n  a.ok: {}\n  a.shell:\n    harness: shell\n  a.robot:\n    harness: robot\n";
    let scenarios = scenarios_from_str(yaml, Path::new(".")).unwrap();
    assert_eq!(scenarios.len(), 3);
    assert_eq!(scenarios[0].config.harness, HarnessKind::Test);
    assert_eq!(scenarios[1].config.harness, HarnessKind::Unsupported);
    assert_eq!(scenarios[2].config.harness, HarnessKind::Unsupported);
}

#[test]
fn test_timeout_multipliers_compose() {
    let scenarios = scenarios_from_str(TESTCASE, Path::new(".")).unwrap();
    let mut board = PlatformDescriptor::new("slow_board", "arm", PlatformType::Mcu);
    board.timeout_multiplier = 2.0;
    let spec = TestSpecification::for_platform(&scenarios[0], &board, 1.5);
    assert_eq!(spec.name, "slow_board/kernel.common");
    assert_eq!(spec.timeout_duration(), Duration::from_secs(90));
}

#[test]
fn test_catalog_rejects_duplicates() {
    let dir = tempdir().unwrap();
    let board = "identifier: frdm_k64f\narch: arm\n";
    fs::create_dir_all(dir.path().join("nxp/a")).unwrap();
    fs::create_dir_all(dir.path().join("nxp/b")).unwrap();
    fs::write(dir.path().join("nxp/a/frdm_k64f.yaml"), board).unwrap();
    fs::write(dir.path().join("nxp/b/frdm_k64f.yaml"), board).unwrap();

    let err = PlatformCatalog::load(&[dir.path()]).unwrap_err();
    assert!(matches!(err, ConfigurationError::DuplicatePlatform { ref identifier, .. } if identifier == "frdm_k64f"));
}

#[test]
fn test_catalog_load_and_select() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("qemu_x86.yaml"),
        "identifier: qemu_x86\narch: x86\ntype: qemu\nsimulation: qemu\ntesting:\n  default: true\n",
    )
    .unwrap();
    fs::write(dir.path().join("nrf52840dk.yaml"), "identifier: nrf52840dk\narch: arm\n").unwrap();
    // board metadata without an identifier is ignored
    fs::write(dir.path().join("board.yaml"), "board:\n  name: nrf52840dk\n").unwrap();

    let catalog = PlatformCatalog::load(&[dir.path()]).unwrap();
    assert_eq!(catalog.len(), 2);
    assert_eq!(catalog.get("nrf52840dk").map(|p| p.arch.as_str()), Some("arm"));
    assert!(catalog.get("board").is_none());
    let defaults: Vec<_> = catalog.default_platforms().iter().map(|p| p.identifier.clone()).collect();
    assert_eq!(defaults, vec!["qemu_x86"]);
    assert!(catalog.select(&["nrf52840dk".to_string()]).is_ok());
    assert!(matches!(
        catalog.select(&["nope".to_string()]),
        Err(ConfigurationError::UnknownPlatform(_))
    ));
}

#[test]
fn test_discovery_and_filters() {
    let dir = tempdir().unwrap();
    let suite = dir.path().join("tests/kernel/common");
    fs::create_dir_all(&suite).unwrap();
    fs::write(suite.join("testcase.yaml"), TESTCASE).unwrap();
    let broken = dir.path().join("tests/broken");
    fs::create_dir_all(&broken).unwrap();
    fs::write(broken.join("testcase.yaml"), "tests: [unclosed").unwrap();

    let files = discover_testsuites(dir.path()).unwrap();
    assert_eq!(files.len(), 2);

    let all = load_and_filter(&files, &ScenarioFilter::default());
    assert_eq!(all.len(), 2);

    let filter = ScenarioFilter {
        tags: vec!["smoke".to_string()],
        ..Default::default()
    };
    let smoke = load_and_filter(&files, &filter);
    assert_eq!(smoke.len(), 1);
    assert_eq!(smoke[0].id, "kernel.common");

    let exclude = ScenarioFilter {
        exclude_tags: vec!["kernel".to_string()],
        ..Default::default()
    };
    assert!(!matches_filter(&all[0], &exclude));
}

#[test]
fn test_run_config_toml() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("hiltestor.toml");
    fs::write(
        &path,
        r#"
[executor]
build_tool = "/opt/west"
build_wait_timeout = "5m"
fifo_timeout = "30s"
fixtures = ["gpio_loopback"]
jobs = 4

[[hardware]]
platform = "frdm_k64f"
serial = "/dev/ttyACM0"
runner = "pyocd"
id = "0240000026334e45"
"#,
    )
    .unwrap();

    let config = RunConfig::load(Some(&path)).unwrap();
    assert_eq!(config.executor.build_tool, "/opt/west");
    assert_eq!(config.executor.build_wait_timeout, Duration::from_secs(300));
    assert_eq!(config.executor.fifo_timeout, Duration::from_secs(30));
    assert_eq!(config.executor.flash_timeout, Duration::from_secs(60));
    assert_eq!(config.executor.jobs, 4);

    let hw = config.hardware_for("frdm_k64f").unwrap();
    assert_eq!(hw.baud_rate, 115200);
    assert_eq!(hw.runner.as_deref(), Some("pyocd"));
    assert!(config.hardware_for("qemu_x86").is_none());
}

#[test]
fn test_cli_overrides_config() {
    let mut config = RunConfig::load(None).unwrap();
    let args = CliArgs::parse_from([
        "hiltestor",
        "-T",
        "tests",
        "-j",
        "8",
        "--fixture",
        "uart_loopback",
        "--fault-strict",
        "--timeout-multiplier",
        "2.5",
    ]);
    config.apply_cli(&args);
    assert_eq!(config.executor.jobs, 8);
    assert_eq!(config.executor.timeout_multiplier, 2.5);
    assert!(config.executor.fault_strict);
    assert!(!config.executor.overflow_as_errors);
    assert_eq!(config.executor.fixtures, vec!["uart_loopback"]);
}
