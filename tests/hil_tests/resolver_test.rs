use super::{platform, qemu_platform};
use hiltestor::config::platform_config::{PlatformType, Simulation};
use hiltestor::config::testsuite_config::HarnessKind;
use hiltestor::device::AdapterKind;
use hiltestor::error::ConfigurationError;
use hiltestor::resolver::{ExecLookup, HostCapabilities, HostOs, Resolver, should_skip};
use hiltestor::testspec::TestSpecification;
use serde_yaml::Value;
use std::collections::BTreeSet;
use test_log::test;

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn resolver() -> Resolver {
    Resolver {
        host: HostCapabilities {
            os: HostOs::Unix,
            qemu_bin_path: false,
            exec_lookup: ExecLookup::Fixed(set(&["renode"])),
        },
        adapters: [AdapterKind::Hardware, AdapterKind::NativeProcess, AdapterKind::Emulator]
            .into_iter()
            .collect(),
        parsers: [HarnessKind::Test, HarnessKind::Ztest, HarnessKind::Console]
            .into_iter()
            .collect(),
        fixtures: BTreeSet::new(),
        enable_slow: false,
        device_testing: false,
        attached: BTreeSet::new(),
    }
}

#[test]
fn test_not_enough_ram() {
    let mut spec = TestSpecification::new("kernel.common", "small_board");
    spec.min_ram = 200;
    let mut board = platform("small_board", "arm");
    board.ram = 100;

    let verdict = should_skip(&spec, &board).unwrap();
    assert!(verdict.skip());
    assert!(verdict.reason().unwrap().contains("RAM"));
}

#[test]
fn test_arch_allow() {
    let mut spec = TestSpecification::new("arch.arm.irq", "board");
    spec.arch_allow = set(&["arm"]);

    assert!(should_skip(&spec, &platform("board", "x86")).unwrap().skip());
    assert!(!should_skip(&spec, &platform("board", "arm")).unwrap().skip());
}

#[test]
fn test_should_skip_is_pure() {
    let mut spec = TestSpecification::new("drivers.gpio", "board");
    spec.min_flash = 1024;
    spec.tags = set(&["gpio"]);
    let mut board = platform("board", "riscv");
    board.ignore_tags = set(&["gpio"]);

    let first = should_skip(&spec, &board).unwrap();
    let second = should_skip(&spec, &board).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.reasons.len(), 2);
}

#[test]
fn test_depends_on_and_toolchain() {
    let mut spec = TestSpecification::new("drivers.i2c", "board");
    spec.depends_on = set(&["i2c", "gpio"]);
    spec.toolchain_exclude = set(&["llvm"]);
    let mut board = platform("board", "arm");
    board.supported = set(&["gpio"]);
    board.toolchains = set(&["zephyr", "llvm"]);

    let verdict = should_skip(&spec, &board).unwrap();
    let reason = verdict.reason().unwrap();
    assert!(reason.contains("i2c"));
    assert!(reason.contains("toolchain excluded"));

    // toolchain filters only apply when the platform declares toolchains
    board.toolchains.clear();
    board.supported = set(&["gpio", "i2c"]);
    assert!(!should_skip(&spec, &board).unwrap().skip());
}

#[test]
fn test_pass_through_harness_is_skipped() {
    let mut spec = TestSpecification::new("sample.pytest", "board");
    spec.harness = HarnessKind::Pytest;
    let verdict = should_skip(&spec, &platform("board", "arm")).unwrap();
    assert!(verdict.reason().unwrap().contains("pytest"));
}

#[test]
fn test_contradictory_spec_is_configuration_error() {
    let mut spec = TestSpecification::new("broken", "board");
    spec.arch_allow = set(&["arm"]);
    spec.arch_exclude = set(&["arm"]);
    let err = should_skip(&spec, &platform("board", "arm")).unwrap_err();
    assert!(matches!(err, ConfigurationError::InvalidScenario { .. }));
}

#[test]
fn test_execution_paths() {
    let r = resolver();
    let spec = TestSpecification::new("kernel.common", "any");

    let qemu = qemu_platform("qemu_x86", "x86");
    let run = r.is_runnable(&spec, &qemu);
    assert!(run.runnable());
    assert_eq!(run.adapter, Some(AdapterKind::Emulator));

    let native = hiltestor::config::platform_config::PlatformDescriptor::new(
        "native_sim",
        "posix",
        PlatformType::Native,
    );
    assert_eq!(r.is_runnable(&spec, &native).adapter, Some(AdapterKind::NativeProcess));

    // a board without device testing is built only
    let board = platform("frdm_k64f", "arm");
    let run = r.is_runnable(&spec, &board);
    assert!(!run.runnable());
    assert_eq!(run.adapter, None);

    let mut r = r;
    r.device_testing = true;
    r.attached = set(&["frdm_k64f"]);
    let run = r.is_runnable(&spec, &board);
    assert!(run.runnable());
    assert_eq!(run.adapter, Some(AdapterKind::Hardware));
}

#[test]
fn test_not_runnable_reasons() {
    let r = resolver();
    let qemu = qemu_platform("qemu_x86", "x86");

    let mut spec = TestSpecification::new("kernel.build", "qemu_x86");
    spec.build_only = true;
    assert_eq!(
        r.is_runnable(&spec, &qemu).reason.as_deref(),
        Some("scenario is build only")
    );

    let mut spec = TestSpecification::new("kernel.slow", "qemu_x86");
    spec.slow = true;
    assert!(!r.is_runnable(&spec, &qemu).runnable());

    let mut spec = TestSpecification::new("kernel.none", "qemu_x86");
    spec.harness = HarnessKind::None;
    assert!(r.is_runnable(&spec, &qemu).reason.unwrap().contains("no parser"));

    let mut spec = TestSpecification::new("drivers.loopback", "qemu_x86");
    spec.harness_config
        .insert("fixture".to_string(), Value::from("gpio_loopback"));
    assert!(r.is_runnable(&spec, &qemu).reason.unwrap().contains("gpio_loopback"));
}

#[test]
fn test_simulator_executable_lookup() {
    let r = resolver();
    let spec = TestSpecification::new("kernel.common", "sim");
    let mut sim = platform("sim", "arm");
    sim.simulation = Simulation::Renode;
    sim.simulation_exec = Some("missing-sim".to_string());
    // renode has no adapter, so the pair is not runnable regardless of the executable
    assert!(!r.is_runnable(&spec, &sim).runnable());

    let mut r = r;
    r.host.os = HostOs::Windows;
    let qemu = qemu_platform("qemu_x86", "x86");
    assert!(r.is_runnable(&spec, &qemu).reason.unwrap().contains("QEMU_BIN_PATH"));
}

#[test]
fn test_platform_allow_and_exclude() {
    let mut spec = TestSpecification::new("boards.nrf", "nrf52840dk");
    spec.platform_allow = set(&["nrf52840dk", "nrf5340dk"]);
    assert!(!should_skip(&spec, &platform("nrf52840dk", "arm")).unwrap().skip());

    let verdict = should_skip(&spec, &platform("frdm_k64f", "arm")).unwrap();
    assert_eq!(verdict.reasons, vec!["platform not in platform_allow"]);

    let mut spec = TestSpecification::new("drivers.flash", "frdm_k64f");
    spec.platform_exclude = set(&["frdm_k64f"]);
    let verdict = should_skip(&spec, &platform("frdm_k64f", "arm")).unwrap();
    assert_eq!(verdict.reasons, vec!["platform in platform_exclude"]);
    assert!(!should_skip(&spec, &platform("nrf52840dk", "arm")).unwrap().skip());
}

#[test]
fn test_platform_type_allow_list() {
    let mut spec = TestSpecification::new("kernel.sim_only", "board");
    spec.platform_type = set(&["qemu", "native"]);

    assert!(!should_skip(&spec, &qemu_platform("qemu_x86", "x86")).unwrap().skip());
    let verdict = should_skip(&spec, &platform("frdm_k64f", "arm")).unwrap();
    assert!(verdict.skip());
    assert!(verdict.reasons[0].contains("platform type mcu"));
}

#[test]
fn test_platform_only_tags() {
    let mut board = platform("minimal_board", "arm");
    board.only_tags = set(&["kernel"]);

    let mut spec = TestSpecification::new("net.socket", "minimal_board");
    spec.tags = set(&["net", "socket"]);
    let verdict = should_skip(&spec, &board).unwrap();
    assert_eq!(verdict.reasons, vec!["scenario tags not in platform only_tags"]);

    spec.tags = set(&["kernel", "smoke"]);
    assert!(!should_skip(&spec, &board).unwrap().skip());
}

#[test]
fn test_platform_ignore_tags() {
    let mut board = platform("board", "arm");
    board.ignore_tags = set(&["bluetooth"]);
    let mut spec = TestSpecification::new("bluetooth.mesh", "board");
    spec.tags = set(&["bluetooth", "mesh"]);

    let verdict = should_skip(&spec, &board).unwrap();
    assert_eq!(verdict.reasons, vec!["excluded tags per platform (bluetooth)"]);
}

#[test]
fn test_every_fired_predicate_is_reported() {
    let mut spec = TestSpecification::new("everything.wrong", "board");
    spec.skip = true;
    spec.arch_allow = set(&["riscv"]);
    spec.platform_exclude = set(&["board"]);
    spec.platform_type = set(&["native"]);
    spec.min_ram = 4096;
    spec.tags = set(&["net"]);
    spec.harness = HarnessKind::Pytest;
    let mut board = platform("board", "arm");
    board.ram = 64;
    board.only_tags = set(&["kernel"]);

    let verdict = should_skip(&spec, &board).unwrap();
    assert_eq!(verdict.reasons.len(), 7);
    let reason = verdict.reason().unwrap();
    for fragment in [
        "marked skip",
        "arch_allow",
        "platform_exclude",
        "platform_type",
        "RAM",
        "only_tags",
        "outer runner",
    ] {
        assert!(reason.contains(fragment), "{fragment} missing from {reason}");
    }
}
