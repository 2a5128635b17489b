use hiltestor::build::args::{cmake_args, filter_conditional, merge_overlay_configs};
use hiltestor::build::{
    BuildCoordinator, BuildLedger, BuildOutcome, BuildRequest, BuildStatus, Builder,
    CoordinatorOptions, WestBuilder, detect_overflow,
};
use hiltestor::error::BuildError;
use mockall::mock;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;
use test_log::test;

mock! {
    pub Tool {}
    impl Builder for Tool {
        fn build(&self, request: &BuildRequest) -> Result<(), BuildError>;
    }
}

fn request(build_dir: PathBuf) -> BuildRequest {
    BuildRequest {
        platform: "qemu_x86".to_string(),
        arch: "x86".to_string(),
        source_dir: PathBuf::from("tests/kernel/common"),
        build_dir,
        extra_args: Vec::new(),
        extra_configs: Vec::new(),
        global_args: Vec::new(),
    }
}

fn options() -> CoordinatorOptions {
    CoordinatorOptions {
        wait_timeout: Duration::from_secs(20),
        poll_interval: Duration::from_millis(10),
        overflow_as_errors: false,
    }
}

#[test]
fn test_overlay_config_merge() {
    let merged = merge_overlay_configs(vec![
        "OVERLAY_CONFIG=\"a.conf\"".to_string(),
        "CONFIG_FOO=y".to_string(),
        "OVERLAY_CONFIG=\"b.conf\"".to_string(),
    ]);
    assert_eq!(merged, vec!["CONFIG_FOO=y", "OVERLAY_CONFIG=\"a.conf b.conf\""]);

    let only = merge_overlay_configs(vec![
        "OVERLAY_CONFIG=\"a.conf\"".to_string(),
        "OVERLAY_CONFIG=\"b.conf\"".to_string(),
    ]);
    assert_eq!(only, vec!["OVERLAY_CONFIG=\"a.conf b.conf\""]);
}

#[test]
fn test_conditional_args() {
    let args = vec![
        "arch:arm:CONFIG_ARM_MPU=y".to_string(),
        "platform:qemu_x86:CONFIG_X86_MMU=y".to_string(),
        "CONFIG_ASSERT=y".to_string(),
    ];
    assert_eq!(
        filter_conditional(&args, "x86", "qemu_x86"),
        vec!["CONFIG_X86_MMU=y", "CONFIG_ASSERT=y"]
    );

    let scenario = vec!["OVERLAY_CONFIG=a.conf".to_string()];
    let global = vec!["OVERLAY_CONFIG=\"b.conf\"".to_string(), "-GNinja".to_string()];
    assert_eq!(
        cmake_args(&[scenario.as_slice(), global.as_slice()], "x86", "qemu_x86", None),
        vec!["-GNinja", "-DOVERLAY_CONFIG=\"a.conf b.conf\""]
    );
}

#[test]
fn test_west_command_line() {
    let dir = tempdir().unwrap();
    let build_dir = dir.path().join("qemu_x86").join("kernel.common");
    let mut req = request(build_dir.clone());
    req.extra_args = vec!["CONFIG_ASSERT=y".to_string()];
    req.extra_configs = vec!["CONFIG_DEBUG=y".to_string(), "arch:arm:CONFIG_FPU=y".to_string()];

    let args = WestBuilder::new("west").command_args(&req).unwrap();
    let extra_conf = build_dir.join("hiltestor").join("testsuite_extra.conf");
    assert_eq!(
        args,
        vec![
            "build".to_string(),
            "--pristine".to_string(),
            "always".to_string(),
            "--board".to_string(),
            "qemu_x86".to_string(),
            "tests/kernel/common".to_string(),
            "--build-dir".to_string(),
            build_dir.display().to_string(),
            "--".to_string(),
            "-DCONFIG_ASSERT=y".to_string(),
            format!("-DOVERLAY_CONFIG=\"{}\"", extra_conf.display()),
        ]
    );
    assert_eq!(std::fs::read_to_string(extra_conf).unwrap(), "CONFIG_DEBUG=y\n");
}

#[test]
fn test_overflow_detection() {
    let ld = "zephyr.elf section `text' will not fit in region `FLASH'\n\
              region `FLASH' overflowed by 1234 bytes";
    assert_eq!(detect_overflow(ld).as_deref(), Some("FLASH"));
    let imgtool = "Error: Image size (0x1234) + trailer (0x600) exceeds requested size 0x1000";
    assert_eq!(detect_overflow(imgtool).as_deref(), Some("image"));
    assert_eq!(detect_overflow("undefined reference to `main'"), None);
}

#[test]
fn test_ledger_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let ledger = BuildLedger::new(&path, Duration::from_secs(1));

    let mut locked = ledger.lock().unwrap();
    assert!(locked.transition("out/a", BuildStatus::InProgress));
    assert!(locked.transition("out/a", BuildStatus::Done));
    assert!(locked.transition("out/b", BuildStatus::InProgress));
    locked.commit().unwrap();

    let before = ledger.records().unwrap();
    let reloaded = BuildLedger::new(&path, Duration::from_secs(1)).records().unwrap();
    assert_eq!(before, reloaded);
    assert_eq!(reloaded["out/a"], BuildStatus::Done);
    assert_eq!(reloaded["out/b"], BuildStatus::InProgress);

    let json = std::fs::read_to_string(&path).unwrap();
    assert!(json.contains("\"IN_PROGRESS\""));
    assert!(json.lines().count() > 1);
}

#[test]
fn test_ledger_transitions_are_monotonic() {
    let dir = tempdir().unwrap();
    let ledger = BuildLedger::new(dir.path().join("ledger.json"), Duration::from_secs(1));

    let mut locked = ledger.lock().unwrap();
    assert!(!locked.transition("k", BuildStatus::Done));
    assert!(locked.transition("k", BuildStatus::InProgress));
    assert!(locked.transition("k", BuildStatus::Failed));
    assert!(!locked.transition("k", BuildStatus::InProgress));
    assert!(!locked.transition("k", BuildStatus::Done));
    locked.commit().unwrap();
    assert_eq!(ledger.status("k").unwrap(), BuildStatus::Failed);

    ledger.clear("k").unwrap();
    assert_eq!(ledger.status("k").unwrap(), BuildStatus::NotDone);
}

#[test]
fn test_ledger_lock_timeout() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let holder = BuildLedger::new(&path, Duration::from_secs(1));
    let _held = holder.lock().unwrap();

    let contender = BuildLedger::new(&path, Duration::from_millis(100));
    let err = contender.lock().err().unwrap();
    assert!(matches!(err, BuildError::LockTimeout { .. }));
}

#[test]
fn test_concurrent_build_runs_once() {
    let dir = tempdir().unwrap();
    let ledger = BuildLedger::new(dir.path().join("ledger.json"), Duration::from_secs(5));
    let mut tool = MockTool::new();
    tool.expect_build().times(1).returning(|req| {
        thread::sleep(Duration::from_millis(200));
        std::fs::create_dir_all(&req.build_dir).unwrap();
        Ok(())
    });
    let coordinator = BuildCoordinator::new(ledger.clone(), Arc::new(tool), options());
    let req = request(dir.path().join("out").join("kernel.common"));

    let outcomes: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let coordinator = coordinator.clone();
                let req = req.clone();
                s.spawn(move || coordinator.build(&req))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(outcomes.iter().all(|o| o.is_ok()));
    let built = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(BuildOutcome::Built)))
        .count();
    assert_eq!(built, 1);
    assert_eq!(ledger.status(&req.key()).unwrap(), BuildStatus::Done);

    // later callers reuse the result
    assert_eq!(coordinator.build(&req).unwrap(), BuildOutcome::AlreadyBuilt);
}

#[test]
fn test_concurrent_build_failure_is_sticky() {
    let dir = tempdir().unwrap();
    let ledger = BuildLedger::new(dir.path().join("ledger.json"), Duration::from_secs(5));
    let mut tool = MockTool::new();
    tool.expect_build().times(1).returning(|req| {
        thread::sleep(Duration::from_millis(200));
        Err(BuildError::ExitCode {
            build_dir: req.key(),
            code: Some(1),
        })
    });
    let coordinator = BuildCoordinator::new(ledger.clone(), Arc::new(tool), options());
    let req = request(dir.path().join("out").join("kernel.fail"));

    let outcomes: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let coordinator = coordinator.clone();
                let req = req.clone();
                s.spawn(move || coordinator.build(&req))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(outcomes.iter().all(|o| o.is_err()));
    assert_eq!(ledger.status(&req.key()).unwrap(), BuildStatus::Failed);
    assert!(matches!(
        coordinator.build(&req),
        Err(BuildError::PreviouslyFailed { .. })
    ));
}

#[test]
fn test_advisory_overflow() {
    let dir = tempdir().unwrap();
    let ledger = BuildLedger::new(dir.path().join("ledger.json"), Duration::from_secs(5));
    let mut tool = MockTool::new();
    tool.expect_build().times(1).returning(|req| {
        Err(BuildError::MemoryOverflow {
            build_dir: req.key(),
            region: "RAM".to_string(),
        })
    });
    let coordinator = BuildCoordinator::new(ledger.clone(), Arc::new(tool), options());
    let req = request(dir.path().join("out").join("kernel.big"));

    assert_eq!(
        coordinator.build(&req).unwrap(),
        BuildOutcome::Overflow("RAM overflow".to_string())
    );
    assert_eq!(ledger.status(&req.key()).unwrap(), BuildStatus::Failed);
    assert_eq!(coordinator.ledger().path(), ledger.path());
}

#[test]
fn test_overflow_as_errors() {
    let dir = tempdir().unwrap();
    let ledger = BuildLedger::new(dir.path().join("ledger.json"), Duration::from_secs(5));
    let mut tool = MockTool::new();
    tool.expect_build().times(1).returning(|req| {
        Err(BuildError::MemoryOverflow {
            build_dir: req.key(),
            region: "FLASH".to_string(),
        })
    });
    let coordinator = BuildCoordinator::new(
        ledger,
        Arc::new(tool),
        CoordinatorOptions {
            overflow_as_errors: true,
            ..options()
        },
    );
    let req = request(dir.path().join("out").join("kernel.huge"));
    let err = coordinator.build(&req).unwrap_err();
    assert!(err.is_memory_overflow());
}

#[test]
fn test_done_entry_without_build_dir_is_rebuilt() {
    let dir = tempdir().unwrap();
    let ledger = BuildLedger::new(dir.path().join("ledger.json"), Duration::from_secs(5));
    let mut tool = MockTool::new();
    tool.expect_build().times(2).returning(|req| {
        std::fs::create_dir_all(&req.build_dir).unwrap();
        Ok(())
    });
    let coordinator = BuildCoordinator::new(ledger.clone(), Arc::new(tool), options());
    let out = dir.path().join("out");
    let req = request(out.join("kernel.common"));

    assert_eq!(coordinator.build(&req).unwrap(), BuildOutcome::Built);
    assert_eq!(coordinator.build(&req).unwrap(), BuildOutcome::AlreadyBuilt);

    // the output directory is wiped between runs
    std::fs::remove_dir_all(&out).unwrap();
    assert_eq!(coordinator.build(&req).unwrap(), BuildOutcome::Built);
    assert!(req.build_dir.exists());
    assert_eq!(ledger.status(&req.key()).unwrap(), BuildStatus::Done);
}

#[test]
fn test_default_ledger_lives_in_outdir() {
    let dir = tempdir().unwrap();
    let path = BuildLedger::default_path(dir.path());
    assert_eq!(path, dir.path().join("hiltestor_builder.json"));
}
