use assert_cmd::Command;
use std::fs;
use tempfile::tempdir;

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.output().unwrap();
    String::from_utf8_lossy(&output.stdout).into_owned()
}

// 测试帮助信息
#[test]
fn test_help_lists_main_options() {
    let mut cmd = Command::cargo_bin("hiltestor").unwrap();
    cmd.arg("--help").assert().success();

    let help = stdout_of(Command::cargo_bin("hiltestor").unwrap().arg("--help"));
    assert!(help.contains("--testsuite-root"));
    assert!(help.contains("--board-root"));
    assert!(help.contains("--device-testing"));
    assert!(help.contains("--retry-failed"));
}

// 缺少测试根目录时返回配置错误
#[test]
fn test_missing_testsuite_root() {
    let mut cmd = Command::cargo_bin("hiltestor").unwrap();
    cmd.arg("-q").assert().code(2);
}

// 未知平台是配置错误
#[test]
fn test_unknown_platform() {
    let temp_dir = tempdir().unwrap();
    let boards = temp_dir.path().join("boards");
    fs::create_dir_all(&boards).unwrap();
    fs::write(boards.join("qemu_x86.yaml"), "identifier: qemu_x86\narch: x86\ntype: qemu\n").unwrap();

    let mut cmd = Command::cargo_bin("hiltestor").unwrap();
    cmd.arg("-T")
        .arg(temp_dir.path())
        .arg("-A")
        .arg(&boards)
        .arg("-p")
        .arg("no_such_board")
        .assert()
        .code(2);
}

// 仅构建模式下不执行任何镜像；构建失败的场景计为错误
#[test]
fn test_build_only_run_reports_errors() {
    let temp_dir = tempdir().unwrap();
    let boards = temp_dir.path().join("boards");
    let suite = temp_dir.path().join("tests/kernel/common");
    fs::create_dir_all(&boards).unwrap();
    fs::create_dir_all(&suite).unwrap();
    fs::write(boards.join("qemu_x86.yaml"), "identifier: qemu_x86\narch: x86\ntype: qemu\n").unwrap();
    fs::write(
        suite.join("testcase.yaml"),
        "tests:\n  kernel.common:\n    tags: kernel\n  kernel.arm_only:\n    arch_allow: arm\n",
    )
    .unwrap();
    let config = temp_dir.path().join("run.toml");
    fs::write(
        &config,
        format!(
            "[executor]\nbuild_tool = \"false\"\nledger_path = \"{}\"\n",
            temp_dir.path().join("ledger.json").display()
        ),
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("hiltestor").unwrap();
    cmd.arg("-T")
        .arg(temp_dir.path().join("tests"))
        .arg("-A")
        .arg(&boards)
        .arg("-O")
        .arg(temp_dir.path().join("out"))
        .arg("-c")
        .arg(&config)
        .arg("--build-only");
    let output = cmd.output().unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_eq!(output.status.code(), Some(1));
    assert!(stdout.contains("qemu_x86/kernel.common: ERROR"));
    assert!(stdout.contains("qemu_x86/kernel.arm_only: SKIPPED"));
    assert!(stdout.contains("2 items: 0 passed, 0 failed, 1 errors, 1 skipped"));
}
