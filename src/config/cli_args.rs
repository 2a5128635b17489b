use clap::Parser;
use std::path::PathBuf;

// hiltestor - 在硬件、仿真器和本地进程上构建并运行嵌入式测试
#[derive(Parser, Debug, Default)]
#[clap(
    name = "hiltestor",
    version,
    about = "Build and run embedded test suites on boards, emulators and native targets",
    after_help = "EXAMPLES:\n  hiltestor -T tests/kernel -A boards -p qemu_x86\n  hiltestor -T samples -A boards --build-only -j 8\n  hiltestor -T tests -A boards --device-testing --config run.toml -p frdm_k64f"
)]
pub struct CliArgs {
    // Test suite root - Directory searched for testcase.yaml / sample.yaml
    // 测试根目录 - 搜索 testcase.yaml / sample.yaml 的目录
    #[clap(short = 'T', long = "testsuite-root", help = "Directory containing test suites")]
    pub testsuite_root: Vec<PathBuf>,

    // Board root - Directory searched for platform descriptors
    // 板卡目录 - 搜索平台描述文件的目录
    #[clap(short = 'A', long = "board-root", help = "Directory containing board descriptors")]
    pub board_root: Vec<PathBuf>,

    // Platform - Restrict the run to these platforms
    // 平台 - 只在指定平台上运行
    #[clap(short = 'p', long = "platform", help = "Platform identifier (repeatable)")]
    pub platform: Vec<String>,

    // Run configuration file
    // 运行配置文件
    #[clap(short = 'c', long = "config", help = "Run configuration file (TOML)")]
    pub config: Option<PathBuf>,

    // Output directory for build directories
    // 构建输出目录
    #[clap(short = 'O', long = "outdir", default_value = "hiltestor-out", help = "Output directory")]
    pub outdir: PathBuf,

    // Build only - Build every selected pair but execute nothing
    // 仅构建 - 构建但不执行
    #[clap(short = 'b', long = "build-only", help = "Build without running")]
    pub build_only: bool,

    // Device testing - Run mcu platforms on attached boards
    // 硬件测试 - 在已连接的板卡上运行
    #[clap(long = "device-testing", help = "Run on boards listed in the configuration")]
    pub device_testing: bool,

    // Fixtures available on this host
    // 本机可用的测试夹具
    #[clap(long = "fixture", help = "Available fixture (repeatable)")]
    pub fixture: Vec<String>,

    // Tag - Filter scenarios by tag
    // 标签 - 通过标签筛选场景
    #[clap(short = 't', long = "tag", help = "Only scenarios with this tag (repeatable)")]
    pub tag: Vec<String>,

    // Exclude tag - Drop scenarios with this tag
    // 排除标签
    #[clap(short = 'e', long = "exclude-tag", help = "Drop scenarios with this tag (repeatable)")]
    pub exclude_tag: Vec<String>,

    // Scenario - Filter scenarios by name substring
    // 场景 - 通过名称筛选场景
    #[clap(short = 's', long = "scenario", help = "Only scenarios whose name contains this")]
    pub scenario: Vec<String>,

    // Enable slow tests
    // 启用慢速测试
    #[clap(long = "enable-slow", help = "Also run scenarios marked slow")]
    pub enable_slow: bool,

    // Verbose mode - Show more log information
    // 详细模式 - 显示更多日志信息
    #[clap(short = 'v', long = "verbose", help = "Enable verbose logging")]
    pub verbose: bool,

    // Quiet mode - Only errors
    // 安静模式 - 只显示错误
    #[clap(short = 'q', long = "quiet", help = "Suppress non-essential output")]
    pub quiet: bool,

    // Number of parallel workers
    // 并行任务数
    #[clap(short = 'j', long = "jobs", help = "Number of parallel workers")]
    pub jobs: Option<usize>,

    // Timeout multiplier
    // 超时倍数
    #[clap(long = "timeout-multiplier", help = "Multiply every scenario timeout")]
    pub timeout_multiplier: Option<f64>,

    // Extra build arguments
    // 额外构建参数
    #[clap(short = 'x', long = "extra-args", help = "Extra build argument, KEY=VAL (repeatable)")]
    pub extra_args: Vec<String>,

    // Treat memory overflow as build error
    // 内存溢出视为构建错误
    #[clap(long = "overflow-as-errors", help = "Treat memory overflow as a build error")]
    pub overflow_as_errors: bool,

    // Fail fast on device faults
    // 设备故障立即失败
    #[clap(long = "fault-strict", help = "Fail immediately on a device fatal error")]
    pub fault_strict: bool,

    // Number of retries for failed tests
    // 失败测试的重试次数
    #[clap(long = "retry-failed", help = "Retry failed tests this many times")]
    pub retry_failed: Option<u32>,

    // Clear build ledger before the run
    // 运行前清空构建记录
    #[clap(long = "clobber-ledger", help = "Forget previous build results before running")]
    pub clobber_ledger: bool,
}

impl CliArgs {
    /// Parse command line arguments
    /// 解析命令行参数
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Log level implied by `-v` / `-q`
    /// 根据 -v / -q 得到日志级别
    pub fn log_level(&self) -> log::LevelFilter {
        if self.verbose {
            log::LevelFilter::Debug
        } else if self.quiet {
            log::LevelFilter::Error
        } else {
            log::LevelFilter::Info
        }
    }
}
