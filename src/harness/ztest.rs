//! Structured-suite parser for firmware built on the in-tree test framework.

use crate::error::HarnessError;
use crate::harness::{FATAL_SENTINEL, LogParser, SubTestResult, SubTestStatus, SuiteState};
use log::{debug, error, warn};
use regex::Regex;
use std::sync::LazyLock;

pub const SUITE_START: &str = "Running TESTSUITE";
pub const SUITE_PASSED: &str = "PROJECT EXECUTION SUCCESSFUL";
pub const SUITE_FAILED: &str = "PROJECT EXECUTION FAILED";

static RESULT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(PASS|FAIL|SKIP|BLOCK) - (?:test_)?(\S*)\s+in\s+(\d*[.,]?\d*)\s+seconds")
        .expect("static regex is valid")
});
static START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"START - (?:test_)?(\S+)").expect("static regex is valid"));
static SUITE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Running TESTSUITE (\S+)").expect("static regex is valid"));

#[derive(Debug, Default)]
pub struct ZtestParser {
    strict: bool,
    state: SuiteState,
    suite: Option<String>,
    started: Option<String>,
    fault: Option<String>,
    failed_cases: Vec<String>,
}

impl ZtestParser {
    pub fn new(fault_strict: bool) -> Self {
        Self {
            strict: fault_strict,
            ..Self::default()
        }
    }

    pub fn suite(&self) -> Option<&str> {
        self.suite.as_deref()
    }

    fn duration(raw: &str) -> f64 {
        raw.replace(',', ".").parse().unwrap_or(0.0)
    }
}

impl LogParser for ZtestParser {
    fn feed(&mut self, line: &str) -> Result<Option<SubTestResult>, HarnessError> {
        if line.contains(FATAL_SENTINEL) {
            if self.strict {
                return Err(HarnessError::Fatal {
                    line: line.to_string(),
                });
            }
            error!("Device fault: {line}");
            self.fault.get_or_insert_with(|| line.to_string());
            return Ok(None);
        }

        if let Some(caps) = RESULT_RE.captures(line) {
            let Some(result) = SubTestStatus::from_keyword(&caps[1]) else {
                return Ok(None);
            };
            let name = caps[2].to_string();
            if result == SubTestStatus::Fail {
                self.failed_cases.push(name.clone());
            }
            self.started = None;
            return Ok(Some(SubTestResult {
                name,
                result,
                duration: Self::duration(&caps[3]),
            }));
        }

        if let Some(caps) = START_RE.captures(line) {
            self.started = Some(caps[1].to_string());
        } else if let Some(caps) = SUITE_RE.captures(line) {
            debug!("Suite {} started", &caps[1]);
            self.suite = Some(caps[1].to_string());
        } else if line.contains(SUITE_FAILED) {
            self.state = SuiteState::Failed;
        } else if line.contains(SUITE_PASSED) {
            self.state = if self.fault.is_some() {
                warn!("Suite reported success after a fault");
                SuiteState::Failed
            } else {
                SuiteState::Passed
            };
        }
        Ok(None)
    }

    fn state(&self) -> SuiteState {
        self.state
    }

    fn finish(&mut self) {
        if self.fault.is_some() {
            self.state = SuiteState::Failed;
        }
    }

    fn reason(&self) -> Option<String> {
        if let Some(fault) = &self.fault {
            return Some(match &self.started {
                Some(case) => format!("fault during {case}: {fault}"),
                None => format!("fault: {fault}"),
            });
        }
        if !self.failed_cases.is_empty() {
            return Some(format!("failed: {}", self.failed_cases.join(", ")));
        }
        None
    }
}
