//! 日志解析模块
//!
//! Turns a device's output lines into sub-test results and one suite verdict.
//!
//! A parse stops at the first of: a suite verdict sentinel, end of the stream, or the
//! deadline. Each device session is parsed exactly once.

use crate::config::testsuite_config::HarnessKind;
use crate::error::HarnessError;
use crate::testspec::TestSpecification;
use log::{debug, info};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

pub mod console;
pub mod ztest;

pub use console::ConsoleParser;
pub use ztest::ZtestParser;

/// Line the firmware prints when it hits a fatal fault.
pub const FATAL_SENTINEL: &str = "ZEPHYR FATAL ERROR";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubTestStatus {
    Pass,
    Fail,
    Skip,
    Block,
}

impl SubTestStatus {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "PASS" => Some(SubTestStatus::Pass),
            "FAIL" => Some(SubTestStatus::Fail),
            "SKIP" => Some(SubTestStatus::Skip),
            "BLOCK" => Some(SubTestStatus::Block),
            _ => None,
        }
    }
}

impl fmt::Display for SubTestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubTestStatus::Pass => "PASS",
            SubTestStatus::Fail => "FAIL",
            SubTestStatus::Skip => "SKIP",
            SubTestStatus::Block => "BLOCK",
        };
        f.write_str(s)
    }
}

/// One assertion-level result reported by the firmware.
#[derive(Debug, Clone, PartialEq)]
pub struct SubTestResult {
    pub name: String,
    pub result: SubTestStatus,
    /// Seconds.
    pub duration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuiteState {
    #[default]
    Unknown,
    Passed,
    Failed,
}

/// Named captures collected by a console `record` pattern.
pub type Record = BTreeMap<String, String>;

/// 日志解析器特质
pub trait LogParser: Send {
    /// Consumes one line. Returns a result when the line completes a sub-test.
    fn feed(&mut self, line: &str) -> Result<Option<SubTestResult>, HarnessError>;

    fn state(&self) -> SuiteState;

    /// Called once when the stream ended or the deadline passed without a verdict line.
    fn finish(&mut self) {}

    /// Why the suite failed, when the parser knows more than the state says.
    fn reason(&self) -> Option<String> {
        None
    }

    fn records(&self) -> &[Record] {
        &[]
    }
}

/// Options shared by every parser constructor.
#[derive(Debug, Clone, Copy, Default)]
pub struct HarnessOptions {
    /// Raise on a fatal fault line instead of waiting for the verdict.
    pub fault_strict: bool,
}

/// Constructor registered per [`HarnessKind`].
pub type ParserConstructor =
    fn(&TestSpecification, &HarnessOptions) -> Result<Box<dyn LogParser>, HarnessError>;

/// 解析器工厂
pub struct ParserFactory;

impl ParserFactory {
    pub fn ztest(
        _spec: &TestSpecification,
        options: &HarnessOptions,
    ) -> Result<Box<dyn LogParser>, HarnessError> {
        Ok(Box::new(ZtestParser::new(options.fault_strict)))
    }

    pub fn console(
        spec: &TestSpecification,
        options: &HarnessOptions,
    ) -> Result<Box<dyn LogParser>, HarnessError> {
        Ok(Box::new(ConsoleParser::from_config(
            &spec.harness_config,
            options.fault_strict,
        )?))
    }

    pub fn constructors() -> Vec<(HarnessKind, ParserConstructor)> {
        vec![
            (HarnessKind::Test, Self::ztest as ParserConstructor),
            (HarnessKind::Ztest, Self::ztest as ParserConstructor),
            (HarnessKind::Console, Self::console as ParserConstructor),
        ]
    }
}

/// A parser bound to one device session.
pub struct Harness {
    parser: Box<dyn LogParser>,
    parsed: bool,
    decided_in_stream: bool,
}

impl Harness {
    pub fn new(parser: Box<dyn LogParser>) -> Self {
        Self {
            parser,
            parsed: false,
            decided_in_stream: false,
        }
    }

    /// Lazily parses `lines` for at most `timeout`.
    ///
    /// Fails with [`HarnessError::AlreadyParsed`] on a second call.
    pub fn parse<I>(&mut self, lines: I, timeout: Duration) -> Result<Parse<'_, I::IntoIter>, HarnessError>
    where
        I: IntoIterator<Item = String>,
    {
        if self.parsed {
            return Err(HarnessError::AlreadyParsed);
        }
        self.parsed = true;
        Ok(Parse {
            harness: self,
            lines: lines.into_iter(),
            deadline: Instant::now() + timeout,
            finished: false,
        })
    }

    pub fn state(&self) -> SuiteState {
        self.parser.state()
    }

    /// True when a verdict line was seen, as opposed to a verdict reached at stream end.
    pub fn decided_in_stream(&self) -> bool {
        self.decided_in_stream
    }

    pub fn reason(&self) -> Option<String> {
        self.parser.reason()
    }

    pub fn records(&self) -> &[Record] {
        self.parser.records()
    }
}

/// Iterator returned by [`Harness::parse`].
pub struct Parse<'a, I> {
    harness: &'a mut Harness,
    lines: I,
    deadline: Instant,
    finished: bool,
}

impl<I> Parse<'_, I> {
    fn end(&mut self, decided: bool) {
        self.finished = true;
        if decided {
            self.harness.decided_in_stream = true;
        } else {
            self.harness.parser.finish();
        }
        debug!("Parse finished with suite state {:?}", self.harness.state());
    }
}

impl<I> Iterator for Parse<'_, I>
where
    I: Iterator<Item = String>,
{
    type Item = Result<SubTestResult, HarnessError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            if Instant::now() >= self.deadline {
                debug!("Parse deadline reached");
                self.end(false);
                break;
            }
            let Some(line) = self.lines.next() else {
                self.end(false);
                break;
            };
            match self.harness.parser.feed(&line) {
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                Ok(result) => {
                    if self.harness.state() != SuiteState::Unknown {
                        self.end(true);
                    }
                    if let Some(result) = result {
                        info!("{} - {} in {:.3} seconds", result.result, result.name, result.duration);
                        return Some(Ok(result));
                    }
                }
            }
        }
        None
    }
}
