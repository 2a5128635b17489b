//! Regex-driven console parser.
//!
//! `one_line` passes on the first line matching any pattern. `multi_line` passes once
//! every pattern has matched, in declared order when `ordered` is set.

use crate::error::HarnessError;
use crate::harness::{FATAL_SENTINEL, LogParser, Record, SubTestResult, SuiteState};
use log::{debug, error, info};
use regex::Regex;
use serde_yaml::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleMode {
    OneLine,
    MultiLine,
}

#[derive(Debug)]
pub struct ConsoleParser {
    mode: ConsoleMode,
    ordered: bool,
    strict: bool,
    patterns: Vec<Regex>,
    matched: Vec<bool>,
    /// Next pattern expected in ordered mode.
    cursor: usize,
    record: Option<Regex>,
    records: Vec<Record>,
    fault: Option<String>,
    state: SuiteState,
}

fn compile(pattern: &str) -> Result<Regex, HarnessError> {
    Regex::new(pattern).map_err(|error| HarnessError::InvalidPattern {
        pattern: pattern.to_string(),
        error,
    })
}

fn string_list(value: &Value) -> Result<Vec<String>, HarnessError> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Sequence(items) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| HarnessError::Config(format!("regex entry {v:?} is not a string")))
            })
            .collect(),
        other => Err(HarnessError::Config(format!("unsupported regex value {other:?}"))),
    }
}

impl ConsoleParser {
    pub fn new(mode: ConsoleMode, patterns: &[&str], ordered: bool) -> Result<Self, HarnessError> {
        let patterns = patterns
            .iter()
            .map(|p| compile(p))
            .collect::<Result<Vec<_>, _>>()?;
        if patterns.is_empty() {
            return Err(HarnessError::Config("console harness needs at least one regex".to_string()));
        }
        Ok(Self {
            mode,
            ordered,
            strict: false,
            matched: vec![false; patterns.len()],
            patterns,
            cursor: 0,
            record: None,
            records: Vec::new(),
            fault: None,
            state: SuiteState::Unknown,
        })
    }

    /// Builds a parser from a scenario's `harness_config` mapping.
    pub fn from_config(config: &BTreeMap<String, Value>, fault_strict: bool) -> Result<Self, HarnessError> {
        let mode = match config.get("type").and_then(Value::as_str) {
            Some("one_line") => ConsoleMode::OneLine,
            Some("multi_line") => ConsoleMode::MultiLine,
            Some(other) => return Err(HarnessError::Config(format!("unknown console type `{other}`"))),
            None => return Err(HarnessError::Config("console harness needs a type".to_string())),
        };
        let patterns = match config.get("regex") {
            Some(value) => string_list(value)?,
            None => Vec::new(),
        };
        let ordered = config.get("ordered").and_then(Value::as_bool).unwrap_or(false);
        let refs: Vec<&str> = patterns.iter().map(String::as_str).collect();

        let mut parser = Self::new(mode, &refs, ordered)?.fault_strict(fault_strict);
        if let Some(record) = config
            .get("record")
            .and_then(|r| r.get("regex"))
            .and_then(Value::as_str)
        {
            parser = parser.with_record(record)?;
        }
        Ok(parser)
    }

    pub fn fault_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Collects the named groups of every line matching `pattern`.
    pub fn with_record(mut self, pattern: &str) -> Result<Self, HarnessError> {
        self.record = Some(compile(pattern)?);
        Ok(self)
    }

    fn capture_record(&mut self, line: &str) {
        let Some(re) = &self.record else {
            return;
        };
        if let Some(caps) = re.captures(line) {
            let record: Record = re
                .capture_names()
                .flatten()
                .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
                .collect();
            debug!("Record: {record:?}");
            self.records.push(record);
        }
    }

    fn match_line(&mut self, line: &str) {
        match self.mode {
            ConsoleMode::OneLine => {
                if self.patterns.iter().any(|p| p.is_match(line)) {
                    self.matched.fill(true);
                }
            }
            ConsoleMode::MultiLine if self.ordered => {
                if let Some(next) = self.patterns.get(self.cursor) {
                    if next.is_match(line) {
                        self.matched[self.cursor] = true;
                        self.cursor += 1;
                    }
                }
            }
            ConsoleMode::MultiLine => {
                for (i, pattern) in self.patterns.iter().enumerate() {
                    if !self.matched[i] && pattern.is_match(line) {
                        self.matched[i] = true;
                    }
                }
            }
        }
    }

    fn all_matched(&self) -> bool {
        self.matched.iter().all(|&m| m)
    }
}

impl LogParser for ConsoleParser {
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
        self.capture_record(line);
        self.match_line(line);

        if self.all_matched() && self.fault.is_none() {
            info!("Console harness matched all patterns");
            self.state = SuiteState::Passed;
        }
        Ok(None)
    }

    fn state(&self) -> SuiteState {
        self.state
    }

    fn finish(&mut self) {
        if self.state == SuiteState::Unknown {
            self.state = SuiteState::Failed;
        }
    }

    fn reason(&self) -> Option<String> {
        if let Some(fault) = &self.fault {
            return Some(format!("fault: {fault}"));
        }
        let missing: Vec<&str> = self
            .patterns
            .iter()
            .zip(&self.matched)
            .filter(|(_, matched)| !**matched)
            .map(|(p, _)| p.as_str())
            .collect();
        (!missing.is_empty()).then(|| format!("unmatched patterns: {}", missing.join(", ")))
    }

    fn records(&self) -> &[Record] {
        &self.records
    }
}
