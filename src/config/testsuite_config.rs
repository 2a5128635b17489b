//! Test scenario files (`testcase.yaml` / `sample.yaml`).
//!
//! A file carries an optional `common:` block merged into every entry of `tests:`.
//! Sequences are concatenated (common first), list-valued strings are split before
//! merging, nested maps are merged key by key and scalars are overridden by the scenario.

use crate::error::ConfigurationError;
use crate::utils::{split_words, string_or_list, string_or_set};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Harness protocol a firmware image uses to report its sub-tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HarnessKind {
    /// Image is built but nothing parses its output.
    None,
    /// Plain ztest output; the default when a scenario names no harness.
    #[default]
    Test,
    Ztest,
    Console,
    /// Handled natively by the outer test runner.
    Pytest,
    /// Any harness this runner has no parser for (`shell`, `robot`, `gtest`, ...).
    /// The scenario is still built.
    #[serde(other)]
    Unsupported,
}

impl HarnessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HarnessKind::None => "none",
            HarnessKind::Test => "test",
            HarnessKind::Ztest => "ztest",
            HarnessKind::Console => "console",
            HarnessKind::Pytest => "pytest",
            HarnessKind::Unsupported => "unsupported",
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, HarnessKind::Pytest)
    }
}

fn default_timeout() -> f64 {
    60.0
}

/// One scenario after `common:` has been merged in.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ScenarioConfig {
    #[serde(default, deserialize_with = "string_or_set")]
    pub tags: BTreeSet<String>,
    #[serde(default, deserialize_with = "string_or_set")]
    pub arch_allow: BTreeSet<String>,
    #[serde(default, deserialize_with = "string_or_set")]
    pub arch_exclude: BTreeSet<String>,
    #[serde(default, deserialize_with = "string_or_set")]
    pub platform_allow: BTreeSet<String>,
    #[serde(default, deserialize_with = "string_or_set")]
    pub platform_exclude: BTreeSet<String>,
    #[serde(default, deserialize_with = "string_or_set")]
    pub platform_type: BTreeSet<String>,
    #[serde(default, deserialize_with = "string_or_set")]
    pub toolchain_allow: BTreeSet<String>,
    #[serde(default, deserialize_with = "string_or_set")]
    pub toolchain_exclude: BTreeSet<String>,
    #[serde(default, deserialize_with = "string_or_set")]
    pub depends_on: BTreeSet<String>,
    #[serde(default)]
    pub min_ram: u64,
    #[serde(default)]
    pub min_flash: u64,
    #[serde(default)]
    pub harness: HarnessKind,
    #[serde(default)]
    pub harness_config: BTreeMap<String, Value>,
    #[serde(default)]
    pub build_only: bool,
    #[serde(default)]
    pub slow: bool,
    #[serde(default)]
    pub skip: bool,
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    #[serde(default, deserialize_with = "string_or_list")]
    pub extra_args: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub extra_configs: Vec<String>,
}

/// A named scenario and the directory holding its sources.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub id: String,
    pub source_dir: PathBuf,
    pub config: ScenarioConfig,
}

const SET_KEYS: &[&str] = &[
    "tags",
    "arch_allow",
    "arch_exclude",
    "platform_allow",
    "platform_exclude",
    "platform_type",
    "toolchain_allow",
    "toolchain_exclude",
    "depends_on",
    "extra_configs",
];

/// Loads every scenario declared in one `testcase.yaml`.
pub fn load_scenarios(path: &Path) -> Result<Vec<Scenario>, ConfigurationError> {
    let content = fs::read_to_string(path).map_err(|error| ConfigurationError::Read {
        path: path.to_path_buf(),
        error,
    })?;
    let source_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    parse_scenarios(&content, &source_dir).map_err(|e| match e {
        ParseFailure::Yaml(error) => ConfigurationError::Parse {
            path: path.to_path_buf(),
            error,
        },
        ParseFailure::Invalid(err) => err,
    })
}

enum ParseFailure {
    Yaml(serde_yaml::Error),
    Invalid(ConfigurationError),
}

fn parse_scenarios(content: &str, source_dir: &Path) -> Result<Vec<Scenario>, ParseFailure> {
    let document: Value = serde_yaml::from_str(content).map_err(ParseFailure::Yaml)?;
    let common = match document.get("common") {
        Some(Value::Mapping(m)) => normalize(m.clone()),
        _ => Mapping::new(),
    };
    let Some(Value::Mapping(tests)) = document.get("tests") else {
        return Ok(Vec::new());
    };

    let mut scenarios = Vec::with_capacity(tests.len());
    for (name, body) in tests {
        let id = name
            .as_str()
            .ok_or_else(|| {
                ParseFailure::Invalid(ConfigurationError::InvalidScenario {
                    scenario: format!("{name:?}"),
                    message: "scenario names must be strings".to_string(),
                })
            })?
            .to_string();
        let body = match body {
            Value::Mapping(m) => normalize(m.clone()),
            Value::Null => Mapping::new(),
            _ => {
                return Err(ParseFailure::Invalid(ConfigurationError::InvalidScenario {
                    scenario: id,
                    message: "scenario body must be a mapping".to_string(),
                }));
            }
        };
        let merged = merge(common.clone(), body);
        let config: ScenarioConfig = serde_yaml::from_value(Value::Mapping(merged))
            .map_err(|e| {
                ParseFailure::Invalid(ConfigurationError::InvalidScenario {
                    scenario: id.clone(),
                    message: e.to_string(),
                })
            })?;
        if config.timeout <= 0.0 {
            return Err(ParseFailure::Invalid(ConfigurationError::InvalidScenario {
                scenario: id,
                message: format!("timeout must be positive, got {}", config.timeout),
            }));
        }
        scenarios.push(Scenario {
            id,
            source_dir: source_dir.to_path_buf(),
            config,
        });
    }
    Ok(scenarios)
}

/// Parses scenarios from in-memory YAML, used by tests and tooling.
pub fn scenarios_from_str(
    content: &str,
    source_dir: &Path,
) -> Result<Vec<Scenario>, ConfigurationError> {
    parse_scenarios(content, source_dir).map_err(|e| match e {
        ParseFailure::Yaml(error) => ConfigurationError::Parse {
            path: source_dir.to_path_buf(),
            error,
        },
        ParseFailure::Invalid(err) => err,
    })
}

/// Turns list-valued scalars into sequences so `merge` can concatenate them.
fn normalize(mut map: Mapping) -> Mapping {
    for key in SET_KEYS {
        if let Some(Value::String(s)) = map.get(*key) {
            let items = split_words(s).map(Value::String).collect();
            map.insert(Value::from(*key), Value::Sequence(items));
        }
    }
    // extra_args honours shell quoting: OVERLAY_CONFIG="a.conf b.conf" stays one item
    if let Some(Value::String(s)) = map.get("extra_args") {
        let items = match shell_words::split(s) {
            Ok(words) => words,
            Err(_) => split_words(s).collect(),
        };
        let items = items.into_iter().map(Value::String).collect();
        map.insert(Value::from("extra_args"), Value::Sequence(items));
    }
    map
}

fn merge(mut base: Mapping, overlay: Mapping) -> Mapping {
    for (key, value) in overlay {
        let merged = match (base.remove(&key), value) {
            (Some(Value::Sequence(mut a)), Value::Sequence(b)) => {
                a.extend(b);
                Value::Sequence(a)
            }
            (Some(Value::Mapping(a)), Value::Mapping(b)) => Value::Mapping(merge(a, b)),
            (_, v) => v,
        };
        base.insert(key, merged);
    }
    base
}
