//! 测试用例发现模块
//!
//! Scans test roots for scenario files and filters the scenarios they declare.

use crate::config::testsuite_config::{Scenario, load_scenarios};
use anyhow::Result;
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

const SCENARIO_FILES: &[&str] = &["testcase.yaml", "sample.yaml"];

/// 场景过滤条件
#[derive(Debug, Clone, Default)]
pub struct ScenarioFilter {
    /// Keep scenarios whose id contains one of these substrings.
    pub names: Vec<String>,
    /// Keep scenarios carrying at least one of these tags.
    pub tags: Vec<String>,
    /// Drop scenarios carrying any of these tags.
    pub exclude_tags: Vec<String>,
}

/// Finds scenario files under `dir`.
pub fn discover_testsuites<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut files = Vec::new();

    if !dir.is_dir() {
        debug!("Test root is not a directory: {}", dir.display());
        return Ok(files);
    }

    walk_directory(dir, &mut files)?;
    files.sort();

    info!("Found {} scenario files under {}", files.len(), dir.display());
    Ok(files)
}

fn walk_directory(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk_directory(&path, files)?;
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| SCENARIO_FILES.contains(&n))
        {
            files.push(path);
        }
    }
    Ok(())
}

/// Loads scenarios from every file and keeps those matching `filter`.
///
/// A file that fails to parse is reported and skipped; the rest of the suite still runs.
pub fn load_and_filter(files: &[PathBuf], filter: &ScenarioFilter) -> Vec<Scenario> {
    let mut scenarios = Vec::new();
    for path in files {
        match load_scenarios(path) {
            Ok(loaded) => scenarios.extend(loaded.into_iter().filter(|s| matches_filter(s, filter))),
            Err(e) => warn!("Failed to load {}: {e}", path.display()),
        }
    }
    info!("{} scenarios left after filtering", scenarios.len());
    scenarios
}

/// 检查场景是否匹配过滤条件
pub fn matches_filter(scenario: &Scenario, filter: &ScenarioFilter) -> bool {
    if !filter.names.is_empty() && !filter.names.iter().any(|n| scenario.id.contains(n.as_str())) {
        return false;
    }

    let tags = &scenario.config.tags;
    if !filter.tags.is_empty() && !filter.tags.iter().any(|t| tags.contains(t)) {
        return false;
    }

    !filter.exclude_tags.iter().any(|t| tags.contains(t))
}
