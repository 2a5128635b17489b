//! Index of the target platforms available to a run.

use crate::config::platform_config::PlatformDescriptor;
use crate::error::ConfigurationError;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Platform descriptors keyed by identifier.
#[derive(Debug, Default, Clone)]
pub struct PlatformCatalog {
    platforms: BTreeMap<String, (PlatformDescriptor, PathBuf)>,
}

impl PlatformCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walks every root for board descriptors.
    ///
    /// A YAML file counts as a descriptor when it has a top-level `identifier`; anything
    /// else under a board directory (west.yml, board.yml v2 metadata...) is ignored.
    pub fn load<P: AsRef<Path>>(roots: &[P]) -> Result<Self, ConfigurationError> {
        let mut catalog = Self::new();
        for root in roots {
            let mut files = Vec::new();
            collect_yaml(root.as_ref(), &mut files)?;
            files.sort();
            for path in files {
                let content = fs::read_to_string(&path).map_err(|error| {
                    ConfigurationError::Read {
                        path: path.clone(),
                        error,
                    }
                })?;
                if !looks_like_descriptor(&content) {
                    continue;
                }
                let descriptor = PlatformDescriptor::from_yaml(&content).map_err(|error| {
                    ConfigurationError::Parse {
                        path: path.clone(),
                        error,
                    }
                })?;
                catalog.insert(descriptor, path)?;
            }
        }
        info!("Loaded {} platforms", catalog.len());
        Ok(catalog)
    }

    /// Adds a descriptor; duplicate identifiers are a configuration error.
    pub fn insert(
        &mut self,
        descriptor: PlatformDescriptor,
        origin: PathBuf,
    ) -> Result<(), ConfigurationError> {
        if let Some((_, first)) = self.platforms.get(&descriptor.identifier) {
            return Err(ConfigurationError::DuplicatePlatform {
                identifier: descriptor.identifier.clone(),
                first: first.clone(),
                second: origin,
            });
        }
        debug!("Platform {} from {}", descriptor.identifier, origin.display());
        self.platforms
            .insert(descriptor.identifier.clone(), (descriptor, origin));
        Ok(())
    }

    pub fn get(&self, identifier: &str) -> Option<&PlatformDescriptor> {
        self.platforms.get(identifier).map(|(d, _)| d)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlatformDescriptor> {
        self.platforms.values().map(|(d, _)| d)
    }

    /// Platforms flagged `testing.default`, used when the caller names none.
    pub fn default_platforms(&self) -> Vec<&PlatformDescriptor> {
        self.iter().filter(|p| p.default).collect()
    }

    /// Resolves explicitly requested identifiers, failing on the first unknown one.
    pub fn select(&self, identifiers: &[String]) -> Result<Vec<&PlatformDescriptor>, ConfigurationError> {
        identifiers
            .iter()
            .map(|id| {
                self.get(id)
                    .ok_or_else(|| ConfigurationError::UnknownPlatform(id.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }
}

fn looks_like_descriptor(content: &str) -> bool {
    content
        .lines()
        .any(|line| line.starts_with("identifier:"))
}

fn collect_yaml(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), ConfigurationError> {
    if !dir.is_dir() {
        warn!("Board root is not a directory: {}", dir.display());
        return Ok(());
    }
    let entries = fs::read_dir(dir).map_err(|error| ConfigurationError::Read {
        path: dir.to_path_buf(),
        error,
    })?;
    for entry in entries {
        let entry = entry.map_err(|error| ConfigurationError::Read {
            path: dir.to_path_buf(),
            error,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_yaml(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "yaml") {
            out.push(path);
        }
    }
    Ok(())
}
