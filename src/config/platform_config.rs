//! Target platform descriptors, read from board YAML files.
//!
//! ```yaml
//! identifier: qemu_x86
//! arch: x86
//! type: qemu
//! simulation:
//!   - name: qemu
//! ram: 256
//! toolchain: [zephyr, xtools]
//! testing:
//!   default: true
//!   ignore_tags: [net]
//! ```

use crate::utils::{string_or_list, string_or_set};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;

/// Kind of target a platform describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlatformType {
    #[default]
    Mcu,
    Qemu,
    Native,
    Unit,
}

impl PlatformType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformType::Mcu => "mcu",
            PlatformType::Qemu => "qemu",
            PlatformType::Native => "native",
            PlatformType::Unit => "unit",
        }
    }
}

impl fmt::Display for PlatformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Simulation backend used to execute images for a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Default)]
pub enum Simulation {
    #[default]
    #[serde(alias = "na", rename = "none")]
    None,
    #[serde(rename = "qemu")]
    Qemu,
    #[serde(rename = "native")]
    Native,
    #[serde(rename = "nsim")]
    Nsim,
    #[serde(rename = "mdb-nsim")]
    MdbNsim,
    #[serde(rename = "renode")]
    Renode,
    #[serde(rename = "tsim")]
    Tsim,
    #[serde(rename = "armfvp")]
    ArmFvp,
    #[serde(rename = "xt-sim")]
    XtSim,
    #[serde(rename = "simics")]
    Simics,
    #[serde(rename = "custom")]
    Custom,
}

impl Simulation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Simulation::None => "na",
            Simulation::Qemu => "qemu",
            Simulation::Native => "native",
            Simulation::Nsim => "nsim",
            Simulation::MdbNsim => "mdb-nsim",
            Simulation::Renode => "renode",
            Simulation::Tsim => "tsim",
            Simulation::ArmFvp => "armfvp",
            Simulation::XtSim => "xt-sim",
            Simulation::Simics => "simics",
            Simulation::Custom => "custom",
        }
    }

    /// Simulators whose images are executed through an external binary that must be on PATH.
    pub fn requires_exec(&self) -> bool {
        matches!(
            self,
            Simulation::Nsim
                | Simulation::MdbNsim
                | Simulation::Renode
                | Simulation::Tsim
                | Simulation::Native
                | Simulation::Simics
                | Simulation::Custom
        )
    }
}

impl fmt::Display for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SimulationEntry {
    name: Simulation,
    #[serde(default)]
    exec: Option<String>,
}

/// `simulation:` accepts either a bare backend name or a list of `{name, exec}` entries.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SimulationField {
    Name(Simulation),
    List(Vec<SimulationEntry>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformTesting {
    #[serde(default)]
    pub default: bool,
    #[serde(default, deserialize_with = "string_or_set")]
    pub only_tags: BTreeSet<String>,
    #[serde(default, deserialize_with = "string_or_set")]
    pub ignore_tags: BTreeSet<String>,
    #[serde(default = "default_timeout_multiplier")]
    pub timeout_multiplier: f64,
}

// a board without a `testing:` block keeps its scenarios' timeouts unscaled
impl Default for PlatformTesting {
    fn default() -> Self {
        Self {
            default: false,
            only_tags: BTreeSet::new(),
            ignore_tags: BTreeSet::new(),
            timeout_multiplier: default_timeout_multiplier(),
        }
    }
}

fn default_timeout_multiplier() -> f64 {
    1.0
}

fn default_ram() -> u64 {
    128
}

fn default_flash() -> u64 {
    512
}

/// Raw descriptor as written in the YAML file.
#[derive(Debug, Clone, Deserialize)]
struct RawPlatform {
    identifier: String,
    #[serde(default)]
    name: Option<String>,
    arch: String,
    #[serde(default, rename = "type")]
    platform_type: PlatformType,
    #[serde(default)]
    simulation: Option<SimulationField>,
    #[serde(default)]
    simulation_exec: Option<String>,
    #[serde(default = "default_ram")]
    ram: u64,
    #[serde(default = "default_flash")]
    flash: u64,
    #[serde(default, deserialize_with = "string_or_list")]
    toolchain: Vec<String>,
    #[serde(default, deserialize_with = "string_or_set")]
    supported: BTreeSet<String>,
    #[serde(default)]
    testing: PlatformTesting,
}

/// Normalised target platform descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformDescriptor {
    pub identifier: String,
    pub name: String,
    pub arch: String,
    pub platform_type: PlatformType,
    pub simulation: Simulation,
    pub simulation_exec: Option<String>,
    /// RAM budget in KB.
    pub ram: u64,
    /// Flash budget in KB.
    pub flash: u64,
    pub toolchains: BTreeSet<String>,
    /// Hardware features the board provides, matched against a scenario's `depends_on`.
    pub supported: BTreeSet<String>,
    pub only_tags: BTreeSet<String>,
    pub ignore_tags: BTreeSet<String>,
    pub default: bool,
    pub timeout_multiplier: f64,
}

impl PlatformDescriptor {
    /// Parses a single board descriptor from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        let raw: RawPlatform = serde_yaml::from_str(content)?;
        Ok(raw.into())
    }

    /// Minimal descriptor, mainly useful when composing platforms programmatically.
    pub fn new(identifier: &str, arch: &str, platform_type: PlatformType) -> Self {
        Self {
            identifier: identifier.to_string(),
            name: identifier.to_string(),
            arch: arch.to_string(),
            platform_type,
            simulation: Simulation::None,
            simulation_exec: None,
            ram: default_ram(),
            flash: default_flash(),
            toolchains: BTreeSet::new(),
            supported: BTreeSet::new(),
            only_tags: BTreeSet::new(),
            ignore_tags: BTreeSet::new(),
            default: false,
            timeout_multiplier: default_timeout_multiplier(),
        }
    }
}

impl From<RawPlatform> for PlatformDescriptor {
    fn from(raw: RawPlatform) -> Self {
        let (simulation, list_exec) = match raw.simulation {
            None => (Simulation::None, None),
            Some(SimulationField::Name(sim)) => (sim, None),
            // first entry is the default backend
            Some(SimulationField::List(entries)) => match entries.into_iter().next() {
                Some(entry) => (entry.name, entry.exec),
                None => (Simulation::None, None),
            },
        };
        Self {
            name: raw.name.unwrap_or_else(|| raw.identifier.clone()),
            identifier: raw.identifier,
            arch: raw.arch,
            platform_type: raw.platform_type,
            simulation,
            simulation_exec: list_exec.or(raw.simulation_exec),
            ram: raw.ram,
            flash: raw.flash,
            toolchains: raw.toolchain.into_iter().collect(),
            supported: raw.supported,
            only_tags: raw.testing.only_tags,
            ignore_tags: raw.testing.ignore_tags,
            default: raw.testing.default,
            timeout_multiplier: raw.testing.timeout_multiplier,
        }
    }
}
