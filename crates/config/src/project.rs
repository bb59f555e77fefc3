// PdkStart - Padauk Firmware Template Toolkit
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{Arch, ChipCatalogue, ChipDescriptor, ClockSource};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MIN_F_CPU_HZ: u32 = 1;
pub const MAX_F_CPU_HZ: u32 = 20_000_000;
pub const MIN_VDD_MV: u16 = 1800;
pub const MAX_VDD_MV: u16 = 5500;

/// Largest tolerated gap between `TARGET_VDD` and `TARGET_VDD_MV`.
const VDD_AGREEMENT_MV: f32 = 50.0;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Unknown device '{0}'")]
    UnknownDevice(String),
    #[error("Device {device} is a {expected} part, but ARCH is {found}")]
    ArchMismatch {
        device: String,
        expected: Arch,
        found: Arch,
    },
    #[error("Invalid project name '{0}': must be non-empty and contain no whitespace")]
    InvalidProjectName(String),
    #[error("F_CPU {0} Hz is outside 1..=20000000 Hz")]
    FrequencyOutOfRange(u32),
    #[error("TARGET_VDD_MV {0} mV is outside 1800..=5500 mV")]
    VoltageOutOfRange(u16),
    #[error("TARGET_VDD {volts} V disagrees with TARGET_VDD_MV {millivolts} mV")]
    VoltageMismatch { millivolts: u16, volts: f32 },
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}

/// Build-configuration override of the automatic clock selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ClockOverride {
    /// Force the fast internal oscillator. Without a divider one is chosen automatically.
    Ihrc {
        #[serde(default)]
        divider: Option<u8>,
    },
    /// Force the slow internal oscillator.
    Ilrc {
        #[serde(default)]
        divider: Option<u8>,
    },
    /// Run from an external oscillator of the given frequency.
    Eosc {
        crystal_hz: u32,
        #[serde(default)]
        divider: Option<u8>,
    },
}

impl ClockOverride {
    pub fn source(&self) -> ClockSource {
        match self {
            ClockOverride::Ihrc { .. } => ClockSource::Ihrc,
            ClockOverride::Ilrc { .. } => ClockSource::Ilrc,
            ClockOverride::Eosc { .. } => ClockSource::Eosc,
        }
    }

    pub fn divider(&self) -> Option<u8> {
        match *self {
            ClockOverride::Ihrc { divider }
            | ClockOverride::Ilrc { divider }
            | ClockOverride::Eosc { divider, .. } => divider,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    pub project_name: String,
    pub device: String,
    pub arch: Arch,
    pub f_cpu: u32,
    pub target_vdd_mv: u16,
    pub target_vdd: f32,
    #[serde(default = "default_opt_flags")]
    pub opt_flags: String,
    #[serde(default)]
    pub clock: Option<ClockOverride>,
}

fn default_opt_flags() -> String {
    "--opt-code-size".to_string()
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            project_name: "MyProject".to_string(),
            device: "PFS154".to_string(),
            arch: Arch::Pdk14,
            f_cpu: 8_000_000,
            target_vdd_mv: 5000,
            target_vdd: 5.0,
            opt_flags: default_opt_flags(),
            clock: None,
        }
    }
}

impl ProjectConfig {
    /// Loads a project from a YAML file (`.yaml`/`.yml`) or a Makefile (anything else).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read project config at {:?}", path))?;

        let is_yaml = path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if is_yaml {
            Self::from_yaml(&content)
        } else {
            Self::from_makefile_str(&content)
                .with_context(|| format!("Failed to parse Makefile variables in {:?}", path))
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse Project Config YAML")
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize Project Config")
    }

    /// `<PROJECT_NAME>_<DEVICE>`, the stem of every build artifact.
    pub fn output_name(&self) -> String {
        format!("{}_{}", self.project_name, self.device)
    }

    /// Checks the config against the catalogue and returns the selected chip.
    pub fn validate<'a>(
        &self,
        catalogue: &'a ChipCatalogue,
    ) -> Result<&'a ChipDescriptor, ConfigError> {
        if self.project_name.is_empty() || self.project_name.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidProjectName(self.project_name.clone()));
        }

        let chip = catalogue
            .get(&self.device)
            .ok_or_else(|| ConfigError::UnknownDevice(self.device.clone()))?;
        if chip.arch != self.arch {
            return Err(ConfigError::ArchMismatch {
                device: chip.name.clone(),
                expected: chip.arch,
                found: self.arch,
            });
        }

        if !(MIN_F_CPU_HZ..=MAX_F_CPU_HZ).contains(&self.f_cpu) {
            return Err(ConfigError::FrequencyOutOfRange(self.f_cpu));
        }
        if !(MIN_VDD_MV..=MAX_VDD_MV).contains(&self.target_vdd_mv) {
            return Err(ConfigError::VoltageOutOfRange(self.target_vdd_mv));
        }
        if (self.target_vdd * 1000.0 - f32::from(self.target_vdd_mv)).abs() > VDD_AGREEMENT_MV {
            return Err(ConfigError::VoltageMismatch {
                millivolts: self.target_vdd_mv,
                volts: self.target_vdd,
            });
        }

        if let Some(ClockOverride::Eosc { crystal_hz: 0, .. }) = self.clock {
            return Err(ConfigError::InvalidValue {
                key: "EOSC_HZ".to_string(),
                value: "0".to_string(),
            });
        }
        if let Some(clock) = self.clock {
            match clock.divider() {
                Some(divider) if !clock.source().dividers().contains(&divider) => {
                    return Err(ConfigError::InvalidValue {
                        key: "CLOCK_DIVIDER".to_string(),
                        value: divider.to_string(),
                    });
                }
                _ => {}
            }
        }

        tracing::debug!("Project {} validated against chip {}", self.project_name, chip.name);
        Ok(chip)
    }
}
