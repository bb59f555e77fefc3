// PdkStart - Padauk Firmware Template Toolkit
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Project configuration stored as Makefile variables.
//!
//! Only plain `KEY = value` assignment lines are considered. Comment lines and
//! recipe lines (tab-indented) are never read or rewritten, so documentation
//! blocks that mention `DEVICE = ...` survive an update untouched.

use crate::project::{ClockOverride, ConfigError, ProjectConfig};
use crate::{Arch, ChipCatalogue, ClockSource};
use std::collections::{BTreeMap, HashSet};

const MAKEFILE_TEMPLATE: &str = include_str!("../templates/Makefile.in");

pub const PROJECT_NAME: &str = "PROJECT_NAME";
pub const DEVICE: &str = "DEVICE";
pub const ARCH: &str = "ARCH";
pub const F_CPU: &str = "F_CPU";
pub const TARGET_VDD_MV: &str = "TARGET_VDD_MV";
pub const TARGET_VDD: &str = "TARGET_VDD";
pub const OPT_FLAGS: &str = "OPT_FLAGS";
pub const CLOCK_SOURCE: &str = "CLOCK_SOURCE";
pub const CLOCK_DIVIDER: &str = "CLOCK_DIVIDER";
pub const EOSC_HZ: &str = "EOSC_HZ";

/// Splits a Makefile line into `(key, value)` if it is a variable assignment.
fn assignment(line: &str) -> Option<(&str, &str)> {
    if line.starts_with('\t') {
        return None;
    }
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return None;
    }

    let eq = trimmed.find('=')?;
    let key = trimmed[..eq]
        .trim_end()
        .trim_end_matches([':', '?', '+'])
        .trim_end();
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }

    let value = trimmed[eq + 1..].split('#').next().unwrap_or("").trim();
    Some((key, value))
}

/// Collects every variable assignment. Later assignments win.
pub fn parse_vars(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .filter_map(assignment)
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn format_volts(volts: f32) -> String {
    let tenths = volts * 10.0;
    if (tenths - tenths.round()).abs() < 1e-3 {
        format!("{:.1}", volts)
    } else {
        format!("{:.2}", volts)
    }
}

impl ProjectConfig {
    /// Reads a project from Makefile text. Missing keys keep their defaults.
    pub fn from_makefile_str(content: &str) -> Result<Self, ConfigError> {
        let vars = parse_vars(content);
        let mut config = ProjectConfig::default();

        if let Some(name) = vars.get(PROJECT_NAME) {
            config.project_name = name.clone();
        }
        if let Some(device) = vars.get(DEVICE) {
            config.device = device.clone();
        }
        if let Some(arch) = vars.get(ARCH) {
            config.arch = arch
                .parse::<Arch>()
                .map_err(|_| ConfigError::InvalidValue {
                    key: ARCH.to_string(),
                    value: arch.clone(),
                })?;
        }
        if let Some(f_cpu) = vars.get(F_CPU) {
            config.f_cpu = parse_number(F_CPU, f_cpu)?;
        }
        if let Some(mv) = vars.get(TARGET_VDD_MV) {
            config.target_vdd_mv = parse_number(TARGET_VDD_MV, mv)?;
        }
        if let Some(volts) = vars.get(TARGET_VDD) {
            config.target_vdd = parse_number(TARGET_VDD, volts)?;
        }
        if let Some(flags) = vars.get(OPT_FLAGS) {
            config.opt_flags = flags.clone();
        }

        let divider = vars
            .get(CLOCK_DIVIDER)
            .map(|d| parse_number::<u8>(CLOCK_DIVIDER, d))
            .transpose()?;
        config.clock = match vars.get(CLOCK_SOURCE).map(|s| s.to_ascii_lowercase()) {
            None => None,
            Some(source) if source == "auto" || source.is_empty() => None,
            Some(source) => match source.parse::<ClockSource>() {
                Ok(ClockSource::Ihrc) => Some(ClockOverride::Ihrc { divider }),
                Ok(ClockSource::Ilrc) => Some(ClockOverride::Ilrc { divider }),
                Ok(ClockSource::Eosc) => {
                    let crystal = vars.get(EOSC_HZ).ok_or_else(|| ConfigError::InvalidValue {
                        key: EOSC_HZ.to_string(),
                        value: String::new(),
                    })?;
                    Some(ClockOverride::Eosc {
                        crystal_hz: parse_number(EOSC_HZ, crystal)?,
                        divider,
                    })
                }
                Err(_) => {
                    return Err(ConfigError::InvalidValue {
                        key: CLOCK_SOURCE.to_string(),
                        value: source,
                    })
                }
            },
        };

        Ok(config)
    }

    /// The Makefile variables describing this project, in file order.
    pub fn to_makefile_vars(&self) -> Vec<(&'static str, String)> {
        let mut vars = vec![
            (DEVICE, self.device.clone()),
            (ARCH, self.arch.to_string()),
            (PROJECT_NAME, self.project_name.clone()),
            (F_CPU, self.f_cpu.to_string()),
            (TARGET_VDD_MV, self.target_vdd_mv.to_string()),
            (TARGET_VDD, format_volts(self.target_vdd)),
            (OPT_FLAGS, self.opt_flags.clone()),
        ];

        match self.clock {
            None => vars.push((CLOCK_SOURCE, "auto".to_string())),
            Some(clock) => {
                vars.push((CLOCK_SOURCE, clock.source().to_string()));
                if let Some(divider) = clock.divider() {
                    vars.push((CLOCK_DIVIDER, divider.to_string()));
                }
                if let ClockOverride::Eosc { crystal_hz, .. } = clock {
                    vars.push((EOSC_HZ, crystal_hz.to_string()));
                }
            }
        }
        vars
    }
}

/// Override keys are only written while the override uses them; a leftover
/// line would be read back into the next override.
fn is_stale_clock_key(line: &str) -> bool {
    matches!(assignment(line), Some((key, _)) if key == CLOCK_DIVIDER || key == EOSC_HZ)
}

/// Rewrites the project's assignment lines in `content`, keeping everything else.
///
/// Keys that have no assignment yet are inserted after the last rewritten line.
/// `CLOCK_DIVIDER` and `EOSC_HZ` lines the config no longer carries are dropped.
pub fn update_vars(content: &str, config: &ProjectConfig) -> String {
    let vars = config.to_makefile_vars();
    let mut seen = HashSet::new();
    let mut lines: Vec<String> = Vec::new();
    let mut insert_at = 0;

    for line in content.lines() {
        let replacement = assignment(line).and_then(|(key, _)| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(k, v)| (*k, format!("{} = {}", k, v)))
        });
        match replacement {
            Some((key, rewritten)) => {
                seen.insert(key);
                lines.push(rewritten);
                insert_at = lines.len();
            }
            None if is_stale_clock_key(line) => {
                tracing::debug!("Dropping stale clock setting '{}'", line.trim());
            }
            None => lines.push(line.to_string()),
        }
    }

    let missing: Vec<String> = vars
        .iter()
        .filter(|(key, _)| !seen.contains(key))
        .map(|(key, value)| format!("{} = {}", key, value))
        .collect();
    if !missing.is_empty() {
        tracing::debug!("Appending {} missing Makefile variables", missing.len());
    }
    for (offset, line) in missing.into_iter().enumerate() {
        lines.insert(insert_at + offset, line);
    }

    let mut out = lines.join("\n");
    if content.is_empty() || content.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Renders a fresh project Makefile for `config`.
pub fn render_default(config: &ProjectConfig, catalogue: &ChipCatalogue) -> String {
    let project_vars = config
        .to_makefile_vars()
        .into_iter()
        .map(|(key, value)| format!("{} = {}", key, value))
        .collect::<Vec<_>>()
        .join("\n");

    let rom_sizes = catalogue
        .chips
        .iter()
        .map(|chip| format!("{}={}", chip.name, chip.rom_words))
        .collect::<Vec<_>>()
        .join(" ");
    let ram_sizes = catalogue
        .chips
        .iter()
        .filter_map(|chip| {
            chip.ram_bytes()
                .ok()
                .map(|bytes| format!("{}={}", chip.name, bytes))
        })
        .collect::<Vec<_>>()
        .join(" ");

    MAKEFILE_TEMPLATE
        .replace("@PROJECT_VARS@", &project_vars)
        .replace("@ROM_SIZES@", &rom_sizes)
        .replace("@RAM_SIZES@", &ram_sizes)
}
