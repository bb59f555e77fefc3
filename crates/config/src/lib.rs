// PdkStart - Padauk Firmware Template Toolkit
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub mod makefile;
pub mod project;

pub use project::{ClockOverride, ConfigError, ProjectConfig};

const BUILTIN_CHIPS: &str = include_str!("../chips/padauk.yaml");

/// Default schema version for YAML configs
fn default_schema_version() -> String {
    "1.0".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    #[serde(alias = "PDK13")]
    Pdk13,
    #[serde(alias = "PDK14")]
    Pdk14,
    #[serde(alias = "PDK15")]
    Pdk15,
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Pdk13 => "pdk13",
            Arch::Pdk14 => "pdk14",
            Arch::Pdk15 => "pdk15",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pdk13" => Ok(Arch::Pdk13),
            "pdk14" => Ok(Arch::Pdk14),
            "pdk15" => Ok(Arch::Pdk15),
            _ => Err(format!(
                "unsupported architecture '{}'; supported: pdk13, pdk14, pdk15",
                value
            )),
        }
    }
}

/// System clock sources selectable through CLKMD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockSource {
    /// Internal high-frequency RC oscillator (16 MHz nominal).
    Ihrc,
    /// Internal low-frequency RC oscillator.
    Ilrc,
    /// External crystal or resonator.
    Eosc,
}

impl ClockSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClockSource::Ihrc => "ihrc",
            ClockSource::Ilrc => "ilrc",
            ClockSource::Eosc => "eosc",
        }
    }

    /// CLKMD divider settings available for this source.
    pub fn dividers(&self) -> &'static [u8] {
        match self {
            ClockSource::Ihrc => &[2, 4, 8, 16, 32, 64],
            ClockSource::Ilrc => &[1, 4, 16],
            ClockSource::Eosc => &[1, 2, 4, 8],
        }
    }
}

impl fmt::Display for ClockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClockSource {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ihrc" => Ok(ClockSource::Ihrc),
            "ilrc" => Ok(ClockSource::Ilrc),
            "eosc" => Ok(ClockSource::Eosc),
            _ => Err(format!(
                "unsupported clock source '{}'; supported: ihrc, ilrc, eosc",
                value
            )),
        }
    }
}

/// IO addresses of the registers the startup routine and runtime touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoMap {
    pub sp: u8,
    pub clkmd: u8,
    pub ihrcr: u8,
    #[serde(default)]
    pub ilrcr: Option<u8>,
}

impl IoMap {
    pub fn for_arch(arch: Arch) -> Self {
        match arch {
            // PDK13 parts have no ILRC trim register.
            Arch::Pdk13 => Self {
                sp: 0x02,
                clkmd: 0x03,
                ihrcr: 0x0B,
                ilrcr: None,
            },
            Arch::Pdk14 | Arch::Pdk15 => Self {
                sp: 0x02,
                clkmd: 0x03,
                ihrcr: 0x0B,
                ilrcr: Some(0x39),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysclockLimit {
    pub min_vdd_mv: u16,
    pub max_hz: u32,
}

/// Highest system clock allowed at `vdd_mv`, or `None` below every limit.
pub fn max_sysclock_hz(limits: &[SysclockLimit], vdd_mv: u16) -> Option<u32> {
    limits
        .iter()
        .filter(|limit| vdd_mv >= limit.min_vdd_mv)
        .map(|limit| limit.max_hz)
        .max()
}

fn default_sysclock_limits() -> Vec<SysclockLimit> {
    vec![
        SysclockLimit {
            min_vdd_mv: 2000,
            max_hz: 4_000_000,
        },
        SysclockLimit {
            min_vdd_mv: 2500,
            max_hz: 8_000_000,
        },
    ]
}

fn default_vdd_range() -> [u16; 2] {
    [2000, 5500]
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChipDescriptor {
    pub name: String,
    pub arch: Arch,
    pub rom_words: u32,
    pub ram: String, // e.g. "128 B"
    pub ilrc_hz: u32,
    #[serde(default)]
    pub eosc: bool,
    #[serde(default = "default_vdd_range")]
    pub vdd_mv: [u16; 2], // [min, max]
    #[serde(default = "default_sysclock_limits")]
    pub sysclock_limits: Vec<SysclockLimit>,
    #[serde(default)]
    pub io: Option<IoMap>,
}

impl ChipDescriptor {
    pub fn io_map(&self) -> IoMap {
        self.io.unwrap_or_else(|| IoMap::for_arch(self.arch))
    }

    pub fn ram_bytes(&self) -> Result<u32> {
        let bytes = parse_size(&self.ram)
            .with_context(|| format!("Invalid RAM size for chip {}", self.name))?;
        u32::try_from(bytes).with_context(|| format!("RAM size of {} out of range", self.name))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChipCatalogue {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub chips: Vec<ChipDescriptor>,
}

impl ChipCatalogue {
    pub fn builtin() -> Self {
        Self::from_yaml(BUILTIN_CHIPS).expect("built-in chip catalogue must parse")
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read chip catalogue at {:?}", path))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let catalogue: Self =
            serde_yaml::from_str(yaml).context("Failed to parse Chip Catalogue YAML")?;
        catalogue.validate()?;
        Ok(catalogue)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '1.0'",
                self.schema_version
            );
        }
        for chip in &self.chips {
            chip.ram_bytes()?;
            if chip.rom_words == 0 {
                anyhow::bail!("Chip {} declares zero ROM words", chip.name);
            }
            if chip.vdd_mv[0] > chip.vdd_mv[1] {
                anyhow::bail!("Chip {} has an inverted VDD range", chip.name);
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ChipDescriptor> {
        self.chips
            .iter()
            .find(|chip| chip.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.chips.iter().map(|chip| chip.name.as_str())
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalogue_parses() {
        let catalogue = ChipCatalogue::builtin();
        assert_eq!(catalogue.chips.len(), 19);
        let pfs154 = catalogue.get("pfs154").unwrap();
        assert_eq!(pfs154.arch, Arch::Pdk14);
        assert_eq!(pfs154.rom_words, 2048);
        assert_eq!(pfs154.ram_bytes().unwrap(), 128);
        assert!(pfs154.eosc);
    }

    #[test]
    fn test_builtin_sizes_match_device_table() {
        let catalogue = ChipCatalogue::builtin();
        let expected = [
            ("PFS173", 3072, 256),
            ("PMC251", 1024, 59),
            ("PMS150C", 1024, 64),
            ("PMS152", 1280, 80),
            ("PMS171B", 1536, 96),
        ];
        for (name, rom, ram) in expected {
            let chip = catalogue.get(name).unwrap();
            assert_eq!(chip.rom_words, rom, "{}", name);
            assert_eq!(chip.ram_bytes().unwrap(), ram, "{}", name);
        }
    }

    #[test]
    fn test_io_map_defaults_by_arch() {
        let catalogue = ChipCatalogue::builtin();
        assert_eq!(catalogue.get("PMS150C").unwrap().io_map().ilrcr, None);
        assert_eq!(catalogue.get("PFS154").unwrap().io_map().ilrcr, Some(0x39));
        assert_eq!(catalogue.get("PFS173").unwrap().io_map().clkmd, 0x03);
    }

    #[test]
    fn test_sysclock_limit_by_voltage() {
        let catalogue = ChipCatalogue::builtin();
        let chip = catalogue.get("PFS154").unwrap();
        assert_eq!(max_sysclock_hz(&chip.sysclock_limits, 5000), Some(8_000_000));
        assert_eq!(max_sysclock_hz(&chip.sysclock_limits, 2200), Some(4_000_000));
        assert_eq!(max_sysclock_hz(&chip.sysclock_limits, 1800), None);
    }

    #[test]
    fn test_unknown_schema_version_rejected() {
        let yaml = r#"
schema_version: "2.0"
chips: []
"#;
        let err = ChipCatalogue::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("Unsupported schema_version"));
    }

    #[test]
    fn test_chip_overrides_parse() {
        let yaml = r#"
chips:
  - name: "CUSTOM1"
    arch: "PDK15"
    rom_words: 512
    ram: "32 B"
    ilrc_hz: 70000
    vdd_mv: [1800, 3600]
    sysclock_limits:
      - { min_vdd_mv: 1800, max_hz: 2000000 }
    io: { sp: 2, clkmd: 3, ihrcr: 11, ilrcr: 60 }
"#;
        let catalogue = ChipCatalogue::from_yaml(yaml).unwrap();
        let chip = catalogue.get("custom1").unwrap();
        assert_eq!(chip.arch, Arch::Pdk15);
        assert!(!chip.eosc);
        assert_eq!(chip.io_map().ilrcr, Some(60));
        assert_eq!(max_sysclock_hz(&chip.sysclock_limits, 3300), Some(2_000_000));
    }

    #[test]
    fn test_dividers_per_source() {
        assert_eq!(ClockSource::Ihrc.dividers(), &[2, 4, 8, 16, 32, 64]);
        assert!(!ClockSource::Ilrc.dividers().contains(&2));
        assert!(ClockSource::Eosc.dividers().contains(&1));
    }

    #[test]
    fn test_arch_from_str() {
        assert_eq!("PDK14".parse::<Arch>(), Ok(Arch::Pdk14));
        assert!("pdk16".parse::<Arch>().unwrap_err().contains("unsupported"));
    }
}
