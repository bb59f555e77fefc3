// PdkStart - Padauk Firmware Template Toolkit
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Template firmware image: reset vector, runtime init, startup hook, main.
//!
//! Layout in ROM:
//!
//! ```text
//! reset:         mov a, #stack_base ; mov sp, a
//!                call _sdcc_external_startup
//!                ceqsn a, #0          ; skip the jump when status is 0
//!                goto start_main
//! runtime_init:  clear m (bss) ; mov a, #k ; mov m, a (data)
//! start_main:    call main
//! idle:          goto idle
//! _sdcc_external_startup: clock setup, calibration marker, ret #status
//! main:          ret
//! ```

use crate::isa::{self, Instruction, IsaError};
use crate::startup::{startup_routine, StartupStatus, STARTUP_SYMBOL};
use crate::sysclock::ClockPlan;
use crate::Arch;
use anyhow::{Context, Result};
use pdkstart_config::ChipDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

pub const RESET_SYMBOL: &str = "reset";
pub const RUNTIME_INIT_SYMBOL: &str = "runtime_init";
pub const START_MAIN_SYMBOL: &str = "start_main";
pub const IDLE_SYMBOL: &str = "idle";
pub const MAIN_SYMBOL: &str = "main";

/// RAM bytes kept free above the static data for return addresses.
pub const STACK_RESERVE: u32 = 4;

const CRT0_WORDS: u16 = 5;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("Program needs {used} words but the chip has {available}")]
    RomOverflow { used: u32, available: u32 },
    #[error("Program needs {used} bytes of RAM but the chip has {available}")]
    RamOverflow { used: u32, available: u32 },
    #[error("Invalid chip description: {0}")]
    InvalidChip(String),
    #[error(transparent)]
    Isa(#[from] IsaError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RamLayout {
    /// Initial values of the data section, placed at address 0.
    pub data: Vec<u8>,
    pub bss_start: u8,
    pub bss_len: u8,
    pub stack_base: u8,
    pub ram_bytes: u32,
}

impl RamLayout {
    pub fn used(&self) -> u32 {
        self.stack_base as u32 + STACK_RESERVE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    pub arch: Arch,
    pub words: Vec<u16>,
    pub symbols: BTreeMap<String, u16>,
    pub ram: Option<RamLayout>,
}

/// Everything about an image that the HEX file does not carry.
#[derive(Debug, Serialize, Deserialize)]
struct ImageMap {
    arch: Arch,
    words: usize,
    symbols: BTreeMap<String, u16>,
    ram: Option<RamLayout>,
}

impl FirmwareImage {
    pub fn from_words(arch: Arch, words: Vec<u16>) -> Self {
        Self {
            arch,
            words,
            symbols: BTreeMap::new(),
            ram: None,
        }
    }

    pub fn symbol(&self, name: &str) -> Option<u16> {
        self.symbols.get(name).copied()
    }

    /// Symbol defined exactly at `addr`.
    pub fn symbol_at(&self, addr: u16) -> Option<&str> {
        self.symbols
            .iter()
            .find(|&(_, &a)| a == addr)
            .map(|(name, _)| name.as_str())
    }

    pub fn decode(&self, addr: u16) -> Option<Instruction> {
        self.words
            .get(addr as usize)
            .map(|&word| isa::decode(self.arch, word))
    }

    /// Symbols ordered by address, each with its length in words.
    pub fn sections(&self) -> Vec<Section> {
        let mut starts: Vec<(&String, u16)> = self.symbols.iter().map(|(n, &a)| (n, a)).collect();
        starts.sort_by_key(|&(_, addr)| addr);
        let end = self.words.len() as u16;
        starts
            .iter()
            .enumerate()
            .map(|(i, &(name, start))| {
                let next = starts.get(i + 1).map_or(end, |&(_, addr)| addr);
                Section {
                    name: name.clone(),
                    start,
                    words: next.saturating_sub(start),
                }
            })
            .collect()
    }

    /// Disassembly with symbol labels.
    pub fn listing(&self) -> String {
        let mut out = String::new();
        for (addr, &word) in self.words.iter().enumerate() {
            let addr = addr as u16;
            if let Some(label) = self.symbol_at(addr) {
                out.push_str(&format!("{}:\n", label));
            }
            out.push_str(&format!(
                "  {:04x}  {:04x}  {}\n",
                addr,
                word,
                isa::decode(self.arch, word)
            ));
        }
        out
    }

    pub fn write_map<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let map = ImageMap {
            arch: self.arch,
            words: self.words.len(),
            symbols: self.symbols.clone(),
            ram: self.ram.clone(),
        };
        let json = serde_json::to_string_pretty(&map).context("Failed to serialize image map")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write map file {:?}", path))
    }

    /// Attaches symbols and RAM layout from a map file written by [`Self::write_map`].
    pub fn load_map<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read map file {:?}", path))?;
        let map: ImageMap = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse map file {:?}", path))?;
        if map.arch != self.arch {
            anyhow::bail!(
                "Map file {:?} describes a {} image, expected {}",
                path,
                map.arch,
                self.arch
            );
        }
        if map.words != self.words.len() {
            tracing::warn!(
                "Map file {:?} describes {} words, image has {}",
                path,
                map.words,
                self.words.len()
            );
        }
        self.symbols = map.symbols;
        self.ram = map.ram;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub name: String,
    pub start: u16,
    pub words: u16,
}

pub struct ImageBuilder<'a> {
    chip: &'a ChipDescriptor,
    plan: &'a ClockPlan,
    status: StartupStatus,
    data: Vec<u8>,
    bss_len: u8,
}

impl<'a> ImageBuilder<'a> {
    pub fn new(chip: &'a ChipDescriptor, plan: &'a ClockPlan) -> Self {
        Self {
            chip,
            plan,
            status: StartupStatus::Continue,
            data: Vec::new(),
            bss_len: 0,
        }
    }

    pub fn with_startup_status(mut self, status: StartupStatus) -> Self {
        self.status = status;
        self
    }

    /// Initialised RAM contents, copied by the runtime init.
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Zero-initialised RAM bytes, cleared by the runtime init.
    pub fn with_bss(mut self, len: u8) -> Self {
        self.bss_len = len;
        self
    }

    pub fn build(self) -> Result<FirmwareImage, ImageError> {
        let arch = self.chip.arch;
        let io = self.chip.io_map();
        let ram_bytes = self
            .chip
            .ram_bytes()
            .map_err(|e| ImageError::InvalidChip(format!("{:#}", e)))?;
        let encoding = isa::encoding(arch);
        if self.chip.rom_words > encoding.max_program_words()
            || ram_bytes > encoding.max_ram_bytes()
        {
            return Err(ImageError::InvalidChip(format!(
                "{} declares {} words ROM and {} bytes RAM, {} addresses at most {} and {}",
                self.chip.name,
                self.chip.rom_words,
                ram_bytes,
                arch,
                encoding.max_program_words(),
                encoding.max_ram_bytes()
            )));
        }

        let data_len = self.data.len() as u32;
        let stack_base = data_len + self.bss_len as u32;
        let ram_used = stack_base + STACK_RESERVE;
        if ram_used > ram_bytes || stack_base > u8::MAX as u32 {
            return Err(ImageError::RamOverflow {
                used: ram_used,
                available: ram_bytes,
            });
        }
        let layout = RamLayout {
            data: self.data,
            bss_start: data_len as u8,
            bss_len: self.bss_len,
            stack_base: stack_base as u8,
            ram_bytes,
        };

        let mut init = Vec::new();
        for offset in 0..layout.bss_len {
            init.push(Instruction::ClearM(layout.bss_start + offset));
        }
        for (addr, &value) in layout.data.iter().enumerate() {
            init.push(Instruction::MovAK(value));
            init.push(Instruction::MovMA(addr as u8));
        }
        let startup = startup_routine(self.plan, &io, self.status);

        let runtime_init = CRT0_WORDS;
        let start_main = runtime_init + init.len() as u16;
        let idle = start_main + 1;
        let startup_addr = idle + 1;
        let main = startup_addr + startup.len() as u16;

        let mut program = vec![
            Instruction::MovAK(layout.stack_base),
            Instruction::MovIoA(io.sp),
            Instruction::Call(startup_addr),
            Instruction::CeqsnAK(0),
            Instruction::Goto(start_main),
        ];
        program.extend(init);
        program.push(Instruction::Call(main));
        program.push(Instruction::Goto(idle));
        program.extend(startup);
        program.push(Instruction::Ret);

        let used = program.len() as u32;
        if used > self.chip.rom_words {
            return Err(ImageError::RomOverflow {
                used,
                available: self.chip.rom_words,
            });
        }
        let words = program
            .into_iter()
            .map(|instruction| isa::encode(arch, instruction))
            .collect::<Result<Vec<_>, _>>()?;

        let symbols = [
            (RESET_SYMBOL, 0),
            (RUNTIME_INIT_SYMBOL, runtime_init),
            (START_MAIN_SYMBOL, start_main),
            (IDLE_SYMBOL, idle),
            (STARTUP_SYMBOL, startup_addr),
            (MAIN_SYMBOL, main),
        ]
        .into_iter()
        .map(|(name, addr)| (name.to_string(), addr))
        .collect();

        tracing::info!(
            "Built {} image for {}: {} words, clock {}",
            arch,
            self.chip.name,
            words.len(),
            self.plan
        );
        Ok(FirmwareImage {
            arch,
            words,
            symbols,
            ram: Some(layout),
        })
    }
}

/// Usage thresholds reported by `size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageLevel {
    Ok,
    /// Above 75 %.
    Note,
    /// Above 90 %.
    Warning,
    /// Above 100 %.
    Overflow,
}

impl UsageLevel {
    pub fn from_percent(percent: u32) -> Self {
        match percent {
            p if p > 100 => UsageLevel::Overflow,
            p if p > 90 => UsageLevel::Warning,
            p if p > 75 => UsageLevel::Note,
            _ => UsageLevel::Ok,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizeReport {
    pub device: String,
    pub rom_used: u32,
    pub rom_total: u32,
    pub ram_used: Option<u32>,
    pub ram_total: u32,
    pub sections: Vec<Section>,
}

impl SizeReport {
    pub fn new(image: &FirmwareImage, chip: &ChipDescriptor) -> Result<Self> {
        Ok(Self {
            device: chip.name.clone(),
            rom_used: image.words.len() as u32,
            rom_total: chip.rom_words,
            ram_used: image.ram.as_ref().map(RamLayout::used),
            ram_total: chip.ram_bytes()?,
            sections: image.sections(),
        })
    }

    pub fn rom_percent(&self) -> u32 {
        self.rom_used * 100 / self.rom_total.max(1)
    }

    pub fn ram_percent(&self) -> Option<u32> {
        self.ram_used.map(|used| used * 100 / self.ram_total.max(1))
    }

    pub fn rom_level(&self) -> UsageLevel {
        UsageLevel::from_percent(self.rom_percent())
    }
}

impl fmt::Display for SizeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Device: {}", self.device)?;
        writeln!(
            f,
            "ROM: {}/{} words ({}%)",
            self.rom_used,
            self.rom_total,
            self.rom_percent()
        )?;
        match (self.ram_used, self.ram_percent()) {
            (Some(used), Some(percent)) => {
                writeln!(f, "RAM: {}/{} bytes ({}%)", used, self.ram_total, percent)?
            }
            _ => writeln!(f, "RAM: unknown (no map file)")?,
        }
        for section in &self.sections {
            writeln!(
                f,
                "  {:<24} {:#06x} {:>5} words",
                section.name, section.start, section.words
            )?;
        }
        Ok(())
    }
}
