// PdkStart - Padauk Firmware Template Toolkit
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Simulated core executing a [`FirmwareImage`] from reset.
//!
//! The stack lives in RAM at the address held by the SP IO register and grows
//! upwards, two bytes per return address. Every call, return and IO write is
//! recorded as a [`BootEvent`].

use crate::image::FirmwareImage;
use crate::io::{DeviceIo, IoSpace};
use crate::isa::{self, Instruction};
use crate::startup::{StartupStatus, STARTUP_SYMBOL};
use crate::{SimResult, SimulationError};
use pdkstart_config::{ChipDescriptor, IoMap};
use serde::Serialize;
use std::collections::HashSet;

/// Power-on RAM contents, so untouched bytes are recognisable.
pub const RAM_FILL: u8 = 0xA5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BootEvent {
    Reset,
    Call {
        from: u16,
        to: u16,
        symbol: Option<String>,
    },
    Return {
        to: u16,
        a: u8,
    },
    IoWrite {
        addr: u8,
        value: u8,
    },
    Idle {
        pc: u16,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Reached a `goto` to itself.
    Idle { pc: u16 },
    Breakpoint(u16),
    MaxStepsReached,
}

pub struct Machine<B: IoSpace> {
    pub image: FirmwareImage,
    pub io: B,
    pub ram: Vec<u8>,
    pub pc: u16,
    pub a: u8,

    // Debug state
    pub breakpoints: HashSet<u16>,
    pub total_cycles: u64,
    sp_addr: u8,
    trace: Vec<BootEvent>,
}

impl Machine<DeviceIo> {
    /// Machine with the register file and RAM size of `chip`.
    pub fn for_chip(image: FirmwareImage, chip: &ChipDescriptor) -> anyhow::Result<Self> {
        let map = chip.io_map();
        Ok(Self::new(image, DeviceIo::new(map), chip.ram_bytes()?, &map))
    }
}

impl<B: IoSpace> Machine<B> {
    pub fn new(image: FirmwareImage, io: B, ram_bytes: u32, map: &IoMap) -> Self {
        Self {
            image,
            io,
            ram: vec![RAM_FILL; ram_bytes as usize],
            pc: 0,
            a: 0,
            breakpoints: HashSet::new(),
            total_cycles: 0,
            sp_addr: map.sp,
            trace: vec![BootEvent::Reset],
        }
    }

    pub fn trace(&self) -> &[BootEvent] {
        &self.trace
    }

    /// Number of calls into the routine named `symbol`.
    pub fn call_count(&self, symbol: &str) -> usize {
        self.trace
            .iter()
            .filter(|event| matches!(event, BootEvent::Call { symbol: Some(s), .. } if s == symbol))
            .count()
    }

    /// Status returned by the startup hook, once it has returned.
    pub fn startup_status(&self) -> Option<StartupStatus> {
        let call = self.trace.iter().position(|event| {
            matches!(event, BootEvent::Call { symbol: Some(s), .. } if s == STARTUP_SYMBOL)
        })?;
        self.trace[call..].iter().find_map(|event| match event {
            BootEvent::Return { a, .. } => Some(StartupStatus::from_code(*a)),
            _ => None,
        })
    }

    fn read_ram(&self, addr: u8) -> SimResult<u8> {
        self.ram
            .get(addr as usize)
            .copied()
            .ok_or(SimulationError::MemoryViolation(addr as u16))
    }

    fn write_ram(&mut self, addr: u8, value: u8) -> SimResult<()> {
        let byte = self
            .ram
            .get_mut(addr as usize)
            .ok_or(SimulationError::MemoryViolation(addr as u16))?;
        *byte = value;
        Ok(())
    }

    fn push(&mut self, value: u16) -> SimResult<()> {
        let sp = self.io.read(self.sp_addr)?;
        if sp as usize + 2 > self.ram.len() {
            return Err(SimulationError::StackOverflow(sp));
        }
        let [lo, hi] = value.to_le_bytes();
        self.write_ram(sp, lo)?;
        self.write_ram(sp + 1, hi)?;
        self.io.write(self.sp_addr, sp + 2)
    }

    fn pop(&mut self) -> SimResult<u16> {
        let sp = self.io.read(self.sp_addr)?;
        if sp < 2 {
            return Err(SimulationError::StackUnderflow(sp));
        }
        let sp = sp - 2;
        let value = u16::from_le_bytes([self.read_ram(sp)?, self.read_ram(sp + 1)?]);
        self.io.write(self.sp_addr, sp)?;
        Ok(value)
    }

    fn fetch(&self, pc: u16) -> SimResult<Instruction> {
        let word = *self
            .image
            .words
            .get(pc as usize)
            .ok_or(SimulationError::PcOutOfRange(pc))?;
        match isa::decode(self.image.arch, word) {
            Instruction::Unknown(word) => Err(SimulationError::DecodeError { pc, word }),
            instruction => Ok(instruction),
        }
    }

    pub fn step(&mut self) -> SimResult<()> {
        let pc = self.pc;
        let instruction = self.fetch(pc)?;
        tracing::debug!("{:#06x}: {}", pc, instruction);

        let mut next = pc.wrapping_add(1);
        let mut cycles = 1;
        match instruction {
            Instruction::Nop => {}
            Instruction::MovAK(k) => self.a = k,
            Instruction::AndAK(k) => self.a &= k,
            Instruction::CeqsnAK(k) => {
                if self.a == k {
                    next = next.wrapping_add(1);
                    cycles = 2;
                }
            }
            Instruction::MovIoA(addr) => {
                self.io.write(addr, self.a)?;
                self.trace.push(BootEvent::IoWrite {
                    addr,
                    value: self.a,
                });
            }
            Instruction::MovAIo(addr) => self.a = self.io.read(addr)?,
            Instruction::MovMA(addr) => self.write_ram(addr, self.a)?,
            Instruction::ClearM(addr) => self.write_ram(addr, 0)?,
            Instruction::Goto(addr) => {
                next = addr;
                cycles = 2;
            }
            Instruction::Call(addr) => {
                self.push(next)?;
                self.trace.push(BootEvent::Call {
                    from: pc,
                    to: addr,
                    symbol: self.image.symbol_at(addr).map(str::to_string),
                });
                next = addr;
                cycles = 2;
            }
            Instruction::Ret | Instruction::RetK(_) => {
                if let Instruction::RetK(k) = instruction {
                    self.a = k;
                }
                next = self.pop()?;
                self.trace.push(BootEvent::Return {
                    to: next,
                    a: self.a,
                });
                cycles = 2;
            }
            Instruction::Unknown(word) => return Err(SimulationError::DecodeError { pc, word }),
        }

        self.pc = next;
        self.total_cycles += cycles;
        Ok(())
    }

    /// Runs until the core idles, hits a breakpoint or exhausts `max_steps`.
    pub fn run(&mut self, max_steps: Option<u64>) -> SimResult<StopReason> {
        let mut steps = 0;
        loop {
            let pc = self.pc;
            if self.breakpoints.contains(&pc) {
                return Ok(StopReason::Breakpoint(pc));
            }
            if self.fetch(pc)? == Instruction::Goto(pc) {
                self.trace.push(BootEvent::Idle { pc });
                tracing::info!("Core idle at {:#06x} after {} cycles", pc, self.total_cycles);
                return Ok(StopReason::Idle { pc });
            }

            self.step()?;
            steps += 1;

            if let Some(max) = max_steps {
                if steps >= max {
                    return Ok(StopReason::MaxStepsReached);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Arch;

    fn machine(code: &[Instruction]) -> Machine<DeviceIo> {
        let words = code
            .iter()
            .map(|&i| isa::encode(Arch::Pdk14, i).unwrap())
            .collect();
        let map = IoMap::for_arch(Arch::Pdk14);
        Machine::new(
            FirmwareImage::from_words(Arch::Pdk14, words),
            DeviceIo::new(map),
            16,
            &map,
        )
    }

    #[test]
    fn test_call_and_return_through_ram_stack() {
        let mut m = machine(&[
            Instruction::MovAK(4),
            Instruction::MovIoA(0x02),
            Instruction::Call(4),
            Instruction::Goto(3),
            Instruction::RetK(7),
        ]);
        let reason = m.run(Some(100)).unwrap();
        assert_eq!(reason, StopReason::Idle { pc: 3 });
        assert_eq!(m.a, 7);
        assert_eq!(&m.ram[4..6], &[3, 0]);
        assert_eq!(m.io.read(0x02).unwrap(), 4);
        assert_eq!(m.trace().last(), Some(&BootEvent::Idle { pc: 3 }));
    }

    #[test]
    fn test_ceqsn_skips_on_equal() {
        let mut m = machine(&[
            Instruction::MovAK(0),
            Instruction::CeqsnAK(0),
            Instruction::MovAK(9),
            Instruction::Goto(3),
        ]);
        m.run(Some(10)).unwrap();
        assert_eq!(m.a, 0);
        assert_eq!(m.total_cycles, 1 + 2);
    }

    #[test]
    fn test_breakpoint_and_step_limit() {
        let mut m = machine(&[Instruction::Nop, Instruction::Nop, Instruction::Goto(0)]);
        m.breakpoints.insert(2);
        assert_eq!(m.run(None).unwrap(), StopReason::Breakpoint(2));
        m.breakpoints.clear();
        assert_eq!(m.run(Some(2)).unwrap(), StopReason::MaxStepsReached);
    }

    #[test]
    fn test_faults() {
        let mut m = machine(&[Instruction::Ret]);
        assert_eq!(m.step(), Err(SimulationError::StackUnderflow(0)));

        let mut m = machine(&[Instruction::MovMA(0x40)]);
        assert_eq!(m.step(), Err(SimulationError::MemoryViolation(0x40)));

        let mut m = machine(&[Instruction::Nop]);
        m.step().unwrap();
        assert_eq!(m.step(), Err(SimulationError::PcOutOfRange(1)));

        let mut m = machine(&[]);
        m.image.words.push(0x0040);
        assert!(matches!(m.step(), Err(SimulationError::DecodeError { pc: 0, .. })));
    }

    #[test]
    fn test_stack_overflow() {
        let mut m = machine(&[
            Instruction::MovAK(15),
            Instruction::MovIoA(0x02),
            Instruction::Call(0),
        ]);
        assert_eq!(m.run(Some(10)), Err(SimulationError::StackOverflow(15)));
    }
}
