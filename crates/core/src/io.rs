// PdkStart - Padauk Firmware Template Toolkit
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::sysclock::{Clkmd, ClockSource};
use crate::{SimResult, SimulationError};
use pdkstart_config::IoMap;
use serde::Serialize;

/// Number of IO register addresses modelled.
pub const IO_SPACE_SIZE: usize = 128;

/// The IO register space, exclusively owned by whoever runs the core.
pub trait IoSpace: std::fmt::Debug {
    fn read(&self, addr: u8) -> SimResult<u8>;
    fn write(&mut self, addr: u8, value: u8) -> SimResult<()>;
    fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IoWrite {
    pub addr: u8,
    pub value: u8,
}

/// Flat register file with the reset values of the clock registers and a
/// log of every write.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceIo {
    map: IoMap,
    registers: Vec<u8>,
    writes: Vec<IoWrite>,
}

impl DeviceIo {
    pub fn new(map: IoMap) -> Self {
        let mut registers = vec![0; IO_SPACE_SIZE];
        registers[map.clkmd as usize % IO_SPACE_SIZE] = Clkmd::RESET.bits();
        Self {
            map,
            registers,
            writes: Vec::new(),
        }
    }

    pub fn map(&self) -> &IoMap {
        &self.map
    }

    pub fn writes(&self) -> &[IoWrite] {
        &self.writes
    }

    pub fn registers(&self) -> &[u8] {
        &self.registers
    }

    pub fn clkmd(&self) -> Clkmd {
        Clkmd::from_bits_retain(self.registers[self.map.clkmd as usize % IO_SPACE_SIZE])
    }

    /// Source and divider currently selected through CLKMD.
    pub fn clock_selection(&self) -> Option<(ClockSource, u8)> {
        self.clkmd().decode()
    }

    /// Current trim value of the oscillator `source`, if it has a trim register.
    pub fn trim(&self, source: ClockSource) -> Option<u8> {
        let register = match source {
            ClockSource::Ihrc => Some(self.map.ihrcr),
            ClockSource::Ilrc => self.map.ilrcr,
            ClockSource::Eosc => None,
        }?;
        self.registers.get(register as usize).copied()
    }
}

impl IoSpace for DeviceIo {
    fn read(&self, addr: u8) -> SimResult<u8> {
        self.registers
            .get(addr as usize)
            .copied()
            .ok_or(SimulationError::IoViolation(addr))
    }

    fn write(&mut self, addr: u8, value: u8) -> SimResult<()> {
        let register = self
            .registers
            .get_mut(addr as usize)
            .ok_or(SimulationError::IoViolation(addr))?;
        *register = value;
        self.writes.push(IoWrite { addr, value });
        Ok(())
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdkstart_config::Arch;

    #[test]
    fn test_reset_state() {
        let io = DeviceIo::new(IoMap::for_arch(Arch::Pdk14));
        assert_eq!(io.read(0x03).unwrap(), 0xF6);
        assert_eq!(io.clock_selection(), Some((ClockSource::Ilrc, 1)));
        assert_eq!(io.trim(ClockSource::Ihrc), Some(0));
        assert!(io.writes().is_empty());
    }

    #[test]
    fn test_write_is_logged_and_decoded() {
        let mut io = DeviceIo::new(IoMap::for_arch(Arch::Pdk14));
        io.write(0x03, 0x34).unwrap();
        io.write(0x0B, 0x80).unwrap();
        assert_eq!(io.clock_selection(), Some((ClockSource::Ihrc, 2)));
        assert_eq!(io.trim(ClockSource::Ihrc), Some(0x80));
        assert_eq!(io.writes(), &[
            IoWrite { addr: 0x03, value: 0x34 },
            IoWrite { addr: 0x0B, value: 0x80 },
        ]);
    }

    #[test]
    fn test_out_of_range_access() {
        let mut io = DeviceIo::new(IoMap::for_arch(Arch::Pdk15));
        assert_eq!(io.read(0x80), Err(SimulationError::IoViolation(0x80)));
        assert_eq!(io.write(0xFF, 1), Err(SimulationError::IoViolation(0xFF)));
        assert_eq!(io.trim(ClockSource::Eosc), None);
        assert_eq!(IoMap::for_arch(Arch::Pdk13).ilrcr, None);
    }

    #[test]
    fn test_snapshot_has_registers() {
        let io = DeviceIo::new(IoMap::for_arch(Arch::Pdk13));
        let snapshot = io.snapshot();
        assert_eq!(snapshot["registers"][3], 0xF6);
    }
}
