// PdkStart - Padauk Firmware Template Toolkit
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod calibration;
pub mod ihex;
pub mod image;
pub mod io;
pub mod isa;
pub mod machine;
pub mod startup;
pub mod sysclock;

pub use io::{DeviceIo, IoSpace};
pub use machine::{BootEvent, Machine, StopReason};
pub use pdkstart_config::Arch;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SimulationError {
    #[error("RAM access violation at {0:#04x}")]
    MemoryViolation(u16),
    #[error("IO access violation at {0:#04x}")]
    IoViolation(u8),
    #[error("Instruction decoding error at {pc:#06x}: word {word:#06x}")]
    DecodeError { pc: u16, word: u16 },
    #[error("Program counter {0:#06x} is outside ROM")]
    PcOutOfRange(u16),
    #[error("Stack overflow (sp={0:#04x})")]
    StackOverflow(u8),
    #[error("Stack underflow (sp={0:#04x})")]
    StackUnderflow(u8),
}

pub type SimResult<T> = Result<T, SimulationError>;
