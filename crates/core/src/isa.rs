// PdkStart - Padauk Firmware Template Toolkit
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The instruction subset emitted by the image builder, for all three cores.
//!
//! PDK13, PDK14 and PDK15 share mnemonics but differ in word width and in
//! the operand widths of IO, memory and branch-target fields.

use crate::Arch;
use serde::Serialize;
use std::fmt;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize)]
pub enum Instruction {
    Nop,          // NOP
    Ret,          // RET
    RetK(u8),     // RET k
    MovAK(u8),    // MOV A, k
    AndAK(u8),    // AND A, k
    CeqsnAK(u8),  // CEQSN A, k
    MovIoA(u8),   // MOV io, A
    MovAIo(u8),   // MOV A, io
    MovMA(u8),    // MOV m, A
    ClearM(u8),   // CLEAR m
    Goto(u16),    // GOTO addr
    Call(u16),    // CALL addr
    Unknown(u16),
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Nop => write!(f, "nop"),
            Instruction::Ret => write!(f, "ret"),
            Instruction::RetK(k) => write!(f, "ret #{:#04x}", k),
            Instruction::MovAK(k) => write!(f, "mov a, #{:#04x}", k),
            Instruction::AndAK(k) => write!(f, "and a, #{:#04x}", k),
            Instruction::CeqsnAK(k) => write!(f, "ceqsn a, #{:#04x}", k),
            Instruction::MovIoA(io) => write!(f, "mov io[{:#04x}], a", io),
            Instruction::MovAIo(io) => write!(f, "mov a, io[{:#04x}]", io),
            Instruction::MovMA(m) => write!(f, "mov [{:#04x}], a", m),
            Instruction::ClearM(m) => write!(f, "clear [{:#04x}]", m),
            Instruction::Goto(addr) => write!(f, "goto {:#06x}", addr),
            Instruction::Call(addr) => write!(f, "call {:#06x}", addr),
            Instruction::Unknown(word) => write!(f, ".word {:#06x}", word),
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum IsaError {
    #[error("{arch} cannot encode `{instruction}`: operand needs more than {bits} bits")]
    OperandOutOfRange {
        arch: Arch,
        instruction: Instruction,
        bits: u32,
    },
    #[error("`{0}` has no encoding")]
    Unencodable(Instruction),
}

/// Opcode map of one core. Operand fields sit in the low bits of each opcode.
#[derive(Debug)]
pub struct Encoding {
    pub word_bits: u32,
    pub io_bits: u32,
    pub mem_bits: u32,
    pub addr_bits: u32,
    ret: u16,
    ret_k: u16,
    mov_a_k: u16,
    and_a_k: u16,
    ceqsn_a_k: u16,
    mov_io_a: u16,
    mov_a_io: u16,
    mov_m_a: u16,
    clear_m: u16,
    goto: u16,
    call: u16,
}

const PDK13: Encoding = Encoding {
    word_bits: 13,
    io_bits: 5,
    mem_bits: 6,
    addr_bits: 10,
    ret: 0x003A,
    ret_k: 0x0100,
    mov_a_k: 0x1700,
    and_a_k: 0x1400,
    ceqsn_a_k: 0x1200,
    mov_io_a: 0x0080,
    mov_a_io: 0x00A0,
    mov_m_a: 0x0380,
    clear_m: 0x0300,
    goto: 0x1800,
    call: 0x1C00,
};

const PDK14: Encoding = Encoding {
    word_bits: 14,
    io_bits: 6,
    mem_bits: 7,
    addr_bits: 11,
    ret: 0x007A,
    ret_k: 0x0200,
    mov_a_k: 0x2F00,
    and_a_k: 0x2C00,
    ceqsn_a_k: 0x2A00,
    mov_io_a: 0x00C0,
    mov_a_io: 0x01C0,
    mov_m_a: 0x0B80,
    clear_m: 0x2680,
    goto: 0x3000,
    call: 0x3800,
};

const PDK15: Encoding = Encoding {
    word_bits: 15,
    io_bits: 7,
    mem_bits: 8,
    addr_bits: 12,
    ret: 0x007A,
    ret_k: 0x0200,
    mov_a_k: 0x5700,
    and_a_k: 0x5400,
    ceqsn_a_k: 0x5200,
    mov_io_a: 0x0100,
    mov_a_io: 0x0180,
    mov_m_a: 0x1700,
    clear_m: 0x3500,
    goto: 0x6000,
    call: 0x7000,
};

pub fn encoding(arch: Arch) -> &'static Encoding {
    match arch {
        Arch::Pdk13 => &PDK13,
        Arch::Pdk14 => &PDK14,
        Arch::Pdk15 => &PDK15,
    }
}

impl Encoding {
    pub fn word_mask(&self) -> u16 {
        ((1u32 << self.word_bits) - 1) as u16
    }

    /// Number of addressable program words.
    pub fn max_program_words(&self) -> u32 {
        1 << self.addr_bits
    }

    /// Number of directly addressable RAM bytes.
    pub fn max_ram_bytes(&self) -> u32 {
        1 << self.mem_bits
    }
}

fn field(
    arch: Arch,
    instruction: Instruction,
    base: u16,
    value: u32,
    bits: u32,
) -> Result<u16, IsaError> {
    if value >= (1 << bits) {
        return Err(IsaError::OperandOutOfRange {
            arch,
            instruction,
            bits,
        });
    }
    Ok(base | value as u16)
}

pub fn encode(arch: Arch, instruction: Instruction) -> Result<u16, IsaError> {
    let enc = encoding(arch);
    match instruction {
        Instruction::Nop => Ok(0x0000),
        Instruction::Ret => Ok(enc.ret),
        Instruction::RetK(k) => Ok(enc.ret_k | k as u16),
        Instruction::MovAK(k) => Ok(enc.mov_a_k | k as u16),
        Instruction::AndAK(k) => Ok(enc.and_a_k | k as u16),
        Instruction::CeqsnAK(k) => Ok(enc.ceqsn_a_k | k as u16),
        Instruction::MovIoA(io) => field(arch, instruction, enc.mov_io_a, io as u32, enc.io_bits),
        Instruction::MovAIo(io) => field(arch, instruction, enc.mov_a_io, io as u32, enc.io_bits),
        Instruction::MovMA(m) => field(arch, instruction, enc.mov_m_a, m as u32, enc.mem_bits),
        Instruction::ClearM(m) => field(arch, instruction, enc.clear_m, m as u32, enc.mem_bits),
        Instruction::Goto(addr) => field(arch, instruction, enc.goto, addr as u32, enc.addr_bits),
        Instruction::Call(addr) => field(arch, instruction, enc.call, addr as u32, enc.addr_bits),
        Instruction::Unknown(_) => Err(IsaError::Unencodable(instruction)),
    }
}

pub fn decode(arch: Arch, word: u16) -> Instruction {
    let enc = encoding(arch);
    if word & !enc.word_mask() != 0 {
        return Instruction::Unknown(word);
    }
    if word == 0x0000 {
        return Instruction::Nop;
    }
    if word == enc.ret {
        return Instruction::Ret;
    }

    let matches = |base: u16, bits: u32| -> Option<u16> {
        let operand_mask = ((1u32 << bits) - 1) as u16;
        (word & !operand_mask == base).then_some(word & operand_mask)
    };

    if let Some(k) = matches(enc.ret_k, 8) {
        return Instruction::RetK(k as u8);
    }
    if let Some(k) = matches(enc.mov_a_k, 8) {
        return Instruction::MovAK(k as u8);
    }
    if let Some(k) = matches(enc.and_a_k, 8) {
        return Instruction::AndAK(k as u8);
    }
    if let Some(k) = matches(enc.ceqsn_a_k, 8) {
        return Instruction::CeqsnAK(k as u8);
    }
    if let Some(io) = matches(enc.mov_io_a, enc.io_bits) {
        return Instruction::MovIoA(io as u8);
    }
    if let Some(io) = matches(enc.mov_a_io, enc.io_bits) {
        return Instruction::MovAIo(io as u8);
    }
    if let Some(m) = matches(enc.mov_m_a, enc.mem_bits) {
        return Instruction::MovMA(m as u8);
    }
    if let Some(m) = matches(enc.clear_m, enc.mem_bits) {
        return Instruction::ClearM(m as u8);
    }
    if let Some(addr) = matches(enc.goto, enc.addr_bits) {
        return Instruction::Goto(addr);
    }
    if let Some(addr) = matches(enc.call, enc.addr_bits) {
        return Instruction::Call(addr);
    }
    Instruction::Unknown(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_pdk14_known_words() {
        assert_eq!(encode(Arch::Pdk14, Instruction::MovAK(0x34)).unwrap(), 0x2F34);
        assert_eq!(encode(Arch::Pdk14, Instruction::MovIoA(0x03)).unwrap(), 0x00C3);
        assert_eq!(encode(Arch::Pdk14, Instruction::AndAK(b'R')).unwrap(), 0x2C52);
        assert_eq!(encode(Arch::Pdk14, Instruction::Goto(0x7FF)).unwrap(), 0x37FF);
        assert_eq!(decode(Arch::Pdk14, 0x3805), Instruction::Call(0x005));
        assert_eq!(decode(Arch::Pdk14, 0x007A), Instruction::Ret);
    }

    #[test]
    fn test_operand_width_per_arch() {
        // IO 0x39 fits the 6-bit PDK14 field but not the 5-bit PDK13 one.
        assert!(encode(Arch::Pdk14, Instruction::MovIoA(0x39)).is_ok());
        let err = encode(Arch::Pdk13, Instruction::MovIoA(0x39)).unwrap_err();
        assert!(matches!(err, IsaError::OperandOutOfRange { bits: 5, .. }));

        assert!(encode(Arch::Pdk15, Instruction::Call(0xBFF)).is_ok());
        assert!(encode(Arch::Pdk14, Instruction::Call(0xBFF)).is_err());
    }

    #[test]
    fn test_words_above_width_are_unknown() {
        assert_eq!(decode(Arch::Pdk13, 0x2000), Instruction::Unknown(0x2000));
        assert_eq!(decode(Arch::Pdk14, 0x4000), Instruction::Unknown(0x4000));
    }

    #[test]
    fn test_unknown_is_unencodable() {
        assert_eq!(
            encode(Arch::Pdk15, Instruction::Unknown(1)),
            Err(IsaError::Unencodable(Instruction::Unknown(1)))
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Instruction::AndAK(0x43).to_string(), "and a, #0x43");
        assert_eq!(Instruction::Goto(0x12).to_string(), "goto 0x0012");
    }

    fn any_arch() -> impl Strategy<Value = Arch> {
        prop::sample::select(vec![Arch::Pdk13, Arch::Pdk14, Arch::Pdk15])
    }

    proptest! {
        #[test]
        fn test_decoded_words_reencode_identically(arch in any_arch(), word in 0u16..0x8000) {
            match decode(arch, word) {
                Instruction::Unknown(w) => prop_assert_eq!(w, word),
                instruction => prop_assert_eq!(encode(arch, instruction).unwrap(), word),
            }
        }
    }
}
