// PdkStart - Padauk Firmware Template Toolkit
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Intel HEX and raw binary output, as consumed by `easypdkprog`.
//!
//! Program words are stored little-endian at byte address `2 * word`.

use std::fmt::Write as _;

const RECORD_BYTES: usize = 16;
const EOF_RECORD: &str = ":00000001FF";

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum HexError {
    #[error("line {line}: record does not start with ':'")]
    MissingColon { line: usize },
    #[error("line {line}: invalid hex digits")]
    InvalidDigits { line: usize },
    #[error("line {line}: record length does not match its byte count")]
    BadLength { line: usize },
    #[error("line {line}: checksum mismatch (expected {expected:#04x}, found {found:#04x})")]
    Checksum { line: usize, expected: u8, found: u8 },
    #[error("line {line}: unsupported record type {kind:#04x}")]
    UnsupportedRecord { line: usize, kind: u8 },
    #[error("data at odd byte count: program words need byte pairs")]
    OddLength,
    #[error("missing end-of-file record")]
    MissingEof,
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
        .wrapping_neg()
}

pub fn to_bin(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

pub fn write_ihx(words: &[u16]) -> String {
    let bytes = to_bin(words);
    let mut out = String::new();
    for (i, chunk) in bytes.chunks(RECORD_BYTES).enumerate() {
        let addr = (i * RECORD_BYTES) as u16;
        let mut record = vec![chunk.len() as u8, (addr >> 8) as u8, addr as u8, 0x00];
        record.extend_from_slice(chunk);
        record.push(checksum(&record));

        out.push(':');
        for byte in record {
            let _ = write!(out, "{:02X}", byte);
        }
        out.push('\n');
    }
    out.push_str(EOF_RECORD);
    out.push('\n');
    out
}

/// Parses data and EOF records back into program words. Gaps read as `0`.
pub fn read_ihx(text: &str) -> Result<Vec<u16>, HexError> {
    let mut bytes: Vec<u8> = Vec::new();
    let mut seen_eof = false;

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let hex = raw
            .strip_prefix(':')
            .ok_or(HexError::MissingColon { line })?;
        if hex.len() % 2 != 0 || !hex.is_ascii() {
            return Err(HexError::InvalidDigits { line });
        }
        let record = (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|_| HexError::InvalidDigits { line })?;

        if record.len() < 5 || record.len() != record[0] as usize + 5 {
            return Err(HexError::BadLength { line });
        }
        let (body, found) = record.split_at(record.len() - 1);
        let expected = checksum(body);
        if expected != found[0] {
            return Err(HexError::Checksum {
                line,
                expected,
                found: found[0],
            });
        }

        let addr = u16::from_be_bytes([record[1], record[2]]) as usize;
        match record[3] {
            0x00 => {
                let data = &body[4..];
                if bytes.len() < addr + data.len() {
                    bytes.resize(addr + data.len(), 0);
                }
                bytes[addr..addr + data.len()].copy_from_slice(data);
            }
            0x01 => {
                seen_eof = true;
                break;
            }
            kind => return Err(HexError::UnsupportedRecord { line, kind }),
        }
    }

    if !seen_eof {
        return Err(HexError::MissingEof);
    }
    if bytes.len() % 2 != 0 {
        return Err(HexError::OddLength);
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}
