// PdkStart - Padauk Firmware Template Toolkit
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Oscillator calibration markers and the programming-time tuning loop.
//!
//! The startup routine carries a run of `and a, #k` instructions that spell
//! out what has to be calibrated. They leave every register untouched when
//! executed as-is. The programmer finds the run, tunes the oscillator and
//! rewrites it into `mov a, #trim; mov <trim reg>, a` followed by `nop`s.

use crate::image::FirmwareImage;
use crate::isa::{self, Instruction, IsaError};
use crate::sysclock::{CalibrationRequest, ClockPlan};
use serde::Serialize;
use std::fmt;

/// Words occupied by a marker, before and after patching.
pub const MARKER_WORDS: usize = 12;

/// Largest accepted deviation of a tuned oscillator.
pub const DEFAULT_TOLERANCE_PPM: u32 = 5000;

const MAGIC: [u8; 2] = [b'R', b'C'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationKind {
    Ihrc = 1,
    Ilrc = 2,
}

impl CalibrationKind {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(CalibrationKind::Ihrc),
            2 => Some(CalibrationKind::Ilrc),
            _ => None,
        }
    }
}

impl fmt::Display for CalibrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationKind::Ihrc => f.write_str("IHRC"),
            CalibrationKind::Ilrc => f.write_str("ILRC"),
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CalibrationError {
    #[error("Image contains no calibration marker")]
    NoMarker,
    #[error("Calibration target must be non-zero")]
    ZeroTarget,
    #[error("Oscillator cannot reach {target_hz} Hz: best trim gives {best_hz} Hz")]
    OutOfTolerance { target_hz: u32, best_hz: u32 },
    #[error("No calibration marker at word {0:#06x}")]
    SiteMismatch(usize),
    #[error(transparent)]
    Isa(#[from] IsaError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CalibrationMarker {
    pub kind: CalibrationKind,
    pub register: u8,
    pub frequency_hz: u32,
    pub millivolts: u16,
}

impl From<&CalibrationRequest> for CalibrationMarker {
    fn from(request: &CalibrationRequest) -> Self {
        Self {
            kind: request.kind,
            register: request.register,
            frequency_hz: request.frequency_hz,
            millivolts: request.millivolts,
        }
    }
}

impl CalibrationMarker {
    pub fn for_plan(plan: &ClockPlan) -> Option<Self> {
        plan.calibration.as_ref().map(Self::from)
    }

    pub fn payload(&self) -> [u8; MARKER_WORDS] {
        let f = self.frequency_hz.to_le_bytes();
        let mv = self.millivolts.to_le_bytes();
        [
            MAGIC[0],
            MAGIC[1],
            self.kind.code(),
            self.register,
            f[0],
            f[1],
            f[2],
            f[3],
            mv[0],
            mv[1],
            0,
            0,
        ]
    }

    fn from_payload(payload: &[u8; MARKER_WORDS]) -> Option<Self> {
        if payload[..2] != MAGIC || payload[10..] != [0, 0] {
            return None;
        }
        Some(Self {
            kind: CalibrationKind::from_code(payload[2])?,
            register: payload[3],
            frequency_hz: u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]),
            millivolts: u16::from_le_bytes([payload[8], payload[9]]),
        })
    }

    /// The unpatched form, as emitted into the startup routine.
    pub fn instructions(&self) -> Vec<Instruction> {
        self.payload().into_iter().map(Instruction::AndAK).collect()
    }

    /// The form written back by the programmer once `trim` is known.
    pub fn patched(&self, trim: u8) -> Vec<Instruction> {
        let mut code = vec![Instruction::MovAK(trim), Instruction::MovIoA(self.register)];
        code.resize(MARKER_WORDS, Instruction::Nop);
        code
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MarkerSite {
    /// Word offset of the first marker instruction.
    pub offset: usize,
    pub marker: CalibrationMarker,
}

fn marker_at(image: &FirmwareImage, offset: usize) -> Option<CalibrationMarker> {
    let words = image.words.get(offset..offset + MARKER_WORDS)?;
    let mut payload = [0u8; MARKER_WORDS];
    for (byte, &word) in payload.iter_mut().zip(words) {
        match isa::decode(image.arch, word) {
            Instruction::AndAK(k) => *byte = k,
            _ => return None,
        }
    }
    CalibrationMarker::from_payload(&payload)
}

pub fn scan(image: &FirmwareImage) -> Vec<MarkerSite> {
    let mut sites = Vec::new();
    let mut offset = 0;
    while offset + MARKER_WORDS <= image.words.len() {
        if let Some(marker) = marker_at(image, offset) {
            sites.push(MarkerSite { offset, marker });
            offset += MARKER_WORDS;
        } else {
            offset += 1;
        }
    }
    sites
}

pub fn patch(image: &mut FirmwareImage, site: &MarkerSite, trim: u8) -> Result<(), CalibrationError> {
    if marker_at(image, site.offset) != Some(site.marker) {
        return Err(CalibrationError::SiteMismatch(site.offset));
    }
    for (i, instruction) in site.marker.patched(trim).into_iter().enumerate() {
        image.words[site.offset + i] = isa::encode(image.arch, instruction)?;
    }
    tracing::info!(
        "Patched {} calibration at {:#06x} with trim {:#04x}",
        site.marker.kind,
        site.offset,
        trim
    );
    Ok(())
}

/// Frequency measurement against a device running the calibration loop.
pub trait OscillatorProbe {
    /// System clock frequency observed with `trim` in the trim register.
    fn measure_hz(&mut self, trim: u8) -> u32;
}

/// An RC oscillator whose frequency rises linearly with the trim value.
///
/// The untrimmed center is offset from nominal by `deviation_ppm`; the full
/// trim range spans half the nominal frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedOscillator {
    pub nominal_hz: u32,
    pub divider: u8,
    pub deviation_ppm: i32,
}

impl SimulatedOscillator {
    pub fn new(nominal_hz: u32, divider: u8, deviation_ppm: i32) -> Self {
        Self {
            nominal_hz,
            divider,
            deviation_ppm,
        }
    }

    pub fn raw_hz(&self, trim: u8) -> u32 {
        let nominal = self.nominal_hz as i64;
        let center = nominal * (1_000_000 + self.deviation_ppm as i64) / 1_000_000;
        let raw = center + (trim as i64 - 128) * nominal / 512;
        raw.clamp(0, u32::MAX as i64) as u32
    }
}

impl OscillatorProbe for SimulatedOscillator {
    fn measure_hz(&mut self, trim: u8) -> u32 {
        self.raw_hz(trim) / self.divider.max(1) as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TuneResult {
    pub trim: u8,
    pub measured_hz: u32,
    pub error_ppm: i64,
}

fn error_ppm(measured_hz: u32, target_hz: u32) -> i64 {
    (measured_hz as i64 - target_hz as i64) * 1_000_000 / target_hz.max(1) as i64
}

/// Finds the trim value bringing `probe` closest to `target_hz`.
pub fn tune<P: OscillatorProbe + ?Sized>(
    probe: &mut P,
    target_hz: u32,
    tolerance_ppm: u32,
) -> Result<TuneResult, CalibrationError> {
    if target_hz == 0 {
        return Err(CalibrationError::ZeroTarget);
    }

    // Smallest trim that reaches the target.
    let (mut lo, mut hi) = (0u16, 255u16);
    while lo < hi {
        let mid = (lo + hi) / 2;
        let measured = probe.measure_hz(mid as u8);
        tracing::debug!("trim {:#04x} -> {} Hz", mid, measured);
        if measured < target_hz {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }

    let mut trim = lo as u8;
    let mut measured_hz = probe.measure_hz(trim);
    if trim > 0 {
        let below = probe.measure_hz(trim - 1);
        if below.abs_diff(target_hz) < measured_hz.abs_diff(target_hz) {
            trim -= 1;
            measured_hz = below;
        }
    }

    let error_ppm = error_ppm(measured_hz, target_hz);
    if error_ppm.unsigned_abs() > tolerance_ppm as u64 {
        return Err(CalibrationError::OutOfTolerance {
            target_hz,
            best_hz: measured_hz,
        });
    }
    Ok(TuneResult {
        trim,
        measured_hz,
        error_ppm,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CalibrationReport {
    pub site: MarkerSite,
    pub result: TuneResult,
}

/// Tunes and patches every marker of `image`, probing each with the
/// oscillator returned by `probe_for`.
pub fn calibrate<F, P>(
    image: &mut FirmwareImage,
    tolerance_ppm: u32,
    mut probe_for: F,
) -> Result<Vec<CalibrationReport>, CalibrationError>
where
    F: FnMut(&CalibrationMarker) -> P,
    P: OscillatorProbe,
{
    let sites = scan(image);
    if sites.is_empty() {
        return Err(CalibrationError::NoMarker);
    }

    let mut reports = Vec::with_capacity(sites.len());
    for site in sites {
        let mut probe = probe_for(&site.marker);
        let result = tune(&mut probe, site.marker.frequency_hz, tolerance_ppm)?;
        tracing::info!(
            "{} tuned to {} Hz ({} ppm) with trim {:#04x}",
            site.marker.kind,
            result.measured_hz,
            result.error_ppm,
            result.trim
        );
        patch(image, &site, result.trim)?;
        reports.push(CalibrationReport { site, result });
    }
    Ok(reports)
}
