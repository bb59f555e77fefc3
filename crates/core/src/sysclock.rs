// PdkStart - Padauk Firmware Template Toolkit
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! System clock selection.
//!
//! [`select_clock`] is a pure function from a [`ClockRequest`] and the
//! [`ClockCapabilities`] of a chip to a [`ClockPlan`]: the oscillator, the
//! divider, the CLKMD value that selects them and the calibration the
//! programmer has to perform so the selection hits the requested frequency.

use crate::calibration::CalibrationKind;
use crate::Arch;
use bitflags::bitflags;
use pdkstart_config::{max_sysclock_hz, ChipDescriptor, ClockOverride, ProjectConfig, SysclockLimit};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

pub use pdkstart_config::ClockSource;

pub const IHRC_NOMINAL_HZ: u32 = 16_000_000;

/// Internal oscillators can be trimmed this far away from nominal.
pub const TRIM_WINDOW_PERCENT: u32 = 25;

bitflags! {
    /// Clock mode register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Clkmd: u8 {
        const PA5_RESET = 0x01;
        const WATCHDOG = 0x02;
        const ILRC_ENABLE = 0x04;
        const TYPE1 = 0x08;
        const IHRC_ENABLE = 0x10;
        const SELECT = 0xE0;
    }
}

/// Bits that pick source and divider: the SELECT field plus the type bit.
const SELECTION_MASK: u8 = 0xE8;

const SELECTIONS: &[(ClockSource, u8, u8)] = &[
    (ClockSource::Ihrc, 4, 0x00),
    (ClockSource::Ihrc, 2, 0x20),
    (ClockSource::Ihrc, 16, 0x08),
    (ClockSource::Ihrc, 8, 0x28),
    (ClockSource::Ihrc, 32, 0x68),
    (ClockSource::Ihrc, 64, 0x88),
    (ClockSource::Eosc, 4, 0x60),
    (ClockSource::Eosc, 2, 0x80),
    (ClockSource::Eosc, 1, 0xA0),
    (ClockSource::Eosc, 8, 0xA8),
    (ClockSource::Ilrc, 4, 0xC0),
    (ClockSource::Ilrc, 1, 0xE0),
    (ClockSource::Ilrc, 16, 0x48),
];

impl Clkmd {
    /// Value after reset: ILRC/1 with the watchdog and PA5 reset enabled.
    pub const RESET: Clkmd = Clkmd::from_bits_retain(0xF6);

    /// CLKMD value running `source` through `divider` with the watchdog off.
    pub fn encode(source: ClockSource, divider: u8) -> Option<Clkmd> {
        let (_, _, select) = SELECTIONS
            .iter()
            .find(|(s, d, _)| *s == source && *d == divider)?;
        let enables = match source {
            ClockSource::Ihrc => Clkmd::IHRC_ENABLE | Clkmd::ILRC_ENABLE,
            ClockSource::Ilrc | ClockSource::Eosc => Clkmd::ILRC_ENABLE,
        };
        Some(Clkmd::from_bits_retain(*select) | enables)
    }

    /// Source and divider selected by this value.
    pub fn decode(self) -> Option<(ClockSource, u8)> {
        let select = self.bits() & SELECTION_MASK;
        SELECTIONS
            .iter()
            .find(|(_, _, bits)| *bits == select)
            .map(|(source, divider, _)| (*source, *divider))
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ClockError {
    #[error("Target frequency must be non-zero")]
    ZeroFrequency,
    #[error("Supply {millivolts} mV is outside the chip range {min_mv}..={max_mv} mV")]
    VoltageOutOfRange {
        millivolts: u16,
        min_mv: u16,
        max_mv: u16,
    },
    #[error("No system clock is rated for {0} mV")]
    NoLimitAtVoltage(u16),
    #[error("{frequency_hz} Hz exceeds the {limit_hz} Hz system clock limit at {millivolts} mV")]
    AboveLimit {
        frequency_hz: u32,
        limit_hz: u32,
        millivolts: u16,
    },
    #[error("Chip has no external oscillator input")]
    EoscUnavailable,
    #[error("Divider /{divider} is not available for {clock}")]
    InvalidDivider { clock: ClockSource, divider: u8 },
    #[error("External oscillator frequency must be non-zero")]
    ZeroCrystal,
}

/// Clock-related capabilities of one chip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockCapabilities {
    pub arch: Arch,
    pub ilrc_hz: u32,
    pub eosc: bool,
    pub vdd_mv: [u16; 2],
    pub sysclock_limits: Vec<SysclockLimit>,
    pub ihrcr: u8,
    pub ilrcr: Option<u8>,
}

impl ClockCapabilities {
    pub fn from_chip(chip: &ChipDescriptor) -> Self {
        let io = chip.io_map();
        Self {
            arch: chip.arch,
            ilrc_hz: chip.ilrc_hz,
            eosc: chip.eosc,
            vdd_mv: chip.vdd_mv,
            sysclock_limits: chip.sysclock_limits.clone(),
            ihrcr: io.ihrcr,
            ilrcr: io.ilrcr,
        }
    }

    fn nominal_hz(&self, source: ClockSource) -> u32 {
        match source {
            ClockSource::Ihrc => IHRC_NOMINAL_HZ,
            ClockSource::Ilrc => self.ilrc_hz,
            ClockSource::Eosc => 0,
        }
    }

    fn trim_register(&self, source: ClockSource) -> Option<u8> {
        match source {
            ClockSource::Ihrc => Some(self.ihrcr),
            ClockSource::Ilrc => self.ilrcr,
            ClockSource::Eosc => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockRequest {
    pub target_hz: u32,
    pub vdd_mv: u16,
    pub clock_override: Option<ClockOverride>,
}

impl ClockRequest {
    pub fn new(target_hz: u32, vdd_mv: u16) -> Self {
        Self {
            target_hz,
            vdd_mv,
            clock_override: None,
        }
    }

    pub fn from_project(config: &ProjectConfig) -> Self {
        Self {
            target_hz: config.f_cpu,
            vdd_mv: config.target_vdd_mv,
            clock_override: config.clock,
        }
    }
}

/// What the programmer has to trim, and to which frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CalibrationRequest {
    pub kind: CalibrationKind,
    pub register: u8,
    pub frequency_hz: u32,
    pub millivolts: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClockPlan {
    pub source: ClockSource,
    pub divider: u8,
    #[serde(serialize_with = "serialize_clkmd")]
    pub clkmd: Clkmd,
    pub target_hz: u32,
    pub nominal_hz: u32,
    pub achievable_hz: u32,
    pub calibration: Option<CalibrationRequest>,
}

fn serialize_clkmd<S: Serializer>(clkmd: &Clkmd, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(clkmd.bits())
}

impl ClockPlan {
    /// Oscillator frequency before the divider.
    pub fn raw_hz(&self) -> u32 {
        self.achievable_hz.saturating_mul(self.divider as u32)
    }

    pub fn deviation_ppm(&self) -> i64 {
        let diff = self.achievable_hz as i64 - self.target_hz as i64;
        diff * 1_000_000 / self.target_hz.max(1) as i64
    }

    pub fn is_exact(&self) -> bool {
        self.achievable_hz == self.target_hz
    }

    /// Internal oscillator without a trim register, left at its nominal rate.
    pub fn runs_untrimmed(&self) -> bool {
        self.source != ClockSource::Eosc && self.calibration.is_none()
    }
}

impl fmt::Display for ClockPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} (CLKMD={:#04x}) -> {} Hz, target {} Hz",
            self.source.as_str().to_uppercase(),
            self.divider,
            self.clkmd.bits(),
            self.achievable_hz,
            self.target_hz
        )?;
        if let Some(cal) = &self.calibration {
            write!(
                f,
                ", calibrate {} via IO {:#04x} at {} mV",
                cal.kind, cal.register, cal.millivolts
            )?;
        }
        Ok(())
    }
}

/// Distance of `raw` from `nominal` as a ratio >= 1, kept as a fraction.
#[derive(Debug, Clone, Copy)]
struct Ratio {
    num: u128,
    den: u128,
}

impl Ratio {
    fn distance(raw: u64, nominal: u64) -> Self {
        if raw >= nominal {
            Ratio {
                num: raw as u128,
                den: nominal.max(1) as u128,
            }
        } else {
            Ratio {
                num: nominal as u128,
                den: raw.max(1) as u128,
            }
        }
    }

    fn compare(&self, other: &Ratio) -> Ordering {
        (self.num * other.den).cmp(&(other.num * self.den))
    }
}

fn trim_window(nominal_hz: u32) -> (u64, u64) {
    let nominal = nominal_hz as u64;
    (
        nominal * (100 - TRIM_WINDOW_PERCENT) as u64 / 100,
        nominal * (100 + TRIM_WINDOW_PERCENT) as u64 / 100,
    )
}

/// Divider whose required raw frequency lies closest to nominal.
fn nearest_divider(target_hz: u32, nominal_hz: u32, candidates: &[u8]) -> u8 {
    let mut best = candidates[0];
    let mut best_distance = Ratio::distance(target_hz as u64 * best as u64, nominal_hz as u64);
    for &divider in &candidates[1..] {
        let distance = Ratio::distance(target_hz as u64 * divider as u64, nominal_hz as u64);
        let better = match distance.compare(&best_distance) {
            Ordering::Less => true,
            Ordering::Equal => divider < best,
            Ordering::Greater => false,
        };
        if better {
            best = divider;
            best_distance = distance;
        }
    }
    best
}

fn internal_plan(
    request: &ClockRequest,
    caps: &ClockCapabilities,
    source: ClockSource,
    divider: Option<u8>,
) -> Result<ClockPlan, ClockError> {
    let nominal_hz = caps.nominal_hz(source);
    let divider = match divider {
        Some(divider) => check_divider(source, divider)?,
        None => nearest_divider(request.target_hz, nominal_hz, source.dividers()),
    };
    let register = caps.trim_register(source);

    let achievable_hz = if register.is_some() {
        let (low, high) = trim_window(nominal_hz);
        let raw = (request.target_hz as u64 * divider as u64).clamp(low, high);
        (raw / divider as u64) as u32
    } else {
        nominal_hz / divider as u32
    };

    let calibration = register.map(|register| CalibrationRequest {
        kind: match source {
            ClockSource::Ilrc => CalibrationKind::Ilrc,
            _ => CalibrationKind::Ihrc,
        },
        register,
        frequency_hz: achievable_hz,
        millivolts: request.vdd_mv,
    });

    Ok(ClockPlan {
        source,
        divider,
        clkmd: encode_checked(source, divider)?,
        target_hz: request.target_hz,
        nominal_hz,
        achievable_hz,
        calibration,
    })
}

fn external_plan(
    request: &ClockRequest,
    caps: &ClockCapabilities,
    crystal_hz: u32,
    divider: Option<u8>,
) -> Result<ClockPlan, ClockError> {
    if !caps.eosc {
        return Err(ClockError::EoscUnavailable);
    }
    if crystal_hz == 0 {
        return Err(ClockError::ZeroCrystal);
    }
    let divider = match divider {
        Some(divider) => check_divider(ClockSource::Eosc, divider)?,
        None => ClockSource::Eosc
            .dividers()
            .iter()
            .copied()
            .min_by_key(|&d| (crystal_hz / d as u32).abs_diff(request.target_hz))
            .unwrap_or(1),
    };

    Ok(ClockPlan {
        source: ClockSource::Eosc,
        divider,
        clkmd: encode_checked(ClockSource::Eosc, divider)?,
        target_hz: request.target_hz,
        nominal_hz: crystal_hz,
        achievable_hz: crystal_hz / divider as u32,
        calibration: None,
    })
}

fn check_divider(source: ClockSource, divider: u8) -> Result<u8, ClockError> {
    if source.dividers().contains(&divider) {
        Ok(divider)
    } else {
        Err(ClockError::InvalidDivider {
            clock: source,
            divider,
        })
    }
}

fn encode_checked(source: ClockSource, divider: u8) -> Result<Clkmd, ClockError> {
    Clkmd::encode(source, divider).ok_or(ClockError::InvalidDivider {
        clock: source,
        divider,
    })
}

/// Lowest frequency the IHRC reaches: bottom of its trim window through /64.
pub fn ihrc_floor_hz() -> u32 {
    let (low, _) = trim_window(IHRC_NOMINAL_HZ);
    (low / *ClockSource::Ihrc.dividers().last().unwrap_or(&64) as u64) as u32
}

fn auto_plan(request: &ClockRequest, caps: &ClockCapabilities) -> Result<ClockPlan, ClockError> {
    if request.target_hz >= ihrc_floor_hz() {
        return internal_plan(request, caps, ClockSource::Ihrc, None);
    }
    let (_, ilrc_ceiling) = trim_window(caps.ilrc_hz);
    if request.target_hz as u64 <= ilrc_ceiling {
        return internal_plan(request, caps, ClockSource::Ilrc, None);
    }

    let ihrc = internal_plan(request, caps, ClockSource::Ihrc, None)?;
    let ilrc = internal_plan(request, caps, ClockSource::Ilrc, None)?;
    let ihrc_error = ihrc.achievable_hz.abs_diff(request.target_hz);
    let ilrc_error = ilrc.achievable_hz.abs_diff(request.target_hz);
    Ok(if ilrc_error < ihrc_error { ilrc } else { ihrc })
}

pub fn select_clock(
    request: &ClockRequest,
    caps: &ClockCapabilities,
) -> Result<ClockPlan, ClockError> {
    if request.target_hz == 0 {
        return Err(ClockError::ZeroFrequency);
    }
    let [min_mv, max_mv] = caps.vdd_mv;
    if !(min_mv..=max_mv).contains(&request.vdd_mv) {
        return Err(ClockError::VoltageOutOfRange {
            millivolts: request.vdd_mv,
            min_mv,
            max_mv,
        });
    }
    let limit_hz = max_sysclock_hz(&caps.sysclock_limits, request.vdd_mv)
        .ok_or(ClockError::NoLimitAtVoltage(request.vdd_mv))?;
    if request.target_hz > limit_hz {
        return Err(ClockError::AboveLimit {
            frequency_hz: request.target_hz,
            limit_hz,
            millivolts: request.vdd_mv,
        });
    }

    let plan = match request.clock_override {
        None => auto_plan(request, caps)?,
        Some(ClockOverride::Ihrc { divider }) => {
            internal_plan(request, caps, ClockSource::Ihrc, divider)?
        }
        Some(ClockOverride::Ilrc { divider }) => {
            internal_plan(request, caps, ClockSource::Ilrc, divider)?
        }
        Some(ClockOverride::Eosc {
            crystal_hz,
            divider,
        }) => external_plan(request, caps, crystal_hz, divider)?,
    };

    if plan.achievable_hz > limit_hz {
        return Err(ClockError::AboveLimit {
            frequency_hz: plan.achievable_hz,
            limit_hz,
            millivolts: request.vdd_mv,
        });
    }
    if plan.runs_untrimmed() {
        tracing::warn!(
            "{} on {} has no trim register, running uncalibrated at nominal frequency",
            plan.source,
            caps.arch
        );
    }
    if !plan.is_exact() {
        tracing::warn!(
            "Requested {} Hz, closest achievable is {} Hz ({} ppm)",
            plan.target_hz,
            plan.achievable_hz,
            plan.deviation_ppm()
        );
    }
    tracing::debug!("Clock plan: {}", plan);
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdkstart_config::ChipCatalogue;

    fn caps(chip: &str) -> ClockCapabilities {
        let catalogue = ChipCatalogue::builtin();
        ClockCapabilities::from_chip(catalogue.get(chip).unwrap())
    }

    #[test]
    fn test_clkmd_reset_is_ilrc() {
        assert_eq!(Clkmd::RESET.decode(), Some((ClockSource::Ilrc, 1)));
        assert!(Clkmd::RESET.contains(Clkmd::WATCHDOG));
    }

    #[test]
    fn test_clkmd_encode_decode_table() {
        for &(source, divider, _) in SELECTIONS {
            let clkmd = Clkmd::encode(source, divider).unwrap();
            assert_eq!(clkmd.decode(), Some((source, divider)));
            assert!(!clkmd.contains(Clkmd::WATCHDOG));
        }
        assert_eq!(Clkmd::encode(ClockSource::Ihrc, 2).unwrap().bits(), 0x34);
        assert_eq!(Clkmd::encode(ClockSource::Ilrc, 1).unwrap().bits(), 0xE4);
        assert_eq!(Clkmd::encode(ClockSource::Ihrc, 3), None);
    }

    #[test]
    fn test_8mhz_at_5v_selects_ihrc_div2() {
        let plan = select_clock(&ClockRequest::new(8_000_000, 5000), &caps("PFS154")).unwrap();
        assert_eq!(plan.source, ClockSource::Ihrc);
        assert_eq!(plan.divider, 2);
        assert_eq!(plan.clkmd.bits(), 0x34);
        assert!(plan.is_exact());
        assert_eq!(
            plan.calibration,
            Some(CalibrationRequest {
                kind: CalibrationKind::Ihrc,
                register: 0x0B,
                frequency_hz: 8_000_000,
                millivolts: 5000,
            })
        );
    }

    #[test]
    fn test_divider_nearest_to_nominal() {
        let c = caps("PFS154");
        assert_eq!(select_clock(&ClockRequest::new(1_000_000, 5000), &c).unwrap().divider, 16);
        // 12 MHz raw through /2 is closer to 16 MHz than 24 MHz through /4.
        let plan = select_clock(&ClockRequest::new(6_000_000, 5000), &c).unwrap();
        assert_eq!(plan.divider, 2);
        assert_eq!(plan.achievable_hz, 6_000_000);
    }

    #[test]
    fn test_voltage_limits() {
        let c = caps("PFS154");
        assert!(select_clock(&ClockRequest::new(4_000_000, 2200), &c).is_ok());
        assert_eq!(
            select_clock(&ClockRequest::new(8_000_000, 2200), &c).unwrap_err(),
            ClockError::AboveLimit {
                frequency_hz: 8_000_000,
                limit_hz: 4_000_000,
                millivolts: 2200
            }
        );
        assert!(matches!(
            select_clock(&ClockRequest::new(1_000_000, 6000), &c).unwrap_err(),
            ClockError::VoltageOutOfRange { .. }
        ));
        assert_eq!(
            select_clock(&ClockRequest::new(0, 5000), &c).unwrap_err(),
            ClockError::ZeroFrequency
        );
    }

    #[test]
    fn test_low_frequency_selects_ilrc() {
        let plan = select_clock(&ClockRequest::new(55_000, 5000), &caps("PFS154")).unwrap();
        assert_eq!(plan.source, ClockSource::Ilrc);
        assert_eq!(plan.divider, 1);
        assert_eq!(plan.calibration.unwrap().kind, CalibrationKind::Ilrc);
        assert_eq!(plan.calibration.unwrap().register, 0x39);
    }

    #[test]
    fn test_pdk13_ilrc_is_uncalibrated() {
        let plan = select_clock(&ClockRequest::new(62_000, 3000), &caps("PMS150C")).unwrap();
        assert_eq!(plan.source, ClockSource::Ilrc);
        assert_eq!(plan.calibration, None);
        assert_eq!(plan.achievable_hz, 62_000);
        assert!(plan.runs_untrimmed());
    }

    #[test]
    fn test_pdk13_gap_prefers_trimmed_ihrc() {
        // Past the ILRC ceiling (77.5 kHz) the untrimmed ILRC loses to IHRC/64.
        let plan = select_clock(&ClockRequest::new(150_000, 3000), &caps("PMS150C")).unwrap();
        assert_eq!(plan.source, ClockSource::Ihrc);
        assert_eq!(plan.divider, 64);
        assert_eq!(plan.achievable_hz, ihrc_floor_hz());
        assert!(plan.calibration.is_some());
        assert!(!plan.runs_untrimmed());
    }

    #[test]
    fn test_gap_between_oscillators_picks_closer() {
        // 100 kHz: ILRC tops out at 68.75 kHz, IHRC bottoms out at 187.5 kHz.
        let plan = select_clock(&ClockRequest::new(100_000, 5000), &caps("PFS154")).unwrap();
        assert_eq!(plan.source, ClockSource::Ilrc);
        assert_eq!(plan.achievable_hz, 68_750);

        let plan = select_clock(&ClockRequest::new(150_000, 5000), &caps("PFS154")).unwrap();
        assert_eq!(plan.source, ClockSource::Ihrc);
        assert_eq!(plan.achievable_hz, 187_500);
        assert!(plan.deviation_ppm() > 0);
    }

    #[test]
    fn test_overrides() {
        let c = caps("PFS154");
        let mut request = ClockRequest::new(32_768, 3300);
        request.clock_override = Some(ClockOverride::Eosc {
            crystal_hz: 32_768,
            divider: None,
        });
        let plan = select_clock(&request, &c).unwrap();
        assert_eq!(plan.source, ClockSource::Eosc);
        assert_eq!(plan.divider, 1);
        assert_eq!(plan.clkmd.bits(), 0xA4);
        assert_eq!(plan.calibration, None);

        assert_eq!(
            select_clock(&request, &caps("PMS150C")).unwrap_err(),
            ClockError::EoscUnavailable
        );

        request.clock_override = Some(ClockOverride::Ihrc { divider: Some(3) });
        assert_eq!(
            select_clock(&request, &c).unwrap_err(),
            ClockError::InvalidDivider {
                clock: ClockSource::Ihrc,
                divider: 3
            }
        );

        request.target_hz = 1_000_000;
        request.clock_override = Some(ClockOverride::Ihrc { divider: Some(16) });
        assert_eq!(select_clock(&request, &c).unwrap().clkmd.bits(), 0x1C);
    }

    #[test]
    fn test_ihrc_floor() {
        assert_eq!(ihrc_floor_hz(), 187_500);
    }
}
