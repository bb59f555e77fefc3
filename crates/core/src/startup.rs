// PdkStart - Padauk Firmware Template Toolkit
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::calibration::CalibrationMarker;
use crate::isa::Instruction;
use crate::sysclock::ClockPlan;
use pdkstart_config::IoMap;
use std::num::NonZeroU8;

/// Name the runtime calls the startup hook by.
pub const STARTUP_SYMBOL: &str = "_sdcc_external_startup";

/// Value returned by the startup hook to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartupStatus {
    /// Run the remaining runtime init (clear bss, copy data).
    #[default]
    Continue,
    /// Jump straight to main, leaving RAM untouched.
    SkipInit(NonZeroU8),
}

impl StartupStatus {
    pub fn code(self) -> u8 {
        match self {
            StartupStatus::Continue => 0,
            StartupStatus::SkipInit(code) => code.get(),
        }
    }

    pub fn from_code(code: u8) -> Self {
        NonZeroU8::new(code).map_or(StartupStatus::Continue, StartupStatus::SkipInit)
    }

    pub fn runs_init(self) -> bool {
        self == StartupStatus::Continue
    }
}

/// Body of the startup hook: select the planned clock, leave the calibration
/// marker for the programmer and return `status`.
pub fn startup_routine(plan: &ClockPlan, io: &IoMap, status: StartupStatus) -> Vec<Instruction> {
    let mut code = vec![
        Instruction::MovAK(plan.clkmd.bits()),
        Instruction::MovIoA(io.clkmd),
    ];
    if let Some(marker) = CalibrationMarker::for_plan(plan) {
        code.extend(marker.instructions());
    }
    code.push(Instruction::RetK(status.code()));
    code
}
