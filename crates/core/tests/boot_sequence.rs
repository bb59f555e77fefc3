// PdkStart - Padauk Firmware Template Toolkit
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use pdkstart_config::{ChipCatalogue, ChipDescriptor, ClockOverride};
use pdkstart_core::calibration::{self, CalibrationKind, SimulatedOscillator};
use pdkstart_core::image::{FirmwareImage, ImageBuilder, MAIN_SYMBOL};
use pdkstart_core::machine::RAM_FILL;
use pdkstart_core::startup::{StartupStatus, STARTUP_SYMBOL};
use pdkstart_core::sysclock::{select_clock, ClockCapabilities, ClockPlan, ClockRequest, ClockSource};
use pdkstart_core::{BootEvent, IoSpace, Machine, SimResult, SimulationError, StopReason};
use std::num::NonZeroU8;

const MAX_STEPS: Option<u64> = Some(10_000);

/// IO space that records every access in order.
#[derive(Debug)]
struct RecordingIo {
    registers: Vec<u8>,
    writes: Vec<(u8, u8)>,
}

impl RecordingIo {
    fn new() -> Self {
        Self {
            registers: vec![0; 128],
            writes: Vec::new(),
        }
    }
}

impl IoSpace for RecordingIo {
    fn read(&self, addr: u8) -> SimResult<u8> {
        self.registers
            .get(addr as usize)
            .copied()
            .ok_or(SimulationError::IoViolation(addr))
    }

    fn write(&mut self, addr: u8, value: u8) -> SimResult<()> {
        *self
            .registers
            .get_mut(addr as usize)
            .ok_or(SimulationError::IoViolation(addr))? = value;
        self.writes.push((addr, value));
        Ok(())
    }
}

fn plan(chip: &ChipDescriptor, request: ClockRequest) -> ClockPlan {
    select_clock(&request, &ClockCapabilities::from_chip(chip)).unwrap()
}

fn boot(image: FirmwareImage, chip: &ChipDescriptor) -> anyhow::Result<Machine<pdkstart_core::DeviceIo>> {
    let mut machine = Machine::for_chip(image, chip)?;
    let reason = machine.run(MAX_STEPS)?;
    assert!(matches!(reason, StopReason::Idle { .. }), "{:?}", reason);
    Ok(machine)
}

fn position(trace: &[BootEvent], symbol: &str) -> Option<usize> {
    trace.iter().position(
        |event| matches!(event, BootEvent::Call { symbol: Some(s), .. } if s == symbol),
    )
}

#[test]
fn test_startup_returns_zero_on_every_chip() -> anyhow::Result<()> {
    let catalogue = ChipCatalogue::builtin();
    for chip in &catalogue.chips {
        for request in [
            ClockRequest::new(1_000_000, 3300),
            ClockRequest::new(chip.ilrc_hz, 3300),
        ] {
            let plan = plan(chip, request);
            let image = ImageBuilder::new(chip, &plan).build()?;
            let machine = boot(image, chip)?;
            assert_eq!(
                machine.startup_status(),
                Some(StartupStatus::Continue),
                "{} at {} Hz",
                chip.name,
                request.target_hz
            );
        }
    }
    Ok(())
}

#[test]
fn test_startup_runs_once_before_main() -> anyhow::Result<()> {
    let catalogue = ChipCatalogue::builtin();
    let chip = catalogue.get("PMS152").unwrap();
    let plan = plan(chip, ClockRequest::new(4_000_000, 5000));
    let machine = boot(ImageBuilder::new(chip, &plan).build()?, chip)?;
    let trace = machine.trace();

    assert_eq!(machine.call_count(STARTUP_SYMBOL), 1);
    assert_eq!(machine.call_count(MAIN_SYMBOL), 1);
    let startup = position(trace, STARTUP_SYMBOL).unwrap();
    let main = position(trace, MAIN_SYMBOL).unwrap();
    assert!(startup < main);

    // The startup hook has returned before main is entered.
    assert!(trace[startup..main]
        .iter()
        .any(|event| matches!(event, BootEvent::Return { a: 0, .. })));
    assert_eq!(trace.first(), Some(&BootEvent::Reset));
    assert!(matches!(trace.last(), Some(BootEvent::Idle { .. })));
    Ok(())
}

#[test]
fn test_fast_clock_end_to_end() -> anyhow::Result<()> {
    let catalogue = ChipCatalogue::builtin();
    let chip = catalogue.get("PFS154").unwrap();
    let plan = plan(chip, ClockRequest::new(8_000_000, 5000));
    assert_eq!(plan.source, ClockSource::Ihrc);

    let image = ImageBuilder::new(chip, &plan).build()?;
    let sites = calibration::scan(&image);
    assert_eq!(sites.len(), 1);
    assert_eq!(sites[0].marker.kind, CalibrationKind::Ihrc);
    assert_eq!(sites[0].marker.frequency_hz, 8_000_000);
    assert_eq!(sites[0].marker.millivolts, 5000);

    let main = image.symbol(MAIN_SYMBOL).unwrap();
    let mut machine = Machine::for_chip(image, chip)?;
    machine.breakpoints.insert(main);
    assert_eq!(machine.run(MAX_STEPS)?, StopReason::Breakpoint(main));
    assert_eq!(machine.io.clock_selection(), Some((ClockSource::Ihrc, 2)));
    // The unpatched marker leaves the trim register alone.
    assert_eq!(machine.io.trim(ClockSource::Ihrc), Some(0));

    let sp = machine.io.map().sp as usize;
    let mut before = machine.io.registers().to_vec();
    let writes_before = machine.io.writes().len();
    machine.breakpoints.clear();
    assert!(matches!(machine.run(MAX_STEPS)?, StopReason::Idle { .. }));

    let mut after = machine.io.registers().to_vec();
    before[sp] = 0;
    after[sp] = 0;
    assert_eq!(before, after);
    assert!(machine.io.writes()[writes_before..]
        .iter()
        .all(|write| write.addr as usize == sp));
    Ok(())
}

#[test]
fn test_calibrated_image_loads_trim() -> anyhow::Result<()> {
    let catalogue = ChipCatalogue::builtin();
    let chip = catalogue.get("PFS173").unwrap();
    let plan = plan(chip, ClockRequest::new(8_000_000, 5000));
    let mut image = ImageBuilder::new(chip, &plan).build()?;

    let reports = calibration::calibrate(&mut image, calibration::DEFAULT_TOLERANCE_PPM, |_| {
        SimulatedOscillator::new(16_000_000, plan.divider, -20_000)
    })?;
    assert_eq!(reports.len(), 1);
    let trim = reports[0].result.trim;
    assert!(trim > 128);

    let machine = boot(image, chip)?;
    assert_eq!(machine.io.trim(ClockSource::Ihrc), Some(trim));
    assert_eq!(machine.startup_status(), Some(StartupStatus::Continue));
    Ok(())
}

#[test]
fn test_status_controls_runtime_init() -> anyhow::Result<()> {
    let catalogue = ChipCatalogue::builtin();
    let chip = catalogue.get("PFS154").unwrap();
    let plan = plan(chip, ClockRequest::new(8_000_000, 5000));

    let initialised = ImageBuilder::new(chip, &plan)
        .with_data(vec![0x42])
        .with_bss(2)
        .build()?;
    let machine = boot(initialised, chip)?;
    assert_eq!(&machine.ram[..3], &[0x42, 0, 0]);

    let skipped = ImageBuilder::new(chip, &plan)
        .with_data(vec![0x42])
        .with_bss(2)
        .with_startup_status(StartupStatus::SkipInit(NonZeroU8::new(1).unwrap()))
        .build()?;
    let machine = boot(skipped, chip)?;
    assert_eq!(&machine.ram[..3], &[RAM_FILL; 3]);
    assert_eq!(machine.call_count(MAIN_SYMBOL), 1);
    assert!(!machine.startup_status().unwrap().runs_init());
    Ok(())
}

#[test]
fn test_startup_writes_through_io_handle() -> anyhow::Result<()> {
    let catalogue = ChipCatalogue::builtin();
    let chip = catalogue.get("PMS150C").unwrap();
    let mut request = ClockRequest::new(2_000_000, 3000);
    request.clock_override = Some(ClockOverride::Ihrc { divider: Some(8) });
    let plan = plan(chip, request);
    let image = ImageBuilder::new(chip, &plan).build()?;

    let map = chip.io_map();
    let mut machine = Machine::new(image, RecordingIo::new(), chip.ram_bytes()?, &map);
    assert!(matches!(machine.run(MAX_STEPS)?, StopReason::Idle { .. }));

    let non_stack: Vec<_> = machine
        .io
        .writes
        .iter()
        .filter(|(addr, _)| *addr != map.sp)
        .collect();
    assert_eq!(non_stack, vec![&(map.clkmd, plan.clkmd.bits())]);
    assert_eq!(machine.io.writes[0], (map.sp, 0));
    Ok(())
}
