// PdkStart - Padauk Firmware Template Toolkit
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

mod artifacts;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pdkstart_config::{makefile, ChipCatalogue, ChipDescriptor, ProjectConfig};
use pdkstart_core::calibration::{self, CalibrationError, CalibrationKind, SimulatedOscillator};
use pdkstart_core::image::{FirmwareImage, ImageBuilder, ImageError, SizeReport, UsageLevel};
use pdkstart_core::machine::BootEvent;
use pdkstart_core::startup::StartupStatus;
use pdkstart_core::sysclock::{
    select_clock, ClockCapabilities, ClockPlan, ClockRequest, ClockSource, IHRC_NOMINAL_HZ,
};
use pdkstart_core::{Machine, StopReason};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use tracing::{error, info, warn};

const EXIT_PASS: u8 = 0;
const EXIT_CHECK_FAIL: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

const DEFAULT_MAX_STEPS: u64 = 10_000;

/// Makefile keys accepted by `init` and `config --set`.
const SETTABLE_KEYS: &[&str] = &[
    makefile::PROJECT_NAME,
    makefile::DEVICE,
    makefile::ARCH,
    makefile::F_CPU,
    makefile::TARGET_VDD_MV,
    makefile::TARGET_VDD,
    makefile::OPT_FLAGS,
    makefile::CLOCK_SOURCE,
    makefile::CLOCK_DIVIDER,
    makefile::EOSC_HZ,
];

fn parse_u16_addr(s: &str) -> Result<u16, String> {
    let trimmed = s.trim();
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u16::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex address '{}': {}", s, e))
    } else {
        u16::from_str(trimmed).map_err(|e| format!("Invalid address '{}': {}", s, e))
    }
}

fn parse_setting(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Expected KEY=VALUE, got '{}'", s))?;
    let key = key.trim().to_ascii_uppercase();
    if !SETTABLE_KEYS.contains(&key.as_str()) {
        return Err(format!(
            "Unknown key '{}'; supported: {}",
            key,
            SETTABLE_KEYS.join(", ")
        ));
    }
    Ok((key, value.trim().to_string()))
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Padauk firmware template toolkit",
    long_about = None
)]
struct Cli {
    /// Project configuration: a Makefile, or a YAML file (.yaml/.yml)
    #[arg(short, long, global = true, default_value = "Makefile")]
    config: PathBuf,

    /// Chip catalogue (YAML) replacing the built-in device table
    #[arg(long, global = true)]
    chips: Option<PathBuf>,

    /// Enable instruction-level execution tracing
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a project configuration with the template defaults.
    Init(InitArgs),
    /// Show or change the project configuration.
    Config(ConfigArgs),
    /// List the supported devices.
    Devices(JsonArgs),
    /// Show the clock plan selected for the project.
    Clock(JsonArgs),
    /// Generate the firmware image (.ihx, .bin, .map).
    Build(BuildArgs),
    /// Report ROM and RAM usage against the device limits.
    Size(SizeArgs),
    /// Tune the oscillators of an image and patch in the trim values.
    Calibrate(CalibrateArgs),
    /// Simulate the boot sequence from reset until main idles.
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct JsonArgs {
    /// Print machine-readable JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct InitArgs {
    /// Directory to create the project in
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Initial settings, e.g. --set DEVICE=PMS150C (repeatable)
    #[arg(long = "set", value_parser = parse_setting)]
    settings: Vec<(String, String)>,

    /// Write pdkstart.yaml instead of a Makefile
    #[arg(long)]
    yaml: bool,

    /// Overwrite an existing configuration
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// Change a setting, e.g. --set F_CPU=1000000 (repeatable)
    #[arg(long = "set", value_parser = parse_setting)]
    settings: Vec<(String, String)>,

    /// Print machine-readable JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// Directory receiving the build artifacts
    #[arg(short, long, default_value = ".output")]
    output_dir: PathBuf,

    /// Status returned by the startup hook; non-zero skips runtime init
    #[arg(long, default_value_t = 0)]
    startup_status: u8,

    /// Print the disassembly of the generated image
    #[arg(long)]
    listing: bool,

    /// Print machine-readable JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct SizeArgs {
    /// Image to measure (.ihx); built in memory when omitted
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct CalibrateArgs {
    /// Image to calibrate (.ihx)
    #[arg(short, long)]
    image: PathBuf,

    /// Where to write the patched image; defaults to patching in place
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Offset of the simulated untrimmed oscillator from nominal
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    deviation_ppm: i32,

    /// Largest accepted frequency error after tuning
    #[arg(long, default_value_t = calibration::DEFAULT_TOLERANCE_PPM)]
    tolerance_ppm: u32,

    /// Print machine-readable JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Image to simulate (.ihx); built in memory when omitted
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// Maximum number of instructions to execute
    #[arg(long, default_value_t = DEFAULT_MAX_STEPS)]
    max_steps: u64,

    /// Breakpoint program address (repeatable)
    #[arg(long, value_parser = parse_u16_addr)]
    breakpoint: Vec<u16>,

    /// Print machine-readable JSON
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing with appropriate level based on --trace flag
    if cli.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(std::io::stderr)
            .init();
    }

    match &cli.command {
        Commands::Init(args) => run_init(&cli, args),
        Commands::Config(args) => run_config(&cli, args),
        Commands::Devices(args) => run_devices(&cli, args),
        Commands::Clock(args) => run_clock(&cli, args),
        Commands::Build(args) => run_build(&cli, args),
        Commands::Size(args) => run_size(&cli, args),
        Commands::Calibrate(args) => run_calibrate(&cli, args),
        Commands::Run(args) => run_boot(&cli, args),
    }
}

fn fail(code: u8, e: anyhow::Error) -> ExitCode {
    error!("{:#}", e);
    ExitCode::from(code)
}

fn print_json<T: Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::from(EXIT_PASS)
        }
        Err(e) => fail(EXIT_RUNTIME_ERROR, e.into()),
    }
}

fn load_catalogue(cli: &Cli) -> Result<ChipCatalogue> {
    match &cli.chips {
        Some(path) => ChipCatalogue::from_file(path),
        None => Ok(ChipCatalogue::builtin()),
    }
}

/// Loads and validates the project, returning it with its chip.
fn load_project(cli: &Cli) -> Result<(ProjectConfig, ChipDescriptor)> {
    let catalogue = load_catalogue(cli)?;
    let config = ProjectConfig::from_file(&cli.config)?;
    let chip = config
        .validate(&catalogue)
        .with_context(|| format!("Invalid project configuration in {:?}", cli.config))?
        .clone();
    Ok((config, chip))
}

fn plan_for(config: &ProjectConfig, chip: &ChipDescriptor) -> Result<ClockPlan> {
    select_clock(
        &ClockRequest::from_project(config),
        &ClockCapabilities::from_chip(chip),
    )
    .with_context(|| format!("No usable clock for {} Hz on {}", config.f_cpu, chip.name))
}

/// Applies `KEY=VALUE` settings on top of `config`.
///
/// Changing the device also switches ARCH, and either supply voltage key
/// updates the other, unless both are given. A new clock source without a
/// divider starts from automatic divider selection.
fn apply_settings(
    config: &ProjectConfig,
    settings: &[(String, String)],
    catalogue: &ChipCatalogue,
) -> Result<ProjectConfig> {
    let is_set = |key: &str| settings.iter().any(|(k, _)| k == key);
    let current_source = config
        .clock
        .map_or("auto".to_string(), |clock| clock.source().to_string());
    let source_changed = settings.iter().any(|(key, value)| {
        key == makefile::CLOCK_SOURCE && !value.eq_ignore_ascii_case(&current_source)
    });
    let mut lines: Vec<String> = config
        .to_makefile_vars()
        .into_iter()
        .filter(|(key, _)| {
            !(source_changed && *key == makefile::CLOCK_DIVIDER && !is_set(makefile::CLOCK_DIVIDER))
        })
        .map(|(key, value)| format!("{} = {}", key, value))
        .collect();

    for (key, value) in settings {
        lines.push(format!("{} = {}", key, value));
        match key.as_str() {
            makefile::DEVICE if !is_set(makefile::ARCH) => {
                if let Some(chip) = catalogue.get(value) {
                    lines.push(format!("{} = {}", makefile::ARCH, chip.arch));
                }
            }
            makefile::TARGET_VDD_MV if !is_set(makefile::TARGET_VDD) => {
                if let Ok(mv) = value.parse::<u16>() {
                    lines.push(format!("{} = {}", makefile::TARGET_VDD, f32::from(mv) / 1000.0));
                }
            }
            makefile::TARGET_VDD if !is_set(makefile::TARGET_VDD_MV) => {
                if let Ok(volts) = value.parse::<f32>() {
                    let mv = (volts * 1000.0).round() as u16;
                    lines.push(format!("{} = {}", makefile::TARGET_VDD_MV, mv));
                }
            }
            _ => {}
        }
    }

    Ok(ProjectConfig::from_makefile_str(&lines.join("\n"))?)
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "yaml" || ext == "yml")
}

fn run_init(cli: &Cli, args: &InitArgs) -> ExitCode {
    let result = (|| -> Result<PathBuf> {
        let catalogue = load_catalogue(cli)?;
        let config = apply_settings(&ProjectConfig::default(), &args.settings, &catalogue)?;
        config.validate(&catalogue)?;

        let path = args
            .dir
            .join(if args.yaml { "pdkstart.yaml" } else { "Makefile" });
        if path.exists() && !args.force {
            anyhow::bail!("{:?} already exists; pass --force to overwrite", path);
        }
        std::fs::create_dir_all(&args.dir)
            .with_context(|| format!("Failed to create {:?}", args.dir))?;
        let content = if args.yaml {
            config.to_yaml()?
        } else {
            makefile::render_default(&config, &catalogue)
        };
        std::fs::write(&path, content).with_context(|| format!("Failed to write {:?}", path))?;
        Ok(path)
    })();

    match result {
        Ok(path) => {
            info!("Created project configuration {:?}", path);
            ExitCode::from(EXIT_PASS)
        }
        Err(e) => fail(EXIT_CONFIG_ERROR, e),
    }
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> ExitCode {
    let result = (|| -> Result<ProjectConfig> {
        let catalogue = load_catalogue(cli)?;
        let config = ProjectConfig::from_file(&cli.config)?;
        if args.settings.is_empty() {
            return Ok(config);
        }

        let updated = apply_settings(&config, &args.settings, &catalogue)?;
        updated.validate(&catalogue)?;
        let content = if is_yaml(&cli.config) {
            updated.to_yaml()?
        } else {
            let original = std::fs::read_to_string(&cli.config)
                .with_context(|| format!("Failed to read {:?}", cli.config))?;
            makefile::update_vars(&original, &updated)
        };
        std::fs::write(&cli.config, content)
            .with_context(|| format!("Failed to write {:?}", cli.config))?;
        info!("Updated {:?}", cli.config);
        Ok(updated)
    })();

    let config = match result {
        Ok(config) => config,
        Err(e) => return fail(EXIT_CONFIG_ERROR, e),
    };
    if args.json {
        return print_json(&config);
    }
    for (key, value) in config.to_makefile_vars() {
        println!("{:<14}= {}", key, value);
    }
    ExitCode::from(EXIT_PASS)
}

#[derive(Serialize)]
struct DeviceRow<'a> {
    name: &'a str,
    arch: String,
    rom_words: u32,
    ram_bytes: u32,
    ilrc_hz: u32,
    eosc: bool,
}

fn run_devices(cli: &Cli, args: &JsonArgs) -> ExitCode {
    let catalogue = match load_catalogue(cli) {
        Ok(catalogue) => catalogue,
        Err(e) => return fail(EXIT_CONFIG_ERROR, e),
    };
    let rows: Vec<DeviceRow> = catalogue
        .chips
        .iter()
        .map(|chip| DeviceRow {
            name: &chip.name,
            arch: chip.arch.to_string(),
            rom_words: chip.rom_words,
            ram_bytes: chip.ram_bytes().unwrap_or(0),
            ilrc_hz: chip.ilrc_hz,
            eosc: chip.eosc,
        })
        .collect();

    if args.json {
        return print_json(&rows);
    }
    println!(
        "{:<10} {:<6} {:>9} {:>9} {:>8}  EOSC",
        "DEVICE", "ARCH", "ROM [w]", "RAM [B]", "ILRC"
    );
    for row in rows {
        println!(
            "{:<10} {:<6} {:>9} {:>9} {:>8}  {}",
            row.name,
            row.arch,
            row.rom_words,
            row.ram_bytes,
            row.ilrc_hz,
            if row.eosc { "yes" } else { "no" }
        );
    }
    ExitCode::from(EXIT_PASS)
}

fn run_clock(cli: &Cli, args: &JsonArgs) -> ExitCode {
    let (config, chip) = match load_project(cli) {
        Ok(project) => project,
        Err(e) => return fail(EXIT_CONFIG_ERROR, e),
    };
    let plan = match plan_for(&config, &chip) {
        Ok(plan) => plan,
        Err(e) => return fail(EXIT_CONFIG_ERROR, e),
    };
    if args.json {
        return print_json(&plan);
    }
    println!("{}", plan);
    ExitCode::from(EXIT_PASS)
}

fn build_image(
    config: &ProjectConfig,
    chip: &ChipDescriptor,
    status: StartupStatus,
) -> Result<(ClockPlan, FirmwareImage)> {
    let plan = plan_for(config, chip)?;
    let image = ImageBuilder::new(chip, &plan)
        .with_startup_status(status)
        .build()?;
    Ok((plan, image))
}

/// Exit code for a failed build: overflows are check failures.
fn build_error_code(e: &anyhow::Error) -> u8 {
    match e.downcast_ref::<ImageError>() {
        Some(ImageError::RomOverflow { .. } | ImageError::RamOverflow { .. }) => EXIT_CHECK_FAIL,
        _ => EXIT_CONFIG_ERROR,
    }
}

fn run_build(cli: &Cli, args: &BuildArgs) -> ExitCode {
    let (config, chip) = match load_project(cli) {
        Ok(project) => project,
        Err(e) => return fail(EXIT_CONFIG_ERROR, e),
    };
    if args.startup_status != 0 {
        warn!(
            "Startup hook returns {}: runtime init (bss clear, data copy) will be skipped",
            args.startup_status
        );
    }
    let (_, image) =
        match build_image(&config, &chip, StartupStatus::from_code(args.startup_status)) {
            Ok(built) => built,
            Err(e) => {
                let code = build_error_code(&e);
                return fail(code, e);
            }
        };

    let artifacts = match artifacts::write_artifacts(&args.output_dir, &config.output_name(), &image)
    {
        Ok(artifacts) => artifacts,
        Err(e) => return fail(EXIT_RUNTIME_ERROR, e),
    };
    info!(
        "Wrote {:?} ({} words, sha256 {})",
        artifacts.ihx, artifacts.words, artifacts.sha256
    );

    if args.listing {
        print!("{}", image.listing());
    }
    if args.json {
        return print_json(&artifacts);
    }
    ExitCode::from(EXIT_PASS)
}

fn report_usage(report: &SizeReport) -> u8 {
    let percent = report.rom_percent();
    match report.rom_level() {
        UsageLevel::Ok => EXIT_PASS,
        UsageLevel::Note => {
            info!("ROM usage is above 75% ({}%)", percent);
            EXIT_PASS
        }
        UsageLevel::Warning => {
            warn!("ROM usage is above 90% ({}%)", percent);
            EXIT_PASS
        }
        UsageLevel::Overflow => {
            error!(
                "ROM overflow: {} words used, {} available",
                report.rom_used, report.rom_total
            );
            EXIT_CHECK_FAIL
        }
    }
}

fn run_size(cli: &Cli, args: &SizeArgs) -> ExitCode {
    let (config, chip) = match load_project(cli) {
        Ok(project) => project,
        Err(e) => return fail(EXIT_CONFIG_ERROR, e),
    };
    let image = match &args.image {
        Some(path) => artifacts::load_image(path, chip.arch),
        None => build_image(&config, &chip, StartupStatus::Continue).map(|(_, image)| image),
    };
    let image = match image {
        Ok(image) => image,
        Err(e) => return fail(EXIT_CONFIG_ERROR, e),
    };
    let report = match SizeReport::new(&image, &chip) {
        Ok(report) => report,
        Err(e) => return fail(EXIT_CONFIG_ERROR, e),
    };

    let code = report_usage(&report);
    if args.json {
        if let Err(e) = serde_json::to_string_pretty(&report).map(|json| println!("{}", json)) {
            return fail(EXIT_RUNTIME_ERROR, e.into());
        }
    } else {
        print!("{}", report);
    }
    ExitCode::from(code)
}

/// Source and divider the image selects, observed by booting it.
fn booted_clock(image: &FirmwareImage, chip: &ChipDescriptor) -> Result<Option<(ClockSource, u8)>> {
    let mut machine = Machine::for_chip(image.clone(), chip)?;
    machine
        .run(Some(DEFAULT_MAX_STEPS))
        .context("Boot simulation failed")?;
    Ok(machine.io.clock_selection())
}

fn run_calibrate(cli: &Cli, args: &CalibrateArgs) -> ExitCode {
    let (_, chip) = match load_project(cli) {
        Ok(project) => project,
        Err(e) => return fail(EXIT_CONFIG_ERROR, e),
    };
    let mut image = match artifacts::load_image(&args.image, chip.arch) {
        Ok(image) => image,
        Err(e) => return fail(EXIT_CONFIG_ERROR, e),
    };
    let selection = match booted_clock(&image, &chip) {
        Ok(selection) => selection,
        Err(e) => return fail(EXIT_RUNTIME_ERROR, e),
    };

    let reports = calibration::calibrate(&mut image, args.tolerance_ppm, |marker| {
        let (source, nominal_hz) = match marker.kind {
            CalibrationKind::Ihrc => (ClockSource::Ihrc, IHRC_NOMINAL_HZ),
            CalibrationKind::Ilrc => (ClockSource::Ilrc, chip.ilrc_hz),
        };
        let divider = match selection {
            Some((selected, divider)) if selected == source => divider,
            _ => {
                warn!("{} is not the selected system clock, probing undivided", marker.kind);
                1
            }
        };
        SimulatedOscillator::new(nominal_hz, divider, args.deviation_ppm)
    });
    let reports = match reports {
        Ok(reports) => reports,
        Err(e @ (CalibrationError::NoMarker | CalibrationError::OutOfTolerance { .. })) => {
            return fail(EXIT_CHECK_FAIL, e.into())
        }
        Err(e) => return fail(EXIT_RUNTIME_ERROR, e.into()),
    };

    let output = args.output.clone().unwrap_or_else(|| args.image.clone());
    let written = artifacts::write_ihx(&output, &image).and_then(|_| {
        if output != args.image {
            image.write_map(output.with_extension("map"))
        } else {
            Ok(())
        }
    });
    if let Err(e) = written {
        return fail(EXIT_RUNTIME_ERROR, e);
    }
    info!("Wrote calibrated image {:?}", output);

    if args.json {
        return print_json(&reports);
    }
    for report in &reports {
        println!(
            "{} @ {:#06x}: trim {:#04x} -> {} Hz ({:+} ppm, target {} Hz at {} mV)",
            report.site.marker.kind,
            report.site.offset,
            report.result.trim,
            report.result.measured_hz,
            report.result.error_ppm,
            report.site.marker.frequency_hz,
            report.site.marker.millivolts
        );
    }
    ExitCode::from(EXIT_PASS)
}

#[derive(Serialize)]
struct BootReport<'a> {
    stop_reason: StopReason,
    startup_status: Option<u8>,
    total_cycles: u64,
    clock_source: Option<ClockSource>,
    clock_divider: Option<u8>,
    trace: &'a [BootEvent],
}

fn print_event(event: &BootEvent) {
    match event {
        BootEvent::Reset => println!("reset"),
        BootEvent::Call { from, to, symbol } => println!(
            "{:#06x}: call {} ({:#06x})",
            from,
            symbol.as_deref().unwrap_or("?"),
            to
        ),
        BootEvent::Return { to, a } => println!("        ret -> {:#06x} (a={:#04x})", to, a),
        BootEvent::IoWrite { addr, value } => {
            println!("        io[{:#04x}] <- {:#04x}", addr, value)
        }
        BootEvent::Idle { pc } => println!("{:#06x}: idle", pc),
    }
}

fn run_boot(cli: &Cli, args: &RunArgs) -> ExitCode {
    let (config, chip) = match load_project(cli) {
        Ok(project) => project,
        Err(e) => return fail(EXIT_CONFIG_ERROR, e),
    };
    let image = match &args.image {
        Some(path) => artifacts::load_image(path, chip.arch),
        None => build_image(&config, &chip, StartupStatus::Continue).map(|(_, image)| image),
    };
    let image = match image {
        Ok(image) => image,
        Err(e) => return fail(EXIT_CONFIG_ERROR, e),
    };

    let mut machine = match Machine::for_chip(image, &chip) {
        Ok(machine) => machine,
        Err(e) => return fail(EXIT_CONFIG_ERROR, e),
    };
    machine.breakpoints.extend(args.breakpoint.iter().copied());

    info!("Booting {} image on {}", chip.arch, chip.name);
    let stop_reason = match machine.run(Some(args.max_steps)) {
        Ok(reason) => reason,
        Err(e) => {
            for event in machine.trace() {
                print_event(event);
            }
            return fail(EXIT_RUNTIME_ERROR, e.into());
        }
    };

    let selection = machine.io.clock_selection();
    let report = BootReport {
        stop_reason,
        startup_status: machine.startup_status().map(StartupStatus::code),
        total_cycles: machine.total_cycles,
        clock_source: selection.map(|(source, _)| source),
        clock_divider: selection.map(|(_, divider)| divider),
        trace: machine.trace(),
    };

    let code = match stop_reason {
        StopReason::MaxStepsReached => {
            warn!("Core did not reach the idle loop within {} steps", args.max_steps);
            EXIT_CHECK_FAIL
        }
        _ => EXIT_PASS,
    };

    if args.json {
        if let Err(e) = serde_json::to_string_pretty(&report).map(|json| println!("{}", json)) {
            return fail(EXIT_RUNTIME_ERROR, e.into());
        }
    } else {
        for event in report.trace {
            print_event(event);
        }
        println!(
            "stop: {:?}, startup status: {}, cycles: {}",
            report.stop_reason,
            report
                .startup_status
                .map_or("-".to_string(), |status| status.to_string()),
            report.total_cycles
        );
    }
    ExitCode::from(code)
}
