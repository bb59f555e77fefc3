// PdkStart - Padauk Firmware Template Toolkit
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use pdkstart_config::{makefile, Arch, ChipCatalogue, ClockOverride, ProjectConfig};
use std::fs;
use tempfile::tempdir;

#[test]
fn test_project_from_makefile_file() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("Makefile");
    let catalogue = ChipCatalogue::builtin();
    let config = ProjectConfig {
        project_name: "Thermo".to_string(),
        device: "PFS173".to_string(),
        arch: Arch::Pdk15,
        f_cpu: 4_000_000,
        target_vdd_mv: 3300,
        target_vdd: 3.3,
        ..Default::default()
    };
    fs::write(&path, makefile::render_default(&config, &catalogue))?;

    let loaded = ProjectConfig::from_file(&path)?;
    assert_eq!(loaded, config);
    assert_eq!(loaded.validate(&catalogue)?.name, "PFS173");
    Ok(())
}

#[test]
fn test_project_from_yaml_file() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("pdkstart.yaml");
    fs::write(
        &path,
        r#"
project_name: Dimmer
device: PMS150C
arch: pdk13
f_cpu: 62000
target_vdd_mv: 3000
target_vdd: 3.0
clock:
  source: ilrc
"#,
    )?;

    let loaded = ProjectConfig::from_file(&path)?;
    assert_eq!(loaded.clock, Some(ClockOverride::Ilrc { divider: None }));
    assert!(loaded.validate(&ChipCatalogue::builtin()).is_ok());
    Ok(())
}

#[test]
fn test_update_existing_makefile_file() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("Makefile");
    let catalogue = ChipCatalogue::builtin();
    fs::write(
        &path,
        makefile::render_default(&ProjectConfig::default(), &catalogue),
    )?;

    let mut config = ProjectConfig::from_file(&path)?;
    config.f_cpu = 1_000_000;
    config.clock = Some(ClockOverride::Ihrc { divider: Some(16) });
    let original = fs::read_to_string(&path)?;
    fs::write(&path, makefile::update_vars(&original, &config))?;

    let updated = fs::read_to_string(&path)?;
    assert!(updated.contains("CLOCK_SOURCE = ihrc\nCLOCK_DIVIDER = 16\n"));
    assert!(updated.contains("ROM_SIZES = "));
    assert_eq!(ProjectConfig::from_file(&path)?, config);

    config.clock = Some(ClockOverride::Ilrc { divider: None });
    let with_divider = fs::read_to_string(&path)?;
    fs::write(&path, makefile::update_vars(&with_divider, &config))?;
    let updated = fs::read_to_string(&path)?;
    assert!(updated.contains("CLOCK_SOURCE = ilrc\n"));
    assert!(!updated.contains("CLOCK_DIVIDER ="));
    assert_eq!(ProjectConfig::from_file(&path)?.clock, config.clock);
    Ok(())
}

#[test]
fn test_missing_project_file() {
    let err = ProjectConfig::from_file("/nonexistent/Makefile").unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to read project config"));
}

#[test]
fn test_user_catalogue_file() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("chips.yaml");
    fs::write(
        &path,
        r#"
schema_version: "1.0"
chips:
  - name: "LAB1"
    arch: "pdk14"
    rom_words: 1024
    ram: "64 B"
    ilrc_hz: 50000
"#,
    )?;
    let catalogue = ChipCatalogue::from_file(&path)?;
    assert_eq!(catalogue.names().collect::<Vec<_>>(), vec!["LAB1"]);
    Ok(())
}
