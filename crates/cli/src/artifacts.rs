// PdkStart - Padauk Firmware Template Toolkit
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use pdkstart_core::image::FirmwareImage;
use pdkstart_core::{ihex, Arch};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Files written by `build`.
#[derive(Debug, Serialize)]
pub struct Artifacts {
    pub ihx: PathBuf,
    pub bin: PathBuf,
    pub map: PathBuf,
    pub sha256: String,
    pub words: usize,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn write_artifacts(dir: &Path, stem: &str, image: &FirmwareImage) -> Result<Artifacts> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {:?}", dir))?;

    let ihx = dir.join(format!("{}.ihx", stem));
    let bin = dir.join(format!("{}.bin", stem));
    let map = dir.join(format!("{}.map", stem));

    write_ihx(&ihx, image)?;
    let bytes = ihex::to_bin(&image.words);
    std::fs::write(&bin, &bytes).with_context(|| format!("Failed to write {:?}", bin))?;
    image.write_map(&map)?;

    Ok(Artifacts {
        ihx,
        bin,
        map,
        sha256: sha256_hex(&bytes),
        words: image.words.len(),
    })
}

pub fn write_ihx(path: &Path, image: &FirmwareImage) -> Result<()> {
    std::fs::write(path, ihex::write_ihx(&image.words))
        .with_context(|| format!("Failed to write {:?}", path))
}

/// Loads an Intel HEX image, plus symbols and RAM layout from the `.map`
/// next to it when present.
pub fn load_image(path: &Path, arch: Arch) -> Result<FirmwareImage> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read image {:?}", path))?;
    let words =
        ihex::read_ihx(&text).with_context(|| format!("Failed to parse Intel HEX {:?}", path))?;
    let mut image = FirmwareImage::from_words(arch, words);

    let map = path.with_extension("map");
    if map.exists() {
        image.load_map(&map)?;
    } else {
        tracing::warn!("No map file at {:?}; symbols and RAM layout unknown", map);
    }
    Ok(image)
}
