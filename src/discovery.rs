//! Serial device discovery

use crate::error::{DaqError, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// File name pattern of USB serial adapters
const DEVICE_PATTERN: &str = r"^ttyUSB[0-9]+$";

/// List USB serial devices under `dir` (normally `/dev`), sorted by name
pub fn scan_devices<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let pattern = Regex::new(DEVICE_PATTERN)
        .map_err(|e| DaqError::InvalidParameter(format!("device pattern: {}", e)))?;

    let mut devices: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| pattern.is_match(name))
                .unwrap_or(false)
        })
        .map(|entry| entry.path())
        .collect();

    devices.sort();
    Ok(devices)
}
