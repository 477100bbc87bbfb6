//! INI configuration for the device and the save unit
//!
//! Two files are merged: the device file carries a `[ProWaveDAQ]` section and the
//! master file a `[SaveUnit]` section. Every required key must be present and
//! parse; there are no fallbacks for them.

use crate::error::{DaqError, Result};
use config::{Config, File, FileFormat};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Complete runtime configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(rename = "ProWaveDAQ", alias = "prowavedaq")]
    pub device: DeviceSettings,
    #[serde(rename = "SaveUnit", alias = "saveunit")]
    pub save_unit: SaveUnitSettings,
}

/// Serial link and device parameters
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSettings {
    #[serde(rename = "serialPort", alias = "serialport")]
    pub serial_port: String,
    #[serde(rename = "baudRate", alias = "baudrate")]
    pub baud_rate: u32,
    #[serde(rename = "sampleRate", alias = "samplerate")]
    pub sample_rate: u32,
    #[serde(rename = "slaveID", alias = "slaveid")]
    pub slave_id: u8,
    /// `N`, `E` or `O`
    #[serde(default = "default_parity")]
    pub parity: String,
    #[serde(rename = "dataBits", alias = "databits", default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(rename = "stopBits", alias = "stopbits", default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(rename = "timeoutMs", alias = "timeoutms", default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Length of one output file, in seconds of acquisition
#[derive(Debug, Clone, Deserialize)]
pub struct SaveUnitSettings {
    pub second: u32,
}

fn default_parity() -> String {
    "N".to_string()
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    500
}

impl Settings {
    /// Load and validate both INI files
    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(device_file: P, master_file: Q) -> Result<Self> {
        let device_file = device_file.as_ref().to_string_lossy().into_owned();
        let master_file = master_file.as_ref().to_string_lossy().into_owned();

        let settings: Settings = Config::builder()
            .add_source(File::new(&device_file, FileFormat::Ini).required(true))
            .add_source(File::new(&master_file, FileFormat::Ini).required(true))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from in-memory INI text
    pub fn from_ini_str(device: &str, master: &str) -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(device, FileFormat::Ini))
            .add_source(File::from_str(master, FileFormat::Ini))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that deserialize but cannot drive the device
    pub fn validate(&self) -> Result<()> {
        let device = &self.device;

        if device.serial_port.trim().is_empty() {
            return Err(DaqError::InvalidConfig("serialPort is empty".into()));
        }
        if device.baud_rate == 0 {
            return Err(DaqError::InvalidConfig("baudRate must be non-zero".into()));
        }
        if device.sample_rate == 0 || device.sample_rate > u16::MAX as u32 {
            return Err(DaqError::InvalidConfig(format!(
                "sampleRate must be 1-65535 Hz, got {}",
                device.sample_rate
            )));
        }
        if !(1..=247).contains(&device.slave_id) {
            return Err(DaqError::InvalidConfig(format!(
                "slaveID must be 1-247, got {}",
                device.slave_id
            )));
        }
        if !matches!(device.parity.as_str(), "N" | "E" | "O" | "n" | "e" | "o") {
            return Err(DaqError::InvalidConfig(format!(
                "parity must be N, E or O, got {:?}",
                device.parity
            )));
        }
        if !(5..=8).contains(&device.data_bits) {
            return Err(DaqError::InvalidConfig(format!(
                "dataBits must be 5-8, got {}",
                device.data_bits
            )));
        }
        if !(1..=2).contains(&device.stop_bits) {
            return Err(DaqError::InvalidConfig(format!(
                "stopBits must be 1 or 2, got {}",
                device.stop_bits
            )));
        }
        if self.save_unit.second == 0 {
            return Err(DaqError::InvalidConfig("SaveUnit second must be non-zero".into()));
        }

        Ok(())
    }

    /// Number of samples that make up one output file
    pub fn save_unit_target(&self, channels: usize) -> usize {
        self.save_unit.second as usize * self.device.sample_rate as usize * channels
    }
}

impl DeviceSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEVICE_INI: &str = "\
[ProWaveDAQ]
serialPort = /dev/ttyUSB0
baudRate = 3000000
sampleRate = 7812
slaveID = 1
";

    const MASTER_INI: &str = "\
[SaveUnit]
second = 60
";

    #[test]
    fn test_parse_complete_config() {
        let settings = Settings::from_ini_str(DEVICE_INI, MASTER_INI).unwrap();
        assert_eq!(settings.device.serial_port, "/dev/ttyUSB0");
        assert_eq!(settings.device.baud_rate, 3_000_000);
        assert_eq!(settings.device.sample_rate, 7812);
        assert_eq!(settings.device.slave_id, 1);
        assert_eq!(settings.save_unit.second, 60);

        // Serial framing falls back to 8N1
        assert_eq!(settings.device.parity, "N");
        assert_eq!(settings.device.data_bits, 8);
        assert_eq!(settings.device.stop_bits, 1);
        assert_eq!(settings.device.timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_save_unit_target() {
        let settings = Settings::from_ini_str(DEVICE_INI, MASTER_INI).unwrap();
        assert_eq!(settings.save_unit_target(3), 60 * 7812 * 3);
    }

    #[test]
    fn test_missing_key_is_rejected() {
        let device = "[ProWaveDAQ]\nserialPort = /dev/ttyUSB0\nbaudRate = 3000000\nsampleRate = 7812\n";
        assert!(Settings::from_ini_str(device, MASTER_INI).is_err());
    }

    #[test]
    fn test_missing_section_is_rejected() {
        assert!(Settings::from_ini_str(DEVICE_INI, "").is_err());
    }

    #[test]
    fn test_malformed_value_is_rejected() {
        let device = DEVICE_INI.replace("baudRate = 3000000", "baudRate = fast");
        assert!(Settings::from_ini_str(&device, MASTER_INI).is_err());
    }

    #[test]
    fn test_zero_save_unit_is_rejected() {
        let err = Settings::from_ini_str(DEVICE_INI, "[SaveUnit]\nsecond = 0\n").unwrap_err();
        assert!(matches!(err, DaqError::InvalidConfig(_)));
    }

    #[test]
    fn test_out_of_range_slave_is_rejected() {
        let device = DEVICE_INI.replace("slaveID = 1", "slaveID = 248");
        let err = Settings::from_ini_str(&device, MASTER_INI).unwrap_err();
        assert!(matches!(err, DaqError::InvalidConfig(_)));
    }

    #[test]
    fn test_optional_framing_keys() {
        let device = format!("{DEVICE_INI}parity = E\nstopBits = 2\ntimeoutMs = 50\n");
        let settings = Settings::from_ini_str(&device, MASTER_INI).unwrap();
        assert_eq!(settings.device.parity, "E");
        assert_eq!(settings.device.stop_bits, 2);
        assert_eq!(settings.device.timeout(), Duration::from_millis(50));
    }

    #[test]
    fn test_load_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let device_path = dir.path().join("ProWaveDAQ.ini");
        let master_path = dir.path().join("Master.ini");
        std::fs::write(&device_path, DEVICE_INI).unwrap();
        std::fs::write(&master_path, MASTER_INI).unwrap();

        let settings = Settings::load(&device_path, &master_path).unwrap();
        assert_eq!(settings.device.sample_rate, 7812);

        let missing = dir.path().join("absent.ini");
        assert!(Settings::load(&missing, &master_path).is_err());
    }
}
