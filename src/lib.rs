//! Continuous data logger for the ProWaveDAQ vibration sensor
//!
//! The sensor is polled over Modbus RTU on a background thread. Each read
//! drains the device FIFO and publishes the converted batch into a shared
//! single-slot cell. A recorder on the controlling thread picks up new
//! batches and splits the stream into fixed-length save units, one CSV file
//! per unit.
//!
//! # Quick Start
//!
//! ## Reading the Latest Batch
//! ```no_run
//! use prowave_daq::{ProWaveDaq, Settings};
//!
//! let settings = Settings::load("API/ProWaveDAQ.ini", "API/Master.ini")?;
//! let mut daq = ProWaveDaq::connect(&settings.device)?;
//! daq.start_reading()?;
//!
//! std::thread::sleep(std::time::Duration::from_millis(200));
//! println!("{} reads, latest batch: {:?}", daq.counter(), daq.latest());
//!
//! daq.stop_reading()?;
//! # Ok::<(), prowave_daq::DaqError>(())
//! ```
//!
//! ## Recording Save Units to CSV
//! ```no_run
//! use prowave_daq::{record_until_stopped, CsvWriter, ProWaveDaq, SaveUnitBatcher, Settings, CHANNELS};
//! use std::sync::atomic::AtomicBool;
//! use std::time::Duration;
//!
//! let settings = Settings::load("API/ProWaveDAQ.ini", "API/Master.ini")?;
//! let mut daq = ProWaveDaq::connect(&settings.device)?;
//!
//! let writer = CsvWriter::new(CHANNELS, "output/ProWaveDAQ/run", "run")?;
//! let mut batcher = SaveUnitBatcher::new(writer, settings.save_unit_target(CHANNELS))?;
//!
//! // Set from a signal handler or another thread to end the session
//! let stop = AtomicBool::new(false);
//!
//! daq.start_reading()?;
//! let summary = record_until_stopped(&daq.cell(), &mut batcher, &stop, Duration::from_millis(20))?;
//! daq.stop_reading()?;
//!
//! println!("Recorded {} samples in {} files", summary.samples, summary.rotations + 1);
//! # Ok::<(), prowave_daq::DaqError>(())
//! ```

pub mod batcher;
pub mod buffer;
pub mod common;
pub mod config;
pub mod csv_writer;
pub mod discovery;
pub mod error;
pub mod modbus;
pub mod prowave;
pub mod session;

// Re-export public API
pub use batcher::{BatchSink, SaveUnitBatcher};
pub use buffer::{SampleCell, Snapshot};
pub use common::{parse_label_input, session_dir, validate_label, LabelInput};
pub use config::{DeviceSettings, SaveUnitSettings, Settings};
pub use csv_writer::CsvWriter;
pub use discovery::scan_devices;
pub use error::{DaqError, Result};
pub use modbus::{ModbusRtu, RegisterTransport};
pub use prowave::{AcquisitionLoop, AcquisitionWorker, Cycle, ProWaveDaq, CHANNELS};
pub use session::{record_until_stopped, SessionSummary};
