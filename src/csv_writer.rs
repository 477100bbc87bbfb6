//! Time-stamped CSV output files
//!
//! Each file is named `{dir}/{YYYYMMDDHHMMSS}_{label}.csv` and holds one row per
//! frame with the channel values comma-joined. The file is opened in append
//! mode on every write and is only created once data arrives.
//!
//! Rows are cut from the start of each write. A save unit that is not a whole
//! number of frames therefore leaves the next file starting mid-frame, with
//! its columns shifted until the next aligned batch. This is logged on
//! rotation.

use crate::batcher::BatchSink;
use crate::error::{DaqError, Result};
use chrono::{Local, NaiveDateTime};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Timestamp layout shared by file and session folder names
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

type Clock = Box<dyn FnMut() -> NaiveDateTime + Send>;

/// CSV writer with timestamp-based file rotation
pub struct CsvWriter {
    channels: usize,
    dir: PathBuf,
    label: String,
    current: PathBuf,
    clock: Clock,
    total_samples: usize,
    split_frames: usize,
}

impl CsvWriter {
    /// Create a writer for `channels`-wide rows in `dir`
    ///
    /// The directory is created if it does not exist yet.
    pub fn new<P: AsRef<Path>>(channels: usize, dir: P, label: &str) -> Result<Self> {
        Self::with_clock(channels, dir, label, || Local::now().naive_local())
    }

    /// Same as [`CsvWriter::new`] with a custom time source for file names
    pub fn with_clock<P, F>(channels: usize, dir: P, label: &str, clock: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: FnMut() -> NaiveDateTime + Send + 'static,
    {
        if channels == 0 {
            return Err(DaqError::InvalidParameter("channel count must be non-zero".into()));
        }

        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            info!(dir = %dir.display(), "creating output directory");
        }
        fs::create_dir_all(&dir)?;

        let mut writer = Self {
            channels,
            dir,
            label: label.to_string(),
            current: PathBuf::new(),
            clock: Box::new(clock),
            total_samples: 0,
            split_frames: 0,
        };
        writer.current = writer.generate_filename();
        Ok(writer)
    }

    fn generate_filename(&mut self) -> PathBuf {
        let stamp = (self.clock)().format(TIMESTAMP_FORMAT);
        self.dir.join(format!("{}_{}.csv", stamp, self.label))
    }

    /// File the next write goes to
    pub fn current_path(&self) -> &Path {
        &self.current
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rotations that cut a frame across two files
    pub fn split_frames(&self) -> usize {
        self.split_frames
    }
}

impl BatchSink for CsvWriter {
    fn write(&mut self, samples: &[f64]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.current)?;

        // A trailing partial frame is written as a short row. If a unit ends
        // mid-frame, the next file's rows are shifted by the remainder.
        let mut csv = csv::WriterBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_writer(file);
        for frame in samples.chunks(self.channels) {
            csv.write_record(frame.iter().map(|v| v.to_string()))?;
        }
        csv.flush()?;
        self.total_samples += samples.len();
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        let remainder = self.total_samples % self.channels;
        if remainder != 0 {
            self.split_frames += 1;
            warn!(
                path = %self.current.display(),
                remainder,
                channels = self.channels,
                "save unit ended mid-frame, next file starts with shifted columns"
            );
        }
        let next = self.generate_filename();
        if next == self.current {
            debug!(path = %next.display(), "rotation within the same second reuses file name");
        }
        self.current = next;
        info!(path = %self.current.display(), "save unit complete, file name updated");
        Ok(())
    }
}
