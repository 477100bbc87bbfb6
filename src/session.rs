//! Recording session: the consumer half of the pipeline
//!
//! Runs on the controlling thread, picks up each new batch from the shared
//! cell, and feeds it to the save-unit batcher until the stop flag is set.

use crate::batcher::{BatchSink, SaveUnitBatcher};
use crate::buffer::{SampleCell, Snapshot};
use crate::error::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Totals for one recording session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    /// Batches handed to the batcher
    pub batches: u64,
    /// Samples handed to the batcher
    pub samples: u64,
    /// Batches overwritten before the recorder could pick them up
    pub missed_batches: u64,
    /// Save-unit boundaries crossed
    pub rotations: u64,
    pub elapsed: Duration,
}

impl SessionSummary {
    /// Average rate of recorded samples per second
    pub fn sample_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.samples as f64 / secs
        } else {
            0.0
        }
    }
}

struct Recorder<'a, S: BatchSink> {
    batcher: &'a mut SaveUnitBatcher<S>,
    seen: u64,
    summary: SessionSummary,
}

impl<S: BatchSink> Recorder<'_, S> {
    fn accept(&mut self, snap: Snapshot) -> Result<()> {
        let skipped = snap.counter - self.seen - 1;
        if skipped > 0 {
            warn!(skipped, counter = snap.counter, "recorder fell behind, batches overwritten");
            self.summary.missed_batches += skipped;
        }
        self.seen = snap.counter;

        let rotations = self.batcher.push(&snap.samples)?;
        self.summary.batches += 1;
        self.summary.samples += snap.samples.len() as u64;
        self.summary.rotations += rotations as u64;
        Ok(())
    }
}

/// Record batches from `cell` until `stop` is set
///
/// Only batches published after the call starts are recorded. Waiting on the
/// cell is bounded by `poll_interval`, so the stop flag is checked at least
/// that often. After the stop, one last unseen batch is still saved. Errors
/// from the sink end the session.
pub fn record_until_stopped<S: BatchSink>(
    cell: &SampleCell,
    batcher: &mut SaveUnitBatcher<S>,
    stop: &AtomicBool,
    poll_interval: Duration,
) -> Result<SessionSummary> {
    let started = Instant::now();
    let mut recorder = Recorder {
        batcher,
        seen: cell.counter(),
        summary: SessionSummary::default(),
    };

    while !stop.load(Ordering::Acquire) {
        if let Some(snap) = cell.wait_newer(recorder.seen, poll_interval) {
            recorder.accept(snap)?;
        }
    }

    let last = cell.snapshot();
    if last.counter > recorder.seen {
        info!("saving final data before exit");
        recorder.accept(last)?;
    }

    let mut summary = recorder.summary;
    summary.elapsed = started.elapsed();
    Ok(summary)
}
