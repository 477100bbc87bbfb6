//! Splitting of the sample stream into fixed-size save units

use crate::error::{DaqError, Result};

/// Destination for batched samples
pub trait BatchSink {
    /// Append samples to the current output unit
    fn write(&mut self, samples: &[f64]) -> Result<()>;

    /// Close out the current unit; later writes go to a new one
    fn rotate(&mut self) -> Result<()>;
}

/// Accumulates batches into save units of exactly `target` samples
///
/// Invariant between calls: `0 <= fill < target`.
pub struct SaveUnitBatcher<S: BatchSink> {
    sink: S,
    target: usize,
    fill: usize,
}

impl<S: BatchSink> SaveUnitBatcher<S> {
    pub fn new(sink: S, target: usize) -> Result<Self> {
        if target == 0 {
            return Err(DaqError::InvalidParameter(
                "save unit target must be at least one sample".into(),
            ));
        }
        Ok(Self {
            sink,
            target,
            fill: 0,
        })
    }

    /// Samples written into the current unit so far
    pub fn fill(&self) -> usize {
        self.fill
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Write one batch, rotating at every unit boundary it crosses
    ///
    /// Returns the number of rotations, `(fill + batch.len()) / target`.
    /// A batch longer than a whole unit crosses several boundaries.
    pub fn push(&mut self, batch: &[f64]) -> Result<usize> {
        let mut rest = batch;
        let mut rotations = 0;

        while self.fill + rest.len() >= self.target {
            let (head, tail) = rest.split_at(self.target - self.fill);
            if !head.is_empty() {
                self.sink.write(head)?;
            }
            self.sink.rotate()?;
            rotations += 1;
            self.fill = 0;
            rest = tail;
        }

        if !rest.is_empty() {
            self.sink.write(rest)?;
            self.fill += rest.len();
        }

        Ok(rotations)
    }
}
