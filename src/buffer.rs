//! Latest-batch hand-off between the acquisition worker and the recorder
//!
//! The cell keeps exactly one batch. Publishing overwrites whatever is there,
//! so a reader that falls behind skips batches; the counter lets it notice how
//! many it skipped.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A copied-out batch together with the read counter it was published under
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub counter: u64,
    pub samples: Vec<f64>,
}

#[derive(Default)]
struct Slot {
    counter: u64,
    samples: Vec<f64>,
}

/// Single-slot sample cell with overwrite-on-publish semantics
#[derive(Default)]
pub struct SampleCell {
    slot: Mutex<Slot>,
    fresh: Condvar,
}

impl SampleCell {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // Slot is plain data, so a poisoned lock is still usable
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the stored batch and return the new read counter
    pub fn publish(&self, samples: Vec<f64>) -> u64 {
        let counter = {
            let mut slot = self.lock();
            slot.samples = samples;
            slot.counter += 1;
            slot.counter
        };
        self.fresh.notify_all();
        counter
    }

    /// Copy out the stored batch
    pub fn snapshot(&self) -> Snapshot {
        let slot = self.lock();
        Snapshot {
            counter: slot.counter,
            samples: slot.samples.clone(),
        }
    }

    /// Number of batches published so far
    pub fn counter(&self) -> u64 {
        self.lock().counter
    }

    /// Wait up to `timeout` for a batch newer than `seen`
    ///
    /// Returns `None` if nothing newer was published in time.
    pub fn wait_newer(&self, seen: u64, timeout: Duration) -> Option<Snapshot> {
        let slot = self.lock();
        let (slot, _) = self
            .fresh
            .wait_timeout_while(slot, timeout, |slot| slot.counter <= seen)
            .unwrap_or_else(PoisonError::into_inner);

        (slot.counter > seen).then(|| Snapshot {
            counter: slot.counter,
            samples: slot.samples.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_publish_overwrites_and_counts() {
        let cell = SampleCell::new();
        assert_eq!(cell.counter(), 0);
        assert!(cell.snapshot().samples.is_empty());

        assert_eq!(cell.publish(vec![1.0, 2.0, 3.0]), 1);
        assert_eq!(cell.publish(vec![4.0, 5.0, 6.0]), 2);

        // Only the latest batch survives
        let snap = cell.snapshot();
        assert_eq!(snap.counter, 2);
        assert_eq!(snap.samples, vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let cell = SampleCell::new();
        cell.publish(vec![0.5; 3]);
        let mut snap = cell.snapshot();
        snap.samples.clear();
        assert_eq!(cell.snapshot().samples.len(), 3);
    }

    #[test]
    fn test_wait_newer_times_out() {
        let cell = SampleCell::new();
        cell.publish(vec![1.0]);
        assert!(cell.wait_newer(1, Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_wait_newer_returns_immediately_when_behind() {
        let cell = SampleCell::new();
        cell.publish(vec![1.0]);
        cell.publish(vec![2.0]);
        let snap = cell.wait_newer(0, Duration::from_millis(0)).unwrap();
        assert_eq!(snap.counter, 2);
        assert_eq!(snap.samples, vec![2.0]);
    }

    #[test]
    fn test_wait_newer_wakes_on_publish() {
        let cell = Arc::new(SampleCell::new());
        let producer = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                cell.publish(vec![7.0, 8.0, 9.0]);
            })
        };

        let snap = cell.wait_newer(0, Duration::from_secs(5)).unwrap();
        assert_eq!(snap.counter, 1);
        assert_eq!(snap.samples, vec![7.0, 8.0, 9.0]);
        producer.join().unwrap();
    }
}
