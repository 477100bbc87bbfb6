//! ProWaveDAQ vibration sensor driver and acquisition loop

use crate::buffer::SampleCell;
use crate::config::DeviceSettings;
use crate::error::{DaqError, Result};
use crate::modbus::{ModbusRtu, RegisterTransport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

// Register map
const REG_SAMPLE_RATE: u16 = 0x01; // Holding register
const REG_FIFO: u16 = 0x02; // Input: [pending count, samples...]
const REG_CHIP_ID: u16 = 0x80; // Input, 3 registers

/// Interleaved channels per frame (X, Y, Z)
pub const CHANNELS: usize = 3;

/// Raw counts per physical unit
pub const SCALE: f64 = 8192.0;

/// Largest FIFO read in one request, in samples
pub const MAX_WINDOW: usize = 41 * CHANNELS;

/// Pending counts at or below this are not worth a read
pub const DEBOUNCE_THRESHOLD: usize = 6;

const DEBOUNCE_DELAY: Duration = Duration::from_millis(1);

/// Convert a raw register to physical units
///
/// ```
/// use prowave_daq::prowave::convert_raw;
///
/// assert_eq!(convert_raw(8192), 1.0);
/// assert_eq!(convert_raw(0xE000), -1.0); // -8192 as two's complement
/// ```
pub fn convert_raw(raw: u16) -> f64 {
    raw as i16 as f64 / SCALE
}

/// Number of samples to read for a given pending count
///
/// Clamped to [`MAX_WINDOW`] and rounded down to whole frames, so every
/// batch is channel-aligned. Leftover samples stay in the device FIFO.
fn read_len(pending: usize) -> usize {
    let clamped = pending.min(MAX_WINDOW);
    clamped - clamped % CHANNELS
}

/// Outcome of one acquisition cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// A batch of this many samples was published
    Published(usize),
    /// FIFO held too little data; only the count was re-polled
    Debounced,
    /// The transport failed; nothing was published
    Failed,
}

/// Producer side of the pipeline
///
/// Owns the transport and the raw register window. Each cycle reads the
/// device FIFO and publishes the converted batch into the shared cell.
pub struct AcquisitionLoop<T: RegisterTransport> {
    transport: T,
    cell: Arc<SampleCell>,
    window: [u16; MAX_WINDOW + 1],
    pending: usize,
    failures: u64,
}

impl<T: RegisterTransport> AcquisitionLoop<T> {
    pub fn new(transport: T, cell: Arc<SampleCell>) -> Self {
        Self {
            transport,
            cell,
            window: [0; MAX_WINDOW + 1],
            pending: 0,
            failures: 0,
        }
    }

    /// Pending sample count the next cycle will act on
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Number of failed transport calls so far
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Read only the count register to establish the pending count
    pub fn prime(&mut self) -> Result<usize> {
        self.transport
            .read_input_registers(REG_FIFO, &mut self.window[..1])?;
        self.pending = self.window[0] as usize;
        Ok(self.pending)
    }

    /// Run one acquisition cycle
    pub fn cycle(&mut self) -> Cycle {
        if self.pending <= DEBOUNCE_THRESHOLD {
            thread::sleep(DEBOUNCE_DELAY);
            if let Err(e) = self.prime() {
                self.failures += 1;
                warn!(error = %e, "FIFO count poll failed");
                return Cycle::Failed;
            }
            return Cycle::Debounced;
        }

        let len = read_len(self.pending);
        if let Err(e) = self
            .transport
            .read_input_registers(REG_FIFO, &mut self.window[..=len])
        {
            self.failures += 1;
            warn!(error = %e, requested = len, "FIFO read failed, skipping cycle");
            // Count is unknown now; make the next cycle re-poll it
            self.pending = 0;
            return Cycle::Failed;
        }

        let batch: Vec<f64> = self.window[1..=len].iter().map(|&raw| convert_raw(raw)).collect();
        self.cell.publish(batch);

        // The response header is the device's count for the next read
        self.pending = self.window[0] as usize;
        Cycle::Published(len)
    }

    /// Cycle until `stop` is set, then hand the transport back
    pub fn run(mut self, stop: &AtomicBool) -> T {
        match self.prime() {
            Ok(pending) => info!(pending, "reading loop started"),
            Err(e) => {
                self.failures += 1;
                warn!(error = %e, "initial FIFO count read failed");
            }
        }

        while !stop.load(Ordering::Acquire) {
            self.cycle();
        }

        debug!(failures = self.failures, "reading loop stopped");
        self.transport
    }
}

/// Acquisition loop running on its own thread
pub struct AcquisitionWorker<T: RegisterTransport + 'static> {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<T>>,
}

impl<T: RegisterTransport + 'static> AcquisitionWorker<T> {
    pub fn spawn(acquisition: AcquisitionLoop<T>) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("prowave-acquisition".into())
            .spawn(move || acquisition.run(&flag))?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Signal the loop to stop and wait for it; returns the transport
    pub fn stop(mut self) -> Result<T> {
        self.stop.store(true, Ordering::Release);
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| DaqError::WorkerPanicked),
            None => Err(DaqError::WorkerPanicked),
        }
    }
}

impl<T: RegisterTransport + 'static> Drop for AcquisitionWorker<T> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if let Ok(mut transport) = thread.join() {
                transport.close();
            }
        }
    }
}

enum Link<T: RegisterTransport + 'static> {
    Idle(T),
    Reading(AcquisitionWorker<T>),
    Closed,
}

/// ProWaveDAQ device
///
/// Wraps the transport through its lifecycle: configured, reading on a
/// background thread, and closed. The transport is only closed after the
/// reading thread has been joined.
pub struct ProWaveDaq<T: RegisterTransport + 'static = ModbusRtu> {
    link: Link<T>,
    cell: Arc<SampleCell>,
    sample_rate: u32,
}

impl ProWaveDaq {
    /// Open the serial port and initialize the device
    pub fn connect(settings: &DeviceSettings) -> Result<Self> {
        info!(
            port = %settings.serial_port,
            baud = settings.baud_rate,
            "connecting to Modbus device"
        );
        let transport = ModbusRtu::open(settings)?;
        Self::with_transport(transport, settings)
    }
}

impl<T: RegisterTransport + 'static> ProWaveDaq<T> {
    /// Initialize the device over an already connected transport
    ///
    /// Setting the slave address is fatal on failure. The chip id read and the
    /// sample rate write are logged and tolerated.
    pub fn with_transport(mut transport: T, settings: &DeviceSettings) -> Result<Self> {
        if let Err(e) = transport.set_slave(settings.slave_id) {
            transport.close();
            return Err(e);
        }
        info!(slave = settings.slave_id, "Modbus slave id set");

        let mut chip_id = [0u16; 3];
        match transport.read_input_registers(REG_CHIP_ID, &mut chip_id) {
            Ok(()) => info!(
                "chip id: {:x}, {:x}, {:x}",
                chip_id[0], chip_id[1], chip_id[2]
            ),
            Err(e) => warn!(error = %e, "failed to read chip id"),
        }

        match u16::try_from(settings.sample_rate) {
            Ok(rate) => match transport.write_register(REG_SAMPLE_RATE, rate) {
                Ok(()) => info!(rate, "sample rate set"),
                Err(e) => warn!(error = %e, "failed to set sample rate"),
            },
            Err(_) => warn!(rate = settings.sample_rate, "sample rate does not fit a register"),
        }

        Ok(Self {
            link: Link::Idle(transport),
            cell: Arc::new(SampleCell::new()),
            sample_rate: settings.sample_rate,
        })
    }

    /// Configured sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Shared cell the acquisition loop publishes into
    pub fn cell(&self) -> Arc<SampleCell> {
        Arc::clone(&self.cell)
    }

    /// Number of batches read so far
    pub fn counter(&self) -> u64 {
        self.cell.counter()
    }

    /// Copy of the most recent batch
    pub fn latest(&self) -> Vec<f64> {
        self.cell.snapshot().samples
    }

    pub fn is_reading(&self) -> bool {
        matches!(self.link, Link::Reading(_))
    }

    /// Start the acquisition loop on a background thread
    pub fn start_reading(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.link, Link::Closed) {
            Link::Idle(transport) => {
                let acquisition = AcquisitionLoop::new(transport, Arc::clone(&self.cell));
                self.link = Link::Reading(AcquisitionWorker::spawn(acquisition)?);
                Ok(())
            }
            reading @ Link::Reading(_) => {
                self.link = reading;
                Err(DaqError::AlreadyReading)
            }
            Link::Closed => Err(DaqError::NotConnected),
        }
    }

    /// Stop reading, join the worker, then close the transport
    pub fn stop_reading(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.link, Link::Closed) {
            Link::Reading(worker) => {
                let mut transport = worker.stop()?;
                transport.close();
                info!("reading stopped, device closed");
            }
            Link::Idle(mut transport) => transport.close(),
            Link::Closed => {}
        }
        Ok(())
    }
}

impl<T: RegisterTransport + 'static> Drop for ProWaveDaq<T> {
    fn drop(&mut self) {
        let _ = self.stop_reading();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        SetSlave(u8),
        Read { address: u16, count: usize },
        Write { address: u16, value: u16 },
        Close,
    }

    #[derive(Default)]
    struct Log {
        calls: Vec<Call>,
        after_close: usize,
    }

    /// Simulated device: each FIFO read reports the next scripted pending
    /// count in its header and fills data registers with a running sequence.
    struct ScriptedDevice {
        pending: VecDeque<u16>,
        failures: VecDeque<bool>,
        next_value: u16,
        closed: bool,
        log: Arc<Mutex<Log>>,
    }

    impl ScriptedDevice {
        fn new(pending: &[u16]) -> (Self, Arc<Mutex<Log>>) {
            let log = Arc::new(Mutex::new(Log::default()));
            let device = Self {
                pending: pending.iter().copied().collect(),
                failures: VecDeque::new(),
                next_value: 1,
                closed: false,
                log: Arc::clone(&log),
            };
            (device, log)
        }

        fn fail_reads(mut self, pattern: &[bool]) -> Self {
            self.failures = pattern.iter().copied().collect();
            self
        }

        fn record(&mut self, call: Call) {
            let mut log = self.log.lock().unwrap();
            if self.closed {
                log.after_close += 1;
            }
            log.calls.push(call);
        }
    }

    impl RegisterTransport for ScriptedDevice {
        fn set_slave(&mut self, slave: u8) -> Result<()> {
            self.record(Call::SetSlave(slave));
            Ok(())
        }

        fn read_input_registers(&mut self, address: u16, dst: &mut [u16]) -> Result<()> {
            self.record(Call::Read {
                address,
                count: dst.len(),
            });
            if address != REG_FIFO {
                dst.fill(0xAB);
                return Ok(());
            }
            if self.failures.pop_front().unwrap_or(false) {
                return Err(DaqError::Timeout { function: 0x04 });
            }
            dst[0] = self.pending.pop_front().unwrap_or(0);
            for reg in dst[1..].iter_mut() {
                *reg = self.next_value;
                self.next_value = self.next_value.wrapping_add(1);
            }
            Ok(())
        }

        fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
            self.record(Call::Write { address, value });
            Ok(())
        }

        fn close(&mut self) {
            self.record(Call::Close);
            self.closed = true;
        }
    }

    fn settings() -> DeviceSettings {
        DeviceSettings {
            serial_port: "/dev/null".into(),
            baud_rate: 3_000_000,
            sample_rate: 7812,
            slave_id: 1,
            parity: "N".into(),
            data_bits: 8,
            stop_bits: 1,
            timeout_ms: 500,
        }
    }

    #[test]
    fn test_convert_raw() {
        assert_eq!(convert_raw(8192), 1.0);
        assert_eq!(convert_raw((-8192i16) as u16), -1.0);
        assert_eq!(convert_raw(0), 0.0);
        assert_eq!(convert_raw(4096), 0.5);
        assert_eq!(convert_raw(0x8000), -4.0);
    }

    #[test]
    fn test_read_len_clamps_and_aligns() {
        assert_eq!(read_len(9), 9);
        assert_eq!(read_len(10), 9);
        assert_eq!(read_len(MAX_WINDOW), MAX_WINDOW);
        assert_eq!(read_len(500), MAX_WINDOW);
    }

    #[test]
    fn test_cycle_publishes_pending_samples() {
        // prime -> 9 pending; read of 9 reports 12 pending next
        let (device, log) = ScriptedDevice::new(&[9, 12]);
        let cell = Arc::new(SampleCell::new());
        let mut acq = AcquisitionLoop::new(device, Arc::clone(&cell));

        assert_eq!(acq.prime().unwrap(), 9);
        assert_eq!(acq.cycle(), Cycle::Published(9));
        assert_eq!(acq.pending(), 12);

        let snap = cell.snapshot();
        assert_eq!(snap.counter, 1);
        let expected: Vec<f64> = (1..=9u16).map(convert_raw).collect();
        assert_eq!(snap.samples, expected);

        let calls = log.lock().unwrap().calls.clone();
        assert_eq!(
            calls,
            vec![
                Call::Read { address: REG_FIFO, count: 1 },
                Call::Read { address: REG_FIFO, count: 10 },
            ]
        );
    }

    #[test]
    fn test_large_fifo_is_clamped_to_window() {
        let (device, log) = ScriptedDevice::new(&[1000, 1000]);
        let cell = Arc::new(SampleCell::new());
        let mut acq = AcquisitionLoop::new(device, Arc::clone(&cell));

        acq.prime().unwrap();
        assert_eq!(acq.cycle(), Cycle::Published(MAX_WINDOW));
        assert_eq!(cell.snapshot().samples.len(), MAX_WINDOW);

        let last = log.lock().unwrap().calls.last().cloned();
        assert_eq!(
            last,
            Some(Call::Read { address: REG_FIFO, count: MAX_WINDOW + 1 })
        );
    }

    #[test]
    fn test_debounce_does_not_publish() {
        let (device, log) = ScriptedDevice::new(&[3, 6, 0, 5, 9]);
        let cell = Arc::new(SampleCell::new());
        let mut acq = AcquisitionLoop::new(device, Arc::clone(&cell));

        acq.prime().unwrap();
        for _ in 0..3 {
            assert_eq!(acq.cycle(), Cycle::Debounced);
            assert_eq!(cell.counter(), 0);
        }
        // The fourth poll reports 9 pending
        assert_eq!(acq.cycle(), Cycle::Debounced);
        assert_eq!(acq.pending(), 9);
        assert_eq!(acq.cycle(), Cycle::Published(9));
        assert_eq!(cell.counter(), 1);

        // Debounce cycles only ever touch the count register
        let calls = log.lock().unwrap().calls.clone();
        assert!(calls[..5]
            .iter()
            .all(|c| *c == Call::Read { address: REG_FIFO, count: 1 }));
    }

    #[test]
    fn test_failed_read_skips_cycle_and_recovers() {
        let (device, _log) = ScriptedDevice::new(&[12, 12, 9]);
        // prime ok, first FIFO read fails, later reads ok
        let device = device.fail_reads(&[false, true]);
        let cell = Arc::new(SampleCell::new());
        let mut acq = AcquisitionLoop::new(device, Arc::clone(&cell));

        acq.prime().unwrap();
        assert_eq!(acq.cycle(), Cycle::Failed);
        assert_eq!(cell.counter(), 0);
        assert_eq!(acq.failures(), 1);

        // Pending was reset, so the loop re-polls the count
        assert_eq!(acq.cycle(), Cycle::Debounced);
        assert_eq!(acq.pending(), 12);
        assert_eq!(acq.cycle(), Cycle::Published(12));
        assert_eq!(cell.counter(), 1);
    }

    #[test]
    fn test_init_sequence() {
        let (device, log) = ScriptedDevice::new(&[]);
        let daq = ProWaveDaq::with_transport(device, &settings()).unwrap();
        assert_eq!(daq.sample_rate(), 7812);
        assert!(!daq.is_reading());

        let calls = log.lock().unwrap().calls.clone();
        assert_eq!(
            calls,
            vec![
                Call::SetSlave(1),
                Call::Read { address: REG_CHIP_ID, count: 3 },
                Call::Write { address: REG_SAMPLE_RATE, value: 7812 },
            ]
        );
    }

    #[test]
    fn test_stop_joins_then_closes() {
        // Plenty of data so the worker keeps publishing
        let (device, log) = ScriptedDevice::new(&[60; 100_000]);
        let mut daq = ProWaveDaq::with_transport(device, &settings()).unwrap();

        daq.start_reading().unwrap();
        assert!(daq.is_reading());
        assert!(matches!(daq.start_reading(), Err(DaqError::AlreadyReading)));

        let cell = daq.cell();
        let first = cell.wait_newer(0, Duration::from_secs(5));
        assert!(first.is_some());

        daq.stop_reading().unwrap();
        assert!(!daq.is_reading());

        let log = log.lock().unwrap();
        assert_eq!(log.calls.last(), Some(&Call::Close));
        assert_eq!(log.calls.iter().filter(|c| **c == Call::Close).count(), 1);
        assert_eq!(log.after_close, 0);

        // Nothing is published once the worker is gone
        let counter = cell.counter();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(cell.counter(), counter);
    }

    #[test]
    fn test_restart_after_stop_is_rejected() {
        let (device, _log) = ScriptedDevice::new(&[]);
        let mut daq = ProWaveDaq::with_transport(device, &settings()).unwrap();
        daq.stop_reading().unwrap();
        assert!(matches!(daq.start_reading(), Err(DaqError::NotConnected)));
    }

    #[test]
    fn test_drop_closes_transport() {
        let (device, log) = ScriptedDevice::new(&[]);
        let daq = ProWaveDaq::with_transport(device, &settings()).unwrap();
        drop(daq);
        assert_eq!(log.lock().unwrap().calls.last(), Some(&Call::Close));
    }
}
