//! ProWaveDAQ recorder
//!
//! Connects to the sensor, asks for a data label, and records the vibration
//! stream into `{output}/{timestamp}_{label}/` as one CSV file per save unit.
//! After each session it reconnects and asks for the next label until `exit`.
//!
//! Usage:
//!   prowave-daq --device-config API/ProWaveDAQ.ini --master-config API/Master.ini --label pump

use chrono::Local;
use clap::Parser;
use prowave_daq::{
    parse_label_input, record_until_stopped, session_dir, validate_label, CsvWriter, DaqError,
    LabelInput, ProWaveDaq, SaveUnitBatcher, Settings, CHANNELS,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "prowave-daq")]
#[command(about = "Record ProWaveDAQ vibration data into time-windowed CSV files", long_about = None)]
struct Args {
    /// Device settings ([ProWaveDAQ] section)
    #[arg(long, default_value = "API/ProWaveDAQ.ini")]
    device_config: PathBuf,

    /// Save unit settings ([SaveUnit] section)
    #[arg(long, default_value = "API/Master.ini")]
    master_config: PathBuf,

    /// Root folder for recording sessions
    #[arg(short, long, default_value = "output/ProWaveDAQ")]
    output: PathBuf,

    /// Data label (prompted for if omitted)
    #[arg(short, long)]
    label: Option<String>,

    /// Longest wait for a new batch before re-checking the stop flag, in ms
    #[arg(long, default_value = "20")]
    poll_ms: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    println!("ProWaveDAQ Recorder");
    println!("===================");

    // `stop` ends the current session, `interrupted` also ends the program
    let stop = Arc::new(AtomicBool::new(false));
    let interrupted = Arc::new(AtomicBool::new(false));
    let recording = Arc::new(AtomicBool::new(false));
    let (s, i) = (stop.clone(), interrupted.clone());
    ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, stopping...");
        i.store(true, Ordering::SeqCst);
        s.store(true, Ordering::SeqCst);
    })?;
    let lines = spawn_stdin_reader(stop.clone(), recording.clone());

    loop {
        let settings = load_settings(&args)?;

        let mut daq = match ProWaveDaq::connect(&settings.device) {
            Ok(d) => d,
            Err(e) => {
                eprintln!("Error: failed to connect to Modbus device: {}", e);
                eprintln!("Run `scan-ports` to list available serial devices.");
                return Err(Box::new(e));
            }
        };
        println!("ProWaveDAQ Sample Rate: {} Hz\n", daq.sample_rate());

        let label = match &args.label {
            Some(label) => label.clone(),
            None => match prompt_label(&lines, &interrupted)? {
                Some(label) => label,
                None => break,
            },
        };
        if let Err(e) = validate_label(&label) {
            if args.label.is_some() {
                return Err(Box::new(e));
            }
            eprintln!("Error: {}", e);
            continue;
        }

        stop.store(false, Ordering::SeqCst);
        recording.store(true, Ordering::SeqCst);
        let result = record_session(&args, &settings, &mut daq, &label, &stop);
        recording.store(false, Ordering::SeqCst);
        result?;

        // A label given on the command line records a single session
        if args.label.is_some() || interrupted.load(Ordering::SeqCst) {
            break;
        }
    }

    println!("Exiting.");
    Ok(())
}

fn load_settings(args: &Args) -> Result<Settings, DaqError> {
    let settings = match Settings::load(&args.device_config, &args.master_config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: cannot load configuration: {}", e);
            eprintln!("Please check:");
            eprintln!("  1. {} has a [ProWaveDAQ] section with serialPort, baudRate, sampleRate, slaveID", args.device_config.display());
            eprintln!("  2. {} has a [SaveUnit] section with second", args.master_config.display());
            return Err(e);
        }
    };

    println!("Serial port: {}", settings.device.serial_port);
    println!("Baud rate: {}", settings.device.baud_rate);
    println!("Slave ID: {}", settings.device.slave_id);
    println!("Save unit: {} seconds", settings.save_unit.second);
    Ok(settings)
}

/// Record one labelled session until `stop` is set
fn record_session(
    args: &Args,
    settings: &Settings,
    daq: &mut ProWaveDaq,
    label: &str,
    stop: &AtomicBool,
) -> Result<(), DaqError> {
    let folder = session_dir(&args.output, Local::now().naive_local(), label);
    let writer = CsvWriter::new(CHANNELS, &folder, label)?;
    let target = settings.save_unit_target(CHANNELS);
    let mut batcher = SaveUnitBatcher::new(writer, target)?;

    println!("Output folder: {}", folder.display());
    println!("Samples per file: {}", target);
    println!("Recording... type 'q' + Enter to stop, Ctrl+C to stop and exit\n");

    daq.start_reading()?;
    let result = record_until_stopped(
        &daq.cell(),
        &mut batcher,
        stop,
        Duration::from_millis(args.poll_ms),
    );
    daq.stop_reading()?;

    match result {
        Ok(summary) => {
            println!("\nRecording complete!");
            println!("Batches: {}", summary.batches);
            println!("Total samples: {}", summary.samples);
            println!("Save units completed: {}", summary.rotations);
            if summary.missed_batches > 0 {
                println!("Batches overwritten before saving: {}", summary.missed_batches);
            }
            println!("Elapsed time: {:.2} seconds", summary.elapsed.as_secs_f64());
            println!("Recorded rate: {:.1} samples/s", summary.sample_rate());
            println!("Last file: {}\n", batcher.sink().current_path().display());
            Ok(())
        }
        Err(e) => {
            eprintln!("\nError during recording: {}", e);
            eprintln!("Data after the failure was not saved.");
            Err(e)
        }
    }
}

/// Ask for a data label; `None` means the operator chose to exit
fn prompt_label(lines: &Receiver<String>, interrupted: &AtomicBool) -> Result<Option<String>, DaqError> {
    println!("============================== Label Creation ============================");
    print!("Please enter the label of the data (type 'exit' to exit): ");
    io::stdout().flush()?;

    loop {
        if interrupted.load(Ordering::SeqCst) {
            return Ok(None);
        }
        match lines.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => match parse_label_input(&line) {
                LabelInput::Exit => return Ok(None),
                LabelInput::Label(label) => return Ok(Some(label)),
                LabelInput::Blank => {}
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return Ok(None),
        }
    }
}

/// Forward stdin lines to the label prompt, or handle `q` while recording
fn spawn_stdin_reader(stop: Arc<AtomicBool>, recording: Arc<AtomicBool>) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if !recording.load(Ordering::SeqCst) {
                if tx.send(line).is_err() {
                    break;
                }
                continue;
            }
            match line.trim() {
                "q" | "Q" => {
                    println!("Saving final data before exit...");
                    stop.store(true, Ordering::SeqCst);
                }
                "" => {}
                other => println!("You entered: {}", other),
            }
        }
    });
    rx
}
