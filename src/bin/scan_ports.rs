//! List USB serial devices a ProWaveDAQ may be attached to
//!
//! Usage:
//!   scan-ports --dir /dev

use clap::Parser;
use prowave_daq::scan_devices;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "scan-ports")]
#[command(about = "List /dev/ttyUSB* devices for Modbus connections", long_about = None)]
struct Args {
    /// Directory to scan
    #[arg(short, long, default_value = "/dev")]
    dir: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let devices = match scan_devices(&args.dir) {
        Ok(devices) => devices,
        Err(e) => {
            eprintln!("Error: cannot scan {}: {}", args.dir.display(), e);
            return Err(Box::new(e));
        }
    };

    if devices.is_empty() {
        println!("No Modbus devices found!");
        return Ok(());
    }

    println!("Available Modbus devices:");
    for (i, device) in devices.iter().enumerate() {
        println!("({}) {}", i + 1, device.display());
    }

    Ok(())
}
