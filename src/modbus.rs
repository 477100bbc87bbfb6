//! Modbus RTU register transport over a serial line
//!
//! Only the two function codes the ProWaveDAQ needs are implemented:
//! `0x04` (read input registers) and `0x06` (write single register).

use crate::config::DeviceSettings;
use crate::error::{DaqError, Result};
use crc::{Crc, CRC_16_MODBUS};
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use tracing::debug;

const FN_READ_INPUT_REGISTERS: u8 = 0x04;
const FN_WRITE_SINGLE_REGISTER: u8 = 0x06;
const EXCEPTION_FLAG: u8 = 0x80;

/// Upper bound on registers per read request imposed by the RTU frame size
pub const MAX_READ_REGISTERS: usize = 125;

/// Register-level access to a connected device
///
/// The acquisition loop is written against this trait so it can run on a
/// real serial link or on a scripted transport in tests.
pub trait RegisterTransport: Send {
    /// Select the device (slave) address used by subsequent requests
    fn set_slave(&mut self, slave: u8) -> Result<()>;

    /// Read `dst.len()` consecutive input registers starting at `address`
    fn read_input_registers(&mut self, address: u16, dst: &mut [u16]) -> Result<()>;

    /// Write one holding register
    fn write_register(&mut self, address: u16, value: u16) -> Result<()>;

    /// Release the underlying handle; later calls fail with `NotConnected`
    fn close(&mut self);
}

/// Byte stream a Modbus RTU client can run on
pub trait SerialLine: Read + Write + Send {
    /// Drop any stale bytes waiting in the receive buffer
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialLine for Box<dyn SerialPort> {
    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// CRC-16/Modbus of a frame body, sent low byte first
pub fn crc16(bytes: &[u8]) -> u16 {
    MODBUS_CRC.checksum(bytes)
}

/// Modbus RTU client
pub struct ModbusRtu<L: SerialLine = Box<dyn SerialPort>> {
    line: Option<L>,
    slave: u8,
}

impl ModbusRtu {
    /// Open the serial port described by `settings`
    ///
    /// The slave address is not taken from `settings`; call
    /// [`RegisterTransport::set_slave`] before issuing requests.
    pub fn open(settings: &DeviceSettings) -> Result<Self> {
        let parity = match settings.parity.to_ascii_uppercase().as_str() {
            "E" => Parity::Even,
            "O" => Parity::Odd,
            _ => Parity::None,
        };
        let data_bits = match settings.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };
        let stop_bits = if settings.stop_bits == 2 {
            StopBits::Two
        } else {
            StopBits::One
        };

        let port = serialport::new(&settings.serial_port, settings.baud_rate)
            .parity(parity)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .timeout(settings.timeout())
            .open()?;

        Ok(Self::new(port))
    }
}

impl<L: SerialLine> ModbusRtu<L> {
    /// Wrap an already open line; the slave address defaults to 1
    pub fn new(line: L) -> Self {
        Self {
            line: Some(line),
            slave: 1,
        }
    }

    fn line(&mut self) -> Result<&mut L> {
        self.line.as_mut().ok_or(DaqError::NotConnected)
    }

    fn send(&mut self, pdu: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(pdu.len() + 3);
        frame.push(self.slave);
        frame.extend_from_slice(pdu);
        frame.extend_from_slice(&crc16(&frame).to_le_bytes());

        let line = self.line()?;
        line.discard_input()?;
        line.write_all(&frame)?;
        line.flush()?;
        Ok(())
    }

    fn read_exact(&mut self, function: u8, buf: &mut [u8]) -> Result<()> {
        self.line()?.read_exact(buf).map_err(|e| match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::UnexpectedEof => {
                DaqError::Timeout { function }
            }
            _ => DaqError::Io(e),
        })
    }

    /// Receive one response frame and return it without the CRC
    ///
    /// `frame_len` maps the third byte of a normal response to the total frame
    /// length excluding the CRC.
    fn receive(&mut self, function: u8, frame_len: impl Fn(u8) -> usize) -> Result<Vec<u8>> {
        let mut frame = vec![0u8; 3];
        self.read_exact(function, &mut frame)?;

        let len = if frame[1] == function | EXCEPTION_FLAG {
            3
        } else {
            frame_len(frame[2])
        };
        frame.resize(len + 2, 0);
        self.read_exact(function, &mut frame[3..])?;

        let received = u16::from_le_bytes([frame[len], frame[len + 1]]);
        frame.truncate(len);
        let expected = crc16(&frame);
        if expected != received {
            return Err(DaqError::CrcMismatch { expected, received });
        }

        if frame[0] != self.slave {
            return Err(DaqError::InvalidResponse(format!(
                "response from slave {} while addressing {}",
                frame[0], self.slave
            )));
        }
        if frame[1] == function | EXCEPTION_FLAG {
            return Err(DaqError::Exception {
                function,
                code: frame[2],
            });
        }
        if frame[1] != function {
            return Err(DaqError::InvalidResponse(format!(
                "function 0x{:02X} in response to 0x{:02X}",
                frame[1], function
            )));
        }

        Ok(frame)
    }
}

impl<L: SerialLine> RegisterTransport for ModbusRtu<L> {
    fn set_slave(&mut self, slave: u8) -> Result<()> {
        if !(1..=247).contains(&slave) {
            return Err(DaqError::InvalidParameter(format!(
                "slave address must be 1-247, got {}",
                slave
            )));
        }
        self.line()?;
        self.slave = slave;
        Ok(())
    }

    fn read_input_registers(&mut self, address: u16, dst: &mut [u16]) -> Result<()> {
        if dst.is_empty() || dst.len() > MAX_READ_REGISTERS {
            return Err(DaqError::InvalidParameter(format!(
                "register count must be 1-{}, got {}",
                MAX_READ_REGISTERS,
                dst.len()
            )));
        }

        let count = dst.len() as u16;
        let [addr_hi, addr_lo] = address.to_be_bytes();
        let [count_hi, count_lo] = count.to_be_bytes();
        self.send(&[FN_READ_INPUT_REGISTERS, addr_hi, addr_lo, count_hi, count_lo])?;

        let frame = self.receive(FN_READ_INPUT_REGISTERS, |byte_count| 3 + byte_count as usize)?;
        let payload = &frame[3..];
        if payload.len() != dst.len() * 2 {
            return Err(DaqError::InvalidResponse(format!(
                "expected {} data bytes, got {}",
                dst.len() * 2,
                payload.len()
            )));
        }

        for (reg, pair) in dst.iter_mut().zip(payload.chunks_exact(2)) {
            *reg = u16::from_be_bytes([pair[0], pair[1]]);
        }
        Ok(())
    }

    fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        let [addr_hi, addr_lo] = address.to_be_bytes();
        let [value_hi, value_lo] = value.to_be_bytes();
        let pdu = [FN_WRITE_SINGLE_REGISTER, addr_hi, addr_lo, value_hi, value_lo];
        self.send(&pdu)?;

        // A successful write is echoed back verbatim
        let frame = self.receive(FN_WRITE_SINGLE_REGISTER, |_| 6)?;
        if frame[1..] != pdu {
            return Err(DaqError::InvalidResponse(
                "write echo does not match request".into(),
            ));
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.line.take().is_some() {
            debug!("serial line closed");
        }
    }
}
