use std::io::{self, Write};
use std::time::Duration;

use crate::Result;

use super::{DeviceKind, Link};

const SERIAL_WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// Byte sink a device pushes its encoded frames into.
///
/// `open` (re)acquires the underlying handle and must be safe to call at any
/// time, including while a previous handle is still held or after a failure.
pub trait Transport: Send {
    fn open(&mut self) -> Result<()>;

    fn write(&mut self, frame: &[u8]) -> Result<()>;
}

/// Creates the transport matching the link of `kind`. Nothing is opened yet.
pub fn transport_for(kind: DeviceKind, path: &str) -> Box<dyn Transport> {
    match kind.link() {
        Link::Serial { baud_rate } => Box::new(SerialTransport::new(path, baud_rate)),
        Link::Spi { speed_hz } => Box::new(SpiTransport::new(path, speed_hz)),
    }
}

/// TTY link driven through `serialport`.
pub struct SerialTransport {
    path: String,
    baud_rate: u32,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialTransport {
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            port: None,
        }
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<()> {
        // Release the old handle first, some USB adapters refuse a second open.
        self.port = None;
        let port = serialport::new(&self.path, self.baud_rate)
            .timeout(SERIAL_WRITE_TIMEOUT)
            .open()?;
        self.port = Some(port);
        Ok(())
    }

    fn write(&mut self, frame: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or_else(|| not_connected(&self.path))?;
        port.write_all(frame)?;
        port.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("path", &self.path)
            .field("baud_rate", &self.baud_rate)
            .field("open", &self.port.is_some())
            .finish()
    }
}

/// SPI link (mode 0, 8 bits per word) through the Linux spidev interface.
pub struct SpiTransport {
    path: String,
    speed_hz: u32,
    #[cfg(target_os = "linux")]
    spi: Option<spidev::Spidev>,
}

impl SpiTransport {
    pub fn new(path: impl Into<String>, speed_hz: u32) -> Self {
        Self {
            path: path.into(),
            speed_hz,
            #[cfg(target_os = "linux")]
            spi: None,
        }
    }
}

#[cfg(target_os = "linux")]
impl Transport for SpiTransport {
    fn open(&mut self) -> Result<()> {
        use spidev::{SpiModeFlags, Spidev, SpidevOptions};

        self.spi = None;
        let mut spi = Spidev::open(&self.path)?;
        let options = SpidevOptions::new()
            .mode(SpiModeFlags::SPI_MODE_0)
            .bits_per_word(8)
            .max_speed_hz(self.speed_hz)
            .build();
        spi.configure(&options)?;
        self.spi = Some(spi);
        Ok(())
    }

    fn write(&mut self, frame: &[u8]) -> Result<()> {
        let spi = self.spi.as_ref().ok_or_else(|| not_connected(&self.path))?;
        let mut transfer = spidev::SpidevTransfer::write(frame);
        spi.transfer(&mut transfer)?;
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
impl Transport for SpiTransport {
    fn open(&mut self) -> Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("SPI device '{}' requires Linux spidev support", self.path),
        )
        .into())
    }

    fn write(&mut self, _frame: &[u8]) -> Result<()> {
        Err(not_connected(&self.path))
    }
}

impl std::fmt::Debug for SpiTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpiTransport")
            .field("path", &self.path)
            .field("speed_hz", &self.speed_hz)
            .finish()
    }
}

fn not_connected(path: &str) -> crate::AtmoError {
    io::Error::new(
        io::ErrorKind::NotConnected,
        format!("device '{path}' is not open"),
    )
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writing_before_open_reports_not_connected() {
        let mut serial = SerialTransport::new("/dev/does-not-exist", 38_400);
        let err = serial.write(&[0xFF]).unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("/dev/does-not-exist"));
    }

    #[test]
    fn opening_a_missing_serial_port_fails_transiently() {
        let mut serial = SerialTransport::new("/dev/atmolight-missing-tty", 57_600);
        let err = serial.open().unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn opening_a_missing_spi_device_fails() {
        let mut spi = SpiTransport::new("/dev/atmolight-missing-spidev", 500_000);
        let err = spi.open().unwrap_err();
        assert!(err.is_transient());
    }
}
