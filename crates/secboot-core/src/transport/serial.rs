//! Serial port transport backed by the `serialport` crate.

use std::io::Read;
use std::time::{Duration, Instant};

use tracing::debug;

use super::traits::{SerialChannel, TransportError};

/// UART link to the device.
pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    /// Open `path` at `baud`, 8N1.
    pub fn open(path: &str, baud: u32) -> Result<Self, TransportError> {
        let port = serialport::new(path, baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| TransportError::OpenFailed(format!("{path}: {e}")))?;
        debug!(path, baud, "opened serial port");
        Ok(Self { port })
    }
}

impl SerialChannel for SerialTransport {
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        std::io::Write::write_all(&mut self.port, data)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        self.port
            .flush()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    fn read(&mut self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; max_len];
        let mut filled = 0usize;

        // The port wakes every 100ms; keep accumulating until the
        // caller's budget runs out or the buffer is full.
        while filled < max_len {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => return Err(TransportError::Disconnected),
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    if Instant::now() >= deadline {
                        break;
                    }
                }
                Err(e) => return Err(TransportError::ReadFailed(e.to_string())),
            }
        }

        if filled == 0 {
            return Err(TransportError::Timeout { timeout_ms: timeout.as_millis() as u64 });
        }
        buf.truncate(filled);
        Ok(buf)
    }
}
