use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use tokio_serial::SerialPort;

/// Line-oriented view of a serial device. Lines are LF-terminated on the wire
/// and returned without the terminator.
pub trait LinePort: Send {
    fn write_line(&mut self, line: &str) -> io::Result<()>;
    /// Blocks for at most the port timeout. A timeout is `ErrorKind::TimedOut`.
    fn read_line(&mut self) -> io::Result<String>;
    /// Discard anything buffered but not yet read.
    fn clear_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Source of ports; the real implementation enumerates the OS serial devices.
pub trait PortOpener: Send {
    fn list(&self) -> io::Result<Vec<String>>;
    fn open(&self, name: &str, baud: u32, timeout: Duration) -> io::Result<Box<dyn LinePort>>;
}

pub struct SystemPorts;

impl PortOpener for SystemPorts {
    fn list(&self) -> io::Result<Vec<String>> {
        let ports = tokio_serial::available_ports().map_err(io::Error::from)?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    fn open(&self, name: &str, baud: u32, timeout: Duration) -> io::Result<Box<dyn LinePort>> {
        let port = tokio_serial::new(name, baud).timeout(timeout).open().map_err(io::Error::from)?;
        Ok(Box::new(SerialLinePort::new(port, timeout)))
    }
}

/// Longest line accepted before the buffer is thrown away.
pub const MAX_LINE: usize = 256;

/// Byte stream under a [`SerialLinePort`]. Each `read` returns within the
/// device's own timeout.
pub trait RawPort: Read + Write + Send {
    fn discard_input(&mut self) -> io::Result<()>;
}

impl RawPort for Box<dyn SerialPort> {
    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(tokio_serial::ClearBuffer::Input).map_err(io::Error::from)
    }
}

pub struct SerialLinePort<P = Box<dyn SerialPort>> {
    port: P,
    timeout: Duration,
    pending: Vec<u8>,
}

impl<P: RawPort> SerialLinePort<P> {
    pub fn new(port: P, timeout: Duration) -> Self {
        Self { port, timeout, pending: Vec::with_capacity(64) }
    }

    fn take_line(&mut self) -> Option<String> {
        let nl = self.pending.iter().position(|b| *b == b'\n')?;
        let rest = self.pending.split_off(nl + 1);
        let line = std::mem::replace(&mut self.pending, rest);
        let text = String::from_utf8_lossy(&line);
        Some(text.trim_end_matches(['\r', '\n']).to_string())
    }
}

impl<P: RawPort> LinePort for SerialLinePort<P> {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.port.write_all(&buf)?;
        self.port.flush()
    }

    /// Bytes arriving without a terminator still end the call once the
    /// timeout has passed or [`MAX_LINE`] bytes have piled up.
    fn read_line(&mut self) -> io::Result<String> {
        let deadline = Instant::now() + self.timeout;
        let mut chunk = [0u8; 64];
        loop {
            if let Some(line) = self.take_line() {
                return Ok(line);
            }
            if self.pending.len() > MAX_LINE {
                self.pending.clear();
                return Err(io::Error::new(io::ErrorKind::InvalidData, format!("no line end within {MAX_LINE} bytes")));
            }
            if Instant::now() >= deadline {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no complete line before timeout"));
            }
            match self.port.read(&mut chunk) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "serial port closed")),
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) => return Err(e),
            }
        }
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.port.discard_input()
    }
}

pub fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}
