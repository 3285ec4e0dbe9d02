//! TCP frame receiver (client side of the fan-out server).
//!
//! Exactly one remote sender per receiver. Incoming bytes run through the
//! [`FrameAssembler`](crate::streaming::assembler::FrameAssembler) for marker
//! resynchronization, so a receiver that connects mid-stream (or after the
//! sender restarts) locks onto the next frame boundary by itself.
//!
//! Connection reset or EOF surfaces as an error; the caller reconnects with
//! a fresh `connect()`.

use crate::container::Frame;
use crate::error::{Error, Result};
use crate::streaming::assembler::FrameAssembler;
use std::collections::VecDeque;
use std::io::Read;
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// Default port of the frame fan-out service.
pub const DEFAULT_TCP_PORT: u16 = 24778;

/// Socket read chunk size.
const READ_CHUNK: usize = 16 * 1024;

/// Read timeout; bounds how long `read()` sits in one `recv`.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Parse a `host@port` address spec. A bare `host` gets the default port.
pub fn parse_address(spec: &str) -> Result<(String, u16)> {
    match spec.rsplit_once('@') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| {
                Error::InvalidConfig(format!("bad port in address spec '{}'", spec))
            })?;
            Ok((host.to_string(), port))
        }
        None => Ok((spec.to_string(), DEFAULT_TCP_PORT)),
    }
}

/// Receiving end of a TCP frame stream.
pub struct FrameReceiver {
    stream: TcpStream,
    assembler: FrameAssembler,
    pending: VecDeque<Frame>,
    read_buf: Vec<u8>,
}

impl FrameReceiver {
    /// Connect to a sender given a `host@port` spec (default port 24778).
    pub fn connect(spec: &str) -> Result<Self> {
        let (host, port) = parse_address(spec)?;
        let stream = TcpStream::connect((host.as_str(), port))?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        log::info!("connected to frame stream at {}@{}", host, port);
        Ok(Self {
            stream,
            assembler: FrameAssembler::new(),
            pending: VecDeque::new(),
            read_buf: vec![0u8; READ_CHUNK],
        })
    }

    /// Read the next complete frame, blocking until one arrives.
    ///
    /// Returns [`Error::Disconnected`] when the sender closes the stream and
    /// an I/O error on reset; both require a fresh `connect()`.
    pub fn read(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(frame);
            }

            let n = match self.stream.read(&mut self.read_buf) {
                Ok(0) => return Err(Error::Disconnected),
                Ok(n) => n,
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue
                }
                Err(e) => return Err(e.into()),
            };
            self.pending.extend(self.assembler.push(&self.read_buf[..n]));
        }
    }

    /// Like [`read`](Self::read) but gives up after `timeout`, returning
    /// `Ok(None)`. Lets a polling caller observe its own shutdown flag.
    pub fn read_timeout(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }
            if std::time::Instant::now() >= deadline {
                return Ok(None);
            }

            let n = match self.stream.read(&mut self.read_buf) {
                Ok(0) => return Err(Error::Disconnected),
                Ok(n) => n,
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue
                }
                Err(e) => return Err(e.into()),
            };
            self.pending.extend(self.assembler.push(&self.read_buf[..n]));
        }
    }

    /// Shut the connection down.
    pub fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(
            parse_address("camera.local@5000").unwrap(),
            ("camera.local".to_string(), 5000)
        );
        assert_eq!(
            parse_address("10.0.0.7").unwrap(),
            ("10.0.0.7".to_string(), DEFAULT_TCP_PORT)
        );
        assert!(parse_address("host@notaport").is_err());
    }
}
