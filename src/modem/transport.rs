//! Line framing over the serial byte stream.
//!
//! Hayes modems in verbose mode delimit every line with CR LF. The
//! transport reads one line at a time: CR terminates a non-empty line, LF
//! is swallowed, and empty lines between CR/LF pairs are discarded. A short
//! read timeout bounds how long the modem worker can sit in a poll, so the
//! worker keeps making forward progress between ticks.
//!
//! The transport is generic over the underlying stream: production wires it
//! to a [`tokio_serial::SerialStream`]; tests and the modem simulator use
//! in-memory duplex pipes.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use super::error::ModemError;

/// Default per-read timeout for unsolicited-event polling.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Framed line I/O over a serial byte stream.
pub struct Transport<T> {
    stream: T,
    read_timeout: Duration,
}

impl<T: AsyncRead + AsyncWrite + Unpin> Transport<T> {
    /// Wrap a byte stream with the given read timeout.
    pub fn new(stream: T, read_timeout: Duration) -> Self {
        Self {
            stream,
            read_timeout,
        }
    }

    /// Write `line` followed by CR LF.
    pub async fn write_line(&mut self, line: &str) -> Result<(), ModemError> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read the next CR-terminated non-empty line.
    ///
    /// Returns `Ok(None)` when the read timeout elapses without a byte or
    /// the stream reaches EOF. A partial line abandoned by a timeout is
    /// discarded; there is no buffering beyond the line being assembled.
    pub async fn read_response(&mut self) -> Result<Option<String>, ModemError> {
        let mut line: Vec<u8> = Vec::with_capacity(64);
        loop {
            let mut byte = [0u8; 1];
            match timeout(self.read_timeout, self.stream.read(&mut byte)).await {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => return Ok(None),
                Ok(Err(e)) => return Err(ModemError::Port(e)),
                Ok(Ok(_)) => match byte[0] {
                    b'\r' => {
                        if !line.is_empty() {
                            return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
                        }
                    }
                    b'\n' => {}
                    b => line.push(b),
                },
            }
        }
    }
}
