//! Link-level exchange: autobaud, command transmission, ACK/NAK handling and
//! data packet reception.
//!
//! Every wait is bounded by a deadline rather than a retry count. The port
//! is expected to use a short per-read timeout; `TimedOut`, `WouldBlock` and
//! zero-length reads are treated as "nothing yet" until the deadline passes.

use std::io::ErrorKind as IoErrorKind;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::command::CommandFrame;
use crate::protocol::packet::{self, AUTOBAUD};

/// Pause between polls when the port reports no data without blocking.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Timing and retry limits for the link layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    /// Budget for an ACK/NAK after an ordinary command.
    pub ack_timeout: Duration,
    /// Budget for an ACK/NAK after commands that touch flash or large
    /// memory ranges (erase, memory write, CRC32, bank erase).
    pub long_ack_timeout: Duration,
    /// Budget for a data packet.
    pub data_timeout: Duration,
    /// Budget for the autobaud response.
    pub autobaud_timeout: Duration,
    /// Maximum write calls spent on one packet.
    pub write_attempts: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(1),
            long_ack_timeout: Duration::from_secs(10),
            data_timeout: Duration::from_secs(1),
            autobaud_timeout: Duration::from_secs(1),
            write_attempts: 1000,
        }
    }
}

impl LinkConfig {
    /// Set the ordinary ACK budget.
    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the ACK budget for long-running commands.
    #[must_use]
    pub fn with_long_ack_timeout(mut self, timeout: Duration) -> Self {
        self.long_ack_timeout = timeout;
        self
    }

    /// Set the data packet budget.
    #[must_use]
    pub fn with_data_timeout(mut self, timeout: Duration) -> Self {
        self.data_timeout = timeout;
        self
    }

    /// Set the autobaud budget.
    #[must_use]
    pub fn with_autobaud_timeout(mut self, timeout: Duration) -> Self {
        self.autobaud_timeout = timeout;
        self
    }

    /// Set the write attempt ceiling.
    #[must_use]
    pub fn with_write_attempts(mut self, attempts: u32) -> Self {
        self.write_attempts = attempts.max(1);
        self
    }
}

/// One exchange over a borrowed port.
pub struct Link<'a, P: Port> {
    port: &'a mut P,
    config: LinkConfig,
}

impl<'a, P: Port> Link<'a, P> {
    /// Wrap a port.
    pub fn new(port: &'a mut P, config: LinkConfig) -> Self {
        Self { port, config }
    }

    /// Link configuration in use.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Send the autobaud pattern and wait for the bootloader's ACK.
    ///
    /// Silence and a garbled reply both fail with
    /// [`Error::HandshakeFailed`]; only transport errors pass through.
    pub fn autobaud(&mut self) -> Result<()> {
        debug!("Sending autobaud on {}", self.port.name());
        self.write_counted(&AUTOBAUD, "autobaud")?;

        let budget = self.config.autobaud_timeout;
        match self.await_ack_nak(budget, true) {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::HandshakeFailed(
                "Device NAKed autobaud. Check the baud rate and try again".into(),
            )),
            Err(Error::Timeout(_)) => Err(Error::HandshakeFailed(
                "No response from device. Device may not be in bootloader mode. \
                 Reset the device and try again"
                    .into(),
            )),
            Err(e @ (Error::Protocol(_) | Error::Checksum { .. })) => {
                debug!("Autobaud reply rejected: {e}");
                Err(Error::HandshakeFailed(
                    "Unexpected response from device. Device may not be in bootloader mode \
                     or the baud rate is wrong"
                        .into(),
                ))
            },
            Err(e) => Err(e),
        }
    }

    /// Frame and transmit a command with the given wire id.
    pub fn send_command(&mut self, command_id: u8, frame: &CommandFrame) -> Result<()> {
        let bytes = frame.encode(command_id)?;
        trace!("=> {} {}", frame.command(), hex::encode(&bytes));
        self.write_counted(&bytes, frame.command().name())
    }

    /// Wait for an ACK/NAK token. Returns `true` on ACK.
    ///
    /// With `quiet` set a timeout is not logged; the error is still returned.
    pub fn await_ack_nak(&mut self, budget: Duration, quiet: bool) -> Result<bool> {
        let mut token = [0u8; 2];
        let received = self.read_within(&mut token, budget)?;
        if received < token.len() {
            if !quiet {
                debug!("Timed out waiting for ACK/NAK ({received} of 2 bytes)");
            }
            return Err(Error::Timeout(
                "Timed out waiting for ACK/NAK. No response from device".into(),
            ));
        }
        trace!("<= {}", hex::encode(token));
        packet::parse_ack(token)
    }

    /// Wait for an ACK and turn a NAK into a protocol error naming `context`.
    pub fn expect_ack(&mut self, budget: Duration, context: &str) -> Result<()> {
        if self.await_ack_nak(budget, false)? {
            Ok(())
        } else {
            Err(Error::Protocol(format!("{context} NAKed by device")))
        }
    }

    /// Receive a data packet of at most `max_len` payload bytes.
    ///
    /// The packet is ACKed when it is well formed; otherwise it is NAKed and
    /// the read error is returned.
    pub fn receive_data(&mut self, max_len: usize, budget: Duration) -> Result<Vec<u8>> {
        let result = self.read_data_packet(max_len, budget);
        self.conclude(result)
    }

    /// Receive a data packet that must carry exactly `len` payload bytes.
    pub fn receive_exact(&mut self, len: usize, budget: Duration) -> Result<Vec<u8>> {
        let result = self
            .read_data_packet(len, budget)
            .and_then(|payload| {
                if payload.len() == len {
                    Ok(payload)
                } else {
                    Err(Error::Protocol(format!(
                        "Received {} bytes ({len} expected)",
                        payload.len()
                    )))
                }
            });
        self.conclude(result)
    }

    /// Send an ACK (`true`) or NAK (`false`) to the device.
    pub fn send_ack(&mut self, ack: bool) -> Result<()> {
        let token = packet::ack_token(ack);
        trace!("=> {}", hex::encode(token));
        self.write_counted(&token, if ack { "ACK" } else { "NAK" })
    }

    fn conclude(&mut self, result: Result<Vec<u8>>) -> Result<Vec<u8>> {
        match result {
            Ok(payload) => {
                self.send_ack(true)?;
                Ok(payload)
            },
            Err(e) => {
                if let Err(nak_err) = self.send_ack(false) {
                    debug!("Failed to NAK rejected data packet: {nak_err}");
                }
                Err(e)
            },
        }
    }

    fn read_data_packet(&mut self, max_len: usize, budget: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + budget;

        let mut raw_header = [0u8; 2];
        if self.read_until(&mut raw_header, deadline)? < raw_header.len() {
            return Err(Error::Timeout(
                "Timed out waiting for data header from device".into(),
            ));
        }
        let header = packet::decode_response_header(raw_header)?;

        if header.payload_len > max_len {
            self.port.clear_buffers()?;
            return Err(Error::Protocol(format!(
                "Device sent more data than expected: max {max_len}, announced {}",
                header.payload_len
            )));
        }

        let mut payload = vec![0u8; header.payload_len];
        let received = self.read_until(&mut payload, deadline)?;
        if received < payload.len() {
            return Err(Error::Timeout(format!(
                "Timed out waiting for data from device ({received} of {} bytes)",
                payload.len()
            )));
        }
        trace!("<= {} {}", hex::encode(raw_header), hex::encode(&payload));

        packet::verify_checksum(&payload, header.checksum)?;
        Ok(payload)
    }

    fn read_within(&mut self, buf: &mut [u8], budget: Duration) -> Result<usize> {
        self.read_until(buf, Instant::now() + budget)
    }

    fn read_until(&mut self, buf: &mut [u8], deadline: Instant) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => thread::sleep(POLL_INTERVAL),
                Ok(n) => {
                    filled += n;
                    continue;
                },
                Err(e) if e.kind() == IoErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
                Err(e)
                    if matches!(e.kind(), IoErrorKind::TimedOut | IoErrorKind::Interrupted) => {},
                Err(e) => return Err(Error::Io(e)),
            }
            if Instant::now() >= deadline {
                break;
            }
        }
        Ok(filled)
    }

    fn write_counted(&mut self, bytes: &[u8], what: &str) -> Result<()> {
        let mut written = 0;
        let mut attempts = 0;
        while written < bytes.len() && attempts < self.config.write_attempts {
            attempts += 1;
            match self.port.write(&bytes[written..]) {
                Ok(n) => written += n,
                Err(e)
                    if matches!(
                        e.kind(),
                        IoErrorKind::TimedOut | IoErrorKind::WouldBlock | IoErrorKind::Interrupted
                    ) => {},
                Err(e) => return Err(Error::Io(e)),
            }
        }

        if written < bytes.len() {
            return Err(Error::Port(format!(
                "Writing to device failed ({what}): {written} of {} bytes after {attempts} attempts",
                bytes.len()
            )));
        }
        self.port.flush()?;
        Ok(())
    }
}
