//! Relay actuator over a serial line
//!
//! The relay board speaks a 4-byte command protocol at 8N1:
//! `A0 01 01 A2` switches the contact on, `A0 01 00 A1` switches it off.
//! A pulse is on, wait, off. Failures are logged and reported as `false`,
//! never raised, so a missing relay cannot stop inspection.

use std::io::{self, Write};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::constants::relay;

/// Byte sink the relay commands are written to
#[cfg_attr(test, mockall::automock)]
pub trait SerialLink: Send {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Release the underlying port
    fn close(&mut self);
}

/// Something that can be pulsed when a defect is found
#[cfg_attr(test, mockall::automock)]
pub trait Actuator: Send {
    /// Energise for `duration`; returns false if the pulse could not be delivered
    fn pulse(&mut self, duration: Duration) -> bool;

    fn is_connected(&self) -> bool;

    /// Safe to call repeatedly
    fn disconnect(&mut self);
}

/// Real serial port opened through `serialport`
pub struct PortLink {
    port: Box<dyn serialport::SerialPort>,
}

impl PortLink {
    pub fn open(path: &str, baudrate: u32) -> fl_error::Result<Self> {
        let port = serialport::new(path, baudrate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(relay::WRITE_TIMEOUT_MS))
            .open()
            .map_err(|e| fl_error::FlexlineError::Serial {
                port: path.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { port })
    }
}

impl SerialLink for PortLink {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.port.write_all(frame)?;
        self.port.flush()
    }

    fn close(&mut self) {
        // serialport closes on drop; clear buffers so nothing half-written lingers
        let _ = self.port.clear(serialport::ClearBuffer::All);
    }
}

/// Serial relay driver
pub struct RelayController {
    port: String,
    baudrate: u32,
    link: Option<Box<dyn SerialLink>>,
}

impl RelayController {
    pub fn new(port: impl Into<String>, baudrate: u32) -> Self {
        let port = port.into();
        info!(port = %port, baudrate, "Relay controller initialized");
        Self {
            port,
            baudrate,
            link: None,
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn baudrate(&self) -> u32 {
        self.baudrate
    }

    /// Open `port` at `baudrate`, replacing any existing connection
    pub fn connect(&mut self, port: &str, baudrate: u32) -> bool {
        self.disconnect();
        self.port = port.to_string();
        self.baudrate = baudrate;

        match PortLink::open(port, baudrate) {
            Ok(link) => {
                self.link = Some(Box::new(link));
                info!(port, "Connected to relay");
                true
            }
            Err(e) => {
                error!("Failed to connect to relay: {}", e);
                false
            }
        }
    }

    /// Use an already-open link, e.g. a recording link in simulation
    pub fn attach(&mut self, link: Box<dyn SerialLink>) {
        self.disconnect();
        self.link = Some(link);
    }

    fn send(&mut self, frame: &[u8], what: &str) -> bool {
        let Some(link) = self.link.as_mut() else {
            warn!("Not connected to relay");
            return false;
        };

        match link.write_frame(frame) {
            Ok(()) => {
                debug!("Relay turned {}", what);
                true
            }
            Err(e) => {
                error!("Failed to turn {}: {}", what, e);
                false
            }
        }
    }

    pub fn turn_on(&mut self) -> bool {
        self.send(&relay::ON_FRAME, "ON")
    }

    pub fn turn_off(&mut self) -> bool {
        self.send(&relay::OFF_FRAME, "OFF")
    }
}

impl Actuator for RelayController {
    fn pulse(&mut self, duration: Duration) -> bool {
        if !self.turn_on() {
            error!("Failed to trigger relay");
            return false;
        }
        thread::sleep(duration);
        let off = self.turn_off();
        info!("Relay triggered for {:.2} seconds", duration.as_secs_f64());
        off
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    fn disconnect(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
            info!("Disconnected from relay");
        }
    }
}

impl Drop for RelayController {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;

    #[test]
    fn test_pulse_writes_on_then_off() {
        let mut link = MockSerialLink::new();
        let mut seq = Sequence::new();
        link.expect_write_frame()
            .withf(|f| f == &relay::ON_FRAME[..])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        link.expect_write_frame()
            .withf(|f| f == &relay::OFF_FRAME[..])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        link.expect_close().times(1).return_const(());

        let mut relay = RelayController::new("sim", 9600);
        relay.attach(Box::new(link));
        assert!(relay.pulse(Duration::from_millis(1)));
        relay.disconnect();
    }

    #[test]
    fn test_pulse_without_link_fails_quietly() {
        let mut relay = RelayController::new("/dev/null-relay", 9600);
        assert!(!relay.is_connected());
        assert!(!relay.pulse(Duration::ZERO));
    }

    #[test]
    fn test_write_error_skips_off_frame() {
        let mut link = MockSerialLink::new();
        link.expect_write_frame()
            .times(1)
            .returning(|_| Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")));
        link.expect_close().return_const(());

        let mut relay = RelayController::new("sim", 9600);
        relay.attach(Box::new(link));
        assert!(!relay.pulse(Duration::ZERO));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut link = MockSerialLink::new();
        link.expect_close().times(1).return_const(());

        let mut relay = RelayController::new("sim", 9600);
        relay.attach(Box::new(link));
        relay.disconnect();
        relay.disconnect();
        assert!(!relay.is_connected());
    }

    #[test]
    fn test_connect_to_missing_port_returns_false() {
        let mut relay = RelayController::new("unused", 9600);
        assert!(!relay.connect("/dev/flexline-no-such-port", 9600));
        assert!(!relay.is_connected());
    }
}
