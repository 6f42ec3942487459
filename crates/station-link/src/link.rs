use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use station_proto::{Frame, StationError};

use crate::autodetect::{discover, DiscoveryResult, HandshakeConfig};
use crate::port::{is_timeout, LinePort, PortOpener};
use crate::state::{LinkState, LinkStatus};
use crate::SerialConfig;

/// Owns the one serial connection to the ROV.
pub struct SerialLink<O: PortOpener> {
    opener: O,
    cfg: SerialConfig,
    port: Option<Box<dyn LinePort>>,
    status: LinkStatus,
    last_port: Option<String>,
    last_scan: DiscoveryResult,
}

impl<O: PortOpener> SerialLink<O> {
    pub fn new(opener: O, cfg: SerialConfig) -> Self {
        Self {
            opener,
            cfg,
            port: None,
            status: LinkStatus::default(),
            last_port: None,
            last_scan: DiscoveryResult::default(),
        }
    }

    pub fn status(&self) -> &LinkStatus {
        &self.status
    }

    pub fn last_scan(&self) -> &DiscoveryResult {
        &self.last_scan
    }

    pub fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig {
            baud: self.cfg.baud,
            identity: self.cfg.identity.clone(),
            read_timeout: Duration::from_millis(self.cfg.timeout_ms),
            window: Duration::from_millis(self.cfg.handshake_ms),
        }
    }

    /// Scan for the ROV and arm the thrusters once it answers.
    pub fn connect(&mut self) -> Result<String, StationError> {
        self.disconnect();
        self.status.state = LinkState::Scanning;
        let (scan, port) = discover(&self.opener, self.cfg.candidate_ports.as_deref(), &self.handshake_config());
        self.last_scan = scan;

        match (port, self.last_scan.chosen.clone()) {
            (Some(port), Some(name)) => {
                self.port = Some(port);
                self.last_port = Some(name.clone());
                self.status.state = LinkState::Connected;
                self.status.port = Some(name.clone());
                self.status.last_error = None;
                if !self.send(&Frame::ArmThrusters) {
                    warn!(port = %name, "arming frame failed");
                }
                Ok(name)
            }
            _ => {
                self.status.state = LinkState::Disconnected;
                let scanned = self.last_scan.probes.len();
                Err(StationError::NoDevice(format!("{} ({scanned} ports scanned)", self.cfg.identity)))
            }
        }
    }

    pub fn disconnect(&mut self) {
        if self.port.take().is_some() {
            info!(port = ?self.status.port, "serial link closed");
        }
        self.status.state = LinkState::Disconnected;
    }

    /// Forget the last port so no automatic reconnect happens.
    pub fn forget(&mut self) {
        self.disconnect();
        self.last_port = None;
        self.status.port = None;
    }

    fn drop_port(&mut self, err: &std::io::Error) {
        warn!(port = ?self.last_port, "serial i/o failure: {err}");
        self.port = None;
        self.status.state = LinkState::Disconnected;
        self.status.last_error = Some(err.to_string());
    }

    fn ensure_open(&mut self) -> Result<&mut Box<dyn LinePort>, StationError> {
        if self.port.is_none() {
            let name = self
                .last_port
                .clone()
                .ok_or_else(|| StationError::NoDevice("serial link never connected".into()))?;
            let port = self.opener.open(&name, self.cfg.baud, Duration::from_millis(self.cfg.timeout_ms))?;
            debug!(port = %name, "serial link reopened");
            self.port = Some(port);
            self.status.state = LinkState::Connected;
        }
        self.port.as_mut().ok_or_else(|| StationError::NoDevice("serial link closed".into()))
    }

    /// Write one frame, reconnecting to the last port between attempts.
    /// Returns false once every attempt has failed.
    pub fn send(&mut self, frame: &Frame) -> bool {
        let line = frame.encode();
        for attempt in 1..=self.cfg.retries.max(1) {
            let res = match self.ensure_open() {
                Ok(port) => port.write_line(&line).map_err(StationError::from),
                Err(e) => Err(e),
            };
            match res {
                Ok(()) => {
                    self.status.frames_sent += 1;
                    self.status.last_ok = Some(Instant::now());
                    return true;
                }
                Err(StationError::NoDevice(_)) => break,
                Err(StationError::Io(e)) => {
                    debug!(attempt, "send {line} failed");
                    self.drop_port(&e);
                }
                Err(e) => {
                    self.status.last_error = Some(e.to_string());
                }
            }
        }
        self.status.failed_frames += 1;
        false
    }

    /// Write `frame` and read one response line. A read timeout counts as a
    /// failed attempt but keeps the port open.
    pub fn request(&mut self, frame: &Frame) -> Option<String> {
        let line = frame.encode();
        for attempt in 1..=self.cfg.retries.max(1) {
            let port = match self.ensure_open() {
                Ok(p) => p,
                Err(_) => break,
            };
            match round_trip(port.as_mut(), &line) {
                Ok(reply) => {
                    self.status.frames_sent += 1;
                    self.status.last_ok = Some(Instant::now());
                    return Some(reply);
                }
                Err(e) if is_timeout(&e) => {
                    debug!(attempt, "no reply to {line}");
                    self.status.last_error = Some(e.to_string());
                }
                Err(e) => self.drop_port(&e),
            }
        }
        self.status.failed_frames += 1;
        None
    }
}

fn round_trip(port: &mut dyn LinePort, line: &str) -> std::io::Result<String> {
    port.clear_input()?;
    port.write_line(line)?;
    port.read_line()
}
