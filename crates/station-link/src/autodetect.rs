use std::time::{Duration, Instant};

use tracing::{info, warn};

use station_proto::Frame;

use crate::port::{is_timeout, LinePort, PortOpener};

#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub baud: u32,
    pub identity: String,
    /// Per-read timeout on the opened port.
    pub read_timeout: Duration,
    /// Total time to wait for an identity line.
    pub window: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub port: String,
    pub matched: bool,
    pub elapsed_ms: u64,
    pub note: String,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryResult {
    pub chosen: Option<String>,
    pub probes: Vec<ProbeResult>,
}

enum Answer {
    Matched,
    Other(String),
    Silent,
}

/// Send `?I` and wait for one non-empty line, re-sending after each read timeout.
fn identify(port: &mut dyn LinePort, cfg: &HandshakeConfig) -> std::io::Result<Answer> {
    let start = Instant::now();
    port.clear_input()?;
    while start.elapsed() < cfg.window {
        port.write_line(&Frame::Identify.encode())?;
        match port.read_line() {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                return Ok(if line == cfg.identity { Answer::Matched } else { Answer::Other(line.to_string()) });
            }
            Err(e) if is_timeout(&e) => std::thread::sleep(Duration::from_millis(10)),
            Err(e) => return Err(e),
        }
    }
    Ok(Answer::Silent)
}

/// Probe `candidates` (or every listed port) in order. The first port that
/// answers with the identity is returned open; every other port is closed.
pub fn discover(
    opener: &dyn PortOpener,
    candidates: Option<&[String]>,
    cfg: &HandshakeConfig,
) -> (DiscoveryResult, Option<Box<dyn LinePort>>) {
    let mut result = DiscoveryResult::default();
    let ports = match candidates {
        Some(c) => c.to_vec(),
        None => match opener.list() {
            Ok(p) => p,
            Err(e) => {
                warn!("serial port enumeration failed: {e}");
                return (result, None);
            }
        },
    };

    for name in ports {
        let start = Instant::now();
        let note = match opener.open(&name, cfg.baud, cfg.read_timeout) {
            Ok(mut port) => match identify(port.as_mut(), cfg) {
                Ok(Answer::Matched) => {
                    info!(port = %name, "ROV identified");
                    result.probes.push(ProbeResult {
                        port: name.clone(),
                        matched: true,
                        elapsed_ms: start.elapsed().as_millis() as u64,
                        note: cfg.identity.clone(),
                    });
                    result.chosen = Some(name);
                    return (result, Some(port));
                }
                Ok(Answer::Other(line)) => format!("answered {line:?}"),
                Ok(Answer::Silent) => "no answer".to_string(),
                Err(e) => format!("i/o error: {e}"),
            },
            Err(e) => {
                warn!(port = %name, "probe open failed: {e}");
                format!("open failed: {e}")
            }
        };
        result.probes.push(ProbeResult {
            port: name,
            matched: false,
            elapsed_ms: start.elapsed().as_millis() as u64,
            note,
        });
    }
    (result, None)
}
