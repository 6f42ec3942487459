pub mod autodetect;
pub mod emulator;
pub mod link;
pub mod port;
pub mod sensor;
pub mod state;
pub mod worker;

use serde::Deserialize;

pub use link::SerialLink;
pub use port::{LinePort, PortOpener, SystemPorts};
pub use state::{LinkState, LinkStatus};
pub use worker::{spawn_link_worker, LinkCommand, LinkHandle, LinkMessage};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub baud: u32,

    /// Line the ROV answers to `?I`.
    pub identity: String,

    /// Per-read timeout, also used when reopening the last port.
    pub timeout_ms: u64,

    /// Attempts per frame before reporting comms-degraded.
    pub retries: u32,

    /// How long discovery waits for an identity line on each port.
    pub handshake_ms: u64,

    /// Ports to probe, in order. Every OS serial port when unset.
    pub candidate_ports: Option<Vec<String>>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud: 115_200,
            identity: station_proto::ROV_IDENTITY.to_string(),
            timeout_ms: 1000,
            retries: 5,
            handshake_ms: 3000,
            candidate_ports: None,
        }
    }
}
