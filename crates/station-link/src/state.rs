use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Disconnected,
    Scanning,
    Connected,
}

#[derive(Debug, Clone)]
pub struct LinkStatus {
    pub state: LinkState,
    pub port: Option<String>,
    pub frames_sent: u64,
    pub failed_frames: u64,
    pub last_ok: Option<Instant>,
    pub last_error: Option<String>,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            state: LinkState::Disconnected,
            port: None,
            frames_sent: 0,
            failed_frames: 0,
            last_ok: None,
            last_error: None,
        }
    }
}

impl LinkStatus {
    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    pub fn ok_age(&self) -> Option<Duration> {
        self.last_ok.map(|t| t.elapsed())
    }
}
