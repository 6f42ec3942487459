use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    Gamepad,
    Link,
    Sensors,
    Camera(usize),
    Session,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Status,
    Connected,
    Disconnected,
    CommsDegraded,
    DeviceLost,
    ProtocolMismatch,
    ConfigRepaired,
}

/// A structured record a worker hands to the UI consumer. Workers never
/// surface failures any other way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationEvent {
    pub ts_unix_ms: i64,
    pub source: EventSource,
    pub kind: EventKind,
    pub msg: String,
}

impl StationEvent {
    pub fn new(source: EventSource, kind: EventKind, msg: impl Into<String>) -> Self {
        Self {
            ts_unix_ms: (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
            source,
            kind,
            msg: msg.into(),
        }
    }

    pub fn status(source: EventSource, msg: impl Into<String>) -> Self {
        Self::new(source, EventKind::Status, msg)
    }
}
