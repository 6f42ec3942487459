use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use station_proto::{parse_sensor_line, EventKind, EventSource, Frame, StationEvent};

use crate::worker::LinkHandle;

pub const MAX_SENSORS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorType {
    None,
    Temperature,
    Depth,
    Yaw,
    Pitch,
    Roll,
}

impl SensorType {
    const ALL: [SensorType; 6] = [
        SensorType::None,
        SensorType::Temperature,
        SensorType::Depth,
        SensorType::Yaw,
        SensorType::Pitch,
        SensorType::Roll,
    ];

    /// Integer code stored in the profile.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Unknown codes read as `None`.
    pub fn from_code(code: u8) -> Self {
        Self::ALL.get(usize::from(code)).copied().unwrap_or(SensorType::None)
    }

    pub fn label(self) -> &'static str {
        match self {
            SensorType::None => "None",
            SensorType::Temperature => "Temperature (°C)",
            SensorType::Depth => "Depth (m)",
            SensorType::Yaw => "Yaw (°)",
            SensorType::Pitch => "Pitch (°)",
            SensorType::Roll => "Roll (°)",
        }
    }

    /// Default chart range.
    pub fn range(self) -> (f64, f64) {
        match self {
            SensorType::None => (0.0, 1.0),
            SensorType::Temperature => (-10.0, 40.0),
            SensorType::Depth => (0.0, 100.0),
            SensorType::Yaw => (-180.0, 180.0),
            SensorType::Pitch | SensorType::Roll => (-90.0, 90.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayMode {
    Numeric,
    Chart,
}

impl DisplayMode {
    pub fn code(self) -> u8 {
        match self {
            DisplayMode::Numeric => 0,
            DisplayMode::Chart => 1,
        }
    }

    pub fn from_code(code: u8) -> Self {
        if code == 1 {
            DisplayMode::Chart
        } else {
            DisplayMode::Numeric
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub types: Vec<SensorType>,
    pub mode: DisplayMode,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self { types: Vec::new(), mode: DisplayMode::Numeric }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub ts_unix_ms: i64,
    pub values: Vec<f64>,
}

impl SensorReading {
    pub fn parse(line: &str) -> Result<Self, station_proto::FrameError> {
        Ok(Self {
            ts_unix_ms: (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
            values: parse_sensor_line(line)?,
        })
    }

    /// Pair configured sensors with readings by index; extra readings are
    /// ignored and missing ones are `None`.
    pub fn aligned(&self, cfg: &SensorConfig) -> Vec<(SensorType, Option<f64>)> {
        cfg.types
            .iter()
            .enumerate()
            .map(|(i, t)| (*t, self.values.get(i).copied()))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub enum SensorMessage {
    Reading(SensorReading),
    Event(StationEvent),
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub period: Duration,
    pub reply_timeout: Duration,
}

pub fn spawn_sensor_poller(
    link: LinkHandle,
    cfg: PollerConfig,
    tx: mpsc::Sender<SensorMessage>,
    stop: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(cfg.period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !stop.load(Ordering::Relaxed) {
            tick.tick().await;
            let Some(line) = link.request(Frame::RequestSensors, cfg.reply_timeout).await else {
                debug!("sensor request got no reply");
                continue;
            };
            let msg = match SensorReading::parse(&line) {
                Ok(reading) => SensorMessage::Reading(reading),
                Err(e) => {
                    warn!("dropping sensor sample: {e}");
                    SensorMessage::Event(StationEvent::new(
                        EventSource::Sensors,
                        EventKind::ProtocolMismatch,
                        format!("{e} in {line:?}"),
                    ))
                }
            };
            if tx.send(msg).await.is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_labels_ranges() {
        assert_eq!(SensorType::from_code(2), SensorType::Depth);
        assert_eq!(SensorType::from_code(42), SensorType::None);
        assert_eq!(SensorType::Roll.code(), 5);
        assert_eq!(SensorType::Temperature.label(), "Temperature (°C)");
        assert_eq!(SensorType::Yaw.range(), (-180.0, 180.0));
        assert_eq!(DisplayMode::from_code(1), DisplayMode::Chart);
    }

    #[test]
    fn reading_aligns_by_index() {
        let r = SensorReading::parse("23.1,1.8,12,3,-4").unwrap();
        assert_eq!(r.values.len(), 5);
        let cfg = SensorConfig { types: vec![SensorType::Temperature, SensorType::Depth], ..Default::default() };
        assert_eq!(r.aligned(&cfg), vec![(SensorType::Temperature, Some(23.1)), (SensorType::Depth, Some(1.8))]);

        let cfg = SensorConfig { types: vec![SensorType::Yaw; 7], ..Default::default() };
        let a = r.aligned(&cfg);
        assert_eq!(a[4], (SensorType::Yaw, Some(-4.0)));
        assert_eq!(a[6], (SensorType::Yaw, None));
    }
}
