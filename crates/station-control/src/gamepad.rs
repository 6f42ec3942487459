use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use gilrs::{Axis, Gilrs};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use station_proto::{EventKind, EventSource, StationError, StationEvent};

use crate::input::{self, InputSnapshot, RawInput};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub index: usize,
    pub identity: String,
}

/// Platform gamepad access. Implementations report raw readings; filtering
/// happens in [`GamepadReader`].
pub trait GamepadBackend {
    fn enumerate(&mut self) -> Vec<DeviceDescriptor>;
    /// Current state of device `index`. A vanished device is `DeviceLost`.
    fn read(&mut self, index: usize) -> Result<RawInput, StationError>;
}

pub struct GilrsBackend {
    gilrs: Gilrs,
}

impl GilrsBackend {
    pub fn new() -> Result<Self> {
        let gilrs = Gilrs::new().map_err(|e| anyhow::anyhow!("gamepad subsystem init: {e}"))?;
        Ok(Self { gilrs })
    }

    fn pump(&mut self) {
        while self.gilrs.next_event().is_some() {}
    }
}

impl GamepadBackend for GilrsBackend {
    fn enumerate(&mut self) -> Vec<DeviceDescriptor> {
        self.pump();
        self.gilrs
            .gamepads()
            .map(|(id, pad)| DeviceDescriptor { index: usize::from(id), identity: pad.name().to_string() })
            .collect()
    }

    fn read(&mut self, index: usize) -> Result<RawInput, StationError> {
        use gilrs::Button as G;

        self.pump();
        let pad = self
            .gilrs
            .gamepads()
            .find(|(id, _)| usize::from(*id) == index)
            .map(|(_, pad)| pad)
            .filter(|pad| pad.is_connected())
            .ok_or_else(|| StationError::DeviceLost(format!("gamepad {index}")))?;

        let trigger = |b: G| pad.button_data(b).map(|d| d.value()).unwrap_or(0.0);
        // Y axes are reported up-positive; the mixer expects down-positive.
        let axes = [
            f64::from(pad.value(Axis::LeftStickX)),
            -f64::from(pad.value(Axis::LeftStickY)),
            f64::from(trigger(G::RightTrigger2) - trigger(G::LeftTrigger2)),
            -f64::from(pad.value(Axis::RightStickY)),
            f64::from(pad.value(Axis::RightStickX)),
        ];

        let order = [
            G::South,
            G::East,
            G::West,
            G::North,
            G::LeftTrigger,
            G::RightTrigger,
            G::Select,
            G::Start,
            G::LeftThumb,
            G::RightThumb,
        ];
        let mut buttons = [false; 10];
        for (slot, b) in buttons.iter_mut().zip(order) {
            *slot = pad.is_pressed(b);
        }

        let axis_of = |lo: G, hi: G| match (pad.is_pressed(lo), pad.is_pressed(hi)) {
            (true, false) => -1,
            (false, true) => 1,
            _ => 0,
        };
        let hat = (axis_of(G::DPadLeft, G::DPadRight), axis_of(G::DPadDown, G::DPadUp));

        Ok(RawInput { axes, buttons, hat })
    }
}

/// Binds one device by identity and turns its readings into snapshots.
pub struct GamepadReader<B> {
    backend: B,
    bound: Option<DeviceDescriptor>,
    tick: u64,
}

impl<B: GamepadBackend> GamepadReader<B> {
    pub fn new(backend: B) -> Self {
        Self { backend, bound: None, tick: 0 }
    }

    pub fn enumerate(&mut self) -> Vec<DeviceDescriptor> {
        self.backend.enumerate()
    }

    pub fn bind(&mut self, identity: &str) -> Result<DeviceDescriptor, StationError> {
        let dev = self
            .backend
            .enumerate()
            .into_iter()
            .find(|d| d.identity == identity)
            .ok_or_else(|| StationError::NoDevice(identity.to_string()))?;
        info!(index = dev.index, identity = %dev.identity, "gamepad bound");
        self.bound = Some(dev.clone());
        Ok(dev)
    }

    pub fn unbind(&mut self) {
        if let Some(dev) = self.bound.take() {
            debug!(index = dev.index, "gamepad released");
        }
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    /// A lost device leaves the reader idle until the next `bind`.
    pub fn poll(&mut self) -> Result<InputSnapshot, StationError> {
        let index = match &self.bound {
            Some(d) => d.index,
            None => return Err(StationError::NoDevice("no gamepad bound".into())),
        };
        match self.backend.read(index) {
            Ok(raw) => {
                self.tick += 1;
                Ok(input::filter(&raw, self.tick))
            }
            Err(e) => {
                if e.is_device_lost() {
                    self.bound = None;
                }
                Err(e)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum GamepadMessage {
    Snapshot(InputSnapshot),
    Event(StationEvent),
}

#[derive(Debug, Clone)]
pub struct GamepadWorkerConfig {
    pub identity: String,
    pub poll_hz: u32,
    pub rebind_interval: Duration,
}

/// Runs the reader on a blocking thread at `poll_hz` until `stop` is set or
/// the receiver is dropped. `make_backend` runs on that thread.
pub fn spawn_gamepad_worker<B, F>(
    make_backend: F,
    cfg: GamepadWorkerConfig,
    tx: mpsc::Sender<GamepadMessage>,
    stop: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()>
where
    B: GamepadBackend,
    F: FnOnce() -> Result<B> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let backend = match make_backend() {
            Ok(b) => b,
            Err(e) => {
                warn!("gamepad backend unavailable: {e:#}");
                let ev = StationEvent::new(EventSource::Gamepad, EventKind::DeviceLost, format!("{e:#}"));
                let _ = tx.blocking_send(GamepadMessage::Event(ev));
                return;
            }
        };
        let mut reader = GamepadReader::new(backend);
        let period = Duration::from_secs_f64(1.0 / f64::from(cfg.poll_hz.max(1)));
        let mut last_bind_attempt: Option<Instant> = None;
        let mut missing_reported = false;

        while !stop.load(Ordering::Relaxed) {
            let t0 = Instant::now();

            if !reader.is_bound() {
                let due = last_bind_attempt.map_or(true, |t| t.elapsed() >= cfg.rebind_interval);
                if due {
                    last_bind_attempt = Some(Instant::now());
                    match reader.bind(&cfg.identity) {
                        Ok(dev) => {
                            missing_reported = false;
                            let ev = StationEvent::new(
                                EventSource::Gamepad,
                                EventKind::Connected,
                                format!("{} (#{})", dev.identity, dev.index),
                            );
                            if tx.blocking_send(GamepadMessage::Event(ev)).is_err() {
                                break;
                            }
                        }
                        Err(e) if !missing_reported => {
                            missing_reported = true;
                            let ev = StationEvent::new(EventSource::Gamepad, EventKind::Disconnected, e.to_string());
                            if tx.blocking_send(GamepadMessage::Event(ev)).is_err() {
                                break;
                            }
                        }
                        Err(_) => {}
                    }
                }
            }

            if reader.is_bound() {
                let msg = match reader.poll() {
                    Ok(snap) => GamepadMessage::Snapshot(snap),
                    Err(e) => {
                        warn!("gamepad poll failed: {e}");
                        GamepadMessage::Event(StationEvent::new(EventSource::Gamepad, EventKind::DeviceLost, e.to_string()))
                    }
                };
                if tx.blocking_send(msg).is_err() {
                    break;
                }
            }

            if let Some(rest) = period.checked_sub(t0.elapsed()) {
                std::thread::sleep(rest);
            }
        }
        reader.unbind();
        debug!("gamepad worker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Button;
    use std::collections::VecDeque;

    /// Replays a fixed script; `None` entries simulate an unplug.
    struct Scripted {
        name: String,
        script: VecDeque<Option<RawInput>>,
        present: bool,
    }

    impl Scripted {
        fn new(script: Vec<Option<RawInput>>) -> Self {
            Self { name: "Controller (Xbox One For Windows)".into(), script: script.into(), present: true }
        }
    }

    impl GamepadBackend for Scripted {
        fn enumerate(&mut self) -> Vec<DeviceDescriptor> {
            if self.present {
                vec![DeviceDescriptor { index: 0, identity: self.name.clone() }]
            } else {
                Vec::new()
            }
        }

        fn read(&mut self, _index: usize) -> Result<RawInput, StationError> {
            match self.script.pop_front() {
                Some(Some(raw)) => Ok(raw),
                _ => {
                    self.present = false;
                    Err(StationError::DeviceLost("scripted unplug".into()))
                }
            }
        }
    }

    #[test]
    fn bind_requires_matching_identity() {
        let mut r = GamepadReader::new(Scripted::new(vec![]));
        assert!(matches!(r.bind("Some Other Pad"), Err(StationError::NoDevice(_))));
        assert!(matches!(r.poll(), Err(StationError::NoDevice(_))));
        assert!(r.bind("Controller (Xbox One For Windows)").is_ok());
    }

    #[test]
    fn poll_filters_and_counts_ticks() {
        let raw = RawInput { axes: [0.05, -0.456, 0.0, 0.0, 1.4], buttons: [true; 10], hat: (1, 0) };
        let mut r = GamepadReader::new(Scripted::new(vec![Some(raw.clone()), Some(raw)]));
        r.bind("Controller (Xbox One For Windows)").unwrap();
        let s = r.poll().unwrap();
        assert_eq!(s.tick, 1);
        assert_eq!(s.axes.left_x, 0.0);
        assert_eq!(s.axes.left_y, -0.46);
        assert_eq!(s.axes.right_x, 1.0);
        assert!(s.pressed(Button::Right) && !s.pressed(Button::Left));
        assert_eq!(r.poll().unwrap().tick, 2);
    }

    #[test]
    fn lost_device_goes_idle() {
        let mut r = GamepadReader::new(Scripted::new(vec![Some(RawInput::default()), None]));
        r.bind("Controller (Xbox One For Windows)").unwrap();
        assert!(r.poll().is_ok());
        assert!(matches!(r.poll(), Err(StationError::DeviceLost(_))));
        assert!(!r.is_bound());
        assert!(matches!(r.poll(), Err(StationError::NoDevice(_))));
    }

    #[tokio::test]
    async fn worker_streams_snapshots_then_reports_loss() {
        let (tx, mut rx) = mpsc::channel(32);
        let stop = Arc::new(AtomicBool::new(false));
        let script = vec![Some(RawInput::default()), Some(RawInput::default()), None];
        let cfg = GamepadWorkerConfig {
            identity: "Controller (Xbox One For Windows)".into(),
            poll_hz: 200,
            rebind_interval: Duration::from_secs(60),
        };
        let handle = spawn_gamepad_worker(move || Ok(Scripted::new(script)), cfg, tx, stop.clone());

        let mut kinds = Vec::new();
        while kinds.len() < 4 {
            match rx.recv().await.unwrap() {
                GamepadMessage::Snapshot(s) => kinds.push(format!("snap{}", s.tick)),
                GamepadMessage::Event(e) => kinds.push(format!("{:?}", e.kind)),
            }
        }
        assert_eq!(kinds, vec!["Connected", "snap1", "snap2", "DeviceLost"]);

        stop.store(true, Ordering::Relaxed);
        handle.await.unwrap();
    }
}
