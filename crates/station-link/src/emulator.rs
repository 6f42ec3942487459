//! In-process ROV stand-in for tests and bench checks without hardware.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use station_proto::ROV_IDENTITY;

use crate::port::{LinePort, PortOpener};

#[derive(Debug, Clone, PartialEq)]
pub enum Behaviour {
    /// Answers `?I` with the ROV identity and `?RS` with the sensor line.
    Rov,
    /// Answers `?I` with the given text.
    Imposter(String),
    /// Never answers.
    Silent,
}

#[derive(Debug, Default)]
struct BusState {
    ports: BTreeMap<String, Behaviour>,
    sensor_line: String,
    written: Vec<(String, String)>,
    fail_writes: usize,
    opens: usize,
    quiet: Option<Duration>,
}

/// A set of emulated ports sharing one transcript.
#[derive(Debug, Clone, Default)]
pub struct EmulatedBus {
    inner: Arc<Mutex<BusState>>,
}

impl EmulatedBus {
    pub fn new() -> Self {
        let bus = Self::default();
        bus.state().sensor_line = "23.1,1.8,12,3,-4".into();
        bus
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_port(self, name: &str, behaviour: Behaviour) -> Self {
        self.state().ports.insert(name.to_string(), behaviour);
        self
    }

    pub fn set_sensor_line(&self, line: &str) {
        self.state().sensor_line = line.to_string();
    }

    /// The next `n` writes on any port fail.
    pub fn fail_next_writes(&self, n: usize) {
        self.state().fail_writes = n;
    }

    /// Every line written so far as `(port, line)`.
    pub fn written(&self) -> Vec<(String, String)> {
        self.state().written.clone()
    }

    /// The ROV stops answering; each read then waits `read_delay` before it
    /// times out, like a real port would.
    pub fn go_quiet(&self, read_delay: Duration) {
        self.state().quiet = Some(read_delay);
    }

    pub fn opens(&self) -> usize {
        self.state().opens
    }
}

impl PortOpener for EmulatedBus {
    fn list(&self) -> io::Result<Vec<String>> {
        Ok(self.state().ports.keys().cloned().collect())
    }

    fn open(&self, name: &str, _baud: u32, _timeout: Duration) -> io::Result<Box<dyn LinePort>> {
        let mut st = self.state();
        let behaviour = st
            .ports
            .get(name)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no such port {name}")))?;
        st.opens += 1;
        Ok(Box::new(EmulatedPort {
            name: name.to_string(),
            behaviour,
            bus: self.clone(),
            replies: VecDeque::new(),
        }))
    }
}

struct EmulatedPort {
    name: String,
    behaviour: Behaviour,
    bus: EmulatedBus,
    replies: VecDeque<String>,
}

impl LinePort for EmulatedPort {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let (sensor_line, quiet) = {
            let mut st = self.bus.state();
            if st.fail_writes > 0 {
                st.fail_writes -= 1;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "emulated write failure"));
            }
            st.written.push((self.name.clone(), line.to_string()));
            (st.sensor_line.clone(), st.quiet.is_some())
        };
        if quiet {
            return Ok(());
        }
        match (&self.behaviour, line) {
            (Behaviour::Rov, "?I") => self.replies.push_back(ROV_IDENTITY.to_string()),
            (Behaviour::Rov, "?RS") => self.replies.push_back(sensor_line),
            (Behaviour::Imposter(answer), "?I") => self.replies.push_back(answer.clone()),
            _ => {}
        }
        Ok(())
    }

    fn read_line(&mut self) -> io::Result<String> {
        if let Some(reply) = self.replies.pop_front() {
            return Ok(reply);
        }
        let quiet = self.bus.state().quiet;
        if let Some(delay) = quiet {
            std::thread::sleep(delay);
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "emulated read timeout"))
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.replies.clear();
        Ok(())
    }
}
