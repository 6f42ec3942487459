use serde::{Deserialize, Serialize};

use station_proto::Frame;

pub const MAX_ACTUATORS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorLabels {
    pub name: String,
    pub off: String,
    pub on: String,
}

impl ActuatorLabels {
    pub fn numbered(i: usize) -> Self {
        Self { name: format!("Actuator {}", i + 1), off: "OFF".into(), on: "ON".into() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorConfig {
    pub actuators: Vec<ActuatorLabels>,
}

impl ActuatorConfig {
    pub fn with_count(n: usize) -> Self {
        Self { actuators: (0..n.min(MAX_ACTUATORS)).map(ActuatorLabels::numbered).collect() }
    }

    pub fn len(&self) -> usize {
        self.actuators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actuators.is_empty()
    }
}

/// Owns the actuator state vector; every change yields the full `?RA` frame.
#[derive(Debug, Clone, Default)]
pub struct ActuatorController {
    states: Vec<bool>,
}

impl ActuatorController {
    pub fn new(count: usize) -> Self {
        Self { states: vec![false; count.min(MAX_ACTUATORS)] }
    }

    pub fn states(&self) -> &[bool] {
        &self.states
    }

    /// Flip actuator `index`. Out-of-range indices change nothing.
    pub fn toggle(&mut self, index: usize) -> Option<Frame> {
        let s = self.states.get_mut(index)?;
        *s = !*s;
        Some(self.frame())
    }

    pub fn set_all(&mut self, states: Vec<bool>) -> Frame {
        self.states = states;
        self.states.truncate(MAX_ACTUATORS);
        self.frame()
    }

    /// Grow or shrink to `count`; new actuators start off.
    pub fn resize(&mut self, count: usize) {
        self.states.resize(count.min(MAX_ACTUATORS), false);
    }

    pub fn frame(&self) -> Frame {
        Frame::Actuators(self.states.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_emits_whole_vector() {
        let mut a = ActuatorController::new(4);
        assert_eq!(a.toggle(0).unwrap().encode(), "?RA1000");
        assert_eq!(a.toggle(3).unwrap().encode(), "?RA1001");
        assert_eq!(a.toggle(0).unwrap().encode(), "?RA0001");
        assert!(a.toggle(4).is_none());
        assert_eq!(a.states(), &[false, false, false, true]);
    }

    #[test]
    fn set_all_replaces_state() {
        let mut a = ActuatorController::new(2);
        let f = a.set_all(vec![true, true, false]);
        assert_eq!(f, Frame::Actuators(vec![true, true, false]));
        a.resize(1);
        assert_eq!(a.frame().encode(), "?RA1");
    }

    #[test]
    fn count_is_capped() {
        assert_eq!(ActuatorConfig::with_count(14).len(), MAX_ACTUATORS);
        assert_eq!(ActuatorController::new(20).states().len(), MAX_ACTUATORS);
    }
}
