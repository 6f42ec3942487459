//! Binds filtered controller input to ROV command frames.

use tracing::{debug, info};

use station_proto::frame::{NEUTRAL_US, THRUSTER_COUNT};
use station_proto::Frame;

use crate::actuator::ActuatorController;
use crate::bindings::{Control, KeyBindingTable, PressDetector};
use crate::input::{InputSnapshot, YawTracker};
use crate::mixer::{self, ThrusterConfig};

pub struct PilotSession {
    thrusters: ThrusterConfig,
    bindings: KeyBindingTable,
    actuators: ActuatorController,
    presses: PressDetector,
    yaw: YawTracker,
    last_sent: Option<[u16; THRUSTER_COUNT]>,
    testing: bool,
}

impl PilotSession {
    pub fn new(thrusters: ThrusterConfig, bindings: KeyBindingTable, actuator_count: usize) -> Self {
        Self {
            thrusters,
            bindings,
            actuators: ActuatorController::new(actuator_count),
            presses: PressDetector::default(),
            yaw: YawTracker::default(),
            last_sent: None,
            testing: false,
        }
    }

    pub fn thrusters(&self) -> &ThrusterConfig {
        &self.thrusters
    }

    pub fn bindings(&self) -> &KeyBindingTable {
        &self.bindings
    }

    pub fn actuators(&self) -> &ActuatorController {
        &self.actuators
    }

    /// Replace the thruster config with a new snapshot. The next tick re-sends.
    pub fn set_thrusters(&mut self, cfg: ThrusterConfig) {
        self.thrusters = cfg;
        self.last_sent = None;
    }

    pub fn set_bindings(&mut self, table: KeyBindingTable) {
        self.bindings = table;
    }

    pub fn toggle_actuator(&mut self, index: usize) -> Option<Frame> {
        self.actuators.toggle(index)
    }

    /// Set every actuator at once. `None` when the count does not match.
    pub fn set_actuators(&mut self, states: Vec<bool>) -> Option<Frame> {
        if states.len() != self.actuators.states().len() {
            return None;
        }
        Some(self.actuators.set_all(states))
    }

    /// Process one input tick and return the frames to transmit, in order.
    pub fn on_input(&mut self, snap: &InputSnapshot) -> Vec<Frame> {
        let mut out = Vec::new();

        for control in self.presses.pressed(&self.bindings, snap) {
            match control {
                Control::OrientationToggle => {
                    self.thrusters.orientation = self.thrusters.orientation.toggled();
                    info!(orientation = ?self.thrusters.orientation, "control orientation switched");
                }
                Control::SensitivityCycle => {
                    self.thrusters.joystick_sensitivity = self.thrusters.joystick_sensitivity.cycle();
                    info!(sensitivity = ?self.thrusters.joystick_sensitivity, "joystick sensitivity");
                }
                Control::YawSensitivity => {
                    self.thrusters.yaw_sensitivity = self.thrusters.yaw_sensitivity.cycle();
                    info!(sensitivity = ?self.thrusters.yaw_sensitivity, "yaw sensitivity");
                }
                Control::Actuator(i) => {
                    if let Some(f) = self.actuators.toggle(i) {
                        out.push(f);
                    }
                }
                // level-sensitive, handled below
                Control::YawRight | Control::YawLeft => {}
            }
        }

        let held = |c: Control| self.bindings.get(c).is_some_and(|b| snap.pressed(b));
        let (right, left) = (held(Control::YawRight), held(Control::YawLeft));
        let yaw = self.yaw.update(right, left);

        if self.testing {
            return out;
        }

        let speeds = mixer::mix(snap.axes, yaw.direction, &self.thrusters);
        if yaw.active || self.last_sent != Some(speeds) {
            debug!(tick = snap.tick, ?speeds, "thrusters");
            self.last_sent = Some(speeds);
            out.push(Frame::Thrusters(speeds));
        }
        out
    }

    /// Spin a single channel; mixer output is suppressed until [`end_test`].
    ///
    /// [`end_test`]: PilotSession::end_test
    pub fn begin_test(&mut self, channel: usize, percent: u8) -> Frame {
        self.testing = true;
        Frame::Thrusters(mixer::test_speeds(channel, percent, &self.thrusters))
    }

    pub fn end_test(&mut self) -> Frame {
        self.testing = false;
        let neutral = [NEUTRAL_US; THRUSTER_COUNT];
        self.last_sent = Some(neutral);
        Frame::Thrusters(neutral)
    }
}
