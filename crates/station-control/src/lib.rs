pub mod actuator;
pub mod bindings;
pub mod doctor;
pub mod gamepad;
pub mod input;
pub mod mixer;
pub mod session;
pub mod stopwatch;

pub use actuator::{ActuatorConfig, ActuatorController, ActuatorLabels};
pub use bindings::{Control, KeyBindingTable};
pub use gamepad::{GamepadMessage, GamepadReader, GamepadWorkerConfig, GilrsBackend};
pub use input::{Axes, Button, InputSnapshot};
pub use mixer::{ChannelConfig, Orientation, Sensitivity, Slot, ThrusterConfig};
pub use session::PilotSession;
pub use stopwatch::Stopwatch;
