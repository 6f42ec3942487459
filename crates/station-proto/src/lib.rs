pub mod error;
pub mod event;
pub mod frame;

pub use error::StationError;
pub use event::{EventKind, EventSource, StationEvent};
pub use frame::{parse_sensor_line, Frame, FrameError, NEUTRAL_US, ROV_IDENTITY, THRUSTER_COUNT};
