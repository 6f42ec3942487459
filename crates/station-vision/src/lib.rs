//! Camera feeds and the vision tasks that can be attached to them.

pub mod camera;
pub mod imgproc;
pub mod mosaic;
pub mod task;
pub mod transect;
pub mod worker;

pub use camera::{no_signal, CameraSource, FfmpegGrabber, FrameGrabber, Resolution};
pub use mosaic::{Mosaic, MOSAIC_SNAPSHOTS};
pub use task::{TaskData, TaskKind, VisionTask};
pub use transect::{Steering, SteeringCue, TransectLine};
pub use worker::{spawn_camera_worker, CameraWorkerConfig, FeedHandle, FeedMessage, FeedSettings};
