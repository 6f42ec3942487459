pub mod doctor;
pub mod profile;
pub mod store;
mod xml;

pub use profile::{AnalogCameras, DigitalCamera, DigitalCameras, Profile, Theme, FEEDS};
pub use store::ProfileStore;
