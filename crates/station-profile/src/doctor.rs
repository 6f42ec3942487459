use anyhow::Result;

use station_control::doctor::{check_actuators, check_bindings, check_thrusters};
use station_link::sensor::MAX_SENSORS;
use station_vision::CameraSource;

use crate::profile::Profile;

pub fn check_profile(p: &Profile) -> Result<()> {
    check_thrusters(&p.thrusters)?;
    check_actuators(&p.actuators)?;
    check_bindings(&p.keybindings, &p.actuators)?;
    check_cameras(p)?;
    anyhow::ensure!(p.sensors.types.len() <= MAX_SENSORS, "sensors: at most {MAX_SENSORS} supported");
    Ok(())
}

pub fn check_cameras(p: &Profile) -> Result<()> {
    for (i, c) in p.digital.cameras.iter().enumerate() {
        anyhow::ensure!(
            CameraSource::from_address(&c.address).is_some(),
            "cameras: digital camera {} ({}) has no address",
            i + 1,
            c.label
        );
    }
    for (feed, &d) in p.digital.default_feeds.iter().enumerate() {
        anyhow::ensure!(d <= p.digital.cameras.len(), "cameras: feed {feed} selects missing digital camera {d}");
    }
    for (feed, &a) in p.analog.default_feeds.iter().enumerate() {
        anyhow::ensure!(a <= p.analog.quantity, "cameras: feed {feed} selects missing analog camera {a}");
    }
    Ok(())
}
