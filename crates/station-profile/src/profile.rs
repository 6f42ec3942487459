//! The pilot profile tree and its XML form.
//!
//! Element names follow the profile files the station has always written:
//! `<root>` holding `theme`, `thrusters`, `controller`, `actuators`,
//! `sensors`, `cameras` and `keybindings`. Anything else in the document is
//! ignored and every missing section falls back to its default.

use anyhow::{ensure, Result};
use serde::Serialize;
use tracing::warn;

use station_control::actuator::MAX_ACTUATORS;
use station_control::{
    ActuatorConfig, ActuatorLabels, Button, Control, KeyBindingTable, Orientation, Sensitivity, Slot, ThrusterConfig,
};
use station_link::sensor::{DisplayMode, SensorConfig, SensorType, MAX_SENSORS};
use station_proto::THRUSTER_COUNT;
use station_vision::{CameraSource, FeedSettings, Resolution};

use crate::xml::{self, Element};

/// Display feeds a profile configures.
pub const FEEDS: usize = 4;

const ROOT: &str = "root";
const NONE_TOKEN: &str = "None";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Theme {
    Dark,
    #[default]
    Light,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalogCameras {
    pub quantity: usize,
    /// Per feed, 1-based analog device; 0 means none.
    pub default_feeds: [usize; FEEDS],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DigitalCamera {
    pub label: String,
    /// Integer device index or stream URL.
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DigitalCameras {
    pub cameras: Vec<DigitalCamera>,
    /// Per feed, 1-based index into `cameras`; 0 means none.
    pub default_feeds: [usize; FEEDS],
    pub resolutions: [Resolution; FEEDS],
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Profile {
    pub theme: Theme,
    pub thrusters: ThrusterConfig,
    pub actuators: ActuatorConfig,
    pub sensors: SensorConfig,
    pub analog: AnalogCameras,
    pub digital: DigitalCameras,
    pub keybindings: KeyBindingTable,
}

fn bool_text(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}

fn button_token(b: Option<Button>) -> &'static str {
    b.map_or(NONE_TOKEN, Button::token)
}

impl Profile {
    pub fn to_xml(&self) -> Result<String> {
        let mut root = Element::new(ROOT);
        root.leaf("theme", if self.theme == Theme::Dark { "dark" } else { "light" });

        let thrusters = root.push(Element::new("thrusters"));
        for (i, ch) in self.thrusters.channels.iter().enumerate() {
            let t = thrusters.push(Element::new(format!("thruster{i}")));
            t.leaf("location", ch.slot.map_or(NONE_TOKEN, Slot::label));
            t.leaf("reversed", bool_text(ch.reverse));
        }

        let controller = root.push(Element::new("controller"));
        controller.leaf("sensitivity", self.thrusters.joystick_sensitivity.step());
        controller.leaf("yawSensitivity", self.thrusters.yaw_sensitivity.step());
        controller.leaf("reversed", bool_text(self.thrusters.orientation == Orientation::Reversed));

        let actuators = root.push(Element::new("actuators"));
        actuators.leaf("quantity", self.actuators.len());
        for (i, a) in self.actuators.actuators.iter().enumerate() {
            let el = actuators.push(Element::new(format!("actuator{i}")));
            el.leaf("nameLabel", &a.name);
            el.leaf("offLabel", &a.off);
            el.leaf("onLabel", &a.on);
        }

        let sensors = root.push(Element::new("sensors"));
        sensors.leaf("quantity", self.sensors.types.len());
        sensors.leaf("view", self.sensors.mode.code());
        for (i, t) in self.sensors.types.iter().enumerate() {
            sensors.push(Element::new(format!("sensor{i}"))).leaf("type", t.code());
        }

        let cameras = root.push(Element::new("cameras"));
        let analog = cameras.push(Element::new("analog"));
        analog.leaf("quantity", self.analog.quantity);
        for (i, f) in self.analog.default_feeds.iter().enumerate() {
            analog.leaf(format!("defaultfeed{i}"), f);
        }
        let digital = cameras.push(Element::new("digital"));
        digital.leaf("quantity", self.digital.cameras.len());
        let labels = digital.push(Element::new("labels"));
        for (i, c) in self.digital.cameras.iter().enumerate() {
            labels.leaf(format!("camera{}", i + 1), &c.label);
        }
        let addresses = digital.push(Element::new("addresses"));
        for (i, c) in self.digital.cameras.iter().enumerate() {
            addresses.leaf(format!("camera{}", i + 1), &c.address);
        }
        let feeds = digital.push(Element::new("defaultfeeds"));
        for (i, f) in self.digital.default_feeds.iter().enumerate() {
            feeds.leaf(format!("feed{}", i + 1), f);
        }
        let res = digital.push(Element::new("resolutions"));
        for (i, r) in self.digital.resolutions.iter().enumerate() {
            res.leaf(format!("feed{}", i + 1), r.index());
        }

        let bindings = root.push(Element::new("keybindings"));
        for (control, button) in self.keybindings.iter() {
            bindings.leaf(control.tag(), button_token(button));
        }

        xml::render(&root)
    }

    pub fn from_xml(doc: &str) -> Result<Self> {
        let root = xml::parse(doc)?;
        ensure!(root.name == ROOT, "profile root element is <{}>, expected <{ROOT}>", root.name);

        let mut p = Profile::default();
        if let Some(theme) = root.text_of("theme") {
            p.theme = if theme == "dark" { Theme::Dark } else { Theme::Light };
        }
        if let Some(el) = root.child("thrusters") {
            read_thrusters(el, &mut p.thrusters);
        }
        if let Some(el) = root.child("controller") {
            read_controller(el, &mut p.thrusters);
        }
        if let Some(el) = root.child("actuators") {
            p.actuators = read_actuators(el);
        }
        if let Some(el) = root.child("sensors") {
            p.sensors = read_sensors(el);
        }
        if let Some(cameras) = root.child("cameras") {
            if let Some(el) = cameras.child("analog") {
                p.analog = read_analog(el);
            }
            if let Some(el) = cameras.child("digital") {
                p.digital = read_digital(el);
            }
        }
        p.keybindings = KeyBindingTable::with_actuators(p.actuators.len());
        if let Some(el) = root.child("keybindings") {
            read_bindings(el, &mut p.keybindings, p.actuators.len());
        }
        Ok(p)
    }

    /// Settings for each display feed. A digital default wins over an analog
    /// one; a feed with neither is disabled.
    pub fn feed_settings(&self) -> [FeedSettings; FEEDS] {
        std::array::from_fn(|f| {
            let digital = self.digital.default_feeds[f];
            let analog = self.analog.default_feeds[f];
            let source = if digital >= 1 {
                self.digital
                    .cameras
                    .get(digital - 1)
                    .and_then(|c| CameraSource::from_address(&c.address))
            } else if analog >= 1 && analog <= self.analog.quantity {
                u32::try_from(analog - 1).ok().map(CameraSource::Usb)
            } else {
                None
            };
            FeedSettings {
                enabled: source.is_some(),
                source,
                resolution: self.digital.resolutions[f],
                task: None,
            }
        })
    }
}

fn read_thrusters(el: &Element, cfg: &mut ThrusterConfig) {
    for i in 0..THRUSTER_COUNT {
        let Some(t) = el.child(&format!("thruster{i}")) else {
            continue;
        };
        if let Some(loc) = t.text_of("location") {
            if let Some(prev) = cfg.assign_slot(i, Slot::from_label(loc)) {
                if prev < i {
                    warn!(channel = i, previous = prev, "profile: slot {loc} claimed twice, earlier channel cleared");
                }
            }
        }
        if let Some(rev) = t.text_of("reversed") {
            cfg.set_reverse(i, rev == "True");
        }
    }
}

fn read_controller(el: &Element, cfg: &mut ThrusterConfig) {
    if let Some(s) = el.value::<u8>("sensitivity").and_then(Sensitivity::from_step) {
        cfg.joystick_sensitivity = s;
    }
    if let Some(s) = el.value::<u8>("yawSensitivity").and_then(Sensitivity::from_step) {
        cfg.yaw_sensitivity = s;
    }
    if let Some(rev) = el.text_of("reversed") {
        cfg.orientation = if rev == "True" { Orientation::Reversed } else { Orientation::Forward };
    }
}

fn read_actuators(el: &Element) -> ActuatorConfig {
    let n = el.value::<usize>("quantity").unwrap_or(0).min(MAX_ACTUATORS);
    let actuators = (0..n)
        .map(|i| {
            let mut labels = ActuatorLabels::numbered(i);
            if let Some(a) = el.child(&format!("actuator{i}")) {
                if let Some(t) = a.text_of("nameLabel") {
                    labels.name = t.to_string();
                }
                if let Some(t) = a.text_of("offLabel") {
                    labels.off = t.to_string();
                }
                if let Some(t) = a.text_of("onLabel") {
                    labels.on = t.to_string();
                }
            }
            labels
        })
        .collect();
    ActuatorConfig { actuators }
}

fn read_sensors(el: &Element) -> SensorConfig {
    let n = el.value::<usize>("quantity").unwrap_or(0).min(MAX_SENSORS);
    let types = (0..n)
        .map(|i| {
            el.child(&format!("sensor{i}"))
                .and_then(|s| s.value::<u8>("type"))
                .map_or(SensorType::None, SensorType::from_code)
        })
        .collect();
    let mode = DisplayMode::from_code(el.value::<u8>("view").unwrap_or(0));
    SensorConfig { types, mode }
}

fn read_analog(el: &Element) -> AnalogCameras {
    AnalogCameras {
        quantity: el.value("quantity").unwrap_or(0),
        default_feeds: std::array::from_fn(|i| el.value(&format!("defaultfeed{i}")).unwrap_or(0)),
    }
}

fn read_digital(el: &Element) -> DigitalCameras {
    let labels = el.child("labels");
    let addresses = el.child("addresses");
    let count = el
        .value::<usize>("quantity")
        .unwrap_or_else(|| labels.map_or(0, |l| l.children.len()));
    let cameras = (1..=count)
        .map(|i| {
            let tag = format!("camera{i}");
            let label = labels.and_then(|l| l.text_of(&tag)).unwrap_or_default().to_string();
            // older profiles kept only the label, which doubled as the address
            let address = addresses.and_then(|a| a.text_of(&tag)).map_or_else(|| label.clone(), str::to_string);
            DigitalCamera { label, address }
        })
        .collect();
    let feeds = el.child("defaultfeeds");
    let res = el.child("resolutions");
    DigitalCameras {
        cameras,
        default_feeds: std::array::from_fn(|i| {
            feeds.and_then(|f| f.value(&format!("feed{}", i + 1))).unwrap_or(0)
        }),
        resolutions: std::array::from_fn(|i| {
            res.and_then(|r| r.value::<usize>(&format!("feed{}", i + 1)))
                .and_then(Resolution::from_index)
                .unwrap_or_default()
        }),
    }
}

/// Apply the file's bindings over the defaults and return the controls that
/// lost their button to a later entry.
fn read_bindings(el: &Element, table: &mut KeyBindingTable, actuators: usize) -> Vec<Control> {
    let listed: Vec<(Control, Option<Button>)> = el
        .children
        .iter()
        .filter_map(|b| Some((Control::from_tag(&b.name)?, Button::from_token(b.text.trim()))))
        .filter(|(control, _)| !matches!(control, Control::Actuator(i) if *i >= actuators))
        .collect();

    // listed controls start unbound so only clashes inside the file count
    for (control, _) in &listed {
        table.set(*control, None);
    }
    let mut repaired = Vec::new();
    for (control, button) in listed {
        if let Some(prev) = table.set(control, button) {
            warn!("profile: {} reused, {} unbound", button_token(button), prev.tag());
            repaired.push(prev);
        }
    }
    repaired
}

#[cfg(test)]
mod tests {
    use super::*;
    use station_control::ChannelConfig;

    fn sample() -> Profile {
        let mut p = Profile { theme: Theme::Dark, ..Profile::default() };
        p.thrusters.assign_slot(0, Some(Slot::C));
        p.thrusters.assign_slot(2, Some(Slot::A));
        p.thrusters.assign_slot(7, None);
        p.thrusters.set_reverse(4, true);
        p.thrusters.joystick_sensitivity = Sensitivity::High;
        p.thrusters.orientation = Orientation::Reversed;
        p.actuators = ActuatorConfig::with_count(2);
        p.actuators.actuators[1] = ActuatorLabels { name: "Claw".into(), off: "Open".into(), on: "Closed".into() };
        p.sensors = SensorConfig { types: vec![SensorType::Temperature, SensorType::Depth, SensorType::Yaw], mode: DisplayMode::Chart };
        p.analog = AnalogCameras { quantity: 2, default_feeds: [1, 0, 2, 0] };
        p.digital = DigitalCameras {
            cameras: vec![
                DigitalCamera { label: "Front".into(), address: "rtsp://192.168.0.20:554/main".into() },
                DigitalCamera { label: "Belly".into(), address: "3".into() },
            ],
            default_feeds: [0, 1, 0, 2],
            resolutions: [Resolution::R1280x720, Resolution::R640x360, Resolution::R256x144, Resolution::R1920x1080],
        };
        p.keybindings = KeyBindingTable::with_actuators(2);
        p.keybindings.set(Control::OrientationToggle, Some(Button::Start));
        p.keybindings.set(Control::Actuator(1), Some(Button::A));
        p
    }

    #[test]
    fn xml_round_trip_is_lossless() {
        let p = sample();
        let doc = p.to_xml().unwrap();
        assert!(doc.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>"));
        assert!(doc.contains("<location>None</location>"));
        assert!(doc.contains("<left_yaw>LEFT</left_yaw>"));
        assert_eq!(Profile::from_xml(&doc).unwrap(), p);
    }

    #[test]
    fn missing_sections_default() {
        let p = Profile::from_xml("<?xml version='1.0' encoding='utf-8'?><root><theme>dark</theme></root>").unwrap();
        assert_eq!(p, Profile { theme: Theme::Dark, ..Profile::default() });
        assert_eq!(p.keybindings.get(Control::YawRight), Some(Button::Right));
    }

    #[test]
    fn unknown_elements_are_ignored() {
        let doc = "<root><splash>on</splash><thrusters><thruster1><location>E</location>\
                   <reversed>True</reversed><colour>red</colour></thruster1></thrusters></root>";
        let p = Profile::from_xml(doc).unwrap();
        assert_eq!(p.thrusters.channels[1], ChannelConfig { slot: Some(Slot::E), reverse: true });
        // channel 4 held E by default and was cleared
        assert_eq!(p.thrusters.channels[4].slot, None);
    }

    #[test]
    fn legacy_yaw_tag_and_repairs() {
        let doc = "<root><keybindings><right_yaw>A</right_yaw><right_left>A</right_left></keybindings></root>";
        let p = Profile::from_xml(doc).unwrap();
        assert_eq!(p.keybindings.get(Control::YawLeft), Some(Button::A));
        assert_eq!(p.keybindings.get(Control::YawRight), None);
        assert!(p.keybindings.duplicate().is_none());
    }

    #[test]
    fn duplicate_thruster_slots_are_repaired_on_load() {
        let doc = "<root><thrusters><thruster0><location>B</location></thruster0>\
                   <thruster3><location>B</location></thruster3></thrusters></root>";
        let p = Profile::from_xml(doc).unwrap();
        assert_eq!(p.thrusters.duplicate_slot(), None);
        assert_eq!(p.thrusters.channels[3].slot, Some(Slot::B));
        assert_eq!(p.thrusters.channels[0].slot, None);
    }

    #[test]
    fn label_only_digital_cameras_use_label_as_address() {
        let doc = "<root><cameras><digital><labels><camera1>rtsp://cam/a</camera1></labels>\
                   <defaultfeeds><feed1>1</feed1></defaultfeeds></digital></cameras></root>";
        let p = Profile::from_xml(doc).unwrap();
        assert_eq!(p.digital.cameras.len(), 1);
        assert_eq!(p.digital.cameras[0].address, "rtsp://cam/a");
        assert_eq!(p.feed_settings()[0].source, Some(CameraSource::Rtsp("rtsp://cam/a".into())));
    }

    #[test]
    fn wrong_root_is_rejected() {
        assert!(Profile::from_xml("<config/>").is_err());
    }

    #[test]
    fn feed_derivation() {
        let feeds = sample().feed_settings();
        assert_eq!(feeds[0].source, Some(CameraSource::Usb(0)));
        assert_eq!(feeds[0].resolution, Resolution::R1280x720);
        assert_eq!(feeds[1].source, Some(CameraSource::Rtsp("rtsp://192.168.0.20:554/main".into())));
        assert_eq!(feeds[2].source, Some(CameraSource::Usb(1)));
        assert_eq!(feeds[3].source, Some(CameraSource::Usb(3)));
        assert!(feeds.iter().all(|f| f.enabled && f.task.is_none()));

        let mut p = sample();
        p.analog.default_feeds = [0; FEEDS];
        p.digital.default_feeds = [0, 0, 0, 5];
        assert!(p.feed_settings().iter().all(|f| !f.enabled && f.source.is_none()));
    }

    #[test]
    fn canonical_bindings_load_without_repairs() {
        let mut p = sample();
        p.keybindings.set(Control::YawLeft, Some(Button::Right));
        p.keybindings.set(Control::YawRight, Some(Button::Left));
        p.keybindings.set(Control::Actuator(0), Some(Button::B));
        let root = xml::parse(&p.to_xml().unwrap()).unwrap();
        let el = root.child("keybindings").unwrap();

        let mut table = KeyBindingTable::with_actuators(2);
        assert!(read_bindings(el, &mut table, 2).is_empty());
        assert_eq!(table, p.keybindings);
    }

    #[test]
    fn clash_inside_file_is_repaired_once() {
        let doc = "<keybindings><switch_control_direction>X</switch_control_direction><controller_sensitivity>X</controller_sensitivity></keybindings>";
        let el = xml::parse(doc).unwrap();
        let mut table = KeyBindingTable::with_actuators(0);
        assert_eq!(read_bindings(&el, &mut table, 0), vec![Control::OrientationToggle]);
        assert_eq!(table.get(Control::SensitivityCycle), Some(Button::X));
        assert_eq!(table.get(Control::YawRight), Some(Button::Right));
    }
}
