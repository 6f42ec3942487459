use serde::{Deserialize, Serialize};

use crate::input::{Button, InputSnapshot};

pub const MAX_ACTUATOR_BINDINGS: usize = 10;

/// Named ROV control a controller button can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Control {
    OrientationToggle,
    SensitivityCycle,
    YawRight,
    YawLeft,
    YawSensitivity,
    Actuator(usize),
}

impl Control {
    /// Element name used in the profile's `<keybindings>` section.
    pub fn tag(self) -> String {
        match self {
            Control::OrientationToggle => "switch_control_direction".into(),
            Control::SensitivityCycle => "controller_sensitivity".into(),
            Control::YawRight => "right_yaw".into(),
            Control::YawLeft => "left_yaw".into(),
            Control::YawSensitivity => "yaw_sensitivity".into(),
            Control::Actuator(i) => format!("actuator{i}"),
        }
    }

    pub fn from_tag(tag: &str) -> Option<Control> {
        let fixed = match tag {
            "switch_control_direction" => Some(Control::OrientationToggle),
            "controller_sensitivity" => Some(Control::SensitivityCycle),
            "right_yaw" => Some(Control::YawRight),
            // older profiles wrote the yaw-left control under this name
            "left_yaw" | "right_left" => Some(Control::YawLeft),
            "yaw_sensitivity" => Some(Control::YawSensitivity),
            _ => None,
        };
        fixed.or_else(|| {
            let n: usize = tag.strip_prefix("actuator")?.parse().ok()?;
            (n < MAX_ACTUATOR_BINDINGS).then_some(Control::Actuator(n))
        })
    }
}

/// Control → button assignment. Unbound controls are absent from the table
/// (the profile token `None`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyBindingTable {
    entries: Vec<(Control, Option<Button>)>,
}

impl Default for KeyBindingTable {
    fn default() -> Self {
        Self::with_actuators(0)
    }
}

impl KeyBindingTable {
    /// Default table for `actuators` actuators: yaw on the hat, the rest unbound.
    pub fn with_actuators(actuators: usize) -> Self {
        let mut entries = vec![
            (Control::OrientationToggle, None),
            (Control::SensitivityCycle, None),
            (Control::YawRight, Some(Button::Right)),
            (Control::YawLeft, Some(Button::Left)),
            (Control::YawSensitivity, None),
        ];
        entries.extend((0..actuators.min(MAX_ACTUATOR_BINDINGS)).map(|i| (Control::Actuator(i), None)));
        Self { entries }
    }

    pub fn get(&self, control: Control) -> Option<Button> {
        self.entries.iter().find(|(c, _)| *c == control).and_then(|(_, b)| *b)
    }

    /// Bind `control` to `button`. A control already holding that button is
    /// unbound and returned.
    pub fn set(&mut self, control: Control, button: Option<Button>) -> Option<Control> {
        let mut repaired = None;
        if let Some(b) = button {
            for (c, held) in self.entries.iter_mut() {
                if *c != control && *held == Some(b) {
                    *held = None;
                    repaired = Some(*c);
                }
            }
        }
        match self.entries.iter_mut().find(|(c, _)| *c == control) {
            Some((_, held)) => *held = button,
            None => self.entries.push((control, button)),
        }
        repaired
    }

    /// Resize the actuator part of the table, keeping existing bindings.
    pub fn set_actuator_count(&mut self, n: usize) {
        let n = n.min(MAX_ACTUATOR_BINDINGS);
        self.entries.retain(|(c, _)| !matches!(c, Control::Actuator(i) if *i >= n));
        for i in 0..n {
            if !self.entries.iter().any(|(c, _)| *c == Control::Actuator(i)) {
                self.entries.push((Control::Actuator(i), None));
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Control, Option<Button>)> + '_ {
        self.entries.iter().copied()
    }

    /// First button bound to more than one control.
    pub fn duplicate(&self) -> Option<Button> {
        let bound: Vec<Button> = self.entries.iter().filter_map(|(_, b)| *b).collect();
        bound
            .iter()
            .enumerate()
            .find(|(i, b)| bound[i + 1..].contains(b))
            .map(|(_, b)| *b)
    }
}

/// Fires each bound control once per press. A control is re-armed after its
/// button is released.
#[derive(Debug, Clone, Default)]
pub struct PressDetector {
    prev: Option<InputSnapshot>,
}

impl PressDetector {
    pub fn pressed(&mut self, table: &KeyBindingTable, snap: &InputSnapshot) -> Vec<Control> {
        let fired = table
            .iter()
            .filter_map(|(c, b)| b.map(|b| (c, b)))
            .filter(|(_, b)| {
                snap.pressed(*b) && !self.prev.as_ref().is_some_and(|p| p.pressed(*b))
            })
            .map(|(c, _)| c)
            .collect();
        self.prev = Some(snap.clone());
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_binds_yaw_to_hat() {
        let t = KeyBindingTable::with_actuators(3);
        assert_eq!(t.get(Control::YawRight), Some(Button::Right));
        assert_eq!(t.get(Control::YawLeft), Some(Button::Left));
        assert_eq!(t.get(Control::OrientationToggle), None);
        assert_eq!(t.get(Control::Actuator(2)), None);
        assert_eq!(t.iter().count(), 8);
    }

    #[test]
    fn duplicate_binding_unbinds_previous_holder() {
        let mut t = KeyBindingTable::with_actuators(2);
        assert_eq!(t.set(Control::Actuator(0), Some(Button::A)), None);
        assert_eq!(t.set(Control::Actuator(1), Some(Button::A)), Some(Control::Actuator(0)));
        assert_eq!(t.get(Control::Actuator(0)), None);
        assert_eq!(t.get(Control::Actuator(1)), Some(Button::A));
        assert_eq!(t.duplicate(), None);

        assert_eq!(t.set(Control::OrientationToggle, Some(Button::Right)), Some(Control::YawRight));
        assert_eq!(t.get(Control::YawRight), None);
    }

    #[test]
    fn tags_and_legacy_alias() {
        assert_eq!(Control::YawLeft.tag(), "left_yaw");
        assert_eq!(Control::from_tag("right_left"), Some(Control::YawLeft));
        assert_eq!(Control::from_tag("actuator4"), Some(Control::Actuator(4)));
        assert_eq!(Control::from_tag("actuator12"), None);
        assert_eq!(Control::from_tag("theme"), None);
    }

    #[test]
    fn actuator_count_resize_keeps_bindings() {
        let mut t = KeyBindingTable::with_actuators(4);
        t.set(Control::Actuator(1), Some(Button::B));
        t.set(Control::Actuator(3), Some(Button::Y));
        t.set_actuator_count(2);
        assert_eq!(t.get(Control::Actuator(1)), Some(Button::B));
        assert!(t.iter().all(|(c, _)| c != Control::Actuator(3)));
        t.set_actuator_count(5);
        assert_eq!(t.get(Control::Actuator(3)), None);
    }

    #[test]
    fn fires_once_per_press() {
        let mut t = KeyBindingTable::with_actuators(1);
        t.set(Control::Actuator(0), Some(Button::X));
        let mut d = PressDetector::default();
        let down = InputSnapshot::neutral(0).with_button(Button::X, true);
        let up = InputSnapshot::neutral(0);

        assert_eq!(d.pressed(&t, &down), vec![Control::Actuator(0)]);
        assert!(d.pressed(&t, &down).is_empty());
        assert!(d.pressed(&t, &up).is_empty());
        assert_eq!(d.pressed(&t, &down), vec![Control::Actuator(0)]);
    }
}
