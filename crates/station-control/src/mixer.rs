//! Thrust vectoring for the eight-thruster frame.
//!
//! Input axes and the yaw direction are decomposed into six motion components,
//! mixed through a fixed sign matrix, normalised to the largest stick
//! deflection, converted to pulse-width values and finally remapped onto the
//! physical slots the pilot assigned.

use serde::{Deserialize, Serialize};
use std::fmt;

use station_proto::frame::{MAX_US, MIN_US, NEUTRAL_US, THRUSTER_COUNT};

use crate::input::Axes;

/// Physical mount point on the hull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
}

impl Slot {
    pub const ALL: [Slot; THRUSTER_COUNT] =
        [Slot::A, Slot::B, Slot::C, Slot::D, Slot::E, Slot::F, Slot::G, Slot::H];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        ["A", "B", "C", "D", "E", "F", "G", "H"][self.index()]
    }

    /// Parses a profile label; `"None"` and unknown labels map to `None`.
    pub fn from_label(s: &str) -> Option<Slot> {
        Slot::ALL.into_iter().find(|slot| slot.label() == s)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One of the three sensitivity steps. The slider position 1..=3 maps to
/// `step / 3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sensitivity {
    Low,
    Normal,
    High,
}

impl Sensitivity {
    pub fn value(self) -> f64 {
        self.step() as f64 / 3.0
    }

    pub fn step(self) -> u8 {
        match self {
            Sensitivity::Low => 1,
            Sensitivity::Normal => 2,
            Sensitivity::High => 3,
        }
    }

    pub fn from_step(step: u8) -> Option<Self> {
        match step {
            1 => Some(Sensitivity::Low),
            2 => Some(Sensitivity::Normal),
            3 => Some(Sensitivity::High),
            _ => None,
        }
    }

    pub fn cycle(self) -> Self {
        match self {
            Sensitivity::Low => Sensitivity::Normal,
            Sensitivity::Normal => Sensitivity::High,
            Sensitivity::High => Sensitivity::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    Forward,
    Reversed,
}

impl Orientation {
    pub fn toggled(self) -> Self {
        match self {
            Orientation::Forward => Orientation::Reversed,
            Orientation::Reversed => Orientation::Forward,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub slot: Option<Slot>,
    pub reverse: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrusterConfig {
    pub channels: [ChannelConfig; THRUSTER_COUNT],
    pub joystick_sensitivity: Sensitivity,
    pub yaw_sensitivity: Sensitivity,
    pub orientation: Orientation,
}

impl Default for ThrusterConfig {
    /// Channel i drives slot i, nothing reversed.
    fn default() -> Self {
        let mut channels = [ChannelConfig { slot: None, reverse: false }; THRUSTER_COUNT];
        for (ch, slot) in channels.iter_mut().zip(Slot::ALL) {
            ch.slot = Some(slot);
        }
        Self {
            channels,
            joystick_sensitivity: Sensitivity::Normal,
            yaw_sensitivity: Sensitivity::Normal,
            orientation: Orientation::Forward,
        }
    }
}

impl ThrusterConfig {
    /// Assigns `slot` to `channel`. Any other channel already holding the same
    /// slot is reset to `None`; its index is returned so the caller can
    /// re-publish the repaired config.
    pub fn assign_slot(&mut self, channel: usize, slot: Option<Slot>) -> Option<usize> {
        if channel >= THRUSTER_COUNT {
            return None;
        }
        self.channels[channel].slot = slot;
        let slot = slot?;
        let mut repaired = None;
        for (i, ch) in self.channels.iter_mut().enumerate() {
            if i != channel && ch.slot == Some(slot) {
                ch.slot = None;
                repaired = Some(i);
            }
        }
        repaired
    }

    pub fn set_reverse(&mut self, channel: usize, reverse: bool) {
        if let Some(ch) = self.channels.get_mut(channel) {
            ch.reverse = reverse;
        }
    }

    /// Channel currently holding `slot`.
    pub fn channel_for(&self, slot: Slot) -> Option<usize> {
        self.channels.iter().position(|ch| ch.slot == Some(slot))
    }

    /// First slot claimed by more than one channel, if any.
    pub fn duplicate_slot(&self) -> Option<Slot> {
        Slot::ALL
            .into_iter()
            .find(|s| self.channels.iter().filter(|ch| ch.slot == Some(*s)).count() > 1)
    }
}

/// Sign matrix: rows are thrusters A..H, columns are
/// right/left, forward/backward, up/down, pitch, roll, yaw.
const MIX: [[f64; 6]; THRUSTER_COUNT] = [
    [1.0, 1.0, -1.0, -1.0, -1.0, 1.0],
    [-1.0, 1.0, -1.0, -1.0, 1.0, -1.0],
    [-1.0, -1.0, -1.0, 1.0, 1.0, 1.0],
    [1.0, -1.0, -1.0, 1.0, -1.0, -1.0],
    [1.0, 1.0, 1.0, 1.0, 1.0, 1.0],
    [-1.0, 1.0, 1.0, 1.0, -1.0, -1.0],
    [-1.0, -1.0, 1.0, -1.0, -1.0, 1.0],
    [1.0, -1.0, 1.0, -1.0, 1.0, -1.0],
];

/// Index map applied when the control orientation is reversed.
const REVERSE_ORIENTATION: [usize; THRUSTER_COUNT] = [2, 3, 0, 1, 6, 7, 4, 5];

/// Joystick magnitude substituted when only yaw is commanded.
const YAW_ONLY_MAGNITUDE: f64 = 0.5;

/// Normalised per-thruster speeds in `[-1, 1]`, thrusters A..H.
pub fn vector_speeds(axes: Axes, yaw_direction: i8, s_j: f64, s_y: f64) -> [f64; THRUSTER_COUNT] {
    let yaw = f64::from(yaw_direction.signum()) * s_y;
    let motion = [
        axes.left_x,
        -axes.left_y,
        -axes.triggers,
        axes.right_y,
        axes.right_x,
        yaw,
    ];

    let mut raw = [0.0; THRUSTER_COUNT];
    for (speed, row) in raw.iter_mut().zip(MIX.iter()) {
        *speed = row.iter().zip(motion.iter()).map(|(sign, m)| sign * m).sum();
    }

    let max_speed = raw.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let mut max_joystick = axes.max_abs();
    if yaw != 0.0 && max_joystick == 0.0 {
        max_joystick = YAW_ONLY_MAGNITUDE;
    }

    if max_speed > 0.0 {
        let scale = s_j * max_joystick / max_speed;
        raw.iter_mut().for_each(|v| *v *= scale);
    } else {
        raw = [0.0; THRUSTER_COUNT];
    }
    raw
}

/// Speed in `[-1, 1]` to pulse-width value.
pub fn to_microseconds(speed: f64) -> u16 {
    let us = (f64::from(NEUTRAL_US) + 499.0 * speed).round();
    us.clamp(f64::from(MIN_US), f64::from(MAX_US)) as u16
}

pub fn reorient(speeds: [u16; THRUSTER_COUNT]) -> [u16; THRUSTER_COUNT] {
    let mut out = [NEUTRAL_US; THRUSTER_COUNT];
    for (o, src) in out.iter_mut().zip(REVERSE_ORIENTATION) {
        *o = speeds[src];
    }
    out
}

/// Place each slot's speed at the position of the channel that claims it.
pub fn map_slots(speeds: [u16; THRUSTER_COUNT], cfg: &ThrusterConfig) -> [u16; THRUSTER_COUNT] {
    let mut out = [NEUTRAL_US; THRUSTER_COUNT];
    for slot in Slot::ALL {
        if let Some(channel) = cfg.channel_for(slot) {
            out[channel] = speeds[slot.index()];
        }
    }
    out
}

pub fn apply_reverse(mut speeds: [u16; THRUSTER_COUNT], cfg: &ThrusterConfig) -> [u16; THRUSTER_COUNT] {
    for (s, ch) in speeds.iter_mut().zip(cfg.channels.iter()) {
        if ch.reverse {
            *s = 1000 - *s;
        }
    }
    speeds
}

/// Full pipeline: axes + yaw → eight pulse-width values ready for `?RT`.
pub fn mix(axes: Axes, yaw_direction: i8, cfg: &ThrusterConfig) -> [u16; THRUSTER_COUNT] {
    let speeds = vector_speeds(
        axes,
        yaw_direction,
        cfg.joystick_sensitivity.value(),
        cfg.yaw_sensitivity.value(),
    );
    let mut us = speeds.map(to_microseconds);
    if cfg.orientation == Orientation::Reversed {
        us = reorient(us);
    }
    apply_reverse(map_slots(us, cfg), cfg)
}

/// Spin one channel at `percent` of full forward speed, everything else
/// neutral. Reversal still applies so the pilot sees the real direction.
pub fn test_speeds(channel: usize, percent: u8, cfg: &ThrusterConfig) -> [u16; THRUSTER_COUNT] {
    let mut speeds = [NEUTRAL_US; THRUSTER_COUNT];
    if let Some(s) = speeds.get_mut(channel) {
        let pct = f64::from(percent.clamp(1, 100));
        *s = (f64::from(NEUTRAL_US) + 499.0 * pct / 100.0) as u16;
    }
    apply_reverse(speeds, cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaw_right() -> [u16; 8] {
        mix(Axes::default(), 1, &ThrusterConfig::default())
    }

    #[test]
    fn neutral_input_is_all_neutral() {
        assert_eq!(mix(Axes::default(), 0, &ThrusterConfig::default()), [500; 8]);
    }

    #[test]
    fn yaw_only_right_splits_symmetrically() {
        let out = yaw_right();
        for (i, v) in out.iter().enumerate() {
            assert!(*v > 1 && *v < 999);
            if i % 2 == 0 {
                assert!(*v > 500, "channel {i} = {v}");
            } else {
                assert!(*v < 500, "channel {i} = {v}");
            }
        }
        // s_y = s_j = 2/3 and j = 0.5 give |speed| = 1/3
        assert_eq!(out, [666, 334, 666, 334, 666, 334, 666, 334]);
        assert_eq!(out[0] - 500, 500 - out[1]);
    }

    #[test]
    fn reversed_orientation_permutes_output() {
        let fwd = yaw_right();
        let cfg = ThrusterConfig { orientation: Orientation::Reversed, ..Default::default() };
        let rev = mix(Axes::default(), 1, &cfg);
        assert_eq!(rev, [fwd[2], fwd[3], fwd[0], fwd[1], fwd[6], fwd[7], fwd[4], fwd[5]]);
    }

    #[test]
    fn reorient_is_an_involution() {
        let v = [1, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(reorient(reorient(v)), v);
    }

    #[test]
    fn channel_reverse_twice_is_identity() {
        let axes = Axes { left_x: 0.4, left_y: -0.7, triggers: 0.2, right_y: 0.0, right_x: 0.1 };
        let mut cfg = ThrusterConfig::default();
        let base = mix(axes, 0, &cfg);
        cfg.set_reverse(3, true);
        let flipped = mix(axes, 0, &cfg);
        assert_eq!(flipped[3], 1000 - base[3]);
        cfg.set_reverse(3, false);
        assert_eq!(mix(axes, 0, &cfg), base);
    }

    #[test]
    fn forward_stick_drives_front_and_rear_apart() {
        // full forward: -left_y = 1, j = 1, s_j = 2/3
        let axes = Axes { left_y: -1.0, ..Default::default() };
        let out = mix(axes, 0, &ThrusterConfig::default());
        assert_eq!(out[0], to_microseconds(2.0 / 3.0));
        assert_eq!(out[2], to_microseconds(-2.0 / 3.0));
        assert_eq!(out[4], out[0]);
        assert_eq!(out[7], out[2]);
    }

    #[test]
    fn output_always_in_range() {
        let cfg = ThrusterConfig {
            joystick_sensitivity: Sensitivity::High,
            yaw_sensitivity: Sensitivity::High,
            ..Default::default()
        };
        let vals = [-1.0, -0.55, 0.0, 0.3, 1.0];
        for &a in &vals {
            for &b in &vals {
                for yaw in [-1, 0, 1] {
                    let axes = Axes { left_x: a, left_y: b, triggers: -a, right_y: b, right_x: a };
                    for v in mix(axes, yaw, &cfg) {
                        assert!((1..=999).contains(&v));
                    }
                }
            }
        }
    }

    #[test]
    fn slot_collision_resets_previous_holder() {
        let mut cfg = ThrusterConfig::default();
        assert_eq!(cfg.channels[0].slot, Some(Slot::A));
        assert_eq!(cfg.channels[3].slot, Some(Slot::D));
        let before = cfg.clone();

        let repaired = cfg.assign_slot(3, Some(Slot::A));
        assert_eq!(repaired, Some(0));
        assert_eq!(cfg.channels[3].slot, Some(Slot::A));
        assert_eq!(cfg.channels[0].slot, None);
        for i in [1, 2, 4, 5, 6, 7] {
            assert_eq!(cfg.channels[i], before.channels[i]);
        }
        assert_eq!(cfg.duplicate_slot(), None);
    }

    #[test]
    fn unassigned_channel_emits_neutral() {
        let mut cfg = ThrusterConfig::default();
        cfg.assign_slot(2, None);
        let out = mix(Axes::default(), 1, &cfg);
        assert_eq!(out[2], 500);
    }

    #[test]
    fn slot_remap_moves_speed_to_claiming_channel() {
        let mut cfg = ThrusterConfig::default();
        // channel 0 now drives slot H, which displaces channel 7
        cfg.assign_slot(0, Some(Slot::H));
        let speeds = [10, 20, 30, 40, 50, 60, 70, 80];
        let out = map_slots(speeds, &cfg);
        assert_eq!(out[0], 80);
        assert_eq!(out[7], 500);
        assert_eq!(out[1..7], speeds[1..7]);
    }

    #[test]
    fn sensitivity_steps() {
        assert!((Sensitivity::Normal.value() - 0.6667).abs() < 1e-3);
        assert_eq!(Sensitivity::High.value(), 1.0);
        assert_eq!(Sensitivity::High.cycle(), Sensitivity::Low);
        assert_eq!(Sensitivity::from_step(2), Some(Sensitivity::Normal));
        assert_eq!(Sensitivity::from_step(4), None);
    }

    #[test]
    fn thruster_test_frame() {
        let mut cfg = ThrusterConfig::default();
        assert_eq!(test_speeds(5, 10, &cfg), [500, 500, 500, 500, 500, 549, 500, 500]);
        cfg.set_reverse(5, true);
        assert_eq!(test_speeds(5, 10, &cfg)[5], 451);
        assert_eq!(test_speeds(9, 10, &cfg), [500; 8]);
    }
}
