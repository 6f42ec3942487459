use serde::{Deserialize, Serialize};

pub const AXIS_COUNT: usize = 5;
pub const BUTTON_COUNT: usize = 14;
pub const DEADZONE: f64 = 0.1;

/// Controller buttons in wire/profile order. The last four are synthesised
/// from the directional hat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Button {
    A,
    B,
    X,
    Y,
    Lb,
    Rb,
    Select,
    Start,
    Ls,
    Rs,
    Left,
    Right,
    Down,
    Up,
}

impl Button {
    pub const ALL: [Button; BUTTON_COUNT] = [
        Button::A,
        Button::B,
        Button::X,
        Button::Y,
        Button::Lb,
        Button::Rb,
        Button::Select,
        Button::Start,
        Button::Ls,
        Button::Rs,
        Button::Left,
        Button::Right,
        Button::Down,
        Button::Up,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Token used by key bindings and the profile file.
    pub fn token(self) -> &'static str {
        match self {
            Button::A => "A",
            Button::B => "B",
            Button::X => "X",
            Button::Y => "Y",
            Button::Lb => "LB",
            Button::Rb => "RB",
            Button::Select => "SELECT",
            Button::Start => "START",
            Button::Ls => "LS",
            Button::Rs => "RS",
            Button::Left => "LEFT",
            Button::Right => "RIGHT",
            Button::Down => "DOWN",
            Button::Up => "UP",
        }
    }

    pub fn from_token(token: &str) -> Option<Button> {
        Button::ALL.into_iter().find(|b| b.token() == token)
    }
}

/// Stick and trigger readings in `[-1, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Axes {
    pub left_x: f64,
    pub left_y: f64,
    /// Combined triggers: left trigger negative, right trigger positive.
    pub triggers: f64,
    pub right_y: f64,
    pub right_x: f64,
}

impl Axes {
    pub fn to_array(self) -> [f64; AXIS_COUNT] {
        [self.left_x, self.left_y, self.triggers, self.right_y, self.right_x]
    }

    pub fn from_array(a: [f64; AXIS_COUNT]) -> Self {
        Self { left_x: a[0], left_y: a[1], triggers: a[2], right_y: a[3], right_x: a[4] }
    }

    pub fn max_abs(self) -> f64 {
        self.to_array().iter().fold(0.0, |m, v| m.max(v.abs()))
    }

    pub fn is_zero(self) -> bool {
        self.max_abs() == 0.0
    }
}

/// One unfiltered device reading. The hat is reported as `(x, y)` with each
/// component in `{-1, 0, 1}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawInput {
    pub axes: [f64; AXIS_COUNT],
    /// The ten physical buttons, A through RS.
    pub buttons: [bool; 10],
    pub hat: (i8, i8),
}

/// Immutable per-tick controller state after filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSnapshot {
    pub axes: Axes,
    pub buttons: [bool; BUTTON_COUNT],
    pub tick: u64,
}

impl InputSnapshot {
    pub fn neutral(tick: u64) -> Self {
        Self { axes: Axes::default(), buttons: [false; BUTTON_COUNT], tick }
    }

    pub fn pressed(&self, b: Button) -> bool {
        self.buttons[b.index()]
    }

    pub fn with_button(mut self, b: Button, down: bool) -> Self {
        self.buttons[b.index()] = down;
        self
    }
}

/// Clamp, apply the symmetric deadzone, then round to two decimals.
pub fn filter_axis(x: f64) -> f64 {
    if !x.is_finite() {
        return 0.0;
    }
    let x = x.clamp(-1.0, 1.0);
    if x.abs() < DEADZONE {
        return 0.0;
    }
    (x * 100.0).round() / 100.0
}

/// Expand one hat component into its (low, high) button pair.
fn hat_pair(v: i8) -> (bool, bool) {
    match v.signum() {
        -1 => (true, false),
        1 => (false, true),
        _ => (false, false),
    }
}

pub fn filter(raw: &RawInput, tick: u64) -> InputSnapshot {
    let mut axes = raw.axes;
    for a in axes.iter_mut() {
        *a = filter_axis(*a);
    }

    let mut buttons = [false; BUTTON_COUNT];
    buttons[..10].copy_from_slice(&raw.buttons);
    let (left, right) = hat_pair(raw.hat.0);
    let (down, up) = hat_pair(raw.hat.1);
    buttons[Button::Left.index()] = left;
    buttons[Button::Right.index()] = right;
    buttons[Button::Down.index()] = down;
    buttons[Button::Up.index()] = up;

    InputSnapshot { axes: Axes::from_array(axes), buttons, tick }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YawState {
    /// +1 right, -1 left, 0 none.
    pub direction: i8,
    /// True only on the tick the (right, left) pair changed.
    pub active: bool,
}

/// Edge detector over the yaw-right / yaw-left pair.
#[derive(Debug, Clone, Default)]
pub struct YawTracker {
    prev: (bool, bool),
}

impl YawTracker {
    pub fn update(&mut self, right: bool, left: bool) -> YawState {
        let active = (right, left) != self.prev;
        self.prev = (right, left);
        let direction = match (right, left) {
            (true, false) => 1,
            (false, true) => -1,
            _ => 0,
        };
        YawState { direction, active }
    }
}
