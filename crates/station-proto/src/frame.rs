//! ASCII line protocol spoken with the ROV.
//!
//! Every frame is a single line terminated by LF. Command frames start with
//! `?`; the ROV answers identity and sensor requests with bare lines.

use std::fmt;

use thiserror::Error;

/// Identity line the ROV answers to `?I`.
pub const ROV_IDENTITY: &str = "AVALONROV";

/// Pulse-width value meaning "stop".
pub const NEUTRAL_US: u16 = 500;
pub const MIN_US: u16 = 1;
pub const MAX_US: u16 = 999;

pub const THRUSTER_COUNT: usize = 8;

#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("unknown verb in {0:?}")]
    UnknownVerb(String),
    #[error("thruster frame needs {expected} digits, got {got}")]
    ThrusterLength { expected: usize, got: usize },
    #[error("thruster value {0} outside 1..=999")]
    ThrusterRange(u16),
    #[error("non-digit in frame payload {0:?}")]
    BadDigit(String),
    #[error("malformed sensor field {0:?}")]
    SensorField(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Identify,
    ArmThrusters,
    Thrusters([u16; THRUSTER_COUNT]),
    Actuators(Vec<bool>),
    RequestSensors,
}

impl Frame {
    /// Line body without the trailing LF.
    pub fn encode(&self) -> String {
        match self {
            Frame::Identify => "?I".to_string(),
            Frame::ArmThrusters => "?RX".to_string(),
            Frame::Thrusters(speeds) => {
                let mut s = String::with_capacity(3 + 3 * THRUSTER_COUNT);
                s.push_str("?RT");
                for v in speeds {
                    s.push_str(&format!("{:03}", (*v).clamp(MIN_US, MAX_US)));
                }
                s
            }
            Frame::Actuators(states) => {
                let mut s = String::with_capacity(3 + states.len());
                s.push_str("?RA");
                s.extend(states.iter().map(|on| if *on { '1' } else { '0' }));
                s
            }
            Frame::RequestSensors => "?RS".to_string(),
        }
    }

    /// Parse a command frame as written by [`Frame::encode`]. Used by the ROV
    /// emulator in tests and by `station` diagnostics.
    pub fn parse(line: &str) -> Result<Frame, FrameError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Err(FrameError::Empty);
        }
        match line {
            "?I" => return Ok(Frame::Identify),
            "?RX" => return Ok(Frame::ArmThrusters),
            "?RS" => return Ok(Frame::RequestSensors),
            _ => {}
        }
        if let Some(payload) = line.strip_prefix("?RT") {
            return parse_thrusters(payload).map(Frame::Thrusters);
        }
        if let Some(payload) = line.strip_prefix("?RA") {
            let states = payload
                .chars()
                .map(|c| match c {
                    '0' => Ok(false),
                    '1' => Ok(true),
                    _ => Err(FrameError::BadDigit(payload.to_string())),
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Frame::Actuators(states));
        }
        Err(FrameError::UnknownVerb(line.to_string()))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn parse_thrusters(payload: &str) -> Result<[u16; THRUSTER_COUNT], FrameError> {
    let expected = 3 * THRUSTER_COUNT;
    if payload.len() != expected {
        return Err(FrameError::ThrusterLength { expected, got: payload.len() });
    }
    if !payload.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FrameError::BadDigit(payload.to_string()));
    }
    let mut out = [NEUTRAL_US; THRUSTER_COUNT];
    for (i, slot) in out.iter_mut().enumerate() {
        let digits = &payload[3 * i..3 * i + 3];
        let v: u16 = digits.parse().map_err(|_| FrameError::BadDigit(digits.to_string()))?;
        if !(MIN_US..=MAX_US).contains(&v) {
            return Err(FrameError::ThrusterRange(v));
        }
        *slot = v;
    }
    Ok(out)
}

/// Parse a `?RS` response: comma-separated decimal fields, any count.
pub fn parse_sensor_line(line: &str) -> Result<Vec<f64>, FrameError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(FrameError::Empty);
    }
    line.split(',')
        .map(|field| {
            let field = field.trim();
            field
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| FrameError::SensorField(field.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_thruster_frame() {
        let f = Frame::Thrusters([NEUTRAL_US; 8]);
        assert_eq!(f.encode(), "?RT500500500500500500500500");
    }

    #[test]
    fn thruster_frame_pads_and_parses_back() {
        let speeds = [1, 42, 500, 999, 334, 666, 7, 100];
        let line = Frame::Thrusters(speeds).encode();
        assert_eq!(line, "?RT001042500999334666007100");
        assert_eq!(line.len(), 3 + 24);
        assert_eq!(Frame::parse(&line).unwrap(), Frame::Thrusters(speeds));
    }

    #[test]
    fn thruster_frame_rejects_bad_payloads() {
        assert_eq!(
            Frame::parse("?RT500"),
            Err(FrameError::ThrusterLength { expected: 24, got: 3 })
        );
        assert_eq!(
            Frame::parse("?RT000500500500500500500500"),
            Err(FrameError::ThrusterRange(0))
        );
        assert!(matches!(Frame::parse("?RT50050050050050050050050x"), Err(FrameError::BadDigit(_))));
    }

    #[test]
    fn actuator_frame_is_one_digit_per_state() {
        let f = Frame::Actuators(vec![true, false, false, true]);
        assert_eq!(f.encode(), "?RA1001");
        assert_eq!(Frame::parse("?RA1001\n").unwrap(), f);
        assert_eq!(Frame::Actuators(vec![]).encode(), "?RA");
    }

    #[test]
    fn simple_verbs() {
        assert_eq!(Frame::Identify.encode(), "?I");
        assert_eq!(Frame::ArmThrusters.encode(), "?RX");
        assert_eq!(Frame::RequestSensors.encode(), "?RS");
        assert_eq!(Frame::parse("?RS\r\n").unwrap(), Frame::RequestSensors);
        assert!(matches!(Frame::parse("?ZZ"), Err(FrameError::UnknownVerb(_))));
    }

    #[test]
    fn sensor_line_keeps_every_field() {
        let v = parse_sensor_line("23.1,1.8,12,3,-4\n").unwrap();
        assert_eq!(v, vec![23.1, 1.8, 12.0, 3.0, -4.0]);
    }

    #[test]
    fn sensor_line_rejects_garbage() {
        assert_eq!(parse_sensor_line(""), Err(FrameError::Empty));
        assert!(matches!(parse_sensor_line("1.0,abc"), Err(FrameError::SensorField(_))));
        assert!(matches!(parse_sensor_line("1.0,,2"), Err(FrameError::SensorField(_))));
        assert!(matches!(parse_sensor_line("NaN"), Err(FrameError::SensorField(_))));
    }
}
