//! Transect-line following: find the blue lane edges in the lower half of the
//! frame, derive a steering angle and watch for the red stop marker.

use std::f64::consts::PI;

use anyhow::Result;
use image::RgbImage;
use opencv::core::Mat;
use serde::Serialize;

use crate::imgproc::{self, HoughParams, Segment};

const BLUE_LOWER: [u8; 3] = [30, 40, 0];
const BLUE_UPPER: [u8; 3] = [150, 255, 255];
const RED_LOWER: [u8; 3] = [0, 120, 70];
const RED_UPPER: [u8; 3] = [10, 255, 255];

const HOUGH: HoughParams = HoughParams {
    rho: 1.0,
    theta: PI / 180.0,
    threshold: 10,
    min_line_length: 5.0,
    max_line_gap: 150.0,
};

const STRAIGHT: i32 = 90;
const MAX_STEP_TWO_LANES: i32 = 5;
const MAX_STEP_ONE_LANE: i32 = 1;
const CUE_DEADBAND: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SteeringCue {
    Left,
    Right,
    Neutral,
}

impl SteeringCue {
    pub fn from_angle(angle: i32) -> Self {
        let deviation = angle - STRAIGHT;
        if deviation < -CUE_DEADBAND {
            SteeringCue::Left
        } else if deviation > CUE_DEADBAND {
            SteeringCue::Right
        } else {
            SteeringCue::Neutral
        }
    }
}

/// A fitted lane boundary from the bottom edge up to the frame midline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lane {
    pub bottom: (i32, i32),
    pub top: (i32, i32),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Steering {
    /// 0..180, 90 is straight ahead.
    pub angle: i32,
    pub cue: SteeringCue,
    pub lanes: usize,
    pub stop_marker: bool,
}

#[derive(Debug, Clone)]
pub struct TransectLine {
    angle: i32,
}

impl Default for TransectLine {
    fn default() -> Self {
        Self { angle: STRAIGHT }
    }
}

fn segments(hsv: &Mat, lower: [u8; 3], upper: [u8; 3], low: f64, high: f64) -> Result<Vec<Segment>> {
    let mask = imgproc::in_range(hsv, lower, upper)?;
    let mut edges = imgproc::canny(&mask, low, high)?;
    imgproc::keep_lower_half(&mut edges)?;
    imgproc::hough_segments(&edges, &HOUGH)
}

/// Split segments into bands by slope and average each band. Exactly two
/// segments are treated as no detection.
pub fn average_lanes(segs: &[Segment], width: u32, height: u32) -> Vec<Lane> {
    if segs.is_empty() || segs.len() == 2 {
        return Vec::new();
    }
    let w = f64::from(width);
    let left_boundary = w * (1.0 - 1.0 / 3.0);
    let right_boundary = w / 3.0;

    let mut left = Vec::new();
    let mut right = Vec::new();
    for s in segs {
        if s.x1 == s.x2 {
            continue;
        }
        let (x1, y1, x2, y2) = (f64::from(s.x1), f64::from(s.y1), f64::from(s.x2), f64::from(s.y2));
        let slope = (y2 - y1) / (x2 - x1);
        let intercept = y1 - slope * x1;
        if slope < 0.0 {
            if x1 < left_boundary && x2 < left_boundary {
                left.push((slope, intercept));
            }
        } else if x1 > right_boundary && x2 > right_boundary {
            right.push((slope, intercept));
        }
    }

    [left, right]
        .iter()
        .filter(|band| !band.is_empty())
        .map(|band| {
            let n = band.len() as f64;
            let slope = band.iter().map(|f| f.0).sum::<f64>() / n;
            let intercept = band.iter().map(|f| f.1).sum::<f64>() / n;
            lane_points(slope, intercept, height)
        })
        .collect()
}

fn lane_points(slope: f64, intercept: f64, height: u32) -> Lane {
    let slope = if slope == 0.0 { 0.1 } else { slope };
    let y1 = height as i32;
    let y2 = y1 / 2;
    let x_at = |y: i32| ((f64::from(y) - intercept) / slope) as i32;
    Lane { bottom: (x_at(y1), y1), top: (x_at(y2), y2) }
}

/// Raw heading for the detected lanes, before stabilisation.
pub fn heading(lanes: &[Lane], width: u32, height: u32) -> i32 {
    let y_offset = f64::from(height as i32 / 2);
    let x_offset = match lanes {
        [l, r] => f64::from(l.top.0 + r.top.0) / 2.0 - f64::from(width as i32 / 2),
        [one] => f64::from(one.top.0 - one.bottom.0),
        _ => 0.0,
    };
    if y_offset == 0.0 {
        return STRAIGHT;
    }
    ((x_offset / y_offset).atan() * 180.0 / PI) as i32 + STRAIGHT
}

/// Limit the change from `current` to `max` degrees per tick.
pub fn stabilise(current: i32, new: i32, lanes: usize) -> i32 {
    let max = if lanes == 2 { MAX_STEP_TWO_LANES } else { MAX_STEP_ONE_LANE };
    let dev = new - current;
    if dev.abs() > max {
        current + max * dev.signum()
    } else {
        new
    }
}

impl TransectLine {
    pub fn process(&mut self, frame: RgbImage) -> Result<(RgbImage, Steering)> {
        let (w, h) = frame.dimensions();
        let (wi, hi) = (w as i32, h as i32);
        let rgb = imgproc::to_mat(&frame)?;
        let hsv = imgproc::to_hsv(&rgb)?;

        let lane_segs = segments(&hsv, BLUE_LOWER, BLUE_UPPER, 200.0, 400.0)?;
        let stop_marker = !segments(&hsv, RED_LOWER, RED_UPPER, 50.0, 100.0)?.is_empty();

        let lanes = average_lanes(&lane_segs, w, h);
        self.angle = stabilise(self.angle, heading(&lanes, w, h), lanes.len());

        let mut overlay = imgproc::blank(wi, hi, [0, 0, 0])?;
        for l in &lanes {
            imgproc::draw_line(&mut overlay, l.bottom, l.top, [0, 255, 0], 6)?;
        }
        let framed = imgproc::blend(&rgb, &overlay, 0.8, 1.0)?;

        let mut heading_img = imgproc::blank(wi, hi, [0, 0, 0])?;
        let rad = f64::from(self.angle) / 180.0 * PI;
        let x1 = wi / 2;
        let tan = rad.tan();
        let x2 = if tan.abs() < 1e-6 { x1 } else { (f64::from(x1) - f64::from(h) / 2.0 / tan) as i32 };
        imgproc::draw_line(&mut heading_img, (x1, hi), (x2, hi / 2), [255, 0, 0], 5)?;
        let out = imgproc::to_rgb(&imgproc::blend(&framed, &heading_img, 0.8, 1.0)?)?;

        let steering = Steering {
            angle: self.angle,
            cue: SteeringCue::from_angle(self.angle),
            lanes: lanes.len(),
            stop_marker,
        };
        Ok((out, steering))
    }
}
